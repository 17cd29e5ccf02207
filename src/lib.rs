// chatsync: conversation/message synchronization engine.
//
// Keeps a local message cache consistent across three concurrently-arriving
// sources: cursor-paginated history, a live insert/update event feed, and
// optimistic local writes awaiting server acknowledgment.

pub mod gateway;
pub mod models;
pub mod sync;

// Re-export the main types for convenience
pub use gateway::{MessageGateway, SendAck, SendError, SendErrorKind};
pub use models::*;
pub use sync::{EngineConfig, SyncEngine};
