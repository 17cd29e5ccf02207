// Identity resolution for messages arriving from different origins.
//
// A record staged locally carries only a client token; a record from history
// or the live feed carries a server id; a reconciled optimistic write carries
// both. Two records denote the same logical message only when they agree on a
// key they both hold. There is no heuristic matching by timestamp or content,
// which would risk false merges.

use crate::models::{Message, MessageIdentity};

/// Decide whether two identities denote the same logical message.
///
/// Server-id equality wins when both sides have one; otherwise client-token
/// equality when both sides have one; otherwise no match. A server-id-only
/// record matches a token-only record solely through the send pipeline, which
/// writes the acknowledged server id onto the record that already holds the
/// token.
pub fn same_message(a: &MessageIdentity, b: &MessageIdentity) -> bool {
    if let (Some(a_srv), Some(b_srv)) = (&a.server_id, &b.server_id) {
        return a_srv == b_srv;
    }
    if let (Some(a_tok), Some(b_tok)) = (&a.client_token, &b.client_token) {
        return a_tok == b_tok;
    }
    false
}

/// Find the cached message matching `identity`, if any.
pub fn find_match(messages: &[Message], identity: &MessageIdentity) -> Option<usize> {
    messages
        .iter()
        .position(|m| same_message(&m.identity, identity))
}

/// Find the cached message staged under `client_token`, if any.
pub fn find_by_token(messages: &[Message], client_token: &str) -> Option<usize> {
    messages
        .iter()
        .position(|m| m.identity.client_token.as_deref() == Some(client_token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_id_equality_wins() {
        let a = MessageIdentity {
            server_id: Some("s1".to_string()),
            client_token: Some("t1".to_string()),
        };
        let b = MessageIdentity {
            server_id: Some("s1".to_string()),
            client_token: Some("t2".to_string()),
        };
        // Both have server ids, so tokens are not consulted
        assert!(same_message(&a, &b));

        let c = MessageIdentity {
            server_id: Some("s2".to_string()),
            client_token: Some("t1".to_string()),
        };
        assert!(!same_message(&a, &c));
    }

    #[test]
    fn test_token_equality_when_server_id_missing() {
        let staged = MessageIdentity::from_token("t1");
        let event = MessageIdentity {
            server_id: Some("s1".to_string()),
            client_token: Some("t1".to_string()),
        };
        assert!(same_message(&staged, &event));
    }

    #[test]
    fn test_no_heuristic_cross_matching() {
        // A server-id-only record never matches a token-only record: the
        // pairing has to be established by the send pipeline.
        let server_only = MessageIdentity::from_server("s1");
        let token_only = MessageIdentity::from_token("t1");
        assert!(!same_message(&server_only, &token_only));
        assert!(!same_message(&token_only, &server_only));
    }

    #[test]
    fn test_absence_of_match_is_not_an_error() {
        let a = MessageIdentity::from_server("s1");
        let b = MessageIdentity::from_server("s2");
        assert!(!same_message(&a, &b));
    }
}
