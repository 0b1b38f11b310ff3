//! Client/server message shapes and their struct signatures (§4.5).
//!
//! Every Bolt v1 message is a struct whose fields are exactly the
//! arguments listed here; the signature byte identifies which one.

use crate::value::{Value, ValueMap};

pub mod signature {
    pub const INIT: u8 = 0x01;
    pub const RUN: u8 = 0x10;
    pub const DISCARD_ALL: u8 = 0x2F;
    pub const PULL_ALL: u8 = 0x3F;
    pub const ACK_FAILURE: u8 = 0x0E;
    pub const RESET: u8 = 0x0F;

    pub const SUCCESS: u8 = 0x70;
    pub const RECORD: u8 = 0x71;
    pub const IGNORED: u8 = 0x7E;
    pub const FAILURE: u8 = 0x7F;
}

/// A request sent from the client to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Init { client_name: String, auth_token: ValueMap },
    Run { statement: String, parameters: ValueMap },
    DiscardAll,
    PullAll,
    AckFailure,
    Reset,
}

impl ClientMessage {
    pub fn signature(&self) -> u8 {
        match self {
            ClientMessage::Init { .. } => signature::INIT,
            ClientMessage::Run { .. } => signature::RUN,
            ClientMessage::DiscardAll => signature::DISCARD_ALL,
            ClientMessage::PullAll => signature::PULL_ALL,
            ClientMessage::AckFailure => signature::ACK_FAILURE,
            ClientMessage::Reset => signature::RESET,
        }
    }

    pub fn fields(&self) -> Vec<Value> {
        match self {
            ClientMessage::Init { client_name, auth_token } => vec![
                Value::string(client_name.clone()),
                Value::Map(auth_token.clone()),
            ],
            ClientMessage::Run { statement, parameters } => vec![
                Value::string(statement.clone()),
                Value::Map(parameters.clone()),
            ],
            ClientMessage::DiscardAll
            | ClientMessage::PullAll
            | ClientMessage::AckFailure
            | ClientMessage::Reset => Vec::new(),
        }
    }
}

/// A response sent from the server to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Success(ValueMap),
    Record(Vec<Value>),
    Ignored,
    Failure(ValueMap),
}

impl ServerMessage {
    pub fn from_signature_and_fields(signature: u8, mut fields: Vec<Value>) -> Option<Self> {
        match signature {
            self::signature::SUCCESS if fields.len() == 1 => match fields.pop().unwrap() {
                Value::Map(m) => Some(ServerMessage::Success(m)),
                _ => None,
            },
            self::signature::RECORD if fields.len() == 1 => match fields.pop().unwrap() {
                Value::List(items) => Some(ServerMessage::Record(items)),
                _ => None,
            },
            self::signature::IGNORED if fields.is_empty() => Some(ServerMessage::Ignored),
            self::signature::FAILURE if fields.len() == 1 => match fields.pop().unwrap() {
                Value::Map(m) => Some(ServerMessage::Failure(m)),
                _ => None,
            },
            _ => None,
        }
    }

    /// True for the two message kinds ([`ServerMessage::Success`] and
    /// [`ServerMessage::Failure`]) that close out a request: no further
    /// `RECORD`/`IGNORED` belongs to the same request after one of these.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerMessage::Success(_) | ServerMessage::Failure(_))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn init_signature_and_fields() {
        let mut auth = ValueMap::new();
        auth.insert("scheme", Value::string("basic"));
        let msg = ClientMessage::Init {
            client_name: "bolt-core/0.1".to_string(),
            auth_token: auth,
        };
        assert_eq!(msg.signature(), signature::INIT);
        assert_eq!(msg.fields().len(), 2);
    }

    #[test]
    fn discard_all_has_no_fields() {
        assert!(ClientMessage::DiscardAll.fields().is_empty());
    }

    #[test]
    fn success_decodes_from_signature_and_fields() {
        let mut m = ValueMap::new();
        m.insert("fields", Value::List(vec![]));
        let decoded = ServerMessage::from_signature_and_fields(signature::SUCCESS, vec![Value::Map(m)]);
        assert!(matches!(decoded, Some(ServerMessage::Success(_))));
    }

    #[test]
    fn ignored_rejects_unexpected_fields() {
        let decoded = ServerMessage::from_signature_and_fields(signature::IGNORED, vec![Value::Null]);
        assert!(decoded.is_none());
    }

    #[test]
    fn success_and_failure_are_terminal() {
        assert!(ServerMessage::Success(ValueMap::new()).is_terminal());
        assert!(ServerMessage::Failure(ValueMap::new()).is_terminal());
        assert!(!ServerMessage::Ignored.is_terminal());
        assert!(!ServerMessage::Record(vec![]).is_terminal());
    }
}
