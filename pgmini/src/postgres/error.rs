use super::backend::BackendMessage;

/// An error when translating buffer from postgres.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unexpected {} message{}", name(.found), expected(.expect))]
    Unexpected {
        expect: Option<u8>,
        found: u8,
    },
    #[error("malformed {name} message")]
    Malformed {
        name: &'static str,
    },
}

fn name(msgtype: &u8) -> &'static str {
    BackendMessage::message_name(*msgtype)
}

fn expected(expect: &Option<u8>) -> String {
    match expect {
        Some(e) => format!(", expected {}", BackendMessage::message_name(*e)),
        None => String::new(),
    }
}

impl ProtocolError {
    pub(crate) fn unknown(found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
        }
    }

    pub(crate) fn unexpected(expect: u8, found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: Some(expect),
            found,
        }
    }

    pub(crate) fn malformed(name: &'static str) -> ProtocolError {
        Self::Malformed { name }
    }
}
