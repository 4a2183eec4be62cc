//! Postgres wire protocol messages.
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
pub mod backend;
pub mod frontend;

mod error;
mod pg_type;

pub use backend::{BackendMessage, BackendProtocol};
pub use error::ProtocolError;
pub use frontend::FrontendProtocol;
pub use pg_type::{Oid, oid};
