//! Minimal synchronous Postgres driver.
//!
//! Speaks the v3.0 frontend/backend protocol over TCP (optionally TLS),
//! using the simple query flow only: statements are submitted as text with
//! `%s` parameter substitution and results come back as decoded rows.
//!
//! # Examples
//!
//! ```no_run
//! use pgmini::{Config, Value};
//!
//! # fn app() -> pgmini::Result<()> {
//! let mut conn = pgmini::connect(
//!     Config::new("localhost", "postgres").password("secret").database("app"),
//! )?;
//!
//! let mut cursor = conn.cursor();
//! cursor.execute("SELECT id, name FROM account WHERE id = %s", &[Value::Int(420)])?;
//!
//! for row in cursor.fetchall()? {
//!     println!("{row:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Connections keep an implicit transaction block open between statements;
//! call [`Connection::commit`] to make work durable, or switch the
//! connection to autocommit with [`Connection::set_autocommit`].

mod common;
mod ext;
mod net;
mod stream;

// Protocol
pub mod postgres;

// Authentication
pub mod auth;

// Encoding
pub mod escape;
pub mod value;
mod sql;

// Component
pub mod connection;
pub mod cursor;

mod error;

pub use connection::{Config, Connection};
pub use cursor::{Column, Cursor, Row};
pub use error::{Error, ErrorKind, Result};
pub use escape::{Escapers, ValueKind};
pub use value::Value;

/// Database API level this driver models.
pub const APILEVEL: &str = "2.0";

/// Connections may be shared across threads with external locking, but
/// cursors on one connection must be serialized by the caller.
pub const THREADSAFETY: u8 = 1;

/// Parameters are spliced through `%s` format placeholders.
pub const PARAMSTYLE: &str = "format";

/// Driver version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Open a [`Connection`] with the given config.
pub fn connect(config: Config) -> Result<Connection> {
    Connection::connect(config)
}

/// Create a database, connecting to the maintenance `postgres` database.
///
/// `CREATE DATABASE` cannot run inside a transaction block, so this goes
/// through the message loop directly without the implicit `BEGIN`.
pub fn create_database(config: Config, name: &str) -> Result<()> {
    admin_statement(config, &format!("CREATE DATABASE {name}"))
}

/// Drop a database, connecting to the maintenance `postgres` database.
pub fn drop_database(config: Config, name: &str) -> Result<()> {
    admin_statement(config, &format!("DROP DATABASE {name}"))
}

fn admin_statement(config: Config, statement: &str) -> Result<()> {
    let mut conn = Connection::connect(config.database("postgres"))?;
    conn.query_drain(statement, &mut cursor::QueryResult::default())
}
