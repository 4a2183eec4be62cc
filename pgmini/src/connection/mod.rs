//! Postgres connection and the per-statement message loop.
//!
//! A [`Connection`] exclusively owns the transport and is the sole writer of
//! the protocol stream. Statements go through the simple query protocol:
//! one `Query` frame out, then the reply stream is drained into a
//! [`QueryResult`] until `ReadyForQuery` reports the next transaction state.
use log::{debug, trace, warn};
use std::io::Read;

use crate::{
    Result,
    auth::{md5_password, scram::ScramClient},
    cursor::{Cursor, QueryResult, decode_data_row, parse_row_description},
    error::{Error, ErrorKind},
    postgres::{
        backend::{Authentication, BackendMessage, ParameterStatus},
        frontend,
    },
    stream::PgStream,
    value::Value,
};

mod config;

pub use config::{Config, ParseError};

/// A single postgres connection.
///
/// Between statements the driver keeps a transaction block open; see
/// [`commit`][Connection::commit] and [`rollback`][Connection::rollback].
/// With autocommit on, every statement is committed as it completes.
pub struct Connection {
    stream: Option<PgStream>,
    config: Config,
    encoding: String,
    server_version: i32,
    timezone: Option<String>,
    tx_status: u8,
    autocommit: bool,
}

impl Connection {
    /// Open a connection and run the startup and authentication phase.
    ///
    /// <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-START-UP>
    pub fn connect(config: Config) -> Result<Connection> {
        let mut conn = Connection {
            stream: None,
            config,
            encoding: "UTF8".into(),
            server_version: 0,
            timezone: None,
            tx_status: b'I',
            autocommit: false,
        };
        conn.open()?;
        Ok(conn)
    }

    /// Connect using [`Config::from_env`].
    pub fn connect_env() -> Result<Connection> {
        Self::connect(Config::from_env())
    }

    /// Connect using a `postgres://` url.
    pub fn connect_url(url: &str) -> Result<Connection> {
        Self::connect(Config::parse(url)?)
    }

    fn open(&mut self) -> Result<()> {
        let mut stream = PgStream::connect(&self.config)?;

        // To begin a session, a frontend opens a connection to the server
        // and sends a startup message.
        stream.send_startup(frontend::Startup {
            user: &self.config.user,
            database: self.config.dbname.as_deref(),
        });
        stream.flush()?;
        self.stream = Some(stream);
        self.tx_status = b'I';

        // The server then sends authentication requests, ParameterStatus
        // reports and BackendKeyData, finishing with ReadyForQuery. All of
        // it is handled by the regular message loop.
        self.process_messages(&mut QueryResult::default())?;

        debug!(
            "connected to {}:{} as {:?}",
            self.config.host, self.config.port, self.config.user,
        );
        Ok(())
    }

    /// Read frames until `ReadyForQuery`, dispatching on the type code.
    ///
    /// Row data, the column description, the rowcount and COPY traffic land
    /// in `result`. If the server reported an error, the first one is raised
    /// after the stream is drained, so partial state stays inspectable.
    pub(crate) fn process_messages(&mut self, result: &mut QueryResult) -> Result<()> {
        let mut error: Option<Error> = None;
        let mut scram: Option<ScramClient> = None;

        loop {
            // A failed authentication ends with the server closing the
            // stream before any ReadyForQuery; surface the stored server
            // error over the read failure in that case.
            let message = match self.stream.as_mut() {
                Some(stream) => match stream.recv_message() {
                    Ok(message) => message,
                    Err(recv_error) => return Err(error.unwrap_or(recv_error)),
                },
                None => return Err(Error::lost_connection(ErrorKind::Operational)),
            };
            match message {
                BackendMessage::ReadyForQuery(ready) => {
                    self.tx_status = ready.tx_status;
                    break;
                }
                BackendMessage::Authentication(auth) => {
                    self.handle_authentication(auth, &mut scram)?;
                }
                BackendMessage::ParameterStatus(param) => self.handle_parameter_status(param),
                BackendMessage::BackendKeyData(_) => { }
                BackendMessage::CommandComplete(complete) => {
                    if let Some(rows) = complete.rows() {
                        result.rowcount = rows;
                    }
                }
                BackendMessage::RowDescription(description) => {
                    result.description = parse_row_description(description.body)?;
                }
                BackendMessage::DataRow(row) => {
                    let row = decode_data_row(row.body, &result.description, &self.encoding)?;
                    result.rows.push_back(row);
                }
                BackendMessage::NoticeResponse(notice) => {
                    if let Some(message) = notice.message() {
                        warn!("{message}");
                    }
                }
                BackendMessage::ErrorResponse(response) => {
                    // only the first error of a batch is kept
                    if error.is_none() {
                        error = Some(Error::from_error_response(&response));
                    }
                }
                BackendMessage::CopyInResponse(_) => self.send_copy_stream(result)?,
                BackendMessage::CopyData(data) => result.copy_out.extend_from_slice(&data.data),
                BackendMessage::CopyOutResponse(_)
                | BackendMessage::CopyDone(_)
                | BackendMessage::EmptyQueryResponse(_) => { }
            }
        }

        match error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Drive one step of the authentication exchange.
    fn handle_authentication(
        &mut self,
        auth: Authentication,
        scram: &mut Option<ScramClient>,
    ) -> Result<()> {
        match auth {
            Authentication::Ok => { }
            Authentication::MD5Password { salt } => {
                debug!("authenticating with md5");
                let response = md5_password(&self.config.user, &self.config.password, &salt);
                let stream = self.stream()?;
                stream.send(frontend::PasswordMessage { password: &response });
                stream.send(frontend::Flush);
                stream.flush()?;
            }
            Authentication::Sasl { mechanisms } => {
                if !Authentication::offers_mechanism(&mechanisms, "SCRAM-SHA-256") {
                    return Err(Error::interface("server offers no supported SASL mechanism"));
                }
                debug!("authenticating with SCRAM-SHA-256");
                let client = scram.insert(ScramClient::new(&self.config.password));
                let first = client.client_first_message();
                let stream = self.stream()?;
                stream.send(frontend::SaslInitialResponse {
                    mechanism: "SCRAM-SHA-256",
                    data: first.as_bytes(),
                });
                stream.send(frontend::Flush);
                stream.flush()?;
            }
            Authentication::SaslContinue { data } => {
                let client = scram
                    .as_mut()
                    .ok_or_else(|| Error::interface("server sent a SASL challenge outside an exchange"))?;
                let response = client
                    .process_server_first(std::str::from_utf8(&data)?)
                    .map_err(|e| Error::interface(e.to_string()))?;
                let stream = self.stream()?;
                stream.send(frontend::SaslResponse { data: response.as_bytes() });
                stream.send(frontend::Flush);
                stream.flush()?;
            }
            Authentication::SaslFinal { data } => {
                let client = scram
                    .as_ref()
                    .ok_or_else(|| Error::interface("server sent a SASL outcome outside an exchange"))?;
                client
                    .verify_server_final(std::str::from_utf8(&data)?)
                    .map_err(|e| Error::interface(e.to_string()))?;
            }
            Authentication::Unsupported(method) => {
                return Err(Error::interface(format!(
                    "Authentication method {method} not supported."
                )));
            }
        }
        Ok(())
    }

    fn handle_parameter_status(&mut self, param: ParameterStatus) {
        trace!("parameter {} = {}", param.name, param.value);
        match param.name.as_str() {
            "server_encoding" => self.encoding = param.value.to_string(),
            "server_version" => self.server_version = parse_server_version(&param.value),
            "TimeZone" => self.timezone = Some(param.value.to_string()),
            _ => { }
        }
    }

    /// Pump the cursor's copy source into `CopyData` frames, then finish
    /// with `CopyDone` and `Sync`. Without a source the stream is closed
    /// immediately.
    fn send_copy_stream(&mut self, result: &mut QueryResult) -> Result<()> {
        let mut source = result.copy_in.take();
        let stream = self.stream()?;
        if let Some(reader) = source.as_mut() {
            let mut chunk = [0u8; 8192];
            loop {
                let n = reader.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                stream.send(frontend::CopyData { data: &chunk[..n] });
                stream.flush()?;
            }
        }
        stream.send(frontend::CopyDone);
        stream.send(frontend::Sync);
        stream.flush()?;
        Ok(())
    }

    /// Run `query` through the simple query protocol, collecting the reply
    /// stream into `result`.
    ///
    /// Statements run inside a transaction block; one is opened when none
    /// is. With autocommit on, the block is committed afterwards.
    pub(crate) fn run_query(&mut self, query: &str, result: &mut QueryResult) -> Result<()> {
        if self.tx_status != b'T' {
            self.begin()?;
        }
        self.query_drain(query, result)?;
        if self.autocommit {
            self.commit()?;
        }
        Ok(())
    }

    /// Send one `Query` frame and drain its reply stream.
    pub(crate) fn query_drain(&mut self, query: &str, result: &mut QueryResult) -> Result<()> {
        let stream = self.stream()?;
        trace!("query: {query}");
        stream.send(frontend::Query { sql: query });
        stream.send(frontend::Flush);
        stream.flush()?;
        self.process_messages(result)
    }

    /// Open a transaction block, rolling a failed one back first.
    pub fn begin(&mut self) -> Result<()> {
        if self.tx_status == b'E' {
            self.query_drain("ROLLBACK", &mut QueryResult::default())?;
        }
        self.query_drain("BEGIN", &mut QueryResult::default())
    }

    /// Commit, then immediately open the next transaction block.
    pub fn commit(&mut self) -> Result<()> {
        if self.stream.is_none() {
            return Ok(());
        }
        self.query_drain("COMMIT", &mut QueryResult::default())?;
        self.begin()
    }

    /// Roll back, then immediately open the next transaction block.
    pub fn rollback(&mut self) -> Result<()> {
        if self.stream.is_none() {
            return Ok(());
        }
        self.query_drain("ROLLBACK", &mut QueryResult::default())?;
        self.begin()
    }

    /// A new cursor over this connection.
    pub fn cursor(&mut self) -> Cursor<'_> {
        Cursor::new(self)
    }

    /// The SQL literal for `value`, honoring the per-kind overrides from
    /// [`Config::escaper`].
    pub fn escape_parameter(&self, value: &Value) -> String {
        self.config.escapers.escape(value)
    }

    pub fn set_autocommit(&mut self, autocommit: bool) {
        self.autocommit = autocommit;
    }

    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    /// `true` while a transaction block is open or failed.
    pub fn is_dirty(&self) -> bool {
        matches!(self.tx_status, b'T' | b'E')
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// The status byte of the last `ReadyForQuery`: `I`, `T` or `E`.
    pub fn transaction_status(&self) -> u8 {
        self.tx_status
    }

    /// Server version as `major * 10000 + minor * 100 + patch`.
    pub fn server_version(&self) -> i32 {
        self.server_version
    }

    /// The session `server_encoding`.
    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// The session `TimeZone`, once the server reported one.
    pub fn timezone(&self) -> Option<&str> {
        self.timezone.as_deref()
    }

    /// The session's transaction isolation level, as reported by the server.
    pub fn isolation_level(&mut self) -> Result<String> {
        let mut result = QueryResult::default();
        self.run_query("SHOW TRANSACTION ISOLATION LEVEL", &mut result)?;
        let row = result.rows.pop_front().unwrap_or_default();
        match row.into_iter().next() {
            Some(Value::Text(level)) => Ok(level),
            _ => Err(Error::interface("server did not report an isolation level")),
        }
    }

    /// Send `Terminate` and drop the socket.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.send(frontend::Terminate);
            let _ = stream.flush();
            debug!("connection closed");
        }
    }

    /// Close and re-establish the connection, recovering a stream left in
    /// an unknown state by an error.
    pub fn reopen(&mut self) -> Result<()> {
        self.close();
        self.open()
    }

    fn stream(&mut self) -> Result<&mut PgStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| Error::lost_connection(ErrorKind::Operational))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// `major * 10000 + minor * 100 + patch` from a report like `"16.4"`,
/// `"9.6.24"` or `"17beta1 (Debian 17~beta1-1)"`.
fn parse_server_version(value: &str) -> i32 {
    let head = value.split_whitespace().next().unwrap_or_default();
    let mut parts = head.split('.');
    let mut version = 0;
    for _ in 0..3 {
        let component: i32 = parts
            .next()
            .map(|part| {
                let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
                digits.parse().unwrap_or(0)
            })
            .unwrap_or(0);
        version = version * 100 + component;
    }
    version
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cursor::QueryResult;

    #[test]
    fn server_version_components() {
        assert_eq!(parse_server_version("16.4"), 160400);
        assert_eq!(parse_server_version("9.6.24"), 90624);
        assert_eq!(parse_server_version("17beta1 (Debian 17~beta1-1)"), 170000);
        assert_eq!(parse_server_version("14.11 (Ubuntu 14.11-0ubuntu0.22.04.1)"), 141100);
        assert_eq!(parse_server_version(""), 0);
    }

    fn connect() -> Connection {
        Connection::connect_env().unwrap()
    }

    #[test]
    #[ignore = "requires a running postgres"]
    fn syntax_error_classification() {
        let mut conn = connect();
        let mut cursor = conn.cursor();
        let err = cursor.execute("BAD STATEMENT", &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Programming);
        assert_eq!(err.message(), "42601:syntax error at or near \"BAD\"");
    }

    #[test]
    #[ignore = "requires a running postgres"]
    fn create_insert_select() {
        let mut conn = connect();
        let mut cursor = conn.cursor();
        cursor.execute("CREATE TEMP TABLE t (id int, name varchar(20))", &[]).unwrap();
        cursor.execute("INSERT INTO t VALUES (1, 'test')", &[]).unwrap();
        cursor
            .execute("INSERT INTO t VALUES (%s, %s)", &[Value::Int(2), "test2".into()])
            .unwrap();
        cursor.execute("SELECT id, name FROM t ORDER BY id", &[]).unwrap();
        assert_eq!(cursor.rowcount(), 2);
        assert_eq!(cursor.description().len(), 2);
        let rows = cursor.fetchall().unwrap();
        assert_eq!(rows, vec![
            vec![Value::Int(1), Value::Text("test".into())],
            vec![Value::Int(2), Value::Text("test2".into())],
        ]);
        assert!(cursor.fetchall().unwrap().is_empty());
    }

    #[test]
    #[ignore = "requires a running postgres"]
    fn scalar_and_array_decode() {
        let mut conn = connect();
        let mut cursor = conn.cursor();
        cursor
            .execute(
                "SELECT true, 1::int8, 1.5::float8, '\\x0102'::bytea, ARRAY[1,2,3]::int4[]",
                &[],
            )
            .unwrap();
        let row = cursor.fetchone().unwrap().unwrap();
        assert_eq!(row, vec![
            Value::Bool(true),
            Value::Int(1),
            Value::Float(1.5),
            Value::Bytes(vec![1, 2]),
            Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        ]);
        assert_eq!(cursor.fetchone().unwrap(), None);
    }

    #[test]
    #[ignore = "requires a running postgres"]
    fn state_byte_stays_in_transaction() {
        let mut conn = connect();
        let mut result = QueryResult::default();
        conn.run_query("SELECT 1", &mut result).unwrap();
        assert_eq!(conn.transaction_status(), b'T');

        conn.commit().unwrap();
        conn.run_query("SELECT 1", &mut QueryResult::default()).unwrap();
        assert_eq!(conn.transaction_status(), b'T');
    }

    #[test]
    #[ignore = "requires a running postgres with md5 and scram roles"]
    fn md5_and_scram_logins() {
        // Both roles must be provisioned up front, one with an md5 password
        // verifier and one with a scram-sha-256 verifier (set
        // password_encryption accordingly before CREATE ROLE), and exported
        // as PGMD5USER/PGMD5PASSWORD and PGSCRAMUSER/PGSCRAMPASSWORD.
        use std::env::var;

        let base = Config::from_env();
        for (user, password) in [
            ("PGMD5USER", "PGMD5PASSWORD"),
            ("PGSCRAMUSER", "PGSCRAMPASSWORD"),
        ] {
            let mut config = Config::new(base.host.clone(), var(user).unwrap())
                .password(var(password).unwrap())
                .port(base.port);
            if let Some(dbname) = base.dbname.clone() {
                config = config.database(dbname);
            }

            let mut conn = Connection::connect(config).unwrap();
            let mut cursor = conn.cursor();
            cursor.execute("SELECT 1", &[]).unwrap();
            assert_eq!(cursor.fetchone().unwrap().unwrap(), vec![Value::Int(1)]);
        }
    }

    #[test]
    #[ignore = "requires a running postgres"]
    fn failed_transaction_recovers_on_begin() {
        let mut conn = connect();
        let mut cursor = conn.cursor();
        let _ = cursor.execute("SELECT broken FROM nowhere", &[]).unwrap_err();
        drop(cursor);
        assert_eq!(conn.transaction_status(), b'E');

        let mut cursor = conn.cursor();
        cursor.execute("SELECT 1", &[]).unwrap();
        assert_eq!(cursor.fetchone().unwrap().unwrap(), vec![Value::Int(1)]);
    }
}
