//! Cursor and query results.
use bytes::{Buf, Bytes};
use std::{collections::VecDeque, fmt, io::Read};

use crate::{
    Result,
    common::ByteStr,
    connection::Connection,
    error::{Error, ErrorKind},
    postgres::{Oid, ProtocolError, oid},
    sql,
    value::{Value, decode_column},
};

/// An ordered sequence of decoded values, one per column.
pub type Row = Vec<Value>;

/// One column of a result set, from the `RowDescription` frame.
///
/// Display size and the modifier slot are placeholders kept for database
/// API shape; only name, oid, size, precision and scale are populated.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub type_oid: Oid,
    pub display_size: Option<i32>,
    pub size: i32,
    pub precision: i32,
    pub scale: i32,
    pub modifier: Option<i32>,
}

/// Parse a `RowDescription` body into column descriptors.
pub(crate) fn parse_row_description(mut body: Bytes) -> Result<Vec<Column>> {
    let err = || ProtocolError::malformed("RowDescription");

    if body.remaining() < 2 {
        return Err(err().into());
    }
    let count = body.get_u16();
    let mut columns = Vec::with_capacity(count.into());

    for _ in 0..count {
        let name = ByteStr::read_nul(&mut body).ok_or_else(err)?;
        if body.remaining() < 18 {
            return Err(err().into());
        }
        let _table_oid = body.get_u32();
        let _attribute = body.get_u16();
        let type_oid = body.get_u32();
        let type_size = body.get_i16();
        let type_modifier = body.get_i32();
        let _format = body.get_u16();

        // varchar carries its length in the modifier; numeric packs
        // precision and scale into the modifier halves
        let (size, precision, scale) = match type_oid {
            oid::VARCHAR => (type_modifier - 4, -1, -1),
            oid::NUMERIC => {
                let precision = (type_modifier >> 16) & 0xffff;
                let scale = precision - (type_modifier & 0xffff);
                (i32::from(type_size), precision, scale)
            }
            _ => (i32::from(type_size), -1, -1),
        };

        columns.push(Column {
            name: name.to_string(),
            type_oid,
            display_size: None,
            size,
            precision,
            scale,
            modifier: None,
        });
    }
    Ok(columns)
}

/// Decode a `DataRow` body against its column descriptors.
///
/// A `-1` length marks NULL; everything else is length-prefixed text for
/// the per-oid decoder.
pub(crate) fn decode_data_row(mut body: Bytes, columns: &[Column], encoding: &str) -> Result<Row> {
    let err = || ProtocolError::malformed("DataRow");

    if body.remaining() < 2 {
        return Err(err().into());
    }
    let count = usize::from(body.get_u16());
    if count != columns.len() {
        return Err(err().into());
    }

    let mut row = Vec::with_capacity(count);
    for column in columns {
        if body.remaining() < 4 {
            return Err(err().into());
        }
        let value = match body.get_i32() {
            -1 => decode_column(None, column.type_oid, encoding)?,
            len => {
                let len = usize::try_from(len).map_err(|_| err())?;
                if body.remaining() < len {
                    return Err(err().into());
                }
                let data = body.split_to(len);
                decode_column(Some(&data), column.type_oid, encoding)?
            }
        };
        row.push(value);
    }
    Ok(row)
}

/// Accumulator the message loop fills while draining one query cycle.
pub struct QueryResult {
    pub(crate) description: Vec<Column>,
    pub(crate) rows: VecDeque<Row>,
    pub(crate) rowcount: i64,
    pub(crate) copy_out: Vec<u8>,
    pub(crate) copy_in: Option<Box<dyn Read + Send>>,
}

impl Default for QueryResult {
    fn default() -> Self {
        Self {
            description: Vec::new(),
            rows: VecDeque::new(),
            rowcount: 0,
            copy_out: Vec::new(),
            copy_in: None,
        }
    }
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("description", &self.description)
            .field("rows", &self.rows.len())
            .field("rowcount", &self.rowcount)
            .finish_non_exhaustive()
    }
}

/// A buffered row iterator over one [`Connection`].
///
/// A cursor is live while its connection is live; [`close`][Cursor::close]
/// simply detaches it. Cursors on the same connection must be serialized,
/// which the borrow on the connection already enforces.
pub struct Cursor<'c> {
    conn: Option<&'c mut Connection>,
    result: QueryResult,
    arraysize: usize,
    query: Option<String>,
}

impl<'c> Cursor<'c> {
    pub(crate) fn new(conn: &'c mut Connection) -> Self {
        Self {
            conn: Some(conn),
            result: QueryResult::default(),
            arraysize: 1,
            query: None,
        }
    }

    /// Escape `args`, splice them into the `%s` placeholders of `query`,
    /// and run the result through the connection.
    ///
    /// The argument count must match the placeholder count exactly.
    pub fn execute(&mut self, query: &str, args: &[Value]) -> Result<()> {
        let conn = match self.conn.as_deref_mut() {
            Some(conn) if conn.is_connected() => conn,
            _ => return Err(Error::lost_connection(ErrorKind::Programming)),
        };

        let query = if args.is_empty() {
            query.to_string()
        } else {
            let literals: Vec<String> = args.iter().map(|arg| conn.escape_parameter(arg)).collect();
            sql::bind(query, &literals)?
        };

        self.result.description.clear();
        self.result.rows.clear();
        self.result.copy_out.clear();
        self.result.rowcount = 0;

        let outcome = conn.run_query(&query, &mut self.result);
        self.query = Some(query);
        outcome
    }

    /// Run `query` once per parameter sequence; the rowcount accumulates.
    pub fn executemany(&mut self, query: &str, param_seqs: &[Vec<Value>]) -> Result<()> {
        let mut rowcount = 0;
        for args in param_seqs {
            self.execute(query, args)?;
            rowcount += self.result.rowcount;
        }
        self.result.rowcount = rowcount;
        Ok(())
    }

    /// Pop the next buffered row.
    pub fn fetchone(&mut self) -> Result<Option<Row>> {
        if self.closed() {
            return Err(Error::lost_connection(ErrorKind::Operational));
        }
        Ok(self.result.rows.pop_front())
    }

    /// Up to `size` rows from the buffer.
    pub fn fetchmany(&mut self, size: usize) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        for _ in 0..size {
            match self.fetchone()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    /// Drain the buffer.
    pub fn fetchall(&mut self) -> Result<Vec<Row>> {
        if self.closed() {
            return Err(Error::lost_connection(ErrorKind::Operational));
        }
        Ok(self.result.rows.drain(..).collect())
    }

    /// Column descriptors of the last result set.
    pub fn description(&self) -> &[Column] {
        &self.result.description
    }

    /// Rows returned for `SELECT`/`SHOW`, rows affected for DML.
    pub fn rowcount(&self) -> i64 {
        self.result.rowcount
    }

    /// The last query as submitted, after parameter substitution.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The fetch size hint; kept for database API shape.
    pub fn arraysize(&self) -> usize {
        self.arraysize
    }

    pub fn set_arraysize(&mut self, arraysize: usize) {
        self.arraysize = arraysize;
    }

    /// `true` once detached or after the connection went away.
    pub fn closed(&self) -> bool {
        match &self.conn {
            Some(conn) => !conn.is_connected(),
            None => true,
        }
    }

    /// Detach from the connection; subsequent fetches fail.
    pub fn close(&mut self) {
        self.conn = None;
    }

    /// Provide the data source for a following `COPY ... FROM STDIN`.
    pub fn copy_from(&mut self, reader: impl Read + Send + 'static) {
        self.result.copy_in = Some(Box::new(reader));
    }

    /// Bytes collected by the last `COPY ... TO STDOUT`.
    pub fn copy_out_data(&self) -> &[u8] {
        &self.result.copy_out
    }

    /// Stored procedures are outside the simple query surface.
    pub fn callproc(&mut self, _procname: &str, _args: &[Value]) -> Result<()> {
        Err(Error::not_supported("callproc"))
    }

    /// Multiple result sets are outside the simple query surface.
    pub fn nextset(&mut self) -> Result<()> {
        Err(Error::not_supported("nextset"))
    }
}

impl Iterator for Cursor<'_> {
    type Item = Row;

    fn next(&mut self) -> Option<Self::Item> {
        self.fetchone().ok().flatten()
    }
}

#[cfg(test)]
mod test {
    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::ext::BufMutExt;

    fn push_field(buf: &mut BytesMut, name: &str, type_oid: Oid, size: i16, modifier: i32) {
        buf.put_nul_string(name);
        buf.put_u32(0); // table oid
        buf.put_u16(0); // attribute number
        buf.put_u32(type_oid);
        buf.put_i16(size);
        buf.put_i32(modifier);
        buf.put_u16(0); // text format
    }

    fn description() -> Vec<Column> {
        let mut buf = BytesMut::new();
        buf.put_u16(3);
        push_field(&mut buf, "id", oid::INT4, 4, -1);
        // varchar(20): the length travels in the modifier, offset by 4
        push_field(&mut buf, "name", oid::VARCHAR, -1, 24);
        // numeric: precision in the modifier high half, low half drives scale
        push_field(&mut buf, "price", oid::NUMERIC, -1, (10 << 16) | 6);
        parse_row_description(buf.freeze()).unwrap()
    }

    #[test]
    fn row_description_sizing_rules() {
        let columns = description();
        assert_eq!(columns.len(), 3);

        assert_eq!(columns[0].name, "id");
        assert_eq!(columns[0].type_oid, oid::INT4);
        assert_eq!((columns[0].size, columns[0].precision, columns[0].scale), (4, -1, -1));

        assert_eq!((columns[1].size, columns[1].precision, columns[1].scale), (20, -1, -1));

        assert_eq!((columns[2].precision, columns[2].scale), (10, 4));
        assert_eq!(columns[2].display_size, None);
        assert_eq!(columns[2].modifier, None);
    }

    #[test]
    fn data_row_with_nulls() {
        let columns = description();

        let mut buf = BytesMut::new();
        buf.put_u16(3);
        buf.put_i32(2);
        buf.put_slice(b"17");
        buf.put_i32(-1); // NULL
        buf.put_i32(4);
        buf.put_slice(b"9.50");

        let row = decode_data_row(buf.freeze(), &columns, "UTF8").unwrap();
        assert_eq!(row, vec![Value::Int(17), Value::Null, Value::Text("9.50".into())]);
        assert_eq!(row.len(), columns.len());
    }

    #[test]
    fn data_row_column_count_must_match() {
        let columns = description();
        let mut buf = BytesMut::new();
        buf.put_u16(1);
        buf.put_i32(1);
        buf.put_slice(b"1");
        assert!(decode_data_row(buf.freeze(), &columns, "UTF8").is_err());
    }

    #[test]
    #[ignore = "requires a running postgres"]
    fn fetchone_then_fetchall_returns_remainder() {
        let mut conn = Connection::connect_env().unwrap();
        let mut cursor = conn.cursor();
        cursor
            .execute("SELECT n FROM generate_series(1, 4) AS g(n)", &[])
            .unwrap();

        assert_eq!(cursor.fetchone().unwrap().unwrap(), vec![Value::Int(1)]);
        assert_eq!(cursor.fetchall().unwrap(), vec![
            vec![Value::Int(2)],
            vec![Value::Int(3)],
            vec![Value::Int(4)],
        ]);
        assert!(cursor.fetchall().unwrap().is_empty());
        assert_eq!(cursor.fetchone().unwrap(), None);
    }

    #[test]
    fn truncated_frames_are_rejected() {
        assert!(parse_row_description(Bytes::from_static(&[0])).is_err());
        assert!(parse_row_description(Bytes::from_static(b"\x00\x01name\x00\x00\x00")).is_err());
        assert!(decode_data_row(Bytes::from_static(&[0, 1, 0]), &description()[..1], "UTF8").is_err());
    }
}
