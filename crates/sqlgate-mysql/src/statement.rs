//! Statements and client-side emulated prepared statements.
//!
//! There is no server-side prepare here: the SQL text is split once at its
//! unquoted `?` placeholders, bound values are rendered to escaped wire
//! literals immediately, and execution concatenates fragments and rendered
//! values into one COM_QUERY payload.

use std::io::Read;
use std::net::TcpStream;

use sqlgate_core::{Error, Result, UsageErrorKind, Value};

use crate::connection::{ConnectStream, ExecuteOutcome, SharedConnection, UpdateResult};
use crate::result_set::{Concurrency, ResultSet, ResultSetType};

/// A plain statement bound to a shared connection.
#[derive(Debug)]
pub struct Statement<S: ConnectStream = TcpStream> {
    conn: SharedConnection<S>,
    rs_type: ResultSetType,
    concurrency: Concurrency,
    max_rows: i64,
    catalog: Option<String>,
    closed: bool,
}

impl<S: ConnectStream> Statement<S> {
    pub(crate) fn new(
        conn: SharedConnection<S>,
        rs_type: ResultSetType,
        concurrency: Concurrency,
    ) -> Self {
        Self {
            conn,
            rs_type,
            concurrency,
            max_rows: -1,
            catalog: None,
            closed: false,
        }
    }

    pub fn result_set_type(&self) -> ResultSetType {
        self.rs_type
    }

    pub fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    /// Per-statement row cap; 0 means unlimited.
    pub fn set_max_rows(&mut self, rows: u32) {
        self.max_rows = if rows == 0 { -1 } else { i64::from(rows) };
    }

    /// Run this statement's commands against a different catalog. The
    /// connection switches before each command and back afterwards.
    pub fn set_catalog(&mut self, catalog: impl Into<String>) {
        self.catalog = Some(catalog.into());
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::usage(
                UsageErrorKind::InvalidState,
                "statement is closed",
            ));
        }
        Ok(())
    }

    fn run(&self, sql: &[u8]) -> Result<ExecuteOutcome> {
        self.check_open()?;
        self.conn.execute(sql, self.max_rows, self.catalog.as_deref())
    }

    /// Execute a query that must produce rows.
    pub fn execute_query(&self, sql: &str) -> Result<ResultSet<S>> {
        match self.run(sql.as_bytes())? {
            ExecuteOutcome::Rows(raw) => ResultSet::from_raw(
                self.conn.clone(),
                raw,
                self.rs_type,
                self.concurrency,
            ),
            ExecuteOutcome::Update(_) => Err(Error::usage(
                UsageErrorKind::InvalidState,
                "statement did not produce a result set",
            )),
        }
    }

    /// Execute a statement that must not produce rows.
    pub fn execute_update(&self, sql: &str) -> Result<UpdateResult> {
        match self.run(sql.as_bytes())? {
            ExecuteOutcome::Update(result) => Ok(result),
            ExecuteOutcome::Rows(_) => Err(Error::usage(
                UsageErrorKind::InvalidState,
                "statement produced a result set",
            )),
        }
    }

    /// Execute without caring about the response shape.
    pub fn execute(&self, sql: &str) -> Result<ExecuteOutcome> {
        self.run(sql.as_bytes())
    }

    pub fn connection(&self) -> &SharedConnection<S> {
        &self.conn
    }

    /// Idempotent.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// One parameter slot of a prepared statement.
pub enum ParamSlot {
    /// Never bound; executing in this state is an error
    Unset,
    /// Explicit SQL NULL
    Null,
    /// Rendered wire-literal bytes
    Literal(Vec<u8>),
    /// Drained and rendered at execution time
    Stream {
        reader: Box<dyn Read + Send>,
        length: Option<u64>,
        escape: bool,
    },
}

impl std::fmt::Debug for ParamSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamSlot::Unset => f.write_str("Unset"),
            ParamSlot::Null => f.write_str("Null"),
            ParamSlot::Literal(bytes) => write!(f, "Literal({} bytes)", bytes.len()),
            ParamSlot::Stream { length, escape, .. } => f
                .debug_struct("Stream")
                .field("length", length)
                .field("escape", escape)
                .finish_non_exhaustive(),
        }
    }
}

/// A client-side emulated prepared statement.
#[derive(Debug)]
pub struct PreparedStatement<S: ConnectStream = TcpStream> {
    statement: Statement<S>,
    fragments: Vec<Vec<u8>>,
    slots: Vec<ParamSlot>,
}

impl<S: ConnectStream> PreparedStatement<S> {
    pub(crate) fn new(
        conn: SharedConnection<S>,
        sql: &str,
        rs_type: ResultSetType,
        concurrency: Concurrency,
    ) -> Result<Self> {
        let fragments = split_fragments(sql);
        let slots = (1..fragments.len()).map(|_| ParamSlot::Unset).collect();
        Ok(Self {
            statement: Statement::new(conn, rs_type, concurrency),
            fragments,
            slots,
        })
    }

    /// Number of `?` placeholders.
    pub fn parameter_count(&self) -> usize {
        self.slots.len()
    }

    pub fn set_max_rows(&mut self, rows: u32) {
        self.statement.set_max_rows(rows);
    }

    pub fn set_catalog(&mut self, catalog: impl Into<String>) {
        self.statement.set_catalog(catalog);
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut ParamSlot> {
        let count = self.slots.len();
        self.slots.get_mut(index).ok_or_else(|| {
            Error::usage(
                UsageErrorKind::InvalidState,
                format!("parameter index {index} out of range (statement has {count})"),
            )
        })
    }

    /// Bind any value, rendering it to its literal form now.
    pub fn set_value(&mut self, index: usize, value: &Value) -> Result<()> {
        let rendered = match value {
            Value::Null => None,
            other => Some(render_value(other)?),
        };
        *self.slot_mut(index)? = match rendered {
            None => ParamSlot::Null,
            Some(bytes) => ParamSlot::Literal(bytes),
        };
        Ok(())
    }

    /// Mark a slot as SQL NULL.
    pub fn set_null(&mut self, index: usize) -> Result<()> {
        *self.slot_mut(index)? = ParamSlot::Null;
        Ok(())
    }

    pub fn set_str(&mut self, index: usize, value: &str) -> Result<()> {
        *self.slot_mut(index)? = ParamSlot::Literal(quote_escaped(value.as_bytes()));
        Ok(())
    }

    pub fn set_i64(&mut self, index: usize, value: i64) -> Result<()> {
        *self.slot_mut(index)? = ParamSlot::Literal(value.to_string().into_bytes());
        Ok(())
    }

    pub fn set_f64(&mut self, index: usize, value: f64) -> Result<()> {
        *self.slot_mut(index)? = ParamSlot::Literal(render_f64(value)?);
        Ok(())
    }

    pub fn set_bool(&mut self, index: usize, value: bool) -> Result<()> {
        *self.slot_mut(index)? =
            ParamSlot::Literal(if value { b"1".to_vec() } else { b"0".to_vec() });
        Ok(())
    }

    pub fn set_bytes(&mut self, index: usize, value: &[u8]) -> Result<()> {
        *self.slot_mut(index)? = ParamSlot::Literal(quote_escaped(value));
        Ok(())
    }

    /// Bind a stream drained at execution time.
    ///
    /// With `escape` the drained bytes are quoted and escaped like a string
    /// literal; without it they are spliced in raw. The stream is consumed
    /// by the next execution and the slot reverts to unset.
    pub fn set_stream(
        &mut self,
        index: usize,
        reader: Box<dyn Read + Send>,
        length: Option<u64>,
        escape: bool,
    ) -> Result<()> {
        *self.slot_mut(index)? = ParamSlot::Stream {
            reader,
            length,
            escape,
        };
        Ok(())
    }

    /// Reset every slot to unset.
    pub fn clear_parameters(&mut self) {
        for slot in &mut self.slots {
            *slot = ParamSlot::Unset;
        }
    }

    /// Concatenate fragments and rendered values into the command payload.
    ///
    /// Unset slots fail here, before anything touches the wire. Stream
    /// slots are drained (and dropped) and left unset afterwards.
    pub fn render(&mut self) -> Result<Vec<u8>> {
        for (i, slot) in self.slots.iter().enumerate() {
            if matches!(slot, ParamSlot::Unset) {
                return Err(Error::usage(
                    UsageErrorKind::ParameterUnset,
                    format!("parameter {i} is not set"),
                ));
            }
        }

        let mut payload = Vec::new();
        for (i, fragment) in self.fragments.iter().enumerate() {
            payload.extend_from_slice(fragment);
            if i >= self.slots.len() {
                continue;
            }
            match &mut self.slots[i] {
                ParamSlot::Unset => unreachable!("checked above"),
                ParamSlot::Null => payload.extend_from_slice(b"NULL"),
                ParamSlot::Literal(bytes) => payload.extend_from_slice(bytes),
                slot @ ParamSlot::Stream { .. } => {
                    let ParamSlot::Stream {
                        reader,
                        length,
                        escape,
                    } = std::mem::replace(slot, ParamSlot::Unset)
                    else {
                        unreachable!("matched above");
                    };
                    let drained = drain_stream(reader, length)?;
                    if escape {
                        payload.extend_from_slice(&quote_escaped(&drained));
                    } else {
                        payload.extend_from_slice(&drained);
                    }
                }
            }
        }
        Ok(payload)
    }

    /// Execute, expecting rows.
    pub fn execute_query(&mut self) -> Result<ResultSet<S>> {
        let payload = self.render()?;
        match self.statement.run(&payload)? {
            ExecuteOutcome::Rows(raw) => ResultSet::from_raw(
                self.statement.conn.clone(),
                raw,
                self.statement.rs_type,
                self.statement.concurrency,
            ),
            ExecuteOutcome::Update(_) => Err(Error::usage(
                UsageErrorKind::InvalidState,
                "statement did not produce a result set",
            )),
        }
    }

    /// Execute, expecting an update count.
    pub fn execute_update(&mut self) -> Result<UpdateResult> {
        let payload = self.render()?;
        match self.statement.run(&payload)? {
            ExecuteOutcome::Update(result) => Ok(result),
            ExecuteOutcome::Rows(_) => Err(Error::usage(
                UsageErrorKind::InvalidState,
                "statement produced a result set",
            )),
        }
    }

    /// Execute without caring about the response shape.
    pub fn execute(&mut self) -> Result<ExecuteOutcome> {
        let payload = self.render()?;
        self.statement.run(&payload)
    }

    pub fn connection(&self) -> &SharedConnection<S> {
        &self.statement.conn
    }

    /// Idempotent.
    pub fn close(&mut self) {
        self.statement.close();
    }

    pub fn is_closed(&self) -> bool {
        self.statement.is_closed()
    }
}

/// Split SQL at its unquoted `?` placeholders: N placeholders yield N+1
/// fragments.
///
/// A `'` toggles quote state unless immediately preceded by two backslashes
/// (an escaped backslash before the quote).
pub fn split_fragments(sql: &str) -> Vec<Vec<u8>> {
    let bytes = sql.as_bytes();
    let mut fragments = Vec::new();
    let mut current = Vec::new();
    let mut in_quote = false;

    for (i, &b) in bytes.iter().enumerate() {
        if b == b'\'' {
            let double_backslash = i >= 2 && bytes[i - 1] == b'\\' && bytes[i - 2] == b'\\';
            if !double_backslash {
                in_quote = !in_quote;
            }
            current.push(b);
        } else if b == b'?' && !in_quote {
            fragments.push(std::mem::take(&mut current));
        } else {
            current.push(b);
        }
    }
    fragments.push(current);
    fragments
}

/// Escape the characters the server's literal parser treats specially.
/// Each gets exactly one leading backslash; everything else passes through.
pub fn escape_into(out: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        match b {
            0x00 => out.extend_from_slice(b"\\0"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\'' => out.extend_from_slice(b"\\'"),
            b'"' => out.extend_from_slice(b"\\\""),
            0x1A => out.extend_from_slice(b"\\Z"),
            _ => out.push(b),
        }
    }
}

/// Escape and wrap in single quotes.
pub fn quote_escaped(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 2);
    out.push(b'\'');
    escape_into(&mut out, bytes);
    out.push(b'\'');
    out
}

/// Render a float literal. Magnitudes outside the plain-decimal range use
/// exponent form, with an explicit sign on the exponent.
fn render_f64(value: f64) -> Result<Vec<u8>> {
    if !value.is_finite() {
        return Err(Error::usage(
            UsageErrorKind::TypeConversion,
            format!("{value} has no SQL literal form"),
        ));
    }
    let abs = value.abs();
    let mut text = if abs != 0.0 && !(1e-4..1e15).contains(&abs) {
        format!("{value:e}")
    } else {
        value.to_string()
    };
    if let Some(pos) = text.find(['e', 'E']) {
        let exponent_start = pos + 1;
        if !matches!(text.as_bytes().get(exponent_start), Some(b'+') | Some(b'-')) {
            text.insert(exponent_start, '+');
        }
    }
    Ok(text.into_bytes())
}

/// Render a value to wire-literal bytes. NULL has no literal form here;
/// the slot carries it.
fn render_value(value: &Value) -> Result<Vec<u8>> {
    Ok(match value {
        Value::Null => b"NULL".to_vec(),
        Value::Bool(b) => if *b { b"1" } else { b"0" }.to_vec(),
        Value::Int(i) => i.to_string().into_bytes(),
        Value::UInt(u) => u.to_string().into_bytes(),
        Value::Double(d) => render_f64(*d)?,
        Value::Decimal(d) => d.clone().into_bytes(),
        Value::Text(s) => quote_escaped(s.as_bytes()),
        Value::Bytes(b) => quote_escaped(b),
        Value::Date(s) | Value::Time(s) | Value::Timestamp(s) => quote_escaped(s.as_bytes()),
        Value::Json(j) => quote_escaped(j.to_string().as_bytes()),
    })
}

fn drain_stream(mut reader: Box<dyn Read + Send>, length: Option<u64>) -> Result<Vec<u8>> {
    let mut drained = Vec::new();
    match length {
        Some(limit) => {
            reader.take(limit).read_to_end(&mut drained)?;
        }
        None => {
            reader.read_to_end(&mut drained)?;
        }
    }
    Ok(drained)
}
