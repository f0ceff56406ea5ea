//! Connection lifecycle and command execution.
//!
//! A [`Connection`] owns the framed transport and the session state and
//! drives the protocol: handshake and authentication, the server-variable
//! bootstrap, liveness probes, bounded reconnection, and the command
//! execution engine that turns SQL bytes into update counts or raw result
//! sets. [`SharedConnection`] wraps it in `Arc<Mutex<_>>` so statements and
//! result sets can share one connection under a single exclusive lock.

#![allow(clippy::cast_possible_truncation)]

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use sqlgate_core::{
    ColumnInfo, ConnectionError, ConnectionErrorKind, Error, QueryError, Result, Row,
    UsageErrorKind,
};
use tracing::debug;

use crate::auth;
use crate::config::Config;
use crate::field::Field;
use crate::protocol::{Command, PacketKind, PacketReader, PacketWriter, capabilities, charset};
use crate::result_set::{Concurrency, ResultSetType};
use crate::session::{IsolationLevel, ServerVersion, SessionState};
use crate::statement::{PreparedStatement, Statement};
use crate::transport::PacketTransport;

/// Requested max packet size sent in the handshake response (16 MB).
const CLIENT_MAX_PACKET: u32 = 0x0100_0000;

/// A stream the connection can open from configuration and tear down.
///
/// The transport and the protocol machinery are generic over this, so tests
/// drive the full exchange over in-memory streams.
pub trait ConnectStream: Read + Write + Sized {
    fn open(config: &Config) -> Result<Self>;
    fn shutdown(&mut self);
}

impl ConnectStream for TcpStream {
    fn open(config: &Config) -> Result<Self> {
        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| connect_error(format!("cannot resolve {}", config.host), Some(e)))?
            .next()
            .ok_or_else(|| {
                connect_error(format!("no address found for {}", config.host), None)
            })?;
        let stream = TcpStream::connect_timeout(&addr, config.connect_timeout)
            .map_err(|e| connect_error(format!("failed to connect to {addr}"), Some(e)))?;
        stream.set_nodelay(true).ok();
        stream.set_read_timeout(Some(config.connect_timeout)).ok();
        stream.set_write_timeout(Some(config.connect_timeout)).ok();
        Ok(stream)
    }

    fn shutdown(&mut self) {
        let _ = TcpStream::shutdown(self, Shutdown::Both);
    }
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No usable transport (initial, or after failed reconnection)
    Disconnected,
    /// Greeting/auth exchange in progress
    Handshaking,
    /// Idle, ready for a command
    Ready,
    /// A command is in flight
    Busy,
    /// Reconnection attempts in progress
    Reconnecting,
    /// Closed for good
    Closed,
}

/// The server's protocol-10 greeting.
#[derive(Debug, Clone)]
pub struct ServerGreeting {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub capabilities: u32,
    pub charset: u8,
    pub status_flags: u16,
    pub auth_plugin: String,
    pub auth_seed: Vec<u8>,
}

impl ServerGreeting {
    /// Parse the greeting payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = PacketReader::new(payload);
        let protocol_version = r
            .read_u8()
            .ok_or_else(|| Error::protocol("empty server greeting"))?;
        if protocol_version != 10 {
            return Err(Error::protocol(format!(
                "unsupported handshake protocol version {protocol_version}"
            )));
        }
        let server_version = r
            .read_null_terminated()
            .ok_or_else(|| Error::protocol("greeting missing server version"))?;
        let connection_id = r
            .read_u32_le()
            .ok_or_else(|| Error::protocol("greeting missing connection id"))?;
        let seed_part1 = r
            .take(8)
            .ok_or_else(|| Error::protocol("greeting missing auth seed"))?
            .to_vec();
        r.skip(1); // filler
        let caps_lower = r
            .read_u16_le()
            .ok_or_else(|| Error::protocol("greeting missing capability flags"))?;
        let charset = r.read_u8().unwrap_or(charset::DEFAULT_CHARSET);
        let status_flags = r.read_u16_le().unwrap_or(0);
        let caps_upper = r.read_u16_le().unwrap_or(0);
        let caps = u32::from(caps_lower) | (u32::from(caps_upper) << 16);

        let seed_len = if caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            r.read_u8().unwrap_or(0) as usize
        } else {
            0
        };
        r.skip(10); // reserved

        let mut auth_seed = seed_part1;
        if caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            let part2_len = seed_len.saturating_sub(8).max(13);
            if let Some(part2) = r.take(part2_len) {
                let clean = if part2.last() == Some(&0) {
                    &part2[..part2.len() - 1]
                } else {
                    part2
                };
                auth_seed.extend_from_slice(clean);
            }
        }

        let auth_plugin = if caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            r.read_null_terminated().unwrap_or_default()
        } else {
            auth::plugins::MYSQL_NATIVE_PASSWORD.to_string()
        };

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            capabilities: caps,
            charset,
            status_flags,
            auth_plugin,
            auth_seed,
        })
    }
}

/// An update-count response.
#[derive(Debug, Clone, Copy)]
pub struct UpdateResult {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub warnings: u16,
}

/// A fully decoded result set, before the cursor layer wraps it.
#[derive(Debug)]
pub struct RawResultSet {
    pub fields: Vec<Field>,
    pub rows: Vec<Vec<Option<Vec<u8>>>>,
}

/// Exactly one of these comes back per executed command.
#[derive(Debug)]
pub enum ExecuteOutcome {
    Update(UpdateResult),
    Rows(RawResultSet),
}

/// One protocol connection: transport plus session state.
pub struct Connection<S: ConnectStream = TcpStream> {
    transport: PacketTransport<S>,
    state: LifecycleState,
    session: SessionState,
    config: Config,
    connection_id: u32,
    affected_rows: u64,
    last_insert_id: u64,
    warnings: u16,
    last_done: Option<Instant>,
    generation: u64,
}

impl<S: ConnectStream> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("connection_id", &self.connection_id)
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("catalog", &self.session.catalog)
            .finish_non_exhaustive()
    }
}

impl<S: ConnectStream> Connection<S> {
    /// Open a stream and perform the full handshake and bootstrap.
    pub fn connect(config: Config) -> Result<Self> {
        config.validate()?;
        let stream = S::open(&config)?;
        Self::from_stream(stream, config)
    }

    /// Handshake and bootstrap over an already-open stream.
    pub fn from_stream(stream: S, config: Config) -> Result<Self> {
        config.validate()?;
        let mut conn = Self {
            transport: PacketTransport::new(stream),
            state: LifecycleState::Handshaking,
            session: SessionState::new(ServerVersion::default(), None),
            config,
            connection_id: 0,
            affected_rows: 0,
            last_insert_id: 0,
            warnings: 0,
            last_done: None,
            generation: 0,
        };

        let greeting_payload = conn.transport.read_packet().map_err(wrap_handshake)?;
        let greeting = ServerGreeting::parse(&greeting_payload)?;
        conn.connection_id = greeting.connection_id;

        let mut session =
            SessionState::new(ServerVersion::parse(&greeting.server_version), None);
        session.catalog = conn.config.database.clone();
        session.relax_auto_commit = conn.config.relax_auto_commit;
        session.row_limit = conn.config.row_limit();
        if conn.config.use_unicode {
            session.encoding = conn.config.character_encoding.clone();
        }
        conn.session = session;

        let response = build_handshake_response(&conn.config, &greeting);
        conn.transport
            .write_packet(&response)
            .map_err(wrap_handshake)?;
        conn.finish_authentication(&greeting)?;

        conn.state = LifecycleState::Ready;
        conn.bootstrap()?;
        conn.last_done = Some(Instant::now());

        debug!(
            connection_id = conn.connection_id,
            server = %greeting.server_version,
            "connected"
        );
        Ok(conn)
    }

    fn finish_authentication(&mut self, greeting: &ServerGreeting) -> Result<()> {
        let payload = self.transport.read_packet().map_err(wrap_handshake)?;
        self.handle_auth_reply(&payload, greeting)
    }

    fn handle_auth_reply(&mut self, payload: &[u8], greeting: &ServerGreeting) -> Result<()> {
        let first = *payload
            .first()
            .ok_or_else(|| Error::protocol("empty authentication reply"))?;
        match first {
            0x00 => Ok(()),
            0xFF => {
                let err = PacketReader::new(payload)
                    .decode_err()
                    .ok_or_else(|| Error::protocol("malformed error packet"))?;
                Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Authentication,
                    message: format!(
                        "authentication failed: {} ({})",
                        err.message, err.code
                    ),
                    source: None,
                }))
            }
            auth::AUTH_SWITCH_MARKER => {
                let mut r = PacketReader::new(&payload[1..]);
                let plugin = r
                    .read_null_terminated()
                    .ok_or_else(|| Error::protocol("auth switch missing plugin name"))?;
                let seed = r.read_rest().to_vec();
                let password = self.config.password.as_deref().unwrap_or("");
                let response =
                    auth::scramble_for(&plugin, password, &seed).ok_or_else(|| {
                        Error::Connection(ConnectionError {
                            kind: ConnectionErrorKind::Authentication,
                            message: format!("unsupported auth plugin {plugin:?}"),
                            source: None,
                        })
                    })?;
                self.transport
                    .write_packet(&response)
                    .map_err(wrap_handshake)?;
                let next = self.transport.read_packet().map_err(wrap_handshake)?;
                self.handle_auth_reply(&next, greeting)
            }
            auth::AUTH_MORE_DATA_MARKER => {
                match payload.get(1) {
                    Some(&auth::sha2_status::FAST_AUTH_SUCCESS) => {
                        let ok = self.transport.read_packet().map_err(wrap_handshake)?;
                        self.handle_auth_reply(&ok, greeting)
                    }
                    Some(&auth::sha2_status::PERFORM_FULL_AUTH) => {
                        Err(Error::Connection(ConnectionError {
                            kind: ConnectionErrorKind::Authentication,
                            message: "server requires full caching_sha2 authentication, \
                                      which needs a TLS connection"
                                .to_string(),
                            source: None,
                        }))
                    }
                    _ => Err(Error::protocol("unrecognized auth continuation")),
                }
            }
            other => Err(Error::protocol(format!(
                "unrecognized auth reply byte {other:#04X}"
            ))),
        }
    }

    /// Read server variables the session depends on.
    fn bootstrap(&mut self) -> Result<()> {
        let outcome = self.run_command(b"SHOW VARIABLES", None)?;
        if let ExecuteOutcome::Rows(raw) = outcome {
            for row in &raw.rows {
                if let [Some(name), Some(value)] = row.as_slice() {
                    let name = String::from_utf8_lossy(name);
                    let value = String::from_utf8_lossy(value);
                    self.session.absorb_variable(&name, &value);
                }
            }
        }
        Ok(())
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionState {
        &mut self.session
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    /// Bumped on every successful reconnection.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn server_version(&self) -> ServerVersion {
        self.session.version
    }

    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    pub fn warning_count(&self) -> u16 {
        self.warnings
    }

    /// Time since the last command completed; zero while one is in flight.
    pub fn idle_time(&self) -> Duration {
        match (self.state, self.last_done) {
            (LifecycleState::Busy, _) | (_, None) => Duration::ZERO,
            (_, Some(done)) => done.elapsed(),
        }
    }

    fn check_usable(&self) -> Result<()> {
        match self.state {
            LifecycleState::Ready => Ok(()),
            LifecycleState::Closed => Err(Error::usage(
                UsageErrorKind::InvalidState,
                "connection is closed",
            )),
            _ => Err(Error::connection(
                ConnectionErrorKind::Disconnected,
                "connection is not ready",
            )),
        }
    }

    /// Liveness probe: COM_PING on servers that answer it, `SELECT 1`
    /// otherwise.
    pub fn ping(&mut self) -> Result<()> {
        self.check_usable()?;
        if self.session.version.supports_ping() {
            self.transport.reset_sequence();
            let w = PacketWriter::for_command(Command::Ping);
            self.transport.write_packet(w.payload())?;
            let payload = self.transport.read_packet()?;
            match payload.first() {
                Some(0x00) => Ok(()),
                Some(0xFF) => Err(server_error(&payload)),
                _ => Err(Error::protocol("unexpected ping reply")),
            }
        } else {
            self.run_command(b"SELECT 1", None).map(|_| ())
        }
    }

    /// Switch the default database with COM_INIT_DB.
    pub fn switch_catalog(&mut self, catalog: &str) -> Result<()> {
        self.check_usable()?;
        self.transport.reset_sequence();
        let mut w = PacketWriter::for_command(Command::InitDb);
        w.write_bytes(catalog.as_bytes());
        self.transport.write_packet(w.payload())?;
        let payload = self.transport.read_packet()?;
        match payload.first() {
            Some(0x00) => {
                self.session.catalog = Some(catalog.to_string());
                Ok(())
            }
            Some(0xFF) => Err(server_error(&payload)),
            _ => Err(Error::protocol("unexpected INIT_DB reply")),
        }
    }

    /// Execute one command payload and decode its response.
    ///
    /// `row_limit` < 0 defers to the session's sticky limit. This is the
    /// raw engine; reconnection lives in [`Connection::execute`].
    pub fn run_command(
        &mut self,
        sql: &[u8],
        row_cap: Option<u64>,
    ) -> Result<ExecuteOutcome> {
        self.check_usable()?;
        self.state = LifecycleState::Busy;
        self.last_done = None;
        let started = Instant::now();

        let outcome = self.dispatch(sql, row_cap);

        self.state = match &outcome {
            Err(e) if e.is_fatal() => LifecycleState::Disconnected,
            _ => LifecycleState::Ready,
        };
        self.last_done = Some(Instant::now());

        if self.config.profile_sql {
            debug!(
                sql = %String::from_utf8_lossy(sql),
                elapsed_ms = started.elapsed().as_millis() as u64,
                ok = outcome.is_ok(),
                "command"
            );
        }
        outcome
    }

    fn dispatch(&mut self, sql: &[u8], row_cap: Option<u64>) -> Result<ExecuteOutcome> {
        self.transport.reset_sequence();
        let mut w = PacketWriter::with_capacity(sql.len() + 1);
        w.write_u8(Command::Query as u8);
        w.write_bytes(sql);
        self.transport.write_packet(w.payload())?;

        let payload = self.transport.read_packet()?;
        let first = *payload
            .first()
            .ok_or_else(|| Error::protocol("empty command response"))?;
        match PacketKind::classify(first, payload.len()) {
            PacketKind::Ok => {
                let ok = PacketReader::new(&payload)
                    .decode_ok()
                    .ok_or_else(|| Error::protocol("malformed OK packet"))?;
                self.affected_rows = ok.affected_rows;
                self.last_insert_id = ok.last_insert_id;
                self.warnings = ok.warnings;
                Ok(ExecuteOutcome::Update(UpdateResult {
                    affected_rows: ok.affected_rows,
                    last_insert_id: ok.last_insert_id,
                    warnings: ok.warnings,
                }))
            }
            PacketKind::Err => Err(server_error(&payload)),
            _ => self.read_result_set(&payload, row_cap),
        }
    }

    fn read_result_set(
        &mut self,
        header: &[u8],
        row_cap: Option<u64>,
    ) -> Result<ExecuteOutcome> {
        let column_count = PacketReader::new(header)
            .read_lenenc_int()
            .ok_or_else(|| Error::protocol("malformed result set header"))?
            as usize;

        let mut fields = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let payload = self.transport.read_packet().map_err(lost_during_query)?;
            fields.push(Field::decode(&payload)?);
        }

        // end-of-metadata marker
        let marker = self.transport.read_packet().map_err(lost_during_query)?;
        if marker.first() != Some(&0xFE) {
            return Err(Error::protocol("missing end-of-metadata marker"));
        }

        let mut rows: Vec<Vec<Option<Vec<u8>>>> = Vec::new();
        loop {
            let payload = self.transport.read_packet().map_err(lost_during_query)?;
            let first = *payload
                .first()
                .ok_or_else(|| Error::protocol("empty row packet"))?;
            match PacketKind::classify(first, payload.len()) {
                PacketKind::Eof => {
                    if let Some(eof) = PacketReader::new(&payload).decode_eof() {
                        self.warnings = eof.warnings;
                    }
                    break;
                }
                PacketKind::Err => return Err(server_error(&payload)),
                // rows end with a short 0xFE EOF packet (CLIENT_DEPRECATE_EOF
                // is never requested); a leading 0x00 here is the lenenc
                // length of an empty first cell, not an OK packet
                PacketKind::Ok | PacketKind::Data => {
                    let capped =
                        row_cap.is_some_and(|cap| rows.len() as u64 >= cap);
                    if !capped {
                        rows.push(decode_text_row(&payload, column_count)?);
                    }
                }
            }
        }

        Ok(ExecuteOutcome::Rows(RawResultSet { fields, rows }))
    }

    /// The full execution protocol: liveness preamble, sticky row limit
    /// bracketing, then the command itself.
    pub fn execute(&mut self, sql: &[u8], row_limit: i64) -> Result<ExecuteOutcome> {
        if self.config.auto_reconnect && self.ping().is_err() {
            self.reconnect()?;
        }

        let limit = if row_limit >= 0 {
            row_limit
        } else {
            self.session.row_limit
        };

        if limit < 0 || !sql_is_select(sql) {
            return self.run_command(sql, None);
        }

        if sql_has_limit_clause(sql) {
            // the statement's own LIMIT wins; cap decoding out of band
            return self.run_command(sql, Some(limit as u64));
        }

        self.run_command(format!("SET SQL_SELECT_LIMIT={limit}").as_bytes(), None)?;
        let outcome = self.run_command(sql, None);
        let restore = self.run_command(b"SET SQL_SELECT_LIMIT=DEFAULT", None);
        match outcome {
            // the command failed; a restore failure must not mask that
            Err(err) => Err(err),
            Ok(result) => restore.map(|_| result),
        }
    }

    /// Bounded reconnection with squared backoff.
    ///
    /// Each attempt opens a fresh stream, re-handshakes and re-probes.
    /// Session state is taken from the fresh handshake; autocommit and
    /// isolation overrides made on the old connection are not replayed.
    pub fn reconnect(&mut self) -> Result<()> {
        self.state = LifecycleState::Reconnecting;
        let attempts = self.config.max_reconnects;
        let sleeps = backoff_schedule(self.config.initial_timeout, attempts);

        for attempt in 1..=attempts {
            debug!(attempt, max = attempts, "reconnecting");
            match Self::connect(self.config.clone()) {
                Ok(mut fresh) => {
                    if fresh.ping().is_ok() {
                        fresh.generation = self.generation + 1;
                        *self = fresh;
                        debug!(generation = self.generation, "reconnected");
                        return Ok(());
                    }
                }
                Err(err) => {
                    debug!(attempt, error = %err, "reconnect attempt failed");
                }
            }
            // no sleep after the final failed attempt
            if attempt < attempts {
                std::thread::sleep(Duration::from_secs(sleeps[(attempt - 1) as usize]));
            }
        }

        self.state = LifecycleState::Disconnected;
        Err(Error::connection(
            ConnectionErrorKind::Connect,
            format!("reconnection failed after {attempts} attempts"),
        ))
    }

    /// Best-effort COM_QUIT and transport teardown. Idempotent.
    pub fn close(&mut self) {
        if self.state == LifecycleState::Closed {
            return;
        }
        if self.state == LifecycleState::Ready {
            self.transport.reset_sequence();
            let w = PacketWriter::for_command(Command::Quit);
            let _ = self.transport.write_packet(w.payload());
        }
        self.transport.stream_mut().shutdown();
        self.state = LifecycleState::Closed;
        debug!(connection_id = self.connection_id, "closed");
    }
}

impl<S: ConnectStream> Drop for Connection<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sleep durations (seconds) between reconnect attempts: the configured
/// initial timeout, squared after each attempt. One entry per gap, so
/// `attempts` attempts get `attempts - 1` sleeps.
pub fn backoff_schedule(initial_timeout: u64, attempts: u32) -> Vec<u64> {
    let mut sleeps = Vec::new();
    let mut timeout = initial_timeout;
    for _ in 1..attempts {
        sleeps.push(timeout);
        timeout = timeout.saturating_mul(timeout);
    }
    sleeps
}

/// Build the client handshake response payload.
pub fn build_handshake_response(config: &Config, greeting: &ServerGreeting) -> Vec<u8> {
    let mut client_caps = capabilities::BASE_CLIENT_FLAGS;
    if config.database.is_some() {
        client_caps |= capabilities::CLIENT_CONNECT_WITH_DB;
    }
    client_caps &= greeting.capabilities;

    let password = config.password.as_deref().unwrap_or("");
    let auth_response =
        auth::scramble_for(&greeting.auth_plugin, password, &greeting.auth_seed)
            .unwrap_or_else(|| {
                auth::native_password_scramble(password, &greeting.auth_seed)
            });

    let charset_byte = config
        .character_encoding
        .as_deref()
        .filter(|_| config.use_unicode)
        .and_then(charset::for_encoding)
        .unwrap_or(charset::DEFAULT_CHARSET);

    let mut w = PacketWriter::new();
    w.write_u32_le(client_caps);
    w.write_u32_le(CLIENT_MAX_PACKET);
    w.write_u8(charset_byte);
    w.write_zeros(23);
    w.write_null_terminated(config.user.as_bytes());

    if client_caps & capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        w.write_lenenc_bytes(&auth_response);
    } else if client_caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
        w.write_u8(auth_response.len() as u8);
        w.write_bytes(&auth_response);
    } else {
        w.write_bytes(&auth_response);
        w.write_u8(0);
    }

    if client_caps & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
        match &config.database {
            Some(db) => w.write_null_terminated(db.as_bytes()),
            None => w.write_u8(0),
        }
    }

    if client_caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
        w.write_null_terminated(greeting.auth_plugin.as_bytes());
    }

    w.into_payload()
}

/// Decode one text-protocol row into nullable byte cells.
fn decode_text_row(payload: &[u8], column_count: usize) -> Result<Vec<Option<Vec<u8>>>> {
    let mut r = PacketReader::new(payload);
    let mut cells = Vec::with_capacity(column_count);
    for _ in 0..column_count {
        if r.peek() == Some(crate::protocol::reader::NULL_CELL) {
            r.skip(1);
            cells.push(None);
        } else {
            let bytes = r
                .read_lenenc_bytes()
                .ok_or_else(|| Error::protocol("truncated row packet"))?;
            cells.push(Some(bytes.to_vec()));
        }
    }
    Ok(cells)
}

/// Is this statement a SELECT? Leading whitespace and parentheses allowed;
/// the keyword must end at a non-identifier byte.
fn sql_is_select(sql: &[u8]) -> bool {
    let start = sql
        .iter()
        .position(|b| !b.is_ascii_whitespace() && *b != b'(')
        .unwrap_or(sql.len());
    let rest = &sql[start..];
    rest.len() >= 6
        && rest[..6].eq_ignore_ascii_case(b"select")
        && rest
            .get(6)
            .is_none_or(|b| !(b.is_ascii_alphanumeric() || *b == b'_'))
}

/// Does the statement carry its own LIMIT clause (outside quoted literals)?
fn sql_has_limit_clause(sql: &[u8]) -> bool {
    let mut in_quote = false;
    let mut i = 0;
    while i < sql.len() {
        let b = sql[i];
        if b == b'\'' {
            let escaped = i >= 2 && sql[i - 1] == b'\\' && sql[i - 2] == b'\\';
            if !escaped {
                in_quote = !in_quote;
            }
        } else if !in_quote
            && sql.len() - i >= 5
            && sql[i..i + 5].eq_ignore_ascii_case(b"limit")
            && (i == 0 || sql[i - 1].is_ascii_whitespace())
            && sql
                .get(i + 5)
                .is_none_or(|next| next.is_ascii_whitespace())
        {
            return true;
        }
        i += 1;
    }
    false
}

fn server_error(payload: &[u8]) -> Error {
    match PacketReader::new(payload).decode_err() {
        Some(err) => Error::Query(QueryError {
            code: err.code,
            sqlstate: err.sqlstate,
            message: err.message,
        }),
        None => Error::protocol("malformed error packet"),
    }
}

fn lost_during_query(err: Error) -> Error {
    match err {
        Error::Connection(c) if c.kind == ConnectionErrorKind::Disconnected => {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: "lost connection to server during query".to_string(),
                source: Some(Box::new(Error::Connection(c))),
            })
        }
        other => other,
    }
}

fn connect_error(message: String, source: Option<std::io::Error>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Connect,
        message,
        source: source.map(|e| Box::new(e) as _),
    })
}

fn wrap_handshake(err: Error) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Connect,
        message: "handshake with server failed".to_string(),
        source: Some(Box::new(err)),
    })
}

/// A connection shared by statements and result sets.
///
/// Every command path takes the single mutex for the full
/// write-command/read-response span, including internal catalog switches. A
/// poisoned lock is recovered; the lifecycle state decides usability.
pub struct SharedConnection<S: ConnectStream = TcpStream> {
    inner: Arc<Mutex<Connection<S>>>,
}

impl<S: ConnectStream> Clone for SharedConnection<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ConnectStream> std::fmt::Debug for SharedConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedConnection").finish_non_exhaustive()
    }
}

impl<S: ConnectStream> SharedConnection<S> {
    /// Connect and wrap.
    pub fn connect(config: Config) -> Result<Self> {
        Ok(Self::from_connection(Connection::connect(config)?))
    }

    pub fn from_connection(conn: Connection<S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Execute a command, optionally against a different catalog.
    ///
    /// The catalog switch, the command, and the switch back all happen under
    /// one lock acquisition.
    pub fn execute(
        &self,
        sql: &[u8],
        row_limit: i64,
        catalog: Option<&str>,
    ) -> Result<ExecuteOutcome> {
        let mut conn = self.lock();
        let prior = match catalog {
            Some(target) if conn.session().catalog.as_deref() != Some(target) => {
                let prior = conn.session().catalog.clone();
                conn.switch_catalog(target)?;
                prior
            }
            _ => None,
        };

        let outcome = conn.execute(sql, row_limit);

        if let Some(previous) = prior {
            let restored = conn.switch_catalog(&previous);
            if outcome.is_ok() {
                restored?;
            }
            // restoring during teardown of a failed command: error discarded
        }
        outcome
    }

    /// Run a query and materialize plain rows. Update-count responses yield
    /// an empty vector.
    pub fn query(&self, sql: &str) -> Result<Vec<Row>> {
        match self.execute(sql.as_bytes(), -1, None)? {
            ExecuteOutcome::Update(_) => Ok(Vec::new()),
            ExecuteOutcome::Rows(raw) => {
                let info = Arc::new(ColumnInfo::new(
                    raw.fields.iter().map(|f| f.name.clone()).collect(),
                ));
                Ok(raw
                    .rows
                    .into_iter()
                    .map(|cells| Row::new(Arc::clone(&info), cells))
                    .collect())
            }
        }
    }

    /// Create a statement with the requested result-set shape.
    pub fn create_statement(
        &self,
        rs_type: ResultSetType,
        concurrency: Concurrency,
    ) -> Statement<S> {
        Statement::new(self.clone(), rs_type, concurrency)
    }

    /// Prepare a parameterized statement (client-side emulation).
    pub fn prepare(
        &self,
        sql: &str,
        rs_type: ResultSetType,
        concurrency: Concurrency,
    ) -> Result<PreparedStatement<S>> {
        PreparedStatement::new(self.clone(), sql, rs_type, concurrency)
    }

    pub fn catalog(&self) -> Option<String> {
        self.lock().session().catalog.clone()
    }

    /// Switch the connection's default database.
    pub fn set_catalog(&self, catalog: &str) -> Result<()> {
        self.lock().switch_catalog(catalog)
    }

    pub fn auto_commit(&self) -> bool {
        self.lock().session().autocommit
    }

    /// Toggle autocommit, enforcing the server's transaction capability.
    pub fn set_auto_commit(&self, enabled: bool) -> Result<()> {
        let mut conn = self.lock();
        conn.session().check_autocommit(enabled)?;
        let flag = if enabled { 1 } else { 0 };
        conn.run_command(format!("SET autocommit={flag}").as_bytes(), None)?;
        conn.session_mut().autocommit = enabled;
        Ok(())
    }

    pub fn transaction_isolation(&self) -> IsolationLevel {
        self.lock().session().isolation
    }

    /// Change the session isolation level.
    ///
    /// Raises a usage error, without touching the server, when the server
    /// does not support isolation levels.
    pub fn set_transaction_isolation(&self, level: IsolationLevel) -> Result<()> {
        let mut conn = self.lock();
        conn.session().check_isolation(level)?;
        let sql = level
            .as_sql()
            .ok_or_else(|| {
                Error::usage(UsageErrorKind::InvalidState, "isolation level has no SQL form")
            })?;
        conn.run_command(
            format!("SET SESSION TRANSACTION ISOLATION LEVEL {sql}").as_bytes(),
            None,
        )?;
        conn.session_mut().isolation = level;
        Ok(())
    }

    /// The sticky session row limit; -1 means unlimited.
    pub fn row_limit(&self) -> i64 {
        self.lock().session().row_limit
    }

    /// Change the sticky session row limit.
    pub fn set_row_limit(&self, limit: i64) {
        self.lock().session_mut().row_limit = limit;
    }

    /// Probe liveness.
    pub fn is_valid(&self) -> bool {
        self.lock().ping().is_ok()
    }

    pub fn server_version(&self) -> ServerVersion {
        self.lock().server_version()
    }

    pub fn identifier_quote(&self) -> Option<char> {
        self.lock().session().identifier_quote()
    }

    pub fn capitalize_type_names(&self) -> bool {
        self.lock().config().capitalize_type_names
    }

    pub fn last_insert_id(&self) -> u64 {
        self.lock().last_insert_id()
    }

    pub fn affected_rows(&self) -> u64 {
        self.lock().affected_rows()
    }

    pub fn warning_count(&self) -> u16 {
        self.lock().warning_count()
    }

    pub fn idle_time(&self) -> Duration {
        self.lock().idle_time()
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation()
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        self.lock().close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_squares_between_attempts() {
        assert_eq!(backoff_schedule(2, 3), vec![2, 4]);
        assert_eq!(backoff_schedule(2, 4), vec![2, 4, 16]);
        assert_eq!(backoff_schedule(3, 2), vec![3]);
        assert!(backoff_schedule(2, 1).is_empty());
        assert!(backoff_schedule(2, 0).is_empty());
    }

    #[test]
    fn select_detection() {
        assert!(sql_is_select(b"SELECT * FROM t"));
        assert!(sql_is_select(b"  select 1"));
        assert!(sql_is_select(b"(SELECT 1)"));
        assert!(sql_is_select(b"select\n1"));
        assert!(sql_is_select(b"SELECT"));
        assert!(!sql_is_select(b"UPDATE t SET a=1"));
        assert!(!sql_is_select(b"SELECTX"));
        assert!(!sql_is_select(b"selection FROM t"));
        assert!(!sql_is_select(b"select_all()"));
    }

    #[test]
    fn limit_clause_detection() {
        assert!(sql_has_limit_clause(b"SELECT * FROM t LIMIT 5"));
        assert!(sql_has_limit_clause(b"select * from t limit 5, 10"));
        assert!(!sql_has_limit_clause(b"SELECT * FROM t"));
        assert!(!sql_has_limit_clause(b"SELECT 'limit 5' FROM t"));
        assert!(!sql_has_limit_clause(b"SELECT unlimited FROM t"));
    }

    #[test]
    fn greeting_parse() {
        let mut w = PacketWriter::new();
        w.write_u8(10);
        w.write_null_terminated(b"8.0.36");
        w.write_u32_le(42); // connection id
        w.write_bytes(&[1, 2, 3, 4, 5, 6, 7, 8]); // seed part 1
        w.write_u8(0); // filler
        let caps = capabilities::BASE_CLIENT_FLAGS | capabilities::CLIENT_CONNECT_WITH_DB;
        w.write_u16_le((caps & 0xFFFF) as u16);
        w.write_u8(charset::UTF8MB4_GENERAL_CI);
        w.write_u16_le(0x0002); // status
        w.write_u16_le((caps >> 16) as u16);
        w.write_u8(21); // auth data length
        w.write_zeros(10);
        w.write_bytes(&[9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 0]);
        w.write_null_terminated(b"mysql_native_password");

        let greeting = ServerGreeting::parse(w.payload()).unwrap();
        assert_eq!(greeting.server_version, "8.0.36");
        assert_eq!(greeting.connection_id, 42);
        assert_eq!(greeting.auth_plugin, "mysql_native_password");
        assert_eq!(greeting.auth_seed.len(), 20);
        assert_eq!(greeting.auth_seed[..8], [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn greeting_rejects_other_protocols() {
        assert!(ServerGreeting::parse(&[9, b'5', 0]).is_err());
    }

    #[test]
    fn handshake_response_layout() {
        let greeting = ServerGreeting {
            protocol_version: 10,
            server_version: "8.0.36".to_string(),
            connection_id: 1,
            capabilities: u32::MAX,
            charset: charset::UTF8MB4_GENERAL_CI,
            status_flags: 0,
            auth_plugin: auth::plugins::MYSQL_NATIVE_PASSWORD.to_string(),
            auth_seed: vec![7; 20],
        };
        let config = Config::new().user("app").password("pw").database("db");
        let payload = build_handshake_response(&config, &greeting);

        let mut r = PacketReader::new(&payload);
        let caps = r.read_u32_le().unwrap();
        assert!(caps & capabilities::CLIENT_PROTOCOL_41 != 0);
        assert!(caps & capabilities::CLIENT_CONNECT_WITH_DB != 0);
        assert_eq!(r.read_u32_le().unwrap(), CLIENT_MAX_PACKET);
        assert_eq!(r.read_u8().unwrap(), charset::DEFAULT_CHARSET);
        r.skip(23);
        assert_eq!(r.read_null_terminated().unwrap(), "app");
        let auth = r.read_lenenc_bytes().unwrap();
        assert_eq!(auth.len(), 20);
        assert_eq!(r.read_null_terminated().unwrap(), "db");
        assert_eq!(
            r.read_null_terminated().unwrap(),
            auth::plugins::MYSQL_NATIVE_PASSWORD
        );
    }

    #[test]
    fn lost_during_query_keeps_cause() {
        use std::error::Error as _;
        let cause = Error::connection(ConnectionErrorKind::Disconnected, "read failed");
        let wrapped = lost_during_query(cause);
        match &wrapped {
            Error::Connection(c) => {
                assert_eq!(c.kind, ConnectionErrorKind::Disconnected);
                assert!(c.message.contains("during query"));
            }
            other => panic!("unexpected {other:?}"),
        }
        let source = wrapped.source().expect("cause preserved");
        assert!(source.to_string().contains("read failed"));

        // other errors pass through untouched
        assert!(matches!(
            lost_during_query(Error::protocol("bad frame")),
            Error::Protocol(_)
        ));
    }

    #[test]
    fn handshake_response_carries_configured_charset() {
        let greeting = ServerGreeting {
            protocol_version: 10,
            server_version: "8.0.36".to_string(),
            connection_id: 1,
            capabilities: u32::MAX,
            charset: charset::UTF8MB4_GENERAL_CI,
            status_flags: 0,
            auth_plugin: auth::plugins::MYSQL_NATIVE_PASSWORD.to_string(),
            auth_seed: vec![7; 20],
        };
        let config = Config::new()
            .user("app")
            .use_unicode(true)
            .character_encoding("latin1");
        let payload = build_handshake_response(&config, &greeting);
        let mut r = PacketReader::new(&payload);
        r.skip(8); // capabilities and max packet size
        assert_eq!(r.read_u8().unwrap(), charset::LATIN1_SWEDISH_CI);

        // without use_unicode the configured name is ignored
        let config = Config::new().user("app").character_encoding("latin1");
        let payload = build_handshake_response(&config, &greeting);
        assert_eq!(payload[8], charset::DEFAULT_CHARSET);
    }

    #[test]
    fn text_row_decoding() {
        let mut w = PacketWriter::new();
        w.write_lenenc_bytes(b"5");
        w.write_u8(0xFB); // NULL
        w.write_lenenc_bytes(b"ada");
        let cells = decode_text_row(w.payload(), 3).unwrap();
        assert_eq!(cells[0].as_deref(), Some(&b"5"[..]));
        assert_eq!(cells[1], None);
        assert_eq!(cells[2].as_deref(), Some(&b"ada"[..]));
    }

    #[test]
    fn short_text_row_is_a_protocol_error() {
        let mut w = PacketWriter::new();
        w.write_lenenc_bytes(b"5");
        assert!(decode_text_row(w.payload(), 2).is_err());
    }
}
