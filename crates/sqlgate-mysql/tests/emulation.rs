//! End-to-end driver tests over scripted in-memory streams.
//!
//! Each test concatenates the server's side of the exchange into one byte
//! script, hands it to the connection as its stream, and asserts on the
//! decoded results and on the bytes the client wrote.

use std::io::{Cursor, Read, Write};
use std::sync::{Arc, Mutex};

use sqlgate_core::{Error, Result};
use sqlgate_mysql::protocol::{PacketWriter, encode_frames};
use sqlgate_mysql::{
    Concurrency, Config, ConnectStream, Connection, IsolationLevel, ResultSetType, ServerVersion,
    SharedConnection,
};

// ---- scripted stream ----------------------------------------------------

struct ScriptStream {
    input: Cursor<Vec<u8>>,
    out: Arc<Mutex<Vec<u8>>>,
}

impl Read for ScriptStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for ScriptStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.out.lock().unwrap().write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl ConnectStream for ScriptStream {
    fn open(_config: &Config) -> Result<Self> {
        Err(Error::connection(
            sqlgate_core::ConnectionErrorKind::Connect,
            "no server reachable",
        ))
    }
    fn shutdown(&mut self) {}
}

// ---- script building ----------------------------------------------------

#[derive(Default)]
struct Script {
    bytes: Vec<u8>,
}

impl Script {
    /// Append payloads as consecutive frames starting at `start_seq`.
    fn frames(&mut self, start_seq: u8, payloads: &[Vec<u8>]) {
        let mut seq = start_seq;
        for payload in payloads {
            let (framed, next) = encode_frames(payload, seq);
            self.bytes.extend_from_slice(&framed);
            seq = next;
        }
    }

    /// A complete result-set response (column count, defs, EOF, rows, EOF)
    /// starting at sequence 1.
    fn result_set(&mut self, columns: &[ColumnSpec], rows: &[Vec<Option<&[u8]>>]) {
        let mut payloads = Vec::new();
        let mut header = PacketWriter::new();
        header.write_lenenc_int(columns.len() as u64);
        payloads.push(header.into_payload());
        for col in columns {
            payloads.push(column_payload(col));
        }
        payloads.push(eof_payload());
        for row in rows {
            payloads.push(row_payload(row));
        }
        payloads.push(eof_payload());
        self.frames(1, &payloads);
    }

    /// An OK response at sequence 1.
    fn ok(&mut self, affected: u64, last_insert_id: u64) {
        self.frames(1, &[ok_payload(affected, last_insert_id, 0)]);
    }
}

struct ColumnSpec {
    table: &'static str,
    name: &'static str,
    type_code: u8,
    flags: u16,
}

const TYPE_LONG: u8 = 0x03;
const TYPE_VAR_STRING: u8 = 0xFD;
const FLAG_NOT_NULL: u16 = 1;
const FLAG_PRIMARY_KEY: u16 = 2;
const FLAG_AUTO_INCREMENT: u16 = 512;

fn ok_payload(affected: u64, last_insert_id: u64, warnings: u16) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0x00);
    w.write_lenenc_int(affected);
    w.write_lenenc_int(last_insert_id);
    w.write_u16_le(0x0002); // autocommit status
    w.write_u16_le(warnings);
    w.into_payload()
}

fn eof_payload() -> Vec<u8> {
    vec![0xFE, 0x00, 0x00, 0x02, 0x00]
}

fn err_payload(code: u16, sqlstate: &str, message: &str) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0xFF);
    w.write_u16_le(code);
    w.write_u8(b'#');
    w.write_bytes(sqlstate.as_bytes());
    w.write_bytes(message.as_bytes());
    w.into_payload()
}

fn column_payload(col: &ColumnSpec) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_lenenc_bytes(b"def");
    w.write_lenenc_bytes(b"testdb");
    w.write_lenenc_bytes(col.table.as_bytes());
    w.write_lenenc_bytes(col.table.as_bytes());
    w.write_lenenc_bytes(col.name.as_bytes());
    w.write_lenenc_bytes(col.name.as_bytes());
    w.write_lenenc_int(0x0C);
    w.write_u16_le(45);
    w.write_u32_le(64);
    w.write_u8(col.type_code);
    w.write_u16_le(col.flags);
    w.write_u8(0);
    w.write_u16_le(0);
    w.into_payload()
}

fn row_payload(cells: &[Option<&[u8]>]) -> Vec<u8> {
    let mut w = PacketWriter::new();
    for cell in cells {
        match cell {
            None => w.write_u8(0xFB),
            Some(bytes) => w.write_lenenc_bytes(bytes),
        }
    }
    w.into_payload()
}

fn greeting_payload(version: &str, auth_plugin: &str) -> Vec<u8> {
    let caps: u32 = (1) // LONG_PASSWORD
        | (1 << 3) // CONNECT_WITH_DB
        | (1 << 9) // PROTOCOL_41
        | (1 << 13) // TRANSACTIONS
        | (1 << 15) // SECURE_CONNECTION
        | (1 << 19) // PLUGIN_AUTH
        | (1 << 21); // PLUGIN_AUTH_LENENC_CLIENT_DATA
    let mut w = PacketWriter::new();
    w.write_u8(10);
    w.write_null_terminated(version.as_bytes());
    w.write_u32_le(99); // connection id
    w.write_bytes(&[1, 2, 3, 4, 5, 6, 7, 8]);
    w.write_u8(0);
    w.write_u16_le((caps & 0xFFFF) as u16);
    w.write_u8(45);
    w.write_u16_le(0x0002);
    w.write_u16_le((caps >> 16) as u16);
    w.write_u8(21);
    w.write_zeros(10);
    w.write_bytes(&[9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 0]);
    w.write_null_terminated(auth_plugin.as_bytes());
    w.into_payload()
}

/// Greeting, auth OK, and the bootstrap SHOW VARIABLES response.
fn connect_preamble(version: &str) -> Script {
    let mut script = Script::default();
    script.frames(0, &[greeting_payload(version, "mysql_native_password")]);
    script.frames(2, &[ok_payload(0, 0, 0)]);
    script.result_set(
        &[
            ColumnSpec {
                table: "",
                name: "Variable_name",
                type_code: TYPE_VAR_STRING,
                flags: 0,
            },
            ColumnSpec {
                table: "",
                name: "Value",
                type_code: TYPE_VAR_STRING,
                flags: 0,
            },
        ],
        &[
            vec![Some(&b"max_allowed_packet"[..]), Some(&b"67108864"[..])],
            vec![Some(&b"net_buffer_length"[..]), Some(&b"16384"[..])],
            vec![Some(&b"transaction_isolation"[..]), Some(&b"REPEATABLE-READ"[..])],
            vec![Some(&b"sql_mode"[..]), Some(&b"STRICT_TRANS_TABLES"[..])],
        ],
    );
    script
}

fn connect(script: Script, config: Config) -> (SharedConnection<ScriptStream>, Arc<Mutex<Vec<u8>>>) {
    let out = Arc::new(Mutex::new(Vec::new()));
    let stream = ScriptStream {
        input: Cursor::new(script.bytes),
        out: Arc::clone(&out),
    };
    let conn = Connection::from_stream(stream, config).expect("connect");
    (SharedConnection::from_connection(conn), out)
}

fn default_config() -> Config {
    Config::new().user("app").password("pw").database("testdb")
}

fn written(out: &Arc<Mutex<Vec<u8>>>) -> Vec<u8> {
    out.lock().unwrap().clone()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

// ---- tests --------------------------------------------------------------

#[test]
fn connect_bootstraps_session_state() {
    let (conn, _out) = connect(connect_preamble("8.0.36"), default_config());
    assert_eq!(conn.server_version(), ServerVersion::new(8, 0, 36));
    assert_eq!(conn.transaction_isolation(), IsolationLevel::RepeatableRead);
    assert_eq!(conn.catalog().as_deref(), Some("testdb"));
    assert!(conn.auto_commit());
    assert_eq!(conn.identifier_quote(), Some('`'));
}

#[test]
fn connect_via_caching_sha2_fast_path() {
    let mut script = Script::default();
    script.frames(0, &[greeting_payload("8.0.36", "caching_sha2_password")]);
    // fast-auth success marker, then the final OK
    script.frames(2, &[vec![0x01, 0x03], ok_payload(0, 0, 0)]);
    script.result_set(
        &[
            ColumnSpec {
                table: "",
                name: "Variable_name",
                type_code: TYPE_VAR_STRING,
                flags: 0,
            },
            ColumnSpec {
                table: "",
                name: "Value",
                type_code: TYPE_VAR_STRING,
                flags: 0,
            },
        ],
        &[],
    );
    let (conn, _out) = connect(script, default_config());
    assert!(conn.catalog().is_some());
}

#[test]
fn query_materializes_rows_and_nulls() {
    let mut script = connect_preamble("8.0.36");
    script.result_set(
        &[
            ColumnSpec {
                table: "users",
                name: "id",
                type_code: TYPE_LONG,
                flags: FLAG_NOT_NULL | FLAG_PRIMARY_KEY,
            },
            ColumnSpec {
                table: "users",
                name: "nick",
                type_code: TYPE_VAR_STRING,
                flags: 0,
            },
        ],
        &[
            vec![Some(&b"1"[..]), Some(&b"ada"[..])],
            vec![Some(&b"2"[..]), None],
        ],
    );
    let (conn, _out) = connect(script, default_config());

    let rows = conn.query("SELECT id, nick FROM users").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get_i64(0).unwrap(), Some(1));
    assert_eq!(rows[0].get_str(1).unwrap(), Some("ada"));
    assert!(rows[1].is_null(1).unwrap());
    assert_eq!(rows[1].get_bytes_by_name("id").unwrap(), Some(&b"2"[..]));
}

#[test]
fn empty_first_cell_does_not_end_the_rows() {
    let mut script = connect_preamble("8.0.36");
    // a row whose first cell is empty starts with a 0x00 length byte
    script.result_set(
        &[
            ColumnSpec {
                table: "t",
                name: "a",
                type_code: TYPE_VAR_STRING,
                flags: 0,
            },
            ColumnSpec {
                table: "t",
                name: "b",
                type_code: TYPE_VAR_STRING,
                flags: 0,
            },
        ],
        &[
            vec![Some(&b""[..]), Some(&b"x"[..])],
            vec![Some(&b"y"[..]), Some(&b"z"[..])],
        ],
    );
    script.ok(0, 0);
    let (conn, _out) = connect(script, default_config());

    let rows = conn.query("SELECT a, b FROM t").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get_str(0).unwrap(), Some(""));
    assert_eq!(rows[0].get_str(1).unwrap(), Some("x"));
    assert_eq!(rows[1].get_str(0).unwrap(), Some("y"));

    // the stream stays in sync for the next command
    assert!(conn.query("SET autocommit=1").is_ok());
}

#[test]
fn server_error_carries_code_and_sqlstate() {
    let mut script = connect_preamble("8.0.36");
    script.frames(1, &[err_payload(1064, "42000", "You have an error in your SQL syntax")]);
    let (conn, _out) = connect(script, default_config());

    let err = conn.query("SELEC 1").unwrap_err();
    // a server error leaves the connection usable
    assert!(!err.is_fatal());
    match err {
        Error::Query(q) => {
            assert_eq!(q.code, 1064);
            assert_eq!(q.sqlstate.as_deref(), Some("42000"));
            assert!(q.message.starts_with("You have an error"));
        }
        other => panic!("expected a server error, got {other}"),
    }
}

#[test]
fn prepared_statement_renders_escaped_literals() {
    let mut script = connect_preamble("8.0.36");
    script.ok(1, 0);
    let (conn, out) = connect(script, default_config());

    let mut stmt = conn
        .prepare(
            "INSERT INTO t (a, b) VALUES (?, ?)",
            ResultSetType::ForwardOnly,
            Concurrency::ReadOnly,
        )
        .unwrap();
    assert_eq!(stmt.parameter_count(), 2);
    stmt.set_str(0, "it's\n").unwrap();
    stmt.set_i64(1, 42).unwrap();
    let result = stmt.execute_update().unwrap();
    assert_eq!(result.affected_rows, 1);

    let bytes = written(&out);
    assert!(contains(
        &bytes,
        b"INSERT INTO t (a, b) VALUES ('it\\'s\\n', 42)"
    ));
}

#[test]
fn unset_parameter_fails_before_any_io() {
    let (conn, out) = connect(connect_preamble("8.0.36"), default_config());
    let before = written(&out).len();

    let mut stmt = conn
        .prepare(
            "SELECT * FROM t WHERE a = ?",
            ResultSetType::ForwardOnly,
            Concurrency::ReadOnly,
        )
        .unwrap();
    let err = stmt.execute().unwrap_err();
    assert!(matches!(
        err,
        Error::Usage(u) if u.kind == sqlgate_core::UsageErrorKind::ParameterUnset
    ));
    assert_eq!(written(&out).len(), before);
}

#[test]
fn stream_parameter_is_drained_once() {
    let mut script = connect_preamble("8.0.36");
    script.ok(1, 0);
    let (conn, out) = connect(script, default_config());

    let mut stmt = conn
        .prepare(
            "INSERT INTO t (blob) VALUES (?)",
            ResultSetType::ForwardOnly,
            Concurrency::ReadOnly,
        )
        .unwrap();
    stmt.set_stream(0, Box::new(Cursor::new(b"chunk'd".to_vec())), None, true)
        .unwrap();
    stmt.execute_update().unwrap();
    assert!(contains(&written(&out), b"VALUES ('chunk\\'d')"));

    // the stream was consumed; the slot is unset again
    let err = stmt.execute().unwrap_err();
    assert!(matches!(
        err,
        Error::Usage(u) if u.kind == sqlgate_core::UsageErrorKind::ParameterUnset
    ));
}

fn three_row_select(script: &mut Script) {
    script.result_set(
        &[ColumnSpec {
            table: "t",
            name: "n",
            type_code: TYPE_LONG,
            flags: FLAG_NOT_NULL,
        }],
        &[
            vec![Some(&b"10"[..])],
            vec![Some(&b"20"[..])],
            vec![Some(&b"30"[..])],
        ],
    );
}

#[test]
fn scrollable_cursor_boundaries() {
    let mut script = connect_preamble("8.0.36");
    three_row_select(&mut script);
    let (conn, _out) = connect(script, default_config());

    let stmt = conn.create_statement(ResultSetType::ScrollInsensitive, Concurrency::ReadOnly);
    let mut rs = stmt.execute_query("SELECT n FROM t").unwrap();

    assert!(rs.is_before_first());
    assert!(rs.next().unwrap());
    assert_eq!(rs.get_i64(0).unwrap(), Some(10));

    assert!(rs.last().unwrap());
    assert_eq!(rs.get_i64(0).unwrap(), Some(30));
    assert!(!rs.next().unwrap());
    assert!(rs.is_after_last());

    assert!(rs.previous().unwrap());
    assert_eq!(rs.row_number(), 3);

    // clamping
    assert!(!rs.absolute(100).unwrap());
    assert!(rs.is_after_last());
    assert!(!rs.absolute(-100).unwrap());
    assert!(rs.is_before_first());
    assert!(rs.absolute(-1).unwrap());
    assert_eq!(rs.row_number(), 3);

    // absolute(0) rejected, relative(0) keeps position
    assert!(rs.absolute(0).is_err());
    assert_eq!(rs.row_number(), 3);
    assert!(rs.relative(0).unwrap());
    assert_eq!(rs.row_number(), 3);
    assert!(rs.relative(-2).unwrap());
    assert_eq!(rs.row_number(), 1);
}

#[test]
fn forward_only_rejects_backward_motion() {
    let mut script = connect_preamble("8.0.36");
    three_row_select(&mut script);
    let (conn, _out) = connect(script, default_config());

    let stmt = conn.create_statement(ResultSetType::ForwardOnly, Concurrency::ReadOnly);
    let mut rs = stmt.execute_query("SELECT n FROM t").unwrap();

    assert!(rs.next().unwrap());
    assert!(rs.previous().is_err());
    assert!(rs.absolute(1).is_err());
    assert!(rs.relative(1).is_err());
    assert!(rs.first().is_err());
    assert!(rs.last().is_err());
    // still positioned on row 1 after the rejections
    assert_eq!(rs.row_number(), 1);
    assert!(rs.next().unwrap());
    assert_eq!(rs.get_i64(0).unwrap(), Some(20));
}

fn users_columns() -> [ColumnSpec; 2] {
    [
        ColumnSpec {
            table: "t",
            name: "id",
            type_code: TYPE_LONG,
            flags: FLAG_NOT_NULL | FLAG_PRIMARY_KEY,
        },
        ColumnSpec {
            table: "t",
            name: "name",
            type_code: TYPE_VAR_STRING,
            flags: 0,
        },
    ]
}

#[test]
fn update_row_issues_update_then_refresh() {
    let mut script = connect_preamble("8.0.36");
    // the original SELECT
    script.result_set(
        &users_columns(),
        &[vec![Some(&b"5"[..]), Some(&b"old"[..])]],
    );
    // the companion UPDATE
    script.ok(1, 0);
    // the refresh SELECT
    script.result_set(&users_columns(), &[vec![Some(&b"5"[..]), Some(&b"X"[..])]]);
    let (conn, out) = connect(script, default_config());

    let stmt = conn.create_statement(ResultSetType::ScrollInsensitive, Concurrency::Updatable);
    let mut rs = stmt.execute_query("SELECT id, name FROM t").unwrap();
    assert!(rs.is_updatable());

    assert!(rs.next().unwrap());
    rs.update_str_by_name("name", "X").unwrap();
    rs.update_row().unwrap();

    let bytes = written(&out);
    assert!(contains(
        &bytes,
        b"UPDATE `t` SET `id`=5,`name`='X' WHERE `id`=5"
    ));
    assert!(contains(&bytes, b"SELECT `id`,`name` FROM `t` WHERE `id`=5"));

    // the buffer reflects the refreshed row
    assert_eq!(rs.get_str(1).unwrap(), Some("X".to_string()));
}

#[test]
fn insert_row_substitutes_generated_id() {
    let mut script = connect_preamble("8.0.36");
    let columns = || {
        [
            ColumnSpec {
                table: "t",
                name: "id",
                type_code: TYPE_LONG,
                flags: FLAG_NOT_NULL | FLAG_PRIMARY_KEY | FLAG_AUTO_INCREMENT,
            },
            ColumnSpec {
                table: "t",
                name: "name",
                type_code: TYPE_VAR_STRING,
                flags: 0,
            },
        ]
    };
    script.result_set(&columns(), &[]);
    // the companion INSERT reports the generated key
    script.ok(1, 42);
    let (conn, out) = connect(script, default_config());

    let stmt = conn.create_statement(ResultSetType::ScrollInsensitive, Concurrency::Updatable);
    let mut rs = stmt.execute_query("SELECT id, name FROM t").unwrap();
    assert_eq!(rs.row_count(), 0);

    rs.move_to_insert_row().unwrap();
    rs.update_str(1, "ada").unwrap();
    rs.insert_row().unwrap();

    assert!(contains(
        &written(&out),
        b"INSERT INTO `t` (`id`,`name`) VALUES (NULL,'ada')"
    ));

    assert_eq!(rs.row_count(), 1);
    assert!(rs.absolute(1).unwrap());
    assert_eq!(rs.get_i64(0).unwrap(), Some(42));
    assert_eq!(rs.get_str(1).unwrap(), Some("ada".to_string()));
}

#[test]
fn refresh_after_insert_reads_back_generated_row() {
    let mut script = connect_preamble("8.0.36");
    let columns = || {
        [
            ColumnSpec {
                table: "t",
                name: "id",
                type_code: TYPE_LONG,
                flags: FLAG_NOT_NULL | FLAG_PRIMARY_KEY | FLAG_AUTO_INCREMENT,
            },
            ColumnSpec {
                table: "t",
                name: "name",
                type_code: TYPE_VAR_STRING,
                flags: 0,
            },
        ]
    };
    script.result_set(&columns(), &[]);
    // the companion INSERT reports the generated key
    script.ok(1, 42);
    // the refresh SELECT keyed by that key
    script.result_set(&columns(), &[vec![Some(&b"42"[..]), Some(&b"grace"[..])]]);
    let (conn, out) = connect(script, default_config());

    let stmt = conn.create_statement(ResultSetType::ScrollInsensitive, Concurrency::Updatable);
    let mut rs = stmt.execute_query("SELECT id, name FROM t").unwrap();

    rs.move_to_insert_row().unwrap();
    rs.update_str(1, "grace").unwrap();
    rs.insert_row().unwrap();

    assert!(rs.last().unwrap());
    rs.refresh_row().unwrap();

    assert!(contains(
        &written(&out),
        b"SELECT `id`,`name` FROM `t` WHERE `id`=42"
    ));
    assert_eq!(rs.get_i64(0).unwrap(), Some(42));
    assert_eq!(rs.get_str(1).unwrap(), Some("grace".to_string()));
}

#[test]
fn delete_row_removes_from_buffer() {
    let mut script = connect_preamble("8.0.36");
    script.result_set(
        &users_columns(),
        &[
            vec![Some(&b"1"[..]), Some(&b"a"[..])],
            vec![Some(&b"2"[..]), Some(&b"b"[..])],
        ],
    );
    script.ok(1, 0); // DELETE
    let (conn, out) = connect(script, default_config());

    let stmt = conn.create_statement(ResultSetType::ScrollInsensitive, Concurrency::Updatable);
    let mut rs = stmt.execute_query("SELECT id, name FROM t").unwrap();
    assert!(rs.next().unwrap());
    rs.delete_row().unwrap();

    assert!(contains(&written(&out), b"DELETE FROM `t` WHERE `id`=1"));
    assert_eq!(rs.row_count(), 1);
    // the cursor now points at what was the second row
    assert_eq!(rs.get_i64(0).unwrap(), Some(2));
}

#[test]
fn read_only_result_set_rejects_mutation() {
    let mut script = connect_preamble("8.0.36");
    script.result_set(&users_columns(), &[vec![Some(&b"1"[..]), Some(&b"a"[..])]]);
    let (conn, out) = connect(script, default_config());

    let stmt = conn.create_statement(ResultSetType::ScrollInsensitive, Concurrency::ReadOnly);
    let mut rs = stmt.execute_query("SELECT id, name FROM t").unwrap();
    assert!(!rs.is_updatable());
    assert!(rs.next().unwrap());

    let before = written(&out).len();
    assert!(rs.update_str(1, "x").is_err());
    assert!(rs.update_row().is_err());
    assert!(rs.delete_row().is_err());
    assert!(rs.move_to_insert_row().is_err());
    assert_eq!(written(&out).len(), before);
}

#[test]
fn mutation_rejected_off_row() {
    let mut script = connect_preamble("8.0.36");
    script.result_set(&users_columns(), &[vec![Some(&b"1"[..]), Some(&b"a"[..])]]);
    let (conn, _out) = connect(script, default_config());

    let stmt = conn.create_statement(ResultSetType::ScrollInsensitive, Concurrency::Updatable);
    let mut rs = stmt.execute_query("SELECT id, name FROM t").unwrap();

    // before-first
    let err = rs.update_row().unwrap_err();
    assert!(matches!(
        err,
        Error::Usage(u) if u.kind == sqlgate_core::UsageErrorKind::Positioning
    ));
    rs.after_last().unwrap();
    assert!(rs.delete_row().is_err());
}

#[test]
fn sticky_row_limit_brackets_selects() {
    let mut script = connect_preamble("8.0.36");
    script.ok(0, 0); // SET SQL_SELECT_LIMIT=2
    three_row_select(&mut script);
    script.ok(0, 0); // SET SQL_SELECT_LIMIT=DEFAULT
    let (conn, out) = connect(script, default_config().max_rows(2));

    let rows = conn.query("SELECT n FROM t").unwrap();
    // the server enforced the cap in this exchange; the client passed it on
    assert_eq!(rows.len(), 3);

    let bytes = written(&out);
    assert!(contains(&bytes, b"SET SQL_SELECT_LIMIT=2"));
    assert!(contains(&bytes, b"SET SQL_SELECT_LIMIT=DEFAULT"));
}

#[test]
fn explicit_limit_clause_caps_decoding_instead() {
    let mut script = connect_preamble("8.0.36");
    three_row_select(&mut script);
    let (conn, out) = connect(script, default_config().max_rows(2));

    let rows = conn.query("SELECT n FROM t LIMIT 99").unwrap();
    assert_eq!(rows.len(), 2);
    assert!(!contains(&written(&out), b"SQL_SELECT_LIMIT"));
}

#[test]
fn isolation_change_rejected_without_server_support() {
    // 3.23.20 supports transactions but not isolation levels
    let (conn, out) = connect(connect_preamble("3.23.20"), default_config());
    let before = written(&out).len();

    let err = conn
        .set_transaction_isolation(IsolationLevel::Serializable)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Usage(u) if u.kind == sqlgate_core::UsageErrorKind::NotSupported
    ));
    assert_eq!(written(&out).len(), before);
}

#[test]
fn ping_answers_liveness() {
    let mut script = connect_preamble("8.0.36");
    script.ok(0, 0); // COM_PING reply
    let (conn, _out) = connect(script, default_config());
    assert!(conn.is_valid());
}

#[test]
fn reconnect_exhaustion_names_attempt_count() {
    let config = default_config()
        .auto_reconnect(true)
        .max_reconnects(1)
        .initial_timeout(1);
    let script = connect_preamble("8.0.36");
    let out = Arc::new(Mutex::new(Vec::new()));
    let stream = ScriptStream {
        input: Cursor::new(script.bytes),
        out: Arc::clone(&out),
    };
    let mut conn = Connection::from_stream(stream, config).unwrap();

    // every reopen fails; one attempt, no backoff sleep
    let err = conn.reconnect().unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("1 attempts"), "{err}");
}

#[test]
fn close_is_idempotent_everywhere() {
    let mut script = connect_preamble("8.0.36");
    script.result_set(&users_columns(), &[vec![Some(&b"1"[..]), Some(&b"a"[..])]]);
    let (conn, _out) = connect(script, default_config());

    let mut stmt = conn.create_statement(ResultSetType::ForwardOnly, Concurrency::ReadOnly);
    let mut rs = stmt.execute_query("SELECT id, name FROM t").unwrap();

    rs.close();
    rs.close();
    assert!(rs.is_closed());
    assert!(rs.next().is_err());

    stmt.close();
    stmt.close();
    assert!(stmt.is_closed());

    conn.close();
    conn.close();
}

#[test]
fn idle_time_advances_after_commands() {
    let mut script = connect_preamble("8.0.36");
    script.ok(0, 0);
    let (conn, _out) = connect(script, default_config());

    conn.query("SET autocommit=1").ok();
    std::thread::sleep(std::time::Duration::from_millis(10));
    assert!(conn.idle_time() >= std::time::Duration::from_millis(10));
}
