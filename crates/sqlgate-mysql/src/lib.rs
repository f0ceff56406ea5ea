//! MySQL wire-protocol driver for sqlgate.
//!
//! This crate implements the protocol/session core from scratch over
//! blocking TCP:
//!
//! - Packet framing with sequence numbers (16MB split/reassembly)
//! - Authentication (mysql_native_password, caching_sha2_password)
//! - Connection lifecycle with bounded auto-reconnection
//! - Text-protocol command execution
//! - Client-side emulated prepared statements
//! - Scrollable and updatable result sets
//!
//! # Protocol overview
//!
//! Every packet carries a 3-byte little-endian payload length and a 1-byte
//! sequence number; payloads of 16MB-1 or more span several frames. A
//! command's response opens with a discriminator byte: 0x00 for an update
//! count, 0xFF for a server error, anything else for a result-set header.
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlgate_mysql::{Config, SharedConnection};
//!
//! let config = Config::new()
//!     .host("localhost")
//!     .user("app")
//!     .password("secret")
//!     .database("orders");
//!
//! let conn: SharedConnection = SharedConnection::connect(config)?;
//! let rows = conn.query("SELECT id, name FROM customers")?;
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod field;
pub mod protocol;
pub mod result_set;
pub mod session;
pub mod statement;
pub mod transport;

pub use config::Config;
pub use connection::{
    ConnectStream, Connection, ExecuteOutcome, LifecycleState, RawResultSet, ServerGreeting,
    SharedConnection, UpdateResult,
};
pub use field::{Field, FieldType};
pub use result_set::{Concurrency, ResultSet, ResultSetType};
pub use session::{IsolationLevel, ServerVersion, SessionState};
pub use statement::{ParamSlot, PreparedStatement, Statement};
pub use transport::PacketTransport;
