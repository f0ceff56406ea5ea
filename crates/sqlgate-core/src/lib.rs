//! Core types for the sqlgate MySQL client.
//!
//! This crate holds the driver-independent pieces shared by the protocol
//! layer and by callers:
//!
//! - The error taxonomy (`Error` and its category structs)
//! - `Value`, the dynamically-typed parameter value used for binding
//! - `Row` and `ColumnInfo`, the byte-cell result row representation

pub mod error;
pub mod row;
pub mod value;

pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, ProtocolError, QueryError, Result,
    UsageError, UsageErrorKind,
};
pub use row::{ColumnInfo, Row};
pub use value::Value;
