//! Core Bolt v1 client: framed transport, typed value codec, the
//! connection state machine, and TOFU TLS pinning.
//!
//! This crate stops at a single request/response channel per connection.
//! Sessions, transactions, query planning and result rendering are
//! layered on top by callers; none of that lives here.

pub mod buffering_stream;
pub mod byte_stream;
pub mod chunking_stream;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod message_codec;
pub mod tls;
pub mod uri;
pub mod value;
pub mod value_codec;

pub mod test_utils;

pub use config::Config;
pub use connection::ConnectionCore;
pub use error::{Error, ErrorKind, Fallible};
pub use value::{Identity, Node, Path, Relationship, Struct, UnboundRelationship, Value, ValueMap};
