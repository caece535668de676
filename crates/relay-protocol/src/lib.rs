//! # relay-protocol
//!
//! Payload definitions for the Relay chat server.
//!
//! Clients and the server exchange JSON objects. Every object carries a
//! `cmd` field: inbound it names the command to run, outbound it names the
//! kind of message the client should render.
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{codec, Payload};
//!
//! let payload = Payload::new("chat").with("text", "Hello, world!");
//!
//! let encoded = codec::encode_text(&payload).unwrap();
//! let decoded = codec::decode_text(&encoded).unwrap();
//! assert_eq!(decoded.cmd(), Some("chat"));
//! ```

pub mod codec;
pub mod messages;
pub mod payload;

pub use codec::{decode_text, encode_text, PayloadCodec, ProtocolError};
pub use messages::kind;
pub use payload::{Payload, CMD_FIELD};
