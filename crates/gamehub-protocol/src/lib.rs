//! # gamehub-protocol
//!
//! Wire envelopes for the Gamehub realtime game server.
//!
//! Clients send a [`Message`] addressed by `(category, action)` and receive
//! one [`Response`] per message, matched by correlation id. Text frames carry
//! JSON; binary frames carry MessagePack.
//!
//! ## Example
//!
//! ```rust
//! use gamehub_protocol::{codec, Response};
//!
//! let msg = codec::decode_text(
//!     r#"{"category":"heartbeat","action":"ping","correlationId":"abc"}"#,
//! ).unwrap();
//! let reply = Response::ok(msg.correlation_id.clone(), serde_json::Value::Null);
//! let wire = codec::encode_text(&reply).unwrap();
//! assert!(wire.contains("\"correlationId\":\"abc\""));
//! ```

pub mod code;
pub mod codec;
pub mod message;
pub mod routes;

pub use code::ResponseCode;
pub use codec::{Encoding, ProtocolError};
pub use message::{unix_millis, unix_seconds, Message, Response};
pub use routes::{action, category};
