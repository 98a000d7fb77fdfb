//! Codecs for Gamehub envelopes.
//!
//! Text frames carry JSON, binary frames carry MessagePack with named
//! fields. The server answers in the encoding the request arrived in.

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::message::{Message, Response};

/// Maximum encoded frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Wire encoding of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    /// JSON in a text frame.
    #[default]
    Text,
    /// MessagePack in a binary frame.
    Binary,
}

fn check_size(len: usize) -> Result<(), ProtocolError> {
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    Ok(())
}

fn from_text<T: DeserializeOwned>(data: &str) -> Result<T, ProtocolError> {
    check_size(data.len())?;
    Ok(serde_json::from_str(data)?)
}

fn from_binary<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    check_size(data.len())?;
    Ok(rmp_serde::from_slice(data)?)
}

fn to_text<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(value)?;
    check_size(text.len())?;
    Ok(text)
}

fn to_binary<T: Serialize>(value: &T) -> Result<Bytes, ProtocolError> {
    let data = rmp_serde::to_vec_named(value)?;
    check_size(data.len())?;
    Ok(Bytes::from(data))
}

/// Decode a request from a JSON text frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or not a JSON object of the
/// expected shape.
pub fn decode_text(data: &str) -> Result<Message, ProtocolError> {
    from_text(data)
}

/// Decode a request from a MessagePack binary frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or cannot be decoded.
pub fn decode_binary(data: &[u8]) -> Result<Message, ProtocolError> {
    from_binary(data)
}

/// Encode a response as JSON.
///
/// # Errors
///
/// Returns an error if the response is too large or encoding fails.
pub fn encode_text(response: &Response) -> Result<String, ProtocolError> {
    to_text(response)
}

/// Encode a response as MessagePack.
///
/// # Errors
///
/// Returns an error if the response is too large or encoding fails.
pub fn encode_binary(response: &Response) -> Result<Bytes, ProtocolError> {
    to_binary(response)
}

/// Encode a request as JSON (client side).
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_message_text(message: &Message) -> Result<String, ProtocolError> {
    to_text(message)
}

/// Encode a request as MessagePack (client side).
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_message_binary(message: &Message) -> Result<Bytes, ProtocolError> {
    to_binary(message)
}

/// Decode a JSON response (client side).
///
/// # Errors
///
/// Returns an error if decoding fails.
pub fn decode_response_text(data: &str) -> Result<Response, ProtocolError> {
    from_text(data)
}

/// Decode a MessagePack response (client side).
///
/// # Errors
///
/// Returns an error if decoding fails.
pub fn decode_response_binary(data: &[u8]) -> Result<Response, ProtocolError> {
    from_binary(data)
}
