//! # everest-auth
//!
//! Request signing for the Everest broker connection.
//!
//! The broker accepts MQTT-over-WebSocket connections authenticated by a
//! presigned URL: every parameter the handshake needs is carried in the
//! query string, so no further credential exchange happens on the wire.
//! This crate implements the signing scheme (`AWS4-HMAC-SHA256` over a
//! zero-body GET) as a pure function of the credentials, the connection
//! parameters, and a caller-supplied timestamp.
//!
//! A signed URL embeds the signing time and expiry window, so callers must
//! produce a fresh one for every connect attempt rather than caching.

pub mod presign;

pub use presign::{
    presigned_url, Credentials, SigningContext, ALGORITHM, DEFAULT_EXPIRES_SECS,
    EMPTY_PAYLOAD_HASH,
};
