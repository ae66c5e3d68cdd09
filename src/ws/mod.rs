//! Websocket client.
//!
//! [RFC-6455](https://datatracker.ietf.org/doc/html/rfc6455)
//!
//! The upgrade handshake rides the HTTP engine; after the protocol
//! switch the client keeps driving the same transport, framing and
//! masking payloads itself. A heartbeat keeps idle connections honest
//! and a close state machine handles both orderly and unilateral
//! shutdown.

pub mod frame;
pub mod handshake;

mod client;

pub use client::Client;

use std::sync::Arc;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Closed = 0,
    Connecting = 1,
    Open = 2,
    Closing = 3,
}

impl Status {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => Status::Connecting,
            2 => Status::Open,
            3 => Status::Closing,
            _ => Status::Closed,
        }
    }
}

/// What a delivered [`Message`] is.
///
/// The low values mirror the wire opcodes. `Bad` and `Open` are
/// delivery-only tags and never appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Continuation = 0x00,
    Text = 0x01,
    Binary = 0x02,
    Close = 0x08,
    Ping = 0x09,
    Pong = 0x0A,

    /// Protocol violation report.
    Bad = 0x14,

    /// Connection-opened notification.
    Open = 0x1E,
}

/// A message delivered to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    /// Payload; the close reason when `kind` is `Close`.
    pub data: Vec<u8>,
    /// The close code; meaningful only when `kind` is `Close`.
    pub code: u16,
}

impl Message {
    pub(crate) fn close_with_reason(reason: &str) -> Self {
        Message {
            kind: MessageKind::Close,
            data: reason.as_bytes().to_vec(),
            code: 0,
        }
    }
}

/// Callback invoked for every delivered message. Reentrant calls back
/// into the client (`send`, `close`) are allowed.
pub type MessageCallback = Arc<dyn Fn(&Message) + Send + Sync + 'static>;
