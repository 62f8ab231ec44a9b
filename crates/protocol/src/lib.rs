//! Wire protocol for the hublink JSON hub protocol.
//!
//! Records are JSON objects terminated by the ASCII record separator.
//! This crate owns framing, the handshake frames, the invocation and
//! completion envelopes, and negotiate response parsing.

pub mod constants;
pub mod envelope;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod negotiation;

// Re-export primary types for convenience.
pub use constants::{MessageType, RECORD_SEPARATOR};
pub use envelope::{CloseMessage, CompletionMessage, HubMessage, InvocationMessage};
pub use error::ProtocolError;
pub use framing::{split_records, write_record};
pub use handshake::{HandshakeRequest, HandshakeResponse};
pub use negotiation::{AvailableTransport, NegotiationResponse, TransferFormat, TransportKind};
