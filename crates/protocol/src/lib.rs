//! funkraum-protocol – Signaling-Protokoll
//!
//! Definiert den `SignalingEnvelope`, der zwischen Client und Server ueber
//! die WebSocket-Verbindung ausgetauscht wird, sowie das JSON-Wire-Format.
//!
//! Session-Descriptions und Kandidaten sind fuer dieses Crate undurchsichtige
//! Payloads. Nur der `presence`-Payload wird als Identitaetsliste gelesen.

pub mod envelope;
pub mod error;
pub mod wire;

pub use envelope::{EnvelopeType, Payload, SignalingEnvelope};
pub use error::{EnvelopeError, EnvelopeResult};
