//! funkraum-peer – Client-Seite der Peer-Verhandlung
//!
//! Verbindet sich mit dem Signaling-Relay, verfolgt die Presence des Raums
//! und fuehrt pro Gegenstelle eine Verhandlungs-Zustandsmaschine.
//!
//! ## Architektur
//!
//! ```text
//! SignalingTransport (WebSocket, join, Keepalive)
//!     |  TransportEreignis: Praesenz / Signal / Geschlossen
//!     v
//! PeerClient (ein Dispatch-Loop)
//!     v
//! Verhandlung (besitzt alle Sitzungen, entscheidet wer initiiert)
//!     v
//! PeerSession (pro Gegenstelle: Idle -> OfferSent/OfferReceived -> Connected)
//!     v
//! Verbindungsschicht (extern: Descriptions, Kandidaten, Audio-Track)
//! ```

pub mod client;
pub mod connectivity;
pub mod error;
pub mod negotiation;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testhilfe;

// Bequeme Re-Exporte
pub use client::{PeerClient, TrackSteuerung};
pub use connectivity::{
    KandidatenSink, MediaTrackHandle, SignalAusgang, VerbindungsFabrik, Verbindungsschicht,
};
pub use error::{PeerError, PeerResult};
pub use negotiation::{PraesenzDiff, SitzungsEreignis, Verhandlung};
pub use session::{GlareRolle, PeerSession, Reaktion, Zustand};
pub use transport::{SignalingTransport, TransportConfig, TransportEreignis};
