//! funkraum-signaling – WebSocket Signaling-Relay
//!
//! Dieser Crate implementiert die Serverseite von Funkraum: die
//! Presence-Registry, den Message-Router und die Verbindungs-Tasks, die
//! Envelopes zwischen den Teilnehmern eines Raums weiterreichen.
//!
//! ## Architektur
//!
//! ```text
//! axum Router (SignalingServer)
//!     |  /ws       -> WebSocket-Upgrade
//!     |  /health   -> Health-Check
//!     |  /metrics  -> Prometheus
//!     v
//! ClientConnection (pro Verbindung ein Task)
//!     |  Lese-Loop, Send-Queue, Keepalive
//!     v
//! MessageRouter
//!     +-- join                    -> PresenceRegistry::registrieren
//!     +-- offer/answer/candidate  -> ClientChannel des Empfaengers
//!
//! PresenceRegistry – Wer ist in welchem Raum, Presence-Broadcast
//! ClientChannel    – Send-Queue + Schliess-Signal einer Verbindung
//! ```

pub mod broadcast;
pub mod connection;
pub mod error;
pub mod presence;
pub mod router;
pub mod server_state;
pub mod ws;

// Bequeme Re-Exporte
pub use broadcast::{ChannelEmpfaenger, ClientChannel};
pub use connection::{ClientConnection, TrennGrund};
pub use error::{SignalingError, SignalingResult};
pub use presence::{PresenceRegistry, Registrierung};
pub use router::{MessageRouter, RoutingErgebnis, VerwerfGrund};
pub use server_state::{SignalingConfig, SignalingState};
pub use ws::SignalingServer;
