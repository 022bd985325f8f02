//! Fehlertypen fuer die Client-Seite

use funkraum_protocol::EnvelopeError;
use std::time::Duration;
use thiserror::Error;

use crate::session::Zustand;

/// Fehlertyp fuer Transport und Peer-Verhandlung
#[derive(Debug, Error)]
pub enum PeerError {
    /// Verbindungsaufbau zum Signaling-Server fehlgeschlagen
    #[error("Verbindungsaufbau fehlgeschlagen: {0}")]
    Verbindung(String),

    /// WebSocket-Handshake hat die Frist ueberschritten
    #[error("Handshake-Timeout nach {0:?}")]
    HandshakeTimeout(Duration),

    /// Transport ist geschlossen, nichts kann mehr gesendet werden
    #[error("Transport geschlossen")]
    TransportGeschlossen,

    /// Ungueltiger Envelope
    #[error("Protokollfehler: {0}")]
    Protokoll(#[from] EnvelopeError),

    /// Erzeugen oder Anwenden einer Session-Description fehlgeschlagen
    #[error("Description fehlgeschlagen: {0}")]
    Description(String),

    /// Sonstiger Fehler der Verbindungsschicht
    #[error("Verbindungsschicht: {0}")]
    Verbindungsschicht(String),

    /// Operation ist im aktuellen Zustand nicht erlaubt
    #[error("{aktion} im Zustand {zustand:?} nicht erlaubt")]
    UngueltigerZustand {
        aktion: &'static str,
        zustand: Zustand,
    },
}

impl PeerError {
    /// Kann ein spaeteres `initiieren()` oder Offer den Vorgang wiederholen?
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(self, Self::Description(_) | Self::Verbindungsschicht(_))
    }
}

/// Result-Typ fuer die Client-Seite
pub type PeerResult<T> = Result<T, PeerError>;
