//! Fehlertypen fuer den Signaling-Service

use thiserror::Error;

/// Fehlertyp fuer den Signaling-Service
#[derive(Debug, Error)]
pub enum SignalingError {
    /// IO-Fehler (Listener, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Ungueltiger Envelope (betrifft nur diese eine Nachricht)
    #[error("Protokollfehler: {0}")]
    Protokoll(#[from] funkraum_protocol::EnvelopeError),

    /// WebSocket-Fehler beim Schreiben
    #[error("WebSocket-Fehler: {0}")]
    WebSocket(#[from] axum::Error),

    /// Send-Queue des Empfaengers ist voll
    #[error("Send-Queue voll")]
    SendeQueueVoll,

    /// Senden an Client fehlgeschlagen (Verbindung geschlossen)
    #[error("Senden fehlgeschlagen")]
    SendFehler,

    /// Timeout (Keepalive, Schreib-Deadline)
    #[error("Timeout")]
    Timeout,
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;
