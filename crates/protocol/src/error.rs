//! Fehlertypen fuer das Signaling-Protokoll

use thiserror::Error;

/// Fehler beim Dekodieren oder Validieren eines Envelopes
///
/// Jeder dieser Fehler betrifft genau eine Nachricht; die Verbindung bleibt
/// bestehen.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Kein gueltiges JSON oder unbekannter `type`
    #[error("JSON-Deserialisierung fehlgeschlagen: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame ueberschreitet die maximale Groesse
    #[error("Frame zu gross: {groesse} Bytes (Maximum: {maximum} Bytes)")]
    ZuGross { groesse: usize, maximum: usize },

    /// Pflichtfeld fehlt fuer den angegebenen Typ
    #[error("Pflichtfeld '{feld}' fehlt fuer Typ '{typ}'")]
    FeldFehlt { typ: &'static str, feld: &'static str },

    /// `from` ist leer
    #[error("Absender fehlt")]
    AbsenderFehlt,

    /// `presence`-Payload ist keine Liste von Identitaeten
    #[error("Ungueltiger Presence-Payload: {0}")]
    UngueltigePresence(String),
}

/// Result-Typ fuer das Protokoll-Crate
pub type EnvelopeResult<T> = Result<T, EnvelopeError>;
