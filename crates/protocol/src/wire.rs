//! Wire-Format fuer die WebSocket-Verbindung
//!
//! Jede Nachricht ist genau ein WebSocket-Textframe mit einem JSON-Objekt.
//! Die Framegrenzen liefert WebSocket selbst; dieses Modul kuemmert sich nur
//! um (De-)Serialisierung, Groessenlimit und Validierung.
//!
//! Dekodierfehler betreffen immer nur den einen Frame. Der Leser verwirft ihn
//! und liest weiter.

use crate::envelope::SignalingEnvelope;
use crate::error::{EnvelopeError, EnvelopeResult};

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Standard-maximale Frame-Groesse (1 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// Kodieren / Dekodieren
// ---------------------------------------------------------------------------

/// Serialisiert einen Envelope als Textframe
pub fn kodieren(envelope: &SignalingEnvelope) -> EnvelopeResult<String> {
    let json = serde_json::to_string(envelope)?;
    if json.len() > DEFAULT_MAX_FRAME_SIZE {
        return Err(EnvelopeError::ZuGross {
            groesse: json.len(),
            maximum: DEFAULT_MAX_FRAME_SIZE,
        });
    }
    Ok(json)
}

/// Dekodiert und validiert einen Textframe
pub fn dekodieren(text: &str) -> EnvelopeResult<SignalingEnvelope> {
    dekodieren_mit_limit(text, DEFAULT_MAX_FRAME_SIZE)
}

/// Wie [`dekodieren`], mit benutzerdefinierter maximaler Frame-Groesse
pub fn dekodieren_mit_limit(text: &str, max_frame_size: usize) -> EnvelopeResult<SignalingEnvelope> {
    if text.len() > max_frame_size {
        return Err(EnvelopeError::ZuGross {
            groesse: text.len(),
            maximum: max_frame_size,
        });
    }

    let envelope: SignalingEnvelope = serde_json::from_str(text)?;
    envelope.validieren()?;
    Ok(envelope)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
