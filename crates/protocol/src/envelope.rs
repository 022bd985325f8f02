//! Signaling-Envelope
//!
//! Eine Nachrichteneinheit auf der Signaling-Verbindung:
//!
//! ```json
//! {"type":"offer","from":"alice","to":"bob","payload":{"sdp":"..."}}
//! ```
//!
//! | Feld      | Pflicht bei                         |
//! |-----------|-------------------------------------|
//! | `type`    | immer                               |
//! | `from`    | immer                               |
//! | `to`      | `offer`, `answer`, `candidate`      |
//! | `room`    | `join`                              |
//! | `payload` | `offer`, `answer`, `candidate`, `presence` (Identitaetsliste) |

use funkraum_core::{Identity, RoomName};
use serde::{Deserialize, Serialize};

use crate::error::{EnvelopeError, EnvelopeResult};

/// Absender-Kennung fuer Nachrichten, die der Server selbst erzeugt
pub const SERVER_ABSENDER: &str = "server";

// ---------------------------------------------------------------------------
// EnvelopeType
// ---------------------------------------------------------------------------

/// Art einer Signaling-Nachricht
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeType {
    Join,
    Offer,
    Answer,
    Candidate,
    Presence,
}

impl EnvelopeType {
    /// Name auf dem Draht
    pub fn als_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
            Self::Presence => "presence",
        }
    }

    /// Punkt-zu-Punkt-Nachrichten brauchen einen Empfaenger und werden weitergeleitet
    pub fn ist_punkt_zu_punkt(&self) -> bool {
        matches!(self, Self::Offer | Self::Answer | Self::Candidate)
    }
}

impl std::fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.als_str())
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Undurchsichtiger Payload (Session-Description, Kandidat oder Presence-Liste)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(serde_json::Value);

impl Payload {
    pub fn new(wert: serde_json::Value) -> Self {
        Self(wert)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

}

impl From<serde_json::Value> for Payload {
    fn from(wert: serde_json::Value) -> Self {
        Self(wert)
    }
}

// ---------------------------------------------------------------------------
// SignalingEnvelope
// ---------------------------------------------------------------------------

/// Eine Signaling-Nachricht auf dem Draht
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingEnvelope {
    #[serde(rename = "type")]
    pub typ: EnvelopeType,
    /// Immer die sendende Identitaet
    pub from: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

impl SignalingEnvelope {
    /// Beitritt zu einem Raum
    pub fn join(from: Identity, room: RoomName) -> Self {
        Self {
            typ: EnvelopeType::Join,
            from,
            to: None,
            room: Some(room),
            payload: None,
        }
    }

    /// Punkt-zu-Punkt-Nachricht (`offer`, `answer`, `candidate`)
    pub fn signal(typ: EnvelopeType, from: Identity, to: Identity, payload: Payload) -> Self {
        Self {
            typ,
            from,
            to: Some(to),
            room: None,
            payload: Some(payload),
        }
    }

    pub fn offer(from: Identity, to: Identity, payload: Payload) -> Self {
        Self::signal(EnvelopeType::Offer, from, to, payload)
    }

    pub fn answer(from: Identity, to: Identity, payload: Payload) -> Self {
        Self::signal(EnvelopeType::Answer, from, to, payload)
    }

    pub fn candidate(from: Identity, to: Identity, payload: Payload) -> Self {
        Self::signal(EnvelopeType::Candidate, from, to, payload)
    }

    /// Vollstaendiger Presence-Snapshot eines Raums (kein Diff)
    pub fn presence(mitglieder: &[Identity]) -> Self {
        let liste = mitglieder
            .iter()
            .map(|m| serde_json::Value::String(m.as_str().to_string()))
            .collect();
        Self {
            typ: EnvelopeType::Presence,
            from: Identity::new(SERVER_ABSENDER),
            to: None,
            room: None,
            payload: Some(Payload::new(serde_json::Value::Array(liste))),
        }
    }

    /// Prueft die Pflichtfelder fuer den jeweiligen Typ
    pub fn validieren(&self) -> EnvelopeResult<()> {
        if self.from.ist_leer() {
            return Err(EnvelopeError::AbsenderFehlt);
        }

        match self.typ {
            // Ohne `room` gilt der Standardraum des Servers
            EnvelopeType::Join => Ok(()),
            EnvelopeType::Offer | EnvelopeType::Answer | EnvelopeType::Candidate => {
                match &self.to {
                    Some(to) if !to.ist_leer() => {}
                    _ => return Err(self.feld_fehlt("to")),
                }
                if self.payload.is_none() {
                    return Err(self.feld_fehlt("payload"));
                }
                Ok(())
            }
            EnvelopeType::Presence => self.presence_mitglieder().map(|_| ()),
        }
    }

    /// Liest den `presence`-Payload als Identitaetsliste
    pub fn presence_mitglieder(&self) -> EnvelopeResult<Vec<Identity>> {
        let payload = self
            .payload
            .as_ref()
            .ok_or_else(|| self.feld_fehlt("payload"))?;
        serde_json::from_value::<Vec<Identity>>(payload.as_value().clone())
            .map_err(|e| EnvelopeError::UngueltigePresence(e.to_string()))
    }

    fn feld_fehlt(&self, feld: &'static str) -> EnvelopeError {
        EnvelopeError::FeldFehlt {
            typ: self.typ.als_str(),
            feld,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
