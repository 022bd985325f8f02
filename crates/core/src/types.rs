//! Gemeinsame Identifikationstypen fuer Funkraum
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name des Raums, den Clients ohne eigene Angabe betreten
pub const STANDARD_RAUM: &str = "main";

/// Selbst gewaehlte Kennung eines Teilnehmers
///
/// Wird nicht authentifiziert; die Eindeutigkeit pro Raum erzwingt die
/// Presence-Registry. Die Ordnung ist die lexikografische Byte-Ordnung des
/// Strings und bestimmt Initiator- und Glare-Rollen.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Erstellt eine Identitaet aus einem beliebigen String
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leere Kennungen sind auf dem Draht ungueltig
    pub fn ist_leer(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name eines Raums (Partition fuer Presence und Routing)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomName(String);

impl RoomName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn ist_leer(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Default for RoomName {
    fn default() -> Self {
        Self::new(STANDARD_RAUM)
    }
}

impl From<&str> for RoomName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for RoomName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Eindeutige ID einer einzelnen Transport-Verbindung
///
/// Unterscheidet eine neue Verbindung von einer bereits ersetzten Verbindung
/// mit derselben Identitaet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Erstellt eine neue zufaellige ConnectionId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}
