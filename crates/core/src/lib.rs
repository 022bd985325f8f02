//! funkraum-core – Gemeinsame Typen
//!
//! Dieses Crate stellt die Bausteine bereit, die Server (Signaling) und
//! Client (Peer-Verhandlung) gemeinsam nutzen. Fehlertypen liegen in den
//! jeweiligen Crates.

pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use types::{ConnectionId, Identity, RoomName, STANDARD_RAUM};
