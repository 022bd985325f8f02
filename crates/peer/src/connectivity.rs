//! Verbindungsschicht – Naht zur externen Peer-Connection
//!
//! Die eigentliche Peer-Verbindung (ICE, DTLS, RTP) liegt ausserhalb dieses
//! Crates. Die Verhandlung spricht sie nur ueber [`Verbindungsschicht`] an
//! und behandelt Descriptions und Kandidaten als undurchsichtige Payloads.
//!
//! Lokal gesammelte Kandidaten gibt die Schicht ueber den [`KandidatenSink`]
//! zurueck, der sie als `candidate`-Envelopes an den Transport reicht.

use async_trait::async_trait;
use funkraum_core::Identity;
use funkraum_protocol::{Payload, SignalingEnvelope};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{PeerError, PeerResult};

// ---------------------------------------------------------------------------
// MediaTrackHandle
// ---------------------------------------------------------------------------

/// Undurchsichtiger Verweis auf einen Audio-Track
///
/// Gehoert dem Audio-Kollaborator; eine Sitzung haelt nur eine Referenz.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaTrackHandle(Arc<str>);

impl MediaTrackHandle {
    pub fn neu(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for MediaTrackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MediaTrack({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Ausgehende Signale
// ---------------------------------------------------------------------------

/// Sendeseite des Transports fuer Envelopes dieses Clients
#[derive(Clone, Debug)]
pub struct SignalAusgang {
    lokal: Identity,
    tx: mpsc::UnboundedSender<SignalingEnvelope>,
}

impl SignalAusgang {
    pub fn neu(lokal: Identity, tx: mpsc::UnboundedSender<SignalingEnvelope>) -> Self {
        Self { lokal, tx }
    }

    /// Eigene Identitaet (wird als `from` eingesetzt)
    pub fn lokal(&self) -> &Identity {
        &self.lokal
    }

    /// Reiht einen Envelope in die Send-Queue des Transports ein
    pub fn senden(&self, envelope: SignalingEnvelope) -> PeerResult<()> {
        self.tx
            .send(envelope)
            .map_err(|_| PeerError::TransportGeschlossen)
    }

    /// Sink fuer lokal gesammelte Kandidaten an `remote`
    pub fn kandidaten_sink(&self, remote: Identity) -> KandidatenSink {
        KandidatenSink {
            ausgang: self.clone(),
            remote,
        }
    }
}

/// Ziel fuer lokal gesammelte Kandidaten einer einzelnen Peer-Verbindung
#[derive(Clone, Debug)]
pub struct KandidatenSink {
    ausgang: SignalAusgang,
    remote: Identity,
}

impl KandidatenSink {
    /// Sendet einen lokalen Kandidaten als `candidate`-Envelope
    pub fn kandidat(&self, kandidat: Payload) -> PeerResult<()> {
        tracing::trace!(remote = %self.remote, "Lokaler Kandidat");
        self.ausgang.senden(SignalingEnvelope::candidate(
            self.ausgang.lokal().clone(),
            self.remote.clone(),
            kandidat,
        ))
    }

    pub fn remote(&self) -> &Identity {
        &self.remote
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Eine Peer-Verbindung zu genau einer Gegenstelle
///
/// Wird ausschliesslich von ihrer `PeerSession` aufgerufen (ein Schreiber).
#[async_trait]
pub trait Verbindungsschicht: Send {
    /// Erzeugt ein Offer, setzt es als lokale Description und gibt es zurueck
    async fn offer_erzeugen(&mut self) -> PeerResult<Payload>;

    /// Erzeugt ein Answer, setzt es als lokale Description und gibt es zurueck
    async fn answer_erzeugen(&mut self) -> PeerResult<Payload>;

    async fn remote_description_setzen(&mut self, description: Payload) -> PeerResult<()>;

    async fn kandidat_hinzufuegen(&mut self, kandidat: Payload) -> PeerResult<()>;

    /// Verwirft ein eigenes, noch unbeantwortetes Offer (Rollback)
    async fn lokale_description_verwerfen(&mut self) -> PeerResult<()>;

    async fn track_anhaengen(&mut self, track: MediaTrackHandle) -> PeerResult<()>;

    /// Gibt alle Ressourcen der Verbindung frei
    async fn schliessen(&mut self);
}

/// Erzeugt eine Verbindungsschicht pro Gegenstelle
pub trait VerbindungsFabrik: Send + Sync {
    fn erzeugen(&self, remote: &Identity, kandidaten: KandidatenSink) -> PeerResult<Box<dyn Verbindungsschicht>>;
}
