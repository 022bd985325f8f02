//! Aufzeichnende Fake-Verbindungsschicht fuer Unit-Tests

use async_trait::async_trait;
use funkraum_core::Identity;
use funkraum_protocol::Payload;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::connectivity::{KandidatenSink, MediaTrackHandle, VerbindungsFabrik, Verbindungsschicht};
use crate::error::{PeerError, PeerResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Aufruf {
    OfferErzeugt,
    AnswerErzeugt,
    RemoteDescription(Payload),
    Kandidat(Payload),
    LokaleVerworfen,
    Track(MediaTrackHandle),
    Geschlossen,
}

/// Geteilte Aufzeichnung einer Fake-Schicht
#[derive(Clone, Default)]
pub struct FakeProtokoll {
    aufrufe: Arc<Mutex<Vec<Aufruf>>>,
    pub offer_fehler: Arc<AtomicBool>,
    pub answer_fehler: Arc<AtomicBool>,
}

impl FakeProtokoll {
    pub fn aufrufe(&self) -> Vec<Aufruf> {
        self.aufrufe.lock().clone()
    }

    pub fn schliessungen(&self) -> usize {
        self.aufrufe
            .lock()
            .iter()
            .filter(|a| **a == Aufruf::Geschlossen)
            .count()
    }

    pub fn kandidaten(&self) -> Vec<Payload> {
        self.aufrufe
            .lock()
            .iter()
            .filter_map(|a| match a {
                Aufruf::Kandidat(k) => Some(k.clone()),
                _ => None,
            })
            .collect()
    }

    fn aufzeichnen(&self, aufruf: Aufruf) {
        self.aufrufe.lock().push(aufruf);
    }
}

pub struct FakeSchicht {
    name: String,
    protokoll: FakeProtokoll,
}

impl FakeSchicht {
    pub fn neu(name: &str, protokoll: FakeProtokoll) -> Self {
        Self {
            name: name.to_string(),
            protokoll,
        }
    }
}

#[async_trait]
impl Verbindungsschicht for FakeSchicht {
    async fn offer_erzeugen(&mut self) -> PeerResult<Payload> {
        if self.protokoll.offer_fehler.load(Ordering::SeqCst) {
            return Err(PeerError::Description("offer".into()));
        }
        self.protokoll.aufzeichnen(Aufruf::OfferErzeugt);
        Ok(Payload::new(json!({"type": "offer", "von": self.name})))
    }

    async fn answer_erzeugen(&mut self) -> PeerResult<Payload> {
        if self.protokoll.answer_fehler.load(Ordering::SeqCst) {
            return Err(PeerError::Description("answer".into()));
        }
        self.protokoll.aufzeichnen(Aufruf::AnswerErzeugt);
        Ok(Payload::new(json!({"type": "answer", "von": self.name})))
    }

    async fn remote_description_setzen(&mut self, description: Payload) -> PeerResult<()> {
        self.protokoll.aufzeichnen(Aufruf::RemoteDescription(description));
        Ok(())
    }

    async fn kandidat_hinzufuegen(&mut self, kandidat: Payload) -> PeerResult<()> {
        self.protokoll.aufzeichnen(Aufruf::Kandidat(kandidat));
        Ok(())
    }

    async fn lokale_description_verwerfen(&mut self) -> PeerResult<()> {
        self.protokoll.aufzeichnen(Aufruf::LokaleVerworfen);
        Ok(())
    }

    async fn track_anhaengen(&mut self, track: MediaTrackHandle) -> PeerResult<()> {
        self.protokoll.aufzeichnen(Aufruf::Track(track));
        Ok(())
    }

    async fn schliessen(&mut self) {
        self.protokoll.aufzeichnen(Aufruf::Geschlossen);
    }
}

/// Fabrik, die pro Gegenstelle ein `FakeProtokoll` anlegt (oder ein
/// vorab hinterlegtes wiederverwendet)
#[derive(Clone)]
pub struct FakeFabrik {
    lokal: String,
    protokolle: Arc<Mutex<HashMap<Identity, FakeProtokoll>>>,
}

impl FakeFabrik {
    pub fn neu(lokal: &str) -> Self {
        Self {
            lokal: lokal.to_string(),
            protokolle: Arc::default(),
        }
    }

    pub fn protokoll(&self, remote: &str) -> FakeProtokoll {
        self.protokolle
            .lock()
            .entry(Identity::from(remote))
            .or_default()
            .clone()
    }
}

impl VerbindungsFabrik for FakeFabrik {
    fn erzeugen(&self, remote: &Identity, _kandidaten: KandidatenSink) -> PeerResult<Box<dyn Verbindungsschicht>> {
        let protokoll = self.protokoll(remote.as_str());
        Ok(Box::new(FakeSchicht::neu(&self.lokal, protokoll)))
    }
}
