//! Presence-Registry – Wer ist in welchem Raum erreichbar
//!
//! Die Registry ist die einzige Stelle, die Mitgliedschaften aendert. Pro Raum
//! gibt es genau einen kritischen Abschnitt (`parking_lot::Mutex`), der jede
//! Lese- und Schreiboperation auf der Mitgliedertabelle serialisiert.
//!
//! ## Ablauf einer Aenderung
//! ```text
//! lock(raum) -> Tabelle aendern -> Presence-Envelope in jede Send-Queue -> unlock
//!            -> ersetzte / volle Kanaele schliessen und austragen
//! ```
//! Unter dem Lock wird nur in die Send-Queues eingereiht (`try_send`, blockiert
//! nie). Auf den Socket schreibt ausschliesslich der Verbindungs-Task. Damit
//! sieht jeder Client die Snapshots in genau der Reihenfolge, in der die
//! Aenderungen stattgefunden haben, und ein langsamer Peer haelt die
//! Zustellung an andere nicht auf.
//!
//! ## Invarianten
//! - Pro Identitaet und Raum hoechstens ein Kanal. Ein erneuter Beitritt
//!   ersetzt und schliesst den alten Kanal.
//! - Entfernen geschieht ueber die `ConnectionId`, nicht ueber den Namen. Eine
//!   bereits ersetzte Verbindung kann den Nachfolger nicht austragen.
//! - Lock-Reihenfolge: DashMap-Shard vor Raum-Lock. Wer den Raum-Lock haelt,
//!   greift nicht mehr auf `raeume` zu.

use dashmap::DashMap;
use funkraum_core::{ConnectionId, Identity, RoomName};
use funkraum_observability::FunkraumMetrics;
use funkraum_protocol::SignalingEnvelope;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::broadcast::ClientChannel;

// ---------------------------------------------------------------------------
// Raum-Zustand
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RaumZustand {
    mitglieder: HashMap<Identity, ClientChannel>,
    /// Raum ist leer und darf aus der Tabelle entfernt werden
    verworfen: bool,
}

impl RaumZustand {
    fn geteilt() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }

    fn sortierte_mitglieder(&self) -> Vec<Identity> {
        let mut mitglieder: Vec<Identity> = self.mitglieder.keys().cloned().collect();
        mitglieder.sort();
        mitglieder
    }
}

/// Ergebnis einer Rundsendung unter dem Raum-Lock
struct Rundsendung {
    zugestellt: usize,
    /// Kanaele mit voller oder geschlossener Queue
    fehlgeschlagen: Vec<ClientChannel>,
}

/// Eine ausgetragene Verbindung
struct Austragung {
    room: RoomName,
    identity: Identity,
    fehlgeschlagen: Vec<ClientChannel>,
}

// ---------------------------------------------------------------------------
// Ergebnisse
// ---------------------------------------------------------------------------

/// Ergebnis einer Registrierung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registrierung {
    /// Verbindung, die unter derselben Identitaet ersetzt und geschlossen wurde
    pub ersetzt: Option<ConnectionId>,
    /// Anzahl Kanaele, die den neuen Snapshot erhalten haben
    pub zugestellt: usize,
}

// ---------------------------------------------------------------------------
// PresenceRegistry
// ---------------------------------------------------------------------------

/// Autoritative Mitgliedertabelle aller Raeume
///
/// Clone teilt den inneren Zustand. Wird einmal beim Start erzeugt und
/// explizit an Router und Verbindungen weitergereicht.
#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<PresenceRegistryInner>,
}

struct PresenceRegistryInner {
    /// Raum -> kritischer Abschnitt mit Mitgliedertabelle
    raeume: DashMap<RoomName, Arc<Mutex<RaumZustand>>>,
    /// Verbindung -> (Raum, Identitaet), nur unter dem Raum-Lock geaendert
    verbindungen: DashMap<ConnectionId, (RoomName, Identity)>,
    metriken: FunkraumMetrics,
}

impl PresenceRegistry {
    /// Erstellt eine leere Registry
    pub fn neu(metriken: FunkraumMetrics) -> Self {
        Self {
            inner: Arc::new(PresenceRegistryInner {
                raeume: DashMap::new(),
                verbindungen: DashMap::new(),
                metriken,
            }),
        }
    }

    /// Traegt `identity` mit `kanal` in `room` ein und versendet den neuen Snapshot
    ///
    /// Ein bereits registrierter Kanal derselben Identitaet wird zuerst
    /// entfernt und geschlossen.
    pub fn registrieren(&self, identity: Identity, room: RoomName, kanal: ClientChannel) -> Registrierung {
        // Raum-Lock noch unter dem Shard-Guard nehmen: ein parallel geleerter
        // Raum kann so nicht zwischen Nachschlagen und Sperren verschwinden.
        let eintrag = self
            .inner
            .raeume
            .entry(room.clone())
            .or_insert_with(RaumZustand::geteilt);
        let raum = Arc::clone(eintrag.value());
        let mut zustand = raum.lock();
        drop(eintrag);

        zustand.verworfen = false;
        let alter_kanal = zustand.mitglieder.insert(identity.clone(), kanal.clone());
        self.inner
            .verbindungen
            .insert(kanal.connection_id, (room.clone(), identity.clone()));
        let ersetzt = match alter_kanal {
            Some(alt) if alt.connection_id != kanal.connection_id => {
                self.inner.verbindungen.remove(&alt.connection_id);
                Some(alt)
            }
            _ => None,
        };
        let rundsendung = self.rundsenden(&room, &zustand);
        drop(zustand);

        if let Some(alt) = &ersetzt {
            alt.schliessen();
            tracing::info!(
                identity = %identity,
                room = %room,
                alt = %alt.connection_id,
                neu = %kanal.connection_id,
                "Identitaet neu beigetreten – alte Verbindung ersetzt"
            );
        } else {
            tracing::info!(identity = %identity, room = %room, connection = %kanal.connection_id, "Client beigetreten");
        }

        self.gauges_aktualisieren();
        self.fehlgeschlagene_verdraengen(rundsendung.fehlgeschlagen);

        Registrierung {
            ersetzt: ersetzt.map(|k| k.connection_id),
            zugestellt: rundsendung.zugestellt,
        }
    }

    /// Entfernt die Verbindung, falls sie noch registriert ist
    ///
    /// Gibt `true` zurueck wenn sich die Mitgliedschaft geaendert hat; dann
    /// wurde der neue Snapshot bereits versendet.
    pub fn entfernen(&self, connection_id: &ConnectionId) -> bool {
        match self.austragen(connection_id) {
            Some(austragung) => {
                tracing::info!(
                    identity = %austragung.identity,
                    room = %austragung.room,
                    connection = %connection_id,
                    "Client verlassen"
                );
                self.fehlgeschlagene_verdraengen(austragung.fehlgeschlagen);
                true
            }
            None => false,
        }
    }

    /// Schliesst einen nicht mehr beschreibbaren Kanal und traegt ihn aus
    pub fn verdraengen(&self, kanal: &ClientChannel) -> bool {
        kanal.schliessen();
        match self.austragen(&kanal.connection_id) {
            Some(austragung) => {
                self.inner.metriken.evictions_total.inc();
                tracing::warn!(
                    identity = %austragung.identity,
                    room = %austragung.room,
                    connection = %kanal.connection_id,
                    "Verbindung verdraengt (Schreibfehler)"
                );
                self.fehlgeschlagene_verdraengen(austragung.fehlgeschlagen);
                true
            }
            None => false,
        }
    }

    /// Sendet den aktuellen Snapshot erneut an jedes Mitglied des Raums
    ///
    /// Gibt die Anzahl erfolgreicher Zustellungen zurueck. Kanaele mit
    /// Schreibfehler werden danach verdraengt, was eigene Snapshots ausloest.
    pub fn praesenz_broadcast(&self, room: &RoomName) -> usize {
        let Some(raum) = self.raum(room) else {
            return 0;
        };
        let rundsendung = {
            let zustand = raum.lock();
            if zustand.verworfen {
                return 0;
            }
            self.rundsenden(room, &zustand)
        };
        self.fehlgeschlagene_verdraengen(rundsendung.fehlgeschlagen);
        rundsendung.zugestellt
    }

    /// Aktuelle Mitglieder eines Raums (sortiert)
    pub fn mitglieder(&self, room: &RoomName) -> Vec<Identity> {
        self.raum(room)
            .map(|raum| raum.lock().sortierte_mitglieder())
            .unwrap_or_default()
    }

    /// Kanal einer Identitaet in einem Raum
    pub fn kanal_fuer(&self, room: &RoomName, identity: &Identity) -> Option<ClientChannel> {
        let raum = self.raum(room)?;
        let zustand = raum.lock();
        zustand.mitglieder.get(identity).cloned()
    }

    /// Unter welcher Identitaet in welchem Raum ist diese Verbindung registriert?
    pub fn registrierung_von(&self, connection_id: &ConnectionId) -> Option<(RoomName, Identity)> {
        self.inner
            .verbindungen
            .get(connection_id)
            .map(|e| e.value().clone())
    }

    /// Anzahl registrierter Verbindungen ueber alle Raeume
    pub fn online_anzahl(&self) -> usize {
        self.inner.verbindungen.len()
    }

    /// Anzahl Raeume mit mindestens einem Mitglied
    pub fn raum_anzahl(&self) -> usize {
        self.inner.raeume.len()
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsmethoden
    // -----------------------------------------------------------------------

    /// Raum-Abschnitt nachschlagen; der Shard-Guard ist danach freigegeben
    fn raum(&self, room: &RoomName) -> Option<Arc<Mutex<RaumZustand>>> {
        self.inner.raeume.get(room).map(|r| Arc::clone(r.value()))
    }

    /// Reiht den Snapshot in jede Send-Queue ein; nur unter dem Raum-Lock
    fn rundsenden(&self, room: &RoomName, zustand: &RaumZustand) -> Rundsendung {
        let mitglieder = zustand.sortierte_mitglieder();
        let nachricht = SignalingEnvelope::presence(&mitglieder);
        let mut rundsendung = Rundsendung {
            zugestellt: 0,
            fehlgeschlagen: Vec::new(),
        };

        for kanal in zustand.mitglieder.values() {
            match kanal.senden(nachricht.clone()) {
                Ok(()) => rundsendung.zugestellt += 1,
                Err(e) => {
                    tracing::warn!(
                        room = %room,
                        connection = %kanal.connection_id,
                        fehler = %e,
                        "Presence-Zustellung fehlgeschlagen – Verbindung wird entfernt"
                    );
                    rundsendung.fehlgeschlagen.push(kanal.clone());
                }
            }
        }

        self.inner.metriken.presence_broadcasts_total.inc();
        tracing::debug!(
            room = %room,
            mitglieder = mitglieder.len(),
            zugestellt = rundsendung.zugestellt,
            "Presence versendet"
        );
        rundsendung
    }

    /// Schliesst und traegt Kanaele aus, bis keine Zustellung mehr scheitert
    fn fehlgeschlagene_verdraengen(&self, mut offen: Vec<ClientChannel>) {
        while let Some(kanal) = offen.pop() {
            kanal.schliessen();
            if let Some(austragung) = self.austragen(&kanal.connection_id) {
                self.inner.metriken.evictions_total.inc();
                tracing::warn!(
                    identity = %austragung.identity,
                    room = %austragung.room,
                    connection = %kanal.connection_id,
                    "Verbindung verdraengt (Queue voll oder geschlossen)"
                );
                offen.extend(austragung.fehlgeschlagen);
            }
        }
    }

    /// Traegt eine Verbindung aus und versendet den Snapshot unter dem Lock
    fn austragen(&self, connection_id: &ConnectionId) -> Option<Austragung> {
        let (room, identity) = self.registrierung_von(connection_id)?;
        let raum = self.raum(&room)?;

        let (raum_leer, fehlgeschlagen) = {
            let mut zustand = raum.lock();
            let gehoert_uns = zustand
                .mitglieder
                .get(&identity)
                .map(|k| k.connection_id == *connection_id)
                .unwrap_or(false);
            if !gehoert_uns {
                return None;
            }
            zustand.mitglieder.remove(&identity);
            self.inner.verbindungen.remove(connection_id);

            if zustand.mitglieder.is_empty() {
                zustand.verworfen = true;
                (true, Vec::new())
            } else {
                (false, self.rundsenden(&room, &zustand).fehlgeschlagen)
            }
        };

        if raum_leer {
            // Ein paralleles `registrieren` kann den Raum inzwischen neu belebt haben
            let entfernt = self
                .inner
                .raeume
                .remove_if(&room, |_, r| Arc::ptr_eq(r, &raum) && r.lock().verworfen);
            if entfernt.is_some() {
                tracing::debug!(room = %room, "Leerer Raum entfernt");
            }
        }

        self.gauges_aktualisieren();
        Some(Austragung {
            room,
            identity,
            fehlgeschlagen,
        })
    }

    fn gauges_aktualisieren(&self) {
        self.inner
            .metriken
            .connected_clients
            .set(self.inner.verbindungen.len() as i64);
        self.inner
            .metriken
            .rooms_active
            .set(self.inner.raeume.len() as i64);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
