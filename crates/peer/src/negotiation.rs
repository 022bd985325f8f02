//! Verhandlung – Presence-Aenderungen in Peer-Sitzungen uebersetzen
//!
//! Die `Verhandlung` besitzt alle `PeerSession`s dieses Clients und ist der
//! einzige Akteur, der Sitzungen anlegt oder entfernt. Sie wird nur aus dem
//! Dispatch-Loop des Clients aufgerufen.
//!
//! Bei jedem Presence-Snapshot:
//! - `entfernt = bekannt \ snapshot` – Sitzung schliessen und verwerfen
//! - `hinzugefuegt = snapshot \ bekannt` – Sitzung anlegen; ist die eigene
//!   Identitaet kleiner als die fremde, sofort `initiieren()`
//!
//! Die eigene Identitaet ist in keiner der beiden Mengen enthalten.

use funkraum_core::Identity;
use funkraum_protocol::{EnvelopeType, SignalingEnvelope};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::connectivity::{MediaTrackHandle, SignalAusgang, VerbindungsFabrik};
use crate::error::{PeerError, PeerResult};
use crate::session::{PeerSession, Reaktion, Zustand};

/// Beobachtbares Ergebnis einer Sitzung
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitzungsEreignis {
    Verbunden(Identity),
    Geschlossen(Identity),
}

/// Aenderungen durch einen Presence-Snapshot
#[derive(Debug, Default)]
pub struct PraesenzDiff {
    pub hinzugefuegt: Vec<Identity>,
    pub entfernt: Vec<Identity>,
    /// Gegenstellen, an die ein Offer gesendet wurde
    pub initiiert: Vec<Identity>,
    /// Fehlgeschlagene Sitzungsanlagen oder Offers
    pub fehler: Vec<(Identity, PeerError)>,
}

/// Besitzer aller Peer-Sitzungen eines Clients
pub struct Verhandlung {
    lokal: Identity,
    sitzungen: BTreeMap<Identity, PeerSession>,
    fabrik: Arc<dyn VerbindungsFabrik>,
    ausgang: SignalAusgang,
    ereignisse: mpsc::UnboundedSender<SitzungsEreignis>,
    media_track: Option<MediaTrackHandle>,
}

impl Verhandlung {
    /// Erstellt eine leere Verhandlung und den Empfaenger fuer Sitzungsereignisse
    pub fn neu(
        fabrik: Arc<dyn VerbindungsFabrik>,
        ausgang: SignalAusgang,
    ) -> (Self, mpsc::UnboundedReceiver<SitzungsEreignis>) {
        let (ereignisse, ereignis_rx) = mpsc::unbounded_channel();
        let verhandlung = Self {
            lokal: ausgang.lokal().clone(),
            sitzungen: BTreeMap::new(),
            fabrik,
            ausgang,
            ereignisse,
            media_track: None,
        };
        (verhandlung, ereignis_rx)
    }

    pub fn lokal(&self) -> &Identity {
        &self.lokal
    }

    /// Zustand der Sitzung mit `remote`, falls vorhanden
    pub fn zustand(&self, remote: &Identity) -> Option<Zustand> {
        self.sitzungen.get(remote).map(PeerSession::zustand)
    }

    /// Alle bekannten Gegenstellen (sortiert)
    pub fn gegenstellen(&self) -> Vec<Identity> {
        self.sitzungen.keys().cloned().collect()
    }

    /// Gleicht die Sitzungen mit einem Presence-Snapshot ab
    pub async fn praesenz_verarbeiten(&mut self, snapshot: Vec<Identity>) -> PraesenzDiff {
        let eingehend: BTreeSet<Identity> = snapshot
            .into_iter()
            .filter(|id| *id != self.lokal)
            .collect();
        let bekannt: BTreeSet<Identity> = self.sitzungen.keys().cloned().collect();

        let mut diff = PraesenzDiff {
            entfernt: bekannt.difference(&eingehend).cloned().collect(),
            hinzugefuegt: eingehend.difference(&bekannt).cloned().collect(),
            ..PraesenzDiff::default()
        };

        for remote in &diff.entfernt {
            tracing::info!(lokal = %self.lokal, remote = %remote, "Gegenstelle nicht mehr anwesend");
            self.sitzung_entfernen(remote).await;
        }

        for remote in &diff.hinzugefuegt {
            if let Err(e) = self.sitzung_anlegen(remote) {
                tracing::warn!(remote = %remote, fehler = %e, "Sitzung konnte nicht angelegt werden");
                diff.fehler.push((remote.clone(), e));
                continue;
            }

            if self.lokal < *remote {
                if let Some(sitzung) = self.sitzungen.get_mut(remote) {
                    match sitzung.initiieren().await {
                        Ok(_) => diff.initiiert.push(remote.clone()),
                        Err(e) => {
                            tracing::warn!(
                                remote = %remote,
                                fehler = %e,
                                wiederholbar = e.ist_wiederholbar(),
                                "Offer fehlgeschlagen"
                            );
                            diff.fehler.push((remote.clone(), e));
                        }
                    }
                }
            }
        }

        tracing::debug!(
            lokal = %self.lokal,
            hinzugefuegt = diff.hinzugefuegt.len(),
            entfernt = diff.entfernt.len(),
            sitzungen = self.sitzungen.len(),
            "Presence verarbeitet"
        );
        diff
    }

    /// Leitet ein `offer`/`answer`/`candidate` an die passende Sitzung
    ///
    /// Unbekannte Absender bekommen eine neue Sitzung.
    pub async fn signal_verarbeiten(&mut self, envelope: SignalingEnvelope) -> PeerResult<Reaktion> {
        let remote = envelope.from.clone();
        if remote == self.lokal || envelope.to.as_ref() != Some(&self.lokal) {
            tracing::warn!(
                lokal = %self.lokal,
                from = %remote,
                to = ?envelope.to,
                "Signal nicht fuer uns – verworfen"
            );
            return Ok(Reaktion::Verworfen);
        }
        let Some(payload) = envelope.payload else {
            return Ok(Reaktion::Verworfen);
        };

        if !self.sitzungen.contains_key(&remote) {
            tracing::debug!(remote = %remote, typ = %envelope.typ, "Signal von unbekannter Gegenstelle – Sitzung angelegt");
            self.sitzung_anlegen(&remote)?;
        }
        let Some(sitzung) = self.sitzungen.get_mut(&remote) else {
            return Ok(Reaktion::Verworfen);
        };

        let vorher = sitzung.zustand();
        let reaktion = match envelope.typ {
            EnvelopeType::Offer => sitzung.remote_offer(payload).await?,
            EnvelopeType::Answer => sitzung.remote_answer(payload).await?,
            EnvelopeType::Candidate => sitzung.remote_kandidat(payload).await?,
            EnvelopeType::Join | EnvelopeType::Presence => Reaktion::Verworfen,
        };

        if vorher != Zustand::Connected && sitzung.zustand() == Zustand::Connected {
            let _ = self.ereignisse.send(SitzungsEreignis::Verbunden(remote));
        }
        Ok(reaktion)
    }

    /// Haengt einen Audio-Track an alle aktuellen und kuenftigen Sitzungen
    pub async fn track_anhaengen(&mut self, track: MediaTrackHandle) {
        self.media_track = Some(track.clone());
        for (remote, sitzung) in self.sitzungen.iter_mut() {
            if let Err(e) = sitzung.track_anhaengen(track.clone()).await {
                tracing::warn!(remote = %remote, fehler = %e, "Track konnte nicht angehaengt werden");
            }
        }
    }

    /// Schliesst alle Sitzungen (Transport verloren)
    pub async fn alle_schliessen(&mut self) {
        let alle: Vec<Identity> = self.sitzungen.keys().cloned().collect();
        for remote in &alle {
            self.sitzung_entfernen(remote).await;
        }
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsmethoden
    // -----------------------------------------------------------------------

    fn sitzung_anlegen(&mut self, remote: &Identity) -> PeerResult<()> {
        let schicht = self
            .fabrik
            .erzeugen(remote, self.ausgang.kandidaten_sink(remote.clone()))?;
        let mut sitzung = PeerSession::neu(remote.clone(), schicht, self.ausgang.clone());
        if let Some(track) = &self.media_track {
            sitzung.track_vormerken(track.clone());
        }
        self.sitzungen.insert(remote.clone(), sitzung);
        Ok(())
    }

    /// Ressourcen freigeben, bevor der Eintrag verschwindet
    async fn sitzung_entfernen(&mut self, remote: &Identity) {
        if let Some(mut sitzung) = self.sitzungen.remove(remote) {
            if sitzung.schliessen().await {
                let _ = self.ereignisse.send(SitzungsEreignis::Geschlossen(remote.clone()));
            }
        }
    }
}
