//! PeerClient – Dispatch-Loop zwischen Transport und Verhandlung
//!
//! Ein einziger Task liest die Transport-Ereignisse und ruft die
//! `Verhandlung` auf. Dadurch hat jede Peer-Sitzung genau einen Schreiber.
//! Audio-Tracks kommen von aussen ueber eine [`TrackSteuerung`] in denselben
//! Loop.

use funkraum_core::Identity;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::connectivity::{MediaTrackHandle, VerbindungsFabrik};
use crate::error::{PeerError, PeerResult};
use crate::negotiation::{SitzungsEreignis, Verhandlung};
use crate::transport::{SignalingTransport, TransportConfig, TransportEreignis};

/// Verbundener Client: Transport plus Verhandlung
pub struct PeerClient {
    transport: SignalingTransport,
    verhandlung: Verhandlung,
    track_tx: mpsc::UnboundedSender<MediaTrackHandle>,
    track_rx: mpsc::UnboundedReceiver<MediaTrackHandle>,
}

/// Uebergibt Audio-Tracks an einen laufenden [`PeerClient`]
///
/// Der Track wird an alle bestehenden Sitzungen angehaengt (verbundene sofort,
/// andere beim Erreichen von `Connected`) und an spaeter entstehende
/// Sitzungen weitergegeben.
#[derive(Clone)]
pub struct TrackSteuerung {
    tx: mpsc::UnboundedSender<MediaTrackHandle>,
}

impl TrackSteuerung {
    pub fn anhaengen(&self, track: MediaTrackHandle) -> PeerResult<()> {
        self.tx.send(track).map_err(|_| PeerError::TransportGeschlossen)
    }
}

impl PeerClient {
    /// Verbindet mit dem Signaling-Server und tritt dem Raum bei
    ///
    /// Gibt zusaetzlich den Empfaenger fuer Sitzungsereignisse zurueck.
    pub async fn verbinden(
        config: TransportConfig,
        fabrik: Arc<dyn VerbindungsFabrik>,
    ) -> PeerResult<(Self, mpsc::UnboundedReceiver<SitzungsEreignis>)> {
        let raum = config.raum.clone();
        let transport = SignalingTransport::verbinden(config).await?;
        let (verhandlung, ereignisse) = Verhandlung::neu(fabrik, transport.ausgang());
        tracing::info!(identity = %verhandlung.lokal(), raum = %raum, "Client verbunden");

        let (track_tx, track_rx) = mpsc::unbounded_channel();
        Ok((
            Self {
                transport,
                verhandlung,
                track_tx,
                track_rx,
            },
            ereignisse,
        ))
    }

    pub fn lokal(&self) -> &Identity {
        self.verhandlung.lokal()
    }

    pub fn verhandlung(&self) -> &Verhandlung {
        &self.verhandlung
    }

    /// Steuerung fuer Audio-Tracks, bleibt nach `ausfuehren` gueltig
    pub fn track_steuerung(&self) -> TrackSteuerung {
        TrackSteuerung {
            tx: self.track_tx.clone(),
        }
    }

    /// Verarbeitet Ereignisse bis der Transport endet
    ///
    /// Ein Transportverlust schliesst alle Sitzungen, genau wie ihr
    /// Verschwinden aus der Presence. `shutdown_rx` beendet die Verbindung
    /// sauber. Gibt zurueck, ob das Ende sauber war.
    pub async fn ausfuehren(mut self, mut shutdown_rx: watch::Receiver<bool>) -> bool {
        let mut sauber = false;

        loop {
            let ereignis = tokio::select! {
                ereignis = self.transport.naechstes_ereignis() => match ereignis {
                    Some(ereignis) => ereignis,
                    None => break,
                },
                Some(track) = self.track_rx.recv() => {
                    tracing::debug!(identity = %self.verhandlung.lokal(), track = track.id(), "Track wird angehaengt");
                    self.verhandlung.track_anhaengen(track).await;
                    continue;
                }
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(identity = %self.verhandlung.lokal(), "Shutdown – Verbindung wird geschlossen");
                        self.transport.schliessen();
                    }
                    continue;
                }
            };

            match ereignis {
                TransportEreignis::Praesenz(mitglieder) => {
                    let diff = self.verhandlung.praesenz_verarbeiten(mitglieder).await;
                    for (remote, fehler) in &diff.fehler {
                        tracing::warn!(remote = %remote, fehler = %fehler, "Verhandlung fehlgeschlagen");
                    }
                }
                TransportEreignis::Signal(envelope) => {
                    let typ = envelope.typ;
                    let from = envelope.from.clone();
                    match self.verhandlung.signal_verarbeiten(envelope).await {
                        Ok(reaktion) => {
                            tracing::trace!(from = %from, typ = %typ, ?reaktion, "Signal verarbeitet");
                        }
                        Err(e) => {
                            tracing::warn!(
                                from = %from,
                                typ = %typ,
                                fehler = %e,
                                wiederholbar = e.ist_wiederholbar(),
                                "Signal konnte nicht verarbeitet werden"
                            );
                        }
                    }
                }
                TransportEreignis::Geschlossen { sauber: s } => {
                    sauber = s;
                    break;
                }
            }
        }

        if sauber {
            tracing::info!(identity = %self.verhandlung.lokal(), "Signaling-Verbindung beendet");
        } else {
            tracing::warn!(identity = %self.verhandlung.lokal(), "Signaling-Verbindung verloren");
        }
        self.verhandlung.alle_schliessen().await;
        sauber
    }
}
