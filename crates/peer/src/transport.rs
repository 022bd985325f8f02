//! Signaling-Transport – WebSocket-Verbindung des Clients zum Relay
//!
//! Nach dem Verbindungsaufbau wird sofort ein `join` mit Identitaet und Raum
//! gesendet. Zwei Tasks bedienen die Verbindung:
//! - Schreib-Task: leert die Send-Queue und sendet alle `keepalive_intervall`
//!   einen Ping. Jeder Schreibvorgang hat die Deadline `schreib_timeout`; ein
//!   Fehler schliesst die Verbindung.
//! - Lese-Task: dekodiert einen Envelope nach dem anderen und meldet ihn als
//!   [`TransportEreignis`]. Ungueltige Frames werden uebersprungen.
//!
//! Sauberes und abnormales Ende unterscheiden sich nur im Log und im Feld
//! `sauber`; beide enden mit genau einem `Geschlossen`.

use futures_util::{SinkExt, StreamExt};
use funkraum_core::{Identity, RoomName};
use funkraum_protocol::{wire, EnvelopeType, SignalingEnvelope};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{error::ProtocolError, Error as WsError, Message};
use tokio_tungstenite::connect_async;

use crate::connectivity::SignalAusgang;
use crate::error::{PeerError, PeerResult};

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Verbindungsparameter des Clients
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// `host:port` des Signaling-Servers
    pub server_adresse: String,
    /// Pfad der WebSocket-Route
    pub pfad: String,
    pub identity: Identity,
    pub raum: RoomName,
    pub handshake_timeout: Duration,
    pub keepalive_intervall: Duration,
    pub schreib_timeout: Duration,
}

impl TransportConfig {
    /// Konfiguration mit Standardwerten (Pfad `/ws`, Raum `main`, 10s/30s/10s)
    pub fn neu(server_adresse: impl Into<String>, identity: Identity) -> Self {
        Self {
            server_adresse: server_adresse.into(),
            pfad: "/ws".to_string(),
            identity,
            raum: RoomName::default(),
            handshake_timeout: Duration::from_secs(10),
            keepalive_intervall: Duration::from_secs(30),
            schreib_timeout: Duration::from_secs(10),
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}{}", self.server_adresse, self.pfad)
    }
}

// ---------------------------------------------------------------------------
// Ereignisse
// ---------------------------------------------------------------------------

/// Was der Lese-Task an den Besitzer meldet
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEreignis {
    /// Aktueller Presence-Snapshot des Raums
    Praesenz(Vec<Identity>),
    /// `offer`, `answer` oder `candidate`
    Signal(SignalingEnvelope),
    /// Verbindung beendet (letztes Ereignis)
    Geschlossen { sauber: bool },
}

// ---------------------------------------------------------------------------
// SignalingTransport
// ---------------------------------------------------------------------------

/// Bestehende Verbindung zum Signaling-Server
pub struct SignalingTransport {
    ausgang: SignalAusgang,
    ereignisse: mpsc::UnboundedReceiver<TransportEreignis>,
    schliessen_tx: watch::Sender<bool>,
    aufgaben: Vec<JoinHandle<()>>,
}

impl SignalingTransport {
    /// Verbindet, sendet `join` und startet Lese- und Schreib-Task
    pub async fn verbinden(config: TransportConfig) -> PeerResult<Self> {
        let url = config.url();
        let (ws, _) = tokio::time::timeout(config.handshake_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| PeerError::HandshakeTimeout(config.handshake_timeout))?
            .map_err(|e| PeerError::Verbindung(format!("{url}: {e}")))?;
        tracing::debug!(url = %url, identity = %config.identity, "Signaling-WebSocket verbunden");

        let (mut ws_write, mut ws_read) = ws.split();
        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<SignalingEnvelope>();
        let (ereignis_tx, ereignisse) = mpsc::unbounded_channel::<TransportEreignis>();
        let (schliessen_tx, mut schliessen_rx) = watch::channel(false);
        let (schreiber_tot_tx, mut schreiber_tot_rx) = watch::channel(false);

        let ausgang = SignalAusgang::neu(config.identity.clone(), send_tx);
        // join vor allem anderen in die Queue
        ausgang.senden(SignalingEnvelope::join(config.identity.clone(), config.raum.clone()))?;

        let schreib_timeout = config.schreib_timeout;
        let keepalive = config.keepalive_intervall;
        let schreiber = tokio::spawn(async move {
            let mut ping_takt = tokio::time::interval_at(tokio::time::Instant::now() + keepalive, keepalive);
            loop {
                let nachricht = tokio::select! {
                    ausgehend = send_rx.recv() => match ausgehend {
                        Some(envelope) => match wire::kodieren(&envelope) {
                            Ok(text) => Message::Text(text),
                            Err(e) => {
                                tracing::error!(fehler = %e, "Envelope nicht kodierbar – verworfen");
                                continue;
                            }
                        },
                        None => break,
                    },
                    _ = ping_takt.tick() => Message::Ping(Vec::new()),
                    _ = schliessen_rx.changed() => {
                        let _ = tokio::time::timeout(schreib_timeout, ws_write.send(Message::Close(None))).await;
                        break;
                    }
                };

                let ist_ping = matches!(nachricht, Message::Ping(_));
                match tokio::time::timeout(schreib_timeout, ws_write.send(nachricht)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(fehler = %e, ping = ist_ping, "Senden fehlgeschlagen – Verbindung wird geschlossen");
                        let _ = schreiber_tot_tx.send(true);
                        break;
                    }
                    Err(_) => {
                        tracing::warn!(ping = ist_ping, "Schreib-Deadline ueberschritten – Verbindung wird geschlossen");
                        let _ = schreiber_tot_tx.send(true);
                        break;
                    }
                }
            }
            let _ = ws_write.close().await;
        });

        let leser = tokio::spawn(async move {
            let sauber = loop {
                tokio::select! {
                    frame = ws_read.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(ereignis) = ereignis_aus_text(&text) {
                                if ereignis_tx.send(ereignis).is_err() {
                                    break true;
                                }
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(grund = ?frame, "Signaling-Verbindung vom Server geschlossen");
                            break true;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                            tracing::debug!("Signaling-Verbindung geschlossen");
                            break true;
                        }
                        Some(Err(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake))) => {
                            tracing::warn!("Signaling-Verbindung ohne Close-Handshake beendet");
                            break false;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(fehler = %e, "Signaling-WebSocket-Fehler");
                            break false;
                        }
                        None => {
                            tracing::warn!("Signaling-Verbindung abgebrochen");
                            break false;
                        }
                    },
                    _ = schreiber_tot_rx.changed() => break false,
                }
            };
            let _ = ereignis_tx.send(TransportEreignis::Geschlossen { sauber });
        });

        Ok(Self {
            ausgang,
            ereignisse,
            schliessen_tx,
            aufgaben: vec![schreiber, leser],
        })
    }

    /// Sendeseite fuer Envelopes dieses Clients
    pub fn ausgang(&self) -> SignalAusgang {
        self.ausgang.clone()
    }

    /// Naechstes Ereignis; `None` nach `Geschlossen`
    pub async fn naechstes_ereignis(&mut self) -> Option<TransportEreignis> {
        self.ereignisse.recv().await
    }

    /// Beendet die Verbindung mit Close-Frame
    pub fn schliessen(&self) {
        self.schliessen_tx.send_replace(true);
    }
}

impl Drop for SignalingTransport {
    fn drop(&mut self) {
        for aufgabe in &self.aufgaben {
            aufgabe.abort();
        }
    }
}

/// Dekodiert einen Text-Frame; ungueltige Frames werden geloggt und verworfen
fn ereignis_aus_text(text: &str) -> Option<TransportEreignis> {
    let envelope = match wire::dekodieren(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(fehler = %e, "Ungueltiger Envelope vom Server – uebersprungen");
            return None;
        }
    };

    match envelope.typ {
        EnvelopeType::Presence => match envelope.presence_mitglieder() {
            Ok(mitglieder) => Some(TransportEreignis::Praesenz(mitglieder)),
            Err(e) => {
                tracing::warn!(fehler = %e, "Ungueltige Presence – uebersprungen");
                None
            }
        },
        EnvelopeType::Offer | EnvelopeType::Answer | EnvelopeType::Candidate => {
            Some(TransportEreignis::Signal(envelope))
        }
        EnvelopeType::Join => {
            tracing::warn!(from = %envelope.from, "Unerwarteter join vom Server – uebersprungen");
            None
        }
    }
}
