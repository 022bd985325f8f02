//! Client-Connection – Verwaltet eine einzelne WebSocket-Verbindung
//!
//! Jede Verbindung bekommt eine `ClientConnection` in einem eigenen
//! tokio-Task. Der Task liest Frames, routet sie ueber den `MessageRouter`
//! und schreibt die eigene Send-Queue auf den Socket.
//!
//! ## Keepalive
//! - Server sendet alle `keepalive` einen WebSocket-Ping
//! - Jeder Schreibvorgang hat die Deadline `schreib_timeout`
//! - Wurde `verbindungs_timeout` lang nichts empfangen, gilt die Verbindung
//!   als tot und wird getrennt
//!
//! Jedes Ende (Close-Frame, Lesefehler, Timeout, Ersetzung, Shutdown) fuehrt
//! zum selben Aufraeumen: `PresenceRegistry::entfernen(connection_id)`.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{Sink, SinkExt, StreamExt};
use funkraum_protocol::wire;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::broadcast::ClientChannel;
use crate::error::{SignalingError, SignalingResult};
use crate::server_state::SignalingState;

// ---------------------------------------------------------------------------
// Trenngrund
// ---------------------------------------------------------------------------

/// Warum der Verbindungs-Task endet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrennGrund {
    /// Client hat einen Close-Frame gesendet
    VomClientGeschlossen,
    /// Stream ohne Close-Frame beendet oder Lesefehler
    Abgebrochen,
    /// Keepalive-Timeout oder Schreib-Deadline ueberschritten
    Zeitlimit,
    /// Schreibfehler auf dem Socket
    Schreibfehler,
    /// Dieselbe Identitaet hat sich neu angemeldet
    Ersetzt,
    /// Server faehrt herunter
    Shutdown,
}

impl TrennGrund {
    /// Erwartetes Ende (nur fuer das Log-Level relevant)
    pub fn ist_sauber(&self) -> bool {
        matches!(self, Self::VomClientGeschlossen | Self::Ersetzt | Self::Shutdown)
    }
}

// ---------------------------------------------------------------------------
// ClientConnection
// ---------------------------------------------------------------------------

/// Verarbeitet eine einzelne WebSocket-Verbindung
pub struct ClientConnection {
    state: Arc<SignalingState>,
    peer_addr: SocketAddr,
}

impl ClientConnection {
    /// Erstellt eine neue ClientConnection
    pub fn neu(state: Arc<SignalingState>, peer_addr: SocketAddr) -> Self {
        Self { state, peer_addr }
    }

    /// Startet die Verbindungs-Verarbeitungsschleife
    ///
    /// Laeuft bis die Verbindung endet oder ein Shutdown-Signal eingeht.
    pub async fn verarbeiten(self, socket: WebSocket, mut shutdown_rx: watch::Receiver<bool>) -> TrennGrund {
        let peer_addr = self.peer_addr;
        let config = Arc::clone(&self.state.config);
        let (kanal, mut empfaenger) = ClientChannel::neu(config.send_queue_groesse);
        let (mut sink, mut stream) = socket.split();

        tracing::info!(peer = %peer_addr, connection = %kanal.connection_id, "Neue Verbindung");

        let mut letzter_empfang = Instant::now();
        let mut ping_takt = tokio::time::interval_at(Instant::now() + config.keepalive, config.keepalive);
        ping_takt.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let grund = loop {
            tokio::select! {
                // Eingehender Frame vom Client
                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            letzter_empfang = Instant::now();
                            match wire::dekodieren_mit_limit(&text, config.max_frame_groesse) {
                                Ok(envelope) => {
                                    let ergebnis = self.state.router.routen(envelope, &kanal);
                                    tracing::trace!(peer = %peer_addr, ?ergebnis, "Envelope geroutet");
                                }
                                Err(e) => {
                                    // Nur diese Nachricht verwerfen, weiterlesen
                                    self.state.metriken.verworfen("ungueltig");
                                    tracing::warn!(peer = %peer_addr, fehler = %e, "Ungueltiger Envelope – uebersprungen");
                                }
                            }
                        }
                        Some(Ok(Message::Binary(daten))) => {
                            letzter_empfang = Instant::now();
                            self.state.metriken.verworfen("ungueltig");
                            tracing::warn!(peer = %peer_addr, bytes = daten.len(), "Binaer-Frame – uebersprungen");
                        }
                        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                            letzter_empfang = Instant::now();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(
                                peer = %peer_addr,
                                code = ?frame.as_ref().map(|f| f.code),
                                "Verbindung vom Client geschlossen"
                            );
                            break TrennGrund::VomClientGeschlossen;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(peer = %peer_addr, fehler = %e, "WebSocket-Lesefehler");
                            break TrennGrund::Abgebrochen;
                        }
                        None => {
                            tracing::warn!(peer = %peer_addr, "Verbindung ohne Close-Frame beendet");
                            break TrennGrund::Abgebrochen;
                        }
                    }
                }

                // Ausgehender Envelope aus der Send-Queue
                Some(ausgehend) = empfaenger.nachrichten.recv() => {
                    let text = match wire::kodieren(&ausgehend) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(peer = %peer_addr, fehler = %e, "Envelope nicht kodierbar – verworfen");
                            continue;
                        }
                    };
                    if let Err(e) = schreiben(&mut sink, Message::Text(text), config.schreib_timeout).await {
                        tracing::warn!(peer = %peer_addr, fehler = %e, "Senden fehlgeschlagen");
                        break grund_fuer(&e);
                    }
                }

                // Keepalive-Ping
                _ = ping_takt.tick() => {
                    if letzter_empfang.elapsed() > config.verbindungs_timeout {
                        tracing::warn!(
                            peer = %peer_addr,
                            still_sek = letzter_empfang.elapsed().as_secs(),
                            "Verbindungs-Timeout"
                        );
                        break TrennGrund::Zeitlimit;
                    }
                    if let Err(e) = schreiben(&mut sink, Message::Ping(Vec::new()), config.schreib_timeout).await {
                        tracing::warn!(peer = %peer_addr, fehler = %e, "Ping-Senden fehlgeschlagen");
                        break grund_fuer(&e);
                    }
                }

                // Kanal wurde von der Registry geschlossen
                ergebnis = empfaenger.schliessen.changed() => {
                    if ergebnis.is_err() || *empfaenger.schliessen.borrow() {
                        tracing::info!(peer = %peer_addr, connection = %kanal.connection_id, "Verbindung ersetzt oder verdraengt");
                        break TrennGrund::Ersetzt;
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(peer = %peer_addr, "Shutdown-Signal – Verbindung wird getrennt");
                        break TrennGrund::Shutdown;
                    }
                }
            }
        };

        // Bei serverseitigem Ende einen Close-Frame senden (best effort)
        if matches!(grund, TrennGrund::Ersetzt | TrennGrund::Shutdown | TrennGrund::Zeitlimit) {
            let abschied = Message::Close(Some(CloseFrame {
                code: axum::extract::ws::close_code::AWAY,
                reason: "Verbindung beendet".into(),
            }));
            let _ = schreiben(&mut sink, abschied, config.schreib_timeout).await;
        }

        // Cleanup beim Verbindungsende
        kanal.schliessen();
        let entfernt = self.state.registry.entfernen(&kanal.connection_id);

        if grund.ist_sauber() {
            tracing::info!(peer = %peer_addr, ?grund, entfernt, "Verbindungs-Task beendet");
        } else {
            tracing::warn!(peer = %peer_addr, ?grund, entfernt, "Verbindungs-Task abnormal beendet");
        }
        grund
    }
}

/// Schreibt eine Nachricht mit Deadline
async fn schreiben<S>(sink: &mut S, nachricht: Message, deadline: Duration) -> SignalingResult<()>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    match tokio::time::timeout(deadline, sink.send(nachricht)).await {
        Ok(ergebnis) => ergebnis.map_err(SignalingError::from),
        Err(_) => Err(SignalingError::Timeout),
    }
}

fn grund_fuer(fehler: &SignalingError) -> TrennGrund {
    match fehler {
        SignalingError::Timeout => TrennGrund::Zeitlimit,
        _ => TrennGrund::Schreibfehler,
    }
}
