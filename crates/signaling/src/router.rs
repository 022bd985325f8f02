//! Message-Router – Dispatch-Tabelle nach Envelope-Typ
//!
//! Der Router wird aus dem Lese-Loop einer einzelnen Verbindung aufgerufen.
//! `join` fuehrt zu einer Registrierung, `offer`/`answer`/`candidate` werden
//! unveraendert an den adressierten Empfaenger im selben Raum weitergereicht.
//! Ein Envelope, der nicht zugestellt werden kann, wird verworfen; die
//! Verbindung des Absenders bleibt in jedem Fall offen.

use funkraum_core::{ConnectionId, Identity, RoomName};
use funkraum_observability::FunkraumMetrics;
use funkraum_protocol::{EnvelopeType, SignalingEnvelope};

use crate::broadcast::ClientChannel;
use crate::presence::PresenceRegistry;

// ---------------------------------------------------------------------------
// Ergebnis
// ---------------------------------------------------------------------------

/// Grund fuer einen verworfenen Envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerwerfGrund {
    /// Punkt-zu-Punkt-Envelope vor dem `join`
    NichtAngemeldet,
    /// `from` stimmt nicht mit der registrierten Identitaet ueberein
    FalscherAbsender,
    /// Empfaenger ist im Raum nicht registriert (hat ihn evtl. gerade verlassen)
    EmpfaengerUnbekannt,
    /// Typ darf vom Client nicht gesendet werden (`presence`)
    UnzulaessigerTyp,
    /// Send-Queue des Empfaengers voll oder geschlossen
    EmpfaengerNichtErreichbar,
}

impl VerwerfGrund {
    /// Label fuer `funkraum_envelopes_dropped_total`
    pub fn als_str(&self) -> &'static str {
        match self {
            Self::NichtAngemeldet => "nicht_angemeldet",
            Self::FalscherAbsender => "falscher_absender",
            Self::EmpfaengerUnbekannt => "empfaenger_unbekannt",
            Self::UnzulaessigerTyp => "unzulaessiger_typ",
            Self::EmpfaengerNichtErreichbar => "empfaenger_nicht_erreichbar",
        }
    }
}

/// Was der Router mit einem Envelope gemacht hat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingErgebnis {
    /// `join` verarbeitet
    Registriert { ersetzt: Option<ConnectionId> },
    /// An den Empfaenger weitergeleitet
    Weitergeleitet { an: Identity },
    /// Verworfen, Verbindung bleibt offen
    Verworfen(VerwerfGrund),
}

// ---------------------------------------------------------------------------
// MessageRouter
// ---------------------------------------------------------------------------

/// Routet eingehende Envelopes einer Verbindung
#[derive(Clone)]
pub struct MessageRouter {
    registry: PresenceRegistry,
    metriken: FunkraumMetrics,
    standard_raum: RoomName,
}

impl MessageRouter {
    /// Erstellt einen Router ueber der gegebenen Registry
    pub fn neu(registry: PresenceRegistry, metriken: FunkraumMetrics, standard_raum: RoomName) -> Self {
        Self {
            registry,
            metriken,
            standard_raum,
        }
    }

    /// Verarbeitet einen Envelope, der ueber `kanal` eingegangen ist
    pub fn routen(&self, envelope: SignalingEnvelope, kanal: &ClientChannel) -> RoutingErgebnis {
        let ergebnis = if envelope.typ.ist_punkt_zu_punkt() {
            self.weiterleiten(envelope, kanal)
        } else if envelope.typ == EnvelopeType::Join {
            self.join(envelope, kanal)
        } else {
            tracing::warn!(connection = %kanal.connection_id, typ = %envelope.typ, "Typ darf nicht vom Client kommen – verworfen");
            RoutingErgebnis::Verworfen(VerwerfGrund::UnzulaessigerTyp)
        };

        if let RoutingErgebnis::Verworfen(grund) = &ergebnis {
            self.metriken.verworfen(grund.als_str());
        }
        ergebnis
    }

    fn join(&self, envelope: SignalingEnvelope, kanal: &ClientChannel) -> RoutingErgebnis {
        let identity = envelope.from;
        let room = envelope
            .room
            .filter(|r| !r.ist_leer())
            .unwrap_or_else(|| self.standard_raum.clone());

        // Erneuter join auf derselben Verbindung unter anderem Namen/Raum
        if let Some((alter_raum, alte_identity)) = self.registry.registrierung_von(&kanal.connection_id) {
            if alter_raum != room || alte_identity != identity {
                tracing::info!(
                    connection = %kanal.connection_id,
                    alt = %alte_identity,
                    neu = %identity,
                    "Verbindung wechselt Identitaet oder Raum"
                );
                self.registry.entfernen(&kanal.connection_id);
            }
        }

        let registrierung = self.registry.registrieren(identity, room, kanal.clone());
        RoutingErgebnis::Registriert {
            ersetzt: registrierung.ersetzt,
        }
    }

    fn weiterleiten(&self, envelope: SignalingEnvelope, kanal: &ClientChannel) -> RoutingErgebnis {
        let Some((room, absender)) = self.registry.registrierung_von(&kanal.connection_id) else {
            tracing::warn!(
                connection = %kanal.connection_id,
                typ = %envelope.typ,
                "Signal vor join – verworfen"
            );
            return RoutingErgebnis::Verworfen(VerwerfGrund::NichtAngemeldet);
        };

        if envelope.from != absender {
            tracing::warn!(
                connection = %kanal.connection_id,
                registriert = %absender,
                from = %envelope.from,
                "Absender passt nicht zur Registrierung – verworfen"
            );
            return RoutingErgebnis::Verworfen(VerwerfGrund::FalscherAbsender);
        }

        let Some(empfaenger) = envelope.to.clone() else {
            return RoutingErgebnis::Verworfen(VerwerfGrund::EmpfaengerUnbekannt);
        };

        let Some(ziel) = self.registry.kanal_fuer(&room, &empfaenger) else {
            tracing::debug!(
                from = %absender,
                to = %empfaenger,
                room = %room,
                typ = %envelope.typ,
                "Empfaenger nicht registriert – verworfen"
            );
            return RoutingErgebnis::Verworfen(VerwerfGrund::EmpfaengerUnbekannt);
        };

        let typ = envelope.typ;
        match ziel.senden(envelope) {
            Ok(()) => {
                self.metriken.weitergeleitet(typ.als_str());
                tracing::trace!(from = %absender, to = %empfaenger, typ = %typ, "Envelope weitergeleitet");
                RoutingErgebnis::Weitergeleitet { an: empfaenger }
            }
            Err(e) => {
                tracing::warn!(to = %empfaenger, fehler = %e, "Weiterleiten fehlgeschlagen");
                self.registry.verdraengen(&ziel);
                RoutingErgebnis::Verworfen(VerwerfGrund::EmpfaengerNichtErreichbar)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
