//! PeerSession – Verhandlungs-Zustandsmaschine pro Gegenstelle
//!
//! ## Zustaende
//! ```text
//!            initiieren()                  remote_answer()
//!   Idle ------------------> OfferSent ----------------------> Connected
//!    |                           |  remote_offer() (Glare,          ^
//!    |  remote_offer()           |  wir sind hoeflich)              |
//!    +-------------------> OfferReceived <--+                       |
//!                                |     Answer gesendet              |
//!                                +----------------------------------+
//!
//!   jeder Zustand --schliessen()--> Closed
//! ```
//!
//! Kandidaten, die vor der Remote-Description eintreffen, werden in
//! Ankunftsreihenfolge gepuffert und beim Setzen der Description in genau
//! dieser Reihenfolge an die Verbindungsschicht gegeben.
//!
//! ## Glare
//! Bieten beide Seiten gleichzeitig an, gewinnt das Offer der lexikographisch
//! kleineren Identitaet. Die groessere Identitaet ist hoeflich: sie verwirft
//! ihr eigenes Offer und beantwortet das fremde. Die kleinere ignoriert das
//! fremde Offer und wartet auf ihr Answer.

use funkraum_core::Identity;
use funkraum_protocol::{Payload, SignalingEnvelope};
use std::collections::VecDeque;

use crate::connectivity::{MediaTrackHandle, SignalAusgang, Verbindungsschicht};
use crate::error::{PeerError, PeerResult};

// ---------------------------------------------------------------------------
// Zustand und Rollen
// ---------------------------------------------------------------------------

/// Verhandlungszustand einer Sitzung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zustand {
    Idle,
    OfferSent,
    OfferReceived,
    Connected,
    Closed,
}

/// Rolle bei gleichzeitigen Offers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlareRolle {
    /// Verwirft das eigene Offer und nimmt das fremde an
    Hoeflich,
    /// Ignoriert das fremde Offer
    Unhoeflich,
}

impl GlareRolle {
    /// Rolle der lokalen Seite, nur aus den beiden Identitaeten bestimmt
    pub fn fuer(lokal: &Identity, remote: &Identity) -> Self {
        if lokal > remote {
            Self::Hoeflich
        } else {
            Self::Unhoeflich
        }
    }
}

/// Was eine Operation bewirkt hat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaktion {
    /// Angewendet; die Sitzung ist ggf. in einen neuen Zustand gewechselt
    Angewendet,
    /// Kandidat gepuffert (noch keine Remote-Description)
    Gepuffert,
    /// Veraltet, doppelt oder nach dem Schliessen eingetroffen
    Verworfen,
    /// Glare: eigenes Offer verworfen, fremdes beantwortet
    GlareNachgegeben,
    /// Glare: fremdes Offer ignoriert
    GlareIgnoriert,
}

// ---------------------------------------------------------------------------
// PeerSession
// ---------------------------------------------------------------------------

/// Verhandlung mit genau einer Gegenstelle
///
/// Alle Felder haben genau einen Schreiber: den Dispatch-Pfad, der die
/// Sitzung besitzt.
pub struct PeerSession {
    remote: Identity,
    zustand: Zustand,
    lokale_description_gesetzt: bool,
    remote_description_gesetzt: bool,
    ausstehende_kandidaten: VecDeque<Payload>,
    media_track: Option<MediaTrackHandle>,
    schicht: Option<Box<dyn Verbindungsschicht>>,
    ausgang: SignalAusgang,
}

impl PeerSession {
    /// Erstellt eine Sitzung im Zustand `Idle`
    pub fn neu(remote: Identity, schicht: Box<dyn Verbindungsschicht>, ausgang: SignalAusgang) -> Self {
        Self {
            remote,
            zustand: Zustand::Idle,
            lokale_description_gesetzt: false,
            remote_description_gesetzt: false,
            ausstehende_kandidaten: VecDeque::new(),
            media_track: None,
            schicht: Some(schicht),
            ausgang,
        }
    }

    pub fn remote(&self) -> &Identity {
        &self.remote
    }

    pub fn zustand(&self) -> Zustand {
        self.zustand
    }

    pub fn lokale_description_gesetzt(&self) -> bool {
        self.lokale_description_gesetzt
    }

    pub fn remote_description_gesetzt(&self) -> bool {
        self.remote_description_gesetzt
    }

    /// Anzahl gepufferter Remote-Kandidaten
    pub fn ausstehende_kandidaten(&self) -> usize {
        self.ausstehende_kandidaten.len()
    }

    pub fn media_track(&self) -> Option<&MediaTrackHandle> {
        self.media_track.as_ref()
    }

    /// Erzeugt ein Offer und sendet es an die Gegenstelle
    ///
    /// Nur aus `Idle`. Schlaegt die Erzeugung fehl, bleibt die Sitzung in
    /// `Idle` und der Fehler ist wiederholbar.
    pub async fn initiieren(&mut self) -> PeerResult<Reaktion> {
        if self.zustand != Zustand::Idle {
            return Err(PeerError::UngueltigerZustand {
                aktion: "initiieren",
                zustand: self.zustand,
            });
        }

        let offer = self.schicht_mut()?.offer_erzeugen().await?;
        self.ausgang.senden(SignalingEnvelope::offer(
            self.ausgang.lokal().clone(),
            self.remote.clone(),
            offer,
        ))?;

        self.lokale_description_gesetzt = true;
        self.zustand = Zustand::OfferSent;
        tracing::debug!(remote = %self.remote, "Offer gesendet");
        Ok(Reaktion::Angewendet)
    }

    /// Verarbeitet ein eingehendes Offer
    pub async fn remote_offer(&mut self, offer: Payload) -> PeerResult<Reaktion> {
        match self.zustand {
            Zustand::Idle => {
                self.offer_beantworten(offer).await?;
                Ok(Reaktion::Angewendet)
            }
            Zustand::OfferSent => match GlareRolle::fuer(self.ausgang.lokal(), &self.remote) {
                GlareRolle::Hoeflich => {
                    tracing::info!(remote = %self.remote, "Glare – eigenes Offer verworfen");
                    self.schicht_mut()?.lokale_description_verwerfen().await?;
                    self.lokale_description_gesetzt = false;
                    self.zustand = Zustand::Idle;
                    self.offer_beantworten(offer).await?;
                    Ok(Reaktion::GlareNachgegeben)
                }
                GlareRolle::Unhoeflich => {
                    tracing::info!(remote = %self.remote, "Glare – fremdes Offer ignoriert");
                    Ok(Reaktion::GlareIgnoriert)
                }
            },
            anderer => {
                tracing::warn!(remote = %self.remote, zustand = ?anderer, "Offer in unerwartetem Zustand – verworfen");
                Ok(Reaktion::Verworfen)
            }
        }
    }

    /// Verarbeitet ein eingehendes Answer (nur in `OfferSent` gueltig)
    pub async fn remote_answer(&mut self, answer: Payload) -> PeerResult<Reaktion> {
        if self.zustand != Zustand::OfferSent {
            tracing::debug!(
                remote = %self.remote,
                zustand = ?self.zustand,
                "Answer ausserhalb von OfferSent – verworfen (doppelt oder veraltet)"
            );
            return Ok(Reaktion::Verworfen);
        }

        self.schicht_mut()?.remote_description_setzen(answer).await?;
        self.remote_description_gesetzt = true;
        self.kandidaten_abarbeiten().await;
        self.verbunden().await;
        Ok(Reaktion::Angewendet)
    }

    /// Verarbeitet einen eingehenden Kandidaten
    pub async fn remote_kandidat(&mut self, kandidat: Payload) -> PeerResult<Reaktion> {
        if self.zustand == Zustand::Closed {
            return Ok(Reaktion::Verworfen);
        }
        if !self.remote_description_gesetzt {
            self.ausstehende_kandidaten.push_back(kandidat);
            tracing::trace!(
                remote = %self.remote,
                gepuffert = self.ausstehende_kandidaten.len(),
                "Kandidat gepuffert"
            );
            return Ok(Reaktion::Gepuffert);
        }
        self.schicht_mut()?.kandidat_hinzufuegen(kandidat).await?;
        Ok(Reaktion::Angewendet)
    }

    /// Haengt einen lokalen Audio-Track an
    ///
    /// Ist die Sitzung noch nicht verbunden, wird der Track beim Erreichen
    /// von `Connected` angehaengt.
    pub async fn track_anhaengen(&mut self, track: MediaTrackHandle) -> PeerResult<Reaktion> {
        match self.zustand {
            Zustand::Closed => Ok(Reaktion::Verworfen),
            Zustand::Connected => {
                self.schicht_mut()?.track_anhaengen(track.clone()).await?;
                self.media_track = Some(track);
                Ok(Reaktion::Angewendet)
            }
            _ => {
                self.media_track = Some(track);
                Ok(Reaktion::Gepuffert)
            }
        }
    }

    /// Merkt einen Track vor, ohne die Verbindungsschicht aufzurufen
    pub(crate) fn track_vormerken(&mut self, track: MediaTrackHandle) {
        if self.zustand != Zustand::Closed {
            self.media_track = Some(track);
        }
    }

    /// Gibt Verbindung und Kandidaten-Puffer frei (idempotent)
    ///
    /// Gibt `true` zurueck, wenn dieser Aufruf die Ressourcen freigegeben hat.
    pub async fn schliessen(&mut self) -> bool {
        if self.zustand == Zustand::Closed {
            return false;
        }
        if let Some(mut schicht) = self.schicht.take() {
            schicht.schliessen().await;
        }
        self.ausstehende_kandidaten.clear();
        self.media_track = None;
        self.zustand = Zustand::Closed;
        tracing::debug!(remote = %self.remote, "Sitzung geschlossen");
        true
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsmethoden
    // -----------------------------------------------------------------------

    /// Remote-Offer setzen, Puffer leeren, Answer erzeugen und senden
    async fn offer_beantworten(&mut self, offer: Payload) -> PeerResult<()> {
        self.schicht_mut()?.remote_description_setzen(offer).await?;
        self.remote_description_gesetzt = true;
        self.kandidaten_abarbeiten().await;
        self.zustand = Zustand::OfferReceived;

        let answer = match self.schicht_mut()?.answer_erzeugen().await {
            Ok(answer) => answer,
            Err(e) => {
                // Zurueck in den letzten stabilen Zustand; ein neues Offer darf es erneut versuchen
                self.zustand = Zustand::Idle;
                self.remote_description_gesetzt = false;
                return Err(e);
            }
        };
        self.lokale_description_gesetzt = true;
        self.ausgang.senden(SignalingEnvelope::answer(
            self.ausgang.lokal().clone(),
            self.remote.clone(),
            answer,
        ))?;
        tracing::debug!(remote = %self.remote, "Answer gesendet");
        self.verbunden().await;
        Ok(())
    }

    /// Gepufferte Kandidaten in Ankunftsreihenfolge anwenden
    async fn kandidaten_abarbeiten(&mut self) {
        let Some(schicht) = self.schicht.as_mut() else {
            return;
        };
        while let Some(kandidat) = self.ausstehende_kandidaten.pop_front() {
            if let Err(e) = schicht.kandidat_hinzufuegen(kandidat).await {
                tracing::warn!(remote = %self.remote, fehler = %e, "Gepufferter Kandidat nicht anwendbar");
            }
        }
    }

    async fn verbunden(&mut self) {
        self.zustand = Zustand::Connected;
        tracing::info!(remote = %self.remote, "Sitzung verbunden");

        if let (Some(track), Some(schicht)) = (self.media_track.clone(), self.schicht.as_mut()) {
            if let Err(e) = schicht.track_anhaengen(track).await {
                tracing::warn!(remote = %self.remote, fehler = %e, "Track konnte nicht angehaengt werden");
            }
        }
    }

    fn schicht_mut(&mut self) -> PeerResult<&mut Box<dyn Verbindungsschicht>> {
        self.schicht
            .as_mut()
            .ok_or(PeerError::UngueltigerZustand {
                aktion: "verbindungsschicht",
                zustand: Zustand::Closed,
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testhilfe::{Aufruf, FakeProtokoll, FakeSchicht};
    use funkraum_protocol::EnvelopeType;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;

    struct Aufbau {
        sitzung: PeerSession,
        protokoll: FakeProtokoll,
        ausgehend: mpsc::UnboundedReceiver<SignalingEnvelope>,
    }

    fn aufbau(lokal: &str, remote: &str) -> Aufbau {
        let (tx, ausgehend) = mpsc::unbounded_channel();
        let protokoll = FakeProtokoll::default();
        let schicht = Box::new(FakeSchicht::neu(lokal, protokoll.clone()));
        let sitzung = PeerSession::neu(
            Identity::from(remote),
            schicht,
            SignalAusgang::neu(Identity::from(lokal), tx),
        );
        Aufbau {
            sitzung,
            protokoll,
            ausgehend,
        }
    }

    fn kandidat(n: u32) -> Payload {
        Payload::new(json!({ "candidate": n }))
    }

    fn sdp(text: &str) -> Payload {
        Payload::new(json!({ "sdp": text }))
    }

    #[tokio::test]
    async fn initiieren_sendet_offer() {
        let mut a = aufbau("alice", "bob");
        assert_eq!(a.sitzung.initiieren().await.unwrap(), Reaktion::Angewendet);
        assert_eq!(a.sitzung.zustand(), Zustand::OfferSent);
        assert!(a.sitzung.lokale_description_gesetzt());

        let env = a.ausgehend.try_recv().unwrap();
        assert_eq!(env.typ, EnvelopeType::Offer);
        assert_eq!(env.from, Identity::from("alice"));
        assert_eq!(env.to, Some(Identity::from("bob")));
    }

    #[tokio::test]
    async fn zweites_initiieren_wird_abgelehnt() {
        let mut a = aufbau("alice", "bob");
        a.sitzung.initiieren().await.unwrap();
        let fehler = a.sitzung.initiieren().await.unwrap_err();
        assert!(matches!(
            fehler,
            PeerError::UngueltigerZustand {
                zustand: Zustand::OfferSent,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn fehlgeschlagenes_offer_bleibt_idle_und_ist_wiederholbar() {
        let mut a = aufbau("alice", "bob");
        a.protokoll.offer_fehler.store(true, Ordering::SeqCst);

        let fehler = a.sitzung.initiieren().await.unwrap_err();
        assert!(fehler.ist_wiederholbar());
        assert_eq!(a.sitzung.zustand(), Zustand::Idle);
        assert!(a.ausgehend.try_recv().is_err());

        a.protokoll.offer_fehler.store(false, Ordering::SeqCst);
        a.sitzung.initiieren().await.unwrap();
        assert_eq!(a.sitzung.zustand(), Zustand::OfferSent);
    }

    #[tokio::test]
    async fn offer_aus_idle_wird_beantwortet() {
        let mut b = aufbau("bob", "alice");
        let reaktion = b.sitzung.remote_offer(sdp("offer-a")).await.unwrap();
        assert_eq!(reaktion, Reaktion::Angewendet);
        assert_eq!(b.sitzung.zustand(), Zustand::Connected);
        assert!(b.sitzung.remote_description_gesetzt());

        let env = b.ausgehend.try_recv().unwrap();
        assert_eq!(env.typ, EnvelopeType::Answer);
        assert_eq!(env.to, Some(Identity::from("alice")));
    }

    #[tokio::test]
    async fn fehlgeschlagenes_answer_faellt_auf_idle_zurueck() {
        let mut b = aufbau("bob", "alice");
        b.protokoll.answer_fehler.store(true, Ordering::SeqCst);

        assert!(b.sitzung.remote_offer(sdp("offer-a")).await.is_err());
        assert_eq!(b.sitzung.zustand(), Zustand::Idle);
        assert!(b.ausgehend.try_recv().is_err());

        b.protokoll.answer_fehler.store(false, Ordering::SeqCst);
        b.sitzung.remote_offer(sdp("offer-a2")).await.unwrap();
        assert_eq!(b.sitzung.zustand(), Zustand::Connected);
    }

    #[tokio::test]
    async fn answer_verbindet_nach_offer() {
        let mut a = aufbau("alice", "bob");
        a.sitzung.initiieren().await.unwrap();
        let reaktion = a.sitzung.remote_answer(sdp("answer-b")).await.unwrap();
        assert_eq!(reaktion, Reaktion::Angewendet);
        assert_eq!(a.sitzung.zustand(), Zustand::Connected);
    }

    #[tokio::test]
    async fn veraltetes_answer_aendert_nichts() {
        let mut a = aufbau("alice", "bob");
        assert_eq!(
            a.sitzung.remote_answer(sdp("zu frueh")).await.unwrap(),
            Reaktion::Verworfen
        );
        assert_eq!(a.sitzung.zustand(), Zustand::Idle);
        assert!(!a.sitzung.remote_description_gesetzt());

        a.sitzung.initiieren().await.unwrap();
        a.sitzung.remote_answer(sdp("answer-b")).await.unwrap();
        let vorher = a.protokoll.aufrufe().len();

        assert_eq!(
            a.sitzung.remote_answer(sdp("doppelt")).await.unwrap(),
            Reaktion::Verworfen
        );
        assert_eq!(a.sitzung.zustand(), Zustand::Connected);
        assert_eq!(a.protokoll.aufrufe().len(), vorher);
    }

    #[tokio::test]
    async fn fruehe_kandidaten_werden_in_ankunftsreihenfolge_angewendet() {
        let mut a = aufbau("alice", "bob");
        a.sitzung.initiieren().await.unwrap();

        for n in 1..=3 {
            assert_eq!(
                a.sitzung.remote_kandidat(kandidat(n)).await.unwrap(),
                Reaktion::Gepuffert
            );
        }
        assert_eq!(a.sitzung.ausstehende_kandidaten(), 3);
        assert!(a.protokoll.kandidaten().is_empty());

        a.sitzung.remote_answer(sdp("answer-b")).await.unwrap();
        assert_eq!(a.sitzung.ausstehende_kandidaten(), 0);

        assert_eq!(
            a.sitzung.remote_kandidat(kandidat(4)).await.unwrap(),
            Reaktion::Angewendet
        );
        assert_eq!(
            a.protokoll.kandidaten(),
            vec![kandidat(1), kandidat(2), kandidat(3), kandidat(4)]
        );

        // Kandidaten werden erst nach der Remote-Description angewendet
        let aufrufe = a.protokoll.aufrufe();
        let pos_description = aufrufe
            .iter()
            .position(|x| matches!(x, Aufruf::RemoteDescription(_)))
            .unwrap();
        let pos_kandidat = aufrufe
            .iter()
            .position(|x| matches!(x, Aufruf::Kandidat(_)))
            .unwrap();
        assert!(pos_description < pos_kandidat);
    }

    #[tokio::test]
    async fn kandidaten_vor_offer_werden_beim_beantworten_abgearbeitet() {
        let mut b = aufbau("bob", "alice");
        b.sitzung.remote_kandidat(kandidat(1)).await.unwrap();
        b.sitzung.remote_kandidat(kandidat(2)).await.unwrap();
        b.sitzung.remote_offer(sdp("offer-a")).await.unwrap();

        assert_eq!(b.protokoll.kandidaten(), vec![kandidat(1), kandidat(2)]);
        assert_eq!(b.sitzung.zustand(), Zustand::Connected);
    }

    #[test]
    fn glare_rolle_ist_symmetrisch() {
        let alice = Identity::from("alice");
        let bob = Identity::from("bob");
        assert_eq!(GlareRolle::fuer(&alice, &bob), GlareRolle::Unhoeflich);
        assert_eq!(GlareRolle::fuer(&bob, &alice), GlareRolle::Hoeflich);
    }

    #[tokio::test]
    async fn glare_konvergiert_auf_das_offer_von_alice() {
        let mut alice = aufbau("alice", "bob");
        let mut bob = aufbau("bob", "alice");

        alice.sitzung.initiieren().await.unwrap();
        bob.sitzung.initiieren().await.unwrap();
        let offer_alice = alice.ausgehend.try_recv().unwrap();
        let offer_bob = bob.ausgehend.try_recv().unwrap();

        // Beide Offers kreuzen sich
        let bei_bob = bob.sitzung.remote_offer(offer_alice.payload.unwrap()).await.unwrap();
        let bei_alice = alice.sitzung.remote_offer(offer_bob.payload.unwrap()).await.unwrap();
        assert_eq!(bei_bob, Reaktion::GlareNachgegeben);
        assert_eq!(bei_alice, Reaktion::GlareIgnoriert);
        assert!(bob.protokoll.aufrufe().contains(&Aufruf::LokaleVerworfen));
        assert_eq!(alice.sitzung.zustand(), Zustand::OfferSent);

        // Bobs Answer auf Alices Offer schliesst die Verhandlung ab
        let answer_bob = bob.ausgehend.try_recv().unwrap();
        assert_eq!(answer_bob.typ, EnvelopeType::Answer);
        alice.sitzung.remote_answer(answer_bob.payload.unwrap()).await.unwrap();

        assert_eq!(alice.sitzung.zustand(), Zustand::Connected);
        assert_eq!(bob.sitzung.zustand(), Zustand::Connected);
        assert!(alice.ausgehend.try_recv().is_err(), "Alice sendet kein zweites Offer/Answer");
    }

    #[tokio::test]
    async fn schliessen_ist_idempotent() {
        let mut a = aufbau("alice", "bob");
        a.sitzung.initiieren().await.unwrap();
        a.sitzung.remote_kandidat(kandidat(1)).await.unwrap();

        assert!(a.sitzung.schliessen().await);
        assert!(!a.sitzung.schliessen().await);
        assert_eq!(a.protokoll.schliessungen(), 1);
        assert_eq!(a.sitzung.zustand(), Zustand::Closed);
        assert_eq!(a.sitzung.ausstehende_kandidaten(), 0);

        assert_eq!(
            a.sitzung.remote_kandidat(kandidat(2)).await.unwrap(),
            Reaktion::Verworfen
        );
        assert_eq!(
            a.sitzung.remote_answer(sdp("spaet")).await.unwrap(),
            Reaktion::Verworfen
        );
    }

    #[tokio::test]
    async fn track_wird_beim_verbinden_angehaengt() {
        let mut a = aufbau("alice", "bob");
        let track = MediaTrackHandle::neu("mic");
        assert_eq!(
            a.sitzung.track_anhaengen(track.clone()).await.unwrap(),
            Reaktion::Gepuffert
        );
        a.sitzung.initiieren().await.unwrap();
        a.sitzung.remote_answer(sdp("answer-b")).await.unwrap();

        assert!(a.protokoll.aufrufe().contains(&Aufruf::Track(track.clone())));
        assert_eq!(a.sitzung.media_track(), Some(&track));

        a.sitzung.schliessen().await;
        assert!(a.sitzung.media_track().is_none());
    }
}
