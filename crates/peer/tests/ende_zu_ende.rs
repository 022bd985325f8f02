//! Ende-zu-Ende: echter Signaling-Server, echte WebSocket-Clients,
//! Fake-Verbindungsschicht.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use funkraum_core::{Identity, RoomName};
use funkraum_observability::FunkraumMetrics;
use funkraum_peer::{
    KandidatenSink, MediaTrackHandle, PeerClient, PeerError, PeerResult, SitzungsEreignis,
    TrackSteuerung, TransportConfig, VerbindungsFabrik, Verbindungsschicht,
};
use funkraum_protocol::{wire, EnvelopeType, Payload, SignalingEnvelope};
use funkraum_signaling::{SignalingConfig, SignalingServer, SignalingState};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};

const WARTEZEIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Fake-Verbindungsschicht
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Zaehler {
    kandidaten: AtomicUsize,
    schliessungen: AtomicUsize,
    tracks: AtomicUsize,
}

struct StubSchicht {
    name: String,
    sink: KandidatenSink,
    zaehler: Arc<Zaehler>,
}

#[async_trait]
impl Verbindungsschicht for StubSchicht {
    async fn offer_erzeugen(&mut self) -> PeerResult<Payload> {
        let offer = Payload::new(json!({"type": "offer", "sdp": self.name}));
        self.sink.kandidat(Payload::new(json!({"candidate": self.name})))?;
        Ok(offer)
    }

    async fn answer_erzeugen(&mut self) -> PeerResult<Payload> {
        let answer = Payload::new(json!({"type": "answer", "sdp": self.name}));
        self.sink.kandidat(Payload::new(json!({"candidate": self.name})))?;
        Ok(answer)
    }

    async fn remote_description_setzen(&mut self, _description: Payload) -> PeerResult<()> {
        Ok(())
    }

    async fn kandidat_hinzufuegen(&mut self, _kandidat: Payload) -> PeerResult<()> {
        self.zaehler.kandidaten.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn lokale_description_verwerfen(&mut self) -> PeerResult<()> {
        Ok(())
    }

    async fn track_anhaengen(&mut self, _track: MediaTrackHandle) -> PeerResult<()> {
        self.zaehler.tracks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn schliessen(&mut self) {
        self.zaehler.schliessungen.fetch_add(1, Ordering::SeqCst);
    }
}

struct StubFabrik {
    name: String,
    zaehler: Arc<Zaehler>,
}

impl StubFabrik {
    fn neu(name: &str) -> (Arc<Self>, Arc<Zaehler>) {
        let zaehler = Arc::new(Zaehler::default());
        let fabrik = Arc::new(Self {
            name: name.to_string(),
            zaehler: Arc::clone(&zaehler),
        });
        (fabrik, zaehler)
    }
}

impl VerbindungsFabrik for StubFabrik {
    fn erzeugen(&self, _remote: &Identity, kandidaten: KandidatenSink) -> PeerResult<Box<dyn Verbindungsschicht>> {
        Ok(Box::new(StubSchicht {
            name: self.name.clone(),
            sink: kandidaten,
            zaehler: Arc::clone(&self.zaehler),
        }))
    }
}

// ---------------------------------------------------------------------------
// Hilfsfunktionen
// ---------------------------------------------------------------------------

struct TestServer {
    addr: SocketAddr,
    state: Arc<SignalingState>,
    shutdown: watch::Sender<bool>,
}

async fn server_starten(config: SignalingConfig) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = SignalingState::neu(config, FunkraumMetrics::neu().unwrap());
    let (shutdown, rx) = watch::channel(false);

    let server = SignalingServer::neu(Arc::clone(&state));
    tokio::spawn(async move {
        server.mit_listener(listener, rx).await.unwrap();
    });

    TestServer { addr, state, shutdown }
}

struct TestClient {
    ereignisse: mpsc::UnboundedReceiver<SitzungsEreignis>,
    zaehler: Arc<Zaehler>,
    tracks: TrackSteuerung,
    handle: tokio::task::JoinHandle<bool>,
    stopp: watch::Sender<bool>,
}

async fn client_starten(server: &TestServer, name: &str) -> TestClient {
    let (fabrik, zaehler) = StubFabrik::neu(name);
    let config = TransportConfig::neu(server.addr.to_string(), Identity::from(name));
    let (client, ereignisse) = PeerClient::verbinden(config, fabrik).await.unwrap();
    let tracks = client.track_steuerung();
    let (stopp, stopp_rx) = watch::channel(false);
    let handle = tokio::spawn(client.ausfuehren(stopp_rx));
    TestClient {
        ereignisse,
        zaehler,
        tracks,
        handle,
        stopp,
    }
}

async fn warte_auf_anzahl(state: &SignalingState, anzahl: usize) {
    tokio::time::timeout(WARTEZEIT, async {
        while state.registry.online_anzahl() != anzahl {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Registry erreicht erwartete Groesse");
}

async fn naechstes_ereignis(rx: &mut mpsc::UnboundedReceiver<SitzungsEreignis>) -> SitzungsEreignis {
    tokio::time::timeout(WARTEZEIT, rx.recv())
        .await
        .expect("Ereignis innerhalb der Wartezeit")
        .expect("Ereigniskanal offen")
}

async fn warte_auf_zaehler(wert: &AtomicUsize, mindestens: usize) {
    tokio::time::timeout(WARTEZEIT, async {
        while wert.load(Ordering::SeqCst) < mindestens {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Zaehler erreicht Wert");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn zwei_clients_verbinden_sich() {
    let server = server_starten(SignalingConfig::default()).await;

    let mut a = client_starten(&server, "A").await;
    warte_auf_anzahl(&server.state, 1).await;
    let mut b = client_starten(&server, "B").await;

    assert_eq!(
        naechstes_ereignis(&mut a.ereignisse).await,
        SitzungsEreignis::Verbunden(Identity::from("B"))
    );
    assert_eq!(
        naechstes_ereignis(&mut b.ereignisse).await,
        SitzungsEreignis::Verbunden(Identity::from("A"))
    );

    // Je ein Kandidat der Gegenseite kommt an (ggf. erst gepuffert)
    warte_auf_zaehler(&a.zaehler.kandidaten, 1).await;
    warte_auf_zaehler(&b.zaehler.kandidaten, 1).await;

    // Genau ein Offer (von A) wurde weitergeleitet
    assert_eq!(
        server
            .state
            .metriken
            .envelopes_routed_total
            .with_label_values(&["offer"])
            .get(),
        1
    );
}

#[tokio::test]
async fn track_wird_nach_verbindungsaufbau_angehaengt() {
    let server = server_starten(SignalingConfig::default()).await;

    let mut a = client_starten(&server, "A").await;
    warte_auf_anzahl(&server.state, 1).await;
    let _b = client_starten(&server, "B").await;

    assert_eq!(
        naechstes_ereignis(&mut a.ereignisse).await,
        SitzungsEreignis::Verbunden(Identity::from("B"))
    );
    assert_eq!(a.zaehler.tracks.load(Ordering::SeqCst), 0);

    // Audio startet unabhaengig von der Verhandlung, der Loop laeuft schon
    a.tracks.anhaengen(MediaTrackHandle::neu("mikrofon")).unwrap();
    warte_auf_zaehler(&a.zaehler.tracks, 1).await;

    // Ein spaeter verbundener Peer bekommt den Track ebenfalls
    let _c = client_starten(&server, "C").await;
    assert_eq!(
        naechstes_ereignis(&mut a.ereignisse).await,
        SitzungsEreignis::Verbunden(Identity::from("C"))
    );
    warte_auf_zaehler(&a.zaehler.tracks, 2).await;

    // Nach dem Ende des Loops ist die Steuerung tot
    a.stopp.send_replace(true);
    tokio::time::timeout(WARTEZEIT, a.handle).await.unwrap().unwrap();
    assert!(matches!(
        a.tracks.anhaengen(MediaTrackHandle::neu("mikrofon")),
        Err(PeerError::TransportGeschlossen)
    ));
}

#[tokio::test]
async fn stummer_peer_wird_nach_heartbeat_timeout_geschlossen() {
    let config = SignalingConfig {
        keepalive: Duration::from_millis(100),
        schreib_timeout: Duration::from_millis(500),
        verbindungs_timeout: Duration::from_millis(400),
        ..SignalingConfig::default()
    };
    let server = server_starten(config).await;

    let mut a = client_starten(&server, "A").await;
    warte_auf_anzahl(&server.state, 1).await;

    // B von Hand: join, Offer von A beantworten, danach verstummen
    let (mut b, _) = connect_async(format!("ws://{}/ws", server.addr)).await.unwrap();
    let join = SignalingEnvelope::join(Identity::from("B"), RoomName::from("main"));
    b.send(Message::Text(wire::kodieren(&join).unwrap())).await.unwrap();

    tokio::time::timeout(WARTEZEIT, async {
        loop {
            let Some(Ok(Message::Text(text))) = b.next().await else {
                continue;
            };
            let envelope = wire::dekodieren(&text).unwrap();
            if envelope.typ == EnvelopeType::Offer {
                assert_eq!(envelope.from, Identity::from("A"));
                let answer = SignalingEnvelope::answer(
                    Identity::from("B"),
                    Identity::from("A"),
                    Payload::new(json!({"type": "answer"})),
                );
                b.send(Message::Text(wire::kodieren(&answer).unwrap()))
                    .await
                    .unwrap();
                return;
            }
        }
    })
    .await
    .expect("Offer von A erhalten");

    assert_eq!(
        naechstes_ereignis(&mut a.ereignisse).await,
        SitzungsEreignis::Verbunden(Identity::from("B"))
    );

    // B liest nicht mehr und beantwortet keine Pings mehr
    assert_eq!(
        naechstes_ereignis(&mut a.ereignisse).await,
        SitzungsEreignis::Geschlossen(Identity::from("B"))
    );
    assert_eq!(a.zaehler.schliessungen.load(Ordering::SeqCst), 1);
    assert_eq!(server.state.registry.online_anzahl(), 1);
    drop(b);
}

#[tokio::test]
async fn transportverlust_schliesst_alle_sitzungen() {
    let server = server_starten(SignalingConfig::default()).await;

    let mut a = client_starten(&server, "A").await;
    warte_auf_anzahl(&server.state, 1).await;
    let _b = client_starten(&server, "B").await;

    assert_eq!(
        naechstes_ereignis(&mut a.ereignisse).await,
        SitzungsEreignis::Verbunden(Identity::from("B"))
    );

    server.shutdown.send_replace(true);

    assert_eq!(
        naechstes_ereignis(&mut a.ereignisse).await,
        SitzungsEreignis::Geschlossen(Identity::from("B"))
    );
    let sauber = tokio::time::timeout(WARTEZEIT, a.handle).await.unwrap().unwrap();
    assert!(sauber, "Server-Shutdown sendet Close-Frame");
    assert_eq!(a.zaehler.schliessungen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn client_shutdown_meldet_abgang_beim_anderen() {
    let server = server_starten(SignalingConfig::default()).await;

    let mut a = client_starten(&server, "A").await;
    warte_auf_anzahl(&server.state, 1).await;
    let mut b = client_starten(&server, "B").await;

    naechstes_ereignis(&mut a.ereignisse).await;
    naechstes_ereignis(&mut b.ereignisse).await;

    b.stopp.send_replace(true);
    assert!(tokio::time::timeout(WARTEZEIT, b.handle).await.unwrap().unwrap());

    assert_eq!(
        naechstes_ereignis(&mut a.ereignisse).await,
        SitzungsEreignis::Geschlossen(Identity::from("B"))
    );
    warte_auf_anzahl(&server.state, 1).await;
}
