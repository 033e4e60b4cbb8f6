//! Call test harness
//!
//! Provides the collaborators integration tests run calls against:
//! - `MockTransportFactory`: paired in-process transports that record every
//!   operation and open a data channel once both descriptions are applied
//! - `RecordingSink`: media sink that remembers what it rendered
//! - `RawPeer`: a bare relay connection for driving one side by hand
//!
//! Basic usage pattern:
//!
//! 1. Create an `InMemoryRelay` and a `MockTransportFactory`
//! 2. Start calls with `CallDeps::new(relay, factory)`
//! 3. Wait for states, inspect notifications and the recorded operations
//! 4. Hang up

#![allow(dead_code)]

use async_trait::async_trait;
use peercall::signaling::{InMemoryRelay, RelayConnection, RelayEvent};
use peercall::transport::TransportEventSender;
use peercall::{
    CallConfig, CallDeps, DataChannelHandle, Error, MediaSink, MediaStream, MediaTrack,
    MediaTransport, Notification, Result, SessionDescription, SignalingMessage, TrackKind,
    TransportEvent, TransportFactory,
};
use peercall::signaling::IceCandidate;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Default wait for anything asynchronous in the tests
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize test logging (safe to call from every test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,peercall=debug")
        .with_test_writer()
        .try_init();
}

/// Config for in-process calls in `room`
pub fn test_config(room: &str) -> CallConfig {
    CallConfig {
        room: Some(room.to_string()),
        ..CallConfig::local_only()
    }
}

/// Deps wired to an in-memory relay and mock transports
pub fn mock_deps(relay: &InMemoryRelay, factory: &Arc<MockTransportFactory>) -> CallDeps {
    CallDeps::new(
        Arc::new(relay.clone()),
        Arc::clone(factory) as Arc<dyn TransportFactory>,
    )
}

/// Operation log of one transport
#[derive(Debug, Default)]
pub struct TransportRecord {
    ops: Mutex<Vec<String>>,
    closes: AtomicUsize,
}

impl TransportRecord {
    fn push(&self, op: impl Into<String>) {
        self.ops.lock().unwrap().push(op.into());
    }

    /// Operations in call order
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    /// Position of the first operation starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.ops().iter().position(|op| op.starts_with(prefix))
    }

    /// Number of times `close` was called
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Creates paired mock transports: the first and second transport created
/// are connected to each other, the third and fourth, and so on
#[derive(Default)]
pub struct MockTransportFactory {
    records: Mutex<Vec<Arc<TransportRecord>>>,
    network: Arc<Mutex<Vec<TransportEventSender>>>,
    fail_on: Option<&'static str>,
}

impl MockTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Factory whose transports fail the named operation
    pub fn failing_on(op: &'static str) -> Arc<Self> {
        Arc::new(Self {
            fail_on: Some(op),
            ..Self::default()
        })
    }

    /// Number of transports created
    pub fn created(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Record of the `index`th transport
    pub fn record(&self, index: usize) -> Arc<TransportRecord> {
        Arc::clone(&self.records.lock().unwrap()[index])
    }

    /// Post `event` as if the `index`th transport had observed it
    pub fn emit(&self, index: usize, event: TransportEvent) {
        let sender = self.network.lock().unwrap()[index].clone();
        sender.send(event).expect("call loop no longer listening");
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create(
        &self,
        _config: &CallConfig,
        events: TransportEventSender,
    ) -> Result<Box<dyn MediaTransport>> {
        let record = Arc::new(TransportRecord::default());
        let index = {
            let mut network = self.network.lock().unwrap();
            network.push(events.clone());
            network.len() - 1
        };
        self.records.lock().unwrap().push(Arc::clone(&record));

        Ok(Box::new(MockTransport {
            index,
            record,
            events,
            network: Arc::clone(&self.network),
            fail_on: self.fail_on,
            local: Mutex::new(None),
            remote: Mutex::new(None),
            channel: Mutex::new(None),
        }))
    }
}

/// In-process transport that records its operations
pub struct MockTransport {
    index: usize,
    record: Arc<TransportRecord>,
    events: TransportEventSender,
    network: Arc<Mutex<Vec<TransportEventSender>>>,
    fail_on: Option<&'static str>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    channel: Mutex<Option<Arc<MockDataChannel>>>,
}

impl MockTransport {
    fn check(&self, op: &str) -> Result<()> {
        if self.fail_on == Some(op) {
            return Err(Error::Negotiation(format!("injected failure in {}", op)));
        }
        Ok(())
    }

    fn peer_events(&self) -> Option<TransportEventSender> {
        self.network.lock().unwrap().get(self.index ^ 1).cloned()
    }

    fn sdp(&self) -> String {
        let mut sdp = format!("v=0\r\no=mock {} 0 IN IP4 127.0.0.1\r\ns=-\r\n", self.index);
        if self.channel.lock().unwrap().is_some() || self.remote.lock().unwrap().is_some() {
            sdp.push_str("m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\na=mid:0\r\n");
        }
        sdp
    }

    fn candidate(&self, n: usize) -> IceCandidate {
        IceCandidate {
            candidate: format!(
                "candidate:{} 1 udp 2130706431 10.0.{}.{} 5000 typ host",
                n, self.index, n
            ),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }
    }

    /// Both descriptions applied on the offering side: open the channel pair
    fn connect(&self) {
        let Some(channel) = self.channel.lock().unwrap().clone() else {
            return;
        };
        let Some(peer_events) = self.peer_events() else {
            return;
        };

        let peer_channel = Arc::new(MockDataChannel::new(&channel.label));
        peer_channel.open.store(true, Ordering::SeqCst);
        *peer_channel.deliver_to.lock().unwrap() = Some(self.events.clone());
        *channel.deliver_to.lock().unwrap() = Some(peer_events.clone());
        channel.open.store(true, Ordering::SeqCst);

        let _ = peer_events.send(TransportEvent::RemoteDataChannel(peer_channel));
        let _ = self
            .events
            .send(TransportEvent::DataChannelOpen(channel.label.clone()));
    }
}

#[async_trait]
impl MediaTransport for MockTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record.push("create_offer");
        self.check("create_offer")?;
        Ok(SessionDescription::offer(self.sdp()))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record.push("create_answer");
        self.check("create_answer")?;
        if self.remote.lock().unwrap().is_none() {
            return Err(Error::Negotiation("no remote offer".to_string()));
        }
        Ok(SessionDescription::answer(self.sdp()))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.record.push(format!("set_local:{:?}", description.sdp_type));
        self.check("set_local_description")?;
        *self.local.lock().unwrap() = Some(description);

        for n in 1..=2 {
            let _ = self
                .events
                .send(TransportEvent::IceCandidate(Some(self.candidate(n))));
        }
        let _ = self.events.send(TransportEvent::IceCandidate(None));
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.record.push(format!("set_remote:{:?}", description.sdp_type));
        self.check("set_remote_description")?;
        let is_answer = !description.is_offer();
        *self.remote.lock().unwrap() = Some(description);

        let _ = self.events.send(TransportEvent::RemoteTrack(MediaTrack::new(
            TrackKind::Video,
            "remote video",
        )));
        if is_answer {
            self.connect();
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let mut current = self.local.lock().unwrap().clone()?;
        for n in 1..=2 {
            current
                .sdp
                .push_str(&format!("a={}\r\n", self.candidate(n).candidate));
        }
        Some(current)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record
            .push(format!("add_ice_candidate:{}", candidate.candidate));
        if self.remote.lock().unwrap().is_none() {
            return Err(Error::Negotiation(
                "candidate added before remote description".to_string(),
            ));
        }
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannelHandle>> {
        self.record.push(format!("create_data_channel:{}", label));
        self.check("create_data_channel")?;
        let channel = Arc::new(MockDataChannel::new(label));
        *self.channel.lock().unwrap() = Some(Arc::clone(&channel));
        Ok(channel)
    }

    async fn add_local_stream(&self, stream: &MediaStream) -> Result<()> {
        self.record
            .push(format!("add_local_stream:{}", stream.tracks().len()));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record.push("close");
        self.record.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Data channel that delivers text to the paired transport's events
pub struct MockDataChannel {
    label: String,
    open: AtomicBool,
    deliver_to: Mutex<Option<TransportEventSender>>,
}

impl MockDataChannel {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            open: AtomicBool::new(false),
            deliver_to: Mutex::new(None),
        }
    }
}

#[async_trait]
impl DataChannelHandle for MockDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        if !self.is_open() {
            return Err(Error::DataChannel("mock channel not open".to_string()));
        }
        if let Some(tx) = self.deliver_to.lock().unwrap().as_ref() {
            let _ = tx.send(TransportEvent::DataChannelMessage {
                label: self.label.clone(),
                text: text.to_string(),
            });
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Media sink that remembers attaches and detaches
#[derive(Debug, Default)]
pub struct RecordingSink {
    attached: Mutex<Vec<String>>,
    detaches: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ids of the streams attached, in order
    pub fn attached(&self) -> Vec<String> {
        self.attached.lock().unwrap().clone()
    }

    /// Number of detaches
    pub fn detaches(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }
}

impl MediaSink for RecordingSink {
    fn attach(&self, stream: &MediaStream) {
        self.attached.lock().unwrap().push(stream.id().to_string());
    }

    fn detach(&self) {
        self.detaches.fetch_add(1, Ordering::SeqCst);
    }
}

/// One side of a room driven by hand over a bare relay connection
pub struct RawPeer {
    pub connection: RelayConnection,
}

impl RawPeer {
    /// Open a connection and join `room`, returning the relay's reply
    pub async fn join(relay: &InMemoryRelay, room: &str) -> (Self, SignalingMessage) {
        let mut peer = Self {
            connection: relay.open().await,
        };
        peer.send(SignalingMessage::Join(room.to_string())).await;
        let reply = peer.next_message().await;
        (peer, reply)
    }

    pub async fn send(&self, message: SignalingMessage) {
        self.connection
            .client
            .send(message)
            .await
            .expect("raw peer send failed");
    }

    /// Next relay message; panics on disconnect or timeout
    pub async fn next_message(&mut self) -> SignalingMessage {
        match tokio::time::timeout(STEP_TIMEOUT, self.connection.events.recv()).await {
            Ok(Some(RelayEvent::Message(message))) => message,
            Ok(other) => panic!("Expected relay message, got {:?}", other),
            Err(_) => panic!("Timed out waiting for relay message"),
        }
    }

    /// Skip messages until one satisfies `predicate`
    pub async fn next_matching<F>(&mut self, predicate: F) -> SignalingMessage
    where
        F: Fn(&SignalingMessage) -> bool,
    {
        loop {
            let message = self.next_message().await;
            if predicate(&message) {
                return message;
            }
        }
    }
}

/// Wait for a notification satisfying `predicate`, collecting everything seen
pub async fn wait_for_notification<F>(
    notifications: &mut mpsc::UnboundedReceiver<Notification>,
    seen: &mut Vec<Notification>,
    predicate: F,
) -> Notification
where
    F: Fn(&Notification) -> bool,
{
    let wait = async {
        loop {
            match notifications.recv().await {
                Some(notification) => {
                    seen.push(notification.clone());
                    if predicate(&notification) {
                        return notification;
                    }
                }
                None => panic!("Notification stream ended; saw {:?}", seen),
            }
        }
    };
    match tokio::time::timeout(STEP_TIMEOUT, wait).await {
        Ok(notification) => notification,
        Err(_) => panic!("Timed out waiting for notification"),
    }
}
