//! Connection manager for a single live room.
//!
//! [`DanmakuClient::start`] connects, registers, and then drives two loops
//! concurrently until [`DanmakuClient::stop`] is called:
//!
//! - the heartbeat loop writes [`HEARTBEAT_FRAME`] on a fixed interval and
//!   ignores every failure;
//! - the receive loop decodes inbound buffers, classifies each frame and
//!   pushes the events to the output queue. When the inbound stream ends it
//!   drains, reconnects and resumes, indefinitely.
//!
//! Only the receive loop ever replaces the transport; the heartbeat just
//! writes to whatever transport is current.

use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::classify::classify_frame;
use crate::codec::{
    HEARTBEAT_FRAME, build_registration_frame_with_version, parse_frames_with_report,
};
use crate::config::ClientConfig;
use crate::error::{DanmakuError, Result};
use crate::resolver::{BilibiliRoomResolver, RoomResolver};
use crate::room::RoomRef;
use crate::sink::EventSink;
use crate::state::{ConnectionState, StateMachine};
use crate::stats::{ClientStats, StatsSnapshot};
use crate::transport::{Connector, FrameSink, InboundStream, Transport, WebSocketConnector};

/// Streams normalized events of one room into an [`EventSink`].
pub struct DanmakuClient {
    room: RoomRef,
    config: ClientConfig,
    client_id: u64,
    resolver: Arc<dyn RoomResolver>,
    connector: Arc<dyn Connector>,
    events: Arc<dyn EventSink>,
    /// Write half of the current session. Replaced wholesale on reconnect.
    transport: Mutex<Option<Box<dyn FrameSink>>>,
    state: StateMachine,
    stats: ClientStats,
    cancel: CancellationToken,
}

impl DanmakuClient {
    /// Client for `room` (id or URL) with the default configuration.
    pub fn new(room: &str, events: impl EventSink + 'static) -> Result<Self> {
        Self::with_config(room, ClientConfig::default(), events)
    }

    pub fn with_config(
        room: &str,
        config: ClientConfig,
        events: impl EventSink + 'static,
    ) -> Result<Self> {
        let resolver = BilibiliRoomResolver::new(&config)?;
        Self::with_components(
            room,
            config,
            Arc::new(resolver),
            Arc::new(WebSocketConnector::new()),
            Arc::new(events),
        )
    }

    /// Client with explicit collaborators.
    pub fn with_components(
        room: &str,
        config: ClientConfig,
        resolver: Arc<dyn RoomResolver>,
        connector: Arc<dyn Connector>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;
        let room = RoomRef::parse(room)?;
        let client_id = config.resolve_client_id();

        Ok(Self {
            room,
            config,
            client_id,
            resolver,
            connector,
            events,
            transport: Mutex::new(None),
            state: StateMachine::new(),
            stats: ClientStats::default(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn room(&self) -> &RoomRef {
        &self.room
    }

    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    /// Observe connection state transitions.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.state.current()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Connect and run until stopped.
    ///
    /// Connection failures never end this call; they are retried after
    /// `reconnect_delay`. Returns once [`stop`](Self::stop) was requested or
    /// the output queue was closed.
    pub async fn start(&self) -> Result<()> {
        match self.state.current() {
            ConnectionState::Disconnected => {}
            state if state.is_terminal() => return Ok(()),
            other => {
                return Err(DanmakuError::other(format!(
                    "client for room {} already running ({})",
                    self.room, other
                )));
            }
        }

        info!(room = %self.room, client_id = self.client_id, "Starting danmaku client");

        if let Some(inbound) = self.connect_until_ready().await {
            self.state.transition(ConnectionState::Connected);
            tokio::join!(self.heartbeat_loop(), self.receive_loop(inbound));
        }

        self.shutdown().await;
        debug!(room = %self.room, "Danmaku client stopped");
        Ok(())
    }

    /// Request shutdown. Both loops exit at their next suspension point and
    /// the transport is closed.
    pub async fn stop(&self) {
        self.shutdown().await;
    }

    async fn shutdown(&self) {
        self.cancel.cancel();
        self.close_transport().await;
        self.state.transition(ConnectionState::Stopped);
    }

    /// Resolve, connect and register, retrying until it works or we are stopped.
    async fn connect_until_ready(&self) -> Option<InboundStream> {
        loop {
            if self.cancel.is_cancelled() || !self.state.transition(ConnectionState::Connecting) {
                return None;
            }

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                result = self.establish() => result,
            };

            match result {
                Ok(inbound) => return Some(inbound),
                Err(e) => {
                    warn!(room = %self.room, error = %e, "Failed to connect");
                    self.state.transition(ConnectionState::Draining);
                    if !self.pause().await {
                        return None;
                    }
                }
            }
        }
    }

    async fn establish(&self) -> Result<InboundStream> {
        let info = self.resolver.resolve(&self.room).await?;
        let Transport { mut sink, inbound } = self.connector.connect(&info.ws_url).await?;

        let registration = build_registration_frame_with_version(
            info.room_id,
            self.client_id,
            self.config.protocol_version,
        )?;
        if let Err(e) = sink.send(registration).await {
            let _ = sink.close().await;
            return Err(e);
        }

        if let Some(mut previous) = self.transport.lock().await.replace(sink) {
            let _ = previous.close().await;
        }

        info!(room = %self.room, room_id = info.room_id, "Registered to room");
        Ok(inbound)
    }

    async fn close_transport(&self) {
        if let Some(mut sink) = self.transport.lock().await.take()
            && let Err(e) = sink.close().await
        {
            debug!(error = %e, "Error while closing transport");
        }
    }

    /// Sleep for the reconnect delay. Returns `false` if stopped meanwhile.
    async fn pause(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.config.reconnect_delay()) => true,
        }
    }

    async fn heartbeat_loop(&self) {
        let period = self.config.heartbeat_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.send_heartbeat().await,
            }
        }
    }

    async fn send_heartbeat(&self) {
        let mut transport = self.transport.lock().await;
        let Some(sink) = transport.as_mut() else {
            trace!(room = %self.room, "No transport, heartbeat skipped");
            self.stats.record_heartbeat(false);
            return;
        };

        match sink.send(Bytes::from_static(HEARTBEAT_FRAME)).await {
            Ok(()) => {
                trace!("Sent heartbeat for {}", self.room);
                self.stats.record_heartbeat(true);
            }
            Err(e) => {
                debug!(room = %self.room, error = %e, "Heartbeat failed");
                self.stats.record_heartbeat(false);
            }
        }
    }

    async fn receive_loop(&self, mut inbound: InboundStream) {
        loop {
            loop {
                let next = tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    next = inbound.next() => next,
                };

                match next {
                    Some(Ok(buffer)) => {
                        let handled = tokio::select! {
                            _ = self.cancel.cancelled() => return,
                            handled = self.handle_buffer(buffer) => handled,
                        };
                        if let Err(e) = handled {
                            info!(room = %self.room, error = %e, "Output queue closed, stopping");
                            self.cancel.cancel();
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(room = %self.room, error = %e, "Transport error");
                        break;
                    }
                    None => {
                        warn!(room = %self.room, "Inbound stream closed");
                        break;
                    }
                }
            }

            if self.cancel.is_cancelled() {
                return;
            }

            self.state.transition(ConnectionState::Draining);
            self.stats.record_reconnect();
            self.close_transport().await;
            drop(inbound);

            if !self.pause().await {
                return;
            }
            inbound = match self.connect_until_ready().await {
                Some(inbound) => inbound,
                None => return,
            };
            if !self.pause().await {
                return;
            }
            self.state.transition(ConnectionState::Connected);
        }
    }

    /// Decode one inbound buffer and enqueue its events in order.
    ///
    /// Only a closed output queue is an error.
    async fn handle_buffer(&self, buffer: Bytes) -> Result<()> {
        let (frames, report) = parse_frames_with_report(&buffer);
        self.stats.record_buffer(frames.len(), &report);
        if report.dropped() > 0 || report.corrupt {
            debug!(room = %self.room, ?report, "Frames lost while decoding buffer");
        }

        for frame in &frames {
            match classify_frame(frame) {
                Ok(classified) => {
                    self.events.push(classified.stamp(Utc::now())).await?;
                    self.stats.record_event();
                }
                Err(e) => {
                    if e.is_per_message() {
                        debug!(op = frame.operation, error = %e, "Dropping message");
                    } else {
                        warn!(
                            op = frame.operation,
                            error = %e,
                            "Unexpected error, dropping message"
                        );
                    }
                    self.stats.record_dropped_message();
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{build_packet, op, parse_frames};
    use crate::event::MessageType;
    use crate::resolver::{RoomInfo, StaticRoomResolver};
    use crate::transport::testing::{FakeConnector, FakeSession};
    use async_trait::async_trait;
    use bytes::BytesMut;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    use crate::event::DanmuEvent;

    const ROOM_ID: u64 = 21452505;

    fn room_info() -> RoomInfo {
        RoomInfo {
            ws_url: "ws://fake/sub".to_string(),
            room_id: ROOM_ID,
        }
    }

    fn config() -> ClientConfig {
        ClientConfig {
            client_id: Some(123),
            ..Default::default()
        }
    }

    fn chat_packet(content: &str) -> Bytes {
        let json = serde_json::json!({
            "cmd": "DANMU_MSG",
            "info": [[0, 1, 25, 16777215, 0], content, [1, "viewer"]]
        });
        build_packet(&serde_json::to_vec(&json).unwrap(), op::NOTIFICATION)
    }

    fn concat(packets: &[Bytes]) -> Bytes {
        let mut buf = BytesMut::new();
        for p in packets {
            buf.extend_from_slice(p);
        }
        buf.freeze()
    }

    struct Harness {
        client: Arc<DanmakuClient>,
        connector: FakeConnector,
        rx: mpsc::UnboundedReceiver<DanmuEvent>,
        handle: JoinHandle<Result<()>>,
    }

    fn spawn_with(
        resolver: Arc<dyn RoomResolver>,
        connector: FakeConnector,
        config: ClientConfig,
    ) -> Harness {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::new(
            DanmakuClient::with_components(
                "https://live.bilibili.com/6",
                config,
                resolver,
                Arc::new(connector.clone()),
                Arc::new(tx),
            )
            .unwrap(),
        );
        let handle = tokio::spawn({
            let client = client.clone();
            async move { client.start().await }
        });
        Harness {
            client,
            connector,
            rx,
            handle,
        }
    }

    fn spawn(connector: FakeConnector) -> Harness {
        spawn_with(Arc::new(StaticRoomResolver(room_info())), connector, config())
    }

    async fn wait_connected(client: &DanmakuClient) {
        let mut state = client.state();
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
    }

    fn ops(session: &FakeSession) -> Vec<u32> {
        session
            .sent
            .lock()
            .iter()
            .flat_map(|f| parse_frames(f))
            .map(|f| f.operation)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_registers_on_connect() {
        let connector = FakeConnector::default();
        let session = connector.push_session();
        let h = spawn(connector);
        wait_connected(&h.client).await;

        let sent = session.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        let frame = parse_frames(&sent[0]).remove(0);
        assert_eq!(frame.operation, op::AUTH);
        let body: serde_json::Value = serde_json::from_slice(&frame.payload).unwrap();
        assert_eq!(body["roomid"], ROOM_ID);
        assert_eq!(body["uid"], 123);
        assert_eq!(body["protover"], 2);
        assert_eq!(h.connector.urls.lock().as_slice(), ["ws://fake/sub"]);

        h.client.stop().await;
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_preserve_buffer_order() {
        let connector = FakeConnector::default();
        let session = connector.push_session();
        let mut h = spawn(connector);

        let gift = build_packet(br#"{"cmd":"SEND_GIFT","data":{}}"#, op::NOTIFICATION);
        let popularity = build_packet(&[0, 0, 0, 9], op::HEARTBEAT_REPLY);
        session
            .inbound_tx
            .send(Ok(concat(&[chat_packet("first"), gift, popularity])))
            .unwrap();

        let kinds: Vec<_> = [
            h.rx.recv().await.unwrap(),
            h.rx.recv().await.unwrap(),
            h.rx.recv().await.unwrap(),
        ]
        .iter()
        .map(DanmuEvent::msg_type)
        .collect();
        assert_eq!(
            kinds,
            [MessageType::Chat, MessageType::Gift, MessageType::Other]
        );

        h.client.stop().await;
        h.handle.await.unwrap().unwrap();
        assert_eq!(h.client.stats().events, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_message_is_dropped_and_counted() {
        let connector = FakeConnector::default();
        let session = connector.push_session();
        let mut h = spawn(connector);

        let broken = build_packet(b"{not json", op::NOTIFICATION);
        session
            .inbound_tx
            .send(Ok(concat(&[chat_packet("a"), broken, chat_packet("b")])))
            .unwrap();

        assert_eq!(h.rx.recv().await.unwrap().content(), "a");
        assert_eq!(h.rx.recv().await.unwrap().content(), "b");

        let stats = h.client.stats();
        assert_eq!(stats.frames, 3);
        assert_eq!(stats.events, 2);
        assert_eq!(stats.dropped_messages, 1);
        assert_eq!(h.client.current_state(), ConnectionState::Connected);

        h.client.stop().await;
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_without_embedded_time_are_stamped() {
        let connector = FakeConnector::default();
        let session = connector.push_session();
        let mut h = spawn(connector);

        let before = Utc::now();
        session.inbound_tx.send(Ok(chat_packet("x"))).unwrap();
        let event = h.rx.recv().await.unwrap();
        assert!(event.received_at >= before);

        h.client.stop().await;
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_when_stream_ends() {
        let connector = FakeConnector::default();
        let first = connector.push_session();
        let second = connector.push_session();
        let mut h = spawn(connector);

        let mut state = h.client.state();
        let recorder = tokio::spawn(async move {
            let mut seen = Vec::new();
            while state.changed().await.is_ok() {
                let current = *state.borrow_and_update();
                seen.push(current);
                if current == ConnectionState::Stopped {
                    break;
                }
            }
            seen
        });

        first.inbound_tx.send(Ok(chat_packet("before"))).unwrap();
        assert_eq!(h.rx.recv().await.unwrap().content(), "before");

        drop(first.inbound_tx);
        second.inbound_tx.send(Ok(chat_packet("after"))).unwrap();
        assert_eq!(h.rx.recv().await.unwrap().content(), "after");

        assert_eq!(h.connector.connects(), 2);
        assert!(first.closed.load(Ordering::SeqCst));
        assert_eq!(ops(&second), [op::AUTH]);
        assert_eq!(h.client.stats().reconnects, 1);
        assert_eq!(h.client.current_state(), ConnectionState::Connected);

        h.client.stop().await;
        h.handle.await.unwrap().unwrap();

        let seen = recorder.await.unwrap();
        let draining = seen
            .iter()
            .position(|s| *s == ConnectionState::Draining)
            .expect("never drained");
        assert_eq!(
            &seen[draining..],
            [
                ConnectionState::Draining,
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Stopped,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_cadence() {
        let connector = FakeConnector::default();
        let session = connector.push_session();
        let h = spawn(connector);
        wait_connected(&h.client).await;

        tokio::time::sleep(Duration::from_secs(19)).await;
        assert_eq!(ops(&session), [op::AUTH]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ops(&session), [op::AUTH, op::HEARTBEAT]);
        assert_eq!(session.sent.lock()[1], Bytes::from_static(HEARTBEAT_FRAME));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(h.client.stats().heartbeats_sent, 2);

        h.client.stop().await;
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_failures_are_swallowed() {
        let connector = FakeConnector::default();
        let first = connector.push_session();
        let second = connector.push_session();
        let mut h = spawn(connector);
        wait_connected(&h.client).await;

        first.broken.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(45)).await;
        let stats = h.client.stats();
        assert_eq!(stats.heartbeats_failed, 2);
        assert_eq!(stats.heartbeats_sent, 0);
        assert_eq!(h.client.current_state(), ConnectionState::Connected);

        // The receive side notices the dead session and reconnects; heartbeats
        // then succeed on the new transport.
        drop(first.inbound_tx);
        second.inbound_tx.send(Ok(chat_packet("back"))).unwrap();
        assert_eq!(h.rx.recv().await.unwrap().content(), "back");

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert!(h.client.stats().heartbeats_sent >= 1);
        assert!(ops(&second).contains(&op::HEARTBEAT));

        h.client.stop().await;
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_skipped_while_disconnected() {
        let connector = FakeConnector::default();
        let mut first = connector.push_session();
        let h = spawn(connector);
        wait_connected(&h.client).await;

        // Every reconnect attempt is refused until a session is queued.
        drop(std::mem::replace(
            &mut first.inbound_tx,
            mpsc::unbounded_channel().0,
        ));
        tokio::time::sleep(Duration::from_secs(45)).await;

        let stats = h.client.stats();
        assert_eq!(stats.heartbeats_failed, 2);
        assert_eq!(stats.heartbeats_sent, 0);
        assert_eq!(stats.reconnects, 1);
        assert!(matches!(
            h.client.current_state(),
            ConnectionState::Draining | ConnectionState::Connecting
        ));
        assert_eq!(ops(&first), [op::AUTH]);

        let second = h.connector.push_session();
        wait_connected(&h.client).await;
        tokio::time::sleep(Duration::from_secs(21)).await;

        assert!(h.client.stats().heartbeats_sent >= 1);
        assert_eq!(ops(&second)[0], op::AUTH);
        assert!(ops(&second).contains(&op::HEARTBEAT));

        h.client.stop().await;
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_closes_transport() {
        let connector = FakeConnector::default();
        let session = connector.push_session();
        let h = spawn(connector);
        wait_connected(&h.client).await;

        h.client.stop().await;
        h.handle.await.unwrap().unwrap();

        assert!(session.closed.load(Ordering::SeqCst));
        assert_eq!(h.client.current_state(), ConnectionState::Stopped);

        // A stopped client does not start again.
        h.client.start().await.unwrap();
        assert_eq!(h.connector.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_reconnecting() {
        let connector = FakeConnector::default();
        let session = connector.push_session();
        let h = spawn(connector);
        wait_connected(&h.client).await;

        // No second session: every reconnect attempt is refused.
        drop(session.inbound_tx);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.connector.connects() > 2);
        assert_ne!(h.client.current_state(), ConnectionState::Connected);

        h.client.stop().await;
        h.handle.await.unwrap().unwrap();
        assert_eq!(h.client.current_state(), ConnectionState::Stopped);

        let attempts = h.connector.connects();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.connector.connects(), attempts);
    }

    struct FlakyResolver {
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl RoomResolver for FlakyResolver {
        async fn resolve(&self, _room: &RoomRef) -> Result<RoomInfo> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(DanmakuError::connection("room lookup failed"));
            }
            Ok(room_info())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolution_failure_is_retried() {
        let connector = FakeConnector::default();
        let session = connector.push_session();
        let resolver = Arc::new(FlakyResolver {
            failures_left: AtomicUsize::new(3),
        });
        let mut h = spawn_with(resolver, connector, config());

        session.inbound_tx.send(Ok(chat_packet("finally"))).unwrap();
        assert_eq!(h.rx.recv().await.unwrap().content(), "finally");
        assert_eq!(h.connector.connects(), 1);

        h.client.stop().await;
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_queue_stops_client() {
        let connector = FakeConnector::default();
        let session = connector.push_session();
        let h = spawn(connector);
        wait_connected(&h.client).await;

        drop(h.rx);
        session.inbound_tx.send(Ok(chat_packet("nobody"))).unwrap();

        h.handle.await.unwrap().unwrap();
        assert_eq!(h.client.current_state(), ConnectionState::Stopped);
        assert!(session.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let connector = FakeConnector::default();
        let _session = connector.push_session();
        let h = spawn(connector);
        wait_connected(&h.client).await;

        assert!(h.client.start().await.is_err());

        h.client.stop().await;
        h.handle.await.unwrap().unwrap();
    }

    #[test]
    fn test_rejects_invalid_room() {
        let (tx, _rx) = mpsc::unbounded_channel::<DanmuEvent>();
        let result = DanmakuClient::with_components(
            "",
            config(),
            Arc::new(StaticRoomResolver(room_info())),
            Arc::new(FakeConnector::default()),
            Arc::new(tx),
        );
        assert!(matches!(result, Err(DanmakuError::Config(_))));
    }
}
