// src/io/waveshare/tcp.rs
//
// Waveshare TCP connection manager.
//
// Architecture:
//   - One TcpStream per connection, split into read/write halves
//   - The write half sits behind a tokio Mutex so concurrent senders never
//     interleave partial frames
//   - A spawned connection task owns the read half, runs the receive loop,
//     and reconnects after a backoff when the link drops
//   - State transitions go through one guarded watch channel; socket I/O is
//     never performed while holding it
//   - Each connect() starts a session with its own shutdown watch; close()
//     flips it, and every read, write and backoff sleep selects on it

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex, Notify};
use tokio::task::JoinHandle;

use super::codec::WaveshareCodec;
use super::framer::wire_frames;
use crate::io::codec::FrameCodec;
use crate::io::error::IoError;
use crate::io::{BridgeEvent, CanDevice, CanFrame, ConnectionState};

// ============================================================================
// Configuration
// ============================================================================

/// Connection options
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Reconnect automatically after an unexpected disconnect
    pub reconnect: bool,
    /// Delay before each reconnect attempt
    pub backoff: Duration,
    /// Give up on a connect attempt after this long
    pub connect_timeout: Duration,
    /// Stop reconnecting after this many failed attempts (None = never stop)
    pub max_reconnect_attempts: Option<u32>,
    /// Capacity of the frame and event broadcast channels
    pub channel_capacity: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            reconnect: true,
            backoff: Duration::from_millis(1000),
            connect_timeout: Duration::from_millis(5000),
            max_reconnect_attempts: None,
            channel_capacity: 256,
        }
    }
}

// ============================================================================
// Shared connection state
// ============================================================================

/// Write side of the live connection. `lost` wakes that connection's
/// receive loop when a write fails; each connection gets its own.
struct Link {
    writer: OwnedWriteHalf,
    lost: Arc<Notify>,
}

struct Shared {
    device: String,
    host: String,
    port: u16,
    options: ConnectOptions,
    state: watch::Sender<ConnectionState>,
    writer: Mutex<Option<Link>>,
    frames: broadcast::Sender<CanFrame>,
    events: broadcast::Sender<BridgeEvent>,
    /// Shutdown signal of the current session. Replaced on every connect(),
    /// which also cancels whatever listened on the previous one.
    session: std::sync::Mutex<watch::Sender<bool>>,
}

impl Shared {
    /// Move to `to` only if the current state is one of `from`.
    fn transition(&self, from: &[ConnectionState], to: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if from.contains(state) {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Start a new session, cancelling the previous one.
    fn new_session(&self) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        if let Ok(mut session) = self.session.lock() {
            *session = tx;
        }
        rx
    }

    /// Shutdown receiver for the current session.
    fn session(&self) -> watch::Receiver<bool> {
        match self.session.lock() {
            Ok(session) => session.subscribe(),
            // Poisoned: a dropped sender reads as cancelled
            Err(_) => watch::channel(true).1,
        }
    }

    fn shutdown(&self) {
        if let Ok(session) = self.session.lock() {
            session.send_replace(true);
        }
    }

    /// Drop the write half, but only if it still belongs to the connection
    /// identified by `lost`. Returns false when another connection owns it.
    async fn release_link(&self, lost: &Arc<Notify>) -> bool {
        let mut guard = self.writer.lock().await;
        match guard.as_ref() {
            Some(link) if !Arc::ptr_eq(&link.lost, lost) => false,
            _ => {
                guard.take();
                true
            }
        }
    }

    fn emit(&self, event: BridgeEvent) {
        let _ = self.events.send(event);
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn open_stream(&self) -> Result<TcpStream, IoError> {
        let connect = TcpStream::connect((self.host.as_str(), self.port));

        let stream = match tokio::time::timeout(self.options.connect_timeout, connect).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => return Err(IoError::connection(&self.device, e.to_string())),
            Err(_) => {
                return Err(IoError::connection(
                    &self.device,
                    format!(
                        "timed out after {}ms",
                        self.options.connect_timeout.as_millis()
                    ),
                ))
            }
        };

        // Frames are tiny; don't let Nagle hold them back
        if let Err(e) = stream.set_nodelay(true) {
            tlog!("[waveshare_tcp] {}: failed to set TCP_NODELAY: {}", self.device, e);
        }

        Ok(stream)
    }

    /// Hand a fresh socket to the connection. Returns None if a close won
    /// the race, in which case the socket is dropped here.
    async fn install(&self, stream: TcpStream) -> Option<(OwnedReadHalf, Arc<Notify>)> {
        let (reader, writer) = stream.into_split();
        let lost = Arc::new(Notify::new());

        let mut guard = self.writer.lock().await;
        if !self.transition(&[ConnectionState::Connecting], ConnectionState::Connected) {
            return None;
        }
        *guard = Some(Link {
            writer,
            lost: lost.clone(),
        });
        drop(guard);

        tlog!("[waveshare_tcp] Connected to {}", self.address());
        self.emit(BridgeEvent::Connected {
            address: self.address(),
        });

        Some((reader, lost))
    }
}

/// Resolves once shutdown has been requested (or the client is gone).
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// Client for a Waveshare CAN-to-Ethernet gateway in TCP server mode.
pub struct WaveshareClient {
    shared: Arc<Shared>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WaveshareClient {
    /// Create a disconnected client. No I/O happens until `connect`.
    pub fn new(host: impl Into<String>, port: u16, options: ConnectOptions) -> Self {
        let host = host.into();
        let capacity = options.channel_capacity.max(1);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (session, _) = watch::channel(true);
        let (frames, _) = broadcast::channel(capacity);
        let (events, _) = broadcast::channel(capacity);

        Self {
            shared: Arc::new(Shared {
                device: format!("waveshare_tcp({}:{})", host, port),
                host,
                port,
                options,
                state,
                writer: Mutex::new(None),
                frames,
                events,
                session: std::sync::Mutex::new(session),
            }),
            task: std::sync::Mutex::new(None),
        }
    }

    /// Open the TCP connection and start the receive loop.
    pub async fn connect(&self) -> Result<(), IoError> {
        let shared = &self.shared;
        if !shared.transition(&[ConnectionState::Disconnected], ConnectionState::Connecting) {
            return Err(IoError::AlreadyConnected);
        }
        let mut shutdown = shared.new_session();

        tlog!(
            "[waveshare_tcp] Connecting to {} (timeout: {}ms)",
            shared.address(),
            shared.options.connect_timeout.as_millis()
        );

        let result = tokio::select! {
            result = shared.open_stream() => result,
            _ = cancelled(&mut shutdown) => Err(IoError::NotConnected),
        };

        let stream = match result {
            Ok(s) => s,
            Err(e) => {
                shared.transition(&[ConnectionState::Connecting], ConnectionState::Disconnected);
                tlog!("[waveshare_tcp] {}", e);
                return Err(e);
            }
        };

        let (reader, lost) = shared.install(stream).await.ok_or(IoError::NotConnected)?;

        let handle = tokio::spawn(run_connection(shared.clone(), reader, lost, shutdown));
        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }

        Ok(())
    }

    /// Encode and write one frame.
    ///
    /// The whole 13-byte frame is written under the writer lock, so frames
    /// from concurrent callers never interleave. A failed write tears the
    /// connection down (and reconnects, if enabled).
    pub async fn send(&self, frame: &CanFrame) -> Result<(), IoError> {
        let bytes = WaveshareCodec::encode(frame)?;

        if self.state() != ConnectionState::Connected {
            return Err(IoError::NotConnected);
        }

        let shared = &self.shared;
        let mut shutdown = shared.session();

        let mut guard = tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => return Err(IoError::NotConnected),
            guard = shared.writer.lock() => guard,
        };
        let link = guard.as_mut().ok_or(IoError::NotConnected)?;

        let result = tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => return Err(IoError::NotConnected),
            result = link.writer.write_all(&bytes) => result,
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                let err = IoError::write(&shared.device, e.to_string());
                tlog!("[waveshare_tcp] {}", err);
                if let Some(link) = guard.take() {
                    link.lost.notify_one();
                }
                Err(err)
            }
        }
    }

    /// Stop the receive loop, cancel any pending reconnect, and release the socket.
    ///
    /// Closing a client that is already disconnected does nothing.
    pub async fn close(&self) {
        let shared = &self.shared;
        let handle = self.task.lock().ok().and_then(|mut task| task.take());
        let was_active = shared.transition(
            &[ConnectionState::Connected, ConnectionState::Connecting],
            ConnectionState::Closing,
        );

        if handle.is_none() && !was_active {
            return;
        }

        shared.shutdown();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tlog!("[waveshare_tcp] connection task ended abnormally: {}", e);
            }
        }

        // Dropping the write half shuts the socket down
        shared.writer.lock().await.take();
        shared.state.send_replace(ConnectionState::Disconnected);

        if was_active {
            tlog!("[waveshare_tcp] Closed connection to {}", shared.address());
            shared.emit(BridgeEvent::Disconnected {
                reason: "closed".to_string(),
            });
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Subscribe to received frames. Only frames arriving after this call are seen.
    pub fn subscribe(&self) -> broadcast::Receiver<CanFrame> {
        self.shared.frames.subscribe()
    }

    /// Received frames as a stream. Gaps from a slow consumer are skipped
    /// and reported as `BridgeEvent::Lagged`.
    pub fn frames(&self) -> impl Stream<Item = CanFrame> + Send + 'static {
        let rx = self.shared.frames.subscribe();
        let events = self.shared.events.clone();

        stream::unfold(rx, move |mut rx| {
            let events = events.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(frame) => return Some((frame, rx)),
                        Err(RecvError::Lagged(skipped)) => {
                            let _ = events.send(BridgeEvent::Lagged { skipped });
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        })
    }

    /// Subscribe to connection events
    pub fn events(&self) -> broadcast::Receiver<BridgeEvent> {
        self.shared.events.subscribe()
    }

    /// `host:port` of the gateway
    pub fn address(&self) -> String {
        self.shared.address()
    }
}

impl Drop for WaveshareClient {
    fn drop(&mut self) {
        // Let the connection task wind down and release the socket
        self.shared.shutdown();
    }
}

#[async_trait]
impl CanDevice for WaveshareClient {
    async fn send(&self, frame: &CanFrame) -> Result<(), IoError> {
        WaveshareClient::send(self, frame).await
    }

    fn subscribe(&self) -> broadcast::Receiver<CanFrame> {
        WaveshareClient::subscribe(self)
    }

    fn events(&self) -> broadcast::Receiver<BridgeEvent> {
        WaveshareClient::events(self)
    }

    fn state(&self) -> ConnectionState {
        WaveshareClient::state(self)
    }

    async fn close(&self) {
        WaveshareClient::close(self).await
    }

    fn device_type(&self) -> &'static str {
        "waveshare_tcp"
    }
}

/// Create a client and connect it.
pub async fn connect(
    host: impl Into<String>,
    port: u16,
    options: ConnectOptions,
) -> Result<WaveshareClient, IoError> {
    let client = WaveshareClient::new(host, port, options);
    client.connect().await?;
    Ok(client)
}

// ============================================================================
// Connection task
// ============================================================================

enum LoopExit {
    Shutdown,
    Lost(String),
}

/// Runs for the lifetime of a connect() call: receive loop, then
/// reconnect attempts, until shutdown or reconnection gives up.
async fn run_connection(
    shared: Arc<Shared>,
    reader: OwnedReadHalf,
    lost: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut link = (reader, lost);

    loop {
        let (reader, lost) = link;
        let reason = match receive_loop(&shared, reader, &lost, &mut shutdown).await {
            LoopExit::Shutdown => return,
            LoopExit::Lost(reason) => reason,
        };

        // Read half is gone; drop the write half too
        let owned = tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => return,
            owned = shared.release_link(&lost) => owned,
        };
        if !owned {
            return;
        }

        if !shared.transition(&[ConnectionState::Connected], ConnectionState::Disconnected) {
            return;
        }
        tlog!("[waveshare_tcp] Disconnected from {}: {}", shared.address(), reason);
        shared.emit(BridgeEvent::Disconnected { reason });

        if !shared.options.reconnect {
            return;
        }

        link = match reconnect(&shared, &mut shutdown).await {
            Some(link) => link,
            None => return,
        };
    }
}

/// Read frames until the connection ends. Malformed frames are dropped.
async fn receive_loop(
    shared: &Shared,
    reader: OwnedReadHalf,
    lost: &Notify,
    shutdown: &mut watch::Receiver<bool>,
) -> LoopExit {
    let frames = wire_frames(reader, shared.device.clone());
    futures::pin_mut!(frames);

    loop {
        tokio::select! {
            biased;
            _ = cancelled(shutdown) => return LoopExit::Shutdown,
            _ = lost.notified() => return LoopExit::Lost("write failed".to_string()),
            item = frames.next() => match item {
                Some(Ok(raw)) => match WaveshareCodec::decode(&raw) {
                    Ok(frame) => {
                        // No subscribers is not an error
                        let _ = shared.frames.send(frame);
                    }
                    Err(e) => {
                        tlog!(
                            "[waveshare_tcp] Dropping malformed frame {}: {}",
                            hex::encode_upper(raw),
                            e
                        );
                        shared.emit(BridgeEvent::DroppedFrame { error: e.to_string() });
                    }
                },
                Some(Err(e)) => return LoopExit::Lost(e.to_string()),
                None => return LoopExit::Lost("connection closed by peer".to_string()),
            },
        }
    }
}

/// Retry the connection after the configured backoff. Returns None when
/// shut down, when a close wins the race, or when attempts run out.
async fn reconnect(
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<(OwnedReadHalf, Arc<Notify>)> {
    let backoff = shared.options.backoff;
    let mut attempt: u32 = 0;

    loop {
        if let Some(max) = shared.options.max_reconnect_attempts {
            if attempt >= max {
                tlog!(
                    "[waveshare_tcp] Giving up on {} after {} attempts",
                    shared.address(),
                    attempt
                );
                shared.emit(BridgeEvent::GaveUp { attempts: attempt });
                return None;
            }
        }
        attempt += 1;

        shared.emit(BridgeEvent::Reconnecting {
            attempt,
            delay_ms: backoff.as_millis() as u64,
        });

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = cancelled(shutdown) => return None,
        }

        if !shared.transition(&[ConnectionState::Disconnected], ConnectionState::Connecting) {
            return None;
        }
        tlog!(
            "[waveshare_tcp] Reconnecting to {} (attempt {})",
            shared.address(),
            attempt
        );

        let result = tokio::select! {
            result = shared.open_stream() => result,
            _ = cancelled(shutdown) => return None,
        };

        match result {
            Ok(stream) => return shared.install(stream).await,
            Err(e) => {
                if !shared.transition(&[ConnectionState::Connecting], ConnectionState::Disconnected) {
                    return None;
                }
                tlog!("[waveshare_tcp] Reconnect attempt {} failed: {}", attempt, e);
                shared.emit(BridgeEvent::ReconnectFailed {
                    attempt,
                    error: e.to_string(),
                });
            }
        }
    }
}
