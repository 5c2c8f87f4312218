// tests/common/mod.rs
//
// Fake Waveshare gateway for integration tests.
//
// Accepts one client at a time, records every 13-byte frame the client
// writes and echoes it back. Tests wait on the connection counter instead
// of sleeping.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

pub const FRAME_LEN: usize = 13;

pub struct FakeGateway {
    addr: SocketAddr,
    client: Arc<Mutex<Option<OwnedWriteHalf>>>,
    connections: watch::Receiver<usize>,
    received: Mutex<mpsc::UnboundedReceiver<[u8; FRAME_LEN]>>,
    task: JoinHandle<()>,
}

impl FakeGateway {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client: Arc<Mutex<Option<OwnedWriteHalf>>> = Arc::new(Mutex::new(None));
        let (count_tx, connections) = watch::channel(0usize);
        let (received_tx, received_rx) = mpsc::unbounded_channel();

        let client_slot = client.clone();
        let task = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                let (mut reader, writer) = stream.into_split();
                *client_slot.lock().await = Some(writer);
                count_tx.send_modify(|count| *count += 1);

                let mut buf = [0u8; FRAME_LEN];
                while reader.read_exact(&mut buf).await.is_ok() {
                    let _ = received_tx.send(buf);
                    let mut guard = client_slot.lock().await;
                    if let Some(writer) = guard.as_mut() {
                        let _ = writer.write_all(&buf).await;
                    }
                }

                client_slot.lock().await.take();
            }
        });

        Self {
            addr,
            client,
            connections,
            received: Mutex::new(received_rx),
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn connection_count(&self) -> usize {
        *self.connections.borrow()
    }

    /// Wait until at least `count` clients have connected.
    pub async fn wait_for_connections(&self, count: usize, timeout: Duration) -> bool {
        let mut connections = self.connections.clone();
        tokio::time::timeout(timeout, connections.wait_for(|c| *c >= count))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    /// Write raw bytes to the connected client.
    pub async fn push(&self, bytes: &[u8]) {
        assert!(
            self.wait_for_connections(1, Duration::from_secs(5)).await,
            "no client connected"
        );
        let mut guard = self.client.lock().await;
        let writer = guard.as_mut().expect("client disconnected");
        writer.write_all(bytes).await.unwrap();
    }

    /// Next frame the client wrote, if one arrives in time.
    pub async fn received(&self, timeout: Duration) -> Option<[u8; FRAME_LEN]> {
        let mut rx = self.received.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    /// Close the client's socket from the gateway side.
    pub async fn drop_client(&self) {
        if let Some(mut writer) = self.client.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }

    /// Stop listening and drop any client.
    pub async fn shutdown(&self) {
        self.task.abort();
        self.drop_client().await;
    }
}

impl Drop for FakeGateway {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Build the wire bytes the gateway expects for a frame.
pub fn raw_frame(id: u32, data: &[u8], extended: bool, rtr: bool) -> [u8; FRAME_LEN] {
    let mut buf = [0u8; FRAME_LEN];
    buf[0] = (if extended { 0x80 } else { 0 }) | (if rtr { 0x40 } else { 0 }) | data.len() as u8;
    buf[1..5].copy_from_slice(&id.to_be_bytes());
    buf[5..5 + data.len()].copy_from_slice(data);
    buf
}
