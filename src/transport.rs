/*!
# UMICP Transport Layer

Abstract transport contract consumed by the protocol orchestrator, plus an
in-process loopback transport. Concrete network transports (WebSocket,
HTTP/2) implement [`Transport`] out of tree; the loopback stands in for
them in tests and single-process deployments.
*/

use crate::envelope::Envelope;
use crate::error::{Result, UmicpError};
use crate::frame::Frame;
use crate::types::{TransportConfig, TransportStats, TransportType};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Callback invoked for every inbound message
pub type MessageCallback = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Callback invoked on connect/disconnect; the second argument carries an
/// error description when the transition was not requested
pub type ConnectionCallback = Box<dyn Fn(bool, Option<&str>) + Send + Sync>;

/// Callback invoked when the transport reports an error
pub type ErrorCallback = Box<dyn Fn(&UmicpError) + Send + Sync>;

/// Capability set every transport implements. Implementations own their I/O
/// threads and invoke callbacks from them; all methods take `&self` and
/// must be safe to call from any thread.
pub trait Transport: Send + Sync {
    fn connect(&self) -> Result<()>;
    fn disconnect(&self) -> Result<()>;
    fn is_connected(&self) -> bool;

    /// Queue raw bytes for delivery. May block on I/O.
    fn send(&self, data: &[u8]) -> Result<()>;

    fn configure(&self, config: TransportConfig) -> Result<()>;
    fn get_config(&self) -> TransportConfig;
    fn get_type(&self) -> TransportType;
    fn get_endpoint(&self) -> String;

    fn set_message_callback(&self, callback: MessageCallback);
    fn set_connection_callback(&self, callback: ConnectionCallback);
    fn set_error_callback(&self, callback: ErrorCallback);

    fn get_stats(&self) -> TransportStats;
    fn reset_stats(&self);

    /// Serialize an envelope with the canonical JSON codec and send it
    fn send_envelope(&self, envelope: &Envelope) -> Result<()> {
        self.send(envelope.serialize()?.as_bytes())
    }

    /// Serialize a frame with the binary codec and send it
    fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.send(&frame.serialize()?)
    }
}

#[derive(Default)]
struct Callbacks {
    on_message: Option<MessageCallback>,
    on_connection: Option<ConnectionCallback>,
    on_error: Option<ErrorCallback>,
}

struct LoopbackInner {
    endpoint: String,
    connected: AtomicBool,
    config: RwLock<TransportConfig>,
    callbacks: RwLock<Callbacks>,
    sent_log: Mutex<Vec<Vec<u8>>>,
    peer: Mutex<Weak<LoopbackInner>>,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    last_activity_ms: AtomicU64,
}

impl LoopbackInner {
    fn new(endpoint: &str) -> Self {
        LoopbackInner {
            endpoint: endpoint.to_string(),
            connected: AtomicBool::new(false),
            config: RwLock::new(TransportConfig {
                transport_type: TransportType::Direct,
                ..Default::default()
            }),
            callbacks: RwLock::new(Callbacks::default()),
            sent_log: Mutex::new(Vec::new()),
            peer: Mutex::new(Weak::new()),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        self.last_activity_ms.store(now, Ordering::Relaxed);
    }

    fn deliver(&self, data: &[u8]) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(data.len() as u64, Ordering::Relaxed);
        self.touch();
        let callbacks = self.callbacks.read();
        if let Some(on_message) = &callbacks.on_message {
            on_message(data);
        }
    }
}

/// In-process transport. Messages sent on one end are recorded in a local
/// log and, when paired, delivered synchronously to the other end's message
/// callback.
#[derive(Clone)]
pub struct LoopbackTransport {
    inner: Arc<LoopbackInner>,
}

impl LoopbackTransport {
    pub fn new(endpoint: &str) -> Self {
        LoopbackTransport {
            inner: Arc::new(LoopbackInner::new(endpoint)),
        }
    }

    /// Two linked endpoints: what one sends, the other receives
    pub fn pair(endpoint_a: &str, endpoint_b: &str) -> (Self, Self) {
        let a = LoopbackTransport::new(endpoint_a);
        let b = LoopbackTransport::new(endpoint_b);
        *a.inner.peer.lock() = Arc::downgrade(&b.inner);
        *b.inner.peer.lock() = Arc::downgrade(&a.inner);
        (a, b)
    }

    /// Push inbound bytes into this endpoint, as a remote peer would
    pub fn inject_message(&self, data: &[u8]) {
        self.inner.deliver(data);
    }

    /// Drain the log of messages sent through this endpoint
    pub fn drain_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.inner.sent_log.lock())
    }

    /// Number of messages sent through this endpoint so far
    pub fn sent_count(&self) -> usize {
        self.inner.sent_log.lock().len()
    }
}

impl Transport for LoopbackTransport {
    fn connect(&self) -> Result<()> {
        self.inner.connected.store(true, Ordering::SeqCst);
        self.inner.touch();
        let callbacks = self.inner.callbacks.read();
        if let Some(on_connection) = &callbacks.on_connection {
            on_connection(true, None);
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.inner.connected.store(false, Ordering::SeqCst);
        let callbacks = self.inner.callbacks.read();
        if let Some(on_connection) = &callbacks.on_connection {
            on_connection(false, None);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn send(&self, data: &[u8]) -> Result<()> {
        if !self.is_connected() {
            let err = UmicpError::network(format!("{} is not connected", self.inner.endpoint));
            let callbacks = self.inner.callbacks.read();
            if let Some(on_error) = &callbacks.on_error {
                on_error(&err);
            }
            return Err(err);
        }

        if let Some(max) = self.inner.config.read().max_payload_size {
            if data.len() > max {
                return Err(UmicpError::network(format!(
                    "Payload of {} bytes exceeds the transport limit of {}",
                    data.len(),
                    max
                )));
            }
        }

        self.inner.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.inner
            .bytes_sent
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        self.inner.touch();
        self.inner.sent_log.lock().push(data.to_vec());

        if let Some(peer) = self.inner.peer.lock().upgrade() {
            if peer.connected.load(Ordering::SeqCst) {
                peer.deliver(data);
            }
        }
        Ok(())
    }

    fn configure(&self, config: TransportConfig) -> Result<()> {
        *self.inner.config.write() = config;
        Ok(())
    }

    fn get_config(&self) -> TransportConfig {
        self.inner.config.read().clone()
    }

    fn get_type(&self) -> TransportType {
        self.inner.config.read().transport_type
    }

    fn get_endpoint(&self) -> String {
        self.inner.endpoint.clone()
    }

    fn set_message_callback(&self, callback: MessageCallback) {
        self.inner.callbacks.write().on_message = Some(callback);
    }

    fn set_connection_callback(&self, callback: ConnectionCallback) {
        self.inner.callbacks.write().on_connection = Some(callback);
    }

    fn set_error_callback(&self, callback: ErrorCallback) {
        self.inner.callbacks.write().on_error = Some(callback);
    }

    fn get_stats(&self) -> TransportStats {
        TransportStats {
            messages_sent: self.inner.messages_sent.load(Ordering::Relaxed),
            messages_received: self.inner.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.inner.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.inner.bytes_received.load(Ordering::Relaxed),
            last_activity_ms: self.inner.last_activity_ms.load(Ordering::Relaxed),
        }
    }

    fn reset_stats(&self) {
        self.inner.messages_sent.store(0, Ordering::Relaxed);
        self.inner.messages_received.store(0, Ordering::Relaxed);
        self.inner.bytes_sent.store(0, Ordering::Relaxed);
        self.inner.bytes_received.store(0, Ordering::Relaxed);
    }
}
