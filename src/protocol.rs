/*!
# UMICP Protocol Orchestrator

Drives the message lifecycle across multiple registered transports: builds
envelopes, runs the serialize → compress → encrypt → frame pipeline, picks a
transport via the configured load-balancing strategy, and dispatches inbound
messages to per-operation handlers.

Wire message layout inside a frame payload (before compression and
encryption): `envelope_len: u32 LE || envelope bytes || data bytes`. The
envelope encoding follows `config.preferred_format`. The send path always
compresses before encrypting; the receive path decrypts before
decompressing.

Messages whose transformed payload exceeds `max_message_size` are split
into FRAGMENT_START/CONTINUE/END frames sharing one `stream_id` with
strictly increasing `sequence`; the receiver reassembles in order and drops
partial state on any gap.
*/

use crate::compression::CompressionManager;
use crate::envelope::Envelope;
use crate::error::{Result, UmicpError};
use crate::frame::{Frame, FrameFlags};
use crate::schema::{SchemaDefinition, SchemaRegistry};
use crate::security::SecurityManager;
use crate::serialization::{decode_envelope, encode_envelope};
use crate::transport::Transport;
use crate::types::*;
use crate::utils::format_bytes;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Handler invoked for every accepted inbound message of one operation type
pub type MessageHandler = Box<dyn Fn(&Envelope, Option<&[u8]>) + Send + Sync>;

/// Base delay before the first reconnection attempt
const RETRY_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Upper bound on the exponential reconnection backoff
const RETRY_BACKOFF_CAP: Duration = Duration::from_secs(60);

fn backoff(retry_count: u32) -> Duration {
    RETRY_BACKOFF_CAP.min(RETRY_BACKOFF_BASE * 2u32.saturating_pow(retry_count.min(16)))
}

/// Router state for one registered transport
struct TransportInfo {
    transport: Arc<dyn Transport>,
    transport_type: TransportType,
    connected: bool,
    active_connections: usize,
    message_count: u64,
    last_activity: Instant,
    subscribed_topics: HashSet<String>,
    failed: bool,
    failure_count: u64,
    last_failure: Option<Instant>,
    next_retry: Option<Instant>,
    retry_count: u32,
}

impl TransportInfo {
    fn new(transport: Arc<dyn Transport>) -> Self {
        let transport_type = transport.get_type();
        TransportInfo {
            transport,
            transport_type,
            connected: false,
            active_connections: 0,
            message_count: 0,
            last_activity: Instant::now(),
            subscribed_topics: HashSet::new(),
            failed: false,
            failure_count: 0,
            last_failure: None,
            next_retry: None,
            retry_count: 0,
        }
    }

    fn healthy(&self) -> bool {
        !self.failed
    }

    fn mark_failed(&mut self, now: Instant) {
        self.failed = true;
        self.connected = false;
        self.active_connections = 0;
        self.failure_count += 1;
        self.last_failure = Some(now);
        self.next_retry = Some(now + backoff(self.retry_count));
    }

    fn mark_recovered(&mut self) {
        self.failed = false;
        self.connected = true;
        self.active_connections = 1;
        self.retry_count = 0;
        self.next_retry = None;
        self.last_activity = Instant::now();
    }
}

/// Public snapshot of a transport's router state
#[derive(Debug, Clone)]
pub struct TransportStatus {
    pub id: String,
    pub transport_type: TransportType,
    pub connected: bool,
    pub active_connections: usize,
    pub message_count: u64,
    pub subscribed_topics: Vec<String>,
    pub failed: bool,
    pub failure_count: u64,
    pub retry_count: u32,
}

/// Map plus registration order, guarded together so id listings stay
/// consistent with membership
#[derive(Default)]
struct Router {
    entries: HashMap<String, TransportInfo>,
    order: Vec<String>,
}

impl Router {
    fn ordered_ids(&self) -> impl Iterator<Item = &String> {
        self.order.iter()
    }
}

/// Protocol statistics snapshot
#[derive(Debug, Clone)]
pub struct ProtocolStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub errors_count: u64,
    pub uptime: Duration,
}

struct Reassembly {
    next_sequence: u32,
    flags: FrameFlags,
    buffer: Vec<u8>,
}

/// The protocol orchestrator. Constructed inside an `Arc` so transport
/// callbacks can hold a weak back-reference; every method takes `&self`.
pub struct Protocol {
    self_weak: Weak<Protocol>,
    local_id: String,
    config: RwLock<UmicpConfig>,
    router: RwLock<Router>,
    global_topics: RwLock<HashSet<String>>,
    schema_registry: Arc<SchemaRegistry>,
    security: RwLock<Option<Arc<Mutex<SecurityManager>>>>,
    handlers: RwLock<HashMap<OperationType, MessageHandler>>,
    lb_strategy: RwLock<LoadBalancingStrategy>,
    failover_enabled: AtomicBool,
    round_robin_index: AtomicUsize,
    next_stream_id: AtomicU64,
    reassembly: Mutex<HashMap<u64, Reassembly>>,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    errors_count: AtomicU64,
    start_time: Instant,
}

impl Protocol {
    pub fn new(local_id: &str) -> Arc<Self> {
        Arc::new_cyclic(|weak| Protocol {
            self_weak: weak.clone(),
            local_id: local_id.to_string(),
            config: RwLock::new(UmicpConfig::default()),
            router: RwLock::new(Router::default()),
            global_topics: RwLock::new(HashSet::new()),
            schema_registry: Arc::new(SchemaRegistry::new()),
            security: RwLock::new(None),
            handlers: RwLock::new(HashMap::new()),
            lb_strategy: RwLock::new(LoadBalancingStrategy::RoundRobin),
            failover_enabled: AtomicBool::new(true),
            round_robin_index: AtomicUsize::new(0),
            next_stream_id: AtomicU64::new(1),
            reassembly: Mutex::new(HashMap::new()),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            errors_count: AtomicU64::new(0),
            start_time: Instant::now(),
        })
    }

    /// The node identity stamped into every outbound envelope
    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    // -- configuration ------------------------------------------------------

    /// Apply a configuration. Rejected while any transport is connected.
    pub fn configure(&self, config: UmicpConfig) -> Result<()> {
        if self.is_connected() {
            return Err(UmicpError::invalid_argument(
                "Cannot reconfigure while a transport is connected",
            ));
        }
        if config.version != "1.0" && config.version != "1.1" {
            return Err(UmicpError::invalid_argument(format!(
                "Unsupported protocol version '{}'",
                config.version
            )));
        }
        if config.max_message_size == 0 {
            return Err(UmicpError::invalid_argument("max_message_size must be > 0"));
        }
        if config.connection_timeout == 0 {
            return Err(UmicpError::invalid_argument("connection_timeout must be > 0"));
        }
        if config.heartbeat_interval == 0 {
            return Err(UmicpError::invalid_argument("heartbeat_interval must be > 0"));
        }
        if config.compression_threshold > config.max_message_size {
            return Err(UmicpError::invalid_argument(
                "compression_threshold cannot exceed max_message_size",
            ));
        }
        *self.config.write() = config;
        Ok(())
    }

    /// Current configuration
    pub fn get_config(&self) -> UmicpConfig {
        self.config.read().clone()
    }

    // -- transport management ----------------------------------------------

    /// Register a transport under a unique id and wire its callbacks into
    /// the router
    pub fn add_transport(
        &self,
        transport: Arc<dyn Transport>,
        transport_id: &str,
    ) -> Result<()> {
        {
            let mut router = self.router.write();
            if router.entries.contains_key(transport_id) {
                return Err(UmicpError::invalid_argument(format!(
                    "Transport '{}' is already registered",
                    transport_id
                )));
            }
            router
                .entries
                .insert(transport_id.to_string(), TransportInfo::new(transport.clone()));
            router.order.push(transport_id.to_string());
        }

        let weak = self.self_weak.clone();
        let id = transport_id.to_string();
        transport.set_message_callback(Box::new({
            let weak = weak.clone();
            let id = id.clone();
            move |data: &[u8]| {
                if let Some(protocol) = weak.upgrade() {
                    protocol.on_transport_message(&id, data);
                }
            }
        }));
        transport.set_connection_callback(Box::new({
            let weak = weak.clone();
            let id = id.clone();
            move |connected: bool, error: Option<&str>| {
                if let Some(protocol) = weak.upgrade() {
                    protocol.on_transport_connection(&id, connected, error);
                }
            }
        }));
        transport.set_error_callback(Box::new(move |error: &UmicpError| {
            if let Some(protocol) = weak.upgrade() {
                protocol.on_transport_error(&id, error);
            }
        }));

        debug!(transport = transport_id, "transport registered");
        Ok(())
    }

    /// Configure a transport, then register it
    pub fn add_configured_transport(
        &self,
        transport: Arc<dyn Transport>,
        config: TransportConfig,
        transport_id: &str,
    ) -> Result<()> {
        transport.configure(config)?;
        self.add_transport(transport, transport_id)
    }

    /// Remove a transport from the router
    pub fn remove_transport(&self, transport_id: &str) -> Result<()> {
        let mut router = self.router.write();
        router.entries.remove(transport_id).ok_or_else(|| {
            UmicpError::invalid_argument(format!("Unknown transport '{}'", transport_id))
        })?;
        router.order.retain(|id| id != transport_id);
        Ok(())
    }

    /// Connect a single transport by id
    pub fn connect_transport(&self, transport_id: &str) -> Result<()> {
        let transport = self.transport_handle(transport_id)?;
        match transport.connect() {
            Ok(()) => {
                let mut router = self.router.write();
                if let Some(entry) = router.entries.get_mut(transport_id) {
                    entry.mark_recovered();
                }
                Ok(())
            }
            Err(e) => {
                self.note_transport_failure(transport_id);
                Err(e)
            }
        }
    }

    /// Disconnect a single transport by id
    pub fn disconnect_transport(&self, transport_id: &str) -> Result<()> {
        let transport = self.transport_handle(transport_id)?;
        transport.disconnect()?;
        let mut router = self.router.write();
        if let Some(entry) = router.entries.get_mut(transport_id) {
            entry.connected = false;
            entry.active_connections = 0;
        }
        Ok(())
    }

    /// Connect every registered transport. Succeeds when at least one comes
    /// up; individual failures feed the failover machinery.
    pub fn connect(&self) -> Result<()> {
        let ids = self.get_transport_ids();
        if ids.is_empty() {
            return Err(UmicpError::network("No transports registered"));
        }
        let mut connected = 0usize;
        for id in &ids {
            if self.connect_transport(id).is_ok() {
                connected += 1;
            }
        }
        if connected == 0 {
            return Err(UmicpError::network("No transport could connect"));
        }
        Ok(())
    }

    /// Disconnect every registered transport
    pub fn disconnect(&self) -> Result<()> {
        for id in self.get_transport_ids() {
            let _ = self.disconnect_transport(&id);
        }
        Ok(())
    }

    /// True when any registered transport is connected
    pub fn is_connected(&self) -> bool {
        self.router.read().entries.values().any(|entry| entry.connected)
    }

    /// Registered transport ids in insertion order
    pub fn get_transport_ids(&self) -> Vec<String> {
        self.router.read().ordered_ids().cloned().collect()
    }

    /// Router-state snapshot for one transport
    pub fn get_transport_status(&self, transport_id: &str) -> Result<TransportStatus> {
        let router = self.router.read();
        let entry = router.entries.get(transport_id).ok_or_else(|| {
            UmicpError::invalid_argument(format!("Unknown transport '{}'", transport_id))
        })?;
        let mut topics: Vec<String> = entry.subscribed_topics.iter().cloned().collect();
        topics.sort();
        Ok(TransportStatus {
            id: transport_id.to_string(),
            transport_type: entry.transport_type,
            connected: entry.connected,
            active_connections: entry.active_connections,
            message_count: entry.message_count,
            subscribed_topics: topics,
            failed: entry.failed,
            failure_count: entry.failure_count,
            retry_count: entry.retry_count,
        })
    }

    fn transport_handle(&self, transport_id: &str) -> Result<Arc<dyn Transport>> {
        self.router
            .read()
            .entries
            .get(transport_id)
            .map(|entry| entry.transport.clone())
            .ok_or_else(|| {
                UmicpError::invalid_argument(format!("Unknown transport '{}'", transport_id))
            })
    }

    // -- topic routing ------------------------------------------------------

    /// Subscribe one transport to a topic, or every transport (plus the
    /// global set) when `transport_id` is `None`
    pub fn subscribe_topic(&self, topic: &str, transport_id: Option<&str>) -> Result<()> {
        let mut router = self.router.write();
        match transport_id {
            Some(id) => {
                let entry = router.entries.get_mut(id).ok_or_else(|| {
                    UmicpError::invalid_argument(format!("Unknown transport '{}'", id))
                })?;
                entry.subscribed_topics.insert(topic.to_string());
            }
            None => {
                for entry in router.entries.values_mut() {
                    entry.subscribed_topics.insert(topic.to_string());
                }
                self.global_topics.write().insert(topic.to_string());
            }
        }
        Ok(())
    }

    /// Remove a topic from every transport and the global set
    pub fn unsubscribe_topic(&self, topic: &str) -> Result<()> {
        let mut router = self.router.write();
        for entry in router.entries.values_mut() {
            entry.subscribed_topics.remove(topic);
        }
        self.global_topics.write().remove(topic);
        Ok(())
    }

    /// Topics with at least one subscription, sorted
    pub fn get_subscribed_topics(&self) -> Vec<String> {
        let router = self.router.read();
        let mut topics: HashSet<String> = self.global_topics.read().iter().cloned().collect();
        for entry in router.entries.values() {
            topics.extend(entry.subscribed_topics.iter().cloned());
        }
        let mut topics: Vec<String> = topics.into_iter().collect();
        topics.sort();
        topics
    }

    /// Publish data to one transport subscribed to `topic`, selected by the
    /// load-balancing policy. Returns the generated message id.
    pub fn publish_topic(
        &self,
        topic: &str,
        data: &[u8],
        hint: Option<PayloadHint>,
    ) -> Result<String> {
        let envelope = Envelope::builder()
            .from(&self.local_id)
            .to(topic)
            .operation(OperationType::Data)
            .capability("topic", topic)
            .payload_hint(hint.unwrap_or_else(|| PayloadHint {
                payload_type: PayloadType::Binary,
                size: Some(data.len() as u64),
                encoding: None,
                count: None,
            }))
            .build()?;
        self.dispatch_outbound(envelope, Some(data), Some(topic))
    }

    // -- load balancing and failover ---------------------------------------

    pub fn set_load_balancing_strategy(&self, strategy: LoadBalancingStrategy) {
        *self.lb_strategy.write() = strategy;
    }

    pub fn get_load_balancing_strategy(&self) -> LoadBalancingStrategy {
        *self.lb_strategy.read()
    }

    pub fn set_failover_enabled(&self, enabled: bool) {
        self.failover_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_failover_enabled(&self) -> bool {
        self.failover_enabled.load(Ordering::SeqCst)
    }

    /// Transition a transport to the failed state and schedule its retry
    pub fn mark_transport_failed(&self, transport_id: &str) -> Result<()> {
        let mut router = self.router.write();
        let entry = router.entries.get_mut(transport_id).ok_or_else(|| {
            UmicpError::invalid_argument(format!("Unknown transport '{}'", transport_id))
        })?;
        entry.mark_failed(Instant::now());
        warn!(
            transport = transport_id,
            failures = entry.failure_count,
            "transport marked failed"
        );
        Ok(())
    }

    /// Attempt reconnection of every failed transport whose backoff has
    /// elapsed
    pub fn retry_failed_transports(&self) -> Result<()> {
        let now = Instant::now();
        let due: Vec<(String, Arc<dyn Transport>)> = {
            let router = self.router.read();
            router
                .entries
                .iter()
                .filter(|(_, entry)| {
                    entry.failed && entry.next_retry.map(|at| now >= at).unwrap_or(true)
                })
                .map(|(id, entry)| (id.clone(), entry.transport.clone()))
                .collect()
        };

        for (id, transport) in due {
            match transport.connect() {
                Ok(()) => {
                    let mut router = self.router.write();
                    if let Some(entry) = router.entries.get_mut(&id) {
                        entry.mark_recovered();
                        debug!(transport = id.as_str(), "transport recovered");
                    }
                }
                Err(_) => {
                    let mut router = self.router.write();
                    if let Some(entry) = router.entries.get_mut(&id) {
                        entry.retry_count += 1;
                        entry.next_retry = Some(Instant::now() + backoff(entry.retry_count));
                        debug!(
                            transport = id.as_str(),
                            retries = entry.retry_count,
                            "retry failed"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Ids of transports currently in the failed state, in insertion order
    pub fn get_failed_transport_ids(&self) -> Vec<String> {
        let router = self.router.read();
        router
            .ordered_ids()
            .filter(|id| router.entries.get(*id).map(|e| e.failed).unwrap_or(false))
            .cloned()
            .collect()
    }

    /// Ids of healthy transports, in insertion order
    pub fn get_healthy_transport_ids(&self) -> Vec<String> {
        let router = self.router.read();
        router
            .ordered_ids()
            .filter(|id| router.entries.get(*id).map(|e| e.healthy()).unwrap_or(false))
            .cloned()
            .collect()
    }

    /// Candidate ids for a send: healthy, connected, and (when given) on
    /// the topic. Insertion order is preserved for deterministic tie-breaks.
    fn candidates(&self, topic: Option<&str>) -> Vec<String> {
        let router = self.router.read();
        let global = topic
            .map(|t| self.global_topics.read().contains(t))
            .unwrap_or(false);
        router
            .ordered_ids()
            .filter(|id| {
                let Some(entry) = router.entries.get(*id) else {
                    return false;
                };
                if !entry.healthy() || !entry.connected {
                    return false;
                }
                match topic {
                    Some(t) => global || entry.subscribed_topics.contains(t),
                    None => true,
                }
            })
            .cloned()
            .collect()
    }

    fn select_transport(&self, candidates: &[String]) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        let strategy = *self.lb_strategy.read();
        let picked = match strategy {
            LoadBalancingStrategy::RoundRobin => {
                let index = self.round_robin_index.fetch_add(1, Ordering::Relaxed);
                candidates[index % candidates.len()].clone()
            }
            LoadBalancingStrategy::LeastConnections => {
                let router = self.router.read();
                let minimum = candidates
                    .iter()
                    .filter_map(|id| router.entries.get(id))
                    .map(|entry| entry.active_connections)
                    .min()?;
                let tied: Vec<&String> = candidates
                    .iter()
                    .filter(|id| {
                        router
                            .entries
                            .get(*id)
                            .map(|entry| entry.active_connections == minimum)
                            .unwrap_or(false)
                    })
                    .collect();
                let index = self.round_robin_index.fetch_add(1, Ordering::Relaxed);
                tied[index % tied.len()].clone()
            }
            LoadBalancingStrategy::Random => {
                let index = rand::thread_rng().gen_range(0..candidates.len());
                candidates[index].clone()
            }
            LoadBalancingStrategy::Weighted => {
                let router = self.router.read();
                let weights: Vec<usize> = candidates
                    .iter()
                    .map(|id| {
                        router
                            .entries
                            .get(id)
                            .map(|entry| {
                                entry.transport.get_config().weight.unwrap_or(1).max(1) as usize
                            })
                            .unwrap_or(1)
                    })
                    .collect();
                let total: usize = weights.iter().sum();
                let mut slot = self.round_robin_index.fetch_add(1, Ordering::Relaxed) % total;
                let mut chosen = candidates.len() - 1;
                for (index, weight) in weights.iter().enumerate() {
                    if slot < *weight {
                        chosen = index;
                        break;
                    }
                    slot -= weight;
                }
                candidates[chosen].clone()
            }
        };
        Some(picked)
    }

    // -- security and schema -----------------------------------------------

    /// Attach the security manager used for payload encryption
    pub fn set_security_manager(&self, security: Arc<Mutex<SecurityManager>>) {
        *self.security.write() = Some(security);
    }

    /// Whether the attached security manager holds an authenticated session
    pub fn is_authenticated(&self) -> bool {
        self.security
            .read()
            .as_ref()
            .map(|security| security.lock().is_authenticated())
            .unwrap_or(false)
    }

    /// The schema registry gating message acceptance
    pub fn get_schema_registry(&self) -> Arc<SchemaRegistry> {
        self.schema_registry.clone()
    }

    /// Register a schema with the internal registry
    pub fn register_message_schema(&self, schema: SchemaDefinition) -> Result<()> {
        self.schema_registry.register_schema(schema)
    }

    /// Validate a message body against a registered schema, folding an
    /// invalid verdict into an error
    pub fn validate_message_with_schema(
        &self,
        schema_id: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<()> {
        let verdict = self
            .schema_registry
            .validate_message(schema_id, data, content_type)?;
        if !verdict.valid {
            return Err(UmicpError::envelope(
                verdict
                    .error_message
                    .unwrap_or_else(|| "schema validation failed".to_string()),
            ));
        }
        Ok(())
    }

    // -- message sending ----------------------------------------------------

    /// Send a control message. `command` and `params` travel as capability
    /// metadata. Returns the generated message id.
    pub fn send_control(
        &self,
        to: &str,
        op: OperationType,
        command: &str,
        params: Option<&str>,
    ) -> Result<String> {
        let mut builder = Envelope::builder()
            .from(&self.local_id)
            .to(to)
            .operation(op)
            .capability("command", command);
        if let Some(params) = params {
            builder = builder.capability("params", params);
        }
        self.dispatch_outbound(builder.build()?, None, None)
    }

    /// Send a data payload. Returns the generated message id.
    pub fn send_data(&self, to: &str, data: &[u8], hint: Option<PayloadHint>) -> Result<String> {
        let hint = hint.unwrap_or_else(|| PayloadHint {
            payload_type: PayloadType::Binary,
            size: Some(data.len() as u64),
            encoding: None,
            count: None,
        });
        let envelope = Envelope::builder()
            .from(&self.local_id)
            .to(to)
            .operation(OperationType::Data)
            .payload_hint(hint)
            .build()?;
        self.dispatch_outbound(envelope, Some(data), None)
    }

    /// Acknowledge a previously received message
    pub fn send_ack(&self, to: &str, original_message_id: &str) -> Result<String> {
        let envelope = Envelope::builder()
            .from(&self.local_id)
            .to(to)
            .operation(OperationType::Ack)
            .capability("original_msg_id", original_message_id)
            .build()?;
        self.dispatch_outbound(envelope, None, None)
    }

    /// Report an error to a peer, carrying the stable numeric code
    pub fn send_error(
        &self,
        to: &str,
        error: &UmicpError,
        original_message_id: Option<&str>,
    ) -> Result<String> {
        let mut builder = Envelope::builder()
            .from(&self.local_id)
            .to(to)
            .operation(OperationType::Error)
            .capability("code", &error.code().to_string())
            .capability("message", &error.to_string());
        if let Some(id) = original_message_id {
            builder = builder.capability("original_msg_id", id);
        }
        self.dispatch_outbound(builder.build()?, None, None)
    }

    /// The full outbound pipeline: encode, compress, encrypt, frame,
    /// select a transport, send
    fn dispatch_outbound(
        &self,
        envelope: Envelope,
        payload: Option<&[u8]>,
        topic: Option<&str>,
    ) -> Result<String> {
        let message_id = envelope.message_id().to_string();
        let config = self.config.read().clone();

        // envelope_len || envelope || data
        let envelope_bytes = encode_envelope(&envelope, config.preferred_format)?;
        let mut body =
            Vec::with_capacity(4 + envelope_bytes.len() + payload.map_or(0, <[u8]>::len));
        body.extend_from_slice(&(envelope_bytes.len() as u32).to_le_bytes());
        body.extend_from_slice(&envelope_bytes);
        if let Some(payload) = payload {
            body.extend_from_slice(payload);
        }

        let mut flags = FrameFlags::empty();

        if config.enable_compression
            && CompressionManager::should_compress(
                &body,
                config.compression_threshold,
                config.compression_algorithm,
            )
        {
            let manager = CompressionManager::new(config.compression_algorithm);
            let compressed = manager.compress(&body, None)?;
            debug!(
                before = format_bytes(body.len() as u64).as_str(),
                after = format_bytes(compressed.len() as u64).as_str(),
                "payload compressed"
            );
            body = compressed;
            flags |= FrameFlags::COMPRESSED_GZIP;
        }

        if config.require_encryption {
            let security = self.security.read().clone().ok_or_else(|| {
                UmicpError::authentication("Encryption required but no security manager attached")
            })?;
            let guard = security.lock();
            if !guard.has_session() {
                return Err(UmicpError::authentication(
                    "Encryption required but no session established",
                ));
            }
            body = guard.encrypt_data(&body)?;
            flags |= FrameFlags::ENCRYPTED_XCHACHA20;
        }

        let stream_id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let frames = build_frames(stream_id, flags, body, config.max_message_size)?;

        let payload_len: usize = frames.iter().map(|f| f.payload.len()).sum();
        let mut wire = Vec::with_capacity(frames.len());
        for frame in &frames {
            wire.push(frame.serialize()?);
        }

        self.send_frames(&wire, payload_len, topic)?;
        Ok(message_id)
    }

    /// Route serialized frames through a selected transport, failing over
    /// to remaining candidates when permitted
    fn send_frames(&self, wire: &[Vec<u8>], payload_len: usize, topic: Option<&str>) -> Result<()> {
        let failover = self.is_failover_enabled();
        let mut excluded: HashSet<String> = HashSet::new();

        loop {
            let candidates: Vec<String> = self
                .candidates(topic)
                .into_iter()
                .filter(|id| !excluded.contains(id))
                .collect();
            let Some(chosen) = self.select_transport(&candidates) else {
                self.errors_count.fetch_add(1, Ordering::Relaxed);
                return Err(UmicpError::network("No transport available"));
            };

            let transport = self.transport_handle(&chosen)?;
            let result = wire.iter().try_for_each(|bytes| transport.send(bytes));
            match result {
                Ok(()) => {
                    let total: usize = wire.iter().map(Vec::len).sum();
                    self.messages_sent.fetch_add(1, Ordering::Relaxed);
                    self.bytes_sent.fetch_add(total as u64, Ordering::Relaxed);
                    let mut router = self.router.write();
                    if let Some(entry) = router.entries.get_mut(&chosen) {
                        entry.message_count += 1;
                        entry.last_activity = Instant::now();
                    }
                    debug!(
                        transport = chosen.as_str(),
                        frames = wire.len(),
                        bytes = payload_len,
                        "message sent"
                    );
                    return Ok(());
                }
                Err(e) => {
                    self.errors_count.fetch_add(1, Ordering::Relaxed);
                    if !failover {
                        return Err(e);
                    }
                    let _ = self.mark_transport_failed(&chosen);
                    excluded.insert(chosen);
                }
            }
        }
    }

    // -- message receiving --------------------------------------------------

    /// Register the handler for one operation type, replacing any previous
    /// registration
    pub fn register_handler(&self, op: OperationType, handler: MessageHandler) {
        self.handlers.write().insert(op, handler);
    }

    /// Remove the handler for one operation type
    pub fn unregister_handler(&self, op: OperationType) {
        self.handlers.write().remove(&op);
    }

    /// The full inbound pipeline: frame-decode, reassemble, decrypt,
    /// decompress, envelope-decode, validate, schema-gate, dispatch
    pub fn process_message(&self, data: &[u8]) -> Result<()> {
        match self.process_inner(data) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.errors_count.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    fn process_inner(&self, data: &[u8]) -> Result<()> {
        let frame = Frame::deserialize(data)?;

        let (flags, mut body) = if frame.is_fragmented() {
            match self.reassemble(frame)? {
                Some(complete) => complete,
                None => return Ok(()), // waiting for more fragments
            }
        } else {
            (frame.header.flags, frame.payload)
        };

        if flags.contains(FrameFlags::ENCRYPTED_XCHACHA20) {
            let security = self.security.read().clone().ok_or_else(|| {
                UmicpError::authentication("Encrypted message but no security manager attached")
            })?;
            body = security.lock().decrypt_data(&body)?;
        }

        if flags.intersects(FrameFlags::COMPRESSION_MASK) {
            let algorithm = self.config.read().compression_algorithm;
            let manager = CompressionManager::new(algorithm);
            body = manager.decompress(&body)?;
        }

        if body.len() < 4 {
            return Err(UmicpError::frame("Message body too small for envelope length"));
        }
        let envelope_len = u32::from_le_bytes(body[..4].try_into().expect("4-byte slice")) as usize;
        if body.len() < 4 + envelope_len {
            return Err(UmicpError::frame(format!(
                "Envelope length {} exceeds message body of {} bytes",
                envelope_len,
                body.len() - 4
            )));
        }

        let format = self.config.read().preferred_format;
        let envelope = decode_envelope(&body[4..4 + envelope_len], format)?;
        envelope.validate()?;

        let payload = &body[4 + envelope_len..];
        let payload = (!payload.is_empty()).then_some(payload);

        if let Some(schema_id) = envelope.schema_uri() {
            let content_type = match format {
                ContentType::Json => "json",
                ContentType::Cbor | ContentType::Msgpack => "cbor",
            };
            let verdict = self.schema_registry.validate_message(
                schema_id,
                payload.unwrap_or_default(),
                content_type,
            )?;
            if !verdict.valid {
                return Err(UmicpError::envelope(
                    verdict
                        .error_message
                        .unwrap_or_else(|| "schema validation failed".to_string()),
                ));
            }
        }

        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(data.len() as u64, Ordering::Relaxed);

        let handlers = self.handlers.read();
        if let Some(handler) = handlers.get(&envelope.operation()) {
            handler(&envelope, payload);
        } else {
            debug!(op = %envelope.operation(), "no handler registered");
        }
        Ok(())
    }

    /// In-order reassembly of one fragment. Returns the completed flags and
    /// body when the END fragment arrives.
    fn reassemble(&self, frame: Frame) -> Result<Option<(FrameFlags, Vec<u8>)>> {
        let stream_id = frame.header.stream_id;
        let mut streams = self.reassembly.lock();

        if frame.has_flag(FrameFlags::FRAGMENT_START) {
            streams.insert(
                stream_id,
                Reassembly {
                    next_sequence: frame.header.sequence + 1,
                    flags: frame.header.flags & !FrameFlags::FRAGMENT_MASK,
                    buffer: frame.payload,
                },
            );
            return Ok(None);
        }

        let Some(mut state) = streams.remove(&stream_id) else {
            return Err(UmicpError::frame(format!(
                "Fragment for unknown stream {}",
                stream_id
            )));
        };
        if frame.header.sequence != state.next_sequence {
            return Err(UmicpError::frame(format!(
                "Out-of-order fragment on stream {}: expected {}, got {}",
                stream_id, state.next_sequence, frame.header.sequence
            )));
        }

        crate::buffer::BufferManager::append(&mut state.buffer, &frame.payload)?;

        if frame.has_flag(FrameFlags::FRAGMENT_END) {
            return Ok(Some((state.flags, state.buffer)));
        }
        state.next_sequence += 1;
        streams.insert(stream_id, state);
        Ok(None)
    }

    // -- transport callbacks ------------------------------------------------

    /// Feed a connect/send failure into the failover machinery when enabled
    fn note_transport_failure(&self, transport_id: &str) {
        if self.is_failover_enabled() {
            let _ = self.mark_transport_failed(transport_id);
        }
    }

    fn on_transport_message(&self, transport_id: &str, data: &[u8]) {
        {
            let mut router = self.router.write();
            if let Some(entry) = router.entries.get_mut(transport_id) {
                entry.message_count += 1;
                entry.last_activity = Instant::now();
            }
        }
        if let Err(e) = self.process_message(data) {
            warn!(transport = transport_id, error = %e, "inbound message rejected");
        }
    }

    fn on_transport_connection(&self, transport_id: &str, connected: bool, error: Option<&str>) {
        let mut router = self.router.write();
        let Some(entry) = router.entries.get_mut(transport_id) else {
            return;
        };
        if connected {
            entry.mark_recovered();
        } else {
            entry.connected = false;
            entry.active_connections = 0;
            if error.is_some() && self.is_failover_enabled() {
                entry.mark_failed(Instant::now());
            }
        }
    }

    fn on_transport_error(&self, transport_id: &str, error: &UmicpError) {
        warn!(transport = transport_id, error = %error, "transport error");
        if self.is_failover_enabled() {
            let _ = self.mark_transport_failed(transport_id);
        }
    }

    // -- statistics ---------------------------------------------------------

    pub fn get_stats(&self) -> ProtocolStats {
        ProtocolStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            errors_count: self.errors_count.load(Ordering::Relaxed),
            uptime: self.start_time.elapsed(),
        }
    }

    pub fn reset_stats(&self) {
        self.messages_sent.store(0, Ordering::Relaxed);
        self.messages_received.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
        self.errors_count.store(0, Ordering::Relaxed);
    }
}

/// Split a message body into frames. Bodies within `max_message_size` map
/// to a single unfragmented frame; larger bodies become a
/// START/CONTINUE/END sequence with increasing sequence numbers.
fn build_frames(
    stream_id: u64,
    flags: FrameFlags,
    body: Vec<u8>,
    max_message_size: usize,
) -> Result<Vec<Frame>> {
    let frame_type = 1u8;
    if body.len() <= max_message_size {
        let frame = Frame::builder()
            .frame_type(frame_type)
            .stream_id(stream_id)
            .sequence(1)
            .flags(flags)
            .payload(body)
            .build()?;
        return Ok(vec![frame]);
    }

    let chunks: Vec<&[u8]> = body.chunks(max_message_size).collect();
    let last = chunks.len() - 1;
    let mut frames = Vec::with_capacity(chunks.len());
    for (index, chunk) in chunks.iter().enumerate() {
        let fragment_flag = if index == 0 {
            FrameFlags::FRAGMENT_START
        } else if index == last {
            FrameFlags::FRAGMENT_END
        } else {
            FrameFlags::FRAGMENT_CONTINUE
        };
        let frame = Frame::builder()
            .frame_type(frame_type)
            .stream_id(stream_id)
            .sequence(index as u32 + 1)
            .flags(flags | fragment_flag)
            .payload(chunk.to_vec())
            .build()?;
        frames.push(frame);
    }
    Ok(frames)
}
