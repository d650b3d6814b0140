/*!
# Integration Tests for UMICP Core

End-to-end coverage of the envelope and frame codecs, the encrypted send
path, round-robin distribution, and transport failover.
*/

use parking_lot::Mutex;
use std::sync::Arc;
use umicp_core::*;

#[test]
fn test_envelope_json_round_trip() {
    let envelope = Envelope::builder()
        .from("A")
        .to("B")
        .operation(OperationType::Data)
        .message_id("m1")
        .timestamp("2025-01-10T10:00:00.000Z")
        .build()
        .unwrap();

    let serialized = envelope.serialize().unwrap();
    let deserialized = Envelope::deserialize(&serialized).unwrap();
    assert_eq!(deserialized, envelope);
    assert!(deserialized.validate().is_ok());
}

#[test]
fn test_envelope_round_trips_in_every_codec() -> anyhow::Result<()> {
    let envelope = Envelope::builder()
        .from("node-a")
        .to("node-b")
        .operation(OperationType::Ack)
        .capability("original_msg_id", "m1")
        .accept(vec!["application/cbor".to_string()])
        .build()?;

    let json = envelope.serialize()?;
    assert_eq!(Envelope::deserialize(&json)?, envelope);

    let cbor = serialization::serialize_envelope_cbor(&envelope)?;
    assert_eq!(serialization::deserialize_envelope_cbor(&cbor)?, envelope);

    let msgpack = serialization::serialize_envelope_msgpack(&envelope)?;
    assert_eq!(
        serialization::deserialize_envelope_msgpack(&msgpack)?,
        envelope
    );
    Ok(())
}

#[test]
fn test_envelope_hash_is_stable() {
    let build = || {
        Envelope::builder()
            .from("A")
            .to("B")
            .operation(OperationType::Data)
            .message_id("m1")
            .timestamp("2025-01-10T10:00:00.000Z")
            .build()
            .unwrap()
    };
    assert_eq!(build().hash().unwrap(), build().hash().unwrap());
}

#[test]
fn test_frame_binary_round_trip() {
    let frame = Frame::builder()
        .frame_type(1)
        .stream_id(12345)
        .sequence(1)
        .payload(vec![0x01, 0x02, 0x03, 0x04, 0x05])
        .build()
        .unwrap();

    let bytes = frame.serialize().unwrap();
    assert_eq!(bytes.len(), 25);
    assert_eq!(
        &bytes[..FRAME_HEADER_SIZE],
        &[
            0x01, 0x01, 0x00, 0x00, 0x39, 0x30, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00,
            0x00, 0x00, 0x05, 0x00, 0x00, 0x00
        ]
    );
    assert_eq!(Frame::deserialize(&bytes).unwrap(), frame);
}

#[test]
fn test_vector_addition_sanity() {
    let matrix = Matrix::new();
    let mut result = vec![0.0f32; 4];
    matrix
        .vector_add(&[1.0, 2.0, 3.0, 4.0], &[5.0, 6.0, 7.0, 8.0], &mut result)
        .unwrap();
    assert_eq!(result, vec![6.0, 8.0, 10.0, 12.0]);
    assert_eq!(
        matrix
            .dot_product(&[1.0, 2.0, 3.0, 4.0], &[5.0, 6.0, 7.0, 8.0])
            .unwrap(),
        70.0
    );
}

/// Build two peered security managers with a converged session
fn established_session() -> (SecurityManager, SecurityManager) {
    let mut a = SecurityManager::new("node-a");
    let mut b = SecurityManager::new("node-b");
    a.generate_keypair().unwrap();
    b.generate_keypair().unwrap();
    let a_pub = a.public_key().unwrap();
    let b_pub = b.public_key().unwrap();
    a.set_peer_public_key(&b_pub).unwrap();
    b.set_peer_public_key(&a_pub).unwrap();
    a.establish_session("node-b").unwrap();
    b.establish_session("node-a").unwrap();
    (a, b)
}

#[test]
fn test_encrypted_send_path() {
    let (security_a, security_b) = established_session();

    let protocol = Protocol::new("node-a");
    let mut config = UmicpConfig::default();
    config.require_encryption = true;
    protocol.configure(config.clone()).unwrap();
    protocol.set_security_manager(Arc::new(Mutex::new(security_a)));

    let transport = LoopbackTransport::new("loop://t1");
    protocol.add_transport(Arc::new(transport.clone()), "t1").unwrap();
    protocol.connect().unwrap();

    let plaintext = b"Hello";
    protocol
        .send_data(
            "node-b",
            plaintext,
            Some(PayloadHint::new(PayloadType::Text, 5, EncodingType::Uint8, 1)),
        )
        .unwrap();

    let wire = transport.drain_sent();
    let frame = Frame::deserialize(&wire[0]).unwrap();
    assert!(frame.has_flag(FrameFlags::ENCRYPTED_XCHACHA20));
    assert!(frame.payload.len() >= plaintext.len() + 28);

    // The receiving side decrypts and dispatches the original payload
    let receiver = Protocol::new("node-b");
    receiver.configure(config).unwrap();
    receiver.set_security_manager(Arc::new(Mutex::new(security_b)));

    let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    receiver.register_handler(
        OperationType::Data,
        Box::new(move |_, payload| {
            sink.lock().push(payload.unwrap_or_default().to_vec());
        }),
    );
    receiver.process_message(&wire[0]).unwrap();
    assert_eq!(*received.lock(), vec![plaintext.to_vec()]);
}

#[test]
fn test_encryption_required_without_session_fails() {
    let protocol = Protocol::new("node-a");
    let mut config = UmicpConfig::default();
    config.require_encryption = true;
    protocol.configure(config).unwrap();

    let transport = LoopbackTransport::new("loop://t1");
    protocol.add_transport(Arc::new(transport), "t1").unwrap();
    protocol.connect().unwrap();

    let err = protocol.send_data("node-b", b"plaintext", None).unwrap_err();
    assert!(matches!(err, UmicpError::AuthenticationFailed { .. }));
}

#[test]
fn test_round_robin_over_two_transports() {
    let protocol = Protocol::new("node-a");
    let t1 = LoopbackTransport::new("loop://t1");
    let t2 = LoopbackTransport::new("loop://t2");
    protocol.add_transport(Arc::new(t1.clone()), "t1").unwrap();
    protocol.add_transport(Arc::new(t2.clone()), "t2").unwrap();
    protocol.connect().unwrap();
    protocol.set_load_balancing_strategy(LoadBalancingStrategy::RoundRobin);

    for _ in 0..10 {
        protocol
            .send_control("node-b", OperationType::Control, "ping", None)
            .unwrap();
    }
    assert_eq!(t1.sent_count(), 5);
    assert_eq!(t2.sent_count(), 5);
}

#[test]
fn test_failover_excludes_failed_transport() {
    let protocol = Protocol::new("node-a");
    let t1 = LoopbackTransport::new("loop://t1");
    let t2 = LoopbackTransport::new("loop://t2");
    protocol.add_transport(Arc::new(t1.clone()), "t1").unwrap();
    protocol.add_transport(Arc::new(t2.clone()), "t2").unwrap();
    protocol.connect().unwrap();
    protocol.set_failover_enabled(true);

    protocol.mark_transport_failed("t1").unwrap();
    protocol.send_data("node-b", b"payload", None).unwrap();

    assert_eq!(protocol.get_failed_transport_ids(), vec!["t1"]);
    assert_eq!(protocol.get_healthy_transport_ids(), vec!["t2"]);
    assert_eq!(t1.sent_count(), 0);
    assert_eq!(t2.sent_count(), 1);
}

#[test]
fn test_paired_protocols_exchange_messages() {
    let (wire_a, wire_b) = LoopbackTransport::pair("loop://a", "loop://b");

    let node_a = Protocol::new("node-a");
    node_a.add_transport(Arc::new(wire_a), "link").unwrap();

    let node_b = Protocol::new("node-b");
    node_b.add_transport(Arc::new(wire_b), "link").unwrap();

    let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    node_b.register_handler(
        OperationType::Data,
        Box::new(move |envelope, payload| {
            sink.lock().push(format!(
                "{}:{}",
                envelope.from(),
                String::from_utf8_lossy(payload.unwrap_or_default())
            ));
        }),
    );

    node_a.connect().unwrap();
    node_b.connect().unwrap();

    node_a.send_data("node-b", b"over the wire", None).unwrap();
    assert_eq!(*received.lock(), vec!["node-a:over the wire".to_string()]);
    assert_eq!(node_b.get_stats().messages_received, 1);
}

#[test]
fn test_error_envelope_carries_numeric_code() {
    let protocol = Protocol::new("node-a");
    let mut config = UmicpConfig::default();
    config.preferred_format = ContentType::Json;
    protocol.configure(config).unwrap();

    let transport = LoopbackTransport::new("loop://t1");
    protocol.add_transport(Arc::new(transport.clone()), "t1").unwrap();
    protocol.connect().unwrap();

    protocol
        .send_error(
            "node-b",
            &UmicpError::decryption("tag mismatch"),
            Some("m-original"),
        )
        .unwrap();

    let wire = transport.drain_sent();
    let frame = Frame::deserialize(&wire[0]).unwrap();
    let envelope_len =
        u32::from_le_bytes(frame.payload[..4].try_into().unwrap()) as usize;
    let envelope =
        Envelope::deserialize(std::str::from_utf8(&frame.payload[4..4 + envelope_len]).unwrap())
            .unwrap();

    assert_eq!(envelope.operation(), OperationType::Error);
    assert_eq!(envelope.capability("code"), Some("4"));
    assert_eq!(envelope.capability("original_msg_id"), Some("m-original"));
}

#[test]
fn test_sequence_monotonicity_within_stream() {
    let protocol = Protocol::new("node-a");
    let mut config = UmicpConfig::default();
    config.max_message_size = 200;
    config.compression_threshold = 100;
    config.enable_compression = false;
    protocol.configure(config).unwrap();

    let transport = LoopbackTransport::new("loop://t1");
    protocol.add_transport(Arc::new(transport.clone()), "t1").unwrap();
    protocol.connect().unwrap();

    protocol.send_data("node-b", &vec![7u8; 900], None).unwrap();

    let frames: Vec<Frame> = transport
        .drain_sent()
        .iter()
        .map(|bytes| Frame::deserialize(bytes).unwrap())
        .collect();
    assert!(frames.len() > 1);
    let stream_id = frames[0].header.stream_id;
    let mut previous = 0;
    for frame in &frames {
        assert_eq!(frame.header.stream_id, stream_id);
        assert!(frame.header.sequence > previous);
        previous = frame.header.sequence;
    }
}

#[test]
fn test_compression_round_trip_all_algorithms() {
    let data: Vec<u8> = b"umicp ".iter().copied().cycle().take(10_000).collect();
    for algorithm in [
        CompressionAlgorithm::None,
        CompressionAlgorithm::Zlib,
        CompressionAlgorithm::Gzip,
        #[cfg(feature = "lz4")]
        CompressionAlgorithm::Lz4,
    ] {
        let manager = CompressionManager::new(algorithm);
        let compressed = manager.compress(&data, None).unwrap();
        assert_eq!(
            manager.decompress(&compressed).unwrap(),
            data,
            "round trip failed for {:?}",
            algorithm
        );
    }
}
