/*!
# UMICP Core

Rust implementation of the Universal Matrix Intelligent Communication
Protocol (UMICP) core: a JSON control plane (envelopes), a binary data
plane (frames), and a multi-transport protocol orchestrator with load
balancing, failover, compression, schema gating, and authenticated
encryption.

## Quick Start

### Envelopes

```rust
use umicp_core::{Envelope, OperationType};

# fn example() -> Result<(), Box<dyn std::error::Error>> {
let envelope = Envelope::builder()
    .from("client-001")
    .to("server-001")
    .operation(OperationType::Data)
    .capability("content-type", "application/json")
    .build()?;

let serialized = envelope.serialize()?;
let received = Envelope::deserialize(&serialized)?;
assert_eq!(received, envelope);
# Ok(())
# }
```

### Protocol orchestration

```rust,no_run
use std::sync::Arc;
use umicp_core::{LoopbackTransport, OperationType, Protocol};

# fn example() -> Result<(), Box<dyn std::error::Error>> {
let protocol = Protocol::new("node-a");
protocol.add_transport(Arc::new(LoopbackTransport::new("loop://t1")), "t1")?;
protocol.connect()?;

protocol.register_handler(
    OperationType::Data,
    Box::new(|envelope, payload| {
        println!("{} sent {} bytes", envelope.from(), payload.map_or(0, <[u8]>::len));
    }),
);

let msg_id = protocol.send_data("node-b", b"hello", None)?;
println!("sent {}", msg_id);
# Ok(())
# }
```

### Matrix helpers

```rust
use umicp_core::Matrix;

# fn example() -> Result<(), Box<dyn std::error::Error>> {
let matrix = Matrix::new();
let mut result = vec![0.0f32; 4];
matrix.vector_add(&[1.0, 2.0, 3.0, 4.0], &[5.0, 6.0, 7.0, 8.0], &mut result)?;
assert_eq!(result, vec![6.0, 8.0, 10.0, 12.0]);
assert_eq!(matrix.dot_product(&[1.0, 2.0, 3.0, 4.0], &[5.0, 6.0, 7.0, 8.0])?, 70.0);
# Ok(())
# }
```
*/

pub mod buffer;
pub mod compression;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod matrix;
pub mod protocol;
pub mod schema;
pub mod security;
pub mod serialization;
pub mod transport;
pub mod types;
pub mod utils;

pub use buffer::{BufferManager, RingBuffer};
pub use compression::CompressionManager;
pub use envelope::{AcceptTypes, Capabilities, Envelope, EnvelopeBuilder, PayloadRef};
pub use error::{Result, UmicpError};
pub use frame::{Frame, FrameBuilder, FrameFlags, FrameHeader, FRAME_HEADER_SIZE, FRAME_VERSION};
pub use matrix::Matrix;
pub use protocol::{MessageHandler, Protocol, ProtocolStats, TransportStatus};
pub use schema::{SchemaDefinition, SchemaRegistry, SchemaRegistryStats, SchemaType, ValidationResult};
pub use security::{SecurityManager, SecurityState};
pub use transport::{LoopbackTransport, Transport};
pub use types::*;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol version spoken on the wire
pub const UMICP_VERSION: &str = "1.0";
