//! Remote Invocation over a Framed Wire Protocol
//!
//! Carries delegate calls between processes: arguments are serialized,
//! framed behind an 8-byte [`WireHeader`], and sent over any [`Transport`].
//! Every non-acknowledgment frame is tracked until the peer acknowledges it;
//! unacknowledged frames are resent under the same sequence number a
//! bounded number of times.
//!
//! ## Layers
//!
//! - [`wire`]: header layout, marker validation, sequence numbers
//! - [`transport`]: UDP, TCP and in-memory backends behind one trait
//! - [`TransportMonitor`] / [`RetryMonitor`] / [`ReliableTransport`]: delivery tracking
//! - [`NetworkEngine`]: receive loop, endpoint registry, ack generation,
//!   blocking `send_and_wait`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use network::{EngineConfig, NetworkEngine, UdpConfig, UdpTransport};
//! use std::sync::Arc;
//!
//! let transport = UdpTransport::bind(
//!     UdpConfig::new("127.0.0.1:0".parse().unwrap()).with_remote("127.0.0.1:9000".parse().unwrap()),
//! )?;
//! let engine = NetworkEngine::new(EngineConfig::default())?;
//! engine.initialize(Arc::new(transport))?;
//! engine.start()?;
//!
//! let log = engine.remote::<String>(10);
//! log.invoke_wait(&"hello".to_string())?;
//! # Ok::<(), network::NetworkError>(())
//! ```

pub mod config;
pub mod dedupe;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod registry;
pub mod reliable;
pub mod remote;
pub mod retry;
pub mod serializer;
pub mod transport;
pub mod wire;

pub use config::EngineConfig;
pub use dedupe::DuplicateFilter;
pub use dispatcher::Dispatcher;
pub use engine::NetworkEngine;
pub use error::{EngineError, ErrorKind, NetworkError, ProtocolError, Result};
pub use monitor::{DeliveryOutcome, DeliveryStatus, TransportMonitor};
pub use registry::{EndpointRegistry, Invoker, RemoteEndpoint};
pub use reliable::ReliableTransport;
pub use remote::RemoteDelegate;
pub use retry::RetryMonitor;
pub use serializer::{BincodeSerializer, JsonSerializer, Serializer};
pub use transport::{
    MemoryTransport, TcpConfig, TcpRole, TcpTransport, TrackedTransport, Transport,
    TransportStats, TransportType, UdpConfig, UdpTransport,
};
pub use wire::{Frame, SequenceGenerator, WireHeader, ACK_ID, HEADER_SIZE, MARKER};

// Engine defaults
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
