//! Yjs document-sync provider on top of a durable append-only HTTP
//! stream service.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use yrs_durable_provider::{DocumentEngine, Provider, ProviderConfigBuilder};
//! use std::sync::Arc;
//!
//! # struct MyDoc;
//! # #[async_trait::async_trait]
//! # impl DocumentEngine for MyDoc {
//! #     fn on_update(&self, _cb: Box<dyn Fn(bytes::Bytes, String) + Send + Sync>) {}
//! #     async fn apply(&self, _update: bytes::Bytes, _origin: &str) -> Result<(), String> { Ok(()) }
//! #     fn client_id(&self) -> u64 { 1 }
//! # }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProviderConfigBuilder::new()
//!         .base_url("https://api.example.com")
//!         .doc_id("my-document")
//!         .build()?;
//!
//!     let provider = Provider::new(config, Arc::new(MyDoc));
//!     provider.on_synced(|synced| println!("synced: {synced}"));
//!     provider.connect().await;
//!
//!     Ok(())
//! }
//! ```

mod awareness;
mod client;
mod config;
mod context;
mod engine;
mod error;
mod events;
mod framing;
mod iterator;
mod producer;
mod provider;
mod raw;
mod retry;
mod snapshot;
mod sse;
mod transport;
mod types;
mod updates;

pub use awareness::{Broadcaster, REMOTE_ORIGIN};
pub use client::{Client, ClientBuilder};
pub use config::{ConfigError, HeaderValue, ProducerConfig, ProviderConfig, ProviderConfigBuilder};
pub use context::ConnectionContext;
pub use engine::{AwarenessEngine, DocumentEngine, SERVER_ORIGIN};
pub use error::{ProducerError, ProviderError};
pub use events::{EventEmitter, Status};
pub use iterator::{Chunk, ChunkIterator, ReadBuilder};
pub use producer::{OnErrorCallback, Producer, ProducerBuilder};
pub use provider::Provider;
pub use raw::{AppendOptions, AppendResponse, CreateOptions, HeadResponse, RawStream};
pub use types::{LiveMode, Offset};
