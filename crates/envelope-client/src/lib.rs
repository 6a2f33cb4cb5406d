//! Request gateway for the Envelope budgeting API.
//!
//! [`RequestGateway`] is what feature code calls. It combines:
//! - a [`SessionManager`](envelope_session::SessionManager) for a valid bearer credential
//! - a [`RetryExecutor`](envelope_retry::RetryExecutor) for transient failures
//! - a [`CacheStore`](envelope_cache::CacheStore) for reads, invalidated by writes
//! - a [`Transport`] that performs the HTTP call and classifies failures
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use envelope_client::{RequestGateway, RequestMethod, RequestSpec};
//! use envelope_session::MemoryCredentialStore;
//!
//! # async fn example(config: envelope_config::EnvelopeConfig) -> envelope_client::Result<()> {
//! let gateway = RequestGateway::from_config(&config, Arc::new(MemoryCredentialStore::new()))?;
//!
//! let envelopes = gateway
//!     .execute(RequestSpec::read("envelopes", "rest/v1/envelopes").query("select", "*"))
//!     .await?;
//!
//! gateway
//!     .execute(
//!         RequestSpec::write(RequestMethod::Post, "rest/v1/transactions", "transaction_written")
//!             .body(serde_json::json!({ "amount": 1250, "envelope_id": 3 })),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod auth;
mod error;
mod gateway;
mod request;
mod setup;
mod transport;

pub use auth::HttpAuthBackend;
pub use error::{ErrorKind, GatewayError, Result, TransportError};
pub use gateway::{GatewayBuilder, RequestGateway, ResponseCache};
pub use request::{OutboundRequest, RequestKind, RequestMethod, RequestSpec};
pub use setup::{cache_config, session_config};
pub use transport::{HttpTransport, HttpTransportBuilder, SharedTransport, Transport};
