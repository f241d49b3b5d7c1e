//! Core WebSocket infrastructure.
//!
//! Every dashboard feed speaks the same envelope protocol over its own connection, so
//! the pieces here are feed-agnostic and composed by [`ConnectionManager`].
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: Connection lifecycle, heartbeat, reconnection and dispatch
//! - [`EndpointNegotiator`]: Live/mock path selection with a single fallback
//! - [`SubscriptionRegistry`]: Desired data types, replayed after every open
//! - [`HandlerRegistry`]: One handler per message type
//! - [`ReconnectPolicy`]: Deterministic capped exponential backoff
//!
//! # Example
//!
//! ```rust, no_run
//! use detection_feeds::ws::{Config, ConnectionManager, EndpointDescriptor, EndpointMode, Handlers};
//! use url::Url;
//!
//! # async fn example() -> detection_feeds::Result<()> {
//! let endpoint = EndpointDescriptor::builder()
//!     .base_url(Url::parse("https://dashboard.example.com")?)
//!     .path("/ws/camera/7")
//!     .mode(EndpointMode::from_env()?)
//!     .build();
//!
//! let connection = ConnectionManager::new(Config::default());
//! connection
//!     .connect(endpoint, Handlers::new().on("camera_status", |status| {
//!         println!("{}", status.payload);
//!     }))
//!     .await?;
//! connection.request_snapshot("get_status");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod heartbeat;
pub mod registry;
pub mod subscription;

pub use config::{Config, ReconnectConfig, ReconnectPolicy};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState};
pub use endpoint::{EndpointDescriptor, EndpointMode, EndpointNegotiator, PathKind};
pub use envelope::MessageEnvelope;
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use registry::{Handler, HandlerRegistry, Handlers};
pub use subscription::SubscriptionRegistry;
