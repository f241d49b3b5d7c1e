//! Dashboard feed presets and a registry owning one connection per feed.
//!
//! Every feed uses the same [`ConnectionManager`]; a [`Feed`] only fixes the path, the
//! snapshot requests issued after each open and the data types subscribed by default.

use std::fmt;

use bon::Builder;
use dashmap::DashMap;
use secrecy::SecretString;
use url::Url;

use crate::Result;
use crate::ws::envelope::{GET_STATUS, GET_SUMMARY};
use crate::ws::{Config, ConnectionManager, EndpointDescriptor, EndpointMode, Handlers};

/// One logical realtime stream of the dashboard.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Feed {
    /// Detection alerts
    Alerts,
    /// Dashboard summary counters
    Dashboard,
    /// Video status of one camera
    Camera(String),
    /// AI model telemetry
    Telemetry,
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alerts => f.write_str("alerts"),
            Self::Dashboard => f.write_str("dashboard"),
            Self::Camera(id) => write!(f, "camera:{id}"),
            Self::Telemetry => f.write_str("telemetry"),
        }
    }
}

impl Feed {
    /// Live path relative to the base URL.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::Alerts => "/ws/alerts".to_owned(),
            Self::Dashboard => "/ws/dashboard".to_owned(),
            Self::Camera(id) => format!("/ws/camera/{id}"),
            Self::Telemetry => "/ws/telemetry".to_owned(),
        }
    }

    /// Simulated path relative to the base URL.
    #[must_use]
    pub fn mock_path(&self) -> String {
        format!("{}/mock", self.path())
    }

    /// Snapshot requests sent after every successful open.
    #[must_use]
    pub fn snapshot_requests(&self) -> Vec<String> {
        match self {
            Self::Alerts => Vec::new(),
            Self::Dashboard => vec![GET_SUMMARY.to_owned()],
            Self::Camera(_) | Self::Telemetry => vec![GET_STATUS.to_owned()],
        }
    }

    /// Data types a fresh connection for this feed subscribes to.
    #[must_use]
    pub fn default_subscriptions(&self) -> Vec<String> {
        let types: &[&str] = match self {
            Self::Alerts => &["alerts"],
            Self::Dashboard => &["summary", "detections"],
            Self::Camera(_) => &[],
            Self::Telemetry => &["telemetry"],
        };
        types.iter().map(|&t| t.to_owned()).collect()
    }

    /// Endpoint for this feed under `settings`.
    #[must_use]
    pub fn descriptor(&self, settings: &FeedSettings) -> EndpointDescriptor {
        EndpointDescriptor::builder()
            .base_url(settings.base_url.clone())
            .path(self.path())
            .mock_path(self.mock_path())
            .maybe_token(settings.token.clone())
            .maybe_store_id(settings.store_id.clone())
            .mode(settings.mode)
            .build()
    }

    /// Connection config for this feed: `base` plus the feed's snapshot requests.
    #[must_use]
    pub fn config(&self, base: &Config) -> Config {
        let mut config = base.clone();
        for request in self.snapshot_requests() {
            if !config.snapshot_requests.contains(&request) {
                config.snapshot_requests.push(request);
            }
        }
        config
    }
}

/// Settings shared by every feed of one dashboard.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct FeedSettings {
    /// e.g. `https://dashboard.example.com`
    pub base_url: Url,
    #[builder(into)]
    pub token: Option<SecretString>,
    #[builder(into)]
    pub store_id: Option<String>,
    #[builder(default)]
    pub mode: EndpointMode,
    #[builder(default)]
    pub connection: Config,
}

/// Registry of feed connections.
///
/// Connections are created lazily on first use and live until removed or the registry is
/// dropped. Each one is fully independent of the others.
#[derive(Debug)]
pub struct Feeds {
    settings: FeedSettings,
    connections: DashMap<Feed, ConnectionManager>,
}

impl Feeds {
    #[must_use]
    pub fn new(settings: FeedSettings) -> Self {
        Self {
            settings,
            connections: DashMap::new(),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    /// Connection for `feed`, creating it (disconnected, with the feed's default
    /// subscriptions) on first use.
    pub fn get_or_create(&self, feed: &Feed) -> ConnectionManager {
        self.connections
            .entry(feed.clone())
            .or_insert_with(|| {
                let connection = ConnectionManager::new(feed.config(&self.settings.connection));
                connection.subscribe(feed.default_subscriptions());
                connection
            })
            .clone()
    }

    /// Connection for `feed` if it has been created.
    #[must_use]
    pub fn get(&self, feed: &Feed) -> Option<ConnectionManager> {
        self.connections.get(feed).map(|entry| entry.value().clone())
    }

    /// Connect `feed`, creating its connection if needed.
    pub async fn connect(&self, feed: &Feed, handlers: Handlers) -> Result<ConnectionManager> {
        let connection = self.get_or_create(feed);
        connection
            .connect(feed.descriptor(&self.settings), handlers)
            .await?;
        Ok(connection)
    }

    /// Disconnect and forget `feed`. Returns whether it existed.
    pub async fn remove(&self, feed: &Feed) -> bool {
        let Some((_, connection)) = self.connections.remove(feed) else {
            return false;
        };
        connection.disconnect().await;
        true
    }

    /// Disconnect every feed, keeping their subscription sets.
    pub async fn disconnect_all(&self) {
        let connections: Vec<_> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for connection in connections {
            connection.disconnect().await;
        }
    }

    /// Feeds created so far.
    #[must_use]
    pub fn feeds(&self) -> Vec<Feed> {
        self.connections.iter().map(|entry| entry.key().clone()).collect()
    }
}
