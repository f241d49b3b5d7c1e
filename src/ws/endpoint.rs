//! Endpoint description and live/mock negotiation.

use std::fmt;
use std::str::FromStr;

use bon::Builder;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use super::error::WsError;
use crate::Result;
use crate::error::Error;

/// Environment variable holding the default [`EndpointMode`].
pub const MODE_VAR: &str = "DETECTION_FEED_MODE";

/// Which backend a feed should talk to.
#[non_exhaustive]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EndpointMode {
    /// Try the live path, fall back to the simulated one once
    #[default]
    Auto,
    /// Live path only
    Live,
    /// Simulated path only
    Mock,
}

impl FromStr for EndpointMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "live" | "real" => Ok(Self::Live),
            "mock" | "simulated" => Ok(Self::Mock),
            other => Err(Error::validation(format!(
                "unknown endpoint mode `{other}`, expected auto, live or mock"
            ))),
        }
    }
}

impl EndpointMode {
    /// Read the mode from [`MODE_VAR`], defaulting to [`EndpointMode::Auto`] when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(MODE_VAR) {
            Ok(value) => value.parse(),
            Err(std::env::VarError::NotPresent) => Ok(Self::Auto),
            Err(std::env::VarError::NotUnicode(_)) => {
                Err(Error::validation(format!("{MODE_VAR} is not valid unicode")))
            }
        }
    }
}

/// One of the two concrete paths a descriptor can resolve to.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum PathKind {
    Live,
    Mock,
}

/// Where and how to dial one feed.
///
/// The auth token and store identifier are attached as `token` and `store_id` query
/// parameters. `http`/`https` base URLs are dialed as `ws`/`wss`.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct EndpointDescriptor {
    /// Base address, e.g. `wss://dashboard.example.com`
    pub base_url: Url,
    /// Live feed path, e.g. `/ws/alerts`
    #[builder(into)]
    pub path: String,
    /// Simulated feed path. Defaults to `{path}/mock`.
    #[builder(into)]
    pub mock_path: Option<String>,
    /// Auth token
    #[builder(into)]
    pub token: Option<SecretString>,
    /// Tenant / store identifier
    #[builder(into)]
    pub store_id: Option<String>,
    /// Extra query parameters
    #[builder(default)]
    pub query: Vec<(String, String)>,
    #[builder(default)]
    pub mode: EndpointMode,
}

impl EndpointDescriptor {
    /// Path used for `kind`.
    #[must_use]
    pub fn path_for(&self, kind: PathKind) -> String {
        match (kind, &self.mock_path) {
            (PathKind::Live, _) => self.path.clone(),
            (PathKind::Mock, Some(mock)) => mock.clone(),
            (PathKind::Mock, None) => format!("{}/mock", self.path.trim_end_matches('/')),
        }
    }

    /// Full URL for `kind`, including query parameters.
    pub fn resolve(&self, kind: PathKind) -> Result<ResolvedEndpoint> {
        let mut url = self.base_url.clone();

        let scheme = match url.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => {
                return Err(WsError::InvalidEndpoint(format!("unsupported scheme `{other}`")).into());
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| WsError::InvalidEndpoint(format!("cannot dial {scheme} on {url}")))?;

        let path = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            self.path_for(kind).trim_start_matches('/')
        );
        url.set_path(&path);

        let has_query =
            self.token.is_some() || self.store_id.is_some() || !self.query.is_empty();
        if has_query {
            let mut pairs = url.query_pairs_mut();
            if let Some(token) = &self.token {
                pairs.append_pair("token", token.expose_secret());
            }
            if let Some(store_id) = &self.store_id {
                pairs.append_pair("store_id", store_id);
            }
            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
        }

        Ok(ResolvedEndpoint { kind, url })
    }
}

/// A dialable URL together with the path kind it came from.
#[non_exhaustive]
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub kind: PathKind,
    pub url: Url,
}

impl ResolvedEndpoint {
    /// URL without its query string, safe to log.
    #[must_use]
    pub fn redacted(&self) -> String {
        let mut url = self.url.clone();
        url.set_query(None);
        url.to_string()
    }
}

// Query strings carry the auth token, so neither Debug nor Display print them.
impl fmt::Debug for ResolvedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedEndpoint")
            .field("kind", &self.kind)
            .field("url", &self.redacted())
            .finish()
    }
}

impl fmt::Display for ResolvedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.redacted(), self.kind)
    }
}

/// Chooses which path to dial for one `connect` lifetime.
///
/// A fresh negotiator is created by every `connect` call, so the live path is retried
/// first each time the caller connects again. Within one lifetime the negotiator
/// remembers which path opened and reconnects go straight to it.
#[derive(Debug, Clone)]
pub struct EndpointNegotiator {
    descriptor: EndpointDescriptor,
    active: Option<PathKind>,
    reprobe_live: bool,
}

impl EndpointNegotiator {
    #[must_use]
    pub fn new(descriptor: EndpointDescriptor) -> Self {
        Self {
            descriptor,
            active: None,
            reprobe_live: false,
        }
    }

    /// In `auto` mode, let reconnects try the live path again after falling back to mock.
    #[must_use]
    pub fn with_live_reprobe(mut self, reprobe_live: bool) -> Self {
        self.reprobe_live = reprobe_live;
        self
    }

    #[must_use]
    pub fn descriptor(&self) -> &EndpointDescriptor {
        &self.descriptor
    }

    /// Path that last opened successfully, if any.
    #[must_use]
    pub fn active(&self) -> Option<PathKind> {
        self.active
    }

    /// Paths to try in order for the next attempt. More than one entry means the first
    /// may fall back to the second, once.
    #[must_use]
    pub fn plan(&self) -> Vec<PathKind> {
        match (self.descriptor.mode, self.active) {
            (EndpointMode::Auto, Some(PathKind::Mock)) if self.reprobe_live => {
                vec![PathKind::Live, PathKind::Mock]
            }
            (_, Some(kind)) => vec![kind],
            (EndpointMode::Live, None) => vec![PathKind::Live],
            (EndpointMode::Mock, None) => vec![PathKind::Mock],
            (EndpointMode::Auto, None) => vec![PathKind::Live, PathKind::Mock],
        }
    }

    /// Resolved URLs for [`Self::plan`].
    pub fn candidates(&self) -> Result<Vec<ResolvedEndpoint>> {
        self.plan()
            .into_iter()
            .map(|kind| self.descriptor.resolve(kind))
            .collect()
    }

    /// Whether the next attempt has a fallback candidate.
    #[must_use]
    pub fn has_fallback(&self) -> bool {
        self.plan().len() > 1
    }

    pub fn record_success(&mut self, kind: PathKind) {
        self.active = Some(kind);
    }
}
