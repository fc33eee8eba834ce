//! Transport (ICE) configuration and relay credential resolution
//!
//! The peer-connection layer is initialised with an ordered list of candidate
//! servers. Relay (TURN) entries carry short-lived credentials issued by an
//! external token service; discovery-only (STUN) entries need none. Resolution
//! happens once per session bootstrap and never fails: whatever goes wrong
//! with the credential endpoint, the caller gets the static discovery-only
//! fallback.
//!
//! ```text
//! GET <relay endpoint>  ──► 200 { "iceServers": [...] } ──► TransportConfig
//!        │
//!        └─ non-2xx / network / bad body / empty list ──► fallback (STUN only)
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::config::RelayConfig;

/// One candidate transport server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs (`stun:`, `turn:` or `turns:`)
    pub urls: Vec<String>,
    /// Relay username, if the server requires one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Relay credential, if the server requires one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// A discovery-only server without credentials
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// Whether this entry relays traffic (TURN/TURNS)
    pub fn is_relay(&self) -> bool {
        self.urls
            .iter()
            .any(|u| u.starts_with("turn:") || u.starts_with("turns:"))
    }
}

/// Ordered list of transport servers used to initialise the peer layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Candidate servers in priority order
    pub ice_servers: Vec<IceServer>,
}

impl TransportConfig {
    /// Discovery-only configuration built from plain STUN URLs
    pub fn fallback<I, S>(stun_urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ice_servers: stun_urls.into_iter().map(IceServer::stun).collect(),
        }
    }

    /// Number of relay entries
    pub fn relay_count(&self) -> usize {
        self.ice_servers.iter().filter(|s| s.is_relay()).count()
    }
}

/// Why the relay credential endpoint could not be used
#[derive(Debug, Clone, Error)]
pub enum CredentialFetchError {
    #[error("credential endpoint returned HTTP {status}")]
    Status { status: u16 },

    #[error("credential request failed: {reason}")]
    Network { reason: String },

    #[error("credential response could not be parsed: {reason}")]
    Body { reason: String },

    #[error("credential response contained no servers")]
    Empty,
}

/// Source of the transport configuration for a session bootstrap
#[async_trait]
pub trait TransportConfigSource: Send + Sync {
    /// Produce a usable configuration; never fails
    async fn resolve(&self) -> TransportConfig;
}

/// Always returns the same configuration
#[derive(Debug, Clone)]
pub struct StaticTransportConfig(pub TransportConfig);

#[async_trait]
impl TransportConfigSource for StaticTransportConfig {
    async fn resolve(&self) -> TransportConfig {
        self.0.clone()
    }
}

/// Fetches relay credentials from the external token service
#[derive(Debug, Clone)]
pub struct HttpTransportConfigResolver {
    client: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
    fallback: TransportConfig,
}

impl HttpTransportConfigResolver {
    /// Create a resolver for `endpoint`
    pub fn new(endpoint: Url, timeout: Duration, fallback: TransportConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            timeout,
            fallback,
        }
    }

    /// Build the source described by a [`RelayConfig`]
    ///
    /// Without an endpoint the static fallback is used directly.
    pub fn from_relay_config(relay: &RelayConfig) -> Box<dyn TransportConfigSource> {
        let fallback = TransportConfig::fallback(relay.fallback_stun_urls.iter().cloned());
        match relay.credentials_url.as_deref().map(Url::parse) {
            Some(Ok(endpoint)) => Box::new(Self::new(
                endpoint,
                Duration::from_secs(relay.request_timeout_secs),
                fallback,
            )),
            Some(Err(e)) => {
                warn!(error = %e, "Ignoring malformed relay credential URL");
                Box::new(StaticTransportConfig(fallback))
            }
            None => Box::new(StaticTransportConfig(fallback)),
        }
    }

    async fn fetch(&self) -> Result<TransportConfig, CredentialFetchError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| CredentialFetchError::Network {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CredentialFetchError::Status {
                status: status.as_u16(),
            });
        }

        let body: CredentialResponse =
            response
                .json()
                .await
                .map_err(|e| CredentialFetchError::Body {
                    reason: e.to_string(),
                })?;

        let ice_servers: Vec<IceServer> = body
            .ice_servers
            .unwrap_or_default()
            .into_iter()
            .filter_map(WireIceServer::into_ice_server)
            .collect();

        if ice_servers.is_empty() {
            return Err(CredentialFetchError::Empty);
        }
        Ok(TransportConfig { ice_servers })
    }
}

#[async_trait]
impl TransportConfigSource for HttpTransportConfigResolver {
    async fn resolve(&self) -> TransportConfig {
        debug!(endpoint = %self.endpoint, "Fetching relay credentials");
        match self.fetch().await {
            Ok(config) => {
                info!(
                    servers = config.ice_servers.len(),
                    relays = config.relay_count(),
                    "Resolved transport configuration"
                );
                config
            }
            Err(e) => {
                warn!(error = %e, "Relay credentials unavailable, using discovery-only fallback");
                self.fallback.clone()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CredentialResponse {
    #[serde(rename = "iceServers")]
    ice_servers: Option<Vec<WireIceServer>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireUrls {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct WireIceServer {
    #[serde(default)]
    urls: Option<WireUrls>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    credential: Option<String>,
}

impl WireIceServer {
    fn into_ice_server(self) -> Option<IceServer> {
        let urls = match (self.urls, self.url) {
            (Some(WireUrls::Many(list)), _) => list,
            (Some(WireUrls::One(one)), _) => vec![one],
            (None, Some(one)) => vec![one],
            (None, None) => Vec::new(),
        };
        if urls.is_empty() {
            return None;
        }
        Some(IceServer {
            urls,
            username: self.username,
            credential: self.credential,
        })
    }
}
