//! Upstream service registry.
//!
//! # Responsibilities
//! - Hold one base URL per logical service
//! - Build the outbound URI for a forwarded request

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{uri::PathAndQuery, Uri};
use url::Url;

use crate::config::UpstreamConfig;
use crate::routing::ServiceName;

/// A single upstream service.
#[derive(Debug)]
pub struct Upstream {
    pub service: ServiceName,
    /// Parsed base URL, as configured.
    pub base_url: Url,
    /// `host:port` used for the connection and the `Host` header.
    pub authority: String,
    /// Base path without a trailing `/` (empty for a bare host).
    base_path: String,
}

impl Upstream {
    pub fn new(service: ServiceName, base_url: Url) -> Option<Self> {
        let host = base_url.host_str()?;
        let authority = match base_url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let base_path = base_url.path().trim_end_matches('/').to_string();
        Some(Self {
            service,
            base_url,
            authority,
            base_path,
        })
    }

    /// Outbound URI: base path + original path + original query.
    pub fn target_uri(&self, original: Option<&PathAndQuery>) -> Result<Uri, axum::http::Error> {
        let path_and_query = original.map(PathAndQuery::as_str).unwrap_or("/");
        let uri = Uri::builder()
            .scheme(self.base_url.scheme())
            .authority(self.authority.as_str())
            .path_and_query(format!("{}{}", self.base_path, path_and_query))
            .build()?;
        Ok(uri)
    }
}

/// ServiceName → upstream lookup, fixed at startup.
#[derive(Debug, Default)]
pub struct UpstreamRegistry {
    upstreams: HashMap<ServiceName, Arc<Upstream>>,
}

impl UpstreamRegistry {
    /// Create a registry from configuration, skipping entries that do not parse.
    pub fn new(configs: &[UpstreamConfig]) -> Self {
        let mut upstreams = HashMap::new();

        for config in configs {
            let service = ServiceName::new(&config.service);
            let upstream = Url::parse(&config.url)
                .ok()
                .and_then(|url| Upstream::new(service.clone(), url));

            match upstream {
                Some(upstream) => {
                    tracing::debug!(service = %service, url = %config.url, "Registered upstream");
                    upstreams.insert(service, Arc::new(upstream));
                }
                None => tracing::warn!("Invalid upstream URL for {}: {}", config.service, config.url),
            }
        }

        Self { upstreams }
    }

    pub fn resolve(&self, service: &ServiceName) -> Option<Arc<Upstream>> {
        self.upstreams.get(service).cloned()
    }

    /// All upstreams, sorted by service.
    pub fn all(&self) -> Vec<Arc<Upstream>> {
        let mut all: Vec<_> = self.upstreams.values().cloned().collect();
        all.sort_by(|a, b| a.service.cmp(&b.service));
        all
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }
}
