//! Caller identity middleware.
//!
//! Authentication happens in front of the gateway core. When that layer is
//! trusted (`identity.trust_user_header`), an authenticated caller arrives
//! with its user id in `x-user-id` (by default). Otherwise the header is
//! removed and every caller is identified by network address.

use std::fmt;
use std::net::IpAddr;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};

use crate::http::request::RequestContext;
use crate::http::server::AppState;

/// Identity label resolved for an authenticated caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: String,
}

/// Key of a rate-limit bucket: `user:<id>` for authenticated callers, else `ip:<addr>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    const USER_PREFIX: &'static str = "user:";
    const IP_PREFIX: &'static str = "ip:";

    pub fn for_caller(identity: Option<&CallerIdentity>, client_addr: Option<IpAddr>) -> Self {
        match (identity, client_addr) {
            (Some(identity), _) => Self(format!("{}{}", Self::USER_PREFIX, identity.user_id)),
            (None, Some(addr)) => Self(format!("{}{}", Self::IP_PREFIX, addr)),
            (None, None) => Self::anonymous(),
        }
    }

    pub fn for_context(ctx: &RequestContext) -> Self {
        Self::for_caller(ctx.identity.as_ref(), ctx.client_addr)
    }

    /// Shared bucket for callers with neither identity nor address.
    pub fn anonymous() -> Self {
        Self(format!("{}unknown", Self::IP_PREFIX))
    }

    /// Metric label for the key family.
    pub fn kind(&self) -> &'static str {
        if self.0.starts_with(Self::USER_PREFIX) {
            "user"
        } else {
            "ip"
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read the caller identity from `header`, ignoring empty or non-ASCII values.
pub fn extract_identity(headers: &HeaderMap, header: &str) -> Option<CallerIdentity> {
    let value = headers.get(header)?.to_str().ok()?.trim();
    if value.is_empty() {
        return None;
    }
    Some(CallerIdentity {
        user_id: value.to_string(),
    })
}

pub async fn identity_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let identity_config = &state.config.identity;
    let identity = if identity_config.trust_user_header {
        extract_identity(req.headers(), &identity_config.user_header)
    } else {
        req.headers_mut().remove(identity_config.user_header.as_str());
        None
    };

    if let Some(ctx) = req.extensions_mut().get_mut::<RequestContext>() {
        if let Some(identity) = &identity {
            tracing::trace!(request_id = %ctx.request_id, user = %identity.user_id, "Caller identified");
        }
        ctx.identity = identity;
    }

    next.run(req).await
}
