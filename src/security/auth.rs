//! Connection authorization.
//!
//! Every connection-accepting entry point asks the same question through
//! [`AuthPolicy`]: websocket upgrades and plain requests alike. The policy is
//! evaluated in order:
//!
//! 1. An `Origin` header is present: allow iff it is on the allow-list.
//!    A mismatch is final and never falls back to the key check.
//! 2. No origin, loopback peer: allow.
//! 3. No origin, key configured: allow iff the supplied key (header first,
//!    then `?key=`) matches exactly.
//! 4. Otherwise deny.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::{HeaderMap, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

/// Header carrying the shared secret for origin-less clients.
pub const KEY_HEADER: &str = "x-conduit-key";

/// Query parameter carrying the shared secret when a header cannot be set
/// (browser websocket constructors, for instance).
pub const KEY_QUERY_PARAM: &str = "key";

/// Process-wide trust configuration.
#[derive(Debug, Clone, Default)]
pub struct AuthPolicy {
    allowed_origins: HashSet<String>,
    required_key: Option<String>,
}

impl AuthPolicy {
    /// Create a policy. An empty key is treated as no key.
    pub fn new<I, S>(allowed_origins: I, required_key: Option<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_origins: allowed_origins.into_iter().map(Into::into).collect(),
            required_key: required_key.filter(|k| !k.is_empty()),
        }
    }

    /// Replace the required key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.required_key = (!key.is_empty()).then_some(key);
        self
    }

    pub fn allowed_origins(&self) -> &HashSet<String> {
        &self.allowed_origins
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.contains(origin)
    }

    pub fn requires_key(&self) -> bool {
        self.required_key.is_some()
    }

    /// Evaluate the policy. Pure; no logging.
    pub fn decide(&self, request: &AuthRequest) -> AuthDecision {
        if let Some(origin) = request.origin.as_deref() {
            return if self.is_origin_allowed(origin) {
                AuthDecision::Allow(AllowReason::Origin)
            } else {
                AuthDecision::Deny(DenyReason::OriginNotAllowed(origin.to_string()))
            };
        }

        if is_loopback(request.remote) {
            return AuthDecision::Allow(AllowReason::Loopback);
        }

        let Some(required) = self.required_key.as_deref() else {
            return AuthDecision::Deny(DenyReason::NoCredentials);
        };

        match request.supplied_key() {
            None => AuthDecision::Deny(DenyReason::MissingKey),
            Some(key) if key == required => AuthDecision::Allow(AllowReason::ApiKey),
            Some(_) => AuthDecision::Deny(DenyReason::InvalidKey),
        }
    }

    /// Evaluate the policy, logging every denial with its cause.
    pub fn authorize(&self, request: &AuthRequest) -> bool {
        match self.decide(request) {
            AuthDecision::Allow(reason) => {
                debug!("Authorized {} ({:?})", request.remote, reason);
                true
            }
            AuthDecision::Deny(reason) => {
                warn!("[SECURITY] Denied: {} from {}", reason, request.remote);
                false
            }
        }
    }
}

/// The inputs of one authorization decision.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub origin: Option<String>,
    pub remote: IpAddr,
    pub key_header: Option<String>,
    pub key_query: Option<String>,
}

impl AuthRequest {
    /// A request from `remote` carrying no credentials.
    pub fn new(remote: IpAddr) -> Self {
        Self {
            origin: None,
            remote,
            key_header: None,
            key_query: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_key_header(mut self, key: impl Into<String>) -> Self {
        self.key_header = Some(key.into());
        self
    }

    pub fn with_key_query(mut self, key: impl Into<String>) -> Self {
        self.key_query = Some(key.into());
        self
    }

    /// Extract the inputs from an HTTP request. Empty values count as absent.
    pub fn from_http(headers: &HeaderMap, uri: &Uri, remote: IpAddr) -> Self {
        let header = |name| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let key_query = Query::<HashMap<String, String>>::try_from_uri(uri)
            .ok()
            .and_then(|Query(mut params)| params.remove(KEY_QUERY_PARAM))
            .filter(|k| !k.is_empty());

        Self {
            origin: header(axum::http::header::ORIGIN.as_str()),
            remote,
            key_header: header(KEY_HEADER),
            key_query,
        }
    }

    /// The header takes precedence over the query parameter.
    pub fn supplied_key(&self) -> Option<&str> {
        self.key_header
            .as_deref()
            .or(self.key_query.as_deref())
            .filter(|k| !k.is_empty())
    }
}

/// Outcome of [`AuthPolicy::decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Allow(AllowReason),
    Deny(DenyReason),
}

impl AuthDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowReason {
    Origin,
    Loopback,
    ApiKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    OriginNotAllowed(String),
    MissingKey,
    InvalidKey,
    /// No origin, not loopback, and no key configured.
    NoCredentials,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OriginNotAllowed(origin) => write!(f, "invalid origin '{}'", origin),
            Self::MissingKey => f.write_str("missing API key for no-origin request"),
            Self::InvalidKey => f.write_str("invalid API key"),
            Self::NoCredentials => f.write_str("no origin and no API key configured"),
        }
    }
}

/// True for IPv4/IPv6 loopback, including IPv4-mapped IPv6 loopback.
pub fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
    }
}

/// Authorization middleware for the terminal and file endpoints.
pub async fn gatekeeper(
    State(policy): State<Arc<AuthPolicy>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth = AuthRequest::from_http(request.headers(), request.uri(), peer.ip());
    if policy.authorize(&auth) {
        Ok(next.run(request).await)
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

/// Restrict a route to strictly local callers, whatever the general policy.
pub async fn loopback_only(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if is_loopback(peer.ip()) {
        return next.run(request).await;
    }
    warn!(
        "[SECURITY] Denied administrative request {} from remote address: {}",
        request.uri().path(),
        peer
    );
    (
        StatusCode::FORBIDDEN,
        "Forbidden: administrative actions are only allowed from localhost.",
    )
        .into_response()
}
