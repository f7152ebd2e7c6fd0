//! Security module for conduit.
//!
//! This module provides the authorization gatekeeper shared by every
//! connection-accepting endpoint, and persistence for the shared API key.
//!
//! ## Example
//!
//! ```rust
//! use std::net::{IpAddr, Ipv4Addr};
//! use conduit::security::{AuthPolicy, AuthRequest};
//!
//! let policy = AuthPolicy::new(["https://app.example.dev"], Some("secret".into()));
//!
//! let remote = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));
//! let request = AuthRequest::new(remote).with_key_header("secret");
//! assert!(policy.decide(&request).is_allowed());
//! ```

pub mod auth;
pub mod keys;

// Re-export commonly used types
pub use auth::{
    gatekeeper, is_loopback, loopback_only, AllowReason, AuthDecision, AuthPolicy, AuthRequest,
    DenyReason, KEY_HEADER, KEY_QUERY_PARAM,
};
pub use keys::{generate_api_key, ApiKeyFile};
