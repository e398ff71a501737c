//! OAuth2 Authorization Server module.
//!
//! The website itself is the identity provider: users sign in with their site
//! account and approve third-party applications on the consent page.
//!
//! ## Supported Flows
//!
//! - Authorization Code with PKCE (recommended for SPAs and native apps)
//! - Refresh Token, with rotation
//!
//! ## Endpoints
//!
//! - `GET /oauth2/authorize` - Authorization endpoint
//! - `GET|POST /oauth2/consent` - Consent details and decision
//! - `POST /oauth2/token` - Token endpoint
//! - `POST /oauth2/revoke` - Token revocation
//! - `GET /oauth2/userinfo` - OpenID Connect UserInfo
//! - `GET /.well-known/openid-configuration` - OpenID Connect Discovery

pub mod clients;
pub mod codes;
pub mod consent;
pub mod endpoints;
pub mod scopes;
pub mod state;
pub mod tokens;

pub use clients::ClientRegistry;
pub use codes::{AuthorizationCodeStore, DatabaseCodeStore, MemoryCodeStore};
pub use endpoints::{discovery_router, router};
pub use state::OAuth2State;
pub use tokens::TokenIssuer;

/// OpenAPI tag for OAuth2 endpoints
pub const OAUTH2_TAG: &str = "OAuth2";
