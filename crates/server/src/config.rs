use serde::Deserialize;
use std::collections::HashSet;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Session lifetime in seconds
    #[serde(default = "default_session_lifetime")]
    pub lifetime_secs: i64,
    /// Adds the `Secure` attribute to the session cookie
    #[serde(default = "default_true")]
    pub secure_cookie: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            lifetime_secs: default_session_lifetime(),
            secure_cookie: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CodeStoreKind {
    /// Process-global map; codes are lost on restart
    #[default]
    Memory,
    /// `oauth2_authorization` table
    Database,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenFormat {
    #[default]
    Opaque,
    Jwt,
}

/// A client registered from configuration at startup.
#[derive(Clone, Debug, Deserialize)]
pub struct ClientSeed {
    pub id: String,
    pub name: String,
    /// Plaintext secret; hashed before it is stored. `None` for public clients.
    #[serde(default)]
    pub secret: Option<String>,
    pub redirect_uris: Vec<String>,
    #[serde(default = "default_client_scopes")]
    pub scopes: String,
    #[serde(default = "default_client_grant_types")]
    pub grant_types: String,
    #[serde(default)]
    pub skip_consent: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OAuth2Config {
    /// Access token lifetime in seconds
    #[serde(default = "default_access_token_lifetime")]
    pub access_token_lifetime: i64,
    /// Refresh token lifetime in seconds
    #[serde(default = "default_refresh_token_lifetime")]
    pub refresh_token_lifetime: i64,
    /// Authorization code lifetime in seconds
    #[serde(default = "default_code_lifetime")]
    pub code_lifetime: i64,
    #[serde(default)]
    pub code_store: CodeStoreKind,
    #[serde(default)]
    pub token_format: TokenFormat,
    #[serde(default = "default_true")]
    pub require_pkce_for_public_clients: bool,
    #[serde(default)]
    pub clients: Vec<ClientSeed>,
}

impl Default for OAuth2Config {
    fn default() -> Self {
        Self {
            access_token_lifetime: default_access_token_lifetime(),
            refresh_token_lifetime: default_refresh_token_lifetime(),
            code_lifetime: default_code_lifetime(),
            code_store: CodeStoreKind::default(),
            token_format: TokenFormat::default(),
            require_pkce_for_public_clients: true,
            clients: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_true")]
    pub require_verified_email: bool,
    /// Lifetime of email verification links in seconds
    #[serde(default = "default_verification_lifetime")]
    pub verification_lifetime_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            require_verified_email: true,
            verification_lifetime_secs: default_verification_lifetime(),
        }
    }
}

/// Where a downloadable file is served from.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadSource {
    /// File on local disk, streamed by the server
    Path(String),
    /// External location the client is redirected to
    Url(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct DownloadFile {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub source: DownloadSource,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DownloadsConfig {
    #[serde(default)]
    pub files: Vec<DownloadFile>,
}

impl DownloadsConfig {
    pub fn find(&self, slug: &str) -> Option<&DownloadFile> {
        self.files.iter().find(|f| f.slug == slug)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Externally reachable base URL of this server (OAuth2 issuer)
    pub public_url: String,
    /// Base URL of the website frontend hosting login and consent pages
    pub frontend_url: String,
    /// Signs consent tokens and JWT access tokens, salts IP hashes
    pub secret_key: String,
    /// Without SMTP, outgoing mail is written to the log instead
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
    /// Receives contact form notifications
    #[serde(default)]
    pub contact_recipient: Option<String>,
    /// Proxies whose `X-Forwarded-For` header is trusted. Examples: "127.0.0.1/32", "10.0.0.0/8".
    #[serde(default)]
    pub trusted_proxies: Vec<IpNet>,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub oauth2: OAuth2Config,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub downloads: DownloadsConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IpNet {
    pub addr: IpAddr,
    pub prefix: u8,
}

impl IpNet {
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(a), IpAddr::V4(b)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix as u32)
                };
                (u32::from(a) & mask) == (u32::from(*b) & mask)
            }
            (IpAddr::V6(a), IpAddr::V6(b)) => {
                let a_bytes = a.octets();
                let b_bytes = b.octets();
                let full_bytes = (self.prefix / 8) as usize;
                let rem_bits = self.prefix % 8;
                if full_bytes > 16 {
                    return false;
                }
                if a_bytes[..full_bytes] != b_bytes[..full_bytes] {
                    return false;
                }
                if rem_bits == 0 {
                    return true;
                }
                let mask = (!0u8) << (8 - rem_bits);
                (a_bytes[full_bytes] & mask) == (b_bytes[full_bytes] & mask)
            }
            _ => false,
        }
    }
}

impl FromStr for IpNet {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip_part, prefix_part) = s
            .split_once('/')
            .ok_or_else(|| "CIDR must contain '/'".to_string())?;
        let addr = IpAddr::from_str(ip_part).map_err(|e| format!("Invalid IP: {e}"))?;
        let prefix: u8 = prefix_part
            .parse()
            .map_err(|e| format!("Invalid prefix: {e}"))?;
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix as u32 > max {
            return Err("Prefix out of range".into());
        }
        Ok(IpNet { addr, prefix })
    }
}

impl<'de> Deserialize<'de> for IpNet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_cookie_name() -> String {
    "portfolio_session".to_string()
}

fn default_session_lifetime() -> i64 {
    86400 * 30
}

fn default_true() -> bool {
    true
}

fn default_client_scopes() -> String {
    "openid profile email".to_string()
}

fn default_client_grant_types() -> String {
    "authorization_code refresh_token".to_string()
}

fn default_access_token_lifetime() -> i64 {
    3600
}

fn default_refresh_token_lifetime() -> i64 {
    86400 * 30
}

fn default_code_lifetime() -> i64 {
    600
}

fn default_verification_lifetime() -> i64 {
    86400
}

impl AppConfig {
    /// Checks invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret_key.len() < 32 {
            return Err(ConfigError::Validation(
                "secret_key must be at least 32 characters".into(),
            ));
        }
        if let Some(smtp) = &self.smtp
            && smtp.port == 0
        {
            return Err(ConfigError::Validation("smtp.port must be > 0".into()));
        }
        if self.session.lifetime_secs <= 0
            || self.oauth2.access_token_lifetime <= 0
            || self.oauth2.refresh_token_lifetime <= 0
            || self.oauth2.code_lifetime <= 0
        {
            return Err(ConfigError::Validation(
                "token, code and session lifetimes must be positive".into(),
            ));
        }
        let mut seen = HashSet::new();
        for file in &self.downloads.files {
            if !seen.insert(file.slug.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate download slug '{}'",
                    file.slug
                )));
            }
        }
        Ok(())
    }

    /// Public URL without a trailing slash.
    pub fn issuer(&self) -> &str {
        self.public_url.trim_end_matches('/')
    }

    /// Frontend URL without a trailing slash.
    pub fn frontend(&self) -> &str {
        self.frontend_url.trim_end_matches('/')
    }
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Any environment variable matching the key path separated by double underscores
/// (e.g. `OAUTH2__TOKEN_FORMAT`) overrides the file value. A `.env` file is read first
/// when present.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let _ = dotenvy::dotenv();
    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml").required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

/// Convenience helper for binaries wanting panic-on-error behaviour.
pub fn load_config_or_panic() -> AppConfig {
    match load_config() {
        Ok(c) => c,
        Err(e) => panic!("Failed to load configuration: {e}"),
    }
}
