use config::Config;
use portfolio_server::config::{
    AppConfig, CodeStoreKind, DownloadSource, SmtpConfig, TokenFormat,
};

fn from_yaml(yaml: &str) -> AppConfig {
    Config::builder()
        .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
        .build()
        .expect("Failed to build config")
        .try_deserialize()
        .expect("Failed to deserialize app config")
}

const MINIMAL: &str = r#"
database_url: "sqlite::memory:"
public_url: "https://auth.example.org/"
frontend_url: "https://example.org"
secret_key: "0123456789abcdef0123456789abcdef"
"#;

#[test]
fn test_smtp_config_deserialization() {
    let yaml_content = r#"
server: "smtp.example.com"
port: 587
username: "user@example.com"
password: "secret123"
from: "noreply@example.com"
"#;

    let smtp_config: SmtpConfig = Config::builder()
        .add_source(config::File::from_str(
            yaml_content,
            config::FileFormat::Yaml,
        ))
        .build()
        .expect("Failed to build config")
        .try_deserialize()
        .expect("Failed to deserialize SMTP config");
    assert_eq!(smtp_config.server, "smtp.example.com");
    assert_eq!(smtp_config.port, 587);
    assert_eq!(smtp_config.from, "noreply@example.com");
}

#[test]
fn test_minimal_config_defaults() {
    let config = from_yaml(MINIMAL);
    config.validate().expect("minimal config is valid");

    assert_eq!(config.listen_addr, "0.0.0.0:8080");
    assert_eq!(config.issuer(), "https://auth.example.org");
    assert!(config.smtp.is_none());
    assert_eq!(config.session.cookie_name, "portfolio_session");
    assert!(config.session.secure_cookie);
    assert_eq!(config.oauth2.access_token_lifetime, 3600);
    assert_eq!(config.oauth2.code_lifetime, 600);
    assert_eq!(config.oauth2.code_store, CodeStoreKind::Memory);
    assert_eq!(config.oauth2.token_format, TokenFormat::Opaque);
    assert!(config.oauth2.require_pkce_for_public_clients);
    assert!(config.auth.require_verified_email);
    assert!(config.downloads.files.is_empty());
}

#[test]
fn test_full_config() {
    let yaml = format!(
        r#"{MINIMAL}
contact_recipient: "me@example.org"
trusted_proxies: ["10.0.0.0/8", "::1/128"]
oauth2:
  code_store: database
  token_format: jwt
  clients:
    - id: website
      name: Website
      redirect_uris: ["https://example.org/api/auth/callback"]
      skip_consent: true
downloads:
  files:
    - slug: resume
      title: Resume
      source:
        path: /srv/files/resume.pdf
    - slug: talk
      title: Conference talk
      description: Recording
      source:
        url: https://cdn.example.org/talk.mp4
"#
    );
    let config = from_yaml(&yaml);
    config.validate().expect("full config is valid");

    assert_eq!(config.trusted_proxies.len(), 2);
    assert_eq!(config.oauth2.code_store, CodeStoreKind::Database);
    assert_eq!(config.oauth2.token_format, TokenFormat::Jwt);
    let client = &config.oauth2.clients[0];
    assert!(client.secret.is_none());
    assert_eq!(client.scopes, "openid profile email");
    assert!(client.skip_consent);
    assert_eq!(
        config.downloads.find("talk").map(|f| &f.source),
        Some(&DownloadSource::Url("https://cdn.example.org/talk.mp4".into()))
    );
    assert!(config.downloads.find("nope").is_none());
}

#[test]
fn test_validation_failures() {
    let mut config = from_yaml(MINIMAL);
    config.secret_key = "short".into();
    assert!(config.validate().is_err());

    let mut config = from_yaml(MINIMAL);
    config.oauth2.code_lifetime = 0;
    assert!(config.validate().is_err());

    let yaml = format!(
        r#"{MINIMAL}
downloads:
  files:
    - slug: same
      title: One
      source:
        url: https://example.org/1
    - slug: same
      title: Two
      source:
        url: https://example.org/2
"#
    );
    assert!(from_yaml(&yaml).validate().is_err());
}

#[test]
fn test_invalid_trusted_proxy_is_rejected() {
    let yaml = format!("{MINIMAL}\ntrusted_proxies: [\"10.0.0.0/33\"]\n");
    let result = Config::builder()
        .add_source(config::File::from_str(&yaml, config::FileFormat::Yaml))
        .build()
        .expect("Failed to build config")
        .try_deserialize::<AppConfig>();
    assert!(result.is_err());
}
