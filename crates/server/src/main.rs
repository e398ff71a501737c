use lettre::{AsyncSmtpTransport, Tokio1Executor, transport::smtp::authentication::Credentials};
use portfolio_server::AppResources;
use portfolio_server::api::start_webserver;
use portfolio_server::config::{SmtpConfig, load_config_or_panic};
use portfolio_server::maintenance::spawn_cleanup_task;
use portfolio_server::oauth2::{ClientRegistry, OAuth2State, state::code_store};
use rustls::crypto;
use rustls::crypto::CryptoProvider;
use sea_orm::Database;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_tracing() {
    let default_directives = "portfolio_server=info,tower_http=info,hyper=warn,sea_orm=warn";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_level(true))
        .init();
}

fn build_mailer(smtp: &SmtpConfig) -> color_eyre::Result<AsyncSmtpTransport<Tokio1Executor>> {
    let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.server)?.port(smtp.port);
    if !smtp.username.is_empty() {
        builder = builder.credentials(Credentials::new(
            smtp.username.clone(),
            smtp.password.clone(),
        ));
    }
    Ok(builder.build())
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    initialize_tracing();

    let config = Arc::new(load_config_or_panic());

    let ring_provider = crypto::ring::default_provider();
    if CryptoProvider::install_default(ring_provider).is_err() {
        tracing::debug!("A rustls crypto provider was already installed");
    }

    let db = Arc::new(Database::connect(&config.database_url).await?);

    let mailer = match &config.smtp {
        Some(smtp) => Some(Arc::new(build_mailer(smtp)?)),
        None => {
            tracing::warn!("No SMTP server configured; emails will not be sent");
            None
        }
    };

    let synced = ClientRegistry::new(db.clone())
        .sync_configured_clients(&config.oauth2.clients)
        .await?;
    tracing::info!(clients = synced, "Configured OAuth2 clients synced");

    let codes = code_store(db.clone(), config.oauth2.code_store);
    let oauth_state = OAuth2State::new(db.clone(), &config, codes.clone());
    let resources = AppResources { db, mailer, config };

    spawn_cleanup_task(resources.clone(), codes);

    start_webserver(resources, oauth_state).await
}
