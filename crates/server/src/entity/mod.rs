pub mod contact_message;
pub mod download_counter;
pub mod download_event;
pub mod oauth2_authorization;
pub mod oauth2_client;
pub mod oauth2_consent;
pub mod oauth2_token;
pub mod session;
pub mod user;
pub mod user_settings;
