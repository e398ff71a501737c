//! Contact form submissions.

use crate::entity::contact_message;
use crate::validation::profile::{CONTACT_MESSAGE_MAX, NAME_MAX, normalize_email, validate_max_len};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, DatabaseConnection, DbErr};
use time::OffsetDateTime;

/// A submission that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactSubmission {
    pub name: String,
    pub email: String,
    pub message: String,
}

impl ContactSubmission {
    /// Trim and check the raw form fields.
    pub fn new(name: &str, email: &str, message: &str) -> Result<Self, String> {
        let name = name.trim();
        let message = message.trim();
        if name.is_empty() {
            return Err("Please enter your name".into());
        }
        validate_max_len("name", name, NAME_MAX)?;
        let email = normalize_email(email)?;
        if message.is_empty() {
            return Err("Please enter a message".into());
        }
        validate_max_len("message", message, CONTACT_MESSAGE_MAX)?;
        Ok(Self {
            name: name.to_string(),
            email,
            message: message.to_string(),
        })
    }
}

#[tracing::instrument(skip(db, submission), fields(email = %submission.email))]
pub async fn store_message(
    db: &DatabaseConnection,
    submission: &ContactSubmission,
) -> Result<contact_message::Model, DbErr> {
    contact_message::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        name: Set(submission.name.clone()),
        email: Set(submission.email.clone()),
        message: Set(submission.message.clone()),
        created_at: Set(OffsetDateTime::now_utc()),
    }
    .insert(db)
    .await
}
