//! Validation of account, profile, settings and contact form fields.
//!
//! Every check returns a human-readable message suitable for a 400 response.

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 32;
pub const NAME_MAX: usize = 100;
pub const BIO_MAX: usize = 500;
pub const LOCATION_MAX: usize = 100;
pub const LANGUAGE_MAX: usize = 16;
pub const URL_MAX: usize = 2048;
pub const CONTACT_MESSAGE_MAX: usize = 5000;
pub const EMAIL_MAX: usize = 254;

pub const THEMES: &[&str] = &["light", "dark", "system"];

/// Lowercased, trimmed email if it looks deliverable.
pub fn normalize_email(email: &str) -> Result<String, String> {
    let email = email.trim().to_lowercase();
    if email.len() > EMAIL_MAX {
        return Err("Email address is too long".into());
    }
    let Some((local, domain)) = email.split_once('@') else {
        return Err("Please enter a valid email address".into());
    };
    let domain_ok = !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..");
    if local.is_empty() || !domain_ok || email.chars().any(char::is_whitespace) {
        return Err("Please enter a valid email address".into());
    }
    Ok(email)
}

pub fn validate_username(username: &str) -> Result<(), String> {
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(format!(
            "Username must be between {USERNAME_MIN} and {USERNAME_MAX} characters"
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(
            "Username may only contain lowercase letters, digits, '_' and '-'".into(),
        );
    }
    Ok(())
}

/// Require an absolute http(s) URL.
pub fn validate_http_url(field: &str, value: &str) -> Result<(), String> {
    if value.len() > URL_MAX {
        return Err(format!("{field} is too long"));
    }
    match url::Url::parse(value) {
        Ok(u) if matches!(u.scheme(), "http" | "https") && u.host_str().is_some() => Ok(()),
        _ => Err(format!("{field} must be an http or https URL")),
    }
}

pub fn validate_max_len(field: &str, value: &str, max: usize) -> Result<(), String> {
    if value.chars().count() > max {
        Err(format!("{field} must be at most {max} characters"))
    } else {
        Ok(())
    }
}

pub fn validate_theme(theme: &str) -> Result<(), String> {
    if THEMES.contains(&theme) {
        Ok(())
    } else {
        Err(format!("theme must be one of {}", THEMES.join(", ")))
    }
}

/// Loose BCP 47 check: alphanumeric subtags separated by '-'.
pub fn validate_language(language: &str) -> Result<(), String> {
    let well_formed = !language.is_empty()
        && language.len() <= LANGUAGE_MAX
        && language
            .split('-')
            .all(|tag| !tag.is_empty() && tag.len() <= 8 && tag.chars().all(|c| c.is_ascii_alphanumeric()));
    if well_formed {
        Ok(())
    } else {
        Err("language must be a language tag such as 'en' or 'de-CH'".into())
    }
}
