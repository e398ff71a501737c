//! Email template rendering with HTML (Askama) and SCSS styling
use askama::Template;
use once_cell::sync::Lazy;

/// Compiled and inlined CSS from SCSS
static COMPILED_CSS: Lazy<String> = Lazy::new(|| {
    let scss = include_str!("../styles/email.scss");
    grass::from_string(scss.to_string(), &grass::Options::default())
        .expect("Failed to compile SCSS")
});

/// Inline CSS into HTML
#[tracing::instrument(skip(html))]
fn inline_css(html: &str) -> String {
    let options = css_inline::InlineOptions {
        load_remote_stylesheets: false,
        ..css_inline::InlineOptions::default()
    };

    let inliner = css_inline::CSSInliner::new(options);

    let html_with_style = html.replace(
        "</head>",
        &format!("<style>{}</style></head>", COMPILED_CSS.as_str()),
    );

    match inliner.inline(&html_with_style) {
        Ok(inlined) => inlined,
        Err(e) => {
            tracing::error!(error = ?e, "Failed to inline CSS");
            html.to_string()
        }
    }
}

/// Sent after registration and when an unverified account registers again.
#[derive(Template)]
#[template(path = "verification_email.html")]
pub struct VerificationEmailTemplate {
    pub name: Option<String>,
    pub verify_url: String,
    pub valid_hours: i64,
}

impl VerificationEmailTemplate {
    #[tracing::instrument(skip(self))]
    pub fn render_html(&self) -> Result<String, askama::Error> {
        let html = self.render()?;
        Ok(inline_css(&html))
    }

    #[tracing::instrument(skip(self))]
    pub fn render_text(&self) -> String {
        let greeting = match &self.name {
            Some(name) => format!("Hello {name},"),
            None => "Hello,".to_string(),
        };
        format!(
            r#"{greeting}

Thanks for creating an account.

Please verify your email address by opening the link below (valid for {} hours):
{}

If you did not create this account, you can safely ignore this email."#,
            self.valid_hours, self.verify_url
        )
    }
}

/// Forwarded to the site owner for each contact form submission.
#[derive(Template)]
#[template(path = "contact_notification.html")]
pub struct ContactNotificationTemplate {
    pub name: String,
    pub email: String,
    pub message: String,
}

impl ContactNotificationTemplate {
    #[tracing::instrument(skip(self))]
    pub fn render_html(&self) -> Result<String, askama::Error> {
        let html = self.render()?;
        Ok(inline_css(&html))
    }

    #[tracing::instrument(skip(self))]
    pub fn render_text(&self) -> String {
        format!(
            "New contact form message\n\nFrom: {} <{}>\n\n{}",
            self.name, self.email, self.message
        )
    }
}
