//! Session transcript export — Markdown, JSON, and HTML renderings with
//! three targets: local directory, GitHub checkout, and email.
//!
//! Messages without a structured envelope are rendered from their raw text;
//! they are never skipped and never an error. GitHub and email targets
//! degrade gracefully when unconfigured, mirroring the soft-failure posture
//! of the rest of the system.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use chrono::Utc;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message as Email, SmtpTransport, Transport};
use tracing::{info, warn};

use crate::error::ExportError;
use crate::session::model::{Message, Session};
use crate::session::service::SessionStatistics;

/// Supported transcript formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Markdown,
    Json,
    Html,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            ExportFormat::Json => "json",
            ExportFormat::Html => "html",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "markdown",
            ExportFormat::Json => "json",
            ExportFormat::Html => "html",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "json" => Ok(ExportFormat::Json),
            "html" => Ok(ExportFormat::Html),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

// ── SMTP configuration ──────────────────────────────────────────────

/// SMTP settings for the email target, built from environment variables.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub default_recipient: String,
}

impl SmtpConfig {
    /// Build config from environment variables.
    /// Returns `None` if `CAFE_SMTP_HOST` is not set (email target disabled).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("CAFE_SMTP_HOST").ok()?;
        let port: u16 = std::env::var("CAFE_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);
        let username = std::env::var("CAFE_SMTP_USERNAME").unwrap_or_default();
        let password = std::env::var("CAFE_SMTP_PASSWORD").unwrap_or_default();
        let from_address =
            std::env::var("CAFE_SMTP_FROM").unwrap_or_else(|_| username.clone());
        let default_recipient = std::env::var("CAFE_EMAIL_RECIPIENT")
            .unwrap_or_else(|_| "cafevirtuel.coop@gmail.com".to_string());
        Some(Self {
            host,
            port,
            username,
            password,
            from_address,
            default_recipient,
        })
    }
}

// ── Exporter ────────────────────────────────────────────────────────

/// Renders transcripts and delivers them to the configured targets.
pub struct Exporter {
    export_dir: PathBuf,
    github_repo: Option<PathBuf>,
    smtp: Option<SmtpConfig>,
}

impl Exporter {
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
            github_repo: None,
            smtp: None,
        }
    }

    /// Path of a local GitHub checkout to drop transcripts into.
    pub fn with_github_repo(mut self, repo: Option<PathBuf>) -> Self {
        self.github_repo = repo;
        self
    }

    pub fn with_smtp(mut self, smtp: Option<SmtpConfig>) -> Self {
        self.smtp = smtp;
        self
    }

    pub fn render(
        &self,
        session: &Session,
        stats: Option<&SessionStatistics>,
        format: ExportFormat,
    ) -> Result<String, ExportError> {
        match format {
            ExportFormat::Markdown => Ok(render_markdown(session, stats)),
            ExportFormat::Json => Ok(serde_json::to_string_pretty(session)?),
            ExportFormat::Html => Ok(render_html(session, stats)),
        }
    }

    /// Render the requested formats and write them under
    /// `<export_dir>/session_<n>/`.
    ///
    /// Returns one `(format, path)` pair per written file.
    pub fn save_to_local(
        &self,
        session: &Session,
        stats: Option<&SessionStatistics>,
        formats: &[ExportFormat],
    ) -> Result<Vec<(ExportFormat, PathBuf)>, ExportError> {
        let session_dir = self
            .export_dir
            .join(format!("session_{}", session.config.session_number));
        std::fs::create_dir_all(&session_dir)?;

        let base_name = format!(
            "{}_{}",
            filename_stem(&session.config.subject),
            Utc::now().format("%Y%m%d_%H%M%S")
        );

        let mut saved = Vec::new();
        for format in formats {
            let path = session_dir.join(format!("{base_name}.{}", format.extension()));
            std::fs::write(&path, self.render(session, stats, *format)?)?;
            info!(path = %path.display(), "Session exported");
            saved.push((*format, path));
        }
        Ok(saved)
    }

    /// Write the Markdown transcript into the configured GitHub checkout
    /// and attempt a commit.
    ///
    /// Returns `None` when no checkout is configured or the path does not
    /// exist. A failed `git` invocation is logged, not fatal: the file is
    /// on disk either way.
    pub fn save_to_github(
        &self,
        session: &Session,
        stats: Option<&SessionStatistics>,
    ) -> Result<Option<PathBuf>, ExportError> {
        let Some(repo) = &self.github_repo else {
            warn!("GitHub checkout not configured, skipping export");
            return Ok(None);
        };
        if !repo.exists() {
            warn!(path = %repo.display(), "GitHub checkout path does not exist");
            return Ok(None);
        }

        let session_dir = repo.join(format!("session{}", session.config.session_number));
        std::fs::create_dir_all(&session_dir)?;

        let timestamp = session.updated_at.format("%Y%m%d_%H%M%S");
        let filename = format!(
            "[Session {}] - {} - {} - {}.md",
            session.config.session_number,
            timestamp,
            filename_stem(&session.config.subject),
            filename_stem(&session.config.summary)
        );
        let path = session_dir.join(filename);
        std::fs::write(&path, render_markdown(session, stats))?;

        let commit_message = format!(
            "Session {} - {}",
            session.config.session_number, timestamp
        );
        match commit_all(repo, &commit_message) {
            Ok(()) => info!(path = %path.display(), "Session committed to GitHub checkout"),
            Err(e) => warn!(error = %e, "git commit failed, transcript written anyway"),
        }
        Ok(Some(path))
    }

    /// Send the transcript by email: Markdown body, JSON attachment.
    ///
    /// Returns `false` when no SMTP configuration is present.
    pub fn send_to_email(
        &self,
        session: &Session,
        stats: Option<&SessionStatistics>,
        recipient: Option<&str>,
    ) -> Result<bool, ExportError> {
        let Some(smtp) = &self.smtp else {
            warn!("SMTP not configured, skipping email export");
            return Ok(false);
        };
        let recipient = recipient.unwrap_or(&smtp.default_recipient);

        let subject = format!(
            "[Session {}] - {} - {} - {}",
            session.config.session_number,
            session.created_at.format("%d/%m/%Y %H:%M"),
            session.config.subject,
            session.config.summary
        );

        let body = render_markdown(session, stats);
        let json = serde_json::to_string_pretty(session)?;
        let attachment = Attachment::new(format!(
            "session_{}.json",
            session.config.session_number
        ))
        .body(
            json.into_bytes(),
            ContentType::parse("application/json")
                .map_err(|e| ExportError::Email(format!("Invalid attachment type: {e}")))?,
        );

        let email = Email::builder()
            .from(
                smtp.from_address
                    .parse()
                    .map_err(|e| ExportError::Email(format!("Invalid from address: {e}")))?,
            )
            .to(recipient
                .parse()
                .map_err(|e| ExportError::Email(format!("Invalid recipient: {e}")))?)
            .subject(subject)
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(body))
                    .singlepart(attachment),
            )
            .map_err(|e| ExportError::Email(format!("Failed to build email: {e}")))?;

        let transport = SmtpTransport::relay(&smtp.host)
            .map_err(|e| ExportError::Email(format!("SMTP relay error: {e}")))?
            .port(smtp.port)
            .credentials(Credentials::new(
                smtp.username.clone(),
                smtp.password.clone(),
            ))
            .build();

        transport
            .send(&email)
            .map_err(|e| ExportError::Email(format!("SMTP send failed: {e}")))?;

        info!(recipient = %recipient, "Session sent by email");
        Ok(true)
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }
}

/// First 30 characters of `s`, path separators stripped.
fn filename_stem(s: &str) -> String {
    s.chars().take(30).map(|c| if c == '/' { '-' } else { c }).collect()
}

fn commit_all(repo: &Path, message: &str) -> std::io::Result<()> {
    let add = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(["add", "."])
        .status()?;
    if !add.success() {
        return Err(std::io::Error::other("git add failed"));
    }
    let commit = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(["commit", "-m", message])
        .status()?;
    if !commit.success() {
        return Err(std::io::Error::other("git commit failed"));
    }
    Ok(())
}

fn render_markdown(session: &Session, stats: Option<&SessionStatistics>) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "# ☕ Café Virtuel — Session {} - {}\n\n",
        session.config.session_number, session.config.subject
    ));
    out.push_str(&format!(
        "**Date :** {}\n\n",
        session.created_at.format("%d/%m/%Y %H:%M")
    ));
    out.push_str(&format!("**Résumé :** {}\n\n", session.config.summary));

    out.push_str("## Participants\n\n");
    for p in &session.config.participants {
        let availability = if p.available { "" } else { " *(indisponible)*" };
        out.push_str(&format!("- **{}** ({}){}\n", p.name, p.platform, availability));
    }

    out.push_str("\n## Échanges\n\n");
    for message in &session.messages {
        out.push_str(&render_markdown_message(message));
    }

    if let Some(stats) = stats {
        out.push_str("## Statistiques de la session\n\n");
        out.push_str(&stats.to_pitch_format());
    }
    out
}

fn render_markdown_message(message: &Message) -> String {
    match &message.envelope {
        Some(envelope) => {
            let mut block = format!(
                "### {} — {} ({}, {})\n\n{}\n\n",
                envelope.sender,
                envelope.timestamp.format("%d/%m/%Y %H:%M"),
                envelope.cafe_type,
                envelope.state,
                envelope.body
            );
            if !envelope.next_question.is_empty() {
                block.push_str(&format!(
                    "> **[@ {}]** {}\n\n",
                    envelope.addressee, envelope.next_question
                ));
            }
            block
        }
        None => format!(
            "### {} — {} (message brut)\n\n{}\n\n",
            message.sender,
            message.created_at.format("%d/%m/%Y %H:%M"),
            message.raw_text
        ),
    }
}

fn render_html(session: &Session, stats: Option<&SessionStatistics>) -> String {
    let mut body = String::new();
    body.push_str(&format!(
        "<h1>☕ Café Virtuel — Session {}</h1>\n<p><strong>Sujet :</strong> {}</p>\n",
        session.config.session_number,
        escape_html(&session.config.subject)
    ));

    body.push_str("<ul>\n");
    for p in &session.config.participants {
        body.push_str(&format!(
            "<li>{} ({})</li>\n",
            escape_html(&p.name),
            escape_html(&p.platform)
        ));
    }
    body.push_str("</ul>\n");

    for message in &session.messages {
        match &message.envelope {
            Some(envelope) => body.push_str(&format!(
                "<article class=\"message state-{}\">\n<h3>{} <small>({}, {})</small></h3>\n<p>{}</p>\n</article>\n",
                envelope.state,
                escape_html(&envelope.sender),
                envelope.cafe_type,
                envelope.state,
                escape_html(&envelope.body)
            )),
            None => body.push_str(&format!(
                "<article class=\"message raw\">\n<h3>{}</h3>\n<p>{}</p>\n</article>\n",
                escape_html(&message.sender),
                escape_html(&message.raw_text)
            )),
        }
    }

    if let Some(stats) = stats {
        body.push_str(&format!(
            "<section class=\"stats\">\n<h2>Statistiques</h2>\n<pre>{}</pre>\n</section>\n",
            escape_html(&stats.to_pitch_format())
        ));
    }

    format!(
        "<!DOCTYPE html>\n<html lang=\"fr\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Café Virtuel — Session {}</title>\n</head>\n<body>\n{}\n\
         <footer><p>Exporté le {}</p></footer>\n</body>\n</html>\n",
        session.config.session_number,
        body,
        Utc::now().format("%d/%m/%Y %H:%M")
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
