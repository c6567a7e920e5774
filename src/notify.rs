//! End-of-run reporting.
//!
//! The driver hands the ordered list of [`ImportFileStatus`] records to every
//! [`Notifier`] once all files have been processed. Subjects and bodies are
//! small templates with `{success_count}`, `{error_count}` and `{files}`
//! placeholders; `{files}` expands to the totals followed by one numbered line
//! per file with its row count or its error.
//!
//! [`EmailNotifier`] delivers the rendered notification over SMTP and only
//! does so when a server, a sender and at least one recipient are configured.

use std::{fmt, fmt::Write as _, fs::File, io::BufWriter, path::PathBuf};

use anyhow::{Context, Result, bail};
use lettre::message::{Mailbox, MessageBuilder, header::ContentType};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{Message, SmtpTransport, Transport};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SUCCESS_SUBJECT: &str = "csv2table: imported {success_count} file(s)";
pub const DEFAULT_ERROR_SUBJECT: &str = "csv2table: import errors";
pub const DEFAULT_BODY: &str = "Hello,\n\n{files}\nBye.\n";

/// Port of SMTP over implicit TLS; every other port uses STARTTLS.
const SMTPS_PORT: u16 = 465;

/// Outcome of importing one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFileStatus {
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub row_count: usize,
}

impl ImportFileStatus {
    pub fn success(file_name: impl Into<String>, row_count: usize) -> Self {
        ImportFileStatus {
            file_name: file_name.into(),
            error: None,
            row_count,
        }
    }

    pub fn failure(file_name: impl Into<String>, error: impl Into<String>, row_count: usize) -> Self {
        ImportFileStatus {
            file_name: file_name.into(),
            error: Some(error.into()),
            row_count,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub success_count: usize,
    pub error_count: usize,
    pub files: Vec<ImportFileStatus>,
}

impl RunSummary {
    pub fn from_statuses(files: Vec<ImportFileStatus>) -> Self {
        let success_count = files.iter().filter(|status| status.is_success()).count();
        RunSummary {
            success_count,
            error_count: files.len() - success_count,
            files,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn total_rows(&self) -> usize {
        self.files
            .iter()
            .filter(|status| status.is_success())
            .map(|status| status.row_count)
            .sum()
    }
}

/// The `notify` table of the global configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct NotifyConfig {
    pub send_on_success: bool,
    pub send_on_error: bool,
    pub success_subject: String,
    pub success_body: String,
    pub error_subject: String,
    pub error_body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    /// `host` or `host:port`, e.g. `smtp.example.com:587`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plain_auth: Option<PlainAuth>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        NotifyConfig {
            send_on_success: true,
            send_on_error: true,
            success_subject: DEFAULT_SUCCESS_SUBJECT.to_string(),
            success_body: DEFAULT_BODY.to_string(),
            error_subject: DEFAULT_ERROR_SUBJECT.to_string(),
            error_body: DEFAULT_BODY.to_string(),
            report: None,
            from: None,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            smtp_server: None,
            plain_auth: None,
        }
    }
}

/// Credentials for the SMTP `PLAIN` mechanism.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PlainAuth {
    pub identity: String,
    pub username: String,
    pub password: String,
    /// Host the credentials are meant for; must match the SMTP server.
    pub host: String,
}

impl fmt::Debug for PlainAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainAuth")
            .field("identity", &self.identity)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

impl NotifyConfig {
    /// Renders the notification for a run, or `None` when the send flags
    /// say this outcome should not be reported.
    pub fn render(&self, summary: &RunSummary) -> Option<Notification> {
        let (subject, body) = if summary.has_errors() {
            if !self.send_on_error {
                return None;
            }
            (&self.error_subject, &self.error_body)
        } else {
            if !self.send_on_success {
                return None;
            }
            (&self.success_subject, &self.success_body)
        };
        Some(Notification {
            subject: fill_placeholders(subject, summary),
            body: fill_placeholders(body, summary),
        })
    }

    /// Mail goes out only with a server, a sender and at least one recipient.
    pub fn email_configured(&self) -> bool {
        let set = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());
        set(&self.smtp_server) && set(&self.from) && !self.to.is_empty()
    }
}

fn fill_placeholders(template: &str, summary: &RunSummary) -> String {
    let mut filled = template
        .replace("{success_count}", &summary.success_count.to_string())
        .replace("{error_count}", &summary.error_count.to_string());
    if filled.contains("{files}") {
        filled = filled.replace("{files}", &render_body(summary));
    }
    filled
}

pub fn render_body(summary: &RunSummary) -> String {
    let mut body = String::new();
    if summary.success_count > 0 {
        let _ = writeln!(body, "Successfully imported {} file(s).", summary.success_count);
    }
    if summary.error_count > 0 {
        let _ = writeln!(body, "{} file(s) produced errors.", summary.error_count);
    }
    for (idx, status) in summary.files.iter().enumerate() {
        match &status.error {
            Some(error) => {
                let _ = writeln!(body, "{}. {}: Error: {}", idx + 1, status.file_name, error);
            }
            None => {
                let _ = writeln!(
                    body,
                    "{}. {}: Imported {} rows",
                    idx + 1,
                    status.file_name,
                    status.row_count
                );
            }
        }
    }
    body
}

/// Receives the outcome of a run.
pub trait Notifier {
    fn notify(&self, summary: &RunSummary) -> Result<()>;
}

/// Writes the rendered notification to the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    config: NotifyConfig,
}

impl LogNotifier {
    pub fn new(config: NotifyConfig) -> Self {
        Self { config }
    }
}

impl Notifier for LogNotifier {
    fn notify(&self, summary: &RunSummary) -> Result<()> {
        let Some(notification) = self.config.render(summary) else {
            return Ok(());
        };
        if summary.has_errors() {
            warn!("{}", notification.subject);
        } else {
            info!("{}", notification.subject);
        }
        for line in render_body(summary).lines() {
            info!("{line}");
        }
        Ok(())
    }
}

/// Mails the rendered notification through an SMTP relay.
#[derive(Debug, Clone)]
pub struct EmailNotifier {
    config: NotifyConfig,
}

impl EmailNotifier {
    pub fn new(config: NotifyConfig) -> Self {
        Self { config }
    }

    /// Builds the message for a run without sending it. `None` when mail is
    /// not configured or the send flags skip this outcome.
    pub fn message(&self, summary: &RunSummary) -> Result<Option<Message>> {
        if !self.config.email_configured() {
            return Ok(None);
        }
        let Some(notification) = self.config.render(summary) else {
            return Ok(None);
        };
        let from = self.config.from.as_deref().unwrap_or_default();
        let mut builder = Message::builder()
            .from(mailbox(from)?)
            .subject(notification.subject);
        builder = add_recipients(builder, &self.config.to, MessageBuilder::to)?;
        builder = add_recipients(builder, &self.config.cc, MessageBuilder::cc)?;
        builder = add_recipients(builder, &self.config.bcc, MessageBuilder::bcc)?;
        let message = builder
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body)
            .context("Building notification mail")?;
        Ok(Some(message))
    }

    fn transport(&self) -> Result<SmtpTransport> {
        let server = self.config.smtp_server.as_deref().unwrap_or_default().trim();
        let (host, port) = split_server(server)?;
        if let Some(auth) = &self.config.plain_auth {
            if !auth.host.is_empty() && auth.host != host {
                bail!(
                    "plainAuth host {:?} does not match SMTP server {host:?}",
                    auth.host
                );
            }
        }

        let relay = if port == Some(SMTPS_PORT) {
            SmtpTransport::relay(host)
        } else {
            SmtpTransport::starttls_relay(host)
        };
        let builder = relay.with_context(|| format!("Configuring SMTP relay {server:?}"))?;
        let mut builder = match port {
            Some(port) => builder.port(port),
            None => builder,
        };
        if let Some(auth) = &self.config.plain_auth {
            if !auth.identity.is_empty() && auth.identity != auth.username {
                warn!(
                    "plainAuth identity {:?} is ignored; authenticating as {:?}",
                    auth.identity, auth.username
                );
            }
            builder = builder
                .credentials(Credentials::new(auth.username.clone(), auth.password.clone()))
                .authentication(vec![Mechanism::Plain]);
        }
        Ok(builder.build())
    }
}

impl Notifier for EmailNotifier {
    fn notify(&self, summary: &RunSummary) -> Result<()> {
        let Some(message) = self.message(summary)? else {
            debug!("Mail notification skipped");
            return Ok(());
        };
        let transport = self.transport()?;
        transport
            .send(&message)
            .context("Sending notification mail")?;
        info!("Notification mailed to {}", self.config.to.join(", "));
        Ok(())
    }
}

fn mailbox(address: &str) -> Result<Mailbox> {
    address
        .trim()
        .parse()
        .with_context(|| format!("Invalid mail address {address:?}"))
}

fn add_recipients(
    mut builder: MessageBuilder,
    addresses: &[String],
    add: fn(MessageBuilder, Mailbox) -> MessageBuilder,
) -> Result<MessageBuilder> {
    for address in addresses {
        builder = add(builder, mailbox(address)?);
    }
    Ok(builder)
}

/// Splits `host:port`; a bare host keeps the transport's default port.
fn split_server(server: &str) -> Result<(&str, Option<u16>)> {
    match server.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .with_context(|| format!("Invalid port in SMTP server {server:?}"))?;
            Ok((host, Some(port)))
        }
        None => Ok((server, None)),
    }
}

/// Writes the run summary as pretty-printed JSON.
#[derive(Debug, Clone)]
pub struct ReportFileNotifier {
    path: PathBuf,
}

impl ReportFileNotifier {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Notifier for ReportFileNotifier {
    fn notify(&self, summary: &RunSummary) -> Result<()> {
        let file = File::create(&self.path)
            .with_context(|| format!("Creating report file {:?}", self.path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), summary)
            .with_context(|| format!("Writing report file {:?}", self.path))?;
        info!("Run report written to {:?}", self.path);
        Ok(())
    }
}
