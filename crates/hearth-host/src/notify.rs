//! Notification delivery boundary.
//!
//! Rooms fire notifications on lifecycle edges (server came up, server went
//! down). Actual transport is delegated; the bundled implementation records
//! deliveries through tracing so the rest of the host can treat notification
//! as fire-and-forget.

use std::sync::OnceLock;

use regex::Regex;

pub trait Notifier: Send + Sync {
    fn send(&self, to: &[String], subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Logs every delivery instead of sending it anywhere.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn send(&self, to: &[String], subject: &str, body: &str) -> anyhow::Result<()> {
        if to.is_empty() {
            return Ok(());
        }
        tracing::info!(
            recipients = to.join(","),
            subject,
            body,
            "notification dispatched"
        );
        Ok(())
    }
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap())
}

pub fn is_valid_email(addr: &str) -> bool {
    email_re().is_match(addr)
}

pub fn are_valid_emails<'a>(addrs: impl IntoIterator<Item = &'a str>) -> bool {
    addrs.into_iter().all(is_valid_email)
}
