//! Google API adapters
//!
//! This module provides:
//! - OAuth2 authentication shared by Gmail and Sheets
//! - Gmail client implementing [`MailboxSource`](crate::sync::MailboxSource)
//! - Sheets client implementing [`RecordSink`](crate::sync::RecordSink)
//!
//! All HTTP is synchronous (ureq) to stay executor-agnostic.

pub mod api;
mod auth;
mod gmail;
mod sheets;

pub use auth::GoogleAuth;
pub use gmail::{GmailClient, SearchFilter};
pub use sheets::SheetsClient;

use crate::error::Unreachable;

/// Convert a ureq failure into an error the sync engine can classify
///
/// Transport failures and 5xx responses become [`Unreachable`]; any other
/// status stays an ordinary error for the current call.
pub(crate) fn request_error(
    service: &'static str,
    action: &str,
    err: ureq::Error,
) -> anyhow::Error {
    match err {
        ureq::Error::StatusCode(status) if status >= 500 => {
            Unreachable::new(service, format!("{} returned HTTP {}", action, status)).into()
        }
        ureq::Error::StatusCode(status) => {
            anyhow::anyhow!("{} failed with HTTP {}", action, status)
        }
        e @ (ureq::Error::Io(_)
        | ureq::Error::Timeout(_)
        | ureq::Error::HostNotFound
        | ureq::Error::ConnectionFailed) => {
            Unreachable::new(service, format!("{}: {}", action, e)).into()
        }
        e => anyhow::anyhow!("{} failed: {}", action, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_unreachable() {
        let err = request_error("gmail", "list messages", ureq::Error::StatusCode(503));
        assert!(Unreachable::is_in(&err));
    }

    #[test]
    fn test_client_errors_are_ordinary() {
        let err = request_error("sheets", "append rows", ureq::Error::StatusCode(400));
        assert!(!Unreachable::is_in(&err));
        assert!(err.to_string().contains("HTTP 400"));
    }

    #[test]
    fn test_connection_failures_are_unreachable() {
        let err = request_error("sheets", "append rows", ureq::Error::ConnectionFailed);
        assert!(Unreachable::is_in(&err));
    }
}
