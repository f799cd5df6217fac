//! Back-channel logout notifications sent to resources.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use service_core::observability::TracedRequest;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Logout notification timed out after {0:?}")]
    Timeout(Duration),

    #[error("Logout notification transport error: {0}")]
    Transport(String),

    #[error("Resource rejected logout notification with status {0}")]
    Rejected(u16),
}

/// What a resource is told when one of its local sessions must end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutNotice {
    pub access_id: String,
    pub resource_identifier: String,
    pub ticket_id: String,
    pub issued_at: DateTime<Utc>,
}

impl LogoutNotice {
    /// SAML 2 `LogoutRequest` body; the session index is the ticket the
    /// resource validated.
    pub fn to_logout_request(&self) -> String {
        format!(
            concat!(
                "<samlp:LogoutRequest xmlns:samlp=\"urn:oasis:names:tc:SAML:2.0:protocol\" ",
                "ID=\"LR-{}\" Version=\"2.0\" IssueInstant=\"{}\">",
                "<saml:NameID xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\">@NOT_USED@</saml:NameID>",
                "<samlp:SessionIndex>{}</samlp:SessionIndex>",
                "</samlp:LogoutRequest>"
            ),
            self.access_id,
            self.issued_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.ticket_id
        )
    }
}

#[async_trait]
pub trait LogoutNotifier: Send + Sync {
    /// Ok means the resource confirmed the local session is gone.
    async fn notify_logout(&self, notice: &LogoutNotice) -> Result<(), NotifyError>;
}

/// Posts `logoutRequest=<xml>` to the resource identifier URL.
#[derive(Clone)]
pub struct HttpLogoutNotifier {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpLogoutNotifier {
    pub fn new(timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl LogoutNotifier for HttpLogoutNotifier {
    #[instrument(skip(self, notice), fields(access_id = %notice.access_id, resource = %notice.resource_identifier))]
    async fn notify_logout(&self, notice: &LogoutNotice) -> Result<(), NotifyError> {
        let body = notice.to_logout_request();

        let response = TracedRequest::post(&self.client, &notice.resource_identifier)
            .form(&[("logoutRequest", body.as_str())])
            .timeout(self.timeout)
            .request_id(notice.access_id.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotifyError::Timeout(self.timeout)
                } else {
                    NotifyError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(status = status.as_u16(), "Resource confirmed logout");
            Ok(())
        } else {
            Err(NotifyError::Rejected(status.as_u16()))
        }
    }
}

/// In-process notifier for tests and local runs: records every notice and
/// refuses the resources it is told to refuse.
pub struct MockLogoutNotifier {
    pub notices: Mutex<Vec<LogoutNotice>>,
    pub refused_resources: Mutex<HashSet<String>>,
    refuse_all: bool,
    delay: Option<Duration>,
}

impl Default for MockLogoutNotifier {
    fn default() -> Self {
        Self::accepting()
    }
}

impl MockLogoutNotifier {
    pub fn accepting() -> Self {
        Self {
            notices: Mutex::new(Vec::new()),
            refused_resources: Mutex::new(HashSet::new()),
            refuse_all: false,
            delay: None,
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse_all: true,
            ..Self::accepting()
        }
    }

    /// Sleep before answering, to exercise notification timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn refuse(&self, resource_identifier: &str) {
        if let Ok(mut refused) = self.refused_resources.lock() {
            refused.insert(resource_identifier.to_string());
        }
    }

    pub fn call_count(&self) -> usize {
        self.notices.lock().map(|n| n.len()).unwrap_or(0)
    }

    pub fn calls_for(&self, resource_identifier: &str) -> usize {
        self.notices
            .lock()
            .map(|n| {
                n.iter()
                    .filter(|notice| notice.resource_identifier == resource_identifier)
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl LogoutNotifier for MockLogoutNotifier {
    async fn notify_logout(&self, notice: &LogoutNotice) -> Result<(), NotifyError> {
        self.notices
            .lock()
            .map_err(|e| NotifyError::Transport(format!("Mock notifier mutex poisoned: {}", e)))?
            .push(notice.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let refused = self.refuse_all
            || self
                .refused_resources
                .lock()
                .map_err(|e| NotifyError::Transport(format!("Mock notifier mutex poisoned: {}", e)))?
                .contains(&notice.resource_identifier);

        if refused {
            Err(NotifyError::Rejected(403))
        } else {
            Ok(())
        }
    }
}
