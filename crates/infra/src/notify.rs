//! Outbound notification boundary.
//!
//! Delivery (mail templates, SMTP) lives outside this crate. Lifecycle
//! operations hand a [`Notification`] to a [`Notifier`] and never fail because
//! delivery failed; the failure is logged instead.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Duration;

use keyward_auth::User;
use keyward_core::{DomainError, DomainResult, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationPurpose {
    /// Welcome message carrying a password-set token.
    NewUser,
    PasswordReset,
    /// Sent to the new address; carries the confirmation token.
    EmailUpdateRequest,
    /// Sent to the previous address once the change is done.
    EmailUpdated,
    TenantInvite,
}

impl NotificationPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationPurpose::NewUser => "new_user",
            NotificationPurpose::PasswordReset => "password_reset",
            NotificationPurpose::EmailUpdateRequest => "email_update_request",
            NotificationPurpose::EmailUpdated => "email_updated",
            NotificationPurpose::TenantInvite => "tenant_invite",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub purpose: NotificationPurpose,
    /// Recipient address; differs from `user.email` for email-change mails.
    pub to: String,
    pub user: User,
    pub token: Option<String>,
    pub token_max_age: Option<Duration>,
    /// Link the recipient follows to use the token.
    pub link: Option<String>,
    pub tenant: Option<TenantId>,
}

impl Notification {
    pub fn new(purpose: NotificationPurpose, user: &User) -> Self {
        Self {
            purpose,
            to: user.email.clone(),
            user: user.clone(),
            token: None,
            token_max_age: None,
            link: None,
            tenant: None,
        }
    }

    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to = address.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>, max_age: Duration, link: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self.token_max_age = Some(max_age);
        self.link = Some(link.into());
        self
    }

    pub fn for_tenant(mut self, tenant: TenantId) -> Self {
        self.tenant = Some(tenant);
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> DomainResult<()>;
}

/// Deliver `notification`, logging (not returning) any failure.
pub async fn notify_best_effort(notifier: &dyn Notifier, notification: Notification) {
    let purpose = notification.purpose.as_str();
    let user_id = notification.user.id;
    if let Err(err) = notifier.notify(notification).await {
        tracing::warn!(purpose, user_id = %user_id, error = %err, "notification delivery failed");
    }
}

/// Writes notifications to the log. Tokens are never logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: Notification) -> DomainResult<()> {
        tracing::info!(
            purpose = notification.purpose.as_str(),
            user_id = %notification.user.id,
            has_token = notification.token.is_some(),
            link = notification.link.as_deref().unwrap_or(""),
            "notification dispatched"
        );
        Ok(())
    }
}

/// Records every notification. Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose deliveries always fail (after being recorded).
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Token of the most recent notification with `purpose`.
    pub fn last_token(&self, purpose: NotificationPurpose) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|n| n.purpose == purpose)
            .and_then(|n| n.token)
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: Notification) -> DomainResult<()> {
        self.sent
            .lock()
            .map_err(|_| DomainError::internal("lock poisoned"))?
            .push(notification);
        if self.fail {
            return Err(DomainError::unavailable("mail relay unreachable"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_auth::AccountType;

    #[tokio::test]
    async fn best_effort_swallows_failures() {
        let user = User::new("a@example.com", "A", AccountType::Regular, chrono::Utc::now()).unwrap();
        let notifier = InMemoryNotifier::failing();
        notify_best_effort(
            &notifier,
            Notification::new(NotificationPurpose::PasswordReset, &user).with_token(
                "t",
                Duration::minutes(10),
                "https://id.example.com/reset",
            ),
        )
        .await;
        assert_eq!(notifier.last_token(NotificationPurpose::PasswordReset).as_deref(), Some("t"));
        assert_eq!(notifier.last_token(NotificationPurpose::NewUser), None);
    }
}
