use super::grant::GrantCore;
use super::{
    resource_matches, Access, AccessStateError, GrantContext, RevalidationPolicy, ValidationState,
};
use crate::models::{
    AccessResponseRequest, AccessResponseResult, FailureCode, GrantRecord, Protocol,
    TokenServiceAccessRequest,
};
use crate::services::notifier::{LogoutNotice, LogoutNotifier};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Grant produced by redeeming a service ticket (CAS and SAML flows).
///
/// Bound to the resource the ticket was issued for; single validation only;
/// logout is delivered to the resource through a [`LogoutNotifier`].
pub struct ServiceTicketAccess {
    core: GrantCore,
    notifier: Arc<dyn LogoutNotifier>,
    logout_supported: bool,
    notification_timeout: Duration,
}

impl ServiceTicketAccess {
    pub const REVALIDATION: RevalidationPolicy = RevalidationPolicy::Reject;

    pub fn new(
        ctx: GrantContext,
        protocol: Protocol,
        notifier: Arc<dyn LogoutNotifier>,
        logout_supported: bool,
        notification_timeout: Duration,
    ) -> Self {
        // Revalidation is rejected, so only logout can bring us back here.
        let requires_storage = logout_supported;
        Self {
            core: GrantCore::new(ctx, protocol, Self::REVALIDATION, requires_storage),
            notifier,
            logout_supported,
            notification_timeout,
        }
    }

    pub fn restore(
        ctx: GrantContext,
        record: &GrantRecord,
        notifier: Arc<dyn LogoutNotifier>,
        notification_timeout: Duration,
    ) -> Self {
        Self {
            core: GrantCore::restored(ctx, record, Self::REVALIDATION),
            notifier,
            logout_supported: record.requires_storage,
            notification_timeout,
        }
    }

    fn check(&self, request: &TokenServiceAccessRequest) -> Result<(), FailureCode> {
        let expected = self.core.resource_identifier();
        if !resource_matches(expected, &request.resource_identifier) {
            return Err(FailureCode::ResourceMismatch {
                expected: expected.to_string(),
                presented: request.resource_identifier.clone(),
            });
        }

        if request.renew && !self.core.context().from_new_login {
            return Err(FailureCode::RenewRequired);
        }

        Ok(())
    }

    async fn notify_resource(&self) -> bool {
        if !self.logout_supported {
            return false;
        }

        let notice = LogoutNotice {
            access_id: self.core.id().to_string(),
            resource_identifier: self.core.resource_identifier().to_string(),
            ticket_id: self.core.ticket_id().to_string(),
            issued_at: Utc::now(),
        };

        match tokio::time::timeout(
            self.notification_timeout,
            self.notifier.notify_logout(&notice),
        )
        .await
        {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(
                    access_id = %notice.access_id,
                    resource = %notice.resource_identifier,
                    error = %e,
                    "Logout notification not confirmed"
                );
                false
            }
            Err(_) => {
                tracing::warn!(
                    access_id = %notice.access_id,
                    resource = %notice.resource_identifier,
                    timeout_ms = self.notification_timeout.as_millis() as u64,
                    "Logout notification timed out"
                );
                false
            }
        }
    }
}

#[async_trait]
impl Access for ServiceTicketAccess {
    fn id(&self) -> &str {
        self.core.id()
    }

    fn resource_identifier(&self) -> &str {
        self.core.resource_identifier()
    }

    fn ticket_id(&self) -> &str {
        self.core.ticket_id()
    }

    fn protocol(&self) -> Protocol {
        self.core.protocol()
    }

    fn state(&self) -> ValidationState {
        self.core.state()
    }

    fn validate(
        &self,
        request: &TokenServiceAccessRequest,
    ) -> Result<ValidationState, AccessStateError> {
        self.core.transition(self.check(request), request.renew)
    }

    async fn invalidate(&self) -> bool {
        self.core.invalidate_with(|| self.notify_resource()).await
    }

    fn is_local_session_destroyed(&self) -> bool {
        self.core.is_local_session_destroyed()
    }

    fn requires_storage(&self) -> bool {
        self.core.requires_storage()
    }

    fn generate_response(
        &self,
        request: &AccessResponseRequest,
    ) -> Result<AccessResponseResult, AccessStateError> {
        self.core.response(request)
    }

    fn record(&self) -> GrantRecord {
        self.core.record()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notifier::MockLogoutNotifier;
    use std::collections::BTreeMap;

    const RESOURCE: &str = "https://app.example.com/";

    fn context(from_new_login: bool) -> GrantContext {
        GrantContext {
            access_id: "access-1".to_string(),
            ticket_id: "ST-1-abc".to_string(),
            resource_identifier: RESOURCE.to_string(),
            principal: "alice".to_string(),
            attributes: BTreeMap::from([("mail".to_string(), "alice@example.com".to_string())]),
            from_new_login,
            remaining_uses: Some(0),
            created_at: Utc::now(),
        }
    }

    fn access(notifier: Arc<MockLogoutNotifier>) -> ServiceTicketAccess {
        ServiceTicketAccess::new(
            context(false),
            Protocol::Cas,
            notifier,
            true,
            Duration::from_millis(200),
        )
    }

    fn request(resource: &str) -> TokenServiceAccessRequest {
        TokenServiceAccessRequest::new(resource, "ST-1-abc", Protocol::Cas)
    }

    #[test]
    fn test_validate_matching_resource() {
        let access = access(Arc::new(MockLogoutNotifier::accepting()));

        assert_eq!(access.validate(&request(RESOURCE)), Ok(ValidationState::Validated));

        let response = access
            .generate_response(&AccessResponseRequest::with_attributes())
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.principal.as_deref(), Some("alice"));
        assert_eq!(response.attributes["mail"], "alice@example.com");
    }

    #[test]
    fn test_validate_resource_mismatch_fails() {
        let access = access(Arc::new(MockLogoutNotifier::accepting()));

        assert_eq!(
            access.validate(&request("https://evil.example.com/")),
            Ok(ValidationState::Failed)
        );

        let response = access
            .generate_response(&AccessResponseRequest::default())
            .unwrap();
        assert!(matches!(
            response.failure,
            Some(FailureCode::ResourceMismatch { .. })
        ));
    }

    #[test]
    fn test_renew_requires_new_login() {
        let access = access(Arc::new(MockLogoutNotifier::accepting()));

        let state = access.validate(&request(RESOURCE).with_renew(true)).unwrap();
        assert_eq!(state, ValidationState::Failed);
        assert_eq!(
            access
                .generate_response(&AccessResponseRequest::default())
                .unwrap()
                .failure,
            Some(FailureCode::RenewRequired)
        );
    }

    #[test]
    fn test_revalidation_is_rejected() {
        let access = access(Arc::new(MockLogoutNotifier::accepting()));
        access.validate(&request(RESOURCE)).unwrap();

        assert!(matches!(
            access.validate(&request(RESOURCE)),
            Err(AccessStateError::AlreadyValidated { .. })
        ));
        assert_eq!(access.state(), ValidationState::Validated);
    }

    #[test]
    fn test_generate_response_while_pending_fails() {
        let access = access(Arc::new(MockLogoutNotifier::accepting()));

        for _ in 0..3 {
            assert!(matches!(
                access.generate_response(&AccessResponseRequest::default()),
                Err(AccessStateError::Pending { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let notifier = Arc::new(MockLogoutNotifier::accepting());
        let access = access(notifier.clone());
        access.validate(&request(RESOURCE)).unwrap();

        assert!(access.invalidate().await);
        assert!(access.is_local_session_destroyed());
        assert!(access.invalidate().await);
        assert!(access.is_local_session_destroyed());

        assert_eq!(notifier.call_count(), 1);
        assert_eq!(access.state(), ValidationState::Invalidated);
    }

    #[tokio::test]
    async fn test_refused_invalidation_still_records_attempt() {
        let notifier = Arc::new(MockLogoutNotifier::refusing());
        let access = access(notifier.clone());
        access.validate(&request(RESOURCE)).unwrap();

        assert!(!access.invalidate().await);
        assert!(!access.invalidate().await);
        assert!(!access.is_local_session_destroyed());
        assert_eq!(access.state(), ValidationState::Invalidated);
        assert_eq!(notifier.call_count(), 1);

        assert!(matches!(
            access.validate(&request(RESOURCE)),
            Err(AccessStateError::Invalidated { .. })
        ));
    }

    #[tokio::test]
    async fn test_slow_resource_times_out_as_not_confirmed() {
        let notifier =
            Arc::new(MockLogoutNotifier::accepting().with_delay(Duration::from_secs(5)));
        let access = access(notifier);

        assert!(!access.invalidate().await);
        assert!(!access.is_local_session_destroyed());
    }

    #[tokio::test]
    async fn test_concurrent_invalidations_share_one_attempt() {
        let notifier =
            Arc::new(MockLogoutNotifier::accepting().with_delay(Duration::from_millis(50)));
        let access = Arc::new(access(notifier.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let access = access.clone();
                tokio::spawn(async move { access.invalidate().await })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(notifier.call_count(), 1);
    }

    #[tokio::test]
    async fn test_logout_unsupported_needs_no_storage() {
        let notifier = Arc::new(MockLogoutNotifier::accepting());
        let access = ServiceTicketAccess::new(
            context(true),
            Protocol::Saml,
            notifier.clone(),
            false,
            Duration::from_millis(200),
        );

        assert!(!access.requires_storage());
        assert!(!access.invalidate().await);
        assert_eq!(notifier.call_count(), 0);
    }

    #[tokio::test]
    async fn test_record_and_restore() {
        let notifier = Arc::new(MockLogoutNotifier::accepting());
        let access = access(notifier.clone());
        access.validate(&request(RESOURCE)).unwrap();
        access.invalidate().await;

        let record = access.record();
        assert_eq!(record.state, ValidationState::Invalidated);
        assert!(record.local_session_destroyed);

        let restored =
            ServiceTicketAccess::restore(context(false), &record, notifier.clone(), Duration::from_millis(200));
        assert!(restored.is_local_session_destroyed());
        assert!(restored.invalidate().await);
        assert_eq!(notifier.call_count(), 1);
    }
}
