use super::grant::GrantCore;
use super::{
    resource_matches, Access, AccessStateError, GrantContext, RevalidationPolicy, ValidationState,
};
use crate::models::{
    AccessResponseRequest, AccessResponseResult, FailureCode, GrantRecord, Protocol,
    TokenServiceAccessRequest,
};
use async_trait::async_trait;

/// Grant for a self-validating token: the resource checks the token on its
/// own, so there is no remote session to tear down.
///
/// Revalidation is allowed. The grant is only worth keeping while the ticket
/// behind it still has uses left for a later revalidation.
pub struct SelfContainedAccess {
    core: GrantCore,
}

impl SelfContainedAccess {
    pub const REVALIDATION: RevalidationPolicy = RevalidationPolicy::Allow;

    pub fn new(ctx: GrantContext) -> Self {
        let requires_storage = ctx.remaining_uses != Some(0);
        Self {
            core: GrantCore::new(ctx, Protocol::SelfContained, Self::REVALIDATION, requires_storage),
        }
    }

    pub fn restore(ctx: GrantContext, record: &GrantRecord) -> Self {
        Self {
            core: GrantCore::restored(ctx, record, Self::REVALIDATION),
        }
    }

    fn check(&self, request: &TokenServiceAccessRequest) -> Result<(), FailureCode> {
        let expected = self.core.resource_identifier();
        if resource_matches(expected, &request.resource_identifier) {
            Ok(())
        } else {
            Err(FailureCode::ResourceMismatch {
                expected: expected.to_string(),
                presented: request.resource_identifier.clone(),
            })
        }
    }
}

#[async_trait]
impl Access for SelfContainedAccess {
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
        self.core.transition(self.check(request), false)
    }

    async fn invalidate(&self) -> bool {
        self.core.invalidate_with(|| async { false }).await
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
