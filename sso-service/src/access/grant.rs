use super::{AccessStateError, GrantContext, RevalidationPolicy, ValidationState};
use crate::models::{
    AccessResponseRequest, AccessResponseResult, FailureCode, GrantRecord, Protocol,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::OnceCell;

#[derive(Debug, Default)]
struct GrantState {
    state: ValidationState,
    failure: Option<FailureCode>,
    renewed: bool,
    validated_at: Option<DateTime<Utc>>,
}

/// State machine shared by every `Access` variant.
///
/// The mutex is never held across an await. The once-cell records the single
/// invalidation attempt and hands its result to every later caller.
pub(crate) struct GrantCore {
    ctx: GrantContext,
    protocol: Protocol,
    revalidation: RevalidationPolicy,
    requires_storage: bool,
    inner: Mutex<GrantState>,
    invalidation: OnceCell<bool>,
}

impl GrantCore {
    pub(crate) fn new(
        ctx: GrantContext,
        protocol: Protocol,
        revalidation: RevalidationPolicy,
        requires_storage: bool,
    ) -> Self {
        Self {
            ctx,
            protocol,
            revalidation,
            requires_storage,
            inner: Mutex::new(GrantState::default()),
            invalidation: OnceCell::new(),
        }
    }

    pub(crate) fn restored(
        ctx: GrantContext,
        record: &GrantRecord,
        revalidation: RevalidationPolicy,
    ) -> Self {
        let invalidated = record.state == ValidationState::Invalidated;
        Self {
            ctx,
            protocol: record.protocol,
            revalidation,
            requires_storage: record.requires_storage,
            inner: Mutex::new(GrantState {
                state: record.state,
                failure: None,
                renewed: false,
                validated_at: None,
            }),
            invalidation: OnceCell::new_with(invalidated.then_some(record.local_session_destroyed)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GrantState> {
        // Nothing panics while the lock is held, so a poisoned state is still coherent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn context(&self) -> &GrantContext {
        &self.ctx
    }

    pub(crate) fn id(&self) -> &str {
        &self.ctx.access_id
    }

    pub(crate) fn resource_identifier(&self) -> &str {
        &self.ctx.resource_identifier
    }

    pub(crate) fn ticket_id(&self) -> &str {
        &self.ctx.ticket_id
    }

    pub(crate) fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub(crate) fn requires_storage(&self) -> bool {
        self.requires_storage
    }

    pub(crate) fn state(&self) -> ValidationState {
        self.lock().state
    }

    /// Apply a verdict computed by the variant's checks.
    pub(crate) fn transition(
        &self,
        verdict: Result<(), FailureCode>,
        renewed: bool,
    ) -> Result<ValidationState, AccessStateError> {
        let access_id = self.ctx.access_id.clone();
        let mut guard = self.lock();

        match (guard.state, self.revalidation) {
            (ValidationState::Pending, _) => {}
            (ValidationState::Validated, RevalidationPolicy::Allow) => {}
            (ValidationState::Validated, RevalidationPolicy::Reject) => {
                return Err(AccessStateError::AlreadyValidated { access_id });
            }
            (ValidationState::Failed, _) => {
                return Err(AccessStateError::Failed { access_id });
            }
            (ValidationState::Invalidated, _) => {
                return Err(AccessStateError::Invalidated { access_id });
            }
        }

        match verdict {
            Ok(()) => {
                guard.state = ValidationState::Validated;
                guard.failure = None;
                guard.renewed = renewed;
                guard.validated_at = Some(Utc::now());
            }
            Err(failure) => {
                guard.state = ValidationState::Failed;
                guard.failure = Some(failure);
            }
        }

        Ok(guard.state)
    }

    /// Record the invalidation, then run `teardown` at most once.
    pub(crate) async fn invalidate_with<F, Fut>(&self, teardown: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        {
            let mut guard = self.lock();
            guard.state = ValidationState::Invalidated;
        }

        *self.invalidation.get_or_init(teardown).await
    }

    pub(crate) fn is_local_session_destroyed(&self) -> bool {
        self.invalidation.get().copied().unwrap_or(false)
    }

    pub(crate) fn response(
        &self,
        request: &AccessResponseRequest,
    ) -> Result<AccessResponseResult, AccessStateError> {
        let guard = self.lock();
        let ctx = &self.ctx;

        match guard.state {
            ValidationState::Pending => Err(AccessStateError::Pending {
                access_id: ctx.access_id.clone(),
            }),
            ValidationState::Validated => {
                let attributes = if request.include_attributes {
                    ctx.attributes.clone()
                } else {
                    BTreeMap::new()
                };
                Ok(AccessResponseResult::success(
                    &ctx.access_id,
                    &ctx.resource_identifier,
                    &ctx.principal,
                    attributes,
                    ctx.from_new_login,
                    guard.renewed,
                ))
            }
            ValidationState::Failed => Ok(AccessResponseResult::failure(
                &ctx.resource_identifier,
                Some(&ctx.access_id),
                guard
                    .failure
                    .clone()
                    .unwrap_or(FailureCode::AccessInvalidated),
            )),
            ValidationState::Invalidated => Ok(AccessResponseResult::failure(
                &ctx.resource_identifier,
                Some(&ctx.access_id),
                FailureCode::AccessInvalidated,
            )),
        }
    }

    pub(crate) fn record(&self) -> GrantRecord {
        GrantRecord {
            access_id: self.ctx.access_id.clone(),
            resource_identifier: self.ctx.resource_identifier.clone(),
            ticket_id: self.ctx.ticket_id.clone(),
            protocol: self.protocol,
            state: self.state(),
            local_session_destroyed: self.is_local_session_destroyed(),
            from_new_login: self.ctx.from_new_login,
            requires_storage: self.requires_storage,
            created_at: self.ctx.created_at,
        }
    }
}
