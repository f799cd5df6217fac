use super::{Access, GrantContext, RevalidationPolicy, SelfContainedAccess, ServiceTicketAccess};
use crate::config::LogoutConfig;
use crate::models::{GrantRecord, Protocol, Ticket};
use crate::services::notifier::LogoutNotifier;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Picks the `Access` variant for a protocol and wires in its collaborators.
#[derive(Clone)]
pub struct AccessFactory {
    notifier: Arc<dyn LogoutNotifier>,
    logout_enabled: bool,
    notification_timeout: Duration,
}

impl AccessFactory {
    pub fn new(
        notifier: Arc<dyn LogoutNotifier>,
        logout_enabled: bool,
        notification_timeout: Duration,
    ) -> Self {
        Self {
            notifier,
            logout_enabled,
            notification_timeout,
        }
    }

    pub fn from_config(config: &LogoutConfig, notifier: Arc<dyn LogoutNotifier>) -> Self {
        Self::new(notifier, config.enabled, config.notification_timeout())
    }

    /// Whether grants built for `protocol` accept a second redemption.
    pub fn revalidation_policy(&self, protocol: Protocol) -> RevalidationPolicy {
        match protocol {
            Protocol::Cas | Protocol::Saml => ServiceTicketAccess::REVALIDATION,
            Protocol::SelfContained => SelfContainedAccess::REVALIDATION,
        }
    }

    /// New `Pending` grant for a freshly redeemed ticket.
    pub fn create(
        &self,
        protocol: Protocol,
        ticket: &Ticket,
        principal: &str,
        attributes: &BTreeMap<String, String>,
        presented_resource: &str,
    ) -> Arc<dyn Access> {
        let ctx = GrantContext {
            access_id: Uuid::new_v4().to_string(),
            ticket_id: ticket.id.clone(),
            resource_identifier: ticket
                .resource_identifier
                .clone()
                .unwrap_or_else(|| presented_resource.to_string()),
            principal: principal.to_string(),
            attributes: attributes.clone(),
            from_new_login: ticket.from_new_login,
            remaining_uses: ticket.remaining_uses,
            created_at: Utc::now(),
        };

        self.build(protocol, ctx)
    }

    fn build(&self, protocol: Protocol, ctx: GrantContext) -> Arc<dyn Access> {
        match protocol {
            Protocol::Cas | Protocol::Saml => Arc::new(ServiceTicketAccess::new(
                ctx,
                protocol,
                self.notifier.clone(),
                self.logout_enabled,
                self.notification_timeout,
            )),
            Protocol::SelfContained => Arc::new(SelfContainedAccess::new(ctx)),
        }
    }

    /// Rebuild a grant from its persisted record.
    pub fn restore(
        &self,
        record: &GrantRecord,
        principal: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Arc<dyn Access> {
        let ctx = GrantContext {
            access_id: record.access_id.clone(),
            ticket_id: record.ticket_id.clone(),
            resource_identifier: record.resource_identifier.clone(),
            principal: principal.to_string(),
            attributes: attributes.clone(),
            from_new_login: record.from_new_login,
            remaining_uses: None,
            created_at: record.created_at,
        };

        match record.protocol {
            Protocol::Cas | Protocol::Saml => Arc::new(ServiceTicketAccess::restore(
                ctx,
                record,
                self.notifier.clone(),
                self.notification_timeout,
            )),
            Protocol::SelfContained => Arc::new(SelfContainedAccess::restore(ctx, record)),
        }
    }
}
