//! Ticket model - unguessable, time- and use-bounded tokens.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Number of id characters kept when a ticket id is written to logs.
const LOG_ID_VISIBLE_CHARS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    /// Issued once per authentication event; grants service tickets.
    TicketGranting,
    /// Issued per resource; redeemed for an `Access`.
    Service,
}

impl TicketKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            TicketKind::TicketGranting => "TGT",
            TicketKind::Service => "ST",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketKind::TicketGranting => "ticket_granting",
            TicketKind::Service => "service",
        }
    }
}

/// Expiry and use-budget rules applied to a ticket at issue time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketPolicy {
    pub ttl_seconds: i64,
    /// Renew `expires_at` to `now + ttl` on every use.
    pub sliding: bool,
    /// Upper bound on a sliding ticket's lifetime, measured from issue time.
    pub hard_limit_seconds: Option<i64>,
    /// `None` means unlimited uses.
    pub max_uses: Option<u32>,
}

impl TicketPolicy {
    pub fn service(ttl_seconds: i64, max_uses: u32) -> Self {
        Self {
            ttl_seconds,
            sliding: false,
            hard_limit_seconds: None,
            max_uses: Some(max_uses),
        }
    }

    pub fn ticket_granting(ttl_seconds: i64, hard_limit_seconds: Option<i64>) -> Self {
        Self {
            ttl_seconds,
            sliding: true,
            hard_limit_seconds,
            max_uses: None,
        }
    }

    pub fn ttl(&self) -> Duration {
        seconds(self.ttl_seconds)
    }

    fn expiry_from(&self, issued_at: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        let expires_at = saturating_add(now, self.ttl());
        match self.hard_limit_seconds {
            Some(limit) => expires_at.min(saturating_add(issued_at, seconds(limit))),
            None => expires_at,
        }
    }
}

fn seconds(value: i64) -> Duration {
    Duration::try_seconds(value).unwrap_or(if value < 0 { Duration::MIN } else { Duration::MAX })
}

/// Clamps to the representable range instead of panicking.
fn saturating_add(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(if by < Duration::zero() {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// Ticket entity as held by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub kind: TicketKind,
    /// Lookup-only reference to the session that issued this ticket.
    pub owner_session_id: String,
    /// Resource a service ticket was granted for.
    pub resource_identifier: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub remaining_uses: Option<u32>,
    /// Granted directly from a primary authentication rather than from SSO.
    pub from_new_login: bool,
    pub policy: TicketPolicy,
}

impl Ticket {
    pub fn new(
        id: String,
        kind: TicketKind,
        owner_session_id: String,
        resource_identifier: Option<String>,
        policy: TicketPolicy,
        from_new_login: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            owner_session_id,
            resource_identifier,
            issued_at: now,
            expires_at: policy.expiry_from(now, now),
            last_used_at: None,
            remaining_uses: policy.max_uses,
            from_new_login,
            policy,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Use budget exhausted.
    pub fn is_consumed(&self) -> bool {
        self.remaining_uses == Some(0)
    }

    /// Uses spent so far, counting the current redemption once the registry
    /// has consumed it. `None` for tickets without a use budget.
    pub fn redemptions(&self) -> Option<u32> {
        self.policy
            .max_uses
            .zip(self.remaining_uses)
            .map(|(max_uses, remaining)| max_uses.saturating_sub(remaining))
    }

    /// Spend one use and apply sliding renewal.
    pub(crate) fn record_use(&mut self, now: DateTime<Utc>) {
        if let Some(remaining) = self.remaining_uses.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        self.touch(now);
    }

    /// Mark the ticket as used without spending budget.
    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.last_used_at = Some(now);
        if self.policy.sliding {
            self.expires_at = self.policy.expiry_from(self.issued_at, now);
        }
    }

    /// Truncated id for log fields; a full live ticket id is a bearer credential.
    pub fn log_id(id: &str) -> String {
        match id.char_indices().nth(LOG_ID_VISIBLE_CHARS) {
            Some((idx, _)) => format!("{}...", &id[..idx]),
            None => id.to_string(),
        }
    }
}
