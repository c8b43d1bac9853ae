//! Pure reconciliation rules
//!
//! `decide` maps (persisted intent, observation) to a decision without doing
//! any I/O. The engine applies the decision under the per-intent lock; the
//! same rule covers every event source.
//!
//! Terminal statuses are final with one exception: a FAILED or CANCELLED
//! intent is superseded by a SUCCEEDED reported by the gateway or an
//! operator, so a captured payment is always credited. EXPIRED and
//! SUCCEEDED never change.

use crate::domain::{IntentStatus, PaymentIntent, ReconciliationEvent};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// Intent already reached a terminal status; the event is a duplicate.
    AlreadyTerminal(IntentStatus),
    /// Observed status is not ahead of the current one.
    NotForward,
    /// A client-observed negative outcome is already pending.
    ProvisionalPending,
    /// Only the gateway or an operator may close an intent as EXPIRED.
    NotAuthoritative,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Ignore(IgnoreReason),
    /// Transition to SUCCEEDED and deposit `amount` (the intent's own amount).
    Credit { amount: Decimal },
    /// Transition to a terminal status with no ledger effect.
    Close(IntentStatus),
    /// Move forward along CREATED → AWAITING_PAYMENT → PROCESSING.
    Advance(IntentStatus),
    /// Remember a client-observed FAILED/CANCELLED without closing the intent.
    HoldProvisional(IntentStatus),
    /// A success report whose amount disagrees with the intent.
    AmountMismatch { expected: Decimal, observed: Decimal },
}

pub fn decide(intent: &PaymentIntent, event: &ReconciliationEvent) -> Decision {
    if intent.is_terminal() && !supersedes_negative(intent, event) {
        return Decision::Ignore(IgnoreReason::AlreadyTerminal(intent.status));
    }

    match event.observed_status {
        IntentStatus::Succeeded => match event.amount {
            Some(observed) if observed != intent.requested_amount => Decision::AmountMismatch {
                expected: intent.requested_amount,
                observed,
            },
            _ => Decision::Credit {
                amount: intent.requested_amount,
            },
        },
        status if status.is_negative() => {
            if !event.reported_by_client {
                Decision::Close(status)
            } else if intent.provisional.is_some() {
                Decision::Ignore(IgnoreReason::ProvisionalPending)
            } else {
                Decision::HoldProvisional(status)
            }
        }
        IntentStatus::Expired => {
            if event.reported_by_client {
                Decision::Ignore(IgnoreReason::NotAuthoritative)
            } else {
                Decision::Close(IntentStatus::Expired)
            }
        }
        status if status.rank() > intent.status.rank() => Decision::Advance(status),
        _ => Decision::Ignore(IgnoreReason::NotForward),
    }
}

/// Authoritative success arriving after the intent was closed FAILED/CANCELLED.
pub fn supersedes_negative(intent: &PaymentIntent, event: &ReconciliationEvent) -> bool {
    intent.status.is_negative()
        && event.observed_status == IntentStatus::Succeeded
        && !event.reported_by_client
}

/// Terminal status a held client outcome settles into once `window` has
/// passed without the gateway saying otherwise.
pub fn settle_provisional(
    intent: &PaymentIntent,
    now: DateTime<Utc>,
    window: Duration,
) -> Option<IntentStatus> {
    if intent.is_terminal() {
        return None;
    }
    intent
        .provisional
        .as_ref()
        .filter(|p| p.observed_at + window <= now)
        .map(|p| p.status)
}

/// Non-terminal and older than `ttl`.
pub fn is_expired(intent: &PaymentIntent, now: DateTime<Utc>, ttl: Duration) -> bool {
    !intent.is_terminal() && now - intent.created_at > ttl
}
