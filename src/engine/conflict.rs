use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::EngineError;

/// Which claims take part in a conflict check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictScope {
    /// Active reservations and active service windows.
    AllClaims,
    /// Active reservations only. Service windows may overlap each other.
    ReservationsOnly,
}

/// First active claim on `rs` overlapping `candidate`, skipping `exclude`.
/// Reservations are scanned before service windows.
pub fn check_conflict(
    rs: &ResourceState,
    candidate: &Window,
    scope: ConflictScope,
    exclude: Option<Ulid>,
) -> Option<Conflict> {
    let reservation = rs
        .overlapping_reservations(candidate)
        .find(|r| r.is_active() && Some(r.id) != exclude)
        .map(|r| Conflict {
            kind: ClaimKind::Reservation,
            id: r.id,
        });
    if reservation.is_some() || scope == ConflictScope::ReservationsOnly {
        return reservation;
    }
    rs.overlapping_windows(candidate)
        .find(|w| w.is_active() && Some(w.id) != exclude)
        .map(|w| Conflict {
            kind: ClaimKind::ServiceWindow,
            id: w.id,
        })
}

pub(crate) fn ensure_no_conflict(
    rs: &ResourceState,
    candidate: &Window,
    scope: ConflictScope,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match check_conflict(rs, candidate, scope, exclude) {
        None => Ok(()),
        Some(conflict) => {
            let kind = match conflict.kind {
                ClaimKind::Reservation => "reservation",
                ClaimKind::ServiceWindow => "service_window",
            };
            metrics::counter!(observability::CONFLICTS_TOTAL, "with" => kind).increment(1);
            Err(EngineError::Conflict(conflict))
        }
    }
}

fn validate_order(start: Ms, end: Option<Ms>) -> Result<(), EngineError> {
    if let Some(end) = end
        && start >= end
    {
        return Err(EngineError::Validation("end must be after start"));
    }
    Ok(())
}

fn validate_range(start: Ms, end: Option<Ms>) -> Result<(), EngineError> {
    if start < MIN_VALID_TIMESTAMP_MS || end.unwrap_or(start) > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// A new reservation: bounded, in the future, not absurdly long. Malformed
/// and past-dated spans are validation errors before any limit applies.
pub(crate) fn validate_reservation_span(span: &Span, now: Ms) -> Result<(), EngineError> {
    validate_order(span.start, Some(span.end))?;
    if span.start < now {
        return Err(EngineError::Validation("cannot reserve in the past"));
    }
    validate_range(span.start, Some(span.end))?;
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// A service window may start in the past and may be open-ended.
pub(crate) fn validate_service_window(window: &Window) -> Result<(), EngineError> {
    validate_order(window.start, window.end)?;
    validate_range(window.start, window.end)
}

pub(crate) fn validate_text(text: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if text.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}
