//! Engine guard rails. Every bound is enforced at the mutation or query
//! entry point and surfaces as `LimitExceeded` with a static reason.

use crate::engine::EngineError;
use crate::model::{Ms, Span};

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LABEL_LEN: usize = 512;

pub const MAX_RESOURCES: usize = 100_000;
pub const MAX_STAFF: usize = 100_000;

pub const MAX_RULES_PER_RESOURCE: usize = 4_096;
pub const MAX_WINDOWS_PER_RESOURCE: usize = 4_096;
pub const MAX_ASSIGNMENTS_PER_RESOURCE: usize = 4_096;
pub const MAX_BOOKINGS_PER_RESOURCE: usize = 65_536;

/// Epoch. Nothing books before 1970.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z. Nothing books after the turn of the century.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// One leap year. Longer reservations are almost certainly caller bugs.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;
/// 92 days, a generous quarter view for calendar queries.
pub const MAX_QUERY_WINDOW_MS: Ms = 92 * 24 * 3_600_000;

/// Shared span validation for every user-supplied interval: ordering,
/// timestamp range, and duration.
pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::InvalidTimeRange);
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_ordering_rejected() {
        let backwards = Span { start: 200, end: 100 };
        assert!(matches!(validate_span(&backwards), Err(EngineError::InvalidTimeRange)));
        let empty = Span { start: 100, end: 100 };
        assert!(matches!(validate_span(&empty), Err(EngineError::InvalidTimeRange)));
    }

    #[test]
    fn span_bounds_enforced() {
        let early = Span { start: -1, end: 100 };
        assert!(matches!(validate_span(&early), Err(EngineError::LimitExceeded(_))));
        let late = Span::new(1_000, MAX_VALID_TIMESTAMP_MS + 1);
        assert!(matches!(validate_span(&late), Err(EngineError::LimitExceeded(_))));
        let wide = Span::new(0, MAX_SPAN_DURATION_MS + 1);
        assert!(matches!(validate_span(&wide), Err(EngineError::LimitExceeded(_))));
    }

    #[test]
    fn span_at_limits_accepted() {
        assert!(validate_span(&Span::new(0, MAX_SPAN_DURATION_MS)).is_ok());
        assert!(validate_span(&Span::new(MAX_VALID_TIMESTAMP_MS - 1_000, MAX_VALID_TIMESTAMP_MS)).is_ok());
    }
}
