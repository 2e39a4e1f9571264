use crate::model::*;

use super::EngineError;

/// First booking in `existing` whose interval overlaps `span`, skipping `exclude`.
///
/// Intervals are half-open: a booking ending at 10:00 and one starting at
/// 10:00 do not conflict.
pub(crate) fn find_conflict<'a>(
    existing: &'a [Booking],
    span: &Span,
    exclude: Option<BookingId>,
) -> Option<&'a Booking> {
    existing
        .iter()
        .filter(|b| Some(b.id) != exclude)
        .find(|b| b.span().overlaps(span))
}

pub(crate) fn check_no_conflict(
    existing: &[Booking],
    span: &Span,
    exclude: Option<BookingId>,
) -> Result<(), EngineError> {
    match find_conflict(existing, span, exclude) {
        Some(b) => Err(EngineError::Conflict { existing: b.id }),
        None => Ok(()),
    }
}
