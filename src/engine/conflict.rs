use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Ms
}

/// Build the interval for a new block or booking.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    let span = Span::checked(start, end).ok_or(EngineError::InvalidRange { start, end })?;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(span)
}

/// Build an availability query window. Inverted windows are a client error rather
/// than an empty result.
pub(crate) fn validate_window(start: Ms, end: Ms) -> Result<Span, EngineError> {
    let window = Span::checked(start, end).ok_or(EngineError::InvalidWindow { start, end })?;
    if window.start < MIN_VALID_TIMESTAMP_MS || window.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if window.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(window)
}

pub(crate) fn validate_slug(slug: &str) -> Result<(), EngineError> {
    if slug.len() > MAX_SLUG_LEN {
        return Err(EngineError::LimitExceeded("slug too long"));
    }
    let well_formed = !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !well_formed {
        return Err(EngineError::InvalidSlug(slug.to_string()));
    }
    Ok(())
}

pub(crate) fn validate_guest(guest: &Guest) -> Result<(), EngineError> {
    if guest.name.len() > MAX_GUEST_NAME_LEN {
        return Err(EngineError::LimitExceeded("guest name too long"));
    }
    if guest.email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("guest email too long"));
    }
    if let Some(ref note) = guest.note
        && note.len() > MAX_NOTE_LEN {
            return Err(EngineError::LimitExceeded("note too long"));
        }
    Ok(())
}

/// A booking is admitted only if nothing on the host timeline, block or booking,
/// overlaps it. Must run under the host's write lock together with the insert.
pub(crate) fn check_admission(hs: &HostState, span: &Span) -> Result<(), EngineError> {
    if hs.exists_overlap(EntityKind::Block, span) || hs.exists_overlap(EntityKind::Booking, span) {
        return Err(EngineError::SlotUnavailable);
    }
    Ok(())
}

/// Blocks a new block over `span` replaces: those nested with it in either
/// direction. Partially overlapping blocks and all bookings are left alone.
pub(crate) fn coalesce_targets(hs: &HostState, span: &Span) -> Vec<Ulid> {
    hs.query(EntityKind::Block, span)
        .filter(|i| i.span.is_nested_with(span))
        .map(|i| i.id)
        .collect()
}
