use crate::model::*;

// ── Availability view ─────────────────────────────────────────────

pub const BOOKED_LABEL: &str = "Booked";
pub const BLOCKED_LABEL: &str = "Unavailable";

/// Merge a host's bookings and blocks overlapping `window` into one labelled list.
///
/// Rows are sorted by start; on equal starts bookings come before blocks, then
/// ids break the remaining ties so the output is deterministic.
pub fn availability_view(host: &HostState, window: &Span) -> Vec<AvailabilitySlot> {
    let bookings = host.query(EntityKind::Booking, window);
    let blocks = host.query(EntityKind::Block, window);

    let mut slots: Vec<AvailabilitySlot> = bookings.chain(blocks).map(slot_for).collect();
    slots.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then(a.kind.cmp(&b.kind))
            .then(a.id.cmp(&b.id))
    });
    slots
}

fn slot_for(interval: &Interval) -> AvailabilitySlot {
    match &interval.kind {
        IntervalKind::Booking(details) => {
            let name = &details.guest.name;
            let label = if name.trim().is_empty() {
                BOOKED_LABEL.to_string()
            } else {
                name.clone()
            };
            AvailabilitySlot {
                id: interval.id,
                kind: SlotKind::Booking,
                start: interval.span.start,
                end: interval.span.end,
                label,
                guest_name: Some(name.clone()),
                guest_email: Some(details.guest.email.clone()),
            }
        }
        IntervalKind::Block(_) => AvailabilitySlot {
            id: interval.id,
            kind: SlotKind::Blocked,
            start: interval.span.start,
            end: interval.span.end,
            label: BLOCKED_LABEL.to_string(),
            guest_name: None,
            guest_email: None,
        },
    }
}
