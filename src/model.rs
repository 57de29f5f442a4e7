use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Like `new`, but yields `None` for empty or inverted ranges.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end.saturating_sub(self.start)
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Returns true if either span fully contains the other.
    pub fn is_nested_with(&self, other: &Span) -> bool {
        self.contains_span(other) || other.contains_span(self)
    }
}

/// Tag carried by every block. Only one variant exists today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    Blocked,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    /// Reserved. Nothing transitions a booking here yet.
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }
}

/// Guest display info. Opaque to the engine apart from length limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub name: String,
    pub email: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDetails {
    pub guest: Guest,
    pub status: BookingStatus,
    pub created_at: Ms,
}

/// What an interval on a host timeline represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalKind {
    /// Host-imposed unavailability.
    Block(BlockKind),
    /// Guest commitment.
    Booking(BookingDetails),
}

/// Selector for timeline queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Block,
    Booking,
}

/// A single entity on a host timeline. Blocks and bookings are both intervals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub id: Ulid,
    pub span: Span,
    pub kind: IntervalKind,
}

impl Interval {
    pub fn entity_kind(&self) -> EntityKind {
        match self.kind {
            IntervalKind::Block(_) => EntityKind::Block,
            IntervalKind::Booking(_) => EntityKind::Booking,
        }
    }

    pub fn is(&self, kind: EntityKind) -> bool {
        self.entity_kind() == kind
    }
}

#[derive(Debug, Clone)]
pub struct HostState {
    pub id: Ulid,
    pub slug: String,
    pub email: Option<String>,
    pub created_at: Ms,
    /// Blocks and bookings, sorted by `span.start`.
    pub intervals: Vec<Interval>,
}

impl HostState {
    pub fn new(id: Ulid, slug: String, email: Option<String>, created_at: Ms) -> Self {
        Self {
            id,
            slug,
            email,
            created_at,
            intervals: Vec::new(),
        }
    }

    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: Interval) {
        let pos = self
            .intervals
            .partition_point(|i| i.span.start <= interval.span.start);
        self.intervals.insert(pos, interval);
    }

    /// Remove interval by id, whatever its kind.
    pub fn remove_interval(&mut self, id: Ulid) -> Option<Interval> {
        let pos = self.intervals.iter().position(|i| i.id == id)?;
        Some(self.intervals.remove(pos))
    }

    /// Remove interval by id only if it is of the given kind.
    pub fn remove_of_kind(&mut self, kind: EntityKind, id: Ulid) -> Option<Interval> {
        let pos = self
            .intervals
            .iter()
            .position(|i| i.id == id && i.is(kind))?;
        Some(self.intervals.remove(pos))
    }

    /// Remove every interval of `kind` matching `pred`. Returns the removed intervals
    /// in timeline order.
    pub fn remove_where(
        &mut self,
        kind: EntityKind,
        mut pred: impl FnMut(&Interval) -> bool,
    ) -> Vec<Interval> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.intervals.len());
        for interval in self.intervals.drain(..) {
            if interval.is(kind) && pred(&interval) {
                removed.push(interval);
            } else {
                kept.push(interval);
            }
        }
        self.intervals = kept;
        removed
    }

    pub fn find(&self, id: Ulid) -> Option<&Interval> {
        self.intervals.iter().find(|i| i.id == id)
    }

    /// Return only intervals whose span overlaps the query window.
    /// Uses binary search to skip intervals starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        let query = *query;
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.overlaps(&query))
    }

    /// Intervals of one kind overlapping `window`.
    pub fn query(&self, kind: EntityKind, window: &Span) -> impl Iterator<Item = &Interval> {
        self.overlapping(window).filter(move |i| i.is(kind))
    }

    pub fn exists_overlap(&self, kind: EntityKind, span: &Span) -> bool {
        self.query(kind, span).next().is_some()
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.intervals.iter().filter(|i| i.is(kind)).count()
    }
}

/// Flat event types; this is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    HostCreated {
        id: Ulid,
        slug: String,
        email: Option<String>,
        created_at: Ms,
    },
    HostDeleted {
        id: Ulid,
    },
    /// A new block plus the blocks it replaced, as one record.
    BlockSet {
        id: Ulid,
        host_id: Ulid,
        span: Span,
        kind: BlockKind,
        replaced: Vec<Ulid>,
    },
    BlockDeleted {
        id: Ulid,
        host_id: Ulid,
    },
    BookingCreated {
        id: Ulid,
        host_id: Ulid,
        span: Span,
        guest: Guest,
        created_at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub id: Ulid,
    pub slug: String,
    pub email: Option<String>,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub id: Ulid,
    pub host_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub kind: BlockKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub host_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub guest: Guest,
    pub status: BookingStatus,
    pub created_at: Ms,
}

/// Row kind in the availability view. Declaration order is the tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SlotKind {
    Booking,
    Blocked,
}

impl SlotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotKind::Booking => "booking",
            SlotKind::Blocked => "blocked",
        }
    }
}

/// One labelled row of a host's availability view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilitySlot {
    pub id: Ulid,
    pub kind: SlotKind,
    pub start: Ms,
    pub end: Ms,
    pub label: String,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> HostState {
        HostState::new(Ulid::new(), "alice".into(), None, 0)
    }

    fn block(start: Ms, end: Ms) -> Interval {
        Interval {
            id: Ulid::new(),
            span: Span::new(start, end),
            kind: IntervalKind::Block(BlockKind::Blocked),
        }
    }

    fn booking(start: Ms, end: Ms) -> Interval {
        Interval {
            id: Ulid::new(),
            span: Span::new(start, end),
            kind: IntervalKind::Booking(BookingDetails {
                guest: Guest {
                    name: "Ann".into(),
                    email: "ann@example.com".into(),
                    note: None,
                },
                status: BookingStatus::Confirmed,
                created_at: 0,
            }),
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert_eq!(Span::checked(100, 200), Some(s));
        assert_eq!(Span::checked(200, 200), None); // zero-length
        assert_eq!(Span::checked(300, 200), None); // inverted
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
        assert!(a.overlaps(&a));
    }

    #[test]
    fn span_overlap_is_symmetric() {
        let spans: Vec<Span> = [(0, 10), (10, 20), (5, 15), (0, 30), (9, 10), (29, 31)]
            .iter()
            .map(|&(s, e)| Span::new(s, e))
            .collect();
        for a in &spans {
            assert!(a.overlaps(a));
            for b in &spans {
                assert_eq!(a.overlaps(b), b.overlaps(a), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn span_single_unit_overlap() {
        assert!(Span::new(0, 11).overlaps(&Span::new(10, 20)));
        assert!(!Span::new(0, 10).overlaps(&Span::new(10, 20)));
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(100, 400);
        let inner = Span::new(150, 300);
        let partial = Span::new(50, 200);
        assert!(outer.contains_span(&inner));
        assert!(outer.contains_span(&outer)); // self-containment
        assert!(!outer.contains_span(&partial));
    }

    #[test]
    fn span_nesting_goes_both_ways() {
        let outer = Span::new(100, 400);
        let inner = Span::new(150, 300);
        let partial = Span::new(50, 200);
        assert!(outer.is_nested_with(&inner));
        assert!(inner.is_nested_with(&outer));
        assert!(!outer.is_nested_with(&partial));
    }

    #[test]
    fn interval_ordering() {
        let mut hs = host();
        hs.insert_interval(booking(300, 400));
        hs.insert_interval(block(100, 200));
        hs.insert_interval(booking(200, 300));
        assert_eq!(hs.intervals[0].span.start, 100);
        assert_eq!(hs.intervals[1].span.start, 200);
        assert_eq!(hs.intervals[2].span.start, 300);
    }

    #[test]
    fn interval_remove() {
        let mut hs = host();
        let b = block(100, 200);
        let id = b.id;
        hs.insert_interval(b);
        assert_eq!(hs.intervals.len(), 1);
        assert!(hs.remove_interval(id).is_some());
        assert!(hs.intervals.is_empty());
        assert!(hs.remove_interval(id).is_none());
    }

    #[test]
    fn remove_of_kind_ignores_other_kind() {
        let mut hs = host();
        let bk = booking(100, 200);
        let id = bk.id;
        hs.insert_interval(bk);
        assert!(hs.remove_of_kind(EntityKind::Block, id).is_none());
        assert_eq!(hs.intervals.len(), 1);
        assert!(hs.remove_of_kind(EntityKind::Booking, id).is_some());
    }

    #[test]
    fn remove_where_only_touches_selected_kind() {
        let mut hs = host();
        hs.insert_interval(block(100, 200));
        hs.insert_interval(booking(120, 180));
        hs.insert_interval(block(300, 400));
        let removed = hs.remove_where(EntityKind::Block, |i| i.span.start < 250);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].span, Span::new(100, 200));
        assert_eq!(hs.intervals.len(), 2);
        assert_eq!(hs.count(EntityKind::Booking), 1);
        assert_eq!(hs.count(EntityKind::Block), 1);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut hs = host();
        hs.insert_interval(booking(100, 200));
        hs.insert_interval(block(450, 600));
        hs.insert_interval(booking(1000, 1100));

        let query = Span::new(500, 800);
        let hits: Vec<_> = hs.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut hs = host();
        hs.insert_interval(booking(100, 200));
        hs.insert_interval(block(300, 400));
        let query = Span::new(200, 300);
        assert_eq!(hs.overlapping(&query).count(), 0);
    }

    #[test]
    fn overlapping_large_interval_spanning_query() {
        let mut hs = host();
        hs.insert_interval(block(0, 10_000));
        let query = Span::new(500, 600);
        assert_eq!(hs.overlapping(&query).count(), 1);
    }

    #[test]
    fn overlapping_empty_host() {
        let hs = host();
        assert_eq!(hs.overlapping(&Span::new(0, 1000)).count(), 0);
    }

    #[test]
    fn query_filters_by_kind() {
        let mut hs = host();
        hs.insert_interval(block(100, 200));
        hs.insert_interval(booking(150, 250));
        let window = Span::new(0, 1000);
        assert_eq!(hs.query(EntityKind::Block, &window).count(), 1);
        assert_eq!(hs.query(EntityKind::Booking, &window).count(), 1);
        assert!(hs.exists_overlap(EntityKind::Booking, &Span::new(240, 260)));
        assert!(!hs.exists_overlap(EntityKind::Block, &Span::new(200, 260)));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            id: Ulid::new(),
            host_id: Ulid::new(),
            span: Span::new(0, 1000),
            guest: Guest {
                name: "Ann".into(),
                email: "ann@example.com".into(),
                note: Some("first visit".into()),
            },
            created_at: 42,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
