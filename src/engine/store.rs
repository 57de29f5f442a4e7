use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::SharedHostState;

/// Per-host timelines plus the two lookup indexes the engine needs.
///
/// Timeline contents are only ever changed through `apply_event`, with the caller
/// holding that host's write lock.
pub struct TimelineStore {
    hosts: DashMap<Ulid, SharedHostState>,
    slugs: DashMap<String, Ulid>,
    entity_to_host: DashMap<Ulid, Ulid>,
}

impl Default for TimelineStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TimelineStore {
    pub fn new() -> Self {
        Self {
            hosts: DashMap::new(),
            slugs: DashMap::new(),
            entity_to_host: DashMap::new(),
        }
    }

    // ── Hosts ────────────────────────────────────────────────

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn contains_host(&self, id: &Ulid) -> bool {
        self.hosts.contains_key(id)
    }

    pub fn contains_slug(&self, slug: &str) -> bool {
        self.slugs.contains_key(slug)
    }

    pub fn get_host(&self, id: &Ulid) -> Option<SharedHostState> {
        self.hosts.get(id).map(|e| e.value().clone())
    }

    pub fn host_id_for_slug(&self, slug: &str) -> Option<Ulid> {
        self.slugs.get(slug).map(|e| *e.value())
    }

    pub fn get_host_by_slug(&self, slug: &str) -> Option<SharedHostState> {
        self.host_id_for_slug(slug).and_then(|id| self.get_host(&id))
    }

    pub fn insert_host(&self, state: HostState) {
        self.slugs.insert(state.slug.clone(), state.id);
        self.hosts.insert(state.id, Arc::new(RwLock::new(state)));
    }

    /// Drop a host together with its slug and every entity mapping it owns.
    pub fn remove_host(&self, state: &HostState) {
        for interval in &state.intervals {
            self.unmap_entity(&interval.id);
        }
        self.slugs.remove(&state.slug);
        self.hosts.remove(&state.id);
    }

    pub fn host_ids(&self) -> Vec<Ulid> {
        self.hosts.iter().map(|e| *e.key()).collect()
    }

    // ── Entity index ─────────────────────────────────────────

    pub fn get_host_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_host.get(entity_id).map(|e| *e.value())
    }

    pub fn map_entity(&self, entity_id: Ulid, host_id: Ulid) {
        self.entity_to_host.insert(entity_id, host_id);
    }

    pub fn unmap_entity(&self, entity_id: &Ulid) {
        self.entity_to_host.remove(entity_id);
    }

    // ── Event application ────────────────────────────────────

    /// Apply a timeline event to a host. Caller holds the lock.
    pub fn apply_event(&self, hs: &mut HostState, event: &Event) {
        match event {
            Event::BlockSet {
                id,
                host_id,
                span,
                kind,
                replaced,
            } => {
                let removed = hs.remove_where(EntityKind::Block, |i| replaced.contains(&i.id));
                for old in &removed {
                    self.unmap_entity(&old.id);
                }
                hs.insert_interval(Interval {
                    id: *id,
                    span: *span,
                    kind: IntervalKind::Block(*kind),
                });
                self.map_entity(*id, *host_id);
            }
            Event::BlockDeleted { id, .. } => {
                if hs.remove_of_kind(EntityKind::Block, *id).is_some() {
                    self.unmap_entity(id);
                }
            }
            Event::BookingCreated {
                id,
                host_id,
                span,
                guest,
                created_at,
            } => {
                hs.insert_interval(Interval {
                    id: *id,
                    span: *span,
                    kind: IntervalKind::Booking(BookingDetails {
                        guest: guest.clone(),
                        status: BookingStatus::Confirmed,
                        created_at: *created_at,
                    }),
                });
                self.map_entity(*id, *host_id);
            }
            // Host lifecycle is handled at the map level, not here
            Event::HostCreated { .. } | Event::HostDeleted { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (TimelineStore, Ulid) {
        let store = TimelineStore::new();
        let id = Ulid::new();
        store.insert_host(HostState::new(id, "alice".into(), None, 0));
        (store, id)
    }

    fn block_set(host_id: Ulid, start: Ms, end: Ms, replaced: Vec<Ulid>) -> (Ulid, Event) {
        let id = Ulid::new();
        let event = Event::BlockSet {
            id,
            host_id,
            span: Span::new(start, end),
            kind: BlockKind::Blocked,
            replaced,
        };
        (id, event)
    }

    #[test]
    fn slug_index_tracks_hosts() {
        let (store, id) = seeded();
        assert!(store.contains_slug("alice"));
        assert_eq!(store.host_id_for_slug("alice"), Some(id));
        assert!(store.get_host_by_slug("bob").is_none());
        assert_eq!(store.host_count(), 1);
    }

    #[tokio::test]
    async fn block_set_replaces_listed_blocks_and_unmaps_them() {
        let (store, host_id) = seeded();
        let rs = store.get_host(&host_id).unwrap();
        let mut guard = rs.write().await;

        let (a, ev_a) = block_set(host_id, 100, 200, vec![]);
        let (b, ev_b) = block_set(host_id, 200, 300, vec![]);
        store.apply_event(&mut guard, &ev_a);
        store.apply_event(&mut guard, &ev_b);
        assert_eq!(store.get_host_for_entity(&a), Some(host_id));

        let (c, ev_c) = block_set(host_id, 100, 300, vec![a, b]);
        store.apply_event(&mut guard, &ev_c);

        assert_eq!(guard.intervals.len(), 1);
        assert_eq!(guard.intervals[0].id, c);
        assert!(store.get_host_for_entity(&a).is_none());
        assert!(store.get_host_for_entity(&b).is_none());
        assert_eq!(store.get_host_for_entity(&c), Some(host_id));
    }

    #[tokio::test]
    async fn block_deleted_leaves_bookings_alone() {
        let (store, host_id) = seeded();
        let rs = store.get_host(&host_id).unwrap();
        let mut guard = rs.write().await;

        let booking_id = Ulid::new();
        store.apply_event(
            &mut guard,
            &Event::BookingCreated {
                id: booking_id,
                host_id,
                span: Span::new(0, 100),
                guest: Guest {
                    name: "Ann".into(),
                    email: "ann@example.com".into(),
                    note: None,
                },
                created_at: 1,
            },
        );
        // A BlockDeleted naming a booking id must not remove the booking.
        store.apply_event(&mut guard, &Event::BlockDeleted { id: booking_id, host_id });
        assert_eq!(guard.count(EntityKind::Booking), 1);
        assert_eq!(store.get_host_for_entity(&booking_id), Some(host_id));
    }

    #[tokio::test]
    async fn remove_host_clears_indexes() {
        let (store, host_id) = seeded();
        let rs = store.get_host(&host_id).unwrap();
        let mut guard = rs.write().await;
        let (block_id, ev) = block_set(host_id, 100, 200, vec![]);
        store.apply_event(&mut guard, &ev);

        store.remove_host(&guard);
        assert!(!store.contains_host(&host_id));
        assert!(!store.contains_slug("alice"));
        assert!(store.get_host_for_entity(&block_id).is_none());
    }
}
