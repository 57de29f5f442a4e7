use tokio::sync::oneshot;
use ulid::Ulid;

use crate::auth::Principal;
use crate::limits::*;
use crate::model::*;
use crate::observability::{BLOCKS_COALESCED_TOTAL, BOOKINGS_ADMITTED_TOTAL, BOOKINGS_REJECTED_TOTAL};

use super::conflict::{
    check_admission, coalesce_targets, now_ms, validate_guest, validate_slug, validate_span,
};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    // ── Host registry ────────────────────────────────────────

    pub async fn create_host(
        &self,
        principal: &Principal,
        slug: &str,
        email: Option<String>,
    ) -> Result<HostInfo, EngineError> {
        if !principal.is_admin() {
            return Err(EngineError::Unauthorized);
        }
        validate_slug(slug)?;
        if let Some(ref e) = email
            && e.len() > MAX_EMAIL_LEN {
                return Err(EngineError::LimitExceeded("host email too long"));
            }

        let _registry = self.registry.lock().await;
        if self.store.contains_slug(slug) {
            return Err(EngineError::AlreadyExists(slug.to_string()));
        }
        if self.store.host_count() >= MAX_HOSTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many hosts"));
        }

        let id = Ulid::new();
        let created_at = now_ms();
        let event = Event::HostCreated {
            id,
            slug: slug.to_string(),
            email: email.clone(),
            created_at,
        };
        self.wal_append(&event).await?;
        self.store
            .insert_host(HostState::new(id, slug.to_string(), email.clone(), created_at));
        tracing::info!(%id, slug, "host created");

        Ok(HostInfo {
            id,
            slug: slug.to_string(),
            email,
            created_at,
        })
    }

    /// Remove a host together with all of its blocks and bookings.
    pub async fn delete_host(&self, principal: &Principal, slug: &str) -> Result<(), EngineError> {
        if !principal.is_admin() {
            return Err(EngineError::Unauthorized);
        }
        let _registry = self.registry.lock().await;
        let guard = self.resolve_host_write(slug).await?;

        let event = Event::HostDeleted { id: guard.id };
        self.wal_append(&event).await?;
        self.store.remove_host(&guard);
        tracing::info!(id = %guard.id, slug, intervals = guard.intervals.len(), "host deleted");
        Ok(())
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Admit a booking if nothing on the host's timeline overlaps it.
    ///
    /// The overlap check, the WAL append and the insert all happen under the host's
    /// write lock, so concurrent requests for the same slot are serialized and at most
    /// one of them is admitted.
    pub async fn create_booking(
        &self,
        slug: &str,
        start: Ms,
        end: Ms,
        guest: Guest,
    ) -> Result<BookingInfo, EngineError> {
        let span = validate_span(start, end)?;
        validate_guest(&guest)?;

        let mut guard = self.resolve_host_write(slug).await?;
        if guard.intervals.len() >= MAX_INTERVALS_PER_HOST {
            return Err(EngineError::LimitExceeded("too many intervals on host"));
        }
        if let Err(e) = check_admission(&guard, &span) {
            metrics::counter!(BOOKINGS_REJECTED_TOTAL).increment(1);
            tracing::debug!(slug, start, end, "booking rejected: slot unavailable");
            return Err(e);
        }

        let id = Ulid::new();
        let created_at = now_ms();
        let host_id = guard.id;
        let event = Event::BookingCreated {
            id,
            host_id,
            span,
            guest: guest.clone(),
            created_at,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        metrics::counter!(BOOKINGS_ADMITTED_TOTAL).increment(1);
        tracing::info!(%id, slug, start, end, "booking admitted");

        Ok(BookingInfo {
            id,
            host_id,
            start: span.start,
            end: span.end,
            guest,
            status: BookingStatus::Confirmed,
            created_at,
        })
    }

    // ── Blocks ───────────────────────────────────────────────

    /// Declare `[start, end)` unavailable, replacing every block nested with it.
    ///
    /// Partially overlapping blocks stay. Bookings are not consulted.
    pub async fn set_block(
        &self,
        principal: &Principal,
        slug: &str,
        start: Ms,
        end: Ms,
    ) -> Result<BlockInfo, EngineError> {
        let span = validate_span(start, end)?;
        if !principal.is_host(slug) {
            return Err(EngineError::Unauthorized);
        }

        let mut guard = self.resolve_host_write(slug).await?;
        let replaced = coalesce_targets(&guard, &span);
        if guard.intervals.len() - replaced.len() >= MAX_INTERVALS_PER_HOST {
            return Err(EngineError::LimitExceeded("too many intervals on host"));
        }

        let id = Ulid::new();
        let host_id = guard.id;
        let coalesced = replaced.len();
        let event = Event::BlockSet {
            id,
            host_id,
            span,
            kind: BlockKind::Blocked,
            replaced,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        if coalesced > 0 {
            metrics::counter!(BLOCKS_COALESCED_TOTAL).increment(coalesced as u64);
        }
        tracing::info!(%id, slug, start, end, replaced = coalesced, "block set");

        Ok(BlockInfo {
            id,
            host_id,
            start: span.start,
            end: span.end,
            kind: BlockKind::Blocked,
        })
    }

    pub async fn delete_block(&self, principal: &Principal, id: Ulid) -> Result<(), EngineError> {
        let mut guard = self.resolve_entity_write(&id).await?;
        if !guard.find(id).is_some_and(|i| i.is(EntityKind::Block)) {
            return Err(EngineError::NotFound(id));
        }
        if !principal.is_host(&guard.slug) {
            return Err(EngineError::Unauthorized);
        }

        let event = Event::BlockDeleted {
            id,
            host_id: guard.id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(%id, slug = %guard.slug, "block deleted");
        Ok(())
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    ///
    /// Holds the registry lock and a read lock on every host until the new file is
    /// in place, so no mutation can land in the old file after its snapshot was taken.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _registry = self.registry.lock().await;

        let mut host_ids = self.store.host_ids();
        host_ids.sort();

        let mut guards = Vec::with_capacity(host_ids.len());
        for id in &host_ids {
            if let Some(hs) = self.store.get_host(id) {
                guards.push(hs.read_owned().await);
            }
        }

        let mut events = Vec::new();
        for guard in &guards {
            events.push(Event::HostCreated {
                id: guard.id,
                slug: guard.slug.clone(),
                email: guard.email.clone(),
                created_at: guard.created_at,
            });
            for interval in &guard.intervals {
                match &interval.kind {
                    IntervalKind::Block(kind) => events.push(Event::BlockSet {
                        id: interval.id,
                        host_id: guard.id,
                        span: interval.span,
                        kind: *kind,
                        replaced: Vec::new(),
                    }),
                    IntervalKind::Booking(details) => events.push(Event::BookingCreated {
                        id: interval.id,
                        host_id: guard.id,
                        span: interval.span,
                        guest: details.guest.clone(),
                        created_at: details.created_at,
                    }),
                }
            }
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;

        tracing::info!(hosts = guards.len(), events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
