use crate::auth::Principal;
use crate::model::*;

use super::availability::availability_view;
use super::conflict::validate_window;
use super::{Engine, EngineError, SharedHostState};

impl Engine {
    fn host_by_slug(&self, slug: &str) -> Result<SharedHostState, EngineError> {
        self.store
            .get_host_by_slug(slug)
            .ok_or_else(|| EngineError::HostNotFound(slug.to_string()))
    }

    /// Labelled bookings and blocks of a host overlapping `[start, end)`.
    pub async fn get_availability(
        &self,
        slug: &str,
        start: Ms,
        end: Ms,
    ) -> Result<Vec<AvailabilitySlot>, EngineError> {
        let window = validate_window(start, end)?;
        let hs = self.host_by_slug(slug)?;
        let guard = hs.read().await;
        Ok(availability_view(&guard, &window))
    }

    pub async fn list_hosts(&self) -> Vec<HostInfo> {
        let mut hosts = Vec::with_capacity(self.store.host_count());
        for id in self.store.host_ids() {
            let Some(hs) = self.store.get_host(&id) else {
                continue;
            };
            let guard = hs.read().await;
            hosts.push(HostInfo {
                id: guard.id,
                slug: guard.slug.clone(),
                email: guard.email.clone(),
                created_at: guard.created_at,
            });
        }
        hosts.sort_by(|a, b| a.slug.cmp(&b.slug));
        hosts
    }

    pub async fn get_blocks(
        &self,
        principal: &Principal,
        slug: &str,
    ) -> Result<Vec<BlockInfo>, EngineError> {
        if !principal.is_host(slug) {
            return Err(EngineError::Unauthorized);
        }
        let hs = self.host_by_slug(slug)?;
        let guard = hs.read().await;
        // Intervals are kept sorted by start
        Ok(guard
            .intervals
            .iter()
            .filter_map(|i| match i.kind {
                IntervalKind::Block(kind) => Some(BlockInfo {
                    id: i.id,
                    host_id: guard.id,
                    start: i.span.start,
                    end: i.span.end,
                    kind,
                }),
                IntervalKind::Booking(_) => None,
            })
            .collect())
    }

    pub async fn get_bookings(
        &self,
        principal: &Principal,
        slug: &str,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        if !principal.is_host(slug) {
            return Err(EngineError::Unauthorized);
        }
        let hs = self.host_by_slug(slug)?;
        let guard = hs.read().await;
        Ok(guard
            .intervals
            .iter()
            .filter_map(|i| match &i.kind {
                IntervalKind::Booking(details) => Some(BookingInfo {
                    id: i.id,
                    host_id: guard.id,
                    start: i.span.start,
                    end: i.span.end,
                    guest: details.guest.clone(),
                    status: details.status,
                    created_at: details.created_at,
                }),
                IntervalKind::Block(_) => None,
            })
            .collect())
    }
}
