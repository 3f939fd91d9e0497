use crate::core::auction::{AuctionClient, AuctionCompletion, AuctionRequest, US_PRIVACY_KEY};
use crate::core::models::bid::{AdInfo, BidResult, BidTicket};
use crate::core::models::slot::BidSlot;
use crate::core::spec::errors::{AuctionError, PreBidError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use strum::Display;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BidderPhase {
    Idle,
    Loading,
}

struct BidderState {
    phase: BidderPhase,
    /// Only ever a success, set when a fetch completes
    cached: Option<AdInfo>,
    /// Exactly one while Loading, none while Idle
    pending: Option<oneshot::Sender<BidResult>>,
    consent: Option<String>,
    /// Bumped on every dispatch, completions from older epochs are ignored
    epoch: u64,
    started_at: Option<Instant>,
}

impl BidderState {
    fn new() -> Self {
        Self {
            phase: BidderPhase::Idle,
            cached: None,
            pending: None,
            consent: None,
            epoch: 0,
            started_at: None,
        }
    }
}

/// Pre-bidder for a single placement: at most one auction in
/// flight, caches the latest successful bid until it is popped.
pub struct PreBidder {
    slot: BidSlot,
    client: Arc<dyn AuctionClient>,
    watchdog: Option<Duration>,
    state: Arc<Mutex<BidderState>>,
}

impl PreBidder {
    pub fn new(slot: BidSlot, client: Arc<dyn AuctionClient>, watchdog: Option<Duration>) -> Self {
        Self {
            slot,
            client,
            watchdog,
            state: Arc::new(Mutex::new(BidderState::new())),
        }
    }

    pub fn slot(&self) -> &BidSlot {
        &self.slot
    }

    pub fn phase(&self) -> BidderPhase {
        self.state.lock().phase
    }

    pub fn is_loading(&self) -> bool {
        self.phase() == BidderPhase::Loading
    }

    pub fn consent(&self) -> Option<String> {
        self.state.lock().consent.clone()
    }

    /// Sets the IAB US privacy string sent with the next dispatch.
    /// A request already handed to the client keeps what it was built with.
    pub fn set_consent(&self, value: impl Into<String>) {
        self.state.lock().consent = Some(value.into());
    }

    /// Starts a fetch unless one is already outstanding.
    ///
    /// # Behavior
    /// - While Loading the returned ticket is already resolved with
    ///   [`PreBidError::LoadAlreadyInProgress`] and nothing is dispatched,
    ///   unless the watchdog expired, in which case the stale fetch is
    ///   resolved as a timeout and a new one starts
    /// - Otherwise the cache is cleared, the bidder goes Loading before this
    ///   returns, and the request is dispatched after the lock is released
    pub fn fetch(&self) -> BidTicket {
        let placement = self.slot.placement();

        let (ticket, request, completion) = {
            let mut state = self.state.lock();

            if state.phase == BidderPhase::Loading {
                if !self.watchdog_expired(&state) {
                    debug!("Fetch for {} rejected, load already in progress", placement);
                    return BidTicket::ready(placement, Err(PreBidError::LoadAlreadyInProgress));
                }

                warn!(
                    "Fetch for {} outstanding past the watchdog, resetting bidder",
                    placement
                );
                if let Some(stale) = state.pending.take() {
                    let _ = stale.send(Err(AuctionError::Timeout.into()));
                }
            }

            state.epoch += 1;
            state.phase = BidderPhase::Loading;
            state.cached = None;
            state.started_at = Some(Instant::now());

            let (ticket, tx) = BidTicket::pending(placement);
            state.pending = Some(tx);

            let request = self.build_request(state.consent.as_deref());
            let completion = self.completion_for(state.epoch, &request.request_id);

            (ticket, request, completion)
        };

        debug!(
            "Dispatching auction request {} for {}",
            request.request_id, placement
        );
        self.client.load_ad(request, completion);

        ticket
    }

    /// Consumes the cached bid. Always clears the cache, so a second
    /// pop returns None. Returns None while a fetch is outstanding.
    pub fn pop_result(&self) -> Option<AdInfo> {
        let mut state = self.state.lock();

        if state.phase == BidderPhase::Loading {
            return None;
        }

        state.cached.take()
    }

    fn watchdog_expired(&self, state: &BidderState) -> bool {
        match (self.watchdog, state.started_at) {
            (Some(limit), Some(started)) => started.elapsed() >= limit,
            _ => false,
        }
    }

    fn build_request(&self, consent: Option<&str>) -> AuctionRequest {
        let mut custom_targeting = HashMap::new();
        if let Some(consent) = consent {
            custom_targeting.insert(US_PRIVACY_KEY.to_string(), consent.to_string());
        }

        AuctionRequest {
            request_id: Uuid::new_v4().to_string(),
            placement: self.slot.placement().to_string(),
            partner_placement: self.slot.partner_placement().to_string(),
            size: self.slot.ad_size(),
            custom_targeting,
        }
    }

    fn completion_for(&self, epoch: u64, request_id: &str) -> AuctionCompletion {
        let state = Arc::downgrade(&self.state);
        let placement = self.slot.placement().to_string();

        AuctionCompletion::new(request_id, move |result| {
            complete(&state, epoch, &placement, result)
        })
    }
}

/// Applies an auction outcome to the bidder that dispatched it
fn complete(
    state: &Weak<Mutex<BidderState>>,
    epoch: u64,
    placement: &str,
    result: Result<AdInfo, AuctionError>,
) {
    let Some(state) = state.upgrade() else {
        debug!("Auction answered for {} after its bidder was replaced", placement);
        return;
    };

    let mut guard = state.lock();

    if guard.epoch != epoch || guard.phase != BidderPhase::Loading {
        debug!(phase = %guard.phase, "Discarding stale auction answer for {}", placement);
        return;
    }

    guard.phase = BidderPhase::Idle;
    guard.started_at = None;

    let Some(pending) = guard.pending.take() else {
        return;
    };

    // Nobody is waiting anymore, caching now would leave a ghost bid behind
    if pending.is_closed() {
        guard.cached = None;
        debug!("Auction answered for {} but the caller gave up", placement);
        return;
    }

    let outcome = match result {
        Ok(info) => {
            guard.cached = Some(info.clone());
            debug!("Cached bid {} for {}", info.price_point, placement);
            Ok(info)
        }
        Err(e) => {
            guard.cached = None;
            debug!(reason = e.as_ref(), "Auction failed for {}: {}", placement, e);
            Err(PreBidError::Auction(e))
        }
    };

    drop(guard);

    let _ = pending.send(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::auction::testing::{Script, ScriptedClient};
    use crate::core::models::bid::Payload;
    use crate::core::models::slot::AdFormat;
    use crate::core::spec::errors::partner_codes;
    use std::thread;

    fn hints() -> Payload {
        let mut payload = Payload::new();
        payload.insert("hint".into(), 1.into());
        payload
    }

    fn banner() -> BidSlot {
        BidSlot::new("p1", "uuid-1", AdFormat::Banner, false, Some(320), Some(50), false).unwrap()
    }

    fn bidder(watchdog: Option<Duration>) -> (Arc<ScriptedClient>, PreBidder) {
        let client = Arc::new(ScriptedClient::default());
        let bidder = PreBidder::new(banner(), client.clone(), watchdog);
        (client, bidder)
    }

    #[test]
    fn test_second_fetch_rejected_while_loading() {
        let (client, bidder) = bidder(None);

        let mut first = bidder.fetch();
        let mut second = bidder.fetch();

        assert_eq!(client.dispatched(), 1);
        assert!(bidder.is_loading());
        assert_eq!(
            second.try_result(),
            Some(Err(PreBidError::LoadAlreadyInProgress))
        );
        assert_eq!(first.try_result(), None);
    }

    #[test]
    fn test_success_caches_until_popped() {
        let (client, bidder) = bidder(None);

        let mut ticket = bidder.fetch();
        assert_eq!(bidder.pop_result(), None);

        client.succeed(0, "abc", hints());

        let expected = AdInfo::new("abc", hints());
        assert_eq!(ticket.try_result(), Some(Ok(expected.clone())));
        assert_eq!(bidder.phase(), BidderPhase::Idle);
        assert_eq!(bidder.pop_result(), Some(expected));
        assert_eq!(bidder.pop_result(), None);
    }

    #[test]
    fn test_failure_maps_code_and_clears_cache() {
        let (client, bidder) = bidder(None);

        let mut ticket = bidder.fetch();
        client.fail(0, partner_codes::NETWORK_TIMEOUT);

        assert_eq!(
            ticket.try_result(),
            Some(Err(PreBidError::Auction(AuctionError::Timeout)))
        );
        assert!(!bidder.is_loading());
        assert_eq!(bidder.pop_result(), None);
    }

    #[test]
    fn test_new_fetch_clears_previous_cache() {
        let (client, bidder) = bidder(None);

        let mut first = bidder.fetch();
        client.succeed(0, "abc", hints());
        assert!(first.try_result().is_some());

        let mut second = bidder.fetch();
        assert_eq!(bidder.pop_result(), None);
        client.fail(1, partner_codes::NO_FILL);

        assert!(second.try_result().is_some());
        assert_eq!(bidder.pop_result(), None);
    }

    #[test]
    fn test_consent_applies_to_next_dispatch_only() {
        let (client, bidder) = bidder(None);

        let _first = bidder.fetch();
        assert_eq!(client.request(0).us_privacy(), None);

        bidder.set_consent("1YN-");
        assert_eq!(client.request(0).us_privacy(), None);
        client.succeed(0, "abc", hints());

        let _second = bidder.fetch();
        assert_eq!(client.request(1).us_privacy(), Some("1YN-"));
        assert_eq!(client.request(1).partner_placement, "uuid-1");
    }

    #[test]
    fn test_synchronous_completion_does_not_deadlock() {
        let (client, bidder) = bidder(None);
        client.set_script(Script::Succeed("abc".into(), hints()));

        let mut ticket = bidder.fetch();

        assert_eq!(ticket.try_result(), Some(Ok(AdInfo::new("abc", hints()))));
        assert_eq!(bidder.pop_result(), Some(AdInfo::new("abc", hints())));

        client.set_script(Script::Fail(partner_codes::REQUEST_ERROR));
        let mut ticket = bidder.fetch();
        assert_eq!(
            ticket.try_result(),
            Some(Err(PreBidError::Auction(AuctionError::RequestError)))
        );
    }

    #[test]
    fn test_completion_from_another_thread() {
        let (client, bidder) = bidder(None);

        let mut ticket = bidder.fetch();
        let completion = client.take(0);

        thread::spawn(move || completion.succeed("abc", hints()))
            .join()
            .unwrap();

        assert_eq!(ticket.try_result(), Some(Ok(AdInfo::new("abc", hints()))));
        assert_eq!(bidder.pop_result(), Some(AdInfo::new("abc", hints())));
    }

    #[test]
    fn test_dropped_completion_unwedges_bidder() {
        let (client, bidder) = bidder(None);

        let mut ticket = bidder.fetch();
        drop(client.take(0));

        assert_eq!(
            ticket.try_result(),
            Some(Err(PreBidError::Auction(AuctionError::Unexpected)))
        );
        assert!(!bidder.is_loading());
    }

    #[test]
    fn test_without_watchdog_lost_callback_blocks_forever() {
        let (client, bidder) = bidder(None);

        let _first = bidder.fetch();
        thread::sleep(Duration::from_millis(5));

        let mut again = bidder.fetch();
        assert_eq!(
            again.try_result(),
            Some(Err(PreBidError::LoadAlreadyInProgress))
        );
        assert_eq!(client.dispatched(), 1);
    }

    #[test]
    fn test_watchdog_resets_and_discards_late_answer() {
        let (client, bidder) = bidder(Some(Duration::from_millis(1)));

        let mut stale = bidder.fetch();
        thread::sleep(Duration::from_millis(5));

        let mut fresh = bidder.fetch();
        assert_eq!(client.dispatched(), 2);
        assert_eq!(
            stale.try_result(),
            Some(Err(PreBidError::Auction(AuctionError::Timeout)))
        );

        // the first answer finally shows up and must not be cached
        client.succeed(0, "late", hints());
        assert!(bidder.is_loading());
        assert_eq!(fresh.try_result(), None);

        client.succeed(1, "fresh", hints());
        assert_eq!(fresh.try_result(), Some(Ok(AdInfo::new("fresh", hints()))));
        assert_eq!(bidder.pop_result(), Some(AdInfo::new("fresh", hints())));
    }

    #[test]
    fn test_watchdog_does_not_fire_early() {
        let (client, bidder) = bidder(Some(Duration::from_secs(60)));

        let _first = bidder.fetch();
        let mut second = bidder.fetch();

        assert_eq!(
            second.try_result(),
            Some(Err(PreBidError::LoadAlreadyInProgress))
        );
        assert_eq!(client.dispatched(), 1);
    }

    #[test]
    fn test_dropped_ticket_leaves_no_ghost_bid() {
        let (client, bidder) = bidder(None);

        drop(bidder.fetch());
        client.succeed(0, "abc", hints());

        assert!(!bidder.is_loading());
        assert_eq!(bidder.pop_result(), None);
    }

    #[test]
    fn test_answer_after_bidder_dropped_is_ignored() {
        let (client, bidder) = bidder(None);

        let mut ticket = bidder.fetch();
        drop(bidder);

        assert_eq!(ticket.try_result(), Some(Err(PreBidError::Abandoned)));
        client.succeed(0, "abc", hints());
    }
}
