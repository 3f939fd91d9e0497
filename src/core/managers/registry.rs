use crate::core::auction::AuctionClient;
use crate::core::models::bid::{AdInfo, BidTicket};
use crate::core::models::slot::{BidSlot, PrebidRecord};
use crate::core::prebid::PreBidder;
use crate::core::spec::errors::PreBidError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// IAB US privacy string for "CCPA does not apply"
pub const CCPA_DOES_NOT_APPLY: &str = "1---";

#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    /// Forcibly reset a bidder whose fetch has been outstanding this long
    pub watchdog: Option<Duration>,
}

#[derive(Default)]
struct RegistryState {
    bidders: HashMap<String, Arc<PreBidder>>,
    consent: Option<String>,
    coppa_disabled: bool,
}

/// Owns the placement -> pre-bidder map and is the single entry
/// point for fetching and consuming pre-bids. The registry lock is
/// held only to resolve a bidder, never across a bidder call.
pub struct PreBidRegistry {
    client: Arc<dyn AuctionClient>,
    options: RegistryOptions,
    state: RwLock<RegistryState>,
}

impl PreBidRegistry {
    pub fn new(client: Arc<dyn AuctionClient>, options: RegistryOptions) -> Self {
        Self {
            client,
            options,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Replaces every bidder with one per slot. Bidders that are
    /// replaced mid-fetch are dropped and their answer never observed.
    /// Returns the number of usable placements.
    pub fn configure(&self, slots: impl IntoIterator<Item = BidSlot>) -> usize {
        let mut state = self.state.write();

        let mut bidders = HashMap::new();
        for slot in slots {
            let bidder = PreBidder::new(slot, self.client.clone(), self.options.watchdog);

            if let Some(consent) = &state.consent {
                bidder.set_consent(consent.clone());
            }

            let placement = bidder.slot().placement().to_string();
            if bidders.insert(placement.clone(), Arc::new(bidder)).is_some() {
                warn!("Duplicate pre-bid placement {}, keeping the last one", placement);
            }
        }

        state.bidders = bidders;

        info!("Configured {} pre-bid placements", state.bidders.len());
        state.bidders.len()
    }

    /// Validates host records individually, logging and skipping
    /// any that cannot become a slot, then configures the rest
    pub fn configure_records(&self, records: &[PrebidRecord]) -> usize {
        let slots: Vec<BidSlot> = records
            .iter()
            .filter_map(|record| match BidSlot::try_from(record) {
                Ok(slot) => Some(slot),
                Err(e) => {
                    warn!(reason = %e.kind(), "Skipping pre-bid placement: {}", e);
                    None
                }
            })
            .collect();

        self.configure(slots)
    }

    /// Stores the US privacy string and pushes it to every bidder
    pub fn set_consent(&self, value: impl Into<String>) {
        let value = value.into();
        let mut state = self.state.write();

        for bidder in state.bidders.values() {
            bidder.set_consent(value.clone());
        }

        debug!("Consent {} applied to {} bidders", value, state.bidders.len());
        state.consent = Some(value);
    }

    /// Explicitly marks CCPA as not applying
    pub fn clear_consent(&self) {
        self.set_consent(CCPA_DOES_NOT_APPLY);
    }

    pub fn consent(&self) -> Option<String> {
        self.state.read().consent.clone()
    }

    /// Gates every later fetch and pop. In-flight fetches are not
    /// cancelled, the auction SDK has no way to do so.
    pub fn set_coppa_gate(&self, disabled: bool) {
        self.state.write().coppa_disabled = disabled;
        info!("Pre-bidding COPPA gate set to {}", disabled);
    }

    pub fn is_coppa_gated(&self) -> bool {
        self.state.read().coppa_disabled
    }

    pub fn fetch(&self, placement: &str) -> BidTicket {
        let bidder = {
            let state = self.state.read();

            if state.coppa_disabled {
                debug!("Fetch for {} blocked by COPPA gate", placement);
                return BidTicket::ready(placement, Err(PreBidError::DisabledByPrivacy));
            }

            state.bidders.get(placement).cloned()
        };

        match bidder {
            Some(bidder) => bidder.fetch(),
            None => {
                debug!("Fetch for unknown placement {}", placement);
                BidTicket::ready(placement, Err(PreBidError::PlacementNotConfigured))
            }
        }
    }

    /// Consumes the cached bid for a placement. Returns None while
    /// the COPPA gate is set, even if a bid was cached before.
    ///
    /// The read guard is held across the pop so a gate set before
    /// this call can't be overtaken. Popping never blocks on the SDK.
    pub fn pop_result(&self, placement: &str) -> Option<AdInfo> {
        let state = self.state.read();

        if state.coppa_disabled {
            return None;
        }

        state.bidders.get(placement)?.pop_result()
    }

    pub fn bidder(&self, placement: &str) -> Option<Arc<PreBidder>> {
        self.state.read().bidders.get(placement).cloned()
    }

    pub fn contains(&self, placement: &str) -> bool {
        self.state.read().bidders.contains_key(placement)
    }

    pub fn placements(&self) -> Vec<String> {
        let mut placements: Vec<String> = self.state.read().bidders.keys().cloned().collect();
        placements.sort();
        placements
    }
}
