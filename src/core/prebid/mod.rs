mod bidder;

pub use bidder::{BidderPhase, PreBidder};
