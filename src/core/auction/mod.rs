mod client;
mod simulated;
#[cfg(test)]
pub(crate) mod testing;

pub use client::*;
pub use simulated::SimulatedAuctionClient;
