use strum::{AsRefStr, Display};
use thiserror::Error;

/// Partner failure codes as reported by the auction SDK load callback
pub mod partner_codes {
    pub const NETWORK_ERROR: i64 = 1;
    pub const NETWORK_TIMEOUT: i64 = 2;
    pub const NO_FILL: i64 = 3;
    pub const INTERNAL_ERROR: i64 = 4;
    pub const REQUEST_ERROR: i64 = 5;
}

/// Closed set of auction failures, mapped from the partner
/// numeric error codes. Terminal for the fetch that produced
/// it, this layer never retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum AuctionError {
    #[error("network error")]
    Network,
    #[error("network timeout")]
    Timeout,
    #[error("no fill")]
    NoFill,
    #[error("internal error")]
    Internal,
    #[error("request error")]
    RequestError,
    #[error("unexpected failure")]
    Unexpected,
}

impl AuctionError {
    pub fn from_partner_code(code: i64) -> Self {
        match code {
            partner_codes::NETWORK_ERROR => AuctionError::Network,
            partner_codes::NETWORK_TIMEOUT => AuctionError::Timeout,
            partner_codes::NO_FILL => AuctionError::NoFill,
            partner_codes::INTERNAL_ERROR => AuctionError::Internal,
            partner_codes::REQUEST_ERROR => AuctionError::RequestError,
            _ => AuctionError::Unexpected,
        }
    }

    /// The partner code this error maps back to, if it has one
    pub fn partner_code(&self) -> Option<i64> {
        match self {
            AuctionError::Network => Some(partner_codes::NETWORK_ERROR),
            AuctionError::Timeout => Some(partner_codes::NETWORK_TIMEOUT),
            AuctionError::NoFill => Some(partner_codes::NO_FILL),
            AuctionError::Internal => Some(partner_codes::INTERNAL_ERROR),
            AuctionError::RequestError => Some(partner_codes::REQUEST_ERROR),
            AuctionError::Unexpected => None,
        }
    }
}

/// Terminal outcome of a failed pre-bid fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PreBidError {
    /// A fetch for the placement is still outstanding
    #[error("load already in progress")]
    LoadAlreadyInProgress,
    #[error("placement not configured")]
    PlacementNotConfigured,
    /// The COPPA gate is set, nothing was sent to the auction SDK
    #[error("pre-bidding disabled due to COPPA restrictions")]
    DisabledByPrivacy,
    /// The owning pre-bidder was replaced before the auction answered
    #[error("pre-bidder replaced before the fetch completed")]
    Abandoned,
    #[error("auction failed: {0}")]
    Auction(#[from] AuctionError),
}

/// Setup-time failure for a single placement. The placement is
/// skipped, every other placement is still configured.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("record is missing a placement identifier")]
    MissingPlacement,
    #[error("placement {placement} is missing a partner placement")]
    MissingPartnerPlacement { placement: String },
    #[error("placement {placement} is missing a format")]
    MissingFormat { placement: String },
    #[error("placement {placement} has unknown format '{format}'")]
    UnknownFormat { placement: String, format: String },
    #[error("banner placement {placement} is missing valid dimensions")]
    MissingDimensions { placement: String },
    #[error("malformed pre-bid record: {0}")]
    Malformed(String),
}

/// Stable, loggable reason tag attached to setup failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConfigErrorKind {
    MissingPlacement,
    MissingPartnerPlacement,
    MissingFormat,
    UnknownFormat,
    MissingDimensions,
    Malformed,
}

impl ConfigError {
    pub fn kind(&self) -> ConfigErrorKind {
        match self {
            ConfigError::MissingPlacement => ConfigErrorKind::MissingPlacement,
            ConfigError::MissingPartnerPlacement { .. } => ConfigErrorKind::MissingPartnerPlacement,
            ConfigError::MissingFormat { .. } => ConfigErrorKind::MissingFormat,
            ConfigError::UnknownFormat { .. } => ConfigErrorKind::UnknownFormat,
            ConfigError::MissingDimensions { .. } => ConfigErrorKind::MissingDimensions,
            ConfigError::Malformed(_) => ConfigErrorKind::Malformed,
        }
    }
}
