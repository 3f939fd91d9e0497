use crate::core::spec::errors::ConfigError;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Player size the auction SDK assumes for video when
/// the placement does not carry its own dimensions
pub const DEFAULT_VIDEO_WIDTH: u32 = 320;
pub const DEFAULT_VIDEO_HEIGHT: u32 = 480;

/// Host format tag that parses to a flexible-height banner
const ADAPTIVE_BANNER_TAG: &str = "adaptive_banner";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum AdFormat {
    Banner,
    Interstitial,
    Rewarded,
}

impl AdFormat {
    /// Parses a host format tag, returning the format and whether
    /// the tag marks a flexible-height adaptive banner
    pub fn from_tag(tag: &str) -> Option<(AdFormat, bool)> {
        let tag = tag.trim();

        if tag.eq_ignore_ascii_case(ADAPTIVE_BANNER_TAG) {
            return Some((AdFormat::Banner, true));
        }

        tag.parse::<AdFormat>().ok().map(|format| (format, false))
    }
}

/// Opaque size descriptor handed to the auction SDK for a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdSize {
    Banner { width: u32, height: u32 },
    Video { width: u32, height: u32 },
    Interstitial,
    InterstitialVideo,
}

/// Auction configuration of a single placement. Built once
/// at setup and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BidSlot {
    placement: String,
    partner_placement: String,
    format: AdFormat,
    video: bool,
    width: Option<u32>,
    height: Option<u32>,
    adaptive: bool,
}

impl BidSlot {
    /// Validates and builds a slot.
    ///
    /// # Behavior
    /// - Fixed banners need both dimensions and both must be > 0
    /// - Adaptive banners need a width > 0, a missing height becomes 0
    /// - Interstitial and rewarded slots drop any dimensions given
    ///
    /// A failed banner never falls back to another format.
    pub fn new(
        placement: impl Into<String>,
        partner_placement: impl Into<String>,
        format: AdFormat,
        video: bool,
        width: Option<u32>,
        height: Option<u32>,
        adaptive: bool,
    ) -> Result<BidSlot, ConfigError> {
        let placement = placement.into();
        let partner_placement = partner_placement.into();

        if placement.trim().is_empty() {
            return Err(ConfigError::MissingPlacement);
        }

        if partner_placement.trim().is_empty() {
            return Err(ConfigError::MissingPartnerPlacement { placement });
        }

        let (width, height, adaptive) = match format {
            AdFormat::Banner => {
                let width = width.filter(|w| *w > 0);
                let dims = if adaptive {
                    width.map(|w| (w, height.unwrap_or(0)))
                } else {
                    width.zip(height.filter(|h| *h > 0))
                };

                match dims {
                    Some((w, h)) => (Some(w), Some(h), adaptive),
                    None => return Err(ConfigError::MissingDimensions { placement }),
                }
            }
            AdFormat::Interstitial | AdFormat::Rewarded => (None, None, false),
        };

        Ok(BidSlot {
            placement,
            partner_placement,
            format,
            video,
            width,
            height,
            adaptive,
        })
    }

    pub fn placement(&self) -> &str {
        &self.placement
    }

    pub fn partner_placement(&self) -> &str {
        &self.partner_placement
    }

    pub fn format(&self) -> AdFormat {
        self.format
    }

    pub fn is_video(&self) -> bool {
        self.video
    }

    pub fn is_adaptive(&self) -> bool {
        self.adaptive
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.width.zip(self.height)
    }

    /// The size descriptor the auction SDK is loaded with
    pub fn ad_size(&self) -> AdSize {
        match (self.format, self.video) {
            (AdFormat::Banner, video) => {
                let (width, height) = self.dimensions().unwrap_or_default();
                if video {
                    AdSize::Video { width, height }
                } else {
                    AdSize::Banner { width, height }
                }
            }
            (AdFormat::Interstitial, true) => AdSize::InterstitialVideo,
            (AdFormat::Interstitial, false) => AdSize::Interstitial,
            // APS only serves rewarded as video
            (AdFormat::Rewarded, _) => AdSize::Video {
                width: DEFAULT_VIDEO_WIDTH,
                height: DEFAULT_VIDEO_HEIGHT,
            },
        }
    }
}

/// Partner specific fields, nested under `aps` in host payloads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartnerSettings {
    #[serde(alias = "amazon_slot_uuid")]
    pub partner_placement: Option<String>,
    pub video: Option<bool>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// One inbound pre-bid record as sent by the host during setup.
/// Everything is optional here, validation happens once when the
/// record is turned into a [`BidSlot`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrebidRecord {
    #[serde(alias = "chartboost_placement", alias = "helium_placement")]
    pub placement: Option<String>,
    pub format: Option<String>,
    #[serde(alias = "amazon_slot_uuid")]
    pub partner_placement: Option<String>,
    pub video: Option<bool>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Marks a banner as flexible height, same as the `adaptive_banner` tag
    pub adaptive: Option<bool>,
    pub aps: Option<PartnerSettings>,
}

impl PrebidRecord {
    /// Decodes a single record from the host's untyped payload
    pub fn from_value(value: &serde_json::Value) -> Result<PrebidRecord, ConfigError> {
        serde_json::from_value(value.clone()).map_err(|e| ConfigError::Malformed(e.to_string()))
    }
}

impl TryFrom<&PrebidRecord> for BidSlot {
    type Error = ConfigError;

    fn try_from(record: &PrebidRecord) -> Result<Self, Self::Error> {
        let placement = record
            .placement
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::MissingPlacement)?
            .to_string();

        let nested = record.aps.clone().unwrap_or_default();

        let partner_placement = nested
            .partner_placement
            .or_else(|| record.partner_placement.clone())
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingPartnerPlacement {
                placement: placement.clone(),
            })?;

        let tag = record
            .format
            .as_deref()
            .ok_or_else(|| ConfigError::MissingFormat {
                placement: placement.clone(),
            })?;

        let (format, tagged_adaptive) =
            AdFormat::from_tag(tag).ok_or_else(|| ConfigError::UnknownFormat {
                placement: placement.clone(),
                format: tag.to_string(),
            })?;

        BidSlot::new(
            placement,
            partner_placement,
            format,
            nested.video.or(record.video).unwrap_or(false),
            nested.width.or(record.width),
            nested.height.or(record.height),
            tagged_adaptive || record.adaptive.unwrap_or(false),
        )
    }
}
