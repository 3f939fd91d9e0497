use crate::app::adapter::PartnerConfiguration;
use anyhow::{Error, bail};
use config::Config;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Knobs of the adapter facade itself
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct AdapterSettings {
    /// How long to give the auction SDK to report ready after start
    #[serde(with = "humantime_serde")]
    #[builder(default = "Duration::from_millis(250)")]
    pub ready_delay: Duration,
    /// Caller side limit on a bidder info fetch. The bidder keeps
    /// waiting for the real answer, it is discarded when it lands.
    #[serde(with = "humantime_serde")]
    #[builder(default)]
    pub fetch_timeout: Option<Duration>,
    /// Forcibly reset a placement stuck loading for this long
    #[serde(with = "humantime_serde")]
    #[builder(default)]
    pub watchdog: Option<Duration>,
    /// Ask the auction SDK for test bids only
    #[builder(default)]
    pub test_mode: bool,
    /// Turn on the auction SDK's own verbose logging
    #[builder(default)]
    pub verbose_logging: bool,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            ready_delay: Duration::from_millis(250),
            fetch_timeout: None,
            watchdog: None,
            test_mode: false,
            verbose_logging: false,
        }
    }
}

/// Behaviour of the simulated auction SDK used by the demo binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
    /// Share of requests answered with no fill, 0.0 to 1.0
    pub no_fill_rate: f32,
    /// Number of distinct price buckets bids are spread over
    pub price_buckets: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(50),
            no_fill_rate: 0.1,
            price_buckets: 10,
        }
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&self.no_fill_rate) {
            bail!(
                "no_fill_rate must be between 0.0 and 1.0, got {}",
                self.no_fill_rate
            );
        }

        if self.price_buckets == 0 {
            bail!("price_buckets must be at least 1");
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Setup payload as the host would hand it to the adapter
    pub partner: PartnerConfiguration,
    #[serde(default)]
    pub adapter: AdapterSettings,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtelProto {
    Http,
    #[default]
    Grpc,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRotation {
    #[default]
    Daily,
    Hourly,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogSink {
    Stdout {
        #[serde(default = "default_true")]
        color: bool,
        #[serde(default)]
        json: bool,
        #[serde(default)]
        spans: bool,
    },
    File {
        path: PathBuf,
        #[serde(default)]
        json: bool,
        #[serde(default)]
        rotation: FileRotation,
        /// Rotated files to keep, 0 keeps everything
        #[serde(default)]
        max_files: usize,
        #[serde(default)]
        spans: bool,
    },
    Otel {
        #[serde(default)]
        endpoint: String,
        #[serde(default)]
        proto: OtelProto,
    },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Share of root spans exported through an otel sink
    pub span_sample_rate: f32,
    pub sinks: Vec<LogSink>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            span_sample_rate: 0.01,
            sinks: vec![LogSink::Stdout {
                color: true,
                json: false,
                spans: false,
            }],
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.sinks.is_empty() {
            bail!("At least one logging sink must be configured");
        }

        if self.level.parse::<tracing::Level>().is_err() {
            bail!(
                "Invalid log level: '{}'. Valid levels: trace, debug, info, warn, error",
                self.level
            );
        }

        if !(0.0..=1.0).contains(&self.span_sample_rate) {
            bail!(
                "span_sample_rate must be between 0.0 and 1.0, got {}",
                self.span_sample_rate
            );
        }

        let otel_sinks = self
            .sinks
            .iter()
            .filter(|s| matches!(s, LogSink::Otel { .. }))
            .count();
        if otel_sinks > 1 {
            bail!("Only one otel sink is supported, got {}", otel_sinks);
        }

        Ok(())
    }
}

impl AppConfig {
    pub fn load(path: &PathBuf) -> Result<AppConfig, Error> {
        let cfg = Config::builder()
            .add_source(config::File::from(path.to_path_buf()))
            .build()?;

        let app: AppConfig = cfg.try_deserialize()?;
        app.simulator.validate()?;
        app.logging.validate()?;

        Ok(app)
    }
}
