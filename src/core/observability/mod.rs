mod provider;

pub use provider::{Telemetry, init, shutdown};
