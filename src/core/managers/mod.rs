mod registry;

pub use registry::{CCPA_DOES_NOT_APPLY, PreBidRegistry, RegistryOptions};
