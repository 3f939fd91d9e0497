pub mod auction;
pub mod config_manager;
pub mod managers;
pub mod models;
pub mod observability;
pub mod prebid;
pub mod spec;
