pub mod bid;
pub mod slot;
