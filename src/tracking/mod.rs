// Tracking state: which accounts are watched and what has already been seen.

pub mod account;
pub mod dedup;
pub mod registry;

pub use account::AccountId;
pub use dedup::{DedupStore, StateTicket};
pub use registry::Registry;
