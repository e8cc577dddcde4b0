// Instagram access: the fetcher boundary, the web client, and request pacing.

pub mod client;
pub mod fetcher;
pub mod rate_limit;
