// Notification delivery: the sink trait and its Discord/console implementations.

pub mod console;
pub mod discord;
pub mod traits;

pub use traits::{DestinationHandle, NotificationEvent, NotificationSink};
