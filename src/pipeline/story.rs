// Story debounce. Stories have no identity we can compare, so a story seen
// within the last day is assumed to be the one already announced.

use chrono::{DateTime, Duration, Utc};

/// How long a recorded story suppresses further story notifications.
pub const STORY_DEBOUNCE_HOURS: i64 = 24;

/// True while a story recorded at `last_story` still suppresses notifications.
/// Notifications are re-enabled strictly after the window has passed.
pub fn story_debounced(last_story: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    last_story.is_some_and(|last| now - last <= Duration::hours(STORY_DEBOUNCE_HOURS))
}
