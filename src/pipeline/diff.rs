// Post diffing against the stored last-seen time.
//
// Two reporting policies share one primitive:
// - ReportAll (forced scrapes, e.g. right after `add`): notify every post
//   newer than the stored time, oldest first.
// - NewestOnly (scheduled sweeps): notify at most one post. With no stored
//   time the account is seeded from the newest post and nothing is reported.

use chrono::{DateTime, Utc};

use crate::instagram::fetcher::Post;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffPolicy {
    ReportAll,
    NewestOnly,
}

/// What a scrape should report and where the stored time should move.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PostDiff {
    /// Posts to announce, oldest first.
    pub to_notify: Vec<Post>,
    /// New `last_post_time`, or `None` when the stored value stays as it is.
    pub advance_to: Option<DateTime<Utc>>,
    /// True when a NewestOnly scrape initialized state without reporting.
    pub seeded: bool,
}

/// Compare `posts` (newest first) against `last_seen` under `policy`.
pub fn diff_posts(posts: &[Post], last_seen: Option<DateTime<Utc>>, policy: DiffPolicy) -> PostDiff {
    let is_newer = |p: &&Post| last_seen.map_or(true, |last| p.posted_at > last);
    let newest_newer = posts.iter().filter(is_newer).map(|p| p.posted_at).max();

    match (policy, last_seen) {
        (DiffPolicy::NewestOnly, None) => PostDiff {
            to_notify: Vec::new(),
            advance_to: newest_newer,
            seeded: newest_newer.is_some(),
        },
        (DiffPolicy::NewestOnly, Some(_)) => PostDiff {
            // Pinned posts can break newest-first order, so the stored time
            // still moves to the newest post seen.
            to_notify: posts.iter().find(is_newer).cloned().into_iter().collect(),
            advance_to: newest_newer,
            seeded: false,
        },
        (DiffPolicy::ReportAll, _) => {
            let mut to_notify: Vec<Post> = posts.iter().filter(is_newer).cloned().collect();
            to_notify.sort_by_key(|p| p.posted_at);
            PostDiff {
                to_notify,
                advance_to: newest_newer,
                seeded: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn posts(times: &[i64]) -> Vec<Post> {
        times
            .iter()
            .map(|&s| Post::new(format!("https://www.instagram.com/p/p{s}/"), t(s)))
            .collect()
    }

    #[test]
    fn test_newest_only_seeds_without_reporting() {
        let diff = diff_posts(&posts(&[300, 200, 100]), None, DiffPolicy::NewestOnly);
        assert!(diff.to_notify.is_empty());
        assert_eq!(diff.advance_to, Some(t(300)));
        assert!(diff.seeded);
    }

    #[test]
    fn test_newest_only_nothing_newer_leaves_state() {
        let diff = diff_posts(&posts(&[300, 200, 100]), Some(t(300)), DiffPolicy::NewestOnly);
        assert_eq!(diff, PostDiff::default());
    }

    #[test]
    fn test_newest_only_reports_a_single_post() {
        let diff = diff_posts(
            &posts(&[500, 400, 300, 200]),
            Some(t(300)),
            DiffPolicy::NewestOnly,
        );
        assert_eq!(diff.to_notify.len(), 1);
        assert_eq!(diff.to_notify[0].posted_at, t(500));
        assert_eq!(diff.advance_to, Some(t(500)));
    }

    #[test]
    fn test_newest_only_with_pinned_post_still_advances_to_max() {
        // A pinned older post leads the timeline.
        let diff = diff_posts(&posts(&[350, 500, 300]), Some(t(300)), DiffPolicy::NewestOnly);
        assert_eq!(diff.to_notify.len(), 1);
        assert_eq!(diff.advance_to, Some(t(500)));
    }

    #[test]
    fn test_report_all_without_state_reports_everything_oldest_first() {
        let diff = diff_posts(&posts(&[300, 200, 100]), None, DiffPolicy::ReportAll);
        let times: Vec<_> = diff.to_notify.iter().map(|p| p.posted_at).collect();
        assert_eq!(times, vec![t(100), t(200), t(300)]);
        assert_eq!(diff.advance_to, Some(t(300)));
        assert!(!diff.seeded);
    }

    #[test]
    fn test_report_all_only_newer_posts() {
        let diff = diff_posts(&posts(&[400, 350, 300, 200]), Some(t(300)), DiffPolicy::ReportAll);
        let times: Vec<_> = diff.to_notify.iter().map(|p| p.posted_at).collect();
        assert_eq!(times, vec![t(350), t(400)]);
        assert_eq!(diff.advance_to, Some(t(400)));
    }

    #[test]
    fn test_empty_timeline() {
        for policy in [DiffPolicy::ReportAll, DiffPolicy::NewestOnly] {
            let diff = diff_posts(&[], None, policy);
            assert_eq!(diff, PostDiff::default());
        }
    }
}
