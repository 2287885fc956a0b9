use chrono::{DateTime, SubsecRound, Utc};
use std::sync::Arc;

use crate::error::{CoreResult, StoreContext};
use crate::store::{Store, TimeWindow};
use crate::threads::ThreadGraph;

/// Tracks each user's `last_viewed` watermark and counts activity newer
/// than it.
pub struct UnviewedTracker {
    store: Arc<Store>,
    threads: ThreadGraph,
}

impl UnviewedTracker {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            threads: ThreadGraph::new(store.clone()),
            store,
        }
    }

    /// Mark everything up to now as seen and return the new watermark,
    /// at the microsecond precision it is stored with.
    pub fn update_last_viewed(&self, user_id: &str) -> CoreResult<DateTime<Utc>> {
        let now = Utc::now().trunc_subsecs(6);
        self.store
            .set_last_viewed(user_id, now)
            .context(|| format!("update_last_viewed({})", user_id))?;
        log::debug!("User {} viewed activity at {}", user_id, now);
        Ok(now)
    }

    /// Replies and likes from other users created after the watermark.
    /// With no watermark every eligible activity counts.
    pub fn has_unviewed_activities(&self, user_id: &str) -> CoreResult<i64> {
        let last_viewed = self
            .store
            .get_last_viewed(user_id)
            .context(|| format!("has_unviewed_activities({})", user_id))?;

        let my_thread_ids: Vec<String> = self
            .threads
            .threads_by_author(user_id)?
            .into_iter()
            .map(|t| t.id)
            .collect();
        if my_thread_ids.is_empty() {
            return Ok(0);
        }

        let window = TimeWindow::after(last_viewed);
        let replies = self
            .store
            .count_replies_to(&my_thread_ids, user_id, window)
            .context(|| format!("has_unviewed_activities({}): replies", user_id))?;
        let likes = self
            .store
            .count_likes_on(&my_thread_ids, user_id, window)
            .context(|| format!("has_unviewed_activities({}): likes", user_id))?;

        Ok(replies + likes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::models::{CreateThreadRequest, Like, User};
    use chrono::Duration;

    fn setup() -> (Arc<Store>, ThreadGraph, UnviewedTracker) {
        let store = Arc::new(Store::in_memory().unwrap());
        store.upsert_user(&User::new("a1", "alice", "Alice")).unwrap();
        store.upsert_user(&User::new("b1", "bob", "Bob")).unwrap();
        let threads = ThreadGraph::new(store.clone());
        let tracker = UnviewedTracker::new(store.clone());
        (store, threads, tracker)
    }

    fn post(threads: &ThreadGraph) -> String {
        threads
            .create_thread(
                "a1",
                CreateThreadRequest {
                    text: "post".to_string(),
                    image: None,
                    community_id: None,
                },
            )
            .unwrap()
            .id
    }

    #[test]
    fn test_everything_is_unviewed_without_watermark() {
        let (_store, threads, tracker) = setup();
        let t1 = post(&threads);
        threads.add_reply(&t1, "b1", "first").unwrap();
        threads.add_reply(&t1, "b1", "second").unwrap();
        threads.like_thread("b1", &t1).unwrap();
        threads.like_thread("a1", &t1).unwrap();

        assert_eq!(tracker.has_unviewed_activities("a1").unwrap(), 3);
    }

    #[test]
    fn test_watermark_resets_count() {
        let (store, threads, tracker) = setup();
        let t1 = post(&threads);
        threads.add_reply(&t1, "b1", "before").unwrap();
        assert_eq!(tracker.has_unviewed_activities("a1").unwrap(), 1);

        let watermark = tracker.update_last_viewed("a1").unwrap();
        assert_eq!(store.get_last_viewed("a1").unwrap(), Some(watermark));
        assert_eq!(tracker.has_unviewed_activities("a1").unwrap(), 0);

        store
            .create_like(&Like {
                id: "late-like".to_string(),
                thread_id: t1.clone(),
                user_id: "b1".to_string(),
                liked_user_id: Some("a1".to_string()),
                created_at: watermark + Duration::microseconds(1),
            })
            .unwrap();
        assert_eq!(tracker.has_unviewed_activities("a1").unwrap(), 1);
    }

    #[test]
    fn test_own_activity_never_counts() {
        let (_store, threads, tracker) = setup();
        let t1 = post(&threads);
        threads.add_reply(&t1, "a1", "note to self").unwrap();
        threads.like_thread("a1", &t1).unwrap();

        assert_eq!(tracker.has_unviewed_activities("a1").unwrap(), 0);
    }

    #[test]
    fn test_unknown_user_is_not_found() {
        let (_store, _threads, tracker) = setup();
        assert!(matches!(tracker.update_last_viewed("ghost"), Err(CoreError::NotFound(_))));
        assert!(matches!(
            tracker.has_unviewed_activities("ghost"),
            Err(CoreError::NotFound(_))
        ));
    }
}
