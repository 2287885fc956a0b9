//! Activity feed
//!
//! A user's activity is every reply to, and every like on, one of their
//! own threads, minus anything the user did themselves. Activity is
//! derived from authorship only; follow edges play no part.

pub mod unviewed;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult, StoreContext};
use crate::models::*;
use crate::store::{Store, TimeWindow};
use crate::threads::ThreadGraph;

pub use unviewed::UnviewedTracker;

pub const MAX_ACTIVITY_PAGE: usize = 100;

pub struct ActivityAggregator {
    store: Arc<Store>,
    threads: ThreadGraph,
}

impl ActivityAggregator {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            threads: ThreadGraph::new(store.clone()),
            store,
        }
    }

    /// The user's whole activity feed, most recent first.
    pub fn get_activity(&self, user_id: &str) -> CoreResult<Vec<Activity>> {
        let my_thread_ids = self.my_thread_ids(user_id)?;
        self.collect(user_id, &my_thread_ids, TimeWindow::all(), None)
    }

    /// One page of the feed, strictly older than `before`. A page never
    /// splits a run of activities sharing the same timestamp, so it may
    /// hold slightly more than `limit` entries.
    pub fn get_activity_page(
        &self,
        user_id: &str,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> CoreResult<ActivityPage> {
        if limit == 0 || limit > MAX_ACTIVITY_PAGE {
            return Err(CoreError::Validation(format!(
                "limit must be between 1 and {}, got {}",
                MAX_ACTIVITY_PAGE, limit
            )));
        }

        let my_thread_ids = self.my_thread_ids(user_id)?;
        // Newest `limit` of each kind; the merged top `limit` is among them
        let mut activities = self.collect(user_id, &my_thread_ids, TimeWindow::before(before), Some(limit))?;
        if activities.len() < limit {
            return Ok(ActivityPage {
                activities,
                next_cursor: None,
            });
        }

        let boundary = activities[limit - 1].created_at;
        activities.retain(|a| a.created_at > boundary);
        activities.extend(self.collect(user_id, &my_thread_ids, TimeWindow::at(boundary), None)?);

        let older = TimeWindow::before(Some(boundary));
        let ctx = || format!("get_activity_page({}): remaining", user_id);
        let remaining = self
            .store
            .count_replies_to(&my_thread_ids, user_id, older)
            .context(ctx)?
            + self
                .store
                .count_likes_on(&my_thread_ids, user_id, older)
                .context(ctx)?;

        Ok(ActivityPage {
            activities,
            next_cursor: (remaining > 0).then_some(boundary),
        })
    }

    fn my_thread_ids(&self, user_id: &str) -> CoreResult<Vec<String>> {
        Ok(self
            .threads
            .threads_by_author(user_id)?
            .into_iter()
            .map(|t| t.id)
            .collect())
    }

    fn collect(
        &self,
        user_id: &str,
        my_thread_ids: &[String],
        window: TimeWindow,
        limit: Option<usize>,
    ) -> CoreResult<Vec<Activity>> {
        if my_thread_ids.is_empty() {
            return Ok(Vec::new());
        }

        let replies = self
            .store
            .replies_to(my_thread_ids, user_id, window, limit)
            .context(|| format!("get_activity({}): replies", user_id))?;
        let likes = self
            .store
            .likes_on(my_thread_ids, user_id, window, limit)
            .context(|| format!("get_activity({}): likes", user_id))?;

        let mut actor_ids: Vec<String> = replies
            .iter()
            .filter_map(|r| r.author_id.clone())
            .chain(likes.iter().map(|l| l.user_id.clone()))
            .collect();
        actor_ids.sort();
        actor_ids.dedup();
        let actors: HashMap<String, UserSummary> = self
            .store
            .get_user_summaries(&actor_ids)
            .context(|| format!("get_activity({}): actors", user_id))?;

        let mut activities = Vec::with_capacity(replies.len() + likes.len());

        for reply in replies {
            let (Some(author_id), Some(parent_id)) = (reply.author_id, reply.parent_id) else {
                continue;
            };
            let Some(actor) = actors.get(&author_id) else {
                log::debug!("Skipping reply {} from unknown user {}", reply.id, author_id);
                continue;
            };
            activities.push(Activity {
                kind: ActivityKind::Reply,
                actor: actor.clone(),
                target_thread_id: parent_id,
                source_id: reply.id,
                created_at: reply.created_at,
            });
        }

        for like in likes {
            let Some(actor) = actors.get(&like.user_id) else {
                log::debug!("Skipping like {} from unknown user {}", like.id, like.user_id);
                continue;
            };
            activities.push(Activity {
                kind: ActivityKind::Like,
                actor: actor.clone(),
                target_thread_id: like.thread_id,
                source_id: like.id,
                created_at: like.created_at,
            });
        }

        // Stable: equal timestamps keep store order, replies before likes
        activities.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        log::debug!("Collected {} activities for user {}", activities.len(), user_id);
        Ok(activities)
    }
}
