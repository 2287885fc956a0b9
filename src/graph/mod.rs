//! Follow graph
//!
//! Every edge lives in two owned sets: the follower's `following` and the
//! target's `followers`. Both sets are written together in one store
//! transaction, and every mutation is a set operation, so a retried
//! follow or unfollow converges no matter how often it ran before.
//! `repair_follow_graph` re-derives the followers side for data written
//! before that guarantee existed.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult, StoreContext};
use crate::models::{FollowList, RepairReport};
use crate::store::Store;

#[derive(Clone)]
pub struct SocialGraph {
    store: Arc<Store>,
}

impl SocialGraph {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Make `follower_id` follow `target_id`. Following yourself is ignored.
    pub fn follow(&self, follower_id: &str, target_id: &str) -> CoreResult<()> {
        if follower_id == target_id {
            log::warn!("Ignoring self-follow by user {}", follower_id);
            return Ok(());
        }

        let ctx = || format!("follow({} -> {})", follower_id, target_id);
        self.ensure_user(follower_id)?;
        self.ensure_user(target_id)?;

        if self.store.add_follow(follower_id, target_id, Utc::now()).context(ctx)? {
            log::info!("User {} now follows {}", follower_id, target_id);
        } else {
            log::debug!("User {} already follows {}", follower_id, target_id);
        }
        Ok(())
    }

    /// Remove the edge if present. Unfollowing yourself is ignored.
    pub fn unfollow(&self, follower_id: &str, target_id: &str) -> CoreResult<()> {
        if follower_id == target_id {
            log::warn!("Ignoring self-unfollow by user {}", follower_id);
            return Ok(());
        }

        let ctx = || format!("unfollow({} -> {})", follower_id, target_id);
        self.ensure_user(follower_id)?;
        self.ensure_user(target_id)?;

        if self.store.remove_follow(follower_id, target_id).context(ctx)? {
            log::info!("User {} unfollowed {}", follower_id, target_id);
        }
        Ok(())
    }

    pub fn get_followers(&self, user_id: &str) -> CoreResult<FollowList> {
        self.ensure_user(user_id)?;
        let users = self
            .store
            .followers(user_id)
            .context(|| format!("get_followers({})", user_id))?;
        Ok(FollowList {
            count: users.len(),
            users,
        })
    }

    pub fn get_following(&self, user_id: &str) -> CoreResult<FollowList> {
        self.ensure_user(user_id)?;
        let users = self
            .store
            .following(user_id)
            .context(|| format!("get_following({})", user_id))?;
        Ok(FollowList {
            count: users.len(),
            users,
        })
    }

    /// Raw follower ids, for membership checks without loading profiles.
    pub fn get_follower_ids(&self, user_id: &str) -> CoreResult<HashSet<String>> {
        self.ensure_user(user_id)?;
        let ids = self
            .store
            .follower_ids(user_id)
            .context(|| format!("get_follower_ids({})", user_id))?;
        Ok(ids.into_iter().collect())
    }

    pub fn is_following(&self, follower_id: &str, target_id: &str) -> CoreResult<bool> {
        self.ensure_user(follower_id)?;
        Ok(self.get_follower_ids(target_id)?.contains(follower_id))
    }

    pub fn repair_follow_graph(&self) -> CoreResult<RepairReport> {
        let report = self
            .store
            .repair_follow_mirrors()
            .context(|| "repair_follow_graph".to_string())?;
        if report != RepairReport::default() {
            log::warn!(
                "Follow graph repaired: {} follower entries restored, {} orphaned entries removed",
                report.followers_added,
                report.followers_removed
            );
        }
        Ok(report)
    }

    fn ensure_user(&self, user_id: &str) -> CoreResult<()> {
        let exists = self
            .store
            .user_exists(user_id)
            .context(|| format!("user_exists({})", user_id))?;
        if !exists {
            return Err(CoreError::NotFound(format!("User {}", user_id)));
        }
        Ok(())
    }
}
