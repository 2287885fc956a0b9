use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult, StoreContext};
use crate::models::*;
use crate::store::{Store, TimeWindow};

/// Reply trees deeper than this are cut off when expanded.
pub const MAX_REPLY_DEPTH: usize = 16;

/// Reads and writes threads, replies and likes.
#[derive(Clone)]
pub struct ThreadGraph {
    store: Arc<Store>,
}

impl ThreadGraph {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    // ==================== Writes ====================

    pub fn create_thread(&self, author_id: &str, req: CreateThreadRequest) -> CoreResult<Thread> {
        let text = validate_text(&req.text)?;
        self.ensure_user(author_id)?;

        if let Some(ref community_id) = req.community_id {
            self.store
                .get_community(community_id)
                .context(|| format!("create_thread(community {})", community_id))?;
        }

        let thread = Thread {
            id: Uuid::new_v4().to_string(),
            text,
            author_id: Some(author_id.to_string()),
            image: req.image.filter(|i| !i.is_empty()),
            parent_id: None,
            community_id: req.community_id,
            created_at: Utc::now(),
            children: Vec::new(),
            likes: Vec::new(),
        };

        self.store
            .create_thread(&thread)
            .context(|| format!("create_thread(author {})", author_id))?;
        log::info!("User {} posted thread {}", author_id, thread.id);
        Ok(thread)
    }

    /// Reply to an existing thread. The parent must exist.
    pub fn add_reply(&self, parent_id: &str, author_id: &str, text: &str) -> CoreResult<Thread> {
        let text = validate_text(text)?;
        self.ensure_user(author_id)?;

        let exists = self
            .store
            .thread_exists(parent_id)
            .context(|| format!("add_reply(parent {})", parent_id))?;
        if !exists {
            return Err(CoreError::NotFound(format!("Thread {}", parent_id)));
        }

        let reply = Thread {
            id: Uuid::new_v4().to_string(),
            text,
            author_id: Some(author_id.to_string()),
            image: None,
            parent_id: Some(parent_id.to_string()),
            community_id: None,
            created_at: Utc::now(),
            children: Vec::new(),
            likes: Vec::new(),
        };

        self.store
            .create_thread(&reply)
            .context(|| format!("add_reply({} -> {})", author_id, parent_id))?;
        log::info!("User {} replied to thread {}", author_id, parent_id);
        Ok(reply)
    }

    /// Like a thread. Liking twice leaves a single like behind.
    pub fn like_thread(&self, user_id: &str, thread_id: &str) -> CoreResult<bool> {
        self.ensure_user(user_id)?;
        let thread = self
            .store
            .get_thread(thread_id)
            .context(|| format!("like_thread({} -> {})", user_id, thread_id))?;

        let like = Like {
            id: Uuid::new_v4().to_string(),
            thread_id: thread.id,
            user_id: user_id.to_string(),
            liked_user_id: thread.author_id,
            created_at: Utc::now(),
        };

        let added = self
            .store
            .create_like(&like)
            .context(|| format!("like_thread({} -> {})", user_id, thread_id))?;
        if added {
            log::info!("User {} liked thread {}", user_id, thread_id);
        }
        Ok(added)
    }

    pub fn unlike_thread(&self, user_id: &str, thread_id: &str) -> CoreResult<bool> {
        self.store
            .delete_like(thread_id, user_id)
            .context(|| format!("unlike_thread({} -> {})", user_id, thread_id))
    }

    // ==================== Reads ====================

    /// A thread with its author and full reply tree.
    pub fn get_thread(&self, thread_id: &str) -> CoreResult<ThreadView> {
        let thread = self
            .store
            .get_thread(thread_id)
            .context(|| format!("get_thread({})", thread_id))?;
        let mut views = self.build_views(vec![thread], MAX_REPLY_DEPTH)?;
        views
            .pop()
            .ok_or_else(|| CoreError::NotFound(format!("Thread {}", thread_id)))
    }

    pub fn author_of(&self, thread_id: &str) -> CoreResult<Option<UserSummary>> {
        let thread = self
            .store
            .get_thread(thread_id)
            .context(|| format!("author_of({})", thread_id))?;
        let Some(author_id) = thread.author_id else {
            return Ok(None);
        };
        let mut summaries = self
            .store
            .get_user_summaries(&[author_id.clone()])
            .context(|| format!("author_of({})", thread_id))?;
        Ok(summaries.remove(&author_id))
    }

    /// Threads authored by the user, oldest first, with children and like
    /// references resolved.
    pub fn threads_by_author(&self, user_id: &str) -> CoreResult<Vec<Thread>> {
        self.store
            .threads_by_author(user_id)
            .context(|| format!("threads_by_author({})", user_id))
    }

    /// Top-level threads, newest first.
    pub fn fetch_posts(&self, page_number: i64, page_size: i64) -> CoreResult<ThreadPage> {
        let skip = page_offset(page_number, page_size)?;

        let threads = self
            .store
            .list_top_level_threads(page_size, skip)
            .context(|| format!("fetch_posts(page {}, size {})", page_number, page_size))?;
        let total = self
            .store
            .count_top_level_threads()
            .context(|| "fetch_posts(count)".to_string())?;

        let has_next_page = total > skip + threads.len() as i64;
        Ok(ThreadPage {
            threads: self.build_views(threads, 1)?,
            has_next_page,
        })
    }

    /// The user's threads, each with its direct replies.
    pub fn fetch_user_posts(&self, user_id: &str) -> CoreResult<Vec<ThreadView>> {
        self.ensure_user(user_id)?;
        let threads = self.threads_by_author(user_id)?;
        self.build_views(threads, 1)
    }

    /// Likes received on the user's threads from other users.
    pub fn total_likes(&self, user_id: &str) -> CoreResult<i64> {
        self.ensure_user(user_id)?;
        let thread_ids: Vec<String> = self
            .threads_by_author(user_id)?
            .into_iter()
            .map(|t| t.id)
            .collect();
        self.store
            .count_likes_on(&thread_ids, user_id, TimeWindow::all())
            .context(|| format!("total_likes({})", user_id))
    }

    fn build_views(&self, threads: Vec<Thread>, depth: usize) -> CoreResult<Vec<ThreadView>> {
        let author_ids: Vec<String> = threads.iter().filter_map(|t| t.author_id.clone()).collect();
        let authors: HashMap<String, UserSummary> = self
            .store
            .get_user_summaries(&author_ids)
            .context(|| "resolve thread authors".to_string())?;

        let mut views = Vec::with_capacity(threads.len());
        for thread in threads {
            let replies = if depth > 0 && !thread.children.is_empty() {
                let children = self
                    .store
                    .children_of(&thread.id)
                    .context(|| format!("children_of({})", thread.id))?;
                self.build_views(children, depth - 1)?
            } else {
                Vec::new()
            };

            views.push(ThreadView {
                author: thread.author_id.as_ref().and_then(|id| authors.get(id).cloned()),
                like_count: thread.likes.len(),
                replies,
                thread,
            });
        }
        Ok(views)
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

fn validate_text(text: &str) -> CoreResult<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation("Thread text must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

/// Rows to skip for a 1-based page. Rejects pages that are out of range
/// or whose offset would not fit in an `i64`.
pub(crate) fn page_offset(page_number: i64, page_size: i64) -> CoreResult<i64> {
    if page_number < 1 {
        return Err(CoreError::Validation(format!(
            "page_number must be >= 1, got {}",
            page_number
        )));
    }
    if page_size < 1 {
        return Err(CoreError::Validation(format!(
            "page_size must be >= 1, got {}",
            page_size
        )));
    }
    // The page's end must fit too, so `skip + returned` cannot overflow
    let end = page_number.checked_mul(page_size).ok_or_else(|| {
        CoreError::Validation(format!(
            "page {} of size {} is out of range",
            page_number, page_size
        ))
    })?;
    Ok(end - page_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<Store>, ThreadGraph) {
        let store = Arc::new(Store::in_memory().unwrap());
        store.upsert_user(&User::new("a1", "alice", "Alice")).unwrap();
        store.upsert_user(&User::new("b1", "bob", "Bob")).unwrap();
        let threads = ThreadGraph::new(store.clone());
        (store, threads)
    }

    fn post(threads: &ThreadGraph, author: &str, text: &str) -> Thread {
        threads
            .create_thread(
                author,
                CreateThreadRequest {
                    text: text.to_string(),
                    image: None,
                    community_id: None,
                },
            )
            .unwrap()
    }

    #[test]
    fn test_reply_tree_is_resolved() {
        let (_store, threads) = setup();
        let root = post(&threads, "a1", "hello");
        let reply = threads.add_reply(&root.id, "b1", "hi alice").unwrap();
        threads.add_reply(&reply.id, "a1", "hi bob").unwrap();

        let view = threads.get_thread(&root.id).unwrap();
        assert_eq!(view.author.as_ref().unwrap().username, "alice");
        assert_eq!(view.thread.children, vec![reply.id.clone()]);
        assert_eq!(view.replies.len(), 1);
        assert_eq!(view.replies[0].author.as_ref().unwrap().id, "b1");
        assert_eq!(view.replies[0].replies.len(), 1);
        assert_eq!(view.replies[0].replies[0].thread.text, "hi bob");
    }

    #[test]
    fn test_reply_to_missing_parent_is_not_found() {
        let (_store, threads) = setup();
        let err = threads.add_reply("missing", "b1", "hello?").unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn test_empty_text_is_rejected() {
        let (_store, threads) = setup();
        let err = threads
            .create_thread(
                "a1",
                CreateThreadRequest {
                    text: "   ".to_string(),
                    image: None,
                    community_id: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_like_once_per_user() {
        let (_store, threads) = setup();
        let root = post(&threads, "a1", "like me");

        assert!(threads.like_thread("b1", &root.id).unwrap());
        assert!(!threads.like_thread("b1", &root.id).unwrap());
        assert_eq!(threads.get_thread(&root.id).unwrap().like_count, 1);

        assert!(threads.unlike_thread("b1", &root.id).unwrap());
        assert!(!threads.unlike_thread("b1", &root.id).unwrap());
        assert_eq!(threads.get_thread(&root.id).unwrap().like_count, 0);
    }

    #[test]
    fn test_total_likes_ignores_self_likes() {
        let (_store, threads) = setup();
        let first = post(&threads, "a1", "one");
        let second = post(&threads, "a1", "two");

        threads.like_thread("b1", &first.id).unwrap();
        threads.like_thread("b1", &second.id).unwrap();
        threads.like_thread("a1", &second.id).unwrap();

        assert_eq!(threads.total_likes("a1").unwrap(), 2);
        assert_eq!(threads.total_likes("b1").unwrap(), 0);
    }

    #[test]
    fn test_fetch_posts_excludes_replies() {
        let (_store, threads) = setup();
        let root = post(&threads, "a1", "top");
        threads.add_reply(&root.id, "b1", "reply").unwrap();
        post(&threads, "b1", "another top");

        let page = threads.fetch_posts(1, 1).unwrap();
        assert_eq!(page.threads.len(), 1);
        assert!(page.has_next_page);

        let page = threads.fetch_posts(2, 1).unwrap();
        assert_eq!(page.threads.len(), 1);
        assert!(!page.has_next_page);

        assert!(matches!(threads.fetch_posts(0, 10), Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_page_offset_rejects_overflow() {
        assert_eq!(page_offset(1, 20).unwrap(), 0);
        assert_eq!(page_offset(3, 10).unwrap(), 20);

        let (_store, threads) = setup();
        post(&threads, "a1", "top");
        assert!(matches!(threads.fetch_posts(i64::MAX, 2), Err(CoreError::Validation(_))));
        assert!(matches!(threads.fetch_posts(2, i64::MAX), Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_user_posts_include_replies() {
        let (_store, threads) = setup();
        let root = post(&threads, "a1", "mine");
        threads.add_reply(&root.id, "b1", "yours").unwrap();

        let posts = threads.fetch_user_posts("a1").unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].replies.len(), 1);
        assert_eq!(posts[0].replies[0].author.as_ref().unwrap().name, "Bob");
        assert_eq!(threads.author_of(&root.id).unwrap().unwrap().id, "a1");
    }
}
