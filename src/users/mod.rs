use chrono::Utc;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult, StoreContext};
use crate::models::*;
use crate::store::{Store, StoreError};
use crate::threads::page_offset;

pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Parameters of a directory search. Build with [`UserSearchQuery::new`]
/// and the chained setters; unset fields keep their defaults (page 1,
/// 20 per page, newest first, no text filter).
#[derive(Debug, Clone)]
pub struct UserSearchQuery {
    pub requesting_user_id: String,
    pub search_string: Option<String>,
    pub page_number: i64,
    pub page_size: i64,
    pub sort_order: SortOrder,
}

impl UserSearchQuery {
    pub fn new(requesting_user_id: impl Into<String>) -> Self {
        Self {
            requesting_user_id: requesting_user_id.into(),
            search_string: None,
            page_number: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort_order: SortOrder::default(),
        }
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search_string = Some(text.into());
        self
    }

    pub fn page(mut self, page_number: i64) -> Self {
        self.page_number = page_number;
        self
    }

    pub fn page_size(mut self, page_size: i64) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn sort(mut self, sort_order: SortOrder) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// Lower-cased substring LIKE pattern for the search text, or `None`
    /// when there is nothing to filter on.
    fn like_pattern(&self) -> Option<String> {
        let text = self.search_string.as_deref()?.trim().to_lowercase();
        if text.is_empty() {
            return None;
        }
        let escaped = text
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        Some(format!("%{}%", escaped))
    }
}

/// Profiles and the searchable user directory.
#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<Store>,
}

impl UserDirectory {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Create the user on first profile completion, or update the profile
    /// afterwards. Marks the user as onboarded.
    pub fn upsert_profile(&self, user_id: &str, req: UpsertProfileRequest) -> CoreResult<User> {
        let username = req.username.trim().to_lowercase();
        if username.is_empty() {
            return Err(CoreError::Validation("username must not be empty".to_string()));
        }
        let name = req.name.trim().to_string();
        if name.is_empty() {
            return Err(CoreError::Validation("name must not be empty".to_string()));
        }

        match self.store.get_user_by_username(&username) {
            Ok(other) if other.id != user_id => {
                return Err(CoreError::Validation(format!(
                    "username '{}' is already taken",
                    username
                )));
            }
            Ok(_) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(CoreError::from_store(e, format!("upsert_profile({})", user_id))),
        }

        let mut user = User::new(user_id, username, name);
        user.bio = req.bio;
        user.image = req.image;
        user.onboarded = true;
        user.updated_at = Utc::now();

        self.store
            .upsert_user(&user)
            .context(|| format!("upsert_profile({})", user_id))?;
        log::info!("Profile saved for user {} (@{})", user_id, user.username);

        self.get_user(user_id)
    }

    pub fn get_user(&self, user_id: &str) -> CoreResult<User> {
        self.store
            .get_user(user_id)
            .context(|| format!("get_user({})", user_id))
    }

    /// Page through every user except the requester, optionally filtered
    /// by a case-insensitive substring of username or name.
    pub fn fetch_users(&self, query: &UserSearchQuery) -> CoreResult<UserPage> {
        let skip = page_offset(query.page_number, query.page_size)?;
        let pattern = query.like_pattern();
        let ctx = || format!("fetch_users({})", query.requesting_user_id);

        let users = self
            .store
            .search_users(
                &query.requesting_user_id,
                pattern.as_deref(),
                query.sort_order,
                query.page_size,
                skip,
            )
            .context(ctx)?;
        let total = self
            .store
            .count_search_users(&query.requesting_user_id, pattern.as_deref())
            .context(ctx)?;

        let has_next_page = total > skip + users.len() as i64;
        Ok(UserPage {
            users,
            has_next_page,
        })
    }
}
