use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User is a member of the network. The id is issued by the identity
/// provider and never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Always stored lower-cased; unique ignoring case.
    pub username: String,
    pub name: String,
    pub bio: String,
    pub image: String,
    pub onboarded: bool,
    /// Watermark between seen and unseen activity. `None` until the user
    /// first opens their activity feed.
    pub last_viewed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Owned threads, oldest first. Derived from `threads.author_id`.
    #[serde(default)]
    pub threads: Vec<String>,
    /// Derived from the likes the user has placed.
    #[serde(default)]
    pub liked_threads: Vec<String>,
    #[serde(default)]
    pub communities: Vec<String>,
}

impl User {
    /// A fresh, not yet onboarded user.
    pub fn new(id: impl Into<String>, username: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            username: username.into(),
            name: name.into(),
            bio: String::new(),
            image: String::new(),
            onboarded: false,
            last_viewed: None,
            created_at: now,
            updated_at: now,
            threads: Vec::new(),
            liked_threads: Vec::new(),
            communities: Vec::new(),
        }
    }
}

/// Public projection of a user, attached to threads, activity and search
/// results instead of the full record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub name: String,
    pub image: String,
}

/// Thread is a post or a reply. Replies carry a `parent_id`; the
/// parent's `children` are derived from that column and never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub text: String,
    pub author_id: Option<String>,
    pub image: Option<String>,
    pub parent_id: Option<String>,
    pub community_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub likes: Vec<String>,
}

/// A thread with its author resolved and its replies expanded.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadView {
    #[serde(flatten)]
    pub thread: Thread,
    pub author: Option<UserSummary>,
    pub like_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<ThreadView>,
}

/// Like joins the liking user to the liked thread and its author.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Like {
    pub id: String,
    pub thread_id: String,
    /// The user who placed the like.
    pub user_id: String,
    /// Author of the liked thread at the time of the like.
    pub liked_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Community {
    pub id: String,
    pub name: String,
    pub image: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Reply,
    Like,
}

/// One entry of a user's activity feed: someone else replied to or liked
/// one of the user's threads.
#[derive(Debug, Clone, Serialize)]
pub struct Activity {
    pub kind: ActivityKind,
    pub actor: UserSummary,
    /// The user's own thread that received the reply or like.
    pub target_thread_id: String,
    /// Reply thread id or like id.
    pub source_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ActivityPage {
    pub activities: Vec<Activity>,
    /// Pass back as `before` to fetch the next page.
    pub next_cursor: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct FollowList {
    pub users: Vec<UserSummary>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct UserPage {
    pub users: Vec<UserSummary>,
    pub has_next_page: bool,
}

#[derive(Debug, Serialize)]
pub struct ThreadPage {
    pub threads: Vec<ThreadView>,
    pub has_next_page: bool,
}

/// Outcome of a follow-graph reconciliation pass.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct RepairReport {
    pub followers_added: usize,
    pub followers_removed: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

// Request/Response types for API
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertProfileRequest {
    pub username: String,
    pub name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateThreadRequest {
    pub text: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub community_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommunityRequest {
    pub name: String,
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
