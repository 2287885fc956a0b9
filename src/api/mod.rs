use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

use crate::activity::{ActivityAggregator, UnviewedTracker};
use crate::auth::AuthUser;
use crate::communities::Communities;
use crate::error::CoreError;
use crate::graph::SocialGraph;
use crate::models::*;
use crate::store::Store;
use crate::threads::ThreadGraph;
use crate::users::{UserDirectory, UserSearchQuery, DEFAULT_PAGE_SIZE};

pub struct AppState {
    pub graph: SocialGraph,
    pub threads: ThreadGraph,
    pub activity: ActivityAggregator,
    pub unviewed: UnviewedTracker,
    pub users: UserDirectory,
    pub communities: Communities,
}

impl AppState {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            graph: SocialGraph::new(store.clone()),
            threads: ThreadGraph::new(store.clone()),
            activity: ActivityAggregator::new(store.clone()),
            unviewed: UnviewedTracker::new(store.clone()),
            users: UserDirectory::new(store.clone()),
            communities: Communities::new(store),
        }
    }
}

type ApiResult = Result<HttpResponse, CoreError>;

fn ok<T: serde::Serialize>(data: T) -> ApiResult {
    Ok(HttpResponse::Ok().json(ApiResponse::success(data)))
}

fn created<T: serde::Serialize>(data: T) -> ApiResult {
    Ok(HttpResponse::Created().json(ApiResponse::success(data)))
}

// ==================== Health Check ====================

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

// ==================== Profile & Directory ====================

pub async fn upsert_profile(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    body: web::Json<UpsertProfileRequest>,
) -> ApiResult {
    ok(state.users.upsert_profile(&auth_user.user_id, body.into_inner())?)
}

pub async fn get_user(
    state: web::Data<AppState>,
    _auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    ok(state.users.get_user(&path.into_inner())?)
}

#[derive(Deserialize)]
pub struct FetchUsersQuery {
    q: Option<String>,
    page: Option<i64>,
    page_size: Option<i64>,
    sort: Option<SortOrder>,
}

pub async fn fetch_users(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    query: web::Query<FetchUsersQuery>,
) -> ApiResult {
    let query = query.into_inner();
    let mut search = UserSearchQuery::new(auth_user.user_id)
        .page(query.page.unwrap_or(1))
        .page_size(query.page_size.unwrap_or(DEFAULT_PAGE_SIZE))
        .sort(query.sort.unwrap_or_default());
    if let Some(q) = query.q {
        search = search.search(q);
    }
    ok(state.users.fetch_users(&search)?)
}

// ==================== Follow Graph ====================

pub async fn follow(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    state.graph.follow(&auth_user.user_id, &path.into_inner())?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn unfollow(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    state.graph.unfollow(&auth_user.user_id, &path.into_inner())?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn get_followers(
    state: web::Data<AppState>,
    _auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    ok(state.graph.get_followers(&path.into_inner())?)
}

pub async fn get_following(
    state: web::Data<AppState>,
    _auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    ok(state.graph.get_following(&path.into_inner())?)
}

pub async fn get_follower_ids(
    state: web::Data<AppState>,
    _auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    let mut ids: Vec<String> = state.graph.get_follower_ids(&path.into_inner())?.into_iter().collect();
    ids.sort();
    ok(ids)
}

/// Whether the caller follows the user in the path.
pub async fn follow_state(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    let following = state.graph.is_following(&auth_user.user_id, &path.into_inner())?;
    ok(serde_json::json!({ "following": following }))
}

// ==================== Threads ====================

pub async fn create_thread(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    body: web::Json<CreateThreadRequest>,
) -> ApiResult {
    created(state.threads.create_thread(&auth_user.user_id, body.into_inner())?)
}

#[derive(Deserialize)]
pub struct FetchPostsQuery {
    page: Option<i64>,
    page_size: Option<i64>,
}

pub async fn fetch_posts(
    state: web::Data<AppState>,
    _auth_user: AuthUser,
    query: web::Query<FetchPostsQuery>,
) -> ApiResult {
    ok(state.threads.fetch_posts(
        query.page.unwrap_or(1),
        query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
    )?)
}

pub async fn get_thread(
    state: web::Data<AppState>,
    _auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    ok(state.threads.get_thread(&path.into_inner())?)
}

pub async fn add_reply(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
    body: web::Json<ReplyRequest>,
) -> ApiResult {
    created(state.threads.add_reply(&path.into_inner(), &auth_user.user_id, &body.text)?)
}

pub async fn like_thread(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    let added = state.threads.like_thread(&auth_user.user_id, &path.into_inner())?;
    ok(serde_json::json!({ "liked": true, "added": added }))
}

pub async fn unlike_thread(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    state.threads.unlike_thread(&auth_user.user_id, &path.into_inner())?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn fetch_user_posts(
    state: web::Data<AppState>,
    _auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    ok(state.threads.fetch_user_posts(&path.into_inner())?)
}

pub async fn total_likes(
    state: web::Data<AppState>,
    _auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    let total = state.threads.total_likes(&path.into_inner())?;
    ok(serde_json::json!({ "total_likes": total }))
}

// ==================== Activity ====================

pub async fn get_activity(state: web::Data<AppState>, auth_user: AuthUser) -> ApiResult {
    ok(state.activity.get_activity(&auth_user.user_id)?)
}

#[derive(Deserialize)]
pub struct ActivityPageQuery {
    before: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

pub async fn get_activity_page(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    query: web::Query<ActivityPageQuery>,
) -> ApiResult {
    ok(state
        .activity
        .get_activity_page(&auth_user.user_id, query.before, query.limit.unwrap_or(DEFAULT_PAGE_SIZE as usize))?)
}

pub async fn mark_activity_viewed(state: web::Data<AppState>, auth_user: AuthUser) -> ApiResult {
    let last_viewed = state.unviewed.update_last_viewed(&auth_user.user_id)?;
    ok(serde_json::json!({ "last_viewed": last_viewed }))
}

pub async fn unviewed_count(state: web::Data<AppState>, auth_user: AuthUser) -> ApiResult {
    let count = state.unviewed.has_unviewed_activities(&auth_user.user_id)?;
    ok(serde_json::json!({ "count": count }))
}

// ==================== Communities ====================

pub async fn create_community(
    state: web::Data<AppState>,
    _auth_user: AuthUser,
    body: web::Json<CreateCommunityRequest>,
) -> ApiResult {
    created(state.communities.create_community(body.into_inner())?)
}

pub async fn get_community(
    state: web::Data<AppState>,
    _auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    ok(state.communities.get_community(&path.into_inner())?)
}

pub async fn join_community(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    state.communities.join_community(&path.into_inner(), &auth_user.user_id)?;
    Ok(HttpResponse::NoContent().finish())
}

// ==================== Route Configuration ====================

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health check
        .route("/health", web::get().to(health))

        // Profile & directory
        .route("/api/me/profile", web::put().to(upsert_profile))
        .route("/api/users", web::get().to(fetch_users))
        .route("/api/users/{id}", web::get().to(get_user))

        // Follow graph
        .route("/api/users/{id}/follow", web::post().to(follow))
        .route("/api/users/{id}/follow", web::delete().to(unfollow))
        .route("/api/users/{id}/follow", web::get().to(follow_state))
        .route("/api/users/{id}/followers", web::get().to(get_followers))
        .route("/api/users/{id}/following", web::get().to(get_following))
        .route("/api/users/{id}/follower-ids", web::get().to(get_follower_ids))

        // Threads & likes
        .route("/api/users/{id}/threads", web::get().to(fetch_user_posts))
        .route("/api/users/{id}/total-likes", web::get().to(total_likes))
        .route("/api/threads", web::get().to(fetch_posts))
        .route("/api/threads", web::post().to(create_thread))
        .route("/api/threads/{id}", web::get().to(get_thread))
        .route("/api/threads/{id}/replies", web::post().to(add_reply))
        .route("/api/threads/{id}/like", web::post().to(like_thread))
        .route("/api/threads/{id}/like", web::delete().to(unlike_thread))

        // Activity
        .route("/api/activity", web::get().to(get_activity))
        .route("/api/activity/page", web::get().to(get_activity_page))
        .route("/api/activity/viewed", web::post().to(mark_activity_viewed))
        .route("/api/activity/unviewed-count", web::get().to(unviewed_count))

        // Communities
        .route("/api/communities", web::post().to(create_community))
        .route("/api/communities/{id}", web::get().to(get_community))
        .route("/api/communities/{id}/join", web::post().to(join_community));
}
