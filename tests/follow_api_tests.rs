use actix_web::{test, web, App};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use std::sync::Arc;

use threadline::api::{self, AppState};
use threadline::auth::{AuthService, Claims};
use threadline::store::Store;

const SECRET: &str = "test_secret";

/// Mint a provider session token for the given subject
fn token_for(sub: &str) -> String {
    let now = Utc::now();
    let claims = Claims {
        sub: sub.to_string(),
        exp: (now + Duration::hours(1)).timestamp(),
        iat: now.timestamp(),
        iss: None,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

/// Helper macro to complete a user's profile so they exist in the directory
macro_rules! onboard {
    ($app:expr, $sub:expr, $username:expr) => {{
        let req = test::TestRequest::put()
            .uri("/api/me/profile")
            .insert_header(("Authorization", format!("Bearer {}", token_for($sub))))
            .set_json(json!({ "username": $username, "name": $username }))
            .to_request();
        let resp: serde_json::Value = test::call_and_read_body_json(&$app, req).await;
        assert_eq!(resp["success"], true);
    }};
}

macro_rules! init_app {
    () => {{
        let store = Arc::new(Store::new(":memory:").unwrap());
        let auth_service = Arc::new(AuthService::new(SECRET.to_string(), None));
        test::init_service(
            App::new()
                .app_data(web::Data::new(auth_service))
                .app_data(web::Data::new(AppState::new(store)))
                .configure(api::configure_routes),
        )
        .await
    }};
}

// ==================== Follow / Unfollow ====================

#[actix_web::test]
async fn test_follow_updates_both_sides() {
    let app = init_app!();
    onboard!(app, "a1", "alice");
    onboard!(app, "b1", "bob");

    let req = test::TestRequest::post()
        .uri("/api/users/b1/follow")
        .insert_header(("Authorization", format!("Bearer {}", token_for("a1"))))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 204);

    let req = test::TestRequest::get()
        .uri("/api/users/b1/followers")
        .insert_header(("Authorization", format!("Bearer {}", token_for("a1"))))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"]["count"], 1);
    assert_eq!(resp["data"]["users"][0]["id"], "a1");
    assert_eq!(resp["data"]["users"][0]["username"], "alice");

    let req = test::TestRequest::get()
        .uri("/api/users/a1/following")
        .insert_header(("Authorization", format!("Bearer {}", token_for("b1"))))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"]["count"], 1);
    assert_eq!(resp["data"]["users"][0]["id"], "b1");

    let req = test::TestRequest::get()
        .uri("/api/users/b1/follow")
        .insert_header(("Authorization", format!("Bearer {}", token_for("a1"))))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"]["following"], true);
}

#[actix_web::test]
async fn test_follow_twice_counts_once_and_unfollow_clears() {
    let app = init_app!();
    onboard!(app, "a1", "alice");
    onboard!(app, "b1", "bob");

    for _ in 0..2 {
        let req = test::TestRequest::post()
            .uri("/api/users/b1/follow")
            .insert_header(("Authorization", format!("Bearer {}", token_for("a1"))))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 204);
    }

    let req = test::TestRequest::get()
        .uri("/api/users/b1/follower-ids")
        .insert_header(("Authorization", format!("Bearer {}", token_for("b1"))))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"], json!(["a1"]));

    // Unfollow twice, the second call is a no-op
    for _ in 0..2 {
        let req = test::TestRequest::delete()
            .uri("/api/users/b1/follow")
            .insert_header(("Authorization", format!("Bearer {}", token_for("a1"))))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 204);
    }

    let req = test::TestRequest::get()
        .uri("/api/users/b1/followers")
        .insert_header(("Authorization", format!("Bearer {}", token_for("b1"))))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"]["count"], 0);
    assert_eq!(resp["data"]["users"], json!([]));
}

#[actix_web::test]
async fn test_self_follow_is_ignored() {
    let app = init_app!();
    onboard!(app, "a1", "alice");

    let req = test::TestRequest::post()
        .uri("/api/users/a1/follow")
        .insert_header(("Authorization", format!("Bearer {}", token_for("a1"))))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);

    let req = test::TestRequest::get()
        .uri("/api/users/a1/followers")
        .insert_header(("Authorization", format!("Bearer {}", token_for("a1"))))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"]["count"], 0);
}

#[actix_web::test]
async fn test_follow_unknown_user_is_not_found() {
    let app = init_app!();
    onboard!(app, "a1", "alice");

    let req = test::TestRequest::post()
        .uri("/api/users/ghost/follow")
        .insert_header(("Authorization", format!("Bearer {}", token_for("a1"))))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("ghost"));

    let req = test::TestRequest::get()
        .uri("/api/users/ghost/follower-ids")
        .insert_header(("Authorization", format!("Bearer {}", token_for("a1"))))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn test_requests_without_token_are_rejected() {
    let app = init_app!();

    let req = test::TestRequest::get().uri("/api/users/a1/followers").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::get()
        .uri("/api/users/a1/followers")
        .insert_header(("Authorization", "Bearer not-a-token"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["status"], "ok");
}
