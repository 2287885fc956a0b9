use actix_web::{test, web, App};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use std::sync::Arc;

use threadline::api::{self, AppState};
use threadline::auth::{AuthService, Claims};
use threadline::store::Store;

const SECRET: &str = "test_secret";

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

macro_rules! call_as {
    ($app:expr, $sub:expr, $req:expr) => {{
        let req = $req
            .insert_header(("Authorization", format!("Bearer {}", token_for($sub))))
            .to_request();
        let resp: serde_json::Value = test::call_and_read_body_json(&$app, req).await;
        resp
    }};
}

macro_rules! onboard {
    ($app:expr, $sub:expr, $username:expr, $name:expr) => {{
        let resp = call_as!(
            $app,
            $sub,
            test::TestRequest::put()
                .uri("/api/me/profile")
                .set_json(json!({ "username": $username, "name": $name }))
        );
        assert_eq!(resp["success"], true);
        resp
    }};
}

// ==================== Profile ====================

#[actix_web::test]
async fn test_profile_upsert_onboards_user() {
    let app = init_app!();
    let resp = onboard!(app, "a1", "Alice", "Alice Smith");
    assert_eq!(resp["data"]["username"], "alice");
    assert_eq!(resp["data"]["onboarded"], true);
    assert!(resp["data"]["last_viewed"].is_null());

    let resp = call_as!(app, "a1", test::TestRequest::get().uri("/api/users/a1"));
    assert_eq!(resp["data"]["name"], "Alice Smith");
}

#[actix_web::test]
async fn test_username_taken_is_rejected() {
    let app = init_app!();
    onboard!(app, "a1", "alice", "Alice");

    let req = test::TestRequest::put()
        .uri("/api/me/profile")
        .insert_header(("Authorization", format!("Bearer {}", token_for("b1"))))
        .set_json(json!({ "username": "ALICE", "name": "Impostor" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_unknown_user_is_not_found() {
    let app = init_app!();
    let req = test::TestRequest::get()
        .uri("/api/users/nobody")
        .insert_header(("Authorization", format!("Bearer {}", token_for("a1"))))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

// ==================== Directory Search ====================

#[actix_web::test]
async fn test_search_excludes_requester_and_matches_name() {
    let app = init_app!();
    onboard!(app, "a1", "alice", "Alice Smith");
    onboard!(app, "b1", "bob", "Bob Jones");
    onboard!(app, "c1", "carol", "Carol Smithers");

    let resp = call_as!(app, "a1", test::TestRequest::get().uri("/api/users?q=SMITH"));
    let users = resp["data"]["users"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["id"], "c1");
    assert_eq!(resp["data"]["has_next_page"], false);

    let resp = call_as!(app, "a1", test::TestRequest::get().uri("/api/users"));
    let ids: Vec<&str> = resp["data"]["users"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["id"].as_str().unwrap())
        .collect();
    // Newest first by default
    assert_eq!(ids, vec!["c1", "b1"]);
}

#[actix_web::test]
async fn test_search_pages_in_ascending_order() {
    let app = init_app!();
    for i in 0..5 {
        onboard!(app, &format!("u{}", i), format!("user{}", i), format!("User {}", i));
    }

    let resp = call_as!(app, "u4", test::TestRequest::get().uri("/api/users?page=1&page_size=3&sort=asc"));
    let ids: Vec<&str> = resp["data"]["users"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["u0", "u1", "u2"]);
    assert_eq!(resp["data"]["has_next_page"], true);

    let resp = call_as!(app, "u4", test::TestRequest::get().uri("/api/users?page=2&page_size=3&sort=asc"));
    assert_eq!(resp["data"]["users"].as_array().unwrap().len(), 1);
    assert_eq!(resp["data"]["has_next_page"], false);
}

#[actix_web::test]
async fn test_invalid_page_is_rejected() {
    let app = init_app!();
    onboard!(app, "a1", "alice", "Alice");

    let req = test::TestRequest::get()
        .uri("/api/users?page=0")
        .insert_header(("Authorization", format!("Bearer {}", token_for("a1"))))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}
