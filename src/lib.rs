// Library entry point for threadline
// Exposes modules for testing

pub mod activity;
pub mod api;
pub mod auth;
pub mod communities;
pub mod config;
pub mod error;
pub mod graph;
pub mod models;
pub mod store;
pub mod threads;
pub mod users;
