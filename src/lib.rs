//! Catalog client - authenticated, paginated access to a REST product catalog
//!
//! The [`auth`] module keeps one bearer credential valid under concurrent
//! use; [`api`] attaches it to requests and pages through search results.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
