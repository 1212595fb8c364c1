pub mod analytics;
pub mod api;
pub mod config;
pub mod events;
pub mod links;
pub mod models;
pub mod redirect;
pub mod slug;
pub mod storage;
