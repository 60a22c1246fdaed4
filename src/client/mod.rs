pub mod cache;
pub mod config;
pub mod conversation;
pub mod friends;
pub mod models;
pub mod notify;
pub mod services;
pub mod session;
pub mod sync;
