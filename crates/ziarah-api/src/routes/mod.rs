pub mod auth;
pub mod chat;
pub mod tracking;
pub mod users;
