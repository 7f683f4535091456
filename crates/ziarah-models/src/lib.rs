pub mod gateway;
pub mod location;
pub mod message;
pub mod user;
