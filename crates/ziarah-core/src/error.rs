use thiserror::Error;

use crate::bus::BusError;
use crate::presence::PresenceError;
use crate::queue::QueueError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("database error: {0}")]
    Database(#[from] ziarah_db::DbError),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("broadcast error: {0}")]
    Bus(#[from] BusError),
    #[error("presence error: {0}")]
    Presence(#[from] PresenceError),
    #[error("internal error: {0}")]
    Internal(String),
}
