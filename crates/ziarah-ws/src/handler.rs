use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::time::Instant;
use uuid::Uuid;
use ziarah_core::auth::AuthenticatedAccount;
use ziarah_core::bus::Subscription;
use ziarah_core::error::CoreError;
use ziarah_core::AppState;
use ziarah_models::gateway::{
    ErrorFrame, CLOSE_INTERNAL_ERROR, CLOSE_NORMAL, ERR_INVALID_PAYLOAD, ERR_RATE_LIMITED,
    ERR_SEND_FAILED,
};
use ziarah_models::location::LocationPayload;
use ziarah_models::message::{ChatMessage, MessagePayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Chat,
    Tracking,
}

async fn send_error(
    sender: &mut (impl SinkExt<Message> + Unpin),
    code: &str,
    error: &str,
) -> Result<(), ()> {
    let frame = ErrorFrame::new(code, error).to_json();
    sender
        .send(Message::Text(frame.into()))
        .await
        .map_err(|_| ())
}

async fn send_close(sender: &mut (impl SinkExt<Message> + Unpin), code: u16, reason: &str) {
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}

/// Runs one authorized socket until either side goes away. Inbound frames,
/// bus deliveries, the read deadline and the ping ticker share a single task.
pub(crate) async fn handle_connection(
    socket: WebSocket,
    state: AppState,
    channel: Channel,
    group_id: Uuid,
    account: AuthenticatedAccount,
) {
    let account_id = account.account_id;
    let (mut sender, mut receiver) = socket.split();

    let mut subscription: Subscription = match channel {
        Channel::Chat => match state.bus.subscribe(group_id).await {
            Ok(subscription) => subscription,
            Err(err) => {
                tracing::error!(%group_id, %account_id, error = %err, "subscribe failed");
                send_close(&mut sender, CLOSE_INTERNAL_ERROR, "subscribe failed").await;
                return;
            }
        },
        // Location sockets only write.
        Channel::Tracking => futures_util::stream::pending().boxed(),
    };
    tracing::info!(%group_id, %account_id, ?channel, "socket connected");

    let rate_limiter = match channel {
        Channel::Chat => state.chat_limiter.clone(),
        Channel::Tracking => None,
    };
    let read_timeout = state.config.read_timeout;
    let ping_every = state.config.ping_interval;
    let mut ping_interval = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let read_deadline = tokio::time::sleep(read_timeout);
    tokio::pin!(read_deadline);
    let shutdown = state.shutdown.notified();
    tokio::pin!(shutdown);
    shutdown.as_mut().enable();

    let reason: String = loop {
        tokio::select! {
            msg = receiver.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(err)) => break format!("read error: {err}"),
                    None => break "client went away".to_string(),
                };
                read_deadline.as_mut().reset(Instant::now() + read_timeout);
                match msg {
                    Message::Text(text) => {
                        let allowed = rate_limiter.as_ref().map_or(Ok(()), |limiter| limiter.check(&account_id));
                        if let Err(retry_after_ms) = allowed {
                            tracing::debug!(%account_id, retry_after_ms, "rate limited");
                            if send_error(&mut sender, ERR_RATE_LIMITED, "slow down").await.is_err() {
                                break "write error".to_string();
                            }
                            continue;
                        }
                        let result = match channel {
                            Channel::Chat => handle_chat_frame(&state, group_id, account_id, text.as_str()).await,
                            Channel::Tracking => handle_location_frame(&state, group_id, account_id, text.as_str()).await,
                        };
                        if let Err((code, error)) = result {
                            if send_error(&mut sender, code, &error).await.is_err() {
                                break "write error".to_string();
                            }
                        }
                    }
                    Message::Binary(_) => {
                        if send_error(&mut sender, ERR_INVALID_PAYLOAD, "binary frames are not supported").await.is_err() {
                            break "write error".to_string();
                        }
                    }
                    Message::Ping(_) | Message::Pong(_) => {}
                    Message::Close(_) => break "client closed".to_string(),
                }
            }
            item = subscription.next() => {
                let Some(payload) = item else {
                    send_close(&mut sender, CLOSE_INTERNAL_ERROR, "broadcast closed").await;
                    break "broadcast stream ended".to_string();
                };
                if serde_json::from_str::<ChatMessage>(&payload).is_err() {
                    tracing::debug!(%group_id, "skipping malformed broadcast item");
                    continue;
                }
                if sender.send(Message::Text(payload.into())).await.is_err() {
                    break "write error".to_string();
                }
            }
            () = &mut read_deadline => {
                send_close(&mut sender, CLOSE_NORMAL, "read timeout").await;
                break format!("no frames for {}s", read_timeout.as_secs());
            }
            _ = ping_interval.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break "ping send error".to_string();
                }
            }
            _ = &mut shutdown => {
                send_close(&mut sender, CLOSE_NORMAL, "server shutting down").await;
                break "server shutdown".to_string();
            }
        }
    };

    drop(subscription);
    let _ = sender.close().await;
    tracing::info!(%group_id, %account_id, ?channel, %reason, "socket disconnected");
}

async fn handle_chat_frame(
    state: &AppState,
    group_id: Uuid,
    account_id: Uuid,
    text: &str,
) -> Result<(), (&'static str, String)> {
    let payload: MessagePayload = serde_json::from_str(text)
        .map_err(|err| (ERR_INVALID_PAYLOAD, format!("malformed chat payload: {err}")))?;
    match state.chat.send(group_id, account_id, &payload).await {
        Ok(_) => Ok(()),
        Err(CoreError::BadRequest(reason)) => Err((ERR_INVALID_PAYLOAD, reason)),
        Err(err) => {
            tracing::error!(%group_id, %account_id, error = %err, "chat send failed");
            Err((ERR_SEND_FAILED, "message could not be sent".to_string()))
        }
    }
}

async fn handle_location_frame(
    state: &AppState,
    group_id: Uuid,
    account_id: Uuid,
    text: &str,
) -> Result<(), (&'static str, String)> {
    let payload: LocationPayload = serde_json::from_str(text)
        .map_err(|err| (ERR_INVALID_PAYLOAD, format!("malformed location payload: {err}")))?;
    let timestamp = chrono::Utc::now().timestamp_millis();
    match state
        .tracking
        .update_location(group_id, account_id, payload.lat, payload.long, timestamp)
        .await
    {
        Ok(_) => Ok(()),
        Err(CoreError::BadRequest(reason)) => Err((ERR_INVALID_PAYLOAD, reason)),
        Err(err) => {
            tracing::warn!(%group_id, %account_id, error = %err, "location update failed");
            Err((ERR_SEND_FAILED, "location could not be stored".to_string()))
        }
    }
}
