//! Thin service adapters built on [`Session`]'s send/wait/on capability.
//!
//! These demonstrate the orchestrator's contract rather than extend it —
//! nothing here touches `Session`'s internals.

use std::time::Duration;

use steamcm_proto::message_id;

use crate::error::Error;
use crate::session::Session;

/// Send one `ClientHeartBeat` immediately, then one every `interval` until
/// the session disconnects. Mirrors a connection's keepalive loop.
pub async fn run_heartbeat(session: Session, interval: Duration) {
    loop {
        if !session.connected().await {
            tracing::debug!("heartbeat loop exiting, session disconnected");
            return;
        }
        if let Err(e) = session.send_protobuf(message_id::CLIENT_HEART_BEAT, &[], None).await {
            tracing::warn!(error = %e, "heartbeat send failed");
            return;
        }
        tokio::time::sleep(interval).await;
    }
}

/// Send `body` on `message_id` and await the matching response on
/// `response_message_id`, or time out.
pub async fn request_response(
    session: &Session,
    message_id: u32,
    body: &[u8],
    response_message_id: u32,
    timeout: Duration,
) -> Result<steamcm_proto::Packet, Error> {
    session.send_protobuf(message_id, body, None).await?;
    session.wait_for(response_message_id, timeout, None).await
}

/// Send a `ClientLogonResponse`-expecting logon request and await the
/// response, recording `steam_id` on the session once it arrives in the
/// response header.
pub async fn log_on(session: &Session, logon_body: &[u8], timeout: Duration) -> Result<steamcm_proto::Packet, Error> {
    let response = request_response(
        session,
        message_id::CLIENT_LOGON,
        logon_body,
        message_id::CLIENT_LOG_ON_RESPONSE,
        timeout,
    )
    .await?;

    if let steamcm_proto::Header::Protobuf(header) = &response.header {
        if let Some(steam_id) = header.steam_id() {
            session.set_steam_id(steam_id).await;
        }
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn heartbeat_exits_immediately_on_a_disconnected_session() {
        let session = Session::new(Config::default());
        run_heartbeat(session.clone(), Duration::from_secs(60)).await;
        assert!(!session.connected().await);
    }

    #[tokio::test]
    async fn request_response_fails_fast_when_not_connected() {
        let session = Session::new(Config::default());
        let result = request_response(&session, 1, &[], 2, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }
}
