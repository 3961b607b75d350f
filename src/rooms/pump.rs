use std::{fmt::Display, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::ws::{close_code, CloseFrame, Message as WsMessage, WebSocket},
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::{
    sync::mpsc,
    time::{interval_at, timeout, Instant, Interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::ConnectionConfig;

use super::{
    hub::HubHandle,
    msg::{Message, User},
};

/// Runs both halves of one registered connection and returns once the
/// reader has finished and the writer has closed the socket.
pub async fn serve(
    socket: WebSocket,
    user: User,
    outbound: mpsc::Receiver<Arc<Message>>,
    hub: HubHandle,
    config: ConnectionConfig,
) {
    let span = tracing::info_span!(
        "conn",
        room_id = %user.room_id,
        user_id = %user.id,
        conn_id = %user.conn_id,
    );

    async move {
        info!("connected");
        let (sink, stream) = socket.split();
        let writer_done = CancellationToken::new();

        let writer = tokio::spawn(
            write_pump(sink, outbound, config.clone(), writer_done.clone())
                .instrument(tracing::Span::current()),
        );
        read_pump(stream, &user, &hub, &config, writer_done).await;

        if let Err(err) = writer.await {
            error!(%err, "writer task failed");
        }
        info!("disconnected");
    }
    .instrument(span)
    .await
}

/// Drains `outbound` onto the socket. The only place a connection's
/// transport gets closed.
pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Arc<Message>>,
    config: ConnectionConfig,
    done: CancellationToken,
) where
    S: Sink<WsMessage> + Unpin,
    S::Error: Display,
{
    let _done = done.drop_guard();
    let write_timeout = config.write_timeout();
    let mut ping = config
        .ping_interval()
        .map(|period| interval_at(Instant::now() + period, period));

    loop {
        let frame = tokio::select! {
            next = outbound.recv() => match next {
                Some(message) => match serde_json::to_string(&*message) {
                    Ok(json) => WsMessage::Text(json.into()),
                    Err(err) => {
                        error!(%err, "failed to serialize message");
                        continue;
                    }
                },
                None => break,
            },
            _ = tick(&mut ping) => WsMessage::Ping(Bytes::new()),
        };

        if let Err(fault) = send_frame(&mut sink, frame, write_timeout).await {
            warn!(%fault, "writer stopping");
            return;
        }
    }

    debug!("outbound channel closed, closing socket");
    let close = WsMessage::Close(Some(CloseFrame {
        code: close_code::NORMAL,
        reason: "".into(),
    }));
    // the peer may have closed first, in which case this is expected to fail
    match send_frame(&mut sink, close, write_timeout).await {
        Ok(()) => {
            let _ = timeout(write_timeout, sink.close()).await;
        }
        Err(fault) => debug!(%fault, "close frame not sent"),
    }
}

#[derive(Debug, thiserror::Error)]
enum WriteFault {
    #[error("transport fault on write: {0}")]
    Transport(String),
    #[error("write timed out after {0:?}")]
    TimedOut(Duration),
}

async fn send_frame<S>(sink: &mut S, frame: WsMessage, write_timeout: Duration) -> Result<(), WriteFault>
where
    S: Sink<WsMessage> + Unpin,
    S::Error: Display,
{
    match timeout(write_timeout, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(WriteFault::Transport(err.to_string())),
        Err(_) => Err(WriteFault::TimedOut(write_timeout)),
    }
}

async fn tick(ping: &mut Option<Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Feeds frames from the socket into the hub until the peer goes away,
/// the idle deadline passes, or the writer finishes. Always ends with an
/// unregister; never closes the socket itself.
pub(crate) async fn read_pump<S>(
    mut stream: S,
    user: &User,
    hub: &HubHandle,
    config: &ConnectionConfig,
    writer_done: CancellationToken,
) where
    S: Stream<Item = Result<WsMessage, axum::Error>> + Unpin,
{
    let idle_timeout = config.idle_timeout();

    loop {
        let read = async {
            match idle_timeout {
                Some(idle) => timeout(idle, stream.next()).await.ok(),
                None => Some(stream.next().await),
            }
        };
        let next = tokio::select! {
            _ = writer_done.cancelled() => {
                debug!("writer finished");
                break;
            }
            next = read => next,
        };

        let content = match next {
            None => {
                info!(?idle_timeout, "idle deadline passed");
                break;
            }
            Some(None) => {
                debug!("stream ended");
                break;
            }
            Some(Some(Err(err))) => {
                warn!(%err, "transport fault on read");
                break;
            }
            Some(Some(Ok(frame))) => match frame {
                WsMessage::Text(text) => text.as_str().to_owned(),
                WsMessage::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => text,
                    Err(_) => {
                        warn!(len = bytes.len(), "dropping non-utf8 binary frame");
                        continue;
                    }
                },
                WsMessage::Close(frame) => {
                    if is_expected_close(frame.as_ref()) {
                        debug!(?frame, "peer closed");
                    } else {
                        warn!(?frame, "peer closed unexpectedly");
                    }
                    break;
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            },
        };

        if hub.broadcast(user.say(content)).await.is_err() {
            debug!("hub gone, stopping reader");
            break;
        }
    }

    if hub.unregister(user.clone()).await.is_err() {
        debug!("hub gone before unregister");
    }
}

fn is_expected_close(frame: Option<&CloseFrame>) -> bool {
    match frame {
        None => true,
        Some(frame) => matches!(
            frame.code,
            close_code::NORMAL | close_code::AWAY | close_code::ABNORMAL
        ),
    }
}
