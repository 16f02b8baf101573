//! WebSocket carrier for room push events.

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::messages::PushEvent;
use crate::server::{PushStream, ServerError};

/// Subscribes to a realtime endpoint that sends one JSON [`PushEvent`] per
/// text frame.
pub struct WsPushChannel;

impl WsPushChannel {
    /// Connect to `endpoint?channel=<room_id>` and forward that room's
    /// events. The returned stream ends when the socket closes.
    pub async fn connect(endpoint: &str, room_id: &str) -> Result<PushStream, ServerError> {
        let mut url = Url::parse(endpoint).map_err(|e| ServerError::Transport(e.to_string()))?;
        url.query_pairs_mut().append_pair("channel", room_id);

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ServerError::Transport(e.to_string()))?;
        info!("Push channel open for room {}", room_id);

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let room_id = room_id.to_string();

        tokio::spawn(async move {
            loop {
                let result = tokio::select! {
                    () = tx.closed() => break,
                    next = ws_rx.next() => match next {
                        Some(result) => result,
                        None => break,
                    },
                };

                match result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<PushEvent>(&text) {
                        Ok(event) if event.room_id() == room_id => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Ok(event) => debug!("Ignoring event for room {}", event.room_id()),
                        Err(e) => debug!("Ignoring unrecognised push frame: {}", e),
                    },
                    Ok(Message::Ping(payload)) => {
                        if let Err(e) = ws_tx.send(Message::Pong(payload)).await {
                            warn!("Failed to answer ping: {}", e);
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Push channel error: {}", e);
                        break;
                    }
                }
            }
            info!("Push channel closed for room {}", room_id);
        });

        Ok(rx)
    }
}
