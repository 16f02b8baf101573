use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::SinkExt;
use matchstick::push::WsPushChannel;
use matchstick::PushEvent;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// Accept one socket, record the requested URI, send `frames` and close.
async fn serve_frames(frames: Vec<String>) -> (String, Arc<Mutex<Option<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}/realtime", listener.local_addr().unwrap());
    let requested = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&requested);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let record = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            *seen.lock().unwrap() = Some(req.uri().to_string());
            Ok(resp)
        };
        let mut ws = accept_hdr_async(stream, record).await.unwrap();

        for frame in frames {
            ws.send(Message::text(frame)).await.unwrap();
        }
        ws.close(None).await.ok();
    });

    (endpoint, requested)
}

#[tokio::test]
async fn forwards_only_this_rooms_events() {
    let (endpoint, requested) = serve_frames(vec![
        r#"{"type":"message-arrived","roomId":"other"}"#.to_string(),
        "not json".to_string(),
        r#"{"type":"message-arrived","roomId":"r1"}"#.to_string(),
        r#"{"type":"room-destroyed","roomId":"r1"}"#.to_string(),
    ])
    .await;

    let mut events = WsPushChannel::connect(&endpoint, "r1").await.unwrap();

    let first = timeout(Duration::from_secs(5), events.recv()).await.unwrap();
    assert_eq!(first, Some(PushEvent::MessageArrived { room_id: "r1".into() }));
    let second = timeout(Duration::from_secs(5), events.recv()).await.unwrap();
    assert_eq!(second, Some(PushEvent::RoomDestroyed { room_id: "r1".into() }));
    let closed = timeout(Duration::from_secs(5), events.recv()).await.unwrap();
    assert_eq!(closed, None);

    let uri = requested.lock().unwrap().clone().unwrap();
    assert_eq!(uri, "/realtime?channel=r1");
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}/realtime", listener.local_addr().unwrap());
    drop(listener);

    let result = WsPushChannel::connect(&endpoint, "r1").await;
    assert!(matches!(result, Err(matchstick::ServerError::Transport(_))));
}

#[tokio::test]
async fn bad_endpoint_is_rejected() {
    let result = WsPushChannel::connect("not a url", "r1").await;
    assert!(matches!(result, Err(matchstick::ServerError::Transport(_))));
}
