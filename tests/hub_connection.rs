// SignalR hub connection against a local websocket fixture

mod common;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use salesrace::session::{ChannelSignal, HubConfig, HubConnection, PushChannel, SALE_COMPLETED};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    WebSocketStream, accept_async, accept_hdr_async,
    tungstenite::{
        Message,
        handshake::server::{ErrorResponse, Request, Response},
    },
};

const SIGNAL_TIMEOUT: Duration = Duration::from_secs(5);

async fn next_signal(hub: &mut HubConnection) -> ChannelSignal {
    tokio::time::timeout(SIGNAL_TIMEOUT, hub.next_signal())
        .await
        .expect("hub signal within timeout")
}

async fn answer_handshake(mut socket: WebSocketStream<TcpStream>) -> WebSocketStream<TcpStream> {
    let request = socket.next().await.unwrap().unwrap();
    let request = request.to_text().unwrap();
    assert!(request.contains(r#""protocol":"json""#));
    assert!(request.ends_with('\u{1e}'));
    socket
        .send(Message::Text("{}\u{1e}".to_string().into()))
        .await
        .unwrap();
    socket
}

async fn accept_hub(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    answer_handshake(accept_async(stream).await.unwrap()).await
}

fn record(json: &str) -> Message {
    Message::Text(format!("{json}\u{1e}").into())
}

fn direct_config(listener: &TcpListener) -> HubConfig {
    let url = format!("http://{}/api/salesHub", listener.local_addr().unwrap());
    HubConfig::new(&url)
        .unwrap()
        .with_skip_negotiation(true)
        .with_reconnect_delays(vec![Duration::ZERO])
}

#[tokio::test]
async fn test_invocations_and_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = direct_config(&listener);
    let server = tokio::spawn(async move {
        let mut socket = accept_hub(&listener).await;
        socket
            .send(record(
                r#"{"type":1,"target":"SaleCompleted","arguments":[{"personId":1,"amount":15000}]}"#,
            ))
            .await
            .unwrap();
        // drop the transport without a close handshake
        drop(socket);

        accept_hub(&listener).await
    });

    let mut hub = HubConnection::new(config, common::client());
    hub.start();

    assert_eq!(
        next_signal(&mut hub).await,
        ChannelSignal::Opened {
            connection_id: None
        }
    );
    match next_signal(&mut hub).await {
        ChannelSignal::Invocation { target, arguments } => {
            assert_eq!(target, SALE_COMPLETED);
            assert_eq!(arguments[0]["personId"], 1);
            assert_eq!(arguments[0]["amount"], 15000);
        }
        other => panic!("Expected an invocation, got {:?}", other),
    }
    assert!(matches!(
        next_signal(&mut hub).await,
        ChannelSignal::Dropped { .. }
    ));
    assert_eq!(
        next_signal(&mut hub).await,
        ChannelSignal::Restored {
            connection_id: None
        }
    );

    let _second_socket = server.await.unwrap();
    hub.stop().await;
    let after_stop = tokio::time::timeout(Duration::from_millis(100), hub.next_signal()).await;
    assert!(after_stop.is_err());
}

#[tokio::test]
async fn test_close_without_reconnect_gives_up() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = direct_config(&listener);
    let server = tokio::spawn(async move {
        let mut socket = accept_hub(&listener).await;
        socket
            .send(record(r#"{"type":7,"error":"hub shutting down","allowReconnect":false}"#))
            .await
            .unwrap();
        socket
    });

    let mut hub = HubConnection::new(config, common::client());
    hub.start();

    assert!(matches!(
        next_signal(&mut hub).await,
        ChannelSignal::Opened { .. }
    ));
    assert_eq!(
        next_signal(&mut hub).await,
        ChannelSignal::Dropped {
            reason: Some("hub shutting down".to_string())
        }
    );
    assert_eq!(
        next_signal(&mut hub).await,
        ChannelSignal::GaveUp {
            reason: Some("hub shutting down".to_string())
        }
    );

    let _socket = server.await.unwrap();
    hub.stop().await;
}

#[tokio::test]
async fn test_unreachable_hub_fails_to_open() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = direct_config(&listener);
    drop(listener);

    let mut hub = HubConnection::new(config, common::client());
    hub.start();

    assert!(matches!(
        next_signal(&mut hub).await,
        ChannelSignal::OpenFailed { .. }
    ));
    hub.stop().await;
}

#[tokio::test]
async fn test_negotiated_connection_uses_token() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let hub_url = format!("http://{}/api/salesHub", listener.local_addr().unwrap());
    let websocket_uri = Arc::new(Mutex::new(String::new()));
    let captured_uri = websocket_uri.clone();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let negotiate = common::read_request(&mut stream).await;
        common::write_response(
            &mut stream,
            200,
            r#"{"connectionId":"conn-1","connectionToken":"token-1","negotiateVersion":1,"availableTransports":[{"transport":"WebSockets","transferFormats":["Text"]}]}"#,
        )
        .await;

        let (stream, _) = listener.accept().await.unwrap();
        let capture = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            *captured_uri.lock().unwrap() = request.uri().to_string();
            Ok(response)
        };
        let socket = accept_hdr_async(stream, capture).await.unwrap();
        (negotiate, answer_handshake(socket).await)
    });

    let mut hub = HubConnection::new(HubConfig::new(&hub_url).unwrap(), common::client());
    hub.start();

    assert_eq!(
        next_signal(&mut hub).await,
        ChannelSignal::Opened {
            connection_id: Some("conn-1".to_string())
        }
    );
    let (negotiate, _socket) = server.await.unwrap();
    assert!(
        negotiate
            .request_line()
            .starts_with("POST /api/salesHub/negotiate?negotiateVersion=1 ")
    );
    assert_eq!(*websocket_uri.lock().unwrap(), "/api/salesHub?id=token-1");

    hub.stop().await;
}

#[tokio::test]
async fn test_negotiation_error_fails_to_open() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let hub_url = format!("http://{}/api/salesHub", listener.local_addr().unwrap());
    let server = tokio::spawn(common::serve_once(
        listener,
        200,
        r#"{"error":"Negotiate failed"}"#,
    ));

    let mut hub = HubConnection::new(HubConfig::new(&hub_url).unwrap(), common::client());
    hub.start();

    match next_signal(&mut hub).await {
        ChannelSignal::OpenFailed { reason } => assert!(reason.contains("Negotiate failed")),
        other => panic!("Expected an open failure, got {:?}", other),
    }
    server.await.unwrap();
    hub.stop().await;
}
