//! End-to-end requests over TCP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use cubeview::cache::{Plane, TileKey, TileLayout};
use cubeview::executor::{TaskQueue, WorkerPool};
use cubeview::loader::{ImageRegistry, ImageShape, MemoryCube};
use cubeview::protocol::{
    decode_event, EventType, InboundMessage, OpenFile, OutboundEvent, SetCursor, SetImageChannels,
};
use cubeview::server::{frame_codec, Server};
use cubeview::session::{SessionManager, SessionSettings};

struct Running {
    addr: SocketAddr,
    sessions: Arc<SessionManager>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    _workers: WorkerPool,
}

async fn start_server() -> Running {
    let registry = Arc::new(ImageRegistry::new());
    let shape = ImageShape::new(48, 48, 2, 1);
    registry.register(
        "cube",
        Arc::new(MemoryCube::from_fn(shape, |x, y, z, _| (x + y * 100 + z * 10_000) as f32)),
    );

    let queue = TaskQueue::new();
    let workers = WorkerPool::start(queue.clone(), 2).unwrap();
    let settings = SessionSettings {
        layout: TileLayout::new(16),
        ..SessionSettings::default()
    };
    let sessions = Arc::new(SessionManager::new(registry, settings, queue));

    let server = Server::bind("127.0.0.1:0", Arc::clone(&sessions))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let server = tokio::spawn(async move {
        server.run(token).await.unwrap();
    });

    Running {
        addr,
        sessions,
        shutdown,
        server,
        _workers: workers,
    }
}

async fn connect(addr: SocketAddr) -> Framed<TcpStream, LengthDelimitedCodec> {
    let stream = TcpStream::connect(addr).await.unwrap();
    Framed::new(stream, frame_codec())
}

async fn send(client: &mut Framed<TcpStream, LengthDelimitedCodec>, request_id: u32, message: InboundMessage) {
    client.send(message.encode(request_id)).await.unwrap();
}

async fn recv(client: &mut Framed<TcpStream, LengthDelimitedCodec>) -> (u32, OutboundEvent) {
    let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed")
        .unwrap();
    let (header, event) = decode_event(frame.freeze()).unwrap();
    (header.request_id, event)
}

async fn open(client: &mut Framed<TcpStream, LengthDelimitedCodec>, file_id: i32) {
    send(
        client,
        1,
        InboundMessage::OpenFile(OpenFile {
            file_id,
            name: "cube".to_string(),
        }),
    )
    .await;
    let (_, event) = recv(client).await;
    assert!(matches!(event, OutboundEvent::OpenFileAck { success: true, .. }));
}

#[tokio::test]
async fn test_open_file_over_tcp() {
    let running = start_server().await;
    let mut client = connect(running.addr).await;

    send(
        &mut client,
        42,
        InboundMessage::OpenFile(OpenFile {
            file_id: 3,
            name: "cube".to_string(),
        }),
    )
    .await;

    let (request_id, event) = recv(&mut client).await;
    assert_eq!(request_id, 42);
    assert_eq!(
        event,
        OutboundEvent::OpenFileAck {
            file_id: 3,
            success: true,
            message: String::new(),
            shape: Some(ImageShape::new(48, 48, 2, 1)),
        }
    );
    assert_eq!(running.sessions.len(), 1);

    running.shutdown.cancel();
    running.server.await.unwrap();
}

#[tokio::test]
async fn test_tiles_and_cursor_over_tcp() {
    let running = start_server().await;
    let mut client = connect(running.addr).await;
    open(&mut client, 0).await;

    send(
        &mut client,
        7,
        InboundMessage::SetImageChannels(SetImageChannels {
            file_id: 0,
            plane: Plane::new(1, 0),
            required_tiles: vec![TileKey::new(16, 32)],
        }),
    )
    .await;

    let mut tiles = Vec::new();
    loop {
        let (request_id, event) = recv(&mut client).await;
        assert_eq!(request_id, 7);
        match event {
            OutboundEvent::RasterTileData(tile) => tiles.push(tile),
            OutboundEvent::RasterTileSync { end_sync: true, .. } => break,
            OutboundEvent::RasterTileSync { end_sync: false, .. } => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(tiles.len(), 1);
    assert_eq!(tiles[0].plane, Plane::new(1, 0));
    let values = tiles[0].values().unwrap();
    assert_eq!(values.len(), 16 * 16);
    assert_eq!(values[0], (16 + 32 * 100 + 10_000) as f32);

    send(
        &mut client,
        8,
        InboundMessage::SetCursor(SetCursor {
            file_id: 0,
            x: 20,
            y: 40,
        }),
    )
    .await;
    let (_, event) = recv(&mut client).await;
    match event {
        OutboundEvent::CursorValue { plane, value, .. } => {
            assert_eq!(plane, Plane::new(1, 0));
            assert_eq!(value, (20 + 40 * 100 + 10_000) as f32);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    running.shutdown.cancel();
    running.server.await.unwrap();
}

#[tokio::test]
async fn test_unknown_event_gets_error_reply() {
    let running = start_server().await;
    let mut client = connect(running.addr).await;

    // Header for event type 999 with an empty payload.
    let mut frame = Vec::new();
    frame.extend_from_slice(&999u16.to_le_bytes());
    frame.extend_from_slice(&1u16.to_le_bytes());
    frame.extend_from_slice(&5u32.to_le_bytes());
    client.send(Bytes::from(frame)).await.unwrap();

    let (request_id, event) = recv(&mut client).await;
    assert_eq!(request_id, 5);
    assert_eq!(event.event_type(), EventType::ErrorData);
    match event {
        OutboundEvent::ErrorData { event_type, .. } => assert_eq!(event_type, 999),
        other => panic!("unexpected event: {other:?}"),
    }

    running.shutdown.cancel();
    running.server.await.unwrap();
}

#[tokio::test]
async fn test_disconnect_removes_session() {
    let running = start_server().await;
    let mut client = connect(running.addr).await;
    open(&mut client, 0).await;
    assert_eq!(running.sessions.len(), 1);

    drop(client);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !running.sessions.is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "session not removed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    running.shutdown.cancel();
    running.server.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_all_sessions() {
    let running = start_server().await;
    let mut first = connect(running.addr).await;
    let mut second = connect(running.addr).await;
    open(&mut first, 0).await;
    open(&mut second, 0).await;
    assert_eq!(running.sessions.len(), 2);

    running.shutdown.cancel();
    running.server.await.unwrap();
    assert!(running.sessions.is_empty());
}
