//! Session dispatch driven through a real worker pool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cubeview::cache::{Plane, TileKey, TileLayout};
use cubeview::executor::{TaskQueue, WorkerPool};
use cubeview::loader::{ImageRegistry, ImageShape, MemoryCube};
use cubeview::protocol::{
    AnimationFlowControl, InboundMessage, MomentRequest, OpenFile, OutboundEvent, SetCursor,
    SetImageChannels, StartAnimation, TileCompression,
};
use cubeview::session::{OutboundReceiver, Session, SessionSettings};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    session: Arc<Session>,
    registry: Arc<ImageRegistry>,
    events: OutboundReceiver,
    _workers: WorkerPool,
}

fn value_at(x: usize, y: usize, z: usize, s: usize) -> f32 {
    (x + y * 100 + z * 10_000 + s * 100_000) as f32
}

fn harness(shape: ImageShape, settings: SessionSettings) -> Harness {
    let registry = Arc::new(ImageRegistry::new());
    registry.register("cube", Arc::new(MemoryCube::from_fn(shape, value_at)));

    let queue = TaskQueue::new();
    let workers = WorkerPool::start(queue.clone(), 3).unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let session = Session::new(1, Arc::clone(&registry), settings, queue, tx);

    Harness {
        session,
        registry,
        events: rx,
        _workers: workers,
    }
}

fn small_tiles() -> SessionSettings {
    SessionSettings {
        layout: TileLayout::new(16),
        ..SessionSettings::default()
    }
}

impl Harness {
    fn open(&mut self, file_id: i32) {
        self.session.handle(
            1,
            InboundMessage::OpenFile(OpenFile {
                file_id,
                name: "cube".to_string(),
            }),
        );
        match self.next_event() {
            OutboundEvent::OpenFileAck { success: true, .. } => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }

    fn next_event(&mut self) -> OutboundEvent {
        let deadline = Instant::now() + WAIT;
        loop {
            if let Ok((_, event)) = self.events.try_recv() {
                return event;
            }
            assert!(Instant::now() < deadline, "timed out waiting for an event");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    /// Collect events until `done` returns true for one of them.
    fn collect_until(&mut self, mut done: impl FnMut(&OutboundEvent) -> bool) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        loop {
            let event = self.next_event();
            let stop = done(&event);
            events.push(event);
            if stop {
                return events;
            }
        }
    }

    fn drain_for(&mut self, period: Duration) -> Vec<OutboundEvent> {
        std::thread::sleep(period);
        let mut events = Vec::new();
        while let Ok((_, event)) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn is_end_sync(event: &OutboundEvent) -> bool {
    matches!(event, OutboundEvent::RasterTileSync { end_sync: true, .. })
}

fn end_sync_planes(events: &[OutboundEvent]) -> Vec<i32> {
    events
        .iter()
        .filter_map(|event| match event {
            OutboundEvent::RasterTileSync {
                plane,
                end_sync: true,
                ..
            } => Some(plane.z),
            _ => None,
        })
        .collect()
}

#[test]
fn test_open_file_ack_reports_shape() {
    let mut h = harness(ImageShape::new(64, 48, 3, 1), small_tiles());
    h.session.handle(
        7,
        InboundMessage::OpenFile(OpenFile {
            file_id: 0,
            name: "cube".to_string(),
        }),
    );

    match h.next_event() {
        OutboundEvent::OpenFileAck {
            file_id,
            success,
            shape,
            ..
        } => {
            assert_eq!(file_id, 0);
            assert!(success);
            assert_eq!(shape, Some(ImageShape::new(64, 48, 3, 1)));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // (4 + 3) tiles around the edge, twice
    let frame = h.session.frame(0).unwrap();
    assert_eq!(frame.cache().capacity(), 14);
}

#[test]
fn test_open_unknown_image_fails() {
    let mut h = harness(ImageShape::new(16, 16, 1, 1), small_tiles());
    h.session.handle(
        1,
        InboundMessage::OpenFile(OpenFile {
            file_id: 0,
            name: "missing".to_string(),
        }),
    );

    match h.next_event() {
        OutboundEvent::OpenFileAck {
            success, message, ..
        } => {
            assert!(!success);
            assert!(message.contains("missing"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(h.session.frame(0).is_none());
}

#[test]
fn test_set_channels_streams_tiles_of_new_plane() {
    let mut h = harness(ImageShape::new(64, 64, 4, 1), small_tiles());
    h.open(0);

    let tiles = vec![TileKey::new(0, 0), TileKey::new(16, 0), TileKey::new(48, 48)];
    h.session.handle(
        2,
        InboundMessage::SetImageChannels(SetImageChannels {
            file_id: 0,
            plane: Plane::new(2, 0),
            required_tiles: tiles.clone(),
        }),
    );

    let events = h.collect_until(is_end_sync);
    assert!(matches!(
        events[0],
        OutboundEvent::RasterTileSync {
            end_sync: false,
            ..
        }
    ));

    let sent: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            OutboundEvent::RasterTileData(tile) => Some(tile.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(sent.len(), 3);
    for (tile, key) in sent.iter().zip(&tiles) {
        assert_eq!(tile.key, *key);
        assert_eq!(tile.plane, Plane::new(2, 0));
        assert_eq!((tile.width, tile.height), (16, 16));
        assert_eq!(tile.compression(), TileCompression::Lz4);
        let values = tile.values().unwrap();
        assert_eq!(values[0], value_at(key.x as usize, key.y as usize, 2, 0));
        assert_eq!(values[255], value_at(key.x as usize + 15, key.y as usize + 15, 2, 0));
    }
    assert_eq!(h.session.frame(0).unwrap().plane(), Plane::new(2, 0));
}

#[test]
fn test_request_for_unopened_file_reports_error() {
    let mut h = harness(ImageShape::new(16, 16, 2, 1), small_tiles());
    h.session.handle(
        3,
        InboundMessage::SetImageChannels(SetImageChannels {
            file_id: 9,
            plane: Plane::new(1, 0),
            required_tiles: vec![TileKey::new(0, 0)],
        }),
    );

    match h.next_event() {
        OutboundEvent::ErrorData { message, .. } => assert!(message.contains('9')),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn test_bad_plane_reports_error_and_keeps_plane() {
    let mut h = harness(ImageShape::new(16, 16, 2, 1), small_tiles());
    h.open(0);
    h.session.handle(
        3,
        InboundMessage::SetImageChannels(SetImageChannels {
            file_id: 0,
            plane: Plane::new(5, 0),
            required_tiles: Vec::new(),
        }),
    );

    assert!(matches!(h.next_event(), OutboundEvent::ErrorData { .. }));
    assert_eq!(h.session.frame(0).unwrap().plane(), Plane::default());
}

#[test]
fn test_cursor_value() {
    let mut h = harness(ImageShape::new(40, 40, 1, 1), small_tiles());
    h.open(0);

    h.session.handle(
        4,
        InboundMessage::SetCursor(SetCursor {
            file_id: 0,
            x: 37,
            y: 21,
        }),
    );

    match h.next_event() {
        OutboundEvent::CursorValue { x, y, value, .. } => {
            assert_eq!((x, y), (37, 21));
            assert_eq!(value, value_at(37, 21, 0, 0));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn test_cursor_outside_image_is_nan() {
    let mut h = harness(ImageShape::new(16, 16, 1, 1), small_tiles());
    h.open(0);

    h.session.handle(
        4,
        InboundMessage::SetCursor(SetCursor {
            file_id: 0,
            x: 100,
            y: 3,
        }),
    );

    match h.next_event() {
        OutboundEvent::CursorValue { value, .. } => assert!(value.is_nan()),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn test_animation_plays_every_frame_once() {
    let mut h = harness(ImageShape::new(32, 32, 5, 1), small_tiles());
    h.open(0);

    h.session.handle(
        5,
        InboundMessage::StartAnimation(StartAnimation {
            file_id: 0,
            first: Plane::new(0, 0),
            last: Plane::new(4, 0),
            start: Plane::new(0, 0),
            delta: Plane::new(1, 0),
            frame_rate: 30,
            looping: false,
            reverse_at_end: false,
            required_tiles: vec![TileKey::new(0, 0)],
        }),
    );

    let mut planes = Vec::new();
    while planes.len() < 5 {
        let events = h.collect_until(is_end_sync);
        planes.extend(end_sync_planes(&events));
    }
    assert_eq!(planes, vec![0, 1, 2, 3, 4]);

    // Non-looping run ends after the last channel.
    let rest = h.drain_for(Duration::from_millis(200));
    assert!(end_sync_planes(&rest).is_empty());
}

#[test]
fn test_animation_waits_for_flow_control() {
    let settings = SessionSettings {
        waits_per_second: 10,
        ..small_tiles()
    };
    let mut h = harness(ImageShape::new(16, 16, 10, 1), settings);
    h.open(0);

    // 20 fps with 10 acknowledgements per second gives a window of 2.
    h.session.handle(
        5,
        InboundMessage::StartAnimation(StartAnimation {
            file_id: 0,
            first: Plane::new(0, 0),
            last: Plane::new(9, 0),
            start: Plane::new(0, 0),
            delta: Plane::new(1, 0),
            frame_rate: 20,
            looping: false,
            reverse_at_end: false,
            required_tiles: vec![TileKey::new(0, 0)],
        }),
    );

    let mut planes = Vec::new();
    while planes.len() < 4 {
        let events = h.collect_until(is_end_sync);
        planes.extend(end_sync_planes(&events));
    }
    assert_eq!(planes, vec![0, 1, 2, 3]);

    let deadline = Instant::now() + WAIT;
    while !h.session.animation().is_waiting() {
        assert!(Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(h.session.animation().flow_window(), Some(2));
    assert!(end_sync_planes(&h.drain_for(Duration::from_millis(200))).is_empty());

    h.session.handle(
        6,
        InboundMessage::AnimationFlowControl(AnimationFlowControl {
            file_id: 0,
            received_frame: Plane::new(2, 0),
        }),
    );

    let mut resumed = Vec::new();
    while resumed.len() < 2 {
        let events = h.collect_until(is_end_sync);
        resumed.extend(end_sync_planes(&events));
    }
    assert_eq!(resumed, vec![4, 5]);
}

#[test]
fn test_slow_animation_sleeps_between_frames() {
    let mut h = harness(ImageShape::new(16, 16, 4, 1), small_tiles());
    h.open(0);

    h.session.handle(
        5,
        InboundMessage::StartAnimation(StartAnimation {
            file_id: 0,
            first: Plane::new(0, 0),
            last: Plane::new(3, 0),
            start: Plane::new(0, 0),
            delta: Plane::new(1, 0),
            frame_rate: 1,
            looping: true,
            reverse_at_end: false,
            required_tiles: vec![TileKey::new(0, 0)],
        }),
    );

    let events = h.drain_for(Duration::from_millis(1500));
    assert_eq!(end_sync_planes(&events), vec![0, 1]);

    // One check per frame plus one per 100 ms of waiting; a spinning
    // worker would poll thousands of times.
    let polls = h.session.animation().polls();
    assert!(polls < 40, "animation polled {polls} times in 1.5 s");

    // Workers stay free for other requests while the animation waits.
    h.session.handle(
        6,
        InboundMessage::SetCursor(SetCursor {
            file_id: 0,
            x: 1,
            y: 1,
        }),
    );
    match h.next_event() {
        OutboundEvent::CursorValue { .. } => {}
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn test_stop_animation() {
    let mut h = harness(ImageShape::new(16, 16, 50, 1), small_tiles());
    h.open(0);

    h.session.handle(
        5,
        InboundMessage::StartAnimation(StartAnimation {
            file_id: 0,
            first: Plane::new(0, 0),
            last: Plane::new(49, 0),
            start: Plane::new(0, 0),
            delta: Plane::new(1, 0),
            frame_rate: 10,
            looping: true,
            reverse_at_end: false,
            required_tiles: Vec::new(),
        }),
    );
    h.collect_until(is_end_sync);

    h.session.handle(
        6,
        InboundMessage::StopAnimation(cubeview::protocol::StopAnimation {
            file_id: 0,
            end_frame: Plane::new(0, 0),
        }),
    );
    // A frame already in flight may still finish.
    h.drain_for(Duration::from_millis(150));
    assert!(end_sync_planes(&h.drain_for(Duration::from_millis(300))).is_empty());
}

#[test]
fn test_moment_registers_mean_image() {
    let mut h = harness(ImageShape::new(20, 20, 4, 1), small_tiles());
    h.open(0);

    h.session.handle(
        8,
        InboundMessage::MomentRequest(MomentRequest {
            file_id: 0,
            first_channel: 0,
            last_channel: 3,
            stokes: 0,
        }),
    );

    let events = h.collect_until(|event| matches!(event, OutboundEvent::MomentResponse { .. }));
    let progress: Vec<f32> = events
        .iter()
        .filter_map(|event| match event {
            OutboundEvent::MomentProgress { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![0.25, 0.5, 0.75, 1.0]);

    match events.last() {
        Some(OutboundEvent::MomentResponse {
            success,
            cancelled,
            output_name,
            ..
        }) => {
            assert!(*success);
            assert!(!*cancelled);
            assert_eq!(output_name, "cube.mean");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let mean = h.registry.get("cube.mean").unwrap();
    assert_eq!(mean.shape(), ImageShape::new(20, 20, 1, 1));
    assert!(!h.session.is_calculating(0));
}

#[test]
fn test_close_file_drops_frame() {
    let mut h = harness(ImageShape::new(16, 16, 1, 1), small_tiles());
    h.open(0);
    h.open(1);
    assert_eq!(h.session.file_ids(), vec![0, 1]);

    h.session.handle(9, InboundMessage::CloseFile { file_id: 0 });
    assert_eq!(h.session.file_ids(), vec![1]);

    h.session.handle(9, InboundMessage::CloseFile { file_id: -1 });
    assert!(h.session.file_ids().is_empty());
}

#[test]
fn test_malformed_frame_reports_error() {
    let mut h = harness(ImageShape::new(16, 16, 1, 1), small_tiles());

    h.session.on_message(bytes::Bytes::from_static(&[1, 0, 1]));
    assert!(matches!(h.next_event(), OutboundEvent::ErrorData { .. }));

    let mut frame = InboundMessage::CloseFile { file_id: 0 }.encode(3).to_vec();
    frame.extend_from_slice(&[0xff; 3]);
    h.session.on_message(frame.into());
    match h.next_event() {
        OutboundEvent::ErrorData { event_type, .. } => assert_eq!(event_type, 2),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn test_closed_session_ignores_requests() {
    let mut h = harness(ImageShape::new(16, 16, 1, 1), small_tiles());
    h.open(0);
    h.session.close();

    assert!(h.session.is_closed());
    assert!(h.session.file_ids().is_empty());
    h.session.handle(
        4,
        InboundMessage::SetCursor(SetCursor {
            file_id: 0,
            x: 1,
            y: 1,
        }),
    );
    assert!(h.drain_for(Duration::from_millis(50)).is_empty());
}
