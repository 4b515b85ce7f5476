//! Client sessions and event dispatch.
//!
//! A [`Session`] owns everything one client connection has opened: frames
//! (open images with their tile caches), pending cursor moves, channel
//! change slots, the animation and running calculations.
//!
//! [`Session::on_message`] runs on the connection's I/O task and never
//! touches image data. Cheap bookkeeping is handled inline; anything that
//! may read the image is wrapped in a task and queued on the worker pool.
//!
//! | Event | Handling |
//! |-------|----------|
//! | `OpenFile`, `CloseFile` | inline |
//! | `StopAnimation`, `AnimationFlowControl`, `StopMomentCalc` | inline |
//! | `SetImageChannels` | coalesced per file, then queued |
//! | `SetCursor` | latest per file, then queued |
//! | `AddRequiredTiles`, `StartAnimation`, `MomentRequest` | queued |

mod animation;
mod channel;
mod cursor;
mod frame;
mod manager;
mod moment;
mod tasks;

pub use animation::{
    AfterFrame, AnimationController, AnimationTicket, FrameStep, PlannedFrame,
    DEFAULT_WAITS_PER_SECOND,
};
pub use channel::{ChannelSlot, ChannelSlots};
pub use cursor::CursorSettings;
pub use frame::Frame;
pub use manager::SessionManager;
pub use moment::compute_mean;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{Plane, TileKey, TileLayout, MAX_TILE_CACHE_CAPACITY};
use crate::executor::TaskQueue;
use crate::loader::{ImageRegistry, ImageShape, LoaderError};
use crate::protocol::{
    self, AddRequiredTiles, InboundMessage, MomentRequest, OpenFile, OutboundEvent,
    ProtocolError, RasterTile, SetCursor, SetImageChannels, TileCompression,
};

use tasks::{
    AddRequiredTilesTask, AnimationTask, MomentTask, SetCursorTask, SetImageChannelsTask,
    StartAnimationTask,
};

/// Events leaving a session, tagged with the request id they answer.
pub type OutboundSender = mpsc::UnboundedSender<(u32, OutboundEvent)>;

/// Receiving end of a session's events.
pub type OutboundReceiver = mpsc::UnboundedReceiver<(u32, OutboundEvent)>;

/// Errors raised while serving a request.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("File {0} is not open")]
    FileNotOpen(i32),

    #[error("Image '{0}' is not registered")]
    ImageNotFound(String),

    #[error("Plane {plane} is outside image {shape}")]
    PlaneOutOfRange { plane: Plane, shape: ImageShape },

    #[error("Tile {0} is not on the tile grid")]
    UnalignedTile(TileKey),

    #[error("Tile {key} is outside image {shape}")]
    TileOutOfBounds { key: TileKey, shape: ImageShape },

    #[error("Cursor ({x}, {y}) is outside image {shape}")]
    CursorOutOfBounds { x: i32, y: i32, shape: ImageShape },

    #[error("Tile {0} could not be loaded")]
    TileUnavailable(TileKey),

    #[error("Invalid channel range {first}..={last}")]
    InvalidChannelRange { first: i32, last: i32 },

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Settings shared by every session of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Upper bound on tiles cached per open file
    pub max_tile_capacity: usize,
    /// Animation flow control acknowledgements expected per second
    pub waits_per_second: i32,
    pub layout: TileLayout,
    /// Encoding of streamed tile pixels
    pub compression: TileCompression,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_tile_capacity: MAX_TILE_CACHE_CAPACITY,
            waits_per_second: DEFAULT_WAITS_PER_SECOND,
            layout: TileLayout::default(),
            compression: TileCompression::default(),
        }
    }
}

/// State of one client connection.
pub struct Session {
    id: u32,
    registry: Arc<ImageRegistry>,
    settings: SessionSettings,
    queue: TaskQueue,
    outbound: OutboundSender,
    frames: RwLock<HashMap<i32, Arc<Frame>>>,
    cursors: CursorSettings,
    channels: ChannelSlots,
    animation: AnimationController,
    calculations: DashMap<i32, (u64, CancellationToken)>,
    next_calculation: AtomicU64,
    closed: CancellationToken,
}

impl Session {
    pub fn new(
        id: u32,
        registry: Arc<ImageRegistry>,
        settings: SessionSettings,
        queue: TaskQueue,
        outbound: OutboundSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            registry,
            settings,
            queue,
            outbound,
            frames: RwLock::new(HashMap::new()),
            cursors: CursorSettings::new(),
            channels: ChannelSlots::default(),
            animation: AnimationController::new(settings.waits_per_second),
            calculations: DashMap::new(),
            next_calculation: AtomicU64::new(0),
            closed: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Frame open under `file_id`.
    pub fn frame(&self, file_id: i32) -> Option<Arc<Frame>> {
        self.frames.read().get(&file_id).cloned()
    }

    /// Ids of all open files, sorted.
    pub fn file_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.frames.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn animation(&self) -> &AnimationController {
        &self.animation
    }

    pub fn cursors(&self) -> &CursorSettings {
        &self.cursors
    }

    /// Whether a calculation is pending or running for `file_id`.
    pub fn is_calculating(&self, file_id: i32) -> bool {
        self.calculations.contains_key(&file_id)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Decode and dispatch one frame from the client.
    ///
    /// Malformed or unknown frames are logged and answered with
    /// `ErrorData`.
    pub fn on_message(self: &Arc<Self>, frame: Bytes) {
        let mut payload = frame;
        let header = match protocol::EventHeader::decode(&mut payload) {
            Ok(header) => header,
            Err(e) => {
                warn!(session_id = self.id, error = %e, "Dropping malformed frame");
                self.send(0, OutboundEvent::error(0, e.to_string()));
                return;
            }
        };

        let message = header
            .event()
            .and_then(|event| InboundMessage::decode(event, payload));
        match message {
            Ok(message) => self.handle(header.request_id, message),
            Err(e) => {
                warn!(
                    session_id = self.id,
                    event_type = header.event_type,
                    error = %e,
                    "Rejected message"
                );
                self.send(
                    header.request_id,
                    OutboundEvent::error(header.event_type, e.to_string()),
                );
            }
        }
    }

    /// Dispatch a decoded request.
    pub fn handle(self: &Arc<Self>, request_id: u32, message: InboundMessage) {
        if self.is_closed() {
            return;
        }
        debug!(
            session_id = self.id,
            event = %message.event_type(),
            file_id = message.file_id(),
            request_id,
            "Received"
        );

        match message {
            InboundMessage::OpenFile(request) => self.on_open_file(request_id, &request),
            InboundMessage::CloseFile { file_id } => self.on_close_file(file_id),
            InboundMessage::SetImageChannels(request) => {
                let file_id = request.file_id;
                let slot = self.channels.get_or_create(file_id);
                if slot.offer(request_id, request) {
                    self.queue.push(SetImageChannelsTask {
                        session: Arc::clone(self),
                        file_id,
                    });
                }
            }
            InboundMessage::AddRequiredTiles(request) => {
                self.queue.push(AddRequiredTilesTask {
                    session: Arc::clone(self),
                    request_id,
                    request,
                });
            }
            InboundMessage::SetCursor(request) => {
                self.cursors.add(request_id, request);
                self.queue.push(SetCursorTask {
                    session: Arc::clone(self),
                    file_id: request.file_id,
                });
            }
            InboundMessage::StartAnimation(request) => {
                self.animation.cancel();
                self.queue.push(StartAnimationTask {
                    session: Arc::clone(self),
                    request_id,
                    request,
                });
            }
            InboundMessage::StopAnimation(request) => {
                self.animation.stop(request.file_id);
            }
            InboundMessage::AnimationFlowControl(request) => {
                if let Some(ticket) = self.animation.flow_control(&request) {
                    self.queue.push(AnimationTask {
                        session: Arc::clone(self),
                        ticket,
                    });
                }
            }
            InboundMessage::MomentRequest(request) => {
                let calculation = self.next_calculation.fetch_add(1, Ordering::Relaxed);
                let cancel = self.closed.child_token();
                if let Some((_, previous)) = self
                    .calculations
                    .insert(request.file_id, (calculation, cancel.clone()))
                {
                    previous.cancel();
                }
                self.queue.push(MomentTask {
                    session: Arc::clone(self),
                    request_id,
                    request,
                    calculation,
                    cancel,
                });
            }
            InboundMessage::StopMomentCalc { file_id } => {
                if let Some((_, (_, cancel))) = self.calculations.remove(&file_id) {
                    cancel.cancel();
                    info!(session_id = self.id, file_id, "Calculation cancelled");
                }
            }
        }
    }

    /// Cancel all work and drop every open file.
    pub fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        self.animation.cancel();
        self.calculations.clear();
        self.cursors.clear_all();
        self.channels.clear();
        self.frames.write().clear();
        info!(session_id = self.id, "Session closed");
    }

    fn send(&self, request_id: u32, event: OutboundEvent) {
        if self.outbound.send((request_id, event)).is_err() {
            debug!(session_id = self.id, "Client gone, dropping event");
        }
    }

    pub(crate) fn send_file_error(&self, request_id: u32, file_id: i32, event: &str) {
        let error = SessionError::FileNotOpen(file_id);
        warn!(session_id = self.id, file_id, event, "{}", error);
        self.send(
            request_id,
            OutboundEvent::error(0, format!("{}: {}", event, error)),
        );
    }

    fn on_open_file(&self, request_id: u32, request: &OpenFile) {
        let Some(image) = self.registry.get(&request.name) else {
            let error = SessionError::ImageNotFound(request.name.clone());
            warn!(session_id = self.id, file_id = request.file_id, "{}", error);
            self.send(
                request_id,
                OutboundEvent::OpenFileAck {
                    file_id: request.file_id,
                    success: false,
                    message: error.to_string(),
                    shape: None,
                },
            );
            return;
        };

        // Reopening an id replaces the old frame and everything tied to it.
        self.on_close_file(request.file_id);

        let frame = Arc::new(Frame::new(request.file_id, image, &self.settings));
        let shape = frame.shape();
        info!(
            session_id = self.id,
            file_id = request.file_id,
            name = %request.name,
            shape = %shape,
            cache_capacity = frame.cache().capacity(),
            "Opened file"
        );
        self.frames.write().insert(request.file_id, frame);
        self.send(
            request_id,
            OutboundEvent::OpenFileAck {
                file_id: request.file_id,
                success: true,
                message: String::new(),
                shape: Some(shape),
            },
        );
    }

    fn on_close_file(&self, file_id: i32) {
        let ids = if file_id == -1 {
            self.file_ids()
        } else {
            vec![file_id]
        };

        for id in ids {
            self.animation.file_closed(id);
            if let Some((_, (_, cancel))) = self.calculations.remove(&id) {
                cancel.cancel();
            }
            self.cursors.clear(id);
            self.channels.remove(id);
            if self.frames.write().remove(&id).is_some() {
                info!(session_id = self.id, file_id = id, "Closed file");
            }
        }
    }

    pub(crate) fn execute_set_channels(&self, request_id: u32, request: &SetImageChannels) {
        let Some(frame) = self.frame(request.file_id) else {
            self.send_file_error(request_id, request.file_id, "SetImageChannels");
            return;
        };

        match frame.set_plane(request.plane) {
            Ok(_) => self.stream_tiles(request_id, &frame, &request.required_tiles),
            Err(e) => {
                warn!(session_id = self.id, file_id = request.file_id, error = %e, "Channel change failed");
                self.send(
                    request_id,
                    OutboundEvent::error(protocol::EventType::SetImageChannels.as_u16(), e.to_string()),
                );
            }
        }
    }

    pub(crate) fn execute_add_required_tiles(&self, request_id: u32, request: &AddRequiredTiles) {
        match self.frame(request.file_id) {
            Some(frame) => self.stream_tiles(request_id, &frame, &request.tiles),
            None => self.send_file_error(request_id, request.file_id, "AddRequiredTiles"),
        }
    }

    pub(crate) fn execute_set_cursor(&self, request_id: u32, cursor: &SetCursor) {
        let Some(frame) = self.frame(cursor.file_id) else {
            return;
        };

        let (plane, value) = match frame.cursor_value(cursor.x, cursor.y) {
            Ok(result) => result,
            Err(e) => {
                debug!(session_id = self.id, file_id = cursor.file_id, error = %e, "No cursor value");
                (frame.plane(), f32::NAN)
            }
        };
        self.send(
            request_id,
            OutboundEvent::CursorValue {
                file_id: cursor.file_id,
                plane,
                x: cursor.x,
                y: cursor.y,
                value,
            },
        );
    }

    pub(crate) fn play_animation_frame(&self, planned: &PlannedFrame) {
        let Some(frame) = self.frame(planned.file_id) else {
            self.animation.file_closed(planned.file_id);
            return;
        };

        if let Err(e) = frame.set_plane(planned.plane) {
            warn!(session_id = self.id, file_id = planned.file_id, error = %e, "Animation frame skipped");
            return;
        }
        self.stream_tiles(planned.request_id, &frame, &planned.required_tiles);
    }

    pub(crate) fn execute_moment(
        &self,
        request_id: u32,
        request: &MomentRequest,
        calculation: u64,
        cancel: &CancellationToken,
    ) {
        let file_id = request.file_id;
        let respond = |success: bool, cancelled: bool, message: String, output_name: String| {
            self.send(
                request_id,
                OutboundEvent::MomentResponse {
                    file_id,
                    success,
                    cancelled,
                    message,
                    output_name,
                },
            );
        };

        let frame = match self.frame(file_id) {
            Some(frame) if !cancel.is_cancelled() => frame,
            Some(_) => {
                respond(false, true, String::new(), String::new());
                return;
            }
            None => {
                respond(false, false, SessionError::FileNotOpen(file_id).to_string(), String::new());
                return;
            }
        };

        let result = compute_mean(
            frame.image(),
            request.first_channel,
            request.last_channel,
            request.stokes,
            self.settings.layout,
            cancel,
            |progress| self.send(request_id, OutboundEvent::MomentProgress { file_id, progress }),
        );
        self.calculations
            .remove_if(&file_id, |_, (id, _)| *id == calculation);

        match result {
            Ok(Some(cube)) => {
                let name = format!("{}.mean", frame.image().name());
                self.registry.register(name.clone(), Arc::new(cube));
                info!(session_id = self.id, file_id, output = %name, "Moment calculation finished");
                respond(true, false, String::new(), name);
            }
            Ok(None) => {
                info!(session_id = self.id, file_id, "Moment calculation cancelled");
                respond(false, true, String::new(), String::new());
            }
            Err(e) => {
                warn!(session_id = self.id, file_id, error = %e, "Moment calculation failed");
                respond(false, false, e.to_string(), String::new());
            }
        }
    }

    /// Send each tile bracketed by start and end sync messages.
    fn stream_tiles(&self, request_id: u32, frame: &Frame, keys: &[TileKey]) {
        let file_id = frame.file_id();
        let plane = frame.plane();
        self.send(
            request_id,
            OutboundEvent::RasterTileSync {
                file_id,
                plane,
                end_sync: false,
            },
        );

        for key in keys {
            match frame.tile(*key) {
                Ok((tile_plane, tile)) => self.send(
                    request_id,
                    OutboundEvent::RasterTileData(RasterTile::from_tile(
                        file_id,
                        tile_plane,
                        *key,
                        tile,
                        self.settings.compression,
                    )),
                ),
                Err(e) => {
                    warn!(session_id = self.id, file_id, tile = %key, error = %e, "Tile not sent")
                }
            }
        }

        self.send(
            request_id,
            OutboundEvent::RasterTileSync {
                file_id,
                plane,
                end_sync: true,
            },
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("files", &self.file_ids())
            .field("closed", &self.is_closed())
            .finish()
    }
}
