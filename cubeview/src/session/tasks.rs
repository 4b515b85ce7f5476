//! Worker tasks queued by the session dispatcher.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::executor::{Task, TaskQueue};
use crate::protocol::{AddRequiredTiles, MomentRequest, StartAnimation};

use super::animation::{AfterFrame, AnimationTicket, FrameStep, MAX_FRAME_WAIT};
use super::Session;

/// Applies the latest queued channel change for one file.
pub(crate) struct SetImageChannelsTask {
    pub(crate) session: Arc<Session>,
    pub(crate) file_id: i32,
}

impl Task for SetImageChannelsTask {
    fn name(&self) -> &'static str {
        "SetImageChannels"
    }

    fn execute(self: Box<Self>, _queue: &TaskQueue) {
        let Some(slot) = self.session.channels.get(self.file_id) else {
            return;
        };
        let _exec = slot.exec_lock();
        if let Some((request_id, request)) = slot.take() {
            self.session.execute_set_channels(request_id, &request);
        }
    }
}

pub(crate) struct AddRequiredTilesTask {
    pub(crate) session: Arc<Session>,
    pub(crate) request_id: u32,
    pub(crate) request: AddRequiredTiles,
}

impl Task for AddRequiredTilesTask {
    fn name(&self) -> &'static str {
        "AddRequiredTiles"
    }

    fn execute(self: Box<Self>, _queue: &TaskQueue) {
        self.session
            .execute_add_required_tiles(self.request_id, &self.request);
    }
}

/// Computes the value under the newest cursor position of one file.
pub(crate) struct SetCursorTask {
    pub(crate) session: Arc<Session>,
    pub(crate) file_id: i32,
}

impl Task for SetCursorTask {
    fn name(&self) -> &'static str {
        "SetCursor"
    }

    fn execute(self: Box<Self>, _queue: &TaskQueue) {
        if let Some((request_id, cursor)) = self.session.cursors.take(self.file_id) {
            self.session.execute_set_cursor(request_id, &cursor);
        }
    }
}

/// How long a start request waits for the previous run's task to finish
/// before going back on the queue.
const START_WAIT: Duration = Duration::from_millis(200);

/// Waits for a running animation task to finish, then starts a new run.
pub(crate) struct StartAnimationTask {
    pub(crate) session: Arc<Session>,
    pub(crate) request_id: u32,
    pub(crate) request: StartAnimation,
}

impl Task for StartAnimationTask {
    fn name(&self) -> &'static str {
        "StartAnimation"
    }

    fn execute(self: Box<Self>, queue: &TaskQueue) {
        if self.session.is_closed() {
            return;
        }
        if !self.session.animation.wait_idle(START_WAIT) {
            queue.push_boxed(self);
            return;
        }
        if self.session.frame(self.request.file_id).is_none() {
            self.session
                .send_file_error(self.request_id, self.request.file_id, "StartAnimation");
            return;
        }

        let ticket = self
            .session
            .animation
            .start(self.request_id, &self.request);
        queue.push(AnimationTask {
            session: self.session,
            ticket,
        });
    }
}

/// Plays one animation frame and schedules the next.
pub(crate) struct AnimationTask {
    pub(crate) session: Arc<Session>,
    pub(crate) ticket: AnimationTicket,
}

impl Task for AnimationTask {
    fn name(&self) -> &'static str {
        "Animation"
    }

    fn execute(self: Box<Self>, queue: &TaskQueue) {
        if self.ticket.is_cancelled() || self.session.is_closed() {
            return;
        }

        let animation = &self.session.animation;
        animation.set_active(true);
        let requeue = match animation.plan(&self.ticket) {
            FrameStep::Stopped => false,
            FrameStep::NotYet(wait) => {
                animation.pause(&self.ticket, wait.min(MAX_FRAME_WAIT));
                !self.ticket.is_cancelled()
            }
            FrameStep::Play(frame) => {
                animation.pause(&self.ticket, frame.wait);
                if self.ticket.is_cancelled() {
                    false
                } else {
                    self.session.play_animation_frame(&frame);
                    animation.advance(&self.ticket) == AfterFrame::Continue
                }
            }
        };
        animation.set_active(false);

        if requeue {
            queue.push_boxed(self);
        }
    }
}

pub(crate) struct MomentTask {
    pub(crate) session: Arc<Session>,
    pub(crate) request_id: u32,
    pub(crate) request: MomentRequest,
    pub(crate) calculation: u64,
    pub(crate) cancel: CancellationToken,
}

impl Task for MomentTask {
    fn name(&self) -> &'static str {
        "Moment"
    }

    fn execute(self: Box<Self>, _queue: &TaskQueue) {
        self.session.execute_moment(
            self.request_id,
            &self.request,
            self.calculation,
            &self.cancel,
        );
    }
}
