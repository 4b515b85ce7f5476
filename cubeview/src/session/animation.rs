//! Animation playback with client flow control.
//!
//! An animation steps through planes at a fixed frame rate, streaming the
//! required tiles for each one. The client acknowledges frames as it renders
//! them; when the server gets more than a window of frames ahead of the last
//! acknowledgement it pauses until the next acknowledgement closes the gap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{Plane, TileKey};
use crate::protocol::{AnimationFlowControl, StartAnimation};
use crate::sync::QueuingRwLock;

/// Flow control acknowledgements expected per second.
pub const DEFAULT_WAITS_PER_SECOND: i32 = 3;

const WINDOW_SCALE: i32 = 1;

/// Longest a worker sleeps for a frame before handing the task back.
pub(crate) const MAX_FRAME_WAIT: Duration = Duration::from_millis(100);

/// Handle carried by animation tasks to identify the run they belong to.
#[derive(Debug, Clone)]
pub struct AnimationTicket {
    pub(crate) generation: u64,
    pub(crate) stop: CancellationToken,
}

impl AnimationTicket {
    pub fn is_cancelled(&self) -> bool {
        self.stop.is_cancelled()
    }
}

/// A frame ready to be played.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFrame {
    pub file_id: i32,
    pub request_id: u32,
    pub plane: Plane,
    pub required_tiles: Vec<TileKey>,
    /// Time left until the frame is due
    pub wait: Duration,
}

/// What an animation task should do now.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameStep {
    /// The run is over or was replaced
    Stopped,
    /// The next frame is due in the given time; pause, then requeue
    NotYet(Duration),
    Play(PlannedFrame),
}

/// What to do after a frame has been played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterFrame {
    Continue,
    /// Too far ahead of the client; resume on flow control
    WaitForFlow,
    Finished,
}

#[derive(Debug)]
struct AnimationState {
    generation: u64,
    file_id: i32,
    request_id: u32,
    first: Plane,
    last: Plane,
    delta: Plane,
    going_forward: bool,
    looping: bool,
    reverse_at_end: bool,
    current: Plane,
    next: Plane,
    last_flow: Plane,
    frame_interval: Duration,
    t_last: Instant,
    window: i32,
    required_tiles: Vec<TileKey>,
    waiting_flow_event: bool,
    stop: CancellationToken,
}

impl AnimationState {
    fn step(&self, from: Plane, forward: bool) -> Plane {
        if forward {
            Plane::new(from.z + self.delta.z, from.stokes + self.delta.stokes)
        } else {
            Plane::new(from.z - self.delta.z, from.stokes - self.delta.stokes)
        }
    }

    fn past_end(&self, plane: Plane, forward: bool) -> bool {
        if forward {
            plane.z > self.last.z || plane.stokes > self.last.stokes
        } else {
            plane.z < self.first.z || plane.stokes < self.first.stokes
        }
    }

    /// Frames played since the last acknowledgement, along the animated
    /// axis.
    fn gap(&self) -> i32 {
        let (current, acked) = if self.delta.z != 0 {
            (self.current.z, self.last_flow.z)
        } else {
            (self.current.stokes, self.last_flow.stokes)
        };
        if self.going_forward {
            current - acked
        } else {
            acked - current
        }
    }

    fn ticket(&self) -> AnimationTicket {
        AnimationTicket {
            generation: self.generation,
            stop: self.stop.clone(),
        }
    }
}

/// Animation state of one session.
#[derive(Debug)]
pub struct AnimationController {
    state: QueuingRwLock<Option<AnimationState>>,
    /// Set while an animation task is executing
    active: Mutex<bool>,
    /// Signalled when a run is cancelled or a task goes idle
    wake: Condvar,
    generations: AtomicU64,
    polls: AtomicU64,
    waits_per_second: i32,
}

impl AnimationController {
    pub fn new(waits_per_second: i32) -> Self {
        Self {
            state: QueuingRwLock::new(None),
            active: Mutex::new(false),
            wake: Condvar::new(),
            generations: AtomicU64::new(0),
            polls: AtomicU64::new(0),
            waits_per_second: waits_per_second.max(1),
        }
    }

    pub fn is_active(&self) -> bool {
        *self.active.lock()
    }

    pub(crate) fn set_active(&self, active: bool) {
        let mut guard = self.active.lock();
        *guard = active;
        if !active {
            self.wake.notify_all();
        }
    }

    /// Block until no animation task is executing, for at most `timeout`.
    ///
    /// Returns `false` if a task was still active when the time ran out.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.active.lock();
        while *guard {
            if self.wake.wait_until(&mut guard, deadline).timed_out() {
                return !*guard;
            }
        }
        true
    }

    /// Sleep for `wait`, returning early if the run of `ticket` is cancelled.
    pub(crate) fn pause(&self, ticket: &AnimationTicket, wait: Duration) {
        let deadline = Instant::now() + wait;
        let mut guard = self.active.lock();
        while !ticket.is_cancelled() {
            if self.wake.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
    }

    /// Times a task has checked for the next frame.
    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    fn notify_cancelled(&self) {
        let _guard = self.active.lock();
        self.wake.notify_all();
    }

    /// Replace any previous animation with a new run.
    ///
    /// A zero delta steps one channel at a time; a non-positive frame rate
    /// plays one frame per second.
    pub fn start(&self, request_id: u32, message: &StartAnimation) -> AnimationTicket {
        let frame_rate = message.frame_rate.max(1);
        let going_forward = message.delta.z >= 0 && message.delta.stokes >= 0;
        let mut delta = Plane::new(message.delta.z.abs(), message.delta.stokes.abs());
        if delta == Plane::default() {
            delta.z = 1;
        }
        let frame_interval = Duration::from_micros(1_000_000 / frame_rate as u64);
        let now = Instant::now();

        let state = AnimationState {
            generation: self.generations.fetch_add(1, Ordering::SeqCst) + 1,
            file_id: message.file_id,
            request_id,
            first: message.first,
            last: message.last,
            delta,
            going_forward,
            looping: message.looping,
            reverse_at_end: message.reverse_at_end,
            current: message.start,
            next: message.start,
            last_flow: message.start,
            frame_interval,
            t_last: now.checked_sub(frame_interval).unwrap_or(now),
            window: (frame_rate / self.waits_per_second) * WINDOW_SCALE,
            required_tiles: message.required_tiles.clone(),
            waiting_flow_event: false,
            stop: CancellationToken::new(),
        };
        let ticket = state.ticket();

        let mut guard = self.state.write();
        if let Some(previous) = guard.as_ref() {
            previous.stop.cancel();
        }
        debug!(
            file_id = state.file_id,
            start = %state.next,
            frame_rate,
            window = state.window,
            "Animation started"
        );
        *guard = Some(state);
        drop(guard);
        self.notify_cancelled();
        ticket
    }

    /// Cancel the current run, if any.
    pub fn cancel(&self) {
        if let Some(state) = self.state.read().as_ref() {
            state.stop.cancel();
        }
        self.notify_cancelled();
    }

    /// Stop the animation of `file_id`. Returns `false` if a different file
    /// (or nothing) is animating.
    pub fn stop(&self, file_id: i32) -> bool {
        let stopped = match self.state.read().as_ref() {
            Some(state) if state.file_id == file_id => {
                state.stop.cancel();
                debug!(file_id, frame = %state.current, "Animation stopped");
                true
            }
            Some(state) => {
                warn!(
                    file_id,
                    animating = state.file_id,
                    "Stop requested for a file that is not animating"
                );
                false
            }
            None => false,
        };
        if stopped {
            self.notify_cancelled();
        }
        stopped
    }

    /// Cancel the animation if it plays `file_id`.
    pub fn file_closed(&self, file_id: i32) {
        if let Some(state) = self.state.read().as_ref() {
            if state.file_id == file_id {
                state.stop.cancel();
            }
        }
        self.notify_cancelled();
    }

    /// Record a client acknowledgement.
    ///
    /// Returns a ticket if a paused animation may resume.
    pub fn flow_control(&self, message: &AnimationFlowControl) -> Option<AnimationTicket> {
        let mut guard = self.state.write();
        let state = guard.as_mut()?;
        if state.file_id != message.file_id {
            return None;
        }

        state.last_flow = message.received_frame;
        if state.waiting_flow_event && !state.stop.is_cancelled() && state.gap() <= state.window {
            state.waiting_flow_event = false;
            return Some(state.ticket());
        }
        None
    }

    /// Decide whether the next frame can be played.
    pub fn plan(&self, ticket: &AnimationTicket) -> FrameStep {
        self.polls.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.state.write();
        let state = match guard.as_mut() {
            Some(state) if state.generation == ticket.generation => state,
            _ => return FrameStep::Stopped,
        };
        if state.stop.is_cancelled() || state.waiting_flow_event {
            return FrameStep::Stopped;
        }

        let due = state.t_last + state.frame_interval;
        let wait = due.saturating_duration_since(Instant::now());
        if wait > MAX_FRAME_WAIT {
            return FrameStep::NotYet(wait);
        }

        state.current = state.next;
        FrameStep::Play(PlannedFrame {
            file_id: state.file_id,
            request_id: state.request_id,
            plane: state.current,
            required_tiles: state.required_tiles.clone(),
            wait,
        })
    }

    /// Move to the frame after the one just played.
    pub fn advance(&self, ticket: &AnimationTicket) -> AfterFrame {
        let mut guard = self.state.write();
        let state = match guard.as_mut() {
            Some(state) if state.generation == ticket.generation => state,
            _ => return AfterFrame::Finished,
        };
        if state.stop.is_cancelled() {
            return AfterFrame::Finished;
        }
        state.t_last = Instant::now();

        let current = state.current;
        let mut forward = state.going_forward;
        let mut next = state.step(current, forward);
        if state.past_end(next, forward) {
            if state.reverse_at_end {
                forward = !forward;
                next = state.step(current, forward);
                if state.past_end(next, forward) {
                    next = current;
                }
            } else if state.looping {
                next = if forward { state.first } else { state.last };
            } else {
                debug!(file_id = state.file_id, frame = %current, "Animation reached the end");
                return AfterFrame::Finished;
            }
        }
        state.going_forward = forward;
        state.next = next;

        if state.gap() > state.window {
            state.waiting_flow_event = true;
            AfterFrame::WaitForFlow
        } else {
            AfterFrame::Continue
        }
    }

    /// Plane most recently played.
    pub fn current_frame(&self) -> Option<Plane> {
        self.state.read().as_ref().map(|state| state.current)
    }

    /// Whether the animation is paused waiting for the client.
    pub fn is_waiting(&self) -> bool {
        self.state
            .read()
            .as_ref()
            .map_or(false, |state| state.waiting_flow_event)
    }

    /// Frames the server may run ahead of the client.
    pub fn flow_window(&self) -> Option<i32> {
        self.state.read().as_ref().map(|state| state.window)
    }
}
