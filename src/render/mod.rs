use std::{sync::mpsc::Sender, time::Duration};

use log::{debug, info};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::{
    roster::{ProjectedPosition, Quota, RosterSnapshot, RosterStore, projector::project},
    session::ConnectivityState,
};

pub const DEFAULT_REFRESH_RATE_MS: u64 = 16;
const MIN_REFRESH_RATE: Duration = Duration::from_millis(1);

/// Everything a backend needs to draw one frame of the race.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackFrame {
    pub frame_no: u64,
    pub quota: Quota,
    pub snapshot: RosterSnapshot,
    /// One entry per competitor, in snapshot order.
    pub positions: Vec<ProjectedPosition>,
}

/// The drawing backend of the render loop.
pub trait TrackRenderer {
    fn draw(&mut self, frame: &TrackFrame);

    /// Called once when the render loop stops.
    fn release(&mut self) {}
}

/// Draws the roster at a fixed cadence, whatever the rate of incoming events.
///
/// Ticks that were missed while the runner was busy are skipped rather than replayed. Every
/// frame is built from a fresh snapshot, so a frame never shows a half-applied event.
pub struct RenderLoop<R: TrackRenderer> {
    renderer: R,
    quota: Quota,
    period: Duration,
    interval: Option<Interval>,
    frames: u64,
    stopped: bool,
}

impl<R: TrackRenderer> RenderLoop<R> {
    pub fn new(renderer: R, quota: Quota, period: Duration) -> Self {
        Self {
            renderer,
            quota,
            period: period.max(MIN_REFRESH_RATE),
            interval: None,
            frames: 0,
            stopped: false,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Wait for the next tick. Never resolves once the loop is stopped. Cancel safe.
    pub async fn next_tick(&mut self) {
        if self.stopped {
            return std::future::pending().await;
        }
        let period = self.period;
        let interval = self.interval.get_or_insert_with(|| {
            // the first frame is drawn right away
            let mut interval = tokio::time::interval_at(Instant::now(), period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        interval.tick().await;
    }

    /// Snapshot, project and draw the current roster. Returns the frame number, or `None` once
    /// the loop is stopped.
    pub fn render(&mut self, store: &RosterStore) -> Option<u64> {
        if self.stopped {
            return None;
        }
        let snapshot = store.snapshot();
        let positions = project(&snapshot, self.quota);
        self.frames += 1;
        let frame = TrackFrame {
            frame_no: self.frames,
            quota: self.quota,
            snapshot,
            positions,
        };
        self.renderer.draw(&frame);
        Some(frame.frame_no)
    }

    /// Cancel the cadence and release the renderer. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.interval = None;
        self.renderer.release();
        info!("Render loop stopped after {} frames", self.frames);
    }
}

impl<R: TrackRenderer> Drop for RenderLoop<R> {
    fn drop(&mut self) {
        if !self.stopped {
            debug!("Render loop dropped while running");
            self.stop();
        }
    }
}

/// What the race thread tells the window.
#[derive(Clone, Debug, PartialEq)]
pub enum LiveOutput {
    Frame(Box<TrackFrame>),
    Connectivity(ConnectivityState),
    BootstrapFailed(String),
}

/// Forwards frames to the window thread.
pub struct ChannelRenderer {
    sender: Sender<LiveOutput>,
    window_closed: bool,
}

impl ChannelRenderer {
    pub fn new(sender: Sender<LiveOutput>) -> Self {
        Self {
            sender,
            window_closed: false,
        }
    }
}

impl TrackRenderer for ChannelRenderer {
    fn draw(&mut self, frame: &TrackFrame) {
        if self.window_closed {
            return;
        }
        if self
            .sender
            .send(LiveOutput::Frame(Box::new(frame.clone())))
            .is_err()
        {
            debug!("Window is gone, no longer forwarding frames");
            self.window_closed = true;
        }
    }
}

/// Keeps every frame it is handed.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    pub frames: Vec<TrackFrame>,
    pub releases: usize,
}

impl TrackRenderer for RecordingRenderer {
    fn draw(&mut self, frame: &TrackFrame) {
        self.frames.push(frame.clone());
    }

    fn release(&mut self) {
        self.releases += 1;
    }
}
