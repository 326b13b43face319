pub(crate) mod config;
mod roster_view;
mod track_view;

use std::{
    sync::mpsc::{Receiver, TryRecvError},
    thread::JoinHandle,
    time::SystemTime,
};

use config::AppConfig;
use egui::{Color32, ViewportCommand, Visuals, style::Widgets};
use log::{debug, error, info};
use tokio::sync::mpsc::UnboundedSender;

use salesrace::{ConnectivityState, LiveOutput, RaceCommand, TrackFrame};

use super::{PALETTE_BLACK, PALETTE_BROWN, PALETTE_MAROON};

const MAX_OUTPUTS_PER_REFRESH: usize = 50;
const MAX_TIME_PER_REFRESH_MS: u128 = 20;

const DEFAULT_BUTTON_CORNER_RADIUS: u8 = 4;
const DEFAULT_WINDOW_CORNER_RADIUS: u8 = 10;
const DEFAULT_WINDOW_TRANSPARENCY: u8 = 230;

/// What the window currently shows. Only the newest frame is kept.
#[derive(Debug)]
pub(crate) struct LiveState {
    pub(crate) latest_frame: Option<TrackFrame>,
    pub(crate) connectivity: ConnectivityState,
    pub(crate) bootstrap_error: Option<String>,
    /// The race thread is gone and nothing more will arrive.
    pub(crate) race_finished: bool,
}

impl Default for LiveState {
    fn default() -> Self {
        Self {
            latest_frame: None,
            connectivity: ConnectivityState::Disconnected,
            bootstrap_error: None,
            race_finished: false,
        }
    }
}

impl LiveState {
    pub(crate) fn apply(&mut self, output: LiveOutput) {
        match output {
            LiveOutput::Frame(frame) => {
                if let Some(latest) = &self.latest_frame {
                    if frame.frame_no <= latest.frame_no {
                        return;
                    }
                }
                self.latest_frame = Some(*frame);
            }
            LiveOutput::Connectivity(state) => self.connectivity = state,
            LiveOutput::BootstrapFailed(reason) => self.bootstrap_error = Some(reason),
        }
    }

    /// Apply a bounded batch so a burst of frames cannot stall the UI. Returns true when the
    /// race thread was found gone during this call.
    pub(crate) fn drain(&mut self, receiver: &Receiver<LiveOutput>) -> bool {
        let start_refresh = SystemTime::now();
        let mut outputs_processed = 0;
        loop {
            match receiver.try_recv() {
                Ok(output) => self.apply(output),
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => {
                    let newly_finished = !self.race_finished;
                    self.race_finished = true;
                    return newly_finished;
                }
            }
            outputs_processed += 1;

            if outputs_processed >= MAX_OUTPUTS_PER_REFRESH
                || start_refresh
                    .elapsed()
                    .map(|elapsed| elapsed.as_millis() >= MAX_TIME_PER_REFRESH_MS)
                    .unwrap_or(true)
            {
                return false;
            }
        }
    }
}

/// The leaderboard window: a race track with one car per sales person, and the standings.
///
/// Frames and connectivity changes come from the race thread. Closing the window shuts the
/// race down and waits for it before the config is saved. When the race ends on its own, after
/// Ctrl-C for instance, the window closes itself.
pub struct LeaderboardApp {
    output_receiver: Receiver<LiveOutput>,
    commands: UnboundedSender<RaceCommand>,
    race_thread: Option<JoinHandle<()>>,
    app_config: AppConfig,
    state: LiveState,
}

impl LeaderboardApp {
    pub(crate) fn new(
        output_receiver: Receiver<LiveOutput>,
        commands: UnboundedSender<RaceCommand>,
        race_thread: JoinHandle<()>,
        app_config: AppConfig,
        cc: &eframe::CreationContext<'_>,
    ) -> Self {
        let default_visuals = Visuals {
            dark_mode: true,
            hyperlink_color: PALETTE_MAROON,
            faint_bg_color: PALETTE_BLACK,
            extreme_bg_color: PALETTE_BROWN,
            panel_fill: PALETTE_BLACK,
            button_frame: true,
            window_fill: Color32::from_rgba_premultiplied(
                PALETTE_BLACK.r(),
                PALETTE_BLACK.g(),
                PALETTE_BLACK.b(),
                DEFAULT_WINDOW_TRANSPARENCY,
            ),
            widgets: Widgets::dark(),
            striped: true,
            ..Default::default()
        };
        cc.egui_ctx.set_visuals(default_visuals);

        Self {
            output_receiver,
            commands,
            race_thread: Some(race_thread),
            app_config,
            state: LiveState::default(),
        }
    }

    fn send_command(&self, command: RaceCommand) {
        if self.commands.send(command).is_err() {
            debug!("Race already stopped, dropping {:?}", command);
        }
    }
}

impl eframe::App for LeaderboardApp {
    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.send_command(RaceCommand::Shutdown);
        if let Some(race_thread) = self.race_thread.take() {
            if race_thread.join().is_err() {
                error!("Race thread panicked");
            }
        }

        if let Err(e) = self.app_config.save() {
            error!("Error while saving config file: {}", e);
        }
    }

    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if self.state.drain(&self.output_receiver) {
            info!("Race finished, closing the window");
            ctx.send_viewport_cmd(ViewportCommand::Close);
        }

        self.track_view(ctx);
        ctx.request_repaint();
    }
}
