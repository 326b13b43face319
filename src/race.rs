use std::time::Duration;

use log::{debug, error, info, warn};
use rand::{Rng, seq::SliceRandom};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver},
    time::{Instant, sleep, sleep_until},
};

use crate::{
    SalesRaceError,
    bootstrap::RosterSource,
    render::{DEFAULT_REFRESH_RATE_MS, RenderLoop, TrackRenderer},
    roster::{ProgressEvent, Quota, RosterSnapshot, RosterStore},
    session::{
        ChannelSignal, ConnectivityState, PushChannel, SessionController, SessionStats,
        StateTransition,
    },
    stimulus::{StimulusClient, Transaction},
};

pub const DEFAULT_BOOTSTRAP_ATTEMPTS: u32 = 3;
pub const DEFAULT_BOOTSTRAP_RETRY_MS: u64 = 2000;
pub const DEFAULT_CONNECT_RETRY_MS: u64 = 5000;
/// Test sales post a whole amount below this.
const TEST_SALE_MAX_AMOUNT: u32 = 10;

#[derive(Clone, Debug, PartialEq)]
pub struct RaceSettings {
    pub quota: Quota,
    pub refresh_rate: Duration,
    pub bootstrap_attempts: u32,
    pub bootstrap_retry: Duration,
    /// Delay before connecting again after the channel failed to open or gave up. `None` leaves
    /// the session disconnected.
    pub connect_retry: Option<Duration>,
}

impl Default for RaceSettings {
    fn default() -> Self {
        Self {
            quota: Quota::default(),
            refresh_rate: Duration::from_millis(DEFAULT_REFRESH_RATE_MS),
            bootstrap_attempts: DEFAULT_BOOTSTRAP_ATTEMPTS,
            bootstrap_retry: Duration::from_millis(DEFAULT_BOOTSTRAP_RETRY_MS),
            connect_retry: Some(Duration::from_millis(DEFAULT_CONNECT_RETRY_MS)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RaceCommand {
    /// Post a random sale for a random competitor through the stimulus endpoint.
    TestSale,
    Shutdown,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RaceSummary {
    pub snapshot: RosterSnapshot,
    pub frames: u64,
    pub session: SessionStats,
    pub bootstrapped: bool,
}

type BootstrapFailureHandler = Box<dyn FnMut(&SalesRaceError) + Send>;

/// Runs one leaderboard session: bootstrap, connect, then merge and draw until shut down.
///
/// Progress events only ever reach the store through the runner's queue, which is drained before
/// each frame, so the store has a single writer. On the way out the render loop is stopped
/// before the session is disconnected; events still queued at that point are discarded.
pub struct Race<C: PushChannel, S: RosterSource, R: TrackRenderer> {
    settings: RaceSettings,
    controller: SessionController<C>,
    source: S,
    render_loop: RenderLoop<R>,
    store: RosterStore,
    stimulus: Option<StimulusClient>,
    on_bootstrap_failure: Option<BootstrapFailureHandler>,
}

impl<C: PushChannel, S: RosterSource, R: TrackRenderer> Race<C, S, R> {
    pub fn new(settings: RaceSettings, channel: C, source: S, renderer: R) -> Self {
        let render_loop = RenderLoop::new(renderer, settings.quota, settings.refresh_rate);
        Self {
            settings,
            controller: SessionController::new(channel),
            source,
            render_loop,
            store: RosterStore::new(),
            stimulus: None,
            on_bootstrap_failure: None,
        }
    }

    pub fn with_stimulus(mut self, stimulus: StimulusClient) -> Self {
        self.stimulus = Some(stimulus);
        self
    }

    /// Register a connectivity observer on the session.
    pub fn observe(&mut self, observer: impl FnMut(&StateTransition) + Send + 'static) {
        self.controller.observe(observer);
    }

    /// Called when the roster could not be loaded after every attempt.
    pub fn on_bootstrap_failure(&mut self, handler: impl FnMut(&SalesRaceError) + Send + 'static) {
        self.on_bootstrap_failure = Some(Box::new(handler));
    }

    pub async fn run(mut self, mut commands: UnboundedReceiver<RaceCommand>) -> RaceSummary {
        let loaded = tokio::select! {
            biased;

            _ = shutdown_requested(&mut commands) => None,
            result = self.bootstrap() => Some(result),
        };
        let Some(loaded) = loaded else {
            self.render_loop.stop();
            self.controller.disconnect().await;
            return self.summary(false);
        };

        let bootstrapped = match loaded {
            Ok(count) => {
                info!("Race starting with {} competitors", count);
                true
            }
            Err(e) => {
                error!("Could not load the roster, racing without it: {}", e);
                if let Some(handler) = self.on_bootstrap_failure.as_mut() {
                    handler(&e);
                }
                false
            }
        };

        let (events_tx, mut events) = mpsc::unbounded_channel::<ProgressEvent>();
        if let Err(e) = self.controller.on_event(move |event| {
            let _ = events_tx.send(event);
        }) {
            error!("Could not register the progress handler: {}", e);
        }
        self.controller.connect();

        let mut retry_at: Option<Instant> = None;
        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(RaceCommand::TestSale) => self.test_sale(),
                    Some(RaceCommand::Shutdown) => {
                        info!("Shutdown requested");
                        break;
                    }
                    None => {
                        info!("Command channel closed, shutting down");
                        break;
                    }
                },
                Some(event) = events.recv() => {
                    self.store.merge(&event);
                }
                signal = self.controller.next_signal() => {
                    let reopen = schedules_reconnect(&signal);
                    self.controller.handle_signal(signal);
                    if reopen
                        && retry_at.is_none()
                        && self.controller.state() == ConnectivityState::Disconnected
                    {
                        if let Some(delay) = self.settings.connect_retry {
                            debug!("Connecting again in {:?}", delay);
                            retry_at = Some(Instant::now() + delay);
                        }
                    }
                }
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    retry_at = None;
                    self.controller.connect();
                }
                _ = self.render_loop.next_tick() => {
                    while let Ok(event) = events.try_recv() {
                        self.store.merge(&event);
                    }
                    self.render_loop.render(&self.store);
                }
            }
        }

        self.render_loop.stop();
        self.controller.disconnect().await;
        let discarded = std::iter::from_fn(|| events.try_recv().ok()).count();
        if discarded > 0 {
            debug!("Discarded {} queued events on shutdown", discarded);
        }

        self.summary(bootstrapped)
    }

    fn summary(&self, bootstrapped: bool) -> RaceSummary {
        RaceSummary {
            snapshot: self.store.snapshot(),
            frames: self.render_loop.frames(),
            session: self.controller.stats(),
            bootstrapped,
        }
    }

    async fn bootstrap(&mut self) -> Result<usize, SalesRaceError> {
        let attempts = self.settings.bootstrap_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.source.load().await {
                Ok(roster) => {
                    self.store.bootstrap(roster)?;
                    return Ok(self.store.len());
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        "Roster load attempt {}/{} failed: {}",
                        attempt, attempts, e
                    );
                    sleep(self.settings.bootstrap_retry).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn test_sale(&self) {
        let Some(stimulus) = self.stimulus.clone() else {
            warn!("No stimulus endpoint configured, ignoring test sale");
            return;
        };
        let snapshot = self.store.snapshot();
        let mut rng = rand::thread_rng();
        let Some(competitor) = snapshot.as_slice().choose(&mut rng) else {
            warn!("Roster is empty, ignoring test sale");
            return;
        };
        let transaction = Transaction {
            sales_person_id: competitor.id,
            amount: f64::from(rng.gen_range(0..TEST_SALE_MAX_AMOUNT)),
        };

        tokio::spawn(async move {
            if let Err(e) = stimulus.post(transaction).await {
                warn!("Test sale failed: {}", e);
            }
        });
    }
}

/// Resolves on `Shutdown` or once every command sender is gone. Test sales are ignored since
/// there is no roster to pick from yet.
async fn shutdown_requested(commands: &mut UnboundedReceiver<RaceCommand>) {
    loop {
        match commands.recv().await {
            Some(RaceCommand::TestSale) => debug!("Roster still loading, ignoring test sale"),
            Some(RaceCommand::Shutdown) => {
                info!("Shutdown requested while loading the roster");
                return;
            }
            None => {
                info!("Command channel closed while loading the roster");
                return;
            }
        }
    }
}

/// Only a failed open or exhausted retries leave the channel closed for good.
fn schedules_reconnect(signal: &ChannelSignal) -> bool {
    matches!(
        signal,
        ChannelSignal::OpenFailed { .. } | ChannelSignal::GaveUp { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bootstrap::MockRosterSource,
        render::TrackFrame,
        roster::Competitor,
        session::MockPushChannel,
    };
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc::UnboundedSender;

    #[derive(Clone, Default)]
    struct SharedRenderer {
        frames: Arc<Mutex<Vec<TrackFrame>>>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl TrackRenderer for SharedRenderer {
        fn draw(&mut self, frame: &TrackFrame) {
            self.frames.lock().unwrap().push(frame.clone());
        }

        fn release(&mut self) {
            self.log.lock().unwrap().push("renderer released");
        }
    }

    fn settings() -> RaceSettings {
        RaceSettings {
            bootstrap_attempts: 1,
            ..Default::default()
        }
    }

    fn commands() -> (UnboundedSender<RaceCommand>, UnboundedReceiver<RaceCommand>) {
        mpsc::unbounded_channel()
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_then_sale() {
        let (channel, handle) = MockPushChannel::new();
        let source = MockRosterSource::with_roster(vec![
            Competitor::new(1, "A", "X", 0.),
            Competitor::new(2, "B", "Y", 0.),
        ]);
        let renderer = SharedRenderer::default();
        let mut race = Race::new(settings(), channel, source, renderer.clone());
        let log = renderer.log.clone();
        race.observe(move |transition| {
            if transition.to == ConnectivityState::Disconnected {
                log.lock().unwrap().push("session disconnected");
            }
        });
        let (commands_tx, commands_rx) = commands();

        let driver = async {
            sleep(Duration::from_millis(50)).await;
            handle.sale(1, 15000.);
            sleep(Duration::from_millis(50)).await;
            commands_tx.send(RaceCommand::Shutdown).unwrap();
        };
        let (summary, _) = tokio::join!(race.run(commands_rx), driver);

        assert!(summary.bootstrapped);
        let snapshot: Vec<(i64, f64)> = summary
            .snapshot
            .iter()
            .map(|c| (c.id, c.cumulative_progress))
            .collect();
        assert_eq!(snapshot, vec![(1, 15000.), (2, 0.)]);

        let frames = renderer.frames.lock().unwrap();
        let first = frames.first().unwrap();
        assert_eq!(first.positions[0].normalized_progress, 0.);
        let last = frames.last().unwrap();
        let projected: Vec<(i64, f64)> = last
            .positions
            .iter()
            .map(|p| (p.competitor_id, p.normalized_progress))
            .collect();
        assert_eq!(projected, vec![(1, 0.5), (2, 0.)]);
        assert_eq!(summary.frames, frames.len() as u64);

        assert_eq!(summary.session.dispatched, 1);
        assert_eq!(handle.stops(), 1);
        assert_eq!(
            *renderer.log.lock().unwrap(),
            vec!["renderer released", "session disconnected"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_competitor_without_bootstrap() {
        let (channel, handle) = MockPushChannel::new();
        let source = MockRosterSource::new(vec![Err("roster service down".to_string())]);
        let renderer = SharedRenderer::default();
        let mut race = Race::new(settings(), channel, source, renderer.clone());
        let failures = Arc::new(Mutex::new(Vec::new()));
        let failures_writer = failures.clone();
        race.on_bootstrap_failure(move |e| failures_writer.lock().unwrap().push(e.to_string()));
        let (commands_tx, commands_rx) = commands();

        let driver = async {
            sleep(Duration::from_millis(20)).await;
            handle.sale(99, 5000.);
            sleep(Duration::from_millis(50)).await;
            commands_tx.send(RaceCommand::Shutdown).unwrap();
        };
        let (summary, _) = tokio::join!(race.run(commands_rx), driver);

        assert!(!summary.bootstrapped);
        assert_eq!(failures.lock().unwrap().len(), 1);
        let competitor = summary.snapshot.get(99).unwrap();
        assert_eq!(competitor.cumulative_progress, 5000.);
        assert_eq!(competitor.display_name, None);
        assert_eq!(competitor.group, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_retries_before_giving_up() {
        let (channel, _handle) = MockPushChannel::new();
        let source = MockRosterSource::new(vec![
            Err("down".to_string()),
            Ok(vec![Competitor::new(1, "A", "X", 10.)]),
        ]);
        let race = Race::new(
            RaceSettings {
                bootstrap_attempts: 3,
                ..Default::default()
            },
            channel,
            source,
            SharedRenderer::default(),
        );
        let (commands_tx, commands_rx) = commands();

        let driver = async {
            sleep(Duration::from_secs(3)).await;
            commands_tx.send(RaceCommand::Shutdown).unwrap();
        };
        let (summary, _) = tokio::join!(race.run(commands_rx), driver);

        assert!(summary.bootstrapped);
        assert_eq!(summary.snapshot.len(), 1);
    }

    struct StuckRosterSource;

    impl RosterSource for StuckRosterSource {
        async fn load(&mut self) -> Result<Vec<Competitor>, SalesRaceError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_roster_is_loading() {
        let (channel, handle) = MockPushChannel::new();
        let renderer = SharedRenderer::default();
        let race = Race::new(settings(), channel, StuckRosterSource, renderer.clone());
        let (commands_tx, commands_rx) = commands();
        commands_tx.send(RaceCommand::Shutdown).unwrap();

        let summary = tokio::time::timeout(Duration::from_secs(3600), race.run(commands_rx))
            .await
            .expect("run should return once shut down");

        assert!(!summary.bootstrapped);
        assert!(summary.snapshot.is_empty());
        assert_eq!(summary.frames, 0);
        assert_eq!(handle.starts(), 0);
        assert_eq!(handle.stops(), 1);
        assert_eq!(*renderer.log.lock().unwrap(), vec!["renderer released"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_commands_while_roster_is_loading() {
        let (channel, handle) = MockPushChannel::new();
        let race = Race::new(settings(), channel, StuckRosterSource, SharedRenderer::default());
        let (commands_tx, commands_rx) = commands();

        let driver = async move {
            sleep(Duration::from_millis(10)).await;
            commands_tx.send(RaceCommand::TestSale).unwrap();
            sleep(Duration::from_millis(10)).await;
            drop(commands_tx);
        };
        let (summary, _) = tokio::time::timeout(
            Duration::from_secs(3600),
            async { tokio::join!(race.run(commands_rx), driver) },
        )
        .await
        .expect("run should return once the commands are gone");

        assert!(!summary.bootstrapped);
        assert_eq!(handle.starts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retry_after_open_failure() {
        let (channel, handle) =
            MockPushChannel::with_start_outcomes(vec![ChannelSignal::OpenFailed {
                reason: "refused".to_string(),
            }]);
        let source = MockRosterSource::with_roster(vec![]);
        let mut race = Race::new(
            RaceSettings {
                bootstrap_attempts: 1,
                connect_retry: Some(Duration::from_secs(5)),
                ..Default::default()
            },
            channel,
            source,
            SharedRenderer::default(),
        );
        let states = Arc::new(Mutex::new(Vec::new()));
        let states_writer = states.clone();
        race.observe(move |t| states_writer.lock().unwrap().push(t.to));
        let (commands_tx, commands_rx) = commands();

        let driver = async {
            sleep(Duration::from_secs(6)).await;
            commands_tx.send(RaceCommand::Shutdown).unwrap();
        };
        tokio::join!(race.run(commands_rx), driver);

        assert_eq!(handle.starts(), 2);
        assert_eq!(
            *states.lock().unwrap(),
            vec![
                ConnectivityState::Connecting,
                ConnectivityState::Disconnected,
                ConnectivityState::Connecting,
                ConnectivityState::Connected,
                ConnectivityState::Disconnected,
            ]
        );
    }

    #[test]
    fn test_only_closing_signals_schedule_reconnect() {
        assert!(schedules_reconnect(&ChannelSignal::OpenFailed {
            reason: "refused".to_string()
        }));
        assert!(schedules_reconnect(&ChannelSignal::GaveUp { reason: None }));
        assert!(!schedules_reconnect(&ChannelSignal::Invocation {
            target: "SaleCompleted".to_string(),
            arguments: vec![],
        }));
        assert!(!schedules_reconnect(&ChannelSignal::Dropped { reason: None }));
        assert!(!schedules_reconnect(&ChannelSignal::Opened {
            connection_id: None
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_after_shutdown_are_ignored() {
        let (channel, handle) = MockPushChannel::new();
        let source = MockRosterSource::with_roster(vec![Competitor::new(1, "A", "X", 0.)]);
        let race = Race::new(settings(), channel, source, SharedRenderer::default());
        let (commands_tx, commands_rx) = commands();

        let driver = async {
            sleep(Duration::from_millis(10)).await;
            commands_tx.send(RaceCommand::Shutdown).unwrap();
        };
        let (summary, _) = tokio::join!(race.run(commands_rx), driver);
        handle.sale(1, 20000.);

        assert_eq!(summary.snapshot.get(1).unwrap().cumulative_progress, 0.);
        assert_eq!(summary.session.dispatched, 0);
    }
}
