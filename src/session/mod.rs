pub mod channel;
pub mod protocol;
pub mod signalr;

use std::fmt;

use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::SalesRaceError;
use crate::roster::{CompetitorId, ProgressEvent};

pub use channel::{ChannelSignal, MockChannelHandle, MockPushChannel, PushChannel};
pub use signalr::{HubConfig, HubConnection};

/// Name of the hub method announcing a sale.
pub const SALE_COMPLETED: &str = "SaleCompleted";

pub type EventHandler = Box<dyn FnMut(ProgressEvent) + Send>;
pub type StateObserver = Box<dyn FnMut(&StateTransition) + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectivityState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectivityState {
    pub const ALL: [ConnectivityState; 4] = [
        ConnectivityState::Disconnected,
        ConnectivityState::Connecting,
        ConnectivityState::Connected,
        ConnectivityState::Reconnecting,
    ];

    /// The state `trigger` leads to, or `None` when the transition is not allowed.
    pub fn on(self, trigger: Trigger) -> Option<ConnectivityState> {
        use ConnectivityState::*;
        match (self, trigger) {
            (_, Trigger::Disconnect) => Some(Disconnected),
            (Disconnected, Trigger::Connect) => Some(Connecting),
            (Connecting, Trigger::ChannelOpen) => Some(Connected),
            (Connecting, Trigger::OpenFailed) => Some(Disconnected),
            (Connected, Trigger::TransportDrop) => Some(Reconnecting),
            (Reconnecting, Trigger::ChannelRestored) => Some(Connected),
            (Reconnecting, Trigger::GiveUp) => Some(Disconnected),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectivityState::Disconnected => "Disconnected",
            ConnectivityState::Connecting => "Connecting",
            ConnectivityState::Connected => "Connected",
            ConnectivityState::Reconnecting => "Reconnecting",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Trigger {
    Connect,
    ChannelOpen,
    OpenFailed,
    TransportDrop,
    ChannelRestored,
    GiveUp,
    Disconnect,
}

impl Trigger {
    pub const ALL: [Trigger; 7] = [
        Trigger::Connect,
        Trigger::ChannelOpen,
        Trigger::OpenFailed,
        Trigger::TransportDrop,
        Trigger::ChannelRestored,
        Trigger::GiveUp,
        Trigger::Disconnect,
    ];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateTransition {
    pub from: ConnectivityState,
    pub to: ConnectivityState,
    pub trigger: Trigger,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub dispatched: u64,
    /// Events received outside `Connected`, for unknown targets, or with a malformed payload.
    pub dropped: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaleCompleted {
    person_id: CompetitorId,
    amount: f64,
}

/// Turn the arguments of a `SaleCompleted` invocation into a progress event.
pub fn parse_sale_completed(arguments: &[Value]) -> Result<ProgressEvent, SalesRaceError> {
    let payload = arguments
        .first()
        .ok_or_else(|| SalesRaceError::MalformedEvent {
            reason: "missing sale payload".to_string(),
        })?;
    let sale: SaleCompleted =
        serde_json::from_value(payload.clone()).map_err(|e| SalesRaceError::MalformedEvent {
            reason: e.to_string(),
        })?;
    if !sale.amount.is_finite() || sale.amount < 0. {
        return Err(SalesRaceError::MalformedEvent {
            reason: format!("amount {} is not a valid sales total", sale.amount),
        });
    }

    Ok(ProgressEvent {
        competitor_id: sale.person_id,
        new_cumulative_progress: sale.amount,
    })
}

/// Owns the push channel and its connectivity state.
///
/// Transitions follow [`ConnectivityState::on`]; anything else the channel reports is logged and
/// ignored. Observers run synchronously, in registration order, for every transition that
/// changes the state. The progress handler only ever runs while `Connected`.
pub struct SessionController<C: PushChannel> {
    channel: C,
    state: ConnectivityState,
    handler: Option<EventHandler>,
    observers: Vec<StateObserver>,
    terminated: bool,
    stats: SessionStats,
}

impl<C: PushChannel> SessionController<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            state: ConnectivityState::Disconnected,
            handler: None,
            observers: Vec::new(),
            terminated: false,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// `true` once [`disconnect`](Self::disconnect) was called.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn observe(&mut self, observer: impl FnMut(&StateTransition) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Register the progress handler.
    ///
    /// # Errors
    ///
    /// Returns [`SalesRaceError::HandlerAlreadyRegistered`] if a handler is already registered.
    pub fn on_event(
        &mut self,
        handler: impl FnMut(ProgressEvent) + Send + 'static,
    ) -> Result<(), SalesRaceError> {
        if self.handler.is_some() {
            return Err(SalesRaceError::HandlerAlreadyRegistered);
        }
        self.handler = Some(Box::new(handler));
        Ok(())
    }

    /// Start opening the channel. The outcome arrives later as a channel signal.
    pub fn connect(&mut self) {
        if self.terminated {
            warn!("Ignoring connect on a session that was disconnected");
            return;
        }
        if self.transition(Trigger::Connect) {
            self.channel.start();
        }
    }

    /// Wait for the channel to report something. Cancel safe.
    pub async fn next_signal(&mut self) -> ChannelSignal {
        self.channel.next_signal().await
    }

    pub fn handle_signal(&mut self, signal: ChannelSignal) {
        if self.terminated {
            debug!("Session disconnected, discarding {:?}", signal);
            return;
        }

        match signal {
            ChannelSignal::Invocation { target, arguments } => self.dispatch(&target, &arguments),
            ChannelSignal::Opened { connection_id } => {
                info!("Push channel open (connection id {:?})", connection_id);
                self.transition(Trigger::ChannelOpen);
            }
            ChannelSignal::OpenFailed { reason } => {
                warn!("Push channel failed to open: {}", reason);
                self.transition(Trigger::OpenFailed);
            }
            ChannelSignal::Dropped { reason } => {
                warn!("Push channel dropped: {:?}", reason);
                self.transition(Trigger::TransportDrop);
            }
            ChannelSignal::Restored { connection_id } => {
                info!("Push channel restored (connection id {:?})", connection_id);
                self.transition(Trigger::ChannelRestored);
            }
            ChannelSignal::GaveUp { reason } => {
                warn!("Push channel gave up reconnecting: {:?}", reason);
                self.transition(Trigger::GiveUp);
            }
        }
    }

    /// Tear the session down.
    ///
    /// The handler is released before the channel is closed, so once this returns no progress
    /// event can reach it, whatever the transport still delivers.
    pub async fn disconnect(&mut self) {
        self.handler = None;
        self.terminated = true;
        self.transition(Trigger::Disconnect);
        self.channel.stop().await;
        info!("Session disconnected");
    }

    fn dispatch(&mut self, target: &str, arguments: &[Value]) {
        if self.state != ConnectivityState::Connected {
            warn!("Dropping '{}' received while {}", target, self.state);
            self.stats.dropped += 1;
            return;
        }
        if target != SALE_COMPLETED {
            debug!("Ignoring hub invocation '{}'", target);
            self.stats.dropped += 1;
            return;
        }

        match parse_sale_completed(arguments) {
            Ok(event) => match self.handler.as_mut() {
                Some(handler) => {
                    debug!(
                        "Sale for {}: total {}",
                        event.competitor_id, event.new_cumulative_progress
                    );
                    handler(event);
                    self.stats.dispatched += 1;
                }
                None => {
                    warn!("No progress handler registered, dropping sale event");
                    self.stats.dropped += 1;
                }
            },
            Err(e) => {
                warn!("Dropping sale event: {}", e);
                self.stats.dropped += 1;
            }
        }
    }

    fn transition(&mut self, trigger: Trigger) -> bool {
        let from = self.state;
        let Some(to) = from.on(trigger) else {
            warn!("Ignoring {:?} while {}", trigger, from);
            return false;
        };
        if from == to {
            return true;
        }

        self.state = to;
        debug!("Session {} -> {} on {:?}", from, to, trigger);
        let transition = StateTransition { from, to, trigger };
        for observer in self.observers.iter_mut() {
            observer(&transition);
        }
        true
    }
}
