use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Everything a push channel can tell its session controller.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelSignal {
    /// The channel opened after [`PushChannel::start`].
    Opened { connection_id: Option<String> },
    /// Opening after [`PushChannel::start`] failed. The channel does not retry on its own.
    OpenFailed { reason: String },
    /// The server invoked a client method.
    Invocation {
        target: String,
        arguments: Vec<Value>,
    },
    /// An open connection was lost, the channel is retrying with its own backoff.
    Dropped { reason: Option<String> },
    /// A retry succeeded.
    Restored { connection_id: Option<String> },
    /// Retries are exhausted, or the server refused any. The channel is closed.
    GaveUp { reason: Option<String> },
}

/// A server-push connection with its own reconnect policy.
///
/// Implementations do their network work in the background and report everything, including
/// the outcome of [`start`](Self::start), through [`next_signal`](Self::next_signal).
///
/// # Lifecycle
///
/// 1. `start()` begins opening the connection; an `Opened` or `OpenFailed` signal follows
/// 2. `next_signal()` is awaited repeatedly; it must be cancel safe
/// 3. `stop()` closes the connection and returns once no background work is left
#[allow(async_fn_in_trait)]
pub trait PushChannel {
    fn start(&mut self);

    async fn next_signal(&mut self) -> ChannelSignal;

    async fn stop(&mut self);
}

/// A scripted push channel for tests and offline demos.
///
/// Every `start()` emits the next queued start outcome, or `Opened` once the script is used up.
/// Further signals are injected through the paired [`MockChannelHandle`].
pub struct MockPushChannel {
    start_outcomes: VecDeque<ChannelSignal>,
    sender: UnboundedSender<ChannelSignal>,
    receiver: UnboundedReceiver<ChannelSignal>,
    stopped: bool,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

#[derive(Clone)]
pub struct MockChannelHandle {
    sender: UnboundedSender<ChannelSignal>,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl MockPushChannel {
    pub fn new() -> (Self, MockChannelHandle) {
        Self::with_start_outcomes(Vec::new())
    }

    pub fn with_start_outcomes(outcomes: Vec<ChannelSignal>) -> (Self, MockChannelHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let handle = MockChannelHandle {
            sender: sender.clone(),
            starts: starts.clone(),
            stops: stops.clone(),
        };
        (
            Self {
                start_outcomes: outcomes.into(),
                sender,
                receiver,
                stopped: false,
                starts,
                stops,
            },
            handle,
        )
    }
}

impl PushChannel for MockPushChannel {
    fn start(&mut self) {
        self.stopped = false;
        let attempt = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = self
            .start_outcomes
            .pop_front()
            .unwrap_or_else(|| ChannelSignal::Opened {
                connection_id: Some(format!("mock-{attempt}")),
            });
        let _ = self.sender.send(outcome);
    }

    async fn next_signal(&mut self) -> ChannelSignal {
        if !self.stopped {
            if let Some(signal) = self.receiver.recv().await {
                return signal;
            }
        }
        std::future::pending().await
    }

    async fn stop(&mut self) {
        self.stopped = true;
        while self.receiver.try_recv().is_ok() {}
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

impl MockChannelHandle {
    pub fn send(&self, signal: ChannelSignal) {
        let _ = self.sender.send(signal);
    }

    /// Inject a `SaleCompleted` invocation.
    pub fn sale(&self, person_id: i64, amount: f64) {
        self.send(ChannelSignal::Invocation {
            target: super::SALE_COMPLETED.to_string(),
            arguments: vec![serde_json::json!({ "personId": person_id, "amount": amount })],
        });
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}
