//! Background refresh loop.
//!
//! One tokio interval drives both cadences: every tick fetches the newest
//! window of the active conversation, and every Nth tick also refreshes
//! presence. Ticks with no session or no active peer issue no requests and
//! do not count toward N.
//!
//! A run is an owned resource. [`Poller::stop`] closes the run's gate
//! under its lock and aborts the task; every state change a tick makes
//! goes through the gate, so nothing from a stopped run is applied even if
//! its request was already in flight. Each run counts its own active
//! ticks, so a restarted loop begins a fresh presence cadence.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::api::Api;
use crate::contacts::ContactDirectory;
use crate::conversation::{ConversationStore, MergeOutcome};
use crate::error::SyncError;
use crate::event::{self, SyncEvent};
use crate::session::{SessionHandle, SessionStatus};
use crate::transport::Transport;

/// Poll cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Time between ticks.
    pub interval: Duration,
    /// Refresh presence on every Nth active tick; zero disables it.
    pub presence_every: u64,
    /// Messages fetched per poll.
    pub window: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            presence_every: 10,
            window: 20,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// A session and an active peer were present, so requests were made.
    pub active: bool,
    /// The applied message merge, if the fetch succeeded and was current.
    pub merged: Option<MergeOutcome>,
    /// A presence snapshot was applied.
    pub presence_refreshed: bool,
    /// Requests in this tick that failed.
    pub failures: usize,
}

/// Open/closed flag guarding state changes from one run, plus the run's
/// active-tick count.
#[derive(Debug)]
struct PollGate {
    open: Mutex<bool>,
    ticks: AtomicU64,
}

impl PollGate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(true),
            ticks: AtomicU64::new(0),
        })
    }

    fn close(&self) {
        *self.open.lock() = false;
    }

    fn is_open(&self) -> bool {
        *self.open.lock()
    }

    /// Run `f` only while open. The lock is held for the duration, so
    /// [`close`](Self::close) waits for an in-progress application.
    fn apply<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let open = self.open.lock();
        if *open { Some(f()) } else { None }
    }
}

struct PollRun {
    gate: Arc<PollGate>,
    handle: JoinHandle<()>,
}

struct PollContext<T: Transport> {
    api: Arc<Api<T>>,
    session: Arc<SessionHandle>,
    conversation: Arc<ConversationStore<T>>,
    contacts: Arc<ContactDirectory<T>>,
    config: PollerConfig,
    event_tx: mpsc::Sender<SyncEvent>,
}

/// Owner of the background refresh task.
pub struct Poller<T: Transport + 'static> {
    ctx: Arc<PollContext<T>>,
    run: Mutex<Option<PollRun>>,
}

impl<T: Transport + 'static> Poller<T> {
    /// Create a stopped poller.
    pub fn new(
        api: Arc<Api<T>>,
        session: Arc<SessionHandle>,
        conversation: Arc<ConversationStore<T>>,
        contacts: Arc<ContactDirectory<T>>,
        config: PollerConfig,
        event_tx: mpsc::Sender<SyncEvent>,
    ) -> Self {
        Self {
            ctx: Arc::new(PollContext {
                api,
                session,
                conversation,
                contacts,
                config,
                event_tx,
            }),
            run: Mutex::new(None),
        }
    }

    /// Spawn the loop. Returns `false` if it was already running.
    ///
    /// The first tick fires one interval after this call.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(&self) -> bool {
        let mut run = self.run.lock();
        if run.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }
        let gate = PollGate::new();
        let handle = tokio::spawn(run_loop(Arc::clone(&self.ctx), Arc::clone(&gate)));
        *run = Some(PollRun { gate, handle });
        tracing::info!(interval = ?self.ctx.config.interval, "poller started");
        true
    }

    /// Stop the loop. Returns `false` if it was not running.
    ///
    /// Once this returns, no result from the stopped run is applied.
    pub fn stop(&self) -> bool {
        let Some(run) = self.run.lock().take() else {
            return false;
        };
        run.gate.close();
        run.handle.abort();
        tracing::info!("poller stopped");
        true
    }

    /// Stop the loop and wait for its task to finish.
    pub async fn shutdown(&self) {
        let run = self.run.lock().take();
        if let Some(run) = run {
            run.gate.close();
            run.handle.abort();
            // The task was aborted; its JoinError carries nothing useful.
            let _ = run.handle.await;
            tracing::info!("poller shut down");
        }
    }

    /// `true` while a run is live.
    pub fn is_running(&self) -> bool {
        self.run
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Run one tick now, outside the timer.
    ///
    /// While a run is live the tick counts toward its cadence and is
    /// discarded if that run is stopped meanwhile.
    pub async fn tick_once(&self) -> TickReport {
        let gate = self.live_gate().unwrap_or_else(PollGate::new);
        self.ctx.tick(&gate).await
    }

    /// Active ticks counted by the live run; zero when stopped.
    pub fn active_ticks(&self) -> u64 {
        self.live_gate()
            .map_or(0, |gate| gate.ticks.load(Ordering::SeqCst))
    }

    fn live_gate(&self) -> Option<Arc<PollGate>> {
        self.run
            .lock()
            .as_ref()
            .filter(|r| !r.handle.is_finished())
            .map(|r| Arc::clone(&r.gate))
    }
}

impl<T: Transport + 'static> Drop for Poller<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop<T: Transport + 'static>(ctx: Arc<PollContext<T>>, gate: Arc<PollGate>) {
    let period = ctx.config.interval;
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        if !gate.is_open() {
            break;
        }
        ctx.tick(&gate).await;
    }
}

impl<T: Transport> PollContext<T> {
    async fn tick(&self, gate: &PollGate) -> TickReport {
        let mut report = TickReport::default();
        if self.session.credential().is_none() {
            return report;
        }
        let Some(target) = self.conversation.poll_target() else {
            return report;
        };
        report.active = true;
        let tick = gate.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(tick, peer = %target.peer, "poll tick");

        match self.conversation.fetch_window(target, self.config.window).await {
            Ok(messages) => {
                report.merged = gate
                    .apply(|| self.conversation.merge_for(target, &messages))
                    .flatten();
            }
            Err(error) => {
                report.failures += 1;
                self.poll_failed(gate, error).await;
            }
        }

        if self.config.presence_every > 0 && tick % self.config.presence_every == 0 {
            match self.contacts.fetch_presence().await {
                Ok(snapshot) => {
                    report.presence_refreshed = gate
                        .apply(|| self.contacts.apply_presence(snapshot))
                        .unwrap_or(false);
                }
                Err(error) => {
                    report.failures += 1;
                    self.poll_failed(gate, error).await;
                }
            }
        }

        report
    }

    async fn poll_failed(&self, gate: &PollGate, error: SyncError) {
        if error.is_retryable() {
            tracing::warn!(error = %error, "poll failed");
        } else {
            tracing::error!(error = %error, "poll failed, reply not understood");
        }
        let rejected = matches!(error, SyncError::Rejected { .. });
        gate.apply(|| event::emit(&self.event_tx, SyncEvent::PollFailed { error }));

        // A rejection may mean the credential expired; ask the backend. A
        // stopped run leaves the session alone.
        if !rejected || !gate.is_open() {
            return;
        }
        let epoch = self.session.epoch();
        if self.session.check(&self.api).await != SessionStatus::Expired {
            return;
        }
        gate.apply(|| {
            if self.session.expire(epoch) {
                self.conversation.reset();
                event::emit(&self.event_tx, SyncEvent::SessionInvalidated);
            }
        });
    }
}
