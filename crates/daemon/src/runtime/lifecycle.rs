//! Session lifecycle — keeps one agent's session awake and fed.
//!
//! One controller task per session owns four concerns:
//! - **idle timer**: shuts the session down after a quiet period (0 = off);
//!   reset by every inbound request and every wakeup send.
//! - **interval wakeup**: fires after N ms of *inactivity*; external
//!   activity pushes it out.
//! - **cron wakeup**: fires at fixed instants regardless of activity; when
//!   the agent is busy at fire time the occurrence is skipped and the next
//!   one scheduled.
//! - **inbox poll**: every 2 s; when busy, a `queued` flag defers the work
//!   to the drain that runs at the end of the current request.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use aw_context::{AppendOptions, ChannelKind, ContextProvider};
use aw_domain::error::Result;
use aw_domain::schedule::ResolvedSchedule;

use super::handle::WorkerHandle;
use super::worker::SendOptions;

/// Sent when an agent has no explicit schedule prompt.
pub const DEFAULT_WAKEUP_PROMPT: &str =
    "[Scheduled wakeup] You have been idle. Check if there are any pending tasks or updates to process.";

/// Inbox poll cadence.
pub const INBOX_POLL_INTERVAL: Duration = Duration::from_millis(2_000);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Controller
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Zero disables the idle timer.
    pub idle_timeout: Duration,
    pub schedule: Option<ResolvedSchedule>,
    pub inbox_poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::ZERO,
            schedule: None,
            inbox_poll_interval: INBOX_POLL_INTERVAL,
        }
    }
}

/// Introspection snapshot for `/workflows` listings.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerState {
    pub agent: String,
    pub pending_requests: u32,
    pub queued: bool,
    pub idle_timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

pub struct SessionController {
    agent: String,
    handle: Arc<dyn WorkerHandle>,
    context: Option<Arc<ContextProvider>>,
    cfg: ControllerConfig,
    pending_requests: AtomicU32,
    queued: AtomicBool,
    last_activity: Mutex<Instant>,
    poke: Notify,
    shutdown: CancellationToken,
    /// Agent names sent here are torn down by the daemon's idle reaper.
    idle_tx: mpsc::UnboundedSender<String>,
    /// Invoked after wakeup/inbox turns so state lands in the store.
    persist: Arc<dyn Fn() + Send + Sync>,
}

impl SessionController {
    pub fn new(
        agent: impl Into<String>,
        handle: Arc<dyn WorkerHandle>,
        context: Option<Arc<ContextProvider>>,
        cfg: ControllerConfig,
        idle_tx: mpsc::UnboundedSender<String>,
        persist: Arc<dyn Fn() + Send + Sync>,
    ) -> Arc<Self> {
        let agent = agent.into();

        // Coherence check: an interval wakeup longer than the idle timeout
        // never fires — the session is gone first.
        if cfg.idle_timeout > Duration::ZERO {
            if let Some(ResolvedSchedule::Interval { ms, .. }) = &cfg.schedule {
                if Duration::from_millis(*ms) > cfg.idle_timeout {
                    tracing::warn!(
                        agent = %agent,
                        wakeup_ms = ms,
                        idle_timeout_ms = cfg.idle_timeout.as_millis() as u64,
                        "interval wakeup exceeds idle timeout; the session will shut down before it fires"
                    );
                }
            }
        }

        Arc::new(Self {
            agent,
            handle,
            context,
            cfg,
            pending_requests: AtomicU32::new(0),
            queued: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
            poke: Notify::new(),
            shutdown: CancellationToken::new(),
            idle_tx,
            persist,
        })
    }

    /// Start the controller loop.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move { controller.run_loop().await })
    }

    // ── Request accounting ─────────────────────────────────────────

    /// Called by the HTTP layer before dispatching to the worker.
    pub fn begin_request(&self) {
        self.pending_requests.fetch_add(1, Ordering::SeqCst);
        self.touch();
    }

    /// Called at the end of every request; drains a queued inbox check.
    pub fn end_request(&self) {
        let prior = self.pending_requests.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prior > 0, "end_request without begin_request");
        self.touch();
        if self.queued.load(Ordering::SeqCst) && self.pending_requests.load(Ordering::SeqCst) == 0
        {
            self.poke.notify_one();
        }
    }

    /// Wake the controller to check the inbox now (mention wakeups).
    pub fn poke(&self) {
        self.poke.notify_one();
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn pending_requests(&self) -> u32 {
        self.pending_requests.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ControllerState {
        ControllerState {
            agent: self.agent.clone(),
            pending_requests: self.pending_requests(),
            queued: self.queued.load(Ordering::SeqCst),
            idle_timeout_ms: self.cfg.idle_timeout.as_millis() as u64,
            schedule: self.cfg.schedule.as_ref().map(|s| match s {
                ResolvedSchedule::Interval { ms, .. } => format!("interval:{ms}ms"),
                ResolvedSchedule::Cron { expr, .. } => format!("cron:{expr}"),
            }),
        }
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    // ── Main loop ──────────────────────────────────────────────────

    async fn run_loop(self: Arc<Self>) {
        let mut inbox_tick = tokio::time::interval(self.cfg.inbox_poll_interval);
        inbox_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        inbox_tick.reset(); // skip the immediate first tick

        let mut cron_next: Option<Instant> = None;
        let mut cron_broken = false;

        loop {
            let last = *self.last_activity.lock();
            let idle_deadline = (self.cfg.idle_timeout > Duration::ZERO)
                .then(|| last + self.cfg.idle_timeout);
            let interval_deadline = match &self.cfg.schedule {
                Some(ResolvedSchedule::Interval { ms, .. }) => {
                    Some(last + Duration::from_millis(*ms))
                }
                _ => None,
            };
            if cron_next.is_none() && !cron_broken {
                if let Some(ResolvedSchedule::Cron { expr, .. }) = &self.cfg.schedule {
                    match aw_domain::cron::ms_until_next_cron(expr, chrono::Local::now()) {
                        Ok(ms) => cron_next = Some(Instant::now() + Duration::from_millis(ms)),
                        Err(e) => {
                            tracing::error!(agent = %self.agent, error = %e, "cron schedule unusable");
                            cron_broken = true;
                        }
                    }
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,

                _ = sleep_at(idle_deadline), if idle_deadline.is_some() => {
                    // Activity may have pushed the real deadline out while
                    // we slept on a stale one; re-check before acting.
                    let due = *self.last_activity.lock() + self.cfg.idle_timeout <= Instant::now();
                    if due {
                        if self.pending_requests() == 0 {
                            tracing::info!(agent = %self.agent, "idle timeout reached, shutting down session");
                            let _ = self.idle_tx.send(self.agent.clone());
                            break;
                        }
                        // Busy at fire time: reset the timer.
                        self.touch();
                    }
                }

                _ = sleep_at(interval_deadline), if interval_deadline.is_some() => {
                    let Some(ResolvedSchedule::Interval { ms, prompt }) = self.cfg.schedule.clone() else {
                        continue;
                    };
                    let due = *self.last_activity.lock() + Duration::from_millis(ms) <= Instant::now();
                    if due {
                        if self.pending_requests() == 0 {
                            self.wakeup_send(prompt.as_deref()).await;
                        } else {
                            // Busy: re-arm and try again a full period later.
                            self.touch();
                        }
                    }
                }

                _ = sleep_at(cron_next), if cron_next.is_some() => {
                    if self.pending_requests() == 0 {
                        let prompt = match &self.cfg.schedule {
                            Some(ResolvedSchedule::Cron { prompt, .. }) => prompt.clone(),
                            _ => None,
                        };
                        self.wakeup_send(prompt.as_deref()).await;
                    } else {
                        tracing::debug!(agent = %self.agent, "cron fire skipped, agent busy");
                    }
                    // Fixed schedule: compute the next occurrence either way.
                    cron_next = None;
                }

                _ = inbox_tick.tick() => {
                    self.poll_inbox().await;
                }

                _ = self.poke.notified() => {
                    self.drain_inbox().await;
                }
            }
        }
    }

    // ── Wakeups ────────────────────────────────────────────────────

    async fn wakeup_send(&self, prompt: Option<&str>) {
        let prompt = prompt.unwrap_or(DEFAULT_WAKEUP_PROMPT);
        tracing::info!(agent = %self.agent, "scheduled wakeup");

        self.begin_request();
        match self.handle.send(prompt, SendOptions::default()).await {
            Ok(_) => (self.persist)(),
            Err(e) => {
                tracing::warn!(agent = %self.agent, error = %e, "wakeup send failed");
            }
        }
        self.end_request();
    }

    // ── Inbox ──────────────────────────────────────────────────────

    async fn poll_inbox(&self) {
        if self.context.is_none() {
            return;
        }
        if self.pending_requests() > 0 {
            self.queued.store(true, Ordering::SeqCst);
            return;
        }
        if let Err(e) = self.check_inbox().await {
            tracing::warn!(agent = %self.agent, error = %e, "inbox poll failed");
        }
    }

    /// End-of-request drain: process immediately if work queued up while
    /// the agent was busy.
    async fn drain_inbox(&self) {
        if self.context.is_none() || self.pending_requests() > 0 {
            return;
        }
        self.queued.store(false, Ordering::SeqCst);
        if let Err(e) = self.check_inbox().await {
            tracing::warn!(agent = %self.agent, error = %e, "inbox drain failed");
        }
    }

    async fn check_inbox(&self) -> Result<()> {
        let Some(context) = &self.context else {
            return Ok(());
        };
        let entries = context.inbox(&self.agent)?;
        if entries.is_empty() {
            return Ok(());
        }
        self.process_inbox(context.clone(), entries).await;
        Ok(())
    }

    async fn process_inbox(
        &self,
        context: Arc<ContextProvider>,
        entries: Vec<aw_context::ChannelEntry>,
    ) {
        let latest_id = entries.last().map(|e| e.id).unwrap_or(0);

        self.begin_request();
        // Counters and timers must settle no matter how processing goes.
        let outcome: Result<()> = async {
            let mut senders: Vec<&str> = entries.iter().map(|e| e.from.as_str()).collect();
            senders.dedup();
            context.append_channel(
                &self.agent,
                &format!("read {} message(s) from {}", entries.len(), senders.join(", ")),
                AppendOptions { kind: ChannelKind::System, ..Default::default() },
            )?;

            let prompt = entries
                .iter()
                .map(|e| format!("[{}]: {}", e.from, e.content))
                .collect::<Vec<_>>()
                .join("\n\n");

            let response = self.handle.send(&prompt, SendOptions::default()).await?;

            context.append_channel(&self.agent, &response.content, AppendOptions::default())?;
            context.ack_inbox(&self.agent, latest_id)?;
            Ok(())
        }
        .await;

        if let Err(e) = outcome {
            tracing::warn!(agent = %self.agent, error = %e, "inbox processing failed");
        }
        (self.persist)();
        self.end_request();
    }
}

/// A sleep that never completes when no deadline is set. Always used with
/// a `, if deadline.is_some()` select guard.
fn sleep_at(deadline: Option<Instant>) -> tokio::time::Sleep {
    tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now))
}
