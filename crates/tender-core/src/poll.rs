//! Poll manager
//!
//! Owns one periodic timer per (project, kind) pair:
//! - Starting a timer for a pair replaces (aborts) the previous one
//! - Each tick spawns one status check; checks may overlap
//! - Timers stop on terminal status, explicit cancellation or project switch
//!
//! Stopping a timer never cancels checks already in flight; those are
//! reconciled by the generation guard on the workspace.

use crate::types::{ProjectId, RunId, RunStatus, TaskKind};
use crate::view::{NoticeUpdate, Ticket};
use crate::workspace::Shared;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Timer registry key
pub type TimerKey = (ProjectId, TaskKind);

#[derive(Debug)]
struct PollTimer {
    run_id: RunId,
    serial: u64,
    handle: JoinHandle<()>,
}

/// Registry of live poll timers
#[derive(Debug, Default)]
pub struct PollManager {
    timers: DashMap<TimerKey, PollTimer>,
    next_serial: AtomicU64,
}

impl PollManager {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start polling `run_id` for a pair, replacing any live timer of that pair.
    ///
    /// `check` runs once immediately and then every `interval`; it receives
    /// the serial of the timer that issued it, for use with [`stop_if`].
    /// With `skip_in_flight` a tick is skipped while the previous check of the
    /// same timer is still running.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// [`stop_if`]: PollManager::stop_if
    pub fn start<F, Fut>(
        &self,
        key: TimerKey,
        run_id: RunId,
        interval: Duration,
        skip_in_flight: bool,
        check: F,
    ) -> u64
    where
        F: Fn(u64) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(
            project = %key.0,
            kind = %key.1,
            run_id = %run_id,
            serial,
            "poll timer started"
        );

        // Holding the entry keeps a fast first check from racing the insert.
        let slot = self.timers.entry(key);
        let handle = tokio::spawn(poll_loop(serial, interval, skip_in_flight, check));
        let timer = PollTimer {
            run_id,
            serial,
            handle,
        };
        match slot {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(timer);
                previous.handle.abort();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(timer);
            }
        }
        serial
    }

    /// Stop the timer of one pair, or every timer of the project when `kind`
    /// is `None`. Safe to call on pairs with no live timer.
    pub fn stop(&self, project: &ProjectId, kind: Option<TaskKind>) {
        match kind {
            Some(kind) => {
                if let Some((_, timer)) = self.timers.remove(&(project.clone(), kind)) {
                    timer.handle.abort();
                    tracing::debug!(project = %project, kind = %kind, "poll timer stopped");
                }
            }
            None => {
                let mut stopped = 0usize;
                self.timers.retain(|(owner, _), timer| {
                    if owner == project {
                        timer.handle.abort();
                        stopped += 1;
                        false
                    } else {
                        true
                    }
                });
                if stopped > 0 {
                    tracing::debug!(project = %project, stopped, "poll timers stopped");
                }
            }
        }
    }

    /// Stop the timer of a pair only if it is still the one with `serial`.
    /// Returns whether a timer was removed.
    pub fn stop_if(&self, key: &TimerKey, serial: u64) -> bool {
        match self.timers.remove_if(key, |_, timer| timer.serial == serial) {
            Some((_, timer)) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Stop every timer
    pub fn stop_all(&self) {
        self.timers.retain(|_, timer| {
            timer.handle.abort();
            false
        });
    }

    /// Check whether a pair has a live timer
    #[inline]
    #[must_use]
    pub fn is_live(&self, project: &ProjectId, kind: TaskKind) -> bool {
        self.timers.contains_key(&(project.clone(), kind))
    }

    /// Run polled by each live timer
    #[must_use]
    pub fn live(&self) -> BTreeMap<TimerKey, RunId> {
        self.timers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().run_id.clone()))
            .collect()
    }

    /// Number of live timers
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Check whether no timer is live
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl Drop for PollManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Timer body (runs in its own tokio task until aborted)
async fn poll_loop<F, Fut>(serial: u64, interval: Duration, skip_in_flight: bool, check: F)
where
    F: Fn(u64) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let in_flight = Arc::new(AtomicBool::new(false));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // first tick completes immediately
        ticker.tick().await;

        if skip_in_flight && in_flight.swap(true, Ordering::AcqRel) {
            tracing::trace!(serial, "previous check still in flight, skipping tick");
            continue;
        }

        let pending = check(serial);
        let flag = Arc::clone(&in_flight);
        tokio::spawn(async move {
            pending.await;
            if skip_in_flight {
                flag.store(false, Ordering::Release);
            }
        });
    }
}

impl Shared {
    /// Attach a poll timer to an existing run
    pub(crate) fn start_polling(self: &Arc<Self>, ticket: Ticket, kind: TaskKind, run_id: RunId) {
        let weak = Arc::downgrade(self);
        let key = (ticket.project.clone(), kind);
        let polled = run_id.clone();
        self.timers.start(
            key,
            run_id,
            self.config.poll_interval(),
            self.config.skip_tick_while_in_flight,
            move |serial| {
                let weak = weak.clone();
                let ticket = ticket.clone();
                let run_id = polled.clone();
                async move {
                    if let Some(shared) = weak.upgrade() {
                        shared.check_run(ticket, kind, run_id, serial).await;
                    }
                }
            },
        );
    }

    /// One status check of a polled run
    async fn check_run(
        self: Arc<Self>,
        ticket: Ticket,
        kind: TaskKind,
        run_id: RunId,
        serial: u64,
    ) {
        let key = (ticket.project.clone(), kind);

        let record = match self.backend.get_run(&run_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(
                    project = %ticket.project,
                    kind = %kind,
                    run_id = %run_id,
                    "status check failed: {}",
                    e
                );
                if !self.is_current(&ticket) {
                    self.timers.stop_if(&key, serial);
                }
                return;
            }
        };

        if record.id != run_id || record.kind != kind || record.project_id != ticket.project {
            tracing::warn!(
                run_id = %run_id,
                got = %record.id,
                "backend returned a record for another run, stopping poll timer"
            );
            self.timers.stop_if(&key, serial);
            return;
        }

        if !self.is_current(&ticket) {
            tracing::debug!(
                project = %ticket.project,
                kind = %kind,
                status = %record.status,
                "stale status check, caching only"
            );
            self.timers.stop_if(&key, serial);
            self.cache.apply_observed(&ticket.project, kind, record);
            return;
        }

        match record.status {
            RunStatus::Success => {
                self.timers.stop_if(&key, serial);
                self.complete_run(&ticket, kind, record).await;
            }
            RunStatus::Failed => {
                self.timers.stop_if(&key, serial);
                self.fail_run(&ticket, kind, record);
            }
            RunStatus::Running => {
                if self
                    .cache
                    .apply_observed(&ticket.project, kind, record)
                    .applied()
                {
                    self.project(&ticket, kind, NoticeUpdate::Keep);
                }
                if kind.supports_preview() && self.config.preview_partial_results {
                    self.merge_preview(&ticket, kind, &run_id).await;
                }
            }
            RunStatus::Pending => {
                if self
                    .cache
                    .apply_observed(&ticket.project, kind, record)
                    .applied()
                {
                    self.project(&ticket, kind, NoticeUpdate::Keep);
                }
            }
        }
    }

    async fn merge_preview(&self, ticket: &Ticket, kind: TaskKind, run_id: &RunId) {
        match self.backend.fetch_partial(&ticket.project, kind).await {
            Ok(Some(partial)) => {
                if self.cache.merge_partial(&ticket.project, kind, run_id, partial) {
                    self.project(ticket, kind, NoticeUpdate::Keep);
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(
                    project = %ticket.project,
                    kind = %kind,
                    "preview fetch failed: {}",
                    e
                );
            }
        }
    }
}
