//! Wake reporting scheduler
//!
//! Holds one pending categorization per page and decides when to report it:
//! - page teardown always reports the page's record
//! - a wake notification reports every record categorized at least
//!   `wake_timeout_ms` ago
//! - idle and active signals only update bookkeeping
//!
//! A record leaves the pending set before it is emitted, so it is reported
//! at most once.


use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::{Environment, SchedulerConfig};
use crate::error::SchedulerError;
use crate::idle::{IdleService, IdleSignal, IdleSubscription};
use crate::record::{CategorizationPayload, PageId, PendingRecord};
use crate::telemetry::{CategorizationEvent, TelemetrySink};

/// Last activity reported by the idle service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    Active,
    Idle,
}

/// Why a record was reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportReason {
    Wake,
    Teardown,
    Shutdown,
}

impl fmt::Display for ReportReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Wake => "wake",
            Self::Teardown => "teardown",
            Self::Shutdown => "shutdown",
        })
    }
}

pub struct WakeReportingScheduler<S: TelemetrySink> {
    config: SchedulerConfig,
    environment: Environment,
    idle_service: Arc<dyn IdleService>,
    clock: Arc<dyn Clock>,
    sink: S,
    pending: BTreeMap<PageId, PendingRecord>,
    subscription: Option<IdleSubscription>,
    activity: ActivityState,
    reported: u64,
}

impl<S: TelemetrySink> WakeReportingScheduler<S> {
    /// Create an uninitialized scheduler using the system clock
    pub fn new(
        config: SchedulerConfig,
        environment: Environment,
        idle_service: Arc<dyn IdleService>,
        sink: S,
    ) -> Self {
        Self {
            config,
            environment,
            idle_service,
            clock: Arc::new(SystemClock),
            sink,
            pending: BTreeMap::new(),
            subscription: None,
            activity: ActivityState::Active,
            reported: 0,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Subscribe to the idle service. Does nothing if already subscribed.
    ///
    /// # Errors
    ///
    /// Returns an error if the idle service refuses the subscription.
    pub fn init(&mut self) -> Result<(), SchedulerError> {
        if self.subscription.is_some() {
            log::debug!("Scheduler already initialized");
            return Ok(());
        }

        let subscription = self.idle_service.subscribe()?;
        log::info!(
            "Wake reporting scheduler initialized (subscription {:?}, wake timeout {}ms)",
            subscription.id(),
            self.config.wake_timeout_ms
        );
        self.subscription = Some(subscription);
        self.activity = ActivityState::Active;
        Ok(())
    }

    /// Unsubscribe from the idle service. Pending records are kept.
    pub fn uninit(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.idle_service.unsubscribe(subscription.id());
            log::info!(
                "Wake reporting scheduler uninitialized ({} record(s) still pending)",
                self.pending.len()
            );
        }
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.subscription.is_some()
    }

    /// Store a page's categorization until it is reported.
    ///
    /// Returns `Ok(false)` if reporting is disabled and the payload was dropped.
    /// A page that is still pending has its record replaced.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Payload`] if the payload is malformed; nothing is stored.
    pub fn record_categorization(
        &mut self,
        page: PageId,
        payload: CategorizationPayload,
    ) -> Result<bool, SchedulerError> {
        payload
            .validate()
            .map_err(|source| SchedulerError::Payload { page, source })?;

        if !self.config.enabled {
            log::debug!("Categorization reporting disabled, dropping record for page {page}");
            return Ok(false);
        }

        let record = PendingRecord::new(page, payload, self.clock.now());
        if self.pending.insert(page, record).is_some() {
            log::debug!("Replaced pending categorization for page {page}");
        } else {
            log::debug!("Recorded categorization for page {page}");
        }
        Ok(true)
    }

    /// Report every record old enough for the wake timeout. Returns how many were reported.
    pub fn notify_wake(&mut self) -> usize {
        self.activity = ActivityState::Active;
        if self.pending.is_empty() {
            return 0;
        }

        let now = self.clock.now();
        let timeout = i64::try_from(self.config.wake_timeout_ms).unwrap_or(i64::MAX);
        let eligible: Vec<PageId> = self
            .pending
            .values()
            .filter(|record| {
                let elapsed = record.elapsed_ms(now);
                if elapsed < timeout {
                    log::debug!(
                        "Page {} categorized {elapsed}ms ago, below wake timeout {timeout}ms",
                        record.page
                    );
                    false
                } else {
                    true
                }
            })
            .map(|record| record.page)
            .collect();

        for page in &eligible {
            if let Some(record) = self.pending.remove(page) {
                self.report(&record, ReportReason::Wake);
            }
        }
        eligible.len()
    }

    /// Report the page's pending record, if any. Returns whether one was reported.
    pub fn notify_teardown(&mut self, page: PageId) -> bool {
        match self.pending.remove(&page) {
            Some(record) => {
                self.report(&record, ReportReason::Teardown);
                true
            }
            None => {
                log::debug!("No pending categorization for closed page {page}");
                false
            }
        }
    }

    pub fn notify_idle(&mut self) {
        self.activity = ActivityState::Idle;
        log::debug!("User idle ({} record(s) pending)", self.pending.len());
    }

    pub fn notify_active(&mut self) {
        self.activity = ActivityState::Active;
        log::debug!("User active ({} record(s) pending)", self.pending.len());
    }

    /// Dispatch one idle service signal. Returns the number of records reported.
    pub fn handle_signal(&mut self, signal: IdleSignal) -> usize {
        match signal {
            IdleSignal::Idle => {
                self.notify_idle();
                0
            }
            IdleSignal::Active => {
                self.notify_active();
                0
            }
            IdleSignal::WakeNotification => self.notify_wake(),
        }
    }

    /// Handle every signal queued on the subscription, in arrival order.
    /// Returns the number of signals handled.
    pub fn process_signals(&mut self) -> usize {
        let mut handled = 0;
        while let Some(signal) = self.subscription.as_mut().and_then(IdleSubscription::try_next) {
            self.handle_signal(signal);
            handled += 1;
        }
        handled
    }

    /// Change the wake timeout used by later wake notifications
    pub fn reconfigure(&mut self, wake_timeout_ms: u64) {
        log::info!(
            "Wake timeout changed from {}ms to {wake_timeout_ms}ms",
            self.config.wake_timeout_ms
        );
        self.config.wake_timeout_ms = wake_timeout_ms;
    }

    /// Enable or disable recording of new categorizations. Pending records are unaffected.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    /// Report every pending record in page order and flush the sink.
    /// Returns the number of records reported.
    pub fn flush_all(&mut self) -> usize {
        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();
        for record in pending.into_values() {
            self.report(&record, ReportReason::Shutdown);
        }
        if let Err(e) = self.sink.flush() {
            log::error!("Failed to flush telemetry sink: {e}");
        }
        count
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_pending(&self, page: PageId) -> bool {
        self.pending.contains_key(&page)
    }

    #[must_use]
    pub const fn activity(&self) -> ActivityState {
        self.activity
    }

    #[must_use]
    pub const fn wake_timeout_ms(&self) -> u64 {
        self.config.wake_timeout_ms
    }

    /// Records reported since creation
    #[must_use]
    pub const fn reported_count(&self) -> u64 {
        self.reported
    }

    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    fn report(&mut self, record: &PendingRecord, reason: ReportReason) {
        let event = CategorizationEvent::from_record(record, &self.environment);
        log::info!(
            "Reporting categorization for page {} ({reason}, provider {})",
            record.page,
            record.payload.provider.provider
        );
        self.reported += 1;
        if let Err(e) = self.sink.emit(event) {
            log::error!(
                "Failed to emit categorization for page {}: {e}",
                record.page
            );
        }
    }
}

impl<S: TelemetrySink> Drop for WakeReportingScheduler<S> {
    fn drop(&mut self) {
        self.uninit();
        if !self.pending.is_empty() {
            log::warn!(
                "Dropping scheduler with {} unreported categorization(s)",
                self.pending.len()
            );
        }
    }
}
