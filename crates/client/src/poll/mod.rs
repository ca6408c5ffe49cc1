//! Periodic refresh that pauses while the page is hidden.
//!
//! ### Phases
//! - `Idle`: nothing armed, nothing running
//! - `Scheduled`: one timer armed for `interval` after it was set
//! - `Running`: one refresh in flight
//!
//! ### Guarantees
//! - At most one refresh in flight; a tick that finds one running is dropped
//! - At most one armed timer; re-arming cancels the previous one
//! - The next timer is armed only after a refresh completes, and only while
//!   polling is active and the page is visible
//! - Refresh failures (errors and panics) are logged and never stop polling
//!
//! All timers run on the ambient tokio runtime, so the scheduler must be
//! created and driven from inside one.

pub mod visibility;

pub use visibility::{ManualVisibility, VisibilitySignal};

use async_trait::async_trait;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tabsync_core::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Caller-supplied refresh operation.
#[async_trait]
pub trait Refresh: Send + Sync {
    async fn refresh(&self) -> Result<(), Error>;
}

#[async_trait]
impl<F, Fut> Refresh for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    async fn refresh(&self) -> Result<(), Error> {
        (self)().await
    }
}

/// Observable scheduler phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Scheduled,
    Running,
}

#[derive(Debug)]
struct PollState {
    active: bool,
    visible: bool,
    interval: Duration,
    in_flight: bool,
    was_active_before_hide: bool,
    timer: Option<JoinHandle<()>>,
    /// Bumped whenever the armed timer changes; a woken timer with an older
    /// generation must not tick.
    generation: u64,
}

struct Shared {
    state: Mutex<PollState>,
    refresh: Arc<dyn Refresh>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PollState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm(self: &Arc<Self>, state: &mut PollState) {
        Self::cancel(state);
        let generation = state.generation;
        let deadline = Instant::now() + state.interval;
        let shared = Arc::clone(self);

        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if shared.claim_timer(generation) {
                shared.tick().await;
            }
        }));
    }

    fn cancel(state: &mut PollState) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation = state.generation.wrapping_add(1);
    }

    /// Detach a fired timer so cancelling can no longer abort its refresh.
    fn claim_timer(&self, generation: u64) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }
        state.timer = None;
        true
    }

    async fn tick(self: &Arc<Self>) {
        {
            let mut state = self.lock();
            if !state.active || !state.visible || state.in_flight {
                tracing::debug!(
                    active = state.active,
                    visible = state.visible,
                    in_flight = state.in_flight,
                    "tick skipped"
                );
                return;
            }
            state.in_flight = true;
        }

        match AssertUnwindSafe(self.refresh.refresh()).catch_unwind().await {
            Ok(Ok(())) => tracing::debug!("refresh completed"),
            Ok(Err(err)) => tracing::error!(error = %err, "refresh failed; polling continues"),
            Err(_) => tracing::error!("refresh panicked; polling continues"),
        }

        let mut state = self.lock();
        state.in_flight = false;
        if state.active && state.visible {
            self.arm(&mut state);
        }
    }

    /// Apply one notification from the visibility channel.
    ///
    /// The channel keeps only the latest value, so a notification carrying the
    /// state already applied means the page went the other way and back before
    /// the listener ran. A collapsed hide+show still counts as a hide followed
    /// by a show; a collapsed show+hide leaves the page hidden.
    fn on_visibility(self: &Arc<Self>, visible: bool) {
        let collapsed = self.lock().visible == visible;
        if collapsed && visible {
            tracing::debug!("hide and show arrived together");
            self.set_visible(false);
        }
        self.set_visible(visible);
    }

    fn set_visible(self: &Arc<Self>, visible: bool) {
        let mut state = self.lock();
        if state.visible == visible {
            return;
        }
        state.visible = visible;

        if !visible {
            state.was_active_before_hide = state.active;
            Self::cancel(&mut state);
            tracing::debug!(active = state.active, "page hidden; polling suspended");
        } else if state.was_active_before_hide && state.active {
            drop(state);
            tracing::debug!("page visible; refreshing now");
            let shared = Arc::clone(self);
            tokio::spawn(async move { shared.tick().await });
        }
    }
}

/// Drives a `Refresh` on a fixed interval while active and visible.
pub struct PollScheduler {
    shared: Arc<Shared>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl PollScheduler {
    /// Create an idle scheduler subscribed to `visibility`.
    pub fn new<R>(interval: Duration, refresh: R, visibility: &dyn VisibilitySignal) -> Self
    where
        R: Refresh + 'static,
    {
        let mut rx = visibility.subscribe();
        let visible = *rx.borrow_and_update();

        let shared = Arc::new(Shared {
            state: Mutex::new(PollState {
                active: false,
                visible,
                interval,
                in_flight: false,
                was_active_before_hide: false,
                timer: None,
                generation: 0,
            }),
            refresh: Arc::new(refresh),
        });

        let listener_shared = Arc::clone(&shared);
        let listener = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let visible = *rx.borrow_and_update();
                listener_shared.on_visibility(visible);
            }
        });

        Self { shared, listener: Mutex::new(Some(listener)) }
    }

    /// Begin polling. The first refresh happens one interval from now.
    pub fn start(&self) {
        let mut state = self.shared.lock();
        if state.active {
            return;
        }
        state.active = true;
        state.was_active_before_hide = true;
        if state.visible {
            self.shared.arm(&mut state);
        }
        tracing::info!(interval_ms = state.interval.as_millis() as u64, visible = state.visible, "polling started");
    }

    /// Stop polling. A refresh already in flight finishes but is not followed
    /// by another.
    pub fn stop(&self) {
        let mut state = self.shared.lock();
        let was_active = state.active;
        state.active = false;
        state.was_active_before_hide = false;
        Shared::cancel(&mut state);
        if was_active {
            tracing::info!(in_flight = state.in_flight, "polling stopped");
        }
    }

    /// Change the interval. An armed timer is re-armed from now.
    pub fn set_interval(&self, interval: Duration) {
        let mut state = self.shared.lock();
        state.interval = interval;
        if state.active && state.visible && state.timer.is_some() {
            self.shared.arm(&mut state);
        }
        tracing::debug!(interval_ms = interval.as_millis() as u64, "poll interval changed");
    }

    /// Run one refresh now, subject to the same guards as a timer tick.
    pub async fn tick(&self) {
        self.shared.tick().await;
    }

    /// Whether polling is intended to run, regardless of visibility.
    pub fn is_running(&self) -> bool {
        self.shared.lock().active
    }

    pub fn phase(&self) -> PollPhase {
        let state = self.shared.lock();
        if state.in_flight {
            PollPhase::Running
        } else if state.timer.is_some() {
            PollPhase::Scheduled
        } else {
            PollPhase::Idle
        }
    }

    pub fn interval(&self) -> Duration {
        self.shared.lock().interval
    }

    /// Stop and release the visibility subscription.
    pub fn destroy(&self) {
        self.stop();
        let listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(listener) = listener {
            listener.abort();
            tracing::debug!("visibility subscription released");
        }
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::advance;

    const INTERVAL: Duration = Duration::from_millis(1000);

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    /// Let spawned timer, tick and listener tasks run to their next await.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn elapse(duration: Duration) {
        advance(duration).await;
        settle().await;
    }

    fn counting() -> (Arc<AtomicUsize>, impl Refresh) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let refresh = move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), Error>(())
            }
        };
        (calls, refresh)
    }

    fn count(calls: &AtomicUsize) -> usize {
        calls.load(Ordering::SeqCst)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_does_not_fire_early() {
        let visibility = ManualVisibility::always_visible();
        let (calls, refresh) = counting();
        let scheduler = PollScheduler::new(INTERVAL, refresh, &visibility);

        scheduler.start();
        assert_eq!(scheduler.phase(), PollPhase::Scheduled);

        elapse(ms(999)).await;
        assert_eq!(count(&calls), 0);

        elapse(ms(1)).await;
        assert_eq!(count(&calls), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_repeat_at_interval() {
        let visibility = ManualVisibility::always_visible();
        let (calls, refresh) = counting();
        let scheduler = PollScheduler::new(INTERVAL, refresh, &visibility);

        scheduler.start();
        for expected in 1..=3 {
            elapse(INTERVAL).await;
            assert_eq!(count(&calls), expected);
        }
        assert_eq!(scheduler.phase(), PollPhase::Scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_noop() {
        let visibility = ManualVisibility::always_visible();
        let (calls, refresh) = counting();
        let scheduler = PollScheduler::new(INTERVAL, refresh, &visibility);

        scheduler.start();
        elapse(ms(600)).await;
        scheduler.start();
        elapse(ms(400)).await;

        assert_eq!(count(&calls), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_overlapping_refreshes() {
        let visibility = ManualVisibility::always_visible();
        let calls = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));

        let refresh = {
            let (calls, running, max_running) = (calls.clone(), running.clone(), max_running.clone());
            move || {
                let (calls, running, max_running) = (calls.clone(), running.clone(), max_running.clone());
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_running.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2500)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<(), Error>(())
                }
            }
        };
        let scheduler = PollScheduler::new(INTERVAL, refresh, &visibility);

        scheduler.start();
        elapse(INTERVAL).await;
        assert_eq!(count(&calls), 1);
        assert_eq!(scheduler.phase(), PollPhase::Running);

        // manual tick and a hide/show cycle while the refresh is outstanding
        scheduler.tick().await;
        visibility.set_visible(false);
        settle().await;
        visibility.set_visible(true);
        settle().await;
        elapse(ms(1000)).await;
        assert_eq!(count(&calls), 1);

        // refresh completes at 3500ms, next tick is one interval later
        elapse(ms(1500)).await;
        assert_eq!(count(&calls), 1);
        assert_eq!(scheduler.phase(), PollPhase::Scheduled);

        elapse(INTERVAL).await;
        assert_eq!(count(&calls), 2);
        assert_eq!(max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hide_cancels_and_show_resumes() {
        let visibility = ManualVisibility::always_visible();
        let (calls, refresh) = counting();
        let scheduler = PollScheduler::new(INTERVAL, refresh, &visibility);

        scheduler.start();
        elapse(ms(500)).await;

        visibility.set_visible(false);
        settle().await;
        assert_eq!(scheduler.phase(), PollPhase::Idle);
        assert!(scheduler.is_running());

        elapse(ms(5000)).await;
        assert_eq!(count(&calls), 0);

        visibility.set_visible(true);
        settle().await;
        assert_eq!(count(&calls), 1);

        elapse(ms(999)).await;
        assert_eq!(count(&calls), 1);
        elapse(ms(1)).await;
        assert_eq!(count(&calls), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hide_and_show_before_listener_runs() {
        let visibility = ManualVisibility::always_visible();
        let (calls, refresh) = counting();
        let scheduler = PollScheduler::new(INTERVAL, refresh, &visibility);

        scheduler.start();
        elapse(ms(300)).await;

        visibility.set_visible(false);
        visibility.set_visible(true);
        settle().await;
        assert_eq!(count(&calls), 1);

        // the timer armed at start was cancelled; the next one runs from the refresh
        elapse(ms(700)).await;
        assert_eq!(count(&calls), 1);
        elapse(ms(300)).await;
        assert_eq!(count(&calls), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_show_and_hide_before_listener_runs() {
        let visibility = ManualVisibility::new(false);
        let (calls, refresh) = counting();
        let scheduler = PollScheduler::new(INTERVAL, refresh, &visibility);

        scheduler.start();
        visibility.set_visible(true);
        visibility.set_visible(false);
        settle().await;
        elapse(ms(3000)).await;

        assert_eq!(count(&calls), 0);
        assert_eq!(scheduler.phase(), PollPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_show_after_stop_does_not_refresh() {
        let visibility = ManualVisibility::always_visible();
        let (calls, refresh) = counting();
        let scheduler = PollScheduler::new(INTERVAL, refresh, &visibility);

        scheduler.start();
        visibility.set_visible(false);
        settle().await;
        scheduler.stop();
        visibility.set_visible(true);
        elapse(ms(3000)).await;

        assert_eq!(count(&calls), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_hidden_waits_for_show() {
        let visibility = ManualVisibility::new(false);
        let (calls, refresh) = counting();
        let scheduler = PollScheduler::new(INTERVAL, refresh, &visibility);

        scheduler.start();
        assert_eq!(scheduler.phase(), PollPhase::Idle);
        elapse(ms(3000)).await;
        assert_eq!(count(&calls), 0);

        visibility.set_visible(true);
        settle().await;
        assert_eq!(count(&calls), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_interval_rearms_from_now() {
        let visibility = ManualVisibility::always_visible();
        let (calls, refresh) = counting();
        let scheduler = PollScheduler::new(INTERVAL, refresh, &visibility);

        scheduler.start();
        elapse(ms(300)).await;
        scheduler.set_interval(ms(500));
        assert_eq!(scheduler.interval(), ms(500));

        elapse(ms(499)).await;
        assert_eq!(count(&calls), 0);
        elapse(ms(1)).await;
        assert_eq!(count(&calls), 1);

        // the original 1000ms timer must not fire as well
        elapse(ms(200)).await;
        assert_eq!(count(&calls), 1);
        elapse(ms(300)).await;
        assert_eq!(count(&calls), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_interval_while_stopped_only_stores() {
        let visibility = ManualVisibility::always_visible();
        let (calls, refresh) = counting();
        let scheduler = PollScheduler::new(INTERVAL, refresh, &visibility);

        scheduler.set_interval(ms(200));
        assert_eq!(scheduler.phase(), PollPhase::Idle);
        elapse(ms(1000)).await;
        assert_eq!(count(&calls), 0);

        scheduler.start();
        elapse(ms(200)).await;
        assert_eq!(count(&calls), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_timer() {
        let visibility = ManualVisibility::always_visible();
        let (calls, refresh) = counting();
        let scheduler = PollScheduler::new(INTERVAL, refresh, &visibility);

        scheduler.start();
        elapse(ms(500)).await;
        scheduler.stop();
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.phase(), PollPhase::Idle);

        elapse(ms(5000)).await;
        assert_eq!(count(&calls), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_in_flight_refresh_finish_without_rescheduling() {
        let visibility = ManualVisibility::always_visible();
        let finished = Arc::new(AtomicUsize::new(0));
        let refresh = {
            let finished = finished.clone();
            move || {
                let finished = finished.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), Error>(())
                }
            }
        };
        let scheduler = PollScheduler::new(INTERVAL, refresh, &visibility);

        scheduler.start();
        elapse(INTERVAL).await;
        assert_eq!(scheduler.phase(), PollPhase::Running);

        scheduler.stop();
        elapse(ms(300)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.phase(), PollPhase::Idle);

        elapse(ms(5000)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_errors_do_not_stop_polling() {
        let visibility = ManualVisibility::always_visible();
        let calls = Arc::new(AtomicUsize::new(0));
        let refresh = {
            let calls = calls.clone();
            move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), Error>(Error::Refresh("origin unreachable".into()))
                }
            }
        };
        let scheduler = PollScheduler::new(INTERVAL, refresh, &visibility);

        scheduler.start();
        elapse(INTERVAL).await;
        elapse(INTERVAL).await;

        assert_eq!(count(&calls), 2);
        assert!(scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_panic_does_not_stop_polling() {
        let visibility = ManualVisibility::always_visible();
        let calls = Arc::new(AtomicUsize::new(0));
        let refresh = {
            let calls = calls.clone();
            move || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("first refresh blows up");
                    }
                    Ok::<(), Error>(())
                }
            }
        };
        let scheduler = PollScheduler::new(INTERVAL, refresh, &visibility);

        scheduler.start();
        elapse(INTERVAL).await;
        elapse(INTERVAL).await;

        assert_eq!(count(&calls), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_tick_requires_active() {
        let visibility = ManualVisibility::always_visible();
        let (calls, refresh) = counting();
        let scheduler = PollScheduler::new(INTERVAL, refresh, &visibility);

        scheduler.tick().await;
        assert_eq!(count(&calls), 0);

        scheduler.start();
        scheduler.tick().await;
        assert_eq!(count(&calls), 1);
        // the manual tick re-armed the timer from its completion
        assert_eq!(scheduler.phase(), PollPhase::Scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_releases_subscription() {
        let visibility = ManualVisibility::always_visible();
        let (calls, refresh) = counting();
        let scheduler = PollScheduler::new(INTERVAL, refresh, &visibility);
        assert_eq!(visibility.subscriber_count(), 1);

        scheduler.start();
        scheduler.destroy();
        settle().await;

        assert!(!scheduler.is_running());
        assert_eq!(visibility.subscriber_count(), 0);

        visibility.set_visible(false);
        visibility.set_visible(true);
        elapse(ms(3000)).await;
        assert_eq!(count(&calls), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_subscription() {
        let visibility = ManualVisibility::always_visible();
        let (_calls, refresh) = counting();
        let scheduler = PollScheduler::new(INTERVAL, refresh, &visibility);

        drop(scheduler);
        settle().await;

        assert_eq!(visibility.subscriber_count(), 0);
    }
}
