//! Player-side watch-time accumulation.
//!
//! [`WatchTimer`] counts seconds actually watched, not wall-clock time: it only advances while
//! the player reports playing and the page is visible. [`WatchSession`] drives a timer from a
//! 1 Hz interval and a stream of [`PlayerEvent`]s, and flushes deltas through a
//! [`WatchTimeSink`]. Every exit path ends with a final flush.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, warn};

use crate::config::WatchConfig;
use crate::error::Result;
use crate::service::{ProgressService, WatchTimeAck};

const TICK: Duration = Duration::from_secs(1);

/// `min(watched, duration) >= ratio * duration`. Never eligible while the duration is unknown.
pub fn completion_eligible(watched_seconds: u32, duration_seconds: Option<u32>, ratio_percent: u8) -> bool {
    let Some(duration) = duration_seconds else {
        return false;
    };
    let watched = u64::from(watched_seconds.min(duration));
    100 * watched >= u64::from(ratio_percent) * u64::from(duration)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Playing,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Play,
    Pause,
    Ended,
    /// Page visibility changed
    Visibility(bool),
    /// Media duration became known, in seconds
    Duration(u32),
    LectureSwitch,
    Unmount,
}

/// What the session should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Flush,
    Stop,
}

#[derive(Debug, Clone)]
pub struct WatchTimer {
    state: TimerState,
    player_playing: bool,
    visible: bool,
    watched_seconds: u32,
    /// Part of `watched_seconds` already handed out by `take_delta`
    flushed_seconds: u32,
    duration_seconds: Option<u32>,
}

impl Default for WatchTimer {
    fn default() -> Self {
        Self {
            state: TimerState::Idle,
            player_playing: false,
            visible: true,
            watched_seconds: 0,
            flushed_seconds: 0,
            duration_seconds: None,
        }
    }
}

impl WatchTimer {
    pub fn new(duration_seconds: Option<u32>) -> Self {
        Self { duration_seconds, ..Default::default() }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn watched_seconds(&self) -> u32 {
        self.watched_seconds
    }

    pub fn duration_seconds(&self) -> Option<u32> {
        self.duration_seconds
    }

    fn refresh_state(&mut self) {
        self.state = match (self.player_playing && self.visible, self.state) {
            (true, _) => TimerState::Playing,
            (false, TimerState::Idle) => TimerState::Idle,
            (false, _) => TimerState::Paused,
        };
    }

    pub fn handle(&mut self, event: &PlayerEvent) -> Control {
        match *event {
            PlayerEvent::Play => {
                self.player_playing = true;
                self.refresh_state();
                Control::Continue
            }
            PlayerEvent::Pause => {
                self.player_playing = false;
                self.refresh_state();
                Control::Flush
            }
            PlayerEvent::Visibility(visible) => {
                self.visible = visible;
                self.refresh_state();
                if visible { Control::Continue } else { Control::Flush }
            }
            PlayerEvent::Duration(duration) => {
                self.set_duration(duration);
                Control::Continue
            }
            PlayerEvent::Ended => {
                self.player_playing = false;
                self.state = TimerState::Idle;
                Control::Flush
            }
            PlayerEvent::LectureSwitch | PlayerEvent::Unmount => {
                self.player_playing = false;
                self.state = TimerState::Idle;
                Control::Stop
            }
        }
    }

    /// One second of wall clock. Counts only while playing and below the known duration.
    pub fn tick(&mut self) -> bool {
        if self.state != TimerState::Playing {
            return false;
        }
        if self.duration_seconds.is_some_and(|duration| self.watched_seconds >= duration) {
            return false;
        }
        self.watched_seconds += 1;
        true
    }

    /// The duration may arrive after playback started; anything watched beyond it is clamped.
    pub fn set_duration(&mut self, duration_seconds: u32) {
        self.duration_seconds = Some(duration_seconds);
        self.watched_seconds = self.watched_seconds.min(duration_seconds);
        self.flushed_seconds = self.flushed_seconds.min(self.watched_seconds);
    }

    pub fn pending_delta(&self) -> u32 {
        self.watched_seconds - self.flushed_seconds
    }

    pub fn take_delta(&mut self) -> u32 {
        let delta = self.pending_delta();
        self.flushed_seconds = self.watched_seconds;
        delta
    }

    /// Give back a delta whose flush failed so the next flush carries it again.
    pub fn restore_delta(&mut self, delta: u32) {
        self.flushed_seconds = self.flushed_seconds.saturating_sub(delta);
    }

    pub fn completion_eligible(&self, ratio_percent: u8) -> bool {
        completion_eligible(self.watched_seconds, self.duration_seconds, ratio_percent)
    }
}

/// Receiver of watched-second deltas. Deltas are additive, so redelivery is harmless.
#[async_trait]
pub trait WatchTimeSink: Send + Sync {
    async fn flush(&self, delta_seconds: u32) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSummary {
    pub watched_seconds: u32,
    pub flushed_seconds: u32,
    pub completion_eligible: bool,
}

pub struct WatchSession<S> {
    sink: S,
    timer: WatchTimer,
    flush_interval_secs: u32,
    completion_ratio_percent: u8,
    flushed_seconds: u32,
}

impl<S: WatchTimeSink> WatchSession<S> {
    pub fn new(sink: S, duration_seconds: Option<u32>, config: &WatchConfig) -> Self {
        Self {
            sink,
            timer: WatchTimer::new(duration_seconds),
            flush_interval_secs: config.flush_interval_secs.max(1),
            completion_ratio_percent: config.completion_ratio_percent,
            flushed_seconds: 0,
        }
    }

    async fn flush(&mut self) -> Result<()> {
        let delta = self.timer.take_delta();
        if delta == 0 {
            return Ok(());
        }
        match self.sink.flush(delta).await {
            Ok(()) => {
                self.flushed_seconds += delta;
                debug!("flushed {delta}s of watch time");
                Ok(())
            }
            Err(e) => {
                self.timer.restore_delta(delta);
                Err(e)
            }
        }
    }

    /// Run until unmount, lecture switch or the event stream closing, then flush what is left.
    pub async fn run(mut self, mut events: mpsc::Receiver<PlayerEvent>) -> Result<WatchSummary> {
        let mut ticker = interval_at(Instant::now() + TICK, TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut since_flush = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.timer.tick() {
                        since_flush += 1;
                    }
                    if since_flush >= self.flush_interval_secs {
                        since_flush = 0;
                        if let Err(e) = self.flush().await {
                            warn!("watch time flush failed, keeping delta: {}", e);
                        }
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let was_playing = self.timer.state() == TimerState::Playing;
                    match self.timer.handle(&event) {
                        Control::Continue => {}
                        Control::Flush => {
                            since_flush = 0;
                            if let Err(e) = self.flush().await {
                                warn!("watch time flush failed, keeping delta: {}", e);
                            }
                        }
                        Control::Stop => break,
                    }
                    if !was_playing && self.timer.state() == TimerState::Playing {
                        // count whole seconds from the moment playback starts
                        ticker.reset();
                    }
                }
            }
        }
        if let Err(e) = self.flush().await {
            error!("final watch time flush failed, {}s lost: {}", self.timer.pending_delta(), e);
            return Err(e);
        }
        Ok(WatchSummary {
            watched_seconds: self.timer.watched_seconds(),
            flushed_seconds: self.flushed_seconds,
            completion_eligible: self.timer.completion_eligible(self.completion_ratio_percent),
        })
    }
}

/// Sink writing into one lecture's progress through the service.
pub struct LectureWatchTarget {
    pub service: Arc<ProgressService>,
    pub student_id: i64,
    pub course_id: i64,
    pub chapter_index: usize,
    pub lecture_index: usize,
}

impl LectureWatchTarget {
    pub async fn add(&self, delta_seconds: u32) -> Result<WatchTimeAck> {
        self.service
            .add_watch_time(
                self.student_id,
                self.course_id,
                self.chapter_index,
                self.lecture_index,
                delta_seconds,
            )
            .await
    }
}

#[async_trait]
impl WatchTimeSink for LectureWatchTarget {
    async fn flush(&self, delta_seconds: u32) -> Result<()> {
        self.add(delta_seconds).await.map(drop)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;
    use tokio::time::sleep;

    use super::*;
    use crate::error::Error;

    #[derive(Default, Clone)]
    struct RecordingSink {
        flushes: Arc<Mutex<Vec<u32>>>,
        failures: Arc<AtomicUsize>,
    }

    impl RecordingSink {
        fn flushes(&self) -> Vec<u32> {
            self.flushes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WatchTimeSink for RecordingSink {
        async fn flush(&self, delta_seconds: u32) -> Result<()> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
                return Err(Error::ExternalDependency("progress store offline".into()));
            }
            self.flushes.lock().unwrap().push(delta_seconds);
            Ok(())
        }
    }

    fn start(sink: RecordingSink, duration: Option<u32>) -> (mpsc::Sender<PlayerEvent>, tokio::task::JoinHandle<Result<WatchSummary>>) {
        let (tx, rx) = mpsc::channel(16);
        let session = WatchSession::new(sink, duration, &WatchConfig::default());
        (tx, tokio::spawn(session.run(rx)))
    }

    #[test]
    fn eligibility_needs_known_duration() {
        assert!(!completion_eligible(500, None, 80));
        assert!(completion_eligible(80, Some(100), 80));
        assert!(!completion_eligible(79, Some(100), 80));
        // watched beyond the duration counts as the duration
        assert!(completion_eligible(1000, Some(100), 100));
    }

    #[test]
    fn timer_counts_only_while_playing_and_visible() {
        let mut timer = WatchTimer::default();
        assert!(!timer.tick());
        timer.handle(&PlayerEvent::Play);
        assert_eq!(timer.state(), TimerState::Playing);
        assert!(timer.tick());
        assert_eq!(timer.handle(&PlayerEvent::Visibility(false)), Control::Flush);
        assert_eq!(timer.state(), TimerState::Paused);
        assert!(!timer.tick());
        timer.handle(&PlayerEvent::Visibility(true));
        assert!(timer.tick());
        assert_eq!(timer.watched_seconds(), 2);
        assert_eq!(timer.handle(&PlayerEvent::Ended), Control::Flush);
        assert_eq!(timer.state(), TimerState::Idle);
    }

    #[test]
    fn late_duration_clamps_watched_seconds() {
        let mut timer = WatchTimer::default();
        timer.handle(&PlayerEvent::Play);
        for _ in 0..30 {
            timer.tick();
        }
        assert_eq!(timer.take_delta(), 30);
        timer.set_duration(20);
        assert_eq!(timer.watched_seconds(), 20);
        assert_eq!(timer.pending_delta(), 0);
        assert!(!timer.tick());
    }

    #[test]
    fn restored_delta_is_flushed_again() {
        let mut timer = WatchTimer::new(Some(100));
        timer.handle(&PlayerEvent::Play);
        for _ in 0..10 {
            timer.tick();
        }
        let delta = timer.take_delta();
        timer.restore_delta(delta);
        timer.tick();
        assert_eq!(timer.pending_delta(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn session_flushes_every_ten_seconds_and_on_pause() {
        let sink = RecordingSink::default();
        let (tx, handle) = start(sink.clone(), Some(100));
        tx.send(PlayerEvent::Play).await.unwrap();
        sleep(Duration::from_millis(25_500)).await;
        tx.send(PlayerEvent::Pause).await.unwrap();
        sleep(Duration::from_secs(30)).await;
        tx.send(PlayerEvent::Unmount).await.unwrap();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(sink.flushes(), vec![10, 10, 5]);
        assert_eq!(summary.watched_seconds, 25);
        assert_eq!(summary.flushed_seconds, 25);
        assert!(!summary.completion_eligible);
    }

    #[tokio::test(start_paused = true)]
    async fn session_stops_counting_at_duration() {
        let sink = RecordingSink::default();
        let (tx, handle) = start(sink.clone(), None);
        tx.send(PlayerEvent::Play).await.unwrap();
        tx.send(PlayerEvent::Duration(12)).await.unwrap();
        sleep(Duration::from_millis(20_500)).await;
        drop(tx);
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(sink.flushes(), vec![10, 2]);
        assert!(summary.completion_eligible);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flush_is_carried_to_next_flush() {
        let sink = RecordingSink::default();
        sink.failures.store(1, Ordering::SeqCst);
        let (tx, handle) = start(sink.clone(), Some(100));
        tx.send(PlayerEvent::Play).await.unwrap();
        sleep(Duration::from_millis(20_500)).await;
        tx.send(PlayerEvent::LectureSwitch).await.unwrap();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(sink.flushes(), vec![20]);
        assert_eq!(summary.flushed_seconds, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn unmount_flushes_partial_interval() {
        let sink = RecordingSink::default();
        let (tx, handle) = start(sink.clone(), Some(100));
        tx.send(PlayerEvent::Play).await.unwrap();
        sleep(Duration::from_millis(3_500)).await;
        tx.send(PlayerEvent::Unmount).await.unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(sink.flushes(), vec![3]);
    }
}
