//! Auto-poll scheduler.
//!
//! One `PollTask` per channel with auto-polling enabled. Ticks fire on a
//! fixed cadence (`start + n * interval`) whatever the detections take. A
//! tick only claims the channel; the claimed detection runs on the task's
//! runner thread, so the tick thread keeps time. Ticks that land while the
//! channel is busy are dropped, not queued, and deadlines missed entirely are
//! skipped rather than fired in a burst.
//!
//! Cancellation is two-layered: `cancel` wakes the task thread so it exits
//! promptly, and the coordinator rejects any tick whose generation no longer
//! matches the channel, so a task that is mid-wake cannot start a detection
//! after it was cancelled. An in-flight detection is left to finish.

use anyhow::{anyhow, Context, Result};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::channel::ChannelKind;
use crate::coordinator::{ClaimedDetection, Coordinator, DetectionReport, TickOutcome};
use crate::error::DetectionError;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn stop(&self) {
        let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        *stopped = true;
        self.wake.notify_all();
    }

    /// Wait until `deadline`. Returns true if stopped in the meantime.
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if *stopped {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            stopped = self
                .wake
                .wait_timeout(stopped, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Handle to a running per-channel poll task.
#[derive(Debug)]
pub struct PollTask {
    channel: ChannelKind,
    generation: u64,
    signal: Arc<StopSignal>,
    join: Option<JoinHandle<()>>,
}

impl PollTask {
    pub fn spawn(
        coordinator: Coordinator,
        channel: ChannelKind,
        generation: u64,
        interval: Duration,
    ) -> Result<Self> {
        if interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        let signal = Arc::new(StopSignal::default());
        let thread_signal = signal.clone();
        let join = std::thread::Builder::new()
            .name(format!("autopoll-{}", channel))
            .spawn(move || run_poll_loop(coordinator, channel, generation, interval, thread_signal))
            .with_context(|| format!("spawn {} poll task", channel))?;
        log::info!(
            "{} auto-poll started (every {}ms)",
            channel,
            interval.as_millis()
        );
        Ok(Self {
            channel,
            generation,
            signal,
            join: Some(join),
        })
    }

    pub fn channel(&self) -> ChannelKind {
        self.channel
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stop scheduling ticks without waiting for the thread.
    pub fn cancel(self) {
        self.signal.stop();
    }

    /// Stop scheduling ticks and wait for the thread, including any
    /// detection it is running.
    pub fn stop(mut self) -> Result<()> {
        self.signal.stop();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("{} poll task panicked", self.channel))?;
        }
        Ok(())
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.signal.stop();
    }
}

fn run_poll_loop(
    coordinator: Coordinator,
    channel: ChannelKind,
    generation: u64,
    interval: Duration,
    signal: Arc<StopSignal>,
) {
    let (runner_tx, runner) = match spawn_runner(channel) {
        Ok((tx, join)) => (Some(tx), Some(join)),
        Err(err) => {
            log::warn!("{} detection runner unavailable, ticking inline: {}", channel, err);
            (None, None)
        }
    };

    let mut next_tick = Instant::now() + interval;
    loop {
        if signal.wait_until(next_tick) {
            break;
        }
        next_tick += interval;
        let now = Instant::now();
        while next_tick <= now {
            next_tick += interval;
        }

        match coordinator.claim_tick(channel, generation) {
            Ok(claimed) => {
                let unsent = match &runner_tx {
                    Some(tx) => tx.send(claimed).err().map(|e| e.0),
                    None => Some(claimed),
                };
                // A claimed channel stays busy until run, so never drop one.
                if let Some(claimed) = unsent {
                    log_detection(channel, &claimed.run());
                }
            }
            Err(TickOutcome::Cancelled) => break,
            Err(TickOutcome::SkippedBusy) => {
                log::debug!("{} auto-poll tick skipped: detection in flight", channel);
            }
            Err(TickOutcome::Fired(result)) => log_detection(channel, &result),
        }
    }

    drop(runner_tx);
    if let Some(join) = runner {
        if join.join().is_err() {
            log::warn!("{} detection runner panicked", channel);
        }
    }
    log::info!("{} auto-poll stopped", channel);
}

fn spawn_runner(
    channel: ChannelKind,
) -> std::io::Result<(mpsc::Sender<ClaimedDetection>, JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel::<ClaimedDetection>();
    let join = std::thread::Builder::new()
        .name(format!("autopoll-{}-run", channel))
        .spawn(move || {
            for claimed in rx {
                log_detection(channel, &claimed.run());
            }
        })?;
    Ok((tx, join))
}

fn log_detection(
    channel: ChannelKind,
    result: &std::result::Result<DetectionReport, DetectionError>,
) {
    match result {
        Ok(report) => log::debug!(
            "{} auto-poll detection ok ({} attempt(s))",
            channel,
            report.attempts
        ),
        Err(err) => log::debug!("{} auto-poll detection: {}", channel, err),
    }
}
