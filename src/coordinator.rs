//! Detection invoker.
//!
//! `Coordinator` runs one logical detection for a channel: it claims the
//! channel under the shared lock, calls the detection service with a bounded
//! number of sequential attempts, and reconciles the final outcome into
//! channel state.
//!
//! The shared lock is also the cross-channel mutual exclusion: the busy check
//! and the transition to `Requesting` happen in the same guard scope, before
//! any I/O, so two channels can never both be in flight.
//!
//! The coordinator MUST NOT:
//! - Hold the state lock across a network call or a backoff sleep
//! - Count a rejected invocation (conflict, busy, missing URL) in stats
//! - Replace the last processed frame on failure

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::channel::{ChannelKind, Channels, DetectionPayload, Phase};
use crate::client::{DetectionResponse, DetectionService};
use crate::clock::Clock;
use crate::error::{DetectionError, Result};
use crate::frame::ProcessedFrame;
use crate::validate::validate_camera_url;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

const FALLBACK_FAILURE_MESSAGE: &str = "Detection failed";

/// Attempt budget and fixed backoff for one logical detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Pause between consecutive attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// Summary of a successful detection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectionReport {
    pub channel: ChannelKind,
    /// Attempts used, 1-based.
    pub attempts: u32,
    pub payload: DetectionPayload,
}

/// Result of one auto-poll tick.
#[derive(Debug)]
pub enum TickOutcome {
    /// A detection ran (successfully or not).
    Fired(Result<DetectionReport>),
    /// The channel was busy; nothing started.
    SkippedBusy,
    /// Auto-polling was turned off or the view unmounted.
    Cancelled,
}

/// Outcome of a camera-URL edit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UrlChange {
    Set,
    /// The field was cleared. `stopped_polling` is true when auto-polling was
    /// running and has been switched off.
    Cleared { stopped_polling: bool },
}

struct Detected {
    frame: ProcessedFrame,
    timestamp: Option<String>,
    payload: DetectionPayload,
}

/// Shared, injectable detection state for one live view.
#[derive(Clone)]
pub struct Coordinator {
    channels: Arc<Mutex<Channels>>,
    service: Arc<dyn DetectionService>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl Coordinator {
    pub fn new(
        service: Arc<dyn DetectionService>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        overlay_window: Duration,
    ) -> Self {
        Self {
            channels: Arc::new(Mutex::new(Channels::new(overlay_window))),
            service,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Copy of the current state of both channels.
    pub fn snapshot(&self) -> Channels {
        self.lock().clone()
    }

    /// Run one manual detection for `kind`.
    pub fn detect(&self, kind: ChannelKind) -> Result<DetectionReport> {
        let camera_url = {
            let mut channels = self.lock();
            claim(&mut channels, kind)?
        };
        self.run(kind, camera_url)
    }

    /// Run one scheduled detection for `kind`.
    ///
    /// `generation` identifies the poll task; a tick from a task that has
    /// since been cancelled never starts a detection.
    pub fn poll_tick(&self, kind: ChannelKind, generation: u64) -> TickOutcome {
        match self.claim_tick(kind, generation) {
            Ok(claimed) => TickOutcome::Fired(claimed.run()),
            Err(outcome) => outcome,
        }
    }

    /// First half of `poll_tick`: claim the channel for a scheduled
    /// detection without running it. On refusal the tick's final outcome is
    /// returned as the error.
    pub fn claim_tick(
        &self,
        kind: ChannelKind,
        generation: u64,
    ) -> std::result::Result<ClaimedDetection, TickOutcome> {
        let mut channels = self.lock();
        if !channels.mounted {
            return Err(TickOutcome::Cancelled);
        }
        let channel = channels.get(kind);
        if !channel.auto_polling || channel.poll_generation != generation {
            return Err(TickOutcome::Cancelled);
        }
        if channel.is_busy() {
            return Err(TickOutcome::SkippedBusy);
        }
        match claim(&mut channels, kind) {
            Ok(camera_url) => Ok(ClaimedDetection {
                coordinator: self.clone(),
                kind,
                camera_url,
            }),
            Err(err) => Err(TickOutcome::Fired(Err(err))),
        }
    }

    /// Validate and store a camera URL.
    ///
    /// An invalid candidate leaves the stored URL untouched and records the
    /// invalid-format error. Clearing the URL also stops auto-polling.
    pub fn set_camera_url(&self, kind: ChannelKind, candidate: &str) -> Result<UrlChange> {
        let candidate = candidate.trim();
        let mut channels = self.lock();
        let channel = channels.get_mut(kind);
        if let Err(err) = validate_camera_url(candidate) {
            channel.last_error = Some(err.to_string());
            return Err(err);
        }
        channel.last_error = None;
        if candidate.is_empty() {
            channel.camera_url.clear();
            let stopped_polling = channel.auto_polling;
            if stopped_polling {
                channel.stop_auto_polling();
            }
            return Ok(UrlChange::Cleared { stopped_polling });
        }
        channel.camera_url = candidate.to_string();
        Ok(UrlChange::Set)
    }

    /// Turn auto-polling on for `kind` and return the generation the new poll
    /// task must present, or `None` if polling was already on.
    pub fn enable_auto_polling(&self, kind: ChannelKind) -> Result<Option<u64>> {
        let mut channels = self.lock();
        let channel = channels.get_mut(kind);
        if channel.camera_url.is_empty() {
            return Err(DetectionError::MissingCameraUrl);
        }
        if channel.auto_polling {
            return Ok(None);
        }
        channel.auto_polling = true;
        channel.poll_generation += 1;
        Ok(Some(channel.poll_generation))
    }

    /// Turn auto-polling off. Returns true if it was on.
    pub fn disable_auto_polling(&self, kind: ChannelKind) -> bool {
        let mut channels = self.lock();
        let channel = channels.get_mut(kind);
        let was_polling = channel.auto_polling;
        channel.stop_auto_polling();
        was_polling
    }

    /// Mark the view as gone. Later outcomes are not written back.
    pub fn unmount(&self) {
        let mut channels = self.lock();
        channels.mounted = false;
        for kind in ChannelKind::ALL {
            let channel = channels.get_mut(kind);
            channel.stop_auto_polling();
            channel.overlay.cancel();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Channels> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self, kind: ChannelKind, camera_url: String) -> Result<DetectionReport> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt(kind, &camera_url) {
                Ok(detected) => {
                    let payload = detected.payload.clone();
                    self.settle_success(kind, detected);
                    log::info!("{} detection succeeded after {} attempt(s)", kind, attempt);
                    return Ok(DetectionReport {
                        channel: kind,
                        attempts: attempt,
                        payload,
                    });
                }
                Err(DetectionError::Transient(cause)) => {
                    log::warn!(
                        "{} detection attempt {}/{} failed: {}",
                        kind,
                        attempt,
                        max_attempts,
                        cause
                    );
                    if attempt >= max_attempts {
                        return Err(self.settle_failure(kind, cause));
                    }
                    self.set_phase(kind, Phase::Retrying { attempt });
                    self.clock.sleep(self.policy.backoff);
                    attempt += 1;
                    self.set_phase(kind, Phase::Requesting { attempt });
                }
                Err(DetectionError::Terminal(message)) => {
                    log::warn!("{} detection rejected by service: {}", kind, message);
                    return Err(self.settle_failure(kind, message));
                }
                Err(other) => {
                    return Err(self.settle_failure(kind, other.to_string()));
                }
            }
        }
    }

    fn attempt(&self, kind: ChannelKind, camera_url: &str) -> Result<Detected> {
        let response = self.service.detect(kind, camera_url)?;
        interpret_response(kind, response)
    }

    fn set_phase(&self, kind: ChannelKind, phase: Phase) {
        let mut channels = self.lock();
        if channels.mounted {
            channels.get_mut(kind).phase = phase;
        }
    }

    fn settle_success(&self, kind: ChannelKind, detected: Detected) {
        let now = self.clock.now();
        let mut channels = self.lock();
        if !channels.mounted {
            log::debug!("{} detection finished after unmount; result dropped", kind);
            return;
        }
        let channel = channels.get_mut(kind);
        channel.last_frame = Some(detected.frame);
        if let Some(timestamp) = detected.timestamp {
            channel.last_detection_at = Some(timestamp);
        }
        channel.payload = detected.payload;
        channel.stats.record_success();
        channel.last_error = None;
        channel.phase = Phase::Succeeded;
        channel.overlay.show(now);
    }

    fn settle_failure(&self, kind: ChannelKind, cause: String) -> DetectionError {
        let err = DetectionError::Terminal(cause);
        let mut channels = self.lock();
        if !channels.mounted {
            log::debug!("{} detection failed after unmount; result dropped", kind);
            return err;
        }
        let channel = channels.get_mut(kind);
        channel.last_error = Some(err.to_string());
        channel.payload = DetectionPayload::Error;
        channel.stats.record_failure();
        channel.phase = Phase::Failed;
        log::warn!("{} {}", kind, err);
        err
    }
}

/// A channel already moved into `Requesting` by `Coordinator::claim_tick`.
/// The channel stays busy until `run` settles it, so it must be run.
#[must_use = "a claimed channel stays busy until the detection is run"]
pub struct ClaimedDetection {
    coordinator: Coordinator,
    kind: ChannelKind,
    camera_url: String,
}

impl ClaimedDetection {
    pub fn channel(&self) -> ChannelKind {
        self.kind
    }

    /// Run the attempts and settle the outcome.
    pub fn run(self) -> Result<DetectionReport> {
        self.coordinator.run(self.kind, self.camera_url)
    }
}

/// Check preconditions and move `kind` into `Requesting`. Must be called with
/// the state lock held; the check and the transition are one step.
fn claim(channels: &mut Channels, kind: ChannelKind) -> Result<String> {
    let other = kind.other();
    if channels.get(other).is_busy() {
        let err = DetectionError::ChannelBusyConflict { other };
        channels.get_mut(kind).last_error = Some(err.to_string());
        return Err(err);
    }
    let channel = channels.get_mut(kind);
    if channel.is_busy() {
        return Err(DetectionError::ChannelBusy(kind));
    }
    if channel.camera_url.is_empty() {
        let err = DetectionError::MissingCameraUrl;
        channel.last_error = Some(err.to_string());
        return Err(err);
    }
    channel.phase = Phase::Requesting { attempt: 1 };
    channel.last_error = None;
    Ok(channel.camera_url.clone())
}

fn interpret_response(kind: ChannelKind, response: DetectionResponse) -> Result<Detected> {
    if !response.success {
        let message = response
            .error
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_FAILURE_MESSAGE.to_string());
        return Err(DetectionError::Terminal(message));
    }
    let image = response
        .image
        .ok_or_else(|| DetectionError::Transient("response missing image".to_string()))?;
    let frame = ProcessedFrame::from_base64(&image)?;
    let payload = match kind {
        ChannelKind::Plate => match response.plates {
            Some(plates) if !plates.is_empty() => DetectionPayload::Plates(plates),
            _ => DetectionPayload::NoPlates,
        },
        ChannelKind::Object => DetectionPayload::Objects(response.object_count.unwrap_or_default()),
    };
    Ok(Detected {
        frame,
        timestamp: response.timestamp,
        payload,
    })
}
