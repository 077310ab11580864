//! Per-channel detection state.
//!
//! A live view owns exactly two channels, one for plate detection and one
//! for object detection. Channels are mutated only by the coordinator while
//! it holds the shared state lock.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::frame::ProcessedFrame;
use crate::overlay::OverlayTimer;

/// Sentinel shown when a plate detection succeeded without finding plates.
pub const NO_PLATES_DETECTED: &str = "No plates detected";
/// Sentinel shown when a detection ended in a terminal failure.
pub const DETECTION_ERROR_SENTINEL: &str = "Error: Detection failed";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelKind {
    Plate,
    Object,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 2] = [ChannelKind::Plate, ChannelKind::Object];

    /// The channel this one is mutually exclusive with.
    pub fn other(self) -> Self {
        match self {
            ChannelKind::Plate => ChannelKind::Object,
            ChannelKind::Object => ChannelKind::Plate,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Plate => "plate",
            ChannelKind::Object => "object",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "plate" | "plates" => Ok(ChannelKind::Plate),
            "object" | "objects" => Ok(ChannelKind::Object),
            other => Err(anyhow!(
                "unknown channel '{}'; expected plate or object",
                other
            )),
        }
    }
}

/// Lifecycle of one logical detection on a channel.
///
/// `Idle -> Requesting -> (Retrying -> Requesting)* -> Succeeded | Failed`.
/// The settled states behave like `Idle` for the next invocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Requesting {
        attempt: u32,
    },
    Retrying {
        attempt: u32,
    },
    Succeeded,
    Failed,
}

impl Phase {
    /// A detection (including its retries) is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(self, Phase::Requesting { .. } | Phase::Retrying { .. })
    }
}

/// Latest detection result for a channel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DetectionPayload {
    /// Nothing has completed yet.
    #[default]
    Empty,
    Plates(Vec<String>),
    NoPlates,
    /// Label to count. An empty map means nothing was found.
    Objects(BTreeMap<String, u64>),
    Error,
}

impl DetectionPayload {
    /// Human-readable result lines, one per plate or object label.
    pub fn lines(&self) -> Vec<String> {
        match self {
            DetectionPayload::Empty => Vec::new(),
            DetectionPayload::Plates(plates) => plates.clone(),
            DetectionPayload::NoPlates => vec![NO_PLATES_DETECTED.to_string()],
            DetectionPayload::Objects(counts) => counts
                .iter()
                .map(|(label, count)| format!("{label}: {count}"))
                .collect(),
            DetectionPayload::Error => vec![DETECTION_ERROR_SENTINEL.to_string()],
        }
    }
}

/// Running totals for one channel. `successful <= total` always holds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DetectionStats {
    total: u64,
    successful: u64,
}

impl DetectionStats {
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn successful(&self) -> u64 {
        self.successful
    }

    pub fn record_success(&mut self) {
        self.total += 1;
        self.successful += 1;
    }

    pub fn record_failure(&mut self) {
        self.total += 1;
    }

    /// Fraction of successful detections, 0 when nothing was attempted.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.successful as f64 / self.total as f64
    }

    /// Success rate as a percentage rounded to one decimal place.
    pub fn success_rate_percent(&self) -> f64 {
        (self.success_rate() * 1000.0).round() / 10.0
    }
}

impl fmt::Display for DetectionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}%", self.success_rate_percent())
    }
}

#[derive(Clone, Debug)]
pub struct ChannelState {
    kind: ChannelKind,
    pub(crate) camera_url: String,
    pub(crate) phase: Phase,
    pub(crate) auto_polling: bool,
    pub(crate) poll_generation: u64,
    pub(crate) last_frame: Option<ProcessedFrame>,
    pub(crate) last_detection_at: Option<String>,
    pub(crate) last_error: Option<String>,
    pub(crate) payload: DetectionPayload,
    pub(crate) stats: DetectionStats,
    pub(crate) overlay: OverlayTimer,
}

impl ChannelState {
    pub fn new(kind: ChannelKind, overlay_window: Duration) -> Self {
        Self {
            kind,
            camera_url: String::new(),
            phase: Phase::Idle,
            auto_polling: false,
            poll_generation: 0,
            last_frame: None,
            last_detection_at: None,
            last_error: None,
            payload: DetectionPayload::Empty,
            stats: DetectionStats::default(),
            overlay: OverlayTimer::new(overlay_window),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn camera_url(&self) -> &str {
        &self.camera_url
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_busy(&self) -> bool {
        self.phase.is_busy()
    }

    pub fn auto_polling(&self) -> bool {
        self.auto_polling
    }

    pub fn last_frame(&self) -> Option<&ProcessedFrame> {
        self.last_frame.as_ref()
    }

    pub fn last_detection_at(&self) -> Option<&str> {
        self.last_detection_at.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn payload(&self) -> &DetectionPayload {
        &self.payload
    }

    pub fn stats(&self) -> DetectionStats {
        self.stats
    }

    pub fn overlay(&self) -> &OverlayTimer {
        &self.overlay
    }

    /// Stops auto-polling and invalidates any scheduled task for it.
    pub(crate) fn stop_auto_polling(&mut self) {
        self.auto_polling = false;
        self.poll_generation += 1;
    }
}

/// Both channels of a mounted view.
#[derive(Clone, Debug)]
pub struct Channels {
    plate: ChannelState,
    object: ChannelState,
    pub(crate) mounted: bool,
}

impl Channels {
    pub fn new(overlay_window: Duration) -> Self {
        Self {
            plate: ChannelState::new(ChannelKind::Plate, overlay_window),
            object: ChannelState::new(ChannelKind::Object, overlay_window),
            mounted: true,
        }
    }

    pub fn get(&self, kind: ChannelKind) -> &ChannelState {
        match kind {
            ChannelKind::Plate => &self.plate,
            ChannelKind::Object => &self.object,
        }
    }

    pub fn get_mut(&mut self, kind: ChannelKind) -> &mut ChannelState {
        match kind {
            ChannelKind::Plate => &mut self.plate,
            ChannelKind::Object => &mut self.object,
        }
    }

    /// Number of channels with a detection in flight. Never exceeds one.
    pub fn busy_count(&self) -> usize {
        ChannelKind::ALL
            .iter()
            .filter(|kind| self.get(**kind).is_busy())
            .count()
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }
}
