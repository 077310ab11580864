//! Live-camera view lifecycle.
//!
//! `LiveView::mount` creates both channels; dropping the view (or calling
//! `close`) unmounts it: poll tasks are cancelled, overlays are cleared and
//! results of detections still in flight are discarded.

use anyhow::Result as AnyResult;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::channel::{ChannelKind, ChannelState};
use crate::client::DetectionService;
use crate::clock::Clock;
use crate::coordinator::{Coordinator, DetectionReport, RetryPolicy, UrlChange};
use crate::error::Result;
use crate::frame::ProcessedFrame;
use crate::overlay::DEFAULT_OVERLAY_WINDOW;
use crate::scheduler::{PollTask, DEFAULT_POLL_INTERVAL};

/// Timing knobs for a live view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiveViewSettings {
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    pub overlay_window: Duration,
}

impl Default for LiveViewSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            overlay_window: DEFAULT_OVERLAY_WINDOW,
        }
    }
}

/// What a channel's video area shows right now.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameView {
    /// No camera configured.
    Blank,
    /// The live camera feed at this URL.
    Live(String),
    /// A freshly processed frame inside its overlay window.
    Processed(ProcessedFrame),
}

pub struct LiveView {
    coordinator: Coordinator,
    poll_interval: Duration,
    pollers: HashMap<ChannelKind, PollTask>,
}

impl LiveView {
    pub fn mount(
        service: Arc<dyn DetectionService>,
        clock: Arc<dyn Clock>,
        settings: LiveViewSettings,
    ) -> Self {
        log::debug!("live view mounted");
        Self {
            coordinator: Coordinator::new(service, clock, settings.retry, settings.overlay_window),
            poll_interval: settings.poll_interval,
            pollers: HashMap::new(),
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Camera URL input for one channel.
    pub fn set_camera_url(&mut self, kind: ChannelKind, candidate: &str) -> Result<()> {
        match self.coordinator.set_camera_url(kind, candidate)? {
            UrlChange::Set => {}
            UrlChange::Cleared { stopped_polling } => {
                if stopped_polling {
                    log::info!("{} camera url cleared; auto-poll stopped", kind);
                }
                self.cancel_poller(kind);
            }
        }
        Ok(())
    }

    /// "Detect now" for one channel. Blocks until the detection settles.
    pub fn detect(&self, kind: ChannelKind) -> Result<DetectionReport> {
        self.coordinator.detect(kind)
    }

    /// Auto-poll toggle for one channel.
    pub fn set_auto_poll(&mut self, kind: ChannelKind, enabled: bool) -> AnyResult<()> {
        if !enabled {
            self.coordinator.disable_auto_polling(kind);
            self.cancel_poller(kind);
            return Ok(());
        }
        let Some(generation) = self.coordinator.enable_auto_polling(kind)? else {
            return Ok(());
        };
        match PollTask::spawn(
            self.coordinator.clone(),
            kind,
            generation,
            self.poll_interval,
        ) {
            Ok(task) => {
                if let Some(previous) = self.pollers.insert(kind, task) {
                    previous.cancel();
                }
                Ok(())
            }
            Err(err) => {
                self.coordinator.disable_auto_polling(kind);
                Err(err)
            }
        }
    }

    pub fn is_auto_polling(&self, kind: ChannelKind) -> bool {
        self.pollers.contains_key(&kind) && self.channel(kind).auto_polling()
    }

    /// Current state of one channel.
    pub fn channel(&self, kind: ChannelKind) -> ChannelState {
        self.coordinator.snapshot().get(kind).clone()
    }

    /// What the channel's video area should display now.
    pub fn display(&self, kind: ChannelKind) -> FrameView {
        let now = self.coordinator.clock().now();
        let channel = self.channel(kind);
        if channel.overlay().is_active(now) {
            if let Some(frame) = channel.last_frame() {
                return FrameView::Processed(frame.clone());
            }
        }
        if channel.camera_url().is_empty() {
            FrameView::Blank
        } else {
            FrameView::Live(channel.camera_url().to_string())
        }
    }

    /// Unmount the view.
    pub fn close(self) {
        drop(self);
    }

    /// Unmount the view and wait for poll tasks to exit.
    pub fn shutdown(mut self) -> AnyResult<()> {
        self.coordinator.unmount();
        for (_, task) in self.pollers.drain() {
            task.stop()?;
        }
        Ok(())
    }

    fn cancel_poller(&mut self, kind: ChannelKind) {
        if let Some(task) = self.pollers.remove(&kind) {
            task.cancel();
        }
    }
}

impl Drop for LiveView {
    fn drop(&mut self) {
        self.coordinator.unmount();
        for (_, task) in self.pollers.drain() {
            task.cancel();
        }
        log::debug!("live view unmounted");
    }
}
