use std::time::{Duration, Instant};

/// How long a freshly processed frame replaces the live feed.
pub const DEFAULT_OVERLAY_WINDOW: Duration = Duration::from_secs(2);

/// Display-duration timer for the processed-frame overlay.
///
/// The timer holds a start instant rather than a callback handle, so it
/// expires on its own and needs no teardown when the channel is dropped.
#[derive(Clone, Debug)]
pub struct OverlayTimer {
    window: Duration,
    shown_at: Option<Instant>,
}

impl OverlayTimer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            shown_at: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Start the window, restarting it if one is already running.
    pub fn show(&mut self, now: Instant) {
        self.shown_at = Some(now);
    }

    pub fn cancel(&mut self) {
        self.shown_at = None;
    }

    pub fn is_active(&self, now: Instant) -> bool {
        self.remaining(now).is_some()
    }

    /// Time left in the window, `None` once expired.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let shown_at = self.shown_at?;
        let elapsed = now.saturating_duration_since(shown_at);
        if elapsed >= self.window {
            return None;
        }
        Some(self.window - elapsed)
    }
}

impl Default for OverlayTimer {
    fn default() -> Self {
        Self::new(DEFAULT_OVERLAY_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_until_shown() {
        let timer = OverlayTimer::default();
        assert!(!timer.is_active(Instant::now()));
    }

    #[test]
    fn expires_after_window() {
        let start = Instant::now();
        let mut timer = OverlayTimer::default();
        timer.show(start);
        assert!(timer.is_active(start));
        assert!(timer.is_active(start + Duration::from_millis(1999)));
        assert!(!timer.is_active(start + Duration::from_secs(2)));
    }

    #[test]
    fn show_restarts_window() {
        let start = Instant::now();
        let mut timer = OverlayTimer::default();
        timer.show(start);
        timer.show(start + Duration::from_millis(1500));
        assert_eq!(
            timer.remaining(start + Duration::from_millis(2500)),
            Some(Duration::from_millis(1000))
        );
    }

    #[test]
    fn cancel_hides_immediately() {
        let start = Instant::now();
        let mut timer = OverlayTimer::default();
        timer.show(start);
        timer.cancel();
        assert!(!timer.is_active(start));
    }
}
