//! Live camera detection coordinator.
//!
//! Two independent detection channels (licence plates and objects) share one
//! remote detection service. This crate owns everything between the camera
//! URL inputs and the displayed results:
//!
//! - at most one channel is ever mid-detection;
//! - each detection makes up to three attempts, one second apart;
//! - auto-polling fires a detection every second and skips ticks while the
//!   channel is busy;
//! - processed frames are shown for two seconds before the live feed returns;
//! - per-channel success-rate statistics count one outcome per detection.
//!
//! # Module Structure
//!
//! - `channel`: per-channel state, payloads and stats
//! - `coordinator`: the retrying invoker and the cross-channel lock
//! - `scheduler`: auto-poll tasks
//! - `view`: the mounted live view that ties it together
//! - `client`: the detection service seam and its HTTP implementation
//! - `proxy`: HTTP forwarding proxy in front of the detection service

pub mod channel;
pub mod client;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod frame;
pub mod overlay;
pub mod proxy;
pub mod scheduler;
pub mod validate;
pub mod view;

pub use channel::{ChannelKind, ChannelState, Channels, DetectionPayload, DetectionStats, Phase};
pub use client::{DetectionResponse, DetectionService, HttpDetectionService};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LiveCamConfig;
pub use coordinator::{
    ClaimedDetection, Coordinator, DetectionReport, RetryPolicy, TickOutcome, UrlChange,
};
pub use error::DetectionError;
pub use frame::ProcessedFrame;
pub use overlay::OverlayTimer;
pub use proxy::{ProxyConfig, ProxyHandle, ProxyServer};
pub use scheduler::PollTask;
pub use validate::validate_camera_url;
pub use view::{FrameView, LiveView, LiveViewSettings};
