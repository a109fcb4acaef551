//! World-state synchronization: ingest interest-filtered remote state, smooth
//! it with snapshot interpolation, relay gameplay events, and publish local
//! commands.
//!
//! Control flow: [`Session`] owns the transport and drains inbound frames into
//! the [`ProtocolRouter`], which feeds state frames to the
//! [`InterestReconciler`] and events to the [`EventRelay`]. Every render tick,
//! [`InterestReconciler::advance_all`] moves each visible [`EntityView`]
//! forward and hands the smoothed pose to a [`PoseSink`].

pub mod clock;
pub mod entity;
pub mod interest;
pub mod publish;
pub mod relay;
pub mod router;
pub mod session;
pub mod settings;
pub mod snapshot;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::{
    EntityView, LodTier, NonPositionalState, Pose, Representation, SmoothingParams, TierSignal,
    lerp_angle, wrap_angle,
};
pub use interest::{FrameSummary, InterestReconciler, PoseSink};
pub use publish::PublishThrottle;
pub use relay::{EventHandler, EventRelay};
pub use router::{ProtocolRouter, RouteOutcome};
pub use session::{
    ConnectError, DisconnectReason, LocalIdentity, ReconnectFailed, Session, SessionStats,
};
pub use settings::SyncSettings;
pub use snapshot::{DEFAULT_SNAPSHOT_CAPACITY, Snapshot, SnapshotBuffer};
