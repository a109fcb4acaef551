//! Per-remote-participant view: snapshot history, LOD tier and smoothed pose.
//!
//! Rendering runs `render_delay` behind the clock so that two real snapshots
//! usually bracket the render time. When they do, the pose is interpolated
//! between them. When they don't (fewer than two samples, or the network is
//! starved), the pose eases toward the newest snapshot with exponential
//! smoothing, which never overshoots. While render time is still older than
//! the whole history, the pose holds at the oldest snapshot.

use std::f32::consts::{PI, TAU};

use glam::Vec3;
use murmur_net::{FullEntitySample, PlayerId, ReducedEntitySample};

use crate::snapshot::{Snapshot, SnapshotBuffer};

// ---------------------------------------------------------------------------
// LOD tiers
// ---------------------------------------------------------------------------

/// Replication detail tier assigned by the server per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LodTier {
    Near,
    Mid,
    Hidden,
}

/// What caused a tier change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierSignal {
    /// Listed in the frame's near entities.
    SampledNear,
    /// Listed in the frame's mid entities.
    SampledMid,
    /// Listed in the frame's removed ids.
    Removed,
    /// Visible last frame, absent from every list this frame.
    Vanished,
}

/// Which visual the renderer should drive with the pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    /// Full model with animation.
    FullModel,
    /// Cheap proxy, no animation.
    Proxy,
    /// Nothing drawn; the snapshot buffer is retained.
    None,
}

impl LodTier {
    /// Next tier for `signal`. Tier changes never touch pose data.
    pub fn transition(self, signal: TierSignal) -> LodTier {
        match signal {
            TierSignal::SampledNear => LodTier::Near,
            TierSignal::SampledMid => LodTier::Mid,
            TierSignal::Removed | TierSignal::Vanished => LodTier::Hidden,
        }
    }

    pub fn representation(self) -> Representation {
        match self {
            LodTier::Near => Representation::FullModel,
            LodTier::Mid => Representation::Proxy,
            LodTier::Hidden => Representation::None,
        }
    }

    pub fn is_visible(self) -> bool {
        self != LodTier::Hidden
    }

    /// Whether locomotion animation runs at this tier.
    pub fn animates(self) -> bool {
        self == LodTier::Near
    }
}

// ---------------------------------------------------------------------------
// Angles
// ---------------------------------------------------------------------------

/// Wrap an angle in radians into `[-PI, PI)`.
pub fn wrap_angle(angle: f32) -> f32 {
    (angle + PI).rem_euclid(TAU) - PI
}

/// Interpolate between two angles along the shorter arc.
pub fn lerp_angle(from: f32, to: f32, t: f32) -> f32 {
    let delta = wrap_angle(to - from);
    wrap_angle(from + delta * t)
}

// ---------------------------------------------------------------------------
// Pose
// ---------------------------------------------------------------------------

/// Smoothed pose produced by [`EntityView::advance`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    /// Movement since the previous advance. Drives locomotion animation
    /// instead of the reported speed.
    pub displacement: Vec3,
    /// `true` when bracketed by two snapshots, `false` when smoothing.
    pub interpolated: bool,
}

impl Pose {
    fn at(snapshot: &Snapshot) -> Self {
        Self {
            position: snapshot.position,
            yaw: snapshot.yaw,
            pitch: snapshot.pitch,
            displacement: Vec3::ZERO,
            interpolated: false,
        }
    }
}

/// Gameplay state applied instantly, never interpolated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NonPositionalState {
    pub heat: f32,
    pub match_state: String,
    pub stunned: bool,
    pub wanted: bool,
    pub tagged: bool,
}

/// Timing knobs for [`EntityView::advance`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingParams {
    /// How far rendering runs behind the clock.
    pub render_delay_ms: i64,
    /// Exponential catch-up rate per second when starved.
    pub smoothing_rate: f32,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            render_delay_ms: 100,
            smoothing_rate: 10.0,
        }
    }
}

// ---------------------------------------------------------------------------
// EntityView
// ---------------------------------------------------------------------------

/// One remote participant as seen by this client.
#[derive(Debug, Clone)]
pub struct EntityView {
    id: PlayerId,
    username: Option<String>,
    tier: LodTier,
    buffer: SnapshotBuffer,
    pose: Option<Pose>,
    last_advance_ms: Option<i64>,
    last_step_secs: f32,
    hidden_since_ms: Option<i64>,
    /// Instant gameplay state.
    pub state: NonPositionalState,
    /// Flock membership, if any.
    pub murmuration_tag: Option<String>,
    /// Flock color as `0xRRGGBB`.
    pub murmuration_color: Option<u32>,
}

impl EntityView {
    pub fn new(id: impl Into<PlayerId>, snapshot_capacity: usize) -> Self {
        Self {
            id: id.into(),
            username: None,
            tier: LodTier::Hidden,
            buffer: SnapshotBuffer::new(snapshot_capacity),
            pose: None,
            last_advance_ms: None,
            last_step_secs: 0.0,
            hidden_since_ms: None,
            state: NonPositionalState::default(),
            murmuration_tag: None,
            murmuration_color: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn tier(&self) -> LodTier {
        self.tier
    }

    pub fn buffer(&self) -> &SnapshotBuffer {
        &self.buffer
    }

    /// Latest smoothed pose, `None` until the first snapshot arrives.
    pub fn pose(&self) -> Option<&Pose> {
        self.pose.as_ref()
    }

    /// How long the entity has been hidden, if it is.
    pub fn hidden_for(&self, now_ms: i64) -> Option<i64> {
        self.hidden_since_ms.map(|since| now_ms - since)
    }

    /// Apply a tier signal. Returns `true` if the tier changed.
    pub fn signal(&mut self, signal: TierSignal, now_ms: i64) -> bool {
        let next = self.tier.transition(signal);
        if next == self.tier {
            return false;
        }
        tracing::trace!(id = %self.id, from = ?self.tier, to = ?next, ?signal, "tier change");
        self.hidden_since_ms = (next == LodTier::Hidden).then_some(now_ms);
        self.tier = next;
        true
    }

    /// Append a pose sample. Returns `false` if it was stale.
    ///
    /// The very first accepted snapshot also seeds the smoothed pose, so a
    /// new entity appears where it is rather than sliding in from the origin.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot) -> bool {
        if !self.buffer.push(snapshot) {
            return false;
        }
        if self.pose.is_none() {
            self.pose = Some(Pose::at(&snapshot));
        }
        true
    }

    /// Non-positional fields from a near-tier sample.
    pub fn apply_full_state(&mut self, sample: &FullEntitySample) {
        if let Some(name) = &sample.username {
            self.username = Some(name.clone());
        }
        self.state.heat = sample.heat;
        self.state.match_state.clone_from(&sample.match_state);
        self.state.stunned = sample.stunned;
        self.state.wanted = sample.wanted;
        if let Some(tagged) = sample.tagged {
            self.state.tagged = tagged;
        }
        if sample.murmuration_tag.is_some() {
            self.murmuration_tag.clone_from(&sample.murmuration_tag);
        }
        if sample.murmuration_color.is_some() {
            self.murmuration_color = sample.murmuration_color;
        }
    }

    /// Mid-tier samples only refresh the wanted (and, if sent, tagged) flag.
    pub fn apply_reduced_state(&mut self, sample: &ReducedEntitySample) {
        if let Some(name) = &sample.username {
            self.username = Some(name.clone());
        }
        self.state.wanted = sample.wanted;
        if let Some(tagged) = sample.tagged {
            self.state.tagged = tagged;
        }
    }

    /// Produce the smoothed pose for `now_ms`.
    pub fn advance(&mut self, now_ms: i64, params: SmoothingParams) -> Option<Pose> {
        let previous = self.pose?;
        let render_time = now_ms - params.render_delay_ms;
        let dt = self
            .last_advance_ms
            .map(|last| (now_ms - last).max(0) as f32 / 1000.0)
            .unwrap_or(0.0);
        self.last_advance_ms = Some(now_ms);
        self.last_step_secs = dt;

        let mut next = if let Some((a, b)) = self.buffer.bracketing_pair(render_time) {
            let span = b.timestamp_ms - a.timestamp_ms;
            let t = if span == 0 {
                1.0
            } else {
                (render_time - a.timestamp_ms) as f32 / span as f32
            };
            Pose {
                position: a.position.lerp(b.position, t),
                yaw: lerp_angle(a.yaw, b.yaw, t),
                pitch: lerp_angle(a.pitch, b.pitch, t),
                displacement: Vec3::ZERO,
                interpolated: true,
            }
        } else if let (Some(oldest), Some(latest)) = (self.buffer.oldest(), self.buffer.latest()) {
            // Render time still before the history starts: hold at the
            // oldest sample so interpolation picks up from there.
            let target = if render_time < oldest.timestamp_ms {
                oldest
            } else {
                latest
            };
            let alpha = 1.0 - (-params.smoothing_rate.max(0.0) * dt).exp();
            Pose {
                position: previous.position.lerp(target.position, alpha),
                yaw: lerp_angle(previous.yaw, target.yaw, alpha),
                pitch: lerp_angle(previous.pitch, target.pitch, alpha),
                displacement: Vec3::ZERO,
                interpolated: false,
            }
        } else {
            previous
        };

        next.displacement = next.position - previous.position;
        self.pose = Some(next);
        Some(next)
    }

    /// Speed actually rendered during the last advance, in units per second.
    pub fn observed_speed(&self) -> f32 {
        match self.pose {
            Some(pose) if self.last_step_secs > 0.0 => {
                pose.displacement.length() / self.last_step_secs
            }
            _ => 0.0,
        }
    }
}
