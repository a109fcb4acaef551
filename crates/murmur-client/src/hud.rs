//! Text "renderer": consumes smoothed poses and logs a periodic summary.

use std::collections::HashMap;

use glam::Vec3;
use murmur_sync::{EntityView, LodTier, PoseSink};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
struct Remote {
    position: Vec3,
    tier: LodTier,
    speed: f32,
}

/// Keeps the last pose of every drawn remote and reports on an interval.
#[derive(Debug, Default)]
pub struct Hud {
    remotes: HashMap<String, Remote>,
    last_report_ms: Option<i64>,
}

impl Hud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drawn(&self) -> usize {
        self.remotes.len()
    }

    /// Log a one-line summary if at least `interval_ms` passed since the last.
    pub fn report(&mut self, now_ms: i64, interval_ms: i64) -> bool {
        if let Some(last) = self.last_report_ms
            && now_ms - last < interval_ms
        {
            return false;
        }
        self.last_report_ms = Some(now_ms);

        let near = self.remotes.values().filter(|r| r.tier == LodTier::Near).count();
        let fastest = self.remotes.values().map(|r| r.speed).fold(0.0f32, f32::max);
        info!(
            drawn = self.remotes.len(),
            near,
            mid = self.remotes.len() - near,
            "remote flock: fastest {fastest:.1} u/s"
        );
        true
    }
}

impl PoseSink for Hud {
    fn update_remote_pose(&mut self, view: &EntityView) {
        let Some(pose) = view.pose() else {
            return;
        };
        self.remotes.insert(
            view.id().to_string(),
            Remote {
                position: pose.position,
                tier: view.tier(),
                speed: if view.tier().animates() {
                    view.observed_speed()
                } else {
                    0.0
                },
            },
        );
    }

    fn hide_remote(&mut self, id: &str) {
        if let Some(remote) = self.remotes.remove(id) {
            debug!(%id, position = ?remote.position, "remote hidden");
        }
    }

    fn remove_remote(&mut self, id: &str) {
        self.remotes.remove(id);
        debug!(%id, "remote removed");
    }
}
