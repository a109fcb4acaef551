//! Interest reconciliation: turns interest-filtered world-state frames into
//! a registry of [`EntityView`]s with LOD tiers.
//!
//! The reconciler is the only owner of entity views. It creates them on first
//! sighting, hides them when the server drops them from this client's area of
//! interest (explicitly via `removedIds`, or silently by omission), and
//! recycles them after a retention window, on `player_left`, or at session
//! end.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use murmur_config::TimestampSource;
use murmur_net::{FullEntitySample, LegacyWorldState, PlayerId, WorldStateFrame};

use crate::clock::Clock;
use crate::entity::{EntityView, TierSignal};
use crate::relay::EventRelay;
use crate::settings::SyncSettings;
use crate::snapshot::Snapshot;

// ---------------------------------------------------------------------------
// PoseSink
// ---------------------------------------------------------------------------

/// Render-side consumer of smoothed poses.
pub trait PoseSink {
    /// Called once per render tick for every visible entity.
    fn update_remote_pose(&mut self, view: &EntityView);

    /// The entity became hidden; stop drawing it but keep its visual around.
    fn hide_remote(&mut self, _id: &str) {}

    /// The entity was recycled; release its visual.
    fn remove_remote(&mut self, id: &str);
}

// ---------------------------------------------------------------------------
// FrameSummary
// ---------------------------------------------------------------------------

/// What one [`InterestReconciler::apply_frame`] call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameSummary {
    /// Ids seen for the first time.
    pub created: Vec<PlayerId>,
    /// Ids that moved to hidden this frame.
    pub hidden: Vec<PlayerId>,
    /// Ids recycled after staying hidden too long.
    pub evicted: Vec<PlayerId>,
    /// Events that reached a registered handler.
    pub events_delivered: usize,
}

// ---------------------------------------------------------------------------
// InterestReconciler
// ---------------------------------------------------------------------------

/// Registry of remote entity views plus the previous frame's visible set.
pub struct InterestReconciler {
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
    local_id: Option<PlayerId>,
    entities: HashMap<PlayerId, EntityView>,
    /// Ids that were near or mid after the last frame.
    visible: HashSet<PlayerId>,
    /// Hidden since the last render pass, not yet reported to the sink.
    pending_hidden: Vec<PlayerId>,
    /// Recycled since the last render pass, not yet reported to the sink.
    pending_removed: Vec<PlayerId>,
}

impl InterestReconciler {
    pub fn new(settings: SyncSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            settings,
            local_id: None,
            entities: HashMap::new(),
            visible: HashSet::new(),
            pending_hidden: Vec::new(),
            pending_removed: Vec::new(),
        }
    }

    /// Set the local player's id. It never gets an entity view; if one
    /// already exists it is recycled.
    pub fn set_local_id(&mut self, id: impl Into<PlayerId>) {
        let id = id.into();
        self.retire(&id);
        self.local_id = Some(id);
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    fn is_local(&self, id: &str) -> bool {
        self.local_id.as_deref() == Some(id)
    }

    fn stamp(&self, server_ms: Option<i64>, now_ms: i64) -> i64 {
        match self.settings.timestamp_source {
            TimestampSource::Arrival => now_ms,
            TimestampSource::Server => server_ms.unwrap_or(now_ms),
        }
    }

    fn get_or_create(&mut self, id: &str, created: &mut Vec<PlayerId>) -> &mut EntityView {
        let capacity = self.settings.snapshot_capacity;
        self.entities.entry(id.to_string()).or_insert_with(|| {
            tracing::debug!(%id, "remote entity created");
            created.push(id.to_string());
            EntityView::new(id, capacity)
        })
    }

    fn ingest_full(
        &mut self,
        sample: &FullEntitySample,
        stamp: i64,
        now: i64,
        created: &mut Vec<PlayerId>,
    ) {
        let source = self.settings.timestamp_source;
        let view = self.get_or_create(&sample.id, created);
        let stamp = next_stamp(view, stamp, source);
        view.apply_snapshot(Snapshot::new(sample.position, sample.yaw, sample.pitch, stamp));
        view.apply_full_state(sample);
        view.signal(TierSignal::SampledNear, now);
    }

    /// Reconcile one world-state frame, then relay its events.
    pub fn apply_frame(&mut self, frame: WorldStateFrame, relay: &mut EventRelay) -> FrameSummary {
        let now = self.clock.now_ms();
        let stamp = self.stamp(Some(frame.timestamp_ms), now);
        let mut summary = FrameSummary::default();
        let mut active: HashSet<PlayerId> = HashSet::new();

        for sample in &frame.near_entities {
            if self.is_local(&sample.id) {
                continue;
            }
            self.ingest_full(sample, stamp, now, &mut summary.created);
            active.insert(sample.id.clone());
        }

        for sample in &frame.mid_entities {
            // Near wins if the server lists an id twice.
            if self.is_local(&sample.id) || active.contains(&sample.id) {
                continue;
            }
            let source = self.settings.timestamp_source;
            let view = self.get_or_create(&sample.id, &mut summary.created);
            let stamp = next_stamp(view, stamp, source);
            view.apply_snapshot(Snapshot::new(sample.position, sample.yaw, 0.0, stamp));
            view.apply_reduced_state(sample);
            view.signal(TierSignal::SampledMid, now);
            active.insert(sample.id.clone());
        }

        let removed: HashSet<&str> = frame.removed_ids.iter().map(String::as_str).collect();
        for id in &removed {
            active.remove(*id);
            self.visible.remove(*id);
            if let Some(view) = self.entities.get_mut(*id)
                && view.signal(TierSignal::Removed, now)
            {
                summary.hidden.push(id.to_string());
            }
        }

        for id in self.visible.difference(&active) {
            if let Some(view) = self.entities.get_mut(id)
                && view.signal(TierSignal::Vanished, now)
            {
                summary.hidden.push(id.clone());
            }
        }
        self.visible = active;
        self.pending_hidden.extend(summary.hidden.iter().cloned());

        summary.evicted = self.evict_expired(now);

        for event in &frame.events {
            if relay.dispatch(event) {
                summary.events_delivered += 1;
            }
        }

        summary
    }

    /// Seed the registry from the full snapshot carried by `welcome`.
    pub fn bootstrap(&mut self, world: &LegacyWorldState) -> usize {
        let now = self.clock.now_ms();
        let stamp = self.stamp(world.timestamp_ms, now);
        let mut created = Vec::new();
        for sample in &world.players {
            if self.is_local(&sample.id) {
                continue;
            }
            self.ingest_full(sample, stamp, now, &mut created);
            self.visible.insert(sample.id.clone());
        }
        tracing::debug!(
            players = world.players.len(),
            created = created.len(),
            "bootstrapped world state"
        );
        created.len()
    }

    /// Recycle one entity (`player_left`). Returns `true` if it existed.
    pub fn retire(&mut self, id: &str) -> bool {
        self.visible.remove(id);
        if self.entities.remove(id).is_some() {
            tracing::debug!(%id, "remote entity retired");
            self.pending_removed.push(id.to_string());
            true
        } else {
            false
        }
    }

    /// Drop every entity and the visible set. Used at session end.
    pub fn clear(&mut self) {
        if !self.entities.is_empty() {
            tracing::debug!(count = self.entities.len(), "clearing remote entities");
        }
        self.pending_removed.extend(self.entities.drain().map(|(id, _)| id));
        self.pending_hidden.clear();
        self.visible.clear();
        self.local_id = None;
    }

    fn evict_expired(&mut self, now: i64) -> Vec<PlayerId> {
        let retention = self.settings.hidden_retention_ms;
        let expired: Vec<PlayerId> = self
            .entities
            .values()
            .filter(|view| view.hidden_for(now).is_some_and(|age| age >= retention))
            .map(|view| view.id().to_string())
            .collect();
        for id in &expired {
            self.retire(id);
        }
        expired
    }

    /// Advance every visible entity to `now_ms` and hand it to `sink`.
    /// Hidden entities get no per-frame work. Also reports hides and
    /// retirements queued since the last call. Returns the number updated.
    pub fn advance_all(&mut self, now_ms: i64, sink: &mut impl PoseSink) -> usize {
        for id in self.pending_hidden.drain(..) {
            sink.hide_remote(&id);
        }
        for id in self.pending_removed.drain(..) {
            sink.remove_remote(&id);
        }

        let params = self.settings.smoothing;
        let mut updated = 0;
        for view in self.entities.values_mut() {
            if !view.tier().is_visible() {
                continue;
            }
            if view.advance(now_ms, params).is_some() {
                sink.update_remote_pose(view);
                updated += 1;
            }
        }
        updated
    }

    pub fn get(&self, id: &str) -> Option<&EntityView> {
        self.entities.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityView> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Ids visible (near or mid) after the last frame.
    pub fn visible_ids(&self) -> &HashSet<PlayerId> {
        &self.visible
    }
}

/// Arrival stamps keep moving forward per entity, so frames drained together
/// at one clock reading still land in order.
fn next_stamp(view: &EntityView, stamp: i64, source: TimestampSource) -> i64 {
    match (source, view.buffer().latest()) {
        (TimestampSource::Arrival, Some(latest)) => stamp.max(latest.timestamp_ms + 1),
        _ => stamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::entity::LodTier;
    use glam::Vec3;
    use murmur_net::{DomainEvent, EventTag, ReducedEntitySample};
    use serde_json::Map;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn near(id: &str, x: f32) -> FullEntitySample {
        FullEntitySample {
            id: id.into(),
            username: Some(format!("user-{id}")),
            position: Vec3::new(x, 0.0, 0.0),
            yaw: 0.0,
            pitch: 0.2,
            heat: 1.0,
            wanted: false,
            match_state: "idle".into(),
            stunned: false,
            tagged: None,
            murmuration_tag: None,
            murmuration_color: None,
        }
    }

    fn mid(id: &str, x: f32, wanted: bool) -> ReducedEntitySample {
        ReducedEntitySample {
            id: id.into(),
            username: None,
            position: Vec3::new(x, 0.0, 0.0),
            yaw: 0.0,
            wanted,
            tagged: None,
        }
    }

    fn frame() -> WorldStateFrame {
        WorldStateFrame {
            tick: 0,
            timestamp_ms: 0,
            near_entities: Vec::new(),
            mid_entities: Vec::new(),
            removed_ids: Vec::new(),
            events: Vec::new(),
        }
    }

    fn setup() -> (InterestReconciler, Arc<ManualClock>, EventRelay) {
        let clock = Arc::new(ManualClock::new(1_000));
        let reconciler = InterestReconciler::new(SyncSettings::default(), clock.clone());
        (reconciler, clock, EventRelay::new())
    }

    #[derive(Default)]
    struct RecordingSink {
        updated: Vec<String>,
        hidden: Vec<String>,
        removed: Vec<String>,
    }

    impl PoseSink for RecordingSink {
        fn update_remote_pose(&mut self, view: &EntityView) {
            self.updated.push(view.id().to_string());
        }
        fn hide_remote(&mut self, id: &str) {
            self.hidden.push(id.to_string());
        }
        fn remove_remote(&mut self, id: &str) {
            self.removed.push(id.to_string());
        }
    }

    // -----------------------------------------------------------------------
    // Tier assignment
    // -----------------------------------------------------------------------

    #[test]
    fn test_near_and_mid_tiers_assigned() {
        let (mut rec, _clock, mut relay) = setup();
        let mut f = frame();
        f.near_entities.push(near("p2", 1.0));
        f.mid_entities.push(mid("p3", 50.0, true));

        let summary = rec.apply_frame(f, &mut relay);
        assert_eq!(summary.created.len(), 2);
        assert_eq!(rec.get("p2").unwrap().tier(), LodTier::Near);
        assert_eq!(rec.get("p3").unwrap().tier(), LodTier::Mid);
        assert!(rec.get("p3").unwrap().state.wanted);
        assert_eq!(rec.get("p3").unwrap().buffer().latest().unwrap().pitch, 0.0);
    }

    #[test]
    fn test_local_player_never_gets_a_view() {
        let (mut rec, _clock, mut relay) = setup();
        rec.set_local_id("p1");
        let mut f = frame();
        f.near_entities.push(near("p1", 0.0));
        f.mid_entities.push(mid("p1", 0.0, false));
        rec.apply_frame(f, &mut relay);
        assert!(rec.is_empty());
    }

    #[test]
    fn test_silent_disappearance_hides() {
        let (mut rec, clock, mut relay) = setup();
        let mut f = frame();
        f.near_entities.push(near("p2", 1.0));
        rec.apply_frame(f, &mut relay);

        clock.advance(50);
        let summary = rec.apply_frame(frame(), &mut relay);
        assert_eq!(summary.hidden, vec!["p2".to_string()]);
        assert_eq!(rec.get("p2").unwrap().tier(), LodTier::Hidden);
        assert!(rec.visible_ids().is_empty());
    }

    #[test]
    fn test_removed_id_wins_over_near_listing() {
        let (mut rec, _clock, mut relay) = setup();
        let mut f = frame();
        f.near_entities.push(near("p2", 1.0));
        f.removed_ids.push("p2".into());
        rec.apply_frame(f, &mut relay);
        assert_eq!(rec.get("p2").unwrap().tier(), LodTier::Hidden);
        assert!(!rec.visible_ids().contains("p2"));
    }

    #[test]
    fn test_hidden_entity_reappears_with_history() {
        let (mut rec, clock, mut relay) = setup();
        let mut f = frame();
        f.near_entities.push(near("p2", 1.0));
        rec.apply_frame(f, &mut relay);

        clock.advance(50);
        let mut f = frame();
        f.removed_ids.push("p2".into());
        rec.apply_frame(f, &mut relay);

        clock.advance(50);
        let mut f = frame();
        f.mid_entities.push(mid("p2", 3.0, false));
        let summary = rec.apply_frame(f, &mut relay);
        assert!(summary.created.is_empty());
        let view = rec.get("p2").unwrap();
        assert_eq!(view.tier(), LodTier::Mid);
        assert_eq!(view.buffer().len(), 2);
    }

    #[test]
    fn test_near_wins_when_listed_twice() {
        let (mut rec, _clock, mut relay) = setup();
        let mut f = frame();
        f.near_entities.push(near("p2", 1.0));
        f.mid_entities.push(mid("p2", 1.0, true));
        rec.apply_frame(f, &mut relay);
        let view = rec.get("p2").unwrap();
        assert_eq!(view.tier(), LodTier::Near);
        assert_eq!(view.buffer().len(), 1);
    }

    // -----------------------------------------------------------------------
    // Retention and lifecycle
    // -----------------------------------------------------------------------

    #[test]
    fn test_hidden_entities_evicted_after_retention() {
        let (mut rec, clock, mut relay) = setup();
        let mut f = frame();
        f.near_entities.push(near("p2", 1.0));
        rec.apply_frame(f, &mut relay);
        clock.advance(10);
        rec.apply_frame(frame(), &mut relay);

        clock.advance(29_000);
        assert!(rec.apply_frame(frame(), &mut relay).evicted.is_empty());

        clock.advance(1_000);
        let summary = rec.apply_frame(frame(), &mut relay);
        assert_eq!(summary.evicted, vec!["p2".to_string()]);
        assert!(rec.is_empty());
    }

    #[test]
    fn test_retire_and_clear() {
        let (mut rec, _clock, mut relay) = setup();
        let mut f = frame();
        f.near_entities.push(near("p2", 1.0));
        f.near_entities.push(near("p3", 2.0));
        f.mid_entities.push(mid("p4", 3.0, false));
        rec.apply_frame(f, &mut relay);

        assert!(rec.retire("p2"));
        assert!(!rec.retire("p2"));
        assert_eq!(rec.len(), 2);

        rec.clear();
        assert!(rec.is_empty());
        assert!(rec.visible_ids().is_empty());
    }

    #[test]
    fn test_bootstrap_from_welcome() {
        let (mut rec, _clock, _relay) = setup();
        rec.set_local_id("p1");
        let world = LegacyWorldState {
            players: vec![near("p1", 0.0), near("p2", 5.0), near("p3", 6.0)],
            timestamp_ms: None,
        };
        assert_eq!(rec.bootstrap(&world), 2);
        assert_eq!(rec.get("p2").unwrap().tier(), LodTier::Near);
        assert_eq!(rec.get("p2").unwrap().username(), Some("user-p2"));
        assert!(rec.get("p1").is_none());
    }

    #[test]
    fn test_frames_at_one_clock_reading_keep_newest() {
        let (mut rec, _clock, mut relay) = setup();
        for x in [10.0, 20.0] {
            let mut f = frame();
            f.near_entities.push(near("p2", x));
            f.mid_entities.push(mid("p3", x, false));
            rec.apply_frame(f, &mut relay);
        }

        for id in ["p2", "p3"] {
            let buffer = rec.get(id).unwrap().buffer();
            assert_eq!(buffer.len(), 2);
            assert_eq!(buffer.latest().unwrap().position.x, 20.0);
            assert_eq!(buffer.latest().unwrap().timestamp_ms, 1_001);
        }
    }

    #[test]
    fn test_server_timestamp_source() {
        let clock = Arc::new(ManualClock::new(1_000));
        let settings = SyncSettings {
            timestamp_source: TimestampSource::Server,
            ..SyncSettings::default()
        };
        let mut rec = InterestReconciler::new(settings, clock);
        let mut relay = EventRelay::new();
        let mut f = frame();
        f.timestamp_ms = 77_000;
        f.near_entities.push(near("p2", 1.0));
        rec.apply_frame(f, &mut relay);
        assert_eq!(
            rec.get("p2").unwrap().buffer().latest().unwrap().timestamp_ms,
            77_000
        );
    }

    // -----------------------------------------------------------------------
    // Events and rendering
    // -----------------------------------------------------------------------

    #[test]
    fn test_frame_events_relayed_in_order() {
        let (mut rec, _clock, mut relay) = setup();
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        relay.register(EventTag::PvpHit, move |_: &DomainEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let mut f = frame();
        f.events.push(DomainEvent::new(EventTag::PvpHit, Map::new()));
        f.events.push(DomainEvent::new(EventTag::RaceEnd, Map::new()));
        f.events.push(DomainEvent::new(EventTag::PvpHit, Map::new()));
        let summary = rec.apply_frame(f, &mut relay);
        assert_eq!(summary.events_delivered, 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_advance_all_skips_hidden_and_reports_changes() {
        let (mut rec, clock, mut relay) = setup();
        let mut f = frame();
        f.near_entities.push(near("p2", 1.0));
        f.mid_entities.push(mid("p3", 2.0, false));
        rec.apply_frame(f, &mut relay);

        clock.advance(50);
        let mut f = frame();
        f.near_entities.push(near("p2", 1.5));
        rec.apply_frame(f, &mut relay);
        rec.retire("p2");

        let mut sink = RecordingSink::default();
        let updated = rec.advance_all(clock.now_ms(), &mut sink);
        assert_eq!(updated, 0);
        assert_eq!(sink.hidden, vec!["p3".to_string()]);
        assert_eq!(sink.removed, vec!["p2".to_string()]);

        let mut f = frame();
        f.near_entities.push(near("p4", 9.0));
        rec.apply_frame(f, &mut relay);
        let mut sink = RecordingSink::default();
        assert_eq!(rec.advance_all(clock.now_ms(), &mut sink), 1);
        assert_eq!(sink.updated, vec!["p4".to_string()]);
        // p3 was already reported hidden.
        assert!(sink.hidden.is_empty());
    }
}
