use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::fmt;

use sync_proto::VehicleRecord;
use tracing::{debug, info};

use crate::body::PhysicalBody;
use crate::kinematics::{KinematicReconciler, MotionBranch, MotionState, PoseSample};

/// Identifier the peer assigns to a vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteEntityId(String);

impl RemoteEntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteEntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for RemoteEntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RemoteEntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Host-side collaborator that owns physical bodies and visual models.
pub trait ProxyWorld {
    type Body: PhysicalBody;

    /// Visual model registered for a peer type tag, if any.
    fn resolve_visual(&self, type_tag: &str) -> Option<String>;
    fn default_visual(&self) -> String;
    fn spawn_body(&mut self, id: &RemoteEntityId, visual: &str, pose: &PoseSample) -> Self::Body;
    fn release_body(&mut self, id: &RemoteEntityId, body: Self::Body);
}

#[derive(Debug)]
pub struct EntityProxy<B> {
    id: RemoteEntityId,
    body: B,
    type_tag: String,
    visual: String,
    /// `None` for the ego, which is driven locally.
    motion: Option<MotionState>,
}

impl<B> EntityProxy<B> {
    pub fn id(&self) -> &RemoteEntityId {
        &self.id
    }

    pub fn body(&self) -> &B {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut B {
        &mut self.body
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn visual(&self) -> &str {
        &self.visual
    }

    pub fn motion(&self) -> Option<&MotionState> {
        self.motion.as_ref()
    }

    pub fn is_ego(&self) -> bool {
        self.motion.is_none()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub created: Vec<RemoteEntityId>,
    pub updated: usize,
    pub destroyed: Vec<RemoteEntityId>,
    pub ego_reported: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub straight: usize,
    pub turning: usize,
    pub degenerate: usize,
}

/// Tracks one proxy per live remote id plus the protected ego.
#[derive(Debug)]
pub struct ProxyRegistry<B> {
    proxies: HashMap<RemoteEntityId, EntityProxy<B>>,
    ego_id: Option<RemoteEntityId>,
}

impl<B> Default for ProxyRegistry<B> {
    fn default() -> Self {
        Self {
            proxies: HashMap::new(),
            ego_id: None,
        }
    }
}

impl<B: PhysicalBody> ProxyRegistry<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the ego proxy. Returns the body of a previously registered
    /// ego, which is no longer tracked.
    pub fn register_ego(
        &mut self,
        id: RemoteEntityId,
        body: B,
        type_tag: impl Into<String>,
        visual: impl Into<String>,
    ) -> Option<B> {
        let previous = self
            .ego_id
            .take()
            .and_then(|old| self.proxies.remove(&old))
            .map(|proxy| proxy.body);
        // A remote proxy that happens to share the id is replaced as well.
        let displaced = self.proxies.remove(&id).map(|proxy| proxy.body);
        self.proxies.insert(
            id.clone(),
            EntityProxy {
                id: id.clone(),
                body,
                type_tag: type_tag.into(),
                visual: visual.into(),
                motion: None,
            },
        );
        self.ego_id = Some(id);
        previous.or(displaced)
    }

    pub fn ego_id(&self) -> Option<&RemoteEntityId> {
        self.ego_id.as_ref()
    }

    pub fn ego(&self) -> Option<&EntityProxy<B>> {
        self.ego_id.as_ref().and_then(|id| self.proxies.get(id))
    }

    pub fn ego_mut(&mut self) -> Option<&mut EntityProxy<B>> {
        let id = self.ego_id.as_ref()?;
        self.proxies.get_mut(id)
    }

    pub fn get(&self, id: &str) -> Option<&EntityProxy<B>> {
        self.proxies.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut EntityProxy<B>> {
        self.proxies.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.proxies.contains_key(id)
    }

    /// Number of tracked proxies, ego included.
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn remote_count(&self) -> usize {
        self.proxies.len() - usize::from(self.ego().is_some())
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityProxy<B>> {
        self.proxies.values()
    }

    pub fn bodies_mut(&mut self) -> impl Iterator<Item = &mut B> {
        self.proxies.values_mut().map(|proxy| &mut proxy.body)
    }

    /// Sorted ids of every tracked remote proxy (ego excluded).
    pub fn remote_ids(&self) -> Vec<RemoteEntityId> {
        let mut ids: Vec<RemoteEntityId> = self
            .proxies
            .values()
            .filter(|proxy| !proxy.is_ego())
            .map(|proxy| proxy.id.clone())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Reconciles the tracked set with one vehicle batch: ids missing from the
    /// batch are released, new ids are spawned, known ids receive the sample.
    pub fn apply_batch<W>(
        &mut self,
        world: &mut W,
        records: &[VehicleRecord],
        arrival_time: f64,
    ) -> BatchOutcome
    where
        W: ProxyWorld<Body = B>,
    {
        let mut outcome = BatchOutcome::default();
        let ego_id = self.ego_id.as_ref().map(RemoteEntityId::as_str);
        let incoming: HashSet<&str> = records
            .iter()
            .map(|record| record.vehicle_id.as_str())
            .filter(|id| Some(*id) != ego_id)
            .collect();

        let stale: Vec<RemoteEntityId> = self
            .remote_ids()
            .into_iter()
            .filter(|id| !incoming.contains(id.as_str()))
            .collect();
        for id in stale {
            if let Some(proxy) = self.proxies.remove(&id) {
                world.release_body(&id, proxy.body);
                outcome.destroyed.push(id);
            }
        }

        for record in records {
            if Some(record.vehicle_id.as_str()) == self.ego_id.as_ref().map(RemoteEntityId::as_str)
            {
                outcome.ego_reported = true;
                continue;
            }

            let sample = PoseSample::from_record(record, arrival_time);
            if let Some(proxy) = self.proxies.get_mut(record.vehicle_id.as_str()) {
                if let Some(motion) = proxy.motion.as_mut() {
                    motion.push_sample(sample);
                }
                outcome.updated += 1;
                continue;
            }

            let id = RemoteEntityId::new(record.vehicle_id.clone());
            let visual = match world.resolve_visual(&record.type_tag) {
                Some(visual) => visual,
                None => {
                    let fallback = world.default_visual();
                    debug!(
                        target: "traffic_bridge::lifecycle",
                        vehicle = %id,
                        type_tag = %record.type_tag,
                        fallback = %fallback,
                        "proxy.visual_unresolved"
                    );
                    fallback
                }
            };
            let body = world.spawn_body(&id, &visual, &sample);
            self.proxies.insert(
                id.clone(),
                EntityProxy {
                    id: id.clone(),
                    body,
                    type_tag: record.type_tag.clone(),
                    visual,
                    motion: Some(MotionState::new(sample)),
                },
            );
            outcome.created.push(id);
        }

        if !outcome.created.is_empty() || !outcome.destroyed.is_empty() {
            info!(
                target: "traffic_bridge::lifecycle",
                created = outcome.created.len(),
                updated = outcome.updated,
                destroyed = outcome.destroyed.len(),
                live = self.remote_count(),
                "vehicles.batch_applied"
            );
        }
        outcome
    }

    /// Releases every remote proxy, keeping the ego.
    pub fn clear_remote<W>(&mut self, world: &mut W) -> Vec<RemoteEntityId>
    where
        W: ProxyWorld<Body = B>,
    {
        let ids = self.remote_ids();
        for id in &ids {
            if let Some(proxy) = self.proxies.remove(id) {
                world.release_body(id, proxy.body);
            }
        }
        ids
    }

    /// Runs the reconciler for every remote proxy.
    pub fn reconcile_all(
        &mut self,
        reconciler: &KinematicReconciler,
        tick_seconds: f32,
    ) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        for proxy in self.proxies.values_mut() {
            let Some(motion) = proxy.motion.as_mut() else {
                continue;
            };
            match reconciler.apply(motion, &mut proxy.body, tick_seconds) {
                MotionBranch::Straight => summary.straight += 1,
                MotionBranch::Turning => summary.turning += 1,
                MotionBranch::Degenerate => summary.degenerate += 1,
            }
        }
        summary
    }
}
