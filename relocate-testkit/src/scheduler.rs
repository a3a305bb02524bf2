use async_trait::async_trait;
use parking_lot::Mutex;
use relocate::{Node, NodeName, TargetBinding, TargetHandle, TargetRequest, TargetScheduler};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// In-memory cluster that places target contexts on labelled nodes.
///
/// A pending target is bound, on the next binding check, to the first node
/// (by name) that carries every pair of its placement and is not the source
/// node. Labels can change at any time, so a target that was pending can
/// become placeable later.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

#[derive(Default)]
struct ClusterState {
    nodes: BTreeMap<NodeName, Node>,
    targets: HashMap<Uuid, FakeTarget>,
    create_requests: Vec<TargetRequest>,
    teardowns: Vec<TargetHandle>,
    create_failure: Option<String>,
    create_stall: Option<CreateStall>,
}

#[derive(Clone, Copy, Debug)]
enum CreateStall {
    Delay(Duration),
    Forever,
}

struct FakeTarget {
    request: TargetRequest,
    bound: Option<NodeName>,
    lost: Option<String>,
}

impl std::fmt::Debug for FakeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FakeCluster")
            .field("nodes", &state.nodes.len())
            .field("live_targets", &state.targets.len())
            .field("creates", &state.create_requests.len())
            .finish()
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(self, node: Node) -> Self {
        self.add_node(node);
        self
    }

    pub fn add_node(&self, node: Node) {
        self.state.lock().nodes.insert(node.name.clone(), node);
    }

    /// Set a label on an existing node. Unknown nodes are ignored.
    pub fn set_label(&self, node: &str, key: &str, value: &str) {
        if let Some(node) = self.state.lock().nodes.get_mut(&NodeName::new(node)) {
            node.labels.insert(key.to_string(), value.to_string());
        }
    }

    pub fn remove_label(&self, node: &str, key: &str) {
        if let Some(node) = self.state.lock().nodes.get_mut(&NodeName::new(node)) {
            node.labels.remove(key);
        }
    }

    /// Make every following `create_target` call fail.
    pub fn fail_creates(&self, reason: impl Into<String>) {
        self.state.lock().create_failure = Some(reason.into());
    }

    /// Make every following `create_target` call take `delay` before the
    /// target exists.
    pub fn delay_creates(&self, delay: Duration) {
        self.state.lock().create_stall = Some(CreateStall::Delay(delay));
    }

    /// Make every following `create_target` call never return.
    pub fn hang_creates(&self) {
        self.state.lock().create_stall = Some(CreateStall::Forever);
    }

    /// Evict every live target context.
    pub fn lose_all_targets(&self, reason: &str) {
        for target in self.state.lock().targets.values_mut() {
            target.lost = Some(reason.to_string());
        }
    }

    /// Number of `create_target` calls, including failed ones.
    pub fn create_calls(&self) -> usize {
        self.state.lock().create_requests.len()
    }

    /// Every `create_target` request, in call order.
    pub fn create_requests(&self) -> Vec<TargetRequest> {
        self.state.lock().create_requests.clone()
    }

    pub fn teardowns(&self) -> Vec<TargetHandle> {
        self.state.lock().teardowns.clone()
    }

    /// Target contexts created and not torn down.
    pub fn live_targets(&self) -> usize {
        self.state.lock().targets.len()
    }

    /// Node a target was bound to, if any.
    pub fn bound_node(&self, handle: &TargetHandle) -> Option<NodeName> {
        self.state
            .lock()
            .targets
            .get(&handle.id)
            .and_then(|target| target.bound.clone())
    }

    pub fn assert_no_live_targets(&self) {
        let live = self.live_targets();
        assert_eq!(live, 0, "Expected no live target contexts, found {live}");
    }
}

#[async_trait]
impl TargetScheduler for FakeCluster {
    async fn create_target(&self, request: &TargetRequest) -> anyhow::Result<TargetHandle> {
        let stall = {
            let mut state = self.state.lock();
            state.create_requests.push(request.clone());
            state.create_stall
        };
        match stall {
            Some(CreateStall::Delay(delay)) => tokio::time::sleep(delay).await,
            Some(CreateStall::Forever) => std::future::pending::<()>().await,
            None => {}
        }

        let mut state = self.state.lock();
        if let Some(reason) = &state.create_failure {
            anyhow::bail!("{reason}");
        }

        let handle = TargetHandle::new(request.migration_id);
        state.targets.insert(
            handle.id,
            FakeTarget {
                request: request.clone(),
                bound: None,
                lost: None,
            },
        );
        tracing::debug!(target = %handle, "fake target created");
        Ok(handle)
    }

    async fn binding(&self, handle: &TargetHandle) -> anyhow::Result<TargetBinding> {
        let mut state = self.state.lock();
        let ClusterState { nodes, targets, .. } = &mut *state;

        let Some(target) = targets.get_mut(&handle.id) else {
            return Ok(TargetBinding::Lost {
                reason: format!("{handle} no longer exists"),
            });
        };
        if let Some(reason) = &target.lost {
            return Ok(TargetBinding::Lost {
                reason: reason.clone(),
            });
        }
        if let Some(node) = &target.bound {
            return Ok(TargetBinding::Placed(node.clone()));
        }

        let candidate = nodes.values().find(|node| {
            Some(&node.name) != target.request.source_node.as_ref()
                && node.satisfies(&target.request.placement)
        });
        match candidate {
            Some(node) => {
                target.bound = Some(node.name.clone());
                Ok(TargetBinding::Placed(node.name.clone()))
            }
            None => Ok(TargetBinding::Pending),
        }
    }

    async fn teardown(&self, handle: &TargetHandle) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.targets.remove(&handle.id);
        state.teardowns.push(handle.clone());
        Ok(())
    }
}
