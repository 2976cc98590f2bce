use crate::config::EngineConfig;
use crate::domain::account::{Principal, Tokens};
use crate::domain::endpoint::{DestinationEndpoint, Endpoint, SourceAddress};
use crate::domain::node::{Node, NodeId, NodeStatus, NodeView, SourceActivity};
use crate::domain::ports::NodeStoreBox;
use crate::domain::request::{ModifyRequest, NodeRequest};
use crate::domain::time::Timestamp;
use crate::domain::vector::{CreateRequest, RandomPolicy, Vector};
use crate::error::{NodeError, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Owns every node and funnels all mutation through validated operations.
///
/// Writes are serialized by `write_lock` and each one stores a complete node,
/// so readers observe either the previous or the next version, never a mix.
pub struct NodeRegistry {
    store: NodeStoreBox,
    engine_principal: Principal,
    ledgers: Vec<Principal>,
    random_policy: RandomPolicy,
    rng: Mutex<StdRng>,
    write_lock: tokio::sync::Mutex<()>,
}

impl NodeRegistry {
    /// Creates a registry accepting nodes on `ledgers`.
    pub fn new(store: NodeStoreBox, config: &EngineConfig, ledgers: Vec<Principal>) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            store,
            engine_principal: config.engine_principal.clone(),
            ledgers,
            random_policy: config.random_policy,
            rng: Mutex::new(rng),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn engine_principal(&self) -> &Principal {
        &self.engine_principal
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validates and stores a new node.
    ///
    /// The returned view carries the derived source accounts, which are the
    /// only way for callers to learn where to fund the node.
    pub async fn create_node(
        &self,
        caller: &Principal,
        request: NodeRequest,
        create: CreateRequest,
        now: Timestamp,
        running: bool,
    ) -> Result<NodeView> {
        let vector = {
            let mut rng = self.rng();
            Vector::from_request(create, &mut *rng)?
        };
        let controllers = normalize_controllers(request.controllers)?;
        self.validate_shape(&vector, &request.destinations, &request.refund)?;

        let _guard = self.write_lock.lock().await;
        let id = self.store.allocate_id().await?;
        let sources = Node::derive_sources(id, &self.engine_principal, &vector);
        let node = Node {
            id,
            activity: vec![SourceActivity::default(); sources.len()],
            sources,
            vector,
            destinations: request.destinations,
            refund: request.refund,
            controllers,
            status: if running {
                NodeStatus::Running
            } else {
                NodeStatus::Created
            },
            created_at: now,
            modified_at: now,
        };
        check_no_self_loop(&node)?;
        self.store.store(node.clone()).await?;

        info!(
            node = %id,
            vector = %node.vector.kind(),
            caller = %caller,
            status = ?node.status,
            "node created"
        );
        Ok(node.view())
    }

    /// Applies `patch` to a node as a single write. On any error the stored
    /// node is left exactly as it was.
    pub async fn modify_node(
        &self,
        id: NodeId,
        caller: &Principal,
        patch: ModifyRequest,
        now: Timestamp,
    ) -> Result<NodeView> {
        let _guard = self.write_lock.lock().await;
        let node = self.authorized(id, caller).await?;

        let mut updated = node.clone();
        if let Some(destinations) = patch.destinations {
            updated.destinations = destinations;
        }
        if let Some(refund) = patch.refund {
            updated.refund = refund;
        }
        if let Some(controllers) = patch.controllers {
            updated.controllers = normalize_controllers(controllers)?;
        }
        if let Some(variables) = patch.variables {
            let mut rng = self.rng();
            updated.vector.apply_variables(variables, &mut *rng)?;
        }
        self.validate_shape(&updated.vector, &updated.destinations, &updated.refund)?;
        check_no_self_loop(&updated)?;
        updated.modified_at = now;

        self.store.store(updated.clone()).await?;
        info!(node = %id, caller = %caller, "node modified");
        Ok(updated.view())
    }

    /// Pauses or resumes a single node.
    pub async fn set_node_active(
        &self,
        id: NodeId,
        caller: &Principal,
        active: bool,
        now: Timestamp,
    ) -> Result<NodeView> {
        let _guard = self.write_lock.lock().await;
        let mut node = self.authorized(id, caller).await?;
        node.status = if active {
            NodeStatus::Running
        } else {
            NodeStatus::Stopped
        };
        node.modified_at = now;
        self.store.store(node.clone()).await?;
        info!(node = %id, caller = %caller, status = ?node.status, "node status changed");
        Ok(node.view())
    }

    pub async fn get_node(&self, id: NodeId) -> Result<Option<NodeView>> {
        Ok(self.store.get(id).await?.map(|node| node.view()))
    }

    pub async fn get_node_address(&self, id: NodeId) -> Result<Vec<SourceAddress>> {
        let node = self.store.get(id).await?.ok_or(NodeError::NotFound(id))?;
        Ok(node.addresses())
    }

    pub async fn list_nodes(&self) -> Result<Vec<NodeView>> {
        Ok(self
            .store
            .get_all()
            .await?
            .iter()
            .map(Node::view)
            .collect())
    }

    pub async fn nodes_by_controller(&self, controller: &Principal) -> Result<Vec<NodeView>> {
        Ok(self
            .store
            .get_all()
            .await?
            .iter()
            .filter(|node| node.is_controller(controller))
            .map(Node::view)
            .collect())
    }

    /// Snapshot of the nodes the scheduler should process, in id order.
    pub async fn running_nodes(&self) -> Result<Vec<Node>> {
        Ok(self
            .store
            .get_all()
            .await?
            .into_iter()
            .filter(|node| node.status == NodeStatus::Running)
            .collect())
    }

    /// Current state of one node, or `None` if it is missing or not running.
    pub async fn running_node(&self, id: NodeId) -> Result<Option<Node>> {
        Ok(self
            .store
            .get(id)
            .await?
            .filter(|node| node.status == NodeStatus::Running))
    }

    /// Moves every `Created` node to `Running`. Returns how many moved.
    pub async fn activate_created(&self, now: Timestamp) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut activated = 0;
        for mut node in self.store.get_all().await? {
            if node.status == NodeStatus::Created {
                node.status = NodeStatus::Running;
                node.modified_at = now;
                self.store.store(node).await?;
                activated += 1;
            }
        }
        Ok(activated)
    }

    /// Commits bookkeeping for a transfer the ledger confirmed.
    pub async fn record_transfer(
        &self,
        id: NodeId,
        source: usize,
        amount: Tokens,
        now: Timestamp,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut node = self.store.get(id).await?.ok_or(NodeError::NotFound(id))?;
        let activity = node.activity.get_mut(source).ok_or_else(|| {
            NodeError::ValidationError(format!("node {} has no source {}", id, source))
        })?;
        activity.record(amount, now);
        {
            let mut rng = self.rng();
            node.vector.after_transfer(self.random_policy, &mut *rng);
        }
        self.store.store(node).await?;
        debug!(node = %id, source, amount = %amount, "transfer recorded");
        Ok(())
    }

    async fn authorized(&self, id: NodeId, caller: &Principal) -> Result<Node> {
        let node = self.store.get(id).await?.ok_or(NodeError::NotFound(id))?;
        if !node.is_controller(caller) {
            return Err(NodeError::Unauthorized {
                node: id,
                caller: caller.clone(),
            });
        }
        Ok(node)
    }

    fn validate_shape(
        &self,
        vector: &Vector,
        destinations: &[DestinationEndpoint],
        refund: &Endpoint,
    ) -> Result<()> {
        let ledger = vector.ledger();
        if !self.ledgers.contains(ledger) {
            return Err(NodeError::ValidationError(format!(
                "unknown ledger {}",
                ledger
            )));
        }

        vector.check_destinations(destinations.len())?;
        for destination in destinations {
            if let DestinationEndpoint::Ic(ep) = destination
                && &ep.ledger != ledger
            {
                return Err(NodeError::ValidationError(format!(
                    "destination {} is on ledger {}, expected {}",
                    ep.name, ep.ledger, ledger
                )));
            }
        }

        match refund {
            Endpoint::Ic(ep) if &ep.ledger == ledger => Ok(()),
            Endpoint::Ic(ep) => Err(NodeError::ValidationError(format!(
                "refund {} is on ledger {}, expected {}",
                ep.name, ep.ledger, ledger
            ))),
            Endpoint::Remote(ep) => Err(NodeError::ValidationError(format!(
                "refund {} must be a ledger account",
                ep.name
            ))),
        }
    }
}

fn normalize_controllers(controllers: Vec<Principal>) -> Result<Vec<Principal>> {
    let mut unique: Vec<Principal> = Vec::with_capacity(controllers.len());
    for controller in controllers {
        if !unique.contains(&controller) {
            unique.push(controller);
        }
    }
    if unique.is_empty() {
        return Err(NodeError::ValidationError(
            "controllers must not be empty".to_string(),
        ));
    }
    Ok(unique)
}

/// A node must not forward into one of its own sources.
fn check_no_self_loop(node: &Node) -> Result<()> {
    let ledger = node.vector.ledger();
    let own: Vec<_> = node.addresses().iter().map(|a| a.account.ledger_key()).collect();
    let targets = node
        .destinations
        .iter()
        .filter_map(|d| d.routable_account(ledger))
        .chain(node.refund_account());
    for account in targets {
        if own.contains(&account.ledger_key()) {
            return Err(NodeError::ValidationError(format!(
                "node {} cannot send to its own source {}",
                node.id, account
            )));
        }
    }
    Ok(())
}
