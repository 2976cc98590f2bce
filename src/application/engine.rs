use crate::application::ledger_client::{LedgerClient, LedgerDirectory};
use crate::application::registry::NodeRegistry;
use crate::application::scheduler::{Scheduler, SchedulerState, TickReport};
use crate::config::EngineConfig;
use crate::domain::account::Principal;
use crate::domain::endpoint::SourceAddress;
use crate::domain::node::{NodeId, NodeView};
use crate::domain::ports::{Ledger, NodeStoreBox};
use crate::domain::request::{ModifyRequest, NodeRequest};
use crate::domain::time::{Clock, Timestamp};
use crate::domain::vector::CreateRequest;
use crate::error::{NodeError, Result};
use std::sync::Arc;
use tracing::info;

/// The main entry point of the node engine.
///
/// `NodeEngine` wires the registry, the scheduler and one ledger client per
/// configured ledger around a single clock. Request handling goes through the
/// registry; fund movement only happens inside [`NodeEngine::tick`].
pub struct NodeEngine {
    config: EngineConfig,
    registry: Arc<NodeRegistry>,
    ledgers: Arc<LedgerDirectory>,
    scheduler: Scheduler,
    clock: Arc<dyn Clock>,
}

impl NodeEngine {
    /// Creates a new `NodeEngine`.
    ///
    /// # Arguments
    ///
    /// * `config` - Engine configuration; validated here.
    /// * `store` - Where nodes are persisted.
    /// * `ledgers` - One handle per ledger nodes may operate on.
    /// * `clock` - Time source for ticks and node timestamps.
    pub fn new(
        config: EngineConfig,
        store: NodeStoreBox,
        ledgers: Vec<Arc<dyn Ledger>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let directory = LedgerDirectory::new(ledgers, &config.retry);
        if directory.is_empty() {
            return Err(NodeError::ConfigError(
                "engine needs at least one ledger".to_string(),
            ));
        }
        let ledgers = Arc::new(directory);
        let registry = Arc::new(NodeRegistry::new(store, &config, ledgers.ids()));
        let scheduler = Scheduler::new(registry.clone(), ledgers.clone(), clock.clone());

        Ok(Self {
            config,
            registry,
            ledgers,
            scheduler,
            clock,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn ledger(&self, id: &Principal) -> Option<Arc<LedgerClient>> {
        self.ledgers.get(id)
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.state() == SchedulerState::Running
    }

    /// Starts processing. Nodes created before the first start begin running.
    pub async fn start(&self) -> Result<()> {
        if self.scheduler.start() {
            let activated = self.registry.activate_created(self.now()).await?;
            info!(activated, "engine started");
        }
        Ok(())
    }

    pub fn stop(&self) {
        if self.scheduler.stop() {
            info!("engine stopped");
        }
    }

    pub async fn tick(&self) -> Result<TickReport> {
        self.scheduler.tick().await
    }

    pub async fn create_node(
        &self,
        caller: &Principal,
        request: NodeRequest,
        create: CreateRequest,
    ) -> Result<NodeView> {
        self.registry
            .create_node(caller, request, create, self.now(), self.is_running())
            .await
    }

    pub async fn modify_node(
        &self,
        caller: &Principal,
        id: NodeId,
        patch: ModifyRequest,
    ) -> Result<NodeView> {
        self.registry
            .modify_node(id, caller, patch, self.now())
            .await
    }

    pub async fn set_node_active(
        &self,
        caller: &Principal,
        id: NodeId,
        active: bool,
    ) -> Result<NodeView> {
        self.registry
            .set_node_active(id, caller, active, self.now())
            .await
    }

    pub async fn get_node(&self, id: NodeId) -> Result<Option<NodeView>> {
        self.registry.get_node(id).await
    }

    pub async fn get_node_address(&self, id: NodeId) -> Result<Vec<SourceAddress>> {
        self.registry.get_node_address(id).await
    }

    pub async fn nodes_by_controller(&self, controller: &Principal) -> Result<Vec<NodeView>> {
        self.registry.nodes_by_controller(controller).await
    }

    pub async fn list_nodes(&self) -> Result<Vec<NodeView>> {
        self.registry.list_nodes().await
    }
}
