//! Scenario simulator: drives a [`NodeEngine`] against in-memory ledgers and a
//! manual clock, one [`ScenarioStep`] at a time.

use crate::application::engine::NodeEngine;
use crate::application::scheduler::TickReport;
use crate::config::EngineConfig;
use crate::domain::account::{Account, Principal, Subaccount, Tokens};
use crate::domain::endpoint::{DestIcEndpoint, DestinationEndpoint};
use crate::domain::node::NodeId;
use crate::domain::ports::{Ledger, NodeStoreBox};
use crate::domain::request::{ModifyRequest, NodeRequest};
use crate::domain::time::{ManualClock, Timestamp};
use crate::error::{NodeError, Result};
use crate::infrastructure::in_memory::InMemoryLedger;
use crate::interfaces::csv::balance_writer::BalanceRow;
use crate::interfaces::json::scenario_reader::{ScenarioDestination, ScenarioStep};
use crate::interfaces::router::{RequestRouter, Response};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Simulated time at which every scenario starts.
pub const SCENARIO_EPOCH_SECS: u64 = 1_700_000_000;

pub struct ScenarioRunner {
    router: RequestRouter,
    ledgers: BTreeMap<Principal, Arc<InMemoryLedger>>,
    default_ledger: Principal,
    clock: ManualClock,
    totals: TickReport,
    ticks: usize,
}

impl ScenarioRunner {
    pub fn new(config: EngineConfig, store: NodeStoreBox) -> Result<Self> {
        config.validate()?;
        let ledgers: BTreeMap<Principal, Arc<InMemoryLedger>> = config
            .ledgers
            .iter()
            .map(|l| {
                let ledger = Arc::new(InMemoryLedger::new(l.id.clone(), l.fee(), l.minter.clone()));
                (l.id.clone(), ledger)
            })
            .collect();
        let default_ledger = config
            .ledgers
            .first()
            .map(|l| l.id.clone())
            .ok_or_else(|| NodeError::ConfigError("no ledger configured".to_string()))?;

        let clock = ManualClock::new(Timestamp::from_secs(SCENARIO_EPOCH_SECS));
        let handles: Vec<Arc<dyn Ledger>> = ledgers
            .values()
            .map(|l| l.clone() as Arc<dyn Ledger>)
            .collect();
        let engine = NodeEngine::new(config, store, handles, Arc::new(clock.clone()))?;

        Ok(Self {
            router: RequestRouter::new(Arc::new(engine)),
            ledgers,
            default_ledger,
            clock,
            totals: TickReport::default(),
            ticks: 0,
        })
    }

    pub fn router(&self) -> &RequestRouter {
        &self.router
    }

    pub fn ledger(&self, id: &Principal) -> Option<&Arc<InMemoryLedger>> {
        self.ledgers.get(id)
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Accumulated tick reports; `failed_nodes` holds every failure, repeats included.
    pub fn totals(&self) -> &TickReport {
        &self.totals
    }

    pub fn ticks(&self) -> usize {
        self.ticks
    }

    /// Applies one step. Request-level failures are turned into errors so the
    /// caller can report them; the engine state is unaffected by them.
    pub async fn apply(&mut self, step: ScenarioStep) -> Result<()> {
        match step {
            ScenarioStep::CreateNode {
                caller,
                request,
                create,
            } => {
                let mut destinations = Vec::with_capacity(request.destinations.len());
                for destination in request.destinations {
                    destinations.push(self.resolve_destination(destination).await?);
                }
                let request = NodeRequest {
                    controllers: request.controllers,
                    destinations,
                    refund: request.refund,
                };
                let node = accept(self.router.create_node(&caller, request, create).await)?;
                info!(node = %node.id, vector = %node.vector_kind, "scenario node created");
            }
            ScenarioStep::ModifyNode {
                caller,
                node,
                request,
            } => {
                let destinations = match request.destinations {
                    Some(list) => {
                        let mut resolved = Vec::with_capacity(list.len());
                        for destination in list {
                            resolved.push(self.resolve_destination(destination).await?);
                        }
                        Some(resolved)
                    }
                    None => None,
                };
                let patch = ModifyRequest {
                    destinations,
                    refund: request.refund,
                    controllers: request.controllers,
                    variables: request.variables,
                };
                accept(self.router.modify_node(&caller, node, patch).await)?;
            }
            ScenarioStep::StopNode { caller, node } => {
                accept(self.router.stop_node(&caller, node).await)?;
            }
            ScenarioStep::StartNode { caller, node } => {
                accept(self.router.start_node(&caller, node).await)?;
            }
            ScenarioStep::Fund {
                node,
                source,
                amount,
            } => {
                let (ledger, account) = self.source_of(node, source).await?;
                self.ledger_or_err(&ledger)?.mint(&account, amount).await;
            }
            ScenarioStep::Mint {
                ledger,
                account,
                amount,
            } => {
                let ledger = ledger.unwrap_or_else(|| self.default_ledger.clone());
                self.ledger_or_err(&ledger)?.mint(&account, amount).await;
            }
            ScenarioStep::Start => accept(self.router.start().await)?,
            ScenarioStep::Stop => accept(self.router.stop())?,
            ScenarioStep::Tick => self.tick().await?,
            ScenarioStep::Advance { secs, times } => {
                for _ in 0..times {
                    self.clock.advance_secs(secs);
                    self.tick().await?;
                }
            }
        }
        Ok(())
    }

    /// Every non-zero balance across all ledgers, ordered by ledger then account.
    pub async fn balances(&self) -> Vec<BalanceRow> {
        let mut rows = Vec::new();
        for (id, ledger) in &self.ledgers {
            for (account, balance) in ledger.balances().await {
                rows.push(BalanceRow {
                    ledger: id.clone(),
                    subaccount: account
                        .subaccount
                        .filter(|s| *s != Subaccount::DEFAULT),
                    owner: account.owner,
                    balance,
                });
            }
        }
        rows
    }

    /// Sum of every balance on `ledger`.
    pub async fn total_supply(&self, ledger: &Principal) -> Result<Tokens> {
        Ok(self.ledger_or_err(ledger)?.total_supply().await)
    }

    async fn tick(&mut self) -> Result<()> {
        let report = self.router.engine().tick().await?;
        debug!(tick = self.ticks, ?report, "scenario tick");
        self.ticks += 1;
        self.totals.processed += report.processed;
        self.totals.skipped_in_flight += report.skipped_in_flight;
        self.totals.transfers += report.transfers;
        self.totals.transient_failures += report.transient_failures;
        self.totals.rejections += report.rejections;
        self.totals.failed_nodes.extend(report.failed_nodes);
        Ok(())
    }

    async fn resolve_destination(
        &self,
        destination: ScenarioDestination,
    ) -> Result<DestinationEndpoint> {
        match destination {
            ScenarioDestination::Endpoint(endpoint) => Ok(endpoint),
            ScenarioDestination::NodeSource { node_source } => {
                let (ledger, account) =
                    self.source_of(node_source.node, node_source.source).await?;
                let name = node_source
                    .name
                    .unwrap_or_else(|| format!("node-{}-source-{}", node_source.node, node_source.source));
                Ok(DestinationEndpoint::Ic(DestIcEndpoint {
                    name,
                    ledger,
                    account: Some(account),
                }))
            }
        }
    }

    async fn source_of(&self, node: NodeId, source: usize) -> Result<(Principal, Account)> {
        let addresses = accept(self.router.get_node_address(node).await)?;
        let address = addresses.into_iter().nth(source).ok_or_else(|| {
            NodeError::ValidationError(format!("node {} has no source {}", node, source))
        })?;
        Ok((address.ledger, address.account))
    }

    fn ledger_or_err(&self, id: &Principal) -> Result<&Arc<InMemoryLedger>> {
        self.ledgers
            .get(id)
            .ok_or_else(|| NodeError::ValidationError(format!("unknown ledger {}", id)))
    }
}

fn accept<T>(response: Response<T>) -> Result<T> {
    match response {
        Response::Ok(value) => Ok(value),
        Response::Err(message) => Err(NodeError::ValidationError(message)),
    }
}
