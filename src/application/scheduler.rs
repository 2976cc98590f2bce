use crate::application::ledger_client::LedgerDirectory;
use crate::application::registry::NodeRegistry;
use crate::domain::account::Account;
use crate::domain::node::{Node, NodeId};
use crate::domain::time::{Clock, Timestamp};
use crate::domain::vector::{ProcessContext, Target, VectorStrategy};
use crate::error::{NodeError, Result};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Running,
}

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub processed: usize,
    pub skipped_in_flight: usize,
    pub transfers: usize,
    pub transient_failures: usize,
    pub rejections: usize,
    pub failed_nodes: Vec<NodeId>,
}

impl TickReport {
    fn absorb(&mut self, outcome: NodeOutcome) {
        self.processed += 1;
        self.transfers += outcome.transfers;
        self.transient_failures += outcome.transient_failures;
        self.rejections += outcome.rejections;
        if outcome.failed {
            self.failed_nodes.push(outcome.node);
        }
    }
}

struct NodeOutcome {
    node: NodeId,
    transfers: usize,
    transient_failures: usize,
    rejections: usize,
    failed: bool,
}

impl NodeOutcome {
    fn new(node: NodeId) -> Self {
        Self {
            node,
            transfers: 0,
            transient_failures: 0,
            rejections: 0,
            failed: false,
        }
    }

    fn fail(mut self, error: &NodeError) -> Self {
        if matches!(error, NodeError::LedgerTransient(_)) {
            self.transient_failures += 1;
        } else {
            self.failed = true;
        }
        warn!(node = %self.node, error = %error, "node processing interrupted");
        self
    }
}

type InFlightSet = Arc<Mutex<HashSet<NodeId>>>;

/// Marks a node as having a transfer sequence outstanding until dropped.
struct InFlightGuard {
    set: InFlightSet,
    node: NodeId,
}

impl InFlightGuard {
    fn acquire(set: &InFlightSet, node: NodeId) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(node);
        inserted.then(|| Self {
            set: set.clone(),
            node,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.node);
    }
}

/// Memo attached to every transfer: node id, source index and the source's
/// transfer count, so a retried transfer is byte-identical to the original.
pub fn transfer_memo(node: NodeId, source: usize, sequence: u64) -> Vec<u8> {
    let mut memo = Vec::with_capacity(13);
    memo.extend_from_slice(&node.value().to_be_bytes());
    memo.push(source as u8);
    memo.extend_from_slice(&sequence.to_be_bytes());
    memo
}

/// Periodic driver for every running node.
///
/// A tick processes nodes as independent futures. A node that still has a
/// transfer sequence outstanding from an earlier, overlapping tick is skipped.
pub struct Scheduler {
    registry: Arc<NodeRegistry>,
    ledgers: Arc<LedgerDirectory>,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
    in_flight: InFlightSet,
}

impl Scheduler {
    pub fn new(
        registry: Arc<NodeRegistry>,
        ledgers: Arc<LedgerDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            ledgers,
            clock,
            running: AtomicBool::new(false),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Returns `false` if the scheduler was already running.
    pub fn start(&self) -> bool {
        !self.running.swap(true, Ordering::SeqCst)
    }

    /// Takes effect at the next tick boundary. Returns `false` if already idle.
    pub fn stop(&self) -> bool {
        self.running.swap(false, Ordering::SeqCst)
    }

    pub fn state(&self) -> SchedulerState {
        if self.running.load(Ordering::SeqCst) {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    pub async fn tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();
        if self.state() == SchedulerState::Idle {
            return Ok(report);
        }

        let now = self.clock.now();
        let mut work = Vec::new();
        for node in self.registry.running_nodes().await? {
            match InFlightGuard::acquire(&self.in_flight, node.id) {
                Some(guard) => work.push(self.process_current(node.id, now, guard)),
                None => {
                    debug!(node = %node.id, "transfers still in flight, skipping");
                    report.skipped_in_flight += 1;
                }
            }
        }

        for outcome in join_all(work).await.into_iter().flatten() {
            report.absorb(outcome);
        }
        debug!(
            processed = report.processed,
            transfers = report.transfers,
            skipped = report.skipped_in_flight,
            "tick complete"
        );
        Ok(report)
    }

    /// Ticks every `period` until `shutdown` flips to `true`. Returns the
    /// number of ticks run.
    pub async fn run(&self, period: Duration, mut shutdown: watch::Receiver<bool>) -> usize {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut ticks = 0;
        info!(period_ms = period.as_millis() as u64, "scheduler loop started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "tick failed");
                    }
                    ticks += 1;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(ticks, "scheduler loop stopped");
        ticks
    }

    /// Re-reads the node once the guard is held. The tick's snapshot can
    /// predate activity another tick committed in the meantime.
    async fn process_current(
        &self,
        id: NodeId,
        now: Timestamp,
        guard: InFlightGuard,
    ) -> Option<NodeOutcome> {
        match self.registry.running_node(id).await {
            Ok(Some(node)) => Some(self.process_node(node, now, guard).await),
            Ok(None) => {
                debug!(node = %id, "node stopped since snapshot, skipping");
                None
            }
            Err(e) => Some(NodeOutcome::new(id).fail(&e)),
        }
    }

    async fn process_node(&self, node: Node, now: Timestamp, _guard: InFlightGuard) -> NodeOutcome {
        let mut outcome = NodeOutcome::new(node.id);
        let ledger = node.vector.ledger();
        let Some(client) = self.ledgers.get(ledger) else {
            return outcome.fail(&NodeError::ConfigError(format!(
                "no client for ledger {}",
                ledger
            )));
        };
        let fee = match client.fee().await {
            Ok(fee) => fee,
            Err(e) => return outcome.fail(&e),
        };

        for (index, activity) in node.activity.iter().enumerate() {
            let Some(source) = node.source_account(index) else {
                continue;
            };
            let balance = match client.balance_of(source).await {
                Ok(balance) => balance,
                Err(e) => {
                    outcome = outcome.fail(&e);
                    continue;
                }
            };

            let ctx = ProcessContext {
                source: index,
                balance,
                fee,
                now,
                activity,
            };
            let mut sequence = activity.transfers;
            for intent in node.vector.process(&ctx) {
                let Some(to) = resolve_target(&node, intent.target) else {
                    warn!(node = %node.id, route = ?intent.target, "no routable account");
                    outcome.rejections += 1;
                    continue;
                };
                let memo = transfer_memo(node.id, index, sequence);
                match client.transfer(source, to, intent.amount, memo, now).await {
                    Ok(tx) => {
                        debug!(node = %node.id, source = index, to = %to, amount = %intent.amount, tx, "transfer confirmed");
                        outcome.transfers += 1;
                        sequence += 1;
                        if let Err(e) = self
                            .registry
                            .record_transfer(node.id, index, intent.amount, now)
                            .await
                        {
                            return outcome.fail(&e);
                        }
                    }
                    Err(e @ NodeError::LedgerTransient(_)) => {
                        // The balance is re-observed next tick.
                        outcome = outcome.fail(&e);
                        break;
                    }
                    Err(e @ (NodeError::LedgerRejected(_) | NodeError::ValidationError(_))) => {
                        warn!(node = %node.id, source = index, error = %e, "transfer rejected");
                        outcome.rejections += 1;
                    }
                    Err(e) => return outcome.fail(&e),
                }
            }
        }
        outcome
    }
}

/// Unroutable destinations fall back to the refund account.
fn resolve_target(node: &Node, target: Target) -> Option<&Account> {
    let ledger = node.vector.ledger();
    match target {
        Target::Destination(index) => node
            .destinations
            .get(index)
            .and_then(|d| d.routable_account(ledger))
            .or_else(|| node.refund_account()),
        Target::Refund => node.refund_account(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memo_layout() {
        let memo = transfer_memo(NodeId::new(258), 1, 3);
        assert_eq!(memo, vec![0, 0, 1, 2, 1, 0, 0, 0, 0, 0, 0, 0, 3]);
        assert_ne!(memo, transfer_memo(NodeId::new(258), 1, 4));
    }

    #[test]
    fn test_in_flight_guard_is_exclusive() {
        let set: InFlightSet = Arc::new(Mutex::new(HashSet::new()));
        let guard = InFlightGuard::acquire(&set, NodeId::new(1)).unwrap();
        assert!(InFlightGuard::acquire(&set, NodeId::new(1)).is_none());
        assert!(InFlightGuard::acquire(&set, NodeId::new(2)).is_some());

        drop(guard);
        assert!(InFlightGuard::acquire(&set, NodeId::new(1)).is_some());
    }
}
