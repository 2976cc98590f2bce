mod common;

use async_trait::async_trait;
use common::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use vectornode::domain::account::{Account, Principal, Tokens};
use vectornode::domain::node::{Node, NodeId};
use vectornode::domain::ports::{Ledger, LedgerCallError, NodeStore, TransferArgs, TxIndex};
use vectornode::error::Result as StoreResult;
use vectornode::infrastructure::in_memory::{InMemoryLedger, InMemoryNodeStore};

/// Applies the first transfer but reports it as a failed call.
struct LostAckLedger {
    inner: Arc<InMemoryLedger>,
    dropped: AtomicBool,
}

#[async_trait]
impl Ledger for LostAckLedger {
    fn id(&self) -> &Principal {
        self.inner.id()
    }

    async fn fee(&self) -> Result<Tokens, LedgerCallError> {
        self.inner.fee().await
    }

    async fn balance_of(&self, account: &Account) -> Result<Tokens, LedgerCallError> {
        self.inner.balance_of(account).await
    }

    async fn transfer(&self, args: TransferArgs) -> Result<TxIndex, LedgerCallError> {
        let result = self.inner.transfer(args).await;
        if !self.dropped.swap(true, Ordering::SeqCst) {
            return Err(LedgerCallError::Transient("reply lost".to_string()));
        }
        result
    }
}

/// Holds every transfer until a permit is released.
struct GatedLedger {
    inner: Arc<InMemoryLedger>,
    gate: Semaphore,
    entered: Notify,
}

#[async_trait]
impl Ledger for GatedLedger {
    fn id(&self) -> &Principal {
        self.inner.id()
    }

    async fn fee(&self) -> Result<Tokens, LedgerCallError> {
        self.inner.fee().await
    }

    async fn balance_of(&self, account: &Account) -> Result<Tokens, LedgerCallError> {
        self.inner.balance_of(account).await
    }

    async fn transfer(&self, args: TransferArgs) -> Result<TxIndex, LedgerCallError> {
        self.entered.notify_one();
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| LedgerCallError::Transient(e.to_string()))?;
        permit.forget();
        self.inner.transfer(args).await
    }
}

/// Fails transfers to one account transiently while blocked.
struct BlockedPayeeLedger {
    inner: Arc<InMemoryLedger>,
    payee: Account,
    blocked: AtomicBool,
}

#[async_trait]
impl Ledger for BlockedPayeeLedger {
    fn id(&self) -> &Principal {
        self.inner.id()
    }

    async fn fee(&self) -> Result<Tokens, LedgerCallError> {
        self.inner.fee().await
    }

    async fn balance_of(&self, account: &Account) -> Result<Tokens, LedgerCallError> {
        self.inner.balance_of(account).await
    }

    async fn transfer(&self, args: TransferArgs) -> Result<TxIndex, LedgerCallError> {
        if self.blocked.load(Ordering::SeqCst)
            && args.to.ledger_key() == self.payee.ledger_key()
        {
            return Err(LedgerCallError::Transient("payee unreachable".to_string()));
        }
        self.inner.transfer(args).await
    }
}

/// Parks one `get_all` call after it has taken its snapshot.
#[derive(Default)]
struct StallGate {
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

struct StallingStore {
    inner: InMemoryNodeStore,
    gate: Arc<StallGate>,
}

#[async_trait]
impl NodeStore for StallingStore {
    async fn allocate_id(&self) -> StoreResult<NodeId> {
        self.inner.allocate_id().await
    }

    async fn store(&self, node: Node) -> StoreResult<()> {
        self.inner.store(node).await
    }

    async fn get(&self, id: NodeId) -> StoreResult<Option<Node>> {
        self.inner.get(id).await
    }

    async fn get_all(&self) -> StoreResult<Vec<Node>> {
        let nodes = self.inner.get_all().await?;
        if self.gate.armed.swap(false, Ordering::SeqCst) {
            self.gate.entered.notify_one();
            self.gate.release.notified().await;
        }
        Ok(nodes)
    }
}

#[tokio::test]
async fn test_retick_at_same_time_moves_nothing() {
    let h = Harness::new();
    let node = h.create(request(vec![dest("bob")]), throttle(2, 1_000_000)).await;
    let source = h.fund(&node, 10_000_000).await;
    h.engine.start().await.unwrap();

    h.advance(2).await;
    let report = h.engine.tick().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.transfers, 0);
    assert_eq!(h.balance(&source).await, Tokens(9_000_000));
}

#[tokio::test]
async fn test_transient_failure_is_retried_next_tick() {
    let h = Harness::new();
    let node = h.create(request(vec![dest("bob")]), throttle(2, 1_000_000)).await;
    let source = h.fund(&node, 10_000_000).await;
    h.engine.start().await.unwrap();

    h.ledger.fail_transfers_from(&source);
    let report = h.advance(2).await;
    assert_eq!(report.transfers, 0);
    assert_eq!(report.transient_failures, 1);
    assert!(report.failed_nodes.is_empty());
    assert_eq!(h.balance(&source).await, Tokens(10_000_000));
    let view = h.engine.get_node(node.id).await.unwrap().unwrap();
    assert_eq!(view.activity[0].transfers, 0);

    h.ledger.clear_failures();
    let report = h.engine.tick().await.unwrap();
    assert_eq!(report.transfers, 1);
    assert_eq!(h.balance(&source).await, Tokens(9_000_000));
    assert_eq!(h.balance(&account("bob")).await, Tokens(990_000));
}

#[tokio::test]
async fn test_lost_reply_is_not_applied_twice() {
    let inner = Arc::new(InMemoryLedger::new(LEDGER, FEE, "minter"));
    let lossy = Arc::new(LostAckLedger {
        inner: inner.clone(),
        dropped: AtomicBool::new(false),
    });
    let h = Harness::with_ledger(inner, lossy);
    let node = h.create(request(vec![dest("bob")]), throttle(2, 1_000_000)).await;
    let source = h.fund(&node, 10_000_000).await;
    h.engine.start().await.unwrap();

    let report = h.advance(2).await;
    assert_eq!(report.transfers, 1);
    assert_eq!(h.balance(&account("bob")).await, Tokens(990_000));
    assert_eq!(h.balance(&source).await, Tokens(9_000_000));
}

#[tokio::test]
async fn test_failing_node_does_not_block_others() {
    let h = Harness::new();
    let stuck = h.create(request(vec![dest("ali")]), throttle(1, 1_000_000)).await;
    let healthy = h.create(request(vec![dest("bob")]), throttle(1, 1_000_000)).await;
    let stuck_source = h.fund(&stuck, 5_000_000).await;
    h.fund(&healthy, 5_000_000).await;
    h.engine.start().await.unwrap();

    h.ledger.fail_transfers_from(&stuck_source);
    let report = h.advance(1).await;
    assert_eq!(report.processed, 2);
    assert_eq!(report.transfers, 1);
    assert_eq!(report.transient_failures, 1);
    assert_eq!(h.balance(&account("ali")).await, Tokens::ZERO);
    assert_eq!(h.balance(&account("bob")).await, Tokens(990_000));
}

#[tokio::test]
async fn test_overlapping_tick_skips_in_flight_node() {
    let inner = Arc::new(InMemoryLedger::new(LEDGER, FEE, "minter"));
    let gated = Arc::new(GatedLedger {
        inner: inner.clone(),
        gate: Semaphore::new(0),
        entered: Notify::new(),
    });
    let h = Harness::with_ledger(inner, gated.clone());
    let node = h.create(request(vec![dest("bob")]), throttle(0, 1_000_000)).await;
    h.fund(&node, 10_000_000).await;
    h.engine.start().await.unwrap();

    let engine = h.engine.clone();
    let first = tokio::spawn(async move { engine.tick().await.unwrap() });
    gated.entered.notified().await;

    let overlapping = h.engine.tick().await.unwrap();
    assert_eq!(overlapping.skipped_in_flight, 1);
    assert_eq!(overlapping.processed, 0);

    gated.gate.add_permits(1);
    let first = first.await.unwrap();
    assert_eq!(first.transfers, 1);
    assert_eq!(h.balance(&account("bob")).await, Tokens(990_000));
}

#[tokio::test]
async fn test_stopped_engine_and_stopped_node() {
    let h = Harness::new();
    let node = h.create(request(vec![dest("bob")]), throttle(1, 1_000_000)).await;
    let source = h.fund(&node, 5_000_000).await;
    h.engine.start().await.unwrap();

    h.engine
        .set_node_active(&principal("jo"), node.id, false)
        .await
        .unwrap();
    let report = h.advance(1).await;
    assert_eq!(report.processed, 0);

    h.engine
        .set_node_active(&principal("jo"), node.id, true)
        .await
        .unwrap();
    h.engine.stop();
    h.advance(1).await;
    assert_eq!(h.balance(&source).await, Tokens(5_000_000));

    h.engine.start().await.unwrap();
    h.advance(1).await;
    assert_eq!(h.balance(&source).await, Tokens(4_000_000));
}

#[tokio::test]
async fn test_run_loop_ticks_until_shutdown() {
    let h = Harness::new();
    let node = h.create(request(vec![dest("bob")]), throttle(0, 1_000_000)).await;
    h.fund(&node, 3_000_000).await;
    h.engine.start().await.unwrap();

    let (shutdown, rx) = tokio::sync::watch::channel(false);
    let engine = h.engine.clone();
    let handle =
        tokio::spawn(async move { engine.scheduler().run(Duration::from_millis(5), rx).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.send(true).unwrap();

    let ticks = handle.await.unwrap();
    assert!(ticks >= 3);
    assert_eq!(h.balance(&account("bob")).await, Tokens(3_000_000 - 3 * 10_000));
}

#[tokio::test]
async fn test_tick_with_stale_snapshot_respects_interval() {
    let gate = Arc::new(StallGate::default());
    let h = Harness::with_store(Box::new(StallingStore {
        inner: InMemoryNodeStore::new(),
        gate: gate.clone(),
    }));
    let node = h.create(request(vec![dest("bob")]), throttle(100, 1_000_000)).await;
    let source = h.fund(&node, 10_000_000).await;
    h.engine.start().await.unwrap();

    gate.armed.store(true, Ordering::SeqCst);
    let engine = h.engine.clone();
    let late = tokio::spawn(async move { engine.tick().await.unwrap() });
    gate.entered.notified().await;

    let report = h.advance(1).await;
    assert_eq!(report.transfers, 1);

    gate.release.notify_one();
    let late = late.await.unwrap();
    assert_eq!(late.transfers, 0);
    assert_eq!(h.balance(&source).await, Tokens(9_000_000));

    let view = h.engine.get_node(node.id).await.unwrap().unwrap();
    assert_eq!(view.activity[0].transfers, 1);
    assert_eq!(view.activity[0].forwarded, Tokens(1_000_000));
}

#[tokio::test]
async fn test_partial_split_resplits_what_remains() {
    let inner = Arc::new(InMemoryLedger::new(LEDGER, FEE, "minter"));
    let blocked = Arc::new(BlockedPayeeLedger {
        inner: inner.clone(),
        payee: account("ali2"),
        blocked: AtomicBool::new(true),
    });
    let h = Harness::with_ledger(inner, blocked.clone());
    let node = h
        .create(request(vec![dest("ali"), dest("ali2")]), split(vec![1, 1]))
        .await;
    let source = h.fund(&node, 2_000_000).await;
    h.engine.start().await.unwrap();

    let report = h.advance(1).await;
    assert_eq!(report.transfers, 1);
    assert_eq!(report.transient_failures, 1);
    assert_eq!(h.balance(&source).await, Tokens(1_000_000));

    // The next tick re-reads the balance and splits it afresh; the unsent
    // share is not replayed.
    blocked.blocked.store(false, Ordering::SeqCst);
    let report = h.advance(1).await;
    assert_eq!(report.transfers, 2);
    assert_eq!(h.balance(&source).await, Tokens::ZERO);
    assert_eq!(h.balance(&account("ali")).await, Tokens(990_000 + 490_000));
    assert_eq!(h.balance(&account("ali2")).await, Tokens(490_000));

    let view = h.engine.get_node(node.id).await.unwrap().unwrap();
    assert_eq!(view.activity[0].forwarded, Tokens(2_000_000));
}
