use crate::domain::account::{Account, Principal, Subaccount, Tokens};
use crate::domain::node::{Node, NodeId};
use crate::domain::ports::{
    Ledger, LedgerCallError, NodeStore, TransferArgs, TransferError, TxIndex,
};
use crate::domain::time::Timestamp;
use crate::error::{NodeError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;

/// A dense, append-only node arena.
///
/// `nodes[i]` holds node `i`; a `None` slot is an allocated identifier whose
/// node has not been stored yet.
#[derive(Default, Clone)]
pub struct InMemoryNodeStore {
    nodes: Arc<RwLock<Vec<Option<Node>>>>,
}

impl InMemoryNodeStore {
    /// Creates a new, empty in-memory node store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeStore for InMemoryNodeStore {
    async fn allocate_id(&self) -> Result<NodeId> {
        let mut nodes = self.nodes.write().await;
        let id = u32::try_from(nodes.len()).map_err(|_| {
            NodeError::InternalError(Box::new(std::io::Error::other("node id space exhausted")))
        })?;
        nodes.push(None);
        Ok(NodeId::new(id))
    }

    async fn store(&self, node: Node) -> Result<()> {
        let mut nodes = self.nodes.write().await;
        match nodes.get_mut(node.id.index()) {
            Some(slot) => {
                *slot = Some(node);
                Ok(())
            }
            None => Err(NodeError::InternalError(Box::new(std::io::Error::other(
                format!("node {} was never allocated", node.id),
            )))),
        }
    }

    async fn get(&self, id: NodeId) -> Result<Option<Node>> {
        let nodes = self.nodes.read().await;
        Ok(nodes.get(id.index()).cloned().flatten())
    }

    async fn get_all(&self) -> Result<Vec<Node>> {
        let nodes = self.nodes.read().await;
        Ok(nodes.iter().flatten().cloned().collect())
    }
}

type LedgerKey = (Principal, Subaccount);

/// How long a transfer carrying `created_at_time` is remembered for
/// deduplication, matching the ICRC-1 reference ledger.
pub const DEFAULT_TX_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Default)]
struct LedgerState {
    balances: HashMap<LedgerKey, Tokens>,
    log: Vec<TransferArgs>,
    applied: HashMap<TransferArgs, TxIndex>,
    /// `applied` keyed by creation time, oldest first, for eviction.
    expiry: BTreeMap<(Timestamp, TxIndex), TransferArgs>,
    newest: Timestamp,
}

impl LedgerState {
    /// Transfers created before this can no longer be deduplicated.
    fn horizon(&self, window: Duration) -> Timestamp {
        let window = u64::try_from(window.as_nanos()).unwrap_or(u64::MAX);
        Timestamp(self.newest.0.saturating_sub(window))
    }

    fn remember(
        &mut self,
        created: Timestamp,
        args: TransferArgs,
        index: TxIndex,
        window: Duration,
    ) {
        self.newest = self.newest.max(created);
        self.expiry.insert((created, index), args.clone());
        self.applied.insert(args, index);

        let horizon = self.horizon(window);
        while let Some(entry) = self.expiry.first_entry() {
            if entry.key().0 >= horizon {
                break;
            }
            let expired = entry.remove();
            self.applied.remove(&expired);
        }
    }
}

/// An ICRC-1 ledger held in memory.
///
/// Charges a flat fee, deduplicates transfers that carry `created_at_time`
/// within a sliding window, and can be told to fail calls to exercise retry
/// paths. The window follows the newest `created_at_time` seen, since the
/// ledger has no clock of its own.
pub struct InMemoryLedger {
    id: Principal,
    fee: Tokens,
    minter: Account,
    tx_window: Duration,
    state: RwLock<LedgerState>,
    fail_next: AtomicU32,
    failing_sources: Mutex<HashSet<LedgerKey>>,
}

impl InMemoryLedger {
    pub fn new(id: impl Into<Principal>, fee: Tokens, minter: impl Into<Principal>) -> Self {
        Self {
            id: id.into(),
            fee,
            minter: Account::new(minter),
            tx_window: DEFAULT_TX_WINDOW,
            state: RwLock::new(LedgerState::default()),
            fail_next: AtomicU32::new(0),
            failing_sources: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_tx_window(mut self, window: Duration) -> Self {
        self.tx_window = window;
        self
    }

    pub fn minter(&self) -> &Account {
        &self.minter
    }

    /// Credits `to` out of thin air, as the minting account would.
    pub async fn mint(&self, to: &Account, amount: Tokens) -> TxIndex {
        let mut state = self.state.write().await;
        *state.balances.entry(to.ledger_key()).or_default() += amount;
        state.log.push(TransferArgs {
            from: self.minter.clone(),
            to: to.clone(),
            amount,
            fee: None,
            memo: None,
            created_at_time: None,
        });
        (state.log.len() - 1) as TxIndex
    }

    /// Balance lookup that bypasses fault injection.
    pub async fn balance(&self, account: &Account) -> Tokens {
        let state = self.state.read().await;
        state
            .balances
            .get(&account.ledger_key())
            .copied()
            .unwrap_or_default()
    }

    /// Every non-zero balance, ordered by owner then subaccount.
    pub async fn balances(&self) -> Vec<(Account, Tokens)> {
        let state = self.state.read().await;
        let mut rows: Vec<(Account, Tokens)> = state
            .balances
            .iter()
            .filter(|(_, amount)| !amount.is_zero())
            .map(|((owner, sub), amount)| {
                let account = if *sub == Subaccount::DEFAULT {
                    Account::new(owner.clone())
                } else {
                    Account::with_subaccount(owner.clone(), *sub)
                };
                (account, *amount)
            })
            .collect();
        rows.sort_by(|a, b| a.0.ledger_key().cmp(&b.0.ledger_key()));
        rows
    }

    pub async fn transactions(&self) -> Vec<TransferArgs> {
        self.state.read().await.log.clone()
    }

    /// Sum of every balance. Fees are burned, so each transfer lowers it.
    pub async fn total_supply(&self) -> Tokens {
        let state = self.state.read().await;
        state.balances.values().copied().sum()
    }

    /// Makes the next `calls` ledger calls fail as if the call never arrived.
    pub fn fail_next_calls(&self, calls: u32) {
        self.fail_next.store(calls, Ordering::SeqCst);
    }

    /// Makes every transfer out of `account` fail transiently until cleared.
    pub fn fail_transfers_from(&self, account: &Account) {
        self.lock_failing().insert(account.ledger_key());
    }

    pub fn clear_failures(&self) {
        self.fail_next.store(0, Ordering::SeqCst);
        self.lock_failing().clear();
    }

    fn lock_failing(&self) -> std::sync::MutexGuard<'_, HashSet<LedgerKey>> {
        self.failing_sources
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn injected_failure(&self) -> std::result::Result<(), LedgerCallError> {
        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(LedgerCallError::Transient(
                "injected call failure".to_string(),
            )),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    fn id(&self) -> &Principal {
        &self.id
    }

    async fn fee(&self) -> std::result::Result<Tokens, LedgerCallError> {
        self.injected_failure()?;
        Ok(self.fee)
    }

    async fn balance_of(&self, account: &Account) -> std::result::Result<Tokens, LedgerCallError> {
        self.injected_failure()?;
        Ok(self.balance(account).await)
    }

    async fn transfer(&self, args: TransferArgs) -> std::result::Result<TxIndex, LedgerCallError> {
        self.injected_failure()?;
        if self.lock_failing().contains(&args.from.ledger_key()) {
            return Err(LedgerCallError::Transient(format!(
                "transfers from {} are unavailable",
                args.from
            )));
        }

        let mut state = self.state.write().await;
        if let Some(created) = args.created_at_time {
            if created < state.horizon(self.tx_window) {
                return Err(LedgerCallError::Rejected(TransferError::TooOld));
            }
            if let Some(index) = state.applied.get(&args) {
                return Err(LedgerCallError::Rejected(TransferError::Duplicate {
                    duplicate_of: *index,
                }));
            }
        }

        let fee = args.fee.unwrap_or(self.fee);
        if fee != self.fee {
            return Err(LedgerCallError::Rejected(TransferError::BadFee {
                expected_fee: self.fee,
            }));
        }

        let from_key = args.from.ledger_key();
        let balance = state.balances.get(&from_key).copied().unwrap_or_default();
        let debit = args.amount + fee;
        if balance < debit {
            return Err(LedgerCallError::Rejected(
                TransferError::InsufficientFunds { balance },
            ));
        }

        state.balances.insert(from_key, balance - debit);
        *state.balances.entry(args.to.ledger_key()).or_default() += args.amount;
        state.log.push(args.clone());
        let index = (state.log.len() - 1) as TxIndex;
        if let Some(created) = args.created_at_time {
            state.remember(created, args, index, self.tx_window);
        }
        Ok(index)
    }
}
