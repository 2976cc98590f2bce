use super::account::{Account, Principal, Tokens};
use super::node::{Node, NodeId};
use super::time::Timestamp;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Persistence for nodes, addressed densely by [`NodeId`].
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Reserves the next identifier. Identifiers are never handed out twice.
    async fn allocate_id(&self) -> Result<NodeId>;
    async fn store(&self, node: Node) -> Result<()>;
    async fn get(&self, id: NodeId) -> Result<Option<Node>>;
    /// All nodes in identifier order.
    async fn get_all(&self) -> Result<Vec<Node>>;
}

pub type NodeStoreBox = Box<dyn NodeStore>;

pub type TxIndex = u64;

/// Arguments of an ICRC-1 `icrc1_transfer`, with the sending account explicit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferArgs {
    pub from: Account,
    pub to: Account,
    pub amount: Tokens,
    pub fee: Option<Tokens>,
    pub memo: Option<Vec<u8>>,
    pub created_at_time: Option<Timestamp>,
}

/// Ledger-side rejection of a transfer, as defined by ICRC-1.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferError {
    #[error("bad fee, expected {expected_fee}")]
    BadFee { expected_fee: Tokens },
    #[error("insufficient funds, balance {balance}")]
    InsufficientFunds { balance: Tokens },
    #[error("transaction too old")]
    TooOld,
    #[error("transaction created in the future")]
    CreatedInFuture { ledger_time: Timestamp },
    #[error("duplicate of transaction {duplicate_of}")]
    Duplicate { duplicate_of: TxIndex },
    #[error("ledger temporarily unavailable")]
    TemporarilyUnavailable,
    #[error("ledger error {error_code}: {message}")]
    GenericError { error_code: u64, message: String },
}

/// Outcome of a ledger call that did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerCallError {
    /// The call itself failed; nothing is known to have been applied.
    #[error("call failed: {0}")]
    Transient(String),
    #[error("rejected: {0}")]
    Rejected(TransferError),
}

/// An ICRC-1 token ledger.
#[async_trait]
pub trait Ledger: Send + Sync {
    fn id(&self) -> &Principal;
    async fn fee(&self) -> std::result::Result<Tokens, LedgerCallError>;
    async fn balance_of(&self, account: &Account) -> std::result::Result<Tokens, LedgerCallError>;
    async fn transfer(&self, args: TransferArgs) -> std::result::Result<TxIndex, LedgerCallError>;
}
