use super::account::{Account, Principal, Tokens};
use super::address::{Role, derive};
use super::endpoint::{DestinationEndpoint, Endpoint, IcEndpoint, SourceAddress};
use super::time::Timestamp;
use super::vector::{Vector, VectorKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Engine-assigned node identifier. Allocated in increasing order and never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Created,
    Running,
    Stopped,
}

/// Bookkeeping for one source account, updated only after confirmed transfers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceActivity {
    pub last_transfer: Option<Timestamp>,
    pub transfers: u64,
    pub forwarded: Tokens,
}

impl SourceActivity {
    pub fn record(&mut self, amount: Tokens, at: Timestamp) {
        self.last_transfer = self.last_transfer.max(Some(at));
        self.transfers += 1;
        self.forwarded += amount;
    }
}

/// A configured, independently scheduled unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub vector: Vector,
    pub sources: Vec<Endpoint>,
    pub destinations: Vec<DestinationEndpoint>,
    pub refund: Endpoint,
    pub controllers: Vec<Principal>,
    pub status: NodeStatus,
    pub activity: Vec<SourceActivity>,
    pub created_at: Timestamp,
    pub modified_at: Timestamp,
}

impl Node {
    /// Builds the source endpoints owned by `engine` for `vector`.
    pub fn derive_sources(id: NodeId, engine: &Principal, vector: &Vector) -> Vec<Endpoint> {
        (0..vector.source_count())
            .map(|index| {
                Endpoint::Ic(IcEndpoint {
                    name: format!("source-{}", index),
                    ledger: vector.ledger().clone(),
                    account: Account::with_subaccount(
                        engine.clone(),
                        derive(id, Role::Source(index)),
                    ),
                })
            })
            .collect()
    }

    pub fn is_controller(&self, principal: &Principal) -> bool {
        self.controllers.contains(principal)
    }

    pub fn source_account(&self, index: usize) -> Option<&Account> {
        self.sources
            .get(index)
            .and_then(Endpoint::as_ic)
            .map(|ep| &ep.account)
    }

    /// The refund account, when it lives on the vector's ledger.
    pub fn refund_account(&self) -> Option<&Account> {
        self.refund
            .as_ic()
            .filter(|ep| &ep.ledger == self.vector.ledger())
            .map(|ep| &ep.account)
    }

    pub fn addresses(&self) -> Vec<SourceAddress> {
        self.sources
            .iter()
            .filter_map(Endpoint::as_ic)
            .map(|ep| SourceAddress {
                ledger: ep.ledger.clone(),
                account: ep.account.clone(),
            })
            .collect()
    }

    pub fn view(&self) -> NodeView {
        NodeView {
            id: self.id,
            vector_kind: self.vector.kind(),
            vector: self.vector.clone(),
            sources: self.sources.clone(),
            destinations: self.destinations.clone(),
            refund: self.refund.clone(),
            controllers: self.controllers.clone(),
            status: self.status,
            activity: self.activity.clone(),
            created_at: self.created_at,
            modified_at: self.modified_at,
        }
    }
}

/// What callers get back from the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeView {
    pub id: NodeId,
    pub vector_kind: VectorKind,
    pub vector: Vector,
    pub sources: Vec<Endpoint>,
    pub destinations: Vec<DestinationEndpoint>,
    pub refund: Endpoint,
    pub controllers: Vec<Principal>,
    pub status: NodeStatus,
    pub activity: Vec<SourceActivity>,
    pub created_at: Timestamp,
    pub modified_at: Timestamp,
}

impl NodeView {
    pub fn source_account(&self, index: usize) -> Option<&Account> {
        self.sources
            .get(index)
            .and_then(Endpoint::as_ic)
            .map(|ep| &ep.account)
    }
}
