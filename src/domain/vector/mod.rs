//! Vector strategies: the per-node rules that decide which transfers to issue.
//!
//! Vectors are a closed set of tagged variants. Each implemented variant owns
//! its configuration and exposes the same [`VectorStrategy::process`]
//! capability, which only computes intent; the scheduler executes it.

pub mod split;
pub mod throttle;

use super::account::{Principal, Tokens};
use super::node::SourceActivity;
use super::time::Timestamp;
use crate::error::{NodeError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use split::{Split, SplitCreateRequest, SplitVariables};
pub use throttle::{Throttle, ThrottleCreateRequest, ThrottleVariables};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorKind {
    Throttle,
    Split,
    Lend,
    Borrow,
    Exchange,
    Escrow,
    Mint,
}

impl fmt::Display for VectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VectorKind::Throttle => "throttle",
            VectorKind::Split => "split",
            VectorKind::Lend => "lend",
            VectorKind::Borrow => "borrow",
            VectorKind::Exchange => "exchange",
            VectorKind::Escrow => "escrow",
            VectorKind::Mint => "mint",
        };
        f.write_str(name)
    }
}

/// A configured number: either fixed, or drawn uniformly from `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumVariant {
    Fixed(u64),
    #[serde(alias = "rnd")]
    Random { min: u64, max: u64 },
}

impl NumVariant {
    pub fn validate(&self, field: &str, allow_zero: bool) -> Result<()> {
        let (low, high) = match *self {
            NumVariant::Fixed(value) => (value, value),
            NumVariant::Random { min, max } => (min, max),
        };
        if low > high {
            return Err(NodeError::ValidationError(format!(
                "{}: min {} is greater than max {}",
                field, low, high
            )));
        }
        if !allow_zero && low == 0 {
            return Err(NodeError::ValidationError(format!(
                "{} must be greater than zero",
                field
            )));
        }
        Ok(())
    }

    pub fn resolve<R: Rng>(&self, rng: &mut R) -> u64 {
        match *self {
            NumVariant::Fixed(value) => value,
            NumVariant::Random { min, max } => rng.gen_range(min..=max),
        }
    }

    pub fn is_random(&self) -> bool {
        matches!(self, NumVariant::Random { .. })
    }
}

/// When `random` number descriptors are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RandomPolicy {
    /// Drawn once when the node is created or its variables are modified.
    #[default]
    Once,
    /// Drawn again after every confirmed forward.
    PerInterval,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerInit {
    pub ledger: Principal,
}

/// Inputs a vector sees for one source account on one tick.
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext<'a> {
    pub source: usize,
    pub balance: Tokens,
    pub fee: Tokens,
    pub now: Timestamp,
    pub activity: &'a SourceActivity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Destination(usize),
    Refund,
}

/// A transfer a vector wants executed.
///
/// `amount` is the gross debit from the source: the recipient is credited
/// `amount - fee` and the ledger keeps the fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferIntent {
    pub source: usize,
    pub target: Target,
    pub amount: Tokens,
}

pub trait VectorStrategy {
    /// Decides this tick's transfers. Must not depend on anything but `ctx`
    /// and the vector's own configuration.
    fn process(&self, ctx: &ProcessContext<'_>) -> Vec<TransferIntent>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionRequest {
    pub init: LedgerInit,
    #[serde(default)]
    pub variables: serde_json::Value,
}

/// Creation payload, tagged by vector kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreateRequest {
    Throttle(ThrottleCreateRequest),
    Split(SplitCreateRequest),
    Lend(ExtensionRequest),
    Borrow(ExtensionRequest),
    Exchange(ExtensionRequest),
    Escrow(ExtensionRequest),
    Mint(ExtensionRequest),
}

impl CreateRequest {
    pub fn kind(&self) -> VectorKind {
        match self {
            CreateRequest::Throttle(_) => VectorKind::Throttle,
            CreateRequest::Split(_) => VectorKind::Split,
            CreateRequest::Lend(_) => VectorKind::Lend,
            CreateRequest::Borrow(_) => VectorKind::Borrow,
            CreateRequest::Exchange(_) => VectorKind::Exchange,
            CreateRequest::Escrow(_) => VectorKind::Escrow,
            CreateRequest::Mint(_) => VectorKind::Mint,
        }
    }
}

/// Replacement variables for an existing node; must match its vector kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariablesPatch {
    Throttle(ThrottleVariables),
    Split(SplitVariables),
}

/// A node's strategy with its resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vector {
    Throttle(Throttle),
    Split(Split),
}

impl Vector {
    pub fn from_request<R: Rng>(request: CreateRequest, rng: &mut R) -> Result<Self> {
        match request {
            CreateRequest::Throttle(req) => Ok(Vector::Throttle(Throttle::create(req, rng)?)),
            CreateRequest::Split(req) => Ok(Vector::Split(Split::create(req)?)),
            other => Err(NodeError::UnsupportedVector(other.kind())),
        }
    }

    pub fn kind(&self) -> VectorKind {
        match self {
            Vector::Throttle(_) => VectorKind::Throttle,
            Vector::Split(_) => VectorKind::Split,
        }
    }

    pub fn ledger(&self) -> &Principal {
        match self {
            Vector::Throttle(v) => &v.init.ledger,
            Vector::Split(v) => &v.init.ledger,
        }
    }

    /// Number of engine-derived source accounts the vector drains.
    pub fn source_count(&self) -> u8 {
        match self {
            Vector::Throttle(_) | Vector::Split(_) => 1,
        }
    }

    pub fn check_destinations(&self, count: usize) -> Result<()> {
        match self {
            Vector::Throttle(_) if count != 1 => Err(NodeError::ValidationError(format!(
                "throttle requires exactly one destination, got {}",
                count
            ))),
            Vector::Split(v) => v.check_destinations(count),
            Vector::Throttle(_) => Ok(()),
        }
    }

    pub fn apply_variables<R: Rng>(&mut self, patch: VariablesPatch, rng: &mut R) -> Result<()> {
        match (self, patch) {
            (Vector::Throttle(v), VariablesPatch::Throttle(vars)) => v.update(vars, rng),
            (Vector::Split(v), VariablesPatch::Split(vars)) => v.update(vars),
            (vector, _) => Err(NodeError::ValidationError(format!(
                "variables do not match vector kind {}",
                vector.kind()
            ))),
        }
    }

    /// Hook run after a confirmed forward.
    pub fn after_transfer<R: Rng>(&mut self, policy: RandomPolicy, rng: &mut R) {
        if policy == RandomPolicy::PerInterval
            && let Vector::Throttle(v) = self
        {
            v.reroll(rng);
        }
    }
}

impl VectorStrategy for Vector {
    fn process(&self, ctx: &ProcessContext<'_>) -> Vec<TransferIntent> {
        match self {
            Vector::Throttle(v) => v.process(ctx),
            Vector::Split(v) => v.process(ctx),
        }
    }
}
