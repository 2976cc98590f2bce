use crate::domain::account::Principal;
use crate::domain::node::NodeId;
use crate::domain::ports::TransferError;
use crate::domain::vector::VectorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Caller {caller} is not a controller of node {node}")]
    Unauthorized { node: NodeId, caller: Principal },
    #[error("Node {0} not found")]
    NotFound(NodeId),
    #[error("Vector {0} is not supported by this engine")]
    UnsupportedVector(VectorKind),
    #[error("Ledger call failed: {0}")]
    LedgerTransient(String),
    #[error("Ledger rejected transfer: {0}")]
    LedgerRejected(TransferError),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, NodeError>;
