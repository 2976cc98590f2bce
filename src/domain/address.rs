//! Deterministic per-node subaccount derivation.
//!
//! Every engine-managed account is `(engine principal, derive(node, role))`.
//! The layout is fixed and positional, so distinct `(node, role)` pairs can
//! never map to the same subaccount and no derived subaccount ever equals the
//! default (all-zero) one.
//!
//! ```text
//! byte  0      version tag (0x01)
//! bytes 1..5   node id, big-endian
//! byte  5      role kind (0x00 source, 0x01 intermediate)
//! byte  6      role index
//! bytes 7..32  zero
//! ```

use super::account::Subaccount;
use super::node::NodeId;
use serde::{Deserialize, Serialize};

const DERIVATION_VERSION: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Account funded by users and drained by the node's vector.
    Source(u8),
    /// Holding account between two internal steps of a vector.
    Intermediate(u8),
}

impl Role {
    fn encode(self) -> [u8; 2] {
        match self {
            Role::Source(index) => [0x00, index],
            Role::Intermediate(index) => [0x01, index],
        }
    }
}

pub fn derive(node_id: NodeId, role: Role) -> Subaccount {
    let mut bytes = [0u8; 32];
    bytes[0] = DERIVATION_VERSION;
    bytes[1..5].copy_from_slice(&node_id.value().to_be_bytes());
    bytes[5..7].copy_from_slice(&role.encode());
    Subaccount(bytes)
}
