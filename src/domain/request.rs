use super::account::Principal;
use super::endpoint::{DestinationEndpoint, Endpoint};
use super::vector::VariablesPatch;
use serde::{Deserialize, Serialize};

/// Vector-independent part of a creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRequest {
    pub controllers: Vec<Principal>,
    pub destinations: Vec<DestinationEndpoint>,
    pub refund: Endpoint,
}

/// Partial update of a node. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyRequest {
    #[serde(default)]
    pub destinations: Option<Vec<DestinationEndpoint>>,
    #[serde(default)]
    pub refund: Option<Endpoint>,
    #[serde(default)]
    pub controllers: Option<Vec<Principal>>,
    #[serde(default)]
    pub variables: Option<VariablesPatch>,
}
