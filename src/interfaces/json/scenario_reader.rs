use crate::domain::account::{Account, Principal, Tokens};
use crate::domain::endpoint::{DestinationEndpoint, Endpoint};
use crate::domain::node::NodeId;
use crate::domain::vector::{CreateRequest, VariablesPatch};
use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::io::BufRead;

/// Points at a source account of a node created earlier in the scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSourceRef {
    pub node: NodeId,
    #[serde(default)]
    pub source: usize,
    #[serde(default)]
    pub name: Option<String>,
}

/// A destination as written in a scenario: either a plain endpoint, or a
/// reference to another node's source, which is how pipelines are wired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScenarioDestination {
    NodeSource { node_source: NodeSourceRef },
    Endpoint(DestinationEndpoint),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioNodeRequest {
    pub controllers: Vec<Principal>,
    pub destinations: Vec<ScenarioDestination>,
    pub refund: Endpoint,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioModifyRequest {
    #[serde(default)]
    pub destinations: Option<Vec<ScenarioDestination>>,
    #[serde(default)]
    pub refund: Option<Endpoint>,
    #[serde(default)]
    pub controllers: Option<Vec<Principal>>,
    #[serde(default)]
    pub variables: Option<VariablesPatch>,
}

fn one() -> u32 {
    1
}

/// One line of a scenario file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStep {
    CreateNode {
        caller: Principal,
        request: ScenarioNodeRequest,
        create: CreateRequest,
    },
    ModifyNode {
        caller: Principal,
        node: NodeId,
        request: ScenarioModifyRequest,
    },
    StopNode {
        caller: Principal,
        node: NodeId,
    },
    StartNode {
        caller: Principal,
        node: NodeId,
    },
    /// Mints `amount` into one of a node's source accounts.
    Fund {
        node: NodeId,
        #[serde(default)]
        source: usize,
        amount: Tokens,
    },
    /// Mints `amount` into an arbitrary account, on the first ledger unless named.
    Mint {
        #[serde(default)]
        ledger: Option<Principal>,
        account: Account,
        amount: Tokens,
    },
    Start,
    Stop,
    /// Runs one tick without moving the clock.
    Tick,
    /// Moves the clock forward `secs` then ticks, `times` over.
    Advance {
        secs: u64,
        #[serde(default = "one")]
        times: u32,
    },
}

/// Reads scenario steps, one JSON document per line.
///
/// Blank lines and lines starting with `#` are skipped.
pub struct ScenarioReader<R: BufRead> {
    source: R,
}

impl<R: BufRead> ScenarioReader<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    /// Lazily parses steps. Each item carries its 1-based line number so
    /// errors can be reported against the file.
    pub fn steps(self) -> impl Iterator<Item = (usize, Result<ScenarioStep>)> {
        self.source
            .lines()
            .enumerate()
            .filter_map(|(index, line)| {
                let line_no = index + 1;
                match line {
                    Ok(text) => {
                        let trimmed = text.trim();
                        if trimmed.is_empty() || trimmed.starts_with('#') {
                            None
                        } else {
                            Some((line_no, serde_json::from_str(trimmed).map_err(NodeError::from)))
                        }
                    }
                    Err(e) => Some((line_no, Err(NodeError::from(e)))),
                }
            })
    }
}
