use super::account::{Account, Principal};
use serde::{Deserialize, Serialize};

/// A fully resolved account on a native ICRC-1 ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcEndpoint {
    pub name: String,
    pub ledger: Principal,
    pub account: Account,
}

/// An account on a foreign platform, identified by raw bytes.
///
/// The engine stores and reports these but never moves funds to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    pub name: String,
    pub platform: u64,
    pub ledger: Vec<u8>,
    pub account: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Ic(IcEndpoint),
    Remote(RemoteEndpoint),
}

impl Endpoint {
    pub fn name(&self) -> &str {
        match self {
            Endpoint::Ic(ep) => &ep.name,
            Endpoint::Remote(ep) => &ep.name,
        }
    }

    pub fn as_ic(&self) -> Option<&IcEndpoint> {
        match self {
            Endpoint::Ic(ep) => Some(ep),
            Endpoint::Remote(_) => None,
        }
    }
}

/// Destination on a native ledger whose account may be filled in later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestIcEndpoint {
    pub name: String,
    pub ledger: Principal,
    #[serde(default)]
    pub account: Option<Account>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestRemoteEndpoint {
    pub name: String,
    pub platform: u64,
    pub ledger: Vec<u8>,
    #[serde(default)]
    pub account: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationEndpoint {
    Ic(DestIcEndpoint),
    Remote(DestRemoteEndpoint),
}

impl DestinationEndpoint {
    pub fn name(&self) -> &str {
        match self {
            DestinationEndpoint::Ic(ep) => &ep.name,
            DestinationEndpoint::Remote(ep) => &ep.name,
        }
    }

    /// The account funds can be sent to on `ledger`, if any.
    ///
    /// Remote destinations, unresolved accounts and accounts on another ledger
    /// are unroutable.
    pub fn routable_account(&self, ledger: &Principal) -> Option<&Account> {
        match self {
            DestinationEndpoint::Ic(ep) if &ep.ledger == ledger => ep.account.as_ref(),
            _ => None,
        }
    }
}

/// A source account derived for a node, as returned by `get_node_address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAddress {
    pub ledger: Principal,
    pub account: Account,
}
