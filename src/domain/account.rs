use crate::error::NodeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Textual identity of a ledger participant (user, engine or ledger itself).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

/// 32-byte ICRC-1 subaccount. Serialized as a lowercase hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Subaccount(pub [u8; 32]);

impl Subaccount {
    pub const DEFAULT: Self = Self([0u8; 32]);

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(text: &str) -> Result<Self, NodeError> {
        let bytes = hex::decode(text)
            .map_err(|e| NodeError::ValidationError(format!("Invalid subaccount hex: {}", e)))?;
        let array: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            NodeError::ValidationError(format!("Subaccount must be 32 bytes, got {}", b.len()))
        })?;
        Ok(Self(array))
    }
}

impl fmt::Display for Subaccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Subaccount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Subaccount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

/// An ICRC-1 account: owner plus optional subaccount.
///
/// A missing subaccount and the all-zero subaccount address the same funds;
/// use [`Account::ledger_key`] whenever accounts are compared for balances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    pub owner: Principal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subaccount: Option<Subaccount>,
}

impl Account {
    pub fn new(owner: impl Into<Principal>) -> Self {
        Self {
            owner: owner.into(),
            subaccount: None,
        }
    }

    pub fn with_subaccount(owner: impl Into<Principal>, subaccount: Subaccount) -> Self {
        Self {
            owner: owner.into(),
            subaccount: Some(subaccount),
        }
    }

    pub fn effective_subaccount(&self) -> Subaccount {
        self.subaccount.unwrap_or(Subaccount::DEFAULT)
    }

    /// Normalized identity used by ledgers to key balances.
    pub fn ledger_key(&self) -> (Principal, Subaccount) {
        (self.owner.clone(), self.effective_subaccount())
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.subaccount {
            Some(sub) if sub != Subaccount::DEFAULT => write!(f, "{}.{}", self.owner, sub),
            _ => write!(f, "{}", self.owner),
        }
    }
}

/// An amount of ledger base units (e8s and the like).
///
/// Ledger amounts are unbounded naturals on the wire; `u128` leaves ample
/// headroom for the `balance * weight` products computed by split vectors.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Tokens(pub u128);

impl Tokens {
    pub const ZERO: Self = Self(0);

    pub fn new(amount: u128) -> Self {
        Self(amount)
    }

    pub fn value(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }
}

impl From<u64> for Tokens {
    fn from(value: u64) -> Self {
        Self(value as u128)
    }
}

impl fmt::Display for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Tokens {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Tokens {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Tokens {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Tokens {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl std::iter::Sum for Tokens {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Tokens::ZERO, |acc, t| acc + t)
    }
}
