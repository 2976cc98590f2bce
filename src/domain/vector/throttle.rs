use super::{LedgerInit, NumVariant, ProcessContext, Target, TransferIntent, VectorStrategy};
use crate::domain::account::Tokens;
use crate::error::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleVariables {
    pub interval_sec: NumVariant,
    pub max_amount: NumVariant,
}

impl ThrottleVariables {
    fn validate(&self) -> Result<()> {
        self.interval_sec.validate("interval_sec", true)?;
        self.max_amount.validate("max_amount", false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleCreateRequest {
    pub init: LedgerInit,
    pub variables: ThrottleVariables,
}

/// Forwards at most `max_amount` to the single destination every
/// `interval_sec` seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Throttle {
    pub init: LedgerInit,
    pub variables: ThrottleVariables,
    /// Value drawn from `variables.interval_sec`.
    pub interval_sec: u64,
    /// Value drawn from `variables.max_amount`.
    pub max_amount: u64,
}

impl Throttle {
    pub fn create<R: Rng>(request: ThrottleCreateRequest, rng: &mut R) -> Result<Self> {
        request.variables.validate()?;
        let mut throttle = Self {
            init: request.init,
            variables: request.variables,
            interval_sec: 0,
            max_amount: 0,
        };
        throttle.resolve_all(rng);
        Ok(throttle)
    }

    pub fn update<R: Rng>(&mut self, variables: ThrottleVariables, rng: &mut R) -> Result<()> {
        variables.validate()?;
        self.variables = variables;
        self.resolve_all(rng);
        Ok(())
    }

    /// Draws new values for the random descriptors only.
    pub fn reroll<R: Rng>(&mut self, rng: &mut R) {
        if self.variables.interval_sec.is_random() {
            self.interval_sec = self.variables.interval_sec.resolve(rng);
        }
        if self.variables.max_amount.is_random() {
            self.max_amount = self.variables.max_amount.resolve(rng);
        }
    }

    fn resolve_all<R: Rng>(&mut self, rng: &mut R) {
        self.interval_sec = self.variables.interval_sec.resolve(rng);
        self.max_amount = self.variables.max_amount.resolve(rng);
    }
}

impl VectorStrategy for Throttle {
    fn process(&self, ctx: &ProcessContext<'_>) -> Vec<TransferIntent> {
        if let Some(last) = ctx.activity.last_transfer
            && ctx.now.secs_since(last) < self.interval_sec
        {
            return Vec::new();
        }

        let amount = ctx.balance.min(Tokens::from(self.max_amount));
        // Anything at or below the fee would be rejected or burn the fee.
        if amount <= ctx.fee {
            return Vec::new();
        }

        vec![TransferIntent {
            source: ctx.source,
            target: Target::Destination(0),
            amount,
        }]
    }
}
