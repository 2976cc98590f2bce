use super::{LedgerInit, ProcessContext, Target, TransferIntent, VectorStrategy};
use crate::domain::account::Tokens;
use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitVariables {
    /// One weight per destination, normalized by their sum.
    pub split: Vec<u64>,
}

impl SplitVariables {
    fn validate(&self) -> Result<()> {
        if self.split.is_empty() {
            return Err(NodeError::ValidationError(
                "split requires at least one weight".to_string(),
            ));
        }
        if self.split.iter().all(|w| *w == 0) {
            return Err(NodeError::ValidationError(
                "split weights must not all be zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitCreateRequest {
    pub init: LedgerInit,
    pub variables: SplitVariables,
}

/// Forwards the whole source balance, divided across destinations by weight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub init: LedgerInit,
    pub variables: SplitVariables,
}

impl Split {
    pub fn create(request: SplitCreateRequest) -> Result<Self> {
        request.variables.validate()?;
        Ok(Self {
            init: request.init,
            variables: request.variables,
        })
    }

    pub fn update(&mut self, variables: SplitVariables) -> Result<()> {
        variables.validate()?;
        self.variables = variables;
        Ok(())
    }

    pub fn check_destinations(&self, count: usize) -> Result<()> {
        if count != self.variables.split.len() {
            return Err(NodeError::ValidationError(format!(
                "split has {} weights but {} destinations",
                self.variables.split.len(),
                count
            )));
        }
        Ok(())
    }

    /// Floored per-destination shares of `balance`.
    ///
    /// The integer remainder goes to the lowest-index destination with a
    /// positive weight. Any share too small to cover the fee is moved to the
    /// lowest-index share that can, so the shares always sum to `balance`.
    pub fn shares(&self, balance: Tokens, fee: Tokens) -> Vec<Tokens> {
        let weights = &self.variables.split;
        let total: u128 = weights.iter().map(|w| *w as u128).sum();
        let Some(first) = weights.iter().position(|w| *w > 0) else {
            return vec![Tokens::ZERO; weights.len()];
        };

        let mut shares: Vec<Tokens> = weights
            .iter()
            .map(|w| Tokens(scale(balance.value(), *w, total)))
            .collect();

        let allotted: Tokens = shares.iter().copied().sum();
        shares[first] += balance - allotted;

        let sink = shares.iter().position(|s| *s > fee).unwrap_or(first);
        for i in 0..shares.len() {
            if i != sink && !shares[i].is_zero() && shares[i] <= fee {
                let dust = shares[i];
                shares[i] = Tokens::ZERO;
                shares[sink] += dust;
            }
        }
        shares
    }
}

/// `floor(value * weight / total)` for `weight <= total`, without overflow.
fn scale(value: u128, weight: u64, total: u128) -> u128 {
    if let Some(product) = value.checked_mul(weight as u128) {
        return product / total;
    }
    // value = q * total + r, so value * weight / total = q * weight + r * weight / total.
    let (q, r) = (value / total, value % total);
    q * weight as u128 + scale_remainder(r, weight, total)
}

/// `floor(r * weight / total)` for `r < total`, by binary long multiplication.
/// `total` is a sum of `u64` weights, so doubling a remainder below it fits.
fn scale_remainder(r: u128, weight: u64, total: u128) -> u128 {
    let (mut quotient, mut rem) = (0u128, 0u128);
    for bit in (0..u64::BITS).rev() {
        quotient <<= 1;
        rem <<= 1;
        if rem >= total {
            rem -= total;
            quotient += 1;
        }
        if (weight >> bit) & 1 == 1 {
            rem += r;
            if rem >= total {
                rem -= total;
                quotient += 1;
            }
        }
    }
    quotient
}

impl VectorStrategy for Split {
    fn process(&self, ctx: &ProcessContext<'_>) -> Vec<TransferIntent> {
        if ctx.balance <= ctx.fee {
            return Vec::new();
        }

        let shares = self.shares(ctx.balance, ctx.fee);
        if shares.iter().all(|s| *s <= ctx.fee) {
            return Vec::new();
        }

        shares
            .into_iter()
            .enumerate()
            .filter(|(_, amount)| !amount.is_zero())
            .map(|(index, amount)| TransferIntent {
                source: ctx.source,
                target: Target::Destination(index),
                amount,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::Principal;
    use crate::domain::node::SourceActivity;
    use crate::domain::time::Timestamp;

    const FEE: Tokens = Tokens(10_000);

    fn split(weights: &[u64]) -> Split {
        Split::create(SplitCreateRequest {
            init: LedgerInit {
                ledger: Principal::new("ledger"),
            },
            variables: SplitVariables {
                split: weights.to_vec(),
            },
        })
        .unwrap()
    }

    fn process(s: &Split, balance: u128) -> Vec<TransferIntent> {
        let activity = SourceActivity::default();
        s.process(&ProcessContext {
            source: 0,
            balance: Tokens(balance),
            fee: FEE,
            now: Timestamp::from_secs(1),
            activity: &activity,
        })
    }

    #[test]
    fn test_even_split() {
        let intents = process(&split(&[50, 50]), 300_000_000);
        assert_eq!(intents.len(), 2);
        assert_eq!(intents[0].amount, Tokens(150_000_000));
        assert_eq!(intents[1].amount, Tokens(150_000_000));
    }

    #[test]
    fn test_remainder_goes_to_first_destination() {
        let intents = process(&split(&[1, 1, 1]), 100_000_001);
        let amounts: Vec<u128> = intents.iter().map(|i| i.amount.value()).collect();
        assert_eq!(amounts, vec![33_333_335, 33_333_333, 33_333_333]);
    }

    #[test]
    fn test_conservation_across_weights() {
        let weight_sets: [&[u64]; 5] = [&[50, 50], &[1, 2, 3], &[7, 0, 13], &[99, 1], &[3]];
        for weights in weight_sets {
            let s = split(weights);
            for balance in [10_001u128, 777_777, 300_000_000, 1_234_567_891] {
                let intents = process(&s, balance);
                let total: Tokens = intents.iter().map(|i| i.amount).sum();
                assert_eq!(total, Tokens(balance), "weights {:?}", weights);
            }
        }
    }

    #[test]
    fn test_zero_weight_destination_skipped() {
        let intents = process(&split(&[0, 1, 1]), 1_000_000);
        assert!(
            intents
                .iter()
                .all(|i| i.target != Target::Destination(0))
        );
        assert_eq!(intents[0].target, Target::Destination(1));
        assert_eq!(intents[0].amount, Tokens(500_000));
    }

    #[test]
    fn test_dust_share_folded_into_first() {
        // The second share (9_999) cannot cover the fee.
        let intents = process(&split(&[99, 1]), 999_900);
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].amount, Tokens(999_900));
    }

    #[test]
    fn test_small_first_share_moves_to_larger_one() {
        let intents = process(&split(&[1, 1_000]), 1_000_000);
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].target, Target::Destination(1));
        assert_eq!(intents[0].amount, Tokens(1_000_000));
    }

    #[test]
    fn test_large_weights_and_balance() {
        let balance = 20_000_000_000_000_000_000_000u128;

        // The 1-weight share is 1_084, below the fee, and folds into the first.
        let intents = process(&split(&[u64::MAX, 1]), balance);
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].amount, Tokens(balance));

        let intents = process(&split(&[u64::MAX, u64::MAX]), balance);
        assert_eq!(intents[0].amount, Tokens(balance / 2));
        assert_eq!(intents[1].amount, Tokens(balance / 2));

        let shares = split(&[u64::MAX, 1]).shares(Tokens(balance), Tokens::ZERO);
        assert_eq!(shares[1], Tokens(1_084));
        assert_eq!(shares[0] + shares[1], Tokens(balance));
    }

    #[test]
    fn test_scale_past_u128_product() {
        let total = u64::MAX as u128 * 3;
        assert_eq!(
            scale(u128::MAX / 2, u64::MAX, total),
            56_713_727_820_156_410_577_229_101_238_628_035_242
        );
        assert_eq!(scale(u128::MAX, 1, total), 6_148_914_691_236_517_205);
        assert_eq!(
            scale(total - 1, u64::MAX - 7, total),
            18_446_744_073_709_551_607
        );
        assert_eq!(scale(12_345, 678, 1_000), 8_369);
    }

    #[test]
    fn test_balance_at_fee_is_noop() {
        assert!(process(&split(&[1, 1]), 0).is_empty());
        assert!(process(&split(&[1, 1]), 10_000).is_empty());
    }

    #[test]
    fn test_weights_validated() {
        let mk = |weights: Vec<u64>| {
            Split::create(SplitCreateRequest {
                init: LedgerInit {
                    ledger: Principal::new("ledger"),
                },
                variables: SplitVariables { split: weights },
            })
        };
        assert!(mk(vec![]).is_err());
        assert!(mk(vec![0, 0]).is_err());
        assert!(mk(vec![0, 1]).is_ok());
    }

    #[test]
    fn test_destination_count_must_match_weights() {
        let s = split(&[1, 1]);
        assert!(s.check_destinations(2).is_ok());
        assert!(s.check_destinations(3).is_err());
    }
}
