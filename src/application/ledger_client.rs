use crate::config::RetryConfig;
use crate::domain::account::{Account, Principal, Tokens};
use crate::domain::ports::{Ledger, LedgerCallError, TransferArgs, TransferError, TxIndex};
use crate::domain::time::Timestamp;
use crate::error::{NodeError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Retrying wrapper around one [`Ledger`].
///
/// A transient failure means nothing is known to have been applied. Retries of
/// a transfer reuse the same memo and `created_at_time`, so a deduplicating
/// ledger answers a replay with `Duplicate`, which counts as success.
pub struct LedgerClient {
    ledger: Arc<dyn Ledger>,
    retry: RetryConfig,
    fee: RwLock<Option<Tokens>>,
}

impl LedgerClient {
    pub fn new(ledger: Arc<dyn Ledger>, retry: RetryConfig) -> Self {
        Self {
            ledger,
            retry,
            fee: RwLock::new(None),
        }
    }

    pub fn ledger_id(&self) -> &Principal {
        self.ledger.id()
    }

    /// The ledger's transfer fee, fetched once and cached.
    pub async fn fee(&self) -> Result<Tokens> {
        if let Some(fee) = *self.fee.read().await {
            return Ok(fee);
        }
        let fee = self
            .with_retry("fee", || self.ledger.fee())
            .await
            .map_err(into_node_error)?;
        *self.fee.write().await = Some(fee);
        Ok(fee)
    }

    pub async fn balance_of(&self, account: &Account) -> Result<Tokens> {
        self.with_retry("balance_of", || self.ledger.balance_of(account))
            .await
            .map_err(into_node_error)
    }

    /// Moves `gross` out of `from`: the recipient gets `gross - fee`.
    pub async fn transfer(
        &self,
        from: &Account,
        to: &Account,
        gross: Tokens,
        memo: Vec<u8>,
        created_at: Timestamp,
    ) -> Result<TxIndex> {
        let fee = self.fee().await?;
        let Some(amount) = gross.checked_sub(fee).filter(|a| !a.is_zero()) else {
            return Err(NodeError::ValidationError(format!(
                "amount {} does not cover fee {}",
                gross, fee
            )));
        };

        let args = TransferArgs {
            from: from.clone(),
            to: to.clone(),
            amount,
            fee: Some(fee),
            memo: Some(memo),
            created_at_time: Some(created_at),
        };

        match self
            .with_retry("transfer", || self.ledger.transfer(args.clone()))
            .await
        {
            Ok(index) => Ok(index),
            Err(LedgerCallError::Rejected(TransferError::Duplicate { duplicate_of })) => {
                debug!(
                    ledger = %self.ledger_id(),
                    duplicate_of,
                    "transfer already applied"
                );
                Ok(duplicate_of)
            }
            Err(LedgerCallError::Rejected(TransferError::BadFee { expected_fee })) => {
                *self.fee.write().await = Some(expected_fee);
                Err(NodeError::LedgerRejected(TransferError::BadFee {
                    expected_fee,
                }))
            }
            Err(e) => Err(into_node_error(e)),
        }
    }

    async fn with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        mut call: F,
    ) -> std::result::Result<T, LedgerCallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, LedgerCallError>>,
    {
        let mut attempt = 1;
        loop {
            let result = call().await;
            let retryable = matches!(
                result,
                Err(LedgerCallError::Transient(_))
                    | Err(LedgerCallError::Rejected(
                        TransferError::TemporarilyUnavailable
                    ))
            );
            if !retryable || attempt >= self.retry.max_attempts {
                return result;
            }
            warn!(
                ledger = %self.ledger_id(),
                operation,
                attempt,
                "transient ledger failure, retrying"
            );
            tokio::time::sleep(self.retry.delay_for(attempt)).await;
            attempt += 1;
        }
    }
}

fn into_node_error(error: LedgerCallError) -> NodeError {
    match error {
        LedgerCallError::Transient(message) => NodeError::LedgerTransient(message),
        LedgerCallError::Rejected(TransferError::TemporarilyUnavailable) => {
            NodeError::LedgerTransient(TransferError::TemporarilyUnavailable.to_string())
        }
        LedgerCallError::Rejected(e) => NodeError::LedgerRejected(e),
    }
}

/// Clients for every ledger the engine can operate on, keyed by ledger id.
#[derive(Default)]
pub struct LedgerDirectory {
    clients: HashMap<Principal, Arc<LedgerClient>>,
}

impl LedgerDirectory {
    pub fn new(ledgers: Vec<Arc<dyn Ledger>>, retry: &RetryConfig) -> Self {
        let clients = ledgers
            .into_iter()
            .map(|ledger| {
                let id = ledger.id().clone();
                (id, Arc::new(LedgerClient::new(ledger, retry.clone())))
            })
            .collect();
        Self { clients }
    }

    pub fn get(&self, id: &Principal) -> Option<Arc<LedgerClient>> {
        self.clients.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<Principal> {
        let mut ids: Vec<Principal> = self.clients.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
