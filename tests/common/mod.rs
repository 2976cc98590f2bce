#![allow(dead_code)]

use std::sync::Arc;
use vectornode::application::engine::NodeEngine;
use vectornode::application::scheduler::TickReport;
use vectornode::config::{EngineConfig, RetryConfig};
use vectornode::domain::account::{Account, Principal, Tokens};
use vectornode::domain::endpoint::{DestIcEndpoint, DestinationEndpoint, Endpoint, IcEndpoint};
use vectornode::domain::node::NodeView;
use vectornode::domain::ports::{Ledger, NodeStoreBox};
use vectornode::domain::request::NodeRequest;
use vectornode::domain::time::{ManualClock, Timestamp};
use vectornode::domain::vector::{
    CreateRequest, LedgerInit, NumVariant, SplitCreateRequest, SplitVariables,
    ThrottleCreateRequest, ThrottleVariables,
};
use vectornode::infrastructure::in_memory::{InMemoryLedger, InMemoryNodeStore};

pub const LEDGER: &str = "ledger";
pub const FEE: Tokens = Tokens(10_000);

/// An engine over one in-memory ledger and a manual clock.
pub struct Harness {
    pub engine: Arc<NodeEngine>,
    pub ledger: Arc<InMemoryLedger>,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new() -> Self {
        let ledger = Arc::new(InMemoryLedger::new(LEDGER, FEE, "minter"));
        Self::with_ledger(ledger.clone(), ledger)
    }

    /// Lets a test wrap the in-memory ledger, e.g. to delay or drop replies.
    pub fn with_ledger(ledger: Arc<InMemoryLedger>, handle: Arc<dyn Ledger>) -> Self {
        Self::with_parts(config(), Box::new(InMemoryNodeStore::new()), ledger, handle)
    }

    /// An in-memory ledger behind a caller-supplied node store.
    pub fn with_store(store: NodeStoreBox) -> Self {
        let ledger = Arc::new(InMemoryLedger::new(LEDGER, FEE, "minter"));
        Self::with_parts(config(), store, ledger.clone(), ledger)
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let ledger = Arc::new(InMemoryLedger::new(LEDGER, FEE, "minter"));
        Self::with_parts(config, Box::new(InMemoryNodeStore::new()), ledger.clone(), ledger)
    }

    fn with_parts(
        config: EngineConfig,
        store: NodeStoreBox,
        ledger: Arc<InMemoryLedger>,
        handle: Arc<dyn Ledger>,
    ) -> Self {
        let clock = ManualClock::new(Timestamp::from_secs(1_000));
        let engine = NodeEngine::new(
            config,
            store,
            vec![handle],
            Arc::new(clock.clone()),
        )
        .unwrap();
        Self {
            engine: Arc::new(engine),
            ledger,
            clock,
        }
    }

    pub async fn create(&self, request: NodeRequest, create: CreateRequest) -> NodeView {
        self.engine
            .create_node(&principal("jo"), request, create)
            .await
            .unwrap()
    }

    /// Mints `amount` into the node's first source.
    pub async fn fund(&self, node: &NodeView, amount: u128) -> Account {
        let source = node.source_account(0).unwrap().clone();
        self.ledger.mint(&source, Tokens(amount)).await;
        source
    }

    pub async fn balance(&self, account: &Account) -> Tokens {
        self.ledger.balance(account).await
    }

    pub async fn advance(&self, secs: u64) -> TickReport {
        self.clock.advance_secs(secs);
        self.engine.tick().await.unwrap()
    }
}

pub fn config() -> EngineConfig {
    EngineConfig {
        seed: Some(42),
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 0,
            max_delay_ms: 0,
        },
        ..EngineConfig::default()
    }
}

pub fn principal(name: &str) -> Principal {
    Principal::new(name)
}

pub fn account(owner: &str) -> Account {
    Account::new(owner)
}

pub fn dest(owner: &str) -> DestinationEndpoint {
    dest_account(owner, Account::new(owner))
}

pub fn dest_account(name: &str, account: Account) -> DestinationEndpoint {
    DestinationEndpoint::Ic(DestIcEndpoint {
        name: name.to_string(),
        ledger: principal(LEDGER),
        account: Some(account),
    })
}

pub fn unresolved(name: &str) -> DestinationEndpoint {
    DestinationEndpoint::Ic(DestIcEndpoint {
        name: name.to_string(),
        ledger: principal(LEDGER),
        account: None,
    })
}

pub fn refund(owner: &str) -> Endpoint {
    Endpoint::Ic(IcEndpoint {
        name: owner.to_string(),
        ledger: principal(LEDGER),
        account: Account::new(owner),
    })
}

pub fn request(destinations: Vec<DestinationEndpoint>) -> NodeRequest {
    NodeRequest {
        controllers: vec![principal("jo")],
        destinations,
        refund: refund("jo"),
    }
}

pub fn throttle(interval_sec: u64, max_amount: u64) -> CreateRequest {
    CreateRequest::Throttle(ThrottleCreateRequest {
        init: LedgerInit {
            ledger: principal(LEDGER),
        },
        variables: ThrottleVariables {
            interval_sec: NumVariant::Fixed(interval_sec),
            max_amount: NumVariant::Fixed(max_amount),
        },
    })
}

pub fn split(weights: Vec<u64>) -> CreateRequest {
    CreateRequest::Split(SplitCreateRequest {
        init: LedgerInit {
            ledger: principal(LEDGER),
        },
        variables: SplitVariables { split: weights },
    })
}
