mod common;

use common::*;
use std::sync::Arc;
use vectornode::domain::account::Tokens;
use vectornode::domain::node::{Node, NodeStatus, SourceActivity};
use vectornode::domain::ports::{Ledger, NodeStoreBox};
use vectornode::domain::time::Timestamp;
use vectornode::domain::vector::{LedgerInit, Split, SplitCreateRequest, SplitVariables, Vector};
use vectornode::infrastructure::in_memory::{InMemoryLedger, InMemoryNodeStore};

#[tokio::test]
async fn test_ports_as_trait_objects() {
    let store: NodeStoreBox = Box::new(InMemoryNodeStore::new());
    let memory = Arc::new(InMemoryLedger::new(LEDGER, FEE, "minter"));
    memory.mint(&account("jo"), Tokens(1_000_000)).await;
    let ledger: Arc<dyn Ledger> = memory;

    let vector = Vector::Split(
        Split::create(SplitCreateRequest {
            init: LedgerInit {
                ledger: principal(LEDGER),
            },
            variables: SplitVariables { split: vec![1] },
        })
        .unwrap(),
    );

    // Verify Send + Sync by spawning tasks
    let store_handle = tokio::spawn(async move {
        let id = store.allocate_id().await.unwrap();
        let node = Node {
            id,
            sources: Node::derive_sources(id, &principal("engine"), &vector),
            vector,
            destinations: vec![dest("bob")],
            refund: refund("jo"),
            controllers: vec![principal("jo")],
            status: NodeStatus::Created,
            activity: vec![SourceActivity::default()],
            created_at: Timestamp(1),
            modified_at: Timestamp(1),
        };
        store.store(node).await.unwrap();
        store.get(id).await.unwrap().unwrap()
    });

    let ledger_handle = tokio::spawn(async move { ledger.balance_of(&account("jo")).await });

    let node = store_handle.await.unwrap();
    assert_eq!(node.controllers, vec![principal("jo")]);

    let balance = ledger_handle.await.unwrap().unwrap();
    assert_eq!(balance, Tokens(1_000_000));
}
