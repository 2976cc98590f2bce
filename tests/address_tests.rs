mod common;

use common::*;
use std::collections::HashSet;
use vectornode::domain::address::{Role, derive};
use vectornode::domain::node::NodeId;

#[tokio::test]
async fn test_addresses_are_stable_across_engines() {
    let first = Harness::new();
    let second = Harness::new();

    for _ in 0..3 {
        let a = first.create(request(vec![dest("bob")]), throttle(1, 1_000)).await;
        let b = second.create(request(vec![dest("bob")]), throttle(1, 1_000)).await;
        assert_eq!(a.id, b.id);
        assert_eq!(a.source_account(0), b.source_account(0));
        assert_eq!(
            first.engine.get_node_address(a.id).await.unwrap(),
            second.engine.get_node_address(b.id).await.unwrap()
        );
    }
}

#[tokio::test]
async fn test_addresses_are_unique_per_node() {
    let h = Harness::new();
    let mut seen = HashSet::new();
    for _ in 0..50 {
        let node = h.create(request(vec![dest("bob")]), throttle(1, 1_000)).await;
        let account = node.source_account(0).unwrap().clone();
        assert_eq!(account.owner, principal("engine"));
        assert!(seen.insert(account.effective_subaccount()));
    }
}

#[test]
fn test_derivation_does_not_depend_on_anything_but_inputs() {
    let id = NodeId::new(77);
    assert_eq!(derive(id, Role::Source(0)), derive(id, Role::Source(0)));
    assert_ne!(derive(id, Role::Source(0)), derive(id, Role::Intermediate(0)));
    assert_ne!(derive(id, Role::Source(0)), derive(NodeId::new(78), Role::Source(0)));
}
