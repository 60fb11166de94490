use ledger::adapters::MemoryAdapter;
use ledger::{CreditRequest, DebitRequest, EntryType, LedgerError, LedgerStore, ReversalRequest};
use serde_json::Map;
use uuid::Uuid;

fn credit_req(user_id: &str, amount_cents: i64) -> CreditRequest {
    CreditRequest {
        user_id: user_id.to_string(),
        amount_cents,
        reward_id: None,
        reward_status: None,
        extra_data: Map::new(),
    }
}

fn debit_req(user_id: &str, amount_cents: i64) -> DebitRequest {
    DebitRequest {
        user_id: user_id.to_string(),
        amount_cents,
        extra_data: Map::new(),
    }
}

#[tokio::test]
async fn credit_creates_balance() {
    let store = MemoryAdapter::new();
    let outcome = store.credit(&credit_req("u1", 10_000), "k1").await.unwrap();
    assert!(!outcome.is_duplicate);
    assert_eq!(outcome.entry.entry_type, EntryType::Credit);

    let balance = store.get_balance("u1").await.unwrap();
    assert_eq!(balance.balance_cents, 10_000);
    assert_eq!(balance.version, 1);
}

#[tokio::test]
async fn repeated_credit_with_same_key_is_duplicate() {
    let store = MemoryAdapter::new();
    let req = credit_req("u1", 10_000);
    let first = store.credit(&req, "k1").await.unwrap();
    let second = store.credit(&req, "k1").await.unwrap();

    assert!(!first.is_duplicate);
    assert!(second.is_duplicate);
    assert_eq!(first.entry.id, second.entry.id);
    assert_eq!(store.get_balance("u1").await.unwrap().balance_cents, 10_000);
}

#[tokio::test]
async fn same_key_different_request_is_conflict() {
    let store = MemoryAdapter::new();
    store.credit(&credit_req("u1", 10_000), "k1").await.unwrap();
    let err = store.credit(&credit_req("u1", 20_000), "k1").await.unwrap_err();
    assert!(matches!(err, LedgerError::IdempotencyConflict(_)));
    assert_eq!(store.get_balance("u1").await.unwrap().balance_cents, 10_000);
}

#[tokio::test]
async fn debit_insufficient_funds_is_rejected() {
    let store = MemoryAdapter::new();
    store.credit(&credit_req("u2", 5_000), "k1").await.unwrap();

    let err = store.debit(&debit_req("u2", 10_000), "k2").await.unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
    assert_eq!(store.get_balance("u2").await.unwrap().balance_cents, 5_000);
}

#[tokio::test]
async fn reverse_credit_returns_balance_to_zero() {
    let store = MemoryAdapter::new();
    let credit = store.credit(&credit_req("u3", 10_000), "k1").await.unwrap();

    let reversal = store
        .reverse(
            &ReversalRequest { entry_id: credit.entry.id, reason: "chargeback".into(), extra_data: Map::new() },
            "k2",
        )
        .await
        .unwrap();

    assert_eq!(reversal.entry.entry_type, EntryType::Reversal);
    assert_eq!(reversal.entry.related_entry_id, Some(credit.entry.id));
    assert_eq!(store.get_balance("u3").await.unwrap().balance_cents, 0);
}

#[tokio::test]
async fn reversing_twice_is_rejected() {
    let store = MemoryAdapter::new();
    let credit = store.credit(&credit_req("u4", 10_000), "k1").await.unwrap();
    let req = ReversalRequest { entry_id: credit.entry.id, reason: "x".into(), extra_data: Map::new() };
    store.reverse(&req, "k2").await.unwrap();

    let err = store.reverse(&req, "k3").await.unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyReversed(_)));
}

#[tokio::test]
async fn reversal_of_a_reversal_is_rejected() {
    let store = MemoryAdapter::new();
    let credit = store.credit(&credit_req("u5", 10_000), "k1").await.unwrap();
    let reversal = store
        .reverse(
            &ReversalRequest { entry_id: credit.entry.id, reason: "x".into(), extra_data: Map::new() },
            "k2",
        )
        .await
        .unwrap();

    let err = store
        .reverse(
            &ReversalRequest { entry_id: reversal.entry.id, reason: "y".into(), extra_data: Map::new() },
            "k3",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyReversed(_)));
}

#[tokio::test]
async fn reversing_unknown_entry_is_not_found() {
    let store = MemoryAdapter::new();
    let err = store
        .reverse(
            &ReversalRequest { entry_id: Uuid::new_v4(), reason: "x".into(), extra_data: Map::new() },
            "k1",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));
}

#[tokio::test]
async fn get_entries_filters_by_user_and_paginates() {
    let store = MemoryAdapter::new();
    store.credit(&credit_req("u6", 1_000), "k1").await.unwrap();
    store.credit(&credit_req("u6", 2_000), "k2").await.unwrap();
    store.credit(&credit_req("u7", 3_000), "k3").await.unwrap();

    let (entries, total) = store.get_entries(Some("u6"), 10, 0).await.unwrap();
    assert_eq!(total, 2);
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.user_id == "u6"));

    let (page, total_all) = store.get_entries(None, 2, 0).await.unwrap();
    assert_eq!(total_all, 3);
    assert_eq!(page.len(), 2);
}

#[tokio::test]
async fn amount_validation_rejects_zero_and_overflow() {
    let store = MemoryAdapter::new();
    assert!(matches!(
        store.credit(&credit_req("u8", 0), "k1").await.unwrap_err(),
        LedgerError::InvalidAmount(_)
    ));
    assert!(matches!(
        store.credit(&credit_req("u8", 1_000_000_001), "k2").await.unwrap_err(),
        LedgerError::InvalidAmount(_)
    ));
}

#[tokio::test]
async fn concurrent_retries_of_same_credit_apply_exactly_once() {
    use std::sync::Arc;

    let store = Arc::new(MemoryAdapter::new());
    let req = Arc::new(credit_req("u9", 7_500));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        let req = Arc::clone(&req);
        handles.push(tokio::spawn(async move { store.credit(&req, "race-key").await.unwrap() }));
    }

    let mut fresh_count = 0;
    for handle in handles {
        let outcome = handle.await.unwrap();
        if !outcome.is_duplicate {
            fresh_count += 1;
        }
    }

    assert_eq!(fresh_count, 1);
    assert_eq!(store.get_balance("u9").await.unwrap().balance_cents, 7_500);
}
