//! Document store behavior over the in-memory medium.

use serde_json::json;
use std::collections::BTreeSet;
use tilldb_core::{
    Authority, Document, DocumentStore, ListOptions, MemoryMedium, Precondition, StoreError,
};

fn store() -> DocumentStore<MemoryMedium> {
    DocumentStore::new(MemoryMedium::new())
}

#[test]
fn test_catalogue_listing() {
    let mut store = store();
    store
        .put(Document::new("products:1", json!({"name": "Classic Burger", "price": 12.99})))
        .unwrap();
    store
        .put(Document::new("products:2", json!({"name": "Margherita Pizza", "price": 14.99})))
        .unwrap();

    let result = store
        .list("products", &ListOptions::namespace_range("products").include_docs(true))
        .unwrap();
    let names: Vec<_> = result.docs().map(|d| d.get("name").unwrap()).collect();
    assert_eq!(names, vec![json!("Classic Burger"), json!("Margherita Pizza")]);
}

#[test]
fn test_range_never_leaks_across_namespaces() {
    let mut store = store();
    for id in [
        "order:1",
        "orders:1",
        "orders:10",
        "orders:2",
        "orders:zz",
        "orders:\u{FFEF}",
        "ordersx:1",
        "orderz:1",
    ] {
        store.put(Document::new(id, json!({"id": id}))).unwrap();
    }

    let result = store
        .list("orders", &ListOptions::namespace_range("orders"))
        .unwrap();
    assert_eq!(
        result.ids(),
        vec!["orders:1", "orders:10", "orders:2", "orders:zz", "orders:\u{FFEF}"]
    );
}

#[test]
fn test_explicit_bounds_are_inclusive() {
    let mut store = store();
    for i in 1..=5 {
        store
            .put(Document::new(format!("sales:{}", i), json!({"n": i})))
            .unwrap();
    }
    let result = store
        .list(
            "sales",
            &ListOptions::new().start_key("sales:2").end_key("sales:4"),
        )
        .unwrap();
    assert_eq!(result.ids(), vec!["sales:2", "sales:3", "sales:4"]);
}

#[test]
fn test_pages_cover_namespace_exactly_once() {
    let mut store = store();
    let mut expected = BTreeSet::new();
    for i in 0..23 {
        let id = format!("orders:{:03}", i);
        store.put(Document::new(id.clone(), json!({"n": i}))).unwrap();
        expected.insert(id);
    }

    let mut seen = Vec::new();
    for page in 1..=5 {
        let result = store
            .list("orders", &ListOptions::namespace_range("orders").page(page, 5))
            .unwrap();
        seen.extend(result.ids().into_iter().map(str::to_string));
    }
    assert_eq!(seen.len(), 23);
    assert_eq!(seen.iter().cloned().collect::<BTreeSet<_>>(), expected);

    let past_end = store
        .list("orders", &ListOptions::namespace_range("orders").page(6, 5))
        .unwrap();
    assert!(past_end.is_empty());
}

#[test]
fn test_generated_ids_are_unique_and_in_namespace() {
    let mut store = store();
    let mut ids = BTreeSet::new();
    for i in 0..50 {
        let resp = store
            .put(Document::in_namespace("orders", json!({"n": i})))
            .unwrap();
        assert!(resp.id.starts_with("orders:"));
        ids.insert(resp.id);
    }
    assert_eq!(ids.len(), 50);
}

#[test]
fn test_since_and_marker() {
    let mut store = store();
    let first = store.put(Document::new("orders:1", json!({"total": 1}))).unwrap();
    let second = store.put(Document::new("orders:2", json!({"total": 2}))).unwrap();

    let result = store
        .list(
            "orders",
            &ListOptions::namespace_range("orders")
                .include_docs(true)
                .since(first.revision),
        )
        .unwrap();
    assert_eq!(result.ids(), vec!["orders:2"]);
    assert_eq!(result.marker, Some(second.revision));
}

#[test]
fn test_authority_restamps_and_checks() {
    let mut authority = Authority::new(store()).unwrap();
    let first = authority
        .put(Document::new("orders:1", json!({"total": 1})).with_revision(100), Precondition::Absent)
        .unwrap();
    assert_eq!(first.revision, 100);

    let older = authority
        .put(Document::new("orders:2", json!({"total": 2})).with_revision(7), Precondition::Any)
        .unwrap();
    assert_eq!(older.revision, 101);

    let err = authority
        .put(
            Document::new("orders:1", json!({"total": 3})),
            Precondition::Revision(99),
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    let same = authority
        .put(
            Document::new("orders:1", json!({"total": 1})),
            Precondition::Revision(100),
        )
        .unwrap();
    assert_eq!(same.revision, 100);
}
