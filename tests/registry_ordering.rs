#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::wildcard_imports,
    clippy::indexing_slicing
)]
//! Integration tests for handler ordering.
//!
//! These tests exercise the dependency-ordered registry on its own and as
//! used by the engine's reader and writer registries.

mod common;

use common::*;
use treeconf::error::{EngineError, OrderingConflict};
use treeconf::read::Reader;
use treeconf::registry::HandlerRegistry;
use treeconf::schema::Schema;
use treeconf::write::Writer;

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// A handler registered before a later one is dispatched first even though
/// the later type was unknown when the relation was declared.
#[test]
fn add_before_orders_against_later_registration() {
    let mut registry = HandlerRegistry::new();
    registry
        .add_before(path("/gpe-feature"), "h1", &path("/interfaces"))
        .unwrap();
    registry.add(path("/interfaces"), "h2").unwrap();

    let handlers: Vec<&str> = registry.build().iter().map(|r| r.handler).collect();
    assert_eq!(handlers, vec!["h1", "h2"]);
}

/// A rejected registration leaves the registry exactly as it was.
#[test]
fn cycle_is_rejected_without_side_effects() {
    let mut registry = HandlerRegistry::new();
    registry.add_before(path("/a"), "a", &path("/b")).unwrap();
    registry.add_before(path("/b"), "b", &path("/c")).unwrap();

    let err = registry.add_before(path("/c"), "c", &path("/a")).unwrap_err();
    assert_eq!(
        err,
        OrderingConflict::Cycle {
            from: path("/c"),
            to: path("/a"),
        }
    );
    assert_eq!(registry.len(), 2);
    assert!(!registry.contains(&path("/c")));

    registry.add(path("/c"), "c").unwrap();
    let handlers: Vec<&str> = registry.build().iter().map(|r| r.handler).collect();
    assert_eq!(handlers, vec!["a", "b", "c"]);
}

/// Keys in registration paths are ignored.
#[test]
fn registration_normalizes_paths() {
    let mut registry = HandlerRegistry::new();
    registry
        .add(path("/interfaces/interface[name=eth0]"), "iface")
        .unwrap();
    let err = registry
        .add(path("/interfaces/interface[name=eth1]"), "again")
        .unwrap_err();
    assert!(matches!(err, OrderingConflict::Duplicate { .. }));
}

/// Handlers for types claimed by a subtree handler are not dispatched.
#[test]
fn subtree_owner_supersedes_claimed_types() {
    let mut registry = HandlerRegistry::new();
    registry
        .add(path("/interfaces/interface/address"), "address")
        .unwrap();
    registry
        .subtree_add(
            [path("/interfaces/interface/address")],
            path("/interfaces/interface"),
            "interface",
        )
        .unwrap();
    let built = registry.build();
    let handlers: Vec<&str> = built.iter().map(|r| r.handler).collect();
    assert_eq!(handlers, vec!["interface"]);
    assert_eq!(
        built
            .owner_of(&path("/interfaces/interface/address"))
            .map(|r| r.handler),
        Some("interface")
    );
}

/// A subtree may only claim descendants.
#[test]
fn subtree_claim_outside_node_is_rejected() {
    let mut registry = HandlerRegistry::new();
    let err = registry
        .subtree_add([path("/routes")], path("/interfaces"), "x")
        .unwrap_err();
    assert!(matches!(err, OrderingConflict::InvalidSubtree { .. }));
    assert!(registry.is_empty());
}

// ---------------------------------------------------------------------------
// Snapshot: derived dispatch order
// ---------------------------------------------------------------------------

/// Snapshot of a realistic writer order with mixed relations.
///
/// Any change to the tie-breaking rule or to how relations are applied
/// shows up here.
#[test]
fn derived_handler_order() {
    let mut registry = HandlerRegistry::new();
    registry.add(path("/interfaces/interface"), ()).unwrap();
    registry
        .add_after(
            path("/interfaces/interface/address"),
            (),
            &path("/interfaces/interface"),
        )
        .unwrap();
    registry
        .add_before(path("/bridge-domains/bridge-domain"), (), &path("/interfaces/interface"))
        .unwrap();
    registry
        .add_before(path("/gpe-feature"), (), &path("/gpe/entry"))
        .unwrap();
    registry.add(path("/gpe/entry"), ()).unwrap();
    registry
        .add_after(path("/routes/route"), (), &path("/interfaces/interface/address"))
        .unwrap();

    let built = registry.build();
    let order: Vec<String> = built.order().iter().map(ToString::to_string).collect();
    insta::assert_snapshot!("derived_handler_order", order.join("\n"));
}

// ---------------------------------------------------------------------------
// Engine registries
// ---------------------------------------------------------------------------

/// Writers registered in the sample engine run GPE before interfaces.
#[test]
fn engine_writer_order_follows_relations() {
    let device = FakeDevice::new();
    let engine = engine(&device);
    let order: Vec<String> = engine
        .writer_order()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(order, vec!["/gpe-feature", "/interfaces/interface"]);
}

/// Structural readers are added for containers without a reader.
#[test]
fn engine_reader_order_includes_structural_ancestors() {
    let device = FakeDevice::new();
    let engine = engine(&device);
    let order: Vec<String> = engine
        .reader_order()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(order, vec!["/gpe-feature", "/interfaces/interface", "/interfaces"]);
}

/// A cycle across writer registrations surfaces as a registration error.
#[test]
fn writer_cycle_is_fatal() {
    let device = FakeDevice::new();
    let call: std::sync::Arc<dyn treeconf::device::DeviceCall> = device;
    let mut builder = treeconf::Engine::builder(&schema(), config());
    builder
        .writers()
        .add_before(
            path("/gpe-feature"),
            Writer::new(GpeFeature {
                device: std::sync::Arc::clone(&call),
            }),
            &path("/interfaces/interface"),
        )
        .unwrap();
    let err = builder
        .writers()
        .add_before(
            path("/interfaces/interface"),
            Writer::new(GpeFeature { device: call }),
            &path("/gpe-feature"),
        )
        .unwrap_err();
    assert!(matches!(err, OrderingConflict::Cycle { .. }));
}

/// A list reader registered for a container fails the engine build.
#[test]
fn reader_kind_must_match_schema() {
    let device = FakeDevice::new();
    let mut builder = treeconf::Engine::builder(&Schema::new(), config());
    builder
        .readers()
        .add(
            path("/gpe-feature"),
            Reader::list(InterfaceReader { device }),
        )
        .unwrap();
    assert!(matches!(
        builder.build(),
        Err(EngineError::Registration(OrderingConflict::SchemaMismatch { .. }))
    ));
}
