// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::collections::BTreeSet;

crate::id_type! {
    /// ID type used only by these tests.
    pub struct ProbeId;
}

#[test]
fn construction_and_display() {
    let id = ProbeId::new("probe-1");
    assert_eq!(id.as_str(), "probe-1");
    assert_eq!(id.to_string(), "probe-1");
    assert_eq!(format!("key:{}", id), "key:probe-1");
}

#[test]
fn converts_from_str_and_string() {
    let from_str: ProbeId = "p".into();
    let from_string: ProbeId = String::from("p").into();
    assert_eq!(from_str, from_string);
}

#[test]
fn compares_against_literals() {
    let id = ProbeId::new("x");
    assert_eq!(id, "x");
    assert_ne!(id, "y");
}

#[test]
fn orders_like_its_string() {
    // BTreeSet membership is how approval tallies deduplicate reviewers
    let mut set = BTreeSet::new();
    set.insert(ProbeId::new("b"));
    set.insert(ProbeId::new("a"));
    set.insert(ProbeId::new("a"));

    let ordered: Vec<&str> = set.iter().map(|id| id.as_str()).collect();
    assert_eq!(ordered, vec!["a", "b"]);
}

#[test]
fn serializes_as_bare_string() {
    let id = ProbeId::new("p-9");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"p-9\"");
    let parsed: ProbeId = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, id);
}

#[test]
fn uuid_minter_is_unique() {
    let minter = UuidMinter;
    assert_ne!(minter.mint(), minter.mint());
}

#[test]
fn sequence_minter_counts_across_clones() {
    let minter = SequenceMinter::new("t");
    assert_eq!(minter.mint(), "t-1");
    assert_eq!(minter.mint(), "t-2");

    let cloned = minter.clone();
    assert_eq!(cloned.mint(), "t-3");
    assert_eq!(minter.mint(), "t-4");
}
