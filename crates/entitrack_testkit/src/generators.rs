//! Property-based test generators using proptest.
//!
//! Provides strategies for generating attribute values and listener
//! cascades whose side effects terminate.

use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Strategy for generating attribute names.
pub fn attribute_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-zA-Z0-9]{0,11}").expect("Invalid regex")
}

/// Strategy for generating scalar attribute values.
pub fn attribute_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        prop::string::string_regex("[a-zA-Z0-9 ]{0,16}")
            .expect("Invalid regex")
            .prop_map(Value::from),
    ]
}

/// Strategy for generating attribute maps.
pub fn attribute_map_strategy() -> impl Strategy<Value = BTreeMap<String, Value>> {
    prop::collection::btree_map(attribute_name_strategy(), attribute_value_strategy(), 0..8)
}

/// A chain of listener side effects over `len` managed instances.
///
/// Updating instance `i` makes its before-update listener write `links[i]`
/// into instance `i + 1`. The chain ends at the last instance, so every
/// cascade terminates.
#[derive(Debug, Clone)]
pub struct ListenerChain {
    /// Value written into the next instance of the chain.
    pub links: Vec<i64>,
    /// Instance whose change starts the cascade.
    pub start: usize,
    /// Whether instances are visited before the one dirtying them.
    pub reversed: bool,
}

impl ListenerChain {
    /// Returns the number of instances of the chain.
    pub fn len(&self) -> usize {
        self.links.len() + 1
    }

    /// Returns true if the chain has no links.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Returns the value the listener of instance `i` writes into `i + 1`.
    pub fn link_value(&self, i: usize) -> Option<Value> {
        self.links.get(i).map(|v| json!(v))
    }
}

/// Strategy for generating terminating listener chains.
pub fn listener_chain_strategy() -> impl Strategy<Value = ListenerChain> {
    prop::collection::vec(1i64..1_000_000, 1..8).prop_flat_map(|links| {
        let len = links.len();
        (Just(links), 0..len, any::<bool>()).prop_map(|(links, start, reversed)| ListenerChain {
            links,
            start,
            reversed,
        })
    })
}

/// Strategy for generating how many children each inserted instance spawns.
///
/// Spawned instances spawn nothing themselves.
pub fn spawn_plan_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0usize..4, 1..6)
}
