// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier newtypes and id minting.
//!
//! Task, agent, request, and snapshot ids are opaque strings, but each
//! kind gets its own wrapper so a task id can never be passed where an
//! agent id belongs. Ids end up embedded in store keys and pub/sub
//! channel names (`consensus:req:{id}`, `agent:direct:{id}`), so the
//! wrapper keeps the raw string reachable through `as_str` without
//! exposing the field itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Declare a string-backed identifier type.
///
/// The generated wrapper serializes as a bare string, orders and hashes
/// like one (so it can sit in `BTreeSet`s and hash-map keys), converts
/// from `&str`/`String` for builder ergonomics, and compares directly
/// against string literals in tests.
#[macro_export]
macro_rules! id_type {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// The raw id, for key and channel construction.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_owned())
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

/// Mints fresh id strings.
///
/// The fabric needs new ids in three places: correlation ids for
/// request/reply, and request + snapshot ids in the consensus gate.
/// Production uses [`UuidMinter`]; tests swap in [`SequenceMinter`] for
/// predictable ids.
pub trait IdMinter: Clone + Send + Sync {
    fn mint(&self) -> String;
}

/// Random v4 UUIDs.
#[derive(Clone, Copy, Default)]
pub struct UuidMinter;

impl IdMinter for UuidMinter {
    fn mint(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// `{prefix}-1`, `{prefix}-2`, ... shared across clones, for tests.
#[derive(Clone)]
pub struct SequenceMinter {
    prefix: String,
    next: Arc<AtomicU64>,
}

impl SequenceMinter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl IdMinter for SequenceMinter {
    fn mint(&self) -> String {
        format!("{}-{}", self.prefix, self.next.fetch_add(1, Ordering::SeqCst))
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
