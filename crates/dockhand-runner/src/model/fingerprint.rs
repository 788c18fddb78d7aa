// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deterministic configuration fingerprints.
//!
//! A fingerprint is the first eight bytes of a SHA-256 digest over a
//! canonical, length-prefixed encoding of named fields. Set-valued fields
//! are fed in sorted order and enums by name, so the result depends only on
//! the configuration's meaning and is stable across processes and releases.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Fingerprint of a configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(i64);

impl Fingerprint {
    /// Wrap a stored fingerprint.
    pub const fn from_i64(value: i64) -> Self {
        Self(value)
    }

    /// Integer form, as persisted.
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Combined fingerprint of a task configuration and an optional VM configuration.
    pub fn combine(task: Fingerprint, vm: Option<Fingerprint>) -> Fingerprint {
        Fingerprinter::new("runner")
            .number("task", Some(task.0))
            .number("vm", vm.map(|fp| fp.0))
            .finish()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Values with a deterministic fingerprint.
pub trait Fingerprinted {
    /// Compute the fingerprint.
    fn fingerprint(&self) -> Fingerprint;
}

/// Builder feeding named fields into the digest.
pub struct Fingerprinter {
    hasher: Sha256,
}

impl Fingerprinter {
    /// Start a fingerprint for a value of the given kind.
    pub fn new(kind: &str) -> Self {
        let mut fingerprinter = Self {
            hasher: Sha256::new(),
        };
        fingerprinter.write(kind.as_bytes());
        fingerprinter
    }

    fn write(&mut self, bytes: &[u8]) {
        self.hasher.update((bytes.len() as u64).to_be_bytes());
        self.hasher.update(bytes);
    }

    fn field(&mut self, name: &str, marker: u8) {
        self.write(name.as_bytes());
        self.hasher.update([marker]);
    }

    /// Feed a text field.
    pub fn text(self, name: &str, value: &str) -> Self {
        self.optional_text(name, Some(value))
    }

    /// Feed an optional text field. `None` and `Some("")` differ.
    pub fn optional_text(mut self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => {
                self.field(name, b's');
                self.write(value.as_bytes());
            }
            None => self.field(name, b'-'),
        }
        self
    }

    /// Feed an optional integer field.
    pub fn number(mut self, name: &str, value: Option<i64>) -> Self {
        match value {
            Some(value) => {
                self.field(name, b'n');
                self.hasher.update(value.to_be_bytes());
            }
            None => self.field(name, b'-'),
        }
        self
    }

    /// Feed a set; element order does not matter.
    pub fn set(mut self, name: &str, values: &BTreeSet<String>) -> Self {
        self.field(name, b'S');
        self.hasher.update((values.len() as u64).to_be_bytes());
        for value in values {
            self.write(value.as_bytes());
        }
        self
    }

    /// Feed a list; element order matters.
    pub fn list(mut self, name: &str, values: &[String]) -> Self {
        self.field(name, b'L');
        self.hasher.update((values.len() as u64).to_be_bytes());
        for value in values {
            self.write(value.as_bytes());
        }
        self
    }

    /// Feed a nested fingerprint.
    pub fn nested(self, name: &str, value: Fingerprint) -> Self {
        self.number(name, Some(value.0))
    }

    /// Finish the digest.
    pub fn finish(self) -> Fingerprint {
        let digest = self.hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        Fingerprint(i64::from_be_bytes(head))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_set_order_does_not_matter() {
        let a = Fingerprinter::new("t").set("subnets", &set(&["b", "a"])).finish();
        let b = Fingerprinter::new("t").set("subnets", &set(&["a", "b"])).finish();
        assert_eq!(a, b);
    }

    #[test]
    fn test_list_order_matters() {
        let a = Fingerprinter::new("t")
            .list("commands", &["a".into(), "b".into()])
            .finish();
        let b = Fingerprinter::new("t")
            .list("commands", &["b".into(), "a".into()])
            .finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_none_differs_from_empty() {
        let none = Fingerprinter::new("t").optional_text("role", None).finish();
        let empty = Fingerprinter::new("t").optional_text("role", Some("")).finish();
        assert_ne!(none, empty);
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let a = Fingerprinter::new("t").text("a", "bc").text("d", "").finish();
        let b = Fingerprinter::new("t").text("a", "b").text("d", "c").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_combine_depends_on_vm() {
        let task = Fingerprint::from_i64(42);
        assert_eq!(
            Fingerprint::combine(task, None),
            Fingerprint::combine(task, None)
        );
        assert_ne!(
            Fingerprint::combine(task, None),
            Fingerprint::combine(task, Some(Fingerprint::from_i64(7)))
        );
    }
}
