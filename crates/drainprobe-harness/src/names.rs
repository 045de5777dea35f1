//! Unique names for apps, services and message tags.
//!
//! Names are `<PREFIX>-<seq>-<KIND>-<suffix>`, e.g.
//! `DRAINPROBE-3-RANDOM-MESSAGE-A-5f1c9e0a2b7d4c86`. The sequence keeps
//! names from one run apart; the random suffix keeps runs apart.

use std::sync::atomic::{AtomicU32, Ordering};

use rand::Rng;

/// Source of unique names, injected so tests can use predictable ones.
pub trait NameSource: Send + Sync {
    fn unique(&self, kind: &str) -> String;
}

/// Production names with a random 64-bit suffix.
#[derive(Debug)]
pub struct RandomNames {
    prefix: String,
    seq: AtomicU32,
}

impl RandomNames {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            seq: AtomicU32::new(0),
        }
    }
}

impl NameSource for RandomNames {
    fn unique(&self, kind: &str) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let suffix: u64 = rand::rng().random();
        format!("{}-{}-{}-{:016x}", self.prefix, seq, kind, suffix)
    }
}

/// Deterministic names: `<kind>-<seq>`.
#[derive(Debug, Default)]
pub struct SequentialNames {
    seq: AtomicU32,
}

impl SequentialNames {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NameSource for SequentialNames {
    fn unique(&self, kind: &str) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{kind}-{seq}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn random_names_carry_prefix_and_kind() {
        let names = RandomNames::new("DRAINPROBE");
        let name = names.unique("SVIN1");
        assert!(name.starts_with("DRAINPROBE-0-SVIN1-"), "{name}");
        assert_eq!(name.rsplit('-').next().map(str::len), Some(16));
    }

    #[test]
    fn random_names_are_unique() {
        let names = RandomNames::new("DRAINPROBE");
        let all: HashSet<_> = (0..1000).map(|_| names.unique("RANDOM-MESSAGE-A")).collect();
        assert_eq!(all.len(), 1000);
    }

    #[test]
    fn sequential_names_are_predictable() {
        let names = SequentialNames::new();
        assert_eq!(names.unique("APP"), "APP-0");
        assert_eq!(names.unique("TAG"), "TAG-1");
    }
}
