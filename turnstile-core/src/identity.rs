//! Actor identifiers and the registry that issues them.

use crate::error::CoreError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Identifier of a machine or monitor.
///
/// Equality and hashing use the process-unique numeric value only; the
/// remaining fields are diagnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineId {
    value: u64,
    type_seq: u64,
    type_name: Arc<str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    friendly_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
}

impl MachineId {
    /// Process-unique numeric value.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Sequence number among identifiers of the same type.
    pub fn type_seq(&self) -> u64 {
        self.type_seq
    }

    /// Declared type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn friendly_name(&self) -> Option<&str> {
        self.friendly_name.as_deref()
    }

    /// Endpoint of a remote machine. Stored and displayed only.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Returns a copy of this identifier bound to an endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

impl PartialEq for MachineId {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for MachineId {}

impl Hash for MachineId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl PartialOrd for MachineId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MachineId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.friendly_name {
            Some(name) => write!(f, "{}({})", name, self.value)?,
            None => write!(f, "{}({})", self.type_name, self.value)?,
        }
        if let Some(endpoint) = &self.endpoint {
            write!(f, "@{}", endpoint)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Counters {
    next: u64,
    per_type: HashMap<String, u64>,
}

/// Issues identifiers for the lifetime of one runtime.
///
/// The registry belongs to the runtime rather than the process so a test
/// run can start from a known state with [`IdentityRegistry::reset`].
#[derive(Debug)]
pub struct IdentityRegistry {
    counters: Mutex<Counters>,
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityRegistry {
    /// Creates a registry whose first identifier has value 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates a registry whose next identifier has the given value.
    pub fn starting_at(first: u64) -> Self {
        Self {
            counters: Mutex::new(Counters {
                next: first,
                per_type: HashMap::new(),
            }),
        }
    }

    /// Issues a new identifier.
    ///
    /// Fails with [`CoreError::IdentifierOverflow`] once the numeric space
    /// is exhausted; values never wrap.
    pub fn new_identity(
        &self,
        type_name: &str,
        friendly_name: Option<&str>,
    ) -> Result<MachineId, CoreError> {
        let mut counters = self.counters.lock();

        let value = counters.next;
        counters.next = value.checked_add(1).ok_or(CoreError::IdentifierOverflow)?;

        let seq = counters.per_type.entry(type_name.to_string()).or_insert(0);
        let type_seq = *seq;
        *seq = seq.saturating_add(1);

        Ok(MachineId {
            value,
            type_seq,
            type_name: Arc::from(type_name),
            friendly_name: friendly_name.map(str::to_string),
            endpoint: None,
        })
    }

    /// Returns how many identifiers of the given type were issued.
    pub fn issued_for(&self, type_name: &str) -> u64 {
        self.counters
            .lock()
            .per_type
            .get(type_name)
            .copied()
            .unwrap_or(0)
    }

    /// Forgets all issued identifiers. Only valid between test runs.
    pub fn reset(&self) {
        let mut counters = self.counters.lock();
        counters.next = 1;
        counters.per_type.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_identity_fields() {
        let registry = IdentityRegistry::new();
        let a = registry.new_identity("Server", None).unwrap();
        let b = registry.new_identity("Client", Some("alice")).unwrap();
        let c = registry.new_identity("Client", None).unwrap();

        assert_eq!(a.value(), 1);
        assert_eq!(b.value(), 2);
        assert_eq!(c.value(), 3);
        assert_eq!(b.type_seq(), 0);
        assert_eq!(c.type_seq(), 1);
        assert_eq!(a.to_string(), "Server(1)");
        assert_eq!(b.to_string(), "alice(2)");
        assert_eq!(registry.issued_for("Client"), 2);
    }

    #[test]
    fn test_equality_by_value_only() {
        let registry = IdentityRegistry::new();
        let a = registry.new_identity("Server", None).unwrap();
        let remote = a.clone().with_endpoint("10.0.0.1:7000");
        assert_eq!(a, remote);
        assert_eq!(remote.to_string(), "Server(1)@10.0.0.1:7000");
    }

    #[test]
    fn test_overflow_is_an_error() {
        let registry = IdentityRegistry::starting_at(u64::MAX - 1);
        let last = registry.new_identity("M", None).unwrap();
        assert_eq!(last.value(), u64::MAX - 1);

        let result = registry.new_identity("M", None);
        assert!(matches!(result, Err(CoreError::IdentifierOverflow)));
        // Exhaustion is sticky.
        let result = registry.new_identity("M", None);
        assert!(matches!(result, Err(CoreError::IdentifierOverflow)));
    }

    #[test]
    fn test_reset() {
        let registry = IdentityRegistry::new();
        registry.new_identity("M", None).unwrap();
        registry.reset();
        assert_eq!(registry.new_identity("M", None).unwrap().value(), 1);
        assert_eq!(registry.issued_for("M"), 1);
    }

    #[test]
    fn test_concurrent_issue_is_unique() {
        let registry = IdentityRegistry::new();
        let ids: Vec<u64> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        (0..250)
                            .map(|_| registry.new_identity("M", None).unwrap().value())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        let unique: HashSet<u64> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 1000);
        assert_eq!(registry.issued_for("M"), 1000);
    }

    proptest! {
        #[test]
        fn prop_values_strictly_increase(types in proptest::collection::vec("[a-c]", 1..50)) {
            let registry = IdentityRegistry::new();
            let mut last = 0;
            for t in &types {
                let id = registry.new_identity(t, None).unwrap();
                prop_assert!(id.value() > last);
                last = id.value();
            }
        }
    }
}
