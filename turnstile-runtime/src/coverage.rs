//! Coverage of declared states and handled events.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use turnstile_core::{DeclaredCoverage, Notification};

/// Declared and visited states and (state, event) pairs of one type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCoverage {
    pub declared_states: BTreeSet<String>,
    pub visited_states: BTreeSet<String>,
    pub declared_transitions: BTreeSet<(String, String)>,
    pub visited_transitions: BTreeSet<(String, String)>,
}

impl TypeCoverage {
    /// Fraction of declared states entered at least once.
    pub fn state_ratio(&self) -> f64 {
        ratio(
            self.declared_states
                .iter()
                .filter(|s| self.visited_states.contains(*s))
                .count(),
            self.declared_states.len(),
        )
    }

    /// Fraction of declared (state, event) pairs handled at least once.
    pub fn transition_ratio(&self) -> f64 {
        ratio(
            self.declared_transitions
                .iter()
                .filter(|t| self.visited_transitions.contains(*t))
                .count(),
            self.declared_transitions.len(),
        )
    }

    pub fn unvisited_states(&self) -> impl Iterator<Item = &str> {
        self.declared_states
            .difference(&self.visited_states)
            .map(String::as_str)
    }
}

fn ratio(hit: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        hit as f64 / total as f64
    }
}

/// Coverage of every registered type, keyed by type name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub types: BTreeMap<String, TypeCoverage>,
}

impl CoverageReport {
    pub fn get(&self, type_name: &str) -> Option<&TypeCoverage> {
        self.types.get(type_name)
    }
}

/// Collects coverage from engine notifications.
#[derive(Debug, Default)]
pub struct CoverageTracker {
    types: DashMap<String, TypeCoverage>,
}

impl CoverageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the declared surface of a newly registered type.
    pub fn declare(&self, declared: DeclaredCoverage) {
        let mut entry = self.types.entry(declared.type_name).or_default();
        entry.declared_states = declared.states;
        entry.declared_transitions = declared.transitions;
    }

    pub fn record(&self, notification: &Notification<'_>) {
        match *notification {
            Notification::EnteredState { actor, state } => {
                self.types
                    .entry(actor.type_name().to_string())
                    .or_default()
                    .visited_states
                    .insert(state.to_string());
            }
            Notification::Handled {
                actor,
                state,
                event,
            } => {
                self.types
                    .entry(actor.type_name().to_string())
                    .or_default()
                    .visited_transitions
                    .insert((state.to_string(), event.to_string()));
            }
            _ => {}
        }
    }

    pub fn report(&self) -> CoverageReport {
        CoverageReport {
            types: self
                .types
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }

    pub fn clear(&self) {
        self.types.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_core::{EventType, IdentityRegistry};

    fn declared() -> DeclaredCoverage {
        DeclaredCoverage {
            type_name: "Door".to_string(),
            states: ["Open", "Closed"].iter().map(|s| s.to_string()).collect(),
            transitions: [("Open", "Close"), ("Closed", "Open")]
                .iter()
                .map(|(s, e)| (s.to_string(), e.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_merges_declared_and_visited() {
        let tracker = CoverageTracker::new();
        tracker.declare(declared());

        let door = IdentityRegistry::new().new_identity("Door", None).unwrap();
        let close = EventType::new("Close");
        tracker.record(&Notification::EnteredState {
            actor: &door,
            state: "Open",
        });
        tracker.record(&Notification::Handled {
            actor: &door,
            state: "Open",
            event: &close,
        });

        let report = tracker.report();
        let door = report.get("Door").unwrap();
        assert_eq!(door.state_ratio(), 0.5);
        assert_eq!(door.transition_ratio(), 0.5);
        assert_eq!(door.unvisited_states().collect::<Vec<_>>(), vec!["Closed"]);
    }

    #[test]
    fn test_empty_type_is_fully_covered() {
        assert_eq!(TypeCoverage::default().state_ratio(), 1.0);
    }
}
