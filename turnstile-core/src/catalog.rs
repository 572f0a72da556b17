//! Per-type state catalogues.
//!
//! The front-end registers every state of a machine or monitor type once,
//! through [`CatalogBuilder`]:
//!
//! ```ignore
//! let server = MachineType::<ServerData>::builder("Server")
//!     .state("Init", |s| s.start().on_event_goto("Ready", "Serving"))
//!     .group("Serving", |g| {
//!         g.state("Idle", |s| s.on_event_push("Ping", "Serving.Busy"))
//!          .state("Busy", |s| s.defer(["Ping"]))
//!     })
//!     .build()?;
//! ```
//!
//! The result is a plain catalogue the engines index by state name.

use crate::error::CoreError;
use crate::event::EventType;
use crate::state::StateObject;
use crate::table::{StateDecl, Temperature};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Whether a catalogue describes a machine or a monitor type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    Machine,
    Monitor,
}

/// Declared states and (state, handled event) pairs of one type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredCoverage {
    pub type_name: String,
    pub states: BTreeSet<String>,
    pub transitions: BTreeSet<(String, String)>,
}

/// Validated, indexed set of state declarations for one type.
pub struct StateCatalog<H> {
    kind: CatalogKind,
    type_name: String,
    states: HashMap<String, Arc<StateDecl<H>>>,
    order: Vec<String>,
    initial: String,
    shared: HashMap<String, Arc<StateObject<H>>>,
}

impl<H: Clone> StateCatalog<H> {
    pub fn kind(&self) -> CatalogKind {
        self.kind
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn initial(&self) -> &str {
        &self.initial
    }

    /// Looks up a state declaration by qualified name.
    pub fn state(&self, name: &str) -> Result<&Arc<StateDecl<H>>, CoreError> {
        self.states.get(name).ok_or_else(|| CoreError::UnknownState {
            type_name: self.type_name.clone(),
            state: name.to_string(),
        })
    }

    /// Returns the activated state shared by every monitor of this type.
    pub fn shared_state(&self, name: &str) -> Result<&Arc<StateObject<H>>, CoreError> {
        self.shared.get(name).ok_or_else(|| CoreError::UnknownState {
            type_name: self.type_name.clone(),
            state: name.to_string(),
        })
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    /// State names in registration order.
    pub fn state_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns the declared coverage surface of this type.
    pub fn coverage(&self) -> DeclaredCoverage {
        let mut coverage = DeclaredCoverage {
            type_name: self.type_name.clone(),
            ..Default::default()
        };
        for decl in self.states.values() {
            coverage.states.insert(decl.name().to_string());
            for event in decl.table().handled_events() {
                coverage
                    .transitions
                    .insert((decl.name().to_string(), event.to_string()));
            }
        }
        coverage
    }
}

impl<H> fmt::Debug for StateCatalog<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCatalog")
            .field("kind", &self.kind)
            .field("type_name", &self.type_name)
            .field("states", &self.order)
            .field("initial", &self.initial)
            .finish()
    }
}

/// Collects state declarations for one type.
pub struct CatalogBuilder<H> {
    kind: CatalogKind,
    type_name: String,
    states: Vec<StateDecl<H>>,
    initial: Option<String>,
}

impl<H: Clone> CatalogBuilder<H> {
    pub fn new(kind: CatalogKind, type_name: impl Into<String>) -> Self {
        Self {
            kind,
            type_name: type_name.into(),
            states: Vec::new(),
            initial: None,
        }
    }

    /// Declares a state, configured by the closure.
    pub fn state(
        mut self,
        name: impl Into<String>,
        configure: impl FnOnce(StateDecl<H>) -> StateDecl<H>,
    ) -> Self {
        self.states.push(configure(StateDecl::new(name)));
        self
    }

    /// Registers a declaration built elsewhere.
    pub fn register_state(mut self, decl: StateDecl<H>) -> Self {
        self.states.push(decl);
        self
    }

    /// Declares states nested in a named group. Their qualified names are
    /// `group.name`.
    pub fn group(
        mut self,
        name: &str,
        configure: impl FnOnce(GroupBuilder<H>) -> GroupBuilder<H>,
    ) -> Self {
        let group = configure(GroupBuilder {
            prefix: name.to_string(),
            states: Vec::new(),
        });
        self.states.extend(group.states);
        self
    }

    /// Names the initial state.
    pub fn register_initial(mut self, state: impl Into<String>) -> Self {
        self.initial = Some(state.into());
        self
    }

    /// Validates the declarations and indexes them.
    pub fn build(self) -> Result<StateCatalog<H>, CoreError> {
        let type_name = self.type_name;
        let invalid = |reason: String| CoreError::InvalidDeclaration {
            type_name: type_name.clone(),
            reason,
        };

        let mut states = HashMap::new();
        let mut order = Vec::new();
        let mut initials: HashSet<String> = HashSet::new();

        for decl in self.states {
            if let Some(conflict) = decl.conflicts().first() {
                return Err(invalid(conflict.clone()));
            }
            if decl.is_start() {
                initials.insert(decl.name().to_string());
            }
            let name = decl.name().to_string();
            if states.contains_key(&name) {
                return Err(invalid(format!("state '{}' declared more than once", name)));
            }
            order.push(name.clone());
            states.insert(name, Arc::new(decl));
        }

        if let Some(initial) = self.initial {
            if !states.contains_key(&initial) {
                return Err(invalid(format!("initial state '{}' is not declared", initial)));
            }
            initials.insert(initial);
        }

        let initial = match initials.len() {
            0 => return Err(invalid("no initial state".to_string())),
            1 => initials.into_iter().next().unwrap_or_default(),
            _ => {
                let mut names: Vec<_> = initials.into_iter().collect();
                names.sort();
                return Err(invalid(format!(
                    "more than one initial state: {}",
                    names.join(", ")
                )));
            }
        };

        let halt = EventType::halt();
        for decl in states.values() {
            let table = decl.table();
            for target in table.goto_targets().chain(table.push_targets()) {
                if !states.contains_key(target) {
                    return Err(invalid(format!(
                        "state '{}' targets undeclared state '{}'",
                        decl.name(),
                        target
                    )));
                }
            }
            if table.is_deferred(&halt) || table.is_ignored(&halt) {
                return Err(invalid(format!(
                    "state '{}' may not defer or ignore '{}'",
                    decl.name(),
                    halt
                )));
            }
            match self.kind {
                CatalogKind::Monitor if table.has_pushes() => {
                    return Err(invalid(format!(
                        "monitor state '{}' declares a push transition",
                        decl.name()
                    )));
                }
                CatalogKind::Machine if decl.temperature() != Temperature::Neutral => {
                    return Err(invalid(format!(
                        "machine state '{}' is declared hot or cold",
                        decl.name()
                    )));
                }
                _ => {}
            }
        }

        let shared = match self.kind {
            CatalogKind::Monitor => states
                .iter()
                .map(|(name, decl)| (name.clone(), Arc::new(StateObject::activate(decl, None))))
                .collect(),
            CatalogKind::Machine => HashMap::new(),
        };

        Ok(StateCatalog {
            kind: self.kind,
            type_name,
            states,
            order,
            initial,
            shared,
        })
    }
}

/// Collects the states of one named group.
pub struct GroupBuilder<H> {
    prefix: String,
    states: Vec<StateDecl<H>>,
}

impl<H: Clone> GroupBuilder<H> {
    pub fn state(
        mut self,
        name: impl Into<String>,
        configure: impl FnOnce(StateDecl<H>) -> StateDecl<H>,
    ) -> Self {
        let decl = configure(StateDecl::new(name)).qualify(&self.prefix);
        self.states.push(decl);
        self
    }

    /// Declares a nested group.
    pub fn group(
        mut self,
        name: &str,
        configure: impl FnOnce(GroupBuilder<H>) -> GroupBuilder<H>,
    ) -> Self {
        let nested = configure(GroupBuilder {
            prefix: format!("{}.{}", self.prefix, name),
            states: Vec::new(),
        });
        self.states.extend(nested.states);
        self
    }
}
