//! Transition tables and the per-state declarations they are built from.
//!
//! A declaration is what the front-end hands over for one state: entry and
//! exit hooks, goto/push/action bindings, and the ignored and deferred
//! sets. The table is generic over the handler type so machines and
//! monitors share it while keeping their own context types.

use crate::event::EventType;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Liveness classification of a monitor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Temperature {
    /// Neither hot nor cold.
    #[default]
    Neutral,
    /// Accrues liveness temperature while active.
    Hot,
    /// Resets liveness temperature when entered.
    Cold,
}

/// Target of a goto binding, with an optional hook that runs after the
/// outgoing state's exit hook.
#[derive(Clone)]
pub struct GotoBinding<H> {
    pub target: String,
    pub hook: Option<H>,
}

/// Classification of one event type within a table.
pub enum Binding<'a, H> {
    Goto(&'a GotoBinding<H>),
    Push(&'a str),
    Action(&'a H),
    Ignore,
    Defer,
}

/// Per-state mapping from event type to what the state does with it.
///
/// The five classifications are mutually exclusive per event type.
#[derive(Clone)]
pub struct TransitionTable<H> {
    gotos: HashMap<EventType, GotoBinding<H>>,
    pushes: HashMap<EventType, String>,
    actions: HashMap<EventType, H>,
    ignored: HashSet<EventType>,
    deferred: HashSet<EventType>,
}

impl<H> Default for TransitionTable<H> {
    fn default() -> Self {
        Self {
            gotos: HashMap::new(),
            pushes: HashMap::new(),
            actions: HashMap::new(),
            ignored: HashSet::new(),
            deferred: HashSet::new(),
        }
    }
}

impl<H: Clone> TransitionTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how this table classifies the event type, if at all.
    pub fn lookup(&self, event: &EventType) -> Option<Binding<'_, H>> {
        if let Some(goto) = self.gotos.get(event) {
            Some(Binding::Goto(goto))
        } else if let Some(target) = self.pushes.get(event) {
            Some(Binding::Push(target))
        } else if let Some(action) = self.actions.get(event) {
            Some(Binding::Action(action))
        } else if self.ignored.contains(event) {
            Some(Binding::Ignore)
        } else if self.deferred.contains(event) {
            Some(Binding::Defer)
        } else {
            None
        }
    }

    /// Returns true if the event type falls into any classification.
    pub fn declares(&self, event: &EventType) -> bool {
        self.lookup(event).is_some()
    }

    /// Returns true if the event type has a goto, push or action binding.
    pub fn can_handle(&self, event: &EventType) -> bool {
        self.gotos.contains_key(event)
            || self.pushes.contains_key(event)
            || self.actions.contains_key(event)
    }

    pub fn is_ignored(&self, event: &EventType) -> bool {
        self.ignored.contains(event)
    }

    pub fn is_deferred(&self, event: &EventType) -> bool {
        self.deferred.contains(event)
    }

    pub fn ignored(&self) -> &HashSet<EventType> {
        &self.ignored
    }

    pub fn deferred(&self) -> &HashSet<EventType> {
        &self.deferred
    }

    /// Event types with a goto, push or action binding.
    pub fn handled_events(&self) -> impl Iterator<Item = &EventType> {
        self.gotos
            .keys()
            .chain(self.pushes.keys())
            .chain(self.actions.keys())
    }

    /// Copies the lower table's deferred, ignored and action entries for
    /// every event type this table does not classify itself.
    pub fn inherit_from(&mut self, lower: &TransitionTable<H>) {
        for event in &lower.deferred {
            if !self.declares(event) {
                self.deferred.insert(event.clone());
            }
        }
        for event in &lower.ignored {
            if !self.declares(event) {
                self.ignored.insert(event.clone());
            }
        }
        for (event, action) in &lower.actions {
            if !self.declares(event) {
                self.actions.insert(event.clone(), action.clone());
            }
        }
    }

    fn insert_goto(&mut self, event: EventType, binding: GotoBinding<H>) -> Result<(), EventType> {
        self.ensure_free(&event)?;
        self.gotos.insert(event, binding);
        Ok(())
    }

    fn insert_push(&mut self, event: EventType, target: String) -> Result<(), EventType> {
        self.ensure_free(&event)?;
        self.pushes.insert(event, target);
        Ok(())
    }

    fn insert_action(&mut self, event: EventType, action: H) -> Result<(), EventType> {
        self.ensure_free(&event)?;
        self.actions.insert(event, action);
        Ok(())
    }

    fn insert_ignored(&mut self, event: EventType) -> Result<(), EventType> {
        self.ensure_free(&event)?;
        self.ignored.insert(event);
        Ok(())
    }

    fn insert_deferred(&mut self, event: EventType) -> Result<(), EventType> {
        self.ensure_free(&event)?;
        self.deferred.insert(event);
        Ok(())
    }

    fn ensure_free(&self, event: &EventType) -> Result<(), EventType> {
        if self.declares(event) {
            Err(event.clone())
        } else {
            Ok(())
        }
    }

    pub(crate) fn goto_targets(&self) -> impl Iterator<Item = &str> {
        self.gotos.values().map(|g| g.target.as_str())
    }

    pub(crate) fn push_targets(&self) -> impl Iterator<Item = &str> {
        self.pushes.values().map(String::as_str)
    }

    pub(crate) fn has_pushes(&self) -> bool {
        !self.pushes.is_empty()
    }
}

impl<H> fmt::Debug for TransitionTable<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionTable")
            .field("gotos", &self.gotos.keys().collect::<Vec<_>>())
            .field("pushes", &self.pushes)
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("ignored", &self.ignored)
            .field("deferred", &self.deferred)
            .finish()
    }
}

/// Declaration bundle for one state.
///
/// Built with chained calls; conflicting classifications are collected and
/// reported when the owning catalogue is built.
pub struct StateDecl<H> {
    name: String,
    entry: Option<H>,
    exit: Option<H>,
    table: TransitionTable<H>,
    temperature: Temperature,
    start: bool,
    conflicts: Vec<String>,
}

impl<H: Clone> StateDecl<H> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: None,
            exit: None,
            table: TransitionTable::new(),
            temperature: Temperature::Neutral,
            start: false,
            conflicts: Vec::new(),
        }
    }

    /// Marks this state as the initial state of its type.
    pub fn start(mut self) -> Self {
        self.start = true;
        self
    }

    pub fn hot(mut self) -> Self {
        self.set_temperature(Temperature::Hot);
        self
    }

    pub fn cold(mut self) -> Self {
        self.set_temperature(Temperature::Cold);
        self
    }

    /// Binds a goto transition on `event` to `target`.
    pub fn on_event_goto(mut self, event: impl Into<EventType>, target: impl Into<String>) -> Self {
        let binding = GotoBinding {
            target: target.into(),
            hook: None,
        };
        let result = self.table.insert_goto(event.into(), binding);
        self.record(result);
        self
    }

    /// Binds a push transition on `event` to `target`.
    pub fn on_event_push(mut self, event: impl Into<EventType>, target: impl Into<String>) -> Self {
        let result = self.table.insert_push(event.into(), target.into());
        self.record(result);
        self
    }

    /// Drops these event types from the mailbox while this state is active.
    pub fn ignore<I, E>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<EventType>,
    {
        for event in events {
            let result = self.table.insert_ignored(event.into());
            self.record(result);
        }
        self
    }

    /// Leaves these event types queued while this state is active.
    pub fn defer<I, E>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<EventType>,
    {
        for event in events {
            let result = self.table.insert_deferred(event.into());
            self.record(result);
        }
        self
    }

    pub fn with_entry(mut self, hook: H) -> Self {
        self.entry = Some(hook);
        self
    }

    pub fn with_exit(mut self, hook: H) -> Self {
        self.exit = Some(hook);
        self
    }

    pub fn with_goto(mut self, event: impl Into<EventType>, target: impl Into<String>, hook: H) -> Self {
        let binding = GotoBinding {
            target: target.into(),
            hook: Some(hook),
        };
        let result = self.table.insert_goto(event.into(), binding);
        self.record(result);
        self
    }

    pub fn with_action(mut self, event: impl Into<EventType>, action: H) -> Self {
        let result = self.table.insert_action(event.into(), action);
        self.record(result);
        self
    }

    pub(crate) fn conflicts(&self) -> &[String] {
        &self.conflicts
    }

    pub(crate) fn qualify(mut self, group: &str) -> Self {
        self.name = format!("{}.{}", group, self.name);
        self
    }

    fn set_temperature(&mut self, temperature: Temperature) {
        if self.temperature != Temperature::Neutral && self.temperature != temperature {
            self.conflicts
                .push(format!("state '{}' is declared both hot and cold", self.name));
        }
        self.temperature = temperature;
    }

    fn record(&mut self, result: Result<(), EventType>) {
        if let Err(event) = result {
            self.conflicts.push(format!(
                "state '{}' classifies event '{}' more than once",
                self.name, event
            ));
        }
    }
}

impl<H> StateDecl<H> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> Option<&H> {
        self.entry.as_ref()
    }

    pub fn exit(&self) -> Option<&H> {
        self.exit.as_ref()
    }

    pub fn table(&self) -> &TransitionTable<H> {
        &self.table
    }

    pub fn temperature(&self) -> Temperature {
        self.temperature
    }

    pub fn is_start(&self) -> bool {
        self.start
    }
}

impl<H> fmt::Debug for StateDecl<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateDecl")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("temperature", &self.temperature)
            .field("start", &self.start)
            .finish()
    }
}
