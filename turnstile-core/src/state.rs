//! Activated states.

use crate::table::{StateDecl, Temperature, TransitionTable};
use std::fmt;
use std::sync::Arc;

/// One activated state: its declaration plus the table in force while it
/// is active.
///
/// Machine states are activated afresh on every push or goto, merging in
/// the table beneath them when reached by goto. Monitor states are
/// activated once per type and shared.
pub struct StateObject<H> {
    decl: Arc<StateDecl<H>>,
    table: TransitionTable<H>,
}

impl<H: Clone> StateObject<H> {
    /// Activates a declaration, optionally inheriting from the table of the
    /// state beneath it.
    pub fn activate(decl: &Arc<StateDecl<H>>, inherited: Option<&TransitionTable<H>>) -> Self {
        let mut table = decl.table().clone();
        if let Some(lower) = inherited {
            table.inherit_from(lower);
        }
        Self {
            decl: Arc::clone(decl),
            table,
        }
    }

    pub fn name(&self) -> &str {
        self.decl.name()
    }

    pub fn table(&self) -> &TransitionTable<H> {
        &self.table
    }

    pub fn entry(&self) -> Option<&H> {
        self.decl.entry()
    }

    pub fn exit(&self) -> Option<&H> {
        self.decl.exit()
    }

    pub fn temperature(&self) -> Temperature {
        self.decl.temperature()
    }

    pub fn is_hot(&self) -> bool {
        self.temperature() == Temperature::Hot
    }

    pub fn is_cold(&self) -> bool {
        self.temperature() == Temperature::Cold
    }
}

impl<H> fmt::Debug for StateObject<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateObject")
            .field("name", &self.decl.name())
            .field("table", &self.table)
            .finish()
    }
}
