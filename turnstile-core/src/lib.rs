//! # turnstile-core
//!
//! Actor and state-machine execution engine for turnstile.
//!
//! This crate provides:
//! - Machine identities and events
//! - Transition tables, state declarations and validated type catalogues
//! - The machine engine (mailbox, state stack, turns)
//! - The monitor engine (synchronous delivery, liveness temperature)
//! - The host interface through which engines reach their runtime

pub mod catalog;
pub mod context;
pub mod error;
pub mod event;
pub mod host;
pub mod identity;
pub mod machine;
pub mod monitor;
pub mod registry;
pub mod state;
pub mod table;

pub use catalog::{CatalogBuilder, CatalogKind, DeclaredCoverage, GroupBuilder, StateCatalog};
pub use context::{MachineContext, MonitorContext};
pub use error::{ActionError, ActionResult, CoreError, FailureKind};
pub use event::{Event, EventType};
pub use host::{DetachedHost, Notification, RuntimeHost};
pub use identity::{IdentityRegistry, MachineId};
pub use machine::{
    Actor, EnqueueOutcome, Machine, MachineHandler, MachineStateDecl, MachineStatus, MachineType,
    TurnOutcome,
};
pub use monitor::{Monitor, MonitorHandler, MonitorStateDecl, MonitorType, Observer};
pub use registry::CatalogRegistry;
pub use state::StateObject;
pub use table::{Binding, GotoBinding, StateDecl, Temperature, TransitionTable};
