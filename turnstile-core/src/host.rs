//! Interface between the engines and the runtime that drives them.

use crate::error::CoreError;
use crate::event::{Event, EventType};
use crate::identity::MachineId;

/// Something the engines tell the runtime about as it happens.
#[derive(Debug, Clone, Copy)]
pub enum Notification<'a> {
    EnteredState {
        actor: &'a MachineId,
        state: &'a str,
    },
    ExitedState {
        actor: &'a MachineId,
        state: &'a str,
    },
    Dequeued {
        actor: &'a MachineId,
        event: &'a Event,
    },
    Raised {
        actor: &'a MachineId,
        event: &'a Event,
    },
    /// An ignored event was dropped from the mailbox.
    Ignored {
        actor: &'a MachineId,
        event: &'a Event,
    },
    /// `state` handled `event` through a goto, push or action binding.
    Handled {
        actor: &'a MachineId,
        state: &'a str,
        event: &'a EventType,
    },
    Halted {
        actor: &'a MachineId,
    },
}

/// Services the runtime provides to running hooks and actions.
pub trait RuntimeHost: Send + Sync {
    /// Enqueues `event` into the mailbox of `target`.
    fn send(&self, sender: &MachineId, target: &MachineId, event: Event) -> Result<(), CoreError>;

    /// Creates a machine of a registered type.
    fn create_machine(
        &self,
        creator: &MachineId,
        type_name: &str,
        friendly_name: Option<&str>,
        init: Option<Event>,
    ) -> Result<MachineId, CoreError>;

    /// Delivers `event` synchronously to the monitor of `monitor_type`.
    fn monitor(&self, sender: &MachineId, monitor_type: &str, event: Event)
        -> Result<(), CoreError>;

    fn notify(&self, _notification: Notification<'_>) {}
}

/// Host for engines running outside any runtime: sends, creations and
/// monitor deliveries fail, notifications are dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedHost;

impl RuntimeHost for DetachedHost {
    fn send(&self, _sender: &MachineId, target: &MachineId, _event: Event) -> Result<(), CoreError> {
        Err(CoreError::MachineNotFound {
            id: target.value(),
        })
    }

    fn create_machine(
        &self,
        _creator: &MachineId,
        type_name: &str,
        _friendly_name: Option<&str>,
        _init: Option<Event>,
    ) -> Result<MachineId, CoreError> {
        Err(CoreError::UnknownMachineType {
            type_name: type_name.to_string(),
        })
    }

    fn monitor(
        &self,
        _sender: &MachineId,
        monitor_type: &str,
        _event: Event,
    ) -> Result<(), CoreError> {
        Err(CoreError::UnknownMonitorType {
            type_name: monitor_type.to_string(),
        })
    }
}
