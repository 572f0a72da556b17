//! Contexts passed to hooks and actions.
//!
//! A hook sees the ambient trigger event, its actor's private data, and a
//! handful of requests (raise, goto, pop) that the engine carries out after
//! the hook returns. Machine contexts additionally reach the runtime for
//! sends, creations and monitor notifications.

use crate::error::{ActionError, ActionResult, CoreError};
use crate::event::Event;
use crate::host::RuntimeHost;
use crate::identity::MachineId;
use serde_json::Value;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Control-flow request left behind by a hook.
#[derive(Debug, Clone)]
pub(crate) enum Pending {
    Raise(Event),
    Goto(String),
}

#[derive(Debug, Default)]
pub(crate) struct Effects {
    pub(crate) pending: Option<Pending>,
    pub(crate) pop: bool,
}

impl Effects {
    fn request(&mut self, pending: Pending) -> ActionResult {
        self.ensure_none()?;
        self.pending = Some(pending);
        Ok(())
    }

    fn request_pop(&mut self) -> ActionResult {
        self.ensure_none()?;
        self.pop = true;
        Ok(())
    }

    fn ensure_none(&self) -> ActionResult {
        if self.pending.is_some() || self.pop {
            return Err(ActionError::Assertion(
                "a handler may raise, goto or pop at most once".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_none() && !self.pop
    }
}

/// How a hook invocation ended.
pub(crate) enum Outcome {
    Completed,
    Cancelled,
    Assertion(String),
    Failed(String),
    Fatal(CoreError),
}

/// Runs a hook, turning a panic into a wrapped failure.
pub(crate) fn run_guarded(hook: impl FnOnce() -> ActionResult) -> Outcome {
    match panic::catch_unwind(AssertUnwindSafe(hook)) {
        Ok(Ok(())) => Outcome::Completed,
        Ok(Err(ActionError::Cancelled)) => Outcome::Cancelled,
        Ok(Err(ActionError::Assertion(message))) => Outcome::Assertion(message),
        Ok(Err(ActionError::Failed(message))) => Outcome::Failed(message),
        Ok(Err(ActionError::Fatal(err))) => Outcome::Fatal(err),
        Err(payload) => Outcome::Failed(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn check(condition: bool, message: impl FnOnce() -> String) -> ActionResult {
    if condition {
        Ok(())
    } else {
        Err(ActionError::Assertion(message()))
    }
}

/// Context of a machine hook or action.
pub struct MachineContext<'a, D> {
    pub(crate) id: &'a MachineId,
    pub(crate) state: &'a str,
    pub(crate) event: Option<&'a Event>,
    pub(crate) data: &'a mut D,
    pub(crate) effects: &'a mut Effects,
    pub(crate) host: &'a dyn RuntimeHost,
}

impl<'a, D> MachineContext<'a, D> {
    pub fn id(&self) -> &MachineId {
        self.id
    }

    /// Name of the state whose hook or action is running.
    pub fn state(&self) -> &str {
        self.state
    }

    /// The event that triggered this handler, if any.
    pub fn event(&self) -> Option<&Event> {
        self.event
    }

    pub fn payload(&self) -> Option<&Value> {
        self.event.and_then(Event::payload)
    }

    pub fn data(&self) -> &D {
        &*self.data
    }

    pub fn data_mut(&mut self) -> &mut D {
        &mut *self.data
    }

    /// Raises an event that is handled before anything in the mailbox.
    pub fn raise(&mut self, event: Event) -> ActionResult {
        self.effects.request(Pending::Raise(event))
    }

    /// Requests a goto to `state` once this handler returns.
    pub fn goto(&mut self, state: impl Into<String>) -> ActionResult {
        self.effects.request(Pending::Goto(state.into()))
    }

    /// Requests that the active state exit and be popped once this handler
    /// returns.
    pub fn pop(&mut self) -> ActionResult {
        self.effects.request_pop()
    }

    pub fn send(&self, target: &MachineId, event: Event) -> ActionResult {
        self.host.send(self.id, target, event)?;
        Ok(())
    }

    pub fn create_machine(
        &self,
        type_name: &str,
        friendly_name: Option<&str>,
        init: Option<Event>,
    ) -> Result<MachineId, ActionError> {
        Ok(self
            .host
            .create_machine(self.id, type_name, friendly_name, init)?)
    }

    /// Delivers `event` to the monitor of `monitor_type`.
    pub fn monitor(&self, monitor_type: &str, event: Event) -> ActionResult {
        self.host.monitor(self.id, monitor_type, event)?;
        Ok(())
    }

    pub fn assert(&self, condition: bool, message: impl Into<String>) -> ActionResult {
        check(condition, || message.into())
    }
}

/// Context of a monitor hook or action.
pub struct MonitorContext<'a, D> {
    pub(crate) id: &'a MachineId,
    pub(crate) state: &'a str,
    pub(crate) event: Option<&'a Event>,
    pub(crate) data: &'a mut D,
    pub(crate) effects: &'a mut Effects,
}

impl<'a, D> MonitorContext<'a, D> {
    pub fn id(&self) -> &MachineId {
        self.id
    }

    pub fn state(&self) -> &str {
        self.state
    }

    pub fn event(&self) -> Option<&Event> {
        self.event
    }

    pub fn payload(&self) -> Option<&Value> {
        self.event.and_then(Event::payload)
    }

    pub fn data(&self) -> &D {
        &*self.data
    }

    pub fn data_mut(&mut self) -> &mut D {
        &mut *self.data
    }

    /// Raises an event that the monitor handles before returning to the
    /// delivering caller.
    pub fn raise(&mut self, event: Event) -> ActionResult {
        self.effects.request(Pending::Raise(event))
    }

    pub fn goto(&mut self, state: impl Into<String>) -> ActionResult {
        self.effects.request(Pending::Goto(state.into()))
    }

    pub fn assert(&self, condition: bool, message: impl Into<String>) -> ActionResult {
        check(condition, || message.into())
    }
}
