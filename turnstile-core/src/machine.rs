//! Machine engine.
//!
//! A machine owns a mailbox and a stack of activated states. Each turn
//! drains the mailbox one event at a time: a pending raised event always
//! goes first, ignored events are dropped, events the active state defers
//! (and some state on the stack can handle) stay queued, and everything
//! else is taken in arrival order.
//!
//! Two locks guard a machine. The mailbox lock is held briefly to enqueue
//! and to scan. The core lock is held for a whole turn; a second attempt
//! to start a turn while one is in flight returns [`TurnOutcome::Busy`]
//! without doing anything.

use crate::catalog::{CatalogBuilder, CatalogKind, StateCatalog};
use crate::context::{run_guarded, Effects, MachineContext, Outcome, Pending};
use crate::error::{ActionResult, CoreError};
use crate::event::{Event, EventType};
use crate::host::{Notification, RuntimeHost};
use crate::identity::MachineId;
use crate::state::StateObject;
use crate::table::{Binding, StateDecl};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

/// Hook or action of a machine state.
pub type MachineHandler<D> =
    Arc<dyn for<'a> Fn(&mut MachineContext<'a, D>) -> ActionResult + Send + Sync>;

/// Declaration of one machine state.
pub type MachineStateDecl<D> = StateDecl<MachineHandler<D>>;

/// Catalogue of a machine type.
pub type MachineType<D> = StateCatalog<MachineHandler<D>>;

type MachineState<D> = StateObject<MachineHandler<D>>;

impl<D: 'static> StateCatalog<MachineHandler<D>> {
    /// Starts declaring a machine type.
    pub fn builder(type_name: impl Into<String>) -> CatalogBuilder<MachineHandler<D>> {
        CatalogBuilder::new(CatalogKind::Machine, type_name)
    }
}

impl<D: 'static> StateDecl<MachineHandler<D>> {
    pub fn on_entry<F>(self, hook: F) -> Self
    where
        F: for<'a> Fn(&mut MachineContext<'a, D>) -> ActionResult + Send + Sync + 'static,
    {
        self.with_entry(Arc::new(hook))
    }

    pub fn on_exit<F>(self, hook: F) -> Self
    where
        F: for<'a> Fn(&mut MachineContext<'a, D>) -> ActionResult + Send + Sync + 'static,
    {
        self.with_exit(Arc::new(hook))
    }

    /// Binds a goto whose hook runs after the outgoing state's exit hook.
    pub fn on_event_goto_with<F>(
        self,
        event: impl Into<EventType>,
        target: impl Into<String>,
        hook: F,
    ) -> Self
    where
        F: for<'a> Fn(&mut MachineContext<'a, D>) -> ActionResult + Send + Sync + 'static,
    {
        self.with_goto(event, target, Arc::new(hook))
    }

    pub fn on_event_do<F>(self, event: impl Into<EventType>, action: F) -> Self
    where
        F: for<'a> Fn(&mut MachineContext<'a, D>) -> ActionResult + Send + Sync + 'static,
    {
        self.with_action(event, Arc::new(action))
    }
}

/// Lifecycle of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineStatus {
    Created,
    Running,
    Waiting,
    Halted,
}

/// Result of enqueueing an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Queued; a turn is already pending or in flight.
    Enqueued,
    /// Queued into a waiting machine, which needs a turn.
    NeedsTurn,
    /// The machine has halted; the event was dropped.
    Dropped,
}

/// Result of asking a machine to run a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Another turn was already in flight.
    Busy,
    /// The mailbox holds nothing the machine can take right now.
    Waiting,
    Halted,
}

/// Type-erased view of a machine, as the runtime schedules it.
pub trait Actor: Send + Sync {
    fn id(&self) -> &MachineId;

    fn enqueue(&self, event: Event) -> Result<EnqueueOutcome, CoreError>;

    fn run_turn(&self, host: &dyn RuntimeHost) -> Result<TurnOutcome, CoreError>;

    fn status(&self) -> MachineStatus;

    fn is_halted(&self) -> bool {
        self.status() == MachineStatus::Halted
    }

    /// Returns true if the machine is waiting to receive an event.
    fn is_waiting(&self) -> bool {
        self.status() == MachineStatus::Waiting
    }

    /// Active state names, bottom of the stack first.
    fn state_stack(&self) -> Vec<String>;

    fn active_state(&self) -> Option<String> {
        self.state_stack().pop()
    }

    fn mailbox_len(&self) -> usize;

    fn as_any(&self) -> &dyn Any;
}

struct Mailbox {
    events: VecDeque<Event>,
    status: MachineStatus,
    /// Mirror of the state stack for status queries during a turn.
    stack: Vec<String>,
}

struct MachineCore<D> {
    data: D,
    stack: Vec<MachineState<D>>,
    pending: Option<Pending>,
    current: Option<Event>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Site {
    Entry,
    Exit,
    Action,
    TransitionHook,
}

impl Site {
    fn label(self) -> &'static str {
        match self {
            Site::Entry => "entry hook",
            Site::Exit => "exit hook",
            Site::Action => "action",
            Site::TransitionHook => "transition hook",
        }
    }

    /// Exit and transition hooks run mid-transition and may not request
    /// further control flow.
    fn is_restricted(self) -> bool {
        matches!(self, Site::Exit | Site::TransitionHook)
    }
}

enum Next {
    Event(Event),
    Goto(String),
    Idle,
}

enum Dispatch<D> {
    Goto(String, Option<MachineHandler<D>>),
    Push(String),
    Action(MachineHandler<D>),
    Pop,
}

/// A running instance of a machine type.
pub struct Machine<D> {
    id: MachineId,
    catalog: Arc<MachineType<D>>,
    mailbox: Mutex<Mailbox>,
    core: Mutex<MachineCore<D>>,
}

impl<D: Send + 'static> Machine<D> {
    /// Creates a machine in its initial state. The initial entry hook runs
    /// on the first turn, with `init` as its trigger.
    pub fn new(
        id: MachineId,
        catalog: Arc<MachineType<D>>,
        data: D,
        init: Option<Event>,
    ) -> Result<Self, CoreError> {
        let initial = StateObject::activate(catalog.state(catalog.initial())?, None);
        let stack = vec![initial.name().to_string()];

        Ok(Self {
            id,
            catalog,
            mailbox: Mutex::new(Mailbox {
                events: VecDeque::new(),
                status: MachineStatus::Created,
                stack,
            }),
            core: Mutex::new(MachineCore {
                data,
                stack: vec![initial],
                pending: None,
                current: init,
            }),
        })
    }

    pub fn id(&self) -> &MachineId {
        &self.id
    }

    pub fn catalog(&self) -> &Arc<MachineType<D>> {
        &self.catalog
    }

    /// Appends an event to the mailbox.
    ///
    /// Sending to a halted machine is a silent no-op. Exceeding an event's
    /// declared in-flight bound is fatal.
    pub fn enqueue(&self, event: Event) -> Result<EnqueueOutcome, CoreError> {
        let mut mailbox = self.mailbox.lock();

        if mailbox.status == MachineStatus::Halted {
            tracing::debug!("{} is halted, dropping {}", self.id, event);
            return Ok(EnqueueOutcome::Dropped);
        }

        if let Some(bound) = event.max_in_flight() {
            let queued = mailbox
                .events
                .iter()
                .filter(|e| e.kind() == event.kind())
                .count();
            if queued >= bound {
                return Err(CoreError::MailboxBoundExceeded {
                    machine: self.id.to_string(),
                    event: event.name().to_string(),
                    queued,
                    bound,
                });
            }
        }

        tracing::trace!("{} enqueued {}", self.id, event);
        mailbox.events.push_back(event);

        if mailbox.status == MachineStatus::Waiting {
            Ok(EnqueueOutcome::NeedsTurn)
        } else {
            Ok(EnqueueOutcome::Enqueued)
        }
    }

    /// Runs one turn: starts the machine if needed, then handles events
    /// until none can be taken or the machine halts.
    pub fn run_turn(&self, host: &dyn RuntimeHost) -> Result<TurnOutcome, CoreError> {
        let Some(mut guard) = self.core.try_lock() else {
            return Ok(TurnOutcome::Busy);
        };
        let core = &mut *guard;

        let previous = {
            let mut mailbox = self.mailbox.lock();
            let previous = mailbox.status;
            if previous == MachineStatus::Halted {
                return Ok(TurnOutcome::Halted);
            }
            mailbox.status = MachineStatus::Running;
            previous
        };

        let result = self.drive(core, host, previous);
        if result.is_err() {
            // A failed turn leaves the machine ready for the next one.
            core.pending = None;
            core.current = None;
            let mut mailbox = self.mailbox.lock();
            if mailbox.status != MachineStatus::Halted {
                mailbox.status = MachineStatus::Waiting;
            }
        }
        result
    }

    fn drive(
        &self,
        core: &mut MachineCore<D>,
        host: &dyn RuntimeHost,
        previous: MachineStatus,
    ) -> Result<TurnOutcome, CoreError> {
        if previous == MachineStatus::Created {
            if let Some(state) = core.stack.last() {
                host.notify(Notification::EnteredState {
                    actor: &self.id,
                    state: state.name(),
                });
            }
            let flow = self.enter_top(core, host);
            core.current = None;
            if flow? == Flow::Halted {
                return Ok(TurnOutcome::Halted);
            }
        }

        loop {
            let flow = match self.dequeue(core, host) {
                Next::Idle => return Ok(TurnOutcome::Waiting),
                Next::Goto(target) => self.goto(core, host, &target, None)?,
                Next::Event(event) => {
                    tracing::debug!("{} dequeued {}", self.id, event);
                    host.notify(Notification::Dequeued {
                        actor: &self.id,
                        event: &event,
                    });
                    core.current = Some(event);
                    let flow = self.handle(core, host);
                    core.current = None;
                    flow?
                }
            };
            if flow == Flow::Halted {
                return Ok(TurnOutcome::Halted);
            }
        }
    }

    pub fn status(&self) -> MachineStatus {
        self.mailbox.lock().status
    }

    pub fn is_halted(&self) -> bool {
        self.status() == MachineStatus::Halted
    }

    pub fn is_waiting(&self) -> bool {
        self.status() == MachineStatus::Waiting
    }

    /// Active state names, bottom of the stack first.
    pub fn state_stack(&self) -> Vec<String> {
        self.mailbox.lock().stack.clone()
    }

    pub fn active_state(&self) -> Option<String> {
        self.mailbox.lock().stack.last().cloned()
    }

    pub fn mailbox_len(&self) -> usize {
        self.mailbox.lock().events.len()
    }

    /// Runs `f` against the machine's private data, unless a turn is in
    /// flight.
    pub fn with_data<R>(&self, f: impl FnOnce(&D) -> R) -> Option<R> {
        self.core.try_lock().map(|core| f(&core.data))
    }

    // =========================================================================
    // Dequeue
    // =========================================================================

    fn dequeue(&self, core: &mut MachineCore<D>, host: &dyn RuntimeHost) -> Next {
        if let Some(pending) = core.pending.take() {
            return match pending {
                Pending::Raise(event) => Next::Event(event),
                Pending::Goto(target) => Next::Goto(target),
            };
        }

        let mut dropped = Vec::new();
        let next = {
            let mut mailbox = self.mailbox.lock();
            let top = core.stack.last().map(|s| s.table());
            let mut found = None;
            let mut index = 0;

            while index < mailbox.events.len() {
                let kind = mailbox.events[index].kind().clone();

                if top.is_some_and(|t| t.is_ignored(&kind)) {
                    dropped.extend(mailbox.events.remove(index));
                    continue;
                }

                let deferred = top.is_some_and(|t| t.is_deferred(&kind));
                if !deferred || !stack_can_handle(&core.stack, &kind) {
                    found = mailbox.events.remove(index);
                    break;
                }

                tracing::trace!("{} skipping deferred {}", self.id, kind);
                index += 1;
            }

            if found.is_none() {
                let default = EventType::default_event();
                if top.is_some_and(|t| t.can_handle(&default)) {
                    found = Some(Event::new(default));
                } else {
                    mailbox.status = MachineStatus::Waiting;
                }
            }
            found
        };

        for event in &dropped {
            tracing::trace!("{} ignored {}", self.id, event);
            host.notify(Notification::Ignored {
                actor: &self.id,
                event,
            });
        }

        match next {
            Some(event) => Next::Event(event),
            None => Next::Idle,
        }
    }

    // =========================================================================
    // Handling
    // =========================================================================

    fn handle(&self, core: &mut MachineCore<D>, host: &dyn RuntimeHost) -> Result<Flow, CoreError> {
        let Some(kind) = core.current.as_ref().map(|e| e.kind().clone()) else {
            return Ok(Flow::Continue);
        };
        let mut last_state: Option<String> = None;

        loop {
            let Some(top) = core.stack.last() else {
                if kind.is_halt() {
                    self.halt(core, host);
                    return Ok(Flow::Halted);
                }
                return Err(CoreError::UnhandledEvent {
                    actor: self.id.to_string(),
                    state: last_state,
                    event: kind.to_string(),
                });
            };

            let dispatch = match top.table().lookup(&kind) {
                Some(Binding::Goto(goto)) => Dispatch::Goto(goto.target.clone(), goto.hook.clone()),
                Some(Binding::Push(target)) => Dispatch::Push(target.to_string()),
                Some(Binding::Action(action)) => Dispatch::Action(action.clone()),
                Some(Binding::Ignore) | Some(Binding::Defer) | None => Dispatch::Pop,
            };

            if let Dispatch::Pop = dispatch {
                if let Some(popped) = core.stack.pop() {
                    tracing::debug!(
                        "{} popped {} which cannot handle {}",
                        self.id,
                        popped.name(),
                        kind
                    );
                    last_state = Some(popped.name().to_string());
                }
                self.sync_stack(core);
                continue;
            }

            host.notify(Notification::Handled {
                actor: &self.id,
                state: top.name(),
                event: &kind,
            });

            return match dispatch {
                Dispatch::Goto(target, hook) => self.goto(core, host, &target, hook),
                Dispatch::Push(target) => self.push(core, host, &target),
                Dispatch::Action(action) => self.invoke(core, host, &action, Site::Action),
                Dispatch::Pop => Ok(Flow::Continue),
            };
        }
    }

    /// Replaces the active state with `target` at the same stack slot.
    fn goto(
        &self,
        core: &mut MachineCore<D>,
        host: &dyn RuntimeHost,
        target: &str,
        hook: Option<MachineHandler<D>>,
    ) -> Result<Flow, CoreError> {
        let decl = self.catalog.state(target)?;

        if let Some(exit) = core.stack.last().and_then(|s| s.exit().cloned()) {
            if self.invoke(core, host, &exit, Site::Exit)? == Flow::Halted {
                return Ok(Flow::Halted);
            }
        }
        if let Some(hook) = hook {
            if self.invoke(core, host, &hook, Site::TransitionHook)? == Flow::Halted {
                return Ok(Flow::Halted);
            }
        }

        if let Some(outgoing) = core.stack.pop() {
            host.notify(Notification::ExitedState {
                actor: &self.id,
                state: outgoing.name(),
            });
            tracing::debug!("{} goto {} -> {}", self.id, outgoing.name(), target);
        }

        let incoming = StateObject::activate(decl, core.stack.last().map(|s| s.table()));
        self.enter(core, host, incoming)
    }

    /// Activates `target` above the active state, which stays beneath it.
    fn push(
        &self,
        core: &mut MachineCore<D>,
        host: &dyn RuntimeHost,
        target: &str,
    ) -> Result<Flow, CoreError> {
        let decl = self.catalog.state(target)?;
        // Push-reached states do not inherit the lower state's table.
        let incoming = StateObject::activate(decl, None);
        tracing::debug!("{} push {}", self.id, target);
        self.enter(core, host, incoming)
    }

    fn enter(
        &self,
        core: &mut MachineCore<D>,
        host: &dyn RuntimeHost,
        incoming: MachineState<D>,
    ) -> Result<Flow, CoreError> {
        host.notify(Notification::EnteredState {
            actor: &self.id,
            state: incoming.name(),
        });
        core.stack.push(incoming);
        self.sync_stack(core);
        self.enter_top(core, host)
    }

    fn enter_top(&self, core: &mut MachineCore<D>, host: &dyn RuntimeHost) -> Result<Flow, CoreError> {
        match core.stack.last().and_then(|s| s.entry().cloned()) {
            Some(entry) => self.invoke(core, host, &entry, Site::Entry),
            None => Ok(Flow::Continue),
        }
    }

    /// Exits and pops the active state on request of a handler.
    fn pop_requested(&self, core: &mut MachineCore<D>, host: &dyn RuntimeHost) -> Result<Flow, CoreError> {
        if let Some(exit) = core.stack.last().and_then(|s| s.exit().cloned()) {
            if self.invoke(core, host, &exit, Site::Exit)? == Flow::Halted {
                return Ok(Flow::Halted);
            }
        }
        if let Some(popped) = core.stack.pop() {
            host.notify(Notification::ExitedState {
                actor: &self.id,
                state: popped.name(),
            });
            tracing::debug!("{} pop {}", self.id, popped.name());
        }
        self.sync_stack(core);
        Ok(Flow::Continue)
    }

    fn invoke(
        &self,
        core: &mut MachineCore<D>,
        host: &dyn RuntimeHost,
        handler: &MachineHandler<D>,
        site: Site,
    ) -> Result<Flow, CoreError> {
        let mut effects = Effects::default();
        let outcome = {
            let mut ctx = MachineContext {
                id: &self.id,
                state: core.stack.last().map(|s| s.name()).unwrap_or_default(),
                event: core.current.as_ref(),
                data: &mut core.data,
                effects: &mut effects,
                host,
            };
            run_guarded(|| (**handler)(&mut ctx))
        };

        match outcome {
            Outcome::Completed => {}
            Outcome::Cancelled => {
                tracing::debug!("{} cancelled in {}", self.id, site.label());
                self.halt(core, host);
                return Ok(Flow::Halted);
            }
            Outcome::Assertion(message) => {
                return Err(CoreError::AssertionFailed {
                    origin: self.origin(core, site),
                    message,
                });
            }
            Outcome::Failed(message) => {
                return Err(CoreError::ActionFailed {
                    origin: self.origin(core, site),
                    message,
                    trace: self.trace(core),
                });
            }
            Outcome::Fatal(err) => return Err(err),
        }

        if effects.is_empty() {
            return Ok(Flow::Continue);
        }
        if site.is_restricted() {
            return Err(CoreError::AssertionFailed {
                origin: self.origin(core, site),
                message: "raise, goto and pop are not allowed here".to_string(),
            });
        }

        if let Some(pending) = effects.pending {
            if core.pending.is_some() {
                return Err(CoreError::AssertionFailed {
                    origin: self.origin(core, site),
                    message: "raised an event while another is still pending".to_string(),
                });
            }
            if let Pending::Raise(event) = &pending {
                tracing::debug!("{} raised {}", self.id, event);
                host.notify(Notification::Raised {
                    actor: &self.id,
                    event,
                });
            }
            core.pending = Some(pending);
        }

        if effects.pop {
            return self.pop_requested(core, host);
        }
        Ok(Flow::Continue)
    }

    fn halt(&self, core: &mut MachineCore<D>, host: &dyn RuntimeHost) {
        {
            let mut mailbox = self.mailbox.lock();
            mailbox.status = MachineStatus::Halted;
            mailbox.events = VecDeque::new();
            mailbox.stack = Vec::new();
        }
        core.stack = Vec::new();
        core.pending = None;

        tracing::debug!("{} halted", self.id);
        host.notify(Notification::Halted { actor: &self.id });
    }

    fn sync_stack(&self, core: &MachineCore<D>) {
        let names = core.stack.iter().map(|s| s.name().to_string()).collect();
        self.mailbox.lock().stack = names;
    }

    fn origin(&self, core: &MachineCore<D>, site: Site) -> String {
        let state = core.stack.last().map(|s| s.name()).unwrap_or("<none>");
        match &core.current {
            Some(event) => format!(
                "{} {} of state '{}' on '{}'",
                self.id,
                site.label(),
                state,
                event
            ),
            None => format!("{} {} of state '{}'", self.id, site.label(), state),
        }
    }

    fn trace(&self, core: &MachineCore<D>) -> String {
        let stack: Vec<&str> = core.stack.iter().map(|s| s.name()).collect();
        match &core.current {
            Some(event) => format!("stack: [{}]; trigger: {}", stack.join(", "), event),
            None => format!("stack: [{}]", stack.join(", ")),
        }
    }
}

/// Returns true if any state on the stack binds the event type.
fn stack_can_handle<D>(stack: &[MachineState<D>], kind: &EventType) -> bool {
    stack.iter().any(|s| s.table().can_handle(kind))
}

impl<D: Send + 'static> Actor for Machine<D> {
    fn id(&self) -> &MachineId {
        Machine::id(self)
    }

    fn enqueue(&self, event: Event) -> Result<EnqueueOutcome, CoreError> {
        Machine::enqueue(self, event)
    }

    fn run_turn(&self, host: &dyn RuntimeHost) -> Result<TurnOutcome, CoreError> {
        Machine::run_turn(self, host)
    }

    fn status(&self) -> MachineStatus {
        Machine::status(self)
    }

    fn state_stack(&self) -> Vec<String> {
        Machine::state_stack(self)
    }

    fn mailbox_len(&self) -> usize {
        Machine::mailbox_len(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
