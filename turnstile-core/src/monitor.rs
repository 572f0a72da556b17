//! Monitor engine.
//!
//! Monitors have no mailbox and no stack. One state is active at a time,
//! and events are handled to completion on the delivering call. Hot and
//! cold states drive a liveness temperature that the scheduler advances
//! once per step.

use crate::catalog::{CatalogBuilder, CatalogKind, StateCatalog};
use crate::context::{run_guarded, Effects, MonitorContext, Outcome, Pending};
use crate::error::{ActionResult, CoreError};
use crate::event::{Event, EventType};
use crate::host::{Notification, RuntimeHost};
use crate::identity::MachineId;
use crate::state::StateObject;
use crate::table::{Binding, StateDecl};
use std::any::Any;
use std::sync::Arc;

/// Hook or action of a monitor state.
pub type MonitorHandler<D> =
    Arc<dyn for<'a> Fn(&mut MonitorContext<'a, D>) -> ActionResult + Send + Sync>;

pub type MonitorStateDecl<D> = StateDecl<MonitorHandler<D>>;

/// Catalogue of a monitor type.
pub type MonitorType<D> = StateCatalog<MonitorHandler<D>>;

type MonitorState<D> = StateObject<MonitorHandler<D>>;

impl<D: 'static> StateCatalog<MonitorHandler<D>> {
    /// Starts declaring a monitor type.
    pub fn builder(type_name: impl Into<String>) -> CatalogBuilder<MonitorHandler<D>> {
        CatalogBuilder::new(CatalogKind::Monitor, type_name)
    }
}

impl<D: 'static> StateDecl<MonitorHandler<D>> {
    pub fn on_entry<F>(self, hook: F) -> Self
    where
        F: for<'a> Fn(&mut MonitorContext<'a, D>) -> ActionResult + Send + Sync + 'static,
    {
        self.with_entry(Arc::new(hook))
    }

    pub fn on_exit<F>(self, hook: F) -> Self
    where
        F: for<'a> Fn(&mut MonitorContext<'a, D>) -> ActionResult + Send + Sync + 'static,
    {
        self.with_exit(Arc::new(hook))
    }

    pub fn on_event_goto_with<F>(
        self,
        event: impl Into<EventType>,
        target: impl Into<String>,
        hook: F,
    ) -> Self
    where
        F: for<'a> Fn(&mut MonitorContext<'a, D>) -> ActionResult + Send + Sync + 'static,
    {
        self.with_goto(event, target, Arc::new(hook))
    }

    pub fn on_event_do<F>(self, event: impl Into<EventType>, action: F) -> Self
    where
        F: for<'a> Fn(&mut MonitorContext<'a, D>) -> ActionResult + Send + Sync + 'static,
    {
        self.with_action(event, Arc::new(action))
    }
}

/// Type-erased view of a monitor, as the runtime drives it.
pub trait Observer: Send {
    fn id(&self) -> &MachineId;

    /// Runs the initial state's entry hook. Delivering an event starts the
    /// monitor implicitly.
    fn start(&mut self, host: &dyn RuntimeHost) -> Result<(), CoreError>;

    fn deliver(&mut self, event: Event, host: &dyn RuntimeHost) -> Result<(), CoreError>;

    fn check_liveness(&mut self) -> Result<(), CoreError>;

    fn active_state(&self) -> Option<&str>;

    fn temperature(&self) -> u64;

    fn as_any(&self) -> &dyn Any;
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
}

enum Step {
    Event(Event),
    Goto(String),
}

/// A running instance of a monitor type.
pub struct Monitor<D> {
    id: MachineId,
    catalog: Arc<MonitorType<D>>,
    data: D,
    active: Option<Arc<MonitorState<D>>>,
    current: Option<Event>,
    started: bool,
    temperature: u64,
    threshold: u64,
}

impl<D: Send + 'static> Monitor<D> {
    /// Creates a monitor in its initial state. A zero `threshold` disables
    /// liveness checking.
    pub fn new(
        id: MachineId,
        catalog: Arc<MonitorType<D>>,
        data: D,
        threshold: u64,
    ) -> Result<Self, CoreError> {
        let initial = catalog.shared_state(catalog.initial())?.clone();

        Ok(Self {
            id,
            catalog,
            data,
            active: Some(initial),
            current: None,
            started: false,
            temperature: 0,
            threshold,
        })
    }

    pub fn id(&self) -> &MachineId {
        &self.id
    }

    pub fn catalog(&self) -> &Arc<MonitorType<D>> {
        &self.catalog
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn active_state(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.name())
    }

    pub fn is_hot(&self) -> bool {
        self.active.as_ref().is_some_and(|s| s.is_hot())
    }

    pub fn is_cold(&self) -> bool {
        self.active.as_ref().is_some_and(|s| s.is_cold())
    }

    pub fn temperature(&self) -> u64 {
        self.temperature
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: u64) {
        self.threshold = threshold;
    }

    pub fn start(&mut self, host: &dyn RuntimeHost) -> Result<(), CoreError> {
        if self.started {
            return Ok(());
        }
        self.started = true;

        let Some(initial) = self.active.clone() else {
            return Ok(());
        };
        host.notify(Notification::EnteredState {
            actor: &self.id,
            state: initial.name(),
        });
        tracing::debug!("{} started in {}", self.id, initial.name());

        let next = match initial.entry() {
            Some(entry) => self.invoke(entry, Site::Entry)?,
            None => None,
        };
        self.run(next, host)
    }

    /// Handles `event` to completion, including anything it raises.
    pub fn deliver(&mut self, event: Event, host: &dyn RuntimeHost) -> Result<(), CoreError> {
        self.start(host)?;
        tracing::debug!("{} observing {}", self.id, event);
        self.run(Some(Step::Event(event)), host)
    }

    /// Advances the liveness temperature while a hot state is active.
    pub fn check_liveness(&mut self) -> Result<(), CoreError> {
        let Some(active) = &self.active else {
            return Ok(());
        };
        if !active.is_hot() || self.threshold == 0 {
            return Ok(());
        }

        self.temperature = self.temperature.saturating_add(1);
        if self.temperature >= self.threshold {
            tracing::debug!(
                "{} stayed hot in {} for {} checks",
                self.id,
                active.name(),
                self.temperature
            );
            return Err(CoreError::LivenessViolation {
                monitor: self.id.to_string(),
                state: active.name().to_string(),
                temperature: self.temperature,
                threshold: self.threshold,
            });
        }
        Ok(())
    }

    fn run(&mut self, mut next: Option<Step>, host: &dyn RuntimeHost) -> Result<(), CoreError> {
        while let Some(step) = next.take() {
            next = match step {
                Step::Event(event) => {
                    let kind = event.kind().clone();
                    self.current = Some(event);
                    let result = self.handle(&kind, host);
                    self.current = None;
                    result?
                }
                Step::Goto(target) => self.goto(&target, None, host)?,
            };
        }
        Ok(())
    }

    fn handle(&mut self, kind: &EventType, host: &dyn RuntimeHost) -> Result<Option<Step>, CoreError> {
        let mut vacated = None;

        loop {
            let Some(active) = self.active.clone() else {
                return Err(CoreError::UnhandledEvent {
                    actor: self.id.to_string(),
                    state: vacated,
                    event: kind.to_string(),
                });
            };

            match active.table().lookup(kind) {
                Some(Binding::Ignore) => {
                    tracing::trace!("{} ignored {}", self.id, kind);
                    return Ok(None);
                }
                Some(Binding::Goto(goto)) => {
                    self.notify_handled(host, &active, kind);
                    return self.goto(&goto.target, goto.hook.clone(), host);
                }
                Some(Binding::Action(action)) => {
                    self.notify_handled(host, &active, kind);
                    return self.invoke(action, Site::Action);
                }
                Some(Binding::Push(_)) | Some(Binding::Defer) | None => {
                    // Monitors have no state beneath to fall back on.
                    tracing::debug!("{} in {} cannot handle {}", self.id, active.name(), kind);
                    vacated = Some(active.name().to_string());
                    self.active = None;
                }
            }
        }
    }

    fn goto(
        &mut self,
        target: &str,
        hook: Option<MonitorHandler<D>>,
        host: &dyn RuntimeHost,
    ) -> Result<Option<Step>, CoreError> {
        let incoming = self.catalog.shared_state(target)?.clone();

        if let Some(outgoing) = self.active.clone() {
            if let Some(exit) = outgoing.exit() {
                self.invoke(exit, Site::Exit)?;
            }
            if let Some(hook) = &hook {
                self.invoke(hook, Site::TransitionHook)?;
            }
            host.notify(Notification::ExitedState {
                actor: &self.id,
                state: outgoing.name(),
            });
            tracing::debug!("{} goto {} -> {}", self.id, outgoing.name(), target);
        }

        self.active = Some(incoming.clone());
        if incoming.is_cold() {
            self.temperature = 0;
        }
        host.notify(Notification::EnteredState {
            actor: &self.id,
            state: incoming.name(),
        });

        match incoming.entry() {
            Some(entry) => self.invoke(entry, Site::Entry),
            None => Ok(None),
        }
    }

    fn invoke(&mut self, handler: &MonitorHandler<D>, site: Site) -> Result<Option<Step>, CoreError> {
        let mut effects = Effects::default();
        let outcome = {
            let mut ctx = MonitorContext {
                id: &self.id,
                state: self.active.as_ref().map(|s| s.name()).unwrap_or_default(),
                event: self.current.as_ref(),
                data: &mut self.data,
                effects: &mut effects,
            };
            run_guarded(|| (**handler)(&mut ctx))
        };

        match outcome {
            Outcome::Completed => {}
            Outcome::Cancelled => {
                return Err(CoreError::ActionFailed {
                    origin: self.origin(site),
                    message: "monitors cannot be cancelled".to_string(),
                    trace: self.trace(),
                });
            }
            Outcome::Assertion(message) => {
                return Err(CoreError::AssertionFailed {
                    origin: self.origin(site),
                    message,
                });
            }
            Outcome::Failed(message) => {
                return Err(CoreError::ActionFailed {
                    origin: self.origin(site),
                    message,
                    trace: self.trace(),
                });
            }
            Outcome::Fatal(err) => return Err(err),
        }

        let Some(pending) = effects.pending else {
            return Ok(None);
        };
        if matches!(site, Site::Exit | Site::TransitionHook) {
            return Err(CoreError::AssertionFailed {
                origin: self.origin(site),
                message: "raise and goto are not allowed here".to_string(),
            });
        }

        Ok(Some(match pending {
            Pending::Raise(event) => {
                tracing::debug!("{} raised {}", self.id, event);
                Step::Event(event)
            }
            Pending::Goto(target) => Step::Goto(target),
        }))
    }

    fn notify_handled(&self, host: &dyn RuntimeHost, state: &MonitorState<D>, kind: &EventType) {
        host.notify(Notification::Handled {
            actor: &self.id,
            state: state.name(),
            event: kind,
        });
    }

    fn origin(&self, site: Site) -> String {
        let state = self.active_state().unwrap_or("<none>");
        match &self.current {
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

    fn trace(&self) -> String {
        format!(
            "state: {}; temperature: {}/{}",
            self.active_state().unwrap_or("<none>"),
            self.temperature,
            self.threshold
        )
    }
}

impl<D: Send + 'static> Observer for Monitor<D> {
    fn id(&self) -> &MachineId {
        Monitor::id(self)
    }

    fn start(&mut self, host: &dyn RuntimeHost) -> Result<(), CoreError> {
        Monitor::start(self, host)
    }

    fn deliver(&mut self, event: Event, host: &dyn RuntimeHost) -> Result<(), CoreError> {
        Monitor::deliver(self, event, host)
    }

    fn check_liveness(&mut self) -> Result<(), CoreError> {
        Monitor::check_liveness(self)
    }

    fn active_state(&self) -> Option<&str> {
        Monitor::active_state(self)
    }

    fn temperature(&self) -> u64 {
        Monitor::temperature(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
