//! Runtime hosting machines and monitors.
//!
//! The runtime plays the scheduler and reporting roles around the engines:
//! it owns identities and catalogues for one test run, creates machines
//! from registered types, routes sends, delivers monitor events, and keeps
//! a ready queue of machines that need a turn. Every fatal engine error is
//! filed through [`Runtime::report`], which keeps the first as the run's
//! bug.

use crate::config::Config;
use crate::coverage::{CoverageReport, CoverageTracker};
use crate::error::RuntimeError;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use turnstile_core::{
    Actor, CatalogRegistry, CoreError, EnqueueOutcome, Event, FailureKind, IdentityRegistry,
    Machine, MachineId, MachineType, Monitor, MonitorType, Notification, Observer, RuntimeHost,
    TurnOutcome,
};

/// A fatal failure recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugReport {
    pub kind: FailureKind,
    pub code: String,
    pub message: String,
}

impl From<&CoreError> for BugReport {
    fn from(err: &CoreError) -> Self {
        Self {
            kind: err.kind(),
            code: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}

type MachineFactory =
    dyn Fn(MachineId, Option<Event>) -> Result<Arc<dyn Actor>, CoreError> + Send + Sync;

type SharedObserver = Arc<Mutex<Box<dyn Observer>>>;

#[derive(Default)]
struct ReadyQueue {
    order: VecDeque<MachineId>,
    queued: HashSet<u64>,
}

/// Hosts the machines and monitors of one test run.
pub struct Runtime {
    config: Config,
    identities: IdentityRegistry,
    catalogs: CatalogRegistry,
    factories: DashMap<String, Arc<MachineFactory>>,
    machines: DashMap<u64, Arc<dyn Actor>>,
    monitors: RwLock<BTreeMap<String, SharedObserver>>,
    ready: Mutex<ReadyQueue>,
    bug: Mutex<Option<BugReport>>,
    coverage: CoverageTracker,
}

impl Runtime {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            identities: IdentityRegistry::new(),
            catalogs: CatalogRegistry::new(),
            factories: DashMap::new(),
            machines: DashMap::new(),
            monitors: RwLock::new(BTreeMap::new()),
            ready: Mutex::new(ReadyQueue::default()),
            bug: Mutex::new(None),
            coverage: CoverageTracker::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Registers a machine type. The catalogue is built on first
    /// registration and reused until [`Runtime::reset`]; `data` produces the
    /// private data of each new instance.
    pub fn register_machine_type<D, B, F>(
        &self,
        type_name: &str,
        build: B,
        data: F,
    ) -> Result<Arc<MachineType<D>>, RuntimeError>
    where
        D: Send + 'static,
        B: FnOnce() -> Result<MachineType<D>, CoreError>,
        F: Fn() -> D + Send + Sync + 'static,
    {
        if self.factories.contains_key(type_name) {
            return Err(RuntimeError::DuplicateMachineType(type_name.to_string()));
        }

        let catalog = self.catalogs.get_or_build(type_name, build)?;
        check_type_name(type_name, catalog.type_name())?;
        self.coverage.declare(catalog.coverage());

        let shared = Arc::clone(&catalog);
        let factory: Arc<MachineFactory> = Arc::new(
            move |id: MachineId, init: Option<Event>| -> Result<Arc<dyn Actor>, CoreError> {
                let machine = Machine::new(id, Arc::clone(&shared), data(), init)?;
                Ok(Arc::new(machine))
            },
        );
        self.factories.insert(type_name.to_string(), factory);

        tracing::debug!("Registered machine type {} ({} states)", type_name, catalog.len());
        Ok(catalog)
    }

    /// Registers a monitor type and creates its single instance, running the
    /// initial state's entry hook.
    pub fn register_monitor<D, B>(
        &self,
        type_name: &str,
        build: B,
        data: D,
    ) -> Result<MachineId, RuntimeError>
    where
        D: Send + 'static,
        B: FnOnce() -> Result<MonitorType<D>, CoreError>,
    {
        if self.monitors.read().contains_key(type_name) {
            return Err(RuntimeError::DuplicateMonitorType(type_name.to_string()));
        }

        let catalog = self.catalogs.get_or_build(type_name, build)?;
        check_type_name(type_name, catalog.type_name())?;
        self.coverage.declare(catalog.coverage());

        let id = self.identities.new_identity(type_name, None)?;
        let mut monitor = Monitor::new(
            id.clone(),
            catalog,
            data,
            self.config.testing.liveness_threshold,
        )?;
        if let Err(e) = monitor.start(self) {
            self.report(&e);
            return Err(e.into());
        }

        let observer: Box<dyn Observer> = Box::new(monitor);
        self.monitors
            .write()
            .insert(type_name.to_string(), Arc::new(Mutex::new(observer)));

        tracing::debug!("Registered monitor {}", id);
        Ok(id)
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Creates a machine of a registered type and schedules its first turn.
    pub fn create_machine(
        &self,
        type_name: &str,
        friendly_name: Option<&str>,
        init: Option<Event>,
    ) -> Result<MachineId, CoreError> {
        self.spawn(type_name, friendly_name, init)
            .inspect_err(|e| self.report(e))
    }

    /// Sends an event from outside any machine.
    pub fn send(&self, target: &MachineId, event: Event) -> Result<(), CoreError> {
        self.enqueue(target, event).inspect_err(|e| self.report(e))
    }

    /// Delivers an event synchronously to the monitor of `monitor_type`.
    pub fn monitor(&self, monitor_type: &str, event: Event) -> Result<(), CoreError> {
        self.observe(monitor_type, event)
            .inspect_err(|e| self.report(e))
    }

    /// Runs one turn of a machine.
    pub fn run_turn(&self, id: &MachineId) -> Result<TurnOutcome, CoreError> {
        let machine = self.actor(id).inspect_err(|e| self.report(e))?;

        match machine.run_turn(self) {
            Ok(TurnOutcome::Busy) => {
                // The turn in flight may already have drained the mailbox.
                self.schedule(id);
                Ok(TurnOutcome::Busy)
            }
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.report(&e);
                if !machine.is_halted() && machine.mailbox_len() > 0 {
                    self.schedule(id);
                }
                Err(e)
            }
        }
    }

    /// Advances every monitor's liveness temperature by one step.
    pub fn check_liveness(&self) -> Result<(), CoreError> {
        if !self.config.testing.checks_liveness() {
            return Ok(());
        }

        let monitors: Vec<SharedObserver> = self.monitors.read().values().cloned().collect();
        for monitor in monitors {
            let result = monitor.lock().check_liveness();
            if let Err(e) = result {
                self.report(&e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Records a fatal failure. The first one becomes the run's bug.
    pub fn report(&self, err: &CoreError) {
        let mut bug = self.bug.lock();
        if bug.is_none() {
            tracing::error!("Bug found: {}", err);
            *bug = Some(BugReport::from(err));
        } else {
            tracing::debug!("Further failure after first bug: {}", err);
        }
    }

    /// Clears all state of the current run.
    pub fn reset(&self) {
        self.machines.clear();
        self.factories.clear();
        self.monitors.write().clear();
        *self.ready.lock() = ReadyQueue::default();
        *self.bug.lock() = None;
        self.catalogs.clear();
        self.identities.reset();
        self.coverage.clear();
        tracing::debug!("Runtime reset");
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn bug(&self) -> Option<BugReport> {
        self.bug.lock().clone()
    }

    pub fn coverage(&self) -> CoverageReport {
        self.coverage.report()
    }

    pub fn machine(&self, id: &MachineId) -> Option<Arc<dyn Actor>> {
        self.machines.get(&id.value()).map(|m| Arc::clone(m.value()))
    }

    /// Identifiers of every machine created in this run, in creation order.
    pub fn machine_ids(&self) -> Vec<MachineId> {
        let mut ids: Vec<MachineId> = self.machines.iter().map(|m| m.id().clone()).collect();
        ids.sort();
        ids
    }

    pub fn halted_machines(&self) -> Vec<MachineId> {
        let mut ids: Vec<MachineId> = self
            .machines
            .iter()
            .filter(|m| m.is_halted())
            .map(|m| m.id().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Runs `f` against a machine's private data, unless a turn is in flight.
    pub fn with_machine_data<D, R>(
        &self,
        id: &MachineId,
        f: impl FnOnce(&D) -> R,
    ) -> Result<Option<R>, RuntimeError>
    where
        D: Send + 'static,
    {
        let actor = self.actor(id)?;
        let machine = actor
            .as_any()
            .downcast_ref::<Machine<D>>()
            .ok_or_else(|| RuntimeError::DataTypeMismatch(id.to_string()))?;
        Ok(machine.with_data(f))
    }

    /// Runs `f` against the monitor of `monitor_type`.
    pub fn with_monitor<D, R>(
        &self,
        monitor_type: &str,
        f: impl FnOnce(&Monitor<D>) -> R,
    ) -> Result<R, RuntimeError>
    where
        D: Send + 'static,
    {
        let observer = self.observer(monitor_type)?;
        let guard = observer.lock();
        let monitor = guard
            .as_any()
            .downcast_ref::<Monitor<D>>()
            .ok_or_else(|| RuntimeError::DataTypeMismatch(monitor_type.to_string()))?;
        Ok(f(monitor))
    }

    pub(crate) fn next_ready(&self) -> Option<MachineId> {
        let mut ready = self.ready.lock();
        let id = ready.order.pop_front()?;
        ready.queued.remove(&id.value());
        Some(id)
    }

    pub(crate) fn ready_len(&self) -> usize {
        self.ready.lock().order.len()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn schedule(&self, id: &MachineId) {
        let mut ready = self.ready.lock();
        if ready.queued.insert(id.value()) {
            ready.order.push_back(id.clone());
        }
    }

    fn actor(&self, id: &MachineId) -> Result<Arc<dyn Actor>, CoreError> {
        self.machine(id)
            .ok_or(CoreError::MachineNotFound { id: id.value() })
    }

    fn observer(&self, monitor_type: &str) -> Result<SharedObserver, CoreError> {
        self.monitors
            .read()
            .get(monitor_type)
            .cloned()
            .ok_or_else(|| CoreError::UnknownMonitorType {
                type_name: monitor_type.to_string(),
            })
    }

    fn spawn(
        &self,
        type_name: &str,
        friendly_name: Option<&str>,
        init: Option<Event>,
    ) -> Result<MachineId, CoreError> {
        let factory = self
            .factories
            .get(type_name)
            .map(|f| Arc::clone(f.value()))
            .ok_or_else(|| CoreError::UnknownMachineType {
                type_name: type_name.to_string(),
            })?;

        let id = self.identities.new_identity(type_name, friendly_name)?;
        let machine = factory(id.clone(), init)?;
        self.machines.insert(id.value(), machine);
        self.schedule(&id);

        tracing::debug!("Created {}", id);
        Ok(id)
    }

    fn enqueue(&self, target: &MachineId, event: Event) -> Result<(), CoreError> {
        let event = match (event.max_in_flight(), self.config.mailbox.default_max_in_flight) {
            (None, Some(bound)) => event.bounded(bound),
            _ => event,
        };

        let machine = self.actor(target)?;
        match machine.enqueue(event)? {
            EnqueueOutcome::NeedsTurn => self.schedule(target),
            EnqueueOutcome::Enqueued => {}
            EnqueueOutcome::Dropped => {
                tracing::warn!("Dropped event sent to halted {}", target);
            }
        }
        Ok(())
    }

    fn observe(&self, monitor_type: &str, event: Event) -> Result<(), CoreError> {
        let observer = self.observer(monitor_type)?;
        let mut monitor = observer.lock();
        monitor.deliver(event, self)
    }
}

fn check_type_name(registered: &str, declared: &str) -> Result<(), CoreError> {
    if registered != declared {
        return Err(CoreError::InvalidDeclaration {
            type_name: registered.to_string(),
            reason: format!("catalogue declares type '{}'", declared),
        });
    }
    Ok(())
}

impl RuntimeHost for Runtime {
    fn send(&self, sender: &MachineId, target: &MachineId, event: Event) -> Result<(), CoreError> {
        tracing::trace!("{} sends {} to {}", sender, event, target);
        self.enqueue(target, event)
    }

    fn create_machine(
        &self,
        creator: &MachineId,
        type_name: &str,
        friendly_name: Option<&str>,
        init: Option<Event>,
    ) -> Result<MachineId, CoreError> {
        tracing::trace!("{} creates a {}", creator, type_name);
        self.spawn(type_name, friendly_name, init)
    }

    fn monitor(&self, sender: &MachineId, monitor_type: &str, event: Event) -> Result<(), CoreError> {
        tracing::trace!("{} notifies {} of {}", sender, monitor_type, event);
        self.observe(monitor_type, event)
    }

    fn notify(&self, notification: Notification<'_>) {
        if let Notification::Halted { actor } = notification {
            tracing::debug!("{} halted", actor);
        }
        if self.config.coverage.enabled {
            self.coverage.record(&notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_core::{ActionError, MachineStatus, MachineType, MonitorType};

    fn counter_type() -> Result<MachineType<u32>, CoreError> {
        MachineType::<u32>::builder("Counter")
            .state("Counting", |s| {
                s.start().on_event_do("Inc", |ctx| {
                    *ctx.data_mut() += 1;
                    Ok(())
                })
            })
            .build()
    }

    fn runtime() -> Runtime {
        let runtime = Runtime::new(Config::default());
        runtime
            .register_machine_type("Counter", counter_type, || 0u32)
            .unwrap();
        runtime
    }

    fn drain(runtime: &Runtime) {
        while let Some(id) = runtime.next_ready() {
            runtime.run_turn(&id).unwrap();
        }
    }

    #[test]
    fn test_create_and_send() {
        let runtime = runtime();
        let id = runtime.create_machine("Counter", Some("c"), None).unwrap();
        assert_eq!(id.to_string(), "c(1)");
        assert_eq!(runtime.ready_len(), 1);

        runtime.send(&id, Event::new("Inc")).unwrap();
        runtime.send(&id, Event::new("Inc")).unwrap();
        drain(&runtime);

        let count = runtime.with_machine_data(&id, |n: &u32| *n).unwrap();
        assert_eq!(count, Some(2));
        assert_eq!(runtime.machine(&id).unwrap().status(), MachineStatus::Waiting);
    }

    #[test]
    fn test_send_to_waiting_machine_schedules_once() {
        let runtime = runtime();
        let id = runtime.create_machine("Counter", None, None).unwrap();
        drain(&runtime);

        runtime.send(&id, Event::new("Inc")).unwrap();
        runtime.send(&id, Event::new("Inc")).unwrap();
        assert_eq!(runtime.ready_len(), 1);
    }

    #[test]
    fn test_failed_turn_keeps_machine_schedulable() {
        let mut config = Config::default();
        config.testing.stop_on_first_bug = false;
        let runtime = Runtime::new(config);
        runtime
            .register_machine_type(
                "Fragile",
                || {
                    MachineType::<u32>::builder("Fragile")
                        .state("Idle", |s| {
                            s.start()
                                .on_event_do("Bad", |_| Err(ActionError::failed("bad input")))
                                .on_event_do("Inc", |ctx| {
                                    *ctx.data_mut() += 1;
                                    Ok(())
                                })
                        })
                        .build()
                },
                || 0u32,
            )
            .unwrap();
        let id = runtime.create_machine("Fragile", None, None).unwrap();
        runtime.send(&id, Event::new("Bad")).unwrap();
        runtime.send(&id, Event::new("Inc")).unwrap();

        let next = runtime.next_ready().unwrap();
        assert!(runtime.run_turn(&next).is_err());
        assert_eq!(runtime.bug().unwrap().code, "ACTION_FAILED");
        // The event behind the failing one still gets a turn.
        assert_eq!(runtime.ready_len(), 1);
        drain(&runtime);
        assert_eq!(runtime.with_machine_data(&id, |n: &u32| *n).unwrap(), Some(1));

        runtime.send(&id, Event::new("Inc")).unwrap();
        assert_eq!(runtime.ready_len(), 1);
        drain(&runtime);
        assert_eq!(runtime.with_machine_data(&id, |n: &u32| *n).unwrap(), Some(2));
        assert_eq!(runtime.machine(&id).unwrap().status(), MachineStatus::Waiting);
    }

    #[test]
    fn test_duplicate_registration() {
        let runtime = runtime();
        let err = runtime
            .register_machine_type("Counter", counter_type, || 0u32)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::DuplicateMachineType(_)));
    }

    #[test]
    fn test_mismatched_type_name() {
        let runtime = Runtime::new(Config::default());
        let err = runtime
            .register_machine_type("Other", counter_type, || 0u32)
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_DECLARATION");
    }

    #[test]
    fn test_unknown_targets_are_reported() {
        let runtime = runtime();
        let err = runtime.create_machine("Missing", None, None).unwrap_err();
        assert!(matches!(err, CoreError::UnknownMachineType { .. }));

        let bug = runtime.bug().unwrap();
        assert_eq!(bug.code, "UNKNOWN_MACHINE_TYPE");
        assert_eq!(bug.kind, FailureKind::Declaration);
    }

    #[test]
    fn test_first_bug_is_kept() {
        let runtime = runtime();
        let id = runtime.create_machine("Counter", None, None).unwrap();
        runtime.send(&id, Event::new("Bogus")).unwrap();
        assert!(runtime.run_turn(&id).is_err());
        assert!(runtime.monitor("Nobody", Event::new("E")).is_err());

        assert_eq!(runtime.bug().unwrap().code, "UNHANDLED_EVENT");
    }

    #[test]
    fn test_default_max_in_flight() {
        let mut config = Config::default();
        config.mailbox.default_max_in_flight = Some(1);
        let runtime = Runtime::new(config);
        runtime
            .register_machine_type("Counter", counter_type, || 0u32)
            .unwrap();
        let id = runtime.create_machine("Counter", None, None).unwrap();

        runtime.send(&id, Event::new("Inc")).unwrap();
        let err = runtime.send(&id, Event::new("Inc")).unwrap_err();
        assert!(matches!(err, CoreError::MailboxBoundExceeded { .. }));
        // An explicit bound wins over the configured default.
        runtime.send(&id, Event::new("Inc").bounded(5)).unwrap();
    }

    #[test]
    fn test_monitor_registration_and_delivery() {
        let runtime = runtime();
        runtime
            .register_monitor(
                "Seen",
                || {
                    MonitorType::<Vec<String>>::builder("Seen")
                        .state("Watching", |s| {
                            s.start().on_event_do("Saw", |ctx| {
                                let what = ctx.payload().and_then(|p| p.as_str()).unwrap_or("");
                                let what = what.to_string();
                                ctx.data_mut().push(what);
                                Ok(())
                            })
                        })
                        .build()
                },
                Vec::new(),
            )
            .unwrap();

        runtime
            .monitor("Seen", Event::with_payload("Saw", "x".into()))
            .unwrap();
        let seen = runtime
            .with_monitor("Seen", |m: &Monitor<Vec<String>>| m.data().clone())
            .unwrap();
        assert_eq!(seen, vec!["x"]);

        let err = runtime
            .register_monitor("Seen", || unreachable!(), Vec::<String>::new())
            .unwrap_err();
        assert!(matches!(err, RuntimeError::DuplicateMonitorType(_)));
    }

    #[test]
    fn test_reset() {
        let runtime = runtime();
        let id = runtime.create_machine("Counter", None, None).unwrap();
        runtime.report(&CoreError::IdentifierOverflow);

        runtime.reset();
        assert!(runtime.machine(&id).is_none());
        assert!(runtime.bug().is_none());
        assert!(runtime.coverage().types.is_empty());
        assert_eq!(runtime.ready_len(), 0);
        assert!(matches!(
            runtime.create_machine("Counter", None, None),
            Err(CoreError::UnknownMachineType { .. })
        ));

        runtime
            .register_machine_type("Counter", counter_type, || 0u32)
            .unwrap();
        let id = runtime.create_machine("Counter", None, None).unwrap();
        assert_eq!(id.value(), 1);
    }

    #[test]
    fn test_coverage_records_visits() {
        let runtime = runtime();
        let id = runtime.create_machine("Counter", None, None).unwrap();
        runtime.send(&id, Event::new("Inc")).unwrap();
        drain(&runtime);

        let report = runtime.coverage();
        let counter = report.get("Counter").unwrap();
        assert_eq!(counter.state_ratio(), 1.0);
        assert_eq!(counter.transition_ratio(), 1.0);
    }
}
