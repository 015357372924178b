//! Pipeline Stages
//!
//! A [`Stage`] is one atomic step of a pipeline. It owns a name-keyed
//! registry of engines and runs exactly one of them per pass. Stages can be
//! bypassed (skip processing), disabled (a disabled stage is always
//! bypassed), or filtered (a pass whose scene fails the input filter is a
//! no-op for this stage).
//!
//! The active engine is selected by registered name; the selection is
//! whitelisted against the registry. Once the owning pipeline is locked the
//! selection is frozen unless the stage was constructed runtime-updatable.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::core::engine::{Engine, Payload};
use crate::errors::{Fault, Result, Status};
use crate::notifier::Notifier;
use crate::params::{ParamSet, Parameter};
use crate::scene::Scene;

/// Input filter deciding whether a stage touches a pass.
pub type Filter<X> = Box<dyn Fn(&Scene, &X) -> bool + Send + Sync>;

/// Observer signature of the per-stage broadcast channel.
pub type StageObserver = dyn Fn(&Scene, Status) + Send + Sync;

struct Registry<X: Payload> {
    engines: FxHashMap<String, Arc<dyn Engine<X>>>,
    active: Option<(String, Arc<dyn Engine<X>>)>,
    bypassed: bool,
    disabled: bool,
    locked: bool,
}

/// A named slot running one active engine per pass.
pub struct Stage<X: Payload = ()> {
    name: String,
    runtime_updatable: bool,
    registry: Mutex<Registry<X>>,
    filter: Mutex<Option<Filter<X>>>,
    /// Per-stage result channel, signalled after every pass.
    pub broadcast: Notifier<StageObserver>,
}

impl<X: Payload> std::fmt::Debug for Stage<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("engines", &registry.engines.keys().collect::<Vec<_>>())
            .field("active", &registry.active.as_ref().map(|(n, _)| n))
            .field("bypassed", &registry.bypassed)
            .field("disabled", &registry.disabled)
            .finish_non_exhaustive()
    }
}

impl<X: Payload> Stage<X> {
    /// Creates a stage; `runtime_updatable` allows engine swaps while the
    /// owning pipeline is locked.
    #[must_use]
    pub fn new(name: impl Into<String>, runtime_updatable: bool) -> Self {
        Self {
            name: name.into(),
            runtime_updatable,
            registry: Mutex::new(Registry {
                engines: FxHashMap::default(),
                active: None,
                bypassed: false,
                disabled: false,
                locked: false,
            }),
            filter: Mutex::new(None),
            broadcast: Notifier::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers an engine under a unique name and makes it the active one.
    pub fn register(&self, id: impl Into<String>, engine: Arc<dyn Engine<X>>) -> Result<()> {
        let id = id.into();
        if id.is_empty() {
            return Err(Fault::InvalidValue);
        }
        {
            let mut registry = self.registry.lock();
            if registry.engines.contains_key(&id) {
                return Err(Fault::InvalidRequest);
            }
            registry.engines.insert(id.clone(), engine);
        }
        self.select(&id)
    }

    /// Selects the active engine by registered name.
    ///
    /// Rejected with [`Fault::InvalidRequest`] once the stage is locked,
    /// unless it was constructed runtime-updatable.
    pub fn select(&self, id: &str) -> Result<()> {
        let mut registry = self.registry.lock();
        if registry.locked && !self.runtime_updatable {
            return Err(Fault::InvalidRequest);
        }
        if registry.active.as_ref().is_some_and(|(name, _)| name == id) {
            return Ok(());
        }
        let engine = registry.engines.get(id).ok_or(Fault::NotExisting)?;
        registry.active = Some((id.to_owned(), Arc::clone(engine)));
        Ok(())
    }

    /// Name of the active engine.
    #[must_use]
    pub fn selected(&self) -> Option<String> {
        self.registry.lock().active.as_ref().map(|(n, _)| n.clone())
    }

    pub fn bypass(&self, yes: bool) {
        self.registry.lock().bypassed = yes;
    }

    #[must_use]
    pub fn bypassed(&self) -> bool {
        self.registry.lock().bypassed
    }

    /// Disables the stage; a disabled stage is also bypassed.
    pub fn disable(&self, yes: bool) {
        let mut registry = self.registry.lock();
        registry.disabled = yes;
        if yes {
            registry.bypassed = true;
        }
    }

    #[must_use]
    pub fn disabled(&self) -> bool {
        self.registry.lock().disabled
    }

    /// Installs (or clears) the input filter.
    pub fn set_filter(&self, filter: Option<Filter<X>>) {
        *self.filter.lock() = filter;
    }

    /// Freezes the engine selection (the owning pipeline locks its stages
    /// when its own parameters are committed).
    pub fn lock(&self) {
        self.registry.lock().locked = true;
    }

    pub fn unlock(&self) {
        self.registry.lock().locked = false;
    }

    /// Runs `setup` on every registered engine.
    pub fn setup(&self) -> Result<()> {
        let engines: Vec<_> = self.registry.lock().engines.values().cloned().collect();
        for engine in engines {
            engine.setup()?;
        }
        Ok(())
    }

    /// Runs `terminate` on every registered engine.
    pub fn terminate(&self) {
        let engines: Vec<_> = self.registry.lock().engines.values().cloned().collect();
        for engine in engines {
            engine.terminate();
        }
    }

    fn active_engine(&self) -> Option<Arc<dyn Engine<X>>> {
        self.registry.lock().active.as_ref().map(|(_, e)| Arc::clone(e))
    }

    /// Prepares the pass through the active engine.
    pub fn prepare(&self, scene: &mut Scene, extra: &mut X) -> Status {
        match self.active_engine() {
            Some(engine) => engine.prepare(scene, extra),
            None => {
                log::error!("stage {}: no engine selected", self.name);
                Status::Fault(Fault::NotExisting)
            }
        }
    }

    /// Processes the pass through the active engine, honouring the bypass
    /// switches and the input filter, then signals the stage broadcast.
    pub fn process(&self, scene: &mut Scene, extra: &mut X) -> Status {
        let engine = {
            let registry = self.registry.lock();
            if registry.bypassed || registry.disabled {
                None
            } else {
                registry.active.as_ref().map(|(_, e)| Arc::clone(e))
            }
        };

        let passes_filter = engine.is_some()
            && self
                .filter
                .lock()
                .as_ref()
                .is_none_or(|filter| filter(scene, extra));

        let status = match engine {
            Some(engine) if passes_filter => engine.process(scene, extra),
            _ => Status::Ok,
        };

        self.broadcast.notify(|observer| observer(scene, status));
        status
    }

    /// Configuration surface of this stage, with triggers bound to `this`.
    ///
    /// Exposes `bypassed`, `disabled` and the whitelisted `uses` engine
    /// selector.
    #[must_use]
    pub fn params(self: &Arc<Self>) -> ParamSet {
        let mut set = ParamSet::new(self.name.clone());

        let stage = Arc::clone(self);
        let _ = set.expose(
            Parameter::new("bypassed", false)
                .describe("Is the pipeline stage bypassed ?")
                .settable()
                .callable()
                .on_update(move |v| {
                    stage.bypass(v.as_bool().unwrap_or(false));
                    Ok(())
                }),
        );

        let stage = Arc::clone(self);
        let _ = set.expose(
            Parameter::new("disabled", false)
                .describe("Is the pipeline stage disabled ?")
                .configurable()
                .callable()
                .on_update(move |v| {
                    stage.disable(v.as_bool().unwrap_or(false));
                    Ok(())
                }),
        );

        let names: Vec<String> = {
            let registry = self.registry.lock();
            registry.engines.keys().cloned().collect()
        };
        let stage = Arc::clone(self);
        let _ = set.expose(
            Parameter::new("uses", self.selected().unwrap_or_default())
                .describe("Name of the current engine")
                .settable()
                .whitelist(names)
                .on_update(move |v| stage.select(v.as_str().unwrap_or_default())),
        );

        set
    }
}
