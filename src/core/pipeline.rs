//! Pipeline Driver
//!
//! A [`Pipeline`] owns an ordered list of stages and a dedicated worker
//! thread looping over them. Two externally-settable switches drive the
//! worker through its state machine:
//!
//! | state   | meaning                                  |
//! |---------|------------------------------------------|
//! | Idle    | no worker thread                         |
//! | Running | worker looping over the stages           |
//! | Halted  | worker paused by `frozen`                |
//! | Zombie  | worker exited, awaiting join             |
//!
//! Both switches are serialised by a single mutex and condvar. Setting
//! `running` again while running requests a retry of the current pass; a
//! `NotReady` result without a pending retry sends the worker to `Zombie`.
//! The setters re-check the state on a 10 ms watchdog to absorb racing
//! updates from other control threads.
//!
//! Running is gated: the pipeline must be locked (parameters committed)
//! before `running` can go true, and stages cannot be appended while the
//! worker lives.
//!
//! Per pass the worker runs `prepare` then `process` on every stage in
//! insertion order, then signals its observers and the user `finished`
//! hook. Fatal statuses are signalled to observers before the worker
//! exits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::core::engine::Payload;
use crate::core::stage::Stage;
use crate::errors::{Fault, Result, Status};
use crate::notifier::{Notifier, ObserverId};
use crate::params::{ParamSet, Parameter};
use crate::scene::Scene;

/// Observer signature of the pipeline broadcast channel.
pub type PipelineObserver = dyn Fn(&Scene, Status) + Send + Sync;

/// User hook invoked with the final scene of every successful pass.
pub type Finished<X> = Box<dyn Fn(&Scene, &X) + Send + Sync>;

/// Observable worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Halted,
    Zombie,
}

#[derive(Default)]
struct Control {
    run: bool,
    retry: bool,
    halt: bool,
    zombie: bool,
}

struct Core<X: Payload> {
    name: String,
    stages: Mutex<Vec<Arc<Stage<X>>>>,
    control: Mutex<Control>,
    resume: Condvar,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
    broadcast: Notifier<PipelineObserver>,
    finished: Mutex<Option<Finished<X>>>,
    locked: AtomicBool,
}

impl<X: Payload> Core<X> {
    fn state(&self) -> PipelineState {
        let control = self.control.lock();
        if control.zombie {
            PipelineState::Zombie
        } else if control.halt {
            PipelineState::Halted
        } else if control.run {
            PipelineState::Running
        } else if self.worker.lock().is_some() {
            PipelineState::Zombie
        } else {
            PipelineState::Idle
        }
    }

    /// Applies a `running` update, blocking until the state machine is
    /// coherent (spawning or joining the worker as needed).
    fn set_running(self: &Arc<Self>, yes: bool) {
        if yes && !self.locked.load(Ordering::Acquire) {
            log::warn!("pipeline {}: cannot run before being locked", self.name);
            return;
        }

        loop {
            let mut control = self.control.lock();

            // Requesting a running change always clears a halt: a starting
            // pipeline cannot stay halted, nor can a stopping one.
            if control.halt {
                control.halt = false;
                self.resume.notify_all();
            }

            let joinable = self.worker.lock().is_some();
            if control.run == yes && control.run == joinable {
                // Starting again whilst running is a retry request.
                if control.run {
                    control.retry = true;
                }
                return;
            }

            if control.zombie {
                let handle = self.worker.lock().take();
                if let Some(handle) = handle {
                    let _ = handle.join();
                }
                control.zombie = false;
            }

            let joinable = self.worker.lock().is_some();
            if yes != joinable {
                control.run = yes;
                if yes {
                    let core = Arc::clone(self);
                    *self.worker.lock() = Some(std::thread::spawn(move || core.work()));
                    return;
                }
                // Stopping: fall through and wait for the worker to go
                // zombie, then join on the next iteration.
            }

            // 10 ms watchdog against lost wake-ups from racing control
            // threads.
            self.resume.wait_for(&mut control, Duration::from_millis(10));
        }
    }

    /// Applies a `frozen` update; only a running worker can halt.
    fn set_frozen(&self, yes: bool) {
        let mut control = self.control.lock();
        let halt = yes && control.run;
        if control.halt == halt {
            return;
        }
        control.halt = halt;
        self.resume.notify_all();
    }

    fn work(self: Arc<Self>) {
        loop {
            let mut scene = Scene::new();
            let mut extra = X::default();
            let status = self.process_pass(&mut scene, &mut extra);

            if let Status::Fault(fault) = status {
                log::error!("pipeline {}: pass failed: {fault}", self.name);
                self.broadcast.notify(|observer| observer(&scene, status));
            }

            let notify;
            {
                let mut control = self.control.lock();

                let do_retry = status == Status::Retry
                    || (status == Status::NotReady && control.retry);
                let do_exit = !control.run
                    || status.is_fault()
                    || (status == Status::NotReady && !control.retry);
                control.retry = false;

                if do_exit {
                    control.run = false;
                    control.halt = false;
                    control.zombie = true;
                    self.resume.notify_all();
                    return;
                }
                notify = !do_retry;
            }

            // Publish the result before honouring a freeze, so downstream
            // state is complete while the worker is halted.
            if notify {
                self.broadcast.notify(|observer| observer(&scene, status));
                if let Some(finished) = self.finished.lock().as_ref() {
                    finished(&scene, &extra);
                }
            }

            let mut control = self.control.lock();
            while control.halt {
                self.resume.wait(&mut control);
            }
        }
    }

    fn process_pass(&self, scene: &mut Scene, extra: &mut X) -> Status {
        let stages: Vec<Arc<Stage<X>>> = self.stages.lock().clone();
        if stages.is_empty() {
            return Status::Fault(Fault::NotExisting);
        }

        for stage in &stages {
            let status = stage.prepare(scene, extra);
            if status != Status::Ok {
                if status.is_fault() {
                    log::error!(
                        "pipeline {}: stage {} failed to prepare: {status:?}",
                        self.name,
                        stage.name()
                    );
                }
                return status;
            }

            let status = stage.process(scene, extra);
            if status != Status::Ok {
                if status.is_fault() {
                    log::error!(
                        "pipeline {}: stage {} failed to process: {status:?}",
                        self.name,
                        stage.name()
                    );
                }
                return status;
            }
        }

        Status::Ok
    }
}

/// An ordered sequence of stages with a freezable worker thread.
pub struct Pipeline<X: Payload = ()> {
    core: Arc<Core<X>>,
    /// Configuration surface: `running` and `frozen`, armed by `lock`.
    pub params: ParamSet,
}

impl<X: Payload> std::fmt::Debug for Pipeline<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.core.name)
            .field("stages", &self.core.stages.lock().len())
            .field("state", &self.core.state())
            .finish_non_exhaustive()
    }
}

impl<X: Payload> Pipeline<X> {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let core = Arc::new(Core {
            name: name.clone(),
            stages: Mutex::new(Vec::new()),
            control: Mutex::new(Control::default()),
            resume: Condvar::new(),
            worker: Mutex::new(None),
            broadcast: Notifier::new(),
            finished: Mutex::new(None),
            locked: AtomicBool::new(false),
        });

        let mut params = ParamSet::new(name);
        let c = Arc::clone(&core);
        let _ = params.expose(
            Parameter::new("running", false)
                .describe("Is the pipeline running ?")
                .settable()
                .callable()
                .on_update(move |v| {
                    c.set_running(v.as_bool().unwrap_or(false));
                    Ok(())
                }),
        );
        let c = Arc::clone(&core);
        let _ = params.expose(
            Parameter::new("frozen", false)
                .describe("Is the pipeline frozen ?")
                .settable()
                .callable()
                .on_update(move |v| {
                    c.set_frozen(v.as_bool().unwrap_or(false));
                    Ok(())
                }),
        );

        Self { core, params }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Appends a stage; forbidden while the worker is alive.
    pub fn append(&self, stage: Arc<Stage<X>>) -> Result<()> {
        let control = self.core.control.lock();
        debug_assert!(!control.run, "appending a stage to a running pipeline");
        if control.run {
            return Err(Fault::InvalidRequest);
        }
        if stage.name().is_empty() {
            return Err(Fault::InvalidValue);
        }
        self.core.stages.lock().push(stage);
        Ok(())
    }

    /// Commits the configuration: runs `setup` on every stage, freezes
    /// engine selections and arms the run/freeze switches.
    pub fn lock(&mut self) -> Result<()> {
        let stages: Vec<_> = self.core.stages.lock().clone();
        for stage in &stages {
            stage.setup()?;
            stage.lock();
        }
        self.params.lock();
        self.core.locked.store(true, Ordering::Release);
        Ok(())
    }

    #[must_use]
    pub fn locked(&self) -> bool {
        self.core.locked.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.core.state()
    }

    /// Starts the worker (or requests a retry when already running).
    /// Ignored until the pipeline is locked.
    pub fn start(&mut self) {
        let _ = self.params.set("running", true);
    }

    /// Stops the worker and joins it.
    pub fn stop(&mut self) {
        let _ = self.params.set("running", false);
    }

    pub fn freeze(&mut self) {
        let _ = self.params.set("frozen", true);
    }

    pub fn unfreeze(&mut self) {
        let _ = self.params.set("frozen", false);
    }

    /// Stops the pipeline safely ahead of a new initialisation, and runs
    /// `terminate` on every stage.
    pub fn terminate(&mut self) {
        self.unfreeze();
        self.stop();
        let stages: Vec<_> = self.core.stages.lock().clone();
        for stage in &stages {
            stage.terminate();
        }
    }

    /// Registers a broadcast observer called with the scene and status of
    /// every completed pass (and with every fatal status).
    pub fn observe(&self, observer: Box<PipelineObserver>) -> ObserverId {
        self.core.broadcast.connect(observer)
    }

    pub fn unobserve(&self, id: ObserverId) -> bool {
        self.core.broadcast.disconnect(id)
    }

    /// Installs the user hook invoked after every successful pass.
    pub fn on_finished(&self, finished: Finished<X>) {
        *self.core.finished.lock() = Some(finished);
    }
}

impl<X: Payload> Drop for Pipeline<X> {
    fn drop(&mut self) {
        self.terminate();
        // Reap a zombie left by a fatal pass, so the thread never outlives
        // the pipeline.
        let handle = self.core.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}
