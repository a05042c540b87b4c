//! ISP driver core.
//!
//! `IspDriver` is the public entry point. It owns the processor pool (each
//! processor owning one controller pool per kind), drives the per-entity
//! state machines, and runs the statistics dispatcher.
//!
//! All pools and entity states live in one [`Registry`] behind a single
//! `parking_lot::Mutex`. Every allocate/free/transition happens under that
//! lock, which also makes the "no children" check at processor deletion
//! atomic with respect to concurrent controller creation. Backend calls
//! (`commit_*`, `arm`, `disarm`) are made under the lock and before any
//! state is changed, so a failed commit leaves the registry untouched.

use crate::commit::{CcmBlock, encode_ccm};
use crate::pool::SlotPool;
use crate::state::controller::{ControllerEvent, ControllerState, ControllerStateMachine};
use crate::state::processor::{ProcessorEvent, ProcessorState, ProcessorStateMachine};
use crate::stats::{StatsCallback, spawn_dispatcher};
use crate::validate::{validate_controller, validate_processor};
use isp_common::config::HardwareConfig;
use isp_common::consts::{MAX_CONTROLLERS_PER_KIND, MAX_PROCESSORS};
use isp_common::isp::error::{IspError, IspResult};
use isp_common::isp::hal::IspHal;
use isp_common::isp::types::{
    CcmConfig, ControllerConfig, ControllerHandle, ControllerKind, ProcessorConfig,
    ProcessorHandle, Statistics, StatsMode,
};
use parking_lot::{Condvar, Mutex};
use std::sync::mpsc;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Controller slot pool of one kind.
type ControllerPool = SlotPool<ControllerEntry, MAX_CONTROLLERS_PER_KIND>;

/// Per-controller bookkeeping.
pub(crate) struct ControllerEntry {
    /// Last accepted configuration
    pub(crate) config: ControllerConfig,
    /// Hardware does not yet hold `config`
    pub(crate) staged: bool,
    pub(crate) state: ControllerStateMachine,
    /// Continuous statistics callback (taken while it runs)
    pub(crate) callback: Option<StatsCallback>,
    /// Epoch of the current arming, if armed
    pub(crate) armed_epoch: Option<u64>,
    /// Epoch handed out by the next arm
    pub(crate) next_epoch: u64,
    /// Oneshot payload waiting to be collected
    pub(crate) oneshot_result: Option<Statistics>,
    /// Thread currently running this controller's callback
    pub(crate) dispatching: Option<ThreadId>,
}

impl ControllerEntry {
    fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            staged: true,
            state: ControllerStateMachine::new(),
            callback: None,
            armed_epoch: None,
            next_epoch: 0,
            oneshot_result: None,
            dispatching: None,
        }
    }
}

/// Per-processor bookkeeping.
pub(crate) struct ProcessorEntry {
    pub(crate) config: ProcessorConfig,
    pub(crate) state: ProcessorStateMachine,
    pub(crate) ccm: CcmBlock,
    /// One pool per `ControllerKind`, indexed by `ControllerKind::index()`
    pub(crate) controllers: [ControllerPool; 3],
}

impl ProcessorEntry {
    fn new(config: ProcessorConfig, caps: &HardwareConfig) -> Self {
        Self {
            config,
            state: ProcessorStateMachine::new(),
            ccm: CcmBlock::new(),
            controllers: ControllerKind::ALL.map(|kind| {
                SlotPool::new(pool_name(kind), caps.capacity(kind))
            }),
        }
    }

    fn children(&self) -> usize {
        self.controllers.iter().map(SlotPool::len).sum()
    }

    /// Commit staged CCM and controller configuration to the backend.
    fn flush_staged(&mut self, hal: &dyn IspHal, handle: ProcessorHandle) -> IspResult<()> {
        if self.ccm.staged {
            hal.commit_ccm(handle.slot(), &self.ccm.matrix, self.ccm.enabled)?;
            self.ccm.staged = false;
            debug!("Flushed staged CCM on {}", handle);
        }
        for pool in self.controllers.iter_mut() {
            for (slot, generation, controller) in pool.iter_mut() {
                if !controller.staged || !controller.state.state().is_enabled() {
                    continue;
                }
                let target = ControllerHandle::new(handle, controller.config.kind(), slot, generation);
                hal.commit_controller(target, &controller.config, true)?;
                controller.staged = false;
                debug!("Flushed staged configuration of {}", target);
            }
        }
        Ok(())
    }

    fn statistics_running(&self) -> bool {
        self.controllers
            .iter()
            .flat_map(|pool| pool.iter())
            .any(|(_, _, c)| c.state.state().statistics_running())
    }
}

fn pool_name(kind: ControllerKind) -> &'static str {
    match kind {
        ControllerKind::Af => "af controller",
        ControllerKind::Awb => "awb controller",
        ControllerKind::Ae => "ae controller",
    }
}

/// All driver state guarded by the registry lock.
pub(crate) struct Registry {
    pub(crate) processors: SlotPool<ProcessorEntry, MAX_PROCESSORS>,
    /// Set on drop; stops the dispatcher
    pub(crate) shutdown: bool,
}

impl Registry {
    pub(crate) fn processor(&self, handle: ProcessorHandle) -> IspResult<&ProcessorEntry> {
        self.processors
            .get(handle.slot(), handle.generation())
            .ok_or_else(|| IspError::StaleHandle(handle.to_string()))
    }

    pub(crate) fn processor_mut(&mut self, handle: ProcessorHandle) -> IspResult<&mut ProcessorEntry> {
        self.processors
            .get_mut(handle.slot(), handle.generation())
            .ok_or_else(|| IspError::StaleHandle(handle.to_string()))
    }

    /// Controller entry plus whether its parent processor is enabled.
    pub(crate) fn controller_mut(
        &mut self,
        handle: ControllerHandle,
    ) -> IspResult<(bool, &mut ControllerEntry)> {
        let parent = self.processor_mut(handle.processor())?;
        let parent_enabled = parent.state.is_enabled();
        let entry = parent.controllers[handle.kind().index()]
            .get_mut(handle.slot(), handle.generation())
            .ok_or_else(|| IspError::StaleHandle(handle.to_string()))?;
        Ok((parent_enabled, entry))
    }
}

/// State shared between client threads and the dispatcher.
pub(crate) struct Shared {
    pub(crate) hal: Arc<dyn IspHal>,
    pub(crate) registry: Mutex<Registry>,
    /// Signalled on oneshot completion and when a callback finishes
    pub(crate) wake: Condvar,
    /// Set by the dispatcher thread when it starts
    pub(crate) dispatcher_id: OnceLock<ThreadId>,
}

impl Shared {
    /// True when called from the dispatcher thread (i.e. inside a callback).
    pub(crate) fn on_dispatcher(&self) -> bool {
        self.dispatcher_id.get() == Some(&thread::current().id())
    }
}

/// ISP driver: processor/controller allocation, lifecycle and statistics.
///
/// `IspDriver` is `Send + Sync`; share it between threads with `Arc`.
/// Dropping it stops the dispatcher and shuts the backend down.
pub struct IspDriver {
    shared: Arc<Shared>,
    caps: HardwareConfig,
    dispatcher: Option<JoinHandle<()>>,
}

impl IspDriver {
    /// Create a driver over `hal` with the given capacities.
    ///
    /// # Errors
    /// - `InvalidArg` if `caps` fails validation or declares more processors
    ///   than the backend exposes
    /// - `Hardware` if the backend cannot be attached
    pub fn new(hal: Arc<dyn IspHal>, caps: HardwareConfig) -> IspResult<Self> {
        caps.validate()
            .map_err(|e| IspError::InvalidArg(e.to_string()))?;
        if caps.processors > hal.processor_count() {
            return Err(IspError::InvalidArg(format!(
                "{} processors configured but backend '{}' exposes {}",
                caps.processors,
                hal.name(),
                hal.processor_count()
            )));
        }

        let (tx, rx) = mpsc::channel();
        hal.attach(tx)?;

        let shared = Arc::new(Shared {
            hal,
            registry: Mutex::new(Registry {
                processors: SlotPool::new("processor", caps.processors),
                shutdown: false,
            }),
            wake: Condvar::new(),
            dispatcher_id: OnceLock::new(),
        });
        let dispatcher = spawn_dispatcher(Arc::clone(&shared), rx)?;

        info!(
            "IspDriver created on backend '{}' v{}: {} processors, af={} awb={} ae={} per processor",
            shared.hal.name(),
            shared.hal.version(),
            caps.processors,
            caps.af_controllers,
            caps.awb_controllers,
            caps.ae_controllers
        );

        Ok(Self {
            shared,
            caps,
            dispatcher: Some(dispatcher),
        })
    }

    /// Hardware capacities in use.
    pub fn caps(&self) -> &HardwareConfig {
        &self.caps
    }

    /// Name of the backend.
    pub fn backend_name(&self) -> &'static str {
        self.shared.hal.name()
    }

    // ─── Processors ─────────────────────────────────────────────────

    /// Allocate a processor block.
    ///
    /// # Errors
    /// - `InvalidArg` if `config` fails validation (no slot consumed)
    /// - `Exhausted` if every processor slot is taken
    pub fn new_processor(&self, config: &ProcessorConfig) -> IspResult<ProcessorHandle> {
        validate_processor(config)?;

        let mut reg = self.shared.registry.lock();
        let (slot, _) = reg.processors.next_free()?;
        self.shared.hal.commit_processor(slot, config, false)?;
        let (slot, generation) = reg
            .processors
            .allocate(ProcessorEntry::new(config.clone(), &self.caps))?;
        let handle = ProcessorHandle::new(slot, generation);

        info!(
            "Allocated processor {} ({}x{}, {:?} -> {:?}, {} Hz)",
            handle,
            config.h_res,
            config.v_res,
            config.input_data_color_type,
            config.output_data_color_type,
            config.clk_hz
        );
        Ok(handle)
    }

    /// Delete a processor.
    ///
    /// # Errors
    /// `InvalidState` while enabled, while any controller exists, or while
    /// the CCM block is enabled.
    pub fn del_processor(&self, handle: ProcessorHandle) -> IspResult<()> {
        let mut reg = self.shared.registry.lock();
        let entry = reg.processor_mut(handle)?;
        let event = ProcessorEvent::Delete {
            children: entry.children(),
            ccm_enabled: entry.ccm.enabled,
        };
        entry.state.check(event).or_invalid("delete processor")?;
        reg.processors.free(handle.slot(), handle.generation());
        info!("Deleted processor {}", handle);
        Ok(())
    }

    /// Enable a processor and flush staged CCM and controller configuration.
    ///
    /// If a flush fails the processor enable bit is cleared again and the
    /// processor keeps its previous state.
    pub fn enable_processor(&self, handle: ProcessorHandle) -> IspResult<()> {
        let mut reg = self.shared.registry.lock();
        let entry = reg.processor_mut(handle)?;
        entry
            .state
            .check(ProcessorEvent::Enable)
            .or_invalid("enable processor")?;

        let hal = self.shared.hal.as_ref();
        hal.commit_processor(handle.slot(), &entry.config, true)?;
        if let Err(e) = entry.flush_staged(hal, handle) {
            if let Err(rollback) = hal.commit_processor(handle.slot(), &entry.config, false) {
                warn!("Failed to clear enable bit of {} after flush error: {}", handle, rollback);
            }
            return Err(e);
        }
        let _ = entry.state.handle_event(ProcessorEvent::Enable);
        info!("Enabled processor {}", handle);
        Ok(())
    }

    /// Disable a processor.
    ///
    /// # Errors
    /// `InvalidState` if not enabled or any controller has statistics running.
    pub fn disable_processor(&self, handle: ProcessorHandle) -> IspResult<()> {
        let mut reg = self.shared.registry.lock();
        let entry = reg.processor_mut(handle)?;
        let event = ProcessorEvent::Disable {
            statistics_running: entry.statistics_running(),
        };
        entry.state.check(event).or_invalid("disable processor")?;
        self.shared
            .hal
            .commit_processor(handle.slot(), &entry.config, false)?;
        let _ = entry.state.handle_event(event);
        info!("Disabled processor {}", handle);
        Ok(())
    }

    /// Current processor state, or `Deleted` for a stale handle.
    pub fn processor_state(&self, handle: ProcessorHandle) -> ProcessorState {
        let reg = self.shared.registry.lock();
        reg.processor(handle)
            .map(|p| p.state.state())
            .unwrap_or(ProcessorState::Deleted)
    }

    /// Number of allocated processors.
    pub fn processor_count(&self) -> usize {
        self.shared.registry.lock().processors.len()
    }

    // ─── CCM block ──────────────────────────────────────────────────

    /// Configure the processor's color correction matrix.
    ///
    /// Legal before and after enable. On an enabled processor the matrix is
    /// committed immediately; otherwise it is staged until enable.
    ///
    /// # Errors
    /// `InvalidArg` if a coefficient is out of range with saturation off.
    pub fn ccm_configure(&self, handle: ProcessorHandle, config: &CcmConfig) -> IspResult<()> {
        let matrix = encode_ccm(config)?;

        let mut reg = self.shared.registry.lock();
        let entry = reg.processor_mut(handle)?;
        if entry.state.is_enabled() {
            self.shared
                .hal
                .commit_ccm(handle.slot(), &matrix, entry.ccm.enabled)?;
            entry.ccm.staged = false;
        } else {
            entry.ccm.staged = true;
        }
        entry.ccm.matrix = matrix;
        debug!(
            "CCM on {} {} (saturation={})",
            handle,
            if entry.ccm.staged { "staged" } else { "committed" },
            config.saturation
        );
        Ok(())
    }

    /// Enable the CCM block.
    pub fn ccm_enable(&self, handle: ProcessorHandle) -> IspResult<()> {
        self.set_ccm_enabled(handle, true)
    }

    /// Disable the CCM block.
    pub fn ccm_disable(&self, handle: ProcessorHandle) -> IspResult<()> {
        self.set_ccm_enabled(handle, false)
    }

    fn set_ccm_enabled(&self, handle: ProcessorHandle, enable: bool) -> IspResult<()> {
        let mut reg = self.shared.registry.lock();
        let entry = reg.processor_mut(handle)?;
        if entry.ccm.enabled == enable {
            return Err(IspError::invalid_state(
                if enable { "enable CCM" } else { "disable CCM" },
                if enable { "CCM already enabled" } else { "CCM not enabled" },
            ));
        }
        if entry.state.is_enabled() {
            self.shared
                .hal
                .commit_ccm(handle.slot(), &entry.ccm.matrix, enable)?;
        } else {
            entry.ccm.staged = true;
        }
        entry.ccm.enabled = enable;
        info!("CCM {} on {}", if enable { "enabled" } else { "disabled" }, handle);
        Ok(())
    }

    // ─── Controllers ────────────────────────────────────────────────

    /// Allocate a controller of `config.kind()` on `parent`.
    ///
    /// The configuration is stored and committed when the controller is
    /// enabled.
    ///
    /// # Errors
    /// - `InvalidArg` if `config` fails validation against the parent's image
    /// - `Exhausted` if the kind's pool on `parent` is full
    /// - `InvalidState` (stale handle) if `parent` was deleted
    pub fn new_controller(
        &self,
        parent: ProcessorHandle,
        config: ControllerConfig,
    ) -> IspResult<ControllerHandle> {
        let kind = config.kind();
        let mut reg = self.shared.registry.lock();
        let entry = reg.processor_mut(parent)?;
        validate_controller(&config, &entry.config)?;

        let (slot, generation) = entry.controllers[kind.index()].allocate(ControllerEntry::new(config))?;
        let handle = ControllerHandle::new(parent, kind, slot, generation);
        info!("Allocated {} controller {}", kind, handle);
        Ok(handle)
    }

    /// Delete a controller, returning its slot to the pool.
    ///
    /// # Errors
    /// `InvalidState` unless the controller is `Created` or `Disabled`.
    pub fn del_controller(&self, handle: ControllerHandle) -> IspResult<()> {
        let mut reg = self.shared.registry.lock();
        let (_, entry) = reg.controller_mut(handle)?;
        entry
            .state
            .check(ControllerEvent::Delete)
            .or_invalid("delete controller")?;
        reg.processor_mut(handle.processor())?.controllers[handle.kind().index()]
            .free(handle.slot(), handle.generation());
        info!("Deleted controller {}", handle);
        Ok(())
    }

    /// Enable a controller and commit its configuration.
    ///
    /// # Errors
    /// `InvalidState` unless the parent is enabled and the controller is
    /// `Created` or `Disabled`.
    pub fn enable_controller(&self, handle: ControllerHandle) -> IspResult<()> {
        let mut reg = self.shared.registry.lock();
        let (parent_enabled, entry) = reg.controller_mut(handle)?;
        let event = ControllerEvent::Enable { parent_enabled };
        entry.state.check(event).or_invalid("enable controller")?;
        self.shared.hal.commit_controller(handle, &entry.config, true)?;
        entry.staged = false;
        let _ = entry.state.handle_event(event);
        info!("Enabled controller {}", handle);
        Ok(())
    }

    /// Disable a controller.
    ///
    /// # Errors
    /// `InvalidState` unless the controller is `Enabled` with no statistics
    /// running.
    pub fn disable_controller(&self, handle: ControllerHandle) -> IspResult<()> {
        let mut reg = self.shared.registry.lock();
        let (_, entry) = reg.controller_mut(handle)?;
        entry
            .state
            .check(ControllerEvent::Disable)
            .or_invalid("disable controller")?;
        self.shared.hal.commit_controller(handle, &entry.config, false)?;
        let _ = entry.state.handle_event(ControllerEvent::Disable);
        self.shared.wait_dispatch_idle(&mut reg, handle);
        info!("Disabled controller {}", handle);
        Ok(())
    }

    /// Register (or clear, with `None`) the continuous statistics callback.
    ///
    /// # Errors
    /// `InvalidState` while the controller is enabled.
    pub fn register_callback(
        &self,
        handle: ControllerHandle,
        callback: Option<StatsCallback>,
    ) -> IspResult<()> {
        let mut reg = self.shared.registry.lock();
        let (_, entry) = reg.controller_mut(handle)?;
        if !entry.state.allows_registration() {
            return Err(IspError::invalid_state(
                "register callback",
                "controller enabled",
            ));
        }
        debug!(
            "{} callback on {}",
            if callback.is_some() { "Registered" } else { "Cleared" },
            handle
        );
        entry.callback = callback;
        Ok(())
    }

    /// Replace a controller's configuration.
    ///
    /// Legal in every live state, including while statistics run. If the
    /// parent processor is enabled the new configuration is committed
    /// immediately; otherwise it is staged and flushed on the next enable.
    ///
    /// # Errors
    /// `InvalidArg` if the config is for another kind or fails validation.
    pub fn configure(&self, handle: ControllerHandle, config: ControllerConfig) -> IspResult<()> {
        if config.kind() != handle.kind() {
            return Err(IspError::InvalidArg(format!(
                "{} config given for {} controller {}",
                config.kind(),
                handle.kind(),
                handle
            )));
        }
        let mut reg = self.shared.registry.lock();
        let processor_config = reg.processor(handle.processor())?.config.clone();
        validate_controller(&config, &processor_config)?;

        let (parent_enabled, entry) = reg.controller_mut(handle)?;
        if parent_enabled {
            let enable = entry.state.state().is_enabled();
            self.shared.hal.commit_controller(handle, &config, enable)?;
            entry.staged = false;
            debug!("Committed new configuration to {}", handle);
        } else {
            entry.staged = true;
            debug!("Staged new configuration for {}", handle);
        }
        entry.config = config;
        Ok(())
    }

    /// Current controller state, or `Deleted` for a stale handle.
    pub fn controller_state(&self, handle: ControllerHandle) -> ControllerState {
        let mut reg = self.shared.registry.lock();
        reg.controller_mut(handle)
            .map(|(_, c)| c.state.state())
            .unwrap_or(ControllerState::Deleted)
    }

    /// Number of controllers of `kind` allocated on `parent`.
    pub fn controller_count(&self, parent: ProcessorHandle, kind: ControllerKind) -> IspResult<usize> {
        let reg = self.shared.registry.lock();
        Ok(reg.processor(parent)?.controllers[kind.index()].len())
    }

    // ─── Statistics ─────────────────────────────────────────────────

    /// Start continuous statistics; each result goes to the callback.
    ///
    /// # Errors
    /// `InvalidState` unless the controller is `Enabled` on an enabled parent.
    pub fn start_continuous(&self, handle: ControllerHandle) -> IspResult<()> {
        let mut reg = self.shared.registry.lock();
        let (parent_enabled, entry) = reg.controller_mut(handle)?;
        let event = ControllerEvent::StartContinuous { parent_enabled };
        entry.state.check(event).or_invalid("start continuous statistics")?;
        if entry.callback.is_none() {
            warn!("Continuous statistics on {} without a callback", handle);
        }
        self.shared.arm(&mut reg, handle, StatsMode::Continuous)?;
        let (_, entry) = reg.controller_mut(handle)?;
        let _ = entry.state.handle_event(event);
        info!("Started continuous statistics on {}", handle);
        Ok(())
    }

    /// Stop continuous statistics.
    ///
    /// When this returns no further callback will be invoked for `handle`
    /// (unless called from within that callback, which is already running).
    ///
    /// # Errors
    /// `InvalidState` if continuous statistics are not running.
    pub fn stop_continuous(&self, handle: ControllerHandle) -> IspResult<()> {
        let mut reg = self.shared.registry.lock();
        let (_, entry) = reg.controller_mut(handle)?;
        entry
            .state
            .handle_event(ControllerEvent::StopContinuous)
            .or_invalid("stop continuous statistics")?;
        entry.armed_epoch = None;
        self.shared.hal.disarm(handle);
        self.shared.wait_dispatch_idle(&mut reg, handle);
        info!("Stopped continuous statistics on {}", handle);
        Ok(())
    }

    /// Measure once, blocking up to `timeout` for the result.
    ///
    /// A zero timeout fails with `Timeout` unless a result is already
    /// available. A timeout too large to form a deadline (`Duration::MAX`)
    /// waits until the measurement completes.
    ///
    /// # Errors
    /// - `InvalidState` if continuous statistics are running, a oneshot is
    ///   already pending, the controller/parent is not enabled, or the call
    ///   is made from a statistics callback
    /// - `Timeout` if no measurement completed in time
    pub fn get_oneshot(&self, handle: ControllerHandle, timeout: Duration) -> IspResult<Statistics> {
        // Completions are delivered by the thread that would block here
        if self.shared.on_dispatcher() {
            return Err(IspError::invalid_state(
                "get oneshot statistics",
                "called from a statistics callback",
            ));
        }
        let deadline = Instant::now().checked_add(timeout);
        let mut reg = self.shared.registry.lock();
        let (parent_enabled, entry) = reg.controller_mut(handle)?;
        let event = ControllerEvent::BeginOneshot { parent_enabled };
        entry.state.check(event).or_invalid("get oneshot statistics")?;
        self.shared.arm(&mut reg, handle, StatsMode::Oneshot)?;
        let (_, entry) = reg.controller_mut(handle)?;
        let _ = entry.state.handle_event(event);
        debug!("Oneshot armed on {} (timeout {:?})", handle, timeout);

        let result = self.shared.wait_oneshot(&mut reg, handle, deadline);

        self.shared.hal.disarm(handle);
        if let Ok((_, entry)) = reg.controller_mut(handle) {
            entry.armed_epoch = None;
            entry.oneshot_result = None;
            let _ = entry.state.handle_event(ControllerEvent::EndOneshot);
        }

        match result {
            Some(stats) => {
                debug!("Oneshot result on {}", handle);
                Ok(stats)
            }
            None => {
                debug!("Oneshot on {} timed out after {:?}", handle, timeout);
                Err(IspError::Timeout(timeout))
            }
        }
    }
}

impl Drop for IspDriver {
    fn drop(&mut self) {
        self.shared.registry.lock().shutdown = true;
        self.shared.wake.notify_all();
        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.thread().id() == thread::current().id() {
                // Last handle released inside a callback; the loop exits on return
                debug!("IspDriver dropped on the dispatcher thread");
            } else if dispatcher.join().is_err() {
                warn!("Statistics dispatcher panicked");
            }
        }
        if let Err(e) = self.shared.hal.shutdown() {
            warn!("Backend shutdown failed: {}", e);
        }
        debug!("IspDriver dropped");
    }
}
