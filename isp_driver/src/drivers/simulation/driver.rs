//! Simulated ISP backend.
//!
//! `SimulatedIsp` implements `IspHal` in software. Register commits are
//! recorded in a write log, and each simulated frame raises a completion
//! for every armed controller whose processor and controller are both
//! enabled. Frames are produced by `trigger_frame()` or, with
//! `auto_frames`, by a background pump thread.

use super::scene::Scene;
use bitflags::bitflags;
use isp_common::config::SimulationConfig;
use isp_common::isp::hal::{ArmToken, Completion, HalError, IspHal};
use isp_common::isp::types::{
    CcmRegisters, ControllerConfig, ControllerHandle, ControllerKind, ProcessorConfig, Statistics,
    StatsMode,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

bitflags! {
    /// Statistics interrupt status raised by one frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IntrStatus: u32 {
        /// AF statistics done
        const AF_DONE = 1 << 0;
        /// AWB statistics done
        const AWB_DONE = 1 << 1;
        /// AE statistics done
        const AE_DONE = 1 << 2;
    }
}

impl IntrStatus {
    /// Done bit of a controller kind.
    pub const fn done(kind: ControllerKind) -> Self {
        match kind {
            ControllerKind::Af => Self::AF_DONE,
            ControllerKind::Awb => Self::AWB_DONE,
            ControllerKind::Ae => Self::AE_DONE,
        }
    }
}

/// One recorded register commit.
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterWrite {
    /// Processor pipeline configuration
    Processor {
        /// Processor slot
        slot: u8,
        /// Enable bit
        enable: bool,
    },
    /// CCM matrix and enable bit
    Ccm {
        /// Processor slot
        slot: u8,
        /// Register image
        matrix: CcmRegisters,
        /// Enable bit
        enable: bool,
    },
    /// Controller configuration
    Controller {
        /// Controller written
        target: ControllerHandle,
        /// Configuration written
        config: ControllerConfig,
        /// Enable bit
        enable: bool,
    },
}

#[derive(Debug, Clone, Default)]
struct ProcessorRegs {
    enabled: bool,
    ccm: Option<CcmRegisters>,
}

#[derive(Debug, Clone)]
struct ControllerRegs {
    config: ControllerConfig,
    enabled: bool,
}

/// Hardware controller unit: processor slot, kind, controller slot.
type UnitKey = (u8, ControllerKind, u8);

fn unit_key(target: ControllerHandle) -> UnitKey {
    (target.processor().slot(), target.kind(), target.slot())
}

struct SimState {
    completions: Option<Sender<Completion>>,
    processors: Vec<ProcessorRegs>,
    controllers: HashMap<UnitKey, ControllerRegs>,
    /// Armed units in arm order
    armed: Vec<(ArmToken, StatsMode)>,
    writes: Vec<RegisterWrite>,
    scene: Scene,
    frames: u64,
}

impl SimState {
    fn processor(&mut self, slot: u8) -> Result<&mut ProcessorRegs, HalError> {
        self.processors
            .get_mut(usize::from(slot))
            .ok_or_else(|| HalError::NoSuchSlot(format!("processor {slot}")))
    }

    fn unit_live(&self, target: ControllerHandle) -> bool {
        let processor = self
            .processors
            .get(usize::from(target.processor().slot()))
            .is_some_and(|p| p.enabled);
        let controller = self
            .controllers
            .get(&unit_key(target))
            .is_some_and(|c| c.enabled);
        processor && controller
    }

    fn measure(&mut self, target: ControllerHandle) -> Option<Statistics> {
        let regs = self.controllers.get(&unit_key(target))?;
        let ccm = self
            .processors
            .get(usize::from(target.processor().slot()))
            .and_then(|p| p.ccm);
        let stats = match &regs.config {
            ControllerConfig::Af(cfg) => Statistics::Af(self.scene.af(cfg)),
            ControllerConfig::Awb(cfg) => Statistics::Awb(self.scene.awb(cfg, ccm.as_ref())),
            ControllerConfig::Ae(cfg) => Statistics::Ae(self.scene.ae(cfg)),
        };
        Some(stats)
    }

    fn frame(&mut self) -> IntrStatus {
        self.frames += 1;
        let mut status = IntrStatus::empty();
        let armed = std::mem::take(&mut self.armed);
        let mut keep = Vec::with_capacity(armed.len());

        for (token, mode) in armed {
            if !self.unit_live(token.target) {
                keep.push((token, mode));
                continue;
            }
            let Some(stats) = self.measure(token.target) else {
                keep.push((token, mode));
                continue;
            };
            status |= IntrStatus::done(token.target.kind());
            if let Some(tx) = &self.completions {
                if tx.send(Completion { token, stats }).is_err() {
                    warn!("Completion receiver gone, dropping result for {}", token.target);
                }
            }
            if mode == StatsMode::Continuous {
                keep.push((token, mode));
            }
        }

        self.armed = keep;
        trace!("Frame {} raised {:?}", self.frames, status);
        status
    }
}

/// Software ISP implementing `IspHal`.
pub struct SimulatedIsp {
    config: SimulationConfig,
    state: Arc<Mutex<SimState>>,
    running: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedIsp {
    /// Create a simulated ISP with `processors` processor blocks.
    pub fn new(processors: usize, config: SimulationConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(SimState {
                completions: None,
                processors: vec![ProcessorRegs::default(); processors],
                controllers: HashMap::new(),
                armed: Vec::new(),
                writes: Vec::new(),
                scene: Scene::new(config.seed),
                frames: 0,
            })),
            running: Arc::new(AtomicBool::new(false)),
            pump: Mutex::new(None),
        }
    }

    /// Simulate one frame, raising completions for armed units.
    pub fn trigger_frame(&self) -> IntrStatus {
        self.state.lock().frame()
    }

    /// Snapshot of every register commit so far.
    pub fn writes(&self) -> Vec<RegisterWrite> {
        self.state.lock().writes.clone()
    }

    /// Number of register commits so far.
    pub fn write_count(&self) -> usize {
        self.state.lock().writes.len()
    }

    /// Frames simulated so far.
    pub fn frames(&self) -> u64 {
        self.state.lock().frames
    }

    /// Number of currently armed units.
    pub fn armed_count(&self) -> usize {
        self.state.lock().armed.len()
    }

    fn start_pump(&self) -> Result<(), HalError> {
        let interval = Duration::from_micros(self.config.frame_interval_us);
        let state = Arc::clone(&self.state);
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("isp-sim-frames".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    state.lock().frame();
                    thread::sleep(interval);
                }
            })
            .map_err(|e| HalError::InitFailed(format!("frame pump: {e}")))?;
        *self.pump.lock() = Some(handle);
        info!("Frame pump started ({:?} per frame)", interval);
        Ok(())
    }
}

impl IspHal for SimulatedIsp {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn processor_count(&self) -> usize {
        self.state.lock().processors.len()
    }

    fn attach(&self, completions: Sender<Completion>) -> Result<(), HalError> {
        {
            let mut state = self.state.lock();
            if state.completions.is_some() {
                return Err(HalError::InitFailed("backend already attached".to_string()));
            }
            state.completions = Some(completions);
        }
        debug!("Simulated ISP attached");
        if self.config.auto_frames {
            self.start_pump()?;
        }
        Ok(())
    }

    fn commit_processor(&self, slot: u8, _config: &ProcessorConfig, enable: bool) -> Result<(), HalError> {
        let mut state = self.state.lock();
        state.processor(slot)?.enabled = enable;
        state.writes.push(RegisterWrite::Processor { slot, enable });
        Ok(())
    }

    fn commit_ccm(&self, slot: u8, matrix: &CcmRegisters, enable: bool) -> Result<(), HalError> {
        let mut state = self.state.lock();
        state.processor(slot)?.ccm = enable.then_some(*matrix);
        state.writes.push(RegisterWrite::Ccm {
            slot,
            matrix: *matrix,
            enable,
        });
        Ok(())
    }

    fn commit_controller(
        &self,
        target: ControllerHandle,
        config: &ControllerConfig,
        enable: bool,
    ) -> Result<(), HalError> {
        let mut state = self.state.lock();
        state.processor(target.processor().slot())?;
        state.controllers.insert(
            unit_key(target),
            ControllerRegs {
                config: config.clone(),
                enabled: enable,
            },
        );
        state.writes.push(RegisterWrite::Controller {
            target,
            config: config.clone(),
            enable,
        });
        Ok(())
    }

    fn arm(&self, token: ArmToken, mode: StatsMode) -> Result<(), HalError> {
        let mut state = self.state.lock();
        state.processor(token.target.processor().slot())?;
        let key = unit_key(token.target);
        state.armed.retain(|(t, _)| unit_key(t.target) != key);
        state.armed.push((token, mode));
        trace!("Armed {} ({:?}, epoch {})", token.target, mode, token.epoch);
        Ok(())
    }

    fn disarm(&self, target: ControllerHandle) {
        let key = unit_key(target);
        self.state
            .lock()
            .armed
            .retain(|(t, _)| unit_key(t.target) != key);
        trace!("Disarmed {}", target);
    }

    fn shutdown(&self) -> Result<(), HalError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.pump.lock().take() {
            handle
                .join()
                .map_err(|_| HalError::CommunicationError("frame pump panicked".to_string()))?;
            info!("Frame pump stopped");
        }
        self.state.lock().completions = None;
        Ok(())
    }
}

impl Drop for SimulatedIsp {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
