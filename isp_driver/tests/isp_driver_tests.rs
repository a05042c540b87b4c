//! Driver integration tests against the simulation backend.
//!
//! Covers pool exhaustion and recovery, lifecycle rejections, stale
//! handles, oneshot and continuous statistics delivery, the no-straggler
//! guarantee, CCM staging, the no-write-on-rejection rule and concurrent
//! allocation.

use isp_common::config::{ConfigLoader, DriverConfig, HardwareConfig, SimulationConfig};
use isp_common::isp::error::{ErrorCode, IspError};
use isp_common::isp::hal::{ArmToken, Completion, HalError, IspHal};
use isp_common::isp::types::{
    AwbConfig, CcmConfig, CcmRegisters, ColorFormat, ControllerConfig, ControllerHandle,
    ControllerKind, Point, ProcessorConfig, ProcessorHandle, Statistics, StatsMode, Window,
};
use isp_driver::drivers::simulation::{IntrStatus, RegisterWrite, SimulatedIsp};
use isp_driver::state::controller::ControllerState;
use isp_driver::state::processor::ProcessorState;
use isp_driver::{BackendRegistry, IspDriver, StatsCallback};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::collections::HashSet;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Barrier, Weak};
use std::thread;
use std::time::{Duration, Instant};

// ─── Helpers ────────────────────────────────────────────────────────

fn setup(caps: HardwareConfig) -> (Arc<SimulatedIsp>, IspDriver) {
    let sim = Arc::new(SimulatedIsp::new(caps.processors, SimulationConfig::default()));
    let hal: Arc<dyn IspHal> = sim.clone();
    let driver = IspDriver::new(hal, caps).expect("driver");
    (sim, driver)
}

fn caps(processors: usize, af: usize, awb: usize, ae: usize) -> HardwareConfig {
    HardwareConfig {
        processors,
        af_controllers: af,
        awb_controllers: awb,
        ae_controllers: ae,
    }
}

fn default_config(kind: ControllerKind) -> ControllerConfig {
    let p = ProcessorConfig::default();
    ControllerConfig::default_for(kind, p.h_res, p.v_res)
}

/// Enabled processor with one enabled controller of `kind`.
fn enabled_controller(driver: &IspDriver, kind: ControllerKind) -> (ProcessorHandle, ControllerHandle) {
    let processor = driver.new_processor(&ProcessorConfig::default()).unwrap();
    driver.enable_processor(processor).unwrap();
    let controller = driver.new_controller(processor, default_config(kind)).unwrap();
    driver.enable_controller(controller).unwrap();
    (processor, controller)
}

fn recorder(log: Arc<Mutex<Vec<Statistics>>>) -> StatsCallback {
    Box::new(move |_: ControllerHandle, stats: &Statistics| {
        log.lock().push(*stats);
        false
    })
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

fn code<T: std::fmt::Debug>(result: Result<T, IspError>) -> ErrorCode {
    result.expect_err("expected an error").code()
}

/// Pumps frames on `sim` every 2 ms until the returned flag is set.
fn frame_pump(sim: &Arc<SimulatedIsp>) -> (Arc<AtomicBool>, thread::JoinHandle<()>) {
    let done = Arc::new(AtomicBool::new(false));
    let pump = {
        let sim = Arc::clone(sim);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                sim.trigger_frame();
                thread::sleep(Duration::from_millis(2));
            }
        })
    };
    (done, pump)
}

/// Simulation backend whose CCM writes always fail.
struct CcmFaultIsp(Arc<SimulatedIsp>);

impl IspHal for CcmFaultIsp {
    fn name(&self) -> &'static str {
        "ccm-fault"
    }

    fn version(&self) -> &'static str {
        self.0.version()
    }

    fn processor_count(&self) -> usize {
        self.0.processor_count()
    }

    fn attach(&self, completions: Sender<Completion>) -> Result<(), HalError> {
        self.0.attach(completions)
    }

    fn commit_processor(&self, slot: u8, config: &ProcessorConfig, enable: bool) -> Result<(), HalError> {
        self.0.commit_processor(slot, config, enable)
    }

    fn commit_ccm(&self, slot: u8, _matrix: &CcmRegisters, _enable: bool) -> Result<(), HalError> {
        Err(HalError::CommunicationError(format!("ccm write on slot {slot} failed")))
    }

    fn commit_controller(
        &self,
        target: ControllerHandle,
        config: &ControllerConfig,
        enable: bool,
    ) -> Result<(), HalError> {
        self.0.commit_controller(target, config, enable)
    }

    fn arm(&self, token: ArmToken, mode: StatsMode) -> Result<(), HalError> {
        self.0.arm(token, mode)
    }

    fn disarm(&self, target: ControllerHandle) {
        self.0.disarm(target)
    }

    fn shutdown(&self) -> Result<(), HalError> {
        self.0.shutdown()
    }
}

// ─── Allocation ─────────────────────────────────────────────────────

#[test]
fn processor_pool_exhausts_and_recovers() {
    for n in 1..=4 {
        let (_sim, driver) = setup(caps(n, 1, 1, 1));
        let handles: Vec<_> = (0..n)
            .map(|_| driver.new_processor(&ProcessorConfig::default()).unwrap())
            .collect();
        assert_eq!(code(driver.new_processor(&ProcessorConfig::default())), ErrorCode::Exhausted);

        driver.del_processor(handles[0]).unwrap();
        driver.new_processor(&ProcessorConfig::default()).unwrap();
        assert_eq!(code(driver.new_processor(&ProcessorConfig::default())), ErrorCode::Exhausted);

        for h in handles.into_iter().skip(1) {
            driver.del_processor(h).unwrap();
        }
        assert_eq!(driver.processor_count(), 1);
    }
}

#[test]
fn all_processors_freed_pool_fully_reusable() {
    let (_sim, driver) = setup(caps(3, 1, 1, 1));
    for _ in 0..3 {
        let handles: Vec<_> = (0..3)
            .map(|_| driver.new_processor(&ProcessorConfig::default()).unwrap())
            .collect();
        assert!(driver.new_processor(&ProcessorConfig::default()).is_err());
        for h in handles {
            driver.del_processor(h).unwrap();
        }
    }
    assert_eq!(driver.processor_count(), 0);
}

#[test]
fn controller_pools_exhaust_independently_per_kind() {
    let (_sim, driver) = setup(caps(1, 2, 3, 1));
    let processor = driver.new_processor(&ProcessorConfig::default()).unwrap();
    driver.enable_processor(processor).unwrap();

    for kind in ControllerKind::ALL {
        let capacity = driver.caps().capacity(kind);
        let handles: Vec<_> = (0..capacity)
            .map(|_| driver.new_controller(processor, default_config(kind)).unwrap())
            .collect();
        assert_eq!(
            code(driver.new_controller(processor, default_config(kind))),
            ErrorCode::Exhausted,
            "{kind}"
        );
        assert_eq!(driver.controller_count(processor, kind).unwrap(), capacity);

        driver.del_controller(handles[0]).unwrap();
        driver.new_controller(processor, default_config(kind)).unwrap();
    }

    // Filling every pool left each one full, not more
    assert_eq!(driver.controller_count(processor, ControllerKind::Af).unwrap(), 2);
    assert_eq!(driver.controller_count(processor, ControllerKind::Awb).unwrap(), 3);
    assert_eq!(driver.controller_count(processor, ControllerKind::Ae).unwrap(), 1);
}

#[test]
fn af_pool_exhausted_on_default_hardware() {
    let (_sim, driver) = setup(HardwareConfig::default());
    let processor = driver.new_processor(&ProcessorConfig::default()).unwrap();
    driver.new_controller(processor, default_config(ControllerKind::Af)).unwrap();
    assert_eq!(
        code(driver.new_controller(processor, default_config(ControllerKind::Af))),
        ErrorCode::Exhausted
    );
}

#[test]
fn backend_with_fewer_processors_rejected() {
    let sim: Arc<dyn IspHal> = Arc::new(SimulatedIsp::new(1, SimulationConfig::default()));
    let result = IspDriver::new(sim, caps(2, 1, 1, 1));
    assert!(matches!(result, Err(IspError::InvalidArg(_))));
}

#[test]
fn stale_handles_rejected_after_slot_reuse() {
    let (_sim, driver) = setup(HardwareConfig::default());
    let old = driver.new_processor(&ProcessorConfig::default()).unwrap();
    driver.del_processor(old).unwrap();
    let new = driver.new_processor(&ProcessorConfig::default()).unwrap();
    assert_eq!(old.slot(), new.slot());
    assert_ne!(old, new);

    assert!(matches!(driver.enable_processor(old), Err(IspError::StaleHandle(_))));
    assert_eq!(code(driver.del_processor(old)), ErrorCode::InvalidState);
    assert_eq!(driver.processor_state(old), ProcessorState::Deleted);
    assert_eq!(driver.processor_state(new), ProcessorState::Configured);

    let c_old = driver.new_controller(new, default_config(ControllerKind::Awb)).unwrap();
    driver.del_controller(c_old).unwrap();
    let c_new = driver.new_controller(new, default_config(ControllerKind::Awb)).unwrap();
    assert_eq!(code(driver.enable_controller(c_old)), ErrorCode::InvalidState);
    assert_eq!(driver.controller_state(c_old), ControllerState::Deleted);
    assert_eq!(driver.controller_state(c_new), ControllerState::Created);
}

// ─── Lifecycle ──────────────────────────────────────────────────────

#[test]
fn processor_delete_rules() {
    let (_sim, driver) = setup(HardwareConfig::default());
    let processor = driver.new_processor(&ProcessorConfig::default()).unwrap();
    driver.enable_processor(processor).unwrap();
    assert_eq!(code(driver.del_processor(processor)), ErrorCode::InvalidState);
    assert_eq!(code(driver.enable_processor(processor)), ErrorCode::InvalidState);

    driver.disable_processor(processor).unwrap();
    let controller = driver.new_controller(processor, default_config(ControllerKind::Ae)).unwrap();
    assert_eq!(code(driver.del_processor(processor)), ErrorCode::InvalidState);

    driver.del_controller(controller).unwrap();
    driver.ccm_enable(processor).unwrap();
    assert_eq!(code(driver.del_processor(processor)), ErrorCode::InvalidState);
    driver.ccm_disable(processor).unwrap();

    driver.del_processor(processor).unwrap();
}

#[test]
fn processor_reenable_after_disable() {
    let (_sim, driver) = setup(HardwareConfig::default());
    let processor = driver.new_processor(&ProcessorConfig::default()).unwrap();
    assert_eq!(code(driver.disable_processor(processor)), ErrorCode::InvalidState);
    for _ in 0..3 {
        driver.enable_processor(processor).unwrap();
        assert_eq!(driver.processor_state(processor), ProcessorState::Enabled);
        driver.disable_processor(processor).unwrap();
        assert_eq!(driver.processor_state(processor), ProcessorState::Disabled);
    }
}

#[test]
fn controller_enable_requires_enabled_parent() {
    let (_sim, driver) = setup(HardwareConfig::default());
    let processor = driver.new_processor(&ProcessorConfig::default()).unwrap();
    let controller = driver.new_controller(processor, default_config(ControllerKind::Af)).unwrap();
    assert_eq!(code(driver.enable_controller(controller)), ErrorCode::InvalidState);

    driver.enable_processor(processor).unwrap();
    driver.enable_controller(controller).unwrap();
    assert_eq!(code(driver.enable_controller(controller)), ErrorCode::InvalidState);
    assert_eq!(code(driver.del_controller(controller)), ErrorCode::InvalidState);
}

#[test]
fn running_statistics_block_disable_and_delete() {
    let (_sim, driver) = setup(HardwareConfig::default());
    let (processor, awb) = enabled_controller(&driver, ControllerKind::Awb);
    driver.start_continuous(awb).unwrap();

    assert_eq!(code(driver.disable_controller(awb)), ErrorCode::InvalidState);
    assert_eq!(code(driver.del_controller(awb)), ErrorCode::InvalidState);
    assert_eq!(code(driver.disable_processor(processor)), ErrorCode::InvalidState);
    assert_eq!(code(driver.start_continuous(awb)), ErrorCode::InvalidState);
    assert_eq!(driver.processor_state(processor), ProcessorState::Enabled);

    driver.stop_continuous(awb).unwrap();
    assert_eq!(code(driver.stop_continuous(awb)), ErrorCode::InvalidState);
    driver.disable_controller(awb).unwrap();
    driver.disable_processor(processor).unwrap();
}

#[test]
fn callback_registration_only_while_not_enabled() {
    let (_sim, driver) = setup(HardwareConfig::default());
    let processor = driver.new_processor(&ProcessorConfig::default()).unwrap();
    driver.enable_processor(processor).unwrap();
    let awb = driver.new_controller(processor, default_config(ControllerKind::Awb)).unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    driver.register_callback(awb, Some(recorder(Arc::clone(&log)))).unwrap();
    driver.register_callback(awb, None).unwrap();

    driver.enable_controller(awb).unwrap();
    assert_eq!(
        code(driver.register_callback(awb, Some(recorder(log)))),
        ErrorCode::InvalidState
    );
}

// ─── Statistics ─────────────────────────────────────────────────────

#[test]
fn awb_continuous_then_oneshot_scenario() {
    let (_sim, driver) = setup(HardwareConfig::default());
    let processor = driver.new_processor(&ProcessorConfig::default()).unwrap();
    driver.enable_processor(processor).unwrap();
    let awb = driver.new_controller(processor, default_config(ControllerKind::Awb)).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    driver.register_callback(awb, Some(recorder(log))).unwrap();
    driver.enable_controller(awb).unwrap();
    driver.start_continuous(awb).unwrap();

    for timeout in [Duration::ZERO, Duration::from_millis(10), Duration::from_secs(10)] {
        assert_eq!(code(driver.get_oneshot(awb, timeout)), ErrorCode::InvalidState);
    }

    driver.stop_continuous(awb).unwrap();
    assert!(matches!(
        driver.get_oneshot(awb, Duration::from_millis(20)),
        Err(IspError::Timeout(_))
    ));
    assert_eq!(driver.controller_state(awb), ControllerState::Enabled);

    driver.disable_controller(awb).unwrap();
    driver.del_controller(awb).unwrap();
    driver.disable_processor(processor).unwrap();
    driver.del_processor(processor).unwrap();
}

#[test]
fn zero_timeout_oneshot_on_fresh_controller_times_out() {
    let (sim, driver) = setup(HardwareConfig::default());
    let (_, ae) = enabled_controller(&driver, ControllerKind::Ae);
    assert_eq!(code(driver.get_oneshot(ae, Duration::ZERO)), ErrorCode::Timeout);
    assert_eq!(driver.controller_state(ae), ControllerState::Enabled);
    assert_eq!(sim.armed_count(), 0);
}

#[test]
fn oneshot_returns_measurement() {
    let (sim, driver) = setup(HardwareConfig::default());
    let (_, ae) = enabled_controller(&driver, ControllerKind::Ae);

    let (done, pump) = frame_pump(&sim);
    let result = driver.get_oneshot(ae, Duration::from_secs(5));
    done.store(true, Ordering::SeqCst);
    pump.join().unwrap();

    match result {
        Ok(Statistics::Ae(stats)) => assert!(stats.luminance[0][0] > 0),
        other => panic!("unexpected oneshot result: {other:?}"),
    }
    assert_eq!(driver.controller_state(ae), ControllerState::Enabled);
    assert_eq!(sim.armed_count(), 0);
}

#[test]
fn oneshot_unbounded_timeout_returns_measurement() {
    let (sim, driver) = setup(HardwareConfig::default());
    let (_, ae) = enabled_controller(&driver, ControllerKind::Ae);

    let (done, pump) = frame_pump(&sim);
    let result = driver.get_oneshot(ae, Duration::MAX);
    done.store(true, Ordering::SeqCst);
    pump.join().unwrap();

    assert!(matches!(result, Ok(Statistics::Ae(_))), "unexpected oneshot result: {result:?}");
    assert_eq!(driver.controller_state(ae), ControllerState::Enabled);
    assert_eq!(sim.armed_count(), 0);
}

#[test]
fn oneshot_from_callback_is_rejected() {
    let (sim, driver) = setup(HardwareConfig::default());
    let driver = Arc::new(driver);
    let processor = driver.new_processor(&ProcessorConfig::default()).unwrap();
    driver.enable_processor(processor).unwrap();
    let awb = driver.new_controller(processor, default_config(ControllerKind::Awb)).unwrap();
    let ae = driver.new_controller(processor, default_config(ControllerKind::Ae)).unwrap();
    driver.enable_controller(ae).unwrap();

    let outcome: Arc<Mutex<Option<(Option<ErrorCode>, Duration)>>> = Arc::new(Mutex::new(None));
    {
        let weak: Weak<IspDriver> = Arc::downgrade(&driver);
        let outcome = Arc::clone(&outcome);
        driver
            .register_callback(
                awb,
                Some(Box::new(move |_: ControllerHandle, _: &Statistics| {
                    if let Some(driver) = weak.upgrade() {
                        let started = Instant::now();
                        let code = driver.get_oneshot(ae, Duration::from_secs(5)).err().map(|e| e.code());
                        *outcome.lock() = Some((code, started.elapsed()));
                    }
                    true
                })),
            )
            .unwrap();
    }
    driver.enable_controller(awb).unwrap();
    driver.start_continuous(awb).unwrap();

    sim.trigger_frame();
    assert!(wait_for(|| outcome.lock().is_some()));
    let (code, elapsed) = outcome.lock().take().unwrap();
    assert_eq!(code, Some(ErrorCode::InvalidState));
    assert!(elapsed < Duration::from_secs(1));

    // The rejected request left AE untouched
    assert!(wait_for(|| driver.controller_state(awb) == ControllerState::Enabled));
    assert_eq!(driver.controller_state(ae), ControllerState::Enabled);
    assert_eq!(sim.armed_count(), 0);
}

#[test]
fn continuous_delivery_preserves_hardware_order() {
    let (sim, driver) = setup(HardwareConfig::default());
    let processor = driver.new_processor(&ProcessorConfig::default()).unwrap();
    driver.enable_processor(processor).unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for kind in [ControllerKind::Awb, ControllerKind::Ae] {
        let handle = driver.new_controller(processor, default_config(kind)).unwrap();
        let order = Arc::clone(&order);
        driver
            .register_callback(
                handle,
                Some(Box::new(move |from: ControllerHandle, stats: &Statistics| {
                    assert_eq!(from.kind(), stats.kind());
                    order.lock().push(from.kind());
                    false
                })),
            )
            .unwrap();
        driver.enable_controller(handle).unwrap();
        handles.push(handle);
    }
    for &handle in &handles {
        driver.start_continuous(handle).unwrap();
    }

    for _ in 0..10 {
        assert_eq!(sim.trigger_frame(), IntrStatus::AWB_DONE | IntrStatus::AE_DONE);
    }
    assert!(wait_for(|| order.lock().len() == 20));

    let expected: Vec<_> = (0..10)
        .flat_map(|_| [ControllerKind::Awb, ControllerKind::Ae])
        .collect();
    assert_eq!(*order.lock(), expected);

    for handle in handles {
        driver.stop_continuous(handle).unwrap();
    }
}

#[test]
fn callback_true_stops_continuous() {
    let (sim, driver) = setup(HardwareConfig::default());
    let processor = driver.new_processor(&ProcessorConfig::default()).unwrap();
    driver.enable_processor(processor).unwrap();
    let awb = driver.new_controller(processor, default_config(ControllerKind::Awb)).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = Arc::clone(&calls);
        driver
            .register_callback(
                awb,
                Some(Box::new(move |_: ControllerHandle, _: &Statistics| {
                    calls.fetch_add(1, Ordering::SeqCst) + 1 >= 3
                })),
            )
            .unwrap();
    }
    driver.enable_controller(awb).unwrap();
    driver.start_continuous(awb).unwrap();

    for _ in 0..6 {
        sim.trigger_frame();
    }
    assert!(wait_for(|| driver.controller_state(awb) == ControllerState::Enabled));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(sim.armed_count(), 0);

    // Oneshot is legal again once auto-stopped
    assert_eq!(code(driver.get_oneshot(awb, Duration::ZERO)), ErrorCode::Timeout);
}

#[test]
fn no_callback_after_stop_returns() {
    let (sim, driver) = setup(HardwareConfig::default());
    let processor = driver.new_processor(&ProcessorConfig::default()).unwrap();
    driver.enable_processor(processor).unwrap();
    let awb = driver.new_controller(processor, default_config(ControllerKind::Awb)).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let entered = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    {
        let (calls, entered, finished) = (Arc::clone(&calls), Arc::clone(&entered), Arc::clone(&finished));
        driver
            .register_callback(
                awb,
                Some(Box::new(move |_: ControllerHandle, _: &Statistics| {
                    entered.store(true, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(50));
                    calls.fetch_add(1, Ordering::SeqCst);
                    finished.store(true, Ordering::SeqCst);
                    false
                })),
            )
            .unwrap();
    }
    driver.enable_controller(awb).unwrap();
    driver.start_continuous(awb).unwrap();

    sim.trigger_frame();
    sim.trigger_frame();
    assert!(wait_for(|| entered.load(Ordering::SeqCst)));

    driver.stop_continuous(awb).unwrap();
    assert!(finished.load(Ordering::SeqCst));
    let after_stop = calls.load(Ordering::SeqCst);

    sim.trigger_frame();
    thread::sleep(Duration::from_millis(150));
    assert_eq!(calls.load(Ordering::SeqCst), after_stop);

    driver.disable_controller(awb).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(calls.load(Ordering::SeqCst), after_stop);
}

#[test]
fn stop_from_inside_callback_does_not_deadlock() {
    let (sim, driver) = setup(HardwareConfig::default());
    let driver = Arc::new(driver);
    let processor = driver.new_processor(&ProcessorConfig::default()).unwrap();
    driver.enable_processor(processor).unwrap();
    let awb = driver.new_controller(processor, default_config(ControllerKind::Awb)).unwrap();

    let stopped = Arc::new(AtomicBool::new(false));
    {
        let weak: Weak<IspDriver> = Arc::downgrade(&driver);
        let stopped = Arc::clone(&stopped);
        driver
            .register_callback(
                awb,
                Some(Box::new(move |from: ControllerHandle, _: &Statistics| {
                    if let Some(driver) = weak.upgrade() {
                        if driver.stop_continuous(from).is_ok() {
                            stopped.store(true, Ordering::SeqCst);
                        }
                    }
                    false
                })),
            )
            .unwrap();
    }
    driver.enable_controller(awb).unwrap();
    driver.start_continuous(awb).unwrap();

    sim.trigger_frame();
    assert!(wait_for(|| stopped.load(Ordering::SeqCst)));
    assert!(wait_for(|| driver.controller_state(awb) == ControllerState::Enabled));
    driver.disable_controller(awb).unwrap();
}

#[test]
fn disabled_parent_blocks_statistics() {
    let (sim, driver) = setup(HardwareConfig::default());
    let (processor, af) = enabled_controller(&driver, ControllerKind::Af);
    driver.disable_processor(processor).unwrap();
    assert_eq!(code(driver.start_continuous(af)), ErrorCode::InvalidState);
    assert_eq!(code(driver.get_oneshot(af, Duration::ZERO)), ErrorCode::InvalidState);
    assert_eq!(sim.trigger_frame(), IntrStatus::empty());
}

// ─── Configuration commit ───────────────────────────────────────────

#[test]
fn rejected_configs_write_no_registers() {
    let (sim, driver) = setup(HardwareConfig::default());

    let mut bad = ProcessorConfig::default();
    bad.input_data_color_type = ColorFormat::Rgb565;
    assert_eq!(code(driver.new_processor(&bad)), ErrorCode::InvalidArg);
    assert_eq!(sim.write_count(), 0);
    assert_eq!(driver.processor_count(), 0);

    let processor = driver.new_processor(&ProcessorConfig::default()).unwrap();
    let writes = sim.write_count();

    let mut awb = AwbConfig::for_resolution(800, 600);
    awb.window = Window {
        top_left: Point { x: 0, y: 0 },
        btm_right: Point { x: 900, y: 10 },
    };
    assert_eq!(
        code(driver.new_controller(processor, ControllerConfig::Awb(awb))),
        ErrorCode::InvalidArg
    );
    assert_eq!(driver.controller_count(processor, ControllerKind::Awb).unwrap(), 0);

    let ccm = CcmConfig {
        matrix: [[4.5, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        saturation: false,
    };
    driver.enable_processor(processor).unwrap();
    let writes_enabled = sim.write_count();
    assert_eq!(writes_enabled, writes + 1);
    assert_eq!(code(driver.ccm_configure(processor, &ccm)), ErrorCode::InvalidArg);
    assert_eq!(sim.write_count(), writes_enabled);
}

#[test]
fn ccm_saturation_widens_range() {
    let (_sim, driver) = setup(HardwareConfig::default());
    let processor = driver.new_processor(&ProcessorConfig::default()).unwrap();
    let mut ccm = CcmConfig {
        matrix: [[-5.0, 0.0, 0.0], [0.0, 7.5, 0.0], [0.0, 0.0, 1.0]],
        saturation: false,
    };
    assert_eq!(code(driver.ccm_configure(processor, &ccm)), ErrorCode::InvalidArg);
    ccm.saturation = true;
    driver.ccm_configure(processor, &ccm).unwrap();
}

#[test]
fn ccm_staged_until_enable_then_live() {
    let (sim, driver) = setup(HardwareConfig::default());
    let processor = driver.new_processor(&ProcessorConfig::default()).unwrap();
    let ccm = CcmConfig {
        matrix: [[1.2, -0.1, -0.1], [-0.2, 1.4, -0.2], [0.0, -0.5, 1.5]],
        saturation: false,
    };
    driver.ccm_configure(processor, &ccm).unwrap();
    driver.ccm_enable(processor).unwrap();
    assert_eq!(code(driver.ccm_enable(processor)), ErrorCode::InvalidState);
    let ccm_writes = |sim: &SimulatedIsp| {
        sim.writes()
            .into_iter()
            .filter(|w| matches!(w, RegisterWrite::Ccm { .. }))
            .count()
    };
    assert_eq!(ccm_writes(&sim), 0);

    driver.enable_processor(processor).unwrap();
    assert_eq!(ccm_writes(&sim), 1);
    assert!(matches!(
        sim.writes().last(),
        Some(RegisterWrite::Ccm { enable: true, .. })
    ));

    // Live reconfiguration, no disable/enable cycle
    driver.ccm_configure(processor, &CcmConfig::default()).unwrap();
    assert_eq!(ccm_writes(&sim), 2);
    assert_eq!(driver.processor_state(processor), ProcessorState::Enabled);

    driver.ccm_disable(processor).unwrap();
    assert_eq!(code(driver.ccm_disable(processor)), ErrorCode::InvalidState);
    assert!(matches!(
        sim.writes().last(),
        Some(RegisterWrite::Ccm { enable: false, .. })
    ));
}

#[test]
fn live_reconfigure_reaches_running_statistics() {
    let (sim, driver) = setup(HardwareConfig::default());
    let processor = driver.new_processor(&ProcessorConfig::default()).unwrap();
    driver.enable_processor(processor).unwrap();
    let awb = driver.new_controller(processor, default_config(ControllerKind::Awb)).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    driver.register_callback(awb, Some(recorder(Arc::clone(&log)))).unwrap();
    driver.enable_controller(awb).unwrap();
    driver.start_continuous(awb).unwrap();

    sim.trigger_frame();
    assert!(wait_for(|| log.lock().len() == 1));

    let mut strict = AwbConfig::for_resolution(800, 600);
    strict.white_patch.luminance.max = 10;
    driver.configure(awb, ControllerConfig::Awb(strict.clone())).unwrap();
    assert!(matches!(
        sim.writes().last(),
        Some(RegisterWrite::Controller { config, enable: true, .. }) if *config == ControllerConfig::Awb(strict.clone())
    ));

    sim.trigger_frame();
    assert!(wait_for(|| log.lock().len() == 2));
    let log = log.lock();
    match (&log[0], &log[1]) {
        (Statistics::Awb(before), Statistics::Awb(after)) => {
            assert!(before.white_patch_num > 0);
            assert_eq!(after.white_patch_num, 0);
        }
        other => panic!("unexpected payloads: {other:?}"),
    }
    drop(log);
    driver.stop_continuous(awb).unwrap();
}

#[test]
fn configure_rejects_wrong_kind() {
    let (_sim, driver) = setup(HardwareConfig::default());
    let processor = driver.new_processor(&ProcessorConfig::default()).unwrap();
    let af = driver.new_controller(processor, default_config(ControllerKind::Af)).unwrap();
    assert_eq!(
        code(driver.configure(af, default_config(ControllerKind::Ae))),
        ErrorCode::InvalidArg
    );
}

#[test]
fn configure_on_disabled_parent_is_flushed_on_enable() {
    let (sim, driver) = setup(HardwareConfig::default());
    let (processor, ae) = enabled_controller(&driver, ControllerKind::Ae);
    driver.disable_processor(processor).unwrap();

    let writes = sim.write_count();
    driver.configure(ae, default_config(ControllerKind::Ae)).unwrap();
    assert_eq!(sim.write_count(), writes);

    driver.enable_processor(processor).unwrap();
    assert!(matches!(
        sim.writes().last(),
        Some(RegisterWrite::Controller { target, enable: true, .. }) if *target == ae
    ));
}

#[test]
fn failed_flush_rolls_back_processor_enable() {
    let sim = Arc::new(SimulatedIsp::new(1, SimulationConfig::default()));
    let hal: Arc<dyn IspHal> = Arc::new(CcmFaultIsp(Arc::clone(&sim)));
    let driver = IspDriver::new(hal, HardwareConfig::default()).unwrap();

    let processor = driver.new_processor(&ProcessorConfig::default()).unwrap();
    driver.ccm_configure(processor, &CcmConfig::default()).unwrap();

    let err = driver.enable_processor(processor).unwrap_err();
    assert!(matches!(err, IspError::Hardware(HalError::CommunicationError(_))));
    assert_eq!(driver.processor_state(processor), ProcessorState::Configured);

    let writes = sim.writes();
    let n = writes.len();
    assert!(n >= 2);
    assert!(matches!(
        writes[n - 2],
        RegisterWrite::Processor { slot, enable: true } if slot == processor.slot()
    ));
    assert!(matches!(
        writes[n - 1],
        RegisterWrite::Processor { slot, enable: false } if slot == processor.slot()
    ));

    // Still deletable: nothing was left half-enabled
    driver.del_processor(processor).unwrap();
}

// ─── Concurrency ────────────────────────────────────────────────────

#[test]
fn concurrent_allocation_never_shares_a_slot() {
    const THREADS: usize = 16;
    let (_sim, driver) = setup(caps(8, 8, 1, 1));
    let driver = Arc::new(driver);

    let barrier = Arc::new(Barrier::new(THREADS));
    let results: Vec<_> = (0..THREADS)
        .map(|_| {
            let driver = Arc::clone(&driver);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                driver.new_processor(&ProcessorConfig::default())
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|t| t.join().unwrap())
        .collect();

    let processors: Vec<ProcessorHandle> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
    assert_eq!(processors.len(), 8);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.code() == ErrorCode::Exhausted)
    );
    let slots: HashSet<u8> = processors.iter().map(|p| p.slot()).collect();
    assert_eq!(slots.len(), 8);
    assert_eq!(driver.processor_count(), 8);

    let parent = processors[0];
    let barrier = Arc::new(Barrier::new(THREADS));
    let results: Vec<_> = (0..THREADS)
        .map(|_| {
            let driver = Arc::clone(&driver);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                driver.new_controller(parent, default_config(ControllerKind::Af))
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|t| t.join().unwrap())
        .collect();

    let controllers: HashSet<ControllerHandle> =
        results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
    assert_eq!(controllers.len(), 8);
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 8);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.code() == ErrorCode::Exhausted)
    );
    let slots: HashSet<u8> = controllers.iter().map(|c| c.slot()).collect();
    assert_eq!(slots.len(), 8);
    assert_eq!(driver.controller_count(parent, ControllerKind::Af).unwrap(), 8);
}

#[test]
fn delete_racing_controller_creation_never_orphans() {
    let (_sim, driver) = setup(HardwareConfig::default());
    let driver = Arc::new(driver);

    for _ in 0..200 {
        let processor = driver.new_processor(&ProcessorConfig::default()).unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let creator = {
            let driver = Arc::clone(&driver);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                driver.new_controller(processor, default_config(ControllerKind::Awb))
            })
        };
        barrier.wait();
        let deleted = driver.del_processor(processor);
        let created = creator.join().unwrap();

        match (deleted, created) {
            (Ok(()), Err(e)) => {
                assert_eq!(e.code(), ErrorCode::InvalidState);
                assert_eq!(driver.processor_state(processor), ProcessorState::Deleted);
            }
            (Err(e), Ok(awb)) => {
                assert_eq!(e.code(), ErrorCode::InvalidState);
                assert_eq!(driver.controller_count(processor, ControllerKind::Awb).unwrap(), 1);
                driver.del_controller(awb).unwrap();
                driver.del_processor(processor).unwrap();
            }
            other => panic!("inconsistent outcome: {other:?}"),
        }
        assert_eq!(driver.processor_count(), 0);
    }
}

// ─── Backends and shutdown ──────────────────────────────────────────

#[test]
fn builtin_registry_builds_configured_simulation() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("driver.toml");
    std::fs::write(
        &path,
        r#"
[hardware]
processors = 2
awb_controllers = 2
"#,
    )
    .unwrap();
    let config = DriverConfig::load(&path).unwrap();

    let hal = BackendRegistry::with_builtin()
        .create_backend(&config.backend, &config)
        .unwrap();
    assert_eq!(hal.processor_count(), 2);

    let driver = IspDriver::new(hal, config.hardware).unwrap();
    let a = driver.new_processor(&config.processor).unwrap();
    let b = driver.new_processor(&config.processor).unwrap();
    assert_ne!(a.slot(), b.slot());
}

#[test]
fn dropping_driver_detaches_backend() {
    let sim = Arc::new(SimulatedIsp::new(1, SimulationConfig::default()));
    for _ in 0..2 {
        let hal: Arc<dyn IspHal> = sim.clone();
        let driver = IspDriver::new(hal, HardwareConfig::default()).unwrap();
        let (_, ae) = enabled_controller(&driver, ControllerKind::Ae);
        driver.start_continuous(ae).unwrap();
        sim.trigger_frame();
    }
}

#[test]
fn last_handle_dropped_inside_callback() {
    let sim = Arc::new(SimulatedIsp::new(1, SimulationConfig::default()));
    let hal: Arc<dyn IspHal> = sim.clone();
    let driver = Arc::new(IspDriver::new(hal, HardwareConfig::default()).unwrap());
    let (_, awb) = enabled_controller(&driver, ControllerKind::Awb);
    driver.disable_controller(awb).unwrap();

    let entered = Arc::new(AtomicBool::new(false));
    let released = Arc::new(AtomicBool::new(false));
    let dropped = Arc::new(AtomicBool::new(false));
    {
        let weak: Weak<IspDriver> = Arc::downgrade(&driver);
        let entered = Arc::clone(&entered);
        let released = Arc::clone(&released);
        let dropped = Arc::clone(&dropped);
        driver
            .register_callback(
                awb,
                Some(Box::new(move |_: ControllerHandle, _: &Statistics| {
                    let Some(driver) = weak.upgrade() else {
                        return true;
                    };
                    entered.store(true, Ordering::SeqCst);
                    wait_for(|| released.load(Ordering::SeqCst));
                    drop(driver);
                    dropped.store(true, Ordering::SeqCst);
                    true
                })),
            )
            .unwrap();
    }
    driver.enable_controller(awb).unwrap();
    driver.start_continuous(awb).unwrap();

    sim.trigger_frame();
    assert!(wait_for(|| entered.load(Ordering::SeqCst)));
    drop(driver);
    released.store(true, Ordering::SeqCst);
    assert!(wait_for(|| dropped.load(Ordering::SeqCst)));

    // Backend was shut down and can be attached again
    let hal: Arc<dyn IspHal> = sim.clone();
    assert!(wait_for(|| IspDriver::new(Arc::clone(&hal), HardwareConfig::default()).is_ok()));
}
