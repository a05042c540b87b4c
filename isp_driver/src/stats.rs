//! Statistics acquisition engine.
//!
//! Backends raise [`Completion`]s on an mpsc channel from their interrupt
//! context. A single dispatcher thread drains the channel in order and hands
//! each completion to the controller it was armed for:
//!
//! - **Oneshot**: the payload is parked in the controller entry and the
//!   waiting caller is woken through the shared condvar.
//! - **Continuous**: the registered callback runs on the dispatcher thread
//!   with the registry lock released. A `true` return disarms continuous mode.
//!
//! Completions whose [`ArmToken`] no longer matches the controller's armed
//! epoch (disarmed, re-armed, or slot reused) are dropped.
//!
//! While a callback runs, the controller records the dispatcher's thread id.
//! `stop_continuous` and `disable_controller` wait for that marker to clear,
//! so no callback fires after they return. A callback that calls back into
//! the driver for its own controller skips the wait. A oneshot requested
//! from a callback is rejected, since its result could only be delivered by
//! the thread that would be waiting for it.

use crate::core::{Registry, Shared};
use crate::state::controller::{ControllerEvent, ControllerState};
use isp_common::isp::error::{IspError, IspResult};
use isp_common::isp::hal::{ArmToken, Completion, HalError};
use isp_common::isp::types::{ControllerHandle, Statistics, StatsMode};
use parking_lot::MutexGuard;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Continuous statistics callback.
///
/// Receives the originating controller and the payload. Returning `true`
/// asks the engine to stop continuous statistics for that controller.
/// Client context is whatever the closure captures.
pub type StatsCallback = Box<dyn FnMut(ControllerHandle, &Statistics) -> bool + Send + 'static>;

/// How often the dispatcher re-checks the shutdown flag while idle.
const DISPATCH_POLL: Duration = Duration::from_millis(50);

/// Spawn the dispatcher thread.
pub(crate) fn spawn_dispatcher(
    shared: Arc<Shared>,
    completions: Receiver<Completion>,
) -> IspResult<JoinHandle<()>> {
    thread::Builder::new()
        .name("isp-stats".to_string())
        .spawn(move || dispatch_loop(shared, completions))
        .map_err(|e| IspError::Hardware(HalError::InitFailed(format!("dispatcher thread: {e}"))))
}

fn dispatch_loop(shared: Arc<Shared>, completions: Receiver<Completion>) {
    let _ = shared.dispatcher_id.set(thread::current().id());
    debug!("Statistics dispatcher started");
    let mut delivered: u64 = 0;
    loop {
        if shared.registry.lock().shutdown {
            break;
        }
        match completions.recv_timeout(DISPATCH_POLL) {
            Ok(completion) => {
                if shared.dispatch(completion) {
                    delivered += 1;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Completion channel closed");
                break;
            }
        }
    }
    info!("Statistics dispatcher stopped after {} deliveries", delivered);
}

impl Shared {
    /// Route one completion. Returns true if it reached a consumer.
    fn dispatch(&self, completion: Completion) -> bool {
        let Completion { token, stats } = completion;
        let target = token.target;
        let mut reg = self.registry.lock();

        let Ok((_, entry)) = reg.controller_mut(target) else {
            warn!("Dropping completion for deleted controller {}", target);
            return false;
        };
        if entry.armed_epoch != Some(token.epoch) {
            debug!(
                "Dropping stale completion for {} (epoch {}, armed {:?})",
                target, token.epoch, entry.armed_epoch
            );
            return false;
        }
        if stats.kind() != target.kind() {
            warn!("Dropping {} payload raised for {}", stats.kind(), target);
            return false;
        }

        match entry.state.state() {
            ControllerState::OneshotPending => {
                trace!("Oneshot result for {}", target);
                entry.armed_epoch = None;
                entry.oneshot_result = Some(stats);
                drop(reg);
                self.wake.notify_all();
                true
            }
            ControllerState::Continuous => {
                let Some(mut callback) = entry.callback.take() else {
                    trace!("No callback registered for {}, result dropped", target);
                    return false;
                };
                let me = thread::current().id();
                entry.dispatching = Some(me);
                drop(reg);

                let stop = callback(target, &stats);

                let mut reg = self.registry.lock();
                if let Ok((_, entry)) = reg.controller_mut(target) {
                    if entry.dispatching == Some(me) {
                        entry.dispatching = None;
                    }
                    if entry.callback.is_none() {
                        entry.callback = Some(callback);
                    }
                    if stop && entry.state.state() == ControllerState::Continuous {
                        info!("Callback requested stop of continuous statistics on {}", target);
                        self.hal.disarm(target);
                        entry.armed_epoch = None;
                        let _ = entry.state.handle_event(ControllerEvent::StopContinuous);
                    }
                }
                drop(reg);
                self.wake.notify_all();
                true
            }
            other => {
                debug!("Dropping completion for {} in state {:?}", target, other);
                false
            }
        }
    }

    /// Arm the statistics unit of `target`, returning the token used.
    pub(crate) fn arm(
        &self,
        reg: &mut Registry,
        target: ControllerHandle,
        mode: StatsMode,
    ) -> IspResult<ArmToken> {
        let (_, entry) = reg.controller_mut(target)?;
        let token = ArmToken {
            target,
            epoch: entry.next_epoch,
        };
        self.hal.arm(token, mode)?;
        entry.next_epoch += 1;
        entry.armed_epoch = Some(token.epoch);
        entry.oneshot_result = None;
        Ok(token)
    }

    /// Block until no callback for `target` is running on another thread.
    pub(crate) fn wait_dispatch_idle(
        &self,
        reg: &mut MutexGuard<'_, Registry>,
        target: ControllerHandle,
    ) {
        let me = thread::current().id();
        loop {
            let busy = match reg.controller_mut(target) {
                Ok((_, entry)) => matches!(entry.dispatching, Some(id) if id != me),
                Err(_) => false,
            };
            if !busy {
                return;
            }
            trace!("Waiting for in-flight callback on {}", target);
            self.wake.wait(reg);
        }
    }

    /// Wait for the armed oneshot of `target` to complete or `deadline` to
    /// pass. Without a deadline, waits until the result arrives.
    pub(crate) fn wait_oneshot(
        &self,
        reg: &mut MutexGuard<'_, Registry>,
        target: ControllerHandle,
        deadline: Option<Instant>,
    ) -> Option<Statistics> {
        loop {
            if let Ok((_, entry)) = reg.controller_mut(target) {
                if let Some(stats) = entry.oneshot_result.take() {
                    return Some(stats);
                }
            } else {
                return None;
            }
            let Some(deadline) = deadline else {
                self.wake.wait(reg);
                continue;
            };
            if self.wake.wait_until(reg, deadline).timed_out() {
                return reg
                    .controller_mut(target)
                    .ok()
                    .and_then(|(_, entry)| entry.oneshot_result.take());
            }
        }
    }
}
