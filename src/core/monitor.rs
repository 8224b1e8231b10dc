//! Resource monitor for one running child.
//!
//! Three parties race over the child's lifetime:
//! - the watchdog thread, which fires once at the wall-clock deadline
//! - the poller thread, which samples CPU time and output size
//! - the calling thread, which blocks until the child exits
//!
//! A single atomic state decides the winner. An enforcer may only kill if
//! it moves the state from `Running` to its cause; the reaper moves it to
//! `Exited`. The child is observed with `WNOWAIT` first and reaped only
//! after both threads are joined, so no thread can signal a recycled pid.

use crate::config::types::{JudgeConfig, JudgeError, Result};
use crate::core::types::{KillCause, RawTermination};
use crate::exec::launcher::SpawnedChild;
use crate::kernel::process;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Monitor tuning, fixed per engine
#[derive(Clone, Debug)]
pub struct MonitorSettings {
    /// CPU/output sampling period
    pub poll_interval: Duration,
    /// How long to wait for killed group members after the main process
    pub reap_grace: Duration,
    /// Reap leftover group members (requires a child subreaper)
    pub reap_descendants: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            reap_grace: Duration::from_millis(200),
            reap_descendants: true,
        }
    }
}

/// Limits the monitor polices itself
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchTargets {
    pub max_cpu_time_ms: u64,
    pub max_real_time_ms: u64,
    pub max_output_size: u64,
    /// Distinct stdout/stderr files; `/dev/null` bindings are not listed
    pub output_files: Vec<PathBuf>,
}

impl WatchTargets {
    pub fn from_config(config: &JudgeConfig) -> Self {
        let mut output_files: Vec<PathBuf> = Vec::new();
        for path in [&config.output_path, &config.error_path].into_iter().flatten() {
            if !output_files.contains(path) {
                output_files.push(path.clone());
            }
        }
        Self {
            max_cpu_time_ms: config.max_cpu_time,
            max_real_time_ms: config.max_real_time,
            max_output_size: config.max_output_size,
            output_files,
        }
    }

    fn output_bytes(&self) -> u64 {
        self.output_files
            .iter()
            .filter_map(|path| std::fs::metadata(path).ok())
            .map(|meta| meta.len())
            .sum()
    }
}

const RUNNING: u8 = 0;
const EXITED: u8 = 1;
const KILLED_WALL: u8 = 2;
const KILLED_CPU: u8 = 3;
const KILLED_OUTPUT: u8 = 4;

/// Single-winner termination state shared by the monitor parties
#[derive(Debug, Default)]
pub struct TerminationState(AtomicU8);

impl TerminationState {
    pub fn new() -> Self {
        Self(AtomicU8::new(RUNNING))
    }

    fn encode(cause: KillCause) -> u8 {
        match cause {
            KillCause::WallClock => KILLED_WALL,
            KillCause::CpuTime => KILLED_CPU,
            KillCause::OutputSize => KILLED_OUTPUT,
        }
    }

    fn decode(value: u8) -> Option<KillCause> {
        match value {
            KILLED_WALL => Some(KillCause::WallClock),
            KILLED_CPU => Some(KillCause::CpuTime),
            KILLED_OUTPUT => Some(KillCause::OutputSize),
            _ => None,
        }
    }

    /// Claim the right to kill; false if another party already decided
    pub fn claim_kill(&self, cause: KillCause) -> bool {
        self.0
            .compare_exchange(RUNNING, Self::encode(cause), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Record a natural exit, returning the kill cause if an enforcer won
    pub fn claim_exit(&self) -> Option<KillCause> {
        match self
            .0
            .compare_exchange(RUNNING, EXITED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => None,
            Err(current) => Self::decode(current),
        }
    }
}

fn enforce(pid: libc::pid_t, state: &TerminationState, cause: KillCause) {
    if state.claim_kill(cause) {
        log::info!("killing process group {}: {:?} limit reached", pid, cause);
        process::kill_process_group(pid);
    }
}

fn run_watchdog(
    pid: libc::pid_t,
    deadline: Instant,
    disarm: Receiver<()>,
    state: Arc<TerminationState>,
) {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if let Err(RecvTimeoutError::Timeout) = disarm.recv_timeout(remaining) {
        enforce(pid, &state, KillCause::WallClock);
    }
}

fn run_poller(
    pid: libc::pid_t,
    targets: WatchTargets,
    interval: Duration,
    disarm: Receiver<()>,
    state: Arc<TerminationState>,
) {
    loop {
        match disarm.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            // disarmed or sender dropped
            _ => return,
        }

        if let Some(cpu_ms) = process::cpu_time_ms(pid) {
            if cpu_ms >= targets.max_cpu_time_ms {
                enforce(pid, &state, KillCause::CpuTime);
                return;
            }
        }

        if !targets.output_files.is_empty() && targets.output_bytes() > targets.max_output_size {
            enforce(pid, &state, KillCause::OutputSize);
            return;
        }
    }
}

fn spawn_named<F>(name: &str, body: F) -> std::io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new().name(name.to_string()).spawn(body)
}

/// Kill and reap a child whose monitoring could not start
fn abandon(pid: libc::pid_t, err: std::io::Error) -> JudgeError {
    process::kill_process_group(pid);
    if let Err(reap_err) = process::reap(pid) {
        log::error!("failed to reap abandoned child {}: {}", pid, reap_err);
    }
    JudgeError::Thread(format!("cannot start monitor thread: {}", err))
}

fn join(name: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        log::warn!("{} thread panicked", name);
    }
}

/// Police `child` until it terminates, then reap it and its group.
pub fn supervise(
    child: SpawnedChild,
    targets: &WatchTargets,
    settings: &MonitorSettings,
) -> Result<RawTermination> {
    let pid = child.pid.as_raw();
    let state = Arc::new(TerminationState::new());
    // Dropping the sender disarms both threads at once.
    let (disarm_tx, disarm_rx) = crossbeam_channel::bounded::<()>(0);
    let deadline = child.started + Duration::from_millis(targets.max_real_time_ms);

    let watchdog = {
        let (rx, state) = (disarm_rx.clone(), Arc::clone(&state));
        spawn_named("judge-watchdog", move || run_watchdog(pid, deadline, rx, state))
            .map_err(|e| abandon(pid, e))?
    };

    let poller = {
        let (rx, state) = (disarm_rx, Arc::clone(&state));
        let (targets, interval) = (targets.clone(), settings.poll_interval);
        spawn_named("judge-poller", move || {
            run_poller(pid, targets, interval, rx, state)
        })
    };
    let poller = match poller {
        Ok(handle) => handle,
        Err(e) => {
            drop(disarm_tx);
            join("watchdog", watchdog);
            return Err(abandon(pid, e));
        }
    };

    let exited = process::wait_for_exit(pid);
    let kill_cause = state.claim_exit();
    drop(disarm_tx);
    join("watchdog", watchdog);
    join("poller", poller);

    // The zombie still holds the group id; clear out anything it left behind.
    process::kill_process_group(pid);

    if let Err(e) = exited {
        let _ = process::reap(pid);
        return Err(e);
    }
    let status = process::reap(pid)?;
    let real_time_ms = child.started.elapsed().as_millis() as u64;

    let descendants_reaped = if settings.reap_descendants && process::is_subreaper() {
        process::reap_group_leftovers(pid, settings.reap_grace)
    } else {
        0
    };

    Ok(RawTermination {
        pid: Some(pid),
        exit_code: status.exit_code,
        signal: status.signal,
        cpu_time_ms: status.cpu_time_ms,
        real_time_ms,
        peak_memory_bytes: status.peak_memory_bytes,
        kill_cause,
        failure: None,
        descendants_reaped,
    })
}
