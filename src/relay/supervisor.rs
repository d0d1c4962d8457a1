//! Lifecycle owner for the external relay process.
//!
//! `Starting -> Running -> Exited(code)`. A zero exit stops the loop, any
//! other exit waits out the backoff and starts again with no restart cap.
//! A shutdown message moves any state to `Terminating`: SIGTERM, wait up to
//! the grace period, then kill.

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub binary: PathBuf,
    /// Passed to the binary as its only argument.
    pub config_path: PathBuf,
    pub backoff: Duration,
    pub grace: Duration,
    pub poll_interval: Duration,
}

impl SupervisorConfig {
    pub fn new(binary: impl Into<PathBuf>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            config_path: config_path.into(),
            backoff: DEFAULT_BACKOFF,
            grace: DEFAULT_GRACE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    Exited(i32),
    Terminating,
}

#[derive(Debug)]
pub struct SupervisedProcess {
    child: Option<Child>,
    state: ProcessState,
    restart_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// The relay exited with code 0.
    Stopped,
    /// Shutdown was requested; `forced` when the grace period ran out.
    Terminated { forced: bool },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SupervisorReport {
    pub outcome: SupervisorOutcome,
    pub restart_count: u32,
}

pub struct RelaySupervisor {
    config: SupervisorConfig,
    process: SupervisedProcess,
}

impl RelaySupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            process: SupervisedProcess {
                child: None,
                state: ProcessState::Starting,
                restart_count: 0,
            },
        }
    }

    pub fn state(&self) -> ProcessState {
        self.process.state
    }

    pub fn restart_count(&self) -> u32 {
        self.process.restart_count
    }

    /// Runs until the relay exits cleanly or `shutdown` delivers a message.
    /// Only a failure to spawn the very first child is returned as an error.
    pub fn run(&mut self, shutdown: &Receiver<()>) -> Result<SupervisorReport> {
        let mut spawned_once = false;
        loop {
            match self.process.state {
                ProcessState::Starting => match self.spawn() {
                    Ok(child) => {
                        log::info!(
                            "relay started (pid {}, restarts {})",
                            child.id(),
                            self.process.restart_count
                        );
                        self.process.child = Some(child);
                        self.process.state = ProcessState::Running;
                        spawned_once = true;
                    }
                    Err(err) if !spawned_once => return Err(err),
                    Err(err) => {
                        log::error!("relay respawn failed: {:#}", err);
                        self.process.state = ProcessState::Exited(-1);
                    }
                },
                ProcessState::Running => {
                    if let Some(status) = self.poll_child()? {
                        let code = exit_code(status);
                        self.process.child = None;
                        self.process.state = ProcessState::Exited(code);
                    } else if self.shutdown_requested(shutdown, self.config.poll_interval) {
                        self.process.state = ProcessState::Terminating;
                    }
                }
                ProcessState::Exited(0) => {
                    log::info!("relay exited cleanly");
                    return Ok(self.report(SupervisorOutcome::Stopped));
                }
                ProcessState::Exited(code) => {
                    log::warn!(
                        "relay exited with code {}; restarting in {:?}",
                        code,
                        self.config.backoff
                    );
                    if self.shutdown_requested(shutdown, self.config.backoff) {
                        self.process.state = ProcessState::Terminating;
                        continue;
                    }
                    self.process.restart_count += 1;
                    self.process.state = ProcessState::Starting;
                }
                ProcessState::Terminating => {
                    let forced = self.terminate()?;
                    return Ok(self.report(SupervisorOutcome::Terminated { forced }));
                }
            }
        }
    }

    fn spawn(&self) -> Result<Child> {
        Command::new(&self.config.binary)
            .arg(&self.config.config_path)
            .spawn()
            .with_context(|| format!("spawn relay {}", self.config.binary.display()))
    }

    fn poll_child(&mut self) -> Result<Option<ExitStatus>> {
        let child = self
            .process
            .child
            .as_mut()
            .ok_or_else(|| anyhow!("running state without a child"))?;
        child.try_wait().context("poll relay process")
    }

    /// Blocks up to `timeout`; true if a shutdown message arrived.
    fn shutdown_requested(&self, shutdown: &Receiver<()>, timeout: Duration) -> bool {
        match shutdown.recv_timeout(timeout) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                // Nobody can ask us to stop any more; keep pacing the loop.
                std::thread::sleep(timeout);
                false
            }
        }
    }

    /// Returns whether the child had to be killed.
    fn terminate(&mut self) -> Result<bool> {
        let Some(mut child) = self.process.child.take() else {
            log::info!("shutdown requested; relay not running");
            return Ok(false);
        };
        log::info!("stopping relay (pid {})", child.id());
        request_stop(&mut child);

        let deadline = Instant::now() + self.config.grace;
        while Instant::now() < deadline {
            if let Some(status) = child.try_wait().context("poll relay process")? {
                log::info!("relay stopped ({})", status);
                return Ok(false);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(self.config.poll_interval.min(remaining));
        }
        if let Some(status) = child.try_wait().context("poll relay process")? {
            log::info!("relay stopped ({})", status);
            return Ok(false);
        }
        log::warn!(
            "relay ignored termination for {:?}; killing",
            self.config.grace
        );
        child.kill().context("kill relay process")?;
        child.wait().context("reap relay process")?;
        Ok(true)
    }

    fn report(&self, outcome: SupervisorOutcome) -> SupervisorReport {
        SupervisorReport {
            outcome,
            restart_count: self.process.restart_count,
        }
    }
}

#[cfg(unix)]
fn request_stop(child: &mut Child) {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        let _ = child.kill();
        return;
    };
    // SAFETY: kill(2) with a pid we spawned and have not reaped yet.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        log::warn!(
            "SIGTERM to relay failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) {
    let _ = child.kill();
}

/// Signal deaths have no code and count as a nonzero exit.
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
