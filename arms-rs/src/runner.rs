//! Invocation of the external simulator.
//!
//! The simulator is run as `program [args...] --scenario <file> --output
//! <file>` from an explicit argument vector, never through a shell. On Unix
//! the child leads its own process group so that a timeout can take down
//! anything it spawned.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{Error, ProcessFailure, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct Simulator {
    pub program: PathBuf,
    pub working_dir: PathBuf,
    /// Arguments placed before `--scenario` and `--output`.
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

/// One arm's invocation. Every arm needs its own output path.
#[derive(Debug, Clone)]
pub struct ArmRun {
    pub arm: String,
    pub scenario: PathBuf,
    pub output: PathBuf,
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub arm: String,
    pub output: PathBuf,
    pub elapsed: Duration,
    pub stdout: String,
    pub stderr: String,
}

impl Simulator {
    /// Runs one arm to completion. The output file is only trustworthy when
    /// this returns `Ok`.
    pub fn run(&self, run: &ArmRun) -> Result<RunOutcome> {
        let failed = |reason: ProcessFailure, exit_code: Option<i32>, stderr: String| {
            Error::Process {
                arm: run.arm.clone(),
                exit_code,
                reason,
                stderr,
            }
        };
        let setup = |message: String| failed(ProcessFailure::Setup { message }, None, String::new());

        if !run.scenario.is_file() {
            return Err(setup(format!(
                "scenario file {} does not exist",
                run.scenario.display()
            )));
        }
        let working_dir = run.working_dir.as_deref().unwrap_or(&self.working_dir);
        fs::create_dir_all(working_dir).map_err(|e| {
            setup(format!(
                "cannot create working directory {}: {e}",
                working_dir.display()
            ))
        })?;
        prepare_output(&run.output).map_err(|e| {
            setup(format!("cannot prepare output {}: {e}", run.output.display()))
        })?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--scenario")
            .arg(&run.scenario)
            .arg("--output")
            .arg(&run.output)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        tracing::debug!(arm = %run.arm, command = ?cmd, "starting simulator");
        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            failed(
                ProcessFailure::Spawn {
                    message: format!("{}: {e}", self.program.display()),
                },
                None,
                String::new(),
            )
        })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let waited = wait_with_timeout(&mut child, self.timeout);
        let stdout = collect(stdout);
        let stderr = collect(stderr).trim_end().to_string();
        let elapsed = started.elapsed();

        let status = match waited {
            Ok(Some(status)) => status,
            Ok(None) => {
                let seconds = self.timeout.map(|t| t.as_secs()).unwrap_or_default();
                return Err(failed(ProcessFailure::TimedOut { seconds }, None, stderr));
            }
            Err(e) => {
                return Err(failed(
                    ProcessFailure::Setup {
                        message: format!("waiting for simulator failed: {e}"),
                    },
                    None,
                    stderr,
                ));
            }
        };

        if !status.success() {
            let reason = match status.code() {
                Some(_) => ProcessFailure::Exited,
                None => ProcessFailure::Terminated,
            };
            return Err(failed(reason, status.code(), stderr));
        }

        if !stdout.is_empty() {
            tracing::debug!(arm = %run.arm, stdout = %stdout, "simulator stdout");
        }
        Ok(RunOutcome {
            arm: run.arm.clone(),
            output: run.output.clone(),
            elapsed,
            stdout,
            stderr,
        })
    }
}

/// Ensures the parent directory exists and no stale output from an earlier
/// run can be mistaken for this run's result.
fn prepare_output(output: &Path) -> io::Result<()> {
    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    match fs::remove_file(output) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            // A read error just truncates the diagnostics.
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Returns `Ok(None)` if the timeout elapsed; the child has then been
/// killed and reaped.
///
/// On a normal exit anything the simulator left running in its group is
/// killed before the leader is reaped. Until then the leader is a zombie and
/// its pid, which is also the group id, cannot be handed to another process.
fn wait_with_timeout(child: &mut Child, timeout: Option<Duration>) -> io::Result<Option<ExitStatus>> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        if has_exited(child)? {
            if CAN_PEEK_EXIT {
                kill_group(child);
            }
            return child.wait().map(Some);
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            kill_group(child);
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Whether [`has_exited`] leaves the exited child unreaped.
const CAN_PEEK_EXIT: bool = cfg!(target_os = "linux");

/// Checks for exit without reaping, so the group id stays reserved.
#[cfg(target_os = "linux")]
fn has_exited(child: &mut Child) -> io::Result<bool> {
    let pid = libc::id_t::from(child.id());
    // SAFETY: `siginfo_t` is plain data and zero is a valid bit pattern.
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    // SAFETY: `info` is a valid, writable `siginfo_t`.
    let rc = unsafe {
        libc::waitid(
            libc::P_PID,
            pid,
            &mut info,
            libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `waitid` filled in `info`; `si_pid` stays 0 while the child runs.
    Ok(unsafe { info.si_pid() } != 0)
}

/// Elsewhere the only portable check reaps the child, so the cleanup kill
/// after a normal exit is skipped.
#[cfg(not(target_os = "linux"))]
fn has_exited(child: &mut Child) -> io::Result<bool> {
    Ok(child.try_wait()?.is_some())
}

#[cfg(unix)]
fn kill_group(child: &mut Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        let _ = child.kill();
        return;
    };
    // SAFETY: signalling a process group has no memory-safety requirements.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        // ESRCH: the group is already gone.
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    let _ = child.kill();
}
