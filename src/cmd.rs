use std::ffi::OsStr;
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;

/// Output captured from a subprocess.
#[derive(Debug)]
pub struct CaptureOutput {
    pub stdout: String,
    pub stderr: String,
    /// The process exit code, or 1 if the process was killed by a signal.
    pub status: i32,
    /// True when the process was killed because it exceeded its timeout.
    pub timed_out: bool,
}

/// Run `prog` with `args`, capturing stdout and stderr.
///
/// Returns `Err` if the process could not be spawned (e.g. program not found).
/// A non-zero exit code is NOT an error; it is returned in `CaptureOutput.status`.
pub fn run_capture<S: AsRef<OsStr>>(prog: &str, args: &[S]) -> Result<CaptureOutput, String> {
    tracing::debug!(prog, args = ?display_args(args), "running");
    let output = Command::new(prog)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| format!("Failed to run {prog}: {e}"))?;
    Ok(CaptureOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        status: output.status.code().unwrap_or(1),
        timed_out: false,
    })
}

/// Grace period between SIGTERM and SIGKILL for a timed-out process group.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// How long output is still collected once the process has exited or been killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Like [`run_capture`], but kills the child once `timeout` elapses.
///
/// The child runs in its own process group, so helpers it starts (`mount.cifs`
/// under `mount`, `mount` under `sudo`) are signalled with it. `None` waits
/// indefinitely. A killed child is reported with `timed_out = true` and
/// status 124 (the convention of coreutils `timeout`).
pub fn run_capture_timeout<S: AsRef<OsStr>>(
    prog: &str,
    args: &[S],
    timeout: Option<Duration>,
) -> Result<CaptureOutput, String> {
    let Some(timeout) = timeout else {
        return run_capture(prog, args);
    };
    tracing::debug!(prog, args = ?display_args(args), ?timeout, "running with timeout");
    let mut child = Command::new(prog)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
        .map_err(|e| format!("Failed to run {prog}: {e}"))?;
    let group = Pid::from_raw(child.id() as i32);

    // Drain pipes on helper threads so a chatty child cannot block on a full pipe.
    let stdout_rx = child.stdout.take().map(spawn_reader);
    let stderr_rx = child.stderr.take().map(spawn_reader);

    let deadline = Instant::now() + timeout;
    let mut timed_out = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code().unwrap_or(1),
            Ok(None) if Instant::now() >= deadline => {
                kill_group(prog, group, &mut child);
                timed_out = true;
                break 124;
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(25)),
            Err(e) => return Err(format!("Failed to wait for {prog}: {e}")),
        }
    };

    // A surviving grandchild may keep the pipes open; never wait on it unbounded.
    let stdout = collect(stdout_rx, DRAIN_GRACE);
    let mut stderr = collect(stderr_rx, DRAIN_GRACE);
    if timed_out {
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&format!("{prog} timed out after {}s", timeout.as_secs()));
    }
    Ok(CaptureOutput {
        stdout,
        stderr,
        status,
        timed_out,
    })
}

/// SIGTERM the whole process group, then SIGKILL it if the child outlives
/// [`KILL_GRACE`]. `sudo` relays SIGTERM to the command it runs.
fn kill_group(prog: &str, group: Pid, child: &mut Child) {
    signal_group(prog, group, Signal::SIGTERM);
    let grace_end = Instant::now() + KILL_GRACE;
    while Instant::now() < grace_end {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) => std::thread::sleep(Duration::from_millis(25)),
            Err(e) => {
                tracing::warn!(prog, "cannot poll timed-out process: {e}");
                break;
            }
        }
    }
    signal_group(prog, group, Signal::SIGKILL);
    if let Err(e) = child.wait() {
        tracing::warn!(prog, "cannot reap timed-out process: {e}");
    }
}

fn signal_group(prog: &str, group: Pid, signal: Signal) {
    match killpg(group, signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(prog, ?signal, "cannot signal process group: {e}"),
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        // The receiver is gone when the caller stopped waiting.
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

fn collect(rx: Option<mpsc::Receiver<String>>, wait: Duration) -> String {
    rx.and_then(|rx| rx.recv_timeout(wait).ok())
        .unwrap_or_default()
}

/// Format a command line for display, e.g. in `doctor` hints or debug logs.
pub fn display_cmd<S: AsRef<OsStr>>(prog: &str, args: &[S]) -> String {
    let mut parts = vec![prog.to_string()];
    parts.extend(display_args(args));
    parts.join(" ")
}

fn display_args<S: AsRef<OsStr>>(args: &[S]) -> Vec<String> {
    args.iter()
        .map(|a| a.as_ref().to_string_lossy().into_owned())
        .collect()
}

/// Return `true` if `prog` resolves on `PATH`.
pub fn which(prog: &str) -> bool {
    run_capture("which", &[prog])
        .map(|out| out.status == 0)
        .unwrap_or(false)
}
