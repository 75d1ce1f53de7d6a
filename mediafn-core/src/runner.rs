//! Deadline-bounded execution of the external media tool.
//!
//! The runner spawns the tool with a discrete argument vector (never a
//! shell line, so attacker-controlled filenames and metadata cannot inject
//! options or commands), drains its streams on dedicated threads, and
//! enforces the deadline: termination signal, short grace period, forced
//! kill. It always reaps the child and always returns a [`ProcessResult`],
//! even when the child ignores the termination signal.
//!
//! The running tool's process group is also tracked in a registry so that
//! [`install_termination_handler`] can forward a platform stop (SIGTERM or
//! SIGINT to the invoker) to the tool before the invoker dies. The tool
//! runs in its own process group and would otherwise survive its
//! coordinator as an orphan.

use crate::error::{CoreError, CoreResult};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
#[cfg(unix)]
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, Instant};

/// Lines kept from the start of stderr before truncation begins.
const STDERR_HEAD_LINES: usize = 40;

/// Lines kept from the end of stderr.
const STDERR_TAIL_LINES: usize = 40;

/// Longest stderr line retained; longer lines are cut.
const STDERR_LINE_CAP: usize = 400;

/// Upper bound on captured stdout when a profile expects metadata there.
const STDOUT_CAP: u64 = 4 * 1024 * 1024;

/// Poll interval while waiting for the child to exit.
const WAIT_POLL: Duration = Duration::from_millis(25);

/// Process group of the currently running tool, 0 when none is running.
/// One invocation runs one tool at a time.
#[cfg(unix)]
static ACTIVE_PROCESS_GROUP: AtomicI32 = AtomicI32::new(0);

/// Clears the registry on every exit path out of [`run`], error returns
/// and unwinds included, so the termination handler never signals a pid
/// that may have been recycled.
#[cfg(unix)]
struct GroupRegistration;

#[cfg(unix)]
impl GroupRegistration {
    fn new(pgid: u32) -> Self {
        ACTIVE_PROCESS_GROUP.store(pgid as i32, Ordering::SeqCst);
        GroupRegistration
    }
}

#[cfg(unix)]
impl Drop for GroupRegistration {
    fn drop(&mut self) {
        ACTIVE_PROCESS_GROUP.store(0, Ordering::SeqCst);
    }
}

/// Installs SIGTERM and SIGINT handlers that forward the stop to the
/// running tool's process group before the default action ends the
/// invoker, so a platform shutdown never leaves an orphaned tool behind.
///
/// Intended to be called once, at process start, by the binary edge.
#[cfg(unix)]
pub fn install_termination_handler() {
    // Only async-signal-safe calls in here: an atomic load, killpg,
    // signal, raise.
    extern "C" fn on_termination(signo: libc::c_int) {
        let pgid = ACTIVE_PROCESS_GROUP.load(Ordering::SeqCst);
        if pgid > 0 {
            unsafe {
                libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
            }
        }
        unsafe {
            libc::signal(signo, libc::SIG_DFL);
            libc::raise(signo);
        }
    }

    let handler = on_termination as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }
}

#[cfg(not(unix))]
pub fn install_termination_handler() {}

/// Fully resolved description of one external-tool execution.
/// Immutable once constructed.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub current_dir: PathBuf,
    /// Wall-clock budget for this execution.
    pub timeout: Duration,
    /// Grace period between the termination signal and the forced kill.
    pub term_grace: Duration,
    /// Whether stdout carries the tool's result (probe mode) and must be
    /// captured rather than discarded.
    pub capture_stdout: bool,
}

/// What one execution actually did. Produced exactly once per spec.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub exit_code: Option<i32>,
    /// Signal that terminated the child, when it died to one (unix).
    pub signal: Option<i32>,
    /// Set when the runner killed the child at the deadline.
    pub timed_out: bool,
    pub duration: Duration,
    /// Bounded head+tail excerpt of stderr for diagnosis.
    pub stderr_excerpt: String,
    /// Captured stdout; empty unless capture was requested.
    pub stdout: String,
}

/// Head-and-tail bounded collector for diagnostic stream lines. Keeps the
/// first and last lines and counts what it dropped in between, so a
/// runaway tool cannot grow memory without bound.
#[derive(Debug)]
pub struct StderrRing {
    head: Vec<String>,
    tail: VecDeque<String>,
    dropped: usize,
}

impl StderrRing {
    pub fn new() -> Self {
        Self {
            head: Vec::new(),
            tail: VecDeque::new(),
            dropped: 0,
        }
    }

    pub fn push(&mut self, line: &str) {
        let mut line = line.to_string();
        if line.len() > STDERR_LINE_CAP {
            let mut cut = STDERR_LINE_CAP;
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            line.truncate(cut);
            line.push('…');
        }
        if self.head.len() < STDERR_HEAD_LINES {
            self.head.push(line);
        } else {
            if self.tail.len() == STDERR_TAIL_LINES {
                self.tail.pop_front();
                self.dropped += 1;
            }
            self.tail.push_back(line);
        }
    }

    pub fn render(&self) -> String {
        let mut out = self.head.join("\n");
        if self.dropped > 0 {
            out.push_str(&format!("\n… {} lines dropped …\n", self.dropped));
        } else if !self.tail.is_empty() {
            out.push('\n');
        }
        out.push_str(&self.tail.iter().cloned().collect::<Vec<_>>().join("\n"));
        out
    }
}

impl Default for StderrRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the process to completion or deadline.
///
/// Returns within `timeout + term_grace` (plus scheduling slack) even if
/// the child ignores the termination signal. Errors only when the process
/// cannot be spawned or waited on at all; tool failures are data in the
/// returned [`ProcessResult`].
pub fn run(spec: &ProcessSpec) -> CoreResult<ProcessResult> {
    log::debug!(
        "spawning {} {:?} (timeout {:?})",
        spec.program.display(),
        spec.args,
        spec.timeout
    );
    let start = Instant::now();

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(&spec.current_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    // Own process group, so deadline signals reach the whole tool tree and
    // no grandchild survives to hold the pipes open or outlive the
    // invocation.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command.spawn().map_err(|e| CoreError::CommandStart {
        tool: spec.program.display().to_string(),
        message: e.to_string(),
    })?;
    // process_group(0) makes the child its own group leader, so its pid is
    // the group id the termination handler forwards a platform stop to.
    #[cfg(unix)]
    let _registration = GroupRegistration::new(child.id());

    // Drain both streams off-thread so the child can never block on a full
    // pipe while the runner waits on it.
    let stderr_pipe = child.stderr.take().ok_or_else(|| {
        CoreError::Other("child stderr pipe missing after spawn".to_string())
    })?;
    let stderr_handle = std::thread::spawn(move || {
        let mut ring = StderrRing::new();
        for line in BufReader::new(stderr_pipe).lines().map_while(Result::ok) {
            log::trace!("tool stderr: {line}");
            ring.push(&line);
        }
        ring
    });

    let stdout_pipe = child.stdout.take().ok_or_else(|| {
        CoreError::Other("child stdout pipe missing after spawn".to_string())
    })?;
    let capture_stdout = spec.capture_stdout;
    let stdout_handle = std::thread::spawn(move || {
        let mut collected = String::new();
        let mut reader = BufReader::new(stdout_pipe);
        if capture_stdout {
            let _ = reader.by_ref().take(STDOUT_CAP).read_to_string(&mut collected);
        }
        // Drain whatever remains so the pipe never backs up.
        let mut sink = Vec::new();
        let _ = reader.read_to_end(&mut sink);
        collected
    });

    let deadline = start + spec.timeout;
    let mut timed_out = false;
    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                timed_out = true;
                break kill_with_grace(&mut child, spec.term_grace)?;
            }
            None => std::thread::sleep(WAIT_POLL),
        }
    };

    let stderr_excerpt = stderr_handle
        .join()
        .map(|ring| ring.render())
        .unwrap_or_else(|_| String::from("<stderr reader panicked>"));
    let stdout = stdout_handle.join().unwrap_or_default();

    let result = ProcessResult {
        exit_code: status.code(),
        signal: status_signal(&status),
        timed_out,
        duration: start.elapsed(),
        stderr_excerpt,
        stdout,
    };
    log::debug!(
        "tool exited: code={:?} signal={:?} timed_out={} after {:?}",
        result.exit_code,
        result.signal,
        result.timed_out,
        result.duration
    );
    Ok(result)
}

/// Termination signal, grace period, forced kill. Always reaps the child
/// and leaves no live process group behind.
fn kill_with_grace(child: &mut Child, grace: Duration) -> CoreResult<std::process::ExitStatus> {
    log::warn!("tool overran its deadline, sending termination signal");
    signal_group(child, Signal::Term);

    let grace_deadline = Instant::now() + grace;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if Instant::now() >= grace_deadline {
            break None;
        }
        std::thread::sleep(WAIT_POLL);
    };

    // Forced kill of the whole group: ends a child that ignores the
    // termination signal and any stragglers it forked that would otherwise
    // hold the pipes open.
    signal_group(child, Signal::Kill);
    match status {
        Some(status) => Ok(status),
        None => {
            log::warn!("tool ignored termination signal, killed");
            Ok(child.wait()?)
        }
    }
}

enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_group(child: &mut Child, signal: Signal) {
    let signo = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: the pid is our own unreaped child, spawned as its own group
    // leader via process_group(0).
    unsafe {
        libc::killpg(child.id() as libc::pid_t, signo);
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, signal: Signal) {
    // No portable graceful termination; the forced kill still bounds the
    // wait.
    if matches!(signal, Signal::Kill) {
        let _ = child.kill();
    }
}

#[cfg(unix)]
fn status_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn status_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}
