use std::{
    io::{self, Read},
    path::PathBuf,
    process::{Child, Command, ExitStatus, Stdio},
    sync::{
        mpsc::{self, RecvTimeoutError},
        Arc, Mutex, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long to wait for pipes to close once the process is gone. Grandchildren
/// that inherited the pipes may keep them open forever.
const DRAIN_GRACE: Duration = Duration::from_secs(5);
const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: PathBuf,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Code(i32),
    Signal,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit: Exit,
    /// Captured stdout followed by stderr.
    pub output: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit == Exit::Code(0)
    }
}

pub trait ProcessRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput>;
}

/// Runs invocations as child processes of this one.
///
/// On unix every child leads its own process group, so a timeout takes down
/// whatever it forked as well.
#[derive(Debug, Default)]
pub struct CommandRunner;

impl ProcessRunner for CommandRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.current_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt as _;
            command.process_group(0);
        }
        let mut child = command.spawn()?;
        tracing::debug!("Spawned `{}` as pid {}", invocation.program, child.id());

        let stdout = child.stdout.take().map(Capture::start);
        let stderr = child.stderr.take().map(Capture::start);
        let exit = wait(&mut child, invocation.timeout)?;

        // Both pipes share one grace period.
        let deadline = Instant::now() + DRAIN_GRACE;
        let mut output = stdout.map(|c| c.finish(deadline)).unwrap_or_default();
        let stderr = stderr.map(|c| c.finish(deadline)).unwrap_or_default();
        if !stderr.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&stderr);
        }
        Ok(ProcessOutput { exit, output })
    }
}

/// Output of one pipe, collected by a reader thread as it arrives.
struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
    closed: mpsc::Receiver<()>,
}

impl Capture {
    fn start<R>(mut pipe: R) -> Self
    where
        R: Read + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let (tx, closed) = mpsc::channel();
        let sink = buf.clone();
        thread::spawn(move || {
            let mut chunk = [0; READ_CHUNK];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(&chunk[..n]),
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) => {
                        tracing::warn!("Failed reading child output: {}", err);
                        break;
                    }
                }
            }
            let _ = tx.send(());
        });
        Self { buf, closed }
    }

    /// Waits until the pipe closes or `deadline` passes and returns whatever
    /// was read by then.
    fn finish(self, deadline: Instant) -> String {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Err(RecvTimeoutError::Timeout) = self.closed.recv_timeout(remaining) {
            tracing::warn!("Child output is still held open, keeping what was read so far");
        }
        let buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

fn wait(child: &mut Child, timeout: Option<Duration>) -> io::Result<Exit> {
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(exit_of(status));
        }
        if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
            tracing::warn!("Process {} timed out, killing it", child.id());
            if let Err(err) = kill_group(child) {
                tracing::debug!("Failed to kill process {}: {}", child.id(), err);
            }
            child.wait()?;
            return Ok(Exit::TimedOut);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn kill_group(child: &mut Child) -> io::Result<()> {
    let pgid = libc::pid_t::try_from(child.id())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    // SAFETY: `kill(2)` takes no pointers. `pgid` is the id of an unreaped
    // child that leads its own group, so the negated value names that group.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) -> io::Result<()> {
    child.kill()
}

fn exit_of(status: ExitStatus) -> Exit {
    status.code().map_or(Exit::Signal, Exit::Code)
}
