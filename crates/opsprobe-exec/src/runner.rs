//! Local subprocess execution with output capture and cancellation.

use std::collections::BTreeMap;
use std::process::ExitStatus;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use command_group::AsyncCommandGroup;
use command_group::AsyncGroupChild;
use opsprobe_core::CallContext;
use opsprobe_core::DoneReason;
use opsprobe_core::constants::PROCESS_GRACE_PERIOD;
use parking_lot::Mutex;
use snafu::ResultExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use crate::error::EmptyCommandSnafu;
use crate::error::ExecError;
use crate::error::Result;
use crate::error::SpawnSnafu;

/// Read buffer size for stdout/stderr pipes.
const PIPE_READ_CHUNK: usize = 8 * 1024;

/// Captured stdout and stderr of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `args[0]` with `args[1..]`, optionally feeding `stdin` and layering
/// `env` over the inherited environment.
///
/// stdout and stderr are captured separately and also into one interleaved
/// buffer, which is what gets logged and embedded in failures. When `ctx`
/// finishes first the whole process group is terminated and
/// [`ExecError::Interrupted`] carries whatever output was produced.
pub async fn run_command<S: AsRef<str>>(
    ctx: &CallContext,
    args: &[S],
    stdin: Option<&[u8]>,
    env: &BTreeMap<String, String>,
) -> Result<CommandOutput> {
    let Some((program, rest)) = args.split_first() else {
        return EmptyCommandSnafu.fail();
    };
    let command_line = args.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(" ");

    if let Some(reason) = ctx.done_reason() {
        return Err(ExecError::Interrupted {
            command: command_line,
            reason,
            output: CommandOutput::default(),
        });
    }

    debug!(command = %command_line, "running command");

    let mut cmd = Command::new(program.as_ref());
    cmd.args(rest.iter().map(AsRef::as_ref))
        .envs(env)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Spawn as process group so cancellation reaches grandchildren too
    let mut child: AsyncGroupChild = cmd.group_spawn().context(SpawnSnafu {
        command: command_line.clone(),
    })?;

    let interleaved = Arc::new(Mutex::new(Vec::new()));
    let stdout_task = child.inner().stdout.take().map(|pipe| spawn_capture(pipe, Arc::clone(&interleaved)));
    let stderr_task = child.inner().stderr.take().map(|pipe| spawn_capture(pipe, Arc::clone(&interleaved)));

    let stdin_task = match (stdin, child.inner().stdin.take()) {
        (Some(bytes), Some(mut pipe)) => {
            let bytes = bytes.to_vec();
            Some(tokio::spawn(async move {
                let written = pipe.write_all(&bytes).await;
                drop(pipe);
                written
            }))
        }
        _ => None,
    };

    enum Exit {
        Completed(std::io::Result<ExitStatus>),
        Interrupted(DoneReason),
    }

    let exit = tokio::select! {
        status = child.wait() => Exit::Completed(status),
        reason = ctx.done() => Exit::Interrupted(reason),
    };

    if let Exit::Interrupted(reason) = &exit {
        let termination = terminate_process_group(&mut child, &command_line, PROCESS_GRACE_PERIOD).await;
        debug!(command = %command_line, %reason, ?termination, "process group stopped");
    }

    if let Some(task) = stdin_task {
        match task.await {
            Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                warn!(command = %command_line, error = %e, "writing stdin failed");
            }
            _ => {}
        }
    }

    let stdout = join_capture(stdout_task).await;
    let stderr = join_capture(stderr_task).await;
    let interleaved = String::from_utf8_lossy(&interleaved.lock()).into_owned();
    let output = CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    };

    match exit {
        Exit::Completed(Ok(status)) if status.success() => {
            debug!(command = %command_line, exit_code = 0, output = %interleaved, "command finished");
            Ok(output)
        }
        Exit::Completed(Ok(status)) => {
            let exit_code = status.code().unwrap_or(-1);
            debug!(command = %command_line, exit_code, output = %interleaved, "command failed");
            Err(ExecError::CommandFailed {
                command: command_line,
                exit_code,
                interleaved,
                output,
            })
        }
        Exit::Completed(Err(source)) => Err(ExecError::Wait {
            command: command_line,
            source,
        }),
        Exit::Interrupted(reason) => {
            warn!(command = %command_line, %reason, output = %interleaved, "command interrupted");
            Err(ExecError::Interrupted {
                command: command_line,
                reason,
                output,
            })
        }
    }
}

fn spawn_capture<R>(mut pipe: R, interleaved: Arc<Mutex<Vec<u8>>>) -> JoinHandle<Vec<u8>>
where R: AsyncRead + Unpin + Send + 'static {
    tokio::spawn(async move {
        let mut own = Vec::new();
        let mut chunk = vec![0u8; PIPE_READ_CHUNK];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break, // EOF
                Ok(n) => {
                    own.extend_from_slice(&chunk[..n]);
                    interleaved.lock().extend_from_slice(&chunk[..n]);
                }
                Err(e) => {
                    warn!("error reading command output: {}", e);
                    break;
                }
            }
        }
        own
    })
}

async fn join_capture(task: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    match task {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

/// How an interrupted command's process group went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    /// Gone before any signal was sent.
    AlreadyExited,
    /// Exited within the grace period after SIGTERM.
    Terminated,
    /// Needed SIGKILL.
    Killed,
}

/// SIGTERM the command's process group, then SIGKILL it if the leader is
/// still running after `grace`. The leader is always reaped.
#[cfg(unix)]
async fn terminate_process_group(child: &mut AsyncGroupChild, command: &str, grace: Duration) -> Termination {
    use nix::errno::Errno;
    use nix::sys::signal::Signal;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Some(pid) = child.inner().id() else {
        return Termination::AlreadyExited;
    };
    let group = Pid::from_raw(pid as i32);

    match killpg(group, Signal::SIGTERM) {
        Ok(()) => {}
        Err(Errno::ESRCH) => {
            let _ = child.wait().await;
            return Termination::AlreadyExited;
        }
        Err(e) => warn!(command, pid, error = %e, "SIGTERM to process group failed"),
    }

    if tokio::time::timeout(grace, child.wait()).await.is_ok() {
        return Termination::Terminated;
    }

    if let Err(e) = killpg(group, Signal::SIGKILL)
        && e != Errno::ESRCH
    {
        warn!(command, pid, error = %e, "SIGKILL to process group failed");
    }
    let _ = child.wait().await;
    Termination::Killed
}

#[cfg(not(unix))]
async fn terminate_process_group(child: &mut AsyncGroupChild, _command: &str, _grace: Duration) -> Termination {
    let _ = child.kill().await;
    let _ = child.wait().await;
    Termination::Killed
}
