//! Child-process kernels speaking newline-delimited JSON over stdio.
//!
//! Each line on the child's stdout is one message. A background reader task
//! parses lines into an unbounded queue; a writer task serializes outbound
//! messages onto stdin. The child's answer to our `kernel_info_request`
//! flips readiness and is not forwarded.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tsumiki_types::SessionId;

use super::KernelTransport;
use crate::config::KernelSpec;
use crate::error::KernelError;
use crate::message;

/// How long a kernel gets to read `shutdown_request` and exit on its own.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A running kernel child process.
struct Running {
    child: Child,
    pid: Option<u32>,
    inbound: mpsc::UnboundedReceiver<Value>,
    outbound: mpsc::UnboundedSender<Value>,
    ready: Arc<AtomicBool>,
    writer: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Running {
    /// Kill the child right away.
    fn kill(mut self) {
        for task in self.tasks.drain(..).chain(self.writer.take()) {
            task.abort();
        }
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "kernel process already gone");
        }
    }

    /// Close stdin once the queued messages are written, then kill the child
    /// if it has not exited within the grace period. Returns immediately.
    fn close(self, runtime: &Handle) {
        let Running {
            mut child,
            outbound,
            writer,
            tasks,
            ..
        } = self;
        drop(outbound);
        for task in tasks {
            task.abort();
        }
        runtime.spawn(async move {
            if let Some(writer) = writer
                && tokio::time::timeout(SHUTDOWN_GRACE, writer).await.is_err()
            {
                debug!("kernel stdin writer did not finish in time");
            }
            if tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await.is_err()
                && let Err(e) = child.start_kill()
            {
                debug!(error = %e, "kernel process already gone");
            }
        });
    }
}

/// Transport over a child process.
pub struct ProcessTransport {
    name: String,
    spec: KernelSpec,
    runtime: Handle,
    session: SessionId,
    running: Option<Running>,
}

impl ProcessTransport {
    /// Spawn the kernel described by `spec` on `runtime`.
    pub fn spawn(name: impl Into<String>, spec: KernelSpec, runtime: Handle) -> Result<Self, KernelError> {
        let mut transport = Self {
            name: name.into(),
            spec,
            runtime,
            session: SessionId::new(),
            running: None,
        };
        transport.start()?;
        Ok(transport)
    }

    /// OS process id of the current child.
    pub fn pid(&self) -> Option<u32> {
        self.running.as_ref().and_then(|r| r.pid)
    }

    fn start(&mut self) -> Result<(), KernelError> {
        let Some((program, args)) = self.spec.argv.split_first() else {
            return Err(KernelError::Spawn {
                name: self.name.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argv"),
            });
        };

        let _guard = self.runtime.enter();
        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&self.spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| KernelError::Spawn {
            name: self.name.clone(),
            source,
        })?;
        let pid = child.id();
        info!(kernel = %self.name, ?pid, "kernel process started");

        let ready = Arc::new(AtomicBool::new(false));
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let mut tasks = Vec::new();

        if let Some(stdout) = child.stdout.take() {
            tasks.push(self.runtime.spawn(read_messages(
                self.name.clone(),
                BufReader::new(stdout),
                in_tx,
                ready.clone(),
            )));
        }
        let writer = child
            .stdin
            .take()
            .map(|stdin| self.runtime.spawn(write_messages(self.name.clone(), stdin, out_rx)));
        if let Some(stderr) = child.stderr.take() {
            let name = self.name.clone();
            tasks.push(self.runtime.spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(kernel = %name, "stderr: {line}");
                }
            }));
        }

        // The reply to this is what confirms readiness.
        let _ = out_tx.send(message::kernel_info_request(self.session));

        self.running = Some(Running {
            child,
            pid,
            inbound: in_rx,
            outbound: out_tx,
            ready,
            writer,
            tasks,
        });
        Ok(())
    }
}

async fn read_messages<R>(
    name: String,
    reader: BufReader<R>,
    tx: mpsc::UnboundedSender<Value>,
    ready: Arc<AtomicBool>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(kernel = %name, error = %e, "failed reading kernel stdout");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                warn!(kernel = %name, error = %e, "skipping non-JSON line from kernel");
                continue;
            }
        };
        if message::KernelMessage::from_wire(&value)
            .is_some_and(|m| m.msg_type == "kernel_info_reply")
        {
            ready.store(true, Ordering::Release);
            continue;
        }
        if tx.send(value).is_err() {
            break;
        }
    }
    debug!(kernel = %name, "kernel stdout closed");
}

async fn write_messages<W>(name: String, mut writer: W, mut rx: mpsc::UnboundedReceiver<Value>)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = message.to_string();
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!(kernel = %name, error = %e, "failed writing to kernel stdin");
            break;
        }
        if let Err(e) = writer.flush().await {
            warn!(kernel = %name, error = %e, "failed flushing kernel stdin");
            break;
        }
    }
}

impl KernelTransport for ProcessTransport {
    fn poll_ready(&mut self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| r.ready.load(Ordering::Acquire))
    }

    fn try_recv(&mut self) -> Option<Value> {
        self.running.as_mut()?.inbound.try_recv().ok()
    }

    fn send(&mut self, message: Value) -> Result<(), KernelError> {
        let running = self.running.as_ref().ok_or(KernelError::ChannelClosed)?;
        running
            .outbound
            .send(message)
            .map_err(|_| KernelError::ChannelClosed)
    }

    fn interrupt(&mut self) -> Result<(), KernelError> {
        let pid = self.pid().ok_or(KernelError::ChannelClosed)?;
        super::send_sigint(pid)?;
        info!(kernel = %self.name, pid, "sent SIGINT to kernel");
        Ok(())
    }

    fn restart(&mut self) -> Result<(), KernelError> {
        info!(kernel = %self.name, "restarting kernel process");
        if let Some(running) = self.running.take() {
            running.kill();
        }
        self.start()
    }

    fn shutdown(&mut self) {
        if let Some(running) = self.running.take() {
            if running
                .outbound
                .send(message::shutdown_request(self.session, false))
                .is_err()
            {
                debug!(kernel = %self.name, "kernel stdin already closed");
            }
            running.close(&self.runtime);
            info!(kernel = %self.name, "kernel process stopping");
        }
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================
