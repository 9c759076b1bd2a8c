//! Jupyter kernels over ZeroMQ.
//!
//! One background task owns the shell, control and iopub sockets. IOPub
//! messages go to the inbound queue. Shell and control replies stay here:
//! `kernel_info_reply` flips readiness, everything else is only logged.
//!
//! ```text
//!   JupyterTransport            mpsc              run_channels task
//!   ┌──────────────────┐  (channel, msg) ──▶  ┌───────────────────────┐
//!   │ send / interrupt │                      │ shell   DEALER        │
//!   │ try_recv         │  ◀── iopub msgs ───  │ control DEALER        │
//!   └──────────────────┘                      │ iopub   SUB ("")      │
//!                                             └───────────────────────┘
//! ```
//!
//! A kernel is either launched here from a kernelspec, in which case we own
//! its process and connection file, or attached through someone else's
//! connection file, in which case we never stop or restart it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tsumiki_types::SessionId;
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqError, ZmqMessage};

use super::KernelTransport;
use crate::error::KernelError;
use crate::jupyter::{ConnectionInfo, InterruptMode, JupyterKernelSpec, Signer, wire};
use crate::message;

const CONNECT_ATTEMPTS: u32 = 100;
const CONNECT_RETRY: Duration = Duration::from_millis(100);

/// How long a launched kernel gets to act on `shutdown_request`.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Channel {
    Shell,
    Control,
}

enum Origin {
    Launched {
        spec: JupyterKernelSpec,
        connection_file: PathBuf,
        child: Option<Child>,
    },
    Attached,
}

struct Channels {
    inbound: mpsc::UnboundedReceiver<Value>,
    outbound: mpsc::UnboundedSender<(Channel, Value)>,
    ready: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Transport to a Jupyter kernel.
pub struct JupyterTransport {
    name: String,
    info: ConnectionInfo,
    signer: Signer,
    session: SessionId,
    runtime: Handle,
    origin: Origin,
    channels: Option<Channels>,
}

impl JupyterTransport {
    /// Start the kernel described by `spec`, writing its connection file
    /// into `runtime_dir`.
    pub fn launch(
        name: impl Into<String>,
        spec: JupyterKernelSpec,
        runtime_dir: &Path,
        runtime: Handle,
    ) -> Result<Self, KernelError> {
        let name = name.into();
        let mut info = ConnectionInfo::allocate()?;
        info.kernel_name = Some(name.clone());
        let signer = Signer::new(&info.signature_scheme, &info.key)?;

        std::fs::create_dir_all(runtime_dir)?;
        let connection_file =
            runtime_dir.join(format!("kernel-tsumiki-{}.json", uuid::Uuid::new_v4()));
        info.write(&connection_file)?;

        let mut transport = Self {
            name,
            info,
            signer,
            session: SessionId::new(),
            runtime,
            origin: Origin::Launched {
                spec,
                connection_file: connection_file.clone(),
                child: None,
            },
            channels: None,
        };
        if let Err(e) = transport.start() {
            remove_connection_file(&connection_file);
            return Err(e);
        }
        Ok(transport)
    }

    /// Connect to a kernel someone else started.
    pub fn attach(connection_file: &Path, runtime: Handle) -> Result<Self, KernelError> {
        let info = ConnectionInfo::read(connection_file)?;
        let signer = Signer::new(&info.signature_scheme, &info.key)?;
        let name = connection_file.display().to_string();
        info!(kernel = %name, "attaching to existing kernel");

        let mut transport = Self {
            name,
            info,
            signer,
            session: SessionId::new(),
            runtime,
            origin: Origin::Attached,
            channels: None,
        };
        transport.connect();
        Ok(transport)
    }

    /// OS process id, for kernels launched here.
    pub fn pid(&self) -> Option<u32> {
        match &self.origin {
            Origin::Launched { child, .. } => child.as_ref().and_then(Child::id),
            Origin::Attached => None,
        }
    }

    fn start(&mut self) -> Result<(), KernelError> {
        if let Origin::Launched {
            spec,
            connection_file,
            child,
        } = &mut self.origin
        {
            let argv = spec.command(connection_file);
            let Some((program, args)) = argv.split_first() else {
                return Err(KernelError::Spawn {
                    name: self.name.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argv"),
                });
            };

            let _guard = self.runtime.enter();
            let mut cmd = Command::new(program);
            cmd.args(args)
                .envs(&spec.env)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let mut spawned = cmd.spawn().map_err(|source| KernelError::Spawn {
                name: self.name.clone(),
                source,
            })?;
            info!(kernel = %self.name, pid = ?spawned.id(), "kernel process started");

            if let Some(stderr) = spawned.stderr.take() {
                let name = self.name.clone();
                self.runtime.spawn(async move {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        debug!(kernel = %name, "stderr: {line}");
                    }
                });
            }
            *child = Some(spawned);
        }
        self.connect();
        Ok(())
    }

    fn connect(&mut self) {
        let ready = Arc::new(AtomicBool::new(false));
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let task = self.runtime.spawn(run_channels(Link {
            name: self.name.clone(),
            info: self.info.clone(),
            signer: self.signer.clone(),
            session: self.session,
            inbound: in_tx,
            outbound: out_rx,
            ready: ready.clone(),
        }));
        self.channels = Some(Channels {
            inbound: in_rx,
            outbound: out_tx,
            ready,
            task,
        });
    }

    fn send_on(&self, channel: Channel, message: Value) -> Result<(), KernelError> {
        let channels = self.channels.as_ref().ok_or(KernelError::ChannelClosed)?;
        channels
            .outbound
            .send((channel, message))
            .map_err(|_| KernelError::ChannelClosed)
    }
}

impl KernelTransport for JupyterTransport {
    fn poll_ready(&mut self) -> bool {
        self.channels
            .as_ref()
            .is_some_and(|c| c.ready.load(Ordering::Acquire))
    }

    fn try_recv(&mut self) -> Option<Value> {
        self.channels.as_mut()?.inbound.try_recv().ok()
    }

    fn send(&mut self, message: Value) -> Result<(), KernelError> {
        self.send_on(Channel::Shell, message)
    }

    fn interrupt(&mut self) -> Result<(), KernelError> {
        if let Origin::Launched { spec, .. } = &self.origin
            && spec.interrupt_mode == InterruptMode::Signal
            && let Some(pid) = self.pid()
        {
            super::send_sigint(pid)?;
            info!(kernel = %self.name, pid, "sent SIGINT to kernel");
            return Ok(());
        }
        self.send_on(Channel::Control, message::interrupt_request(self.session))?;
        info!(kernel = %self.name, "sent interrupt_request to kernel");
        Ok(())
    }

    fn can_restart(&self) -> bool {
        matches!(self.origin, Origin::Launched { .. })
    }

    fn restart(&mut self) -> Result<(), KernelError> {
        let Origin::Launched { child, .. } = &mut self.origin else {
            return Err(KernelError::CannotRestart(self.name.clone()));
        };
        info!(kernel = %self.name, "restarting kernel process");
        if let Some(mut old) = child.take()
            && let Err(e) = old.start_kill()
        {
            debug!(error = %e, "kernel process already gone");
        }
        if let Some(channels) = self.channels.take() {
            channels.task.abort();
        }
        self.start()
    }

    fn shutdown(&mut self) {
        let Some(Channels { outbound, task, .. }) = self.channels.take() else {
            return;
        };
        match &mut self.origin {
            Origin::Attached => {
                drop(outbound);
                self.runtime.spawn(finish_channels(task));
                info!(kernel = %self.name, "detached from kernel");
            }
            Origin::Launched {
                connection_file,
                child,
                ..
            } => {
                if outbound
                    .send((Channel::Control, message::shutdown_request(self.session, false)))
                    .is_err()
                {
                    debug!(kernel = %self.name, "kernel channels already closed");
                }
                drop(outbound);
                let child = child.take();
                let connection_file = connection_file.clone();
                self.runtime.spawn(async move {
                    finish_channels(task).await;
                    if let Some(mut child) = child
                        && tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await.is_err()
                        && let Err(e) = child.start_kill()
                    {
                        debug!(error = %e, "kernel process already gone");
                    }
                    remove_connection_file(&connection_file);
                });
                info!(kernel = %self.name, "kernel process stopping");
            }
        }
    }
}

impl Drop for JupyterTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Let queued messages go out, then stop the socket task.
async fn finish_channels(mut task: JoinHandle<()>) {
    if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
        debug!("kernel channels did not close in time");
        task.abort();
    }
}

fn remove_connection_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        debug!(path = %path.display(), error = %e, "failed to remove connection file");
    }
}

// ============================================================================
// Socket task
// ============================================================================

struct Link {
    name: String,
    info: ConnectionInfo,
    signer: Signer,
    session: SessionId,
    inbound: mpsc::UnboundedSender<Value>,
    outbound: mpsc::UnboundedReceiver<(Channel, Value)>,
    ready: Arc<AtomicBool>,
}

struct Sockets {
    shell: DealerSocket,
    control: DealerSocket,
    iopub: SubSocket,
}

/// A freshly launched kernel may not be listening yet.
async fn connect_with_retry<S: Socket>(socket: &mut S, endpoint: &str) -> Result<(), ZmqError> {
    let mut attempt = 0;
    loop {
        match socket.connect(endpoint).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                attempt += 1;
                debug!(endpoint, error = %e, attempt, "kernel socket not reachable yet");
                tokio::time::sleep(CONNECT_RETRY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn open_sockets(info: &ConnectionInfo) -> Result<Sockets, ZmqError> {
    let mut shell = DealerSocket::new();
    connect_with_retry(&mut shell, &info.endpoint(info.shell_port)).await?;
    let mut control = DealerSocket::new();
    connect_with_retry(&mut control, &info.endpoint(info.control_port)).await?;
    let mut iopub = SubSocket::new();
    connect_with_retry(&mut iopub, &info.endpoint(info.iopub_port)).await?;
    iopub.subscribe("").await?;
    Ok(Sockets {
        shell,
        control,
        iopub,
    })
}

fn to_zmq(frames: Vec<Bytes>) -> ZmqMessage {
    let mut frames = frames.into_iter();
    let mut message = ZmqMessage::from(frames.next().unwrap_or_default());
    for frame in frames {
        message.push_back(frame);
    }
    message
}

fn handle_reply(name: &str, signer: &Signer, ready: &AtomicBool, reply: ZmqMessage) {
    match wire::decode(signer, &reply.into_vec()) {
        Ok(reply) => match reply["msg_type"].as_str() {
            Some("kernel_info_reply") => {
                ready.store(true, Ordering::Release);
                info!(kernel = %name, "kernel ready");
            }
            msg_type => debug!(kernel = %name, ?msg_type, "kernel reply"),
        },
        Err(e) => warn!(kernel = %name, error = %e, "dropping bad kernel reply"),
    }
}

async fn run_channels(link: Link) {
    let Link {
        name,
        info,
        signer,
        session,
        inbound,
        mut outbound,
        ready,
    } = link;

    let Sockets {
        mut shell,
        mut control,
        mut iopub,
    } = match open_sockets(&info).await {
        Ok(sockets) => sockets,
        Err(e) => {
            warn!(kernel = %name, error = %e, "failed to connect to kernel");
            return;
        }
    };
    debug!(kernel = %name, "connected to kernel sockets");

    // The reply to this is what confirms readiness.
    let hello = wire::encode(&signer, &message::kernel_info_request(session));
    if let Err(e) = shell.send(to_zmq(hello)).await {
        warn!(kernel = %name, error = %e, "failed to send kernel_info_request");
        return;
    }

    loop {
        tokio::select! {
            received = iopub.recv() => {
                let frames = match received {
                    Ok(frames) => frames,
                    Err(e) => {
                        debug!(kernel = %name, error = %e, "iopub closed");
                        break;
                    }
                };
                match wire::decode(&signer, &frames.into_vec()) {
                    Ok(value) => {
                        if inbound.send(value).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(kernel = %name, error = %e, "dropping bad iopub message"),
                }
            }
            received = shell.recv() => match received {
                Ok(reply) => handle_reply(&name, &signer, &ready, reply),
                Err(e) => {
                    debug!(kernel = %name, error = %e, "shell closed");
                    break;
                }
            },
            received = control.recv() => match received {
                Ok(reply) => handle_reply(&name, &signer, &ready, reply),
                Err(e) => {
                    debug!(kernel = %name, error = %e, "control closed");
                    break;
                }
            },
            next = outbound.recv() => {
                let Some((channel, message)) = next else {
                    break;
                };
                let frames = to_zmq(wire::encode(&signer, &message));
                let sent = match channel {
                    Channel::Shell => shell.send(frames).await,
                    Channel::Control => control.send(frames).await,
                };
                if let Err(e) = sent {
                    warn!(kernel = %name, ?channel, error = %e, "failed to send to kernel");
                }
            }
        }
    }
    debug!(kernel = %name, "kernel channels closed");
}

// ============================================================================
// Tests
// ============================================================================
