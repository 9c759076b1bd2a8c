//! Connection files: where a kernel's sockets live and how to sign messages.

use std::io::Write;
use std::net::{Ipv4Addr, TcpListener};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::KernelError;

/// Contents of a kernel connection file (`kernel-*.json`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub ip: String,
    #[serde(default = "default_transport")]
    pub transport: String,
    pub shell_port: u16,
    pub iopub_port: u16,
    pub stdin_port: u16,
    pub control_port: u16,
    pub hb_port: u16,
    #[serde(default)]
    pub key: String,
    #[serde(default = "default_signature_scheme")]
    pub signature_scheme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_name: Option<String>,
}

fn default_transport() -> String {
    "tcp".to_string()
}

fn default_signature_scheme() -> String {
    "hmac-sha256".to_string()
}

/// Where connection files for launched kernels go: `JUPYTER_RUNTIME_DIR`,
/// else `<data dir>/jupyter/runtime`.
pub fn runtime_dir() -> PathBuf {
    std::env::var_os("JUPYTER_RUNTIME_DIR")
        .map(PathBuf::from)
        .or_else(|| dirs::data_dir().map(|d| d.join("jupyter").join("runtime")))
        .unwrap_or_else(std::env::temp_dir)
}

impl ConnectionInfo {
    /// Fresh connection info on localhost: five free ports and a random key.
    pub fn allocate() -> Result<Self, KernelError> {
        // Hold every listener until all ports are picked so none repeats.
        let listeners = (0..5)
            .map(|_| TcpListener::bind((Ipv4Addr::LOCALHOST, 0)))
            .collect::<std::io::Result<Vec<_>>>()?;
        let ports = listeners
            .iter()
            .map(|l| l.local_addr().map(|a| a.port()))
            .collect::<std::io::Result<Vec<_>>>()?;

        Ok(Self {
            ip: Ipv4Addr::LOCALHOST.to_string(),
            transport: default_transport(),
            shell_port: ports[0],
            iopub_port: ports[1],
            stdin_port: ports[2],
            control_port: ports[3],
            hb_port: ports[4],
            key: uuid::Uuid::new_v4().to_string(),
            signature_scheme: default_signature_scheme(),
            kernel_name: None,
        })
    }

    pub fn read(path: &Path) -> Result<Self, KernelError> {
        let bad = |reason: String| KernelError::ConnectionFile {
            path: path.to_path_buf(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| bad(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| bad(e.to_string()))
    }

    pub fn write(&self, path: &Path) -> Result<(), KernelError> {
        let text = serde_json::to_string_pretty(self).map_err(|e| KernelError::ConnectionFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        // The key signs every message; keep it to the owner.
        #[cfg(unix)]
        std::os::unix::fs::OpenOptionsExt::mode(&mut options, 0o600);
        options.open(path)?.write_all(text.as_bytes())?;
        Ok(())
    }

    /// ZeroMQ endpoint for one of the ports.
    pub fn endpoint(&self, port: u16) -> String {
        match self.transport.as_str() {
            "ipc" => format!("ipc://{}-{port}", self.ip),
            transport => format!("{transport}://{}:{port}", self.ip),
        }
    }
}
