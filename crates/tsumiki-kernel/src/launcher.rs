//! Kernel discovery and launch.
//!
//! A kernel name resolves, in order, to:
//!
//! 1. a connection file, when it ends in `.json`: attach to a running kernel;
//! 2. a kernel declared in configuration: a stdio child process;
//! 3. an installed Jupyter kernelspec (case-insensitive): launch it over ZeroMQ.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::runtime::Handle;
use tracing::info;

use crate::config::KernelSpec;
use crate::error::KernelError;
use crate::jupyter::{self, JupyterKernelSpec};
use crate::transport::{JupyterTransport, KernelTransport, ProcessTransport};

/// Knows which kernels exist and how to start them.
pub trait KernelLauncher {
    /// Names of the kernels that can be launched, sorted.
    fn available_kernels(&self) -> Vec<String>;

    /// Start the named kernel. Returns immediately; the transport confirms
    /// readiness later.
    fn launch(&self, name: &str) -> Result<Box<dyn KernelTransport>, KernelError>;
}

/// Launches configured stdio kernels and installed Jupyter kernels, and
/// attaches to running ones through their connection file.
pub struct SystemLauncher {
    kernels: BTreeMap<String, KernelSpec>,
    jupyter_dirs: Vec<PathBuf>,
    runtime_dir: PathBuf,
    runtime: Handle,
}

impl SystemLauncher {
    pub fn new(kernels: BTreeMap<String, KernelSpec>, runtime: Handle) -> Self {
        Self {
            kernels,
            jupyter_dirs: jupyter::data_dirs(),
            runtime_dir: jupyter::runtime_dir(),
            runtime,
        }
    }

    /// Search `data_dirs` for kernelspecs and write connection files into
    /// `runtime_dir` instead of the standard Jupyter locations.
    pub fn with_jupyter_dirs(mut self, data_dirs: Vec<PathBuf>, runtime_dir: PathBuf) -> Self {
        self.jupyter_dirs = data_dirs;
        self.runtime_dir = runtime_dir;
        self
    }
}

impl KernelLauncher for SystemLauncher {
    fn available_kernels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.kernels.keys().cloned().collect();
        names.extend(jupyter::find_kernel_specs(&self.jupyter_dirs).into_keys());
        names.sort();
        names.dedup();
        names
    }

    fn launch(&self, name: &str) -> Result<Box<dyn KernelTransport>, KernelError> {
        if name.ends_with(".json") {
            let transport = JupyterTransport::attach(Path::new(name), self.runtime.clone())?;
            return Ok(Box::new(transport));
        }

        if let Some(spec) = self.kernels.get(name) {
            info!(kernel = %name, argv = ?spec.argv, "launching kernel");
            let transport = ProcessTransport::spawn(name, spec.clone(), self.runtime.clone())?;
            return Ok(Box::new(transport));
        }

        let specs = jupyter::find_kernel_specs(&self.jupyter_dirs);
        let dir = specs
            .get(&name.to_lowercase())
            .ok_or_else(|| KernelError::UnknownKernel(name.to_string()))?;
        let spec = JupyterKernelSpec::load(dir)?;
        info!(kernel = %name, argv = ?spec.argv, "launching Jupyter kernel");
        let transport = JupyterTransport::launch(name, spec, &self.runtime_dir, self.runtime.clone())?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn install(data_dir: &Path, name: &str, json: &str) {
        let dir = data_dir.join("kernels").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("kernel.json"), json).unwrap();
    }

    #[tokio::test]
    async fn test_unknown_kernel_is_rejected() {
        let mut kernels = BTreeMap::new();
        kernels.insert("python3".to_string(), KernelSpec::default());
        kernels.insert("julia".to_string(), KernelSpec::default());
        let empty = tempfile::tempdir().unwrap();
        let launcher = SystemLauncher::new(kernels, Handle::current())
            .with_jupyter_dirs(vec![empty.path().to_path_buf()], empty.path().join("runtime"));

        assert_eq!(launcher.available_kernels(), vec!["julia", "python3"]);
        assert!(matches!(
            launcher.launch("ruby"),
            Err(KernelError::UnknownKernel(name)) if name == "ruby"
        ));
    }

    #[tokio::test]
    async fn test_kernelspecs_join_configured_kernels() {
        let data = tempfile::tempdir().unwrap();
        install(data.path(), "Python3", r#"{"argv": ["python3", "-f", "{connection_file}"]}"#);
        install(data.path(), "ir", r#"{"argv": ["R", "-f", "{connection_file}"]}"#);

        let mut kernels = BTreeMap::new();
        kernels.insert("python3".to_string(), KernelSpec::default());
        kernels.insert("sh".to_string(), KernelSpec::default());
        let launcher = SystemLauncher::new(kernels, Handle::current())
            .with_jupyter_dirs(vec![data.path().to_path_buf()], data.path().join("runtime"));

        assert_eq!(launcher.available_kernels(), vec!["ir", "python3", "sh"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_kernelspec_launch_and_bad_connection_file() {
        let data = tempfile::tempdir().unwrap();
        install(data.path(), "broken", r#"{"argv": ["/nonexistent/tsumiki-kernel", "{connection_file}"]}"#);
        let runtime_dir = data.path().join("runtime");
        let launcher = SystemLauncher::new(BTreeMap::new(), Handle::current())
            .with_jupyter_dirs(vec![data.path().to_path_buf()], runtime_dir.clone());

        // Resolved through the kernelspec, case-insensitively, then failed to spawn.
        assert!(matches!(
            launcher.launch("Broken"),
            Err(KernelError::Spawn { name, .. }) if name == "Broken"
        ));
        assert_eq!(std::fs::read_dir(&runtime_dir).unwrap().count(), 0);

        let missing = data.path().join("kernel-404.json");
        assert!(matches!(
            launcher.launch(&missing.to_string_lossy()),
            Err(KernelError::ConnectionFile { .. })
        ));
    }
}
