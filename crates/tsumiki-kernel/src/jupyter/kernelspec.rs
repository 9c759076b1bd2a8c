//! Installed Jupyter kernelspecs.
//!
//! A kernelspec is a directory `<data dir>/kernels/<name>/` holding a
//! `kernel.json`. Names are matched case-insensitively; when two data
//! directories install the same name, the one searched first wins.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::KernelError;

/// How a kernel wants to be interrupted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptMode {
    #[default]
    Signal,
    Message,
}

/// Parsed `kernel.json`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct JupyterKernelSpec {
    pub argv: Vec<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub interrupt_mode: InterruptMode,
    #[serde(skip)]
    pub resource_dir: PathBuf,
}

impl JupyterKernelSpec {
    pub fn load(dir: &Path) -> Result<Self, KernelError> {
        let path = dir.join("kernel.json");
        let bad = |reason: String| KernelError::KernelSpecFile {
            path: path.clone(),
            reason,
        };
        let text = std::fs::read_to_string(&path).map_err(|e| bad(e.to_string()))?;
        let mut spec: Self = serde_json::from_str(&text).map_err(|e| bad(e.to_string()))?;
        if spec.argv.is_empty() {
            return Err(bad("empty argv".to_string()));
        }
        spec.resource_dir = dir.to_path_buf();
        Ok(spec)
    }

    /// `argv` with `{connection_file}` and `{resource_dir}` filled in.
    pub fn command(&self, connection_file: &Path) -> Vec<String> {
        let connection_file = connection_file.to_string_lossy();
        let resource_dir = self.resource_dir.to_string_lossy();
        self.argv
            .iter()
            .map(|arg| {
                arg.replace("{connection_file}", &connection_file)
                    .replace("{resource_dir}", &resource_dir)
            })
            .collect()
    }
}

/// Jupyter data directories in search order.
///
/// `JUPYTER_PATH` entries come first, then the user data directory
/// (`JUPYTER_DATA_DIR` or the platform default), then the system ones.
pub fn data_dirs() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = std::env::var_os("JUPYTER_PATH")
        .map(|paths| std::env::split_paths(&paths).collect())
        .unwrap_or_default();

    match std::env::var_os("JUPYTER_DATA_DIR") {
        Some(dir) => dirs.push(PathBuf::from(dir)),
        None => dirs.extend(dirs::data_dir().map(|d| d.join("jupyter"))),
    }
    dirs.push(PathBuf::from("/usr/local/share/jupyter"));
    dirs.push(PathBuf::from("/usr/share/jupyter"));
    dirs
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Kernelspec directories under `data_dirs`, keyed by lowercased name.
pub fn find_kernel_specs(data_dirs: &[PathBuf]) -> BTreeMap<String, PathBuf> {
    let mut found = BTreeMap::new();
    for data_dir in data_dirs {
        let Ok(entries) = std::fs::read_dir(data_dir.join("kernels")) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.join("kernel.json").is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let name = name.to_lowercase();
            if !is_valid_name(&name) {
                debug!(path = %path.display(), "skipping kernelspec with invalid name");
                continue;
            }
            found.entry(name).or_insert(path);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn install(data_dir: &Path, name: &str, json: &str) -> PathBuf {
        let dir = data_dir.join("kernels").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("kernel.json"), json).unwrap();
        dir
    }

    const PYTHON: &str = r#"{
        "argv": ["python3", "-m", "ipykernel_launcher", "-f", "{connection_file}"],
        "display_name": "Python 3",
        "language": "python"
    }"#;

    #[test]
    fn test_find_kernel_specs_first_dir_wins() {
        let user = tempfile::tempdir().unwrap();
        let system = tempfile::tempdir().unwrap();
        let mine = install(user.path(), "Python3", PYTHON);
        install(system.path(), "python3", PYTHON);
        install(system.path(), "ir", r#"{"argv": ["R"], "language": "R"}"#);
        // Not a kernelspec: no kernel.json.
        std::fs::create_dir_all(system.path().join("kernels").join("empty")).unwrap();

        let specs = find_kernel_specs(&[
            user.path().to_path_buf(),
            user.path().join("missing"),
            system.path().to_path_buf(),
        ]);
        assert_eq!(specs.keys().collect::<Vec<_>>(), vec!["ir", "python3"]);
        assert_eq!(specs["python3"], mine);
    }

    #[test]
    fn test_load_and_fill_command() {
        let data = tempfile::tempdir().unwrap();
        let dir = install(
            data.path(),
            "python3",
            r#"{
                "argv": ["python3", "-f", "{connection_file}", "--res={resource_dir}"],
                "display_name": "Python 3",
                "language": "python",
                "env": {"PYDEVD_DISABLE_FILE_VALIDATION": "1"},
                "interrupt_mode": "message"
            }"#,
        );

        let spec = JupyterKernelSpec::load(&dir).unwrap();
        assert_eq!(spec.display_name, "Python 3");
        assert_eq!(spec.interrupt_mode, InterruptMode::Message);
        assert_eq!(spec.env["PYDEVD_DISABLE_FILE_VALIDATION"], "1");

        let argv = spec.command(Path::new("/run/kernel-1.json"));
        assert_eq!(argv[2], "/run/kernel-1.json");
        assert_eq!(argv[3], format!("--res={}", dir.display()));
    }

    #[test]
    fn test_load_rejects_empty_argv() {
        let data = tempfile::tempdir().unwrap();
        let dir = install(data.path(), "broken", r#"{"argv": []}"#);
        assert!(matches!(
            JupyterKernelSpec::load(&dir),
            Err(KernelError::KernelSpecFile { .. })
        ));

        let spec = JupyterKernelSpec::load(&install(data.path(), "plain", r#"{"argv": ["k"]}"#))
            .unwrap();
        assert_eq!(spec.interrupt_mode, InterruptMode::Signal);
    }
}
