//! User options, read once from a RON file.
//!
//! ```ron
//! (
//!     automatically_open_output: true,
//!     wrap_output: false,
//!     image_provider: "kitty",
//!     kernels: {
//!         "python3": (argv: ["python3", "-m", "tsumiki_kernel_bridge"]),
//!     },
//!     renderers: (
//!         latex: Some((program: "tex2png", args: ["{input}", "{output}"])),
//!     ),
//! )
//! ```
//!
//! Every field is optional; a missing file means all defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// What entering the output window does when it is not open yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EnterOutputBehavior {
    /// First call opens the window, second call enters it.
    #[default]
    OpenThenEnter,
    /// Open and enter in one call.
    OpenAndEnter,
    /// Only enter an already open window.
    NoOpen,
}

/// How to launch one kernel over stdio.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelSpec {
    /// Program followed by its arguments.
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub display_name: Option<String>,
}

/// An external program turning one mimetype into a PNG.
///
/// `{input}` and `{output}` in `args` are replaced by the source and
/// destination file paths. A run taking longer than `timeout_ms` is killed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendererSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_render_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_render_timeout_ms() -> u64 {
    5_000
}

impl RendererSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout_ms: default_render_timeout_ms(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Arguments with placeholders substituted.
    pub fn expand_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|a| a.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }
}

/// Renderers for the mimetypes that need an external program.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Renderers {
    pub svg: Option<RendererSpec>,
    pub plotly: Option<RendererSpec>,
    pub latex: Option<RendererSpec>,
}

impl Default for Renderers {
    fn default() -> Self {
        Self {
            svg: Some(RendererSpec::new("rsvg-convert", &["{input}", "-o", "{output}"])),
            plotly: None,
            latex: None,
        }
    }
}

/// Flat user options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub automatically_open_output: bool,
    pub wrap_output: bool,
    pub output_window_borders: bool,
    pub show_mimetype_debug: bool,
    pub cell_highlight_group: String,
    pub save_path: PathBuf,
    /// `none`, `kitty` or `ueberzug`.
    pub image_provider: String,
    pub copy_output: bool,
    pub enter_output_behavior: EnterOutputBehavior,
    pub kernels: BTreeMap<String, KernelSpec>,
    pub renderers: Renderers,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            automatically_open_output: true,
            wrap_output: false,
            output_window_borders: true,
            show_mimetype_debug: false,
            cell_highlight_group: "CursorLine".to_string(),
            save_path: default_save_path(),
            image_provider: "none".to_string(),
            copy_output: false,
            enter_output_behavior: EnterOutputBehavior::default(),
            kernels: BTreeMap::new(),
            renderers: Renderers::default(),
        }
    }
}

/// Accepted values of `image_provider`.
pub const IMAGE_PROVIDERS: [&str; 3] = ["none", "kitty", "ueberzug"];

/// Errors loading options.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("unknown image provider: '{0}'")]
    UnknownImageProvider(String),
}

impl Options {
    /// Parse options from RON text.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let options: Self = ron::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    /// Reject values serde can't check on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !IMAGE_PROVIDERS.contains(&self.image_provider.as_str()) {
            return Err(ConfigError::UnknownImageProvider(self.image_provider.clone()));
        }
        Ok(())
    }

    /// Load from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_ron(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Load from [`default_config_path`].
    pub fn load_default() -> Result<Self, ConfigError> {
        match default_config_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }
}

/// `<config dir>/tsumiki/config.ron`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tsumiki").join("config.ron"))
}

/// `<data dir>/tsumiki`, falling back to the working directory.
pub fn default_save_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tsumiki")
}

// ============================================================================
// Tests
// ============================================================================
