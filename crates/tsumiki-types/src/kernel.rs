//! Kernel session state.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Where a kernel session is in its lifecycle.
///
/// Transitions are driven by messages from the kernel, except `restart`,
/// which puts the session back into `Starting`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum KernelState {
    /// Launched, channel not yet confirmed ready.
    #[default]
    Starting,
    /// Ready, nothing executing.
    Idle,
    /// An execution is in flight.
    Busy,
}

impl KernelState {
    pub fn is_ready(self) -> bool {
        self != KernelState::Starting
    }
}
