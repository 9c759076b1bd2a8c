//! Jupyter protocol pieces: connection files, kernelspecs and wire framing.
//!
//! The transport that drives real sockets lives in
//! [`JupyterTransport`](crate::transport::JupyterTransport).

pub mod connection;
pub mod kernelspec;
pub mod wire;

pub use connection::{ConnectionInfo, runtime_dir};
pub use kernelspec::{InterruptMode, JupyterKernelSpec, data_dirs, find_kernel_specs};
pub use wire::{Signer, WireError};
