//! ChatVault core: configuration, errors and the per-operation context.

pub mod config;
pub mod context;
pub mod error;

pub use config::{AnnSettings, ChatVaultConfig, DataPaths, IndexConfig};
pub use context::OpContext;
pub use error::{Error, Result};
