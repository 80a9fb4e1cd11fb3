//! Kernel-specific error types.

use botnet_types::error::BotNetError;
use thiserror::Error;

/// Kernel error type wrapping BotNetError with boot-time context.
#[derive(Error, Debug)]
pub enum KernelError {
    /// A wrapped BotNetError.
    #[error(transparent)]
    BotNet(#[from] BotNetError),

    /// The kernel failed to boot.
    #[error("Boot failed: {0}")]
    BootFailed(String),
}

/// Alias for kernel results.
pub type KernelResult<T> = Result<T, KernelError>;
