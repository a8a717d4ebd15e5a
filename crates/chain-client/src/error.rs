//! Error taxonomy for chain interaction. Grounded on `evm-provider/src/error.rs`'s
//! categorized, `#[non_exhaustive]`, predicate-method shape.

use thiserror::Error;

/// Result alias for chain-client operations.
pub type Result<T> = std::result::Result<T, ChainError>;

/// The `NoNextInterval` custom-error selector (spec §4.4 scheduler error taxonomy).
pub const NO_NEXT_INTERVAL_SELECTOR: [u8; 4] = [0x3c, 0xdc, 0x51, 0xd3];

/// Errors surfaced by contract calls and transaction submission.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChainError {
    // ─────────────────────────────────────────────────────────────────────────
    // Transient transport
    // ─────────────────────────────────────────────────────────────────────────
    /// The RPC transport timed out or the connection was dropped.
    #[error("transport error calling {method}: {source}")]
    Transport {
        /// The contract method being called when the error occurred.
        method: &'static str,
        /// Underlying transport error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Protocol logical
    // ─────────────────────────────────────────────────────────────────────────
    /// The coordinator has not yet opened interval 1 for this subscription.
    #[error("no next interval available for subscription")]
    NoNextInterval,

    /// An arithmetic over/underflow panic from the chain, treated as "already executed".
    #[error("arithmetic error from chain (interval already executed)")]
    ArithmeticAlreadyExecuted,

    /// The submitted transaction's nonce was already consumed by a racing submission.
    #[error("nonce collision: {0}")]
    NonceCollision(String),

    // ─────────────────────────────────────────────────────────────────────────
    // Subscription terminal
    // ─────────────────────────────────────────────────────────────────────────
    /// The subscription id does not exist on-chain (or was removed).
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(u64),

    /// Simulation reverted, or the client address was zero.
    #[error("execution reverted: {0}")]
    ExecutionReverted(String),

    // ─────────────────────────────────────────────────────────────────────────
    // Programmer/config
    // ─────────────────────────────────────────────────────────────────────────
    /// A contract address could not be parsed from configuration.
    #[error("invalid contract address: {0}")]
    InvalidAddress(String),

    /// ABI decoding of a contract return value failed.
    #[error("abi decode error: {0}")]
    AbiDecode(String),
}

impl ChainError {
    /// True for transient errors that should be retried rather than propagated to hooks
    /// (spec §7, "Transient transport" row).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// True for protocol-logical errors: treat as already-done, never count toward a retry
    /// cap (spec §7, "Protocol logical" row).
    #[must_use]
    pub const fn is_protocol_logical(&self) -> bool {
        matches!(
            self,
            Self::NoNextInterval | Self::ArithmeticAlreadyExecuted | Self::NonceCollision(_)
        )
    }

    /// True for errors that should permanently untrack the subscription (spec §7,
    /// "Subscription terminal" row).
    #[must_use]
    pub const fn is_subscription_terminal(&self) -> bool {
        matches!(self, Self::SubscriptionNotFound(_) | Self::ExecutionReverted(_))
    }

    /// True for nonce-collision variants specifically, used by the handler to silently drop
    /// the error instead of firing `on_request_failed` (spec §4.5 step 12).
    #[must_use]
    pub const fn is_nonce_collision(&self) -> bool {
        matches!(self, Self::NonceCollision(_))
    }
}
