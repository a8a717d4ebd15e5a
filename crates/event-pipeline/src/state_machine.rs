//! The connection state machine, factored out as pure transition logic so it can
//! be unit-tested without any real transport.
//!
//! Grounded on `ghostnet-indexer/src/indexer/realtime_processor.rs`'s outer
//! reconnect-loop-around-an-inner-subscription-loop shape, generalized from MegaETH's
//! mini-block realtime API (not carried over — MegaETH-specific) to the spec's
//! WS-then-HTTP-fallback machine.

use std::time::Duration;

/// Connection states of the reconnection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not yet started.
    Init,
    /// Attempting a WebSocket connection; carries the attempt number (1-based).
    WsConnecting {
        /// Which attempt this is.
        attempt: u32,
    },
    /// Live over WebSocket.
    WsActive,
    /// Degraded to HTTP polling, with a background WS recovery loop running.
    HttpFallback,
}

/// Timing configuration for the state machine.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    /// Time allowed for a WS connect attempt to yield a current block number.
    pub ws_connect_timeout: Duration,
    /// Maximum number of WS connect retries before falling back to HTTP.
    pub ws_max_connect_retries: u32,
    /// Delay between WS connect retries.
    pub ws_connect_retry_delay: Duration,
    /// HTTP poll interval while in `HttpFallback`.
    pub polling_interval: Duration,
    /// Interval between WS recovery attempts while in `HttpFallback`.
    pub ws_recovery_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ws_connect_timeout: Duration::from_secs(10),
            ws_max_connect_retries: 3,
            ws_connect_retry_delay: Duration::from_secs(2),
            polling_interval: Duration::from_secs(12),
            ws_recovery_interval: Duration::from_secs(60),
        }
    }
}

/// Outcome of a single WS connect attempt, fed into [`ConnectionState::next_after_ws_attempt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsAttemptOutcome {
    /// The provider returned a current block number within the timeout.
    Connected,
    /// The attempt timed out or errored.
    Failed,
}

impl ConnectionState {
    /// `start()`: `INIT -> WS_CONNECTING` if a WS URL is configured, else straight to
    /// `HTTP_FALLBACK` (no WS URL means the recovery loop never runs).
    #[must_use]
    pub const fn on_start(ws_configured: bool) -> Self {
        if ws_configured {
            Self::WsConnecting { attempt: 1 }
        } else {
            Self::HttpFallback
        }
    }

    /// Apply the outcome of one WS connect attempt while in `WsConnecting`.
    ///
    /// Returns the next state. Panics (via `debug_assert`) if called outside `WsConnecting`,
    /// since that would indicate a caller bug, not a runtime condition.
    #[must_use]
    pub fn on_ws_attempt(self, outcome: WsAttemptOutcome, config: &ConnectionConfig) -> Self {
        let Self::WsConnecting { attempt } = self else {
            debug_assert!(false, "on_ws_attempt called outside WsConnecting: {self:?}");
            return self;
        };
        match outcome {
            WsAttemptOutcome::Connected => Self::WsActive,
            WsAttemptOutcome::Failed if attempt < config.ws_max_connect_retries => {
                Self::WsConnecting { attempt: attempt + 1 }
            }
            WsAttemptOutcome::Failed => Self::HttpFallback,
        }
    }

    /// A previously-active WS connection was lost; re-enter the connect cycle.
    #[must_use]
    pub const fn on_ws_closed(self) -> Self {
        Self::WsConnecting { attempt: 1 }
    }

    /// A background recovery attempt from `HttpFallback` succeeded.
    #[must_use]
    pub const fn on_recovery_succeeded(self) -> Self {
        Self::WsActive
    }

    /// `stop()`: any state returns to `Init`.
    #[must_use]
    pub const fn on_stop(self) -> Self {
        Self::Init
    }

    /// Whether the background WS-recovery loop should be running in this state.
    #[must_use]
    pub const fn recovery_loop_active(self) -> bool {
        matches!(self, Self::HttpFallback)
    }

    /// Whether HTTP polling should be running in this state.
    #[must_use]
    pub const fn polling_active(self) -> bool {
        matches!(self, Self::HttpFallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_without_ws_url_goes_straight_to_http_fallback() {
        assert_eq!(ConnectionState::on_start(false), ConnectionState::HttpFallback);
    }

    #[test]
    fn start_with_ws_url_begins_connecting() {
        assert_eq!(ConnectionState::on_start(true), ConnectionState::WsConnecting { attempt: 1 });
    }

    #[test]
    fn successful_connect_reaches_active() {
        let config = ConnectionConfig::default();
        let state = ConnectionState::WsConnecting { attempt: 1 };
        assert_eq!(state.on_ws_attempt(WsAttemptOutcome::Connected, &config), ConnectionState::WsActive);
    }

    #[test]
    fn retries_up_to_max_then_falls_back() {
        let config = ConnectionConfig { ws_max_connect_retries: 3, ..ConnectionConfig::default() };
        let mut state = ConnectionState::WsConnecting { attempt: 1 };
        state = state.on_ws_attempt(WsAttemptOutcome::Failed, &config);
        assert_eq!(state, ConnectionState::WsConnecting { attempt: 2 });
        state = state.on_ws_attempt(WsAttemptOutcome::Failed, &config);
        assert_eq!(state, ConnectionState::WsConnecting { attempt: 3 });
        state = state.on_ws_attempt(WsAttemptOutcome::Failed, &config);
        assert_eq!(state, ConnectionState::HttpFallback);
    }

    #[test]
    fn ws_closed_while_active_reenters_connecting() {
        assert_eq!(ConnectionState::WsActive.on_ws_closed(), ConnectionState::WsConnecting { attempt: 1 });
    }

    #[test]
    fn recovery_from_fallback_returns_to_active() {
        assert_eq!(ConnectionState::HttpFallback.on_recovery_succeeded(), ConnectionState::WsActive);
    }

    #[test]
    fn stop_always_returns_to_init() {
        assert_eq!(ConnectionState::WsActive.on_stop(), ConnectionState::Init);
        assert_eq!(ConnectionState::HttpFallback.on_stop(), ConnectionState::Init);
    }

    #[test]
    fn only_http_fallback_runs_polling_and_recovery() {
        assert!(ConnectionState::HttpFallback.polling_active());
        assert!(ConnectionState::HttpFallback.recovery_loop_active());
        assert!(!ConnectionState::WsActive.polling_active());
        assert!(!ConnectionState::WsActive.recovery_loop_active());
    }
}
