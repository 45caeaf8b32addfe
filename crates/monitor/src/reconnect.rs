//! Bounded fixed-interval reconnection for the push channel.
//!
//! The policy is an explicit state machine. [`LinkState::on`] is a pure
//! transition function: it takes an observed [`LinkEvent`] and returns
//! the next state plus the [`LinkAction`] the driver must perform. The
//! push adapter owns the driver loop (sockets, sleeps, cancellation);
//! everything decided here is testable without timers.
//!
//! ```text
//! Disconnected --Start--> Connecting(0) --Opened--> Connected
//!                             |                        |
//!                           Lost                     Lost
//!                             v                        v
//!      Connecting(n) <--BackoffElapsed-- Retrying(n) (n <= max_retries)
//!                                            |
//!                                  budget spent -> Exhausted (absorbing)
//! ```

use std::time::Duration;

/// Tunable parameters for the reconnect budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after a failed connect or a dropped connection.
    /// A successful connection restores the full budget.
    pub max_retries: u32,
    /// Fixed delay before each retry.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            interval: Duration::from_secs(3),
        }
    }
}

/// Where the push link currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not started, or shut down.
    Disconnected,
    /// A connect attempt is in flight; `retry` is 0 for the first try.
    Connecting { retry: u32 },
    Connected,
    /// Waiting out the retry interval before attempt number `retry`.
    Retrying { retry: u32 },
    /// Budget spent. No further attempts for this job instance.
    Exhausted,
}

/// Something the driver observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Start,
    Opened,
    /// A connect attempt failed or an open connection closed unexpectedly.
    Lost,
    BackoffElapsed,
    Shutdown,
}

/// What the driver must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    /// Open a new socket.
    Dial,
    /// Pump frames on the open socket until it closes.
    Serve,
    /// Sleep for the given duration, then feed [`LinkEvent::BackoffElapsed`].
    Wait(Duration),
    /// Report permanent disconnection and stop.
    GiveUp,
    /// Stop quietly (explicit shutdown).
    Stop,
    /// The event does not apply in this state.
    Ignore,
}

impl LinkState {
    /// Pure transition function of the reconnect state machine.
    pub fn on(self, event: LinkEvent, policy: &RetryPolicy) -> (LinkState, LinkAction) {
        use LinkAction as A;
        use LinkEvent as E;
        use LinkState as S;

        match (self, event) {
            (S::Exhausted, E::Shutdown) => (S::Exhausted, A::Stop),
            (S::Exhausted, _) => (S::Exhausted, A::GiveUp),
            (_, E::Shutdown) => (S::Disconnected, A::Stop),

            (S::Disconnected, E::Start) => (S::Connecting { retry: 0 }, A::Dial),
            (S::Connecting { .. }, E::Opened) => (S::Connected, A::Serve),
            (S::Connecting { retry }, E::Lost) => schedule_retry(retry + 1, policy),
            (S::Connected, E::Lost) => schedule_retry(1, policy),
            (S::Retrying { retry }, E::BackoffElapsed) => (S::Connecting { retry }, A::Dial),

            (state, _) => (state, A::Ignore),
        }
    }
}

fn schedule_retry(retry: u32, policy: &RetryPolicy) -> (LinkState, LinkAction) {
    if retry > policy.max_retries {
        (LinkState::Exhausted, LinkAction::GiveUp)
    } else {
        (LinkState::Retrying { retry }, LinkAction::Wait(policy.interval))
    }
}
