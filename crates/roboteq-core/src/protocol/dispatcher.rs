//! Command dispatcher
//!
//! Sequences request/response exchanges over the shared half-duplex link.
//!
//! The transport lives inside a mutex that is held for the whole exchange
//! of a command: encode, write, read, validate, and every retry. A second
//! caller blocks in [`Dispatcher::execute`] (or gets
//! [`ProtocolError::Busy`] from [`Dispatcher::try_execute`]) until the
//! first exchange reaches `Success` or `Failed`, so bytes of two commands
//! can never interleave on the wire and replies arrive in request order.
//!
//! ```text
//! Idle -> Sending -> AwaitingReply -> Success
//!            ^             |
//!            |             +-------> Failed
//!            +-- Retrying <+
//! ```

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use super::{
    Command, CommandKind, FrameCodec, ProtocolError, RawResponse, Transport, TransportError,
    DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_MS,
};

/// Phase of the current (or most recent) exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchState {
    /// No exchange has run yet
    Idle,
    /// Writing the command line
    Sending,
    /// Waiting for the reply line
    AwaitingReply,
    /// Previous attempt failed, about to re-send
    Retrying,
    /// Last exchange returned a valid reply
    Success,
    /// Last exchange failed
    Failed,
}

/// Bounded retry configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Re-sends after the first attempt, for retryable commands
    pub max_retries: u32,
    /// How long each attempt waits for its reply
    pub per_attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            per_attempt_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(max_retries: u32, per_attempt_timeout: Duration) -> Self {
        Self {
            max_retries,
            per_attempt_timeout,
        }
    }

    /// Number of times `command` may be written
    pub fn attempts_for(&self, command: &Command) -> u32 {
        if command.is_retryable() {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    /// Longest time one exchange can block its caller
    pub fn worst_case(&self) -> Duration {
        self.per_attempt_timeout
            .saturating_mul(self.max_retries.saturating_add(1))
    }
}

/// Whether the controller is currently answering, plus diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkState {
    /// Link answered the last exchange (false until the first success)
    pub present: bool,
    /// Last command line written, without terminator
    pub last_command: Option<String>,
    /// Firmware identification from the presence probe
    pub firmware_id: Option<String>,
    /// Exchanges failed in a row since the last success
    pub consecutive_failures: u32,
}

/// Single-flight command/response engine over one transport
pub struct Dispatcher {
    /// Held for an entire exchange
    transport: Mutex<Box<dyn Transport>>,
    link: RwLock<LinkState>,
    state: Mutex<DispatchState>,
    policy: RetryPolicy,
}

impl Dispatcher {
    /// Create a dispatcher owning `transport`
    pub fn new(transport: Box<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            transport: Mutex::new(transport),
            link: RwLock::new(LinkState::default()),
            state: Mutex::new(DispatchState::Idle),
            policy,
        }
    }

    /// Configured retry policy
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Phase of the current or most recent exchange
    pub fn state(&self) -> DispatchState {
        *self.state.lock()
    }

    /// Snapshot of the link state
    pub fn link_state(&self) -> LinkState {
        self.link.read().clone()
    }

    /// Whether the last exchange reached the controller
    pub fn link_present(&self) -> bool {
        self.link.read().present
    }

    pub(crate) fn set_firmware_id(&self, id: String) {
        self.link.write().firmware_id = Some(id);
    }

    /// Run one exchange with the configured retry policy
    pub fn execute_default(&self, command: &Command) -> Result<RawResponse, ProtocolError> {
        self.execute(
            command,
            self.policy.max_retries,
            self.policy.per_attempt_timeout,
        )
    }

    /// Run one exchange, blocking while another one holds the link.
    ///
    /// Blocks for at most `per_attempt_timeout * (max_retries + 1)` once the
    /// link is acquired.
    pub fn execute(
        &self,
        command: &Command,
        max_retries: u32,
        per_attempt_timeout: Duration,
    ) -> Result<RawResponse, ProtocolError> {
        let encoded = FrameCodec::encode(command)?;
        let mut transport = self.transport.lock();
        let policy = RetryPolicy::new(max_retries, per_attempt_timeout);
        self.run_exchange(&mut **transport, command, &encoded, policy)
    }

    /// Like [`execute_default`](Self::execute_default), but fails with
    /// [`ProtocolError::Busy`] instead of waiting for the link
    pub fn try_execute(&self, command: &Command) -> Result<RawResponse, ProtocolError> {
        let encoded = FrameCodec::encode(command)?;
        let mut transport = self.transport.try_lock().ok_or(ProtocolError::Busy)?;
        self.run_exchange(&mut **transport, command, &encoded, self.policy)
    }

    fn run_exchange(
        &self,
        transport: &mut dyn Transport,
        command: &Command,
        encoded: &[u8],
        policy: RetryPolicy,
    ) -> Result<RawResponse, ProtocolError> {
        let line = command.to_string();
        let attempts = policy.attempts_for(command);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                self.transition(DispatchState::Retrying);
            }
            // A reply that arrived after an earlier deadline, or the rest of a
            // truncated line, must not be taken as the answer to this write
            if let Err(e) = transport.clear_input() {
                return Err(self.link_lost(&line, e));
            }

            self.transition(DispatchState::Sending);
            debug!(command = %line, attempt, "sending");
            if let Err(e) = transport.write(encoded) {
                return Err(self.link_lost(&line, e));
            }
            self.link.write().last_command = Some(line.clone());

            self.transition(DispatchState::AwaitingReply);
            let outcome = self
                .await_reply(transport, command, policy.per_attempt_timeout)
                .and_then(|response| validate(command, &line, response));

            match outcome {
                Ok(response) => {
                    self.mark_success();
                    self.transition(DispatchState::Success);
                    return Ok(response);
                }
                Err(ProtocolError::Link(reason)) => {
                    self.mark_link_down();
                    self.transition(DispatchState::Failed);
                    warn!(command = %line, "link error: {}", reason);
                    return Err(ProtocolError::Link(reason));
                }
                Err(e) if e.is_retryable() => {
                    warn!(command = %line, attempt, attempts, "attempt failed: {}", e);
                    last_error = Some(match e {
                        ProtocolError::Timeout { .. } => ProtocolError::Timeout { attempts: attempt },
                        other => other,
                    });
                }
                Err(e) => {
                    warn!(command = %line, "{}", e);
                    self.transition(DispatchState::Failed);
                    return Err(e);
                }
            }
        }

        self.mark_link_down();
        self.transition(DispatchState::Failed);
        Err(last_error.unwrap_or(ProtocolError::Timeout { attempts }))
    }

    /// Read lines until one that is not the echo of `command`
    fn await_reply(
        &self,
        transport: &mut dyn Transport,
        command: &Command,
        timeout: Duration,
    ) -> Result<RawResponse, ProtocolError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let bytes = match transport.read_line(remaining) {
                Ok(bytes) => bytes,
                Err(TransportError::Timeout) => return Err(ProtocolError::Timeout { attempts: 1 }),
                Err(TransportError::Io(e)) => return Err(ProtocolError::Link(e.to_string())),
            };
            debug!(reply = %String::from_utf8_lossy(&bytes).trim_end(), "received");

            let response = FrameCodec::decode(&bytes)?;
            if response.is_echo_of(command) {
                trace!("skipping echo");
                continue;
            }
            return Ok(response);
        }
    }

    fn transition(&self, next: DispatchState) {
        let mut state = self.state.lock();
        trace!(from = ?*state, to = ?next, "dispatch state");
        *state = next;
    }

    fn mark_success(&self) {
        let mut link = self.link.write();
        if !link.present {
            info!("controller link established");
        }
        link.present = true;
        link.consecutive_failures = 0;
    }

    fn mark_link_down(&self) {
        let mut link = self.link.write();
        if link.present {
            warn!("controller link lost");
        }
        link.present = false;
        link.consecutive_failures = link.consecutive_failures.saturating_add(1);
    }

    fn link_lost(&self, line: &str, error: TransportError) -> ProtocolError {
        warn!(command = %line, "transport failure: {}", error);
        self.mark_link_down();
        self.transition(DispatchState::Failed);
        ProtocolError::Link(error.to_string())
    }
}

/// Check a decoded reply against what `command` expects
fn validate(
    command: &Command,
    line: &str,
    response: RawResponse,
) -> Result<RawResponse, ProtocolError> {
    let malformed = |reason: String| ProtocolError::MalformedReply {
        command: line.to_string(),
        reason,
    };

    match command.kind() {
        CommandKind::Runtime => {
            if response.is_bare_ack() {
                Ok(response)
            } else {
                Err(ProtocolError::NegativeAcknowledgement {
                    command: line.to_string(),
                })
            }
        }
        CommandKind::Query => {
            if response.rejected {
                return Err(ProtocolError::NegativeAcknowledgement {
                    command: line.to_string(),
                });
            }
            if !response.acknowledged {
                return Err(malformed("missing acknowledgement".to_string()));
            }
            if response.kind.is_some() {
                return Err(malformed("unexpected command frame".to_string()));
            }
            if let Some(mnemonic) = &response.mnemonic {
                if mnemonic != command.mnemonic() {
                    return Err(malformed(format!("reply is for '{}'", mnemonic)));
                }
            }
            let shape = command.reply_shape();
            if !shape.accepts(response.tokens.len()) {
                return Err(malformed(format!(
                    "expected {}, got {}",
                    shape,
                    response.tokens.len()
                )));
            }
            Ok(response)
        }
    }
}
