//! One verified command/response exchange, with bounded retry.
//!
//! The transport owns the only automatic retry in the system. Higher
//! layers see deterministic outcomes: a command either produced a
//! checksum-verified reply payload or a final [`BusError`]. Retrying a
//! non-idempotent tag operation blindly is how pages get double-written,
//! so nothing above this layer retries at all.

use std::time::Duration;

use tracing::{debug, trace};

use crate::bus::BusLink;
use crate::error::BusError;
use crate::frame;

/// How long the chip gets to acknowledge a command frame.
///
/// The ACK arrives within microseconds on a healthy bus; this window is
/// deliberately short so a dead chip fails fast as `NoAck`.
const ACK_TIMEOUT: Duration = Duration::from_millis(100);

/// Bounded-retry policy for transient bus faults.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per exchange (first try included).
    pub attempts: u32,

    /// Base backoff after a failed attempt; grows linearly with the
    /// attempt number.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: tagdock_core::constants::DEFAULT_RETRY_ATTEMPTS,
            backoff: Duration::from_millis(tagdock_core::constants::DEFAULT_RETRY_BACKOFF_MS),
        }
    }
}

/// Framed exchanges over a [`BusLink`].
///
/// `exchange` sends one command frame, waits for the ACK, reads and
/// validates the reply frame, and returns the reply payload
/// (`[response_code, data...]`). `Timeout`/`NoAck` faults are retried
/// per the policy; `Garbled` and IO faults escalate immediately. The
/// cumulative time across attempts and backoff never exceeds the
/// caller's budget.
#[derive(Debug)]
pub struct Transport<L: BusLink> {
    link: L,
    retry: RetryPolicy,
}

impl<L: BusLink> Transport<L> {
    pub fn new(link: L, retry: RetryPolicy) -> Self {
        Self { link, retry }
    }

    /// Perform one exchange, expecting up to `expected_data_len` data
    /// bytes in the reply.
    ///
    /// # Errors
    ///
    /// Returns the final [`BusError`] once the retry policy or the
    /// caller's budget is exhausted.
    pub async fn exchange(
        &mut self,
        command_frame: &[u8],
        expected_data_len: usize,
        budget: Duration,
    ) -> Result<Vec<u8>, BusError> {
        let started = tokio::time::Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let remaining = budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(BusError::Timeout);
            }

            match self
                .exchange_once(command_frame, expected_data_len, remaining)
                .await
            {
                Ok(payload) => return Ok(payload),
                Err(e) if e.is_transient() && attempt < self.retry.attempts => {
                    let backoff = self.retry.backoff * attempt;
                    let remaining = budget.saturating_sub(started.elapsed());
                    if backoff >= remaining {
                        // Retrying would blow the caller's budget.
                        return Err(e);
                    }
                    debug!(attempt, error = %e, "transient bus fault, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn exchange_once(
        &mut self,
        command_frame: &[u8],
        expected_data_len: usize,
        budget: Duration,
    ) -> Result<Vec<u8>, BusError> {
        let started = tokio::time::Instant::now();
        self.link.transmit(command_frame).await?;

        let ack_window = ACK_TIMEOUT.min(budget);
        let ack = match self.link.receive(frame::ACK_FRAME.len(), ack_window).await {
            Ok(bytes) => bytes,
            Err(BusError::Timeout) => return Err(BusError::NoAck),
            Err(e) => return Err(e),
        };
        if !frame::is_ack(&ack) {
            trace!(bytes = ?ack, "expected ACK, got noise");
            return Err(BusError::NoAck);
        }

        let remaining = budget.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(BusError::Timeout);
        }
        let raw = self
            .link
            .receive(expected_data_len + frame::FRAME_OVERHEAD, remaining)
            .await?;
        frame::parse_response(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ACK_FRAME, build_command, build_response};
    use std::collections::VecDeque;

    /// Scripted link: each transmit consumes one script entry describing
    /// what the chip "sends back".
    struct ScriptedLink {
        script: VecDeque<Vec<Vec<u8>>>,
        transmits: usize,
    }

    impl ScriptedLink {
        fn new(script: Vec<Vec<Vec<u8>>>) -> Self {
            Self {
                script: script.into(),
                transmits: 0,
            }
        }
    }

    impl BusLink for ScriptedLink {
        async fn transmit(&mut self, _frame: &[u8]) -> Result<(), BusError> {
            self.transmits += 1;
            Ok(())
        }

        async fn receive(
            &mut self,
            _max_len: usize,
            _timeout: Duration,
        ) -> Result<Vec<u8>, BusError> {
            match self.script.front_mut().and_then(|replies| {
                if replies.is_empty() {
                    None
                } else {
                    Some(replies.remove(0))
                }
            }) {
                Some(bytes) => {
                    if self
                        .script
                        .front()
                        .is_some_and(|replies| replies.is_empty())
                    {
                        self.script.pop_front();
                    }
                    Ok(bytes)
                }
                None => {
                    self.script.pop_front();
                    Err(BusError::Timeout)
                }
            }
        }
    }

    fn ok_reply(code: u8, data: &[u8]) -> Vec<Vec<u8>> {
        vec![ACK_FRAME.to_vec(), build_response(code, data)]
    }

    #[tokio::test]
    async fn successful_exchange_returns_payload() {
        let link = ScriptedLink::new(vec![ok_reply(0x03, &[0x32, 0x01, 0x06, 0x07])]);
        let mut transport = Transport::new(link, RetryPolicy::default());

        let payload = transport
            .exchange(&build_command(0x02, &[]), 4, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(payload, [0x03, 0x32, 0x01, 0x06, 0x07]);
    }

    #[tokio::test]
    async fn missing_ack_is_retried_then_succeeds() {
        let link = ScriptedLink::new(vec![
            vec![], // silence: NoAck
            ok_reply(0x15, &[]),
        ]);
        let mut transport = Transport::new(
            link,
            RetryPolicy {
                attempts: 3,
                backoff: Duration::from_millis(1),
            },
        );

        let payload = transport
            .exchange(
                &build_command(0x14, &[0x01, 0x14, 0x01]),
                0,
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(payload, [0x15]);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let link = ScriptedLink::new(vec![vec![], vec![], vec![], vec![], vec![]]);
        let mut transport = Transport::new(
            link,
            RetryPolicy {
                attempts: 3,
                backoff: Duration::from_millis(1),
            },
        );

        let err = transport
            .exchange(&build_command(0x02, &[]), 4, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NoAck));
        assert_eq!(transport.link.transmits, 3);
    }

    #[tokio::test]
    async fn garbled_reply_is_not_retried() {
        let mut bad = build_response(0x03, &[0x32, 0x01, 0x06, 0x07]);
        let dcs_at = bad.len() - 2;
        bad[dcs_at] ^= 0xFF;
        let link = ScriptedLink::new(vec![
            vec![ACK_FRAME.to_vec(), bad],
            ok_reply(0x03, &[0x32, 0x01, 0x06, 0x07]),
        ]);
        let mut transport = Transport::new(link, RetryPolicy::default());

        let err = transport
            .exchange(&build_command(0x02, &[]), 4, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Garbled(_)));
        assert_eq!(transport.link.transmits, 1);
    }

    #[tokio::test]
    async fn retry_respects_caller_budget() {
        // Every attempt is silent; a large backoff would exceed the
        // budget, so the transport must give up instead of sleeping.
        let link = ScriptedLink::new(vec![]);
        let mut transport = Transport::new(
            link,
            RetryPolicy {
                attempts: 10,
                backoff: Duration::from_secs(5),
            },
        );

        let started = std::time::Instant::now();
        let err = transport
            .exchange(&build_command(0x02, &[]), 4, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
