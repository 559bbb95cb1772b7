//! Request/response correlation under a deadline.
//!
//! The [`Correlator`] owns the routing table (channel name → sender) and at
//! most one open response window. [`Correlator::exec`] opens the window,
//! sends a batch, then waits until either the window holds the target number
//! of responses or the deadline passes. The receive path wakes the waiter
//! directly when the target is reached, so there is no polling interval.
//!
//! ```text
//!   exec ──open window──▶ send batch ──▶ wait ─┬─ count reached (notify) ─┐
//!                                              └─ deadline (timer) ───────┴─▶ close window, return responses
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::{CorrelatorError, Emulator, Message, MessageReceiver, MessageSender};

/// Default response deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Responses gathered for one `exec` call.
#[derive(Debug)]
struct ResponseWindow {
    responses: Vec<Message>,
    target: usize,
}

/// Sends batches of messages and collects the correlated responses.
pub struct Correlator {
    senders: RwLock<HashMap<String, Arc<dyn MessageSender>>>,
    window: Mutex<Option<ResponseWindow>>,
    filled: Notify,
    default_timeout: Duration,
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut channels: Vec<String> = self.senders.read().keys().cloned().collect();
        channels.sort();
        f.debug_struct("Correlator")
            .field("channels", &channels)
            .field("window_open", &self.is_waiting())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Correlator {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            senders: RwLock::new(HashMap::new()),
            window: Mutex::new(None),
            filled: Notify::new(),
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Route outbound messages on `channel` to `sender`.
    pub fn set_sender(&self, channel: impl Into<String>, sender: Arc<dyn MessageSender>) {
        let channel = channel.into();
        if self.senders.write().insert(channel.clone(), sender).is_some() {
            tracing::debug!(%channel, "replaced sender");
        }
    }

    /// Route `emulator`'s channel through this correlator in both directions.
    pub fn attach(self: &Arc<Self>, emulator: &Emulator) {
        self.set_sender(emulator.name(), Arc::new(emulator.clone()));
        emulator.on_receive(self.clone());
    }

    pub fn has_sender(&self, channel: &str) -> bool {
        self.senders.read().contains_key(channel)
    }

    /// Whether a response window is currently open.
    pub fn is_waiting(&self) -> bool {
        self.window.lock().is_some()
    }

    /// Send `outbound` in order and collect responses.
    ///
    /// Returns once `expected` responses have arrived or `timeout` (default:
    /// the correlator's) has elapsed, whichever comes first. The returned
    /// responses are in arrival order and may be fewer than `expected`.
    ///
    /// Fails with [`CorrelatorError::AlreadyWaiting`] if another `exec` is in
    /// progress. Messages for channels without a sender are skipped. Sending
    /// shares the deadline: a send still pending when it passes ends the batch.
    pub async fn exec(
        &self,
        outbound: &[Message],
        expected: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<Message>, CorrelatorError> {
        let deadline = Instant::now() + timeout.unwrap_or(self.default_timeout);
        let window = self.open_window(expected)?;

        for message in outbound {
            let sender = self.senders.read().get(&message.channel).cloned();
            let Some(sender) = sender else {
                tracing::warn!(channel = %message.channel, "no sender for channel; message not sent");
                continue;
            };
            match tokio::time::timeout_at(deadline, sender.send(message)).await {
                Ok(Ok(())) => {}
                Ok(Err(source)) => {
                    return Err(CorrelatorError::Send {
                        channel: message.channel.clone(),
                        source,
                    });
                }
                Err(_) => {
                    tracing::warn!(
                        channel = %message.channel,
                        "response deadline reached while sending; rest of the batch not sent"
                    );
                    return Ok(window.close());
                }
            }
        }

        loop {
            if window.len() >= expected {
                break;
            }
            tokio::select! {
                _ = self.filled.notified() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::debug!(
                        received = window.len(),
                        expected,
                        "response window deadline reached"
                    );
                    break;
                }
            }
        }

        Ok(window.close())
    }

    fn open_window(&self, target: usize) -> Result<WindowGuard<'_>, CorrelatorError> {
        let mut window = self.window.lock();
        if window.is_some() {
            return Err(CorrelatorError::AlreadyWaiting);
        }
        *window = Some(ResponseWindow {
            responses: Vec::new(),
            target,
        });
        tracing::trace!(target, "response window opened");
        Ok(WindowGuard { correlator: self })
    }
}

impl MessageReceiver for Correlator {
    fn receive(&self, message: Message) {
        if !self.has_sender(&message.channel) {
            tracing::warn!(channel = %message.channel, "message from unrouted channel dropped");
            return;
        }
        let mut window = self.window.lock();
        let Some(window) = window.as_mut() else {
            tracing::warn!(
                channel = %message.channel,
                ?message,
                "message received out of step (no open response window); dropped"
            );
            return;
        };
        window.responses.push(message);
        if window.responses.len() >= window.target {
            self.filled.notify_one();
        }
    }
}

/// Closes the response window when `exec` returns or is cancelled.
struct WindowGuard<'a> {
    correlator: &'a Correlator,
}

impl WindowGuard<'_> {
    fn len(&self) -> usize {
        self.correlator
            .window
            .lock()
            .as_ref()
            .map_or(0, |w| w.responses.len())
    }

    fn close(self) -> Vec<Message> {
        let responses = self
            .correlator
            .window
            .lock()
            .take()
            .map(|w| w.responses)
            .unwrap_or_default();
        tracing::trace!(received = responses.len(), "response window closed");
        responses
    }
}

impl Drop for WindowGuard<'_> {
    fn drop(&mut self) {
        self.correlator.window.lock().take();
    }
}
