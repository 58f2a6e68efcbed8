//! Scripted in-memory [`Transport`].
//!
//! Payloads published on the transport are queued and handed to whichever session
//! receives next. Tests can fail a number of dials, drop live sessions, make new
//! sessions die immediately, reject acknowledgements and inject a panic, then inspect
//! what the consumer did.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskflow_analytics_core::transport::TransportFuture;
use taskflow_analytics_core::{ConsumerSession, Delivery, DeliveryTag, Transport, TransportError};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const SOURCE: &str = "in-memory";

/// In-memory transport whose behaviour is scripted by the test.
///
/// Clones share state.
#[derive(Clone, Debug)]
pub struct InMemoryTransport {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    sender: mpsc::UnboundedSender<Delivery>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    next_offset: i64,
    failing_dials: u32,
    lose_on_connect: bool,
    panic_on_next_recv: bool,
    fail_acks: bool,
    lose_on_ack: bool,
    dial_instants: Vec<Instant>,
    live_sessions: Vec<CancellationToken>,
    sessions_opened: usize,
    sessions_closed: usize,
    acked: Vec<DeliveryTag>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    /// Create a transport that accepts every dial.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                sender,
                receiver: tokio::sync::Mutex::new(receiver),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Queue a raw payload.
    pub fn publish(&self, payload: impl Into<Vec<u8>>) {
        self.publish_keyed(None, payload);
    }

    /// Queue a raw payload with a message key.
    pub fn publish_keyed(&self, key: Option<&str>, payload: impl Into<Vec<u8>>) {
        let offset = {
            let mut state = self.inner.state.lock().unwrap();
            let offset = state.next_offset;
            state.next_offset += 1;
            offset
        };
        let delivery = Delivery {
            payload: payload.into(),
            key: key.map(str::to_owned),
            tag: DeliveryTag {
                source: SOURCE.to_string(),
                partition: 0,
                offset,
            },
        };
        // The transport owns the receiver, so the channel never closes.
        let _ = self.inner.sender.send(delivery);
    }

    /// Queue a JSON payload.
    pub fn publish_json(&self, value: &serde_json::Value) {
        self.publish(value.to_string());
    }

    /// Fail the next `count` dials.
    pub fn fail_next_dials(&self, count: u32) {
        self.inner.state.lock().unwrap().failing_dials = count;
    }

    /// Make every new session report loss on its first receive.
    pub fn lose_sessions_on_connect(&self, lose: bool) {
        self.inner.state.lock().unwrap().lose_on_connect = lose;
    }

    /// Make the next receive on any session panic.
    pub fn panic_on_next_recv(&self) {
        self.inner.state.lock().unwrap().panic_on_next_recv = true;
    }

    /// Reject every acknowledgement while `fail` is set.
    pub fn fail_acks(&self, fail: bool) {
        self.inner.state.lock().unwrap().fail_acks = fail;
    }

    /// Make every acknowledgement report the session as lost while `lose` is set.
    pub fn lose_sessions_on_ack(&self, lose: bool) {
        self.inner.state.lock().unwrap().lose_on_ack = lose;
    }

    /// Drop every live session; their next receive reports session loss.
    pub fn drop_sessions(&self) {
        let sessions = std::mem::take(&mut self.inner.state.lock().unwrap().live_sessions);
        for session in sessions {
            session.cancel();
        }
    }

    /// When each dial was attempted, successful or not.
    #[must_use]
    pub fn dial_instants(&self) -> Vec<Instant> {
        self.inner.state.lock().unwrap().dial_instants.clone()
    }

    /// Number of sessions handed out.
    #[must_use]
    pub fn sessions_opened(&self) -> usize {
        self.inner.state.lock().unwrap().sessions_opened
    }

    /// Number of sessions explicitly closed.
    #[must_use]
    pub fn sessions_closed(&self) -> usize {
        self.inner.state.lock().unwrap().sessions_closed
    }

    /// Tags acknowledged so far, in order.
    #[must_use]
    pub fn acked(&self) -> Vec<DeliveryTag> {
        self.inner.state.lock().unwrap().acked.clone()
    }

    /// Poll until at least `count` messages were acknowledged.
    pub async fn wait_until_acked(&self, count: usize) {
        while self.acked().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Poll until at least `count` sessions were opened.
    pub async fn wait_until_sessions_opened(&self, count: usize) {
        while self.sessions_opened() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn dial(&self) -> Result<Box<dyn ConsumerSession>, TransportError> {
        let mut state = self.inner.state.lock().unwrap();
        state.dial_instants.push(Instant::now());

        if state.failing_dials > 0 {
            state.failing_dials -= 1;
            return Err(TransportError::DialFailed("injected dial failure".into()));
        }

        let lost = CancellationToken::new();
        if state.lose_on_connect {
            lost.cancel();
        }
        state.live_sessions.push(lost.clone());
        state.sessions_opened += 1;

        Ok(Box::new(InMemorySession {
            inner: Arc::clone(&self.inner),
            lost,
            closed: false,
        }))
    }
}

impl Transport for InMemoryTransport {
    fn connect(&self) -> TransportFuture<'_, Box<dyn ConsumerSession>> {
        let dialed = self.dial();
        Box::pin(async move { dialed })
    }

    fn describe(&self) -> String {
        SOURCE.to_string()
    }
}

struct InMemorySession {
    inner: Arc<Inner>,
    lost: CancellationToken,
    closed: bool,
}

impl InMemorySession {
    fn lost_error() -> TransportError {
        TransportError::SessionLost("connection dropped".into())
    }
}

impl ConsumerSession for InMemorySession {
    #[allow(clippy::panic)] // Injected on request to exercise unwind handling
    fn recv(&mut self) -> TransportFuture<'_, Delivery> {
        Box::pin(async move {
            let panic_now = std::mem::take(&mut self.inner.state.lock().unwrap().panic_on_next_recv);
            if panic_now {
                panic!("injected panic while receiving");
            }

            let mut receiver = tokio::select! {
                biased;
                () = self.lost.cancelled() => return Err(Self::lost_error()),
                receiver = self.inner.receiver.lock() => receiver,
            };

            tokio::select! {
                biased;
                () = self.lost.cancelled() => Err(Self::lost_error()),
                delivery = receiver.recv() => {
                    delivery.ok_or_else(|| TransportError::SessionLost("transport closed".into()))
                }
            }
        })
    }

    fn ack(&mut self, tag: DeliveryTag) -> TransportFuture<'_, ()> {
        let result = if self.lost.is_cancelled() {
            Err(Self::lost_error())
        } else {
            let mut state = self.inner.state.lock().unwrap();
            if state.lose_on_ack {
                Err(Self::lost_error())
            } else if state.fail_acks {
                Err(TransportError::AckFailed("injected ack failure".into()))
            } else {
                state.acked.push(tag);
                Ok(())
            }
        };
        Box::pin(async move { result })
    }

    fn close(&mut self) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        if !self.closed {
            self.closed = true;
            self.lost.cancel();
            self.inner.state.lock().unwrap().sessions_closed += 1;
        }
        Box::pin(async {})
    }
}
