use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{BrokerSource, Error, MessageBuffer, Result, SourceMessage};

/// Lifecycle of a [`StreamConsumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Created,
    Started,
    Running,
    Stopping,
    Stopped,
}

/// Background consumer feeding a [`MessageBuffer`] from a
/// [`BrokerSource`].
///
/// Exactly one consumption task runs per instance. [`start`](Self::start)
/// spawns it; [`stop`](Self::stop) cancels it cooperatively and blocks
/// until it has fully exited, so no detached task outlives `stop`. Each
/// delivered message is converted into a
/// [`StreamEvent`](crate::StreamEvent) and pushed into the buffer before
/// it is acknowledged, so a message committed upstream is never lost
/// without first being buffered (later ring eviction is expected and
/// fine; the buffer's capacity, not broker redelivery, governs
/// retention).
///
/// Transient source failures are logged and retried with a fixed backoff
/// until `stop` is called; they never surface to callers, who simply
/// keep polling the buffer.
pub struct StreamConsumer<S: BrokerSource> {
    source: Option<S>,
    buffer: Arc<MessageBuffer>,
    state: Arc<Mutex<ConsumerState>>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
    reconnect_backoff: Duration,
}

impl<S: BrokerSource> StreamConsumer<S> {
    pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

    pub fn new(source: S, buffer: Arc<MessageBuffer>) -> Self {
        let (ready_tx, ready_rx) = watch::channel(false);
        Self {
            source: Some(source),
            buffer,
            state: Arc::new(Mutex::new(ConsumerState::Created)),
            cancel: CancellationToken::new(),
            handle: None,
            ready_tx,
            ready_rx,
            reconnect_backoff: Self::DEFAULT_RECONNECT_BACKOFF,
        }
    }

    /// Override the backoff between reconnect attempts.
    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Spawn the consumption task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] on any call after the first:
    /// a second loop must never be spawned, and the lifecycle is
    /// single-shot (a stopped consumer's source session is released).
    pub fn start(&mut self) -> Result<()> {
        let mut state = lock_state(&self.state);
        if *state != ConsumerState::Created {
            return Err(Error::AlreadyStarted);
        }
        let source = self.source.take().ok_or(Error::AlreadyStarted)?;
        *state = ConsumerState::Started;
        drop(state);

        let worker = Worker {
            buffer: self.buffer.clone(),
            state: self.state.clone(),
            cancel: self.cancel.clone(),
            ready: self.ready_tx.clone(),
            backoff: self.reconnect_backoff,
        };
        self.handle = Some(tokio::spawn(worker.run(source)));
        Ok(())
    }

    /// Cancel the consumption task and wait for it to exit, then release
    /// the source session. Calling `stop` when not started is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        *lock_state(&self.state) = ConsumerState::Stopping;
        self.cancel.cancel();
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "consumer task join failed");
        }
        *lock_state(&self.state) = ConsumerState::Stopped;
        Ok(())
    }

    /// Block until the source has joined the stream, or fail with
    /// [`Error::NotReady`] when the timeout expires first.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let mut ready = self.ready_rx.clone();
        let result = match tokio::time::timeout(timeout, ready.wait_for(|r| *r)).await {
            Ok(Ok(_)) => Ok(()),
            _ => Err(Error::NotReady(timeout)),
        };
        result
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConsumerState {
        *lock_state(&self.state)
    }

    /// The buffer this consumer feeds.
    pub fn buffer(&self) -> &Arc<MessageBuffer> {
        &self.buffer
    }
}

impl<S: BrokerSource> Drop for StreamConsumer<S> {
    fn drop(&mut self) {
        // Best effort: a consumer dropped without stop() still signals
        // its task to exit instead of leaving it pinned on recv().
        self.cancel.cancel();
    }
}

fn lock_state(state: &Mutex<ConsumerState>) -> std::sync::MutexGuard<'_, ConsumerState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct Worker {
    buffer: Arc<MessageBuffer>,
    state: Arc<Mutex<ConsumerState>>,
    cancel: CancellationToken,
    ready: watch::Sender<bool>,
    backoff: Duration,
}

enum Flow {
    Cancelled,
    Ended,
    Failed,
}

impl Worker {
    async fn run<S: BrokerSource>(self, mut source: S) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = source.connect() => result,
            };

            if let Err(e) = connected {
                tracing::warn!(error = %e, "broker connect failed, backing off");
                if !self.sleep_unless_cancelled().await {
                    break;
                }
                continue;
            }

            let _ = self.ready.send(true);
            *lock_state(&self.state) = ConsumerState::Running;

            match self.consume(&mut source).await {
                Flow::Cancelled | Flow::Ended => break,
                Flow::Failed => {
                    if !self.sleep_unless_cancelled().await {
                        break;
                    }
                }
            }
        }

        *lock_state(&self.state) = ConsumerState::Stopped;
        // Dropping the source here releases the underlying session.
    }

    async fn consume<S: BrokerSource>(&self, source: &mut S) -> Flow {
        loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Flow::Cancelled,
                received = source.recv() => received,
            };

            match received {
                Ok(Some(message)) => self.handle_message(source, message).await,
                Ok(None) => {
                    tracing::debug!("stream ended");
                    return Flow::Ended;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stream receive failed, reconnecting");
                    return Flow::Failed;
                }
            }
        }
    }

    async fn handle_message<S: BrokerSource>(&self, source: &mut S, message: SourceMessage) {
        self.buffer.push(message.to_event());
        // Ack unconditionally once buffered; the ring's capacity, not
        // broker redelivery, governs retention from here on.
        if let Err(e) = source.ack(&message).await {
            tracing::warn!(
                topic = %message.topic,
                offset = message.offset,
                error = %e,
                "failed to acknowledge message"
            );
        }
    }

    /// Returns false if cancellation ended the sleep.
    async fn sleep_unless_cancelled(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.backoff) => true,
        }
    }
}
