//! Sharded dispatcher: one logical worker per shard of instance ids.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use common::SagaId;
use contracts::Message;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::engine::{EngineResult, SagaHandler};
use crate::error::{Result, SagaError};

const INBOX_CAPACITY: usize = 1024;

/// First delay before a failed timeout delivery is retried; doubles per
/// attempt up to [`TIMEOUT_RETRY_MAX_DELAY`].
const TIMEOUT_RETRY_INITIAL_DELAY: Duration = Duration::from_secs(1);
const TIMEOUT_RETRY_MAX_DELAY: Duration = Duration::from_secs(300);

/// Receives the outcome of a submitted message.
pub type ResultReceiver = oneshot::Receiver<Result<EngineResult>>;

struct Job<M> {
    instance_id: SagaId,
    message: M,
    reply: oneshot::Sender<Result<EngineResult>>,
}

/// Routes messages to worker tasks by `hash(instance_id) % workers`.
///
/// Messages of one instance are handled one at a time in submission order;
/// distinct instances proceed in parallel. Cloning yields another handle to
/// the same workers.
pub struct SagaDispatcher<M> {
    handler: Arc<dyn SagaHandler<Message = M>>,
    shards: Arc<RwLock<Vec<mpsc::Sender<Job<M>>>>>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<M> Clone for SagaDispatcher<M> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            shards: Arc::clone(&self.shards),
            workers: Arc::clone(&self.workers),
        }
    }
}

impl<M: Message + 'static> SagaDispatcher<M> {
    /// Spawns `workers` worker tasks (at least one) on the current runtime.
    pub fn spawn<H>(handler: Arc<H>, workers: usize) -> Self
    where
        H: SagaHandler<Message = M>,
    {
        let handler: Arc<dyn SagaHandler<Message = M>> = handler;
        let workers = workers.max(1);
        let mut shards = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for shard in 0..workers {
            let (sender, receiver) = mpsc::channel(INBOX_CAPACITY);
            shards.push(sender);
            handles.push(tokio::spawn(run_worker(
                shard,
                Arc::clone(&handler),
                receiver,
            )));
        }
        tracing::info!(workers, "saga dispatcher started");

        Self {
            handler,
            shards: Arc::new(RwLock::new(shards)),
            workers: Arc::new(Mutex::new(handles)),
        }
    }

    /// Correlates a message and queues it; the receiver yields the result.
    pub async fn submit(&self, message: M) -> Result<ResultReceiver> {
        let instance_id = self.handler.correlate(&message)?;
        self.submit_correlated(instance_id, message).await
    }

    /// Queues a message already routed to `instance_id`.
    pub async fn submit_correlated(&self, instance_id: SagaId, message: M) -> Result<ResultReceiver> {
        let (reply, receiver) = oneshot::channel();
        self.enqueue(Job {
            instance_id,
            message,
            reply,
        })
        .await?;
        Ok(receiver)
    }

    /// Submits a message and waits for its result.
    pub async fn dispatch(&self, message: M) -> Result<EngineResult> {
        let receiver = self.submit(message).await?;
        receiver.await.map_err(|_| SagaError::DispatcherClosed)?
    }

    /// Feeds timeout messages from a [`crate::TokioTimeoutScheduler`] channel
    /// into the dispatcher until the channel or the dispatcher closes.
    ///
    /// Timeouts are queued in arrival order. A timeout whose handling fails
    /// with a transient error is queued again after an exponential backoff
    /// until it is handled or the dispatcher closes.
    pub fn forward_timeouts(
        &self,
        mut timeouts: mpsc::UnboundedReceiver<(SagaId, M)>,
    ) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            while let Some((instance_id, message)) = timeouts.recv().await {
                let receiver = match dispatcher
                    .submit_correlated(instance_id.clone(), message.clone())
                    .await
                {
                    Ok(receiver) => receiver,
                    Err(_) => {
                        tracing::debug!("dispatcher closed, no longer forwarding timeouts");
                        break;
                    }
                };
                tokio::spawn(dispatcher.clone().retry_timeout(instance_id, message, receiver));
            }
        })
    }

    /// Waits for the outcome of a timeout delivery and re-queues it while it
    /// fails transiently.
    async fn retry_timeout(self, instance_id: SagaId, message: M, mut receiver: ResultReceiver) {
        let mut delay = TIMEOUT_RETRY_INITIAL_DELAY;
        let mut attempt = 1u32;
        loop {
            let outcome = receiver.await.unwrap_or(Err(SagaError::DispatcherClosed));
            match outcome {
                Ok(_) => return,
                Err(SagaError::DispatcherClosed) => return,
                Err(e) if !e.is_transient() => {
                    tracing::error!(
                        %instance_id,
                        message_type = message.message_type(),
                        error = %e,
                        "timeout delivery failed permanently"
                    );
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        %instance_id,
                        message_type = message.message_type(),
                        attempt,
                        retry_in_secs = delay.as_secs(),
                        error = %e,
                        "timeout delivery failed, retrying"
                    );
                    metrics::counter!("saga_timeout_retries_total").increment(1);
                }
            }

            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(TIMEOUT_RETRY_MAX_DELAY);
            attempt += 1;
            receiver = match self
                .submit_correlated(instance_id.clone(), message.clone())
                .await
            {
                Ok(receiver) => receiver,
                Err(_) => return,
            };
        }
    }

    /// Stops accepting messages, lets workers drain their inboxes and waits
    /// for them to finish.
    pub async fn shutdown(&self) {
        let shards = std::mem::take(&mut *self.shards.write().unwrap_or_else(PoisonError::into_inner));
        drop(shards);

        let handles = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "saga worker panicked");
            }
        }
        tracing::info!("saga dispatcher stopped");
    }

    pub fn is_closed(&self) -> bool {
        self.shards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    async fn enqueue(&self, job: Job<M>) -> Result<()> {
        let sender = {
            let shards = self.shards.read().unwrap_or_else(PoisonError::into_inner);
            if shards.is_empty() {
                return Err(SagaError::DispatcherClosed);
            }
            shards[shard_for(&job.instance_id, shards.len())].clone()
        };
        sender
            .send(job)
            .await
            .map_err(|_| SagaError::DispatcherClosed)
    }
}

fn shard_for(instance_id: &SagaId, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    instance_id.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

async fn run_worker<M: Message + 'static>(
    shard: usize,
    handler: Arc<dyn SagaHandler<Message = M>>,
    mut inbox: mpsc::Receiver<Job<M>>,
) {
    while let Some(job) = inbox.recv().await {
        let result = handler.handle_correlated(job.instance_id, job.message).await;
        if let Err(e) = &result {
            tracing::warn!(shard, error = %e, "message failed");
        }
        // The submitter may have stopped waiting.
        let _ = job.reply.send(result);
    }
    tracing::debug!(shard, "saga worker stopped");
}
