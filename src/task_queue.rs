//! FIFO admission of jobs, at most pool-capacity of them dispatched at once

use crate::{Dispatcher, Job, Metrics, Outcome, RenderError};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info};

struct Submission {
    job: Job,
    reply: oneshot::Sender<Outcome>,
}

struct QueueState {
    pending: AtomicUsize,
    in_flight: AtomicUsize,
    metrics: Arc<Metrics>,
}

impl QueueState {
    fn report_depth(&self) {
        self.metrics
            .set_queue_depth(self.pending.load(Ordering::SeqCst));
    }
}

/// Held by a running dispatch; frees its admission permit when dropped,
/// including when the dispatch panics.
struct InFlightGuard {
    state: Arc<QueueState>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Completion of one submitted job. Resolves exactly once.
#[derive(Debug)]
pub struct JobTicket {
    job_id: String,
    rx: oneshot::Receiver<Outcome>,
}

impl JobTicket {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Future for JobTicket {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Outcome> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(RenderError::Internal(
                    "job was dropped before it completed".to_string(),
                ))
            })
        })
    }
}

pub struct TaskQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<Submission>>>,
    state: Arc<QueueState>,
    capacity: usize,
}

impl TaskQueue {
    /// Start the admission loop. Must be called within a tokio runtime.
    pub fn new(dispatcher: Dispatcher, metrics: Arc<Metrics>) -> Self {
        let capacity = dispatcher.pool().capacity();
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(QueueState {
            pending: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            metrics,
        });

        tokio::spawn(admit(
            receiver,
            dispatcher,
            Arc::new(Semaphore::new(capacity)),
            state.clone(),
        ));

        info!("Task queue started with concurrency {}", capacity);

        Self {
            sender: Mutex::new(Some(sender)),
            state,
            capacity,
        }
    }

    /// Queue `job` behind everything submitted before it.
    ///
    /// Jobs with an unusable target resolve at once with
    /// [`RenderError::InvalidJob`]; after [`close`](Self::close) every
    /// submission resolves with [`RenderError::QueueClosed`].
    pub fn submit(&self, job: Job) -> JobTicket {
        let (reply, rx) = oneshot::channel();
        let ticket = JobTicket {
            job_id: job.id.clone(),
            rx,
        };

        if let Err(e) = job.validate() {
            let _ = reply.send(Err(e));
            return ticket;
        }

        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        let Some(sender) = sender else {
            let _ = reply.send(Err(RenderError::QueueClosed));
            return ticket;
        };

        self.state.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(rejected)) = sender.send(Submission { job, reply }) {
            self.state.pending.fetch_sub(1, Ordering::SeqCst);
            let _ = rejected.reply.send(Err(RenderError::QueueClosed));
        } else {
            self.state.report_depth();
        }

        ticket
    }

    /// Submit and wait for the outcome.
    pub async fn render(&self, job: Job) -> Outcome {
        self.submit(job).await
    }

    /// Jobs waiting for admission
    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::SeqCst)
    }

    /// Jobs currently being dispatched
    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Refuse further submissions. Jobs already queued still run.
    pub fn close(&self) {
        let closed = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .is_some();

        if closed {
            info!("Task queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }
}

/// Admission loop: one permit per dispatched job, taken strictly in
/// submission order.
async fn admit(
    mut receiver: mpsc::UnboundedReceiver<Submission>,
    dispatcher: Dispatcher,
    permits: Arc<Semaphore>,
    state: Arc<QueueState>,
) {
    while let Some(Submission { job, reply }) = receiver.recv().await {
        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                error!("Admission semaphore closed; rejecting job {}", job.id);
                state.pending.fetch_sub(1, Ordering::SeqCst);
                let _ = reply.send(Err(RenderError::QueueClosed));
                continue;
            }
        };

        state.pending.fetch_sub(1, Ordering::SeqCst);
        state.in_flight.fetch_add(1, Ordering::SeqCst);
        state.report_depth();
        debug!("Admitted job {} for {}", job.id, job.target);

        let guard = InFlightGuard {
            state: state.clone(),
            _permit: permit,
        };
        let dispatcher = dispatcher.clone();

        tokio::spawn(async move {
            let outcome = dispatcher.dispatch(job).await;
            drop(guard);
            let _ = reply.send(outcome);
        });
    }

    debug!("Admission loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EngineLog, ScriptedFactory};
    use crate::{Config, DispatchSettings, WorkerPool};
    use tokio_test::assert_pending;

    async fn queue(pool_size: usize) -> (TaskQueue, Arc<EngineLog>) {
        let config = Config {
            pool_size,
            ..Default::default()
        };
        let factory = ScriptedFactory::new();
        let log = factory.log();
        let metrics = Arc::new(Metrics::noop());
        let pool = WorkerPool::new(&config, Arc::new(factory), metrics.clone())
            .await
            .unwrap();
        let dispatcher = Dispatcher::new(pool, DispatchSettings::from_config(&config), metrics.clone());
        (TaskQueue::new(dispatcher, metrics), log)
    }

    #[tokio::test]
    async fn test_invalid_job_never_reaches_pool() {
        let (queue, log) = queue(1).await;

        let result = queue.render(Job::html("mailto:someone@example.com")).await;
        assert!(matches!(result, Err(RenderError::InvalidJob(_))));
        assert!(log.navigations().is_empty());
    }

    #[tokio::test]
    async fn test_closed_queue_rejects() {
        let (queue, _log) = queue(1).await;
        queue.close();

        assert!(queue.is_closed());
        assert!(matches!(
            queue.render(Job::html("https://ok.test")).await,
            Err(RenderError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn test_ticket_carries_job_id() {
        let (queue, _log) = queue(1).await;
        let job = Job::html("https://ok.test");
        let id = job.id.clone();

        let ticket = queue.submit(job);
        assert_eq!(ticket.job_id(), id);
        assert_eq!(ticket.await.unwrap().job_id, id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_pending_and_in_flight() {
        let (queue, _log) = queue(1).await;

        let mut first = tokio_test::task::spawn(queue.submit(Job::html("https://slow.test/100")));
        let second = queue.submit(Job::html("https://ok.test"));
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        assert_pending!(first.poll());
        assert_eq!(queue.in_flight(), 1);
        assert_eq!(queue.pending(), 1);

        assert!(first.await.is_ok());
        assert!(second.await.is_ok());
        assert_eq!(queue.in_flight(), 0);
        assert_eq!(queue.pending(), 0);
    }
}
