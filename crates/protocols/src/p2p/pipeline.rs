//! Fan-out of per-object jobs over a peer pool.
//!
//! One dispatcher owns the job queue. For every job it takes a connection
//! from the pool and spawns a task that runs one attempt; the task reports
//! back whether the job finished (successfully or with an error already
//! emitted) or should be retried on a different peer.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use libp2p::{PeerId, StreamProtocol};
use reposwarm_primitives::object::ObjectId;
use reposwarm_primitives::repo::{ContentId, RepoId};
use tokio::select;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{FetchError, ObjectFetchError};
use crate::pool::{PeerConnection, PeerPool, PoolHandle};
use crate::SwarmClient;

#[cfg(test)]
#[path = "../tests/p2p/pipeline.rs"]
mod tests;

/// Buffered outputs between the workers and the consumer.
const OUTPUT_CAPACITY: usize = 32;

pub(super) type Output<T> = Result<T, ObjectFetchError>;

/// One attempt at transferring one object over an established connection.
#[async_trait]
pub(super) trait Exchange: Clone + Send + Sync + 'static {
    type Item: Send + 'static;

    /// Runs the attempt for `job`, emitting items as they become available.
    ///
    /// `job.emitted` must be set once anything for the object reached `out`.
    async fn exchange(
        &self,
        conn: &mut PeerConnection,
        job: &mut Job,
        out: &mpsc::Sender<Output<Self::Item>>,
    ) -> Result<(), FetchError>;
}

/// Sends `item`, failing only when the consumer went away.
pub(super) async fn emit<T>(out: &mpsc::Sender<T>, item: T) -> Result<(), FetchError> {
    out.send(item).await.map_err(|_| FetchError::Cancelled)
}

/// One requested object and what earlier attempts learned about it.
#[derive(Debug)]
pub(super) struct Job {
    pub(super) object_id: ObjectId,
    /// Length announced by the last provider that had the object.
    pub(super) declared_size: Option<u64>,
    /// Set once anything for the object reached the consumer; from then on
    /// a failure can no longer be retried elsewhere.
    pub(super) emitted: bool,
    failed_peers: HashSet<PeerId>,
    attempts: usize,
    skips: usize,
    last_error: Option<FetchError>,
}

impl Job {
    fn new(object_id: ObjectId) -> Self {
        Self {
            object_id,
            declared_size: None,
            emitted: false,
            failed_peers: HashSet::new(),
            attempts: 0,
            skips: 0,
            last_error: None,
        }
    }

    fn excludes(&self, peer_id: &PeerId) -> bool {
        self.failed_peers.contains(peer_id)
    }

    /// The error to report once this job cannot be dispatched again.
    fn exhausted(self) -> ObjectFetchError {
        let source = match self.last_error {
            Some(last) => FetchError::Exhausted {
                attempts: self.attempts,
                last: Box::new(last),
            },
            None => FetchError::Cancelled,
        };

        ObjectFetchError {
            object_id: self.object_id,
            source,
        }
    }

    fn cancelled(self) -> ObjectFetchError {
        ObjectFetchError {
            object_id: self.object_id,
            source: FetchError::Cancelled,
        }
    }
}

#[derive(Debug)]
enum JobOutcome {
    Finished,
    Retry(Job),
}

#[derive(Clone, Copy, Debug)]
struct Limits {
    max_attempts: usize,
    max_skips: usize,
}

/// Transfers every object in `object_ids` from providers of `repo_id`.
///
/// Each requested id gets exactly one terminal output while the consumer
/// listens: success as decided by the exchange, or an error. The stream
/// closes once every job terminated.
pub(super) fn dispatch<E: Exchange>(
    client: &SwarmClient,
    token: &CancellationToken,
    repo_id: RepoId,
    protocol: StreamProtocol,
    object_ids: Vec<ObjectId>,
    exchange: E,
) -> ReceiverStream<Output<E::Item>> {
    let (out, receiver) = mpsc::channel(OUTPUT_CAPACITY);

    if object_ids.is_empty() {
        return ReceiverStream::new(receiver);
    }

    let config = client.config();
    let concurrency = config.max_concurrent_peers.max(1);
    let max_attempts = config.max_job_attempts.max(1);

    let limits = Limits {
        max_attempts,
        max_skips: concurrency.saturating_mul(max_attempts),
    };

    let pool = PeerPool::new(
        client.host().clone(),
        token,
        repo_id.clone(),
        concurrency,
        protocol,
        ContentId::for_repo(&repo_id),
        config.dial_backoff,
    );

    let dispatcher = Dispatcher {
        token: token.clone(),
        work: token.child_token(),
        repo_id,
        pool,
        queue: object_ids.into_iter().map(Job::new).collect(),
        tasks: JoinSet::new(),
        exchange,
        out,
        limits,
    };

    drop(tokio::spawn(dispatcher.run()));

    ReceiverStream::new(receiver)
}

struct Dispatcher<E: Exchange> {
    /// The caller's token; cancelling it yields `Cancelled` for open jobs.
    token: CancellationToken,
    /// Stops in-flight attempts, also when the consumer goes away.
    work: CancellationToken,
    repo_id: RepoId,
    pool: PeerPool,
    queue: VecDeque<Job>,
    tasks: JoinSet<JobOutcome>,
    exchange: E,
    out: mpsc::Sender<Output<E::Item>>,
    limits: Limits,
}

impl<E: Exchange> Dispatcher<E> {
    async fn run(mut self) {
        let mut pending = self.queue.len();

        debug!(repo_id=%self.repo_id, jobs=pending, "Starting transfer");

        while pending > 0 {
            select! {
                biased;
                () = self.token.cancelled() => break,
                () = self.out.closed() => {
                    debug!(repo_id=%self.repo_id, "Consumer went away, stopping transfer");
                    self.work.cancel();
                    break;
                }
                Some(joined) = self.tasks.join_next() => {
                    match joined {
                        Ok(JobOutcome::Retry(job)) => self.queue.push_back(job),
                        Ok(JobOutcome::Finished) => pending -= 1,
                        Err(err) => {
                            warn!(repo_id=%self.repo_id, %err, "Transfer task failed");
                            pending -= 1;
                        }
                    }
                }
                conn = self.pool.get_conn(), if !self.queue.is_empty() => {
                    let Some(conn) = conn else {
                        break;
                    };

                    let terminated = self.assign(conn).await;
                    pending = pending.saturating_sub(terminated);
                }
            }
        }

        self.shutdown().await;
    }

    /// Hands `conn` to the first queued job that may use it.
    ///
    /// A connection every queued job excludes is struck, so the pool dials a
    /// replacement while the dispatcher keeps drawing. Each such skip is
    /// charged to every waiting job. Returns how many jobs ran out of skips
    /// and terminated.
    async fn assign(&mut self, conn: PeerConnection) -> usize {
        let peer_id = conn.peer_id;

        if let Some(index) = self.queue.iter().position(|job| !job.excludes(&peer_id)) {
            if let Some(mut job) = self.queue.remove(index) {
                job.attempts = job.attempts.saturating_add(1);
                self.spawn(conn, job);
            }

            return 0;
        }

        debug!(%peer_id, waiting=self.queue.len(), "No queued job may use provider, replacing it");

        self.pool.return_conn(conn, true);

        let max_skips = self.limits.max_skips;

        let (waiting, exhausted): (VecDeque<_>, VecDeque<_>) = self
            .queue
            .drain(..)
            .map(|mut job| {
                job.skips = job.skips.saturating_add(1);
                job
            })
            .partition(|job| job.skips <= max_skips);

        self.queue = waiting;

        let terminated = exhausted.len();

        for job in exhausted {
            debug!(
                %peer_id,
                object_id=%job.object_id,
                skips=job.skips,
                "No eligible provider left for object"
            );

            let _ignored = self.out.send(Err(job.exhausted())).await;
        }

        terminated
    }

    fn spawn(&mut self, conn: PeerConnection, job: Job) {
        let attempt = Attempt {
            exchange: self.exchange.clone(),
            handle: self.pool.handle(),
            out: self.out.clone(),
            token: self.work.clone(),
            limits: self.limits,
        };

        drop(self.tasks.spawn(attempt.run(conn, job)));
    }

    async fn shutdown(mut self) {
        let cancelled = self.token.is_cancelled();

        self.work.cancel();
        self.pool.close();

        if cancelled {
            for job in self.queue.drain(..) {
                if self.out.send(Err(job.cancelled())).await.is_err() {
                    break;
                }
            }
        }

        while let Some(joined) = self.tasks.join_next().await {
            if let Ok(JobOutcome::Retry(job)) = joined {
                if cancelled {
                    let _ignored = self.out.send(Err(job.cancelled())).await;
                }
            }
        }

        debug!(repo_id=%self.repo_id, cancelled, "Transfer finished");
    }
}

struct Attempt<E: Exchange> {
    exchange: E,
    handle: PoolHandle,
    out: mpsc::Sender<Output<E::Item>>,
    token: CancellationToken,
    limits: Limits,
}

impl<E: Exchange> Attempt<E> {
    async fn run(self, mut conn: PeerConnection, mut job: Job) -> JobOutcome {
        let peer_id = conn.peer_id;
        let object_id = job.object_id;

        let result = select! {
            biased;
            () = self.token.cancelled() => Err(FetchError::Cancelled),
            result = self.exchange.exchange(&mut conn, &mut job, &self.out) => result,
        };

        let err = match result {
            Ok(()) => {
                self.handle.return_conn(conn, false);
                return JobOutcome::Finished;
            }
            Err(FetchError::Cancelled) => {
                drop(conn);
                let _ignored = self.out.send(Err(job.cancelled())).await;
                return JobOutcome::Finished;
            }
            Err(err) => err,
        };

        self.handle.return_conn(conn, true);

        if !job.emitted && err.is_retryable() {
            debug!(
                %peer_id,
                %object_id,
                attempt=job.attempts,
                declared_size=?job.declared_size,
                %err,
                "Attempt failed"
            );

            let _ = job.failed_peers.insert(peer_id);
            job.last_error = Some(err);

            if job.attempts < self.limits.max_attempts {
                return JobOutcome::Retry(job);
            }

            let _ignored = self.out.send(Err(job.exhausted())).await;

            return JobOutcome::Finished;
        }

        warn!(%peer_id, %object_id, %err, "Transfer failed");

        let _ignored = self
            .out
            .send(Err(ObjectFetchError {
                object_id,
                source: err,
            }))
            .await;

        JobOutcome::Finished
    }
}
