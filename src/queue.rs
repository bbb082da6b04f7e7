use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::{Method, StatusCode};
use tokio::sync::oneshot;
use tracing::debug;

use crate::Result;
use crate::client::Client;
use crate::dispatch::{AttemptResult, attempt_once, retry_decision};
use crate::error::{Error, ErrorCode};
use crate::interceptor::InterceptionAction;
use crate::request::{CancelReason, CancelToken, Request, RequestShared, RequestState};
use crate::response::Response;
use crate::util::lock_unpoisoned;

/// What the queue does with the rest of a batch when one request fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailureMode {
    /// Keep running the remaining requests.
    #[default]
    Continue,
    /// Cancel everything still pending or in flight. Those cancellations are
    /// policy outcomes and count toward the batch error flag; the policy
    /// trips at most once per batch.
    CancelAll,
}

/// Identity of a request as seen by the `before_each` hook.
#[derive(Clone, Debug)]
pub struct RequestInfo {
    pub method: Method,
    pub uri: String,
    pub retry_count: usize,
}

/// A finished attempt as seen by the `after_each` hook. Fires once per
/// attempt, so a retried request reports here more than once.
#[derive(Debug)]
pub struct AttemptView<'a> {
    pub method: &'a Method,
    pub uri: &'a str,
    pub retry_count: usize,
    pub status: Option<StatusCode>,
    pub body: Option<&'a Bytes>,
    pub error: Option<AttemptError>,
}

/// Failure descriptor carried by [`AttemptView`]. The error itself goes to
/// the request's handle; the hook observes it after the handle resolved.
#[derive(Clone, Debug)]
pub struct AttemptError {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&Error> for AttemptError {
    fn from(error: &Error) -> Self {
        Self {
            code: error.code(),
            message: error.to_string(),
        }
    }
}

pub type BeforeAllHook = Arc<dyn Fn() + Send + Sync>;
pub type BeforeEachHook = Arc<dyn Fn(&RequestInfo) + Send + Sync>;
pub type AfterEachHook = Arc<dyn Fn(&AttemptView<'_>) + Send + Sync>;
pub type AfterAllHook = Arc<dyn Fn(bool) + Send + Sync>;

struct Job {
    request: Request,
    tx: oneshot::Sender<Result<Response>>,
}

struct QueueState {
    pending: VecDeque<Job>,
    active: usize,
    retry_pending: usize,
    live: HashMap<u64, Arc<CancelToken>>,
    batch_open: bool,
    before_all_fired: bool,
    batch_failed: bool,
    policy_triggered: bool,
    started: usize,
    completed: usize,
    succeeded: usize,
}

impl QueueState {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            active: 0,
            retry_pending: 0,
            live: HashMap::new(),
            batch_open: false,
            before_all_fired: false,
            batch_failed: false,
            policy_triggered: false,
            started: 0,
            completed: 0,
            succeeded: 0,
        }
    }

    fn operation_count(&self) -> usize {
        self.pending.len() + self.active + self.retry_pending
    }
}

struct QueueInner {
    client: Client,
    max_concurrent: AtomicUsize,
    failure_mode: FailureMode,
    before_all: Option<BeforeAllHook>,
    before_each: Option<BeforeEachHook>,
    after_each: Option<AfterEachHook>,
    after_all: Option<AfterAllHook>,
    state: Mutex<QueueState>,
}

/// Bounded-concurrency request runner with batch lifecycle hooks. Admission
/// is strictly FIFO; at most `max_concurrent` requests are in flight. A batch
/// opens at the first admission after idle and closes, firing `after_all`,
/// when the queue drains back to empty.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

pub struct QueueBuilder {
    client: Client,
    max_concurrent: usize,
    failure_mode: FailureMode,
    before_all: Option<BeforeAllHook>,
    before_each: Option<BeforeEachHook>,
    after_each: Option<AfterEachHook>,
    after_all: Option<AfterAllHook>,
}

impl QueueBuilder {
    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    pub fn before_all(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.before_all = Some(Arc::new(hook));
        self
    }

    pub fn before_each(mut self, hook: impl Fn(&RequestInfo) + Send + Sync + 'static) -> Self {
        self.before_each = Some(Arc::new(hook));
        self
    }

    pub fn after_each(mut self, hook: impl Fn(&AttemptView<'_>) + Send + Sync + 'static) -> Self {
        self.after_each = Some(Arc::new(hook));
        self
    }

    pub fn after_all(mut self, hook: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.after_all = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Queue {
        Queue {
            inner: Arc::new(QueueInner {
                client: self.client,
                max_concurrent: AtomicUsize::new(self.max_concurrent),
                failure_mode: self.failure_mode,
                before_all: self.before_all,
                before_each: self.before_each,
                after_each: self.after_each,
                after_all: self.after_all,
                state: Mutex::new(QueueState::new()),
            }),
        }
    }
}

/// Caller-facing handle to one queued request: cancel it, observe its state,
/// await its outcome.
pub struct RequestHandle {
    method: Method,
    uri: String,
    shared: RequestShared,
    receiver: oneshot::Receiver<Result<Response>>,
}

impl RequestHandle {
    pub(crate) fn new(
        method: Method,
        uri: String,
        shared: RequestShared,
        receiver: oneshot::Receiver<Result<Response>>,
    ) -> Self {
        Self {
            method,
            uri,
            shared,
            receiver,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.uri
    }

    pub fn state(&self) -> RequestState {
        self.shared.state()
    }

    pub fn retry_count(&self) -> usize {
        self.shared.retry_count.load(Ordering::Acquire)
    }

    /// Idempotent user cancellation. Wins any race with the in-flight
    /// transport exchange.
    pub fn cancel(&self) {
        self.shared.token.cancel(CancelReason::User);
    }

    /// Resolves exactly once, after retries have settled.
    pub async fn outcome(self) -> Result<Response> {
        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::cancelled(&self.method, &self.uri)),
        }
    }
}

impl Queue {
    pub fn builder(client: Client) -> QueueBuilder {
        QueueBuilder {
            client,
            max_concurrent: 1,
            failure_mode: FailureMode::default(),
            before_all: None,
            before_each: None,
            after_each: None,
            after_all: None,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent.load(Ordering::Acquire)
    }

    /// Adjusts the bound at runtime. Raising it admits waiting requests
    /// immediately; lowering it takes effect as in-flight requests settle.
    pub fn set_max_concurrent(&self, max_concurrent: usize) {
        self.inner
            .max_concurrent
            .store(max_concurrent.max(1), Ordering::Release);
        let (jobs, fire_before_all) = {
            let mut state = lock_unpoisoned(&self.inner.state);
            self.inner.admit_locked(&mut state)
        };
        self.inner.spawn_admitted(jobs, fire_before_all);
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.inner.failure_mode
    }

    /// Pending plus in-flight plus retry-waiting requests.
    pub fn operation_count(&self) -> usize {
        lock_unpoisoned(&self.inner.state).operation_count()
    }

    pub fn active_count(&self) -> usize {
        lock_unpoisoned(&self.inner.state).active
    }

    /// Admissions in the current batch. Resets when the next batch opens.
    pub fn started_count(&self) -> usize {
        lock_unpoisoned(&self.inner.state).started
    }

    /// Terminal settlements in the current batch, cancellations included.
    pub fn completed_count(&self) -> usize {
        lock_unpoisoned(&self.inner.state).completed
    }

    /// Successful settlements in the current batch. Resets when the next
    /// batch opens.
    pub fn succeeded_count(&self) -> usize {
        lock_unpoisoned(&self.inner.state).succeeded
    }

    /// Accepts the request and returns immediately; execution is driven by
    /// the queue's admission pump.
    pub fn enqueue(&self, request: Request) -> RequestHandle {
        let shared = request.shared();
        let method = request.method.clone();
        let uri = request.uri_text.clone();
        let (tx, receiver) = oneshot::channel();
        shared.set_state(RequestState::Queued);

        let (jobs, fire_before_all) = {
            let mut state = lock_unpoisoned(&self.inner.state);
            if !state.batch_open {
                state.batch_open = true;
                state.before_all_fired = false;
                state.batch_failed = false;
                state.policy_triggered = false;
                state.started = 0;
                state.completed = 0;
                state.succeeded = 0;
            }
            state.pending.push_back(Job { request, tx });
            self.inner.admit_locked(&mut state)
        };
        self.inner.spawn_admitted(jobs, fire_before_all);

        RequestHandle {
            method,
            uri,
            shared,
            receiver,
        }
    }

    /// Cancels every pending and in-flight request as a user action. Does not
    /// set the batch error flag and does not trip the cancel-all policy.
    pub fn cancel_all_operations(&self) {
        let (drained, tokens) = {
            let mut state = lock_unpoisoned(&self.inner.state);
            let drained: Vec<Job> = state.pending.drain(..).collect();
            let tokens: Vec<Arc<CancelToken>> = state.live.values().cloned().collect();
            (drained, tokens)
        };
        for token in tokens {
            token.cancel(CancelReason::User);
        }
        self.inner.settle_drained(drained);
        self.inner.close_batch_if_drained();
    }
}

impl QueueInner {
    /// Moves pending jobs into the active set up to the concurrency bound.
    /// Caller holds the state lock; returned jobs are spawned after release.
    fn admit_locked(&self, state: &mut QueueState) -> (Vec<Job>, bool) {
        let mut admitted = Vec::new();
        let mut fire_before_all = false;
        while state.active < self.max_concurrent.load(Ordering::Acquire) {
            let Some(job) = state.pending.pop_front() else {
                break;
            };
            state.active += 1;
            if job.request.retry_count() == 0 {
                state.started += 1;
            }
            state
                .live
                .insert(job.request.id, job.request.shared().token.clone());
            if !job.request.skip_hooks() && !state.before_all_fired {
                state.before_all_fired = true;
                fire_before_all = true;
            }
            admitted.push(job);
        }
        (admitted, fire_before_all)
    }

    fn spawn_admitted(self: &Arc<Self>, jobs: Vec<Job>, fire_before_all: bool) {
        if fire_before_all && let Some(hook) = &self.before_all {
            hook();
        }
        for job in jobs {
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                inner.run_worker(job).await;
            });
        }
    }

    async fn run_worker(self: Arc<Self>, job: Job) {
        let request = &job.request;
        let shared = request.shared();

        shared.set_state(RequestState::Active);
        let before_each = (!request.skip_hooks())
            .then(|| self.before_each.clone())
            .flatten()
            .map(|hook| {
                let info = RequestInfo {
                    method: request.method.clone(),
                    uri: request.url().to_owned(),
                    retry_count: request.retry_count(),
                };
                move || hook(&info)
            });
        let outcome = attempt_once(
            self.client.transport(),
            self.client.configuration(),
            request,
            before_each
                .as_ref()
                .map(|hook| hook as &(dyn Fn() + Send + Sync)),
        )
        .await;

        match outcome {
            AttemptResult::Success(response) => {
                shared.set_state(RequestState::Completed);
                self.settle(job, Ok(response), None, None);
                return;
            }
            AttemptResult::Failure {
                status,
                body,
                error,
            } => {
                match retry_decision(request, status, body.as_ref(), &error) {
                    InterceptionAction::Retry { delay } => {
                        self.fire_after_each(
                            request,
                            status,
                            body.as_ref(),
                            Some(AttemptError::from(&error)),
                        );
                        shared.retry_count.fetch_add(1, Ordering::AcqRel);
                        shared.set_state(RequestState::RetryPending);
                        debug!(
                            method = %request.method,
                            uri = %request.url(),
                            delay_ms = delay.as_millis() as u64,
                            "request scheduled for retry"
                        );

                        // Release the concurrency slot for the delay.
                        let (jobs, fire_before_all) = {
                            let mut state = lock_unpoisoned(&self.state);
                            state.active -= 1;
                            state.retry_pending += 1;
                            self.admit_locked(&mut state)
                        };
                        self.spawn_admitted(jobs, fire_before_all);

                        let cancelled = tokio::select! {
                            _ = tokio::time::sleep(delay) => false,
                            _ = shared.token.cancelled() => true,
                        };

                        if cancelled {
                            let error = Error::cancelled(&job.request.method, job.request.url());
                            job.request.shared().set_state(RequestState::Cancelled);
                            let mut state = lock_unpoisoned(&self.state);
                            state.retry_pending -= 1;
                            state.live.remove(&job.request.id);
                            drop(state);
                            self.settle_retry_cancelled(job, error);
                            return;
                        }

                        // Back through admission so FIFO order and the
                        // bound still hold for the resend.
                        shared.set_state(RequestState::Queued);
                        let (jobs, fire_before_all) = {
                            let mut state = lock_unpoisoned(&self.state);
                            state.retry_pending -= 1;
                            state.live.remove(&job.request.id);
                            state.pending.push_back(job);
                            self.admit_locked(&mut state)
                        };
                        self.spawn_admitted(jobs, fire_before_all);
                        return;
                    }
                    InterceptionAction::Continue => {
                        if error.code() == ErrorCode::Cancelled {
                            shared.set_state(RequestState::Cancelled);
                        } else {
                            shared.set_state(RequestState::Failed);
                        }
                        self.settle(job, Err(error), status, body);
                        return;
                    }
                }
            }
        }
    }

    fn fire_after_each(
        &self,
        request: &Request,
        status: Option<StatusCode>,
        body: Option<&Bytes>,
        error: Option<AttemptError>,
    ) {
        if request.skip_hooks() {
            return;
        }
        if let Some(hook) = &self.after_each {
            hook(&AttemptView {
                method: &request.method,
                uri: request.url(),
                retry_count: request.retry_count(),
                status,
                body,
                error,
            });
        }
    }

    /// Terminal settlement of an admitted job: resolve the handle, fire
    /// `after_each`, release the slot, apply the failure mode, and close the
    /// batch if drained. The handle resolves strictly before the hook, and
    /// the hook strictly before the slot release that could admit the next
    /// request.
    fn settle(
        self: &Arc<Self>,
        job: Job,
        outcome: Result<Response>,
        status: Option<StatusCode>,
        body: Option<Bytes>,
    ) {
        let reason = job.request.shared().token.reason();
        let contributes_failure = match &outcome {
            Ok(_) => false,
            Err(error) => {
                error.code() != ErrorCode::Cancelled || reason == Some(CancelReason::Policy)
            }
        };
        let trips_policy = matches!(&outcome, Err(error) if error.code() != ErrorCode::Cancelled);
        let is_success = outcome.is_ok();
        let (status, body, attempt_error) = match &outcome {
            Ok(response) => (Some(response.status()), Some(response.body().clone()), None),
            Err(error) => (status, body, Some(AttemptError::from(error))),
        };

        let request_id = job.request.id;
        let _ = job.tx.send(outcome);
        self.fire_after_each(&job.request, status, body.as_ref(), attempt_error);

        let (jobs, fire_before_all, drained, tokens) = {
            let mut state = lock_unpoisoned(&self.state);
            state.active -= 1;
            state.live.remove(&request_id);
            state.completed += 1;
            if is_success {
                state.succeeded += 1;
            }
            if contributes_failure {
                state.batch_failed = true;
            }

            let mut drained = Vec::new();
            let mut tokens = Vec::new();
            if trips_policy
                && self.failure_mode == FailureMode::CancelAll
                && !state.policy_triggered
            {
                state.policy_triggered = true;
                state.batch_failed = true;
                drained = state.pending.drain(..).collect();
                tokens = state.live.values().cloned().collect();
            }

            let (jobs, fire_before_all) = self.admit_locked(&mut state);
            (jobs, fire_before_all, drained, tokens)
        };

        for token in tokens {
            token.cancel(CancelReason::Policy);
        }
        self.settle_drained(drained);
        self.spawn_admitted(jobs, fire_before_all);
        self.close_batch_if_drained();
    }

    /// A retry-waiting job cancelled during its delay. The slot was already
    /// released, so only counters and the handle need settling.
    fn settle_retry_cancelled(self: &Arc<Self>, job: Job, error: Error) {
        let reason = job.request.shared().token.reason();
        {
            let mut state = lock_unpoisoned(&self.state);
            state.completed += 1;
            if reason == Some(CancelReason::Policy) {
                state.batch_failed = true;
            }
        }
        let _ = job.tx.send(Err(error));
        self.close_batch_if_drained();
    }

    /// Never-started jobs removed from the pending queue by a mass cancel.
    /// They fired no hooks, so none fire now.
    fn settle_drained(&self, drained: Vec<Job>) {
        if drained.is_empty() {
            return;
        }
        {
            let mut state = lock_unpoisoned(&self.state);
            state.completed += drained.len();
        }
        for job in drained {
            job.request.shared().set_state(RequestState::Cancelled);
            let error = Error::cancelled(&job.request.method, job.request.url());
            let _ = job.tx.send(Err(error));
        }
    }

    fn close_batch_if_drained(self: &Arc<Self>) {
        let close = {
            let mut state = lock_unpoisoned(&self.state);
            if state.batch_open && state.operation_count() == 0 {
                state.batch_open = false;
                Some((state.before_all_fired, state.batch_failed))
            } else {
                None
            }
        };
        if let Some((had_hooked_requests, batch_failed)) = close
            && had_hooked_requests
            && let Some(hook) = &self.after_all
        {
            hook(batch_failed);
        }
    }
}
