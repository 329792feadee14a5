//! Forwarding of the four call patterns.
//!
//! # Responsibilities
//! - Decide per call whether answers come from the downstream or locally
//! - Forward each call pattern to the downstream hop, preserving message order
//! - Fall back to local synthesis when the downstream fails transiently,
//!   answering only what the downstream has not answered yet
//! - Surface terminal downstream errors unchanged
//!
//! # Design Decisions
//! - Unary calls and the opening of server streams go through the retry
//!   executor; client and bidirectional streams cannot be replayed and fall
//!   back instead
//! - Downstream calls with a request stream run in their own task so the
//!   inbound pump never waits on the downstream future being polled
//! - Every suspension point in a spawned task also waits on the call's
//!   cancellation token
//!
//! # Data Flow
//! ```text
//! Unary / client stream:
//!     handler → Forwarder → downstream (or synth) → single response
//!
//! Server stream:
//!     handler → spawn writer → downstream reads (or synth) → CallStream
//!
//! Bidirectional:
//!     inbound → reader task → work channel → writer task → CallStream
//!                                  ↕
//!                          downstream driver task
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tonic::transport::Channel;
use tonic::{Request, Response, Status, Streaming};

use crate::config::RelayConfig;
use crate::net::{ConnectionProvider, Hop};
use crate::observability::TracingContext;
use crate::proto::landing_service_client::LandingServiceClient;
use crate::proto::{TalkRequest, TalkResponse};
use crate::resilience::errors::Classify;
use crate::resilience::timeouts::{set_deadline, with_deadline};
use crate::resilience::{RelayError, RetryError, RetryExecutor, RetryPolicy};
use crate::rpc::context::{CallContext, Mode};
use crate::rpc::stream::{emit, CallSender};
use crate::rpc::synth;

type Reply = Result<TalkResponse, Status>;

/// Where the answers of one call come from, resolved once per call.
#[derive(Debug, Clone)]
pub enum Route {
    Local,
    Relay(Hop),
}

impl Route {
    pub fn resolve(provider: &dyn ConnectionProvider) -> Self {
        provider.client().map_or(Route::Local, Route::Relay)
    }

    pub fn mode(&self) -> Mode {
        match self {
            Route::Local => Mode::Local,
            Route::Relay(_) => Mode::Relay,
        }
    }
}

/// Forwarding policy shared by all calls of a node.
#[derive(Debug, Clone)]
pub struct Forwarder {
    executor: RetryExecutor,
    downstream_timeout: Duration,
    node_name: Arc<str>,
    fallback_on_terminal: bool,
    buffer: usize,
}

impl Default for Forwarder {
    fn default() -> Self {
        Self::new(RetryExecutor::default())
    }
}

impl Forwarder {
    pub fn new(executor: RetryExecutor) -> Self {
        Self {
            executor,
            downstream_timeout: Duration::from_secs(2),
            node_name: Arc::from("grpc-relay"),
            fallback_on_terminal: false,
            buffer: 16,
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(RetryExecutor::new(RetryPolicy::from(&config.retries)))
            .with_downstream_timeout(config.timeouts.downstream())
            .with_node_name(&config.relay.node_name)
            .with_fallback_on_terminal(config.relay.fallback_on_terminal)
            .with_buffer(config.relay.stream_buffer)
    }

    pub fn with_downstream_timeout(mut self, timeout: Duration) -> Self {
        self.downstream_timeout = timeout;
        self
    }

    pub fn with_node_name(mut self, name: &str) -> Self {
        self.node_name = Arc::from(name);
        self
    }

    pub fn with_fallback_on_terminal(mut self, enabled: bool) -> Self {
        self.fallback_on_terminal = enabled;
        self
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub fn buffer(&self) -> usize {
        self.buffer
    }

    pub fn downstream_timeout(&self) -> Duration {
        self.downstream_timeout
    }

    /// Whether a downstream failure is answered locally instead of surfaced.
    pub fn falls_back<E: Classify + ?Sized>(&self, error: &E) -> bool {
        self.fallback_on_terminal || error.kind().is_retryable()
    }

    fn outbound<T>(&self, message: T, tracing: &TracingContext) -> Request<T> {
        let mut request = Request::new(message);
        tracing.apply(&mut request, Some(&self.node_name));
        request
    }

    // ------------------------------------------------------------------
    // Unary
    // ------------------------------------------------------------------

    pub async fn talk(
        &self,
        route: &Route,
        tracing: &TracingContext,
        request: TalkRequest,
        ctx: &CallContext,
    ) -> Result<TalkResponse, Status> {
        let hop = match route {
            Route::Local => {
                let response = synth::answer([request.data.as_str()]);
                ctx.finish(response.results.len());
                return Ok(response);
            }
            Route::Relay(hop) => hop,
        };

        // A unary call is cancelled by dropping this future; the token only
        // satisfies the executor.
        let cancel = CancellationToken::new();
        let outcome = self
            .executor
            .execute("Talk", &cancel, || {
                let mut client = hop.client();
                let mut outbound = self.outbound(request.clone(), tracing);
                set_deadline(&mut outbound, self.downstream_timeout);
                let deadline = self.downstream_timeout;
                async move {
                    with_deadline(deadline, client.talk(outbound))
                        .await
                        .map(Response::into_inner)
                }
            })
            .await;

        match outcome {
            Ok(response) => {
                ctx.finish(response.results.len());
                Ok(response)
            }
            Err(err) if self.falls_back(&err) => {
                ctx.fallback(&err, 1);
                let response = synth::answer([request.data.as_str()]);
                ctx.finish(response.results.len());
                Ok(response)
            }
            Err(err) => {
                ctx.fail(&err);
                Err(surface(err))
            }
        }
    }

    // ------------------------------------------------------------------
    // Server streaming
    // ------------------------------------------------------------------

    /// Answer one request with one response per token, written to `out`.
    pub fn spawn_one_answer_more(
        self,
        route: Route,
        tracing: TracingContext,
        request: TalkRequest,
        ctx: CallContext,
        out: CallSender,
        cancel: CancellationToken,
    ) {
        tokio::spawn(async move {
            self.one_answer_more(route, tracing, request, ctx, out, cancel)
                .await
        });
    }

    async fn one_answer_more(
        self,
        route: Route,
        tracing: TracingContext,
        request: TalkRequest,
        ctx: CallContext,
        out: CallSender,
        cancel: CancellationToken,
    ) {
        let tokens = synth::tokens(&request.data);
        let mut answered = 0usize;

        if let Route::Relay(hop) = &route {
            match self.open_one_answer_more(hop, &tracing, &request, &cancel).await {
                Ok(mut downstream) => {
                    // One response per token, even if the downstream keeps its stream open.
                    while answered < tokens.len() {
                        let next = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                ctx.cancelled();
                                return;
                            }
                            next = with_deadline(self.downstream_timeout, downstream.message()) => next,
                        };

                        match next {
                            Ok(Some(response)) => {
                                if !emit(&out, &cancel, Ok(response)).await {
                                    ctx.cancelled();
                                    return;
                                }
                                answered += 1;
                            }
                            Ok(None) => break,
                            Err(status) if self.falls_back(&status) => {
                                ctx.fallback(&status, tokens.len().saturating_sub(answered));
                                break;
                            }
                            Err(status) => {
                                ctx.fail(&status);
                                let _ = emit(&out, &cancel, Err(status)).await;
                                return;
                            }
                        }
                    }
                }
                Err(RetryError::Cancelled { .. }) => {
                    ctx.cancelled();
                    return;
                }
                Err(err) if self.falls_back(&err) => ctx.fallback(&err, tokens.len()),
                Err(err) => {
                    ctx.fail(&err);
                    let _ = emit(&out, &cancel, Err(surface(err))).await;
                    return;
                }
            }
        }

        for token in tokens.iter().skip(answered) {
            let response = synth::answer([token.as_str()]);
            if !emit(&out, &cancel, Ok(response)).await {
                ctx.cancelled();
                return;
            }
            answered += 1;
        }
        ctx.finish(answered);
    }

    async fn open_one_answer_more(
        &self,
        hop: &Hop,
        tracing: &TracingContext,
        request: &TalkRequest,
        cancel: &CancellationToken,
    ) -> Result<Streaming<TalkResponse>, RetryError<Status>> {
        self.executor
            .execute("TalkOneAnswerMore", cancel, || {
                let mut client = hop.client();
                let outbound = self.outbound(request.clone(), tracing);
                let deadline = self.downstream_timeout;
                async move {
                    with_deadline(deadline, client.talk_one_answer_more(outbound))
                        .await
                        .map(Response::into_inner)
                }
            })
            .await
    }

    // ------------------------------------------------------------------
    // Client streaming
    // ------------------------------------------------------------------

    /// Answer a stream of requests with one aggregated response.
    pub async fn more_answer_one<S>(
        &self,
        route: &Route,
        tracing: &TracingContext,
        inbound: S,
        ctx: &CallContext,
    ) -> Result<TalkResponse, Status>
    where
        S: Stream<Item = Result<TalkRequest, Status>> + Unpin + Send,
    {
        match route {
            Route::Local => collect_local(inbound, ctx).await,
            Route::Relay(hop) => self.more_answer_one_relayed(hop, tracing, inbound, ctx).await,
        }
    }

    async fn more_answer_one_relayed<S>(
        &self,
        hop: &Hop,
        tracing: &TracingContext,
        mut inbound: S,
        ctx: &CallContext,
    ) -> Result<TalkResponse, Status>
    where
        S: Stream<Item = Result<TalkRequest, Status>> + Unpin + Send,
    {
        let (down_tx, down_rx) = mpsc::channel(self.buffer);
        let outbound = self.outbound(ReceiverStream::new(down_rx), tracing);
        let mut client = hop.client();
        let mut downstream = AbortOnDropHandle::new(tokio::spawn(async move {
            client
                .talk_more_answer_one(outbound)
                .await
                .map(Response::into_inner)
        }));

        let mut down_tx = Some(down_tx);
        let mut early: Option<Reply> = None;
        let mut seen: Vec<TalkRequest> = Vec::new();

        loop {
            tokio::select! {
                joined = &mut downstream, if early.is_none() => {
                    early = Some(flatten(joined));
                    down_tx = None;
                }
                item = inbound.next() => match item {
                    Some(Ok(request)) => {
                        if let Some(tx) = &down_tx {
                            if tx.send(request.clone()).await.is_err() {
                                down_tx = None;
                            }
                        }
                        seen.push(request);
                    }
                    Some(Err(status)) => {
                        ctx.read_failed(&status);
                        return Ok(synth::internal_fault());
                    }
                    None => break,
                },
            }
        }

        // Half-close the downstream request stream.
        drop(down_tx);
        let outcome = match early {
            Some(outcome) => outcome,
            None => {
                with_deadline(self.downstream_timeout, async {
                    flatten((&mut downstream).await)
                })
                .await
            }
        };

        match outcome {
            Ok(mut response) => {
                if response.results.len() > seen.len() {
                    tracing::warn!(
                        request_id = %ctx.request_id,
                        results = response.results.len(),
                        received = seen.len(),
                        "Downstream answered more items than were sent, dropping the surplus"
                    );
                    response.results.truncate(seen.len());
                }
                let covered = response.results.len();
                if covered < seen.len() {
                    tracing::debug!(
                        request_id = %ctx.request_id,
                        covered,
                        received = seen.len(),
                        "Downstream answered part of the stream, synthesizing the rest"
                    );
                }
                response
                    .results
                    .extend(seen[covered..].iter().map(|r| synth::synthesize(&r.data)));
                ctx.finish(response.results.len());
                Ok(response)
            }
            Err(status) if self.falls_back(&status) => {
                ctx.fallback(&status, seen.len());
                let response = synth::answer(seen.iter().map(|r| r.data.as_str()));
                ctx.finish(response.results.len());
                Ok(response)
            }
            Err(status) => {
                ctx.fail(&status);
                Err(status)
            }
        }
    }

    // ------------------------------------------------------------------
    // Bidirectional
    // ------------------------------------------------------------------

    /// Answer each inbound request with one response, in arrival order.
    pub fn spawn_bidirectional<S>(
        self,
        route: Route,
        tracing: TracingContext,
        inbound: S,
        ctx: CallContext,
        out: CallSender,
        cancel: CancellationToken,
    ) where
        S: Stream<Item = Result<TalkRequest, Status>> + Unpin + Send + 'static,
    {
        let (work_tx, work_rx) = mpsc::channel(self.buffer);
        tokio::spawn(read_inbound(inbound, work_tx, cancel.clone()));

        let downstream = match &route {
            Route::Local => None,
            Route::Relay(hop) => Some(self.open_bidirectional(hop, &tracing)),
        };
        let session = BidiSession {
            forwarder: self,
            ctx,
            out,
            cancel,
            pending: VecDeque::new(),
            unsent: 0,
            answered: 0,
        };
        tokio::spawn(session.run(work_rx, downstream));
    }

    fn open_bidirectional(&self, hop: &Hop, tracing: &TracingContext) -> BidiDownstream {
        let (requests, down_rx) = mpsc::channel(self.buffer);
        let (reply_tx, replies) = mpsc::channel(self.buffer);
        let outbound = self.outbound(ReceiverStream::new(down_rx), tracing);
        let driver = tokio::spawn(drive_bidirectional(hop.client(), outbound, reply_tx));
        BidiDownstream {
            requests: Some(requests),
            replies,
            _driver: AbortOnDropHandle::new(driver),
        }
    }
}

/// The downstream status behind a retry failure.
fn surface(err: RetryError<Status>) -> Status {
    err.into_last()
        .unwrap_or_else(|| Status::cancelled("call cancelled"))
}

fn flatten<T>(joined: Result<Result<T, Status>, JoinError>) -> Result<T, Status> {
    joined.unwrap_or_else(|err| {
        Err(RelayError::Internal(format!("downstream task failed: {}", err)).to_status())
    })
}

async fn collect_local<S>(mut inbound: S, ctx: &CallContext) -> Result<TalkResponse, Status>
where
    S: Stream<Item = Result<TalkRequest, Status>> + Unpin,
{
    let mut results = Vec::new();
    while let Some(item) = inbound.next().await {
        match item {
            Ok(request) => results.push(synth::synthesize(&request.data)),
            Err(status) => {
                ctx.read_failed(&status);
                return Ok(synth::internal_fault());
            }
        }
    }
    ctx.finish(results.len());
    Ok(TalkResponse {
        status: synth::STATUS_OK,
        results,
    })
}

enum Inbound {
    Request(TalkRequest),
    Failed(Status),
}

/// Pump the caller's stream into the work channel until it ends or fails.
async fn read_inbound<S>(mut inbound: S, work: mpsc::Sender<Inbound>, cancel: CancellationToken)
where
    S: Stream<Item = Result<TalkRequest, Status>> + Unpin,
{
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            item = inbound.next() => item,
        };
        let (item, last) = match item {
            Some(Ok(request)) => (Inbound::Request(request), false),
            Some(Err(status)) => (Inbound::Failed(status), true),
            None => return,
        };
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            sent = work.send(item) => sent.is_ok(),
        };
        if !sent || last {
            return;
        }
    }
}

/// Open the downstream bidirectional call and pass its replies on.
async fn drive_bidirectional(
    mut client: LandingServiceClient<Channel>,
    outbound: Request<ReceiverStream<TalkRequest>>,
    replies: mpsc::Sender<Reply>,
) {
    let mut inbound = match client.talk_bidirectional(outbound).await {
        Ok(response) => response.into_inner(),
        Err(status) => {
            let _ = replies.send(Err(status)).await;
            return;
        }
    };
    loop {
        match inbound.message().await {
            Ok(Some(reply)) => {
                if replies.send(Ok(reply)).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(status) => {
                let _ = replies.send(Err(status)).await;
                return;
            }
        }
    }
}

struct BidiDownstream {
    /// `None` once the downstream request stream is half-closed.
    requests: Option<mpsc::Sender<TalkRequest>>,
    replies: mpsc::Receiver<Reply>,
    _driver: AbortOnDropHandle<()>,
}

impl BidiDownstream {
    fn half_close(downstream: &mut Option<Self>) {
        if let Some(d) = downstream.as_mut() {
            d.requests = None;
        }
    }
}

/// Writer side of one bidirectional call.
///
/// `pending` holds every forwarded request still waiting for its reply, in
/// order; its last `unsent` entries have not been handed to the downstream
/// yet.
struct BidiSession {
    forwarder: Forwarder,
    ctx: CallContext,
    out: CallSender,
    cancel: CancellationToken,
    pending: VecDeque<TalkRequest>,
    unsent: usize,
    answered: usize,
}

enum Flow {
    Continue,
    Stop,
}

impl BidiSession {
    async fn run(mut self, mut work: mpsc::Receiver<Inbound>, mut downstream: Option<BidiDownstream>) {
        let timeout = self.forwarder.downstream_timeout;
        let mut inbound_open = true;
        // Armed while a forwarded request awaits its reply.
        let mut deadline: Option<Instant> = None;

        loop {
            let relaying = downstream.is_some();
            if !inbound_open && (!relaying || self.pending.is_empty()) {
                // Every request is answered; the downstream's own close is not awaited.
                drop(downstream.take());
                break;
            }
            let sender = match &downstream {
                Some(d) if self.unsent > 0 => d.requests.clone(),
                _ => None,
            };
            let can_send = sender.is_some();

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.ctx.cancelled();
                    return;
                }
                reply = next_reply(&mut downstream), if relaying => {
                    let flow = match reply {
                        Some(Ok(response)) if self.pending.len() > self.unsent => {
                            self.pending.pop_front();
                            deadline = (self.pending.len() > self.unsent)
                                .then(|| Instant::now() + timeout);
                            self.send(Ok(response)).await
                        }
                        Some(Ok(_)) => {
                            // A reply with no forwarded request waiting for it.
                            deadline = None;
                            drop(downstream.take());
                            self.downstream_failed(RelayError::Internal(
                                "downstream sent more replies than requests".to_string(),
                            ))
                            .await
                        }
                        Some(Err(status)) => {
                            deadline = None;
                            drop(downstream.take());
                            self.downstream_failed(RelayError::Status(status)).await
                        }
                        None => {
                            deadline = None;
                            drop(downstream.take());
                            if !self.pending.is_empty() {
                                tracing::debug!(
                                    request_id = %self.ctx.request_id,
                                    remaining = self.pending.len(),
                                    "Downstream closed early, synthesizing the rest"
                                );
                            }
                            self.flush_local().await
                        }
                    };
                    if let Flow::Stop = flow {
                        return;
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if relaying && deadline.is_some() => {
                    deadline = None;
                    drop(downstream.take());
                    if let Flow::Stop = self.downstream_failed(RelayError::Timeout(timeout)).await {
                        return;
                    }
                }
                permit = reserve(sender), if can_send => {
                    match permit {
                        Some(permit) => {
                            let next = self.pending.len() - self.unsent;
                            permit.send(self.pending[next].clone());
                            self.unsent -= 1;
                            if deadline.is_none() {
                                deadline = Some(Instant::now() + timeout);
                            }
                        }
                        // The driver is gone; its outcome arrives as a reply.
                        None => BidiDownstream::half_close(&mut downstream),
                    }
                    if !inbound_open && self.unsent == 0 {
                        BidiDownstream::half_close(&mut downstream);
                    }
                }
                item = work.recv(), if inbound_open && self.unsent < self.forwarder.buffer => {
                    match item {
                        Some(Inbound::Request(request)) if relaying => {
                            self.pending.push_back(request);
                            self.unsent += 1;
                        }
                        Some(Inbound::Request(request)) => {
                            let response = synth::answer([request.data.as_str()]);
                            if let Flow::Stop = self.send(Ok(response)).await {
                                return;
                            }
                        }
                        Some(Inbound::Failed(status)) => {
                            drop(downstream.take());
                            if let Flow::Continue = self.flush_local().await {
                                self.ctx.read_failed(&status);
                                let _ = emit(&self.out, &self.cancel, Err(status)).await;
                            }
                            return;
                        }
                        None => {
                            inbound_open = false;
                            if self.unsent == 0 {
                                BidiDownstream::half_close(&mut downstream);
                            }
                        }
                    }
                }
            }
        }

        self.ctx.finish(self.answered);
    }

    async fn send(&mut self, item: Reply) -> Flow {
        if emit(&self.out, &self.cancel, item).await {
            self.answered += 1;
            Flow::Continue
        } else {
            self.ctx.cancelled();
            Flow::Stop
        }
    }

    /// Answer every pending request locally, in order.
    async fn flush_local(&mut self) -> Flow {
        self.unsent = 0;
        while let Some(request) = self.pending.pop_front() {
            let response = synth::answer([request.data.as_str()]);
            if let Flow::Stop = self.send(Ok(response)).await {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    /// Downstream statuses are surfaced unchanged; local faults only by code.
    async fn downstream_failed(&mut self, err: RelayError) -> Flow {
        if self.forwarder.falls_back(&err) {
            self.ctx.fallback(&err, self.pending.len());
            self.flush_local().await
        } else {
            self.ctx.fail(&err);
            let _ = emit(&self.out, &self.cancel, Err(err.to_status())).await;
            Flow::Stop
        }
    }
}

async fn next_reply(downstream: &mut Option<BidiDownstream>) -> Option<Reply> {
    match downstream {
        Some(d) => d.replies.recv().await,
        None => std::future::pending().await,
    }
}

async fn reserve(sender: Option<mpsc::Sender<TalkRequest>>) -> Option<mpsc::OwnedPermit<TalkRequest>> {
    match sender {
        Some(tx) => tx.reserve_owned().await.ok(),
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::StaticConnectionProvider;

    #[tokio::test]
    async fn route_follows_provider() {
        let standalone = StaticConnectionProvider::standalone();
        assert_eq!(Route::resolve(&standalone).mode(), Mode::Local);

        let hop = Hop::lazy("http://127.0.0.1:1", Duration::from_millis(50)).unwrap();
        let relay = StaticConnectionProvider::relay(hop);
        assert_eq!(Route::resolve(&relay).mode(), Mode::Relay);
    }

    #[test]
    fn only_transient_failures_fall_back_by_default() {
        let forwarder = Forwarder::default();
        assert!(forwarder.falls_back(&Status::unavailable("down")));
        assert!(forwarder.falls_back(&Status::deadline_exceeded("slow")));
        assert!(!forwarder.falls_back(&Status::permission_denied("no")));
        assert!(!forwarder.falls_back(&RelayError::Validation("bad".into())));

        let lenient = Forwarder::default().with_fallback_on_terminal(true);
        assert!(lenient.falls_back(&Status::permission_denied("no")));
    }

    #[test]
    fn surface_keeps_downstream_status() {
        let status = surface(RetryError::Terminal(Status::permission_denied("denied")));
        assert_eq!(status.code(), tonic::Code::PermissionDenied);
        assert_eq!(status.message(), "denied");

        let cancelled = surface(RetryError::<Status>::Cancelled {
            attempts: 0,
            last: None,
        });
        assert_eq!(cancelled.code(), tonic::Code::Cancelled);
    }

    #[test]
    fn buffer_is_never_zero() {
        assert_eq!(Forwarder::default().with_buffer(0).buffer(), 1);
    }

    #[tokio::test]
    async fn failed_downstream_task_is_an_internal_fault() {
        let joined = tokio::spawn(async {
            if true {
                panic!("driver crashed");
            }
            Ok::<(), Status>(())
        })
        .await;
        let status = flatten(joined).unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
        assert!(!status.message().contains("driver crashed"));
    }
}
