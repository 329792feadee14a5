//! Shared utilities for integration testing.
//!
//! Nodes and mock backends bind `127.0.0.1:0` and serve in background tasks.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{stream, Stream, StreamExt};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::metadata::MetadataMap;
use tonic::transport::{Channel, Server};
use tonic::{Code, Request, Response, Status, Streaming};

use grpc_relay::config::{DownstreamConfig, RelayConfig, RetryConfig};
use grpc_relay::lifecycle::Shutdown;
use grpc_relay::proto::landing_service_client::LandingServiceClient;
use grpc_relay::proto::landing_service_server::{LandingService, LandingServiceServer};
use grpc_relay::proto::{TalkRequest, TalkResponse};
use grpc_relay::rpc::synth;
use grpc_relay::{RelayServer, StaticConnectionProvider};

/// `meta` tag stamped by mock backends, so tests can tell relayed answers
/// from locally synthesized ones.
pub const BACKEND_TAG: &str = "BACKEND";

pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<TalkResponse, Status>> + Send>>;

/// A running relay node. Dropping it shuts the node down.
pub struct Node {
    pub addr: SocketAddr,
    shutdown: Shutdown,
}

impl Node {
    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn client(&self) -> LandingServiceClient<Channel> {
        client(self.addr).await
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn client(addr: SocketAddr) -> LandingServiceClient<Channel> {
    LandingServiceClient::connect(format!("http://{}", addr))
        .await
        .expect("node unreachable")
}

/// Retries fast enough for tests.
pub fn fast_retries(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_delay_ms: 10,
        multiplier: 2.0,
        max_delay_ms: 40,
        jitter_ratio: 0.0,
    }
}

/// Config for a node relaying to `downstream`.
pub fn relay_config(downstream: SocketAddr) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.downstream = Some(DownstreamConfig {
        host: downstream.ip().to_string(),
        port: downstream.port(),
        tls: None,
    });
    config.retries = fast_retries(3);
    config.timeouts.downstream_ms = 1000;
    config.timeouts.connect_ms = 500;
    config
}

pub fn standalone_config() -> RelayConfig {
    let mut config = RelayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config
}

/// Start a relay node with `config` on an ephemeral port.
pub async fn start_node(config: RelayConfig) -> Node {
    let provider = StaticConnectionProvider::from_config(&config)
        .await
        .expect("provider");
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = RelayServer::new(config, Arc::new(provider));
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });

    Node { addr, shutdown }
}

pub async fn start_standalone() -> Node {
    start_node(standalone_config()).await
}

pub async fn start_relay(downstream: SocketAddr) -> Node {
    start_node(relay_config(downstream)).await
}

/// Serve an arbitrary `LandingService` as a downstream backend.
pub async fn start_backend<S: LandingService>(service: S) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = Server::builder()
            .add_service(LandingServiceServer::new(service))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await;
    });
    addr
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn talk_request(data: &str) -> TalkRequest {
    TalkRequest {
        data: data.to_string(),
        meta: "TEST".to_string(),
    }
}

pub fn meta(response: &TalkResponse) -> Vec<&str> {
    response
        .results
        .iter()
        .map(|r| r.kv["meta"].as_str())
        .collect()
}

pub fn idx(response: &TalkResponse) -> Vec<&str> {
    response
        .results
        .iter()
        .map(|r| r.kv["idx"].as_str())
        .collect()
}

fn mark(mut response: TalkResponse) -> TalkResponse {
    for result in &mut response.results {
        result.kv.insert("meta".to_string(), BACKEND_TAG.to_string());
    }
    response
}

fn backend_answer(data: &str) -> TalkResponse {
    mark(synth::answer([data]))
}

/// Backend answering like a standalone node, tagging results and recording
/// the metadata of every call it receives.
#[derive(Clone, Default)]
pub struct EchoBackend {
    pub calls: Arc<AtomicU32>,
    pub metadata: Arc<Mutex<Vec<MetadataMap>>>,
}

impl EchoBackend {
    fn record<T>(&self, request: &Request<T>) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.metadata.lock().unwrap().push(request.metadata().clone());
    }

    pub fn last_metadata(&self) -> MetadataMap {
        self.metadata.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[tonic::async_trait]
impl LandingService for EchoBackend {
    async fn talk(&self, request: Request<TalkRequest>) -> Result<Response<TalkResponse>, Status> {
        self.record(&request);
        Ok(Response::new(backend_answer(&request.get_ref().data)))
    }

    type TalkOneAnswerMoreStream = ResponseStream;

    async fn talk_one_answer_more(
        &self,
        request: Request<TalkRequest>,
    ) -> Result<Response<Self::TalkOneAnswerMoreStream>, Status> {
        self.record(&request);
        let responses: Vec<_> = synth::tokens(&request.get_ref().data)
            .iter()
            .map(|token| Ok(backend_answer(token)))
            .collect();
        Ok(Response::new(Box::pin(stream::iter(responses))))
    }

    async fn talk_more_answer_one(
        &self,
        request: Request<Streaming<TalkRequest>>,
    ) -> Result<Response<TalkResponse>, Status> {
        self.record(&request);
        let mut inbound = request.into_inner();
        let mut tokens = Vec::new();
        while let Some(request) = inbound.message().await? {
            tokens.push(request.data);
        }
        Ok(Response::new(mark(synth::answer(
            tokens.iter().map(String::as_str),
        ))))
    }

    type TalkBidirectionalStream = ResponseStream;

    async fn talk_bidirectional(
        &self,
        request: Request<Streaming<TalkRequest>>,
    ) -> Result<Response<Self::TalkBidirectionalStream>, Status> {
        self.record(&request);
        let replies = request
            .into_inner()
            .map(|item| item.map(|request| backend_answer(&request.data)));
        Ok(Response::new(Box::pin(replies)))
    }
}

/// Backend failing every call with the same code.
#[derive(Clone)]
pub struct FailingBackend {
    pub code: Code,
    pub calls: Arc<AtomicU32>,
}

impl FailingBackend {
    pub fn new(code: Code) -> Self {
        Self {
            code,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    fn fail(&self) -> Status {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Status::new(self.code, "injected failure")
    }
}

#[tonic::async_trait]
impl LandingService for FailingBackend {
    async fn talk(&self, _: Request<TalkRequest>) -> Result<Response<TalkResponse>, Status> {
        Err(self.fail())
    }

    type TalkOneAnswerMoreStream = ResponseStream;

    async fn talk_one_answer_more(
        &self,
        _: Request<TalkRequest>,
    ) -> Result<Response<Self::TalkOneAnswerMoreStream>, Status> {
        Err(self.fail())
    }

    async fn talk_more_answer_one(
        &self,
        _: Request<Streaming<TalkRequest>>,
    ) -> Result<Response<TalkResponse>, Status> {
        Err(self.fail())
    }

    type TalkBidirectionalStream = ResponseStream;

    async fn talk_bidirectional(
        &self,
        _: Request<Streaming<TalkRequest>>,
    ) -> Result<Response<Self::TalkBidirectionalStream>, Status> {
        Err(self.fail())
    }
}

/// Backend whose streams answer `healthy` messages, then fail with UNAVAILABLE.
#[derive(Clone)]
pub struct MidStreamFailure {
    pub healthy: usize,
}

fn injected_unavailable() -> Result<TalkResponse, Status> {
    Err(Status::unavailable("injected mid-stream failure"))
}

#[tonic::async_trait]
impl LandingService for MidStreamFailure {
    async fn talk(&self, request: Request<TalkRequest>) -> Result<Response<TalkResponse>, Status> {
        Ok(Response::new(backend_answer(&request.get_ref().data)))
    }

    type TalkOneAnswerMoreStream = ResponseStream;

    async fn talk_one_answer_more(
        &self,
        request: Request<TalkRequest>,
    ) -> Result<Response<Self::TalkOneAnswerMoreStream>, Status> {
        let mut responses: Vec<_> = synth::tokens(&request.get_ref().data)
            .iter()
            .take(self.healthy)
            .map(|token| Ok(backend_answer(token)))
            .collect();
        responses.push(injected_unavailable());
        Ok(Response::new(Box::pin(stream::iter(responses))))
    }

    async fn talk_more_answer_one(
        &self,
        _: Request<Streaming<TalkRequest>>,
    ) -> Result<Response<TalkResponse>, Status> {
        Err(Status::unavailable("injected failure"))
    }

    type TalkBidirectionalStream = ResponseStream;

    async fn talk_bidirectional(
        &self,
        request: Request<Streaming<TalkRequest>>,
    ) -> Result<Response<Self::TalkBidirectionalStream>, Status> {
        let replies = request
            .into_inner()
            .take(self.healthy)
            .map(|item| item.map(|request| backend_answer(&request.data)))
            .chain(stream::once(async { injected_unavailable() }));
        Ok(Response::new(Box::pin(replies)))
    }
}

/// Backend that never answers unary calls in time.
#[derive(Clone)]
pub struct SlowBackend {
    pub delay: Duration,
    pub calls: Arc<AtomicU32>,
}

#[tonic::async_trait]
impl LandingService for SlowBackend {
    async fn talk(&self, request: Request<TalkRequest>) -> Result<Response<TalkResponse>, Status> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(Response::new(backend_answer(&request.get_ref().data)))
    }

    type TalkOneAnswerMoreStream = ResponseStream;

    async fn talk_one_answer_more(
        &self,
        _: Request<TalkRequest>,
    ) -> Result<Response<Self::TalkOneAnswerMoreStream>, Status> {
        Err(Status::unimplemented("slow backend answers unary calls only"))
    }

    async fn talk_more_answer_one(
        &self,
        _: Request<Streaming<TalkRequest>>,
    ) -> Result<Response<TalkResponse>, Status> {
        Err(Status::unimplemented("slow backend answers unary calls only"))
    }

    type TalkBidirectionalStream = ResponseStream;

    async fn talk_bidirectional(
        &self,
        _: Request<Streaming<TalkRequest>>,
    ) -> Result<Response<Self::TalkBidirectionalStream>, Status> {
        Err(Status::unimplemented("slow backend answers unary calls only"))
    }
}

/// Wait up to two seconds for `flag` to be set.
pub async fn eventually(flag: &AtomicBool) -> bool {
    for _ in 0..200 {
        if flag.load(Ordering::SeqCst) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    flag.load(Ordering::SeqCst)
}

/// Sets its flag when dropped, marking a backend stream as released.
struct ReleaseFlag(Arc<AtomicBool>);

impl Drop for ReleaseFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn unimplemented_here() -> Status {
    Status::unimplemented("not served by this backend")
}

/// Backend whose bidirectional stream answers every request but never closes.
#[derive(Clone, Default)]
pub struct LingeringBackend;

#[tonic::async_trait]
impl LandingService for LingeringBackend {
    async fn talk(&self, request: Request<TalkRequest>) -> Result<Response<TalkResponse>, Status> {
        Ok(Response::new(backend_answer(&request.get_ref().data)))
    }

    type TalkOneAnswerMoreStream = ResponseStream;

    async fn talk_one_answer_more(
        &self,
        request: Request<TalkRequest>,
    ) -> Result<Response<Self::TalkOneAnswerMoreStream>, Status> {
        let responses: Vec<_> = synth::tokens(&request.get_ref().data)
            .iter()
            .map(|token| Ok(backend_answer(token)))
            .collect();
        Ok(Response::new(Box::pin(
            stream::iter(responses).chain(stream::pending()),
        )))
    }

    async fn talk_more_answer_one(
        &self,
        _: Request<Streaming<TalkRequest>>,
    ) -> Result<Response<TalkResponse>, Status> {
        Err(unimplemented_here())
    }

    type TalkBidirectionalStream = ResponseStream;

    async fn talk_bidirectional(
        &self,
        request: Request<Streaming<TalkRequest>>,
    ) -> Result<Response<Self::TalkBidirectionalStream>, Status> {
        let replies = request
            .into_inner()
            .map(|item| item.map(|request| backend_answer(&request.data)))
            .chain(stream::pending());
        Ok(Response::new(Box::pin(replies)))
    }
}

/// Backend answering everything twice.
#[derive(Clone, Default)]
pub struct DuplicatingBackend;

#[tonic::async_trait]
impl LandingService for DuplicatingBackend {
    async fn talk(&self, request: Request<TalkRequest>) -> Result<Response<TalkResponse>, Status> {
        Ok(Response::new(backend_answer(&request.get_ref().data)))
    }

    type TalkOneAnswerMoreStream = ResponseStream;

    async fn talk_one_answer_more(
        &self,
        request: Request<TalkRequest>,
    ) -> Result<Response<Self::TalkOneAnswerMoreStream>, Status> {
        let tokens = synth::tokens(&request.get_ref().data);
        let responses: Vec<_> = tokens
            .iter()
            .chain(tokens.iter())
            .map(|token| Ok(backend_answer(token)))
            .collect();
        Ok(Response::new(Box::pin(stream::iter(responses))))
    }

    async fn talk_more_answer_one(
        &self,
        request: Request<Streaming<TalkRequest>>,
    ) -> Result<Response<TalkResponse>, Status> {
        let mut inbound = request.into_inner();
        let mut tokens = Vec::new();
        while let Some(request) = inbound.message().await? {
            tokens.push(request.data);
        }
        let twice = tokens.iter().chain(tokens.iter()).map(String::as_str);
        Ok(Response::new(mark(synth::answer(twice))))
    }

    type TalkBidirectionalStream = ResponseStream;

    async fn talk_bidirectional(
        &self,
        request: Request<Streaming<TalkRequest>>,
    ) -> Result<Response<Self::TalkBidirectionalStream>, Status> {
        let replies = request.into_inner().flat_map(|item| {
            let replies = match item {
                Ok(request) => {
                    let reply = backend_answer(&request.data);
                    vec![Ok(reply.clone()), Ok(reply)]
                }
                Err(status) => vec![Err(status)],
            };
            stream::iter(replies)
        });
        Ok(Response::new(Box::pin(replies)))
    }
}

/// Backend whose streams run until the caller goes away.
///
/// The server stream emits an answer every 10ms forever; the bidirectional
/// stream echoes. Both set `released` once tonic drops them.
#[derive(Clone, Default)]
pub struct EndlessBackend {
    pub emitted: Arc<AtomicU32>,
    pub released: Arc<AtomicBool>,
}

#[tonic::async_trait]
impl LandingService for EndlessBackend {
    async fn talk(&self, request: Request<TalkRequest>) -> Result<Response<TalkResponse>, Status> {
        Ok(Response::new(backend_answer(&request.get_ref().data)))
    }

    type TalkOneAnswerMoreStream = ResponseStream;

    async fn talk_one_answer_more(
        &self,
        _: Request<TalkRequest>,
    ) -> Result<Response<Self::TalkOneAnswerMoreStream>, Status> {
        let flag = ReleaseFlag(self.released.clone());
        let emitted = self.emitted.clone();
        let replies = stream::unfold(flag, move |flag| {
            let emitted = emitted.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                emitted.fetch_add(1, Ordering::SeqCst);
                Some((Ok(backend_answer("0")), flag))
            }
        });
        Ok(Response::new(Box::pin(replies)))
    }

    async fn talk_more_answer_one(
        &self,
        _: Request<Streaming<TalkRequest>>,
    ) -> Result<Response<TalkResponse>, Status> {
        Err(unimplemented_here())
    }

    type TalkBidirectionalStream = ResponseStream;

    async fn talk_bidirectional(
        &self,
        request: Request<Streaming<TalkRequest>>,
    ) -> Result<Response<Self::TalkBidirectionalStream>, Status> {
        let flag = ReleaseFlag(self.released.clone());
        let replies = request.into_inner().map(move |item| {
            let _held = &flag;
            item.map(|request| backend_answer(&request.data))
        });
        Ok(Response::new(Box::pin(replies)))
    }
}
