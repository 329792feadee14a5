//! The `LandingService` implementation.
//!
//! Each handler extracts the tracing context, resolves the route once and
//! hands the call to the [`Forwarder`]. The streaming handlers have generic
//! counterparts (`serve_*`) that accept any request stream, which is what the
//! tonic handlers delegate to.

use std::sync::Arc;

use futures_util::Stream;
use tonic::{Request, Response, Status, Streaming};

use crate::config::RelayConfig;
use crate::net::ConnectionProvider;
use crate::observability::TracingContext;
use crate::proto::landing_service_server::{LandingService, LandingServiceServer};
use crate::proto::{TalkRequest, TalkResponse};
use crate::rpc::context::CallContext;
use crate::rpc::relay::{Forwarder, Route};
use crate::rpc::stream::{self, CallStream};

pub const TALK: &str = "Talk";
pub const TALK_ONE_ANSWER_MORE: &str = "TalkOneAnswerMore";
pub const TALK_MORE_ANSWER_ONE: &str = "TalkMoreAnswerOne";
pub const TALK_BIDIRECTIONAL: &str = "TalkBidirectional";

/// A relay node: answers locally, or forwards to the provider's hop.
#[derive(Clone)]
pub struct RelayService {
    provider: Arc<dyn ConnectionProvider>,
    forwarder: Forwarder,
}

impl RelayService {
    pub fn new(provider: Arc<dyn ConnectionProvider>, forwarder: Forwarder) -> Self {
        Self {
            provider,
            forwarder,
        }
    }

    pub fn from_config(provider: Arc<dyn ConnectionProvider>, config: &RelayConfig) -> Self {
        Self::new(provider, Forwarder::from_config(config))
    }

    pub fn into_server(self) -> LandingServiceServer<Self> {
        LandingServiceServer::new(self)
    }

    fn begin<T>(&self, method: &'static str, request: &Request<T>) -> (Route, TracingContext, CallContext) {
        let route = Route::resolve(self.provider.as_ref());
        let tracing = TracingContext::extract(request.metadata());
        let ctx = CallContext::new(method, &tracing, request.remote_addr(), route.mode());
        (route, tracing, ctx)
    }

    /// Server-streaming handler body.
    pub fn serve_one_answer_more(&self, request: Request<TalkRequest>) -> CallStream {
        let (route, tracing, ctx) = self.begin(TALK_ONE_ANSWER_MORE, &request);
        let (tx, stream, cancel) = stream::channel(self.forwarder.buffer());
        self.forwarder.clone().spawn_one_answer_more(
            route,
            tracing,
            request.into_inner(),
            ctx,
            tx,
            cancel,
        );
        stream
    }

    /// Client-streaming handler body, over any request stream.
    pub async fn serve_more_answer_one<S>(&self, request: Request<S>) -> Result<TalkResponse, Status>
    where
        S: Stream<Item = Result<TalkRequest, Status>> + Unpin + Send,
    {
        let (route, tracing, ctx) = self.begin(TALK_MORE_ANSWER_ONE, &request);
        self.forwarder
            .more_answer_one(&route, &tracing, request.into_inner(), &ctx)
            .await
    }

    /// Bidirectional handler body, over any request stream.
    pub fn serve_bidirectional<S>(&self, request: Request<S>) -> CallStream
    where
        S: Stream<Item = Result<TalkRequest, Status>> + Unpin + Send + 'static,
    {
        let (route, tracing, ctx) = self.begin(TALK_BIDIRECTIONAL, &request);
        let (tx, stream, cancel) = stream::channel(self.forwarder.buffer());
        self.forwarder.clone().spawn_bidirectional(
            route,
            tracing,
            request.into_inner(),
            ctx,
            tx,
            cancel,
        );
        stream
    }
}

#[tonic::async_trait]
impl LandingService for RelayService {
    async fn talk(&self, request: Request<TalkRequest>) -> Result<Response<TalkResponse>, Status> {
        let (route, tracing, ctx) = self.begin(TALK, &request);
        self.forwarder
            .talk(&route, &tracing, request.into_inner(), &ctx)
            .await
            .map(Response::new)
    }

    type TalkOneAnswerMoreStream = CallStream;

    async fn talk_one_answer_more(
        &self,
        request: Request<TalkRequest>,
    ) -> Result<Response<Self::TalkOneAnswerMoreStream>, Status> {
        Ok(Response::new(self.serve_one_answer_more(request)))
    }

    async fn talk_more_answer_one(
        &self,
        request: Request<Streaming<TalkRequest>>,
    ) -> Result<Response<TalkResponse>, Status> {
        self.serve_more_answer_one(request).await.map(Response::new)
    }

    type TalkBidirectionalStream = CallStream;

    async fn talk_bidirectional(
        &self,
        request: Request<Streaming<TalkRequest>>,
    ) -> Result<Response<Self::TalkBidirectionalStream>, Status> {
        Ok(Response::new(self.serve_bidirectional(request)))
    }
}
