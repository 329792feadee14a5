//! Outbound response streams.
//!
//! Every streaming answer is produced by a task writing into a bounded
//! channel. The stream handed to tonic owns a drop guard for the call's
//! cancellation token, so when the caller goes away (tonic drops the stream)
//! the producing tasks observe cancellation at their next suspension point.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tonic::Status;

use crate::proto::TalkResponse;

pub type CallItem = Result<TalkResponse, Status>;

/// Sending half used by producer tasks.
pub type CallSender = mpsc::Sender<CallItem>;

/// Response stream of one streaming call.
#[derive(Debug)]
pub struct CallStream {
    inner: ReceiverStream<CallItem>,
    _guard: DropGuard,
}

impl Stream for CallStream {
    type Item = CallItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// A bounded response channel tied to a fresh cancellation token.
///
/// The token is cancelled when the returned stream is dropped.
pub fn channel(capacity: usize) -> (CallSender, CallStream, CancellationToken) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let token = CancellationToken::new();
    let stream = CallStream {
        inner: ReceiverStream::new(rx),
        _guard: token.clone().drop_guard(),
    };
    (tx, stream, token)
}

/// Send `item` unless the call has been cancelled.
///
/// Returns `false` once the caller is gone.
pub async fn emit(tx: &CallSender, cancel: &CancellationToken, item: CallItem) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}
