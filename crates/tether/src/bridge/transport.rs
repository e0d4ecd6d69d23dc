//! Channel transport between the UI surface and the host.
//!
//! Both sides see an [`Endpoint`]: an outbound sender and an inbound receiver
//! of [`Envelope`]s. Two ways to get one:
//! - [`duplex`]: in-memory pair, both ends in one process (embedding, tests)
//! - [`framed`]: pumps envelopes over a byte stream using [`JsonCodec`]

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use super::codec::JsonCodec;
use super::protocol::Envelope;

/// One side of a bidirectional envelope channel.
///
/// Delivery is in send order. The inbound receiver yields `None` once the
/// peer is gone.
pub struct Endpoint {
    pub tx: mpsc::UnboundedSender<Envelope>,
    pub rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Endpoint {
    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<Envelope>,
        mpsc::UnboundedReceiver<Envelope>,
    ) {
        (self.tx, self.rx)
    }
}

/// Create a connected in-memory pair. Whatever one side sends, the other receives.
pub fn duplex() -> (Endpoint, Endpoint) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        Endpoint { tx: a_tx, rx: a_rx },
        Endpoint { tx: b_tx, rx: b_rx },
    )
}

/// Run envelopes over a byte stream.
///
/// Spawns a reader task (frames -> inbound channel) and a writer task
/// (outbound channel -> frames). A well-formed JSON frame that is not an
/// envelope is logged and skipped. Malformed framing or EOF closes the
/// inbound side; dropping every outbound sender flushes and stops the writer.
pub fn framed<R, W>(reader: R, writer: W) -> Endpoint
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    framed_with_writer(reader, writer).0
}

/// Like [`framed`], also returning the writer task so callers can wait for
/// queued envelopes to be flushed before exiting.
pub fn framed_with_writer<R, W>(reader: R, writer: W) -> (Endpoint, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Envelope>();

    let codec = JsonCodec::<Value>::new();
    tracing::debug!(max_frame_length = codec.max_frame_length(), "Starting framed transport");
    let mut frames_in = FramedRead::new(reader, codec);
    tokio::spawn(async move {
        loop {
            match frames_in.next().await {
                Some(Ok(frame)) => match serde_json::from_value::<Envelope>(frame) {
                    Ok(envelope) => {
                        if inbound_tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping frame that is not an envelope");
                    }
                },
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Transport read error, closing inbound side");
                    break;
                }
                None => {
                    tracing::debug!("Transport reached end of stream");
                    break;
                }
            }
        }
        tracing::trace!("Transport reader task exiting");
    });

    let mut frames_out = FramedWrite::new(writer, JsonCodec::<Envelope>::new());
    let writer_task = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            let kind = envelope.kind();
            if let Err(e) = frames_out.send(envelope).await {
                tracing::error!(error = %e, kind, "Transport write error, closing outbound side");
                break;
            }
        }
        tracing::trace!("Transport writer task exiting");
    });

    let endpoint = Endpoint {
        tx: outbound_tx,
        rx: inbound_rx,
    };
    (endpoint, writer_task)
}

/// Frames over this process's stdin/stdout, with the stdout writer task.
pub fn stdio() -> (Endpoint, JoinHandle<()>) {
    framed_with_writer(tokio::io::stdin(), tokio::io::stdout())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::CorrelationId;
    use serde_json::json;

    #[tokio::test]
    async fn duplex_delivers_in_send_order() {
        let (ui, mut host) = duplex();
        for n in 1..=3 {
            ui.tx
                .send(Envelope::request("getInitialData", json!({}), CorrelationId::new(n)))
                .unwrap();
        }

        for n in 1..=3 {
            let env = host.rx.recv().await.unwrap();
            assert_eq!(env.request_id(), Some(CorrelationId::new(n)));
        }
    }

    #[tokio::test]
    async fn duplex_closes_when_peer_dropped() {
        let (ui, host) = duplex();
        drop(host);
        let (tx, mut rx) = ui.into_parts();
        assert!(tx.send(Envelope::notification("x", json!(null))).is_err());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn framed_pair_over_in_process_pipes() {
        let (ui_io, host_io) = tokio::io::duplex(4096);
        let (ui_read, ui_write) = tokio::io::split(ui_io);
        let (host_read, host_write) = tokio::io::split(host_io);

        let mut ui = framed(ui_read, ui_write);
        let mut host = framed(host_read, host_write);

        let sent = Envelope::request("getFileContent", json!({"path": "x"}), CorrelationId::new(11));
        ui.tx.send(sent.clone()).unwrap();
        assert_eq!(host.rx.recv().await, Some(sent));

        let reply = Envelope::success(CorrelationId::new(11), json!({"content": "", "revisionTag": "0"}));
        host.tx.send(reply.clone()).unwrap();
        assert_eq!(ui.rx.recv().await, Some(reply));
    }

    #[tokio::test]
    async fn writer_task_flushes_then_exits() {
        let (ui_io, host_io) = tokio::io::duplex(4096);
        let (ui_read, ui_write) = tokio::io::split(ui_io);
        let (host_read, host_write) = tokio::io::split(host_io);

        let (ui, writer) = framed_with_writer(ui_read, ui_write);
        let mut host = framed(host_read, host_write);

        let (tx, _rx) = ui.into_parts();
        tx.send(Envelope::notification("treeChanged", json!({"reason": "created", "path": "a"})))
            .unwrap();
        drop(tx);
        writer.await.unwrap();

        assert!(matches!(host.rx.recv().await, Some(Envelope::Notification { .. })));
    }

    #[tokio::test]
    async fn framed_skips_frames_that_are_not_envelopes() {
        let (ui_io, host_io) = tokio::io::duplex(4096);
        let (ui_read, ui_write) = tokio::io::split(ui_io);
        let (_host_read, host_write) = tokio::io::split(host_io);

        let mut ui = framed(ui_read, ui_write);
        let mut raw = FramedWrite::new(host_write, JsonCodec::<Value>::new());
        raw.send(json!({"payload": {"orphan": true}})).await.unwrap();
        raw.send(json!({"requestId": 1, "payload": {"ok": true}})).await.unwrap();

        assert_eq!(
            ui.rx.recv().await,
            Some(Envelope::success(CorrelationId::new(1), json!({"ok": true})))
        );
    }

    #[tokio::test]
    async fn framed_inbound_closes_on_eof() {
        let (ui_io, host_io) = tokio::io::duplex(64);
        let (ui_read, ui_write) = tokio::io::split(ui_io);
        let mut ui = framed(ui_read, ui_write);

        drop(host_io);
        assert!(ui.rx.recv().await.is_none());
    }
}
