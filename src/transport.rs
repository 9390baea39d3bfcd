//! HTTP stream transport
//!
//! [`HttpTransport`] opens a long-lived GET request against the broadcast URL
//! and forwards raw body bytes to the engine as [`TransportEvent`]s. The
//! engine owns reconnection policy; the transport's job ends at reporting
//! what happened to the connection.
//!
//! Each `connect` call spawns a fresh task bound to a fresh event channel.
//! Tearing down a session drops the channel receiver, so a task that is
//! slow to abort cannot leak stale events into the next session.

use crate::error::Error;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{Client, Url};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connection lifecycle notifications delivered to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Response headers accepted, body bytes will follow
    Connected,
    /// A chunk of raw stream bytes, in arrival order
    Data(Bytes),
    /// Server closed the stream cleanly
    Disconnected,
    /// Connection attempt or established connection failed
    Error(Error),
}

/// Byte-source seam between the engine and the network.
///
/// Implementations deliver events on the channel handed to `connect` and
/// never call back into the engine directly.
pub trait StreamTransport: Send {
    /// Begin a connection attempt.
    ///
    /// Replaces any active connection; the previous task is torn down first.
    fn connect(&mut self, events: UnboundedSender<TransportEvent>);

    /// Tear down the active connection, if any. Idempotent.
    fn disconnect(&mut self);
}

/// Live HTTP(S) transport for continuous MP3 broadcasts.
pub struct HttpTransport {
    url: String,
    connect_timeout: Duration,
    client: Client,
    task: Option<JoinHandle<()>>,
}

impl HttpTransport {
    /// Create a transport for `url`.
    ///
    /// `connect_timeout` bounds the whole connection attempt, from DNS
    /// resolution through receipt of response headers.
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        let client = Client::builder()
            .user_agent(concat!("airwave/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            url: url.into(),
            connect_timeout,
            client,
            task: None,
        }
    }

    /// The broadcast URL this transport connects to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl StreamTransport for HttpTransport {
    fn connect(&mut self, events: UnboundedSender<TransportEvent>) {
        self.disconnect();

        let client = self.client.clone();
        let url = self.url.clone();
        let connect_timeout = self.connect_timeout;

        self.task = Some(tokio::spawn(async move {
            run_connection(client, url, connect_timeout, events).await;
        }));
    }

    fn disconnect(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Transport connection aborted");
        }
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Single connection attempt plus body pump.
///
/// Every exit path sends a terminal event; the engine never has to infer
/// what happened from silence.
async fn run_connection(
    client: Client,
    url: String,
    connect_timeout: Duration,
    events: UnboundedSender<TransportEvent>,
) {
    let parsed = match Url::parse(&url) {
        Ok(u) if u.scheme() == "http" || u.scheme() == "https" => u,
        Ok(u) => {
            let _ = events.send(TransportEvent::Error(Error::InvalidUrl(format!(
                "unsupported scheme \"{}\"",
                u.scheme()
            ))));
            return;
        }
        Err(e) => {
            let _ = events.send(TransportEvent::Error(Error::InvalidUrl(e.to_string())));
            return;
        }
    };

    debug!("Connecting to {}", parsed);
    let response = match tokio::time::timeout(connect_timeout, client.get(parsed.clone()).send()).await
    {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            warn!("Connection to {} failed: {}", parsed, e);
            let _ = events.send(TransportEvent::Error(Error::ConnectionFailed(e.to_string())));
            return;
        }
        Err(_) => {
            warn!(
                "Connection to {} timed out after {:?}",
                parsed, connect_timeout
            );
            let _ = events.send(TransportEvent::Error(Error::Timeout));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        warn!("Stream server answered {} for {}", status, parsed);
        let _ = events.send(TransportEvent::Error(Error::HttpStatus(status.as_u16())));
        return;
    }

    if let Some(content_type) = response.headers().get(reqwest::header::CONTENT_TYPE) {
        debug!("Stream content type: {:?}", content_type);
    }
    info!("Connected to {}", parsed);

    if events.send(TransportEvent::Connected).is_err() {
        return;
    }

    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                if bytes.is_empty() {
                    continue;
                }
                if events.send(TransportEvent::Data(bytes)).is_err() {
                    // Session was torn down, stop pulling the body
                    return;
                }
            }
            Err(e) => {
                warn!("Stream read failed: {}", e);
                let _ = events.send(TransportEvent::Error(Error::ConnectionLost));
                return;
            }
        }
    }

    info!("Stream ended, server closed the connection");
    let _ = events.send(TransportEvent::Disconnected);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transport_is_idle() {
        let transport = HttpTransport::new("http://example.com/stream", Duration::from_secs(5));
        assert!(transport.task.is_none());
        assert_eq!(transport.url(), "http://example.com/stream");
    }

    #[test]
    fn test_disconnect_without_connection_is_noop() {
        let mut transport = HttpTransport::new("http://example.com/stream", Duration::from_secs(5));
        transport.disconnect();
        transport.disconnect();
        assert!(transport.task.is_none());
    }

    #[tokio::test]
    async fn test_unparseable_url_reports_invalid_url() {
        let mut transport = HttpTransport::new("not a url at all", Duration::from_secs(1));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        transport.connect(tx);

        let event = rx.recv().await.expect("one event");
        assert!(matches!(event, TransportEvent::Error(Error::InvalidUrl(_))));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unsupported_scheme_reports_invalid_url() {
        let mut transport = HttpTransport::new("ftp://example.com/stream", Duration::from_secs(1));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        transport.connect(tx);

        match rx.recv().await {
            Some(TransportEvent::Error(Error::InvalidUrl(msg))) => {
                assert!(msg.contains("ftp"));
            }
            other => panic!("expected InvalidUrl, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reconnect_replaces_previous_task() {
        let mut transport = HttpTransport::new("not a url at all", Duration::from_secs(1));

        let (tx1, mut rx1) = tokio::sync::mpsc::unbounded_channel();
        transport.connect(tx1);
        assert!(rx1.recv().await.is_some());

        let (tx2, mut rx2) = tokio::sync::mpsc::unbounded_channel();
        transport.connect(tx2);
        assert!(transport.task.is_some());
        assert!(rx2.recv().await.is_some());
    }
}
