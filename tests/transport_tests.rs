//! Integration tests for the HTTP stream transport
//!
//! Each test stands up a raw TCP fixture playing the role of a broadcast
//! server, so status handling, body streaming, timeouts, and connection
//! loss are exercised against real sockets rather than mocks.

use std::time::Duration;

use airwave::{Error, HttpTransport, StreamTransport, TransportEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

async fn recv_event(
    rx: &mut mpsc::UnboundedReceiver<TransportEvent>,
    what: &str,
) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
        .unwrap_or_else(|| panic!("event channel closed waiting for {}", what))
}

#[tokio::test]
async fn test_delivers_connected_data_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 1024];
        let _ = socket.read(&mut request).await;

        let header = "HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\nConnection: close\r\n\r\n";
        socket.write_all(header.as_bytes()).await.unwrap();
        socket.write_all(&[0xAAu8; 4096]).await.unwrap();
        socket.flush().await.unwrap();
        // Socket drop closes the stream cleanly
    });

    let mut transport =
        HttpTransport::new(format!("http://{}/stream.mp3", addr), Duration::from_secs(5));
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.connect(tx);

    assert_eq!(
        recv_event(&mut rx, "connected").await,
        TransportEvent::Connected
    );

    let mut received = 0usize;
    loop {
        match recv_event(&mut rx, "data or disconnect").await {
            TransportEvent::Data(chunk) => {
                assert!(chunk.iter().all(|&b| b == 0xAA));
                received += chunk.len();
            }
            TransportEvent::Disconnected => break,
            other => panic!("unexpected event: {:?}", other),
        }
    }
    assert_eq!(received, 4096);
}

#[tokio::test]
async fn test_http_error_status_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 1024];
        let _ = socket.read(&mut request).await;
        let response = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
        socket.write_all(response.as_bytes()).await.unwrap();
    });

    let mut transport =
        HttpTransport::new(format!("http://{}/missing", addr), Duration::from_secs(5));
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.connect(tx);

    assert_eq!(
        recv_event(&mut rx, "status error").await,
        TransportEvent::Error(Error::HttpStatus(404))
    );
    // The attempt is over; the channel closes without further events
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_connect_timeout_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        // Accept, then never answer
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 1024];
        let _ = socket.read(&mut request).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let mut transport = HttpTransport::new(
        format!("http://{}/stream.mp3", addr),
        Duration::from_millis(200),
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.connect(tx);

    assert_eq!(
        recv_event(&mut rx, "timeout").await,
        TransportEvent::Error(Error::Timeout)
    );
}

#[tokio::test]
async fn test_premature_close_reports_connection_lost() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 1024];
        let _ = socket.read(&mut request).await;

        // Promise more body than will ever arrive
        let header = "HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\nContent-Length: 8192\r\n\r\n";
        socket.write_all(header.as_bytes()).await.unwrap();
        socket.write_all(&[0xBBu8; 1024]).await.unwrap();
        socket.flush().await.unwrap();
    });

    let mut transport =
        HttpTransport::new(format!("http://{}/stream.mp3", addr), Duration::from_secs(5));
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.connect(tx);

    assert_eq!(
        recv_event(&mut rx, "connected").await,
        TransportEvent::Connected
    );

    loop {
        match recv_event(&mut rx, "data or error").await {
            TransportEvent::Data(_) => continue,
            TransportEvent::Error(Error::ConnectionLost) => break,
            other => panic!("expected connection-lost, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_connection_refused_reported() {
    // Bind to learn a free port, then free it again
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut transport =
        HttpTransport::new(format!("http://{}/stream.mp3", addr), Duration::from_secs(5));
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.connect(tx);

    match recv_event(&mut rx, "refusal").await {
        TransportEvent::Error(Error::ConnectionFailed(_)) => {}
        other => panic!("expected connection-failed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_disconnect_stops_event_flow() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 1024];
        let _ = socket.read(&mut request).await;

        let header = "HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\n\r\n";
        if socket.write_all(header.as_bytes()).await.is_err() {
            return;
        }
        // Stream forever until the peer goes away
        loop {
            if socket.write_all(&[0x55u8; 1024]).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let mut transport =
        HttpTransport::new(format!("http://{}/stream.mp3", addr), Duration::from_secs(5));
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.connect(tx);

    assert_eq!(
        recv_event(&mut rx, "connected").await,
        TransportEvent::Connected
    );
    match recv_event(&mut rx, "first data").await {
        TransportEvent::Data(_) => {}
        other => panic!("expected data, got {:?}", other),
    }

    transport.disconnect();

    // Drain whatever was already in flight; the channel must then close
    loop {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(TransportEvent::Data(_))) => continue,
            Ok(Some(other)) => panic!("unexpected event after disconnect: {:?}", other),
            Ok(None) => break,
            Err(_) => panic!("channel did not close after disconnect"),
        }
    }
}
