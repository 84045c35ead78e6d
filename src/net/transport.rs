//! Origin connections and bounded reads.
//!
//! # Responsibilities
//! - Open TCP connections to origin `host:port`
//! - Apply the optional connect and per-read timeouts
//!
//! # Design Decisions
//! - Timeouts surface as `io::ErrorKind::TimedOut` so callers handle one error type
//! - No timeout configured means the call waits for the peer, as plain sockets do

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;

/// Connect to an origin server.
pub async fn connect(host: &str, port: u16, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let connect = TcpStream::connect((host, port));
    let stream = match timeout {
        Some(limit) => tokio::time::timeout(limit, connect)
            .await
            .map_err(|_| timed_out("connect", limit))??,
        None => connect.await?,
    };
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Read once into `buf`, giving up after `timeout`.
pub async fn read_with_timeout<R>(
    reader: &mut R,
    buf: &mut [u8],
    timeout: Option<Duration>,
) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, reader.read(buf))
            .await
            .map_err(|_| timed_out("read", limit))?,
        None => reader.read(buf).await,
    }
}

fn timed_out(what: &str, after: Duration) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{} timed out after {:?}", what, after))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_to_listening_origin() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let stream = connect("127.0.0.1", port, Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(connect("127.0.0.1", port, None).await.is_err());
    }

    #[tokio::test]
    async fn read_times_out() {
        let (mut client, _server) = tokio::io::duplex(64);
        let mut buf = [0u8; 16];
        let err = read_with_timeout(&mut client, &mut buf, Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn read_returns_available_bytes() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 16];
        let n = read_with_timeout(&mut client, &mut buf, None).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }
}
