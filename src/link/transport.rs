// Read/write seams of a device connection and their TCP implementation.
// The link drives the read side from one task and the write side from callers,
// so a connection is always handed out as two halves.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

use crate::common::uri::describe_endpoint;
use crate::structures::{LinkConfig, LinkError, TResult};

pub trait TransportMeta {
    // Human readable description of the peer
    fn describe(&self) -> String;
}

#[async_trait]
pub trait TransportRx: Send {
    /// Single read into `buf`. `Ok(0)` means the peer closed its side.
    async fn recv(&mut self, buf: &mut [u8]) -> TResult<usize>;
}

#[async_trait]
pub trait TransportTx: Send {
    /// Writes all of `buf`, returns the number of bytes sent.
    async fn send(&mut self, buf: &[u8]) -> TResult<usize>;
    /// Graceful shutdown of the write direction.
    async fn shutdown(&mut self) -> TResult<()>;
}

pub struct TcpRx {
    half: OwnedReadHalf,
}

pub struct TcpTx {
    half: OwnedWriteHalf,
}

/// Opens a stream to the configured endpoint, bounded by the connect timeout.
pub async fn connect_tcp(config: &LinkConfig) -> TResult<(TcpRx, TcpTx)> {
    let addr = config.endpoint.addr();
    let stream = match timeout(config.connect_timeout(), TcpStream::connect(addr)).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err(LinkError::ConnectTimeout),
    };
    stream.set_nodelay(config.nodelay)?;
    let (read, write) = stream.into_split();
    Ok((TcpRx { half: read }, TcpTx { half: write }))
}

/// Transport errors that mean the peer tore the connection down abruptly.
pub fn is_peer_reset(err: &LinkError) -> bool {
    use std::io::ErrorKind;
    match err {
        LinkError::Io(e) => matches!(e.kind(), ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted),
        _ => false,
    }
}

impl TransportMeta for TcpRx {
    fn describe(&self) -> String {
        self.half
            .peer_addr()
            .map(|a| describe_endpoint(&a))
            .unwrap_or_else(|_| "tcp://<unknown>".to_string())
    }
}

#[async_trait]
impl TransportRx for TcpRx {
    async fn recv(&mut self, buf: &mut [u8]) -> TResult<usize> {
        self.half.read(buf).await.map_err(Into::into)
    }
}

#[async_trait]
impl TransportTx for TcpTx {
    async fn send(&mut self, buf: &[u8]) -> TResult<usize> {
        self.half.write_all(buf).await?;
        Ok(buf.len())
    }

    async fn shutdown(&mut self) -> TResult<()> {
        self.half.shutdown().await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn reset_and_abort_count_as_peer_reset() {
        let reset = LinkError::Io(io::Error::from(io::ErrorKind::ConnectionReset));
        let aborted = LinkError::Io(io::Error::from(io::ErrorKind::ConnectionAborted));
        let other = LinkError::Io(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(is_peer_reset(&reset));
        assert!(is_peer_reset(&aborted));
        assert!(!is_peer_reset(&other));
        assert!(!is_peer_reset(&LinkError::Closed));
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let cfg = LinkConfig::new(addr.into());
        assert!(connect_tcp(&cfg).await.is_err());
    }

    #[tokio::test]
    async fn halves_carry_bytes_both_ways() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let cfg = LinkConfig::new(listener.local_addr().unwrap().into());

        let (mut rx, mut tx) = connect_tcp(&cfg).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();
        assert_eq!(rx.describe(), cfg.endpoint.to_string());

        assert_eq!(tx.send(b"ping").await.unwrap(), 4);
        let mut got = [0u8; 4];
        peer.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"ping");

        peer.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 16];
        let n = rx.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");
    }
}
