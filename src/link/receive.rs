use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::link::transport::{is_peer_reset, TransportRx};
use crate::structures::TResult;

/// How a continuous receive cycle ended without a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveExit {
    /// Stopped through its cancellation token.
    Cancelled,
    /// The peer closed its side (zero-byte read).
    PeerClosed,
    /// The peer reset the connection.
    PeerReset,
}

/// Reads into `buf` until cancelled or the connection ends, handing every
/// non-empty read to `on_data` before the buffer is reused.
///
/// Errors other than a peer reset end the cycle and are returned as-is.
pub async fn run_receive<R, F>(
    rx: &mut R,
    buf: &mut [u8],
    cancel: &CancellationToken,
    mut on_data: F,
) -> TResult<ReceiveExit>
where
    R: TransportRx + ?Sized,
    F: FnMut(&[u8]),
{
    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(ReceiveExit::Cancelled),
            r = rx.recv(buf) => r,
        };

        match read {
            Ok(0) => {
                debug!(msg = "Peer closed");
                return Ok(ReceiveExit::PeerClosed);
            }
            Ok(n) => {
                trace!(bytes = n, msg = "Receive cycle");
                on_data(&buf[..n]);
            }
            Err(e) if is_peer_reset(&e) => {
                debug!(error = %e, msg = "Peer reset");
                return Ok(ReceiveExit::PeerReset);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structures::LinkError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io;

    enum Step {
        Bytes(Vec<u8>),
        Eof,
        Fail(io::ErrorKind),
        Pending,
    }

    struct Scripted {
        steps: VecDeque<Step>,
    }

    impl Scripted {
        fn new(steps: Vec<Step>) -> Self {
            Self { steps: steps.into() }
        }
    }

    #[async_trait]
    impl TransportRx for Scripted {
        async fn recv(&mut self, buf: &mut [u8]) -> TResult<usize> {
            match self.steps.pop_front().unwrap_or(Step::Pending) {
                Step::Bytes(b) => {
                    buf[..b.len()].copy_from_slice(&b);
                    Ok(b.len())
                }
                Step::Eof => Ok(0),
                Step::Fail(kind) => Err(io::Error::from(kind).into()),
                Step::Pending => std::future::pending().await,
            }
        }
    }

    #[tokio::test]
    async fn delivers_each_read_in_order_then_reports_close() {
        let mut rx = Scripted::new(vec![
            Step::Bytes(vec![1]),
            Step::Bytes(vec![2, 2]),
            Step::Bytes(vec![3, 3, 3]),
            Step::Eof,
        ]);
        let mut buf = vec![0u8; 8];
        let buf_ptr = buf.as_ptr();
        let mut seen = Vec::new();

        let exit = run_receive(&mut rx, &mut buf, &CancellationToken::new(), |d| {
            assert_eq!(d.as_ptr(), buf_ptr);
            seen.push(d.to_vec());
        })
        .await
        .unwrap();

        assert_eq!(exit, ReceiveExit::PeerClosed);
        assert_eq!(seen, vec![vec![1], vec![2, 2], vec![3, 3, 3]]);
    }

    #[tokio::test]
    async fn reset_ends_cycle_without_error() {
        let mut rx = Scripted::new(vec![Step::Bytes(vec![9]), Step::Fail(io::ErrorKind::ConnectionReset)]);
        let mut buf = vec![0u8; 4];
        let mut count = 0;
        let exit = run_receive(&mut rx, &mut buf, &CancellationToken::new(), |_| count += 1)
            .await
            .unwrap();
        assert_eq!(exit, ReceiveExit::PeerReset);
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn other_failures_are_returned() {
        let mut rx = Scripted::new(vec![Step::Fail(io::ErrorKind::PermissionDenied)]);
        let mut buf = vec![0u8; 4];
        let err = run_receive(&mut rx, &mut buf, &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Io(e) if e.kind() == io::ErrorKind::PermissionDenied));
    }

    #[tokio::test]
    async fn cancel_wakes_a_pending_read() {
        let mut rx = Scripted::new(vec![Step::Pending]);
        let mut buf = vec![0u8; 4];
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let exit = run_receive(&mut rx, &mut buf, &cancel, |_| {}).await.unwrap();
        assert_eq!(exit, ReceiveExit::Cancelled);
    }
}
