//! Bidirectional byte pump: a single `tokio::select!` loop racing both
//! directions' reads against one shared idle timer.
//!
//! Grounded on spec.md §4.7/§9's redesign note: the original goroutine pair
//! plus bounded channel becomes one cooperative loop over both halves — a
//! stall on either side is visible to the other immediately, since both
//! directions are driven by the same task rather than two independently
//! joined ones. That closes the gap a plain two-task `tokio::join!` leaves
//! open: an idle timeout bound to the client-read side only lets an idle
//! remote paired with an idle client block the other direction's unbounded
//! read forever. Per spec.md §9's "cancellation is cooperative" note, any
//! activity on either side resets the shared idle timer, and either
//! direction hitting an error ends the whole pump immediately.
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TunnelError;

const BUFFER_SIZE: usize = 1024;
const IDLE_DEADLINE: Duration = Duration::from_secs(5);

/// Copies bytes in both directions between `client` and `remote`. A side
/// hitting EOF half-closes that direction (shutting down the write half of
/// the peer) without ending the other; the pump ends once both sides are
/// half-closed, an error occurs on either side, or `IDLE_DEADLINE` passes
/// with no activity on either side.
///
/// Returns the first non-EOF error encountered, if any.
pub async fn pipe<C, R>(client: C, remote: R) -> Result<(), TunnelError>
where
    C: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut remote_rd, mut remote_wr) = tokio::io::split(remote);

    let mut client_buf = [0u8; BUFFER_SIZE];
    let mut remote_buf = [0u8; BUFFER_SIZE];
    let mut client_open = true;
    let mut remote_open = true;

    let result = loop {
        if !client_open && !remote_open {
            break Ok(());
        }

        tokio::select! {
            read = client_rd.read(&mut client_buf), if client_open => {
                match read {
                    Ok(0) => {
                        client_open = false;
                        let _ = remote_wr.shutdown().await;
                    }
                    Ok(n) => {
                        if let Err(e) = remote_wr.write_all(&client_buf[..n]).await {
                            break Err(e);
                        }
                    }
                    Err(e) => break Err(e),
                }
            }
            read = remote_rd.read(&mut remote_buf), if remote_open => {
                match read {
                    Ok(0) => {
                        remote_open = false;
                        let _ = client_wr.shutdown().await;
                    }
                    Ok(n) => {
                        if let Err(e) = client_wr.write_all(&remote_buf[..n]).await {
                            break Err(e);
                        }
                    }
                    Err(e) => break Err(e),
                }
            }
            _ = tokio::time::sleep(IDLE_DEADLINE) => {
                break Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "tunnel idle deadline exceeded"));
            }
        }
    };

    result.map_err(TunnelError::Pipe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn byte_exact_both_directions() {
        let (client_side, mut client_test_end) = duplex(64);
        let (remote_side, mut remote_test_end) = duplex(64);

        let pump = tokio::spawn(pipe(client_side, remote_side));

        client_test_end.write_all(b"hello remote").await.unwrap();
        let mut buf = [0u8; 12];
        remote_test_end.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello remote");

        remote_test_end.write_all(b"hello client").await.unwrap();
        let mut buf2 = [0u8; 12];
        client_test_end.read_exact(&mut buf2).await.unwrap();
        assert_eq!(&buf2, b"hello client");

        drop(client_test_end);
        drop(remote_test_end);
        let _ = pump.await;
    }

    /// Both ends are left open and silent: neither side ever sees EOF, so
    /// only the shared idle timer can end the pump. This is exactly the
    /// case the old client-side-only timeout missed — a stalled remote
    /// paired with a stalled client.
    #[tokio::test(start_paused = true)]
    async fn idle_timeout_terminates_both_directions() {
        let (client_side, _client_test_end) = duplex(64);
        let (remote_side, _remote_test_end) = duplex(64);

        let pump = tokio::spawn(pipe(client_side, remote_side));
        tokio::time::advance(IDLE_DEADLINE + Duration::from_millis(100)).await;

        let result = pump.await.unwrap();
        assert!(result.is_err());
    }
}
