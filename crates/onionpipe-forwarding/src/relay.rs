//! Bidirectional copy between two streams

use futures::future::Either;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// How long the remaining direction may keep draining after the first one ends
pub const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Copy `a` to `b` and `b` to `a` until both directions finish.
///
/// When one direction reaches EOF its write side is shut down on the other
/// stream, then the opposite direction gets [`DRAIN_GRACE`] to finish before
/// both streams are dropped.
///
/// Returns (bytes a → b, bytes b → a)
pub async fn relay<A, B>(a: A, b: B) -> io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let a_to_b = async {
        let copied = tokio::io::copy(&mut a_read, &mut b_write).await;
        let _ = b_write.shutdown().await;
        copied
    };
    let b_to_a = async {
        let copied = tokio::io::copy(&mut b_read, &mut a_write).await;
        let _ = a_write.shutdown().await;
        copied
    };
    tokio::pin!(a_to_b);
    tokio::pin!(b_to_a);

    let first = tokio::select! {
        sent = &mut a_to_b => Either::Left(sent),
        received = &mut b_to_a => Either::Right(received),
    };
    let (sent, received) = match first {
        Either::Left(sent) => (sent, drain(&mut b_to_a).await),
        Either::Right(received) => (drain(&mut a_to_b).await, received),
    };
    Ok((sent?, received?))
}

async fn drain<F>(remaining: F) -> io::Result<u64>
where
    F: Future<Output = io::Result<u64>> + Unpin,
{
    match tokio::time::timeout(DRAIN_GRACE, remaining).await {
        Ok(result) => result,
        Err(_) => {
            debug!("Drain grace period elapsed, closing relay");
            Ok(0)
        }
    }
}
