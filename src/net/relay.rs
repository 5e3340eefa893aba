//! One-directional byte relay.
//!
//! A connection pair runs two relays, one per direction, sharing a single
//! backend lease, a close signal and an activity clock. Each relay:
//! - copies bytes until EOF, an error, a pair-wide idle timeout or a forced close
//! - half-closes the destination's write side on clean EOF
//! - on error, counts a backend failure, closes the whole pair and releases
//!   the lease
//!
//! A clean EOF leaves the lease alone: the pair still holds its slot until
//! the owner of both directions releases it.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time;

use crate::load_balancer::{Backend, BackendLease};
use crate::net::buffer::BufferPool;
use crate::net::connection::{ConnectionHandle, PairActivity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToBackend => f.write_str("client->backend"),
            Direction::BackendToClient => f.write_str("backend->client"),
        }
    }
}

/// How a relay ended.
#[derive(Debug)]
pub enum RelayOutcome {
    /// Source reached EOF; the destination was half-closed.
    Finished,
    /// The pair was closed from elsewhere.
    Closed,
    /// Read, write or idle timeout failure.
    Failed(io::Error),
}

#[derive(Debug)]
pub struct RelayReport {
    pub direction: Direction,
    pub bytes: u64,
    pub outcome: RelayOutcome,
}

/// Everything a relay shares with its sibling.
#[derive(Debug, Clone)]
pub struct RelayContext {
    pub backend: Arc<Backend>,
    pub lease: BackendLease,
    pub connection: ConnectionHandle,
    pub buffers: Arc<BufferPool>,
    pub idle_timeout: Option<Duration>,
}

/// Copy `src` into `dst` until one of the exit conditions above.
pub async fn relay<R, W>(mut src: R, mut dst: W, direction: Direction, mut ctx: RelayContext) -> RelayReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = ctx.buffers.get();
    let mut bytes = 0u64;
    let activity = ctx.connection.activity();

    let outcome = loop {
        let read = tokio::select! {
            biased;
            _ = ctx.connection.closed() => break RelayOutcome::Closed,
            read = read_with_deadline(&mut src, &mut buf, ctx.idle_timeout, &activity) => read,
        };

        let n = match read {
            Ok(0) => {
                // Half-close: the peer may still be sending the other way.
                if let Err(e) = dst.shutdown().await {
                    tracing::debug!(%direction, error = %e, "Half-close failed");
                }
                break RelayOutcome::Finished;
            }
            Ok(n) => n,
            Err(e) => break RelayOutcome::Failed(e),
        };
        activity.touch();

        let written = tokio::select! {
            biased;
            _ = ctx.connection.closed() => break RelayOutcome::Closed,
            written = dst.write_all(&buf[..n]) => written,
        };
        if let Err(e) = written {
            break RelayOutcome::Failed(e);
        }
        activity.touch();
        bytes += n as u64;
    };

    if let RelayOutcome::Failed(e) = &outcome {
        tracing::warn!(
            backend = %ctx.backend.address,
            %direction,
            error = %e,
            "Relay failed, closing connection pair"
        );
        ctx.backend.record_failure();
        ctx.connection.close();
        ctx.lease.release();
    }

    RelayReport {
        direction,
        bytes,
        outcome,
    }
}

/// Read once, failing only when the whole pair has been quiet for `idle`.
///
/// Traffic in the other direction pushes the deadline back, so a one-way
/// stream keeps its silent side alive.
async fn read_with_deadline<R>(
    src: &mut R,
    buf: &mut [u8],
    idle: Option<Duration>,
    activity: &PairActivity,
) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let Some(limit) = idle else {
        return src.read(buf).await;
    };

    loop {
        let quiet = activity.idle_for();
        if quiet >= limit {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "idle timeout exceeded"));
        }
        // `read` is cancel safe, so retrying after a timeout loses nothing.
        if let Ok(read) = time::timeout(limit - quiet, src.read(buf)).await {
            return read;
        }
    }
}
