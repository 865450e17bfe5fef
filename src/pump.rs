use std::fmt;

use tokio::io::{self, AsyncRead, AsyncWrite};
use tracing::debug;

/// Which way a [`pump`] moves bytes within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToUpstream => f.write_str("client->upstream"),
            Direction::UpstreamToClient => f.write_str("upstream->client"),
        }
    }
}

/// Copies everything `source` yields into `sink`.
///
/// Resolves with the number of bytes moved once `source` reaches EOF, or with
/// the first transport error from either side. Neither endpoint is shut down
/// or closed here; that is left to the owning session.
pub async fn pump<R, W>(source: &mut R, sink: &mut W, direction: Direction) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let res = io::copy(source, sink).await;
    match &res {
        Ok(bytes) => debug!(%direction, bytes, "eof"),
        Err(err) => debug!(%direction, cause = %err, "transport error"),
    }
    res
}
