use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{SockRef, TcpKeepalive};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, warn};

use crate::pump::{pump, Direction};

/// Idle time and probe interval for keepalive on the client socket.
pub const KEEPALIVE_PERIOD: Duration = Duration::from_secs(60);

/// How long the upstream may keep replying after the client half-closed.
pub const HALF_CLOSE_LINGER: Duration = Duration::from_secs(5);

/// One accepted client paired with a freshly dialed upstream connection.
///
/// Both sockets live exactly as long as [`Session::run`]; every return path
/// drops them.
pub struct Session {
    inbound: TcpStream,
    addr: SocketAddr,
    target: Arc<str>,
}

impl Session {
    pub fn new(inbound: TcpStream, addr: SocketAddr, target: Arc<str>) -> Self {
        Session {
            inbound,
            addr,
            target,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Dials the upstream and relays in both directions until one side is done.
    ///
    /// Only a failed dial is reported as an error. Transport errors while
    /// forwarding just end the session.
    pub async fn run(mut self) -> Result<()> {
        if let Err(err) = set_keepalive(&self.inbound) {
            warn!(cause = %err, "failed to enable keepalive");
        }

        let mut outbound = TcpStream::connect(&*self.target)
            .await
            .with_context(|| format!("target connection failed: {}", self.target))?;
        debug!(address = ?outbound.peer_addr().ok(), "established");

        let (mut ri, mut wi) = self.inbound.split();
        let (mut ro, mut wo) = outbound.split();

        let client_to_upstream = async {
            pump(&mut ri, &mut wo, Direction::ClientToUpstream).await?;
            wo.shutdown().await
        };
        let upstream_to_client = pump(&mut ro, &mut wi, Direction::UpstreamToClient);
        tokio::pin!(client_to_upstream, upstream_to_client);

        tokio::select! {
            _ = &mut upstream_to_client => {}
            res = &mut client_to_upstream => {
                if res.is_ok()
                    && time::timeout(HALF_CLOSE_LINGER, &mut upstream_to_client)
                        .await
                        .is_err()
                {
                    debug!("upstream did not finish after client half-close");
                }
            }
        }

        Ok(())
    }
}

/// Turns on TCP keepalive with a [`KEEPALIVE_PERIOD`] idle time and interval.
pub fn set_keepalive(stream: &TcpStream) -> std::io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_PERIOD);
    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "windows",
    ))]
    let keepalive = keepalive.with_interval(KEEPALIVE_PERIOD);

    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn keepalive_enabled() {
        let (_client, server) = connected_pair().await;
        set_keepalive(&server).unwrap();

        let sock = SockRef::from(&server);
        assert!(sock.keepalive().unwrap());
        #[cfg(target_os = "linux")]
        {
            assert_eq!(sock.keepalive_time().unwrap(), KEEPALIVE_PERIOD);
            assert_eq!(sock.keepalive_interval().unwrap(), KEEPALIVE_PERIOD);
        }
    }

    #[tokio::test]
    async fn dial_failure_closes_client() {
        let unused = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let (mut client, server) = connected_pair().await;
        let addr = server.peer_addr().unwrap();

        let session = Session::new(server, addr, unused.to_string().into());
        let err = session.run().await.unwrap_err();
        assert!(err.to_string().contains("target connection failed"));

        let mut buf = [0u8; 1];
        let read = client.read(&mut buf).await;
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    #[tokio::test]
    async fn upstream_close_ends_session() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target: Arc<str> = upstream.local_addr().unwrap().to_string().into();
        let (mut client, server) = connected_pair().await;
        let addr = server.peer_addr().unwrap();

        let session = tokio::spawn(Session::new(server, addr, target).run());

        let (mut peer, _) = upstream.accept().await.unwrap();
        peer.write_all(b"bye").await.unwrap();
        drop(peer);

        time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let mut got = Vec::new();
        client.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, b"bye");
    }

    #[tokio::test]
    async fn silent_upstream_released_after_linger() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target: Arc<str> = upstream.local_addr().unwrap().to_string().into();
        let (mut client, server) = connected_pair().await;
        let addr = server.peer_addr().unwrap();

        let session = tokio::spawn(Session::new(server, addr, target).run());
        let (mut peer, _) = upstream.accept().await.unwrap();

        client.write_all(b"ping").await.unwrap();
        client.shutdown().await.unwrap();

        // The half-close reaches the upstream, which then stays open and silent.
        let mut forwarded = Vec::new();
        peer.read_to_end(&mut forwarded).await.unwrap();
        assert_eq!(forwarded, b"ping");

        let started = time::Instant::now();
        time::timeout(HALF_CLOSE_LINGER + Duration::from_secs(3), session)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(started.elapsed() <= HALF_CLOSE_LINGER + Duration::from_secs(3));

        let mut got = Vec::new();
        client.read_to_end(&mut got).await.unwrap();
        assert!(got.is_empty());

        drop(peer);
    }
}
