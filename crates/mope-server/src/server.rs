//! TCP session server
//!
//! One connection is one session. Sessions are served strictly one after
//! another, so the service has a single writer and needs no locking. A
//! session ends when the client disconnects, when a request fails, or when
//! the client stays silent longer than the idle timeout. A failed request is
//! answered with an error reply before the connection is dropped.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use mope_core::frame::{read_frame, write_frame};
use mope_core::{Envelope, ErrorReply, Request, Response, PROTOCOL_VERSION};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};

use crate::error::{Result, ServerError};
use crate::service::IndexService;
use crate::store::TreeStore;

/// How long a session may wait for its next request
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Server<S> {
    listener: TcpListener,
    service: IndexService<S>,
    session_timeout: Duration,
}

impl<S: TreeStore> Server<S> {
    pub async fn bind(addr: impl ToSocketAddrs, service: IndexService<S>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            service,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
        })
    }

    /// Drop sessions that send nothing for `timeout`
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn service(&self) -> &IndexService<S> {
        &self.service
    }

    /// Accept and serve sessions until `shutdown` resolves. An open session
    /// is cut off at its next await point; a request already handled has
    /// been committed by then.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<IndexService<S>>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tracing::info!(addr = %self.local_addr()?, "Accepting sessions");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutting down");
                    return Ok(self.service);
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted?;
                    stream.set_nodelay(true)?;
                    tracing::info!(%peer, "Session opened");
                    let outcome = tokio::select! {
                        _ = &mut shutdown => {
                            tracing::info!(%peer, "Shutting down; session cut off");
                            return Ok(self.service);
                        }
                        outcome = self.serve_session(stream) => outcome,
                    };
                    match outcome {
                        Ok(requests) => tracing::info!(%peer, requests, "Session closed"),
                        Err(ServerError::IdleTimeout(idle)) => {
                            tracing::info!(%peer, ?idle, "Session idle; closed")
                        }
                        Err(e) => tracing::warn!(%peer, error = %e, "Session aborted"),
                    }
                }
            }
        }
    }

    /// Serve requests from one stream until it closes; returns the number of
    /// requests answered
    pub async fn serve_session<T>(&mut self, mut stream: T) -> Result<u64>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut answered = 0u64;

        loop {
            let next = read_frame::<_, Envelope<Request>>(&mut stream);
            let Ok(frame) = tokio::time::timeout(self.session_timeout, next).await else {
                return Err(ServerError::IdleTimeout(self.session_timeout));
            };
            let Some(envelope) = frame? else {
                return Ok(answered);
            };

            if envelope.version != PROTOCOL_VERSION {
                let reply = ErrorReply {
                    code: "VERSION_MISMATCH".to_string(),
                    message: format!(
                        "server speaks v{}, request was v{}",
                        PROTOCOL_VERSION, envelope.version
                    ),
                };
                write_frame(&mut stream, &Envelope::new(envelope.id, Response::Error(reply))).await?;
                return Err(ServerError::Codec(mope_core::Error::VersionMismatch {
                    expected: PROTOCOL_VERSION,
                    actual: envelope.version,
                }));
            }

            let kind = envelope.body.kind();
            tracing::trace!(id = envelope.id, kind, "Handling request");

            match self.service.handle(envelope.body) {
                Ok(response) => {
                    write_frame(&mut stream, &Envelope::new(envelope.id, response)).await?;
                    answered += 1;
                }
                Err(e) => {
                    let reply = self.service.recover(&e);
                    write_frame(&mut stream, &Envelope::new(envelope.id, Response::Error(reply))).await?;
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use mope_core::{Ciphertext, FramedTransport, InsertRequest, Path, TreeConfig, Transport};

    fn ct(s: &str) -> Ciphertext {
        Ciphertext::from(s.as_bytes())
    }

    async fn server() -> Server<MemoryStore> {
        let service = IndexService::open(MemoryStore::new(), TreeConfig::default()).unwrap();
        Server::bind("127.0.0.1:0", service).await.unwrap()
    }

    #[tokio::test]
    async fn test_session_over_duplex() {
        let mut server = server().await;
        let (client, session) = tokio::io::duplex(4096);

        let client_task = tokio::spawn(async move {
            let mut transport = FramedTransport::new(client);
            let root = InsertRequest { parent: None, value: ct("m"), direction: None, path: Path::root() };
            let inserted = transport.round_trip(Request::Insert(root)).await.unwrap();
            assert_eq!(inserted, Response::Inserted(Some(ct("m"))));
            let fetched = transport.round_trip(Request::GetRoot).await.unwrap();
            assert_eq!(fetched, Response::Root(Some(ct("m"))));
        });

        let answered = server.serve_session(session).await.unwrap();
        client_task.await.unwrap();
        assert_eq!(answered, 2);
        assert_eq!(server.service().tree().len(), 1);
    }

    #[tokio::test]
    async fn test_error_reply_ends_session() {
        let mut server = server().await;
        let (client, session) = tokio::io::duplex(4096);

        let client_task = tokio::spawn(async move {
            let mut transport = FramedTransport::new(client);
            let reply = transport.round_trip(Request::MoveLeft(ct("ghost"))).await.unwrap();
            match reply {
                Response::Error(reply) => assert_eq!(reply.code, "UNKNOWN_CIPHERTEXT"),
                other => panic!("unexpected {other:?}"),
            }
            assert!(transport.round_trip(Request::GetRoot).await.is_err());
        });

        let result = server.serve_session(session).await;
        assert!(matches!(result, Err(ServerError::UnknownCiphertext(_))));
        drop(server);
        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let server = server().await;
        let addr = server.local_addr().unwrap();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async {
            let _ = stopped.await;
        }));

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut transport = FramedTransport::new(stream);
        assert_eq!(transport.round_trip(Request::GetRoot).await.unwrap(), Response::Root(None));
        drop(transport);

        stop.send(()).unwrap();
        let service = handle.await.unwrap().unwrap();
        assert!(service.tree().is_empty());
    }

    #[tokio::test]
    async fn test_silent_session_times_out() {
        let mut server = server().await.with_session_timeout(Duration::from_millis(50));
        let (_client, session) = tokio::io::duplex(4096);

        let result = server.serve_session(session).await;
        assert!(matches!(result, Err(ServerError::IdleTimeout(_))));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_open_session() {
        let server = server().await.with_session_timeout(Duration::from_secs(3600));
        let addr = server.local_addr().unwrap();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async {
            let _ = stopped.await;
        }));

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut transport = FramedTransport::new(stream);
        assert_eq!(transport.round_trip(Request::GetRoot).await.unwrap(), Response::Root(None));

        // The connection stays open while the server is told to stop
        stop.send(()).unwrap();
        let stopped = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(stopped.unwrap().unwrap().is_ok());
        drop(transport);
    }
}
