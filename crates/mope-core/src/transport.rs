//! One request, one response
//!
//! [`Transport`] is the seam the client's navigation logic is written
//! against. [`FramedTransport`] implements it over any tokio byte stream; the
//! server crate provides an in-process loopback.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::frame::{read_frame, write_frame};
use crate::{Envelope, Error, Request, Response, Result, PROTOCOL_VERSION};

/// Synchronous request/response exchange with the index server
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn round_trip(&mut self, request: Request) -> Result<Response>;
}

/// Framed envelopes over a byte stream
pub struct FramedTransport<S> {
    stream: S,
    next_id: u64,
}

impl<S> FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self { stream, next_id: 1 }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S> Transport for FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn round_trip(&mut self, request: Request) -> Result<Response> {
        let id = self.next_id;
        self.next_id += 1;

        tracing::trace!(id, kind = request.kind(), "Sending request");
        write_frame(&mut self.stream, &Envelope::new(id, request)).await?;

        let reply: Envelope<Response> = read_frame(&mut self.stream)
            .await?
            .ok_or(Error::ConnectionClosed)?;

        if reply.version != PROTOCOL_VERSION {
            return Err(Error::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: reply.version,
            });
        }
        if reply.id != id {
            return Err(Error::CorrelationMismatch {
                expected: id,
                actual: reply.id,
            });
        }

        Ok(reply.body)
    }
}
