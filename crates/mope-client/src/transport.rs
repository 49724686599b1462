//! TCP connection to an index server

use mope_core::FramedTransport;
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::Result;

pub type TcpTransport = FramedTransport<TcpStream>;

/// Open a session; it lasts until the transport is dropped or a request fails
pub async fn connect(addr: impl ToSocketAddrs) -> Result<TcpTransport> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    tracing::debug!(peer = %stream.peer_addr()?, "Connected");
    Ok(FramedTransport::new(stream))
}
