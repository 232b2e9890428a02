//! TCP transport construction: splits a `tokio::net::TcpStream` into owned
//! read/write halves and hands them to the generic `Transport`. Mirrors the
//! teacher's habit of keeping each concrete transport to a thin adapter over the
//! shared framed-packet machinery (`transport/framed.rs` plays the same role there).

use super::Transport;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

/// Connects and returns the transport alongside the local socket address the
/// kernel assigned, so the caller can derive a client-chosen `ClientId` from the
/// local source port (SPEC_FULL.md §3).
pub async fn connect(addr: SocketAddr) -> std::io::Result<(Transport, SocketAddr)> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let local = stream.local_addr()?;
    let (read, write) = stream.into_split();
    Ok((Transport::new(read, write), local))
}

pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

pub fn from_accepted(stream: TcpStream) -> std::io::Result<(Transport, SocketAddr)> {
    stream.set_nodelay(true)?;
    let peer = stream.peer_addr()?;
    let (read, write) = stream.into_split();
    Ok((Transport::new(read, write), peer))
}
