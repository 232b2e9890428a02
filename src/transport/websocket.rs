//! WebSocket transport construction (SPEC_FULL.md §4.2, §9 "Decided: transport is
//! pluggable... TCP and WebSocket implementations only"). `tokio-tungstenite` speaks
//! whole messages, not a byte stream, so a background pump task bridges WS binary
//! messages onto a `tokio::io::duplex` pipe and the generic `Transport` is built over
//! that pipe exactly as it is over a TCP socket. Grounded in the teacher's
//! `transport/websocket/mod.rs` "spawn a task, bridge over channels" shape, adapted
//! from message channels to a byte-stream duplex so the rest of the codec/transport
//! stack never has to know which underlying carrier it's running over.

use super::Transport;
use futures_util::{SinkExt, StreamExt};
use std::io;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const BRIDGE_BUFFER: usize = 4 * 1024 * 1024;

/// Wraps an already-established `WebSocketStream` (client `connect_async` result or
/// a server-side accepted upgrade) into a `Transport`.
pub fn from_stream<S>(ws: WebSocketStream<S>) -> Transport
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut source) = ws.split();
    let (user_side, mut pump_side) = duplex(BRIDGE_BUFFER);
    let (mut pump_read, mut pump_write) = tokio::io::split(pump_side);

    // Outbound: bytes written on the user-facing pipe become one WS binary message
    // per chunk read off the pipe. `Transport::send` always writes one whole framed
    // packet per call, so in practice each chunk is exactly one packet.
    tokio::spawn(async move {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = match pump_read.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if sink.send(Message::Binary(buf[..n].to_vec())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Inbound: every WS binary message is copied verbatim onto the pipe; text/ping/
    // pong/close frames are not part of this protocol and are dropped or, for
    // `Close`, terminate the pump.
    tokio::spawn(async move {
        while let Some(message) = source.next().await {
            match message {
                Ok(Message::Binary(bytes)) => {
                    if pump_write.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    });

    let (read, write) = tokio::io::split(user_side);
    Transport::new(read, write)
}

pub async fn connect(url: &str) -> io::Result<Transport> {
    let (ws, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|err| io::Error::new(io::ErrorKind::ConnectionRefused, err.to_string()))?;
    Ok(from_stream(ws))
}

pub type ServerWebSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
