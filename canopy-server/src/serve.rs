// ABOUTME: WebSocket monitoring feed - one MonitorSession per connection,
// ABOUTME: pumping command replies and bus items straight into the socket.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use canopy::dispatch::Dispatcher;
use canopy::monitor::{MonitorSession, ServerMessage};
use futures::{SinkExt, StreamExt, future};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

pub async fn serve(dispatcher: Arc<Dispatcher>, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "monitoring feed listening on ws://{}", addr);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, dispatcher).await {
                        tracing::warn!(peer = %peer, error = %e, "connection ended with error");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down monitoring feed");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, dispatcher: Arc<Dispatcher>) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (ws_sender, ws_receiver) = ws_stream.split();

    let frames = ws_receiver
        .take_while(|frame| {
            if let Err(e) = frame {
                tracing::debug!(error = %e, "websocket read failed");
            }
            future::ready(matches!(frame, Ok(message) if !message.is_close()))
        })
        .filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(text),
                _ => None,
            })
        });
    let sink = ws_sender.with(|message: ServerMessage| {
        future::ready(Ok::<_, WsError>(Message::Text(message.to_json())))
    });

    MonitorSession::new(dispatcher)
        .pump(Box::pin(frames), Box::pin(sink))
        .await?;
    Ok(())
}
