//! TCP transport.
//!
//! Frames are length-delimited protobuf messages. The first client frame must
//! be a `ClientHello`, sent within the handshake timeout; authentication finishes before anything from the
//! connection reaches the coordinator. Each connection then runs a reader
//! (client events → coordinator) and a writer (outbox → socket).

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use kingside_wire::{ClientEvent, ClientHello, NotificationKind, ServerNotification};
use prost::Message;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::coordinator::{CoordinatorHandle, Inbound};

/// Accept connections until the listener fails.
pub async fn serve(
    listener: TcpListener,
    config: Arc<ServerConfig>,
    auth: Arc<dyn Authenticator>,
    coordinator: CoordinatorHandle,
) -> io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let config = Arc::clone(&config);
        let auth = Arc::clone(&auth);
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer, config, auth, coordinator).await;
        });
    }
}

fn encode(notification: &ServerNotification) -> Bytes {
    Bytes::from(notification.encode_to_vec())
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<ServerConfig>,
    auth: Arc<dyn Authenticator>,
    coordinator: CoordinatorHandle,
) {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(config.max_frame_bytes)
        .new_codec();
    let (mut sink, mut frames) = Framed::new(stream, codec).split();

    // Handshake
    let first = match tokio::time::timeout(config.handshake_timeout(), frames.next()).await {
        Ok(first) => first,
        Err(_) => {
            tracing::info!(%peer, "no hello before handshake timeout");
            return;
        }
    };
    let hello = match first {
        Some(Ok(frame)) => ClientHello::decode(frame.freeze()),
        Some(Err(err)) => {
            tracing::debug!(%peer, error = %err, "connection failed before hello");
            return;
        }
        None => return,
    };
    let identity = match hello
        .map_err(|err| err.to_string())
        .and_then(|hello| auth.authenticate(&hello.token).map_err(|err| err.to_string()))
    {
        Ok(identity) => identity,
        Err(reason) => {
            tracing::info!(%peer, %reason, "authentication failed");
            let _ = sink
                .send(encode(&ServerNotification::auth_failed(reason)))
                .await;
            return;
        }
    };

    let user_id = identity.user_id.clone();
    let connection_id = coordinator.next_connection_id();
    let (outbox, mut outbox_rx) = mpsc::channel(config.outbound_queue_capacity);
    tracing::info!(%peer, %user_id, connection_id, "connection authenticated");

    if coordinator
        .send(Inbound::Join {
            identity,
            connection_id,
            outbox,
        })
        .await
        .is_err()
    {
        return;
    }

    // Writer ends when the registry drops the outbox or after `superseded`
    let mut writer = tokio::spawn(async move {
        while let Some(notification) = outbox_rx.recv().await {
            let last = matches!(notification.kind, Some(NotificationKind::Superseded(_)));
            if sink.send(encode(&notification)).await.is_err() || last {
                break;
            }
        }
    });

    let reason = loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(frame)) => match ClientEvent::decode(frame.freeze()) {
                    Ok(ClientEvent { kind: Some(event) }) => {
                        let inbound = Inbound::Event {
                            user_id: user_id.clone(),
                            connection_id,
                            event,
                        };
                        if coordinator.send(inbound).await.is_err() {
                            break "coordinator stopped".to_string();
                        }
                    }
                    Ok(ClientEvent { kind: None }) => {
                        tracing::debug!(%user_id, connection_id, "empty client event ignored");
                    }
                    Err(err) => {
                        tracing::warn!(%user_id, connection_id, error = %err, "undecodable client event");
                    }
                },
                Some(Err(err)) => break err.to_string(),
                None => break "closed by peer".to_string(),
            },
            _ = &mut writer => break "outbound closed".to_string(),
        }
    };

    writer.abort();
    let _ = coordinator
        .send(Inbound::Disconnect {
            user_id,
            connection_id,
            reason,
        })
        .await;
}
