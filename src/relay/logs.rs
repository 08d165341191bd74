use serde::Deserialize;

use super::session::{Session, next_from};
use super::{ClientChannel, RelayKind, ServerMessage};
use crate::docker::engine::{Engine, LogFollowOptions};

/// Control frames a log client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum LogControl {
    Restart,
}

/// Forward a container's combined output until the client leaves.
///
/// Upstream failures are reported in-channel and release the stream, but the
/// client stays connected and may ask for a restart.
pub async fn relay_logs<E: Engine + ?Sized>(engine: &E, container_id: &str, mut client: ClientChannel) {
    let mut session = Session::new(container_id, RelayKind::Logs);
    session.attach(engine.follow_logs(container_id, LogFollowOptions::SESSION));

    loop {
        tokio::select! {
            chunk = next_from(session.upstream()) => match chunk {
                Some(Ok(data)) => {
                    if client.send(ServerMessage::Log { data }).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(container_id, "Log stream failed: {e}");
                    drop(session.release());
                    if client
                        .send(ServerMessage::Error { message: e.to_string() })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                None => {
                    tracing::debug!(container_id, "Log stream ended");
                    drop(session.release());
                }
            },
            frame = client.recv() => match frame {
                Some(text) => match serde_json::from_str::<LogControl>(&text) {
                    Ok(LogControl::Restart) => {
                        tracing::debug!(container_id, attached = session.is_attached(), "Restarting log stream");
                        drop(session.release());
                        session.attach(engine.follow_logs(container_id, LogFollowOptions::SESSION));
                    }
                    Err(e) => tracing::trace!(container_id, "Ignoring log control frame: {e}"),
                },
                None => break,
            },
        }
    }
}
