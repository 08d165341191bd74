use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use super::session::{Session, next_from};
use super::{ClientChannel, RelayKind, ServerMessage};
use crate::docker::engine::{Engine, ExecChannel};

/// Frames an exec client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ExecCommand {
    Input {
        data: String,
    },
    /// Accepted but not forwarded: the engine exec is never resized.
    Resize {
        #[serde(default)]
        cols: Option<u16>,
        #[serde(default)]
        rows: Option<u16>,
    },
}

/// Decodes shell output into text, holding back a multibyte character split
/// across chunks until the rest of it arrives.
#[derive(Debug, Default)]
struct OutputDecoder {
    pending: Vec<u8>,
}

impl OutputDecoder {
    fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut text = String::new();
        let mut rest = self.pending.as_slice();
        while !rest.is_empty() {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let consumed = self.pending.len() - rest.len();
        self.pending.drain(..consumed);
        text
    }

    /// Whatever is still held back, decoded as-is.
    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}

/// Close the shell's input side and drop its output. No-op when nothing is
/// attached.
async fn close_shell(session: &mut Session<ExecChannel>) {
    if let Some(mut channel) = session.release() {
        if let Err(e) = channel.input.shutdown().await {
            tracing::trace!(container_id = session.container_id(), "Shell input already closed: {e}");
        }
    }
}

/// Bridge a client to an interactive `/bin/sh` inside the container.
///
/// `connected` is sent only once the exec is attached. Frames the client
/// sends before then are dropped.
pub async fn relay_exec<E: Engine + ?Sized>(engine: &E, container_id: &str, mut client: ClientChannel) {
    let mut session = Session::new(container_id, RelayKind::Exec);

    let attached = {
        let mut open = engine.open_shell(container_id);
        loop {
            tokio::select! {
                result = &mut open => break Some(result),
                frame = client.recv() => {
                    if frame.is_none() {
                        break None;
                    }
                }
            }
        }
    };

    match attached {
        None => {
            tracing::debug!(container_id, "Client left before the shell attached");
            return;
        }
        Some(Ok(channel)) => {
            session.attach(channel);
            if client.send(ServerMessage::Connected).await.is_err() {
                close_shell(&mut session).await;
                return;
            }
        }
        Some(Err(e)) => {
            tracing::warn!(container_id, "Failed to open shell: {e}");
            if client
                .send(ServerMessage::Error { message: e.to_string() })
                .await
                .is_err()
            {
                return;
            }
        }
    }

    let mut decoder = OutputDecoder::default();
    loop {
        tokio::select! {
            chunk = next_from(session.upstream().map(|shell| &mut shell.output)) => match chunk {
                Some(Ok(bytes)) => {
                    let data = decoder.push(&bytes);
                    if !data.is_empty() && client.send(ServerMessage::Output { data }).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(container_id, "Shell output failed: {e}");
                    close_shell(&mut session).await;
                    if client
                        .send(ServerMessage::Error { message: e.to_string() })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                None => {
                    tracing::debug!(container_id, "Shell exited");
                    close_shell(&mut session).await;
                    if let Some(data) = decoder.finish() {
                        if client.send(ServerMessage::Output { data }).await.is_err() {
                            break;
                        }
                    }
                    if client.send(ServerMessage::Exit).await.is_err() {
                        break;
                    }
                }
            },
            frame = client.recv() => match frame {
                Some(text) => match serde_json::from_str::<ExecCommand>(&text) {
                    Ok(ExecCommand::Input { data }) => {
                        let written = match session.upstream() {
                            Some(shell) => match shell.input.write_all(data.as_bytes()).await {
                                Ok(()) => shell.input.flush().await,
                                Err(e) => Err(e),
                            },
                            None => Ok(()),
                        };
                        if let Err(e) = written {
                            tracing::warn!(container_id, "Shell input failed: {e}");
                            close_shell(&mut session).await;
                            if client
                                .send(ServerMessage::Error { message: e.to_string() })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                    Ok(ExecCommand::Resize { cols, rows }) => {
                        tracing::trace!(container_id, ?cols, ?rows, "Ignoring resize");
                    }
                    Err(e) => tracing::trace!(container_id, "Ignoring exec frame: {e}"),
                },
                None => break,
            },
        }
    }

    close_shell(&mut session).await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::relay::testing::{FakeClient, FakeEngine, upstream_error};

    fn spawn_relay(engine: &Arc<FakeEngine>, channel: ClientChannel) -> tokio::task::JoinHandle<()> {
        let engine = engine.clone();
        tokio::spawn(async move { relay_exec(engine.as_ref(), "box", channel).await })
    }

    async fn read_input(input: &mut tokio::io::DuplexStream, len: usize) -> String {
        let mut buf = vec![0; len];
        tokio::time::timeout(Duration::from_secs(1), input.read_exact(&mut buf))
            .await
            .expect("shell input timed out")
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    async fn assert_input_closed(input: &mut tokio::io::DuplexStream) {
        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(1), input.read(&mut buf))
            .await
            .expect("shell input still open")
            .unwrap();
        assert_eq!(read, 0);
    }

    #[tokio::test]
    async fn connected_is_sent_only_after_attach() {
        let engine = Arc::new(FakeEngine::default());
        let mut shell = engine.prepare_shell();
        let gate = engine.gate_shell();
        let (mut client, channel) = FakeClient::new();
        let relay = spawn_relay(&engine, channel);

        client.send(r#"{"type":"input","data":"early\n"}"#).await;
        client.assert_quiet().await;

        gate.send(()).unwrap();
        assert_eq!(client.next().await, ServerMessage::Connected);

        client.send(r#"{"type":"input","data":"ls\n"}"#).await;
        assert_eq!(read_input(&mut shell.input, 3).await, "ls\n");

        drop(client);
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn output_is_forwarded_and_exit_sent_once() {
        let engine = Arc::new(FakeEngine::default());
        let mut shell = engine.prepare_shell();
        let (mut client, channel) = FakeClient::new();
        let relay = spawn_relay(&engine, channel);

        assert_eq!(client.next().await, ServerMessage::Connected);
        shell.output.send(Ok(Bytes::from_static(b"$ "))).unwrap();
        shell.output.send(Ok(Bytes::from_static(b"hello\r\n"))).unwrap();
        assert_eq!(client.next().await, ServerMessage::Output { data: "$ ".into() });
        assert_eq!(client.next().await, ServerMessage::Output { data: "hello\r\n".into() });

        drop(shell.output);
        assert_eq!(client.next().await, ServerMessage::Exit);
        client.assert_quiet().await;
        assert_input_closed(&mut shell.input).await;

        drop(client);
        relay.await.unwrap();
    }

    #[test]
    fn decoder_joins_characters_split_across_chunks() {
        let mut decoder = OutputDecoder::default();
        // "€" is E2 82 AC
        assert_eq!(decoder.push(b"cost: \xE2"), "cost: ");
        assert_eq!(decoder.push(b"\x82"), "");
        assert_eq!(decoder.push(b"\xAC5\n"), "€5\n");
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn decoder_replaces_invalid_bytes_once() {
        let mut decoder = OutputDecoder::default();
        assert_eq!(decoder.push(b"a\xFFb"), "a\u{FFFD}b");
        assert_eq!(decoder.push(b"ok\xC3"), "ok");
        assert_eq!(decoder.finish(), Some("\u{FFFD}".into()));
        assert_eq!(decoder.finish(), None);
    }

    #[tokio::test]
    async fn split_multibyte_output_arrives_intact() {
        let engine = Arc::new(FakeEngine::default());
        let mut shell = engine.prepare_shell();
        let (mut client, channel) = FakeClient::new();
        let relay = spawn_relay(&engine, channel);

        assert_eq!(client.next().await, ServerMessage::Connected);
        shell.output.send(Ok(Bytes::from_static(b"caf\xC3"))).unwrap();
        shell.output.send(Ok(Bytes::from_static(b"\xA9\n"))).unwrap();
        assert_eq!(client.next().await, ServerMessage::Output { data: "caf".into() });
        assert_eq!(client.next().await, ServerMessage::Output { data: "é\n".into() });

        drop(shell.output);
        assert_eq!(client.next().await, ServerMessage::Exit);
        assert_input_closed(&mut shell.input).await;

        drop(client);
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn resize_is_accepted_without_effect() {
        let engine = Arc::new(FakeEngine::default());
        let mut shell = engine.prepare_shell();
        let (mut client, channel) = FakeClient::new();
        let relay = spawn_relay(&engine, channel);

        assert_eq!(client.next().await, ServerMessage::Connected);
        client.send(r#"{"type":"resize","cols":120,"rows":40}"#).await;
        client.send(r#"{"type":"resize"}"#).await;
        client.send(r#"{"type":"input","data":"pwd\n"}"#).await;

        assert_eq!(read_input(&mut shell.input, 4).await, "pwd\n");
        client.assert_quiet().await;
        assert_eq!(engine.shell_calls.load(Ordering::SeqCst), 1);

        drop(client);
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn attach_failure_is_reported_without_connected() {
        let engine = Arc::new(FakeEngine::default());
        engine.fail_shell("No such container: box");
        let (mut client, channel) = FakeClient::new();
        let relay = spawn_relay(&engine, channel);

        assert_eq!(
            client.next().await,
            ServerMessage::Error { message: "No such container: box".into() }
        );
        client.send(r#"{"type":"input","data":"ls\n"}"#).await;
        client.assert_quiet().await;

        drop(client);
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn upstream_error_releases_the_shell() {
        let engine = Arc::new(FakeEngine::default());
        let mut shell = engine.prepare_shell();
        let (mut client, channel) = FakeClient::new();
        let relay = spawn_relay(&engine, channel);

        assert_eq!(client.next().await, ServerMessage::Connected);
        shell.output.send(Err(upstream_error("connection reset"))).unwrap();
        assert_eq!(
            client.next().await,
            ServerMessage::Error { message: "connection reset".into() }
        );
        assert_input_closed(&mut shell.input).await;

        drop(client);
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn client_disconnect_ends_the_shell_input() {
        let engine = Arc::new(FakeEngine::default());
        let mut shell = engine.prepare_shell();
        let (mut client, channel) = FakeClient::new();
        let relay = spawn_relay(&engine, channel);

        assert_eq!(client.next().await, ServerMessage::Connected);
        drop(client);
        relay.await.unwrap();

        assert_input_closed(&mut shell.input).await;
    }

    #[tokio::test]
    async fn client_leaving_during_attach_skips_the_session() {
        let engine = Arc::new(FakeEngine::default());
        let _shell = engine.prepare_shell();
        let _gate = engine.gate_shell();
        let (client, channel) = FakeClient::new();
        let relay = spawn_relay(&engine, channel);

        drop(client);
        tokio::time::timeout(Duration::from_secs(1), relay)
            .await
            .expect("relay kept waiting for the shell")
            .unwrap();
    }
}
