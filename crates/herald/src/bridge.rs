//! # Host Bridge
//!
//! JSON-lines protocol between the herald node and the host platform
//! plugin. The host writes one [`BridgeInput`] per line to stdin; the node
//! answers with [`BridgeOutput`] lines on stdout.
//!
//! ```text
//! {"type":"platform","event":{"kind":"server_connected","player":{"id":"…","name":"Nova"},"server":"survival"}}
//! {"type":"channel","from":"proxy","data":"<base64 frame>"}
//! {"type":"set_override","player":"…","key":"vip"}
//! {"type":"reset","player":"…"}
//! {"type":"reload"}
//! {"type":"stats"}
//! ```
//!
//! Replication frames ride the host's plugin-messaging channel, so they are
//! base64 encoded in both directions.

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use herald_core::adapter::PlatformEvent;
use herald_core::replication::ReplicationTransport;
use herald_core::{Audience, MessageSink, PlayerId, ProcessId};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// One command from the host.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeInput {
    /// A raw connection callback.
    Platform { event: PlatformEvent },
    /// A replication frame received from another process.
    Channel { from: String, data: String },
    /// Admin: set or clear a player's message override.
    SetOverride {
        player: PlayerId,
        #[serde(default)]
        key: Option<String>,
    },
    /// Admin: forget everything about a player.
    Reset { player: PlayerId },
    /// Re-read the `[messages]` section of the configuration file.
    Reload,
    /// Log coordinator and link counters.
    Stats,
}

impl BridgeInput {
    /// Decodes one stdin line.
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        serde_json::from_str(line.trim()).context("malformed bridge line")
    }

    /// Raw frame bytes of a `channel` input.
    pub fn decode_frame(data: &str) -> anyhow::Result<Vec<u8>> {
        STANDARD.decode(data).context("channel data is not valid base64")
    }
}

/// One instruction for the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeOutput {
    /// Broadcast `text` to `audience`.
    Deliver { audience: Audience, text: String },
    /// Forward a replication frame to process `to`.
    Channel { to: String, data: String },
}

/// Outbound queue shared by the message sink and the replication transport.
///
/// Both capabilities are fire-and-forget, so they only enqueue; a single
/// writer task owns stdout.
#[derive(Debug, Clone)]
pub struct OutputQueue {
    tx: mpsc::UnboundedSender<BridgeOutput>,
}

impl OutputQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BridgeOutput>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn push(&self, output: BridgeOutput) {
        if self.tx.send(output).is_err() {
            debug!("Bridge writer gone; dropping output");
        }
    }
}

impl MessageSink for OutputQueue {
    fn deliver(&self, audience: Audience, text: &str) {
        self.push(BridgeOutput::Deliver {
            audience,
            text: text.to_string(),
        });
    }
}

impl ReplicationTransport for OutputQueue {
    fn send_frame(&self, target: &ProcessId, frame: Vec<u8>) {
        self.push(BridgeOutput::Channel {
            to: target.to_string(),
            data: STANDARD.encode(frame),
        });
    }
}

/// Writes queued outputs as JSON lines until every [`OutputQueue`] clone is
/// dropped, then hands the writer back.
pub async fn write_lines<W>(mut rx: mpsc::UnboundedReceiver<BridgeOutput>, mut out: W) -> W
where
    W: AsyncWrite + Unpin,
{
    while let Some(output) = rx.recv().await {
        let mut line = match serde_json::to_string(&output) {
            Ok(line) => line,
            Err(e) => {
                error!("❌ Failed to encode bridge output: {}", e);
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = out.write_all(line.as_bytes()).await {
            error!("❌ Failed to write bridge output: {}", e);
            break;
        }
        if let Err(e) = out.flush().await {
            error!("❌ Failed to flush bridge output: {}", e);
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::PlayerIdentity;
    use serde_json::Value;

    #[test]
    fn test_parse_platform_line() {
        let id = PlayerId::new();
        let line = format!(
            r#"{{"type":"platform","event":{{"kind":"server_connected","player":{{"id":"{}","name":"Nova"}},"server":"survival"}}}}"#,
            id
        );
        let input = BridgeInput::parse(&line).unwrap();
        assert_eq!(
            input,
            BridgeInput::Platform {
                event: PlatformEvent::ServerConnected {
                    player: PlayerIdentity::new(id, "Nova"),
                    server: "survival".to_string(),
                    previous_server: None,
                }
            }
        );
    }

    #[test]
    fn test_parse_admin_lines() {
        let id = PlayerId::new();
        let clear = BridgeInput::parse(&format!(r#"{{"type":"set_override","player":"{}"}}"#, id)).unwrap();
        assert_eq!(clear, BridgeInput::SetOverride { player: id, key: None });

        let reset = BridgeInput::parse(&format!(r#"{{"type":"reset","player":"{}"}}"#, id)).unwrap();
        assert_eq!(reset, BridgeInput::Reset { player: id });

        assert_eq!(BridgeInput::parse("  {\"type\":\"reload\"}\n").unwrap(), BridgeInput::Reload);
    }

    #[test]
    fn test_malformed_lines_are_errors() {
        assert!(BridgeInput::parse("not json").is_err());
        assert!(BridgeInput::parse(r#"{"type":"teleport"}"#).is_err());
        assert!(BridgeInput::parse(r#"{"type":"reset","player":"nope"}"#).is_err());
        assert!(BridgeInput::decode_frame("%%%").is_err());
    }

    #[tokio::test]
    async fn test_outputs_written_as_json_lines() {
        let (queue, rx) = OutputQueue::new();
        queue.deliver(Audience::Network, "Nova joined the game");
        queue.send_frame(&ProcessId::new("survival"), vec![1, 2, 3]);
        drop(queue);

        let written = write_lines(rx, Vec::new()).await;
        let text = String::from_utf8(written).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "deliver");
        assert_eq!(lines[0]["audience"]["scope"], "network");
        assert_eq!(lines[0]["text"], "Nova joined the game");
        assert_eq!(lines[1]["type"], "channel");
        assert_eq!(lines[1]["to"], "survival");

        let data = lines[1]["data"].as_str().unwrap();
        assert_eq!(BridgeInput::decode_frame(data).unwrap(), vec![1, 2, 3]);
    }
}
