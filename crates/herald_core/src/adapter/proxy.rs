use super::{PlatformAdapter, PlatformEvent, PlatformKind, Stamper};
use crate::types::{EventScope, PlayerEvent, ProcessId};
use tracing::trace;

/// Velocity/BungeeCord-style proxy. Sees every connection, so its events
/// are always authoritative.
#[derive(Debug)]
pub struct ProxyAdapter {
    stamper: Stamper,
}

impl ProxyAdapter {
    pub fn new(origin: ProcessId) -> Self {
        Self {
            stamper: Stamper::new(origin, EventScope::Network),
        }
    }
}

impl PlatformAdapter for ProxyAdapter {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Proxy
    }

    fn normalize(&self, event: PlatformEvent) -> Option<PlayerEvent> {
        match event {
            PlatformEvent::ServerConnected {
                player,
                server,
                previous_server,
            } => {
                // Reconnecting to the same server is not a switch.
                let previous = previous_server.filter(|prev| *prev != server);
                Some(self.stamper.join(player, server, previous))
            }
            PlatformEvent::Disconnect {
                player,
                last_server: Some(server),
                reason,
            } => Some(self.stamper.leave(player, server, reason)),
            PlatformEvent::Disconnect { player, last_server: None, .. } => {
                trace!("{} disconnected before reaching a server", player.name);
                None
            }
            other => {
                trace!("Proxy ignores backend callback for {}", other.player().name);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventKind, LeaveReason, PlayerId, PlayerIdentity};

    fn nova() -> PlayerIdentity {
        PlayerIdentity::new(PlayerId::new(), "Nova")
    }

    #[test]
    fn test_connect_switch_and_disconnect() {
        let adapter = ProxyAdapter::new("proxy".into());

        let first = adapter
            .normalize(PlatformEvent::ServerConnected {
                player: nova(),
                server: "survival".to_string(),
                previous_server: None,
            })
            .unwrap();
        assert_eq!(first.kind(), EventKind::Join);
        assert_eq!(first.scope(), EventScope::Network);
        assert_eq!(first.sequence(), 1);

        let switch = adapter
            .normalize(PlatformEvent::ServerConnected {
                player: nova(),
                server: "creative".to_string(),
                previous_server: Some("survival".to_string()),
            })
            .unwrap();
        match switch {
            PlayerEvent::Join(join) => {
                assert_eq!(join.previous_backend.as_deref(), Some("survival"));
                assert_eq!(join.sequence, 2);
            }
            other => panic!("expected join, got {:?}", other),
        }

        let leave = adapter
            .normalize(PlatformEvent::Disconnect {
                player: nova(),
                last_server: Some("creative".to_string()),
                reason: LeaveReason::Kicked,
            })
            .unwrap();
        assert_eq!(leave.kind(), EventKind::Leave);
        assert_eq!(leave.backend(), "creative");
    }

    #[test]
    fn test_same_server_reconnect_is_not_a_switch() {
        let adapter = ProxyAdapter::new("proxy".into());
        let event = adapter
            .normalize(PlatformEvent::ServerConnected {
                player: nova(),
                server: "survival".to_string(),
                previous_server: Some("survival".to_string()),
            })
            .unwrap();
        assert!(matches!(event, PlayerEvent::Join(join) if join.previous_backend.is_none()));
    }

    #[test]
    fn test_ignored_callbacks() {
        let adapter = ProxyAdapter::new("proxy".into());
        assert_eq!(adapter.platform(), PlatformKind::Proxy);
        assert!(adapter
            .normalize(PlatformEvent::Disconnect {
                player: nova(),
                last_server: None,
                reason: LeaveReason::Quit,
            })
            .is_none());
        assert!(adapter.normalize(PlatformEvent::PlayerJoin { player: nova() }).is_none());
    }
}
