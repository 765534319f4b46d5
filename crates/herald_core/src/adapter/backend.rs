use super::{PlatformAdapter, PlatformEvent, PlatformKind, Stamper};
use crate::types::{EventScope, LeaveReason, PlayerEvent, ProcessId};
use tracing::trace;

/// Paper/Spigot/Folia-style backend.
///
/// Behind a proxy its events are `Local`: the proxy observes the same
/// connection and is the one that records and replicates it.
#[derive(Debug)]
pub struct BackendAdapter {
    server: String,
    stamper: Stamper,
}

impl BackendAdapter {
    /// `server` is this backend's id as the proxy knows it.
    pub fn new(origin: ProcessId, server: impl Into<String>, behind_proxy: bool) -> Self {
        let scope = if behind_proxy {
            EventScope::Local
        } else {
            EventScope::Network
        };
        Self {
            server: server.into(),
            stamper: Stamper::new(origin, scope),
        }
    }
}

impl PlatformAdapter for BackendAdapter {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Backend
    }

    fn normalize(&self, event: PlatformEvent) -> Option<PlayerEvent> {
        match event {
            PlatformEvent::PlayerJoin { player } => Some(self.stamper.join(player, self.server.clone(), None)),
            PlatformEvent::PlayerQuit { player, reason } => {
                Some(self.stamper.leave(player, self.server.clone(), reason))
            }
            PlatformEvent::PlayerKick { player } => {
                Some(self.stamper.leave(player, self.server.clone(), LeaveReason::Kicked))
            }
            other => {
                trace!("Backend ignores proxy callback for {}", other.player().name);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PlayerId, PlayerIdentity};

    #[test]
    fn test_scope_follows_topology() {
        let nova = PlayerIdentity::new(PlayerId::new(), "Nova");

        let behind = BackendAdapter::new("survival".into(), "survival", true);
        let event = behind.normalize(PlatformEvent::PlayerJoin { player: nova.clone() }).unwrap();
        assert_eq!(event.scope(), EventScope::Local);
        assert_eq!(event.backend(), "survival");

        let alone = BackendAdapter::new("lobby".into(), "lobby", false);
        let event = alone.normalize(PlatformEvent::PlayerJoin { player: nova }).unwrap();
        assert_eq!(event.scope(), EventScope::Network);
    }

    #[test]
    fn test_kick_becomes_kicked_leave() {
        let adapter = BackendAdapter::new("survival".into(), "survival", false);
        let nova = PlayerIdentity::new(PlayerId::new(), "Nova");
        match adapter.normalize(PlatformEvent::PlayerKick { player: nova }) {
            Some(PlayerEvent::Leave(leave)) => assert_eq!(leave.reason, LeaveReason::Kicked),
            other => panic!("expected leave, got {:?}", other),
        }
    }

    #[test]
    fn test_proxy_callbacks_are_ignored() {
        let adapter = BackendAdapter::new("survival".into(), "survival", true);
        assert_eq!(adapter.platform(), PlatformKind::Backend);
        let nova = PlayerIdentity::new(PlayerId::new(), "Nova");
        assert!(adapter
            .normalize(PlatformEvent::ServerConnected {
                player: nova,
                server: "survival".to_string(),
                previous_server: None,
            })
            .is_none());
    }
}
