//! # Announcer
//!
//! Per-process facade the host talks to. Wires
//! adapter -> coordinator -> resolver -> sink and owns the swappable
//! [`TemplateCatalog`] snapshot. Nothing here returns an error to the host's
//! connection path.

use crate::adapter::{BackendAdapter, PlatformAdapter, PlatformEvent, PlatformKind, PluginMode, ProxyAdapter};
use crate::config::{HeraldConfig, MessagesConfig};
use crate::coordinator::StateCoordinator;
use crate::error::ConfigError;
use crate::templates::{resolve, resolve_welcome, Resolution, TemplateCatalog};
use crate::types::{PlayerId, ProcessId, ResolvedContext};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Who receives a rendered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "target", rename_all = "snake_case")]
pub enum Audience {
    /// Every player on the network (proxy broadcast).
    Network,
    /// Every player on one backend.
    Backend(String),
    /// One player, privately.
    Player(PlayerId),
}

/// Host broadcast capability. Fire-and-forget.
pub trait MessageSink: Send + Sync {
    fn deliver(&self, audience: Audience, text: &str);
}

/// What was decided and delivered for one platform event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub context: ResolvedContext,
    pub audience: Audience,
    pub broadcast: Resolution,
    pub welcome: Resolution,
}

pub struct Announcer {
    mode: PluginMode,
    local_render: bool,
    adapter: Box<dyn PlatformAdapter>,
    coordinator: Arc<StateCoordinator>,
    catalog: RwLock<Arc<TemplateCatalog>>,
    sink: Arc<dyn MessageSink>,
}

impl Announcer {
    /// `mode` must already be resolved (not `Auto`).
    pub fn new(
        mode: PluginMode,
        local_render: bool,
        adapter: Box<dyn PlatformAdapter>,
        coordinator: Arc<StateCoordinator>,
        catalog: TemplateCatalog,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            mode,
            local_render,
            adapter,
            coordinator,
            catalog: RwLock::new(Arc::new(catalog)),
            sink,
        }
    }

    /// Builds the adapter and catalog the configuration asks for.
    pub fn from_config(
        config: &HeraldConfig,
        coordinator: Arc<StateCoordinator>,
        sink: Arc<dyn MessageSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let mode = config.effective_mode();
        let origin = ProcessId::new(config.node.process_id.clone());
        let adapter: Box<dyn PlatformAdapter> = match config.node.platform {
            PlatformKind::Proxy => Box::new(ProxyAdapter::new(origin)),
            PlatformKind::Backend => Box::new(BackendAdapter::new(
                origin,
                config.node.process_id.clone(),
                mode == PluginMode::Backend,
            )),
        };
        let catalog = TemplateCatalog::build(&config.messages)?;
        info!(
            "🚀 Announcer ready: {} platform in {} mode",
            adapter.platform(),
            mode
        );
        Ok(Self::new(
            mode,
            config.node.backend_local_render,
            adapter,
            coordinator,
            catalog,
            sink,
        ))
    }

    pub fn mode(&self) -> PluginMode {
        self.mode
    }

    pub fn coordinator(&self) -> &Arc<StateCoordinator> {
        &self.coordinator
    }

    /// Current configuration snapshot.
    pub fn catalog(&self) -> Arc<TemplateCatalog> {
        self.catalog.read().clone()
    }

    /// Swaps in a new catalog. Events already in flight finish with the old
    /// one; on error the old one stays active.
    pub fn reload(&self, messages: &MessagesConfig) -> Result<(), ConfigError> {
        let catalog = TemplateCatalog::build(messages)?;
        *self.catalog.write() = Arc::new(catalog);
        info!("🔄 Message configuration reloaded");
        Ok(())
    }

    /// Handles one host callback end to end.
    ///
    /// Returns `None` when the callback produced no message decision at all
    /// (disabled mode, irrelevant callback, or a muted backend).
    pub fn on_platform_event(&self, event: PlatformEvent) -> Option<Announcement> {
        if self.mode == PluginMode::Disabled {
            return None;
        }
        let event = self.adapter.normalize(event)?;
        if self.mode == PluginMode::Backend && !self.local_render {
            trace!(
                "Muted {} for {}; the proxy announces it",
                event.kind().as_str(),
                event.identity().name
            );
            return None;
        }

        let catalog = self.catalog();
        let context = self.coordinator.handle_local_event(&event);
        let audience = match self.mode {
            PluginMode::Proxy => Audience::Network,
            _ => Audience::Backend(context.backend.clone()),
        };

        let broadcast = resolve(&context, &catalog);
        match broadcast.text() {
            Some(text) => self.sink.deliver(audience.clone(), text),
            None => debug!("Suppressed {} message for {}", context.kind.as_str(), context.identity.name),
        }

        let welcome = resolve_welcome(&context, &catalog);
        if let Some(text) = welcome.text() {
            self.sink.deliver(Audience::Player(context.identity.id), text);
        }

        Some(Announcement {
            context,
            audience,
            broadcast,
            welcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::{ReplicationLink, ReplicationTransport};
    use crate::store::MemoryStore;
    use crate::types::PlayerIdentity;
    use parking_lot::Mutex;

    struct NullTransport;

    impl ReplicationTransport for NullTransport {
        fn send_frame(&self, _target: &ProcessId, _frame: Vec<u8>) {}
    }

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<(Audience, String)>>,
    }

    impl MessageSink for RecordingSink {
        fn deliver(&self, audience: Audience, text: &str) {
            self.delivered.lock().push((audience, text.to_string()));
        }
    }

    fn announcer(config: &HeraldConfig) -> (Announcer, Arc<RecordingSink>) {
        let process = ProcessId::new(config.node.process_id.clone());
        let peers = config.node.peers.iter().cloned().map(ProcessId::from).collect();
        let (link, _inbound, _stream) = ReplicationLink::new(process, peers, Arc::new(NullTransport));
        let coordinator = Arc::new(StateCoordinator::new(Arc::new(MemoryStore::new()), Arc::new(link)));
        let sink = Arc::new(RecordingSink::default());
        (Announcer::from_config(config, coordinator, sink.clone()).unwrap(), sink)
    }

    fn proxy_config() -> HeraldConfig {
        let mut config = HeraldConfig::default();
        config.node.process_id = "proxy".to_string();
        config.node.platform = PlatformKind::Proxy;
        config.node.peers = vec!["survival".to_string()];
        config
            .messages
            .templates
            .insert("welcome-first".to_string(), "Hi {player}".into());
        config
    }

    #[test]
    fn test_proxy_announces_network_wide() {
        let (announcer, sink) = announcer(&proxy_config());
        assert_eq!(announcer.mode(), PluginMode::Proxy);
        let nova = PlayerIdentity::new(PlayerId::new(), "Nova");

        let announcement = announcer
            .on_platform_event(PlatformEvent::ServerConnected {
                player: nova.clone(),
                server: "survival".to_string(),
                previous_server: None,
            })
            .unwrap();
        assert!(announcement.context.is_first_join_ever);
        assert_eq!(announcement.audience, Audience::Network);

        let delivered = sink.delivered.lock().clone();
        assert_eq!(
            delivered,
            vec![
                (
                    Audience::Network,
                    "Welcome Nova to the network for the first time!".to_string()
                ),
                (Audience::Player(nova.id), "Hi Nova".to_string()),
            ]
        );
    }

    #[test]
    fn test_muted_backend_delivers_nothing() {
        let mut config = HeraldConfig::default();
        config.node.process_id = "survival".to_string();
        config.node.peers = vec!["proxy".to_string()];
        let (announcer, sink) = announcer(&config);
        assert_eq!(announcer.mode(), PluginMode::Backend);

        let nova = PlayerIdentity::new(PlayerId::new(), "Nova");
        assert!(announcer.on_platform_event(PlatformEvent::PlayerJoin { player: nova }).is_none());
        assert!(sink.delivered.lock().is_empty());
        assert_eq!(announcer.coordinator().stats().local_events, 0);
    }

    #[test]
    fn test_disabled_mode_ignores_everything() {
        let mut config = proxy_config();
        config.node.mode = PluginMode::Disabled;
        let (announcer, sink) = announcer(&config);
        let nova = PlayerIdentity::new(PlayerId::new(), "Nova");
        assert!(announcer
            .on_platform_event(PlatformEvent::ServerConnected {
                player: nova,
                server: "survival".to_string(),
                previous_server: None,
            })
            .is_none());
        assert!(sink.delivered.lock().is_empty());
    }

    #[test]
    fn test_reload_swaps_catalog() {
        let (announcer, sink) = announcer(&proxy_config());
        let mut messages = MessagesConfig::default();
        messages.templates.insert("first-join".to_string(), "".into());
        announcer.reload(&messages).unwrap();

        let nova = PlayerIdentity::new(PlayerId::new(), "Nova");
        let announcement = announcer
            .on_platform_event(PlatformEvent::ServerConnected {
                player: nova,
                server: "survival".to_string(),
                previous_server: None,
            })
            .unwrap();
        assert_eq!(announcement.broadcast, Resolution::Suppressed);
        assert!(sink.delivered.lock().is_empty());

        messages.time_format = "%Q".to_string();
        assert!(announcer.reload(&messages).is_err());
        assert!(announcer.catalog().get("first-join").is_some(), "old catalog kept");
    }
}
