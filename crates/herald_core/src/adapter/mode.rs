use serde::{Deserialize, Serialize};
use std::fmt;

/// Which kind of host process this is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Proxy,
    #[default]
    Backend,
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformKind::Proxy => f.write_str("proxy"),
            PlatformKind::Backend => f.write_str("backend"),
        }
    }
}

/// Operating mode of one process in the topology.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginMode {
    /// Decide from the platform and the configured peers.
    #[default]
    Auto,
    /// Backend with no proxy: its own events are authoritative.
    Standalone,
    /// Proxy: authoritative for every connection, announces network-wide.
    Proxy,
    /// Backend behind a proxy: local-scope events only.
    Backend,
    Disabled,
}

impl PluginMode {
    /// Concrete mode for `platform`. Never returns `Auto`.
    pub fn resolve(self, platform: PlatformKind, has_peers: bool) -> PluginMode {
        match (self, platform) {
            (PluginMode::Auto, PlatformKind::Proxy) => PluginMode::Proxy,
            (PluginMode::Auto, PlatformKind::Backend) if has_peers => PluginMode::Backend,
            (PluginMode::Auto, PlatformKind::Backend) => PluginMode::Standalone,
            (explicit, _) => explicit,
        }
    }

    /// Whether `self` can run on `platform`.
    pub fn fits(self, platform: PlatformKind) -> bool {
        match self {
            PluginMode::Auto | PluginMode::Disabled => true,
            PluginMode::Proxy => platform == PlatformKind::Proxy,
            PluginMode::Standalone | PluginMode::Backend => platform == PlatformKind::Backend,
        }
    }
}

impl fmt::Display for PluginMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PluginMode::Auto => "auto",
            PluginMode::Standalone => "standalone",
            PluginMode::Proxy => "proxy",
            PluginMode::Backend => "backend",
            PluginMode::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_resolution() {
        assert_eq!(PluginMode::Auto.resolve(PlatformKind::Proxy, true), PluginMode::Proxy);
        assert_eq!(PluginMode::Auto.resolve(PlatformKind::Proxy, false), PluginMode::Proxy);
        assert_eq!(PluginMode::Auto.resolve(PlatformKind::Backend, true), PluginMode::Backend);
        assert_eq!(PluginMode::Auto.resolve(PlatformKind::Backend, false), PluginMode::Standalone);
        assert_eq!(PluginMode::Disabled.resolve(PlatformKind::Proxy, true), PluginMode::Disabled);
    }

    #[test]
    fn test_mode_platform_fit() {
        assert!(PluginMode::Proxy.fits(PlatformKind::Proxy));
        assert!(!PluginMode::Proxy.fits(PlatformKind::Backend));
        assert!(!PluginMode::Standalone.fits(PlatformKind::Proxy));
        assert!(PluginMode::Disabled.fits(PlatformKind::Backend));
    }

    #[test]
    fn test_mode_names() {
        let mode: PluginMode = serde_json::from_str("\"standalone\"").unwrap();
        assert_eq!(mode, PluginMode::Standalone);
        assert_eq!(mode.to_string(), "standalone");
        assert!(serde_json::from_str::<PluginMode>("\"master\"").is_err());
    }
}
