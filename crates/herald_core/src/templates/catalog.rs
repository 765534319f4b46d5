use super::keys;
use super::placeholder::Template;
use crate::config::MessagesConfig;
use crate::error::ConfigError;
use crate::types::PlayerId;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{info, warn};

/// Immutable, pre-scanned configuration snapshot used by the resolver.
///
/// Built once per configuration load; a reload builds a new catalog and
/// swaps it in, so an in-flight event keeps rendering with the old one.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: HashMap<String, Vec<Template>>,
    aliases: HashMap<String, String>,
    returning_after: Option<chrono::Duration>,
    time_format: String,
    date_format: String,
    overrides: HashMap<PlayerId, String>,
    unknown_placeholders: BTreeSet<String>,
}

impl TemplateCatalog {
    /// Validates and scans `config`. Unknown placeholder names are warned
    /// about here, once per load, and rendered verbatim later.
    pub fn build(config: &MessagesConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let returning_after = config
            .returning_after()?
            .map(|threshold| {
                chrono::Duration::from_std(threshold)
                    .map_err(|_| ConfigError::InvalidDuration(format!("{:?}", threshold)))
            })
            .transpose()?;

        let templates: HashMap<String, Vec<Template>> = config
            .templates
            .iter()
            .map(|(key, entry)| {
                let variants = entry.variants().iter().map(|text| Template::parse(text)).collect();
                (key.clone(), variants)
            })
            .collect();

        let mut unknown_placeholders = BTreeSet::new();
        let mut unknown_by_key: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (key, variants) in &templates {
            for name in variants.iter().flat_map(|t| t.unknown_names()) {
                if name.is_empty() {
                    continue;
                }
                unknown_placeholders.insert(name.to_string());
                unknown_by_key.entry(key.as_str()).or_default().insert(name);
            }
        }
        for (key, names) in &unknown_by_key {
            warn!(
                "⚠️ Template '{}' uses unknown placeholder(s) {:?}; they will be shown verbatim",
                key, names
            );
        }
        for required in [keys::JOIN, keys::LEAVE] {
            if !templates.contains_key(required) {
                warn!("No '{}' template configured, using the built-in default", required);
            }
        }

        let catalog = Self {
            templates,
            aliases: config
                .server_aliases
                .iter()
                .map(|(id, name)| (id.clone(), name.clone()))
                .collect(),
            returning_after,
            time_format: config.time_format.clone(),
            date_format: config.date_format.clone(),
            overrides: config.overrides()?.into_iter().collect(),
            unknown_placeholders,
        };
        info!(
            "📝 Loaded {} message template(s), {} server alias(es), {} override(s)",
            catalog.templates.len(),
            catalog.aliases.len(),
            catalog.overrides.len()
        );
        Ok(catalog)
    }

    /// Catalog with no templates at all; everything renders the built-in
    /// defaults.
    pub fn empty() -> Self {
        Self {
            time_format: "%H:%M".to_string(),
            date_format: "%Y-%m-%d".to_string(),
            ..Self::default()
        }
    }

    /// Variants configured under `key`.
    pub fn get(&self, key: &str) -> Option<&[Template]> {
        self.templates.get(key).map(Vec::as_slice)
    }

    /// Display name for a backend id.
    pub fn alias<'a>(&'a self, backend: &'a str) -> &'a str {
        self.aliases.get(backend).map_or(backend, String::as_str)
    }

    pub fn returning_after(&self) -> Option<chrono::Duration> {
        self.returning_after
    }

    pub fn time_format(&self) -> &str {
        &self.time_format
    }

    pub fn date_format(&self) -> &str {
        &self.date_format
    }

    /// Configured override key for a player, if any.
    pub fn override_for(&self, id: &PlayerId) -> Option<&str> {
        self.overrides.get(id).map(String::as_str)
    }

    /// Unknown placeholder names seen at build time.
    pub fn unknown_placeholders(&self) -> &BTreeSet<String> {
        &self.unknown_placeholders
    }
}
