use super::catalog::TemplateCatalog;
use super::keys;
use super::placeholder::{Placeholder, PlaceholderValues, Template};
use crate::types::{EventKind, LeaveReason, ResolvedContext};
use std::fmt::Write;

/// Used when the catalog has no default join template.
pub const FALLBACK_JOIN: &str = "{player} joined the game";
/// Used when the catalog has no default leave template.
pub const FALLBACK_LEAVE: &str = "{player} left the game";

/// Outcome of resolving one event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resolution {
    Rendered(String),
    /// A configured-but-empty template: announce nothing.
    Suppressed,
}

impl Resolution {
    pub fn text(&self) -> Option<&str> {
        match self {
            Resolution::Rendered(text) => Some(text),
            Resolution::Suppressed => None,
        }
    }
}

/// Renders the broadcast message for `ctx`. Pure and total: every context
/// yields exactly one resolution, including against an empty catalog.
pub fn resolve(ctx: &ResolvedContext, catalog: &TemplateCatalog) -> Resolution {
    match select(ctx, catalog) {
        Some((_, variants)) => render_variant(ctx, catalog, variants),
        None => {
            let fallback = match ctx.kind {
                EventKind::Join => FALLBACK_JOIN,
                EventKind::Leave => FALLBACK_LEAVE,
            };
            Resolution::Rendered(Template::parse(fallback).render(&Values { ctx, catalog }))
        }
    }
}

/// Template key `resolve` would use, or `None` for the built-in fallback.
pub fn selected_key(ctx: &ResolvedContext, catalog: &TemplateCatalog) -> Option<String> {
    select(ctx, catalog).map(|(key, _)| key)
}

/// Private greeting for the joining player. Only first and returning joins
/// are greeted; everything else is suppressed.
pub fn resolve_welcome(ctx: &ResolvedContext, catalog: &TemplateCatalog) -> Resolution {
    if ctx.kind != EventKind::Join || ctx.previous_backend.is_some() {
        return Resolution::Suppressed;
    }
    let key = if ctx.is_first_join_ever {
        keys::WELCOME_FIRST
    } else if is_returning(ctx, catalog) {
        keys::WELCOME_RETURNING
    } else {
        return Resolution::Suppressed;
    };
    match catalog.get(key) {
        Some(variants) => render_variant(ctx, catalog, variants),
        None => Resolution::Suppressed,
    }
}

fn select<'a>(ctx: &ResolvedContext, catalog: &'a TemplateCatalog) -> Option<(String, &'a [Template])> {
    let lookup = |key: &str| catalog.get(key).map(|variants| (key.to_string(), variants));

    if !ctx.degraded {
        let override_key = ctx
            .template_key
            .as_deref()
            .or_else(|| catalog.override_for(&ctx.identity.id));
        if let Some(key) = override_key {
            let scoped = lookup(&format!("{}.{}", key, ctx.kind.as_str()));
            let bare = || (ctx.kind == EventKind::Join).then(|| lookup(key)).flatten();
            if let Some(found) = scoped.or_else(bare) {
                return Some(found);
            }
        }
    }

    let chain: &[&str] = match ctx.kind {
        EventKind::Join if ctx.is_first_join_ever => &[keys::FIRST_JOIN, keys::JOIN],
        EventKind::Join if ctx.previous_backend.is_some() => &[keys::SWITCH, keys::JOIN],
        EventKind::Join if is_returning(ctx, catalog) => &[keys::RETURNING, keys::JOIN],
        EventKind::Join => &[keys::JOIN],
        EventKind::Leave => match ctx.leave_reason {
            Some(LeaveReason::Kicked) => &[keys::LEAVE_KICK, keys::LEAVE],
            Some(LeaveReason::NetworkError) => &[keys::LEAVE_NETWORK, keys::LEAVE],
            _ => &[keys::LEAVE],
        },
    };
    chain.iter().find_map(|&key| lookup(key))
}

fn is_returning(ctx: &ResolvedContext, catalog: &TemplateCatalog) -> bool {
    match (ctx.absent_for, catalog.returning_after()) {
        (Some(absent), Some(threshold)) => absent >= threshold,
        _ => false,
    }
}

fn render_variant(ctx: &ResolvedContext, catalog: &TemplateCatalog, variants: &[Template]) -> Resolution {
    if variants.is_empty() {
        return Resolution::Suppressed;
    }
    let template = &variants[variant_index(ctx, variants.len())];
    if template.is_blank() {
        return Resolution::Suppressed;
    }
    Resolution::Rendered(template.render(&Values { ctx, catalog }))
}

/// FNV-1a over the player id and record version, so every process picks the
/// same variant for the same event.
fn variant_index(ctx: &ResolvedContext, len: usize) -> usize {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let hash = ctx
        .identity
        .id
        .as_bytes()
        .iter()
        .chain(ctx.version.to_le_bytes().iter())
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(PRIME));
    (hash % len as u64) as usize
}

struct Values<'a> {
    ctx: &'a ResolvedContext,
    catalog: &'a TemplateCatalog,
}

impl PlaceholderValues for Values<'_> {
    fn write_value(&self, placeholder: &Placeholder, out: &mut String) {
        let ctx = self.ctx;
        match placeholder {
            Placeholder::Player => out.push_str(&ctx.identity.name),
            Placeholder::Uuid => {
                let _ = write!(out, "{}", ctx.identity.id);
            }
            Placeholder::Server => out.push_str(self.catalog.alias(&ctx.backend)),
            Placeholder::From => {
                if let Some(previous) = &ctx.previous_backend {
                    out.push_str(self.catalog.alias(previous));
                }
            }
            Placeholder::OnlineCount => {
                let _ = write!(out, "{}", ctx.online_count);
            }
            Placeholder::Time => {
                let _ = write!(out, "{}", ctx.timestamp.format(self.catalog.time_format()));
            }
            Placeholder::Date => {
                let _ = write!(out, "{}", ctx.timestamp.format(self.catalog.date_format()));
            }
            Placeholder::Unknown(name) => {
                let _ = write!(out, "{{{}}}", name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MessagesConfig, TemplateEntry};
    use crate::types::{PlayerId, PlayerIdentity};
    use chrono::{Duration, TimeZone, Utc};

    fn ctx(kind: EventKind) -> ResolvedContext {
        ResolvedContext {
            identity: PlayerIdentity::new(PlayerId::new(), "Nova"),
            kind,
            is_first_join_ever: false,
            backend: "survival".to_string(),
            previous_backend: None,
            template_key: None,
            absent_for: None,
            leave_reason: (kind == EventKind::Leave).then_some(LeaveReason::Quit),
            online_count: 4,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 9, 18, 5, 0).unwrap(),
            version: 1,
            degraded: false,
        }
    }

    fn catalog(entries: &[(&str, &str)]) -> TemplateCatalog {
        let mut config = MessagesConfig::default();
        for (key, text) in entries {
            config.templates.insert(key.to_string(), TemplateEntry::from(*text));
        }
        config.server_aliases.insert("survival".to_string(), "Survival".to_string());
        config.returning_after = Some("1d".to_string());
        TemplateCatalog::build(&config).unwrap()
    }

    #[test]
    fn test_selection_order() {
        let catalog = catalog(&[
            ("returning", "Welcome back {player}"),
            ("vip.join", "VIP {player} arrived"),
            ("leave-kick", "{player} was kicked"),
        ]);

        let mut first = ctx(EventKind::Join);
        first.is_first_join_ever = true;
        assert_eq!(
            resolve(&first, &catalog).text(),
            Some("Welcome Nova to the network for the first time!")
        );

        let mut vip = first.clone();
        vip.template_key = Some("vip".to_string());
        assert_eq!(resolve(&vip, &catalog).text(), Some("VIP Nova arrived"));

        let mut switch = ctx(EventKind::Join);
        switch.previous_backend = Some("lobby".to_string());
        assert_eq!(resolve(&switch, &catalog).text(), Some("Nova moved from lobby to Survival"));

        let mut back = ctx(EventKind::Join);
        back.absent_for = Some(Duration::days(3));
        assert_eq!(resolve(&back, &catalog).text(), Some("Welcome back Nova"));
        back.absent_for = Some(Duration::hours(3));
        assert_eq!(resolve(&back, &catalog).text(), Some("Nova joined the network"));

        let mut kicked = ctx(EventKind::Leave);
        kicked.leave_reason = Some(LeaveReason::Kicked);
        assert_eq!(resolve(&kicked, &catalog).text(), Some("Nova was kicked"));
        kicked.leave_reason = Some(LeaveReason::NetworkError);
        assert_eq!(resolve(&kicked, &catalog).text(), Some("Nova left the network"));
    }

    #[test]
    fn test_override_missing_from_catalog_falls_through() {
        let catalog = catalog(&[]);
        let mut join = ctx(EventKind::Join);
        join.template_key = Some("ghost".to_string());
        assert_eq!(resolve(&join, &catalog).text(), Some("Nova joined the network"));
    }

    #[test]
    fn test_degraded_ignores_overrides() {
        let catalog = catalog(&[("vip", "VIP {player}")]);
        let mut join = ctx(EventKind::Join);
        join.template_key = Some("vip".to_string());
        join.degraded = true;
        assert_eq!(resolve(&join, &catalog).text(), Some("Nova joined the network"));
    }

    #[test]
    fn test_empty_template_is_suppressed() {
        let catalog = catalog(&[("leave", "")]);
        assert_eq!(resolve(&ctx(EventKind::Leave), &catalog), Resolution::Suppressed);
    }

    #[test]
    fn test_empty_catalog_uses_builtin_default() {
        let catalog = TemplateCatalog::empty();
        assert_eq!(resolve(&ctx(EventKind::Join), &catalog).text(), Some("Nova joined the game"));
        assert_eq!(resolve(&ctx(EventKind::Leave), &catalog).text(), Some("Nova left the game"));
        assert_eq!(selected_key(&ctx(EventKind::Join), &catalog), None);
    }

    #[test]
    fn test_time_date_and_count() {
        let catalog = catalog(&[("join", "[{date} {time}] {player} ({online_count}) {uuid}")]);
        let join = ctx(EventKind::Join);
        let expected = format!("[2024-03-09 18:05] Nova (4) {}", join.identity.id);
        assert_eq!(resolve(&join, &catalog).text(), Some(expected.as_str()));
    }

    #[test]
    fn test_variant_choice_is_deterministic() {
        let mut config = MessagesConfig::default();
        config.templates.insert(
            "join".to_string(),
            TemplateEntry::Variants((0..8).map(|i| format!("v{} {{player}}", i)).collect()),
        );
        let catalog = TemplateCatalog::build(&config).unwrap();

        let join = ctx(EventKind::Join);
        let first = resolve(&join, &catalog);
        for _ in 0..10 {
            assert_eq!(resolve(&join, &catalog), first);
        }
        let chosen: std::collections::HashSet<_> = (1..64)
            .map(|version| {
                let mut c = join.clone();
                c.version = version;
                resolve(&c, &catalog)
            })
            .collect();
        assert!(chosen.len() > 1, "versions should spread over variants");
    }

    #[test]
    fn test_welcome() {
        let mut config = MessagesConfig::default();
        config.templates.insert("welcome-first".to_string(), "Hello {player}!".into());
        config.returning_after = Some("1d".to_string());
        let catalog = TemplateCatalog::build(&config).unwrap();

        let mut first = ctx(EventKind::Join);
        first.is_first_join_ever = true;
        assert_eq!(resolve_welcome(&first, &catalog).text(), Some("Hello Nova!"));

        let mut back = ctx(EventKind::Join);
        back.absent_for = Some(Duration::days(2));
        assert_eq!(resolve_welcome(&back, &catalog), Resolution::Suppressed);
        assert_eq!(resolve_welcome(&ctx(EventKind::Leave), &catalog), Resolution::Suppressed);
    }
}
