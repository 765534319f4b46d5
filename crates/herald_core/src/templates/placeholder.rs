//! Single-pass `{name}` placeholder scanning and rendering.
//!
//! Templates are scanned once, at catalog build time, into literal and
//! placeholder parts. Unknown names and unterminated braces survive as
//! literal text, so scanning never fails.

use std::fmt::Write;

/// A recognized placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    Player,
    Uuid,
    /// Event backend after alias mapping (`server`, `backend`, `to`, `cur`).
    Server,
    /// Previous backend after alias mapping (`from`, `prev`).
    From,
    OnlineCount,
    Time,
    Date,
    /// Kept verbatim, braces included.
    Unknown(String),
}

impl Placeholder {
    fn from_name(name: &str) -> Self {
        match name {
            "player" => Placeholder::Player,
            "uuid" => Placeholder::Uuid,
            "server" | "backend" | "to" | "cur" => Placeholder::Server,
            "from" | "prev" => Placeholder::From,
            "online_count" => Placeholder::OnlineCount,
            "time" => Placeholder::Time,
            "date" => Placeholder::Date,
            other => Placeholder::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Literal(String),
    Placeholder(Placeholder),
}

/// A scanned template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

/// Values substituted during rendering.
pub trait PlaceholderValues {
    fn write_value(&self, placeholder: &Placeholder, out: &mut String);
}

impl Template {
    pub fn parse(source: &str) -> Self {
        Self {
            source: source.to_string(),
            parts: scan(source),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Blank templates suppress the message instead of rendering it.
    pub fn is_blank(&self) -> bool {
        self.source.trim().is_empty()
    }

    pub fn unknown_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|part| match part {
            Part::Placeholder(Placeholder::Unknown(name)) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn render(&self, values: &impl PlaceholderValues) -> String {
        let mut out = String::with_capacity(self.source.len() + 16);
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Placeholder(Placeholder::Unknown(name)) => {
                    let _ = write!(out, "{{{}}}", name);
                }
                Part::Placeholder(known) => values.write_value(known, &mut out),
            }
        }
        out
    }
}

fn scan(source: &str) -> Vec<Part> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut rest = source;

    while let Some(open) = rest.find('{') {
        literal.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find(['{', '}']) {
            Some(close) if after.as_bytes()[close] == b'}' => {
                if !literal.is_empty() {
                    parts.push(Part::Literal(std::mem::take(&mut literal)));
                }
                parts.push(Part::Placeholder(Placeholder::from_name(&after[..close])));
                rest = &after[close + 1..];
            }
            // Another '{' first: this brace is literal, rescan from the next.
            Some(next_open) => {
                literal.push('{');
                literal.push_str(&after[..next_open]);
                rest = &after[next_open..];
            }
            // Unterminated: the remainder is literal.
            None => {
                literal.push('{');
                literal.push_str(after);
                rest = "";
            }
        }
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        parts.push(Part::Literal(literal));
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl PlaceholderValues for Fixed {
        fn write_value(&self, placeholder: &Placeholder, out: &mut String) {
            let value = match placeholder {
                Placeholder::Player => "Nova",
                Placeholder::Server => "Survival",
                Placeholder::From => "Lobby",
                Placeholder::OnlineCount => "3",
                _ => "?",
            };
            out.push_str(value);
        }
    }

    #[test]
    fn test_known_placeholders() {
        let template = Template::parse("{player} moved from {prev} to {cur} ({online_count} online)");
        assert_eq!(template.render(&Fixed), "Nova moved from Lobby to Survival (3 online)");
        assert_eq!(template.unknown_names().count(), 0);
    }

    #[test]
    fn test_unknown_and_malformed_are_verbatim() {
        let template = Template::parse("{player} has {rank} {{player} {open");
        assert_eq!(template.render(&Fixed), "Nova has {rank} {Nova {open");
        assert_eq!(template.unknown_names().collect::<Vec<_>>(), vec!["rank"]);
    }

    #[test]
    fn test_single_pass_does_not_rescan_values() {
        struct Sneaky;
        impl PlaceholderValues for Sneaky {
            fn write_value(&self, _: &Placeholder, out: &mut String) {
                out.push_str("{player}");
            }
        }
        assert_eq!(Template::parse("hi {player}!").render(&Sneaky), "hi {player}!");
    }

    #[test]
    fn test_edges() {
        assert!(Template::parse("").parts().is_empty());
        assert!(Template::parse("   ").is_blank());
        assert_eq!(Template::parse("}{}").render(&Fixed), "}{}");
        assert_eq!(
            Template::parse("plain").parts(),
            &[Part::Literal("plain".to_string())]
        );
    }
}
