//! Statement interception.
//!
//! The generic client core issues session-setup and administrative statements
//! that some backends reject. Every statement passes through a
//! [`StatementFilter`] first: an ordered list of rules, first match wins, and
//! anything unmatched is executed unchanged.

use serde::{Deserialize, Serialize};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use tracing::debug;

/// Purpose tag the core attaches to schema and session-setup statements.
pub const SCHEMA_PURPOSE: &str = "SCHEMA";

/// What to do with a statement that matched a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RuleAction {
    Suppress,
    Rewrite { replacement: String },
}

/// A (predicate, action) pair: purpose tag plus SQL prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementRule {
    /// When set, the rule only applies to statements carrying this tag.
    #[serde(default)]
    pub purpose: Option<String>,
    pub prefix: String,
    #[serde(flatten)]
    pub action: RuleAction,
}

impl StatementRule {
    pub fn suppress(purpose: Option<&str>, prefix: &str) -> Self {
        Self {
            purpose: purpose.map(str::to_string),
            prefix: prefix.to_string(),
            action: RuleAction::Suppress,
        }
    }

    pub fn rewrite(purpose: Option<&str>, prefix: &str, replacement: &str) -> Self {
        Self {
            purpose: purpose.map(str::to_string),
            prefix: prefix.to_string(),
            action: RuleAction::Rewrite {
                replacement: replacement.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterAction {
    Execute,
    Suppress,
    Rewrite(String),
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: StatementRule,
    prefix_tokens: Option<Vec<String>>,
}

/// Stateless classifier over an ordered rule list.
#[derive(Debug, Clone, Default)]
pub struct StatementFilter {
    rules: Vec<CompiledRule>,
}

impl StatementFilter {
    pub fn new(rules: impl IntoIterator<Item = StatementRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| CompiledRule {
                prefix_tokens: significant_tokens(&rule.prefix),
                rule,
            })
            .collect();
        Self { rules }
    }

    pub fn rules(&self) -> impl Iterator<Item = &StatementRule> {
        self.rules.iter().map(|r| &r.rule)
    }

    pub fn filter(&self, sql: &str, purpose: Option<&str>) -> FilterAction {
        let mut sql_tokens: Option<Option<Vec<String>>> = None;

        for compiled in &self.rules {
            let rule = &compiled.rule;
            if let Some(required) = &rule.purpose {
                if purpose != Some(required.as_str()) {
                    continue;
                }
            }

            let tokens = sql_tokens.get_or_insert_with(|| significant_tokens(sql));
            let matched = match (tokens.as_deref(), compiled.prefix_tokens.as_deref()) {
                (Some(words), Some(prefix)) => words.starts_with(prefix),
                _ => raw_prefix_match(sql, &rule.prefix),
            };
            if !matched {
                continue;
            }

            return match &rule.action {
                RuleAction::Suppress => {
                    debug!(sql, purpose, prefix = %rule.prefix, "suppressing statement");
                    FilterAction::Suppress
                }
                RuleAction::Rewrite { replacement } => {
                    debug!(sql, purpose, replacement = %replacement, "rewriting statement");
                    FilterAction::Rewrite(replacement.clone())
                }
            };
        }

        FilterAction::Execute
    }
}

/// Tokens with whitespace and comments removed; unquoted words upper-cased.
fn significant_tokens(sql: &str) -> Option<Vec<String>> {
    let dialect = PostgreSqlDialect {};
    let tokens = Tokenizer::new(&dialect, sql).tokenize().ok()?;
    Some(
        tokens
            .into_iter()
            .filter(|t| !matches!(t, Token::Whitespace(_)))
            .map(|t| match t {
                Token::Word(w) if w.quote_style.is_none() => w.value.to_ascii_uppercase(),
                other => other.to_string(),
            })
            .collect(),
    )
}

fn raw_prefix_match(sql: &str, prefix: &str) -> bool {
    let collapse = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_uppercase();
    collapse(sql).starts_with(&collapse(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warehouse_filter() -> StatementFilter {
        StatementFilter::new([
            StatementRule::suppress(Some(SCHEMA_PURPOSE), "SET time zone"),
            StatementRule::suppress(Some(SCHEMA_PURPOSE), "SET client_min_messages"),
        ])
    }

    #[test]
    fn test_time_zone_suppressed_only_with_schema_purpose() {
        let filter = warehouse_filter();
        assert_eq!(
            filter.filter("SET time zone 'UTC'", Some("SCHEMA")),
            FilterAction::Suppress
        );
        assert_eq!(filter.filter("SET time zone 'UTC'", None), FilterAction::Execute);
        assert_eq!(
            filter.filter("SET time zone 'UTC'", Some("SQL")),
            FilterAction::Execute
        );
    }

    #[test]
    fn test_keyword_matching_ignores_case_and_spacing() {
        let filter = warehouse_filter();
        assert_eq!(
            filter.filter("  set\n  TIME   zone 'UTC'", Some("SCHEMA")),
            FilterAction::Suppress
        );
        assert_eq!(
            filter.filter("/* setup */ SET time zone 'UTC'", Some("SCHEMA")),
            FilterAction::Suppress
        );
    }

    #[test]
    fn test_partial_word_does_not_match() {
        let filter = warehouse_filter();
        assert_eq!(
            filter.filter("SET timezone TO 'UTC'", Some("SCHEMA")),
            FilterAction::Execute
        );
        assert_eq!(
            filter.filter("SET time zone_offset", Some("SCHEMA")),
            FilterAction::Execute
        );
    }

    #[test]
    fn test_quoted_identifier_is_not_a_keyword() {
        let filter = warehouse_filter();
        assert_eq!(
            filter.filter("SET \"TIME\" zone 'UTC'", Some("SCHEMA")),
            FilterAction::Execute
        );
    }

    #[test]
    fn test_first_match_wins() {
        let filter = StatementFilter::new([
            StatementRule::rewrite(None, "SET search_path", "SET search_path TO public"),
            StatementRule::suppress(None, "SET"),
        ]);
        assert_eq!(
            filter.filter("SET search_path TO app, public", None),
            FilterAction::Rewrite("SET search_path TO public".into())
        );
        assert_eq!(filter.filter("SET anything = 1", None), FilterAction::Suppress);
        assert_eq!(filter.filter("SELECT 1", None), FilterAction::Execute);
    }

    #[test]
    fn test_empty_filter_executes_everything() {
        let filter = StatementFilter::default();
        assert_eq!(
            filter.filter("SET time zone 'UTC'", Some("SCHEMA")),
            FilterAction::Execute
        );
    }

    #[test]
    fn test_untokenizable_sql_falls_back_to_raw_prefix() {
        let filter = warehouse_filter();
        // Unterminated literal: the tokenizer rejects it.
        assert_eq!(
            filter.filter("SET time zone 'UTC", Some("SCHEMA")),
            FilterAction::Suppress
        );
    }

    #[test]
    fn test_rules_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Rules {
            rule: Vec<StatementRule>,
        }
        let rules: Rules = toml::from_str(
            r#"
            [[rule]]
            purpose = "SCHEMA"
            prefix = "SET time zone"
            action = "suppress"

            [[rule]]
            prefix = "SET search_path"
            action = "rewrite"
            replacement = "SET search_path TO public"
            "#,
        )
        .unwrap();
        assert_eq!(
            rules.rule[0],
            StatementRule::suppress(Some("SCHEMA"), "SET time zone")
        );
        assert_eq!(
            rules.rule[1],
            StatementRule::rewrite(None, "SET search_path", "SET search_path TO public")
        );
    }
}
