use crate::error::{DigestError, Result};
use crate::normalization::normalize;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;

/// Matching rule for one registered client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientRule {
    pub client_id: String,
    /// Primary aliases, normalized, in registry order
    pub aliases: Vec<String>,
    /// Secondary alias, normalized; only scored when there are no primary aliases
    pub secondary_alias: Option<String>,
    /// Literal subjects accepted in exact-match mode
    pub exact_alternatives: Vec<String>,
    pub require_exact: bool,
}

impl ClientRule {
    /// Builds a rule from the four registry columns.
    ///
    /// `alias1` holds `|`-separated primary aliases, `alias2` is both the
    /// secondary alias and the `|`-separated exact subject list, and a `/`
    /// anywhere in `flags` turns on exact-match mode.
    pub fn from_columns(client: &str, alias1: &str, alias2: &str, flags: &str) -> Self {
        let aliases = alias1
            .split('|')
            .map(normalize)
            .filter(|a| !a.is_empty())
            .collect();

        let secondary = normalize(alias2);
        let exact_alternatives = alias2
            .split('|')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            client_id: client.trim().to_string(),
            aliases,
            secondary_alias: if secondary.is_empty() { None } else { Some(secondary) },
            exact_alternatives,
            require_exact: flags.contains('/'),
        }
    }

    pub fn accepts_exact_subject(&self, subject: &str) -> bool {
        let trimmed = subject.trim();
        self.exact_alternatives.iter().any(|alt| alt == trimmed)
    }
}

/// Source of the client registry.
pub trait ClientRegistry {
    fn load(&self) -> Result<Vec<ClientRule>>;
}

/// Registry stored as CSV with a header row: client, alias1, alias2, flags.
pub struct CsvRegistry {
    path: PathBuf,
}

impl CsvRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ClientRegistry for CsvRegistry {
    fn load(&self) -> Result<Vec<ClientRule>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| DigestError::Registry(format!("{}: {e}", self.path.display())))?;

        let mut rules = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| DigestError::Registry(e.to_string()))?;
            let column = |i: usize| record.get(i).unwrap_or("");
            if column(0).is_empty() {
                continue;
            }
            rules.push(ClientRule::from_columns(column(0), column(1), column(2), column(3)));
        }

        log::info!("Loaded {} client rules from {}", rules.len(), self.path.display());
        Ok(rules)
    }
}

/// In-memory registry for one run.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    rules: Vec<ClientRule>,
}

impl Registry {
    /// Keeps the first rule for each client id.
    pub fn new(rules: Vec<ClientRule>) -> Self {
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(rules.len());
        for rule in rules {
            if seen.insert(rule.client_id.clone()) {
                unique.push(rule);
            } else {
                log::warn!("Duplicate registry entry '{}' ignored", rule.client_id);
            }
        }
        Self { rules: unique }
    }

    pub fn load(source: &dyn ClientRegistry) -> Result<Self> {
        Ok(Self::new(source.load()?))
    }

    pub fn rules(&self) -> &[ClientRule] {
        &self.rules
    }

    pub fn get(&self, client_id: &str) -> Option<&ClientRule> {
        self.rules.iter().find(|r| r.client_id == client_id)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Maps a free-form name (group report line, raw subject) to a registered client.
    ///
    /// `brand` lets registry names carrying the group product name match
    /// shorter candidates.
    pub fn resolve_name(&self, name: &str, brand: &str) -> Option<&ClientRule> {
        let name_norm = normalize(name);
        if name_norm.is_empty() {
            return None;
        }
        let name_upper = name.to_uppercase();
        let brand_upper = brand.to_uppercase();

        self.rules.iter().find(|rule| {
            if normalize(&rule.client_id) == name_norm {
                return true;
            }

            let alias_hit = |alias: &String| {
                alias.len() > 3 && (*alias == name_norm || name_norm.contains(alias.as_str()))
            };
            if rule.aliases.iter().any(alias_hit) || rule.secondary_alias.iter().any(alias_hit) {
                return true;
            }

            let client_upper = rule.client_id.to_uppercase();
            client_upper.contains(&name_upper)
                && client_upper.len() > name_upper.len()
                && (name_upper.chars().count() > 5
                    || (!brand_upper.is_empty() && client_upper.contains(&brand_upper)))
        })
    }
}
