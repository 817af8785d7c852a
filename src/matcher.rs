//! Client Matcher
//!
//! Attributes a message to a registered client. Family detectors run first
//! with clear precedence; generic alias scoring only runs when none fires.

use crate::config::{Config, FamilyDetector};
use crate::message::Message;
use crate::normalization::normalize;
use crate::registry::{ClientRule, Registry};

pub const UNKNOWN_CLIENT: &str = "Unknown";

const PRIMARY_ALIAS_BONUS: usize = 1000;
const CLIENT_NAME_BONUS: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientMatch {
    pub client: String,
    pub reference: Option<ClientRule>,
    pub score: usize,
    /// True when a family detector chose the client
    pub detected: bool,
}

impl ClientMatch {
    pub fn is_unknown(&self) -> bool {
        self.client == UNKNOWN_CLIENT
    }
}

struct DetectorChannel {
    client: String,
    tokens: Vec<String>,
}

struct Detector {
    brand: String,
    channels: Vec<DetectorChannel>,
}

impl Detector {
    fn compile(detector: &FamilyDetector) -> Self {
        Self {
            brand: detector.brand.to_uppercase(),
            channels: detector
                .channels
                .iter()
                .map(|c| DetectorChannel {
                    client: c.client.clone(),
                    tokens: c.tokens.iter().map(|t| t.to_uppercase()).collect(),
                })
                .collect(),
        }
    }

    fn detect(&self, subject_upper: &str) -> Detection<'_> {
        if !subject_upper.contains(&self.brand) {
            return Detection::NoBrand;
        }
        self.channels
            .iter()
            .find(|c| c.tokens.is_empty() || c.tokens.iter().any(|t| subject_upper.contains(t)))
            .map_or(Detection::BrandOnly, |c| Detection::Channel(&c.client))
    }
}

enum Detection<'d> {
    NoBrand,
    /// Brand present but no channel token; ends the chain
    BrandOnly,
    Channel(&'d str),
}

pub struct ClientMatcher<'a> {
    registry: &'a Registry,
    detectors: Vec<Detector>,
    fallback_aliases: Vec<(String, String)>,
    group_brand: String,
}

impl<'a> ClientMatcher<'a> {
    pub fn new(registry: &'a Registry, config: &Config) -> Self {
        Self {
            registry,
            detectors: config.family_detectors.iter().map(Detector::compile).collect(),
            fallback_aliases: config
                .fallback_aliases
                .iter()
                .map(|a| (normalize(&a.token), a.client.clone()))
                .filter(|(token, _)| !token.is_empty())
                .collect(),
            group_brand: config.group_report.brand_token.clone(),
        }
    }

    pub fn registry(&self) -> &Registry {
        self.registry
    }

    /// Client for `message`, or `Unknown` with a zero score.
    pub fn match_message(&self, message: &Message) -> ClientMatch {
        let subject_upper = message.subject.to_uppercase();

        for detector in &self.detectors {
            match detector.detect(&subject_upper) {
                Detection::NoBrand => continue,
                Detection::BrandOnly => {
                    log::debug!("Brand {} without channel for {}", detector.brand, message.id);
                    break;
                }
                Detection::Channel(client) => {
                    log::debug!("Family detector matched '{}' for {}", client, message.id);
                    return ClientMatch {
                        client: client.to_string(),
                        reference: self.registry.get(client).cloned(),
                        score: 0,
                        detected: true,
                    };
                }
            }
        }

        let subject_norm = normalize(&message.subject);
        match self.best_scoring(&subject_norm) {
            Some((rule, score)) => ClientMatch {
                client: rule.client_id.clone(),
                reference: Some(rule.clone()),
                score,
                detected: false,
            },
            None => ClientMatch {
                client: UNKNOWN_CLIENT.to_string(),
                reference: None,
                score: 0,
                detected: false,
            },
        }
    }

    /// Highest scoring rule; the earlier registry entry wins ties.
    fn best_scoring(&self, subject_norm: &str) -> Option<(&ClientRule, usize)> {
        let mut best: Option<(&ClientRule, usize)> = None;
        for rule in self.registry.rules() {
            let score = score_rule(rule, subject_norm);
            if score > best.map_or(0, |(_, s)| s) {
                best = Some((rule, score));
            }
        }
        best
    }

    /// Second chance for an `Unknown` subject: registry name resolution, then
    /// the configured fallback aliases.
    pub fn rescue(&self, subject: &str) -> Option<String> {
        if let Some(rule) = self.registry.resolve_name(subject, &self.group_brand) {
            return Some(rule.client_id.clone());
        }
        let subject_norm = normalize(subject);
        self.fallback_aliases
            .iter()
            .find(|(token, _)| subject_norm.contains(token.as_str()))
            .map(|(_, client)| client.clone())
    }
}

/// Score of one registry rule against a normalized subject.
pub fn score_rule(rule: &ClientRule, subject_norm: &str) -> usize {
    let primary = rule
        .aliases
        .iter()
        .filter(|alias| subject_norm.contains(alias.as_str()))
        .map(|alias| alias.len() + PRIMARY_ALIAS_BONUS)
        .max();

    let mut score = match primary {
        Some(score) => score,
        None if rule.aliases.is_empty() => rule
            .secondary_alias
            .as_deref()
            .filter(|alias| subject_norm.contains(alias))
            .map_or(0, str::len),
        None => 0,
    };

    let name = normalize(&rule.client_id);
    if !name.is_empty() && subject_norm.len() > name.len() && subject_norm.contains(&name) {
        score = score.max(name.len() + CLIENT_NAME_BONUS);
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn message(subject: &str) -> Message {
        Message::new(
            "id-1",
            "backup@acme.fr",
            subject,
            "",
            Local.with_ymd_and_hms(2025, 3, 4, 20, 0, 0).unwrap(),
        )
    }

    fn registry() -> Registry {
        Registry::new(vec![
            ClientRule::from_columns("ACME", "acme prod", "", ""),
            ClientRule::from_columns("ACME Long", "acme production site", "", ""),
            ClientRule::from_columns("Globex", "", "globex nightly", ""),
            ClientRule::from_columns("Initech", "", "", ""),
            ClientRule::from_columns("SYNERGIC - VEEAM", "", "", ""),
        ])
    }

    #[test]
    fn test_family_detector_has_priority() {
        let registry = registry();
        let config = Config::default();
        let matcher = ClientMatcher::new(&registry, &config);

        let m = matcher.match_message(&message("Job SYNERGIC Veeam acme prod [Success]"));
        assert_eq!(m.client, "SYNERGIC - VEEAM");
        assert!(m.detected);
        assert_eq!(m.reference.unwrap().client_id, "SYNERGIC - VEEAM");

        let m = matcher.match_message(&message("Tostain wasabi sync OK"));
        assert_eq!(m.client, "TOSTAIN - WASABI");
        assert!(m.reference.is_none());

        let m = matcher.match_message(&message("CloudAlly Backup Summary"));
        assert_eq!(m.client, "CLOUDALLY");
    }

    #[test]
    fn test_brand_without_channel_falls_back_to_scoring() {
        let registry = registry();
        let config = Config::default();
        let matcher = ClientMatcher::new(&registry, &config);

        let m = matcher.match_message(&message("Tostain Initech report"));
        assert_eq!(m.client, "Initech");
        assert!(!m.detected);
    }

    #[test]
    fn test_brand_without_channel_skips_later_detectors() {
        let registry = registry();
        let config = Config::default();
        let matcher = ClientMatcher::new(&registry, &config);

        let m = matcher.match_message(&message("Delangue copy SYNERGIC JOB done"));
        assert!(!m.detected);
        assert!(m.is_unknown());

        let m = matcher.match_message(&message("Delangue copy Initech SYNERGIC JOB"));
        assert_eq!(m.client, "Initech");
        assert!(!m.detected);
    }

    #[test]
    fn test_longer_primary_alias_wins() {
        let registry = registry();
        let config = Config::default();
        let matcher = ClientMatcher::new(&registry, &config);

        let m = matcher.match_message(&message("Backup ACME-Production site: Success"));
        assert_eq!(m.client, "ACME Long");
        assert_eq!(m.score, "acme production site".len() + 1000);
    }

    #[test]
    fn test_scoring_tiers() {
        let secondary = ClientRule::from_columns("Globex Corp", "", "globex nightly", "");
        assert_eq!(score_rule(&secondary, "globex nightly ok"), "globex nightly".len());

        let name_only = ClientRule::from_columns("Initech", "", "", "");
        assert_eq!(score_rule(&name_only, "initech backup"), "initech".len() + 100);
        // The subject must be strictly longer than the name
        assert_eq!(score_rule(&name_only, "initech"), 0);

        // Secondary alias is ignored when primary aliases exist
        let both = ClientRule::from_columns("Hooli Corp", "hooli main", "hooli side", "");
        assert_eq!(score_rule(&both, "hooli side done"), 0);
    }

    #[test]
    fn test_ties_keep_registry_order() {
        let registry = Registry::new(vec![
            ClientRule::from_columns("First", "shared", "", ""),
            ClientRule::from_columns("Second", "shared", "", ""),
        ]);
        let config = Config::default();
        let matcher = ClientMatcher::new(&registry, &config);
        assert_eq!(matcher.match_message(&message("shared job ok")).client, "First");
    }

    #[test]
    fn test_unknown_when_nothing_scores() {
        let registry = registry();
        let config = Config::default();
        let matcher = ClientMatcher::new(&registry, &config);

        let m = matcher.match_message(&message("Weekly newsletter"));
        assert!(m.is_unknown());
        assert!(m.reference.is_none());
        assert_eq!(m.score, 0);
    }

    #[test]
    fn test_rescue() {
        let registry = registry();
        let config = Config::default();
        let matcher = ClientMatcher::new(&registry, &config);

        assert_eq!(matcher.rescue("Sauvegarde 1000 et 1 Loisirs terminée").as_deref(), Some("1001 LOISIRS"));
        assert_eq!(matcher.rescue("Backup DSA lille-siege").as_deref(), Some("DSA"));
        assert_eq!(matcher.rescue("Initech").as_deref(), Some("Initech"));
        assert!(matcher.rescue("Weekly newsletter").is_none());
    }
}
