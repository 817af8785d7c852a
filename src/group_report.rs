//! Group-Report Parser
//!
//! Splits one bundled daily report into per-client results. The layout is
//! recognised from separators and keyword lists held in configuration, so a
//! change in the vendor's template usually only needs a config update.

use crate::config::GroupReportConfig;
use crate::error::DigestError;
use crate::message::Message;
use crate::normalization::{collapse_whitespace, normalize};
use crate::status::StatusKind;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

const MIN_NAME_LEN: usize = 4;

/// Successful VM count of a group entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessCount {
    Counted(u32),
    /// No success line and the block carries a failure marker
    KnownFailure,
}

impl SuccessCount {
    pub fn count(self) -> u32 {
        match self {
            SuccessCount::Counted(n) => n,
            SuccessCount::KnownFailure => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupEntry {
    pub client: String,
    pub total: u32,
    pub success: SuccessCount,
    pub status: StatusKind,
    pub detail: String,
}

impl fmt::Display for GroupEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}/{}) = {}",
            self.client,
            self.success.count(),
            self.total,
            self.status
        )
    }
}

struct Patterns {
    double_pipe: Regex,
    pipe_line: Regex,
    separator: Regex,
    leading_date: Regex,
    total: Regex,
    success: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        double_pipe: Regex::new(r"\|\s*\|\s*").expect("valid double pipe pattern"),
        pipe_line: Regex::new(r"\n\s*\|").expect("valid pipe line pattern"),
        separator: Regex::new(r"\n\s*---\s*\n\s*\|").expect("valid block separator pattern"),
        leading_date: Regex::new(r"^\d{2}\s+").expect("valid leading date pattern"),
        total: Regex::new(r"(?i)Total (?:de|of)\s*(\d+)\s*VMs").expect("valid VM total pattern"),
        success: Regex::new(r"(?i)Succ(?:ès|ess|es)\s*\|\s*(\d+)").expect("valid success count pattern"),
    })
}

pub fn is_group_report(subject: &str, config: &GroupReportConfig) -> bool {
    !config.subject_marker.is_empty() && subject.contains(&config.subject_marker)
}

/// Extracts one entry per client block. Blocks without a usable name are
/// skipped; blocks without a total count as zero VMs.
pub fn parse_group(message: &Message, config: &GroupReportConfig) -> Vec<GroupEntry> {
    let p = patterns();

    let cleaned = p.double_pipe.replace_all(&message.body, " ");
    let cleaned = p.pipe_line.replace_all(&cleaned, "\n|");
    let cleaned = cleaned.replacen("R&D;", "R&D", 1);

    let exclusions: Vec<String> = config
        .exclusion_keywords
        .iter()
        .map(|k| k.to_uppercase())
        .collect();
    let brand = config.brand_token.to_lowercase();

    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for block in p.separator.split(&cleaned).skip(1) {
        let Some(name) = client_name(block, &exclusions, config, p) else {
            continue;
        };
        if name.chars().count() < MIN_NAME_LEN
            || (!brand.is_empty() && name.to_lowercase().contains(&brand))
            || !seen.insert(name.clone())
        {
            continue;
        }

        let collapsed = collapse_whitespace(block);
        let total = match p.total.captures(&collapsed).and_then(|c| c[1].parse().ok()) {
            Some(total) => total,
            None => {
                let err = DigestError::MalformedReportBlock {
                    client: name.clone(),
                    reason: "no VM total".to_string(),
                };
                log::debug!("{}", err);
                0
            }
        };

        let counted: u32 = p
            .success
            .captures(block)
            .and_then(|c| c[1].parse().ok())
            .unwrap_or(0);
        let success = if total > 0
            && counted == 0
            && config.failure_markers.iter().any(|m| collapsed.contains(m.as_str()))
        {
            SuccessCount::KnownFailure
        } else {
            SuccessCount::Counted(counted)
        };

        let (status, detail) = entry_status(&name, total, success.count(), config);
        entries.push(GroupEntry {
            client: name,
            total,
            success,
            status,
            detail,
        });
    }

    entries
}

fn client_name(
    block: &str,
    exclusions: &[String],
    config: &GroupReportConfig,
    p: &Patterns,
) -> Option<String> {
    let line = block
        .trim()
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .find(|l| {
            let upper = l.to_uppercase();
            l.chars().count() > 3
                && !p.leading_date.is_match(l)
                && !exclusions.iter().any(|k| upper.contains(k.as_str()))
        })?;

    let mut name = line.trim_start_matches('|');
    name = name.strip_suffix("---").unwrap_or(name).trim();
    for marker in &config.alert_suffix_markers {
        if let Some(pos) = name.find(marker.as_str()) {
            name = name[..pos].trim();
        }
    }
    Some(name.to_string())
}

fn entry_status(name: &str, total: u32, success: u32, config: &GroupReportConfig) -> (StatusKind, String) {
    let name_norm = normalize(name);
    let two_of_three = config
        .two_of_three_clients
        .iter()
        .map(|c| normalize(c))
        .any(|c| !c.is_empty() && name_norm.contains(&c));

    if two_of_three && total == 3 && success >= 2 {
        (StatusKind::Ok, format!("2-of-3 rule: {}/{} VMs", success, total))
    } else if total == 0 {
        (StatusKind::Ok, "0 VMs to back up".to_string())
    } else if success == total {
        (StatusKind::Ok, format!("{}/{} VMs", success, total))
    } else {
        (StatusKind::Nok, format!("failed: {}/{} successful", success, total))
    }
}
