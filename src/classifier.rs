//! Status Classifier
//!
//! Ordered rule cascade mapping one matched message to OK, NOK or Unknown.
//! The first rule that fires decides; the cascade never yields Missing.

use crate::config::Config;
use crate::message::Message;
use crate::normalization::{normalize, normalize_all};
use crate::registry::{ClientRule, Registry};
use crate::status::{Status, StatusKind};
use regex::Regex;
use std::sync::OnceLock;

const MISSING_BLOCK_STATUS: &str = "internal-failure";
const MISSING_BLOCK_LABEL: &str = "unspecified";

/// A matched message ready for classification.
#[derive(Debug, Clone)]
pub struct ClassificationItem {
    pub message: Message,
    pub client: String,
    pub reference: Option<ClientRule>,
}

impl ClassificationItem {
    pub fn new(message: Message, client: impl Into<String>, reference: Option<ClientRule>) -> Self {
        Self {
            message,
            client: client.into(),
            reference,
        }
    }
}

/// VM counts found in a replication report body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmTally {
    pub total: u32,
    pub successful: u32,
}

impl VmTally {
    pub fn is_ok(&self) -> bool {
        self.total > 0 && self.total == self.successful
    }

    pub fn status(&self) -> StatusKind {
        if self.is_ok() {
            StatusKind::Ok
        } else {
            StatusKind::Nok
        }
    }
}

/// Case-insensitive marker patterns. A marker starting with a digit must not
/// follow another digit, so `0 items Failed` does not match `10 items Failed`.
fn marker_patterns(markers: &[String]) -> Vec<Regex> {
    markers
        .iter()
        .filter(|m| !m.is_empty())
        .filter_map(|m| {
            let guard = if m.starts_with(|c: char| c.is_ascii_digit()) {
                "(?:^|[^0-9])"
            } else {
                ""
            };
            match Regex::new(&format!("(?i){}{}", guard, regex::escape(m))) {
                Ok(re) => Some(re),
                Err(e) => {
                    log::warn!("Ignoring cloud marker '{}': {}", m, e);
                    None
                }
            }
        })
        .collect()
}

/// Looks for `Total of N VMs ... VMs Status M Successful` with all
/// whitespace removed first.
pub fn vm_check(text: &str) -> Option<VmTally> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?is)Totalof(\d+)VMs.*?VMsStatus(\d+)Successful").expect("valid VM tally pattern")
    });

    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let caps = re.captures(&compact)?;
    Some(VmTally {
        total: caps[1].parse().ok()?,
        successful: caps[2].parse().ok()?,
    })
}

/// One `Rapport de la tâche` block of a multi-block report.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskBlock {
    pub label: String,
    pub status: String,
}

struct Tolerance {
    client_token: String,
    subject_token: String,
}

pub struct Classifier {
    exempt: Vec<String>,
    group_brand: String,
    cloud_token: String,
    cloud_summary_marker: String,
    cloud_subject_markers: Vec<Regex>,
    cloud_body_markers: Vec<Regex>,
    failure_tokens: Vec<String>,
    failure_compounds: Vec<Vec<String>>,
    multi_block_tokens: Vec<String>,
    block_delimiter: Option<Regex>,
    block_success: Vec<String>,
    tolerances: Vec<Tolerance>,
    vendor_label: String,
    vendor_senders: Vec<String>,
    vendor_subjects: Vec<String>,
    success_tokens: Vec<String>,
}

impl Classifier {
    pub fn new(config: &Config) -> Self {
        let lower_all = |items: &[String]| -> Vec<String> {
            items
                .iter()
                .map(|s| s.to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };

        let block_delimiter =
            match Regex::new(&format!("(?i){}", regex::escape(&config.multi_block.block_delimiter))) {
                Ok(re) => Some(re),
                Err(e) => {
                    log::warn!("Invalid block delimiter, multi-block parsing disabled: {}", e);
                    None
                }
            };

        Self {
            exempt: config.reference_exempt.clone(),
            group_brand: config.group_report.brand_token.clone(),
            cloud_token: config.cloud_family.client.to_uppercase(),
            cloud_summary_marker: config.cloud_family.summary_marker.clone(),
            cloud_subject_markers: marker_patterns(&config.cloud_family.subject_success_markers),
            cloud_body_markers: marker_patterns(&config.cloud_family.body_success_markers),
            failure_tokens: normalize_all(&config.keywords.failure_tokens),
            failure_compounds: config
                .keywords
                .failure_compounds
                .iter()
                .map(|group| normalize_all(group))
                .filter(|group| !group.is_empty())
                .collect(),
            multi_block_tokens: config
                .multi_block
                .client_tokens
                .iter()
                .map(|t| t.to_uppercase())
                .collect(),
            block_delimiter,
            block_success: normalize_all(&config.multi_block.success_values),
            tolerances: config
                .tolerances
                .iter()
                .map(|t| Tolerance {
                    client_token: t.client_token.to_uppercase(),
                    subject_token: normalize(&t.subject_token),
                })
                .collect(),
            vendor_label: config.exact_match_vendor.label.clone(),
            vendor_senders: lower_all(&config.exact_match_vendor.sender_tokens),
            vendor_subjects: lower_all(&config.exact_match_vendor.subject_tokens),
            success_tokens: normalize_all(&config.keywords.success_tokens),
        }
    }

    /// Runs the cascade for one item.
    pub fn classify(&self, item: &ClassificationItem, registry: &Registry) -> Status {
        let message = &item.message;
        let client_upper = item.client.to_uppercase();

        let reference = item
            .reference
            .as_ref()
            .or_else(|| registry.resolve_name(&item.client, &self.group_brand));
        if reference.is_none() && !self.exempt.iter().any(|c| *c == item.client) {
            return Status::unknown();
        }

        let subject_norm = normalize(&message.subject);

        if self.is_cloud_report(&client_upper, &message.subject) {
            let clean = self.cloud_subject_markers.iter().any(|m| m.is_match(&message.subject))
                || self.cloud_body_markers.iter().any(|m| m.is_match(&message.body));
            return if clean {
                Status::with_detail(StatusKind::Ok, "cloud: 0 failed items")
            } else {
                Status::with_detail(StatusKind::Nok, "cloud: failed items")
            };
        }

        if self.has_failure_marker(&subject_norm) {
            return Status::nok();
        }

        if self.multi_block_tokens.iter().any(|t| client_upper.contains(t)) {
            if let Some(status) = self.classify_blocks(&message.body) {
                return status;
            }
        }

        if self
            .tolerances
            .iter()
            .any(|t| client_upper.contains(&t.client_token) && subject_norm.contains(&t.subject_token))
        {
            return Status::ok();
        }

        if let Some(rule) = reference.filter(|r| r.require_exact) {
            if rule.accepts_exact_subject(&message.subject) {
                return Status::ok();
            }
            return if self.is_vendor_message(message) {
                Status::with_detail(
                    StatusKind::Nok,
                    format!("exact alias missing ({})", self.vendor_label),
                )
            } else {
                Status::with_detail(StatusKind::Nok, "exact alias missing")
            };
        }

        if self.success_tokens.iter().any(|t| subject_norm.contains(t.as_str())) {
            Status::ok()
        } else {
            Status::nok()
        }
    }

    fn is_cloud_report(&self, client_upper: &str, subject: &str) -> bool {
        (!self.cloud_token.is_empty() && client_upper.contains(&self.cloud_token))
            || (!self.cloud_summary_marker.is_empty() && subject.contains(&self.cloud_summary_marker))
    }

    fn has_failure_marker(&self, subject_norm: &str) -> bool {
        self.failure_tokens.iter().any(|t| subject_norm.contains(t.as_str()))
            || self
                .failure_compounds
                .iter()
                .any(|group| group.iter().all(|t| subject_norm.contains(t.as_str())))
    }

    fn is_vendor_message(&self, message: &Message) -> bool {
        let sender = message.sender.to_lowercase();
        let subject = message.subject.to_lowercase();
        self.vendor_senders.iter().any(|t| sender.contains(t))
            || self.vendor_subjects.iter().any(|t| subject.contains(t))
    }

    /// Splits a body into task blocks; text before the first delimiter is ignored.
    pub fn task_blocks(&self, body: &str) -> Vec<TaskBlock> {
        static STATUS_RE: OnceLock<Regex> = OnceLock::new();
        static LABEL_RE: OnceLock<Regex> = OnceLock::new();

        let Some(delimiter) = &self.block_delimiter else {
            return Vec::new();
        };
        let status_re = STATUS_RE
            .get_or_init(|| Regex::new(r"(?i)Statut:\s*(\w+)").expect("valid block status pattern"));
        let label_re = LABEL_RE.get_or_init(|| {
            Regex::new(r#"(?i)Coffre de Stockage:\s*"(.*?)""#).expect("valid block label pattern")
        });

        delimiter
            .split(body)
            .skip(1)
            .map(|block| {
                let status = status_re
                    .captures(block)
                    .map(|c| normalize(c[1].trim()))
                    .unwrap_or_else(|| MISSING_BLOCK_STATUS.to_string());
                let label = label_re
                    .captures(block)
                    .map(|c| c[1].trim().to_string())
                    .unwrap_or_else(|| MISSING_BLOCK_LABEL.to_string());
                TaskBlock { label, status }
            })
            .collect()
    }

    fn classify_blocks(&self, body: &str) -> Option<Status> {
        let blocks = self.task_blocks(body);
        if blocks.is_empty() {
            return None;
        }

        let failed = blocks
            .iter()
            .any(|b| !self.block_success.iter().any(|s| *s == b.status));
        let detail = blocks
            .iter()
            .map(|b| format!("{}: {}", b.label, b.status))
            .collect::<Vec<_>>()
            .join(", ");

        let kind = if failed { StatusKind::Nok } else { StatusKind::Ok };
        Some(Status::with_detail(kind, detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn message(sender: &str, subject: &str, body: &str) -> Message {
        Message::new(
            "m1",
            sender,
            subject,
            body,
            Local.with_ymd_and_hms(2025, 3, 4, 21, 0, 0).unwrap(),
        )
    }

    fn item(client: &str, reference: Option<ClientRule>, subject: &str, body: &str) -> ClassificationItem {
        ClassificationItem::new(message("backup@acme.fr", subject, body), client, reference)
    }

    fn acme() -> ClientRule {
        ClientRule::from_columns("ACME", "acme", "", "")
    }

    fn classifier() -> Classifier {
        Classifier::new(&Config::default())
    }

    #[test]
    fn test_unreferenced_client_is_unknown() {
        let registry = Registry::default();
        let status = classifier().classify(&item("Unknown", None, "Backup OK", ""), &registry);
        assert_eq!(status.kind, StatusKind::Unknown);
    }

    #[test]
    fn test_reference_recovered_by_name() {
        let registry = Registry::new(vec![acme()]);
        let status = classifier().classify(&item("ACME", None, "Backup OK", ""), &registry);
        assert_eq!(status, Status::ok());
    }

    #[test]
    fn test_cloud_family_is_exempt_from_reference() {
        let registry = Registry::default();
        let c = classifier();

        let ok = c.classify(
            &item("CLOUDALLY", None, "CloudAlly Backup Summary", "Result: 0 Backup items Failed"),
            &registry,
        );
        assert_eq!(ok.to_string(), "OK (cloud: 0 failed items)");

        let nok = c.classify(&item("CLOUDALLY", None, "CloudAlly Backup Summary", "3 items Failed"), &registry);
        assert_eq!(nok.to_string(), "NOK (cloud: failed items)");
    }

    #[test]
    fn test_cloud_zero_marker_needs_a_whole_number() {
        let registry = Registry::default();
        let c = classifier();

        let ten = c.classify(
            &item("CLOUDALLY", None, "CloudAlly Backup Summary", "Result: 10 items Failed, 0 succeeded"),
            &registry,
        );
        assert_eq!(ten.to_string(), "NOK (cloud: failed items)");

        let subject = c.classify(
            &item("CLOUDALLY", None, "CloudAlly Backup Summary - 20 Backup items Failed", ""),
            &registry,
        );
        assert!(subject.is_nok());

        let leading = c.classify(&item("CLOUDALLY", None, "CloudAlly Backup Summary", "0 items failed"), &registry);
        assert!(leading.is_ok());
    }

    #[test]
    fn test_failure_veto_takes_precedence() {
        let registry = Registry::new(vec![acme()]);
        let c = classifier();

        let status = c.classify(&item("ACME", Some(acme()), "Backup Failed — previously Succeeded", ""), &registry);
        assert_eq!(status, Status::nok());

        let status = c.classify(
            &item("ACME", Some(acme()), "Tâche de sauvegarde ACME a échoué avec succès partiel", ""),
            &registry,
        );
        assert_eq!(status, Status::nok());

        let status = c.classify(&item("ACME", Some(acme()), "ACME a manqué ses sauvegardes", ""), &registry);
        assert_eq!(status, Status::nok());
    }

    #[test]
    fn test_success_tokens() {
        let registry = Registry::new(vec![acme()]);
        let c = classifier();

        for subject in ["[Success] ACME job", "Sauvegarde réussie", "Job completed successfully", "ACME done"] {
            assert_eq!(c.classify(&item("ACME", Some(acme()), subject, ""), &registry), Status::ok(), "{}", subject);
        }
        assert_eq!(
            c.classify(&item("ACME", Some(acme()), "Weekly ACME summary", ""), &registry),
            Status::nok()
        );
    }

    #[test]
    fn test_classifier_never_yields_missing() {
        let registry = Registry::new(vec![acme()]);
        let c = classifier();
        let subjects = ["", "   ", "???", "Backup OK", "échec", "CloudAlly Backup Summary", "Rapport"];
        for subject in subjects {
            for client in ["ACME", "Unknown", "CLOUDALLY", "SOCOPA"] {
                let status = c.classify(&item(client, None, subject, "Statut: rien"), &registry);
                assert_ne!(status.kind, StatusKind::Missing);
            }
        }
    }

    #[test]
    fn test_multi_block_reports() {
        let socopa = ClientRule::from_columns("SOCOPA - ACTIVEBACKUP", "socopa", "", "");
        let registry = Registry::new(vec![socopa.clone()]);
        let c = classifier();

        let single = "Bonjour\nRapport de la tâche NAS\nStatut: Succès\nCoffre de Stockage: \"Coffre A\"\n";
        let status = c.classify(&item("SOCOPA - ACTIVEBACKUP", Some(socopa.clone()), "Rapport", single), &registry);
        assert_eq!(status.to_string(), "OK (Coffre A: succes)");

        let multi = "RAPPORT DE LA TÂCHE one\nStatut: Success\nCoffre de Stockage: \"A\"\n\
                     Rapport de la tâche two\nStatut: Avertissement\n";
        let status = c.classify(&item("SOCOPA - ACTIVEBACKUP", Some(socopa.clone()), "Rapport", multi), &registry);
        assert_eq!(status.to_string(), "NOK (A: success, unspecified: avertissement)");

        let missing_status = "Rapport de la tâche x\nCoffre de Stockage: \"B\"\n";
        let status =
            c.classify(&item("SOCOPA - ACTIVEBACKUP", Some(socopa.clone()), "Rapport", missing_status), &registry);
        assert_eq!(status.to_string(), "NOK (B: internal-failure)");

        // No block: falls through to the success tokens
        let status = c.classify(&item("SOCOPA - ACTIVEBACKUP", Some(socopa), "Backup OK", "nothing"), &registry);
        assert_eq!(status, Status::ok());
    }

    #[test]
    fn test_tolerance_exceptions() {
        let rd = ClientRule::from_columns("R&D - ACTIVEBACKUP", "", "", "");
        let nollet = ClientRule::from_columns("NOLLET - VEEAM", "", "", "");
        let registry = Registry::new(vec![rd.clone(), nollet.clone()]);
        let c = classifier();

        let status = c.classify(&item("R&D - ACTIVEBACKUP", Some(rd), "Tâche partiellement terminée", ""), &registry);
        assert_eq!(status, Status::ok());
        let status = c.classify(&item("NOLLET - VEEAM", Some(nollet), "Job finished with minor warnings", ""), &registry);
        assert_eq!(status, Status::ok());
    }

    #[test]
    fn test_exact_match_mode() {
        let rule = ClientRule::from_columns("Exact Co", "daily report", "Daily Report A|Daily Report B", "/");
        let registry = Registry::new(vec![rule.clone()]);
        let c = classifier();

        let ok = c.classify(&item("Exact Co", Some(rule.clone()), "Daily Report A", ""), &registry);
        assert_eq!(ok, Status::ok());

        let nok = c.classify(&item("Exact Co", Some(rule.clone()), "Daily Report A - revised", ""), &registry);
        assert_eq!(nok.to_string(), "NOK (exact alias missing)");

        let vendor = ClassificationItem::new(
            message("noreply@hornetsecurity.com", "Daily Report C", ""),
            "Exact Co",
            Some(rule),
        );
        assert_eq!(c.classify(&vendor, &registry).to_string(), "NOK (exact alias missing (Altaro))");
    }

    #[test]
    fn test_vm_check() {
        let body = "Total of 3 VMs\nsome lines\nVMs Status\n 3 Successful";
        let tally = vm_check(body).unwrap();
        assert_eq!(tally, VmTally { total: 3, successful: 3 });
        assert_eq!(tally.status(), StatusKind::Ok);

        let partial = vm_check("Total of 3 VMs ... VMs Status 2 Successful").unwrap();
        assert_eq!(partial.status(), StatusKind::Nok);

        let empty = vm_check("Total of 0 VMs ... VMs Status 0 Successful").unwrap();
        assert_eq!(empty.status(), StatusKind::Nok);

        assert!(vm_check("no tally here").is_none());
    }
}
