use serde::{Deserialize, Serialize};

/// Run configuration. Every keyword list and family definition used by the
/// engine lives here so new report layouts can be handled without code changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// CSV file with columns: client, alias1, alias2, rule flags
    pub registry_path: String,
    /// Directory of `.eml` files to scan
    pub mailbox_dir: String,
    /// CSV audit log, one row per processed message or aggregate
    pub audit_log_path: String,
    /// Optional CSV archive of raw group-report messages
    #[serde(default)]
    pub group_archive_path: Option<String>,
    /// Where the HTML digest is written; stdout text summary when unset
    #[serde(default)]
    pub html_output_path: Option<String>,
    #[serde(default = "default_cutoff_hour")]
    pub cutoff_hour: u32,
    pub keywords: KeywordConfig,
    pub family_detectors: Vec<FamilyDetector>,
    pub channel_families: Vec<ChannelFamily>,
    pub cloud_family: CloudFamily,
    pub group_report: GroupReportConfig,
    pub multi_block: MultiBlockConfig,
    #[serde(default)]
    pub tolerances: Vec<ToleranceRule>,
    pub exact_match_vendor: VendorRule,
    #[serde(default)]
    pub fallback_aliases: Vec<FallbackAlias>,
    /// Clients seeded as Missing even when absent from the registry
    #[serde(default)]
    pub always_tracked: Vec<String>,
    /// Clients whose recorded failure is never overwritten by a later success
    #[serde(default)]
    pub sticky_failure_tokens: Vec<String>,
    /// Clients classified without a registry reference
    #[serde(default)]
    pub reference_exempt: Vec<String>,
}

fn default_cutoff_hour() -> u32 {
    17
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordConfig {
    /// Any of these in the normalized subject forces NOK
    pub failure_tokens: Vec<String>,
    /// Each group forces NOK when all of its tokens are present
    #[serde(default)]
    pub failure_compounds: Vec<Vec<String>>,
    pub success_tokens: Vec<String>,
}

/// Brand detector evaluated before registry scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyDetector {
    pub brand: String,
    pub channels: Vec<DetectorChannel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorChannel {
    pub client: String,
    /// Empty means the brand token alone selects this channel
    #[serde(default)]
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPolicy {
    /// The earliest message of each channel decides
    FirstMessage,
    /// A failed first message may be caught up by the second one
    RetryCatchUp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelFamily {
    pub name: String,
    pub policy: ChannelPolicy,
    pub channels: Vec<ChannelRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRef {
    pub label: String,
    pub client: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudFamily {
    pub client: String,
    pub summary_marker: String,
    pub subject_success_markers: Vec<String>,
    pub body_success_markers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupReportConfig {
    pub subject_marker: String,
    /// Product name; client lines containing it are header noise
    pub brand_token: String,
    /// Suffix appended to allow-listed clients absent from the registry
    pub client_suffix: String,
    pub exclusion_keywords: Vec<String>,
    pub alert_suffix_markers: Vec<String>,
    pub failure_markers: Vec<String>,
    pub authorized_clients: Vec<String>,
    /// Clients with three VMs where two successes are enough
    pub two_of_three_clients: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiBlockConfig {
    pub client_tokens: Vec<String>,
    pub block_delimiter: String,
    pub success_values: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToleranceRule {
    pub client_token: String,
    pub subject_token: String,
}

/// Vendor whose exact-match failures are reported separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorRule {
    pub label: String,
    pub sender_tokens: Vec<String>,
    pub subject_tokens: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackAlias {
    pub token: String,
    pub client: String,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn detector_channel(client: &str, tokens: &[&str]) -> DetectorChannel {
    DetectorChannel {
        client: client.to_string(),
        tokens: strings(tokens),
    }
}

fn channel(label: &str, client: &str) -> ChannelRef {
    ChannelRef {
        label: label.to_string(),
        client: client.to_string(),
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            registry_path: "/etc/backup-digest/clients.csv".to_string(),
            mailbox_dir: "/var/lib/backup-digest/inbox".to_string(),
            audit_log_path: "/var/lib/backup-digest/report.csv".to_string(),
            group_archive_path: Some("/var/lib/backup-digest/group-reports.csv".to_string()),
            html_output_path: None,
            cutoff_hour: default_cutoff_hour(),
            keywords: KeywordConfig {
                failure_tokens: strings(&[
                    "echec",
                    "failed",
                    "failure",
                    "missed its scheduled",
                    "erreur",
                    "a manqué ses sauvegardes",
                    "ont manqué leurs sauvegardes",
                ]),
                failure_compounds: vec![strings(&["tache de sauvegarde", "echoue"])],
                success_tokens: strings(&[
                    "succes",
                    "success",
                    "ok",
                    "reussi",
                    "done",
                    "complete successfully",
                    "completed successfully",
                    "termine avec succes",
                ]),
            },
            family_detectors: vec![
                FamilyDetector {
                    brand: "CLOUDALLY".to_string(),
                    channels: vec![detector_channel("CLOUDALLY", &[])],
                },
                FamilyDetector {
                    brand: "DELANGUE".to_string(),
                    channels: vec![
                        detector_channel("DELANGUE - VEEAM", &["VEEAM", "JOB VEEAM DELANGUE"]),
                        detector_channel("DELANGUE - WASABI", &["WASABI"]),
                    ],
                },
                FamilyDetector {
                    brand: "SYNERGIC".to_string(),
                    channels: vec![
                        detector_channel(
                            "SYNERGIC - VEEAM",
                            &["VEEAM", "JOB SYNERGIC", "SYNERGIC JOB"],
                        ),
                        detector_channel("SYNERGIC - WASABI", &["WASABI"]),
                    ],
                },
                FamilyDetector {
                    brand: "TOSTAIN".to_string(),
                    channels: vec![
                        detector_channel("TOSTAIN - RSYNC", &["RSYNC"]),
                        detector_channel("TOSTAIN - WASABI", &["WASABI"]),
                    ],
                },
            ],
            channel_families: vec![
                ChannelFamily {
                    name: "TOSTAIN".to_string(),
                    policy: ChannelPolicy::RetryCatchUp,
                    channels: vec![
                        channel("RSYNC", "TOSTAIN - RSYNC"),
                        channel("WASABI", "TOSTAIN - WASABI"),
                    ],
                },
                ChannelFamily {
                    name: "SYNERGIC".to_string(),
                    policy: ChannelPolicy::FirstMessage,
                    channels: vec![
                        channel("VEEAM", "SYNERGIC - VEEAM"),
                        channel("WASABI", "SYNERGIC - WASABI"),
                    ],
                },
                ChannelFamily {
                    name: "DELANGUE".to_string(),
                    policy: ChannelPolicy::FirstMessage,
                    channels: vec![
                        channel("VEEAM", "DELANGUE - VEEAM"),
                        channel("WASABI", "DELANGUE - WASABI"),
                    ],
                },
            ],
            cloud_family: CloudFamily {
                client: "CLOUDALLY".to_string(),
                summary_marker: "CloudAlly Backup Summary".to_string(),
                subject_success_markers: strings(&["0 Backup items Failed"]),
                body_success_markers: strings(&["0 Backup items Failed", "0 items Failed"]),
            },
            group_report: GroupReportConfig {
                subject_marker: "Rapport quotidien Control Panel".to_string(),
                brand_token: "altaro".to_string(),
                client_suffix: " - ALTARO".to_string(),
                exclusion_keywords: strings(&[
                    "RAPPORT QUOTIDIEN",
                    "CLICK HERE",
                    "VMs",
                    "VADE FRANCE",
                    "DÉTAIL",
                    "---",
                    "AVENUE ANTOINE PINAY",
                    "MACHINES VIRTUELLES",
                    "HORS SITE",
                    "REPRODUCTION",
                    "VERIFICATION",
                    "59510",
                    "HEM, FRANCE",
                    "NOV.",
                ]),
                alert_suffix_markers: strings(&["Les alertes", "Alerts"]),
                failure_markers: strings(&["Échec", "Non Sauvegardé", "Failed", "Not backed up"]),
                authorized_clients: strings(&[
                    "ARTOIS-FLEXIBLES",
                    "ATS Groupe",
                    "AVRIL-BONDUES",
                    "CLEANINGBIO",
                    "DT Froid",
                    "ETIQ-LEERS",
                    "LYS-SANTE",
                    "MBT Agencements",
                    "MDZ Expertise & Conseils",
                    "MJL-PYCKAERT",
                    "NCS-STAMAND",
                    "OMEO-OIGNIES",
                    "R&D",
                    "TERRATECK-LESTREM",
                    "UTB",
                    "VIVALANGUES",
                    "VSG2C",
                ]),
                two_of_three_clients: strings(&["AVRIL-BONDUES"]),
            },
            multi_block: MultiBlockConfig {
                client_tokens: strings(&["SOCOPA"]),
                block_delimiter: "Rapport de la tâche".to_string(),
                success_values: strings(&["succes", "success"]),
            },
            tolerances: vec![
                ToleranceRule {
                    client_token: "R&D - ACTIVEBACKUP".to_string(),
                    subject_token: "partiellement terminee".to_string(),
                },
                ToleranceRule {
                    client_token: "NOLLET - VEEAM".to_string(),
                    subject_token: "minor warnings".to_string(),
                },
            ],
            exact_match_vendor: VendorRule {
                label: "Altaro".to_string(),
                sender_tokens: strings(&["hornet"]),
                subject_tokens: strings(&["altaro"]),
            },
            fallback_aliases: vec![
                FallbackAlias {
                    token: "1000 ET 1 LOISIRS".to_string(),
                    client: "1001 LOISIRS".to_string(),
                },
                FallbackAlias {
                    token: "DSA-LILLE-SIEGE".to_string(),
                    client: "DSA".to_string(),
                },
            ],
            always_tracked: strings(&["1001 LOISIRS"]),
            sticky_failure_tokens: strings(&["SOCOPA"]),
            reference_exempt: strings(&["CLOUDALLY"]),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cutoff_hour > 23 {
            anyhow::bail!("cutoff_hour must be between 0 and 23, got {}", self.cutoff_hour);
        }
        for family in &self.channel_families {
            if family.channels.is_empty() {
                anyhow::bail!("channel family '{}' has no channels", family.name);
            }
        }
        for detector in &self.family_detectors {
            if detector.brand.trim().is_empty() {
                anyhow::bail!("family detector with empty brand token");
            }
            if detector.channels.is_empty() {
                anyhow::bail!("family detector '{}' has no channels", detector.brand);
            }
        }
        if self.group_report.subject_marker.trim().is_empty() {
            anyhow::bail!("group_report.subject_marker must not be empty");
        }
        if self.multi_block.block_delimiter.trim().is_empty() {
            anyhow::bail!("multi_block.block_delimiter must not be empty");
        }
        Ok(())
    }

    /// Channel family owning `client`, if any.
    pub fn channel_family_for(&self, client: &str) -> Option<&ChannelFamily> {
        self.channel_families
            .iter()
            .find(|family| family.channels.iter().any(|c| c.client == client))
    }

    pub fn is_sticky_failure(&self, client: &str) -> bool {
        let upper = client.to_uppercase();
        self.sticky_failure_tokens
            .iter()
            .any(|token| upper.contains(&token.to_uppercase()))
    }

    pub fn is_reference_exempt(&self, client: &str) -> bool {
        self.reference_exempt.iter().any(|c| c == client)
    }
}
