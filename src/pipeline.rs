//! One digest run: retrieve, route, classify, aggregate, notify.

use crate::aggregation::{cloud_summary, resolve_family, OverridePolicy};
use crate::classifier::{vm_check, ClassificationItem, Classifier};
use crate::config::Config;
use crate::error::{DigestError, Result};
use crate::group_report::{is_group_report, parse_group, GroupEntry};
use crate::matcher::{ClientMatch, ClientMatcher, UNKNOWN_CLIENT};
use crate::message::{Message, MessageSource};
use crate::normalization::normalize;
use crate::notify::Notifier;
use crate::registry::Registry;
use crate::report::{Digest, FinalStatusTable, GroupLine, ReportBuilder};
use crate::sink::{AuditRow, ReportSink, ARCHIVE_COLUMNS, AUDIT_COLUMNS};
use crate::status::Status;
use crate::window::RunWindow;
use chrono::{DateTime, Local};
use std::collections::HashSet;

/// Result of inspecting a single message, used by `--test-email`.
#[derive(Debug, Clone)]
pub enum Inspection {
    Group(Vec<GroupEntry>),
    Single { matched: ClientMatch, client: String, status: Status },
}

/// Messages of one run, split by the family that handles them.
#[derive(Default)]
struct Routed {
    groups: Vec<Message>,
    standard: Vec<ClassificationItem>,
    cloud: Vec<ClassificationItem>,
    channels: Vec<Vec<ClassificationItem>>,
}

/// Matching and classification state shared by a run.
pub struct Engine<'a> {
    config: &'a Config,
    registry: &'a Registry,
    matcher: ClientMatcher<'a>,
    classifier: Classifier,
}

impl<'a> Engine<'a> {
    pub fn new(config: &'a Config, registry: &'a Registry) -> Self {
        Self {
            config,
            registry,
            matcher: ClientMatcher::new(registry, config),
            classifier: Classifier::new(config),
        }
    }

    pub fn classify(&self, item: &ClassificationItem) -> Status {
        self.classifier.classify(item, self.registry)
    }

    /// Matched client, with the Unknown rescue applied.
    fn resolve_client(&self, message: &Message, matched: &ClientMatch) -> String {
        if !matched.is_unknown() {
            return matched.client.clone();
        }
        match self.matcher.rescue(&message.subject) {
            Some(client) => {
                log::debug!("Rescued '{}' as {}", message.subject, client);
                client
            }
            None => {
                let err = DigestError::UnresolvedClient {
                    message_id: message.id.clone(),
                    subject: message.subject.clone(),
                };
                log::debug!("{}", err);
                UNKNOWN_CLIENT.to_string()
            }
        }
    }

    pub fn inspect(&self, message: &Message) -> Inspection {
        if is_group_report(&message.subject, &self.config.group_report) {
            return Inspection::Group(parse_group(message, &self.config.group_report));
        }
        let matched = self.matcher.match_message(message);
        let client = self.resolve_client(message, &matched);
        let item = ClassificationItem::new(message.clone(), client.clone(), self.registry.get(&client).cloned());
        let status = self.classify(&item);
        Inspection::Single {
            matched,
            client,
            status,
        }
    }

    fn route(&self, messages: Vec<Message>) -> Routed {
        let mut routed = Routed {
            channels: vec![Vec::new(); self.config.channel_families.len()],
            ..Default::default()
        };
        let mut seen = HashSet::new();

        for message in messages {
            if !seen.insert(message.id.clone()) {
                continue;
            }
            if is_group_report(&message.subject, &self.config.group_report) {
                routed.groups.push(message);
                continue;
            }

            let matched = self.matcher.match_message(&message);
            log::debug!("{} -> {} (score {})", message.subject, matched.client, matched.score);

            let family = self
                .config
                .channel_families
                .iter()
                .position(|f| f.channels.iter().any(|c| c.client == matched.client));
            if let Some(index) = family {
                routed.channels[index].push(ClassificationItem::new(message, matched.client, matched.reference));
            } else if matched.client == self.config.cloud_family.client {
                routed.cloud.push(ClassificationItem::new(message, matched.client, matched.reference));
            } else {
                let client = self.resolve_client(&message, &matched);
                let reference = self.registry.get(&client).cloned();
                routed.standard.push(ClassificationItem::new(message, client, reference));
            }
        }
        routed
    }

    /// Runs the whole digest for the window ending at `now`.
    pub fn run(
        &self,
        source: &dyn MessageSource,
        audit: &mut dyn ReportSink,
        mut archive: Option<&mut dyn ReportSink>,
        notifier: &dyn Notifier,
        now: DateTime<Local>,
    ) -> Result<Digest> {
        let window = RunWindow::ending_at(now, self.config.cutoff_hour);
        log::info!(
            "Analysis window: {} to {}",
            window.start.format("%d/%m/%Y %H:%M"),
            window.end.format("%d/%m/%Y %H:%M")
        );

        let messages: Vec<Message> = source
            .search(window.start, window.end)?
            .into_iter()
            .filter(|m| window.contains(&m.timestamp))
            .collect();
        log::info!("{} messages in window", messages.len());

        audit.ensure_header(&AUDIT_COLUMNS)?;
        if let Some(sink) = archive.as_deref_mut() {
            if let Err(e) = sink.ensure_header(&ARCHIVE_COLUMNS) {
                log::warn!("{}", archive_error(e));
            }
        }

        let routed = self.route(messages);
        let mut builder = ReportBuilder::new(FinalStatusTable::seeded(
            self.registry,
            &self.config.always_tracked,
        ));

        self.process_groups(&routed.groups, &mut builder, audit, archive)?;
        self.process_standard(&routed.standard, &mut builder, audit)?;
        self.process_cloud(&routed.cloud, &mut builder, audit)?;
        self.process_channels(&routed.channels, &mut builder, audit, now)?;

        let digest = builder.finish(window);
        log::info!(
            "Final status: {} OK, {} NOK, {} missing",
            digest.counts.ok,
            digest.counts.nok,
            digest.counts.missing
        );
        notifier.send(&digest)?;
        Ok(digest)
    }

    fn process_groups(
        &self,
        groups: &[Message],
        builder: &mut ReportBuilder,
        audit: &mut dyn ReportSink,
        mut archive: Option<&mut dyn ReportSink>,
    ) -> Result<()> {
        let group_config = &self.config.group_report;
        let authorized: Vec<String> = group_config
            .authorized_clients
            .iter()
            .map(|c| normalize(c))
            .collect();
        let mut lines = Vec::new();

        for message in groups {
            if let Some(sink) = archive.as_deref_mut() {
                if let Err(e) = sink.append_row(&archive_row(message)) {
                    log::warn!("{}", archive_error(e));
                }
            }

            let entries = parse_group(message, group_config);
            log::info!("Group report {}: {} clients", message.id, entries.len());

            for entry in entries {
                let display = format!("{}{}", entry.client, group_config.client_suffix);
                let registered = self
                    .registry
                    .resolve_name(&entry.client, &group_config.brand_token)
                    .map(|rule| rule.client_id.clone());

                let audit_client = match registered {
                    Some(client) => {
                        builder.merge(&client, OverridePolicy::PreferSuccess, entry.status);
                        Some(client)
                    }
                    None if authorized.contains(&normalize(&entry.client)) => {
                        builder.track_unregistered(&display, entry.status);
                        Some(display.clone())
                    }
                    None => None,
                };

                let row = AuditRow {
                    date: message.timestamp,
                    client: audit_client
                        .clone()
                        .unwrap_or_else(|| format!("Unknown group client ({})", entry.client)),
                    sender: message.sender.clone(),
                    subject: group_config.subject_marker.clone(),
                    status: entry.status.to_string(),
                    vm_total: entry.total.to_string(),
                    success: entry.success.count().to_string(),
                    details: entry.detail.clone(),
                };
                audit.append_row(&row.to_record())?;

                if audit_client.is_some() {
                    lines.push(GroupLine {
                        line: format!(
                            "{} ({}/{}) = {}",
                            display,
                            entry.success.count(),
                            entry.total,
                            entry.status
                        ),
                        name: entry.client,
                        status: entry.status,
                    });
                }
            }
        }

        builder.add_group_lines(lines);
        Ok(())
    }

    fn process_standard(
        &self,
        items: &[ClassificationItem],
        builder: &mut ReportBuilder,
        audit: &mut dyn ReportSink,
    ) -> Result<()> {
        for item in items {
            let status = self.classify(item);
            let message = &item.message;
            log::debug!("{} | {} = {}", item.client, message.subject, status);

            let (vm_total, success) = match vm_check(&message.body) {
                Some(tally) => (tally.total.to_string(), tally.successful.to_string()),
                None => (String::new(), String::new()),
            };
            let row = AuditRow {
                date: message.timestamp,
                client: item.client.clone(),
                sender: message.sender.clone(),
                subject: message.subject.clone(),
                status: status.kind.to_string(),
                vm_total,
                success,
                details: status.detail().to_string(),
            };
            audit.append_row(&row.to_record())?;

            if item.client != UNKNOWN_CLIENT {
                let policy = OverridePolicy::for_client(&item.client, self.config);
                builder.merge(&item.client, policy, status.kind);
            }
            builder.record_line(
                status.kind,
                format!("{} | Subject: {} = {}", item.client, message.subject, status),
            );
        }
        Ok(())
    }

    fn process_cloud(
        &self,
        items: &[ClassificationItem],
        builder: &mut ReportBuilder,
        audit: &mut dyn ReportSink,
    ) -> Result<()> {
        let client = &self.config.cloud_family.client;
        let Some(outcome) = cloud_summary(client, items, |item| self.classify(item)) else {
            return Ok(());
        };
        log::info!("{} aggregated status: {}", client, outcome.status);

        builder.set(client, outcome.status);
        let latest = &outcome.latest.message;
        let row = AuditRow {
            date: latest.timestamp,
            client: client.clone(),
            sender: latest.sender.clone(),
            subject: latest.subject.clone(),
            status: outcome.status.to_string(),
            vm_total: String::new(),
            success: String::new(),
            details: format!("Global status: {}. Latest: {}", outcome.status, outcome.latest_status),
        };
        audit.append_row(&row.to_record())?;
        builder.record_line(outcome.status, outcome.line());
        Ok(())
    }

    fn process_channels(
        &self,
        channels: &[Vec<ClassificationItem>],
        builder: &mut ReportBuilder,
        audit: &mut dyn ReportSink,
        now: DateTime<Local>,
    ) -> Result<()> {
        for (family, items) in self.config.channel_families.iter().zip(channels) {
            let outcome = resolve_family(family, items, |item| self.classify(item));
            for channel in &outcome.channels {
                builder.set(&channel.client, channel.status);
            }

            let labels: Vec<&str> = family.channels.iter().map(|c| c.label.as_str()).collect();
            let row = AuditRow {
                date: now,
                client: format!("{} (Global)", family.name),
                sender: "Summary".to_string(),
                subject: format!("Channel check {}", labels.join(" + ")),
                status: outcome.status.to_string(),
                vm_total: String::new(),
                success: String::new(),
                details: outcome.details(),
            };
            audit.append_row(&row.to_record())?;
            builder.record_line(outcome.status, outcome.line());
        }
        Ok(())
    }
}

fn archive_row(message: &Message) -> Vec<String> {
    vec![
        message.timestamp.format("%d/%m/%Y").to_string(),
        message.timestamp.format("%H:%M:%S").to_string(),
        message.sender.clone(),
        message.subject.clone(),
        message.body.clone(),
    ]
}

fn archive_error(e: DigestError) -> DigestError {
    DigestError::MissingSecondaryArtifact {
        artifact: "group report archive".to_string(),
        reason: e.to_string(),
    }
}
