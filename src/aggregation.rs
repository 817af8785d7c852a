//! Multi-Component Aggregator
//!
//! Merge rules for the final table and the correlated checks of clients
//! reporting through several channels or several messages per run.

use crate::classifier::ClassificationItem;
use crate::config::{ChannelFamily, ChannelPolicy, Config};
use crate::status::{Status, StatusKind};

const DETAIL_TIME_FORMAT: &str = "%d/%m %H:%M";

/// How a new status merges into the final table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverridePolicy {
    /// A success recovers an earlier failure; a failure never hides a success.
    PreferSuccess,
    /// A failure sticks for the rest of the run.
    StickyFailure,
}

impl OverridePolicy {
    pub fn for_client(client: &str, config: &Config) -> Self {
        if config.is_sticky_failure(client) {
            OverridePolicy::StickyFailure
        } else {
            OverridePolicy::PreferSuccess
        }
    }

    pub fn apply(self, current: StatusKind, new: StatusKind) -> StatusKind {
        match self {
            OverridePolicy::PreferSuccess => match (current, new) {
                (StatusKind::Missing, _) => new,
                (StatusKind::Nok, StatusKind::Ok) => new,
                _ => current,
            },
            OverridePolicy::StickyFailure => match (current, new) {
                (_, StatusKind::Nok) => new,
                (StatusKind::Missing, _) => new,
                _ => current,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelOutcome {
    pub label: String,
    pub client: String,
    pub status: StatusKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FamilyOutcome {
    pub family: String,
    pub status: StatusKind,
    pub channels: Vec<ChannelOutcome>,
}

impl FamilyOutcome {
    pub fn details(&self) -> String {
        self.channels
            .iter()
            .map(|c| format!("{}: {}", c.label, c.detail))
            .collect::<Vec<_>>()
            .join(" / ")
    }

    /// Global line for the detail lists.
    pub fn line(&self) -> String {
        let labels = self
            .channels
            .iter()
            .map(|c| c.label.as_str())
            .collect::<Vec<_>>()
            .join(" and ");
        format!(
            "{} ({}) | Global status: {} - {}",
            self.family,
            labels,
            self.status,
            self.details()
        )
    }
}

/// Resolves every channel of `family` and combines them.
///
/// `items` may hold messages of any channel in any order; each channel only
/// looks at the items routed to its client.
pub fn resolve_family<F>(family: &ChannelFamily, items: &[ClassificationItem], classify: F) -> FamilyOutcome
where
    F: Fn(&ClassificationItem) -> Status,
{
    let channels: Vec<ChannelOutcome> = family
        .channels
        .iter()
        .map(|channel| {
            let mut routed: Vec<&ClassificationItem> =
                items.iter().filter(|i| i.client == channel.client).collect();
            routed.sort_by_key(|i| i.message.timestamp);
            let (status, detail) = match family.policy {
                ChannelPolicy::FirstMessage => first_message(&channel.label, &routed, &classify),
                ChannelPolicy::RetryCatchUp => retry_catch_up(&channel.label, &routed, &classify),
            };
            ChannelOutcome {
                label: channel.label.clone(),
                client: channel.client.clone(),
                status,
                detail,
            }
        })
        .collect();

    let status = combine_channels(channels.iter().map(|c| c.status));
    log::info!("{} global status: {}", family.name, status);

    FamilyOutcome {
        family: family.name.clone(),
        status,
        channels,
    }
}

/// All OK → OK, all Missing → Missing, anything else → NOK.
pub fn combine_channels<I>(statuses: I) -> StatusKind
where
    I: IntoIterator<Item = StatusKind>,
{
    let statuses: Vec<StatusKind> = statuses.into_iter().collect();
    if statuses.is_empty() {
        return StatusKind::Missing;
    }
    if statuses.iter().all(|s| *s == StatusKind::Ok) {
        StatusKind::Ok
    } else if statuses.iter().all(|s| *s == StatusKind::Missing) {
        StatusKind::Missing
    } else {
        StatusKind::Nok
    }
}

fn first_message<F>(label: &str, items: &[&ClassificationItem], classify: &F) -> (StatusKind, String)
where
    F: Fn(&ClassificationItem) -> Status,
{
    match items.first() {
        None => (StatusKind::Missing, "Missing (no message found)".to_string()),
        Some(item) => {
            let status = classify(item);
            let detail = format!(
                "{} ({}): {}",
                label,
                item.message.timestamp.format(DETAIL_TIME_FORMAT),
                status
            );
            (status.kind, detail)
        }
    }
}

fn retry_catch_up<F>(label: &str, items: &[&ClassificationItem], classify: &F) -> (StatusKind, String)
where
    F: Fn(&ClassificationItem) -> Status,
{
    let Some(first) = items.first() else {
        return (StatusKind::Missing, "Missing (no message found)".to_string());
    };

    let first_log = format!(
        "{} (1st message, {})",
        label,
        first.message.timestamp.format(DETAIL_TIME_FORMAT)
    );
    if classify(first).is_ok() {
        return (StatusKind::Ok, format!("{}: OK", first_log));
    }

    let Some(second) = items.get(1) else {
        return (StatusKind::Nok, format!("{}: NOK (no second message)", first_log));
    };

    let second_log = format!(
        "{} (2nd message, {})",
        label,
        second.message.timestamp.format(DETAIL_TIME_FORMAT)
    );
    if classify(second).is_ok() {
        (
            StatusKind::Ok,
            format!("{}: NOK, {}: OK (catch-up)", first_log, second_log),
        )
    } else {
        (StatusKind::Nok, format!("{}: NOK, {}: NOK", first_log, second_log))
    }
}

#[derive(Debug, Clone)]
pub struct CloudOutcome {
    pub client: String,
    pub status: StatusKind,
    /// Most recent message of the run
    pub latest: ClassificationItem,
    /// Classification of the most recent message
    pub latest_status: Status,
}

impl CloudOutcome {
    pub fn line(&self) -> String {
        format!(
            "{} | Subject: {} = {} (aggregated)",
            self.client, self.latest.message.subject, self.status
        )
    }
}

/// Any OK message → OK; otherwise the latest message decides. `None` when
/// there is nothing to aggregate.
pub fn cloud_summary<F>(client: &str, items: &[ClassificationItem], classify: F) -> Option<CloudOutcome>
where
    F: Fn(&ClassificationItem) -> Status,
{
    let latest = items.iter().max_by_key(|i| i.message.timestamp)?;
    let latest_status = classify(latest);

    let status = if items.iter().any(|i| classify(i).is_ok()) {
        StatusKind::Ok
    } else if latest_status.is_nok() {
        StatusKind::Nok
    } else {
        StatusKind::Missing
    };

    Some(CloudOutcome {
        client: client.to_string(),
        status,
        latest: latest.clone(),
        latest_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelRef;
    use crate::message::Message;
    use chrono::{Local, TimeZone};

    fn fold(policy: OverridePolicy, sequence: &[StatusKind]) -> StatusKind {
        sequence
            .iter()
            .fold(StatusKind::Missing, |current, new| policy.apply(current, *new))
    }

    #[test]
    fn test_prefer_success_sequences() {
        use StatusKind::*;
        assert_eq!(fold(OverridePolicy::PreferSuccess, &[Nok, Ok]), Ok);
        assert_eq!(fold(OverridePolicy::PreferSuccess, &[Ok, Nok]), Ok);
        assert_eq!(fold(OverridePolicy::PreferSuccess, &[Nok]), Nok);
        assert_eq!(fold(OverridePolicy::PreferSuccess, &[]), Missing);
        assert_eq!(fold(OverridePolicy::PreferSuccess, &[Unknown, Ok]), Unknown);
    }

    #[test]
    fn test_sticky_failure_sequences() {
        use StatusKind::*;
        assert_eq!(fold(OverridePolicy::StickyFailure, &[Nok, Ok]), Nok);
        assert_eq!(fold(OverridePolicy::StickyFailure, &[Ok, Nok]), Nok);
        assert_eq!(fold(OverridePolicy::StickyFailure, &[Ok, Ok]), Ok);
    }

    #[test]
    fn test_policy_for_client() {
        let config = Config::default();
        assert_eq!(
            OverridePolicy::for_client("SOCOPA - ACTIVEBACKUP", &config),
            OverridePolicy::StickyFailure
        );
        assert_eq!(OverridePolicy::for_client("ACME", &config), OverridePolicy::PreferSuccess);
    }

    #[test]
    fn test_combine_channels() {
        use StatusKind::*;
        assert_eq!(combine_channels([Ok, Ok]), Ok);
        assert_eq!(combine_channels([Missing, Missing]), Missing);
        assert_eq!(combine_channels([Ok, Missing]), Nok);
        assert_eq!(combine_channels([Ok, Unknown]), Nok);
        assert_eq!(combine_channels([Nok, Nok]), Nok);
    }

    fn item(client: &str, subject: &str, hour: u32) -> ClassificationItem {
        let message = Message::new(
            format!("{}-{}", client, hour),
            "jobs@example.fr",
            subject,
            "",
            Local.with_ymd_and_hms(2025, 3, 4, hour, 30, 0).unwrap(),
        );
        ClassificationItem::new(message, client, None)
    }

    /// Subjects containing "OK" classify OK, everything else NOK.
    fn by_subject(item: &ClassificationItem) -> Status {
        if item.message.subject.contains("OK") {
            Status::ok()
        } else {
            Status::nok()
        }
    }

    fn family(policy: ChannelPolicy) -> ChannelFamily {
        ChannelFamily {
            name: "TOSTAIN".to_string(),
            policy,
            channels: vec![
                ChannelRef {
                    label: "RSYNC".to_string(),
                    client: "TOSTAIN - RSYNC".to_string(),
                },
                ChannelRef {
                    label: "WASABI".to_string(),
                    client: "TOSTAIN - WASABI".to_string(),
                },
            ],
        }
    }

    #[test]
    fn test_first_message_with_missing_channel_is_nok() {
        let items = vec![item("TOSTAIN - RSYNC", "rsync OK", 20)];
        let outcome = resolve_family(&family(ChannelPolicy::FirstMessage), &items, by_subject);
        assert_eq!(outcome.status, StatusKind::Nok);
        assert_eq!(outcome.channels[0].status, StatusKind::Ok);
        assert_eq!(outcome.channels[1].status, StatusKind::Missing);
    }

    #[test]
    fn test_first_message_uses_earliest() {
        let items = vec![
            item("TOSTAIN - RSYNC", "rsync OK", 22),
            item("TOSTAIN - RSYNC", "rsync broken", 19),
            item("TOSTAIN - WASABI", "wasabi OK", 20),
        ];
        let outcome = resolve_family(&family(ChannelPolicy::FirstMessage), &items, by_subject);
        assert_eq!(outcome.channels[0].status, StatusKind::Nok);
        assert_eq!(outcome.status, StatusKind::Nok);
    }

    #[test]
    fn test_retry_catch_up() {
        let items = vec![
            item("TOSTAIN - WASABI", "wasabi OK", 21),
            item("TOSTAIN - RSYNC", "rsync retry OK", 23),
            item("TOSTAIN - RSYNC", "rsync broken", 20),
        ];
        let outcome = resolve_family(&family(ChannelPolicy::RetryCatchUp), &items, by_subject);
        assert_eq!(outcome.status, StatusKind::Ok);
        assert_eq!(
            outcome.channels[0].detail,
            "RSYNC (1st message, 04/03 20:30): NOK, RSYNC (2nd message, 04/03 23:30): OK (catch-up)"
        );
        assert_eq!(
            outcome.line(),
            format!(
                "TOSTAIN (RSYNC and WASABI) | Global status: OK - RSYNC: {} / WASABI: WASABI (1st message, 04/03 21:30): OK",
                outcome.channels[0].detail
            )
        );
    }

    #[test]
    fn test_retry_without_second_message() {
        let items = vec![
            item("TOSTAIN - RSYNC", "rsync broken", 20),
            item("TOSTAIN - WASABI", "wasabi OK", 21),
        ];
        let outcome = resolve_family(&family(ChannelPolicy::RetryCatchUp), &items, by_subject);
        assert_eq!(outcome.status, StatusKind::Nok);
        assert_eq!(
            outcome.channels[0].detail,
            "RSYNC (1st message, 04/03 20:30): NOK (no second message)"
        );
    }

    #[test]
    fn test_retry_two_failures() {
        let items = vec![
            item("TOSTAIN - RSYNC", "rsync broken", 20),
            item("TOSTAIN - RSYNC", "rsync broken again", 22),
        ];
        let outcome = resolve_family(&family(ChannelPolicy::RetryCatchUp), &items, by_subject);
        assert_eq!(outcome.channels[0].status, StatusKind::Nok);
        assert_eq!(outcome.channels[1].status, StatusKind::Missing);
        assert_eq!(outcome.status, StatusKind::Nok);
    }

    #[test]
    fn test_empty_family_is_missing() {
        let outcome = resolve_family(&family(ChannelPolicy::RetryCatchUp), &[], by_subject);
        assert_eq!(outcome.status, StatusKind::Missing);
    }

    #[test]
    fn test_cloud_summary() {
        assert!(cloud_summary("CLOUDALLY", &[], by_subject).is_none());

        let items = vec![item("CLOUDALLY", "summary OK", 18), item("CLOUDALLY", "summary failed", 23)];
        let outcome = cloud_summary("CLOUDALLY", &items, by_subject).unwrap();
        assert_eq!(outcome.status, StatusKind::Ok);
        assert_eq!(outcome.line(), "CLOUDALLY | Subject: summary failed = OK (aggregated)");

        let items = vec![item("CLOUDALLY", "summary failed", 18)];
        let outcome = cloud_summary("CLOUDALLY", &items, by_subject).unwrap();
        assert_eq!(outcome.status, StatusKind::Nok);

        let unknown = |_: &ClassificationItem| Status::unknown();
        let outcome = cloud_summary("CLOUDALLY", &items, unknown).unwrap();
        assert_eq!(outcome.status, StatusKind::Missing);
    }
}
