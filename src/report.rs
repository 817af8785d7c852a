//! Report Assembler
//!
//! `ReportBuilder` is the run's only mutable state. Every family feeds it
//! lines and table updates; `finish` turns it into an immutable `Digest`.

use crate::aggregation::OverridePolicy;
use crate::registry::Registry;
use crate::status::StatusKind;
use crate::window::RunWindow;
use serde::Serialize;
use std::collections::HashSet;

/// Final client → status table, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinalStatusTable {
    entries: Vec<(String, StatusKind)>,
}

impl FinalStatusTable {
    /// Every registered client plus `always_tracked`, all Missing.
    pub fn seeded(registry: &Registry, always_tracked: &[String]) -> Self {
        let mut table = Self::default();
        let clients = registry
            .rules()
            .iter()
            .map(|r| r.client_id.as_str())
            .chain(always_tracked.iter().map(String::as_str));
        for client in clients {
            if !table.contains(client) {
                table.entries.push((client.to_string(), StatusKind::Missing));
            }
        }
        table
    }

    pub fn contains(&self, client: &str) -> bool {
        self.get(client).is_some()
    }

    pub fn get(&self, client: &str) -> Option<StatusKind> {
        self.entries.iter().find(|(c, _)| c == client).map(|(_, s)| *s)
    }

    /// Overwrites a tracked client. Returns false when `client` is not tracked.
    pub fn set(&mut self, client: &str, status: StatusKind) -> bool {
        match self.entries.iter_mut().find(|(c, _)| c == client) {
            Some(entry) => {
                entry.1 = status;
                true
            }
            None => false,
        }
    }

    /// Merges `status` into a tracked client under `policy`.
    pub fn merge(&mut self, client: &str, policy: OverridePolicy, status: StatusKind) -> bool {
        match self.get(client) {
            Some(current) => self.set(client, policy.apply(current, status)),
            None => false,
        }
    }

    fn insert_if_absent(&mut self, client: &str, status: StatusKind) {
        if !self.contains(client) {
            self.entries.push((client.to_string(), status));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, StatusKind)> {
        self.entries.iter().map(|(c, s)| (c.as_str(), *s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Summary line for one client of a group report.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupLine {
    pub name: String,
    pub line: String,
    pub status: StatusKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub ok: usize,
    pub nok: usize,
    pub missing: usize,
    pub unknown: usize,
}

/// Everything a notifier needs about one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Digest {
    pub window: RunWindow,
    pub ok: Vec<String>,
    pub nok: Vec<String>,
    pub unknown: Vec<String>,
    /// `"<client> = <STATUS>"`, failures first
    pub final_lines: Vec<String>,
    pub counts: StatusCounts,
}

#[derive(Debug, Clone)]
pub struct ReportBuilder {
    table: FinalStatusTable,
    side_table: FinalStatusTable,
    ok: Vec<String>,
    nok: Vec<String>,
    unknown: Vec<String>,
}

impl ReportBuilder {
    pub fn new(table: FinalStatusTable) -> Self {
        Self {
            table,
            side_table: FinalStatusTable::default(),
            ok: Vec::new(),
            nok: Vec::new(),
            unknown: Vec::new(),
        }
    }

    pub fn table(&self) -> &FinalStatusTable {
        &self.table
    }

    /// Adds a detail line to the bucket of `kind`; Missing goes with Unknown.
    pub fn record_line(&mut self, kind: StatusKind, line: String) {
        match kind {
            StatusKind::Ok => self.ok.push(line),
            StatusKind::Nok => self.nok.push(line),
            StatusKind::Missing | StatusKind::Unknown => self.unknown.push(line),
        }
    }

    pub fn merge(&mut self, client: &str, policy: OverridePolicy, kind: StatusKind) -> bool {
        let merged = self.table.merge(client, policy, kind);
        if !merged {
            log::debug!("Client '{}' is not tracked, status {} not merged", client, kind);
        }
        merged
    }

    /// Overwrites a tracked client's status; untracked clients are left out.
    pub fn set(&mut self, client: &str, kind: StatusKind) -> bool {
        self.table.set(client, kind)
    }

    /// Tracks a client known only from a group report. A new entry or an OK
    /// replaces the previous value.
    pub fn track_unregistered(&mut self, client: &str, kind: StatusKind) {
        if kind != StatusKind::Ok && self.side_table.contains(client) {
            return;
        }
        if !self.side_table.set(client, kind) {
            self.side_table.insert_if_absent(client, kind);
        }
    }

    /// Appends group lines sorted by client name, without duplicates.
    pub fn add_group_lines(&mut self, mut lines: Vec<GroupLine>) {
        lines.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        let mut seen = HashSet::new();
        for line in lines {
            if seen.insert(line.line.clone()) {
                let kind = if line.status == StatusKind::Ok {
                    StatusKind::Ok
                } else {
                    StatusKind::Nok
                };
                self.record_line(kind, line.line);
            }
        }
    }

    pub fn finish(self, window: RunWindow) -> Digest {
        let mut table = self.table;
        for (client, kind) in self.side_table.iter() {
            table.insert_if_absent(client, kind);
        }

        let mut counts = StatusCounts::default();
        let mut finals: Vec<(&str, StatusKind)> = table.iter().collect();
        for (_, kind) in &finals {
            match kind {
                StatusKind::Ok => counts.ok += 1,
                StatusKind::Nok => counts.nok += 1,
                StatusKind::Missing => counts.missing += 1,
                StatusKind::Unknown => counts.unknown += 1,
            }
        }
        finals.sort_by(|(a_client, a_kind), (b_client, b_kind)| {
            a_kind
                .tier()
                .cmp(&b_kind.tier())
                .then_with(|| a_client.to_lowercase().cmp(&b_client.to_lowercase()))
                .then_with(|| a_client.cmp(b_client))
        });
        let final_lines = finals
            .iter()
            .map(|(client, kind)| format!("{} = {}", client, kind))
            .collect();

        Digest {
            window,
            ok: dedup(self.ok),
            nok: dedup(self.nok),
            unknown: dedup(self.unknown),
            final_lines,
            counts,
        }
    }
}

/// Drops repeated lines, keeping the first occurrence.
fn dedup(lines: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    lines.into_iter().filter(|l| seen.insert(l.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ClientRule;
    use chrono::{Local, TimeZone};

    fn window() -> RunWindow {
        RunWindow::ending_at(Local.with_ymd_and_hms(2025, 3, 5, 8, 0, 0).unwrap(), 17)
    }

    fn table() -> FinalStatusTable {
        let registry = Registry::new(vec![
            ClientRule::from_columns("Zeta", "", "", ""),
            ClientRule::from_columns("alpha", "", "", ""),
            ClientRule::from_columns("Beta", "", "", ""),
            ClientRule::from_columns("Gamma", "", "", ""),
        ]);
        FinalStatusTable::seeded(&registry, &["1001 LOISIRS".to_string(), "Beta".to_string()])
    }

    #[test]
    fn test_seeded_table() {
        let table = table();
        assert_eq!(table.len(), 5);
        assert!(table.iter().all(|(_, s)| s == StatusKind::Missing));
        assert_eq!(table.get("1001 LOISIRS"), Some(StatusKind::Missing));
    }

    #[test]
    fn test_merge_ignores_untracked_clients() {
        let mut builder = ReportBuilder::new(table());
        assert!(!builder.merge("Nobody", OverridePolicy::PreferSuccess, StatusKind::Ok));
        assert!(builder.merge("Zeta", OverridePolicy::PreferSuccess, StatusKind::Nok));
        assert!(builder.merge("Zeta", OverridePolicy::PreferSuccess, StatusKind::Ok));
        assert_eq!(builder.table().get("Zeta"), Some(StatusKind::Ok));
    }

    #[test]
    fn test_final_lines_sorted_by_tier_then_name() {
        let mut builder = ReportBuilder::new(table());
        builder.merge("Zeta", OverridePolicy::PreferSuccess, StatusKind::Nok);
        builder.merge("Gamma", OverridePolicy::PreferSuccess, StatusKind::Ok);
        builder.merge("alpha", OverridePolicy::PreferSuccess, StatusKind::Ok);

        let digest = builder.finish(window());
        assert_eq!(
            digest.final_lines,
            vec![
                "Zeta = NOK",
                "1001 LOISIRS = Missing",
                "Beta = Missing",
                "alpha = OK",
                "Gamma = OK",
            ]
        );
        assert_eq!(
            digest.counts,
            StatusCounts { ok: 2, nok: 1, missing: 2, unknown: 0 }
        );
    }

    #[test]
    fn test_side_table_never_overrides_registry() {
        let mut builder = ReportBuilder::new(table());
        builder.track_unregistered("UTB - ALTARO", StatusKind::Nok);
        builder.track_unregistered("UTB - ALTARO", StatusKind::Ok);
        builder.track_unregistered("UTB - ALTARO", StatusKind::Nok);
        builder.track_unregistered("Zeta", StatusKind::Ok);

        let digest = builder.finish(window());
        assert!(digest.final_lines.contains(&"UTB - ALTARO = OK".to_string()));
        assert!(digest.final_lines.contains(&"Zeta = Missing".to_string()));
    }

    #[test]
    fn test_lines_are_bucketed_and_deduplicated() {
        let mut builder = ReportBuilder::new(table());
        builder.record_line(StatusKind::Ok, "a".to_string());
        builder.record_line(StatusKind::Ok, "a".to_string());
        builder.record_line(StatusKind::Missing, "m".to_string());
        builder.record_line(StatusKind::Unknown, "u".to_string());
        builder.add_group_lines(vec![
            GroupLine {
                name: "VSG2C".to_string(),
                line: "VSG2C - ALTARO (0/0) = OK".to_string(),
                status: StatusKind::Ok,
            },
            GroupLine {
                name: "ARTOIS".to_string(),
                line: "ARTOIS - ALTARO (1/1) = OK".to_string(),
                status: StatusKind::Ok,
            },
            GroupLine {
                name: "ARTOIS".to_string(),
                line: "ARTOIS - ALTARO (1/1) = OK".to_string(),
                status: StatusKind::Ok,
            },
            GroupLine {
                name: "LYS".to_string(),
                line: "LYS - ALTARO (0/2) = NOK".to_string(),
                status: StatusKind::Nok,
            },
        ]);

        let digest = builder.finish(window());
        assert_eq!(
            digest.ok,
            vec!["a", "ARTOIS - ALTARO (1/1) = OK", "VSG2C - ALTARO (0/0) = OK"]
        );
        assert_eq!(digest.nok, vec!["LYS - ALTARO (0/2) = NOK"]);
        assert_eq!(digest.unknown, vec!["m", "u"]);
    }
}
