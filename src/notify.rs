//! Digest delivery.
//!
//! Notifiers render a finished `Digest`. The HTML notifier embeds a status
//! chart when one can be rendered and falls back to text-only otherwise.

use crate::error::{DigestError, Result};
use crate::report::{Digest, StatusCounts};
use std::f64::consts::PI;
use std::fmt::Write as _;
use std::path::PathBuf;

const OK_COLOR: &str = "#1D8348";
const NOK_COLOR: &str = "#C0392B";
const MISSING_COLOR: &str = "#F39C12";
const INFO_COLOR: &str = "#2E86C1";

pub const DIGEST_TITLE: &str = "Daily backup report";

pub trait Notifier {
    fn send(&self, digest: &Digest) -> Result<()>;
}

/// Renders the OK / NOK / Missing breakdown as an image.
pub trait ChartRenderer {
    fn render(&self, counts: &StatusCounts) -> Result<String>;
}

/// Inline SVG pie chart.
#[derive(Debug, Clone, Copy)]
pub struct SvgPieChart {
    pub width: u32,
    pub height: u32,
}

impl Default for SvgPieChart {
    fn default() -> Self {
        Self {
            width: 450,
            height: 250,
        }
    }
}

impl ChartRenderer for SvgPieChart {
    fn render(&self, counts: &StatusCounts) -> Result<String> {
        let slices = [
            ("OK", counts.ok, OK_COLOR),
            ("NOK", counts.nok, NOK_COLOR),
            ("Missing", counts.missing, MISSING_COLOR),
        ];
        let total: usize = slices.iter().map(|(_, n, _)| n).sum();
        if total == 0 {
            return Err(DigestError::MissingSecondaryArtifact {
                artifact: "status chart".to_string(),
                reason: "no clients to chart".to_string(),
            });
        }

        let radius = f64::from(self.height.min(self.width)) / 2.0 - 10.0;
        let (cx, cy) = (radius + 10.0, f64::from(self.height) / 2.0);

        let mut svg = String::new();
        let _ = write!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{}" height="{}" viewBox="0 0 {} {}">"#,
            self.width, self.height, self.width, self.height
        );

        let mut angle = -PI / 2.0;
        for (label, count, color) in slices.iter().filter(|(_, n, _)| *n > 0) {
            if *count == total {
                let _ = write!(
                    svg,
                    r#"<circle cx="{:.2}" cy="{:.2}" r="{:.2}" fill="{}"><title>{}</title></circle>"#,
                    cx, cy, radius, color, label
                );
                break;
            }
            let sweep = 2.0 * PI * (*count as f64) / (total as f64);
            let (x1, y1) = (cx + radius * angle.cos(), cy + radius * angle.sin());
            angle += sweep;
            let (x2, y2) = (cx + radius * angle.cos(), cy + radius * angle.sin());
            let large_arc = if sweep > PI { 1 } else { 0 };
            let _ = write!(
                svg,
                r#"<path d="M {cx:.2} {cy:.2} L {x1:.2} {y1:.2} A {radius:.2} {radius:.2} 0 {large_arc} 1 {x2:.2} {y2:.2} Z" fill="{color}"><title>{label}</title></path>"#
            );
        }

        let legend_x = cx + radius + 30.0;
        for (i, (label, count, color)) in slices.iter().enumerate() {
            let y = 40.0 + 30.0 * i as f64;
            let _ = write!(
                svg,
                r#"<rect x="{:.2}" y="{:.2}" width="14" height="14" fill="{}"/><text x="{:.2}" y="{:.2}" font-family="Arial" font-size="14">{} ({})</text>"#,
                legend_x,
                y,
                color,
                legend_x + 22.0,
                y + 12.0,
                label,
                count
            );
        }
        svg.push_str("</svg>");
        Ok(svg)
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

fn line_color(line: &str) -> &'static str {
    if line.ends_with("= NOK") {
        NOK_COLOR
    } else if line.ends_with("= Missing") {
        MISSING_COLOR
    } else if line.ends_with("= OK") {
        OK_COLOR
    } else {
        INFO_COLOR
    }
}

fn html_section(html: &mut String, title: &str, color: &str, lines: &[String]) {
    if lines.is_empty() {
        return;
    }
    let _ = write!(html, r#"<h3 style="color:{color};">{}</h3><ul style="color:{color};">"#, title);
    for line in lines {
        let _ = write!(html, "<li>{}</li>", escape_html(line));
    }
    html.push_str("</ul>");
}

/// HTML document for `digest`; `chart` is an inline SVG fragment.
pub fn render_html(digest: &Digest, chart: Option<&str>) -> String {
    let mut html = String::new();
    let _ = write!(
        html,
        r#"<!DOCTYPE html><html><head><meta charset="utf-8"><title>{DIGEST_TITLE}</title></head><body><div style="font-family: Arial, sans-serif; font-size: 14px;"><h2 style="color:{INFO_COLOR};">{DIGEST_TITLE}</h2><p>Period: {} to {}.</p>"#,
        digest.window.start.format("%a %d/%m/%Y %H:%M"),
        digest.window.end.format("%a %d/%m/%Y %H:%M:%S %z"),
    );

    if let Some(svg) = chart {
        let _ = write!(html, r#"<div style="text-align: center; margin: 20px 0;">{}</div>"#, svg);
    }

    let _ = write!(
        html,
        r#"<hr><h3 style="color:{INFO_COLOR};">Registered clients (final status)</h3><ul style="list-style-type: none; padding-left: 0;">"#
    );
    for line in &digest.final_lines {
        let _ = write!(
            html,
            r#"<li style="color:{}">{}</li>"#,
            line_color(line),
            escape_html(line)
        );
    }
    html.push_str("</ul><hr>");

    html_section(&mut html, "Failures (NOK)", NOK_COLOR, &digest.nok);
    html_section(&mut html, "Unreferenced messages and missing families", MISSING_COLOR, &digest.unknown);
    html_section(&mut html, "Successful messages", OK_COLOR, &digest.ok);
    html.push_str("</div></body></html>\n");
    html
}

/// Plain-text rendition, also used for the console.
pub fn render_text(digest: &Digest) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "📊 {}", DIGEST_TITLE);
    let _ = writeln!(
        text,
        "Period: {} to {}",
        digest.window.start.format("%d/%m/%Y %H:%M"),
        digest.window.end.format("%d/%m/%Y %H:%M")
    );
    let _ = writeln!(
        text,
        "✅ OK: {}  ❌ NOK: {}  ⚠️  Missing: {}",
        digest.counts.ok, digest.counts.nok, digest.counts.missing
    );

    let sections: [(&str, &[String]); 4] = [
        ("Final status", &digest.final_lines),
        ("❌ Failures", &digest.nok),
        ("⚠️  Unreferenced", &digest.unknown),
        ("✅ Successful", &digest.ok),
    ];
    for (title, lines) in sections {
        if lines.is_empty() {
            continue;
        }
        let _ = writeln!(text, "\n{}:", title);
        for line in lines {
            let _ = writeln!(text, "  {}", line);
        }
    }
    text
}

/// Writes the HTML digest to a file.
pub struct HtmlNotifier {
    path: PathBuf,
    chart: Box<dyn ChartRenderer>,
}

impl HtmlNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_chart(path, Box::new(SvgPieChart::default()))
    }

    pub fn with_chart(path: impl Into<PathBuf>, chart: Box<dyn ChartRenderer>) -> Self {
        Self {
            path: path.into(),
            chart,
        }
    }
}

impl Notifier for HtmlNotifier {
    fn send(&self, digest: &Digest) -> Result<()> {
        let chart = match self.chart.render(&digest.counts) {
            Ok(svg) => Some(svg),
            Err(e) => {
                log::warn!("Digest sent without chart: {}", e);
                None
            }
        };
        std::fs::write(&self.path, render_html(digest, chart.as_deref()))
            .map_err(|e| DigestError::Notify(format!("{}: {}", self.path.display(), e)))?;
        log::info!("Digest written to {}", self.path.display());
        Ok(())
    }
}

/// Text or JSON digest on stdout, or in a file when a path is given.
pub struct ConsoleNotifier {
    output: Option<PathBuf>,
    json: bool,
}

impl ConsoleNotifier {
    pub fn text(output: Option<PathBuf>) -> Self {
        Self { output, json: false }
    }

    pub fn json(output: Option<PathBuf>) -> Self {
        Self { output, json: true }
    }
}

impl Notifier for ConsoleNotifier {
    fn send(&self, digest: &Digest) -> Result<()> {
        let rendered = if self.json {
            serde_json::to_string_pretty(digest).map_err(|e| DigestError::Notify(e.to_string()))? + "\n"
        } else {
            render_text(digest)
        };
        match &self.output {
            Some(path) => std::fs::write(path, rendered)
                .map_err(|e| DigestError::Notify(format!("{}: {}", path.display(), e))),
            None => {
                print!("{}", rendered);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::RunWindow;
    use chrono::{Local, TimeZone};

    fn digest() -> Digest {
        Digest {
            window: RunWindow::ending_at(Local.with_ymd_and_hms(2025, 3, 5, 8, 0, 0).unwrap(), 17),
            ok: vec!["ACME | Subject: Backup OK = OK".to_string()],
            nok: vec!["R&D <lab> | Subject: failed = NOK".to_string()],
            unknown: vec![],
            final_lines: vec!["R&D <lab> = NOK".to_string(), "ACME = OK".to_string()],
            counts: StatusCounts {
                ok: 1,
                nok: 1,
                missing: 0,
                unknown: 0,
            },
        }
    }

    struct BrokenChart;

    impl ChartRenderer for BrokenChart {
        fn render(&self, _counts: &StatusCounts) -> Result<String> {
            Err(DigestError::MissingSecondaryArtifact {
                artifact: "status chart".to_string(),
                reason: "renderer offline".to_string(),
            })
        }
    }

    #[test]
    fn test_html_digest_content() {
        let html = render_html(&digest(), Some("<svg></svg>"));
        assert!(html.contains("<svg></svg>"));
        assert!(html.contains("R&amp;D &lt;lab&gt; = NOK"));
        assert!(html.contains(r#"<li style="color:#1D8348">ACME = OK</li>"#));
        assert!(html.contains("Failures (NOK)"));
        assert!(!html.contains("Unreferenced messages"));
        assert!(html.find("R&amp;D &lt;lab&gt; = NOK").unwrap() < html.find("ACME = OK").unwrap());
    }

    #[test]
    fn test_pie_chart() {
        let svg = SvgPieChart::default().render(&digest().counts).unwrap();
        assert!(svg.starts_with("<svg"));
        assert_eq!(svg.matches("<path").count(), 2);
        assert!(svg.contains("Missing (0)"));

        let single = StatusCounts {
            ok: 3,
            ..Default::default()
        };
        let svg = SvgPieChart::default().render(&single).unwrap();
        assert!(svg.contains("<circle"));

        let err = SvgPieChart::default().render(&StatusCounts::default()).unwrap_err();
        assert!(matches!(err, DigestError::MissingSecondaryArtifact { .. }));
    }

    #[test]
    fn test_chart_failure_degrades_to_text_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("digest.html");
        HtmlNotifier::with_chart(&path, Box::new(BrokenChart))
            .send(&digest())
            .unwrap();

        let html = std::fs::read_to_string(&path).unwrap();
        assert!(!html.contains("<svg"));
        assert!(html.contains("ACME = OK"));
    }

    #[test]
    fn test_text_and_json_renditions() {
        let text = render_text(&digest());
        assert!(text.contains("Final status:\n  R&D <lab> = NOK\n  ACME = OK"));
        assert!(!text.contains("Unreferenced"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("digest.json");
        ConsoleNotifier::json(Some(path.clone())).send(&digest()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["counts"]["nok"], 1);
        assert_eq!(value["final_lines"][1], "ACME = OK");
    }
}
