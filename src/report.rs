//! Per-run outputs for a finished probe: the HTML diagnostics report and the
//! daily CSV ledger.

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::types::{Field, FillOutcome, ProbeResult, SelectorSpec};

/// Everything the report shows besides the result itself.
#[derive(Debug, Clone, Copy)]
pub struct ReportHeader<'a> {
    pub contest: &'a str,
    pub url: &'a str,
    pub selectors: &'a SelectorSpec,
    pub date: NaiveDate,
}

pub fn report_file_name(contest: &str, date: NaiveDate) -> String {
    format!("probe_{}_{}.html", slug(contest), date.format("%Y-%m-%d"))
}

fn slug(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "probe".to_string()
    } else {
        trimmed.to_string()
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

pub fn render_report(header: &ReportHeader<'_>, result: &ProbeResult) -> String {
    let title = format!("Probe {} - {}", header.contest, header.date.format("%Y-%m-%d"));
    let url = escape(header.url);

    let mut rows = String::new();
    for field in Field::ALL {
        let present = result.diagnostics.get(&field).copied().unwrap_or(false);
        let selector = header.selectors.locator(field).unwrap_or_default();
        let _ = writeln!(
            rows,
            "<tr><td>{}</td><td>{}</td><td><code>{}</code></td></tr>",
            field,
            if present { "✅" } else { "❌" },
            escape(selector)
        );
    }

    let mut summary = String::new();
    let _ = writeln!(summary, "<li>State: <strong>{}</strong></li>", result.label());
    let _ = writeln!(
        summary,
        "<li>Navigation: {} after {} attempt(s)</li>",
        if result.navigation_ok { "ok" } else { "failed" },
        result.navigation_attempts
    );
    if let Some(reason) = &result.navigation_error {
        let _ = writeln!(summary, "<li>Last navigation error: {}</li>", escape(reason));
    }
    if let Some(gate) = &result.gate {
        let _ = writeln!(summary, "<li>Gate: {}</li>", escape(&gate.to_string()));
    }
    if result.artifacts.is_empty() {
        let _ = writeln!(summary, "<li>Snapshot: none</li>");
    }
    for artifact in &result.artifacts {
        let _ = writeln!(
            summary,
            "<li>Snapshot ({}): <code>{}</code></li>",
            artifact.mode,
            escape(&artifact.path.display().to_string())
        );
    }

    let mut prefill = String::new();
    if let Some(report) = &result.prefill {
        let _ = writeln!(prefill, "<h2>Prefill</h2>\n<ul>");
        for (field, outcome) in &report.fields {
            let text = match outcome {
                FillOutcome::Filled => "filled".to_string(),
                FillOutcome::Skipped => "skipped".to_string(),
                FillOutcome::Failed(reason) => format!("failed: {}", escape(reason)),
            };
            let _ = writeln!(prefill, "<li>{field}: {text}</li>");
        }
        if report.consent_required {
            let _ = writeln!(
                prefill,
                "<li>Consent checkbox visible: left unchecked, manual action required</li>"
            );
        }
        if report.terms_declined {
            let _ = writeln!(prefill, "<li>Profile declines the terms</li>");
        }
        let _ = writeln!(prefill, "</ul>");
    }

    format!(
        r#"<!doctype html>
<html><head><meta charset="utf-8"><title>{title}</title></head>
<body>
<h1>{heading}</h1>
<p>URL: <a href="{url}" target="_blank">{url}</a></p>
<ul>
{summary}</ul>
<table border="1" cellpadding="6" cellspacing="0">
<tr><th>Field</th><th>Present</th><th>Selector</th></tr>
{rows}</table>
{prefill}</body></html>
"#,
        title = escape(&title),
        heading = escape(&format!("Probe {}", header.contest)),
    )
}

/// Render and write the report into `dir`, returning the file path.
pub fn write_report(
    dir: &Path,
    header: &ReportHeader<'_>,
    result: &ProbeResult,
) -> io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(report_file_name(header.contest, header.date));
    std::fs::write(&path, render_report(header, result))?;
    Ok(path)
}

pub fn csv_file_name(date: NaiveDate) -> String {
    format!("concours_{}.csv", date.format("%Y-%m-%d"))
}

/// One line of the daily CSV ledger. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CsvRow {
    pub date: String,
    pub site: String,
    pub contest: String,
    pub status: String,
    pub message: String,
    pub profile_email: String,
}

impl CsvRow {
    /// `contest` is the `site / kind` label carried by the configuration.
    pub fn new(
        recorded_at: NaiveDateTime,
        contest: &str,
        result: &ProbeResult,
        profile_email: &str,
    ) -> Self {
        let (site, kind) = match contest.split_once(" / ") {
            Some((site, kind)) => (site.trim(), kind.trim()),
            None => ("", contest.trim()),
        };
        Self {
            date: recorded_at.format("%Y-%m-%dT%H:%M:%S").to_string(),
            site: site.to_string(),
            contest: kind.to_string(),
            status: result.label().to_string(),
            message: outcome_message(result),
            profile_email: profile_email.to_string(),
        }
    }
}

fn outcome_message(result: &ProbeResult) -> String {
    if !result.navigation_ok {
        let reason = result.navigation_error.as_deref().unwrap_or("unknown error");
        return format!(
            "navigation failed after {} attempt(s): {reason}",
            result.navigation_attempts
        );
    }
    match (&result.gate, &result.prefill) {
        (Some(gate), _) => format!("login required ({gate})"),
        (None, Some(report)) => {
            let filled: Vec<&str> = report.filled().map(|field| field.as_str()).collect();
            let mut message = if filled.is_empty() {
                "prefill left every field empty".to_string()
            } else {
                format!("prefilled {}", filled.join(", "))
            };
            if report.consent_required {
                message.push_str("; consent checkbox left unchecked");
            }
            message
        }
        (None, None) => "form not found".to_string(),
    }
}

/// Append `row` to the ledger for its day inside `dir`, writing the header
/// line when the file is new. Returns the file path.
pub fn append_csv_row(dir: &Path, date: NaiveDate, row: &CsvRow) -> io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(csv_file_name(date));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    let is_new = file.metadata()?.len() == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(is_new)
        .from_writer(file);
    writer.serialize(row)?;
    writer.flush()?;
    Ok(path)
}
