//! Directory-of-`.eml` message source
//!
//! Each file holds one RFC 5322 message. Only what the engine needs is
//! extracted: sender, subject, a plain-text body, date and message id.

use crate::error::{DigestError, Result};
use crate::message::{Message, MessageSource};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Local};
use encoding_rs::{Encoding, UTF_8};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub struct MailDirSource {
    dir: PathBuf,
}

impl MailDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn read_message(path: &Path) -> Result<Message> {
        let bytes = std::fs::read(path)?;
        let raw = String::from_utf8_lossy(&bytes);
        let fallback_id = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let fallback_time: DateTime<Local> = std::fs::metadata(path)?.modified()?.into();
        Ok(parse_eml(&raw, &fallback_id, fallback_time))
    }
}

impl MessageSource for MailDirSource {
    fn search(&self, start: DateTime<Local>, end: DateTime<Local>) -> Result<Vec<Message>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            DigestError::RetrievalFailure(format!("{}: {e}", self.dir.display()))
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| DigestError::RetrievalFailure(e.to_string()))?
                .path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "eml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut messages = Vec::new();
        for path in &paths {
            match Self::read_message(path) {
                Ok(message) if message.timestamp >= start && message.timestamp <= end => {
                    messages.push(message)
                }
                Ok(message) => {
                    log::debug!("Skipping {} outside run window ({})", message.id, message.timestamp)
                }
                Err(e) => log::warn!("Failed to read {}: {e}", path.display()),
            }
        }

        messages.sort_by_key(|m| m.timestamp);
        log::info!(
            "Found {} messages in {} ({} files scanned)",
            messages.len(),
            self.dir.display(),
            paths.len()
        );
        Ok(messages)
    }
}

/// Parses a raw message. Missing headers fall back to the given id and time.
pub fn parse_eml(raw: &str, fallback_id: &str, fallback_time: DateTime<Local>) -> Message {
    let (header_block, body) = split_headers(raw);
    let headers = parse_headers(header_block);

    let subject = headers
        .get("subject")
        .map(|s| decode_mime_header(s))
        .unwrap_or_default();
    let sender = headers
        .get("from")
        .map(|s| decode_mime_header(s))
        .unwrap_or_default();
    let id = headers
        .get("message-id")
        .map(|s| s.trim_matches(['<', '>', ' ']).to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback_id.to_string());
    let timestamp = headers
        .get("date")
        .and_then(|d| DateTime::parse_from_rfc2822(d.trim()).ok())
        .map(|d| d.with_timezone(&Local))
        .unwrap_or(fallback_time);

    let body = extract_plain_body(&headers, body);

    Message {
        id,
        sender,
        subject,
        body,
        timestamp,
    }
}

fn split_headers(raw: &str) -> (&str, &str) {
    let lf = raw.find("\n\n").map(|i| (i, 2));
    let crlf = raw.find("\r\n\r\n").map(|i| (i, 4));
    let split = match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 < b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    match split {
        Some((pos, len)) => (&raw[..pos], &raw[pos + len..]),
        None => ("", raw),
    }
}

/// Lowercased header names; folded lines are joined, first occurrence wins.
fn parse_headers(block: &str) -> HashMap<String, String> {
    let mut headers: HashMap<String, String> = HashMap::new();
    let mut last_key: Option<String> = None;

    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(value) = last_key.as_ref().and_then(|k| headers.get_mut(k)) {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }

        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_lowercase();
            if headers.contains_key(&key) {
                last_key = None;
                continue;
            }
            headers.insert(key.clone(), value.trim().to_string());
            last_key = Some(key);
        }
    }

    headers
}

fn header_param(value: &str, name: &str) -> Option<String> {
    value.split(';').skip(1).find_map(|part| {
        let (key, val) = part.split_once('=')?;
        if key.trim().eq_ignore_ascii_case(name) {
            Some(val.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

fn bytes_to_string(bytes: &[u8], charset: &str) -> String {
    let encoding = Encoding::for_label(charset.trim().as_bytes()).unwrap_or(UTF_8);
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        log::debug!("Undecodable bytes in {} text", encoding.name());
    }
    text.into_owned()
}

fn decode_transfer(body: &str, encoding: &str, charset: &str) -> String {
    match encoding.trim().to_ascii_lowercase().as_str() {
        "base64" => {
            let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
            match general_purpose::STANDARD.decode(compact.as_bytes()) {
                Ok(bytes) => bytes_to_string(&bytes, charset),
                Err(e) => {
                    log::debug!("Invalid base64 body, keeping raw text: {e}");
                    body.to_string()
                }
            }
        }
        "quoted-printable" => {
            match quoted_printable::decode(body.as_bytes(), quoted_printable::ParseMode::Robust) {
                Ok(bytes) => bytes_to_string(&bytes, charset),
                Err(e) => {
                    log::debug!("Invalid quoted-printable body, keeping raw text: {e}");
                    body.to_string()
                }
            }
        }
        _ => body.to_string(),
    }
}

/// Picks the first `text/plain` part, descending into nested multiparts.
/// Falls back to the first decodable part with HTML tags stripped.
fn extract_plain_body(headers: &HashMap<String, String>, body: &str) -> String {
    let content_type = headers
        .get("content-type")
        .cloned()
        .unwrap_or_else(|| "text/plain".to_string());
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    let charset = header_param(&content_type, "charset").unwrap_or_default();
    let encoding = headers
        .get("content-transfer-encoding")
        .cloned()
        .unwrap_or_default();

    if mime.starts_with("multipart/") {
        let Some(boundary) = header_param(&content_type, "boundary") else {
            return body.to_string();
        };
        let delimiter = format!("--{boundary}");
        let parts: Vec<&str> = body
            .split(delimiter.as_str())
            .skip(1)
            .take_while(|part| !part.starts_with("--"))
            .collect();

        let mut fallback = None;
        for part in parts {
            let part = part.trim_start_matches(['\r', '\n']);
            let (part_headers, part_body) = split_headers(part);
            let part_headers = parse_headers(part_headers);
            let part_type = part_headers
                .get("content-type")
                .map(|t| t.to_ascii_lowercase())
                .unwrap_or_else(|| "text/plain".to_string());

            if part_type.starts_with("text/plain") || part_type.starts_with("multipart/") {
                let text = extract_plain_body(&part_headers, part_body);
                if !text.trim().is_empty() {
                    return text;
                }
            } else if fallback.is_none() && part_type.starts_with("text/") {
                fallback = Some(strip_html(&extract_plain_body(&part_headers, part_body)));
            }
        }
        return fallback.unwrap_or_default();
    }

    let text = decode_transfer(body, &encoding, &charset);
    if mime == "text/html" {
        strip_html(&text)
    } else {
        text
    }
}

fn strip_html(html: &str) -> String {
    static BREAKS: OnceLock<Regex> = OnceLock::new();
    static TAGS: OnceLock<Regex> = OnceLock::new();
    let breaks = BREAKS
        .get_or_init(|| Regex::new(r"(?i)<br\s*/?>|</p>|</tr>|</div>").expect("valid line break pattern"));
    let tags = TAGS.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid tag pattern"));
    let with_breaks = breaks.replace_all(html, "\n");
    tags.replace_all(&with_breaks, "")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Decodes RFC 2047 encoded words (`=?charset?B|Q?...?=`) in a header value.
pub fn decode_mime_header(value: &str) -> String {
    static ADJACENT: OnceLock<Regex> = OnceLock::new();
    static WORD: OnceLock<Regex> = OnceLock::new();
    let adjacent = ADJACENT.get_or_init(|| Regex::new(r"\?=\s+=\?").expect("valid encoded-word gap pattern"));
    let word = WORD.get_or_init(|| {
        Regex::new(r"=\?([^?]+)\?([BbQq])\?([^?]*)\?=").expect("valid encoded-word pattern")
    });

    let joined = adjacent.replace_all(value, "?==?");
    word.replace_all(&joined, |caps: &regex::Captures| {
        let charset = &caps[1];
        let payload = &caps[3];
        let decoded = if caps[2].eq_ignore_ascii_case("b") {
            general_purpose::STANDARD.decode(payload.as_bytes()).ok()
        } else {
            let underscored = payload.replace('_', " ");
            quoted_printable::decode(underscored.as_bytes(), quoted_printable::ParseMode::Robust)
                .ok()
        };
        match decoded {
            Some(bytes) => bytes_to_string(&bytes, charset),
            None => caps[0].to_string(),
        }
    })
    .to_string()
}
