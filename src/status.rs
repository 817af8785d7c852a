use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusKind {
    Ok,
    Nok,
    Missing,
    Unknown,
}

impl StatusKind {
    pub fn label(self) -> &'static str {
        match self {
            StatusKind::Ok => "OK",
            StatusKind::Nok => "NOK",
            StatusKind::Missing => "Missing",
            StatusKind::Unknown => "Unknown",
        }
    }

    /// Sort tier for the final status list: NOK first, then Missing, then the rest.
    pub fn tier(self) -> u8 {
        match self {
            StatusKind::Nok => 0,
            StatusKind::Missing => 1,
            StatusKind::Ok | StatusKind::Unknown => 2,
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A status with an optional human-readable qualifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub kind: StatusKind,
    pub detail: Option<String>,
}

impl Status {
    pub fn new(kind: StatusKind) -> Self {
        Self { kind, detail: None }
    }

    pub fn with_detail(kind: StatusKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusKind::Ok)
    }

    pub fn nok() -> Self {
        Self::new(StatusKind::Nok)
    }

    pub fn missing() -> Self {
        Self::new(StatusKind::Missing)
    }

    pub fn unknown() -> Self {
        Self::new(StatusKind::Unknown)
    }

    pub fn is_ok(&self) -> bool {
        self.kind == StatusKind::Ok
    }

    pub fn is_nok(&self) -> bool {
        self.kind == StatusKind::Nok
    }

    pub fn is_missing(&self) -> bool {
        self.kind == StatusKind::Missing
    }

    pub fn detail(&self) -> &str {
        self.detail.as_deref().unwrap_or("")
    }
}

impl From<StatusKind> for Status {
    fn from(kind: StatusKind) -> Self {
        Status::new(kind)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) if !detail.is_empty() => write!(f, "{} ({})", self.kind, detail),
            _ => write!(f, "{}", self.kind),
        }
    }
}
