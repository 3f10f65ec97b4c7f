/// Endpoint file parsing
///
/// The endpoint file is line-oriented `key=value` text. Only `address` and
/// `port` are recognised; everything else is ignored. Nothing in here is
/// fatal: an unreadable file or a bad line is recorded in a `ConfigReport`
/// and the compiled-in defaults stay in place.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 27017;

/// Address/port pair identifying the monitored service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// A condition the loader recovered from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    /// The file could not be opened; defaults were used
    Unavailable { path: PathBuf, reason: String },
    /// A line had no `=`, no value, or was not valid UTF-8 and was skipped
    MalformedLine { line: usize },
    /// A `port` value that does not fit a TCP port was skipped
    InvalidPort { line: usize, value: String },
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigIssue::Unavailable { path, reason } => {
                write!(f, "{}: no such file... ({})", path.display(), reason)
            }
            ConfigIssue::MalformedLine { line } => {
                write!(f, "line {}: expected key=value, skipped", line)
            }
            ConfigIssue::InvalidPort { line, value } => {
                write!(f, "line {}: invalid port '{}', skipped", line, value)
            }
        }
    }
}

/// Recovered conditions collected while loading the endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigReport {
    pub issues: Vec<ConfigIssue>,
}

/// Reads the endpoint from `path`, falling back to defaults
pub fn load_endpoint<P: AsRef<Path>>(path: P) -> (Endpoint, ConfigReport) {
    let path = path.as_ref();
    let mut report = ConfigReport::default();

    match fs::read(path) {
        Ok(content) => {
            let endpoint = parse_endpoint(&content, &mut report);
            (endpoint, report)
        }
        Err(e) => {
            report.issues.push(ConfigIssue::Unavailable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
            (Endpoint::default(), report)
        }
    }
}

/// Parses endpoint file content; later keys override earlier ones
///
/// Lines are decoded one at a time, so a stray non-UTF-8 byte only costs the
/// line it appears on.
pub fn parse_endpoint(content: impl AsRef<[u8]>, report: &mut ConfigReport) -> Endpoint {
    let mut endpoint = Endpoint::default();

    for (index, raw) in content.as_ref().split(|&b| b == b'\n').enumerate() {
        let line_no = index + 1;
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.first() == Some(&b'#') {
            continue;
        }
        let Ok(line) = std::str::from_utf8(raw) else {
            report.issues.push(ConfigIssue::MalformedLine { line: line_no });
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            report.issues.push(ConfigIssue::MalformedLine { line: line_no });
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        if value.is_empty() {
            report.issues.push(ConfigIssue::MalformedLine { line: line_no });
            continue;
        }

        match key {
            "address" => endpoint.address = value.to_string(),
            "port" => match value.parse::<u16>() {
                Ok(port) => endpoint.port = port,
                Err(_) => report.issues.push(ConfigIssue::InvalidPort {
                    line: line_no,
                    value: value.to_string(),
                }),
            },
            _ => {}
        }
    }

    endpoint
}
