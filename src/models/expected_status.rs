use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::{GroupError, Result};

/// Accepted HTTP status codes for a URL test, e.g. `200/302` or `200-299/304`.
///
/// An empty spec accepts every status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpectedStatus {
    ranges: Vec<(u16, u16)>,
    raw: String,
}

impl ExpectedStatus {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn parse(spec: &str) -> Result<Self> {
        let raw = spec.trim();
        if raw.is_empty() || raw == "*" {
            return Ok(Self::default());
        }

        let mut ranges = Vec::new();
        for part in raw.split('/') {
            let part = part.trim();
            let (start, end) = match part.split_once('-') {
                Some((a, b)) => (parse_code(a, raw)?, parse_code(b, raw)?),
                None => {
                    let code = parse_code(part, raw)?;
                    (code, code)
                }
            };
            if start > end {
                return Err(GroupError::InvalidExpectedStatus(raw.to_string()));
            }
            ranges.push((start, end));
        }

        Ok(Self {
            ranges,
            raw: raw.to_string(),
        })
    }

    pub fn is_any(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn check(&self, status: u16) -> bool {
        self.ranges.is_empty()
            || self
                .ranges
                .iter()
                .any(|&(start, end)| start <= status && status <= end)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn parse_code(s: &str, raw: &str) -> Result<u16> {
    s.trim()
        .parse()
        .map_err(|_| GroupError::InvalidExpectedStatus(raw.to_string()))
}

impl FromStr for ExpectedStatus {
    type Err = GroupError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ExpectedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw.is_empty() {
            write!(f, "*")
        } else {
            write!(f, "{}", self.raw)
        }
    }
}

impl Serialize for ExpectedStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
