// src/wait/reference.rs

//! Parsing of condition references: PR/issue references and timestamps.
//!
//! Parse failures are returned as plain strings; the resolver attaches them
//! to the condition's `error` field rather than raising.

use std::fmt;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// A pull-request or issue reference on the code host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl fmt::Display for PrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

/// Parse either the compact `owner/repo#number` form or a full
/// `https://…/owner/repo/pull/N` (or `/issues/N`) URL.
pub fn parse_pr_ref(input: &str) -> Result<PrRef, String> {
    let s = input.trim();

    if let Some(rest) = s
        .strip_prefix("https://")
        .or_else(|| s.strip_prefix("http://"))
    {
        let mut parts = rest.split('/');
        let _host = parts.next();
        let owner = parts.next().unwrap_or("");
        let repo = parts.next().unwrap_or("");
        let kind = parts.next().unwrap_or("");
        let number = parts.next().unwrap_or("");

        if owner.is_empty() || repo.is_empty() || !matches!(kind, "pull" | "issues") {
            return Err(format!("unrecognized PR/issue URL: {input}"));
        }
        let number = leading_number(number)
            .ok_or_else(|| format!("missing PR/issue number in URL: {input}"))?;
        return Ok(PrRef {
            owner: owner.to_string(),
            repo: repo.to_string(),
            number,
        });
    }

    if let Some((repo_part, number_part)) = s.split_once('#') {
        let (owner, repo) = repo_part
            .split_once('/')
            .ok_or_else(|| format!("expected owner/repo#number, got: {input}"))?;
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return Err(format!("expected owner/repo#number, got: {input}"));
        }
        let number = number_part
            .parse::<u64>()
            .map_err(|_| format!("invalid PR/issue number in: {input}"))?;
        return Ok(PrRef {
            owner: owner.to_string(),
            repo: repo.to_string(),
            number,
        });
    }

    Err(format!("unrecognized reference: {input}"))
}

/// Parse the timestamp of a `time` condition.
///
/// Accepts RFC 3339 with a UTC marker or explicit offset, and a handful of
/// naive formats (interpreted in local time, never raising).
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>, String> {
    let s = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive_to_utc(naive));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive_to_utc(naive));
        }
    }

    Err(format!("unparseable timestamp: {input}"))
}

/// Naive timestamps are interpreted in local time; if the local instant is
/// ambiguous or skipped (DST), fall back to reading it as UTC.
fn naive_to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

fn leading_number(s: &str) -> Option<u64> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
