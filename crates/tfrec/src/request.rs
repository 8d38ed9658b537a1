//! Request model for a single recording run.
//!
//! The wire shape mirrors the event consumed by the CLI:
//! `{station_id, ft, to, title, metadata: {...}, stream_url?}` with
//! timestamps in `YYYYMMDDHHMMSS` form.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Wire format of `ft`/`to` and of the playlist `seek` parameter.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

pub fn format_timestamp(instant: &NaiveDateTime) -> String {
    instant.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, PipelineError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).map_err(|e| {
        PipelineError::invalid_request(format!("invalid timestamp '{value}': {e}"))
    })
}

mod timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

/// Half-open on-air window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl BroadcastWindow {
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Descriptive tags embedded into the output container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub date: Option<String>,
    pub comment: Option<String>,
    /// Artwork URL
    pub img: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl Metadata {
    /// `(ffmpeg key, value)` pairs in directive order, null and empty values dropped.
    pub fn tags(&self) -> Vec<(&'static str, String)> {
        let date = self.normalized_date();
        [
            ("title", non_empty(&self.title).map(str::to_owned)),
            ("artist", non_empty(&self.artist).map(str::to_owned)),
            ("album", non_empty(&self.album).map(str::to_owned)),
            ("album_artist", non_empty(&self.album_artist).map(str::to_owned)),
            ("date", date),
            ("comment", non_empty(&self.comment).map(str::to_owned)),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .collect()
    }

    /// The `date` field as `YYYY-MM-DD`, `None` when absent or unparseable.
    pub fn normalized_date(&self) -> Option<String> {
        non_empty(&self.date)
            .and_then(parse_loose_date)
            .map(|d| d.format("%Y-%m-%d").to_string())
    }

    pub fn artwork_url(&self) -> Option<&str> {
        non_empty(&self.img)
    }
}

fn parse_loose_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S", TIMESTAMP_FORMAT] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(dt.date());
        }
    }
    ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// Replace characters that are not allowed in file names on common filesystems.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// One recording job. Immutable for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub station_id: String,
    #[serde(with = "timestamp")]
    pub ft: NaiveDateTime,
    #[serde(with = "timestamp")]
    pub to: NaiveDateTime,
    pub title: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Direct master playlist; bypasses the authenticated seek cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
}

impl DownloadRequest {
    pub fn from_json(raw: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(raw)
            .map_err(|e| PipelineError::invalid_request(format!("malformed request: {e}")))
    }

    pub fn window(&self) -> BroadcastWindow {
        BroadcastWindow {
            start: self.ft,
            end: self.to,
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.station_id.trim().is_empty() {
            return Err(PipelineError::invalid_request("station_id is empty"));
        }
        if self.title.trim().is_empty() {
            return Err(PipelineError::invalid_request("title is empty"));
        }
        if self.to < self.ft {
            return Err(PipelineError::invalid_request(format!(
                "window ends ({}) before it starts ({})",
                format_timestamp(&self.to),
                format_timestamp(&self.ft)
            )));
        }
        Ok(())
    }

    /// `<title>_<station>_<YYYYMMDDHHMM>.<ext>`
    pub fn output_file_name(&self, extension: &str) -> String {
        let prefix = self.ft.format("%Y%m%d%H%M");
        sanitize_file_name(&format!(
            "{}_{}_{}.{}",
            self.title, self.station_id, prefix, extension
        ))
    }

    /// Human readable on-air label, e.g. `2024-01-01 06:00-06:05`.
    pub fn on_air_label(&self) -> String {
        let day = self
            .metadata
            .normalized_date()
            .unwrap_or_else(|| self.ft.format("%Y-%m-%d").to_string());
        format!(
            "{} {}-{}",
            day,
            self.ft.format("%H:%M"),
            self.to.format("%H:%M")
        )
    }
}
