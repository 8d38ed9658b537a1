//! Structured run summary consumed by the external notifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::PipelineError;
use crate::pipeline::{OutputDescriptor, PipelineStage};

pub const SERVICE_NAME: &str = "tfrec";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl ReportField {
    fn new(name: &str, value: impl Into<String>, inline: bool) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            inline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub service: String,
    pub status: ReportStatus,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<ReportField>,
    pub timestamp: DateTime<Utc>,
}

impl RunReport {
    pub fn success(output: &OutputDescriptor) -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
            status: ReportStatus::Ok,
            title: "Download complete".to_string(),
            description: None,
            fields: vec![
                ReportField::new("File", output.location.clone(), false),
                ReportField::new("Title", output.title.clone(), false),
                ReportField::new("On Air", output.on_air.clone(), true),
                ReportField::new("Size", output.human_size(), true),
            ],
            timestamp: Utc::now(),
        }
    }

    pub fn failure(stage: PipelineStage, error: &PipelineError) -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
            status: ReportStatus::Error,
            title: "Download failed".to_string(),
            description: Some(format!("{}\n```\n{}\n```", error.kind(), error)),
            fields: vec![ReportField::new("Stage", stage.as_str(), true)],
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReportStatus::Ok
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// `"12.34 MB"`, mebibytes with two decimals.
pub fn human_size(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / 1024.0 / 1024.0)
}
