use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::borrow::Cow;

use crate::message::LogRecord;

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// `<time> [<source>] <OUT|ERR> <message>`
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    time: String,
    timestamp: i64,
    app_id: &'a str,
    source_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_id: Option<&'a str>,
    message_type: &'static str,
    message: Cow<'a, str>,
}

pub fn format_record(record: &LogRecord, format: OutputFormat) -> Result<String> {
    let line = match format {
        OutputFormat::Text => format!(
            "{} [{}] {} {}",
            format_timestamp(record.timestamp),
            record.source_name,
            record.message_type,
            record.payload_lossy().trim_end_matches('\n')
        ),
        OutputFormat::Json => serde_json::to_string(&JsonRecord {
            time: format_timestamp(record.timestamp),
            timestamp: record.timestamp,
            app_id: &record.app_id,
            source_name: &record.source_name,
            source_id: record.source_id.as_deref(),
            message_type: record.message_type.as_str(),
            message: record.payload_lossy(),
        })?,
    };
    Ok(line)
}

fn format_timestamp(nanos: i64) -> String {
    DateTime::<Utc>::from_timestamp_nanos(nanos).to_rfc3339_opts(SecondsFormat::Millis, true)
}
