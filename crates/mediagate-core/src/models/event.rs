//! Inbound event shapes.
//!
//! Upload events arrive either as S3 bucket notifications (`Records`) or as
//! EventBridge events (`detail`). Video moderation completions arrive as
//! Rekognition callbacks. Any of them may be wrapped in an SNS envelope when the
//! queue is subscribed to a topic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EventParseError;

/// A message pulled from a queue, before its body is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_id: String,
    pub body: String,
    /// How many times the queue has delivered this message (1 on first delivery).
    pub receive_count: u32,
}

impl InboundMessage {
    pub fn new(message_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            body: body.into(),
            receive_count: 1,
        }
    }
}

/// What the consumer should do with a message once its handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Remove from the queue (handled, or permanently unprocessable).
    Ack,
    /// Leave on the queue for redelivery.
    Retry,
}

/// An object-created notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadEvent {
    pub bucket: String,
    pub key: String,
    pub size: u64,
}

impl UploadEvent {
    /// Parse every upload referenced by a message body.
    ///
    /// S3 test events produce an empty list.
    pub fn parse_all(body: &str) -> Result<Vec<UploadEvent>, EventParseError> {
        let value: Value = serde_json::from_str(body)?;
        Self::from_value(unwrap_sns_envelope(value)?)
    }

    fn from_value(value: Value) -> Result<Vec<UploadEvent>, EventParseError> {
        if value.get("Event").and_then(Value::as_str) == Some("s3:TestEvent") {
            return Ok(Vec::new());
        }

        if let Some(detail) = value.get("detail") {
            let bucket = str_at(detail, &["bucket", "name"]).ok_or(EventParseError::MissingField(
                "detail.bucket.name",
            ))?;
            let key = str_at(detail, &["object", "key"])
                .ok_or(EventParseError::MissingField("detail.object.key"))?;
            let size = detail
                .get("object")
                .and_then(|o| o.get("size"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            return Ok(vec![UploadEvent {
                bucket: bucket.to_string(),
                key: key.to_string(),
                size,
            }]);
        }

        if let Some(records) = value.get("Records").and_then(Value::as_array) {
            return records
                .iter()
                .map(|record| {
                    let s3 = record
                        .get("s3")
                        .ok_or(EventParseError::MissingField("Records[].s3"))?;
                    let bucket = str_at(s3, &["bucket", "name"])
                        .ok_or(EventParseError::MissingField("Records[].s3.bucket.name"))?;
                    let raw_key = str_at(s3, &["object", "key"])
                        .ok_or(EventParseError::MissingField("Records[].s3.object.key"))?;
                    let size = s3
                        .get("object")
                        .and_then(|o| o.get("size"))
                        .and_then(Value::as_u64)
                        .unwrap_or(0);
                    Ok(UploadEvent {
                        bucket: bucket.to_string(),
                        key: decode_notification_key(raw_key)?,
                        size,
                    })
                })
                .collect();
        }

        Err(EventParseError::UnknownFormat)
    }
}

/// Completion status reported by a video moderation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoJobStatus {
    #[serde(rename = "SUCCEEDED")]
    Succeeded,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(other)]
    Other,
}

/// Location of the moderated video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoLocation {
    #[serde(rename = "S3Bucket")]
    pub s3_bucket: String,
    #[serde(rename = "S3ObjectName")]
    pub s3_object_name: String,
}

/// Completion callback published when a video moderation job finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VideoModerationCallback {
    pub job_id: String,
    pub status: VideoJobStatus,
    #[serde(rename = "API")]
    pub api: String,
    pub video: VideoLocation,
    #[serde(default)]
    pub job_tag: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl VideoModerationCallback {
    pub fn parse(body: &str) -> Result<Self, EventParseError> {
        let value: Value = serde_json::from_str(body)?;
        let value = unwrap_sns_envelope(value)?;
        Ok(serde_json::from_value(value)?)
    }
}

/// If `value` is an SNS notification, return the decoded inner message.
fn unwrap_sns_envelope(value: Value) -> Result<Value, EventParseError> {
    let is_envelope = value.get("Type").and_then(Value::as_str) == Some("Notification");
    match value.get("Message").and_then(Value::as_str) {
        Some(message) if is_envelope => Ok(serde_json::from_str(message)?),
        _ => Ok(value),
    }
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |v, segment| v.get(segment))
        .and_then(Value::as_str)
}

/// Bucket notifications URL-encode object keys, with spaces as `+`.
fn decode_notification_key(raw: &str) -> Result<String, EventParseError> {
    let plus_decoded = raw.replace('+', " ");
    urlencoding::decode(&plus_decoded)
        .map(|k| k.into_owned())
        .map_err(|_| EventParseError::InvalidValue {
            field: "Records[].s3.object.key",
            value: raw.to_string(),
        })
}
