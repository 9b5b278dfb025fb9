//! Wire contracts shared with the build backend.
//!
//! The real-time channel carries `{"type": ..., "payload": ...}` records as
//! websocket text frames. The request/response side uses plain JSON bodies.

use crate::{JobId, ProjectId};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Upper bound for one text frame in either direction. Larger inbound frames
/// are rejected as a whole, so a backend must split output into smaller
/// `LOG_CHUNK` records.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

const INBOUND_TYPES: [&str; 3] = ["LOG_CHUNK", "JOB_UPDATE", "AI_STAGE_UPDATE"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("frame encode failed: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClientRole {
    Client,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub project_id: ProjectId,
    pub role: ClientRole,
}

/// Messages the client sends on the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMsg {
    Identify(IdentifyPayload),
}

impl OutboundMsg {
    pub fn identify_client(project_id: ProjectId) -> Self {
        OutboundMsg::Identify(IdentifyPayload {
            project_id,
            role: ClientRole::Client,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogChunkPayload {
    /// Missing and `null` chunks both decode as an empty line.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub chunk: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobUpdatePayload {
    pub status: String,
    #[serde(default)]
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub result: Option<String>,
}

impl JobUpdatePayload {
    /// Job id when the backend filled one in; empty ids count as absent.
    pub fn job_id(&self) -> Option<&JobId> {
        self.job_id.as_ref().filter(|id| !id.as_str().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiStagePayload {
    #[serde(default)]
    pub job_id: Option<JobId>,
    pub stage: String,
    #[serde(default)]
    pub message: String,
}

/// Messages the backend pushes to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMsg {
    LogChunk(LogChunkPayload),
    JobUpdate(JobUpdatePayload),
    AiStageUpdate(AiStagePayload),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
}

pub fn encode_outbound(msg: &OutboundMsg, max_frame_bytes: usize) -> Result<String, ProtocolError> {
    let encoded = serde_json::to_string(msg).map_err(|err| ProtocolError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(ProtocolError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

/// Decode one inbound text frame.
///
/// Frames that are valid records with an unrecognised `type` are reported as
/// `UnknownType` so callers can tell them apart from garbage.
pub fn decode_inbound(text: &str, max_frame_bytes: usize) -> Result<InboundMsg, ProtocolError> {
    if text.len() > max_frame_bytes {
        return Err(ProtocolError::OversizedFrame {
            size: text.len(),
            max: max_frame_bytes,
        });
    }
    let raw: RawFrame =
        serde_json::from_str(text).map_err(|err| ProtocolError::Decode(err.to_string()))?;
    if !INBOUND_TYPES.contains(&raw.kind.as_str()) {
        return Err(ProtocolError::UnknownType(raw.kind));
    }
    serde_json::from_str(text).map_err(|err| ProtocolError::Decode(err.to_string()))
}

/// Response body of job-creating endpoints. Only `id` is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRef {
    pub id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub logs: String,
}

/// Result of one completed log analysis. Every field is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(deserialize_with = "deserialize_confidence")]
    pub confidence: u8,
    pub analysis: String,
    pub suggestion: String,
}

fn deserialize_confidence<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    let raw = val
        .as_f64()
        .ok_or_else(|| de::Error::custom("expected number for confidence"))?;
    if !(0.0..=100.0).contains(&raw) {
        return Err(de::Error::custom(format!(
            "confidence out of range: {raw}"
        )));
    }
    Ok(raw.round() as u8)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UiAction {
    /// Launch or focus a window.
    Find,
    /// Type text into the focused window.
    Type,
    /// Press a key.
    Click,
}

impl std::str::FromStr for UiAction {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_uppercase().as_str() {
            "FIND" => Ok(UiAction::Find),
            "TYPE" => Ok(UiAction::Type),
            "CLICK" => Ok(UiAction::Click),
            other => Err(format!("Unknown UI action: {other}")),
        }
    }
}

/// Remote command body for `/api/projects/{id}/ai-command`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "UI_ACTION")]
pub struct UiActionCommand {
    pub action: UiAction,
    pub target: String,
    #[serde(default)]
    pub value: String,
}

/// Error body returned by the backend on non-success responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_matches_gateway_shape() {
        let msg = OutboundMsg::identify_client(ProjectId::from(42u64));
        let encoded = encode_outbound(&msg, DEFAULT_MAX_FRAME_BYTES).expect("encode");
        let value: Value = serde_json::from_str(&encoded).expect("json");
        assert_eq!(
            value,
            serde_json::json!({
                "type": "IDENTIFY",
                "payload": {"project_id": "42", "role": "CLIENT"}
            })
        );
    }

    #[test]
    fn decodes_log_chunk_and_job_update() {
        let chunk = decode_inbound(
            r#"{"type":"LOG_CHUNK","payload":{"chunk":"\u001b[31mERROR\u001b[0m: failed"}}"#,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect("log chunk");
        assert_eq!(
            chunk,
            InboundMsg::LogChunk(LogChunkPayload {
                chunk: "\u{1b}[31mERROR\u{1b}[0m: failed".to_string()
            })
        );

        let update = decode_inbound(
            r#"{"type":"JOB_UPDATE","payload":{"job_id":7,"status":"SUCCESS"}}"#,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect("job update");
        let InboundMsg::JobUpdate(payload) = update else {
            panic!("expected job update")
        };
        assert_eq!(payload.status, "SUCCESS");
        assert_eq!(payload.job_id(), Some(&JobId::new("7")));
    }

    #[test]
    fn missing_or_null_chunk_defaults_to_empty() {
        for text in [
            r#"{"type":"LOG_CHUNK","payload":{}}"#,
            r#"{"type":"LOG_CHUNK","payload":{"chunk":null}}"#,
        ] {
            let msg = decode_inbound(text, DEFAULT_MAX_FRAME_BYTES).expect("decode");
            assert_eq!(
                msg,
                InboundMsg::LogChunk(LogChunkPayload {
                    chunk: String::new()
                })
            );
        }
    }

    #[test]
    fn empty_job_id_counts_as_absent() {
        let payload = JobUpdatePayload {
            status: "RUNNING".to_string(),
            job_id: Some(JobId::new("")),
            result: None,
        };
        assert!(payload.job_id().is_none());
    }

    #[test]
    fn decodes_ai_stage_update() {
        let msg = decode_inbound(
            r#"{"type":"AI_STAGE_UPDATE","payload":{"job_id":"j1","stage":"Analyzing","message":"reading files"}}"#,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect("decode");
        let InboundMsg::AiStageUpdate(stage) = msg else {
            panic!("expected ai stage")
        };
        assert_eq!(stage.stage, "Analyzing");
        assert_eq!(stage.message, "reading files");
    }

    #[test]
    fn unknown_and_malformed_frames_are_distinguished() {
        let unknown = decode_inbound(r#"{"type":"COMMAND","payload":{}}"#, DEFAULT_MAX_FRAME_BYTES);
        assert_eq!(unknown, Err(ProtocolError::UnknownType("COMMAND".to_string())));

        let garbage = decode_inbound("not json", DEFAULT_MAX_FRAME_BYTES);
        assert!(matches!(garbage, Err(ProtocolError::Decode(_))));

        let bad_payload = decode_inbound(r#"{"type":"JOB_UPDATE","payload":{}}"#, DEFAULT_MAX_FRAME_BYTES);
        assert!(matches!(bad_payload, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let text = format!(
            r#"{{"type":"LOG_CHUNK","payload":{{"chunk":"{}"}}}}"#,
            "x".repeat(256)
        );
        let result = decode_inbound(&text, 64);
        assert!(matches!(result, Err(ProtocolError::OversizedFrame { .. })));
    }

    #[test]
    fn analysis_result_requires_every_field() {
        let ok: AnalysisResult = serde_json::from_str(
            r#"{"analysis":"I detected a build failure in the logs.","suggestion":"Try running 'npm install'.","confidence":85}"#,
        )
        .expect("full result");
        assert_eq!(ok.confidence, 85);

        let missing = serde_json::from_str::<AnalysisResult>(r#"{"analysis":"x","confidence":50}"#);
        assert!(missing.is_err());

        let out_of_range = serde_json::from_str::<AnalysisResult>(
            r#"{"analysis":"x","suggestion":"y","confidence":140}"#,
        );
        assert!(out_of_range.is_err());

        let fractional: AnalysisResult =
            serde_json::from_str(r#"{"analysis":"x","suggestion":"y","confidence":49.6}"#)
                .expect("fractional confidence");
        assert_eq!(fractional.confidence, 50);
    }

    #[test]
    fn ui_action_command_carries_type_tag() {
        let cmd = UiActionCommand {
            action: UiAction::Type,
            target: "Notepad".to_string(),
            value: "Hello World".to_string(),
        };
        let value = serde_json::to_value(&cmd).expect("encode");
        assert_eq!(
            value,
            serde_json::json!({
                "type": "UI_ACTION",
                "action": "TYPE",
                "target": "Notepad",
                "value": "Hello World"
            })
        );
        assert_eq!("click".parse::<UiAction>(), Ok(UiAction::Click));
        assert!("drag".parse::<UiAction>().is_err());
    }

    #[test]
    fn job_ref_tolerates_extra_fields() {
        let job: JobRef = serde_json::from_str(
            r#"{"id":"b2f1","project_id":"p1","type":"BUILD","status":"QUEUED","created_at":"0001-01-01T00:00:00Z"}"#,
        )
        .expect("job ref");
        assert_eq!(job.id.as_str(), "b2f1");
        assert_eq!(job.status.as_deref(), Some("QUEUED"));
    }
}
