//! Message decoder: versioned payload → [`IncidentCommand`].
//!
//! Decoding runs in two stages. [`sniff_version`] reads only `msg_version`;
//! [`decode`] then hands the payload to the parser for that version family.
//! Adding a version means adding a match arm and a parser, without touching
//! the existing ones.
//!
//! | `msg_version` | Shape                          | Parser            |
//! |---------------|--------------------------------|-------------------|
//! | 1, 2          | flat incident record           | `decode_flat`     |
//! | 3             | command envelope               | `decode_envelope` |
//! | other         | none                           | UnknownSchemaVersion |
//!
//! Every [`DecodeError`] means "ignore this message": the consumer must keep
//! going on poison input.

use serde::Deserialize;

use crate::types::{IncidentCommand, IncidentRecord, RecordError};

/// Envelope command discriminators (v3).
const COMMAND_PUT: &str = "PUT";
const COMMAND_POST: &str = "POST";
const COMMAND_DELETE: &str = "DELETE";

/// Why a payload produced no command.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("message has no integer `msg_version`")]
    MissingSchemaVersion,

    #[error("invalid incident record: {0}")]
    InvalidRecord(#[from] RecordError),

    #[error("unknown schema version {0}")]
    UnknownSchemaVersion(i64),

    #[error("nothing to do for command {command:?}: {reason}")]
    Unactionable {
        command: String,
        reason: &'static str,
    },
}

// ─── Wire shapes ─────────────────────────────────────────────────────────────

/// First-pass view of a payload: only the version discriminator.
#[derive(Debug, Deserialize)]
struct VersionHeader {
    #[serde(default)]
    msg_version: Option<i64>,
}

/// v3 command envelope. Unknown members (e.g. `handler`) are ignored.
#[derive(Debug, Deserialize)]
struct IncidentEnvelope {
    #[serde(default)]
    command: String,
    msg_version: i64,
    #[serde(default)]
    incident: Option<IncidentRecord>,
    #[serde(default)]
    process_definition_id: Option<String>,
    #[serde(default)]
    process_instance_id: Option<String>,
}

// ─── Stage 1 ─────────────────────────────────────────────────────────────────

/// Read the schema version without validating the rest of the payload.
pub fn sniff_version(payload: &[u8]) -> Result<i64, DecodeError> {
    let header: VersionHeader = serde_json::from_slice(payload)?;
    header.msg_version.ok_or(DecodeError::MissingSchemaVersion)
}

// ─── Stage 2 ─────────────────────────────────────────────────────────────────

/// Decode a raw payload into the command it carries.
pub fn decode(payload: &[u8]) -> Result<IncidentCommand, DecodeError> {
    match sniff_version(payload)? {
        1 | 2 => decode_flat(payload),
        3 => decode_envelope(payload),
        other => Err(DecodeError::UnknownSchemaVersion(other)),
    }
}

/// v1/v2: the whole payload is the incident record.
fn decode_flat(payload: &[u8]) -> Result<IncidentCommand, DecodeError> {
    let record: IncidentRecord = serde_json::from_slice(payload)?;
    record.validate()?;
    Ok(IncidentCommand::CreateOrReplace(record))
}

/// v3: an envelope with a command discriminator.
fn decode_envelope(payload: &[u8]) -> Result<IncidentCommand, DecodeError> {
    let envelope: IncidentEnvelope = serde_json::from_slice(payload)?;

    match envelope.command.as_str() {
        COMMAND_PUT | COMMAND_POST => {
            let Some(mut record) = envelope.incident else {
                return Err(DecodeError::Unactionable {
                    command: envelope.command,
                    reason: "no incident attached",
                });
            };
            // The envelope version is authoritative for the embedded record.
            record.schema_version = Some(envelope.msg_version);
            record.validate()?;
            Ok(IncidentCommand::CreateOrReplace(record))
        }
        COMMAND_DELETE => {
            // Definition id takes precedence when both are present.
            if let Some(id) = non_empty(envelope.process_definition_id) {
                return Ok(IncidentCommand::DeleteByProcessDefinition(id));
            }
            if let Some(id) = non_empty(envelope.process_instance_id) {
                return Ok(IncidentCommand::DeleteByProcessInstance(id));
            }
            Err(DecodeError::Unactionable {
                command: envelope.command,
                reason: "no process_definition_id or process_instance_id",
            })
        }
        _ => Err(DecodeError::Unactionable {
            command: envelope.command,
            reason: "unsupported command",
        }),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
