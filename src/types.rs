//! The shared data model: `Message`, `LayerVerdict`, `DefenceResult`,
//! `HandoffRecord`, `GateDecision`, `PatternEntry`, `WitnessEntry`,
//! `AgentEntry`.
//!
//! DESIGN DECISION: invariant-bearing constructors instead of bare structs
//! WHY: the invariants `is_blocked ⇔ verdict == BLOCKED` and `is_blocked ⇒
//! safe_input == ""` are worth enforcing once, at the boundary, rather than
//! trusting every call site to maintain them by hand.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Fixed role set a `Message` may flow between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Architect,
    Worker,
    Reviewer,
}

/// An immutable unit of agent-to-agent communication. Created by the
/// caller, consumed once by `Orchestrator::dispatch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from_role: Role,
    pub to_role: Role,
    pub content: String,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub metadata: HashMap<String, JsonValue>,
    #[serde(default)]
    pub prev_message_id: Option<String>,
}

impl Message {
    /// Build a message with a fresh id and the current timestamp.
    pub fn new(from_role: Role, to_role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from_role,
            to_role,
            content: content.into(),
            timestamp_ms: Utc::now().timestamp_millis(),
            metadata: HashMap::new(),
            prev_message_id: None,
        }
    }
}

/// The pipeline stage tags that appear in `DefenceResult.verdicts`, in the
/// order they can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LayerTag {
    L1,
    L2,
    CoherenceGate,
    L3,
    L4,
}

impl std::fmt::Display for LayerTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LayerTag::L1 => "L1",
            LayerTag::L2 => "L2",
            LayerTag::CoherenceGate => "CoherenceGate",
            LayerTag::L3 => "L3",
            LayerTag::L4 => "L4",
        };
        write!(f, "{}", s)
    }
}

/// One layer's outcome for a single message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerVerdict {
    pub layer_tag: LayerTag,
    pub passed: bool,
    pub score: f32,
    pub latency_ms: f32,
    #[serde(default)]
    pub details: HashMap<String, JsonValue>,
    #[serde(default)]
    pub error: Option<String>,
}

impl LayerVerdict {
    pub fn new(layer_tag: LayerTag, passed: bool, score: f32, latency_ms: f32) -> Self {
        Self {
            layer_tag,
            passed,
            score,
            latency_ms,
            details: HashMap::new(),
            error: None,
        }
    }

    pub fn with_details(mut self, details: HashMap<String, JsonValue>) -> Self {
        self.details = details;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// The outcome of a full pass through the fast path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Safe,
    Flagged,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefenceResult {
    pub verdict: Verdict,
    pub is_blocked: bool,
    pub safe_input: String,
    pub total_latency_ms: f32,
    pub per_layer_timings: HashMap<String, f32>,
    pub verdicts: Vec<LayerVerdict>,
    #[serde(default)]
    pub block_reason: Option<String>,
}

impl DefenceResult {
    /// Construct a result, enforcing the invariants above at the
    /// boundary rather than leaving them as contracts nobody checks.
    ///
    /// `is_blocked` is derived from `verdict`; `safe_input` is forced to
    /// empty when blocked so the two invariants cannot drift apart.
    pub fn new(
        verdict: Verdict,
        safe_input: String,
        total_latency_ms: f32,
        verdicts: Vec<LayerVerdict>,
        block_reason: Option<String>,
    ) -> Self {
        let is_blocked = verdict == Verdict::Blocked;
        let safe_input = if is_blocked { String::new() } else { safe_input };

        let mut per_layer_timings = HashMap::new();
        for v in &verdicts {
            per_layer_timings.insert(v.layer_tag.to_string(), v.latency_ms);
        }

        Self {
            verdict,
            is_blocked,
            safe_input,
            total_latency_ms,
            per_layer_timings,
            verdicts,
            block_reason,
        }
    }
}

/// A record of one successful handoff, built after a message clears the
/// fast path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub message_id: String,
    pub from: Role,
    pub to: Role,
    pub defence_result: DefenceResult,
    pub delivered_content: String,
    pub timestamp_ms: i64,
    pub content_hash: String,
    pub witness_recorded: bool,
}

impl HandoffRecord {
    /// `content_hash` is always `sha256(delivered_content)`; computing it
    /// here instead of trusting a caller-supplied value keeps the
    /// identity-for-the-ledger invariant true by construction.
    pub fn new(message_id: String, from: Role, to: Role, defence_result: DefenceResult) -> Self {
        let delivered_content = defence_result.safe_input.clone();
        let content_hash = sha256_hex(delivered_content.as_bytes());
        Self {
            message_id,
            from,
            to,
            defence_result,
            delivered_content,
            timestamp_ms: Utc::now().timestamp_millis(),
            content_hash,
            witness_recorded: false,
        }
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Which routing label the coherence gate chose for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateRoute {
    L3Gate,
    MinCutGate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateDecision {
    pub route: GateRoute,
    /// True when the 2-of-3 (or fail-open default) vote came down on
    /// the attack side. `route == L3Gate` always implies `false`.
    pub flagged: bool,
    pub lambda: f32,
    pub threshold: f32,
    pub db_size: u64,
    pub reason: String,
}

/// A row stored in an HNSW index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub category: String,
    pub raw_excerpt: String,
    pub severity: Option<String>,
}

/// The four kinds of fact a provenance chain entry can witness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WitnessType {
    Provenance = 1,
    Computation = 2,
    Search = 3,
    Deletion = 4,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WitnessEntry {
    pub witness_type: WitnessType,
    pub action_hash: String,
    pub metadata: JsonValue,
    pub prev_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Idle,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    pub id: String,
    pub role: Role,
    pub status: AgentStatus,
    pub spawned_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defence_result_blocked_forces_empty_safe_input() {
        let result = DefenceResult::new(
            Verdict::Blocked,
            "should be discarded".to_string(),
            5.0,
            vec![],
            Some("injection detected".to_string()),
        );
        assert!(result.is_blocked);
        assert_eq!(result.safe_input, "");
    }

    #[test]
    fn test_defence_result_safe_keeps_content() {
        let result = DefenceResult::new(
            Verdict::Safe,
            "hello".to_string(),
            5.0,
            vec![],
            None,
        );
        assert!(!result.is_blocked);
        assert_eq!(result.safe_input, "hello");
    }

    #[test]
    fn test_handoff_record_content_hash_matches() {
        let result = DefenceResult::new(Verdict::Safe, "hi".to_string(), 1.0, vec![], None);
        let record = HandoffRecord::new("m1".to_string(), Role::Worker, Role::Reviewer, result);
        assert_eq!(record.content_hash, sha256_hex(b"hi"));
        assert_eq!(record.delivered_content, "hi");
    }
}
