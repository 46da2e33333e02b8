//! # Defence Core
//!
//! A defensive gateway that sits between cooperating agents in a
//! multi-agent LLM-orchestration platform. Every message is subjected to
//! a layered content-inspection pipeline; messages that clear it are
//! delivered with sanitized content and recorded in a tamper-evident
//! provenance chain, messages that fail are rejected with a structured
//! violation that callers cannot accidentally swallow.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                    Swarm Orchestrator / Kill Switch               │
//! │  dispatch(message) -> HandoffRecord | raises SecurityViolation   │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                      Defence Coordinator                          │
//! │   L1 scan -> L2 analyze -> Coherence Gate -> L3 safety -> L4 PII  │
//! │                                          (L5 learn, L6 stats async)│
//! ├───────────────────────────┬──────────────────────────────────────┤
//! │   Vector Coherence Gate   │   avg-λ, star-λ, partition-ratio      │
//! │   (attack + clean HNSW)   │   2-of-3 consensus, hysteresis route  │
//! ├───────────────────────────┴──────────────────────────────────────┤
//! │  Normalizer │ Embedder │ Chunker │ Redactor │ Circuit Breaker     │
//! ├──────────────────────────────────────────────────────────────────┤
//! │         Provenance Chain (SHAKE-256 hash-linked witness log)      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The fast path (L1 through L4) targets a ≤ 20 ms soft SLA; L5, L6, and
//! the three audit emitters (key-value audit, content-addressed ledger,
//! provenance chain) are fired as detached tasks after `dispatch`
//! returns. See `DESIGN.md` in the repository root for the rationale
//! behind each module's design.
//!
//! CLI entry points, config file loaders as standalone binaries,
//! transport adapters to external tool servers, document signing, demo
//! harnesses, dashboards, and LLM worker invocation are external
//! collaborators with the interfaces defined in [`collaborators`]; they
//! are not part of this crate.

pub mod chunker;
pub mod circuit_breaker;
pub mod coherence_gate;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod embedder;
pub mod error;
pub mod hnsw_index;
pub mod normalizer;
pub mod orchestrator;
pub mod provenance;
pub mod redactor;
pub mod types;

pub use chunker::{decontaminate, ChunkManifest, RedactedChunk};
pub use circuit_breaker::{BreakerOpen, CircuitBreaker, State as BreakerState};
pub use coherence_gate::CoherenceGate;
pub use collaborators::{
    HeuristicClient, LocalBridge, MCPBridge, MCPClient, PiiRecord, RVFBridge, SafetyRecord,
    ScanRecord, ThreatRecord,
};
pub use config::{DefenceConfig, Features, Thresholds, Timeouts};
pub use coordinator::Coordinator;
pub use embedder::{Embedder, EmbeddingResult, FastEmbedder, SemanticEmbedder, EMBEDDING_DIM};
pub use error::{Error, Result};
pub use hnsw_index::{PatternIndex, SearchHit};
pub use normalizer::canonicalize;
pub use orchestrator::{Orchestrator, SecurityViolation};
pub use provenance::{verify_chain, ProvenanceChain};
pub use redactor::{detect_and_redact, redact, RedactionOutcome};
pub use types::{
    AgentEntry, AgentStatus, DefenceResult, GateDecision, GateRoute, HandoffRecord, LayerTag,
    LayerVerdict, Message, PatternEntry, Role, Verdict, WitnessEntry, WitnessType,
};

pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 1;
pub const VERSION_PATCH: u32 = 0;

/// Returns the library version as a semantic version string.
pub fn version() -> String {
    format!("{}.{}.{}", VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string() {
        assert_eq!(version(), "0.1.0");
    }
}
