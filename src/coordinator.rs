//! Defence Coordinator: sequences L1 (scan) → L2 (analyze) → Coherence
//! Gate → L3 (safety aggregation) → L4 (PII redaction), then fires L5
//! (learn) and L6 (stats) asynchronously on a pass. Enforces per-layer
//! latency budgets as soft warnings recorded on each `LayerVerdict`,
//! never as aborts — a layer running long is logged, not cancelled.
//!
//! The fail policy is the load-bearing part of this module: L1/L2/
//! CoherenceGate fail open (an internal error behaves as a pass with
//! score 0), L3 fails closed (an internal error behaves as BLOCKED), L4
//! fails open by default but can be configured to fail closed. L5/L6
//! errors are logged and never affect the returned `DefenceResult`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::warn;

use crate::circuit_breaker::CircuitBreaker;
use crate::coherence_gate::CoherenceGate;
use crate::collaborators::MCPClient;
use crate::config::DefenceConfig;
use crate::embedder::Embedder;
use crate::hnsw_index::PatternIndex;
use crate::normalizer::canonicalize;
use crate::types::{DefenceResult, LayerTag, LayerVerdict, Verdict};

const L1_BUDGET_MS: f32 = 2.0;
const L2_BUDGET_MS: f32 = 8.0;
const L3_BUDGET_MS: f32 = 1.0;
const L4_BUDGET_MS: f32 = 5.0;

/// Score recorded on a layer whose score is the whole point when it
/// has already been found "clean" — i.e. no risk contribution at all.
const CLEAN_SCORE: f32 = 0.0;
const PII_PRESENT_SCORE: f32 = 0.3;

pub struct Coordinator {
    client: Arc<dyn MCPClient>,
    embedder: Arc<dyn Embedder>,
    attack_index: Arc<PatternIndex>,
    clean_index: Arc<PatternIndex>,
    config: DefenceConfig,
    l1_breaker: Option<CircuitBreaker>,
    l4_breaker: Option<CircuitBreaker>,
}

impl Coordinator {
    pub fn new(
        client: Arc<dyn MCPClient>,
        embedder: Arc<dyn Embedder>,
        attack_index: Arc<PatternIndex>,
        clean_index: Arc<PatternIndex>,
        config: DefenceConfig,
    ) -> Self {
        Self {
            client,
            embedder,
            attack_index,
            clean_index,
            config,
            l1_breaker: None,
            l4_breaker: None,
        }
    }

    /// Guard the L1/L4 external-tool calls with circuit breakers. Only
    /// these two layers talk to a configurable external backend;
    /// L2/L3/CoherenceGate never go through a breaker.
    pub fn with_circuit_breakers(mut self, l1: CircuitBreaker, l4: CircuitBreaker) -> Self {
        self.l1_breaker = Some(l1);
        self.l4_breaker = Some(l4);
        self
    }

    pub fn config(&self) -> &DefenceConfig {
        &self.config
    }

    /// Run the full fast path for one message body, then fire L5/L6 as
    /// detached tasks if the message passed. Never returns an error —
    /// every failure mode is absorbed per the fail-policy table and
    /// surfaces only as a field on the verdict or result.
    pub async fn process(&self, content: &str) -> DefenceResult {
        let total_start = Instant::now();
        let mut verdicts = Vec::with_capacity(5);

        let l1_score = self.run_l1(content, &mut verdicts).await;
        let l2_score = self.run_l2(content, &mut verdicts).await;

        self.run_coherence_gate(content, &mut verdicts);

        let l3_start = Instant::now();
        let (verdict, block_reason, final_score) =
            self.run_l3(content, l1_score, l2_score, &mut verdicts, l3_start).await;

        if verdict == Verdict::Blocked {
            let total_latency_ms = total_start.elapsed().as_secs_f32() * 1000.0;
            self.warn_if_over_budget("fast_path", total_latency_ms, self.config.timeouts.fast_path_ms);
            return DefenceResult::new(verdict, String::new(), total_latency_ms, verdicts, block_reason);
        }

        let l4_start = Instant::now();
        let (safe_input, final_verdict, final_block_reason) =
            self.run_l4(content, verdict, &mut verdicts, l4_start).await;

        let total_latency_ms = total_start.elapsed().as_secs_f32() * 1000.0;
        self.warn_if_over_budget("fast_path", total_latency_ms, self.config.timeouts.fast_path_ms);

        let result = DefenceResult::new(
            final_verdict.clone(),
            safe_input,
            total_latency_ms,
            verdicts,
            final_block_reason,
        );

        if final_verdict != Verdict::Blocked {
            self.fire_async_learn_and_stats(content.to_string(), final_score);
        }

        result
    }

    async fn run_l1(&self, content: &str, verdicts: &mut Vec<LayerVerdict>) -> f32 {
        let start = Instant::now();

        if let Some(breaker) = &self.l1_breaker {
            if breaker.before_call().is_err() {
                let latency = self.record_latency(start, L1_BUDGET_MS, LayerTag::L1);
                verdicts.push(LayerVerdict::new(LayerTag::L1, true, CLEAN_SCORE, latency).with_error("circuit breaker open"));
                return CLEAN_SCORE;
            }
        }

        match self.client.scan_input(content).await {
            Ok(record) => {
                if let Some(breaker) = &self.l1_breaker {
                    breaker.on_success();
                }
                let latency = self.record_latency(start, L1_BUDGET_MS, LayerTag::L1);
                let details = HashMap::from([("flagged_terms".to_string(), json!(record.flagged_terms))]);
                verdicts.push(LayerVerdict::new(LayerTag::L1, record.passed, record.score, latency).with_details(details));
                record.score
            }
            Err(e) => {
                if let Some(breaker) = &self.l1_breaker {
                    breaker.on_failure();
                }
                let latency = self.record_latency(start, L1_BUDGET_MS, LayerTag::L1);
                // Fail-open: absorbed as a pass, never propagated.
                verdicts.push(LayerVerdict::new(LayerTag::L1, true, CLEAN_SCORE, latency).with_error(e.to_string()));
                CLEAN_SCORE
            }
        }
    }

    async fn run_l2(&self, content: &str, verdicts: &mut Vec<LayerVerdict>) -> f32 {
        let start = Instant::now();
        match self.client.analyze_threats(content).await {
            Ok(record) => {
                let latency = self.record_latency(start, L2_BUDGET_MS, LayerTag::L2);
                let details = HashMap::from([
                    ("suspicious".to_string(), json!(record.suspicious)),
                    ("dtw".to_string(), json!(record.dtw)),
                    ("vector_matches".to_string(), json!(record.vector_matches)),
                ]);
                let passed = !record.suspicious;
                verdicts.push(LayerVerdict::new(LayerTag::L2, passed, record.confidence, latency).with_details(details));
                record.confidence
            }
            Err(e) => {
                let latency = self.record_latency(start, L2_BUDGET_MS, LayerTag::L2);
                verdicts.push(LayerVerdict::new(LayerTag::L2, true, CLEAN_SCORE, latency).with_error(e.to_string()));
                CLEAN_SCORE
            }
        }
    }

    /// Observational: recorded into `verdicts` but its score never feeds
    /// L3's aggregation — the gate fails open internally (see
    /// `coherence_gate.rs`) and this wrapper adds no further fail policy.
    fn run_coherence_gate(&self, content: &str, verdicts: &mut Vec<LayerVerdict>) {
        let start = Instant::now();
        let normalized = canonicalize(content);
        let gate = CoherenceGate::new(&*self.embedder, &*self.attack_index, &*self.clean_index);
        let decision = gate.evaluate(&normalized);
        let latency = start.elapsed().as_secs_f32() * 1000.0;

        let score = if decision.flagged { 1.0 } else { 0.0 };
        let details = HashMap::from([
            ("route".to_string(), json!(format!("{:?}", decision.route))),
            ("lambda".to_string(), json!(decision.lambda)),
            ("threshold".to_string(), json!(decision.threshold)),
            ("db_size".to_string(), json!(decision.db_size)),
            ("reason".to_string(), json!(decision.reason)),
        ]);
        verdicts.push(LayerVerdict::new(LayerTag::CoherenceGate, !decision.flagged, score, latency).with_details(details));
    }

    async fn run_l3(
        &self,
        content: &str,
        l1_score: f32,
        l2_score: f32,
        verdicts: &mut Vec<LayerVerdict>,
        start: Instant,
    ) -> (Verdict, Option<String>, f32) {
        match self.client.check_safety(content, l1_score, l2_score).await {
            Ok(safety) => {
                let latency = self.record_latency(start, L3_BUDGET_MS, LayerTag::L3);
                let final_score = safety.final_score;
                let (verdict, reason) = classify(final_score, &self.config);
                let passed = verdict != Verdict::Blocked;
                verdicts.push(LayerVerdict::new(LayerTag::L3, passed, final_score, latency));
                (verdict, reason, final_score)
            }
            Err(e) => {
                let latency = self.record_latency(start, L3_BUDGET_MS, LayerTag::L3);
                tracing::error!(error = %e, "L3 safety gate failed; tripping fail-closed");
                verdicts.push(LayerVerdict::new(LayerTag::L3, false, 1.0, latency).with_error(e.to_string()));
                (Verdict::Blocked, Some("Safety gate internal error".to_string()), 1.0)
            }
        }
    }

    async fn run_l4(
        &self,
        content: &str,
        verdict: Verdict,
        verdicts: &mut Vec<LayerVerdict>,
        start: Instant,
    ) -> (String, Verdict, Option<String>) {
        if let Some(breaker) = &self.l4_breaker {
            if breaker.before_call().is_err() {
                return self.l4_failure(content, verdict, verdicts, start, "circuit breaker open");
            }
        }

        match self.client.detect_pii(content).await {
            Ok(record) => {
                if let Some(breaker) = &self.l4_breaker {
                    breaker.on_success();
                }
                let latency = self.record_latency(start, L4_BUDGET_MS, LayerTag::L4);
                let score = if record.has_pii { PII_PRESENT_SCORE } else { CLEAN_SCORE };
                let details = HashMap::from([
                    ("has_pii".to_string(), json!(record.has_pii)),
                    ("entities_found".to_string(), json!(record.entities_found)),
                ]);
                verdicts.push(LayerVerdict::new(LayerTag::L4, true, score, latency).with_details(details));
                (record.redacted_text, verdict, None)
            }
            Err(e) => {
                if let Some(breaker) = &self.l4_breaker {
                    breaker.on_failure();
                }
                self.l4_failure(content, verdict, verdicts, start, &e.to_string())
            }
        }
    }

    fn l4_failure(
        &self,
        content: &str,
        verdict: Verdict,
        verdicts: &mut Vec<LayerVerdict>,
        start: Instant,
        error: &str,
    ) -> (String, Verdict, Option<String>) {
        let latency = self.record_latency(start, L4_BUDGET_MS, LayerTag::L4);
        if self.config.features.fail_open_detection {
            verdicts.push(LayerVerdict::new(LayerTag::L4, true, CLEAN_SCORE, latency).with_error(error));
            (content.to_string(), verdict, None)
        } else {
            tracing::error!(error, "L4 PII redaction failed with fail_open_detection disabled; tripping fail-closed");
            verdicts.push(LayerVerdict::new(LayerTag::L4, false, 1.0, latency).with_error(error));
            (String::new(), Verdict::Blocked, Some("PII redaction internal error".to_string()))
        }
    }

    fn fire_async_learn_and_stats(&self, content: String, final_score: f32) {
        if self.config.features.enable_learning {
            let client = self.client.clone();
            let text = content.clone();
            tokio::spawn(async move {
                if let Err(e) = client.learn(&text, true).await {
                    warn!(error = %e, "L5 learn task failed");
                }
            });
        }

        if self.config.features.enable_audit {
            let client = self.client.clone();
            tokio::spawn(async move {
                if let Err(e) = client.record_stats(true, final_score).await {
                    warn!(error = %e, "L6 stats task failed");
                }
            });
        }
    }

    fn record_latency(&self, start: Instant, budget_ms: f32, tag: LayerTag) -> f32 {
        let latency = start.elapsed().as_secs_f32() * 1000.0;
        self.warn_if_over_budget(&tag.to_string(), latency, budget_ms);
        latency
    }

    fn warn_if_over_budget(&self, label: &str, latency_ms: f32, budget_ms: f32) {
        if latency_ms > budget_ms {
            warn!(layer = label, latency_ms, budget_ms, "soft latency budget exceeded");
        }
    }
}

fn classify(final_score: f32, config: &DefenceConfig) -> (Verdict, Option<String>) {
    if final_score >= config.thresholds.block_score {
        (Verdict::Blocked, Some("final score exceeded block threshold".to_string()))
    } else if final_score >= config.thresholds.flag_score {
        (Verdict::Flagged, None)
    } else {
        (Verdict::Safe, None)
    }
}
