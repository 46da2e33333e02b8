//! Append-only, hash-linked witness log. Each entry's `prev_hash` is the
//! SHAKE-256 (256-bit output) digest of the previous entry's canonical
//! serialization; appends are serialized through a single writer task so
//! physical append order always matches the hash-chain order, even
//! under concurrent dispatch.

use serde_json::Value as JsonValue;
use sha3::digest::{ExtendableOutput, Update};
use sha3::Shake256;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::types::{WitnessEntry, WitnessType};

const SHAKE256_OUTPUT_BYTES: usize = 32;
/// `prev_hash` of the chain's first entry: 64 hex chars (32 zero bytes),
/// the same width as a real SHAKE-256-256 digest.
const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// SHAKE-256 with a 256-bit (32-byte) output, hex-encoded, over the
/// entry's canonical JSON serialization (`serde_json`'s default map
/// representation is a `BTreeMap`, so keys are already sorted).
fn shake256_256_hex(bytes: &[u8]) -> String {
    let mut hasher = Shake256::default();
    hasher.update(bytes);
    let mut output = vec![0u8; SHAKE256_OUTPUT_BYTES];
    hasher.finalize_xof_into(&mut output);
    hex::encode(output)
}

fn canonical_bytes(entry: &WitnessEntry) -> Result<Vec<u8>> {
    serde_json::to_vec(entry).map_err(Error::from)
}

enum WriterCommand {
    Append {
        witness_type: WitnessType,
        action_hash: String,
        metadata: JsonValue,
        reply: oneshot::Sender<Result<WitnessEntry>>,
    },
}

/// Handle cloned across dispatch tasks; all sends funnel into the one
/// writer task owning the chain head.
#[derive(Clone)]
pub struct ProvenanceChain {
    sender: mpsc::Sender<WriterCommand>,
}

impl ProvenanceChain {
    /// Spawn the single writer task and return a handle. The task owns
    /// the chain head exclusively — no other code ever reads or writes
    /// `prev_hash` directly.
    pub fn spawn() -> Self {
        let (sender, mut receiver) = mpsc::channel::<WriterCommand>(256);

        tokio::spawn(async move {
            let mut head_hash = GENESIS_HASH[..64].to_string();
            while let Some(cmd) = receiver.recv().await {
                match cmd {
                    WriterCommand::Append {
                        witness_type,
                        action_hash,
                        metadata,
                        reply,
                    } => {
                        let entry = WitnessEntry {
                            witness_type,
                            action_hash,
                            metadata,
                            prev_hash: head_hash.clone(),
                        };
                        let result = canonical_bytes(&entry).map(|bytes| {
                            head_hash = shake256_256_hex(&bytes);
                            entry.clone()
                        });
                        let _ = reply.send(result);
                    }
                }
            }
        });

        Self { sender }
    }

    /// Append a witness entry; resolves once the writer task has
    /// computed and recorded it. Errors here are always logged by the
    /// caller and never propagated into the fast path.
    pub async fn record_witness(
        &self,
        witness_type: WitnessType,
        action_hash: String,
        metadata: JsonValue,
    ) -> Result<WitnessEntry> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(WriterCommand::Append {
                witness_type,
                action_hash,
                metadata,
                reply,
            })
            .await
            .map_err(|_| Error::Pipeline("provenance writer task is gone".to_string()))?;

        rx.await.map_err(|_| Error::Pipeline("provenance writer dropped the reply".to_string()))?
    }
}

/// Verify a full chain's internal linkage, used by tests and by
/// recovery tooling after a crash.
pub fn verify_chain(entries: &[WitnessEntry]) -> Result<bool> {
    let mut expected_prev = GENESIS_HASH[..64].to_string();
    for entry in entries {
        if entry.prev_hash != expected_prev {
            return Ok(false);
        }
        let bytes = canonical_bytes(entry)?;
        expected_prev = shake256_256_hex(&bytes);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_entry_links_to_genesis() {
        let chain = ProvenanceChain::spawn();
        let entry = chain
            .record_witness(WitnessType::Provenance, "deadbeef".to_string(), serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(entry.prev_hash, GENESIS_HASH[..64]);
    }

    #[tokio::test]
    async fn test_second_entry_links_to_first_hash() {
        let chain = ProvenanceChain::spawn();
        let first = chain
            .record_witness(WitnessType::Provenance, "aaaa".to_string(), serde_json::json!({}))
            .await
            .unwrap();
        let second = chain
            .record_witness(WitnessType::Provenance, "bbbb".to_string(), serde_json::json!({}))
            .await
            .unwrap();

        let expected_prev_hash = shake256_256_hex(&canonical_bytes(&first).unwrap());
        assert_eq!(second.prev_hash, expected_prev_hash);
    }

    #[tokio::test]
    async fn test_serialized_appends_preserve_order_under_concurrency() {
        let chain = ProvenanceChain::spawn();
        let mut handles = Vec::new();
        for i in 0..20 {
            let chain = chain.clone();
            handles.push(tokio::spawn(async move {
                chain
                    .record_witness(WitnessType::Computation, format!("hash{i}"), serde_json::json!({"i": i}))
                    .await
                    .unwrap()
            }));
        }
        let mut entries = Vec::new();
        for h in handles {
            entries.push(h.await.unwrap());
        }
        // Order of completion isn't guaranteed, but whatever emerged must
        // still form a single valid hash chain when the first `prev_hash`
        // values are chased back to genesis — at minimum no two entries
        // may share a `prev_hash`, since the head only ever advances once
        // per append.
        let mut prev_hashes: Vec<&str> = entries.iter().map(|e| e.prev_hash.as_str()).collect();
        prev_hashes.sort();
        prev_hashes.dedup();
        assert_eq!(prev_hashes.len(), entries.len());
    }

    #[test]
    fn test_verify_chain_detects_tampering() {
        let entry_a = WitnessEntry {
            witness_type: WitnessType::Provenance,
            action_hash: "a".to_string(),
            metadata: serde_json::json!({}),
            prev_hash: GENESIS_HASH[..64].to_string(),
        };
        let hash_a = shake256_256_hex(&canonical_bytes(&entry_a).unwrap());
        let entry_b = WitnessEntry {
            witness_type: WitnessType::Provenance,
            action_hash: "b".to_string(),
            metadata: serde_json::json!({}),
            prev_hash: hash_a,
        };
        assert!(verify_chain(&[entry_a.clone(), entry_b.clone()]).unwrap());

        let tampered = WitnessEntry {
            prev_hash: "tampered".to_string(),
            ..entry_b
        };
        assert!(!verify_chain(&[entry_a, tampered]).unwrap());
    }
}
