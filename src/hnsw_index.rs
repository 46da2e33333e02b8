//! Approximate nearest-neighbor index backing the attack-pattern and
//! clean-reference stores used by the coherence gate.
//!
//! DESIGN DECISION: HNSW graph in memory, rusqlite for durable metadata.
//! WHY: the graph itself (`hnsw_rs`) isn't serializable in a stable format
//! across versions, so vectors and metadata are the durable source of
//! truth — on load the graph is rebuilt from the SQLite rows. That keeps
//! the persistence layer boring (insert/select, same shape as a row
//! store) while the index stays a pure in-memory structure.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use hnsw_rs::dist::DistCosine;
use hnsw_rs::hnsw::{Hnsw, Neighbour};
use rusqlite::{params, Connection};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::types::PatternEntry;

const M: usize = 32;
const EF_CONSTRUCTION: usize = 200;
const EF_SEARCH: usize = 100;
const MAX_ELEMENTS: usize = 1_000_000;
const MAX_LAYER: usize = 16;
/// How many rotated backup snapshots of the metadata store to retain.
const BACKUP_GENERATIONS: usize = 5;

pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub category: String,
    pub raw_excerpt: String,
}

/// A named, persisted HNSW index: vectors live in the graph for search,
/// full rows live in SQLite for rebuild-on-load and backup rotation.
///
/// `embedder_name` is stamped at creation and checked on every insert
/// and search — a caller embedding with a different model than the one
/// the index was built from gets `Error::EmbedderMismatch` instead of a
/// meaningless distance.
pub struct PatternIndex {
    graph: RwLock<Hnsw<'static, f32, DistCosine>>,
    conn: Mutex<Connection>,
    path: PathBuf,
    embedder_name: String,
    dim: usize,
    next_internal_id: RwLock<usize>,
}

use std::sync::Mutex;

impl PatternIndex {
    /// Open (or create) the index at `path`, rebuilding the in-memory
    /// HNSW graph from whatever rows are already persisted.
    pub fn open(path: impl AsRef<Path>, embedder_name: &str, dim: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS patterns (
                internal_id INTEGER PRIMARY KEY,
                id TEXT NOT NULL UNIQUE,
                embedding TEXT NOT NULL,
                category TEXT NOT NULL,
                raw_excerpt TEXT NOT NULL,
                severity TEXT,
                embedder_name TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        let graph: Hnsw<'static, f32, DistCosine> =
            Hnsw::new(M, MAX_ELEMENTS, MAX_LAYER, EF_CONSTRUCTION, DistCosine {});

        let index = Self {
            graph: RwLock::new(graph),
            conn: Mutex::new(conn),
            path,
            embedder_name: embedder_name.to_string(),
            dim,
            next_internal_id: RwLock::new(0),
        };

        index.rebuild_from_store()?;
        Ok(index)
    }

    pub fn in_memory(embedder_name: &str, dim: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute(
            "CREATE TABLE patterns (
                internal_id INTEGER PRIMARY KEY,
                id TEXT NOT NULL UNIQUE,
                embedding TEXT NOT NULL,
                category TEXT NOT NULL,
                raw_excerpt TEXT NOT NULL,
                severity TEXT,
                embedder_name TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;
        let graph: Hnsw<'static, f32, DistCosine> =
            Hnsw::new(M, MAX_ELEMENTS, MAX_LAYER, EF_CONSTRUCTION, DistCosine {});
        Ok(Self {
            graph: RwLock::new(graph),
            conn: Mutex::new(conn),
            path: PathBuf::new(),
            embedder_name: embedder_name.to_string(),
            dim,
            next_internal_id: RwLock::new(0),
        })
    }

    fn rebuild_from_store(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT internal_id, embedding FROM patterns ORDER BY internal_id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let graph = self.graph.write().unwrap();
        let mut max_id = 0usize;
        for row in rows {
            let (internal_id, embedding_json) = row?;
            let embedding: Vec<f32> = serde_json::from_str(&embedding_json)?;
            graph.insert((&embedding, internal_id as usize));
            max_id = max_id.max(internal_id as usize + 1);
        }
        drop(graph);
        *self.next_internal_id.write().unwrap() = max_id;
        Ok(())
    }

    /// Insert a pattern. Write failures (SQLite I/O) propagate; reads
    /// never see this path fail silently, per the coordinator's
    /// fail-open-on-read / fail-closed-on-write policy.
    pub fn insert(&self, entry: &PatternEntry, embedder_name: &str) -> Result<()> {
        self.check_embedder(embedder_name)?;
        if entry.vector.len() != self.dim {
            return Err(Error::EmbedderMismatch {
                expected: format!("dim={}", self.dim),
                actual: format!("dim={}", entry.vector.len()),
            });
        }

        let internal_id = {
            let mut next = self.next_internal_id.write().unwrap();
            let id = *next;
            *next += 1;
            id
        };

        {
            let conn = self.conn.lock().unwrap();
            let embedding_json = serde_json::to_string(&entry.vector)?;
            conn.execute(
                "INSERT OR REPLACE INTO patterns
                    (internal_id, id, embedding, category, raw_excerpt, severity, embedder_name, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    internal_id as i64,
                    entry.id,
                    embedding_json,
                    entry.category,
                    entry.raw_excerpt,
                    entry.severity,
                    embedder_name,
                    chrono::Utc::now().timestamp(),
                ],
            )
            .map_err(|e| Error::IndexWrite(e.to_string()))?;
        }

        let graph = self.graph.write().unwrap();
        graph.insert((&entry.vector, internal_id));
        Ok(())
    }

    /// Nearest-neighbor search. A graph or store error here is treated
    /// as "no matches" by the caller (coherence gate fails open); this
    /// method itself still surfaces the error so callers can log it.
    pub fn search(&self, query: &[f32], k: usize, embedder_name: &str) -> Result<Vec<SearchHit>> {
        self.check_embedder(embedder_name)?;
        if query.len() != self.dim {
            return Err(Error::EmbedderMismatch {
                expected: format!("dim={}", self.dim),
                actual: format!("dim={}", query.len()),
            });
        }

        let graph = self.graph.read().unwrap();
        let neighbours: Vec<Neighbour> = graph.search(query, k, EF_SEARCH);
        drop(graph);

        let conn = self.conn.lock().unwrap();
        let mut hits = Vec::with_capacity(neighbours.len());
        for n in neighbours {
            let row: Option<(String, String, String)> = conn
                .query_row(
                    "SELECT id, category, raw_excerpt FROM patterns WHERE internal_id = ?",
                    params![n.d_id as i64],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .ok();
            if let Some((id, category, raw_excerpt)) = row {
                hits.push(SearchHit {
                    id,
                    score: 1.0 - n.distance,
                    category,
                    raw_excerpt,
                });
            }
        }
        Ok(hits)
    }

    pub fn len(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM patterns", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn check_embedder(&self, embedder_name: &str) -> Result<()> {
        if embedder_name != self.embedder_name {
            return Err(Error::EmbedderMismatch {
                expected: self.embedder_name.clone(),
                actual: embedder_name.to_string(),
            });
        }
        Ok(())
    }

    /// Atomic copy-then-rename snapshot, keeping the last
    /// `BACKUP_GENERATIONS` rotations so a corrupt write never loses more
    /// than one generation of history.
    pub fn rotate_backup(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }

        for gen in (1..BACKUP_GENERATIONS).rev() {
            let from = self.backup_path(gen);
            let to = self.backup_path(gen + 1);
            if from.exists() {
                std::fs::rename(&from, &to)?;
            }
        }

        let tmp = self.backup_path(0).with_extension("tmp");
        std::fs::copy(&self.path, &tmp)?;
        std::fs::rename(&tmp, self.backup_path(1))?;
        Ok(())
    }

    fn backup_path(&self, generation: usize) -> PathBuf {
        let mut p = self.path.clone();
        let file_name = format!(
            "{}.bak{}",
            self.path.file_name().and_then(|s| s.to_str()).unwrap_or("index"),
            generation
        );
        p.set_file_name(file_name);
        p
    }
}

#[allow(dead_code)]
fn json_metadata(entry: &PatternEntry) -> JsonValue {
    serde_json::json!({
        "category": entry.category,
        "severity": entry.severity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, vector: Vec<f32>, category: &str) -> PatternEntry {
        PatternEntry {
            id: id.to_string(),
            vector,
            category: category.to_string(),
            raw_excerpt: "example".to_string(),
            severity: None,
        }
    }

    #[test]
    fn test_insert_and_search_roundtrip() {
        let idx = PatternIndex::in_memory("fast-bucket-hash-v1", 4).unwrap();
        idx.insert(&entry("p1", vec![1.0, 0.0, 0.0, 0.0], "injection"), "fast-bucket-hash-v1")
            .unwrap();
        idx.insert(&entry("p2", vec![0.0, 1.0, 0.0, 0.0], "injection"), "fast-bucket-hash-v1")
            .unwrap();

        let hits = idx.search(&[1.0, 0.0, 0.0, 0.0], 1, "fast-bucket-hash-v1").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "p1");
    }

    #[test]
    fn test_embedder_mismatch_rejected() {
        let idx = PatternIndex::in_memory("fast-bucket-hash-v1", 4).unwrap();
        let result = idx.search(&[1.0, 0.0, 0.0, 0.0], 1, "semantic-artifact-v1");
        assert!(matches!(result, Err(Error::EmbedderMismatch { .. })));
    }

    #[test]
    fn test_dim_mismatch_rejected() {
        let idx = PatternIndex::in_memory("fast-bucket-hash-v1", 4).unwrap();
        let result = idx.insert(&entry("p1", vec![1.0, 0.0], "injection"), "fast-bucket-hash-v1");
        assert!(result.is_err());
    }

    #[test]
    fn test_len_tracks_inserts() {
        let idx = PatternIndex::in_memory("fast-bucket-hash-v1", 4).unwrap();
        assert_eq!(idx.len().unwrap(), 0);
        idx.insert(&entry("p1", vec![1.0, 0.0, 0.0, 0.0], "injection"), "fast-bucket-hash-v1")
            .unwrap();
        assert_eq!(idx.len().unwrap(), 1);
    }
}
