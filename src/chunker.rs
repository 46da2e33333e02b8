//! Recursive semantic decontamination: when a message is flagged rather
//! than cleanly safe or cleanly blocked, split it into smaller chunks and
//! re-score each independently, so a single malicious sentence buried in
//! an otherwise benign paragraph doesn't force the whole message to be
//! discarded.
//!
//! Splitting stops at `MAX_DEPTH` recursion levels: paragraph, then
//! sentence, then word-group, then a hard per-chunk character cap. Chunks
//! that re-score above the block threshold are redacted in place; the
//! manifest records what was removed so the coordinator can report it.

const MAX_DEPTH: u32 = 4;
const WORD_GROUP_SIZE: usize = 12;
const HARD_CHAR_CAP: usize = 80;

#[derive(Debug, Clone)]
pub struct RedactedChunk {
    pub depth: u32,
    pub original: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkManifest {
    pub redacted: Vec<RedactedChunk>,
}

impl ChunkManifest {
    pub fn is_empty(&self) -> bool {
        self.redacted.is_empty()
    }
}

/// A scoring function supplied by the caller — in production this calls
/// back into the coordinator's L1/L2 scanners on just the chunk text,
/// but the splitting logic here has no dependency on that machinery.
pub type ScoreFn<'a> = dyn Fn(&str) -> f32 + 'a;

/// Decontaminate `text`, replacing any chunk whose score exceeds
/// `block_score` with a `[REDACTED]` sentinel, recursing into
/// sub-chunks of anything that scores between `flag_score` and
/// `block_score` until `MAX_DEPTH` is reached. Returns `is_clean`
/// alongside the rewritten text: true only if no chunk at any depth
/// needed redaction.
pub fn decontaminate(
    text: &str,
    flag_score: f32,
    block_score: f32,
    score_fn: &ScoreFn,
) -> (bool, String, ChunkManifest) {
    let mut manifest = ChunkManifest::default();
    let result = decontaminate_at_depth(text, 0, flag_score, block_score, score_fn, &mut manifest);
    let is_clean = manifest.is_empty();
    (is_clean, result, manifest)
}

fn decontaminate_at_depth(
    text: &str,
    depth: u32,
    flag_score: f32,
    block_score: f32,
    score_fn: &ScoreFn,
    manifest: &mut ChunkManifest,
) -> String {
    let score = score_fn(text);

    if score < flag_score {
        return text.to_string();
    }

    if score >= block_score || depth >= MAX_DEPTH || text.len() <= HARD_CHAR_CAP {
        manifest.redacted.push(RedactedChunk {
            depth,
            original: text.to_string(),
            score,
        });
        return "[REDACTED]".to_string();
    }

    let sub_chunks = split_at_depth(text, depth);
    if sub_chunks.len() <= 1 {
        // Couldn't split any further at this depth; treat as a leaf.
        manifest.redacted.push(RedactedChunk {
            depth,
            original: text.to_string(),
            score,
        });
        return "[REDACTED]".to_string();
    }

    sub_chunks
        .into_iter()
        .map(|chunk| decontaminate_at_depth(chunk, depth + 1, flag_score, block_score, score_fn, manifest))
        .collect::<Vec<_>>()
        .join(splice_join(depth))
}

fn splice_join(depth: u32) -> &'static str {
    match depth {
        0 => "\n\n",
        1 => " ",
        _ => " ",
    }
}

fn split_at_depth(text: &str, depth: u32) -> Vec<&str> {
    match depth {
        0 => split_paragraphs(text),
        1 => split_sentences(text),
        _ => split_word_groups(text),
    }
}

fn split_paragraphs(text: &str) -> Vec<&str> {
    text.split("\n\n").filter(|s| !s.trim().is_empty()).collect()
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if matches!(b, b'.' | b'!' | b'?') {
            let end = i + 1;
            let slice = text[start..end].trim();
            if !slice.is_empty() {
                out.push(slice);
            }
            start = end;
        }
    }
    if start < text.len() {
        let rest = text[start..].trim();
        if !rest.is_empty() {
            out.push(rest);
        }
    }
    if out.is_empty() {
        vec![text]
    } else {
        out
    }
}

fn split_word_groups(text: &str) -> Vec<&str> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= 1 {
        return vec![text];
    }

    let mut out = Vec::new();
    let mut idx = 0;
    while idx < words.len() {
        let end = (idx + WORD_GROUP_SIZE).min(words.len());
        let start_offset = word_byte_offset(text, words, idx);
        let end_offset = if end < words.len() {
            word_byte_offset(text, words, end)
        } else {
            text.len()
        };
        out.push(text[start_offset..end_offset].trim());
        idx = end;
    }
    out
}

fn word_byte_offset(text: &str, words: &[&str], word_idx: usize) -> usize {
    if word_idx >= words.len() {
        return text.len();
    }
    let target = words[word_idx].as_ptr() as usize;
    let base = text.as_ptr() as usize;
    target - base
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score_keyword(keyword: &'static str, hit_score: f32) -> impl Fn(&str) -> f32 {
        move |text: &str| {
            if text.to_lowercase().contains(keyword) {
                hit_score
            } else {
                0.0
            }
        }
    }

    #[test]
    fn test_clean_text_passes_through_unchanged() {
        let score_fn = score_keyword("malicious", 0.95);
        let (is_clean, out, manifest) = decontaminate("just a friendly greeting", 0.7, 0.9, &score_fn);
        assert!(is_clean);
        assert_eq!(out, "just a friendly greeting");
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_isolates_malicious_sentence_in_paragraph() {
        let score_fn = score_keyword("malicious payload", 0.95);
        let text = "This is a perfectly normal sentence. This one has a malicious payload in it. And this one is fine too.";
        let (is_clean, out, manifest) = decontaminate(text, 0.7, 0.9, &score_fn);
        assert!(!is_clean);
        assert!(out.contains("[REDACTED]"));
        assert!(out.contains("perfectly normal sentence"));
        assert!(out.contains("fine too"));
        assert_eq!(manifest.redacted.len(), 1);
    }

    #[test]
    fn test_recursion_stops_at_max_depth() {
        let score_fn = |_: &str| 0.8f32; // always between flag and block
        let long_text = "word ".repeat(500);
        let (is_clean, out, manifest) = decontaminate(&long_text, 0.5, 0.99, &score_fn);
        assert!(!is_clean);
        assert!(out.contains("[REDACTED]"));
        assert!(manifest.redacted.iter().all(|c| c.depth <= MAX_DEPTH));
    }

    #[test]
    fn test_fully_malicious_short_text_redacted_at_root() {
        let score_fn = |_: &str| 0.95f32;
        let (is_clean, out, manifest) = decontaminate("short attack", 0.7, 0.9, &score_fn);
        assert!(!is_clean);
        assert_eq!(out, "[REDACTED]");
        assert_eq!(manifest.redacted.len(), 1);
        assert_eq!(manifest.redacted[0].depth, 0);
    }
}
