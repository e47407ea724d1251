use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// A bounded-length slice of one complaint narrative. `char_offset` is the
/// position of the first character within the source narrative, counted in
/// characters rather than bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub complaint_id: usize,
    pub index: usize,
    pub text: String,
    pub char_offset: usize,
}

impl Chunk {
    /// Identity used as the vector-store label: `<complaint row>:<chunk index>`.
    pub fn id(&self) -> String {
        format!("{}:{}", self.complaint_id, self.index)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    max_len: usize,
    overlap: usize,
}

impl ChunkerConfig {
    pub fn new(max_len: usize, overlap: usize) -> Result<Self, PipelineError> {
        if max_len == 0 {
            return Err(PipelineError::Config(
                "max chunk length must be non-zero".to_string(),
            ));
        }
        if overlap >= max_len {
            return Err(PipelineError::Config(format!(
                "chunk overlap ({overlap}) must be smaller than max chunk length ({max_len})"
            )));
        }
        Ok(Self { max_len, overlap })
    }

    /// Split a narrative into overlapping windows of at most `max_len`
    /// characters. Interior windows advance by `max_len - overlap`, so each
    /// pair of consecutive chunks shares exactly `overlap` characters; the
    /// final chunk carries only the still-uncovered tail and does not overlap
    /// its predecessor. A narrative shorter than `max_len` is a single chunk;
    /// an empty narrative yields no chunks.
    pub fn chunk_narrative(&self, complaint_id: usize, text: &str) -> Vec<Chunk> {
        let char_starts: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        let total = char_starts.len();
        if total == 0 {
            return Vec::new();
        }

        let byte_at = |char_pos: usize| -> usize {
            if char_pos >= total {
                text.len()
            } else {
                char_starts[char_pos]
            }
        };

        let stride = self.max_len - self.overlap;
        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut covered = 0usize;

        while start < total {
            let end = (start + self.max_len).min(total);
            if end == total && start > 0 {
                // Tail chunk: pick up where coverage stopped, no overlap.
                chunks.push(Chunk {
                    complaint_id,
                    index: chunks.len(),
                    text: text[byte_at(covered)..byte_at(total)].to_string(),
                    char_offset: covered,
                });
                break;
            }
            chunks.push(Chunk {
                complaint_id,
                index: chunks.len(),
                text: text[byte_at(start)..byte_at(end)].to_string(),
                char_offset: start,
            });
            covered = end;
            if end == total {
                break;
            }
            start += stride;
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn char_len(s: &str) -> usize {
        s.chars().count()
    }

    #[test]
    fn rejects_overlap_not_smaller_than_max() {
        assert!(ChunkerConfig::new(50, 50).is_err());
        assert!(ChunkerConfig::new(50, 60).is_err());
        assert!(ChunkerConfig::new(0, 0).is_err());
        assert!(ChunkerConfig::new(50, 10).is_ok());
    }

    #[test]
    fn short_narrative_is_a_single_chunk() {
        let config = ChunkerConfig::new(50, 10).unwrap();
        let chunks = config.chunk_narrative(7, "a short complaint");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "a short complaint");
        assert_eq!(chunks[0].char_offset, 0);
        assert_eq!(chunks[0].complaint_id, 7);
        assert_eq!(chunks[0].id(), "7:0");
    }

    #[test]
    fn empty_narrative_yields_no_chunks() {
        let config = ChunkerConfig::new(50, 10).unwrap();
        assert!(config.chunk_narrative(0, "").is_empty());
    }

    #[test]
    fn chunks_120_chars_with_max_50_overlap_10() {
        let text: String = (0..120)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect();
        let config = ChunkerConfig::new(50, 10).unwrap();
        let chunks = config.chunk_narrative(0, &text);

        let lengths: Vec<usize> = chunks.iter().map(|c| char_len(&c.text)).collect();
        assert_eq!(lengths, vec![50, 50, 30]);

        let offsets: Vec<usize> = chunks.iter().map(|c| c.char_offset).collect();
        assert_eq!(offsets, vec![0, 40, 90]);
    }

    #[test]
    fn interior_chunks_overlap_by_exactly_the_configured_amount() {
        let text: String = (0..200)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect();
        let config = ChunkerConfig::new(40, 8).unwrap();
        let chunks = config.chunk_narrative(0, &text);
        assert!(chunks.len() > 2);

        for pair in chunks.windows(2) {
            let prev_end = pair[0].char_offset + char_len(&pair[0].text);
            let next_start = pair[1].char_offset;
            let overlap = prev_end.saturating_sub(next_start);
            if pair[1].index == chunks.len() - 1 {
                assert_eq!(overlap, 0, "tail chunk must not overlap");
            } else {
                assert_eq!(overlap, 8);
            }
        }
    }

    #[test]
    fn chunks_never_exceed_max_and_reconstruct_the_narrative() {
        let text: String = "the quick brown fox jumps over the lazy dog "
            .chars()
            .cycle()
            .take(333)
            .collect();
        let config = ChunkerConfig::new(64, 16).unwrap();
        let chunks = config.chunk_narrative(3, &text);

        let mut rebuilt = String::new();
        for chunk in &chunks {
            assert!(char_len(&chunk.text) <= 64);
            let already = rebuilt.chars().count().saturating_sub(chunk.char_offset);
            rebuilt.extend(chunk.text.chars().skip(already));
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn chunk_indexes_are_sequential() {
        let text: String = "x".repeat(500);
        let config = ChunkerConfig::new(100, 20).unwrap();
        let chunks = config.chunk_narrative(0, &text);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }

    #[test]
    fn multibyte_narratives_chunk_on_character_boundaries() {
        let text: String = "déjà vu — ñandú ".chars().cycle().take(90).collect();
        let config = ChunkerConfig::new(40, 10).unwrap();
        let chunks = config.chunk_narrative(0, &text);
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(char_len(&chunk.text) <= 40);
        }
        // Every chunk boundary must land on a valid char boundary, which the
        // slicing itself guarantees; make sure nothing was dropped.
        let covered: usize = {
            let last = chunks.last().unwrap();
            last.char_offset + char_len(&last.text)
        };
        assert_eq!(covered, 90);
    }
}
