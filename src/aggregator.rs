//! C6 — per-client paragraph/sentence assembler (§4.6).
//!
//! Converts a stream of per-chunk ASR results into an incremental session
//! transcript: sentences accumulate into a paragraph, silence or an
//! explicit final chunk closes the paragraph.

use crate::config::AggregatorConfig;
use std::time::Instant;

/// Result of one [`Aggregator::process_chunk`] call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AggregatorDelta {
    /// Paragraphs completed by this call, in order, not yet seen by a caller.
    pub new_paragraphs: Vec<String>,
    /// The current, not-yet-closed partial sentence.
    pub partial_sentence: String,
    /// Full session transcript: completed paragraphs joined by `\n`, with
    /// the in-progress partial appended.
    pub session_text: String,
    /// Total number of completed paragraphs so far.
    pub paragraph_count: usize,
}

/// Per-client aggregation state (§3 `AggregatorState`).
pub struct Aggregator {
    config: AggregatorConfig,
    sentence_buffer: String,
    current_paragraph: String,
    completed_paragraphs: Vec<String>,
    last_emitted_paragraph_index: usize,
    last_chunk_at: Option<Instant>,
}

impl Aggregator {
    #[must_use]
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            sentence_buffer: String::new(),
            current_paragraph: String::new(),
            completed_paragraphs: Vec::new(),
            last_emitted_paragraph_index: 0,
            last_chunk_at: None,
        }
    }

    /// Process one incoming chunk of ASR text.
    ///
    /// Idempotence: `process_chunk("", false)` performs only silence
    /// bookkeeping and never mutates the paragraph/sentence buffers.
    pub fn process_chunk(&mut self, text: &str, is_final: bool) -> AggregatorDelta {
        self.apply_silence_gap();

        if !text.is_empty() {
            if self.config.sentence_breaks {
                if self.sentence_buffer.is_empty() {
                    self.sentence_buffer.push_str(text);
                } else {
                    self.sentence_buffer.push(' ');
                    self.sentence_buffer.push_str(text);
                }
            } else {
                self.append_to_paragraph(text);
            }
        }

        if is_final {
            self.close_paragraph();
        }

        self.last_chunk_at = Some(Instant::now());
        self.emit()
    }

    /// Close out any in-progress paragraph, used on session shutdown so no
    /// trailing text is lost (§4.5 "finalizes each client's Aggregator").
    pub fn finalize(&mut self) -> AggregatorDelta {
        self.close_paragraph();
        self.emit()
    }

    fn apply_silence_gap(&mut self) {
        let silent_too_long = self
            .last_chunk_at
            .map(|t| t.elapsed() >= self.config.silence_threshold)
            .unwrap_or(false);
        if silent_too_long && !self.sentence_buffer.is_empty() {
            self.close_paragraph();
        }
    }

    fn append_to_paragraph(&mut self, text: &str) {
        if self.current_paragraph.is_empty() {
            self.current_paragraph.push_str(text);
        } else {
            self.current_paragraph.push(' ');
            self.current_paragraph.push_str(text);
        }
    }

    fn close_paragraph(&mut self) {
        if !self.sentence_buffer.is_empty() {
            self.append_to_paragraph(&std::mem::take(&mut self.sentence_buffer));
        }
        if !self.current_paragraph.is_empty() {
            self.completed_paragraphs
                .push(std::mem::take(&mut self.current_paragraph));
        }
    }

    fn emit(&mut self) -> AggregatorDelta {
        let new_paragraphs = self.completed_paragraphs[self.last_emitted_paragraph_index..].to_vec();
        self.last_emitted_paragraph_index = self.completed_paragraphs.len();

        let partial = if self.current_paragraph.is_empty() {
            self.sentence_buffer.clone()
        } else if self.sentence_buffer.is_empty() {
            self.current_paragraph.clone()
        } else {
            format!("{} {}", self.current_paragraph, self.sentence_buffer)
        };

        let mut session_text = self.completed_paragraphs.join("\n");
        if !partial.is_empty() {
            if !session_text.is_empty() {
                session_text.push('\n');
            }
            session_text.push_str(&partial);
        }

        AggregatorDelta {
            new_paragraphs,
            partial_sentence: self.sentence_buffer.clone(),
            session_text,
            paragraph_count: self.completed_paragraphs.len(),
        }
    }
}
