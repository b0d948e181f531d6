//! Sentence assembly
//!
//! Finalized recognition fragments arrive as short per-speaker word runs.
//! The buffer accumulates runs for one speaker until a terminating
//! condition fires, then the worker emits the accumulated sentence as a
//! caption.

use crate::stt::messages::AsrWord;

/// Flush once the accumulated text grows past this many characters.
const MAX_SENTENCE_CHARS: usize = 40;

/// A run of consecutive same-speaker words from one `Results` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct WordRun {
    pub speaker: Option<u32>,
    pub text: String,
    pub confidence: f64,
    pub start: f64,
    pub end: f64,
}

/// Splits a diarized word array at speaker boundaries.
///
/// Each run carries the joined text, the mean word confidence and the
/// first/last word timestamps.
pub fn group_words_by_speaker(words: &[AsrWord]) -> Vec<WordRun> {
    let mut groups: Vec<WordRun> = Vec::new();
    let Some(first) = words.first() else {
        return groups;
    };

    let mut current_speaker = first.speaker;
    let mut current_words: Vec<&str> = Vec::new();
    let mut conf_sum = 0.0;
    let mut conf_count = 0usize;
    let mut start = first.start;
    let mut end = first.end;

    for w in words {
        if w.speaker != current_speaker && !current_words.is_empty() {
            groups.push(WordRun {
                speaker: current_speaker,
                text: current_words.join(" "),
                confidence: conf_sum / conf_count as f64,
                start,
                end,
            });
            current_words.clear();
            conf_sum = 0.0;
            conf_count = 0;
            current_speaker = w.speaker;
            start = w.start;
        }
        current_words.push(w.display_text());
        conf_sum += w.confidence;
        conf_count += 1;
        end = w.end;
    }

    if !current_words.is_empty() {
        groups.push(WordRun {
            speaker: current_speaker,
            text: current_words.join(" "),
            confidence: conf_sum / conf_count as f64,
            start,
            end,
        });
    }

    groups
}

/// Accumulates final fragments for a single speaker into display-sized
/// sentences. Never holds fragments from more than one speaker; the
/// worker flushes before feeding a run with a different speaker.
#[derive(Debug, Default)]
pub struct SentenceBuffer {
    parts: Vec<String>,
    speaker: Option<u32>,
    start_time: f64,
    end_time: f64,
    conf_sum: f64,
    conf_count: usize,
}

impl SentenceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn text(&self) -> String {
        self.parts.join(" ")
    }

    pub fn speaker(&self) -> Option<u32> {
        self.speaker
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn end_time(&self) -> f64 {
        self.end_time
    }

    pub fn avg_confidence(&self) -> f64 {
        if self.conf_count == 0 {
            0.0
        } else {
            self.conf_sum / self.conf_count as f64
        }
    }

    /// True when the incoming run belongs to a different speaker than the
    /// buffered fragments and the buffer must be flushed first.
    pub fn speaker_differs(&self, speaker: Option<u32>) -> bool {
        !self.parts.is_empty()
            && speaker.is_some()
            && self.speaker.is_some()
            && speaker != self.speaker
    }

    pub fn add(&mut self, run: &WordRun) {
        if self.parts.is_empty() {
            self.start_time = run.start;
        }
        self.parts.push(run.text.clone());
        self.end_time = run.end;
        if run.speaker.is_some() {
            self.speaker = run.speaker;
        }
        self.conf_sum += run.confidence;
        self.conf_count += 1;
    }

    /// Whether a terminating condition fired for the buffered text.
    pub fn should_flush(&self) -> bool {
        let text = self.text();
        if text.is_empty() {
            return false;
        }
        let stripped = text.trim_end();
        let Some(last_char) = stripped.chars().last() else {
            return false;
        };
        if matches!(last_char, '.' | '?' | '!' | ',') {
            return true;
        }
        // Korean polite sentence endings
        if stripped.ends_with("니다") || stripped.ends_with("습니다") || stripped.ends_with("까") {
            return true;
        }
        if matches!(last_char, '요' | '다') {
            return true;
        }
        text.chars().count() > MAX_SENTENCE_CHARS
    }

    pub fn clear(&mut self) {
        self.parts.clear();
        self.speaker = None;
        self.start_time = 0.0;
        self.end_time = 0.0;
        self.conf_sum = 0.0;
        self.conf_count = 0;
    }
}
