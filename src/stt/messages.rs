//! ASR provider wire shapes
//!
//! Frames received from the provider's streaming WebSocket and the reply
//! of its pre-recorded endpoint. Only the fields the engine acts on are
//! modeled; unknown fields are ignored by serde.

use serde::Deserialize;

/// One JSON frame from the streaming WebSocket. Routing is by `type`;
/// everything except `Results` is ignored (but still counts as provider
/// activity for the stall watchdog).
#[derive(Debug, Clone, Deserialize)]
pub struct StreamingFrame {
    #[serde(rename = "type", default)]
    pub frame_type: String,
    #[serde(default)]
    pub channel: Option<FrameChannel>,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub duration: f64,
}

impl StreamingFrame {
    pub fn is_results(&self) -> bool {
        self.frame_type == "Results"
    }

    /// The first alternative of a `Results` frame, if present.
    pub fn first_alternative(&self) -> Option<&Alternative> {
        self.channel.as_ref()?.alternatives.first()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrameChannel {
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Alternative {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub words: Vec<AsrWord>,
}

/// A single diarized word. `punctuated_word` is preferred over `word`
/// when the provider supplies it.
#[derive(Debug, Clone, Deserialize)]
pub struct AsrWord {
    #[serde(default)]
    pub word: String,
    #[serde(default)]
    pub punctuated_word: Option<String>,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub speaker: Option<u32>,
}

impl AsrWord {
    pub fn display_text(&self) -> &str {
        self.punctuated_word.as_deref().unwrap_or(&self.word)
    }
}

/// Reply of the pre-recorded endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct PrerecordedResponse {
    #[serde(default)]
    pub metadata: Option<PrerecordedMetadata>,
    #[serde(default)]
    pub results: Option<PrerecordedResults>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrerecordedMetadata {
    #[serde(default)]
    pub duration: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrerecordedResults {
    #[serde(default)]
    pub utterances: Vec<Utterance>,
    #[serde(default)]
    pub channels: Vec<FrameChannel>,
}

impl PrerecordedResponse {
    pub fn duration_seconds(&self) -> Option<f64> {
        self.metadata.as_ref().map(|m| m.duration).filter(|d| *d > 0.0)
    }

    /// Word list of the first channel's first alternative (fallback path
    /// when the provider returned no utterances).
    pub fn words(&self) -> &[AsrWord] {
        self.results
            .as_ref()
            .and_then(|r| r.channels.first())
            .and_then(|c| c.alternatives.first())
            .map(|a| a.words.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Utterance {
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub speaker: Option<u32>,
}
