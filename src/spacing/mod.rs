//! Korean word-spacing correction
//!
//! Streaming ASR output for Korean arrives with unreliable spacing. A
//! word-frequency table drives a segmentation pass applied after
//! recognition and before broadcast. The table ships embedded; a larger
//! external model directory can be configured instead.
//!
//! Loading an external model from a non-ASCII path has historically
//! failed on some hosts, so an unreadable model directory is copied to an
//! ASCII-safe temp path once and retried from there. If that also fails,
//! spacing is bypassed entirely. Captions are never blocked on spacing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::SpacingConfig;

const MODEL_FILE: &str = "korean_words.tsv";
const EMBEDDED_WORDS: &str = include_str!("data/korean_words.tsv");

/// Penalty score assigned to characters not covered by any known word.
const UNKNOWN_CHAR_SCORE: f64 = -4.0;

struct SpacingModel {
    words: HashMap<String, f64>,
    max_word_chars: usize,
}

impl SpacingModel {
    fn parse(data: &str) -> Option<Self> {
        let mut words = HashMap::new();
        let mut max_word_chars = 1;
        for line in data.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut cols = line.split('\t');
            let word = cols.next()?.trim();
            let freq: f64 = cols.next().and_then(|f| f.trim().parse().ok())?;
            if word.is_empty() || freq <= 0.0 {
                continue;
            }
            max_word_chars = max_word_chars.max(word.chars().count());
            words.insert(word.to_string(), freq.ln());
        }
        if words.is_empty() {
            return None;
        }
        Some(Self {
            words,
            max_word_chars,
        })
    }

    /// Best-scoring segmentation of a single unspaced run.
    fn segment(&self, run: &str) -> Vec<String> {
        let chars: Vec<char> = run.chars().collect();
        let n = chars.len();
        if n <= 1 {
            return vec![run.to_string()];
        }

        // best[i] = (score, start of last token) for the prefix of length i
        let mut best: Vec<(f64, usize)> = vec![(f64::NEG_INFINITY, 0); n + 1];
        best[0] = (0.0, 0);
        for end in 1..=n {
            let min_start = end.saturating_sub(self.max_word_chars);
            for start in min_start..end {
                if best[start].0 == f64::NEG_INFINITY {
                    continue;
                }
                let token: String = chars[start..end].iter().collect();
                let score = match self.words.get(&token) {
                    Some(s) => *s,
                    None => UNKNOWN_CHAR_SCORE * (end - start) as f64,
                };
                let candidate = best[start].0 + score;
                if candidate > best[end].0 {
                    best[end] = (candidate, start);
                }
            }
        }

        let mut tokens = Vec::new();
        let mut end = n;
        while end > 0 {
            let start = best[end].1;
            tokens.push(chars[start..end].iter().collect::<String>());
            end = start;
        }
        tokens.reverse();

        // Merge isolated unknown fragments back together so unmodeled
        // stretches come out as they went in.
        let mut merged: Vec<String> = Vec::with_capacity(tokens.len());
        for token in tokens {
            let known = self.words.contains_key(&token);
            match merged.last_mut() {
                Some(last) if !known && !self.words.contains_key(last.as_str()) => {
                    last.push_str(&token);
                }
                _ => merged.push(token),
            }
        }
        merged
    }
}

/// Process-wide spacing engine. Cheap to clone via `Arc`.
pub struct SpacingEngine {
    model: Option<SpacingModel>,
}

impl SpacingEngine {
    /// Loads the engine once at startup. Never fails: an unusable model
    /// downgrades to a pass-through engine.
    pub fn load(config: &SpacingConfig) -> Arc<Self> {
        let model = match &config.model_path {
            Some(dir) => Self::load_external(dir),
            None => SpacingModel::parse(EMBEDDED_WORDS),
        };
        match &model {
            Some(m) => info!("Spacing model loaded ({} words)", m.words.len()),
            None => warn!("Spacing model unavailable, spacing correction bypassed"),
        }
        Arc::new(Self { model })
    }

    #[cfg(test)]
    pub fn embedded() -> Self {
        Self {
            model: SpacingModel::parse(EMBEDDED_WORDS),
        }
    }

    #[cfg(test)]
    pub fn disabled() -> Self {
        Self { model: None }
    }

    fn load_external(dir: &Path) -> Option<SpacingModel> {
        match std::fs::read_to_string(dir.join(MODEL_FILE)) {
            Ok(data) => SpacingModel::parse(&data),
            Err(e) => {
                warn!(
                    "Spacing model unreadable at {} ({}), relocating to a safe path",
                    dir.display(),
                    e
                );
                let safe_dir = Self::relocate(dir).ok()?;
                match std::fs::read_to_string(safe_dir.join(MODEL_FILE)) {
                    Ok(data) => SpacingModel::parse(&data),
                    Err(e) => {
                        warn!("Spacing model still unreadable after relocation: {}", e);
                        None
                    }
                }
            }
        }
    }

    /// Copies the model directory to an ASCII-safe location under the
    /// system temp dir. Reuses an existing copy from a previous run.
    fn relocate(src: &Path) -> std::io::Result<PathBuf> {
        let dest = std::env::temp_dir().join("assembly_captions_spacing");
        if !dest.join(MODEL_FILE).exists() {
            std::fs::create_dir_all(&dest)?;
            for entry in std::fs::read_dir(src)? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    std::fs::copy(entry.path(), dest.join(entry.file_name()))?;
                }
            }
            info!("Spacing model relocated to {}", dest.display());
        }
        Ok(dest)
    }

    pub fn enabled(&self) -> bool {
        self.model.is_some()
    }

    /// Re-spaces the text. Pass-through when no model is loaded.
    pub fn space(&self, text: &str) -> String {
        let Some(model) = &self.model else {
            return text.to_string();
        };
        let mut out: Vec<String> = Vec::new();
        for chunk in text.split_whitespace() {
            out.extend(model.segment(chunk));
        }
        out.join(" ")
    }
}

/// Collapses runs of whitespace into single spaces and trims the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_unspaced_run_with_known_words() {
        let engine = SpacingEngine::embedded();
        assert_eq!(
            engine.space("오늘은회의를시작하겠습니다"),
            "오늘은 회의를 시작하겠습니다"
        );
    }

    #[test]
    fn leaves_unknown_text_intact() {
        let engine = SpacingEngine::embedded();
        assert_eq!(engine.space("blorptext"), "blorptext");
    }

    #[test]
    fn preserves_existing_spacing_of_known_words() {
        let engine = SpacingEngine::embedded();
        assert_eq!(engine.space("오늘은 회의를"), "오늘은 회의를");
    }

    #[test]
    fn disabled_engine_passes_through() {
        let engine = SpacingEngine::disabled();
        assert!(!engine.enabled());
        assert_eq!(engine.space("오늘은회의를"), "오늘은회의를");
    }

    #[test]
    fn collapse_whitespace_normalizes() {
        assert_eq!(collapse_whitespace("  a   b\t c \n"), "a b c");
        assert_eq!(collapse_whitespace(""), "");
    }

    #[test]
    fn external_model_falls_back_to_bypass_when_missing() {
        let config = SpacingConfig {
            model_path: Some(std::path::PathBuf::from("/nonexistent/spacing/dir")),
        };
        let engine = SpacingEngine::load(&config);
        assert!(!engine.enabled());
        assert_eq!(engine.space("안녕하세요"), "안녕하세요");
    }
}
