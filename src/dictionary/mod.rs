//! Terminology dictionary
//!
//! Cheap, deterministic fix-ups for known ASR misrecognitions of
//! parliamentary vocabulary. Replacements are literal substrings applied
//! in declaration order; semantic correction is the refiner's job.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryCategory {
    /// Council member names
    Councilor,
    /// Parliamentary procedure vocabulary
    Term,
    General,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub wrong_text: String,
    pub correct_text: String,
    pub category: Option<EntryCategory>,
}

impl DictionaryEntry {
    pub fn new(wrong: &str, correct: &str, category: EntryCategory) -> Self {
        Self {
            wrong_text: wrong.to_string(),
            correct_text: correct.to_string(),
            category: Some(category),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    entries: Vec<DictionaryEntry>,
}

impl Dictionary {
    pub fn new(entries: Vec<DictionaryEntry>) -> Self {
        Self { entries }
    }

    /// Dictionary preloaded with the assembly's known misrecognitions.
    pub fn with_parliament_defaults() -> Self {
        use EntryCategory::Term;
        Self::new(vec![
            DictionaryEntry::new("사내를 선포", "산회를 선포", Term),
            DictionaryEntry::new("사내 를 선포", "산회를 선포", Term),
            DictionaryEntry::new("사내선포", "산회 선포", Term),
            DictionaryEntry::new("사내합니다", "산회합니다", Term),
            DictionaryEntry::new("사내를", "산회를", Term),
            DictionaryEntry::new("사내 합니다", "산회합니다", Term),
            DictionaryEntry::new("개이합니다", "개의합니다", Term),
            DictionaryEntry::new("개이를 선포", "개의를 선포", Term),
            DictionaryEntry::new("소개합니다", "속개합니다", Term),
            DictionaryEntry::new("속계합니다", "속개합니다", Term),
            DictionaryEntry::new("상정 하겠습니다", "상정하겠습니다", Term),
            DictionaryEntry::new("의안을 상정 합니다", "의안을 상정합니다", Term),
            DictionaryEntry::new("의결 하겠습니다", "의결하겠습니다", Term),
            DictionaryEntry::new("위원장 님", "위원장님", Term),
            DictionaryEntry::new("의원 님", "의원님", Term),
            DictionaryEntry::new("도지사 님", "도지사님", Term),
            DictionaryEntry::new("경기 도의회", "경기도의회", Term),
            DictionaryEntry::new("경기도 의회", "경기도의회", Term),
            DictionaryEntry::new("보건 복지 위원회", "보건복지위원회", Term),
            DictionaryEntry::new("질의 하겠습니다", "질의하겠습니다", Term),
            DictionaryEntry::new("답변 하겠습니다", "답변하겠습니다", Term),
        ])
    }

    /// Applies every replacement in declaration order.
    pub fn correct(&self, text: &str) -> String {
        if text.is_empty() {
            return text.to_string();
        }
        let mut result = text.to_string();
        for entry in &self.entries {
            if result.contains(&entry.wrong_text) {
                result = result.replace(&entry.wrong_text, &entry.correct_text);
            }
        }
        result
    }

    pub fn add_entry(&mut self, entry: DictionaryEntry) {
        // Re-adding a wrong form replaces the previous mapping.
        self.entries.retain(|e| e.wrong_text != entry.wrong_text);
        self.entries.push(entry);
    }

    pub fn remove_entry(&mut self, wrong_text: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.wrong_text != wrong_text);
        self.entries.len() != before
    }

    pub fn entries(&self) -> &[DictionaryEntry] {
        &self.entries
    }

    pub fn entries_by_category(&self, category: EntryCategory) -> Vec<&DictionaryEntry> {
        self.entries
            .iter()
            .filter(|e| e.category == Some(category))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrects_known_misrecognitions() {
        let dict = Dictionary::with_parliament_defaults();
        assert_eq!(dict.correct("사내를 선포합니다"), "산회를 선포합니다");
        assert_eq!(dict.correct("개이합니다"), "개의합니다");
        assert_eq!(dict.correct("위원장 님 말씀하세요"), "위원장님 말씀하세요");
    }

    #[test]
    fn correction_is_idempotent() {
        let dict = Dictionary::with_parliament_defaults();
        let once = dict.correct("사내를 선포합니다. 경기 도의회 개이합니다");
        let twice = dict.correct(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn correct_text_passes_through() {
        let dict = Dictionary::with_parliament_defaults();
        let text = "산회를 선포합니다";
        assert_eq!(dict.correct(text), text);
        assert_eq!(dict.correct(""), "");
    }

    #[test]
    fn add_and_remove_entries() {
        let mut dict = Dictionary::default();
        dict.add_entry(DictionaryEntry::new("김철수", "김철수 의원", EntryCategory::Councilor));
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.correct("김철수 발언"), "김철수 의원 발언");
        assert_eq!(dict.entries_by_category(EntryCategory::Councilor).len(), 1);

        assert!(dict.remove_entry("김철수"));
        assert!(!dict.remove_entry("김철수"));
        assert!(dict.is_empty());
    }
}
