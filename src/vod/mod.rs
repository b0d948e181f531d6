//! VOD caption generation
//!
//! Streams an archived MP4 through the ASR provider's pre-recorded
//! endpoint and turns the reply into caption rows for the durable store.
//! Task state lives in process memory keyed by meeting id; at most one
//! task may be pending or running per meeting.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use regex::Regex;
use std::sync::OnceLock;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::assembler::WordRun;
use crate::config::AsrConfig;
use crate::database::CaptionStore;
use crate::dictionary::Dictionary;
use crate::errors::VodError;
use crate::models::{MeetingStatus, Subtitle, VodTask, VodTaskStatus};
use crate::spacing::collapse_whitespace;
use crate::stt::messages::{AsrWord, PrerecordedResponse};
use crate::stt::prerecorded::PrerecordedClient;

/// Word-fallback groups are split once they would span more than this.
const MAX_GROUP_SECONDS: f64 = 10.0;

/// Progress is reported once per this many downloaded bytes.
const DOWNLOAD_PROGRESS_STEP: u64 = 512 * 1024;

const DOWNLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const VOD_VIEWER_MARKER: &str = "kms.ggc.go.kr/caster/player/vodViewer.do";
const VOD_HOST: &str = "https://kms.ggc.go.kr";

fn mp4file_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"var\s+mp4file\s*=\s*"([^"]+)""#).unwrap())
}

/// Whether the URL points at the media library's viewer page rather than
/// a direct MP4.
pub fn is_viewer_url(url: &str) -> bool {
    url.contains(VOD_VIEWER_MARKER)
}

/// Resolves a viewer-page URL to the direct MP4 URL by scraping the
/// `mp4file` variable from the page. Non-viewer URLs pass through.
pub async fn resolve_origin_url(
    client: &reqwest::Client,
    page_url: &str,
) -> Result<String, VodError> {
    if !is_viewer_url(page_url) {
        return Ok(page_url.to_string());
    }

    let page = client
        .get(page_url)
        .send()
        .await
        .map_err(|e| VodError::OriginResolution {
            message: e.to_string(),
        })?
        .error_for_status()
        .map_err(|e| VodError::OriginResolution {
            message: e.to_string(),
        })?
        .text()
        .await
        .map_err(|e| VodError::OriginResolution {
            message: e.to_string(),
        })?;

    let mp4file = mp4file_regex()
        .captures(&page)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| VodError::OriginResolution {
            message: format!("no mp4file variable in viewer page: {page_url}"),
        })?;

    let mp4_url = format!("{VOD_HOST}/mp4/{mp4file}");
    info!("VOD origin resolved: {} -> {}", page_url, mp4_url);
    Ok(mp4_url)
}

/// Splits a diarized word list into caption-sized runs: a new run starts
/// at every speaker change and whenever the run would span more than
/// `max_secs`.
pub fn group_words_for_vod(words: &[AsrWord], max_secs: f64) -> Vec<WordRun> {
    let mut groups: Vec<WordRun> = Vec::new();
    let Some(first) = words.first() else {
        return groups;
    };

    let mut speaker = first.speaker;
    let mut texts: Vec<&str> = Vec::new();
    let mut conf_sum = 0.0;
    let mut conf_count = 0usize;
    let mut start = first.start;
    let mut end = first.end;

    for w in words {
        let span_exceeded = !texts.is_empty() && w.end - start > max_secs;
        if (w.speaker != speaker || span_exceeded) && !texts.is_empty() {
            groups.push(WordRun {
                speaker,
                text: texts.join(" "),
                confidence: conf_sum / conf_count as f64,
                start,
                end,
            });
            texts.clear();
            conf_sum = 0.0;
            conf_count = 0;
            speaker = w.speaker;
            start = w.start;
        }
        texts.push(w.display_text());
        conf_sum += w.confidence;
        conf_count += 1;
        end = w.end;
    }

    if !texts.is_empty() {
        groups.push(WordRun {
            speaker,
            text: texts.join(" "),
            confidence: conf_sum / conf_count as f64,
            start,
            end,
        });
    }
    groups
}

/// Maps a provider reply onto caption rows. Prefers the utterance
/// segmentation; falls back to speaker-grouped words; yields nothing when
/// the reply has neither. Captions with empty text are never emitted.
pub fn captions_from_response(
    meeting_id: Uuid,
    response: &PrerecordedResponse,
    dictionary: &Dictionary,
) -> Vec<Subtitle> {
    let room_id = meeting_id.to_string();
    let make = |text: String, speaker: Option<u32>, confidence: f64, start: f64, end: f64| {
        let text = dictionary.correct(&collapse_whitespace(&text));
        if text.is_empty() {
            return None;
        }
        Some(Subtitle {
            id: Uuid::new_v4(),
            room_id: room_id.clone(),
            text,
            start_time_sec: start,
            end_time_sec: end,
            confidence,
            speaker_label: speaker.map(|s| format!("Speaker {}", s + 1)),
            created_at: Utc::now(),
            original_text: None,
        })
    };

    let utterances = response
        .results
        .as_ref()
        .map(|r| r.utterances.as_slice())
        .unwrap_or(&[]);
    if !utterances.is_empty() {
        return utterances
            .iter()
            .filter_map(|u| {
                make(
                    u.transcript.clone(),
                    u.speaker,
                    u.confidence,
                    u.start,
                    u.end,
                )
            })
            .collect();
    }

    group_words_for_vod(response.words(), MAX_GROUP_SECONDS)
        .into_iter()
        .filter_map(|run| make(run.text, run.speaker, run.confidence, run.start, run.end))
        .collect()
}

#[derive(Clone)]
pub struct VodSttService {
    tasks: Arc<RwLock<HashMap<Uuid, VodTask>>>,
    store: Arc<dyn CaptionStore>,
    dictionary: Arc<Dictionary>,
    asr: AsrConfig,
}

impl VodSttService {
    pub fn new(store: Arc<dyn CaptionStore>, dictionary: Arc<Dictionary>, asr: AsrConfig) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            store,
            dictionary,
            asr,
        }
    }

    /// Starts caption generation for a meeting's MP4. Rejected while
    /// another task for the same meeting is pending or running.
    pub fn start_task(&self, meeting_id: Uuid, video_url: String) -> Result<Uuid, VodError> {
        {
            let tasks = self.tasks.read().unwrap();
            if let Some(task) = tasks.get(&meeting_id) {
                if task.status.is_active() {
                    return Err(VodError::TaskAlreadyActive {
                        meeting_id: meeting_id.to_string(),
                    });
                }
            }
        }

        let asr_client = PrerecordedClient::new(self.asr.clone())?;

        let task_id = Uuid::new_v4();
        let now = Utc::now();
        self.tasks.write().unwrap().insert(
            meeting_id,
            VodTask {
                task_id,
                meeting_id,
                status: VodTaskStatus::Pending,
                progress: 0.0,
                message: "대기 중".to_string(),
                error: None,
                started_at: now,
                updated_at: now,
            },
        );

        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.run_pipeline(meeting_id, &video_url, asr_client).await {
                error!("VOD task for meeting {} failed: {:#}", meeting_id, e);
                service.update_task(meeting_id, VodTaskStatus::Failed, None, "실패", Some(e.to_string()));
                // Best effort: don't leave the meeting stuck in processing.
                if let Err(revert) = service
                    .store
                    .update_meeting_status(meeting_id, MeetingStatus::Ended, None)
                    .await
                {
                    warn!(
                        "VOD task for meeting {}: meeting state revert failed: {}",
                        meeting_id, revert
                    );
                }
            }
        });

        Ok(task_id)
    }

    pub fn task_status(&self, meeting_id: Uuid) -> Option<VodTask> {
        self.tasks.read().unwrap().get(&meeting_id).cloned()
    }

    fn update_task(
        &self,
        meeting_id: Uuid,
        status: VodTaskStatus,
        progress: Option<f32>,
        message: &str,
        error: Option<String>,
    ) {
        let mut tasks = self.tasks.write().unwrap();
        if let Some(task) = tasks.get_mut(&meeting_id) {
            task.status = status;
            if let Some(progress) = progress {
                task.progress = progress.clamp(0.0, 1.0);
            }
            task.message = message.to_string();
            task.error = error;
            task.updated_at = Utc::now();
        }
    }

    async fn run_pipeline(
        &self,
        meeting_id: Uuid,
        video_url: &str,
        asr_client: PrerecordedClient,
    ) -> Result<(), VodError> {
        self.update_task(meeting_id, VodTaskStatus::Running, Some(0.02), "원본 영상 확인 중", None);
        self.store
            .update_meeting_status(meeting_id, MeetingStatus::Processing, None)
            .await?;

        let http = reqwest::Client::builder()
            .connect_timeout(DOWNLOAD_CONNECT_TIMEOUT)
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| VodError::Download {
                message: e.to_string(),
            })?;

        let mp4_url = resolve_origin_url(&http, video_url).await?;

        // The scratch file lives exactly as long as this scope; every
        // exit path below releases it.
        let scratch = tempfile::NamedTempFile::new()?;
        let scratch_path = scratch.path().to_path_buf();

        self.update_task(meeting_id, VodTaskStatus::Running, Some(0.06), "영상 다운로드 중", None);
        self.download_mp4(&http, &mp4_url, &scratch_path, meeting_id).await?;

        self.update_task(meeting_id, VodTaskStatus::Running, Some(0.20), "음성 인식 업로드 중", None);
        let file_size = tokio::fs::metadata(&scratch_path).await?.len().max(1);
        let progress_service = self.clone();
        let response = asr_client
            .transcribe_mp4(
                &scratch_path,
                Arc::new(move |sent| {
                    let fraction = (sent as f64 / file_size as f64).min(1.0) as f32;
                    progress_service.update_task(
                        meeting_id,
                        VodTaskStatus::Running,
                        Some(0.20 + 0.20 * fraction),
                        "음성 인식 처리 중",
                        None,
                    );
                }),
            )
            .await?;

        let captions = captions_from_response(meeting_id, &response, &self.dictionary);
        info!(
            "VOD task for meeting {}: provider returned {} caption(s)",
            meeting_id,
            captions.len()
        );

        self.update_task(meeting_id, VodTaskStatus::Running, Some(0.80), "자막 저장 중", None);
        if !captions.is_empty() {
            self.store.insert_subtitles(&captions).await?;
        }

        self.update_task(meeting_id, VodTaskStatus::Running, Some(0.95), "회의 상태 갱신 중", None);
        self.store
            .update_meeting_status(meeting_id, MeetingStatus::Ended, response.duration_seconds())
            .await?;

        self.update_task(meeting_id, VodTaskStatus::Completed, Some(1.0), "완료", None);
        drop(scratch);
        Ok(())
    }

    async fn download_mp4(
        &self,
        http: &reqwest::Client,
        mp4_url: &str,
        dest: &std::path::Path,
        meeting_id: Uuid,
    ) -> Result<(), VodError> {
        // The origin rejects requests without a same-site Referer.
        let referer = Url::parse(mp4_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| format!("{}://{}/", u.scheme(), h)))
            .unwrap_or_else(|| VOD_HOST.to_string());

        let response = http
            .get(mp4_url)
            .header("Referer", referer)
            .send()
            .await
            .map_err(|e| VodError::Download {
                message: e.to_string(),
            })?
            .error_for_status()
            .map_err(|e| VodError::Download {
                message: e.to_string(),
            })?;

        let total = response.content_length();
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        let mut last_reported: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| VodError::Download {
                message: e.to_string(),
            })?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if downloaded - last_reported >= DOWNLOAD_PROGRESS_STEP {
                last_reported = downloaded;
                if let Some(total) = total {
                    let fraction = (downloaded as f64 / total as f64).min(1.0) as f32;
                    self.update_task(
                        meeting_id,
                        VodTaskStatus::Running,
                        Some(0.06 + 0.12 * fraction),
                        "영상 다운로드 중",
                        None,
                    );
                }
            }
        }
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, speaker: Option<u32>, start: f64, end: f64) -> AsrWord {
        AsrWord {
            word: text.to_string(),
            punctuated_word: None,
            start,
            end,
            confidence: 0.9,
            speaker,
        }
    }

    #[test]
    fn viewer_urls_are_detected() {
        assert!(is_viewer_url(
            "https://kms.ggc.go.kr/caster/player/vodViewer.do?midx=137982"
        ));
        assert!(!is_viewer_url("https://kms.ggc.go.kr/mp4/media/x.mp4"));
    }

    #[test]
    fn mp4file_variable_is_extracted() {
        let page = r#"<script>var mp4file = "/mp4media2/gihoek/20251222_gihoek.mp4";</script>"#;
        let captured = mp4file_regex().captures(page).unwrap();
        assert_eq!(&captured[1], "/mp4media2/gihoek/20251222_gihoek.mp4");
    }

    #[test]
    fn vod_grouping_splits_on_speaker_and_span() {
        let words = vec![
            word("하나", Some(0), 0.0, 2.0),
            word("둘", Some(0), 2.0, 9.0),
            // same speaker, but adding this would span past 10 s
            word("셋", Some(0), 9.0, 12.0),
            word("넷", Some(1), 12.0, 13.0),
        ];
        let groups = group_words_for_vod(&words, MAX_GROUP_SECONDS);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].text, "하나 둘");
        assert_eq!(groups[1].text, "셋");
        assert_eq!(groups[1].start, 9.0);
        assert_eq!(groups[2].speaker, Some(1));
    }

    fn response_json(json: &str) -> PrerecordedResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn utterances_map_one_to_one() {
        let response = response_json(
            r#"{
                "metadata": {"duration": 120.0},
                "results": {"utterances": [
                    {"start": 0.0, "end": 4.0, "confidence": 0.9,
                     "transcript": "개의를 선포합니다", "speaker": 0},
                    {"start": 4.5, "end": 9.0, "confidence": 0.8,
                     "transcript": "  ", "speaker": 0},
                    {"start": 9.5, "end": 14.0, "confidence": 0.85,
                     "transcript": "질의하겠습니다", "speaker": 1}
                ]}
            }"#,
        );
        let meeting_id = Uuid::new_v4();
        let captions =
            captions_from_response(meeting_id, &response, &Dictionary::with_parliament_defaults());

        // The blank utterance is dropped, the rest map in order.
        assert_eq!(captions.len(), 2);
        assert_eq!(captions[0].text, "개의를 선포합니다");
        assert_eq!(captions[0].speaker_label.as_deref(), Some("Speaker 1"));
        assert_eq!(captions[0].start_time_sec, 0.0);
        assert_eq!(captions[0].end_time_sec, 4.0);
        assert_eq!(captions[1].speaker_label.as_deref(), Some("Speaker 2"));
        assert_eq!(captions[1].room_id, meeting_id.to_string());
        assert!(captions
            .windows(2)
            .all(|w| w[0].start_time_sec <= w[1].start_time_sec));
    }

    #[test]
    fn word_fallback_used_when_no_utterances() {
        let response = response_json(
            r#"{
                "metadata": {"duration": 30.0},
                "results": {
                    "utterances": [],
                    "channels": [{"alternatives": [{
                        "transcript": "사내를 선포합니다",
                        "confidence": 0.9,
                        "words": [
                            {"word": "사내를", "start": 0.0, "end": 1.0,
                             "confidence": 0.9, "speaker": 0},
                            {"word": "선포합니다", "start": 1.0, "end": 2.0,
                             "confidence": 0.9, "speaker": 0}
                        ]
                    }]}]
                }
            }"#,
        );
        let captions = captions_from_response(
            Uuid::new_v4(),
            &response,
            &Dictionary::with_parliament_defaults(),
        );
        assert_eq!(captions.len(), 1);
        // Terminology correction applies on the fallback path too.
        assert_eq!(captions[0].text, "산회를 선포합니다");
    }

    #[test]
    fn empty_reply_emits_no_captions() {
        let response = response_json(r#"{"metadata": {"duration": 0.0}, "results": {}}"#);
        let captions = captions_from_response(
            Uuid::new_v4(),
            &response,
            &Dictionary::with_parliament_defaults(),
        );
        assert!(captions.is_empty());
    }

    struct NullStore;

    #[async_trait::async_trait]
    impl CaptionStore for NullStore {
        async fn insert_subtitles(&self, _subtitles: &[Subtitle]) -> Result<(), sqlx::Error> {
            Ok(())
        }
        async fn update_meeting_status(
            &self,
            _meeting_id: Uuid,
            _status: MeetingStatus,
            _duration_seconds: Option<f64>,
        ) -> Result<(), sqlx::Error> {
            Ok(())
        }
    }

    fn service_with_key() -> VodSttService {
        let mut asr = crate::config::Config::default().asr;
        asr.api_key = "test-key".to_string();
        VodSttService::new(
            Arc::new(NullStore),
            Arc::new(Dictionary::with_parliament_defaults()),
            asr,
        )
    }

    #[tokio::test]
    async fn duplicate_task_is_rejected_while_active() {
        let service = service_with_key();
        let meeting_id = Uuid::new_v4();

        let first = service.start_task(meeting_id, "https://media.example/a.mp4".to_string());
        assert!(first.is_ok());

        let second = service.start_task(meeting_id, "https://media.example/a.mp4".to_string());
        assert!(matches!(second, Err(VodError::TaskAlreadyActive { .. })));

        let task = service.task_status(meeting_id).unwrap();
        assert!(task.status.is_active());
    }

    #[test]
    fn missing_credential_rejects_task() {
        let service = VodSttService::new(
            Arc::new(NullStore),
            Arc::new(Dictionary::default()),
            crate::config::Config::default().asr,
        );
        // No runtime spawn happens on this path.
        let result = service.start_task(Uuid::new_v4(), "https://media.example/a.mp4".to_string());
        assert!(matches!(
            result,
            Err(VodError::Transcription(crate::errors::AsrError::MissingCredential))
        ));
    }
}
