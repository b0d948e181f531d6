//! Caption refiner
//!
//! Batches recently emitted captions and sends them to an LLM rewriter
//! that fixes speaker names against the configured roster, normalizes
//! numeric and parliamentary expressions and returns strict JSON. Each
//! correction that differs from the original goes back out as a
//! `subtitle_corrected` event. Captions are never blocked on the
//! refiner: rewriter errors drop the batch and the loop keeps going.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::RefinerConfig;
use crate::hub::SubscriberHub;

/// A caption queued for refinement. Cheap metadata only.
#[derive(Debug, Clone, Serialize)]
pub struct PendingCaption {
    pub id: Uuid,
    #[serde(skip)]
    pub room_id: String,
    pub text: String,
    pub speaker: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Correction {
    #[serde(default)]
    id: String,
    #[serde(default)]
    corrected_text: String,
}

#[derive(Debug, Deserialize)]
struct RewriterReply {
    choices: Vec<RewriterChoice>,
}

#[derive(Debug, Deserialize)]
struct RewriterChoice {
    message: RewriterMessage,
}

#[derive(Debug, Deserialize)]
struct RewriterMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Cloneable enqueue side of the refiner.
#[derive(Clone)]
pub struct RefinerHandle {
    tx: mpsc::UnboundedSender<PendingCaption>,
}

impl RefinerHandle {
    pub fn enqueue(&self, caption: PendingCaption) {
        let _ = self.tx.send(caption);
    }
}

pub struct CaptionRefiner {
    handle: RefinerHandle,
    worker: tokio::task::JoinHandle<()>,
}

impl CaptionRefiner {
    /// Spawns the batching consumer. Returns None when no rewriter
    /// credential is configured; the engine then runs without refinement.
    pub fn spawn(config: RefinerConfig, hub: SubscriberHub) -> Option<Self> {
        if config.api_key.is_empty() {
            info!("Caption refiner disabled: no rewriter API key configured");
            return None;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        info!(
            "Caption refiner started (model={}, batch={}, interval={:.1}s)",
            config.model, config.batch_size, config.batch_interval_secs
        );
        let worker = tokio::spawn(run_consumer(config, hub, rx));
        Some(Self {
            handle: RefinerHandle { tx },
            worker,
        })
    }

    pub fn handle(&self) -> RefinerHandle {
        self.handle.clone()
    }

    pub fn shutdown(&self) {
        self.worker.abort();
    }
}

async fn run_consumer(
    config: RefinerConfig,
    hub: SubscriberHub,
    mut rx: mpsc::UnboundedReceiver<PendingCaption>,
) {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("Refiner HTTP client init failed: {}", e);
            return;
        }
    };
    let system_prompt = build_system_prompt(&config.roster);
    let interval = Duration::from_secs_f64(config.batch_interval_secs);

    loop {
        // Block on the first caption, then aggregate until the batch is
        // full or the interval elapses.
        let Some(first) = rx.recv().await else {
            return;
        };
        let mut batch = vec![first];
        let deadline = Instant::now() + interval;
        while batch.len() < config.batch_size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(caption)) => batch.push(caption),
                Ok(None) => return,
                Err(_) => break,
            }
        }

        if let Err(e) = refine_batch(&client, &config, &system_prompt, &hub, &batch).await {
            error!("Refiner batch failed, dropping {} caption(s): {:#}", batch.len(), e);
        }
    }
}

async fn refine_batch(
    client: &reqwest::Client,
    config: &RefinerConfig,
    system_prompt: &str,
    hub: &SubscriberHub,
    batch: &[PendingCaption],
) -> anyhow::Result<()> {
    let subtitles_json = serde_json::to_string(batch)?;
    let body = json!({
        "model": config.model,
        "messages": [
            {"role": "system", "content": system_prompt},
            {"role": "user", "content": format!("다음 자막들을 교정해주세요:\n{subtitles_json}")},
        ],
        "temperature": 0.1,
        "response_format": {"type": "json_object"},
    });

    let reply: RewriterReply = client
        .post(&config.api_url)
        .bearer_auth(&config.api_key)
        .json(&body)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let Some(content) = reply.choices.first().and_then(|c| c.message.content.clone()) else {
        return Ok(());
    };
    let corrections = parse_corrections(&content)?;

    for correction in corrections {
        let Ok(id) = Uuid::parse_str(&correction.id) else {
            continue;
        };
        let Some(original) = batch.iter().find(|c| c.id == id) else {
            continue;
        };
        if correction.corrected_text.is_empty() || correction.corrected_text == original.text {
            continue;
        }
        info!(
            "Refiner: [{}] '{}' -> '{}'",
            &correction.id[..8.min(correction.id.len())],
            truncate(&original.text, 40),
            truncate(&correction.corrected_text, 40)
        );
        hub.broadcast_corrected(&original.room_id, id, correction.corrected_text)
            .await;
    }
    Ok(())
}

/// The rewriter may reply with a bare array or wrap it in a
/// `corrections` object.
fn parse_corrections(content: &str) -> anyhow::Result<Vec<Correction>> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("corrections") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                warn!("Refiner reply had no corrections array");
                return Ok(Vec::new());
            }
        },
        _ => return Ok(Vec::new()),
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

fn build_system_prompt(roster: &[String]) -> String {
    let roster_line = if roster.is_empty() {
        "(명단 없음 - 이름 교정 생략)".to_string()
    } else {
        roster.join(", ")
    };
    format!(
        "당신은 의회 회의록 교정 전문가입니다.\n\
음성인식(STT)으로 생성된 자막을 교정해주세요.\n\
\n\
## 규칙\n\
1. **의원 이름**: 절대 틀리면 안 됩니다. 아래 의원 목록을 참조하세요.\n\
2. **숫자/금액**: 정확하게 표기하세요. (예: \"삼천억\" -> \"3,000억원\")\n\
3. **의회 용어**: 개의, 산회, 속개, 상정, 의결, 표결, 질의, 답변, 채택, 부의를 정확히 사용하세요.\n\
4. **자연스러운 한국어**: 띄어쓰기, 조사, 어미를 교정하세요.\n\
5. **의미 보존**: 원래 의미를 절대 변경하지 마세요.\n\
6. **교정 불필요**: 이미 정확한 자막은 그대로 반환하세요.\n\
\n\
## 의원 목록\n\
{roster_line}\n\
\n\
## 출력 형식\n\
JSON 객체로 응답하세요: {{\"corrections\": [{{\"id\": \"원본ID\", \"corrected_text\": \"교정된 텍스트\"}}]}}"
    )
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_array_and_wrapped_corrections() {
        let bare = r#"[{"id": "abc", "corrected_text": "교정"}]"#;
        let parsed = parse_corrections(bare).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].corrected_text, "교정");

        let wrapped = r#"{"corrections": [{"id": "abc", "corrected_text": "교정"}]}"#;
        let parsed = parse_corrections(wrapped).unwrap();
        assert_eq!(parsed.len(), 1);

        let empty = r#"{"something_else": true}"#;
        assert!(parse_corrections(empty).unwrap().is_empty());
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(parse_corrections("not json").is_err());
    }

    #[test]
    fn system_prompt_embeds_roster() {
        let prompt = build_system_prompt(&["김선영".to_string(), "박근철".to_string()]);
        assert!(prompt.contains("김선영, 박근철"));

        let prompt = build_system_prompt(&[]);
        assert!(prompt.contains("명단 없음"));
    }

    #[test]
    fn refiner_without_credential_is_disabled() {
        let config = crate::config::Config::default().refiner;
        assert!(config.api_key.is_empty());
        // spawn requires a runtime only when enabled; disabled path is sync
        let refiner = CaptionRefiner::spawn(config, SubscriberHub::new());
        assert!(refiner.is_none());
    }
}
