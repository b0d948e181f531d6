//! Live caption worker
//!
//! One ASR websocket session per channel, rebuilt with exponential
//! backoff. Inside a session four branches cooperate until the first of
//! them finishes, which tears the others down:
//!
//! - uploader: polls the playlist, downloads new TS segments, streams
//!   the bytes to the provider as binary frames
//! - receiver: routes provider `Results` frames into sentence assembly
//! - keepalive: periodic `{"type":"KeepAlive"}` frames
//! - watchdog: force-closes the socket when the provider goes silent

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::assembler::{group_words_by_speaker, SentenceBuffer, WordRun};
use crate::hls::PlaylistReader;
use crate::models::Subtitle;
use crate::refiner::PendingCaption;
use crate::spacing::collapse_whitespace;
use crate::stt::messages::StreamingFrame;
use crate::stt::{WorkerContext, WorkerStats};

const PROVIDER_WS_URL: &str = "wss://api.deepgram.com/v1/listen";
const INITIAL_RECONNECT_DELAY_SECS: f64 = 1.0;
/// Interim previews shorter than this are noise and not broadcast.
const MIN_INTERIM_CHARS: usize = 3;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type SharedSink = Arc<Mutex<WsSink>>;

/// Reconnect loop for one channel. Runs until cancelled.
pub(crate) async fn run_worker(
    ctx: WorkerContext,
    channel_id: String,
    stream_url: String,
    cancel: CancellationToken,
    stats: Arc<WorkerStats>,
) {
    let segment_timeout = Duration::from_secs(ctx.stt.segment_timeout_secs);
    let mut reader = match PlaylistReader::new(segment_timeout) {
        Ok(reader) => reader,
        Err(e) => {
            error!("Channel {}: playlist reader init failed: {}", channel_id, e);
            return;
        }
    };
    let segment_client = match reqwest::Client::builder().timeout(segment_timeout).build() {
        Ok(client) => client,
        Err(e) => {
            error!("Channel {}: HTTP client init failed: {}", channel_id, e);
            return;
        }
    };

    let mut delay = INITIAL_RECONNECT_DELAY_SECS;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Channel {}: STT cancelled", channel_id);
                return;
            }
            result = run_session(&ctx, &channel_id, &stream_url, &mut reader, &segment_client, &stats) => {
                match result {
                    Ok(()) => {
                        info!("Channel {}: STT session ended, reconnecting...", channel_id);
                        stats.set_last_error("session_ended_normally");
                        delay = INITIAL_RECONNECT_DELAY_SECS;
                    }
                    Err(e) => {
                        stats.set_last_error(e.to_string());
                        stats.record_reconnect();
                        error!(
                            "Channel {}: STT failed: {:#}, retrying in {:.0}s",
                            channel_id, e, delay
                        );
                    }
                }
            }
        }

        let jitter = delay * 0.1 * fastrand::f64();
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Channel {}: STT cancelled", channel_id);
                return;
            }
            _ = tokio::time::sleep(Duration::from_secs_f64(delay + jitter)) => {}
        }
        delay = (delay * 2.0).min(ctx.stt.max_reconnect_delay_secs);
    }
}

/// One websocket session. Returns Ok on graceful provider close.
async fn run_session(
    ctx: &WorkerContext,
    channel_id: &str,
    stream_url: &str,
    reader: &mut PlaylistReader,
    segment_client: &reqwest::Client,
    stats: &Arc<WorkerStats>,
) -> Result<()> {
    let mut request = build_ws_url(ctx)?
        .as_str()
        .into_client_request()
        .context("invalid ASR websocket request")?;
    request.headers_mut().insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Token {}", ctx.asr.api_key))
            .context("invalid ASR credential")?,
    );

    let (ws, _) = connect_async(request)
        .await
        .context("ASR websocket connect failed")?;
    info!("Channel {}: ASR websocket connected", channel_id);

    let (sink, source) = ws.split();
    let sink: SharedSink = Arc::new(Mutex::new(sink));
    stats.touch_activity();

    let poll_interval = Duration::from_secs_f64(ctx.stt.poll_interval_secs);
    let keepalive_interval = Duration::from_secs_f64(ctx.stt.keepalive_interval_secs);
    let stall_timeout = Duration::from_secs_f64(ctx.stt.stall_timeout_secs);

    // First branch to finish wins; the rest are dropped at their next
    // suspension point, then the socket goes down with the session.
    tokio::select! {
        r = upload_segments(channel_id, stream_url, reader, segment_client, &sink, poll_interval) => r,
        r = receive_results(ctx, channel_id, source, stats) => r,
        r = keepalive_loop(&sink, keepalive_interval) => r,
        r = watchdog_loop(channel_id, stats, &sink, stall_timeout) => r,
    }
}

fn build_ws_url(ctx: &WorkerContext) -> Result<Url> {
    let mut url = Url::parse(PROVIDER_WS_URL)?;
    url.query_pairs_mut()
        .append_pair("model", &ctx.asr.model)
        .append_pair("language", &ctx.asr.language)
        .append_pair("smart_format", "true")
        .append_pair("punctuate", "true")
        .append_pair("interim_results", "true")
        .append_pair("vad_events", "true")
        .append_pair("endpointing", &ctx.asr.endpointing_ms.to_string())
        .append_pair("diarize", "true");
    Ok(url)
}

/// Polls the playlist and relays each new segment's bytes. A failed
/// download skips that segment; a failed websocket send ends the session.
async fn upload_segments(
    channel_id: &str,
    stream_url: &str,
    reader: &mut PlaylistReader,
    client: &reqwest::Client,
    sink: &SharedSink,
    poll_interval: Duration,
) -> Result<()> {
    loop {
        match reader.fetch_new_segments(stream_url).await {
            Ok(segments) => {
                for segment_url in segments {
                    match download_segment(client, &segment_url).await {
                        Ok(bytes) => {
                            debug!(
                                "Channel {}: sending segment {} ({} bytes)",
                                channel_id,
                                segment_url.rsplit('/').next().unwrap_or(&segment_url),
                                bytes.len()
                            );
                            sink.lock()
                                .await
                                .send(Message::Binary(bytes))
                                .await
                                .context("segment send failed")?;
                        }
                        Err(e) => {
                            warn!("Channel {}: segment download failed: {:#}", channel_id, e);
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Channel {}: playlist poll failed: {:#}", channel_id, e);
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}

async fn download_segment(client: &reqwest::Client, segment_url: &str) -> Result<Vec<u8>> {
    let response = client
        .get(segment_url)
        .send()
        .await?
        .error_for_status()?;
    Ok(response.bytes().await?.to_vec())
}

/// Drains provider frames into sentence assembly. Returning Ok means the
/// provider closed the stream; the remaining buffer is flushed then.
async fn receive_results(
    ctx: &WorkerContext,
    channel_id: &str,
    mut source: WsSource,
    stats: &Arc<WorkerStats>,
) -> Result<()> {
    let mut buffer = SentenceBuffer::new();

    while let Some(message) = source.next().await {
        let message = message.context("ASR websocket receive failed")?;
        stats.touch_activity();

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let frame: StreamingFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(_) => {
                warn!("Channel {}: invalid JSON from ASR provider", channel_id);
                continue;
            }
        };
        if !frame.is_results() {
            continue;
        }
        let Some(alt) = frame.first_alternative() else {
            continue;
        };

        if !frame.is_final {
            let raw = if alt.words.is_empty() {
                alt.transcript.trim().to_string()
            } else {
                alt.words
                    .iter()
                    .map(|w| w.display_text())
                    .collect::<Vec<_>>()
                    .join(" ")
            };
            if raw.chars().count() >= MIN_INTERIM_CHARS {
                let spaced = collapse_whitespace(&ctx.spacing.space(&raw));
                let corrected = ctx.dictionary.correct(&spaced);
                ctx.hub.broadcast_interim(channel_id, corrected).await;
            }
            continue;
        }

        let runs: Vec<WordRun> = if alt.words.is_empty() {
            let transcript = alt.transcript.trim();
            if transcript.is_empty() {
                continue;
            }
            vec![WordRun {
                speaker: None,
                text: transcript.to_string(),
                confidence: alt.confidence,
                start: frame.start,
                end: frame.start + frame.duration,
            }]
        } else {
            group_words_by_speaker(&alt.words)
        };

        for run in runs {
            if run.text.is_empty() {
                continue;
            }
            debug!(
                "Channel {}: fragment '{}' ({:.2}) speaker={:?}",
                channel_id,
                preview(&run.text, 60),
                run.confidence,
                run.speaker
            );

            if buffer.speaker_differs(run.speaker) {
                emit_caption(ctx, channel_id, stats, &mut buffer).await;
            }
            buffer.add(&run);
            stats.set_buffer_preview(Some(preview(&buffer.text(), 100)));

            if buffer.should_flush() {
                emit_caption(ctx, channel_id, stats, &mut buffer).await;
            }
        }
    }

    // Graceful close: flush whatever is left.
    if !buffer.is_empty() {
        emit_caption(ctx, channel_id, stats, &mut buffer).await;
    }
    Ok(())
}

/// Post-processes the buffered sentence and broadcasts it as a caption.
async fn emit_caption(
    ctx: &WorkerContext,
    channel_id: &str,
    stats: &Arc<WorkerStats>,
    buffer: &mut SentenceBuffer,
) {
    let raw = buffer.text();
    let spaced = collapse_whitespace(&ctx.spacing.space(&raw));
    let text = ctx.dictionary.correct(&spaced);
    if text.is_empty() {
        buffer.clear();
        stats.set_buffer_preview(None);
        return;
    }

    let speaker_label = buffer.speaker().map(|s| format!("Speaker {}", s + 1));
    let subtitle = Subtitle {
        id: Uuid::new_v4(),
        room_id: channel_id.to_string(),
        text: text.clone(),
        start_time_sec: buffer.start_time(),
        end_time_sec: buffer.end_time(),
        confidence: buffer.avg_confidence(),
        speaker_label: speaker_label.clone(),
        created_at: Utc::now(),
        original_text: None,
    };

    info!(
        "Channel {}: [STT] {} ({:.2}) [{}]",
        channel_id,
        preview(&text, 80),
        subtitle.confidence,
        speaker_label.as_deref().unwrap_or("?")
    );

    ctx.hub.broadcast_created(channel_id, subtitle.clone()).await;

    if let Some(refiner) = &ctx.refiner {
        refiner.enqueue(PendingCaption {
            id: subtitle.id,
            room_id: channel_id.to_string(),
            text,
            speaker: speaker_label,
        });
    }

    stats.record_caption();
    stats.set_buffer_preview(None);
    buffer.clear();
}

async fn keepalive_loop(sink: &SharedSink, interval: Duration) -> Result<()> {
    loop {
        tokio::time::sleep(interval).await;
        let frame = Message::Text(r#"{"type":"KeepAlive"}"#.to_string());
        if sink.lock().await.send(frame).await.is_err() {
            return Ok(());
        }
    }
}

/// Force-closes the socket after `stall_timeout` of provider silence;
/// the reconnect loop then rebuilds the session.
async fn watchdog_loop(
    channel_id: &str,
    stats: &Arc<WorkerStats>,
    sink: &SharedSink,
    stall_timeout: Duration,
) -> Result<()> {
    loop {
        tokio::time::sleep(stall_timeout / 2).await;
        let elapsed = stats.secs_since_activity();
        if elapsed > stall_timeout.as_secs_f64() {
            warn!(
                "Channel {}: STT stalled (no provider response for {:.0}s), forcing reconnect",
                channel_id, elapsed
            );
            let _ = sink.lock().await.close().await;
            return Ok(());
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
