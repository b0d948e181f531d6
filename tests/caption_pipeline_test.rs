//! End-to-end tests of the fragment -> sentence -> caption path, driving
//! the same sequence a live worker runs for each final `Results` frame.

use assembly_captions::assembler::{group_words_by_speaker, SentenceBuffer};
use assembly_captions::dictionary::Dictionary;
use assembly_captions::hub::SubscriberHub;
use assembly_captions::models::{RoomMessage, Subtitle};
use assembly_captions::spacing::collapse_whitespace;
use assembly_captions::stt::messages::AsrWord;
use chrono::Utc;
use uuid::Uuid;

fn word(text: &str, speaker: u32, start: f64, end: f64) -> AsrWord {
    AsrWord {
        word: text.to_string(),
        punctuated_word: None,
        start,
        end,
        confidence: 0.9,
        speaker: Some(speaker),
    }
}

/// Feeds one final fragment's word list through speaker grouping and the
/// sentence buffer, collecting each flushed caption, the way the live
/// worker does.
fn feed_fragment(
    buffer: &mut SentenceBuffer,
    dictionary: &Dictionary,
    room_id: &str,
    words: &[AsrWord],
    captions: &mut Vec<Subtitle>,
) {
    for run in group_words_by_speaker(words) {
        if run.text.is_empty() {
            continue;
        }
        if buffer.speaker_differs(run.speaker) {
            captions.push(emit(buffer, dictionary, room_id));
        }
        buffer.add(&run);
        if buffer.should_flush() {
            captions.push(emit(buffer, dictionary, room_id));
        }
    }
}

fn emit(buffer: &mut SentenceBuffer, dictionary: &Dictionary, room_id: &str) -> Subtitle {
    let text = dictionary.correct(&collapse_whitespace(&buffer.text()));
    let subtitle = Subtitle {
        id: Uuid::new_v4(),
        room_id: room_id.to_string(),
        text,
        start_time_sec: buffer.start_time(),
        end_time_sec: buffer.end_time(),
        confidence: buffer.avg_confidence(),
        speaker_label: buffer.speaker().map(|s| format!("Speaker {}", s + 1)),
        created_at: Utc::now(),
        original_text: None,
    };
    buffer.clear();
    subtitle
}

#[test]
fn two_speaker_session_assembles_ordered_captions() {
    let dictionary = Dictionary::with_parliament_defaults();
    let mut buffer = SentenceBuffer::new();
    let mut captions = Vec::new();

    // Final fragments in arrival order: a greeting, a sentence built from
    // two fragments, then a second speaker.
    feed_fragment(
        &mut buffer,
        &dictionary,
        "ch14",
        &[word("안녕하세요", 0, 0.0, 0.8)],
        &mut captions,
    );
    feed_fragment(
        &mut buffer,
        &dictionary,
        "ch14",
        &[word("오늘은", 0, 1.0, 1.5), word("회의를", 0, 1.6, 2.1)],
        &mut captions,
    );
    feed_fragment(
        &mut buffer,
        &dictionary,
        "ch14",
        &[word("시작하겠습니다.", 0, 2.2, 3.0)],
        &mut captions,
    );
    feed_fragment(
        &mut buffer,
        &dictionary,
        "ch14",
        &[word("네,", 1, 3.5, 3.8), word("좋습니다.", 1, 3.9, 4.5)],
        &mut captions,
    );

    // The greeting ends in a polite final, so it flushes on its own; the
    // next sentence accumulates across fragments until its terminator;
    // the speaker change starts a fresh buffer for speaker 2.
    assert_eq!(captions.len(), 3);
    assert_eq!(captions[0].text, "안녕하세요");
    assert_eq!(captions[0].speaker_label.as_deref(), Some("Speaker 1"));
    assert_eq!(captions[1].text, "오늘은 회의를 시작하겠습니다.");
    assert_eq!(captions[1].speaker_label.as_deref(), Some("Speaker 1"));
    assert_eq!(captions[2].text, "네, 좋습니다.");
    assert_eq!(captions[2].speaker_label.as_deref(), Some("Speaker 2"));

    // Emission order is non-decreasing in start time, and every caption
    // is well-formed.
    assert!(captions
        .windows(2)
        .all(|w| w[0].start_time_sec <= w[1].start_time_sec));
    for caption in &captions {
        assert!(caption.start_time_sec <= caption.end_time_sec);
        assert!((0.0..=1.0).contains(&caption.confidence));
    }
    assert!(buffer.is_empty());
}

#[test]
fn speaker_transition_flushes_without_punctuation() {
    let dictionary = Dictionary::default();
    let mut buffer = SentenceBuffer::new();
    let mut captions = Vec::new();

    // No terminator on the first speaker's fragment; the speaker change
    // alone must force the flush.
    feed_fragment(
        &mut buffer,
        &dictionary,
        "ch8",
        &[word("의사일정을", 0, 0.0, 0.7)],
        &mut captions,
    );
    assert!(captions.is_empty());

    feed_fragment(
        &mut buffer,
        &dictionary,
        "ch8",
        &[word("네", 1, 1.0, 1.2)],
        &mut captions,
    );
    assert_eq!(captions.len(), 1);
    assert_eq!(captions[0].text, "의사일정을");
    assert_eq!(captions[0].speaker_label.as_deref(), Some("Speaker 1"));
}

#[test]
fn flushed_text_preserves_fragment_totals() {
    let dictionary = Dictionary::default();
    let mut buffer = SentenceBuffer::new();
    let mut captions = Vec::new();

    let fragments = [
        vec![word("안건을", 0, 0.0, 0.5)],
        vec![word("상정하겠습니다.", 0, 0.6, 1.4)],
        vec![word("이의가", 0, 2.0, 2.4), word("없으십니까", 0, 2.5, 3.0)],
    ];
    for words in &fragments {
        feed_fragment(&mut buffer, &dictionary, "ch1", words, &mut captions);
    }
    // Session teardown: graceful end flushes the remainder.
    if !buffer.is_empty() {
        captions.push(emit(&mut buffer, &dictionary, "ch1"));
    }

    let emitted: Vec<String> = captions.iter().map(|c| c.text.clone()).collect();
    let all_words: Vec<String> = fragments
        .iter()
        .flatten()
        .map(|w| w.word.clone())
        .collect();
    assert_eq!(
        collapse_whitespace(&emitted.join(" ")),
        collapse_whitespace(&all_words.join(" "))
    );
}

#[tokio::test]
async fn emitted_captions_reach_late_joiners_through_the_hub() {
    let dictionary = Dictionary::with_parliament_defaults();
    let hub = SubscriberHub::new();
    let mut buffer = SentenceBuffer::new();
    let mut captions = Vec::new();

    for i in 0..5 {
        feed_fragment(
            &mut buffer,
            &dictionary,
            "ch8",
            &[word("확인했습니다.", 0, i as f64, i as f64 + 0.9)],
            &mut captions,
        );
    }
    assert_eq!(captions.len(), 5);
    for caption in &captions {
        hub.broadcast_created("ch8", caption.clone()).await;
    }

    let (_client, mut rx) = hub.connect("ch8").await;
    match rx.recv().await.unwrap() {
        RoomMessage::History { subtitles } => {
            assert_eq!(subtitles.len(), 5);
            assert!(subtitles
                .windows(2)
                .all(|w| w[0].start_time_sec <= w[1].start_time_sec));
        }
        other => panic!("expected history first, got {:?}", other),
    }

    hub.broadcast_created("ch8", captions[0].clone()).await;
    match rx.recv().await.unwrap() {
        RoomMessage::Created { .. } => {}
        other => panic!("expected created, got {:?}", other),
    }
}
