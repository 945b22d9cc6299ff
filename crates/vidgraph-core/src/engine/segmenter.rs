// Vidgraph Engine — Segment Assembler
//
// Turns a word-level timeline plus punctuation-restored text into
// timestamped, sentence-chunked transcript segments. Pure CPU work; the
// transcript provider and punctuation model live outside this crate.

use log::warn;

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::graph_types::{TranscriptInput, TranscriptSegment, WordTiming};
use crate::atoms::types::SegmenterConfig;

// ── Intermediate shapes ────────────────────────────────────────────────────

/// A punctuated word with its timing, after merging the two input streams.
#[derive(Debug, Clone)]
struct TimedWord {
    text: String,
    start: f64,
    end: f64,
}

/// A sentence assembled from timed words.
#[derive(Debug, Clone)]
struct Sentence {
    text: String,
    start: f64,
    end: f64,
    token_count: usize,
}

// ── Public API ─────────────────────────────────────────────────────────────

/// Assemble sentence-chunked segments for one video.
///
/// Fails with `EmptyTranscript` when the input produces no segments.
pub fn assemble_segments(
    input: &TranscriptInput,
    config: &SegmenterConfig,
) -> EngineResult<Vec<TranscriptSegment>> {
    let punctuated_words: Vec<&str> = input.punctuated_text.split_whitespace().collect();
    let timed_words = merge_words_with_timeline(&input.timeline, &punctuated_words);
    let sentences = words_to_sentences(&timed_words);
    let segments = sentences_to_segments(&sentences, &input.video_id, config);

    if segments.is_empty() {
        return Err(EngineError::EmptyTranscript(format!(
            "no segments produced for video {}",
            input.video_id
        )));
    }
    Ok(segments)
}

/// Render structured segments back to transcript text with timestamps,
/// one `[HH:MM:SS.ss] text` paragraph per segment.
pub fn render_transcript(segments: &[TranscriptSegment]) -> String {
    let mut lines = Vec::with_capacity(segments.len() * 2);
    for segment in segments {
        lines.push(format!("{} {}", format_timestamp(segment.start_s), segment.text));
        lines.push(String::new());
    }
    let mut text = lines.join("\n");
    while text.ends_with('\n') {
        text.pop();
    }
    text.push('\n');
    text
}

// ── Word / sentence assembly ───────────────────────────────────────────────

/// Merge punctuated words with their corresponding timestamps.
/// Mismatched lengths are truncated to the shorter stream with a warning.
fn merge_words_with_timeline(timeline: &[WordTiming], punctuated: &[&str]) -> Vec<TimedWord> {
    let limit = timeline.len().min(punctuated.len());
    if limit == 0 {
        return Vec::new();
    }
    if timeline.len() != punctuated.len() {
        warn!(
            "[segmenter] Word alignment mismatch: {} timed words vs {} punctuated words; truncating to smallest length",
            timeline.len(),
            punctuated.len()
        );
    }
    (0..limit)
        .map(|idx| TimedWord {
            text: punctuated[idx].to_string(),
            start: timeline[idx].start_s,
            end: timeline[idx].end_s,
        })
        .collect()
}

/// Group timed words into sentences on terminal punctuation.
fn words_to_sentences(words: &[TimedWord]) -> Vec<Sentence> {
    let mut sentences = Vec::new();
    let mut current: Vec<&TimedWord> = Vec::new();

    for word in words {
        current.push(word);
        if word_ends_sentence(&word.text) {
            sentences.push(build_sentence(&current));
            current.clear();
        }
    }
    if !current.is_empty() {
        sentences.push(build_sentence(&current));
    }
    sentences
}

/// A word ends a sentence when, after stripping right-side closing
/// quotes/brackets, its last character is `.`, `!`, or `?`.
fn word_ends_sentence(word: &str) -> bool {
    const CLOSERS: &[char] = &['"', '\'', ')', ']', '}', '»', '”', '’', '›'];
    let trimmed = word.trim_end_matches(CLOSERS);
    trimmed
        .chars()
        .last()
        .map(|c| matches!(c, '.' | '!' | '?'))
        .unwrap_or(false)
}

fn build_sentence(words: &[&TimedWord]) -> Sentence {
    Sentence {
        text: words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        start: words[0].start,
        end: words[words.len() - 1].end,
        token_count: words.len(),
    }
}

/// Accumulate sentences greedily into segments within the soft token bounds:
/// flush the buffer before appending a sentence once the buffer holds at
/// least `min_tokens` and the sentence would push it past `max_tokens`.
fn sentences_to_segments(
    sentences: &[Sentence],
    video_id: &str,
    config: &SegmenterConfig,
) -> Vec<TranscriptSegment> {
    let mut segments = Vec::new();
    let mut current: Vec<&Sentence> = Vec::new();
    let mut token_count = 0usize;

    for sentence in sentences {
        let should_flush = !current.is_empty()
            && token_count >= config.min_tokens
            && token_count + sentence.token_count > config.max_tokens;

        if should_flush {
            segments.push(build_segment(&current, video_id, token_count));
            current.clear();
            token_count = 0;
        }

        current.push(sentence);
        token_count += sentence.token_count;
    }

    if !current.is_empty() {
        segments.push(build_segment(&current, video_id, token_count));
    }
    segments
}

fn build_segment(sentences: &[&Sentence], video_id: &str, tokens: usize) -> TranscriptSegment {
    TranscriptSegment {
        video_id: video_id.to_string(),
        text: sentences
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        start_s: sentences[0].start,
        end_s: sentences[sentences.len() - 1].end,
        tokens,
    }
}

/// Convert seconds to `[HH:MM:SS.ss]` format.
fn format_timestamp(seconds: f64) -> String {
    let hours = (seconds / 3600.0) as u64;
    let minutes = ((seconds % 3600.0) / 60.0) as u64;
    let secs = seconds % 60.0;
    format!("[{:02}:{:02}:{:05.2}]", hours, minutes, secs)
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn make_input(words: &[&str], seconds_per_word: f64) -> TranscriptInput {
        let timeline: Vec<WordTiming> = (0..words.len())
            .map(|i| WordTiming {
                start_s: i as f64 * seconds_per_word,
                end_s: (i + 1) as f64 * seconds_per_word,
            })
            .collect();
        TranscriptInput {
            video_id: "vid123".to_string(),
            timeline,
            punctuated_text: words.join(" "),
        }
    }

    #[test]
    fn test_word_ends_sentence() {
        assert!(word_ends_sentence("done."));
        assert!(word_ends_sentence("really?"));
        assert!(word_ends_sentence("wow!"));
        assert!(word_ends_sentence("quote.\""));
        assert!(word_ends_sentence("bracket.)"));
        assert!(word_ends_sentence("nested.\")"));
        assert!(!word_ends_sentence("middle"));
        assert!(!word_ends_sentence("comma,"));
        assert!(!word_ends_sentence("\""));
    }

    #[test]
    fn test_single_sentence_single_segment() {
        let input = make_input(&["hello", "world", "today."], 1.0);
        let segments = assemble_segments(&input, &SegmenterConfig::default()).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "hello world today.");
        assert_eq!(segments[0].tokens, 3);
        assert_eq!(segments[0].start_s, 0.0);
        assert_eq!(segments[0].end_s, 3.0);
    }

    #[test]
    fn test_chunking_respects_bounds() {
        // 40 sentences of 10 words each; min 120 / max 320 means segments
        // flush once the next sentence would cross 320 tokens.
        let mut words = Vec::new();
        for _ in 0..40 {
            for _ in 0..9 {
                words.push("word");
            }
            words.push("end.");
        }
        let refs: Vec<&str> = words.iter().copied().collect();
        let input = make_input(&refs, 0.5);
        let segments = assemble_segments(&input, &SegmenterConfig::default()).unwrap();
        assert!(segments.len() > 1);
        for (i, segment) in segments.iter().enumerate() {
            assert!(segment.tokens >= 1);
            if i + 1 < segments.len() {
                assert!(segment.tokens <= 320, "segment {} has {} tokens", i, segment.tokens);
                assert!(segment.tokens >= 120, "segment {} has {} tokens", i, segment.tokens);
            }
        }
        // Timestamps monotone, non-overlapping
        for pair in segments.windows(2) {
            assert!(pair[0].start_s <= pair[1].start_s);
            assert!(pair[0].end_s <= pair[1].start_s + 1e-9);
        }
    }

    #[test]
    fn test_text_preserved() {
        let mut words = Vec::new();
        for i in 0..400 {
            words.push(if i % 12 == 11 { "stop." } else { "token" });
        }
        let refs: Vec<&str> = words.iter().copied().collect();
        let input = make_input(&refs, 0.25);
        let segments = assemble_segments(&input, &SegmenterConfig::default()).unwrap();
        let rejoined = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(rejoined, input.punctuated_text);
        let total_tokens: usize = segments.iter().map(|s| s.tokens).sum();
        assert_eq!(total_tokens, 400);
    }

    #[test]
    fn test_length_mismatch_truncates() {
        let mut input = make_input(&["one", "two", "three", "four."], 1.0);
        input.timeline.truncate(2);
        let segments = assemble_segments(&input, &SegmenterConfig::default()).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "one two");
        assert_eq!(segments[0].tokens, 2);
    }

    #[test]
    fn test_empty_transcript_fails() {
        let input = TranscriptInput {
            video_id: "vid123".to_string(),
            timeline: vec![],
            punctuated_text: String::new(),
        };
        let err = assemble_segments(&input, &SegmenterConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::EmptyTranscript(_)));
    }

    #[test]
    fn test_segment_ids_deterministic() {
        let input = make_input(&["hello", "there", "world."], 2.0);
        let a = assemble_segments(&input, &SegmenterConfig::default()).unwrap();
        let b = assemble_segments(&input, &SegmenterConfig::default()).unwrap();
        assert_eq!(a[0].deterministic_id(), b[0].deterministic_id());
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "[00:00:00.00]");
        assert_eq!(format_timestamp(75.5), "[00:01:15.50]");
        assert_eq!(format_timestamp(3661.25), "[01:01:01.25]");
    }

    #[test]
    fn test_render_transcript() {
        let input = make_input(&["hello", "world."], 1.0);
        let segments = assemble_segments(&input, &SegmenterConfig::default()).unwrap();
        let rendered = render_transcript(&segments);
        assert!(rendered.starts_with("[00:00:00.00] hello world."));
        assert!(rendered.ends_with('\n'));
    }
}
