//! Streaming classifier for `<think>...</think>` reasoning blocks.
//!
//! The scanner is a two-state automaton (`Outside` / `InsideThink`) with a
//! bounded lookback buffer. Fragments may split a delimiter anywhere, so the
//! tail of every fragment that could still turn into the delimiter for the
//! current mode is held back until the next fragment (or end of stream)
//! decides it.
//!
//! There is no malformed-delimiter error: any ambiguous tail is resolved by
//! more input or by [`TagScanner::finish`].

pub const THINK_START: &str = "<think>";
pub const THINK_END: &str = "</think>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Thinking,
    Answer,
}

/// A classified run of content. Never empty when produced by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub text: String,
}

impl Segment {
    pub fn thinking(text: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Thinking,
            text: text.into(),
        }
    }

    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Answer,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    #[default]
    Outside,
    InsideThink,
}

impl ScanMode {
    /// Delimiter that ends the current mode. The other one is literal text here.
    fn delimiter(self) -> &'static str {
        match self {
            ScanMode::Outside => THINK_START,
            ScanMode::InsideThink => THINK_END,
        }
    }

    fn kind(self) -> SegmentKind {
        match self {
            ScanMode::Outside => SegmentKind::Answer,
            ScanMode::InsideThink => SegmentKind::Thinking,
        }
    }

    fn toggled(self) -> Self {
        match self {
            ScanMode::Outside => ScanMode::InsideThink,
            ScanMode::InsideThink => ScanMode::Outside,
        }
    }
}

/// Output of [`TagScanner::finish`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanEnd {
    pub segments: Vec<Segment>,
    /// The stream closed inside a think block (`TruncatedThinkBlock`).
    pub truncated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TagScanner {
    mode: ScanMode,
    pending: String,
}

impl TagScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Classify one fragment. Text that is confirmed not to be part of a
    /// delimiter is emitted right away; only a possible delimiter prefix at the
    /// very end is carried into the next call.
    pub fn scan(&mut self, fragment: &str) -> Vec<Segment> {
        let mut segments = Vec::new();
        if fragment.is_empty() {
            return segments;
        }

        let mut text = std::mem::take(&mut self.pending);
        text.push_str(fragment);

        let mut rest = text.as_str();
        loop {
            let delimiter = self.mode.delimiter();
            match rest.find(delimiter) {
                Some(idx) => {
                    push_segment(&mut segments, self.mode.kind(), &rest[..idx]);
                    rest = &rest[idx + delimiter.len()..];
                    self.mode = self.mode.toggled();
                }
                None => {
                    let held = partial_suffix_len(rest, delimiter);
                    let (emit, hold) = rest.split_at(rest.len() - held);
                    push_segment(&mut segments, self.mode.kind(), emit);
                    self.pending = hold.to_string();
                    break;
                }
            }
        }

        segments
    }

    /// End of stream: whatever is still held was never a delimiter, so it
    /// flushes as content of the current mode. The scanner is left `Outside`
    /// and empty, ready for the next response stream.
    pub fn finish(&mut self) -> ScanEnd {
        let mut segments = Vec::new();
        let pending = std::mem::take(&mut self.pending);
        push_segment(&mut segments, self.mode.kind(), &pending);

        let truncated = self.mode == ScanMode::InsideThink;
        self.mode = ScanMode::Outside;

        ScanEnd {
            segments,
            truncated,
        }
    }

    /// Forget everything, used when a new conversation starts.
    pub fn reset(&mut self) {
        self.mode = ScanMode::Outside;
        self.pending.clear();
    }
}

fn push_segment(segments: &mut Vec<Segment>, kind: SegmentKind, text: &str) {
    if text.is_empty() {
        return;
    }
    // Adjacent runs of one kind merge into one segment
    if let Some(last) = segments.last_mut() {
        if last.kind == kind {
            last.text.push_str(text);
            return;
        }
    }
    segments.push(Segment {
        kind,
        text: text.to_string(),
    });
}

/// Length of the longest suffix of `text` that is a strict prefix of
/// `delimiter`. Always smaller than `delimiter.len()`.
fn partial_suffix_len(text: &str, delimiter: &str) -> usize {
    let max = text.len().min(delimiter.len() - 1);
    (1..=max)
        .rev()
        .find(|&len| {
            text.is_char_boundary(text.len() - len)
                && delimiter.starts_with(&text[text.len() - len..])
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(fragments: &[&str]) -> (Vec<Segment>, bool) {
        let mut scanner = TagScanner::new();
        let mut segments = Vec::new();
        for fragment in fragments {
            segments.extend(scanner.scan(fragment));
        }
        let end = scanner.finish();
        segments.extend(end.segments);
        (merge(segments), end.truncated)
    }

    // Adjacent segments of one kind can come from separate fragments.
    fn merge(segments: Vec<Segment>) -> Vec<Segment> {
        let mut merged: Vec<Segment> = Vec::new();
        for segment in segments {
            match merged.last_mut() {
                Some(last) if last.kind == segment.kind => last.text.push_str(&segment.text),
                _ => merged.push(segment),
            }
        }
        merged
    }

    fn strip_delimiters(text: &str) -> String {
        text.replace(THINK_START, "").replace(THINK_END, "")
    }

    #[test]
    fn test_split_fragments_scenario() {
        let (segments, truncated) = run(&["Hello ", "<thi", "nk>reasoning here</th", "ink> world"]);
        assert_eq!(
            segments,
            vec![
                Segment::answer("Hello "),
                Segment::thinking("reasoning here"),
                Segment::answer(" world"),
            ]
        );
        assert!(!truncated);
    }

    #[test]
    fn test_answer_emitted_before_fragment_ends() {
        let mut scanner = TagScanner::new();
        let segments = scanner.scan("Hello <thi");
        assert_eq!(segments, vec![Segment::answer("Hello ")]);
        assert_eq!(scanner.pending(), "<thi");
        assert_eq!(scanner.mode(), ScanMode::Outside);
    }

    #[test]
    fn test_every_split_point_of_both_delimiters() {
        let input = "pre<think>inner</think>post";
        let (expected, _) = run(&[input]);
        assert_eq!(
            expected,
            vec![
                Segment::answer("pre"),
                Segment::thinking("inner"),
                Segment::answer("post"),
            ]
        );

        for split in 1..input.len() {
            let (head, tail) = input.split_at(split);
            let (segments, truncated) = run(&[head, tail]);
            assert_eq!(segments, expected, "split at {split}");
            assert!(!truncated);
        }
    }

    #[test]
    fn test_chunking_invariance_with_single_char_fragments() {
        let input = "a<<think>b</thi</think>c<think></think>d</e<";
        let whole = run(&[input]);
        let chars: Vec<String> = input.chars().map(String::from).collect();
        let refs: Vec<&str> = chars.iter().map(String::as_str).collect();
        assert_eq!(run(&refs), whole);

        let concatenated: String = whole.0.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(concatenated, strip_delimiters(input));
    }

    #[test]
    fn test_chunking_invariance_across_fixed_sizes() {
        let input = "Intro <think>step one\nstep </think> two</think> Done. <think>again";
        let whole = run(&[input]);
        for size in 1..=9 {
            let chunks: Vec<&str> = input
                .as_bytes()
                .chunks(size)
                .map(|c| std::str::from_utf8(c).unwrap())
                .collect();
            assert_eq!(run(&chunks), whole, "chunk size {size}");
        }
    }

    #[test]
    fn test_nested_start_is_literal() {
        let (segments, truncated) = run(&["<think>a<think>b</think>c</think>"]);
        assert_eq!(
            segments,
            vec![Segment::thinking("a<think>b"), Segment::answer("c</think>")]
        );
        assert!(!truncated);
    }

    #[test]
    fn test_end_delimiter_outside_is_answer() {
        let (segments, _) = run(&["x</th", "ink>y"]);
        assert_eq!(segments, vec![Segment::answer("x</think>y")]);
    }

    #[test]
    fn test_truncated_think_block() {
        let (segments, truncated) = run(&["<think>partial"]);
        assert_eq!(segments, vec![Segment::thinking("partial")]);
        assert!(truncated);
    }

    #[test]
    fn test_pending_prefix_flushed_at_end() {
        let mut scanner = TagScanner::new();
        assert_eq!(scanner.scan("answer <thin"), vec![Segment::answer("answer ")]);
        let end = scanner.finish();
        assert_eq!(end.segments, vec![Segment::answer("<thin")]);
        assert!(!end.truncated);

        let mut scanner = TagScanner::new();
        assert!(scanner.scan("<think>why</").iter().all(|s| s.kind == SegmentKind::Thinking));
        let end = scanner.finish();
        assert_eq!(end.segments, vec![Segment::thinking("</")]);
        assert!(end.truncated);
    }

    #[test]
    fn test_pending_never_reaches_delimiter_length() {
        let mut scanner = TagScanner::new();
        for fragment in ["<", "t", "h", "i", "n", "k", ">", "<", "/", "t", "h", "i", "n", "k"] {
            scanner.scan(fragment);
            let limit = scanner.mode().delimiter().len();
            assert!(scanner.pending().len() < limit);
        }
        assert_eq!(scanner.mode(), ScanMode::InsideThink);
        assert_eq!(scanner.pending(), "</think");
    }

    #[test]
    fn test_multibyte_text_around_delimiters() {
        let (segments, _) = run(&["héllo <thi", "nk>思考</think>答え"]);
        assert_eq!(
            segments,
            vec![
                Segment::answer("héllo "),
                Segment::thinking("思考"),
                Segment::answer("答え"),
            ]
        );
    }

    #[test]
    fn test_finish_returns_scanner_outside() {
        let mut scanner = TagScanner::new();
        scanner.scan("<think>cut off");
        assert!(scanner.finish().truncated);
        assert_eq!(scanner.mode(), ScanMode::Outside);
        assert_eq!(scanner.scan("fresh"), vec![Segment::answer("fresh")]);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut scanner = TagScanner::new();
        scanner.scan("<think>abc</thi");
        scanner.reset();
        assert_eq!(scanner.mode(), ScanMode::Outside);
        assert!(scanner.pending().is_empty());
    }

    #[test]
    fn test_empty_fragment_is_noop() {
        let mut scanner = TagScanner::new();
        scanner.scan("<th");
        assert!(scanner.scan("").is_empty());
        assert_eq!(scanner.pending(), "<th");
    }
}
