//! Append-only buffers for the two regions of the live turn.

use crate::scanner::{Segment, SegmentKind};

/// Read-only copy handed to the screen driver. Owned, so drawing never holds
/// a borrow on the live state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderSnapshot {
    pub thinking_text: String,
    pub answer_text: String,
    pub active_kind: Option<SegmentKind>,
    pub version: u64,
}

#[derive(Debug, Default)]
pub struct RenderState {
    thinking_text: String,
    answer_text: String,
    active_kind: Option<SegmentKind>,
    version: u64,
}

impl RenderState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, segment: &Segment) {
        match segment.kind {
            SegmentKind::Thinking => self.thinking_text.push_str(&segment.text),
            SegmentKind::Answer => self.answer_text.push_str(&segment.text),
        }
        self.active_kind = Some(segment.kind);
        self.version += 1;
    }

    pub fn snapshot(&self) -> RenderSnapshot {
        RenderSnapshot {
            thinking_text: self.thinking_text.clone(),
            answer_text: self.answer_text.clone(),
            active_kind: self.active_kind,
            version: self.version,
        }
    }

    pub fn reset(&mut self) {
        self.thinking_text.clear();
        self.answer_text.clear();
        self.active_kind = None;
        self.version = 0;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn thinking_text(&self) -> &str {
        &self.thinking_text
    }

    pub fn answer_text(&self) -> &str {
        &self.answer_text
    }

    pub fn active_kind(&self) -> Option<SegmentKind> {
        self.active_kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::TagScanner;

    fn render_fragments(fragments: &[&str]) -> RenderSnapshot {
        let mut scanner = TagScanner::new();
        let mut state = RenderState::new();
        for fragment in fragments {
            for segment in scanner.scan(fragment) {
                state.apply(&segment);
            }
        }
        for segment in scanner.finish().segments {
            state.apply(&segment);
        }
        state.snapshot()
    }

    #[test]
    fn test_apply_routes_by_kind() {
        let mut state = RenderState::new();
        state.apply(&Segment::answer("Hello "));
        state.apply(&Segment::thinking("hmm"));
        state.apply(&Segment::answer("world"));

        assert_eq!(state.answer_text(), "Hello world");
        assert_eq!(state.thinking_text(), "hmm");
        assert_eq!(state.version(), 3);
        assert_eq!(state.snapshot().active_kind, Some(SegmentKind::Answer));
    }

    #[test]
    fn test_same_text_regardless_of_batching() {
        let text = "Sure. <think>first, then\nsecond</think>\n\nThe answer is 42.";
        let whole = render_fragments(&[text]);
        let pieces: Vec<String> = text.chars().map(String::from).collect();
        let refs: Vec<&str> = pieces.iter().map(String::as_str).collect();
        let split = render_fragments(&refs);

        assert_eq!(whole.thinking_text, split.thinking_text);
        assert_eq!(whole.answer_text, split.answer_text);
        assert_eq!(whole.answer_text, "Sure. \n\nThe answer is 42.");
        assert_eq!(whole.thinking_text, "first, then\nsecond");
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut state = RenderState::new();
        state.apply(&Segment::thinking("a"));
        let snapshot = state.snapshot();
        state.apply(&Segment::thinking("b"));

        assert_eq!(snapshot.thinking_text, "a");
        assert_eq!(snapshot.version, 1);
        assert_eq!(state.thinking_text(), "ab");
    }

    #[test]
    fn test_reset() {
        let mut state = RenderState::new();
        state.apply(&Segment::answer("x"));
        state.reset();
        assert_eq!(state.snapshot(), RenderSnapshot::default());
    }
}
