//! Drives one conversation turn: pull a fragment, classify it, apply it.

use tokio_util::sync::CancellationToken;

use crate::render::{RenderSnapshot, RenderState};
use crate::scanner::TagScanner;
use crate::source::TokenSource;

const REPLACEMENT_CHAR: char = '\u{fffd}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Streaming,
}

/// How a turn left the `Streaming` phase. The session is `Idle` again once
/// one of these has been returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed { truncated: bool },
    Cancelled,
    Failed(String),
}

pub struct Session {
    scanner: TagScanner,
    render: RenderState,
    source: Option<Box<dyn TokenSource>>,
    cancel: CancellationToken,
    phase: Phase,
    raw_response: String,
    // Set before the source is stopped, so a dropped `step` still fails the turn
    failed: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            scanner: TagScanner::new(),
            render: RenderState::new(),
            source: None,
            cancel: CancellationToken::new(),
            phase: Phase::Idle,
            raw_response: String::new(),
            failed: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_streaming(&self) -> bool {
        self.phase == Phase::Streaming
    }

    pub fn version(&self) -> u64 {
        self.render.version()
    }

    pub fn snapshot(&self) -> RenderSnapshot {
        self.render.snapshot()
    }

    /// Borrowed view of the live turn, for front ends that print deltas.
    pub fn render(&self) -> &RenderState {
        &self.render
    }

    /// Handle that interrupts the current turn from anywhere, e.g. a signal task.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start a turn. Ignored while another turn is still streaming.
    pub fn begin(&mut self, source: Box<dyn TokenSource>) -> bool {
        if self.is_streaming() {
            return false;
        }
        self.render.reset();
        self.raw_response.clear();
        self.cancel = CancellationToken::new();
        self.failed = None;
        self.source = Some(source);
        self.phase = Phase::Streaming;
        tracing::debug!("turn started");
        true
    }

    pub fn interrupt(&self) {
        if self.is_streaming() {
            tracing::info!("interrupt requested");
            self.cancel.cancel();
        }
    }

    /// Raw model output of the last turn, delimiters included.
    pub fn take_response(&mut self) -> String {
        std::mem::take(&mut self.raw_response)
    }

    /// One pull from the source. Returns `Some` when the turn is over.
    ///
    /// Cancel-safe: if the future is dropped while waiting for a fragment,
    /// nothing is lost and the next call picks up where this one stopped.
    pub async fn step(&mut self) -> Option<TurnOutcome> {
        if self.source.is_none() {
            return None;
        }
        if self.failed.is_some() {
            return Some(self.stop_failed().await);
        }
        if self.cancel.is_cancelled() {
            return Some(self.stop_cancelled().await);
        }

        let source = self.source.as_mut()?;
        let pulled = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            pulled = source.next_fragment() => Some(pulled),
        };

        match pulled {
            None => Some(self.stop_cancelled().await),
            Some(Ok(Some(fragment))) => {
                self.feed(&fragment);
                None
            }
            Some(Ok(None)) => {
                self.source = None;
                let truncated = self.flush();
                if truncated {
                    tracing::warn!("stream ended inside a think block");
                }
                tracing::debug!(version = self.render.version(), "turn completed");
                Some(self.settle(TurnOutcome::Completed { truncated }))
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "token source failed");
                self.failed = Some(e.to_string());
                Some(self.stop_failed().await)
            }
        }
    }

    /// Stop whatever is streaming, e.g. before the process exits.
    pub async fn shutdown(&mut self) -> Option<TurnOutcome> {
        if !self.is_streaming() {
            return None;
        }
        if self.failed.is_some() {
            return Some(self.stop_failed().await);
        }
        self.cancel.cancel();
        Some(self.stop_cancelled().await)
    }

    /// Forget the conversation: scanner state and the rendered turn.
    pub fn new_conversation(&mut self) {
        self.scanner.reset();
        self.render.reset();
        self.raw_response.clear();
    }

    fn feed(&mut self, fragment: &str) {
        let fragment = fragment.replace(REPLACEMENT_CHAR, "?");
        self.raw_response.push_str(&fragment);
        for segment in self.scanner.scan(&fragment) {
            self.render.apply(&segment);
        }
    }

    /// Flush the scanner into the render state. Returns the truncation flag.
    fn flush(&mut self) -> bool {
        let end = self.scanner.finish();
        for segment in &end.segments {
            self.render.apply(segment);
        }
        end.truncated
    }

    async fn stop_cancelled(&mut self) -> TurnOutcome {
        self.stop_source().await;
        self.flush();
        tracing::info!("turn cancelled");
        self.settle(TurnOutcome::Cancelled)
    }

    async fn stop_failed(&mut self) -> TurnOutcome {
        self.stop_source().await;
        self.flush();
        let message = self.failed.take().unwrap_or_default();
        self.settle(TurnOutcome::Failed(message))
    }

    // The source is only dropped after its cancel has finished, so a dropped
    // `step` future can retry the cancel.
    async fn stop_source(&mut self) {
        if let Some(source) = self.source.as_mut() {
            source.cancel().await;
        }
        self.source = None;
    }

    fn settle(&mut self, outcome: TurnOutcome) -> TurnOutcome {
        self.phase = Phase::Idle;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::scripted::{ScriptedSource, Step};
    use crate::source::SourceError;
    use async_trait::async_trait;
    use futures_util::FutureExt;
    use std::sync::atomic::Ordering;

    /// Fails on the first pull; stopping it takes a scheduler round trip.
    struct SlowStopFailure {
        pulled: bool,
    }

    #[async_trait]
    impl TokenSource for SlowStopFailure {
        async fn next_fragment(&mut self) -> Result<Option<String>, SourceError> {
            if self.pulled {
                return Ok(None);
            }
            self.pulled = true;
            Err(SourceError::Remote("boom".to_string()))
        }

        async fn cancel(&mut self) {
            tokio::task::yield_now().await;
        }
    }

    async fn run_to_end(session: &mut Session) -> TurnOutcome {
        loop {
            if let Some(outcome) = session.step().await {
                return outcome;
            }
        }
    }

    #[tokio::test]
    async fn test_turn_completes() {
        let mut session = Session::new();
        let source = ScriptedSource::fragments(&["Hello ", "<thi", "nk>reasoning here</th", "ink> world"]);
        assert!(session.begin(Box::new(source)));
        assert!(session.is_streaming());

        let outcome = run_to_end(&mut session).await;
        assert_eq!(outcome, TurnOutcome::Completed { truncated: false });
        assert_eq!(session.phase(), Phase::Idle);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.answer_text, "Hello  world");
        assert_eq!(snapshot.thinking_text, "reasoning here");
        assert_eq!(
            session.take_response(),
            "Hello <think>reasoning here</think> world"
        );
    }

    #[tokio::test]
    async fn test_truncated_turn_flushes_thinking() {
        let mut session = Session::new();
        session.begin(Box::new(ScriptedSource::fragments(&["<think>partial</th"])));

        let outcome = run_to_end(&mut session).await;
        assert_eq!(outcome, TurnOutcome::Completed { truncated: true });
        assert_eq!(session.snapshot().thinking_text, "partial</th");
    }

    #[tokio::test]
    async fn test_interrupt_cancels_source_and_flushes() {
        let source = ScriptedSource::new(vec![
            Step::Fragment("<think>considering <"),
            Step::Stall,
        ]);
        let cancels = source.cancels.clone();
        let mut session = Session::new();
        session.begin(Box::new(source));

        assert!(session.step().await.is_none());
        let interrupter = session.cancellation();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            interrupter.cancel();
        });

        let outcome = run_to_end(&mut session).await;
        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
        assert_eq!(session.snapshot().thinking_text, "considering <");
        assert!(!session.is_streaming());
        assert!(session.step().await.is_none());
    }

    #[tokio::test]
    async fn test_source_error_fails_turn() {
        let source = ScriptedSource::new(vec![Step::Fragment("Par"), Step::Fail("connection reset")]);
        let cancels = source.cancels.clone();
        let mut session = Session::new();
        session.begin(Box::new(source));

        match run_to_end(&mut session).await {
            TurnOutcome::Failed(message) => assert!(message.contains("connection reset")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
        assert_eq!(session.snapshot().answer_text, "Par");
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_failure_survives_dropped_step() {
        let mut session = Session::new();
        session.begin(Box::new(SlowStopFailure { pulled: false }));

        // Dropped while stopping the source, as a losing `select!` branch would be
        assert!(session.step().now_or_never().is_none());
        assert!(session.is_streaming());

        match run_to_end(&mut session).await {
            TurnOutcome::Failed(message) => assert!(message.contains("boom")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!session.is_streaming());
    }

    #[tokio::test]
    async fn test_begin_ignored_while_streaming() {
        let mut session = Session::new();
        session.begin(Box::new(ScriptedSource::new(vec![Step::Stall])));
        assert!(!session.begin(Box::new(ScriptedSource::fragments(&["x"]))));

        assert_eq!(session.shutdown().await, Some(TurnOutcome::Cancelled));
        assert_eq!(session.shutdown().await, None);
    }

    #[tokio::test]
    async fn test_replacement_char_shown_as_question_mark() {
        let mut session = Session::new();
        session.begin(Box::new(ScriptedSource::fragments(&["caf\u{fffd}"])));
        run_to_end(&mut session).await;
        assert_eq!(session.snapshot().answer_text, "caf?");
    }

    #[tokio::test]
    async fn test_new_turn_resets_render_state() {
        let mut session = Session::new();
        session.begin(Box::new(ScriptedSource::fragments(&["first"])));
        run_to_end(&mut session).await;
        assert!(session.version() > 0);

        session.begin(Box::new(ScriptedSource::fragments(&["second"])));
        assert_eq!(session.version(), 0);
        run_to_end(&mut session).await;
        assert_eq!(session.snapshot().answer_text, "second");
    }
}
