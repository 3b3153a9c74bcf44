//! Reduced mode: sequential output for terminals without an alternate screen.

use std::io::{self, Write};

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::chat::{Command, Conversation, GenerationSettings};
use crate::ollama::OllamaClient;
use crate::render::RenderState;
use crate::scanner::SegmentKind;
use crate::session::{Session, TurnOutcome};
use crate::tui::TerminalCapabilityError;
use crate::ui::ThinkingView;

const PROMPT: &str = ">> ";

pub async fn run(
    client: OllamaClient,
    settings: GenerationSettings,
    view: ThinkingView,
    reason: Option<TerminalCapabilityError>,
) -> Result<()> {
    let mut out = io::stdout();
    if let Some(reason) = reason {
        tracing::warn!(%reason, "full-screen view unavailable, using plain output");
        writeln!(out, "[Full-screen view unavailable: {}. Using plain output.]", reason)?;
    }
    writeln!(
        out,
        "Chatting with {} at {}. Type 'q' to quit, '/clear' to start over.",
        settings.model,
        client.base_url()
    )?;

    let mut conversation = Conversation::new(settings);
    let mut session = Session::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        write!(out, "\n{}", PROMPT)?;
        out.flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            writeln!(out)?;
            break;
        };

        match Command::parse(&line) {
            Command::Quit => break,
            Command::Empty => {}
            Command::Clear => {
                conversation.clear();
                session.new_conversation();
                tracing::info!("conversation cleared");
                writeln!(out, "Chat cleared.")?;
            }
            Command::Prompt(prompt) => {
                conversation.push_prompt(&prompt);
                let source = client.stream_chat(&conversation.settings, &conversation.history);
                session.begin(Box::new(source));

                let outcome = stream_turn(&mut session, &mut out, view).await?;
                let snapshot = session.snapshot();
                let raw_response = session.take_response();
                let exchange = conversation.finish_turn(outcome, &snapshot, raw_response);
                if let Some(notice) = exchange.notice() {
                    tracing::info!(%notice, "turn finished");
                    writeln!(out, "{}", notice)?;
                }
            }
        }
    }

    Ok(())
}

/// Drive one turn to its end, printing as fragments arrive. Ctrl+C
/// interrupts the turn instead of the process.
async fn stream_turn<W: Write>(
    session: &mut Session,
    out: &mut W,
    view: ThinkingView,
) -> Result<TurnOutcome> {
    let interrupter = session.cancellation();
    let mut printer = PlainPrinter::new(view);
    loop {
        tokio::select! {
            outcome = session.step() => {
                printer.update(out, session.render())?;
                if let Some(outcome) = outcome {
                    printer.finish(out)?;
                    return Ok(outcome);
                }
            }
            _ = tokio::signal::ctrl_c() => interrupter.cancel(),
        }
    }
}

/// Prints what was appended to the render state since the last call.
/// Relies on both regions being append-only within a turn.
pub struct PlainPrinter {
    view: ThinkingView,
    thinking_len: usize,
    answer_len: usize,
    last_kind: Option<SegmentKind>,
    answer_started: bool,
    at_line_start: bool,
}

impl PlainPrinter {
    pub fn new(view: ThinkingView) -> Self {
        Self {
            view,
            thinking_len: 0,
            answer_len: 0,
            last_kind: None,
            answer_started: false,
            at_line_start: true,
        }
    }

    pub fn update<W: Write>(&mut self, out: &mut W, render: &RenderState) -> io::Result<()> {
        let thinking = render.thinking_text().get(self.thinking_len..).unwrap_or("");
        let answer = render.answer_text().get(self.answer_len..).unwrap_or("");
        self.thinking_len = render.thinking_text().len();
        self.answer_len = render.answer_text().len();

        // Both regions can grow in one pull; the active one is printed last
        if render.active_kind() == Some(SegmentKind::Thinking) {
            self.print_answer(out, answer)?;
            self.print_thinking(out, thinking)?;
        } else {
            self.print_thinking(out, thinking)?;
            self.print_answer(out, answer)?;
        }
        out.flush()
    }

    pub fn finish<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        self.start_line(out)?;
        out.flush()
    }

    fn print_thinking<W: Write>(&mut self, out: &mut W, text: &str) -> io::Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        match self.view {
            ThinkingView::Hidden => return Ok(()),
            ThinkingView::Collapsed => {
                if self.last_kind != Some(SegmentKind::Thinking) {
                    self.start_line(out)?;
                    self.write(out, "(thinking...)\n")?;
                }
            }
            ThinkingView::Expanded => {
                if self.last_kind != Some(SegmentKind::Thinking) {
                    self.start_line(out)?;
                    self.write(out, "--- thinking ---\n")?;
                }
                self.write(out, text)?;
            }
        }
        self.last_kind = Some(SegmentKind::Thinking);
        Ok(())
    }

    fn print_answer<W: Write>(&mut self, out: &mut W, text: &str) -> io::Result<()> {
        let text = if self.answer_started {
            text
        } else {
            text.trim_start_matches('\n')
        };
        if text.is_empty() {
            return Ok(());
        }
        self.answer_started = true;

        if self.last_kind == Some(SegmentKind::Thinking) {
            self.start_line(out)?;
            self.write(out, "--- answer ---\n")?;
        }
        self.write(out, text)?;
        self.last_kind = Some(SegmentKind::Answer);
        Ok(())
    }

    fn start_line<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        if !self.at_line_start {
            self.write(out, "\n")?;
        }
        Ok(())
    }

    fn write<W: Write>(&mut self, out: &mut W, text: &str) -> io::Result<()> {
        out.write_all(text.as_bytes())?;
        self.at_line_start = text.ends_with('\n');
        Ok(())
    }
}
