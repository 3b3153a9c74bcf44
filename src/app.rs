use crate::chat::{Command, Conversation, GenerationSettings};
use crate::ollama::OllamaClient;
use crate::session::{Session, TurnOutcome};
use crate::ui::ThinkingView;

pub struct App {
    // Core state
    pub should_quit: bool,
    pub thinking_view: ThinkingView,
    pub notice: Option<String>,

    // Prompt input
    pub input: String,
    pub cursor: usize, // cursor position in input, in chars

    // Conversation
    pub conversation: Conversation,
    pub session: Session,
    pub client: OllamaClient,

    // Answer pane scroll, in rows up from the bottom (0 follows new output)
    pub answer_scroll: usize,
    pub answer_height: usize, // rows visible in the answer pane, set during render

    // Redraw bookkeeping
    pub spinner_frame: usize,
    pub needs_redraw: bool,
    frame_due: bool,
    drawn_version: u64,
}

impl App {
    pub fn new(client: OllamaClient, settings: GenerationSettings, thinking_view: ThinkingView) -> Self {
        Self {
            should_quit: false,
            thinking_view,
            notice: None,

            input: String::new(),
            cursor: 0,

            conversation: Conversation::new(settings),
            session: Session::new(),
            client,

            answer_scroll: 0,
            answer_height: 0,

            spinner_frame: 0,
            needs_redraw: true,
            frame_due: false,
            drawn_version: 0,
        }
    }

    /// Act on the input line: a command or a new prompt.
    pub fn submit(&mut self) {
        if self.session.is_streaming() {
            return;
        }

        let line = std::mem::take(&mut self.input);
        self.cursor = 0;
        self.notice = None;
        self.needs_redraw = true;

        match Command::parse(&line) {
            Command::Quit => self.should_quit = true,
            Command::Clear => self.new_conversation(),
            Command::Empty => {}
            Command::Prompt(prompt) => self.start_turn(&prompt),
        }
    }

    fn start_turn(&mut self, prompt: &str) {
        self.conversation.push_prompt(prompt);
        let source = self
            .client
            .stream_chat(&self.conversation.settings, &self.conversation.history);
        self.session.begin(Box::new(source));
        self.answer_scroll = 0;
        tracing::info!(
            model = %self.conversation.settings.model,
            turns = self.conversation.history.len(),
            "prompt submitted"
        );
    }

    pub fn finish_turn(&mut self, outcome: TurnOutcome) {
        let snapshot = self.session.snapshot();
        let raw_response = self.session.take_response();
        let exchange = self.conversation.finish_turn(outcome, &snapshot, raw_response);

        if let Some(notice) = exchange.notice() {
            tracing::info!(%notice, "turn finished");
        }
        self.answer_scroll = 0;
        self.needs_redraw = true;
    }

    pub fn interrupt(&mut self) {
        self.session.interrupt();
        self.needs_redraw = true;
    }

    pub fn new_conversation(&mut self) {
        self.conversation.clear();
        self.session.new_conversation();
        self.answer_scroll = 0;
        self.notice = Some("Chat cleared.".to_string());
        tracing::info!("conversation cleared");
    }

    pub fn cycle_thinking_view(&mut self) {
        self.thinking_view = self.thinking_view.next();
        self.needs_redraw = true;
    }

    pub fn on_tick(&mut self) {
        self.frame_due = true;
        if self.session.is_streaming() {
            self.spinner_frame = self.spinner_frame.wrapping_add(1);
        }
    }

    /// Input and resizes draw right away; streamed content waits for the
    /// next frame tick so bursts of small fragments share one redraw.
    pub fn should_draw(&self) -> bool {
        self.needs_redraw
            || (self.frame_due
                && (self.session.version() != self.drawn_version || self.session.is_streaming()))
    }

    pub fn mark_drawn(&mut self) {
        self.needs_redraw = false;
        self.frame_due = false;
        self.drawn_version = self.session.version();
    }

    // Answer scrolling
    pub fn scroll_up(&mut self, rows: usize) {
        self.answer_scroll = self.answer_scroll.saturating_add(rows);
        self.needs_redraw = true;
    }

    pub fn scroll_down(&mut self, rows: usize) {
        self.answer_scroll = self.answer_scroll.saturating_sub(rows);
        self.needs_redraw = true;
    }

    pub fn page(&self) -> usize {
        self.answer_height.saturating_sub(1).max(1)
    }

    // Input editing, cursor counted in chars
    pub fn insert_char(&mut self, c: char) {
        let byte_pos = char_to_byte_index(&self.input, self.cursor);
        self.input.insert(byte_pos, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let byte_pos = char_to_byte_index(&self.input, self.cursor);
            self.input.remove(byte_pos);
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.input.chars().count() {
            let byte_pos = char_to_byte_index(&self.input, self.cursor);
            self.input.remove(byte_pos);
        }
    }

    pub fn cursor_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn cursor_right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.input.chars().count());
    }

    pub fn cursor_home(&mut self) {
        self.cursor = 0;
    }

    pub fn cursor_end(&mut self) {
        self.cursor = self.input.chars().count();
    }
}

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}
