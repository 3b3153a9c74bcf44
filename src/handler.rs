use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};

use crate::app::App;
use crate::tui::AppEvent;

const WHEEL_ROWS: usize = 3;

pub async fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(w, h) => {
            tracing::debug!(w, h, "terminal resized");
            app.needs_redraw = true;
        }
        AppEvent::Tick => app.on_tick(),
    }
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    // Global keys that work in any state
    if ctrl && key.code == KeyCode::Char('c') {
        if app.session.is_streaming() {
            app.interrupt();
        } else {
            app.should_quit = true;
        }
        return;
    }
    if ctrl && key.code == KeyCode::Char('d') {
        if app.input.is_empty() && !app.session.is_streaming() {
            app.should_quit = true;
        }
        return;
    }

    match key.code {
        KeyCode::Esc => {
            if app.session.is_streaming() {
                app.interrupt();
            }
        }
        KeyCode::Enter => app.submit(),
        KeyCode::Tab => app.cycle_thinking_view(),

        // Answer scrolling
        KeyCode::PageUp => app.scroll_up(app.page()),
        KeyCode::PageDown => app.scroll_down(app.page()),
        KeyCode::Up => app.scroll_up(1),
        KeyCode::Down => app.scroll_down(1),

        // Input editing
        KeyCode::Backspace => app.backspace(),
        KeyCode::Delete => app.delete(),
        KeyCode::Left => app.cursor_left(),
        KeyCode::Right => app.cursor_right(),
        KeyCode::Home => app.cursor_home(),
        KeyCode::End => app.cursor_end(),
        KeyCode::Char(c) => app.insert_char(c),
        _ => return,
    }
    app.needs_redraw = true;
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    match mouse.kind {
        MouseEventKind::ScrollUp => app.scroll_up(WHEEL_ROWS),
        MouseEventKind::ScrollDown => app.scroll_down(WHEEL_ROWS),
        _ => {}
    }
}
