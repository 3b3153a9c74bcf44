use std::io::{self, IsTerminal, Stderr};
use std::time::Duration;

use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEvent, KeyEventKind, MouseEvent},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::{mpsc, watch};

pub type Tui = Terminal<CrosstermBackend<Stderr>>;

#[derive(Debug)]
pub enum AppEvent {
    Key(KeyEvent),
    Mouse(MouseEvent),
    Resize(u16, u16),
    Tick,
}

/// Why the full-screen view cannot be used. Never fatal: the caller falls
/// back to plain output.
#[derive(Debug, thiserror::Error)]
pub enum TerminalCapabilityError {
    #[error("output is not a terminal")]
    NotATerminal,

    #[error("terminal type {0:?} has no alternate screen")]
    DumbTerminal(String),

    #[error("could not enable raw mode: {0}")]
    RawMode(#[source] io::Error),

    #[error("could not switch to the alternate screen: {0}")]
    AlternateScreen(#[source] io::Error),
}

pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<AppEvent>,
    // Only the latest size matters, so resizes overwrite instead of queueing
    resize: watch::Receiver<(u16, u16)>,
}

impl EventHandler {
    pub fn new(tick_rate: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let initial = crossterm::terminal::size().unwrap_or((0, 0));
        let (resize_tx, resize) = watch::channel(initial);

        // Spawn event reader task
        let tx_events = tx.clone();
        tokio::spawn(async move {
            let mut reader = event::EventStream::new();
            while let Some(evt) = reader.next().await {
                let Ok(evt) = evt else { continue };
                let app_event = match evt {
                    Event::Key(key) => {
                        // Only handle key press events, not release
                        if key.kind == KeyEventKind::Press {
                            Some(AppEvent::Key(key))
                        } else {
                            None
                        }
                    }
                    Event::Mouse(mouse) => Some(AppEvent::Mouse(mouse)),
                    Event::Resize(w, h) => {
                        if resize_tx.send((w, h)).is_err() {
                            break;
                        }
                        None
                    }
                    _ => None,
                };

                if let Some(event) = app_event {
                    if tx_events.send(event).is_err() {
                        break;
                    }
                }
            }
        });

        // Frame timer, batches redraws while tokens stream in
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_rate);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if tx.send(AppEvent::Tick).is_err() {
                    break;
                }
            }
        });

        Self::from_channels(rx, resize)
    }

    /// Merge queued events with the latest terminal size.
    fn from_channels(rx: mpsc::UnboundedReceiver<AppEvent>, resize: watch::Receiver<(u16, u16)>) -> Self {
        Self { rx, resize }
    }

    pub async fn next(&mut self) -> Option<AppEvent> {
        tokio::select! {
            changed = self.resize.changed() => {
                if changed.is_ok() {
                    let (w, h) = *self.resize.borrow_and_update();
                    Some(AppEvent::Resize(w, h))
                } else {
                    self.rx.recv().await
                }
            }
            event = self.rx.recv() => event,
        }
    }
}

/// Owns raw mode and the alternate screen for the lifetime of the chat.
///
/// Call [`TerminalGuard::release`] on every exit path. `Drop` and the panic
/// hook restore the terminal if that never happens.
pub struct TerminalGuard {
    terminal: Tui,
    active: bool,
}

impl TerminalGuard {
    pub fn acquire() -> Result<Self, TerminalCapabilityError> {
        check_capability()?;

        enable_raw_mode().map_err(TerminalCapabilityError::RawMode)?;
        if let Err(e) = execute!(io::stderr(), EnterAlternateScreen, EnableMouseCapture) {
            let _ = disable_raw_mode();
            return Err(TerminalCapabilityError::AlternateScreen(e));
        }

        let backend = CrosstermBackend::new(io::stderr());
        match Terminal::new(backend) {
            Ok(terminal) => {
                tracing::debug!("entered alternate screen");
                Ok(Self {
                    terminal,
                    active: true,
                })
            }
            Err(e) => {
                let _ = restore();
                Err(TerminalCapabilityError::AlternateScreen(e))
            }
        }
    }

    pub fn terminal(&mut self) -> &mut Tui {
        &mut self.terminal
    }

    pub fn release(mut self) -> Result<()> {
        self.active = false;
        let restored = restore();
        self.terminal.show_cursor()?;
        tracing::debug!("left alternate screen");
        restored
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if self.active {
            let _ = restore();
        }
    }
}

fn check_capability() -> Result<(), TerminalCapabilityError> {
    if !io::stderr().is_terminal() || !io::stdin().is_terminal() {
        return Err(TerminalCapabilityError::NotATerminal);
    }
    match std::env::var("TERM") {
        Ok(term) if term == "dumb" => Err(TerminalCapabilityError::DumbTerminal(term)),
        _ => Ok(()),
    }
}

pub fn restore() -> Result<()> {
    execute!(io::stderr(), DisableMouseCapture)?;
    execute!(io::stderr(), LeaveAlternateScreen)?;
    disable_raw_mode()?;
    Ok(())
}

/// Install panic hook to restore terminal on panic
pub fn install_panic_hook() {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = restore();
        original_hook(panic_info);
    }));
}

/// Resolves when the process is asked to stop from outside (SIGTERM, SIGHUP,
/// or SIGINT when it is not swallowed by raw mode).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (Ok(mut term), Ok(mut hup)) = (
            signal(SignalKind::terminate()),
            signal(SignalKind::hangup()),
        ) else {
            let _ = tokio::signal::ctrl_c().await;
            return;
        };
        tokio::select! {
            _ = term.recv() => {}
            _ = hup.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resizes_coalesce_to_latest_size() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (resize_tx, resize) = watch::channel((80, 24));
        let mut events = EventHandler::from_channels(rx, resize);

        for size in [(100, 30), (120, 40), (132, 43)] {
            resize_tx.send(size).unwrap();
        }
        assert!(matches!(events.next().await, Some(AppEvent::Resize(132, 43))));

        // The burst produced a single resize; the next event is the queued tick
        tx.send(AppEvent::Tick).unwrap();
        assert!(matches!(events.next().await, Some(AppEvent::Tick)));
    }

    #[tokio::test]
    async fn test_events_end_when_senders_close() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (resize_tx, resize) = watch::channel((80, 24));
        let mut events = EventHandler::from_channels(rx, resize);

        tx.send(AppEvent::Tick).unwrap();
        drop(tx);
        drop(resize_tx);
        assert!(matches!(events.next().await, Some(AppEvent::Tick)));
        assert!(events.next().await.is_none());
    }
}
