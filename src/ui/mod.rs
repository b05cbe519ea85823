use std::io::{self, Stdout};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::Alignment;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::{Frame, Terminal};

pub mod layout;

use crate::host::{Frontend, Input};

/// Full-screen terminal frontend. Restores the terminal on drop.
pub struct TerminalFrontend {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    frames: u64,
}

impl TerminalFrontend {
    pub fn enter() -> anyhow::Result<Self> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;
        Ok(Self {
            terminal,
            frames: 0,
        })
    }

    fn restore(&mut self) -> anyhow::Result<()> {
        disable_raw_mode()?;
        execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}

impl Frontend for TerminalFrontend {
    fn render(&mut self, title: &str, view: &str) -> anyhow::Result<()> {
        self.frames += 1;
        let frames = self.frames;
        self.terminal.draw(|f| draw(f, title, view, frames))?;
        Ok(())
    }

    fn poll_input(&mut self) -> anyhow::Result<Input> {
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                if is_quit(key) {
                    return Ok(Input::Quit);
                }
            }
        }
        Ok(Input::None)
    }
}

impl Drop for TerminalFrontend {
    fn drop(&mut self) {
        if let Err(err) = self.restore() {
            tracing::warn!(error = %err, "failed to restore terminal");
        }
    }
}

fn is_quit(key: KeyEvent) -> bool {
    if key.kind != KeyEventKind::Press {
        return false;
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

pub fn draw(f: &mut Frame, title: &str, view: &str, frames: u64) {
    let areas = layout::areas(f.size());

    let header = Paragraph::new(Line::from(Span::styled(
        title.to_string(),
        Style::default().add_modifier(Modifier::BOLD),
    )))
    .block(Block::default().borders(Borders::ALL))
    .alignment(Alignment::Center);
    f.render_widget(header, areas.header);

    let body = Paragraph::new(Text::from(view.to_string()))
        .block(Block::default().borders(Borders::LEFT | Borders::RIGHT))
        .wrap(Wrap { trim: false });
    f.render_widget(body, areas.body);

    let status = Paragraph::new(Line::from(vec![
        Span::styled("q ", Style::default().fg(Color::Yellow)),
        Span::styled("quit  ", Style::default().fg(Color::DarkGray)),
        Span::styled("Frame ", Style::default().fg(Color::DarkGray)),
        Span::raw(frames.to_string()),
    ]))
    .style(Style::default().fg(Color::White));
    f.render_widget(status, areas.status_line);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;

    #[test]
    fn test_quit_keys() {
        let press = |code, modifiers| KeyEvent::new(code, modifiers);
        assert!(is_quit(press(KeyCode::Char('q'), KeyModifiers::NONE)));
        assert!(is_quit(press(KeyCode::Esc, KeyModifiers::NONE)));
        assert!(is_quit(press(KeyCode::Char('c'), KeyModifiers::CONTROL)));
        assert!(!is_quit(press(KeyCode::Char('c'), KeyModifiers::NONE)));
        assert!(!is_quit(press(KeyCode::Enter, KeyModifiers::NONE)));
    }

    #[test]
    fn test_draw_renders_title_and_view() {
        let mut terminal = Terminal::new(TestBackend::new(40, 8)).unwrap();
        terminal
            .draw(|f| draw(f, "Pulse", "ticks: 3", 1))
            .unwrap();
        let buffer = terminal.backend().buffer().clone();
        let text: String = buffer.content().iter().map(|cell| cell.symbol()).collect();
        assert!(text.contains("Pulse"));
        assert!(text.contains("ticks: 3"));
        assert!(text.contains("quit"));
    }
}
