//! Full-screen front-end (ratatui).

use std::{io, time::Duration};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};

use crate::local::{LocalShell, Outcome, Tone};

/// Scrollback kept on screen.
const MAX_OUTPUT_LINES: usize = 5_000;

pub async fn run(shell: LocalShell) -> anyhow::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, shell).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

struct App {
    output: Vec<(Tone, String)>,
    input: String,
    /// Lines scrolled up from the bottom.
    scroll_back: u16,
    recall: Vec<String>,
    recall_pos: Option<usize>,
    status: String,
}

impl App {
    fn new() -> Self {
        Self {
            output: vec![
                (Tone::Notice, "shellgate".to_string()),
                (
                    Tone::Notice,
                    "Built-ins: cd, export, unset, history [keyword], ?? question, exit".to_string(),
                ),
                (Tone::Normal, String::new()),
            ],
            input: String::new(),
            scroll_back: 0,
            recall: Vec::new(),
            recall_pos: None,
            status: "Ready".to_string(),
        }
    }

    fn push(&mut self, tone: Tone, text: String) {
        // Strip control sequences for display
        let clean: String = text
            .chars()
            .filter(|c| !c.is_control() || *c == '\t')
            .collect();
        self.output.push((tone, clean));
        if self.output.len() > MAX_OUTPUT_LINES {
            let excess = self.output.len() - MAX_OUTPUT_LINES;
            self.output.drain(..excess);
        }
        self.scroll_back = 0;
    }

    fn recall_previous(&mut self) {
        if self.recall.is_empty() {
            return;
        }
        let pos = self
            .recall_pos
            .map_or(self.recall.len() - 1, |p| p.saturating_sub(1));
        self.recall_pos = Some(pos);
        self.input.clone_from(&self.recall[pos]);
    }

    fn recall_next(&mut self) {
        match self.recall_pos {
            Some(p) if p + 1 < self.recall.len() => {
                self.recall_pos = Some(p + 1);
                self.input.clone_from(&self.recall[p + 1]);
            }
            _ => {
                self.recall_pos = None;
                self.input.clear();
            }
        }
    }
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    mut shell: LocalShell,
) -> anyhow::Result<()> {
    let mut app = App::new();

    loop {
        let prompt = shell.prompt();
        terminal.draw(|f| ui(f, &app, &prompt))?;

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match key {
            KeyEvent {
                code: KeyCode::Char('c' | 'd'),
                modifiers: KeyModifiers::CONTROL,
                ..
            } => return Ok(()),
            KeyEvent {
                code: KeyCode::Char(c),
                modifiers: KeyModifiers::NONE | KeyModifiers::SHIFT,
                ..
            } => app.input.push(c),
            KeyEvent {
                code: KeyCode::Backspace,
                ..
            } => {
                app.input.pop();
            }
            KeyEvent {
                code: KeyCode::Up, ..
            } => app.recall_previous(),
            KeyEvent {
                code: KeyCode::Down,
                ..
            } => app.recall_next(),
            KeyEvent {
                code: KeyCode::PageUp,
                ..
            } => app.scroll_back = app.scroll_back.saturating_add(10),
            KeyEvent {
                code: KeyCode::PageDown,
                ..
            } => app.scroll_back = app.scroll_back.saturating_sub(10),
            KeyEvent {
                code: KeyCode::Enter,
                ..
            } => {
                let line = std::mem::take(&mut app.input);
                app.recall_pos = None;
                app.push(Tone::Notice, format!("{prompt}{line}"));
                if !line.trim().is_empty() {
                    app.recall.push(line.clone());
                }

                app.status = "Running...".to_string();
                terminal.draw(|f| ui(f, &app, &prompt))?;

                let outcome = shell.handle(&line).await;
                app.status = match &outcome {
                    Outcome::Result(result) if !result.success() => {
                        format!("exit {} ({} ms)", result.exit_code, result.duration_ms)
                    }
                    Outcome::Result(result) => format!("ok ({} ms)", result.duration_ms),
                    _ => "Ready".to_string(),
                };
                if matches!(outcome, Outcome::Exit) {
                    return Ok(());
                }
                for (tone, text) in outcome.display_lines() {
                    app.push(tone, text);
                }
            }
            _ => {}
        }
    }
}

const fn tone_style(tone: Tone) -> Style {
    match tone {
        Tone::Normal => Style::new(),
        Tone::Notice => Style::new().fg(Color::Cyan),
        Tone::Error => Style::new().fg(Color::Red),
    }
}

fn ui(f: &mut Frame, app: &App, prompt: &str) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),    // Output
            Constraint::Length(3), // Input
            Constraint::Length(1), // Status
        ])
        .split(f.area());

    let output_text: Vec<Line> = app
        .output
        .iter()
        .map(|(tone, text)| Line::styled(text.as_str(), tone_style(*tone)))
        .collect();

    // Keep the newest lines in view unless scrolled back.
    let visible = chunks[0].height.saturating_sub(2);
    let total = u16::try_from(output_text.len()).unwrap_or(u16::MAX);
    let scroll = total
        .saturating_sub(visible)
        .saturating_sub(app.scroll_back);

    let output = Paragraph::new(output_text)
        .block(Block::default().borders(Borders::ALL).title("Output"))
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0));
    f.render_widget(output, chunks[0]);

    let input = Paragraph::new(Line::from(vec![
        Span::styled(prompt, Style::default().fg(Color::Green)),
        Span::styled(app.input.as_str(), Style::default().fg(Color::Yellow)),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Input"));
    f.render_widget(input, chunks[1]);

    let cursor = u16::try_from(prompt.chars().count() + app.input.chars().count()).unwrap_or(u16::MAX);
    f.set_cursor_position((chunks[1].x.saturating_add(cursor).saturating_add(1), chunks[1].y + 1));

    let status_style = if app.status.starts_with("exit") {
        Style::default().fg(Color::Red)
    } else if app.status.starts_with("Running") {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::Green)
    };

    let status = Paragraph::new(Line::from(vec![
        Span::raw(" "),
        Span::styled(app.status.as_str(), status_style),
        Span::raw(" | "),
        Span::styled("Ctrl+C", Style::default().fg(Color::Yellow)),
        Span::raw(" quit | "),
        Span::styled("Up/Down", Style::default().fg(Color::Yellow)),
        Span::raw(" recall | "),
        Span::styled("PgUp/PgDn", Style::default().fg(Color::Yellow)),
        Span::raw(" scroll "),
    ]));
    f.render_widget(status, chunks[2]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recall_walks_entered_lines() {
        let mut app = App::new();
        app.recall = vec!["ls".to_string(), "pwd".to_string()];

        app.recall_previous();
        assert_eq!(app.input, "pwd");
        app.recall_previous();
        assert_eq!(app.input, "ls");
        app.recall_previous();
        assert_eq!(app.input, "ls");
        app.recall_next();
        assert_eq!(app.input, "pwd");
        app.recall_next();
        assert!(app.input.is_empty());
    }

    #[test]
    fn test_push_strips_control_characters() {
        let mut app = App::new();
        app.push(Tone::Normal, "\u{1b}[31mred\r".to_string());
        assert_eq!(app.output.last().unwrap().1, "[31mred");
    }
}
