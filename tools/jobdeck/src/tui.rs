use crate::batch::{BatchLogEntry, BatchRun};
use crate::deck::{Deck, DeckCommand, DeckSnapshot, Notice};
use crate::errors::DeckError;
use crate::focus::Surface;
use crate::hotkeys::KeyInput;
use crate::runtime::Terminal;
use crate::types::{Outcome, StatCounters};
use crate::view::{PanelModel, View};
use ratatui::backend::TestBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph, Wrap};
use ratatui::Frame;
use std::time::Duration;

pub fn render_deck(snapshot: &DeckSnapshot, width: u16, height: u16) -> Result<String, DeckError> {
    let backend = TestBackend::new(width, height);
    let mut terminal =
        ratatui::Terminal::new(backend).map_err(|e| DeckError::Io(e.to_string()))?;
    terminal
        .draw(|frame| draw_deck(frame, snapshot))
        .map_err(|e| DeckError::Io(e.to_string()))?;

    let buffer = terminal.backend().buffer();
    let mut out = String::new();
    for y in 0..height {
        for x in 0..width {
            out.push_str(buffer[(x, y)].symbol());
        }
        out.push('\n');
    }
    Ok(out)
}

fn draw_deck(frame: &mut Frame<'_>, snapshot: &DeckSnapshot) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(6),
            Constraint::Length(4),
        ])
        .split(frame.area());
    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(rows[1]);

    draw_header(frame, rows[0], snapshot);
    draw_jobs(frame, body[0], snapshot);
    draw_panel(frame, body[1], snapshot);
    draw_footer(frame, rows[2], snapshot);
}

fn draw_header(frame: &mut Frame<'_>, area: Rect, snapshot: &DeckSnapshot) {
    let tabs = View::ALL
        .iter()
        .map(|view| {
            let label = format!(" {} {} ", view.hotkey(), view.label());
            if *view == snapshot.view {
                Span::styled(
                    label,
                    Style::default().fg(Color::Black).bg(Color::Cyan),
                )
            } else {
                Span::raw(label)
            }
        })
        .collect::<Vec<_>>();
    let stats = Line::from(format!(
        "session {}  |  all-time {}",
        counters(&snapshot.stats.session),
        counters(&snapshot.stats.all_time)
    ));
    frame.render_widget(
        Paragraph::new(vec![Line::from(tabs), stats])
            .block(Block::default().borders(Borders::ALL).title("jobdeck")),
        area,
    );
}

fn counters(counters: &StatCounters) -> String {
    format!(
        "approved={} denied={} processed={} delivered={}",
        counters.approved, counters.denied, counters.processed, counters.delivered
    )
}

fn draw_jobs(frame: &mut Frame<'_>, area: Rect, snapshot: &DeckSnapshot) {
    let mut items = snapshot
        .jobs
        .iter()
        .map(|job| {
            let selected = snapshot.selected.as_ref() == Some(&job.id);
            let cursor = if selected { ">" } else { " " };
            let mark = if snapshot.batch_target.as_ref() == Some(&job.id) {
                "~"
            } else if snapshot.marked.contains(&job.id) {
                "*"
            } else {
                " "
            };
            let origin = match (snapshot.view, job.auto_denied) {
                (View::Denied, true) => " AUTO",
                (View::Denied, false) => " MAN",
                _ => "",
            };
            let mut style = Style::default();
            if selected && snapshot.surface == Surface::List {
                style = style.add_modifier(Modifier::REVERSED);
            }
            ListItem::new(Line::from(vec![
                Span::raw(format!("{cursor}{mark}")),
                Span::styled(format!("{:>3} ", job.score), Style::default().fg(Color::Yellow)),
                Span::raw(format!("{} @ {}{origin}", job.title, job.company)),
            ]))
            .style(style)
        })
        .collect::<Vec<_>>();
    items.extend(snapshot.pending.iter().map(|row| {
        ListItem::new(format!(
            "  ... {} -> {}",
            row.job.title,
            row.target.as_str()
        ))
        .style(Style::default().fg(Color::DarkGray))
    }));

    let title = format!("Jobs ({}/{})", snapshot.jobs.len(), snapshot.total);
    frame.render_widget(
        List::new(items).block(focus_block(title, snapshot.surface == Surface::List)),
        area,
    );
}

fn focus_block<'a>(title: String, focused: bool) -> Block<'a> {
    let block = Block::default().borders(Borders::ALL).title(title);
    if focused {
        block.border_style(Style::default().fg(Color::Cyan))
    } else {
        block
    }
}

/// Tag names with the cursor entry bracketed.
fn tag_line(tags: &[String], cursor: Option<usize>) -> String {
    if tags.is_empty() {
        return "(none)".to_string();
    }
    tags.iter()
        .enumerate()
        .map(|(index, tag)| {
            if Some(index) == cursor {
                format!("[{tag}]")
            } else {
                tag.clone()
            }
        })
        .collect::<Vec<_>>()
        .join("  ")
}

fn draw_panel(frame: &mut Frame<'_>, area: Rect, snapshot: &DeckSnapshot) {
    let tags_focused = snapshot.surface == Surface::Tags;
    let cursor = if tags_focused { snapshot.tag_cursor } else { None };
    let (title, lines) = match &snapshot.panel {
        PanelModel::Review { description, .. } | PanelModel::Denied { description, .. } => (
            "Description",
            vec![
                Line::from(format!("Tags: {}", tag_line(&snapshot.tags, cursor))),
                Line::from(""),
                Line::from(description.clone()),
            ],
        ),
        PanelModel::Tagging {
            unsorted,
            qualifications,
            skills,
            benefits,
        } => (
            "Tags",
            vec![
                Line::from(format!("Unsorted: {}", tag_line(unsorted, cursor))),
                Line::from(""),
                Line::from(format!("Qualifications: {}", qualifications.join(", "))),
                Line::from(format!("Skills: {}", skills.join(", "))),
                Line::from(format!("Benefits: {}", benefits.join(", "))),
            ],
        ),
        PanelModel::Tailoring {
            description,
            target,
            marked,
            log,
            artifact,
        } => {
            let mut lines = vec![Line::from(format!(
                "marked: {}  running: {}",
                marked.len(),
                target.as_ref().map_or("-", |id| id.as_str())
            ))];
            lines.extend(log.iter().map(log_line));
            lines.push(Line::from(""));
            lines.push(Line::from(artifact.clone().unwrap_or_else(|| description.clone())));
            ("Factory", lines)
        }
        PanelModel::Delivered {
            description,
            artifact,
        } => (
            "Delivered",
            vec![Line::from(
                artifact.clone().unwrap_or_else(|| description.clone()),
            )],
        ),
    };
    frame.render_widget(
        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(focus_block(title.to_string(), tags_focused)),
        area,
    );
}

pub fn log_line(entry: &BatchLogEntry) -> Line<'static> {
    match entry {
        BatchLogEntry::Item {
            job_id,
            outcome: Outcome::Success,
            detail,
            ..
        } => Line::styled(format!("ok   {job_id} {detail}"), Style::default().fg(Color::Green)),
        BatchLogEntry::Item {
            job_id,
            outcome: Outcome::Failure,
            detail,
            ..
        } => Line::styled(format!("FAIL {job_id} {detail}"), Style::default().fg(Color::Red)),
        BatchLogEntry::Complete {
            succeeded, failed, ..
        } => Line::from(format!("done: {succeeded} ok, {failed} failed")),
        BatchLogEntry::Cancelled {
            succeeded, failed, ..
        } => Line::styled(
            format!("cancelled: {succeeded} ok, {failed} failed"),
            Style::default().fg(Color::Yellow),
        ),
    }
}

fn draw_footer(frame: &mut Frame<'_>, area: Rect, snapshot: &DeckSnapshot) {
    let notice = match &snapshot.notice {
        Some(Notice::Error(text)) => Line::styled(
            format!("! {text} (any key)"),
            Style::default().fg(Color::Red),
        ),
        Some(Notice::Info(text)) => Line::from(text.clone()),
        None => Line::from(""),
    };
    frame.render_widget(
        Paragraph::new(vec![notice, Line::from(snapshot.legend.clone())])
            .block(Block::default().borders(Borders::ALL)),
        area,
    );
}

/// Draws and dispatches keys until the operator quits or input ends.
pub fn run_interactive(
    deck: &mut Deck,
    terminal: &dyn Terminal,
    width: u16,
    height: u16,
) -> Result<(), DeckError> {
    terminal.enter_interactive()?;
    let result = event_loop(deck, terminal, width, height);
    terminal.leave_interactive()?;
    result
}

fn event_loop(
    deck: &mut Deck,
    terminal: &dyn Terminal,
    width: u16,
    height: u16,
) -> Result<(), DeckError> {
    loop {
        terminal.draw(&render_deck(&deck.snapshot(), width, height)?)?;
        let Some(key) = terminal.read_key()? else {
            return Ok(());
        };
        match deck.handle_key(key) {
            DeckCommand::Continue => {}
            DeckCommand::Quit => return Ok(()),
            DeckCommand::RunBatch(mut run) => drive_batch(deck, &mut run, terminal, width, height)?,
        }
    }
}

fn drive_batch(
    deck: &mut Deck,
    run: &mut BatchRun,
    terminal: &dyn Terminal,
    width: u16,
    height: u16,
) -> Result<(), DeckError> {
    loop {
        terminal.draw(&render_deck(&deck.snapshot(), width, height)?)?;
        if let Some(KeyInput::Esc | KeyInput::Interrupt) = terminal.poll_key(Duration::ZERO)? {
            run.cancel();
        }
        match deck.step_batch(run) {
            Some(entry) if !entry.is_terminal() => {}
            _ => break,
        }
    }
    terminal.draw(&render_deck(&deck.snapshot(), width, height)?)
}
