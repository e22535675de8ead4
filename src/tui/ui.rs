use chrono::Local;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::Line,
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table},
    Frame,
};

use super::app::{App, Dialog, RowEdit, SeriesField, ViewMode};
use crate::api::TaskApi;
use crate::notify::Notice;
use crate::store::{LoadState, TaskStore};

/// Text shown in place of the task table until the first fetch succeeded.
fn load_placeholder(state: LoadState) -> Option<&'static str> {
    match state {
        LoadState::Loading => Some("Loading tasks..."),
        LoadState::Failed => Some("Could not load tasks, press r to retry"),
        LoadState::Loaded => None,
    }
}

pub fn ui<A: TaskApi>(f: &mut Frame, app: &mut App, store: &TaskStore<A>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(0),    // Table
            Constraint::Length(1), // Status
            Constraint::Length(3), // Help
        ])
        .split(f.area());

    if let Some(text) = load_placeholder(store.load_state()) {
        let color = match store.load_state() {
            LoadState::Failed => Color::Red,
            _ => Color::Gray,
        };
        let loading = Paragraph::new(text)
            .style(Style::default().fg(color))
            .block(Block::default().borders(Borders::ALL).title("HabitQuest"));
        f.render_widget(loading, chunks[0]);
    } else {
        match app.view_mode {
            ViewMode::Day => draw_day(f, app, store, chunks[0]),
            ViewMode::Recurring => draw_recurring(f, app, store, chunks[0]),
        }
    }

    draw_status(f, app, store, chunks[1]);

    let help_text = match (&app.dialog, &app.edit) {
        (Some(Dialog::Add(_)), _) => "Enter: Next Step | Esc: Cancel",
        (Some(Dialog::ConfirmDelete { .. }), _) => "y: Delete | any other key: Cancel",
        (Some(Dialog::DeleteSeries { .. }), _) => "Tab: Change Scope | y/Enter: Delete | Esc: Cancel",
        (Some(Dialog::EditSeries { .. }), _) => "Tab: Change Scope | Up/Down: Field | Enter: Save | Esc: Cancel",
        (None, RowEdit::Editing { .. }) => "Enter: Save | Esc: Cancel",
        (None, RowEdit::Viewing) => match app.view_mode {
            ViewMode::Day => "q: Quit | a: Add | Space: Done | e: Edit | d: Del | [/]: Day | t: Today | r: Refresh | v: Recurring",
            ViewMode::Recurring => "q: Quit | a: Add | e: Edit | d: Del | r: Refresh | v: Day View",
        },
    };
    let help = Paragraph::new(help_text)
        .style(Style::default().fg(Color::Gray))
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(help, chunks[2]);

    if let Some(dialog) = &app.dialog {
        draw_dialog(f, dialog);
    }
}

fn draw_day<A: TaskApi>(f: &mut Frame, app: &mut App, store: &TaskStore<A>, area: Rect) {
    let tasks = store.get_tasks_for_date(app.date);
    if tasks.is_empty() {
        let empty = Paragraph::new("Nothing due. Press 'a' to add a task.")
            .style(Style::default().fg(Color::Gray))
            .block(Block::default().borders(Borders::ALL).title(format!("HabitQuest - {}", app.date)));
        f.render_widget(empty, area);
        return;
    }

    let rows: Vec<Row> = tasks
        .iter()
        .map(|t| {
            let title = match &app.edit {
                RowEdit::Editing { id, buffer } if *id == t.id => format!("{buffer}_"),
                _ => t.display_title(),
            };
            let style = if t.completed {
                Style::default().fg(Color::DarkGray)
            } else if t.id.is_provisional() {
                Style::default().fg(Color::Gray).add_modifier(Modifier::ITALIC)
            } else {
                Style::default().fg(Color::Green)
            };
            let time = t.due_date.datetime().time();
            Row::new(vec![
                Cell::from(if t.completed { "[x]" } else { "[ ]" }),
                Cell::from(title),
                Cell::from(if time == chrono::NaiveTime::MIN {
                    String::new()
                } else {
                    time.format("%H:%M").to_string()
                }),
                Cell::from(t.frequency().map(|f| f.to_string()).unwrap_or_default()),
                Cell::from(format!("{} XP", t.xp_reward)),
            ])
            .style(style)
        })
        .collect();

    let today = Local::now().date_naive();
    let heading = if app.date == today {
        format!("HabitQuest - Today ({})", app.date)
    } else {
        format!("HabitQuest - {}", app.date.format("%a %Y-%m-%d"))
    };

    let widths = [
        Constraint::Length(4),
        Constraint::Min(20),
        Constraint::Length(6),
        Constraint::Length(10),
        Constraint::Length(8),
    ];
    let table = Table::new(rows, widths)
        .header(
            Row::new(vec!["", "Task", "Time", "Repeats", "Reward"])
                .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
                .bottom_margin(1),
        )
        .block(Block::default().borders(Borders::ALL).title(heading))
        .row_highlight_style(Style::default().add_modifier(Modifier::BOLD).bg(Color::DarkGray))
        .highlight_symbol(">> ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn draw_recurring<A: TaskApi>(f: &mut Frame, app: &mut App, store: &TaskStore<A>, area: Rect) {
    let groups = store.recurring_groups();
    let rows: Vec<Row> = groups
        .iter()
        .map(|g| {
            let next = g.next_due();
            Row::new(vec![
                Cell::from(next.display_title()),
                Cell::from(next.frequency().map(|f| f.to_string()).unwrap_or_default()),
                Cell::from(next.due_date.to_string()),
                Cell::from(
                    next.recurring_end_date()
                        .map_or_else(|| "forever".to_string(), |d| d.to_string()),
                ),
                Cell::from(format!("{}/{}", g.completed_count(), g.len())),
            ])
        })
        .collect();

    let widths = [
        Constraint::Min(20),
        Constraint::Length(10),
        Constraint::Length(12),
        Constraint::Length(12),
        Constraint::Length(8),
    ];
    let table = Table::new(rows, widths)
        .header(
            Row::new(vec!["Task", "Repeats", "Next Due", "Until", "Done"])
                .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
                .bottom_margin(1),
        )
        .block(Block::default().borders(Borders::ALL).title("HabitQuest - Recurring"))
        .row_highlight_style(Style::default().add_modifier(Modifier::BOLD).bg(Color::DarkGray))
        .highlight_symbol(">> ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn draw_status<A: TaskApi>(f: &mut Frame, app: &App, store: &TaskStore<A>, area: Rect) {
    let (text, style) = if let Some(pending) = app.pending {
        (pending.to_string(), Style::default().fg(Color::Yellow))
    } else if let Some(toast) = store.notifier().latest() {
        let color = match toast.notice {
            Notice::Completed { .. } => Color::Green,
            Notice::Info(_) => Color::Cyan,
            Notice::Error(_) => Color::Red,
        };
        (toast.notice.to_string(), Style::default().fg(color).add_modifier(Modifier::BOLD))
    } else {
        (String::new(), Style::default())
    };
    f.render_widget(Paragraph::new(text).style(style), area);
}

fn draw_dialog(f: &mut Frame, dialog: &Dialog) {
    let (title, lines): (String, Vec<Line>) = match dialog {
        Dialog::ConfirmDelete { title, .. } => (
            "Delete task".to_string(),
            vec![Line::from(format!("Delete \"{title}\"? [y/N]"))],
        ),
        Dialog::DeleteSeries { title, scope, .. } => (
            format!("Delete recurring task: {scope}"),
            vec![
                Line::from(format!("Delete \"{title}\"?")),
                Line::from("Earlier instances are kept."),
            ],
        ),
        Dialog::EditSeries {
            title, xp, field, scope, ..
        } => {
            let marker = |which: SeriesField| if *field == which { "> " } else { "  " };
            (
                format!("Edit recurring task: {scope}"),
                vec![
                    Line::from(format!("{}Title: {title}", marker(SeriesField::Title))),
                    Line::from(format!("{}XP:    {xp}", marker(SeriesField::Xp))),
                ],
            )
        }
        Dialog::Add(add) => {
            let prompt = match add.step {
                0 => "Add Task: Enter Title",
                1 => "Add Task: Enter Due Date (YYYY-MM-DD, blank for shown day)",
                2 => "Add Task: Repeat daily/weekly/biweekly/monthly (blank for once)",
                _ => "Add Task: Repeat Until (YYYY-MM-DD, blank for no end)",
            };
            (prompt.to_string(), vec![Line::from(add.buffer.as_str())])
        }
    };

    let area = centered_rect(60, lines.len() as u16 + 2, f.area());
    f.render_widget(Clear, area);
    let body = Paragraph::new(lines)
        .style(Style::default().fg(Color::Yellow))
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(body, area);
}

fn centered_rect(percent_x: u16, height: u16, r: Rect) -> Rect {
    let margin = r.height.saturating_sub(height) / 2;
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(margin),
            Constraint::Length(height),
            Constraint::Length(margin),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centered_rect_fits_small_terminals() {
        let area = centered_rect(60, 10, Rect::new(0, 0, 40, 4));
        assert!(area.height <= 4);
        assert!(area.width <= 40);
    }

    #[test]
    fn failed_first_load_offers_retry() {
        assert_eq!(load_placeholder(LoadState::Loading), Some("Loading tasks..."));
        assert_eq!(
            load_placeholder(LoadState::Failed),
            Some("Could not load tasks, press r to retry")
        );
        assert_eq!(load_placeholder(LoadState::Loaded), None);
    }
}
