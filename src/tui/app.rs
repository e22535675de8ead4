use std::time::{Duration, Instant};

use chrono::{Duration as Days, Local, NaiveDate};
use crossterm::event::KeyCode;
use ratatui::widgets::TableState;

use crate::api::TaskApi;
use crate::models::{parse_day, DueDate, Frequency, NewTask, Scope, TaskId, TaskUpdate};
use crate::store::TaskStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    /// Tasks of one calendar day.
    Day,
    /// One row per recurrence lineage.
    Recurring,
}

/// Inline title editing for rows of the day view. At most one row edits at
/// a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowEdit {
    Viewing,
    Editing { id: TaskId, buffer: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesField {
    Title,
    Xp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialog {
    /// Day view delete, single instance only.
    ConfirmDelete { id: TaskId, title: String },
    EditSeries {
        id: TaskId,
        title: String,
        xp: String,
        field: SeriesField,
        scope: Scope,
    },
    DeleteSeries { id: TaskId, title: String, scope: Scope },
    Add(AddState),
}

/// State for the multi-step "Add Task" wizard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddState {
    pub title: String,
    pub due: Option<DueDate>,
    pub frequency: Option<Frequency>,
    pub buffer: String,
    pub step: usize, // 0: Title, 1: Due, 2: Frequency, 3: End date
}

/// What the event loop should do with the store after a key press.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    None,
    Quit,
    Refresh,
    Toggle(TaskId),
    Rename(TaskId, String),
    Update(TaskId, TaskUpdate, Scope),
    Delete(TaskId, Scope),
    Create(NewTask),
    /// Input that failed validation before anything was sent.
    Invalid(String),
}

pub struct App {
    pub view_mode: ViewMode,
    pub date: NaiveDate,
    pub state: TableState,
    /// Ids shown in the current view, in display order.
    pub rows: Vec<TaskId>,
    pub edit: RowEdit,
    pub dialog: Option<Dialog>,
    /// Shown while a request is in flight.
    pub pending: Option<&'static str>,
    pub last_refresh: Instant,
    pub refresh_every: Duration,
}

impl App {
    pub fn new(refresh_every: Duration) -> App {
        App {
            view_mode: ViewMode::Day,
            date: Local::now().date_naive(),
            state: TableState::default(),
            rows: Vec::new(),
            edit: RowEdit::Viewing,
            dialog: None,
            pending: None,
            last_refresh: Instant::now(),
            refresh_every,
        }
    }

    pub fn refresh_due(&self) -> bool {
        self.last_refresh.elapsed() >= self.refresh_every
    }

    /// Rebuilds the visible rows from the store, keeping the selection in range.
    pub fn sync_rows<A: TaskApi>(&mut self, store: &TaskStore<A>) {
        self.rows = match self.view_mode {
            ViewMode::Day => store
                .get_tasks_for_date(self.date)
                .into_iter()
                .map(|t| t.id.clone())
                .collect(),
            ViewMode::Recurring => store
                .recurring_groups()
                .iter()
                .map(|g| g.next_due().id.clone())
                .collect(),
        };

        if self.rows.is_empty() {
            self.state.select(None);
        } else if let Some(i) = self.state.selected() {
            if i >= self.rows.len() {
                self.state.select(Some(self.rows.len() - 1));
            }
        } else {
            self.state.select(Some(0));
        }
    }

    pub fn selected_id(&self) -> Option<&TaskId> {
        self.state.selected().and_then(|i| self.rows.get(i))
    }

    /// Called with the outcome of the last store action. Dialogs and inline
    /// edits close only on success so the input survives a failed request.
    pub fn finish(&mut self, ok: bool) {
        self.pending = None;
        if ok {
            self.dialog = None;
            self.edit = RowEdit::Viewing;
        }
    }

    /// Selects the next row.
    pub fn next(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i + 1 < self.rows.len() => i + 1,
            _ => 0,
        };
        self.state.select(Some(i));
    }

    /// Selects the previous row.
    pub fn previous(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => self.rows.len() - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }

    pub fn toggle_view(&mut self) {
        self.view_mode = match self.view_mode {
            ViewMode::Day => ViewMode::Recurring,
            ViewMode::Recurring => ViewMode::Day,
        };
        self.edit = RowEdit::Viewing;
        self.state.select(None);
    }

    pub fn shift_day(&mut self, days: i64) {
        // stay put at the ends of the calendar
        if let Some(date) = self.date.checked_add_signed(Days::days(days)) {
            self.date = date;
        }
        self.edit = RowEdit::Viewing;
        self.state.select(None);
    }

    /// Routes a key press to the active dialog, the inline editor or the
    /// list, in that order.
    pub fn handle_key<A: TaskApi>(&mut self, key: KeyCode, store: &TaskStore<A>) -> Action {
        if self.dialog.is_some() {
            return self.handle_dialog_key(key);
        }
        if let RowEdit::Editing { .. } = self.edit {
            return self.handle_edit_key(key);
        }
        self.handle_normal_key(key, store)
    }

    fn handle_normal_key<A: TaskApi>(&mut self, key: KeyCode, store: &TaskStore<A>) -> Action {
        match key {
            KeyCode::Char('q') => return Action::Quit,
            KeyCode::Down | KeyCode::Char('j') => self.next(),
            KeyCode::Up | KeyCode::Char('k') => self.previous(),
            KeyCode::Tab | KeyCode::Char('v') => self.toggle_view(),
            KeyCode::Char('r') => return Action::Refresh,
            KeyCode::Char('a') => self.start_add(),
            KeyCode::Char('[') if self.view_mode == ViewMode::Day => self.shift_day(-1),
            KeyCode::Char(']') if self.view_mode == ViewMode::Day => self.shift_day(1),
            KeyCode::Char('t') if self.view_mode == ViewMode::Day => {
                self.date = Local::now().date_naive();
                self.state.select(None);
            }
            KeyCode::Char(' ') => {
                if let Some(id) = self.selected_id() {
                    return Action::Toggle(id.clone());
                }
            }
            KeyCode::Char('e') => self.start_edit(store),
            KeyCode::Char('d') | KeyCode::Delete => self.start_delete(store),
            _ => {}
        }
        Action::None
    }

    fn start_add(&mut self) {
        self.dialog = Some(Dialog::Add(AddState::default()));
    }

    fn start_edit<A: TaskApi>(&mut self, store: &TaskStore<A>) {
        let Some(task) = self.selected_id().and_then(|id| store.get(id)) else {
            return;
        };
        match self.view_mode {
            ViewMode::Day => {
                self.edit = RowEdit::Editing {
                    id: task.id.clone(),
                    buffer: task.title.clone(),
                };
            }
            ViewMode::Recurring => {
                self.dialog = Some(Dialog::EditSeries {
                    id: task.id.clone(),
                    title: task.title.clone(),
                    xp: task.xp_reward.to_string(),
                    field: SeriesField::Title,
                    scope: Scope::ThisInstance,
                });
            }
        }
    }

    fn start_delete<A: TaskApi>(&mut self, store: &TaskStore<A>) {
        let Some(task) = self.selected_id().and_then(|id| store.get(id)) else {
            return;
        };
        let id = task.id.clone();
        let title = task.title.clone();
        self.dialog = Some(match self.view_mode {
            ViewMode::Day => Dialog::ConfirmDelete { id, title },
            ViewMode::Recurring => Dialog::DeleteSeries {
                id,
                title,
                scope: Scope::ThisInstance,
            },
        });
    }

    fn handle_edit_key(&mut self, key: KeyCode) -> Action {
        let RowEdit::Editing { id, buffer } = &mut self.edit else {
            return Action::None;
        };
        match key {
            KeyCode::Enter => return Action::Rename(id.clone(), buffer.clone()),
            KeyCode::Esc => self.edit = RowEdit::Viewing,
            // leaving the row counts as cancelling
            KeyCode::Up | KeyCode::Down => {
                self.edit = RowEdit::Viewing;
                if key == KeyCode::Up {
                    self.previous();
                } else {
                    self.next();
                }
            }
            KeyCode::Char(c) => buffer.push(c),
            KeyCode::Backspace => {
                buffer.pop();
            }
            _ => {}
        }
        Action::None
    }

    fn handle_dialog_key(&mut self, key: KeyCode) -> Action {
        if key == KeyCode::Esc {
            self.dialog = None;
            return Action::None;
        }
        let Some(dialog) = self.dialog.as_mut() else {
            return Action::None;
        };

        match dialog {
            Dialog::ConfirmDelete { id, .. } => match key {
                KeyCode::Char('y') | KeyCode::Char('Y') => Action::Delete(id.clone(), Scope::ThisInstance),
                _ => {
                    self.dialog = None;
                    Action::None
                }
            },
            Dialog::DeleteSeries { id, scope, .. } => match key {
                KeyCode::Tab => {
                    *scope = scope.toggled();
                    Action::None
                }
                KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => Action::Delete(id.clone(), *scope),
                _ => {
                    self.dialog = None;
                    Action::None
                }
            },
            Dialog::EditSeries {
                id,
                title,
                xp,
                field,
                scope,
            } => {
                match key {
                    KeyCode::Tab => *scope = scope.toggled(),
                    KeyCode::Up | KeyCode::Down => {
                        *field = match field {
                            SeriesField::Title => SeriesField::Xp,
                            SeriesField::Xp => SeriesField::Title,
                        }
                    }
                    KeyCode::Char(c) => match field {
                        SeriesField::Title => title.push(c),
                        SeriesField::Xp if c.is_ascii_digit() => xp.push(c),
                        SeriesField::Xp => {}
                    },
                    KeyCode::Backspace => {
                        match field {
                            SeriesField::Title => title.pop(),
                            SeriesField::Xp => xp.pop(),
                        };
                    }
                    KeyCode::Enter => {
                        let xp_reward = match xp.parse::<u32>() {
                            Ok(n) if n > 0 => n,
                            _ => return Action::Invalid("XP must be a positive number".to_string()),
                        };
                        let update = TaskUpdate {
                            title: Some(title.clone()),
                            xp_reward: Some(xp_reward),
                            ..TaskUpdate::default()
                        };
                        return Action::Update(id.clone(), update, *scope);
                    }
                    _ => {}
                }
                Action::None
            }
            Dialog::Add(add) => handle_add_key(add, key, self.date),
        }
    }
}

/// Advances the add wizard. Steps: title, due date (blank for the shown
/// day), frequency (blank for a one-off task), end date (blank for none).
fn handle_add_key(add: &mut AddState, key: KeyCode, shown_day: NaiveDate) -> Action {
    match key {
        KeyCode::Char(c) => {
            add.buffer.push(c);
            return Action::None;
        }
        KeyCode::Backspace => {
            add.buffer.pop();
            return Action::None;
        }
        KeyCode::Enter => {}
        _ => return Action::None,
    }

    let input = add.buffer.trim().to_string();
    match add.step {
        0 => {
            if input.is_empty() {
                return Action::Invalid("Title must not be empty".to_string());
            }
            add.title = input;
        }
        1 => {
            add.due = Some(if input.is_empty() {
                DueDate::on(shown_day)
            } else {
                match input.parse() {
                    Ok(due) => due,
                    Err(e) => return Action::Invalid(e.to_string()),
                }
            });
        }
        2 => {
            if input.is_empty() {
                return Action::Create(build_new_task(add, None));
            }
            match input.parse() {
                Ok(freq) => add.frequency = Some(freq),
                Err(e) => return Action::Invalid(format!("{e}")),
            }
        }
        _ => {
            let end = if input.is_empty() {
                None
            } else {
                match parse_day(&input) {
                    Ok(day) => Some(day),
                    Err(e) => return Action::Invalid(e.to_string()),
                }
            };
            return Action::Create(build_new_task(add, end));
        }
    }
    add.step += 1;
    add.buffer.clear();
    Action::None
}

fn build_new_task(add: &AddState, end: Option<NaiveDate>) -> NewTask {
    let due = add.due.unwrap_or_else(|| DueDate::on(Local::now().date_naive()));
    let new = NewTask::new(add.title.clone(), due);
    match add.frequency {
        Some(freq) => new.recurring(freq, end),
        None => new,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::LocalTaskApi;

    fn store_with(titles: &[&str], day: NaiveDate) -> TaskStore<LocalTaskApi> {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let mut store = TaskStore::new(LocalTaskApi::in_memory());
        rt.block_on(async {
            for t in titles {
                store.add_task(NewTask::new(*t, day)).await.unwrap();
            }
        });
        store
    }

    fn app_on(day: NaiveDate) -> App {
        let mut app = App::new(Duration::from_secs(300));
        app.date = day;
        app
    }

    fn type_str(app: &mut App, store: &TaskStore<LocalTaskApi>, s: &str) {
        for c in s.chars() {
            app.handle_key(KeyCode::Char(c), store);
        }
    }

    #[test]
    fn inline_edit_saves_and_cancels() {
        let day = parse_day("2024-03-01").unwrap();
        let store = store_with(&["Read"], day);
        let mut app = app_on(day);
        app.sync_rows(&store);

        app.handle_key(KeyCode::Char('e'), &store);
        assert!(matches!(&app.edit, RowEdit::Editing { buffer, .. } if buffer == "Read"));
        type_str(&mut app, &store, "!");
        let action = app.handle_key(KeyCode::Enter, &store);
        assert!(matches!(action, Action::Rename(_, ref t) if t == "Read!"));
        app.finish(true);
        assert_eq!(app.edit, RowEdit::Viewing);

        app.handle_key(KeyCode::Char('e'), &store);
        app.handle_key(KeyCode::Esc, &store);
        assert_eq!(app.edit, RowEdit::Viewing);
    }

    #[test]
    fn moving_away_cancels_edit() {
        let day = parse_day("2024-03-01").unwrap();
        let store = store_with(&["A", "B"], day);
        let mut app = app_on(day);
        app.sync_rows(&store);

        app.handle_key(KeyCode::Char('e'), &store);
        app.handle_key(KeyCode::Down, &store);
        assert_eq!(app.edit, RowEdit::Viewing);
        assert_eq!(app.state.selected(), Some(1));
    }

    #[test]
    fn failed_save_keeps_edit_open() {
        let day = parse_day("2024-03-01").unwrap();
        let store = store_with(&["Read"], day);
        let mut app = app_on(day);
        app.sync_rows(&store);
        app.handle_key(KeyCode::Char('e'), &store);
        app.finish(false);
        assert!(matches!(app.edit, RowEdit::Editing { .. }));
    }

    #[test]
    fn day_stepping_stops_at_calendar_end() {
        let store = store_with(&[], NaiveDate::MAX);
        let mut app = app_on(NaiveDate::MAX);
        app.handle_key(KeyCode::Char(']'), &store);
        assert_eq!(app.date, NaiveDate::MAX);
        app.handle_key(KeyCode::Char('['), &store);
        assert_eq!(app.date, NaiveDate::MAX.pred_opt().unwrap());

        let mut app = app_on(NaiveDate::MIN);
        app.handle_key(KeyCode::Char('['), &store);
        assert_eq!(app.date, NaiveDate::MIN);
    }

    #[test]
    fn day_view_delete_needs_confirmation() {
        let day = parse_day("2024-03-01").unwrap();
        let store = store_with(&["Read"], day);
        let mut app = app_on(day);
        app.sync_rows(&store);

        app.handle_key(KeyCode::Char('d'), &store);
        assert!(matches!(app.dialog, Some(Dialog::ConfirmDelete { .. })));
        assert_eq!(app.handle_key(KeyCode::Char('n'), &store), Action::None);
        assert!(app.dialog.is_none());

        app.handle_key(KeyCode::Char('d'), &store);
        let action = app.handle_key(KeyCode::Char('y'), &store);
        assert!(matches!(action, Action::Delete(_, Scope::ThisInstance)));
    }

    #[test]
    fn series_dialogs_default_to_single_instance() {
        let day = parse_day("2024-03-01").unwrap();
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let mut store = TaskStore::new(LocalTaskApi::in_memory());
        rt.block_on(async {
            store
                .add_task(NewTask::new("Stretch", day).recurring(Frequency::Daily, Some(parse_day("2024-03-03").unwrap())))
                .await
                .unwrap();
        });
        let mut app = app_on(day);
        app.toggle_view();
        app.sync_rows(&store);
        assert_eq!(app.rows.len(), 1);

        app.handle_key(KeyCode::Char('d'), &store);
        assert!(matches!(app.dialog, Some(Dialog::DeleteSeries { scope: Scope::ThisInstance, .. })));
        app.handle_key(KeyCode::Tab, &store);
        let action = app.handle_key(KeyCode::Enter, &store);
        assert!(matches!(action, Action::Delete(_, Scope::AllFuture)));
        app.finish(false);
        assert!(app.dialog.is_some());

        app.dialog = None;
        app.handle_key(KeyCode::Char('e'), &store);
        app.handle_key(KeyCode::Down, &store);
        app.handle_key(KeyCode::Backspace, &store);
        app.handle_key(KeyCode::Backspace, &store);
        let action = app.handle_key(KeyCode::Enter, &store);
        assert!(matches!(action, Action::Invalid(_)));
        type_str(&mut app, &store, "25");
        match app.handle_key(KeyCode::Enter, &store) {
            Action::Update(_, update, scope) => {
                assert_eq!(update.xp_reward, Some(25));
                assert_eq!(scope, Scope::ThisInstance);
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn add_wizard_builds_recurring_task() {
        let day = parse_day("2024-03-01").unwrap();
        let store = TaskStore::new(LocalTaskApi::in_memory());
        let mut app = app_on(day);

        app.handle_key(KeyCode::Char('a'), &store);
        type_str(&mut app, &store, "Journal");
        app.handle_key(KeyCode::Enter, &store);
        app.handle_key(KeyCode::Enter, &store);
        type_str(&mut app, &store, "weekly");
        app.handle_key(KeyCode::Enter, &store);
        type_str(&mut app, &store, "2024-04-01");
        match app.handle_key(KeyCode::Enter, &store) {
            Action::Create(new) => {
                assert_eq!(new.title, "Journal");
                assert!(new.due_date.is_on(day));
                assert_eq!(new.recurrence.map(|r| r.frequency), Some(Frequency::Weekly));
            }
            other => panic!("unexpected action {other:?}"),
        }
    }
}
