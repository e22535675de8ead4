pub mod app;
pub mod ui;

use std::time::{Duration, Instant};
use std::{error::Error, io};

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use tracing::debug;

use crate::api::TaskApi;
use crate::models::{Scope, TaskUpdate};
use crate::store::TaskStore;
use app::{Action, App};
use ui::ui;

const TICK: Duration = Duration::from_millis(250);
const TOAST_TTL: Duration = Duration::from_secs(4);

pub async fn run_tui<A: TaskApi>(store: &mut TaskStore<A>, refresh_every: Duration) -> Result<(), Box<dyn Error>> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(refresh_every);

    let res = run_app(&mut terminal, &mut app, store).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    res?;
    Ok(())
}

async fn run_app<B: Backend, A: TaskApi>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    store: &mut TaskStore<A>,
) -> io::Result<()> {
    terminal.draw(|f| ui(f, app, store))?;
    refresh(app, store).await;

    loop {
        store.notifier_mut().expire(TOAST_TTL);
        app.sync_rows(store);
        terminal.draw(|f| ui(f, app, store))?;

        if app.refresh_due() {
            refresh(app, store).await;
            continue;
        }
        if !event::poll(TICK)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match app.handle_key(key.code, store) {
            Action::None => {}
            Action::Quit => return Ok(()),
            Action::Refresh => refresh(app, store).await,
            Action::Invalid(msg) => store.notifier_mut().error(msg),
            action => {
                app.pending = Some("Saving...");
                terminal.draw(|f| ui(f, app, store))?;
                let ok = apply(action, store).await;
                app.finish(ok);
            }
        }
    }
}

/// Re-fetches everything. Failures surface as toasts and keep the cached
/// list on screen.
async fn refresh<A: TaskApi>(app: &mut App, store: &mut TaskStore<A>) {
    if store.fetch_tasks(None).await.is_ok() {
        debug!(tasks = store.tasks().len(), "refreshed");
    }
    app.last_refresh = Instant::now();
}

async fn apply<A: TaskApi>(action: Action, store: &mut TaskStore<A>) -> bool {
    let res = match action {
        Action::Toggle(id) => store.toggle_completed(&id).await.map(drop),
        Action::Rename(id, title) => store
            .update_task(&id, TaskUpdate::title(title.trim()), Scope::ThisInstance)
            .await
            .map(drop),
        Action::Update(id, update, scope) => store.update_task(&id, update, scope).await.map(drop),
        Action::Delete(id, scope) => store.remove_task(&id, scope).await.map(drop),
        Action::Create(new) => store.add_task(new).await.map(drop),
        Action::None | Action::Quit | Action::Refresh | Action::Invalid(_) => Ok(()),
    };
    res.is_ok()
}
