use std::sync::Arc;

use clap::Subcommand;
use focusloop_core::storage::Database;
use focusloop_core::{Config, Event, SessionStateMachine, TimerEngine, TimerStore};

/// kv key holding the currently-selected mood between invocations.
const MOOD_KEY: &str = "current_mood";

#[derive(Subcommand)]
pub enum TimerAction {
    /// Start a warmup phase (a new session)
    Warmup,
    /// Start a focus phase, skipping warmup when idle
    Focus,
    /// Pause the current countdown
    Pause,
    /// Resume a paused countdown
    Resume,
    /// Skip the current phase
    Skip,
    /// Complete the current phase as if it ran out
    Complete,
    /// Stop and return to idle (the session stays uncompleted)
    Stop,
    /// Extend the current phase
    Add {
        /// Minutes to add
        minutes: u64,
    },
    /// Shorten the current phase
    Sub {
        /// Minutes to subtract
        minutes: u64,
    },
    /// Print the current timer state as JSON
    Status,
    /// Resume the session left over from a previous run
    Recover,
    /// Discard the session left over from a previous run
    Discard,
    /// List recent sessions as JSON
    Sessions {
        /// Maximum number of sessions to list
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Select the current mood, recorded against sessions
    Mood {
        /// Mood label; omit to clear
        mood: Option<String>,
    },
}

struct App {
    db: Arc<Database>,
    machine: Arc<SessionStateMachine>,
}

fn open() -> Result<App, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let db = Arc::new(Database::open()?);
    let engine = Arc::new(TimerEngine::new(config.engine_config()));
    let machine = SessionStateMachine::new(
        engine,
        Arc::clone(&db) as Arc<dyn TimerStore>,
        config.session_config(),
    );
    if let Some(mood) = db.kv_get(MOOD_KEY)? {
        machine.set_mood(Some(mood));
    }
    Ok(App { db, machine })
}

/// Commands that act on an in-flight session implicitly pick up the
/// persisted one first; each process starts cold, so this is what makes
/// `pause` after a crash (or just a previous invocation) find its timer.
fn rehydrate(app: &App) -> Result<(), Box<dyn std::error::Error>> {
    app.machine.recover_session()?;
    Ok(())
}

fn refuse_if_recoverable(app: &App) -> Result<(), Box<dyn std::error::Error>> {
    if app.machine.recoverable().is_some() {
        eprintln!(
            "a previous session is still in flight; run `focusloop timer recover` \
             to pick it up or `focusloop timer discard` to drop it"
        );
        std::process::exit(1);
    }
    Ok(())
}

fn print_outcome(app: &App, event: Option<Event>) -> Result<(), Box<dyn std::error::Error>> {
    match event {
        Some(event) => println!("{}", serde_json::to_string_pretty(&event)?),
        None => println!("{}", serde_json::to_string_pretty(&app.machine.snapshot())?),
    }
    Ok(())
}

pub fn run(action: TimerAction) -> Result<(), Box<dyn std::error::Error>> {
    let app = open()?;

    match action {
        TimerAction::Warmup => {
            refuse_if_recoverable(&app)?;
            let event = app.machine.start_warmup()?;
            print_outcome(&app, event)?;
        }
        TimerAction::Focus => {
            refuse_if_recoverable(&app)?;
            let event = app.machine.start_focus()?;
            print_outcome(&app, event)?;
        }
        TimerAction::Pause => {
            rehydrate(&app)?;
            let event = app.machine.pause()?;
            print_outcome(&app, event)?;
        }
        TimerAction::Resume => {
            rehydrate(&app)?;
            let event = app.machine.resume()?;
            print_outcome(&app, event)?;
        }
        TimerAction::Skip => {
            rehydrate(&app)?;
            let event = app.machine.skip()?;
            print_outcome(&app, event)?;
        }
        TimerAction::Complete => {
            rehydrate(&app)?;
            let event = app.machine.complete()?;
            print_outcome(&app, event)?;
        }
        TimerAction::Stop => {
            rehydrate(&app)?;
            let event = app.machine.stop()?;
            print_outcome(&app, event)?;
        }
        TimerAction::Add { minutes } => {
            rehydrate(&app)?;
            let event = app.machine.add_time(minutes * 60 * 1_000)?;
            print_outcome(&app, event)?;
        }
        TimerAction::Sub { minutes } => {
            rehydrate(&app)?;
            let event = app.machine.subtract_time(minutes * 60 * 1_000)?;
            print_outcome(&app, event)?;
        }
        TimerAction::Status => {
            rehydrate(&app)?;
            println!("{}", serde_json::to_string_pretty(&app.machine.snapshot())?);
        }
        TimerAction::Recover => {
            match app.machine.recover_session()? {
                Some(event) => println!("{}", serde_json::to_string_pretty(&event)?),
                None => println!("nothing to recover"),
            }
        }
        TimerAction::Discard => {
            match app.machine.discard_recovery()? {
                Some(event) => println!("{}", serde_json::to_string_pretty(&event)?),
                None => println!("nothing to discard"),
            }
        }
        TimerAction::Sessions { limit } => {
            let sessions = app.db.recent_sessions(limit)?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
        TimerAction::Mood { mood } => match mood {
            Some(mood) => {
                app.db.kv_set(MOOD_KEY, &mood)?;
                println!("mood set: {mood}");
            }
            None => {
                app.db.kv_delete(MOOD_KEY)?;
                println!("mood cleared");
            }
        },
    }

    Ok(())
}
