use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use anyhow::{Context, Result};
use crossterm::{
    execute,
    event::{DisableMouseCapture, EnableMouseCapture},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{Terminal, backend::CrosstermBackend};

use marcher_core::catalog::Catalog;
use marcher_core::clock::SystemClock;
use marcher_core::device::create_device;
use marcher_core::interpreter;
use marcher_core::observer::{Fanout, LogObserver, StatusObserver};
use marcher_core::rig::{Rig, Timing};
use marcher_core::scheduler::Scheduler;
use marcher_core::settings::Settings;
use marcher_core::supervisor::Supervisor;
use marcher_core::types::EngineStatus;
use marcher_core::vision::TemplateMatcher;
use marcher_core::logger;

struct Flags {
    stub: bool,
    headless: bool,
    once: Option<String>,
}

fn parse_flags() -> Result<Flags> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut flags = Flags { stub: false, headless: false, once: None };
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--stub" => flags.stub = true,
            "--headless" => flags.headless = true,
            "--once" => flags.once = Some(it.next().context("--once needs a task name")?),
            other => anyhow::bail!("unknown argument: {}", other),
        }
    }
    Ok(flags)
}

fn build_rig(settings: &Settings, tasks_dir: &Path, stub: bool, status: Arc<Mutex<EngineStatus>>) -> Rig {
    Rig {
        device: create_device(settings, stub),
        matcher: Box::new(TemplateMatcher::new(tasks_dir, settings.match_threshold)),
        clock: Box::new(SystemClock::new(settings.jitter)),
        observer: Box::new(Fanout(vec![
            Box::new(StatusObserver::new(status)),
            Box::new(LogObserver::new(&settings.rally_task)),
        ])),
        timing: Timing::from_settings(settings),
    }
}

fn main() -> Result<ExitCode> {
    let flags = parse_flags()?;

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let settings_path = cwd.join("settings.json");
    let settings = Settings::load(&settings_path);
    if !settings_path.exists() {
        settings.save(&settings_path);
    }
    let tasks_dir = cwd.join(&settings.tasks_dir);

    logger::init(&cwd.join(&settings.logs_dir)).context("opening log file")?;
    let tui = flags.once.is_none() && !flags.headless;
    let log_rx = if tui {
        let (log_tx, log_rx) = mpsc::channel::<String>();
        logger::set_tui_sender(log_tx);
        Some(log_rx)
    } else {
        logger::set_echo(true);
        None
    };

    let catalog = Catalog::load(&tasks_dir, &settings.rally_task)
        .with_context(|| format!("loading tasks from {}", tasks_dir.display()))?;
    for (task, err) in catalog.skipped() {
        logger::warn(&format!("task {} skipped: {}", task, err));
    }
    let status = Arc::new(Mutex::new(EngineStatus::default()));

    if let Some(task) = flags.once {
        if let Some((_, err)) = catalog.skipped().iter().find(|(t, _)| *t == task) {
            anyhow::bail!("task {} failed to load: {}", task, err);
        }
        let mut rig = build_rig(&settings, &tasks_dir, flags.stub, status);
        let seq = catalog.sequence(&task)?;
        let outcome = interpreter::run_sequence(&mut rig, seq)?;
        return Ok(if outcome.succeeded() { ExitCode::SUCCESS } else { ExitCode::FAILURE });
    }

    if let Err(e) = catalog.check_rotation(&settings.idle_rotation) {
        logger::warn(&format!("idle rotation: {}", e));
    }
    logger::info(&format!(
        "loaded {} task(s), rally task {}, device {}",
        catalog.task_names().len(),
        settings.rally_task,
        settings.device_serial.as_deref().unwrap_or("default"),
    ));

    let Some(log_rx) = log_rx else {
        let mut rig = build_rig(&settings, &tasks_dir, flags.stub, status);
        let scheduler = Scheduler::new(&catalog, settings.idle_rotation.clone(), settings.trigger_anchor.clone());
        let stop = AtomicBool::new(false);
        Supervisor::new().run(&mut rig, &scheduler, &stop)?;
        return Ok(ExitCode::SUCCESS);
    };
    logger::info("marcher started");

    let stop = Arc::new(AtomicBool::new(false));
    let engine_done = Arc::new(AtomicBool::new(false));

    // Engine on a background thread, TUI on the main thread
    let engine = {
        let stop = Arc::clone(&stop);
        let engine_done = Arc::clone(&engine_done);
        let status = Arc::clone(&status);
        let settings = settings.clone();
        let stub = flags.stub;
        thread::spawn(move || {
            let mut rig = build_rig(&settings, &tasks_dir, stub, status);
            let scheduler = Scheduler::new(&catalog, settings.idle_rotation.clone(), settings.trigger_anchor.clone());
            let result = Supervisor::new().run(&mut rig, &scheduler, &stop);
            match &result {
                Ok(()) => logger::info("engine stopped"),
                Err(e) => logger::error(&format!("engine stopped: {:#}", e)),
            }
            engine_done.store(true, Ordering::SeqCst);
            result
        })
    };

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = marcher_tui::App::new(status, Arc::clone(&stop), Arc::clone(&engine_done), log_rx);
    let result = marcher_tui::event::run(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    stop.store(true, Ordering::SeqCst);
    result?;
    // A still-running engine is mid-tick; it sees the stop flag on its own.
    if engine_done.load(Ordering::SeqCst) {
        match engine.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.context("engine failed")),
            Err(_) => anyhow::bail!("engine thread panicked"),
        }
    }
    Ok(ExitCode::SUCCESS)
}
