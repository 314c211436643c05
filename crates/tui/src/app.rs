use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Instant;

use marcher_core::types::EngineStatus;

use crate::confirm::ConfirmDialog;

/// Log lines kept in memory for the panel.
const LOG_CAPACITY: usize = 5000;

pub struct App {
    pub status: Arc<Mutex<EngineStatus>>,
    /// Raised to ask the engine to stop at its next boundary.
    pub stop: Arc<AtomicBool>,
    /// Set by the engine thread when it has returned.
    pub engine_done: Arc<AtomicBool>,
    pub started: Instant,
    pub log_visible: bool,
    pub log_messages: Vec<String>,
    pub log_scroll: usize, // scroll offset from bottom (0 = latest)
    pub log_rx: mpsc::Receiver<String>,
    pub confirm: Option<ConfirmDialog>,
    pub should_quit: bool,
}

impl App {
    pub fn new(
        status: Arc<Mutex<EngineStatus>>,
        stop: Arc<AtomicBool>,
        engine_done: Arc<AtomicBool>,
        log_rx: mpsc::Receiver<String>,
    ) -> Self {
        Self {
            status,
            stop,
            engine_done,
            started: Instant::now(),
            log_visible: true,
            log_messages: Vec::new(),
            log_scroll: 0,
            log_rx,
            confirm: None,
            should_quit: false,
        }
    }

    pub fn drain_logs(&mut self) {
        while let Ok(msg) = self.log_rx.try_recv() {
            self.log_messages.push(msg);
        }
        if self.log_messages.len() > LOG_CAPACITY {
            let excess = self.log_messages.len() - LOG_CAPACITY;
            self.log_messages.drain(..excess);
        }
    }

    pub fn scroll_log_up(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_add(n);
    }

    pub fn scroll_log_down(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(n);
    }

    pub fn toggle_log(&mut self) {
        self.log_visible = !self.log_visible;
    }

    pub fn engine_running(&self) -> bool {
        !self.engine_done.load(Ordering::SeqCst)
    }

    /// Leave the event loop: the user quit, or the engine ended on its own
    /// (it only does that on a fatal error).
    pub fn should_exit(&self) -> bool {
        self.should_quit || (!self.engine_running() && !self.stop.load(Ordering::SeqCst))
    }

    /// Ask before quitting while the engine still runs.
    pub fn request_quit(&mut self) {
        if self.engine_running() {
            self.confirm = Some(ConfirmDialog::new("Stop the engine and quit?"));
        } else {
            self.quit();
        }
    }

    pub fn answer_confirm(&mut self, yes: bool) {
        self.confirm = None;
        if yes {
            self.quit();
        }
    }

    pub fn quit(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.should_quit = true;
    }
}
