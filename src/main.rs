// src/main.rs

use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, error, info, warn};

use instant_replay::config::{Config, WINDOW_PRESETS_SECS};
use instant_replay::{ReplayApp, SessionEvent};

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Save,
    Start,
    Stop,
    Status,
    List,
    Window(u64),
    Quit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut parts = line.split_whitespace();
    let cmd = parts.next().unwrap_or_default();
    match cmd {
        "save" => Ok(Command::Save),
        "start" => Ok(Command::Start),
        "stop" => Ok(Command::Stop),
        "status" => Ok(Command::Status),
        "list" => Ok(Command::List),
        "quit" | "exit" => Ok(Command::Quit),
        "window" => parts
            .next()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Command::Window)
            .ok_or_else(|| {
                let presets: Vec<String> =
                    WINDOW_PRESETS_SECS.iter().map(|s| s.to_string()).collect();
                format!("usage: window <seconds> (presets: {})", presets.join(", "))
            }),
        other => Err(format!("unknown command '{}'", other)),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // ------------------------------------------------------------
    // Config
    // ------------------------------------------------------------
    let cfg = match std::env::args().nth(1) {
        Some(path) => {
            let cfg = Config::load(&path)?;
            info!("[replay] loaded {}", path);
            cfg
        }
        None => {
            info!("[replay] no config given, using defaults");
            Config::default()
        }
    };

    // ------------------------------------------------------------
    // Graceful shutdown
    // ------------------------------------------------------------
    let running = Arc::new(AtomicBool::new(true));
    {
        let r = running.clone();
        ctrlc::set_handler(move || {
            info!("\n[replay] shutdown requested");
            r.store(false, Ordering::SeqCst);
        })?;
    }

    // ------------------------------------------------------------
    // App
    // ------------------------------------------------------------
    let mut app = ReplayApp::new(cfg)?;
    let events = app.session_events();
    app.start_capture()?;

    let commands = spawn_stdin_reader();

    info!(
        "[replay] capturing into {:?} – commands: save, start, stop, status, list, window <s>, quit",
        app.config().storage.dir
    );

    // ------------------------------------------------------------
    // Main loop
    // ------------------------------------------------------------
    let mut last_stats = Instant::now();

    while running.load(Ordering::Relaxed) {
        match commands.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => match parse_command(&line) {
                Ok(Command::Quit) => break,
                Ok(cmd) => handle(&mut app, cmd),
                Err(msg) => warn!("[replay] {}", msg),
            },
            Err(RecvTimeoutError::Timeout) => {}
            // stdin closed; keep running until Ctrl+C
            Err(RecvTimeoutError::Disconnected) => {}
        }

        while let Ok(notice) = app.notices().try_recv() {
            println!("{}", notice.status_line());
        }
        while let Ok(event) = events.try_recv() {
            log_event(&event);
        }

        if last_stats.elapsed() >= Duration::from_secs(5) {
            let status = app.status();
            debug!(
                "[replay] buffered={} segments ({:.1}s, {} bytes)",
                status.buffered_segments, status.buffered_seconds, status.buffered_bytes
            );
            last_stats = Instant::now();
        }
    }

    // ------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------
    info!("[replay] shutting down…");
    app.shutdown();
    while let Ok(notice) = app.notices().try_recv() {
        println!("{}", notice.status_line());
    }
    info!("[replay] shutdown complete");

    Ok(())
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx): (Sender<String>, Receiver<String>) = unbounded();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn handle(app: &mut ReplayApp, cmd: Command) {
    match cmd {
        Command::Save => {
            if !app.request_save() {
                error!("[replay] trigger loop is gone");
            }
        }
        Command::Start => match app.start_capture() {
            Ok(()) => info!("[replay] capture started"),
            Err(e) => error!("[replay] start failed: {:#}", e),
        },
        Command::Stop => {
            app.stop_capture();
            info!("[replay] capture stopped");
        }
        Command::Status => match serde_json::to_string_pretty(&app.status()) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("[replay] status: {}", e),
        },
        Command::List => match app.list_recordings() {
            Ok(recordings) if recordings.is_empty() => println!("no saved replays"),
            Ok(recordings) => {
                for r in recordings {
                    println!("{}  {:>10} bytes  {}", r.modified_local, r.bytes, r.name);
                }
            }
            Err(e) => error!("[replay] list failed: {:#}", e),
        },
        Command::Window(secs) => match app.set_window_seconds(secs) {
            Ok(()) => info!("[replay] window set to {}s", secs),
            Err(e) => warn!("[replay] window unchanged: {}", e),
        },
        Command::Quit => {}
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Started { session_id, source } => {
            info!("[replay] session {} capturing from {}", session_id, source)
        }
        SessionEvent::Stopped { session_id } => info!("[replay] session {} stopped", session_id),
        SessionEvent::SourceEnded { session_id } => {
            info!("[replay] session {} source ended", session_id)
        }
        SessionEvent::SourceFailed { session_id, reason } => {
            error!("[replay] session {} source failed: {}", session_id, reason)
        }
    }
}
