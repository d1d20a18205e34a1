use std::env;
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use log::{error, info, warn};
use tokio::sync::Notify;

use handshake_sniffer::capture::{FrameReceiver, MonitorRadio};
use handshake_sniffer::config::{Config, SUMMARY_FILE};
use handshake_sniffer::display::{display_detection, display_results, log_to_file, Report};
use handshake_sniffer::interface::{find_wifi_interface, WifiInterface};
use handshake_sniffer::scheduler::{Scheduler, Stage};
use handshake_sniffer::session::Session;
use handshake_sniffer::storage::FsStorage;
use handshake_sniffer::SnifferError;

fn check_root_privileges() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(not(unix))]
    {
        false
    }
}

#[tokio::main]
async fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if !check_root_privileges() {
        error!("This application requires root privileges. Please run with sudo or as root.");
        process::exit(1);
    }

    let args: Vec<String> = env::args().collect();
    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            eprintln!("Usage: {} [interface] [--config path]", args[0]);
            process::exit(2);
        }
    };

    let interface_name = match config.interface.clone() {
        Some(name) => name,
        None => match find_wifi_interface() {
            Some(name) => {
                info!("Auto-detected Wi-Fi interface: {}", name);
                name
            }
            None => {
                error!("No Wi-Fi interface found. Please specify one.");
                process::exit(1);
            }
        },
    };

    let interface = WifiInterface::new(&interface_name);
    info!("Setting {} to monitor mode", interface.get_interface_name());
    interface.set_monitor_mode().map_err(|e| e.to_string())?;

    let running = Arc::new(AtomicBool::new(true));
    let shutdown = Arc::new(Notify::new());
    {
        let running = Arc::clone(&running);
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            info!("Received Ctrl+C, shutting down...");
            running.store(false, Ordering::SeqCst);
            shutdown.notify_one();
        })
        .map_err(|e| format!("Error setting Ctrl+C handler: {}", e))?;
    }

    let result = run(&config, &interface_name, running, shutdown).await;

    if let Err(e) = interface.set_managed_mode() {
        warn!("Failed to restore managed mode: {}", e);
    } else {
        info!("Interface restored to managed mode");
    }

    result.map_err(|e| e.to_string())
}

async fn run(
    config: &Config,
    interface_name: &str,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
) -> Result<(), SnifferError> {
    let started = Local::now();
    std::fs::create_dir_all(&config.output_dir)?;
    let storage = FsStorage::new(&config.output_dir);

    let mut session = Session::new(storage.clone(), config.session_settings(started));
    let mut radio = MonitorRadio::open(interface_name)?;
    let (receiver, mut frames) =
        FrameReceiver::spawn(interface_name, config.queue_depth, Arc::clone(&running))?;

    let clock = Instant::now();
    let mut scheduler = Scheduler::new(config.schedule.clone(), 0);
    let mut ticker = tokio::time::interval(Duration::from_millis(config.tick_ms));
    let mut parked = false;

    info!("Starting packet capture (press Ctrl+C to stop)...");
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            frame = frames.recv() => match frame {
                Some(frame) if !parked => {
                    // writer retries sleep between attempts
                    let detections = tokio::task::block_in_place(|| session.handle_frame(&frame));
                    for detection in detections {
                        display_detection(&detection);
                    }
                }
                Some(_) => {}
                None => {
                    if running.load(Ordering::SeqCst) {
                        warn!("Capture ended unexpectedly");
                    }
                    break;
                }
            },
            _ = ticker.tick() => {
                let now_ms = clock.elapsed().as_millis() as u64;
                let stage = tokio::task::block_in_place(|| {
                    scheduler.tick(now_ms, &mut session, &mut radio)
                });
                if stage == Stage::Done && !parked {
                    info!("Capture finished; waiting for Ctrl+C");
                    parked = true;
                }
            }
        }
    }

    running.store(false, Ordering::SeqCst);
    drop(frames);
    let queue_dropped = receiver.dropped();
    tokio::task::block_in_place(|| receiver.join());
    session.close();

    let report = Report {
        interface: interface_name.to_string(),
        started: started.to_rfc3339(),
        stage: scheduler.stage(),
        scheduler: scheduler.stats().clone(),
        queue_dropped,
        session: session.summary(),
    };
    display_results(&report);
    if let Err(e) = log_to_file(&storage, Path::new(SUMMARY_FILE), &report) {
        warn!("Could not write {}: {}", SUMMARY_FILE, e);
    }
    Ok(())
}
