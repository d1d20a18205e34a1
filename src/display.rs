use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::scheduler::{SchedulerStats, Stage};
use crate::session::{Detection, SessionSummary};
use crate::storage::Storage;

/// Everything reported at shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub interface: String,
    pub started: String,
    pub stage: Stage,
    pub scheduler: SchedulerStats,
    pub queue_dropped: u64,
    #[serde(flatten)]
    pub session: SessionSummary,
}

pub fn display_detection(detection: &Detection) {
    match detection {
        Detection::TargetAcquired(target) => println!(
            "[+] Target {} ({}) on channel {}",
            target.bssid,
            if target.ssid.is_empty() { "hidden" } else { target.ssid.as_str() },
            target.channel.map_or("?".to_string(), |c| c.to_string())
        ),
        Detection::HandshakeComplete { bssid } => println!("[+] Full handshake from {}", bssid),
        Detection::Pmkid(record) => println!("[+] PMKID {}", record),
        _ => {}
    }
}

pub fn render_report(report: &Report) -> String {
    let s = &report.session;
    let mut out = String::new();
    let mut row = |label: &str, value: String| {
        out.push_str(&format!("{:<20} {}\n", label, value));
    };

    row("Interface", report.interface.clone());
    row("Started", report.started.clone());
    row("Final stage", format!("{:?}", report.stage));
    row("Rounds", report.scheduler.rounds.to_string());
    match &s.target {
        Some(t) => {
            row("Target BSSID", t.bssid.to_string());
            row("Target SSID", if t.ssid.is_empty() { "?".into() } else { t.ssid.clone() });
            row("Channel", t.channel.map_or("?".into(), |c| c.to_string()));
        }
        None => row("Target", "none".into()),
    }
    row(
        "Handshake msgs",
        s.handshake_messages
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(","),
    );
    row("Handshake complete", s.handshake_complete.to_string());
    row("PMKIDs", s.pmkids.len().to_string());
    row("Clients", s.clients.len().to_string());
    row(
        "Frames",
        format!(
            "{} received, {} malformed, {} EAPOL",
            s.frames.received, s.frames.malformed, s.frames.eapol
        ),
    );
    row("Deauths sent", report.scheduler.deauth_frames_sent.to_string());
    if let Some(w) = &s.handshake_file {
        row(
            "Handshake file",
            format!("{} written, {} dropped", w.records_written, w.records_dropped),
        );
    }
    if let Some(w) = &s.traffic_file {
        row(
            "Traffic file",
            format!("{} written, {} dropped", w.records_written, w.records_dropped),
        );
    }
    if report.queue_dropped > 0 {
        row("Queue overflow", report.queue_dropped.to_string());
    }

    for client in &s.clients {
        out.push_str(&format!("  client {}\n", client));
    }
    out
}

pub fn display_results(report: &Report) {
    println!("\n--- Session Summary ---");
    print!("{}", render_report(report));
}

pub fn log_to_file<S: Storage>(storage: &S, path: &Path, report: &Report) -> crate::error::Result<()> {
    let mut file = storage.create(path)?;
    serde_json::to_writer_pretty(&mut file, report)?;
    file.write_all(b"\n")?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{FrameCounters, Target};
    use crate::storage::FsStorage;

    fn report() -> Report {
        Report {
            interface: "wlan1".into(),
            started: "2024-03-09T14:05:07".into(),
            stage: Stage::Done,
            scheduler: SchedulerStats { rounds: 1, ..Default::default() },
            queue_dropped: 0,
            session: SessionSummary {
                target: Some(Target {
                    bssid: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
                    ssid: "lab".into(),
                    channel: Some(6),
                }),
                handshake_messages: vec![1, 2],
                handshake_complete: false,
                pmkids: Vec::new(),
                clients: vec!["02:00:00:00:00:01".parse().unwrap()],
                frames: FrameCounters::default(),
                handshake_file: None,
                traffic_file: None,
            },
        }
    }

    #[test]
    fn test_render_lists_target_and_clients() {
        let text = render_report(&report());
        assert!(text.contains("AA:BB:CC:DD:EE:FF"));
        assert!(text.contains("1,2"));
        assert!(text.contains("client 02:00:00:00:00:01"));
    }

    #[test]
    fn test_summary_json_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        log_to_file(&storage, Path::new("session.json"), &report()).unwrap();

        let text = std::fs::read_to_string(dir.path().join("session.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["stage"], "done");
        assert_eq!(value["target"]["bssid"], "AA:BB:CC:DD:EE:FF");
        assert_eq!(value["handshake_messages"], serde_json::json!([1, 2]));
    }
}
