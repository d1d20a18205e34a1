//! Session state and frame dispatch.
//!
//! One `Session` owns everything the capture accumulates: the target, the
//! handshake and PMKID dedup sets, discovered clients and the capture
//! writers. It is driven from a single consumer, so none of it is shared.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::handshake::{self, HandshakeOutcome, HandshakeTracker};
use crate::mac::MacAddress;
use crate::parser::{self, FrameHeader, FrameKind};
use crate::rsn::{self, Pmkid, PmkidRecord};
use crate::storage::{self, Storage};
use crate::writer::{PcapWriter, WriterConfig, WriterStats};

/// One received frame, radiotap already removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub data: Vec<u8>,
    /// Receive time since the Unix epoch.
    pub timestamp: Duration,
    /// Channel the radio was tuned to, when the driver reports it.
    pub channel: Option<u8>,
    pub rssi: Option<i8>,
}

impl RawFrame {
    pub fn new(data: impl Into<Vec<u8>>, timestamp: Duration) -> Self {
        RawFrame { data: data.into(), timestamp, channel: None, rssi: None }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub bssid: MacAddress,
    pub ssid: String,
    pub channel: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    TargetAcquired(Target),
    ChannelChanged { bssid: MacAddress, channel: u8 },
    ClientSeen { bssid: MacAddress, station: MacAddress },
    HandshakeMessage { bssid: MacAddress, message: u8 },
    HandshakeComplete { bssid: MacAddress },
    Pmkid(PmkidRecord),
}

/// What ends the capture stage early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Objective {
    Handshake,
    Pmkid,
    Either,
}

/// Restricts which network may become the target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetFilter {
    pub bssid: Option<MacAddress>,
    pub ssid: Option<String>,
}

impl TargetFilter {
    fn admits(&self, bssid: MacAddress, ssid: Option<&str>) -> bool {
        if self.bssid.map_or(false, |wanted| wanted != bssid) {
            return false;
        }
        match (&self.ssid, ssid) {
            (Some(wanted), Some(seen)) => wanted == seen,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub filter: TargetFilter,
    /// Directory for per-target handshake captures.
    pub capture_dir: PathBuf,
    /// Receives every frame when set.
    pub traffic_file: Option<PathBuf>,
    pub pmkid_file: PathBuf,
    pub writer: WriterConfig,
    pub max_clients: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            filter: TargetFilter::default(),
            capture_dir: PathBuf::from("handshake"),
            traffic_file: None,
            pmkid_file: PathBuf::from("pmkid.txt"),
            writer: WriterConfig::default(),
            max_clients: 32,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FrameCounters {
    pub received: u64,
    pub malformed: u64,
    pub beacons: u64,
    pub eapol: u64,
    pub association_requests: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub target: Option<Target>,
    pub handshake_messages: Vec<u8>,
    pub handshake_complete: bool,
    pub pmkids: Vec<PmkidRecord>,
    pub clients: Vec<MacAddress>,
    pub frames: FrameCounters,
    pub handshake_file: Option<WriterStats>,
    pub traffic_file: Option<WriterStats>,
}

pub struct Session<S: Storage + Clone> {
    storage: S,
    settings: SessionSettings,
    target: Option<Target>,
    handshakes: HandshakeTracker,
    seen_pmkids: HashSet<(Pmkid, MacAddress)>,
    pmkids: Vec<PmkidRecord>,
    clients: BTreeSet<MacAddress>,
    handshake_writer: Option<PcapWriter<S>>,
    /// Closed per-target writers from earlier rounds, reopened in append
    /// mode if their target comes back.
    retired_writers: HashMap<MacAddress, PcapWriter<S>>,
    traffic_writer: Option<PcapWriter<S>>,
    counters: FrameCounters,
}

impl<S: Storage + Clone> Session<S> {
    pub fn new(storage: S, settings: SessionSettings) -> Self {
        if let Err(e) = storage.mkdir(&settings.capture_dir) {
            warn!("Could not create {}: {}", settings.capture_dir.display(), e);
        }

        let traffic_writer = settings.traffic_file.as_ref().map(|path| {
            info!("Recording all traffic to {}", path.display());
            PcapWriter::create(storage.clone(), path.clone(), settings.writer.clone())
        });

        Session {
            storage,
            settings,
            target: None,
            handshakes: HandshakeTracker::new(),
            seen_pmkids: HashSet::new(),
            pmkids: Vec::new(),
            clients: BTreeSet::new(),
            handshake_writer: None,
            retired_writers: HashMap::new(),
            traffic_writer,
            counters: FrameCounters::default(),
        }
    }

    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    pub fn clients(&self) -> impl Iterator<Item = &MacAddress> {
        self.clients.iter()
    }

    pub fn handshake_complete(&self) -> bool {
        self.handshakes.is_complete()
    }

    pub fn pmkid_captured(&self) -> bool {
        !self.pmkids.is_empty()
    }

    pub fn objective_met(&self, objective: Objective) -> bool {
        match objective {
            Objective::Handshake => self.handshake_complete(),
            Objective::Pmkid => self.pmkid_captured(),
            Objective::Either => self.handshake_complete() || self.pmkid_captured(),
        }
    }

    pub fn counters(&self) -> &FrameCounters {
        &self.counters
    }

    pub fn handshake_file(&self) -> Option<&Path> {
        self.handshake_writer.as_ref().map(|w| w.path())
    }

    pub fn handle_frame(&mut self, frame: &RawFrame) -> Vec<Detection> {
        self.counters.received += 1;

        if let Some(writer) = self.traffic_writer.as_mut() {
            writer.write_frame(frame.timestamp, &frame.data);
        }

        let header = match parser::classify(&frame.data) {
            Some(header) => header,
            None => {
                self.counters.malformed += 1;
                trace!("Dropped malformed frame of {} bytes", frame.len());
                return Vec::new();
            }
        };

        let mut detections = Vec::new();
        match header.kind {
            FrameKind::Beacon => self.on_beacon(frame, &header, &mut detections),
            FrameKind::Eapol => self.on_eapol(frame, &header, &mut detections),
            FrameKind::AssociationRequest | FrameKind::ReassociationRequest => {
                self.on_association(frame, &header, &mut detections)
            }
            FrameKind::Deauthentication | FrameKind::Data => {
                if self.is_target(header.bssid) {
                    self.note_client(&header, &mut detections);
                }
            }
            FrameKind::Other => {}
        }
        detections
    }

    fn is_target(&self, bssid: MacAddress) -> bool {
        self.target.as_ref().map_or(false, |t| t.bssid == bssid)
    }

    /// Accepts `bssid` if it is the target, or makes it the target when none
    /// is fixed yet and the filter allows it.
    fn accept_bssid(
        &mut self,
        bssid: MacAddress,
        ssid: Option<&str>,
        channel: Option<u8>,
        detections: &mut Vec<Detection>,
    ) -> bool {
        if let Some(target) = &self.target {
            return target.bssid == bssid;
        }
        if bssid.is_multicast() || !self.settings.filter.admits(bssid, ssid) {
            return false;
        }

        let target = Target {
            bssid,
            ssid: ssid.unwrap_or_default().to_string(),
            channel: channel.filter(|ch| (1..=13).contains(ch)),
        };
        info!(
            "[TARGET] {} | {} | CH: {}",
            if target.ssid.is_empty() { "<unknown>" } else { target.ssid.as_str() },
            target.bssid,
            target.channel.map_or("?".to_string(), |c| c.to_string())
        );

        let writer = match self.retired_writers.remove(&bssid) {
            Some(writer) => {
                info!("Appending to {}", writer.path().display());
                writer
            }
            None => {
                let path = self
                    .settings
                    .capture_dir
                    .join(format!("handshake_{}.pcap", bssid.to_file_stem()));
                PcapWriter::create(self.storage.clone(), path, self.settings.writer.clone())
            }
        };
        self.handshake_writer = Some(writer);
        detections.push(Detection::TargetAcquired(target.clone()));
        self.target = Some(target);
        true
    }

    fn on_beacon(&mut self, frame: &RawFrame, header: &FrameHeader, detections: &mut Vec<Detection>) {
        self.counters.beacons += 1;
        let beacon = parser::parse_beacon(&frame.data, header);
        let channel = beacon.channel.or(frame.channel);

        if !self.accept_bssid(header.bssid, beacon.ssid.as_deref(), channel, detections) {
            return;
        }

        if let (Some(target), Some(channel)) = (self.target.as_mut(), channel) {
            if (1..=13).contains(&channel) && target.channel != Some(channel) {
                if target.channel.is_some() {
                    info!("[TARGET] {} moved to channel {}", target.bssid, channel);
                }
                target.channel = Some(channel);
                detections.push(Detection::ChannelChanged { bssid: target.bssid, channel });
            }
        }
    }

    fn on_eapol(&mut self, frame: &RawFrame, header: &FrameHeader, detections: &mut Vec<Detection>) {
        self.counters.eapol += 1;

        let message = match handshake::key_information(&frame.data, header).and_then(handshake::message_number) {
            Some(message) => message,
            None => {
                trace!("EAPOL frame from {} is not a recognised key message", header.bssid);
                return;
            }
        };

        if !self.accept_bssid(header.bssid, None, frame.channel, detections) {
            trace!("Ignoring handshake message {} from non-target {}", message, header.bssid);
            return;
        }
        self.note_client(header, detections);

        match self.handshakes.record(header.bssid, message) {
            HandshakeOutcome::Duplicate => {
                trace!("Handshake message {} from {} already recorded", message, header.bssid);
            }
            HandshakeOutcome::Recorded { message, completed } => {
                info!("[HANDSHAKE] Msg{} captured from {}", message, header.bssid);
                if let Some(writer) = self.handshake_writer.as_mut() {
                    writer.write_frame(frame.timestamp, &frame.data);
                }
                detections.push(Detection::HandshakeMessage { bssid: header.bssid, message });

                if completed {
                    info!("[!] COMPLETE HANDSHAKE CAPTURED for {}", header.bssid);
                    if let Some(writer) = self.handshake_writer.as_mut() {
                        writer.flush();
                    }
                    detections.push(Detection::HandshakeComplete { bssid: header.bssid });
                }
            }
        }
    }

    fn on_association(&mut self, frame: &RawFrame, header: &FrameHeader, detections: &mut Vec<Detection>) {
        self.counters.association_requests += 1;

        let ssid = parser::extract_ssid(&frame.data, header);
        if !self.accept_bssid(header.bssid, ssid.as_deref(), frame.channel, detections) {
            return;
        }
        self.note_client(header, detections);

        let fallback = self.target.as_ref().map(|t| t.ssid.as_str());
        let record = match rsn::extract_pmkid(&frame.data, header, fallback) {
            Some(record) => record,
            None => return,
        };

        if !self.seen_pmkids.insert((record.pmkid, record.bssid)) {
            trace!("PMKID for {} already recorded", record.bssid);
            return;
        }

        info!("[PMKID] Captured for {}", record.ssid);
        info!("{}", record);
        if let Err(e) = self.persist_pmkid(&record) {
            warn!("Could not append PMKID to {}: {}", self.settings.pmkid_file.display(), e);
        }
        if let Some(writer) = self.handshake_writer.as_mut() {
            writer.write_frame(frame.timestamp, &frame.data);
            writer.flush();
        }
        self.pmkids.push(record.clone());
        detections.push(Detection::Pmkid(record));
    }

    fn persist_pmkid(&self, record: &PmkidRecord) -> std::io::Result<()> {
        let attempts = self.settings.writer.max_attempts.max(1);
        let mut last = None;
        for attempt in 1..=attempts {
            match storage::append_line(&self.storage, &self.settings.pmkid_file, &record.to_line()) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!("PMKID append attempt {}/{} failed: {}", attempt, attempts, e);
                    last = Some(e);
                    if attempt < attempts && self.settings.writer.backoff_ms > 0 {
                        std::thread::sleep(Duration::from_millis(self.settings.writer.backoff_ms));
                    }
                }
            }
        }
        Err(last.unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "no attempts made")))
    }

    fn note_client(&mut self, header: &FrameHeader, detections: &mut Vec<Detection>) {
        let station = match header.station() {
            Some(station) if !station.is_multicast() && station != header.bssid => station,
            _ => return,
        };
        if self.clients.contains(&station) || self.clients.len() >= self.settings.max_clients {
            return;
        }
        info!("[CLIENT] {} on {}", station, header.bssid);
        self.clients.insert(station);
        detections.push(Detection::ClientSeen { bssid: header.bssid, station });
    }

    pub fn flush(&mut self) {
        for writer in self.handshake_writer.iter_mut().chain(self.traffic_writer.iter_mut()) {
            writer.flush();
        }
    }

    /// Forgets the target and everything recorded for it so a new round can
    /// start. Its handshake writer is closed but kept, so the same BSSID
    /// appends to its file if learned again. The all-traffic capture keeps
    /// running.
    pub fn reset(&mut self) {
        if let Some(mut writer) = self.handshake_writer.take() {
            writer.close();
            if let Some(target) = &self.target {
                self.retired_writers.insert(target.bssid, writer);
            }
        }
        if let Some(writer) = self.traffic_writer.as_mut() {
            writer.flush();
        }
        self.target = None;
        self.handshakes.reset();
        self.seen_pmkids.clear();
        self.pmkids.clear();
        self.clients.clear();
        info!("Session reset, waiting for a new target");
    }

    pub fn close(&mut self) {
        for writer in self.handshake_writer.iter_mut().chain(self.traffic_writer.iter_mut()) {
            writer.close();
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            target: self.target.clone(),
            handshake_messages: self
                .target
                .as_ref()
                .map(|t| self.handshakes.messages_for(t.bssid))
                .unwrap_or_default(),
            handshake_complete: self.handshake_complete(),
            pmkids: self.pmkids.clone(),
            clients: self.clients.iter().copied().collect(),
            frames: self.counters.clone(),
            handshake_file: self.handshake_writer.as_ref().map(|w| w.stats().clone()),
            traffic_file: self.traffic_writer.as_ref().map(|w| w.stats().clone()),
        }
    }
}
