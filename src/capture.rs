//! Live capture and injection on a monitor-mode interface.
//!
//! Receiving runs on its own thread and hands frames to the session loop
//! through a bounded queue; the queue is the only thing the two share.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use pcap::{Active, Capture, Linktype};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::Result;
use crate::interface::{Radio, WifiInterface};
use crate::parser::strip_radiotap;
use crate::session::RawFrame;

const SNAPLEN: i32 = 65535;
const READ_TIMEOUT_MS: i32 = 100;

/// Header prepended to injected frames: version 0, length 8, nothing present.
pub const TX_RADIOTAP: [u8; 8] = [0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00];

fn open_live(interface: &str) -> Result<Capture<Active>> {
    let cap = Capture::from_device(interface)?
        .promisc(true)
        .snaplen(SNAPLEN)
        .timeout(READ_TIMEOUT_MS)
        .immediate_mode(true)
        .open()?;
    Ok(cap)
}

/// Turns one captured packet into a bare 802.11 frame. Radiotap links get
/// their header removed and its channel and signal kept.
pub fn to_raw_frame(linktype: Linktype, data: &[u8], timestamp: Duration) -> Option<RawFrame> {
    if linktype == Linktype::IEEE802_11_RADIOTAP {
        let (info, frame) = strip_radiotap(data)?;
        Some(RawFrame {
            data: frame.to_vec(),
            timestamp,
            channel: info.channel,
            rssi: info.rssi,
        })
    } else {
        Some(RawFrame::new(data, timestamp))
    }
}

fn packet_time(ts: &libc::timeval) -> Duration {
    let secs = u64::try_from(ts.tv_sec).unwrap_or(0);
    let micros = u32::try_from(ts.tv_usec).unwrap_or(0).min(999_999);
    Duration::new(secs, micros * 1_000)
}

pub struct FrameReceiver {
    handle: JoinHandle<()>,
    dropped: Arc<AtomicU64>,
}

impl FrameReceiver {
    /// Opens `interface` and starts pushing frames into a queue of `depth`
    /// entries. The thread ends when `running` clears, the queue closes, or
    /// the capture fails.
    pub fn spawn(
        interface: &str,
        depth: usize,
        running: Arc<AtomicBool>,
    ) -> Result<(Self, mpsc::Receiver<RawFrame>)> {
        let mut cap = open_live(interface)?;
        let linktype = cap.get_datalink();
        info!("Capturing on {} ({:?})", interface, linktype);

        let (tx, rx) = mpsc::channel(depth);
        let dropped = Arc::new(AtomicU64::new(0));
        let dropped_in_thread = Arc::clone(&dropped);

        let handle = thread::Builder::new()
            .name("capture".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    let packet = match cap.next_packet() {
                        Ok(packet) => packet,
                        Err(pcap::Error::TimeoutExpired) => continue,
                        Err(e) => {
                            error!("Capture stopped: {}", e);
                            break;
                        }
                    };

                    let frame = match to_raw_frame(linktype, packet.data, packet_time(&packet.header.ts)) {
                        Some(frame) => frame,
                        None => {
                            trace!("Dropped packet with bad radiotap header");
                            continue;
                        }
                    };

                    match tx.try_send(frame) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            let n = dropped_in_thread.fetch_add(1, Ordering::Relaxed) + 1;
                            if n.is_power_of_two() {
                                warn!("Frame queue full, {} frames dropped so far", n);
                            }
                        }
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
                debug!("Capture thread exiting");
            })?;

        Ok((FrameReceiver { handle, dropped }, rx))
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn join(self) {
        if self.handle.join().is_err() {
            error!("Capture thread panicked");
        }
    }
}

/// Radio backed by `iw` for tuning and a second pcap handle for injection.
pub struct MonitorRadio {
    interface: WifiInterface,
    injector: Capture<Active>,
    buffer: Vec<u8>,
}

impl MonitorRadio {
    pub fn open(interface: &str) -> Result<Self> {
        Ok(MonitorRadio {
            interface: WifiInterface::new(interface),
            injector: open_live(interface)?,
            buffer: Vec::with_capacity(TX_RADIOTAP.len() + 64),
        })
    }
}

impl Radio for MonitorRadio {
    fn set_channel(&mut self, channel: u8) -> Result<()> {
        self.interface.set_channel(channel)
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<()> {
        self.buffer.clear();
        self.buffer.extend_from_slice(&TX_RADIOTAP);
        self.buffer.extend_from_slice(frame);
        self.injector.sendpacket(&self.buffer[..])?;
        Ok(())
    }
}
