#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use handshake_sniffer::error::{Result, SnifferError};
use handshake_sniffer::interface::Radio;
use handshake_sniffer::mac::MacAddress;
use handshake_sniffer::parser::LLC_SNAP_EAPOL;
use handshake_sniffer::storage::Storage;

pub const AP: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
pub const CLIENT: MacAddress = MacAddress([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
pub const OTHER_AP: MacAddress = MacAddress([0x0A, 0x00, 0x00, 0x00, 0x00, 0x01]);

/// Files kept in memory; `fail` makes every open and write return an error.
/// `budget`, when set, is how many more bytes writes accept before failing.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    files: Rc<RefCell<HashMap<PathBuf, Vec<u8>>>>,
    pub fail: Rc<Cell<bool>>,
    pub budget: Rc<Cell<Option<usize>>>,
}

pub struct MemoryFile {
    path: PathBuf,
    files: Rc<RefCell<HashMap<PathBuf, Vec<u8>>>>,
    fail: Rc<Cell<bool>>,
    budget: Rc<Cell<Option<usize>>>,
}

impl Write for MemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail.get() {
            return Err(io::Error::new(io::ErrorKind::Other, "storage offline"));
        }
        let buf = match self.budget.get() {
            Some(0) => return Err(io::Error::new(io::ErrorKind::Other, "storage full")),
            Some(left) => {
                let n = left.min(buf.len());
                self.budget.set(Some(left - n));
                &buf[..n]
            }
            None => buf,
        };
        self.files
            .borrow_mut()
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl MemoryStorage {
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(Path::new(path)).cloned()
    }

    pub fn text(&self, path: &str) -> Option<String> {
        self.contents(path).map(|b| String::from_utf8(b).unwrap())
    }

    fn open(&self, path: &Path, truncate: bool) -> io::Result<MemoryFile> {
        if self.fail.get() {
            return Err(io::Error::new(io::ErrorKind::Other, "storage offline"));
        }
        let mut files = self.files.borrow_mut();
        let entry = files.entry(path.to_path_buf()).or_default();
        if truncate {
            entry.clear();
        }
        Ok(MemoryFile {
            path: path.to_path_buf(),
            files: Rc::clone(&self.files),
            fail: Rc::clone(&self.fail),
            budget: Rc::clone(&self.budget),
        })
    }
}

impl Storage for MemoryStorage {
    type File = MemoryFile;

    fn create(&self, path: &Path) -> io::Result<MemoryFile> {
        self.open(path, true)
    }

    fn append(&self, path: &Path) -> io::Result<MemoryFile> {
        self.open(path, false)
    }

    fn mkdir(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn truncate(&self, path: &Path, len: u64) -> io::Result<()> {
        if self.fail.get() {
            return Err(io::Error::new(io::ErrorKind::Other, "storage offline"));
        }
        if let Some(data) = self.files.borrow_mut().get_mut(path) {
            data.truncate(len as usize);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingRadio {
    pub channels: Vec<u8>,
    pub sent: Vec<Vec<u8>>,
    pub reject_channels: bool,
}

impl Radio for RecordingRadio {
    fn set_channel(&mut self, channel: u8) -> Result<()> {
        if self.reject_channels {
            return Err(SnifferError::Radio(format!("channel {} rejected", channel)));
        }
        self.channels.push(channel);
        Ok(())
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<()> {
        self.sent.push(frame.to_vec());
        Ok(())
    }
}

fn header(fc0: u8, fc1: u8, addr1: MacAddress, addr2: MacAddress, addr3: MacAddress) -> Vec<u8> {
    let mut frame = vec![fc0, fc1, 0x00, 0x00];
    frame.extend_from_slice(addr1.as_bytes());
    frame.extend_from_slice(addr2.as_bytes());
    frame.extend_from_slice(addr3.as_bytes());
    frame.extend_from_slice(&[0x00, 0x00]);
    frame
}

pub fn beacon(bssid: MacAddress, ssid: &str, channel: u8) -> Vec<u8> {
    let mut frame = header(0x80, 0x00, MacAddress::BROADCAST, bssid, bssid);
    frame.extend_from_slice(&[0u8; 8]); // timestamp
    frame.extend_from_slice(&[0x64, 0x00, 0x11, 0x04]); // interval, capabilities
    frame.push(0);
    frame.push(ssid.len() as u8);
    frame.extend_from_slice(ssid.as_bytes());
    frame.extend_from_slice(&[3, 1, channel]);
    frame
}

/// EAPOL-Key frame whose key-information field has only `bit` set. Odd
/// messages travel AP to station, even ones station to AP.
pub fn eapol(bssid: MacAddress, station: MacAddress, bit: u16) -> Vec<u8> {
    let from_ap = bit == 0x0001 || bit == 0x0004;
    let mut frame = if from_ap {
        header(0x08, 0x02, station, bssid, bssid)
    } else {
        header(0x08, 0x01, bssid, station, bssid)
    };
    frame.extend_from_slice(&LLC_SNAP_EAPOL);
    frame.extend_from_slice(&[0x02, 0x03, 0x00, 0x5F, 0x02]);
    frame.extend_from_slice(&bit.to_be_bytes());
    frame.extend_from_slice(&[0u8; 93]);
    frame
}

pub fn rsn_with_pmkid(pmkid: [u8; 16]) -> Vec<u8> {
    let mut rsn = vec![0x01, 0x00];
    rsn.extend_from_slice(&[0x00, 0x0F, 0xAC, 0x04]);
    rsn.extend_from_slice(&[0x01, 0x00, 0x00, 0x0F, 0xAC, 0x04]);
    rsn.extend_from_slice(&[0x01, 0x00, 0x00, 0x0F, 0xAC, 0x02]);
    rsn.extend_from_slice(&0x8000u16.to_le_bytes());
    rsn.extend_from_slice(&[0x01, 0x00]);
    rsn.extend_from_slice(&pmkid);
    rsn
}

pub fn association_request(bssid: MacAddress, station: MacAddress, ssid: Option<&str>, rsn: &[u8]) -> Vec<u8> {
    let mut frame = header(0x00, 0x00, bssid, station, bssid);
    frame.extend_from_slice(&[0x31, 0x04, 0x0A, 0x00]); // capabilities, listen interval
    if let Some(ssid) = ssid {
        frame.push(0);
        frame.push(ssid.len() as u8);
        frame.extend_from_slice(ssid.as_bytes());
    }
    frame.push(0x30);
    frame.push(rsn.len() as u8);
    frame.extend_from_slice(rsn);
    frame
}
