use std::process::Command;

use log::debug;
use pcap::Device;

use crate::error::{Result, SnifferError};

/// The radio the scheduler steers: tune to a channel, put a raw frame on the air.
pub trait Radio {
    fn set_channel(&mut self, channel: u8) -> Result<()>;

    fn transmit(&mut self, frame: &[u8]) -> Result<()>;
}

pub struct WifiInterface {
    interface_name: String,
}

impl WifiInterface {
    pub fn new(interface_name: &str) -> Self {
        WifiInterface {
            interface_name: interface_name.to_string(),
        }
    }

    pub fn get_interface_name(&self) -> &str {
        &self.interface_name
    }

    pub fn set_monitor_mode(&self) -> Result<()> {
        self.set_type("monitor")?;

        if !self.is_monitor_mode()? {
            return Err(SnifferError::Radio(format!(
                "Failed to set {} to monitor mode",
                self.interface_name
            )));
        }
        Ok(())
    }

    pub fn set_managed_mode(&self) -> Result<()> {
        self.set_type("managed")
    }

    pub fn is_monitor_mode(&self) -> Result<bool> {
        let output = Command::new("iw")
            .arg(&self.interface_name)
            .arg("info")
            .output()
            .map_err(|e| SnifferError::Radio(format!("Failed to execute iw command: {}", e)))?;

        let output_str = String::from_utf8_lossy(&output.stdout);
        Ok(output_str.contains("type monitor"))
    }

    pub fn set_channel(&self, channel: u8) -> Result<()> {
        let channel = channel.to_string();
        self.execute_command_with_check(
            "iw",
            &[&self.interface_name, "set", "channel", &channel],
            "Failed to set channel",
        )
    }

    fn set_type(&self, mode: &str) -> Result<()> {
        self.execute_command_with_check(
            "ip",
            &["link", "set", &self.interface_name, "down"],
            "Failed to bring interface down",
        )?;
        self.execute_command_with_check(
            "iw",
            &[&self.interface_name, "set", "type", mode],
            "Failed to change interface type",
        )?;
        self.execute_command_with_check(
            "ip",
            &["link", "set", &self.interface_name, "up"],
            "Failed to bring interface up",
        )
    }

    fn execute_command_with_check(&self, cmd: &str, args: &[&str], error_msg: &str) -> Result<()> {
        debug!("{} {}", cmd, args.join(" "));
        let output = Command::new(cmd)
            .args(args)
            .output()
            .map_err(|e| SnifferError::Radio(format!("{}: {}", error_msg, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SnifferError::Radio(format!("{}: {}", error_msg, stderr.trim())));
        }
        Ok(())
    }
}

/// Picks a wireless capture device, preferring an external adapter over `wlan0`.
pub fn find_wifi_interface() -> Option<String> {
    let devices = Device::list().ok()?;

    if let Some(device) = devices
        .iter()
        .find(|d| d.name.starts_with("wlan") && d.name != "wlan0")
    {
        return Some(device.name.clone());
    }

    devices
        .into_iter()
        .map(|d| d.name)
        .find(|name| name.starts_with("wlan") || name.contains("wl"))
}
