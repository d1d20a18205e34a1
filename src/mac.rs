use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SnifferError;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xFF; 6]);

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let octets: [u8; 6] = bytes.try_into().ok()?;
        Some(MacAddress(octets))
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xFF; 6]
    }

    /// Group bit of the first octet; covers broadcast too.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Lowercase hex without separators, as used in hash lines.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Uppercase hex without separators, as used in capture file names.
    pub fn to_file_stem(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddress({})", self)
    }
}

impl FromStr for MacAddress {
    type Err = SnifferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(|c: char| c == ':' || c == '-').collect();
        if parts.len() != 6 {
            return Err(SnifferError::Config(format!("invalid MAC address '{}'", s)));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| SnifferError::Config(format!("invalid MAC octet '{}' in '{}'", part, s)))?;
        }
        Ok(MacAddress(bytes))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let mac: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(mac.to_string(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(mac.to_hex(), "aabbccddeeff");
        assert_eq!(mac.to_file_stem(), "AABBCCDDEEFF");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("aa:bb:cc".parse::<MacAddress>().is_err());
        assert!("aa:bb:cc:dd:ee:zz".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_from_slice_length() {
        assert!(MacAddress::from_slice(&[1, 2, 3, 4, 5]).is_none());
        assert_eq!(
            MacAddress::from_slice(&[1, 2, 3, 4, 5, 6]),
            Some(MacAddress([1, 2, 3, 4, 5, 6]))
        );
    }

    #[test]
    fn test_serde_as_string() {
        let mac = MacAddress([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"00:11:22:33:44:55\"");
        let back: MacAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
        assert!(MacAddress::BROADCAST.is_broadcast());
        assert!(MacAddress::BROADCAST.is_multicast());
    }
}
