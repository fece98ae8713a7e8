//! Target device discovery.
//!
//! Every flash enumerates the host's serial ports afresh and picks the
//! first port whose USB vid/pid matches the known-device table. Table order
//! is priority order: the board's native USB id first, then common
//! USB-serial bridges.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A (vid, pid) pair this lane will flash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownDevice {
    /// Human-readable label shown in logs and `ports` output.
    pub name: String,
    /// USB vendor id
    pub vid: u16,
    /// USB product id
    pub pid: u16,
}

impl KnownDevice {
    pub fn new(name: impl Into<String>, vid: u16, pid: u16) -> Self {
        Self {
            name: name.into(),
            vid,
            pid,
        }
    }

    fn matches(&self, port: &PortInfo) -> bool {
        port.vid == Some(self.vid) && port.pid == Some(self.pid)
    }
}

/// Built-in table in priority order.
pub fn builtin_devices() -> Vec<KnownDevice> {
    vec![
        KnownDevice::new("ESP32-S3 native USB", 0x303a, 0x1001),
        KnownDevice::new("CP2102 USB-serial", 0x10c4, 0xea60),
        KnownDevice::new("CH340 USB-serial", 0x1a86, 0x7523),
    ]
}

/// One enumerated serial port. Non-USB ports have no ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub port: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub product: Option<String>,
}

impl PortInfo {
    pub fn usb(port: impl Into<String>, vid: u16, pid: u16) -> Self {
        Self {
            port: port.into(),
            vid: Some(vid),
            pid: Some(pid),
            product: None,
        }
    }

    pub fn other(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            vid: None,
            pid: None,
            product: None,
        }
    }
}

/// The device chosen for a flash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub port: String,
    pub vid: u16,
    pub pid: u16,
    /// Name of the table entry that matched.
    pub name: String,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:04x}:{:04x}, {})", self.port, self.vid, self.pid, self.name)
    }
}

/// A port plus the table entry it matches, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedPort {
    pub info: PortInfo,
    pub known: Option<KnownDevice>,
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to enumerate serial ports: {0}")]
    Enumeration(String),
}

/// Source of serial port listings.
pub trait PortEnumerator: Send + Sync {
    fn ports(&self) -> Result<Vec<PortInfo>, DeviceError>;
}

/// Enumerates the host's real serial ports.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn ports(&self) -> Result<Vec<PortInfo>, DeviceError> {
        let ports =
            serialport::available_ports().map_err(|e| DeviceError::Enumeration(e.to_string()))?;

        Ok(ports
            .into_iter()
            .map(|p| match p.port_type {
                serialport::SerialPortType::UsbPort(usb) => PortInfo {
                    port: p.port_name,
                    vid: Some(usb.vid),
                    pid: Some(usb.pid),
                    product: usb.product,
                },
                _ => PortInfo::other(p.port_name),
            })
            .collect())
    }
}

/// Matches enumerated ports against the known-device table.
pub struct DeviceLocator {
    table: Vec<KnownDevice>,
    ports: Box<dyn PortEnumerator>,
}

impl DeviceLocator {
    /// Locator over the built-in table followed by `extra` entries.
    pub fn new(extra: &[KnownDevice], ports: Box<dyn PortEnumerator>) -> Self {
        let mut table = builtin_devices();
        table.extend(extra.iter().cloned());
        Self { table, ports }
    }

    /// Locator over the host's serial ports.
    pub fn system(extra: &[KnownDevice]) -> Self {
        Self::new(extra, Box::new(SystemPorts))
    }

    pub fn table(&self) -> &[KnownDevice] {
        &self.table
    }

    /// Find the target device.
    ///
    /// `Ok(None)` means nothing matched; that is the normal unplugged case.
    pub fn locate(&self) -> Result<Option<Device>, DeviceError> {
        let ports = self.ports.ports()?;
        log::debug!("enumerated {} serial ports", ports.len());

        for known in &self.table {
            if let Some(port) = ports.iter().find(|p| known.matches(p)) {
                let device = Device {
                    port: port.port.clone(),
                    vid: known.vid,
                    pid: known.pid,
                    name: known.name.clone(),
                };
                log::info!("found device {}", device);
                return Ok(Some(device));
            }
        }
        Ok(None)
    }

    /// All ports, each annotated with its table entry.
    pub fn list(&self) -> Result<Vec<ListedPort>, DeviceError> {
        let ports = self.ports.ports()?;
        Ok(ports
            .into_iter()
            .map(|info| {
                let known = self.table.iter().find(|k| k.matches(&info)).cloned();
                ListedPort { info, known }
            })
            .collect())
    }
}

/// Fixed port listing for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticPorts(pub Vec<PortInfo>);

impl PortEnumerator for StaticPorts {
    fn ports(&self) -> Result<Vec<PortInfo>, DeviceError> {
        Ok(self.0.clone())
    }
}
