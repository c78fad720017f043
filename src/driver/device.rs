//! Platform and device enumeration for the reference runtime.
//!
//! The runtime exposes one platform carrying two devices: the reference
//! accelerator and a CPU device. They execute identically; the split exists
//! so class filtering and ordinal selection behave like a real enumeration.

use crate::driver::DriverCode;
use crate::driver::event::EventTable;
use std::sync::Arc;

/// Device class filter used at context construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Accelerator,
    Cpu,
    /// Matches any device class.
    All,
}

impl DeviceClass {
    const fn matches(self, other: Self) -> bool {
        matches!(self, Self::All) || (self as u32) == (other as u32)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceInfo {
    pub name: &'static str,
    pub class: DeviceClass,
}

#[derive(Debug, Clone)]
pub struct Platform {
    pub name: &'static str,
    pub devices: &'static [DeviceInfo],
}

const REF_DEVICES: &[DeviceInfo] = &[
    DeviceInfo {
        name: "qcl-ref-accel-0",
        class: DeviceClass::Accelerator,
    },
    DeviceInfo {
        name: "qcl-ref-cpu-0",
        class: DeviceClass::Cpu,
    },
];

/// Enumerates available platforms.
#[must_use]
pub fn platforms() -> Vec<Platform> {
    vec![Platform {
        name: "qcl-ref",
        devices: REF_DEVICES,
    }]
}

/// An opened device: identity plus the tables every component built on it
/// shares.
#[derive(Debug)]
pub struct Device {
    platform: &'static str,
    info: DeviceInfo,
    events: EventTable,
}

impl Device {
    /// Selects the first platform, filters its devices by `class` and opens
    /// the one at `ordinal` within the filtered list.
    pub fn open(class: DeviceClass, ordinal: usize) -> Result<Arc<Self>, DriverCode> {
        let platforms = platforms();
        let platform = platforms.first().ok_or(DriverCode::InvalidPlatform)?;
        let info = platform
            .devices
            .iter()
            .filter(|d| class.matches(d.class))
            .nth(ordinal)
            .copied()
            .ok_or(DriverCode::DeviceNotFound)?;
        log::debug!("opened device `{}` on platform `{}`", info.name, platform.name);
        Ok(Arc::new(Self {
            platform: platform.name,
            info,
            events: EventTable::new(),
        }))
    }

    #[must_use]
    pub fn platform(&self) -> &'static str {
        self.platform
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.info.name
    }

    #[must_use]
    pub fn class(&self) -> DeviceClass {
        self.info.class
    }

    #[must_use]
    pub fn events(&self) -> &EventTable {
        &self.events
    }
}
