//! Controller status and fault bit fields

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Fault flags reported by `?FF`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FaultFlags: u32 {
        /// Power stage overheat
        const OVERHEAT = 1 << 0;
        /// Supply above the overvoltage limit
        const OVERVOLTAGE = 1 << 1;
        /// Supply below the undervoltage limit
        const UNDERVOLTAGE = 1 << 2;
        /// Output short circuit
        const SHORT_CIRCUIT = 1 << 3;
        /// Emergency stop active
        const EMERGENCY_STOP = 1 << 4;
        /// Separate excitation field fault
        const SEPEX_EXCITATION = 1 << 5;
        /// Power MOSFET failure
        const MOSFET_FAILURE = 1 << 6;
        /// Configuration fault at startup
        const STARTUP_CONFIG = 1 << 7;
    }
}

bitflags! {
    /// Controller status flags reported by `?FS`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct StatusFlags: u32 {
        /// Commands come from the serial port
        const SERIAL_MODE = 1 << 0;
        /// Commands come from pulse inputs
        const PULSE_MODE = 1 << 1;
        /// Commands come from analog inputs
        const ANALOG_MODE = 1 << 2;
        /// Power stage disabled
        const POWER_STAGE_OFF = 1 << 3;
        /// Motor stall detected
        const STALL_DETECTED = 1 << 4;
        /// An output limit is active
        const AT_LIMIT = 1 << 5;
        // bit 6 is unused by the firmware
        /// MicroBasic script running
        const SCRIPT_RUNNING = 1 << 7;
    }
}

impl FaultFlags {
    /// Keep every reported bit, documented or not
    pub fn from_raw(raw: u32) -> Self {
        Self::from_bits_retain(raw)
    }

    /// Names of the documented flags that are set
    pub fn names(&self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }
}

impl StatusFlags {
    /// Keep every reported bit, documented or not
    pub fn from_raw(raw: u32) -> Self {
        Self::from_bits_retain(raw)
    }

    /// Names of the documented flags that are set
    pub fn names(&self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }
}
