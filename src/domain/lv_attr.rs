//! Logical volume attribute bits
//!
//! `lvs -o lv_attr` reports a fixed-width string where each position encodes
//! one property of the logical volume, e.g. `twi-a-tz--` for an active thin
//! pool. Only the positions the engine acts on get their own enum.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Volume type (position 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeType {
    Cached,
    Mirrored,
    Origin,
    Raid,
    Snapshot,
    ThinVolume,
    ThinPool,
    ThinPoolData,
    PoolMetadata,
    Virtual,
    Default,
    Other(char),
}

impl From<char> for VolumeType {
    fn from(c: char) -> Self {
        match c {
            'C' => VolumeType::Cached,
            'm' | 'M' => VolumeType::Mirrored,
            'o' | 'O' => VolumeType::Origin,
            'r' | 'R' => VolumeType::Raid,
            's' | 'S' => VolumeType::Snapshot,
            'V' => VolumeType::ThinVolume,
            't' => VolumeType::ThinPool,
            'T' => VolumeType::ThinPoolData,
            'e' => VolumeType::PoolMetadata,
            'v' => VolumeType::Virtual,
            '-' => VolumeType::Default,
            other => VolumeType::Other(other),
        }
    }
}

/// Permissions (position 2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permissions {
    Writeable,
    ReadOnly,
    ReadOnlyActivation,
    Other(char),
}

impl From<char> for Permissions {
    fn from(c: char) -> Self {
        match c {
            'w' => Permissions::Writeable,
            'r' => Permissions::ReadOnly,
            'R' => Permissions::ReadOnlyActivation,
            other => Permissions::Other(other),
        }
    }
}

/// Activation state (position 5)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Active,
    Historical,
    Suspended,
    InvalidSnapshot,
    SuspendedInvalidSnapshot,
    MappedDeviceWithoutTables,
    MappedDeviceInactiveTable,
    ThinPoolCheckNeeded,
    SuspendedThinPoolCheckNeeded,
    Unknown,
    Inactive,
    Other(char),
}

impl From<char> for State {
    fn from(c: char) -> Self {
        match c {
            'a' => State::Active,
            'h' => State::Historical,
            's' => State::Suspended,
            'I' => State::InvalidSnapshot,
            'S' => State::SuspendedInvalidSnapshot,
            'd' => State::MappedDeviceWithoutTables,
            'i' => State::MappedDeviceInactiveTable,
            'c' => State::ThinPoolCheckNeeded,
            'C' => State::SuspendedThinPoolCheckNeeded,
            'X' => State::Unknown,
            '-' => State::Inactive,
            other => State::Other(other),
        }
    }
}

/// Parsed `lv_attr` string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LvAttr {
    pub volume_type: VolumeType,
    pub permissions: Permissions,
    /// Allocation policy letter, upper case when locked
    pub allocation_policy: char,
    pub fixed_minor: bool,
    pub state: State,
    pub open: bool,
    /// Target type letter (`t` for thin, `r` for raid, ...)
    pub target_type: char,
    pub zeroing: bool,
    /// Health letter, `-` when healthy
    pub health: char,
    pub skip_activation: bool,
    raw: String,
}

impl LvAttr {
    pub fn is_thin_pool(&self) -> bool {
        self.volume_type == VolumeType::ThinPool
    }

    pub fn is_active(&self) -> bool {
        self.state == State::Active
    }
}

impl FromStr for LvAttr {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let bits: Vec<char> = raw.chars().collect();
        if bits.len() < 10 {
            return Err(Error::LvAttrParse(raw.to_string()));
        }

        Ok(Self {
            volume_type: VolumeType::from(bits[0]),
            permissions: Permissions::from(bits[1]),
            allocation_policy: bits[2],
            fixed_minor: bits[3] == 'm',
            state: State::from(bits[4]),
            open: bits[5] == 'o',
            target_type: bits[6],
            zeroing: bits[7] == 'z',
            health: bits[8],
            skip_activation: bits[9] == 'k',
            raw: raw.to_string(),
        })
    }
}

impl fmt::Display for LvAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}
