//! Identifiers and physical units shared by every element.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Index of a gate on one side (input or output) of an element.
pub type GateIndex = usize;

/// Handle of an element inside a network arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementId(pub usize);

impl ElementId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

macro_rules! packet_identity {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

packet_identity!(PacketId, "Unique identity of one packet object.");
packet_identity!(TreeId, "Identity shared by a packet and all of its duplicates.");
packet_identity!(TransmissionId, "Identity of one transfer, stable across its fragments.");

/// The four directions a neighbor can be bound at an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Active source: pushes packets, receives push back-pressure.
    Producer,
    /// Passive sink: accepts pushed packets.
    Consumer,
    /// Passive source: hands out packets when pulled.
    Provider,
    /// Active sink: pulls packets, receives pull availability changes.
    Collector,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Producer => "producer",
            Capability::Consumer => "consumer",
            Capability::Provider => "provider",
            Capability::Collector => "collector",
        };
        f.write_str(name)
    }
}

/// A length measured in bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bits(pub u64);

impl Bits {
    pub const ZERO: Bits = Bits(0);

    pub fn from_bytes(bytes: u64) -> Self {
        Bits(bytes * 8)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    /// Number of complete bytes covered by this length.
    pub fn whole_bytes(self) -> usize {
        (self.0 / 8) as usize
    }

    pub fn is_byte_aligned(self) -> bool {
        self.0 % 8 == 0
    }
}

impl Add for Bits {
    type Output = Bits;

    fn add(self, rhs: Bits) -> Bits {
        Bits(self.0 + rhs.0)
    }
}

impl AddAssign for Bits {
    fn add_assign(&mut self, rhs: Bits) {
        self.0 += rhs.0;
    }
}

impl Sub for Bits {
    type Output = Bits;

    fn sub(self, rhs: Bits) -> Bits {
        Bits(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Bits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}b", self.0)
    }
}

/// Data rate in bits per second.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Datarate(f64);

impl Datarate {
    /// Serializes any length in zero time.
    pub const UNLIMITED: Datarate = Datarate(f64::INFINITY);

    pub fn bps(bps: f64) -> Self {
        Datarate(bps)
    }

    pub fn kbps(kbps: f64) -> Self {
        Datarate(kbps * 1_000.0)
    }

    pub fn mbps(mbps: f64) -> Self {
        Datarate(mbps * 1_000_000.0)
    }

    pub fn bytes_per_sec(bytes: f64) -> Self {
        Datarate(bytes * 8.0)
    }

    pub fn as_bps(self) -> f64 {
        self.0
    }

    /// A usable rate is strictly positive; [`Datarate::UNLIMITED`] is usable.
    pub fn is_valid(self) -> bool {
        self.0 > 0.0
    }

    pub fn is_unlimited(self) -> bool {
        self.0 == f64::INFINITY
    }

    /// Time needed to serialize `length` at this rate. Fails when the time
    /// does not fit a `Duration`.
    pub fn transmission_time(self, length: Bits) -> Result<Duration> {
        Duration::try_from_secs_f64(length.0 as f64 / self.0)
            .map_err(|_| FlowError::TransmissionTooLong { length, datarate: self })
    }

    /// Length serialized at this rate during `elapsed`, rounded down.
    pub fn transmitted_length(self, elapsed: Duration) -> Bits {
        Bits((self.0 * elapsed.as_secs_f64()).floor() as u64)
    }
}

impl fmt::Display for Datarate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bps", self.0)
    }
}

/// Simulation time, measured from the start of the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimTime(Duration);

impl SimTime {
    pub const ZERO: SimTime = SimTime(Duration::ZERO);

    pub fn from_secs(secs: u64) -> Self {
        SimTime(Duration::from_secs(secs))
    }

    pub fn from_millis(millis: u64) -> Self {
        SimTime(Duration::from_millis(millis))
    }

    pub fn from_duration(elapsed: Duration) -> Self {
        SimTime(elapsed)
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0.as_secs_f64()
    }
}

impl Add<Duration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Duration) -> SimTime {
        SimTime(self.0.saturating_add(rhs))
    }
}

impl Sub for SimTime {
    type Output = Duration;

    fn sub(self, rhs: SimTime) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.0.as_secs_f64())
    }
}
