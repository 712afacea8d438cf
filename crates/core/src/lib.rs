//! Core vocabulary of the Flowline packet conveyor: packets, identities,
//! units, errors and the scheduler abstraction every element depends on.

pub mod error;
pub mod packet;
pub mod scheduler;
pub mod types;

pub use error::{FlowError, Result};
pub use packet::{FragmentTag, Packet, PacketInfo};
pub use scheduler::{Scheduler, TimerEvent, TimerHandle, TimerKind};
pub use types::{
    Bits, Capability, Datarate, ElementId, GateIndex, PacketId, SimTime, TransmissionId, TreeId,
};
