//! Flow-controlled packet elements for Flowline.
//!
//! Elements are wired into a [`Network`], which resolves every gate binding
//! once at initialization and then dispatches push, pull and notification
//! calls between them. Time only advances through the network's event loop.

pub mod capability;
pub mod config;
pub mod destreamer;
pub mod element;
pub mod flow;
pub mod network;
pub mod priority;
pub mod queue;
pub mod scheduler;
pub mod server;
pub mod sink;
pub mod source;
pub mod streamer;

#[cfg(test)]
pub(crate) mod testing;

pub use capability::{Collector, Consumer, Producer, Provider};
pub use config::{ProductionInterval, QueueConfig, ServerConfig, SinkConfig, SourceConfig, StreamerConfig};
pub use destreamer::PacketDestreamer;
pub use element::{Capabilities, EdgeBinding, Edges, Element, Neighbor, ProcessingStats};
pub use flow::{Identity, PacketFlow, PacketProcessor, StreamingState};
pub use network::{FlowSignal, Network, SignalRecord};
pub use priority::PriorityScheduler;
pub use queue::PacketQueue;
pub use scheduler::EventQueue;
pub use server::{PreemptingServer, ServerState};
pub use sink::{ConsumedPacket, PassivePacketSink};
pub use source::ActivePacketSource;
pub use streamer::PreemptableStreamer;

pub use flowline_core::{
    Bits, Capability, Datarate, ElementId, FlowError, FragmentTag, GateIndex, Packet, PacketId,
    PacketInfo, Result, Scheduler, SimTime, TimerHandle, TimerKind, TransmissionId, TreeId,
};
