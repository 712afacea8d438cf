//! The four capability interfaces.
//!
//! Push direction: a [`Producer`] hands packets to a [`Consumer`]; the
//! consumer reports back-pressure changes and processing results to the
//! producer. Pull direction: a [`Collector`] takes packets from a
//! [`Provider`]; the provider reports availability changes and processing
//! results to the collector.
//!
//! Every method receives the gate of the callee it was invoked on. Streaming
//! variants default to an invalid-operation error so that atomic-only elements
//! only implement what they support.

use flowline_core::{Bits, Datarate, GateIndex, Packet, PacketInfo, Result};

use crate::element::{invalid_operation, Element};
use crate::network::Network;

pub trait Producer: Element {
    fn handle_can_push_packet_changed(&mut self, net: &mut Network, gate: GateIndex) -> Result<()>;

    fn handle_push_packet_processed(
        &mut self,
        net: &mut Network,
        gate: GateIndex,
        packet: PacketInfo,
        successful: bool,
    ) -> Result<()>;
}

pub trait Consumer: Element {
    fn can_push_some_packet(&mut self, net: &mut Network, gate: GateIndex) -> Result<bool>;

    fn can_push_packet(&mut self, net: &mut Network, gate: GateIndex, _packet: &Packet) -> Result<bool> {
        self.can_push_some_packet(net, gate)
    }

    fn push_packet(&mut self, net: &mut Network, gate: GateIndex, packet: Packet) -> Result<()>;

    fn push_packet_start(
        &mut self,
        _net: &mut Network,
        _gate: GateIndex,
        _packet: Packet,
        _datarate: Datarate,
    ) -> Result<()> {
        Err(invalid_operation(self.name(), "push_packet_start"))
    }

    fn push_packet_progress(
        &mut self,
        _net: &mut Network,
        _gate: GateIndex,
        _packet: Packet,
        _datarate: Datarate,
        _position: Bits,
        _extra_length: Bits,
    ) -> Result<()> {
        Err(invalid_operation(self.name(), "push_packet_progress"))
    }

    fn push_packet_end(&mut self, _net: &mut Network, _gate: GateIndex, _packet: Packet) -> Result<()> {
        Err(invalid_operation(self.name(), "push_packet_end"))
    }
}

pub trait Provider: Element {
    fn can_pull_some_packet(&mut self, net: &mut Network, gate: GateIndex) -> Result<bool>;

    fn pull_packet(&mut self, net: &mut Network, gate: GateIndex) -> Result<Packet>;

    fn pull_packet_start(&mut self, _net: &mut Network, _gate: GateIndex, _datarate: Datarate) -> Result<Packet> {
        Err(invalid_operation(self.name(), "pull_packet_start"))
    }

    fn pull_packet_progress(
        &mut self,
        _net: &mut Network,
        _gate: GateIndex,
        _datarate: Datarate,
        _position: Bits,
        _extra_length: Bits,
    ) -> Result<Packet> {
        Err(invalid_operation(self.name(), "pull_packet_progress"))
    }

    fn pull_packet_end(&mut self, _net: &mut Network, _gate: GateIndex) -> Result<Packet> {
        Err(invalid_operation(self.name(), "pull_packet_end"))
    }
}

pub trait Collector: Element {
    fn handle_can_pull_packet_changed(&mut self, net: &mut Network, gate: GateIndex) -> Result<()>;

    fn handle_pull_packet_processed(
        &mut self,
        net: &mut Network,
        gate: GateIndex,
        packet: PacketInfo,
        successful: bool,
    ) -> Result<()>;
}
