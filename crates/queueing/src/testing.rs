//! Recording neighbors for unit tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use flowline_core::{Bits, Datarate, ElementId, GateIndex, Packet, PacketInfo, Result};

use crate::capability::{Collector, Consumer, Producer, Provider};
use crate::element::{Edges, Element};
use crate::network::Network;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Push(String, PacketInfo),
    PushStart(String, PacketInfo),
    PushProgress(String, PacketInfo, Bits, Bits),
    PushEnd(String, PacketInfo),
    CanPushChanged(String),
    PushProcessed(String, PacketInfo, bool),
    Pull(String, PacketInfo),
    PullStart(String, PacketInfo),
    PullProgress(String, PacketInfo),
    PullEnd(String, PacketInfo),
    CanPullChanged(String),
    PullProcessed(String, PacketInfo, bool),
}

#[derive(Debug, Clone, Default)]
pub struct CallLog(Rc<RefCell<Vec<Call>>>);

impl CallLog {
    pub fn record(&self, call: Call) {
        self.0.borrow_mut().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
}

/// Consumer that accepts everything while `accepting` is set.
pub struct RecordingConsumer {
    name: String,
    log: CallLog,
    pub accepting: Rc<Cell<bool>>,
    pub received: Vec<Packet>,
}

impl RecordingConsumer {
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            accepting: Rc::new(Cell::new(true)),
            received: Vec::new(),
        }
    }
}

impl Element for RecordingConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, _id: ElementId, _edges: &Edges) {}

    fn as_consumer(&mut self) -> Option<&mut dyn Consumer> {
        Some(self)
    }
}

impl Consumer for RecordingConsumer {
    fn can_push_some_packet(&mut self, _net: &mut Network, _gate: GateIndex) -> Result<bool> {
        Ok(self.accepting.get())
    }

    fn push_packet(&mut self, _net: &mut Network, _gate: GateIndex, packet: Packet) -> Result<()> {
        self.log.record(Call::Push(self.name.clone(), packet.info()));
        self.received.push(packet);
        Ok(())
    }

    fn push_packet_start(
        &mut self,
        _net: &mut Network,
        _gate: GateIndex,
        packet: Packet,
        _datarate: Datarate,
    ) -> Result<()> {
        self.log.record(Call::PushStart(self.name.clone(), packet.info()));
        Ok(())
    }

    fn push_packet_progress(
        &mut self,
        _net: &mut Network,
        _gate: GateIndex,
        packet: Packet,
        _datarate: Datarate,
        position: Bits,
        extra_length: Bits,
    ) -> Result<()> {
        self.log
            .record(Call::PushProgress(self.name.clone(), packet.info(), position, extra_length));
        Ok(())
    }

    fn push_packet_end(&mut self, _net: &mut Network, _gate: GateIndex, packet: Packet) -> Result<()> {
        self.log.record(Call::PushEnd(self.name.clone(), packet.info()));
        self.received.push(packet);
        Ok(())
    }
}

pub struct RecordingProducer {
    name: String,
    log: CallLog,
}

impl RecordingProducer {
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
        }
    }
}

impl Element for RecordingProducer {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, _id: ElementId, _edges: &Edges) {}

    fn as_producer(&mut self) -> Option<&mut dyn Producer> {
        Some(self)
    }
}

impl Producer for RecordingProducer {
    fn handle_can_push_packet_changed(&mut self, _net: &mut Network, _gate: GateIndex) -> Result<()> {
        self.log.record(Call::CanPushChanged(self.name.clone()));
        Ok(())
    }

    fn handle_push_packet_processed(
        &mut self,
        _net: &mut Network,
        _gate: GateIndex,
        packet: PacketInfo,
        successful: bool,
    ) -> Result<()> {
        self.log
            .record(Call::PushProcessed(self.name.clone(), packet, successful));
        Ok(())
    }
}

/// Provider handing out a fixed list of packets, atomically or streamed.
pub struct ScriptedProvider {
    name: String,
    log: CallLog,
    packets: VecDeque<Packet>,
    streaming: Option<Packet>,
    end_packet: Option<Packet>,
}

impl ScriptedProvider {
    pub fn new(name: &str, log: &CallLog, packets: Vec<Packet>) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            packets: packets.into(),
            streaming: None,
            end_packet: None,
        }
    }

    /// Hands out `packet` instead of the streamed one on the next pull end.
    pub fn with_end_packet(mut self, packet: Packet) -> Self {
        self.end_packet = Some(packet);
        self
    }

    pub fn remaining(&self) -> usize {
        self.packets.len()
    }

    fn next(&mut self) -> Result<Packet> {
        self.packets.pop_front().ok_or_else(|| flowline_core::FlowError::Empty {
            element: self.name.clone(),
        })
    }

    fn streamed(&self) -> Result<Packet> {
        self.streaming
            .as_ref()
            .map(Packet::dup)
            .ok_or_else(|| flowline_core::FlowError::NotStreaming {
                element: self.name.clone(),
            })
    }
}

impl Element for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, _id: ElementId, _edges: &Edges) {}

    fn as_provider(&mut self) -> Option<&mut dyn Provider> {
        Some(self)
    }
}

impl Provider for ScriptedProvider {
    fn can_pull_some_packet(&mut self, _net: &mut Network, _gate: GateIndex) -> Result<bool> {
        Ok(self.streaming.is_none() && !self.packets.is_empty())
    }

    fn pull_packet(&mut self, _net: &mut Network, _gate: GateIndex) -> Result<Packet> {
        let packet = self.next()?;
        self.log.record(Call::Pull(self.name.clone(), packet.info()));
        Ok(packet)
    }

    fn pull_packet_start(&mut self, _net: &mut Network, _gate: GateIndex, _datarate: Datarate) -> Result<Packet> {
        let packet = self.next()?;
        self.log.record(Call::PullStart(self.name.clone(), packet.info()));
        let copy = packet.dup();
        self.streaming = Some(packet);
        Ok(copy)
    }

    fn pull_packet_progress(
        &mut self,
        _net: &mut Network,
        _gate: GateIndex,
        _datarate: Datarate,
        _position: Bits,
        _extra_length: Bits,
    ) -> Result<Packet> {
        let packet = self.streamed()?;
        self.log.record(Call::PullProgress(self.name.clone(), packet.info()));
        Ok(packet)
    }

    fn pull_packet_end(&mut self, _net: &mut Network, _gate: GateIndex) -> Result<Packet> {
        let packet = self.streaming.take().ok_or_else(|| flowline_core::FlowError::NotStreaming {
            element: self.name.clone(),
        })?;
        let packet = self.end_packet.take().unwrap_or(packet);
        self.log.record(Call::PullEnd(self.name.clone(), packet.info()));
        Ok(packet)
    }
}

pub struct RecordingCollector {
    name: String,
    log: CallLog,
}

impl RecordingCollector {
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
        }
    }
}

impl Element for RecordingCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, _id: ElementId, _edges: &Edges) {}

    fn as_collector(&mut self) -> Option<&mut dyn Collector> {
        Some(self)
    }
}

impl Collector for RecordingCollector {
    fn handle_can_pull_packet_changed(&mut self, _net: &mut Network, _gate: GateIndex) -> Result<()> {
        self.log.record(Call::CanPullChanged(self.name.clone()));
        Ok(())
    }

    fn handle_pull_packet_processed(
        &mut self,
        _net: &mut Network,
        _gate: GateIndex,
        packet: PacketInfo,
        successful: bool,
    ) -> Result<()> {
        self.log
            .record(Call::PullProcessed(self.name.clone(), packet, successful));
        Ok(())
    }
}
