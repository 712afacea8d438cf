//! Flow coordinator: one input edge, one output edge, push and pull in both
//! atomic and streaming variants, with a single open streaming session.

use flowline_core::{
    Bits, Capability, Datarate, ElementId, FlowError, GateIndex, Packet, PacketInfo, Result,
    TransmissionId, TreeId,
};
use log::{debug, trace};

use crate::capability::{Collector, Consumer, Producer, Provider};
use crate::element::{missing_binding, EdgeBinding, Edges, Element, ProcessingStats};
use crate::network::{FlowSignal, Network};

/// Per-packet processing applied by a [`PacketFlow`] on every step.
pub trait PacketProcessor: 'static {
    fn process_packet(&mut self, packet: &mut Packet);
}

/// Leaves packets untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl PacketProcessor for Identity {
    fn process_packet(&mut self, _packet: &mut Packet) {}
}

impl<F> PacketProcessor for F
where
    F: FnMut(&mut Packet) + 'static,
{
    fn process_packet(&mut self, packet: &mut Packet) {
        self(packet)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingState {
    Idle,
    Streaming {
        tree_id: TreeId,
        transmission_id: TransmissionId,
    },
}

pub struct PacketFlow<P: PacketProcessor = Identity> {
    name: String,
    id: ElementId,
    processor: P,
    producer: Option<EdgeBinding>,
    consumer: Option<EdgeBinding>,
    provider: Option<EdgeBinding>,
    collector: Option<EdgeBinding>,
    state: StreamingState,
    stats: ProcessingStats,
}

impl PacketFlow {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_processor(name, Identity)
    }
}

impl<P: PacketProcessor> PacketFlow<P> {
    pub fn with_processor(name: impl Into<String>, processor: P) -> Self {
        Self {
            name: name.into(),
            id: ElementId(usize::MAX),
            processor,
            producer: None,
            consumer: None,
            provider: None,
            collector: None,
            state: StreamingState::Idle,
            stats: ProcessingStats::default(),
        }
    }

    pub fn state(&self) -> StreamingState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.state, StreamingState::Streaming { .. })
    }

    pub fn stats(&self) -> ProcessingStats {
        self.stats
    }

    /// Fails if a session is open for a tree other than `candidate`; with no
    /// candidate any open session is a violation.
    pub fn check_packet_streaming(&self, candidate: Option<TreeId>) -> Result<()> {
        match self.state {
            StreamingState::Streaming { tree_id, .. } if candidate != Some(tree_id) => {
                Err(FlowError::StreamingInProgress {
                    open: tree_id,
                    requested: candidate,
                })
            }
            _ => Ok(()),
        }
    }

    fn start_packet_streaming(&mut self, packet: &Packet) {
        trace!("{} opens streaming session for tree {}", self.name, packet.tree_id());
        self.state = StreamingState::Streaming {
            tree_id: packet.tree_id(),
            transmission_id: packet.transmission_id(),
        };
    }

    fn end_packet_streaming(&mut self) {
        if let StreamingState::Streaming { tree_id, .. } = self.state {
            trace!("{} closes streaming session for tree {}", self.name, tree_id);
        }
        self.state = StreamingState::Idle;
    }

    fn handle_packet_processed(&mut self, packet: &Packet) {
        self.stats.record(packet);
    }

    fn require_consumer(&self) -> Result<EdgeBinding> {
        self.consumer
            .ok_or_else(|| missing_binding(&self.name, Capability::Consumer))
    }

    fn require_provider(&self) -> Result<EdgeBinding> {
        self.provider
            .ok_or_else(|| missing_binding(&self.name, Capability::Provider))
    }

    fn is_packet_end(packet: &Packet, position: Bits, extra_length: Bits) -> bool {
        packet.total_length() == position + extra_length
    }
}

impl<P: PacketProcessor> Element for PacketFlow<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, id: ElementId, edges: &Edges) {
        self.id = id;
        self.producer = edges.producer(0);
        self.provider = edges.provider(0);
        self.consumer = edges.consumer(0);
        self.collector = edges.collector(0);
    }

    fn as_producer(&mut self) -> Option<&mut dyn Producer> {
        Some(self)
    }

    fn as_consumer(&mut self) -> Option<&mut dyn Consumer> {
        Some(self)
    }

    fn as_provider(&mut self) -> Option<&mut dyn Provider> {
        Some(self)
    }

    fn as_collector(&mut self) -> Option<&mut dyn Collector> {
        Some(self)
    }
}

impl<P: PacketProcessor> Consumer for PacketFlow<P> {
    fn can_push_some_packet(&mut self, net: &mut Network, _gate: GateIndex) -> Result<bool> {
        match self.consumer {
            Some(consumer) => net.can_push_some_packet(consumer),
            None => Ok(true),
        }
    }

    fn can_push_packet(&mut self, net: &mut Network, _gate: GateIndex, packet: &Packet) -> Result<bool> {
        match self.consumer {
            Some(consumer) => net.can_push_packet(consumer, packet),
            None => Ok(true),
        }
    }

    fn push_packet(&mut self, net: &mut Network, _gate: GateIndex, mut packet: Packet) -> Result<()> {
        self.check_packet_streaming(None)?;
        let consumer = self.require_consumer()?;
        debug!("{} pushing {}", self.name, packet);
        net.emit(self.id, FlowSignal::PacketPushedIn, &packet);
        self.processor.process_packet(&mut packet);
        self.handle_packet_processed(&packet);
        net.emit(self.id, FlowSignal::PacketPushedOut, &packet);
        net.push_packet(consumer, packet)
    }

    fn push_packet_start(
        &mut self,
        net: &mut Network,
        _gate: GateIndex,
        mut packet: Packet,
        datarate: Datarate,
    ) -> Result<()> {
        self.check_packet_streaming(Some(packet.tree_id()))?;
        let consumer = self.require_consumer()?;
        debug!("{} starts pushing {} at {}", self.name, packet, datarate);
        self.start_packet_streaming(&packet);
        net.emit(self.id, FlowSignal::PacketPushedIn, &packet);
        self.processor.process_packet(&mut packet);
        net.push_packet_start(consumer, packet, datarate)
    }

    fn push_packet_progress(
        &mut self,
        net: &mut Network,
        _gate: GateIndex,
        mut packet: Packet,
        datarate: Datarate,
        position: Bits,
        extra_length: Bits,
    ) -> Result<()> {
        self.check_packet_streaming(Some(packet.tree_id()))?;
        let consumer = self.require_consumer()?;
        debug!("{} progresses pushing {} at {}", self.name, packet, position);
        if !self.is_streaming() {
            self.start_packet_streaming(&packet);
        }
        net.emit(self.id, FlowSignal::PacketPushedIn, &packet);
        let is_end = Self::is_packet_end(&packet, position, extra_length);
        self.processor.process_packet(&mut packet);
        if is_end {
            self.handle_packet_processed(&packet);
            net.emit(self.id, FlowSignal::PacketPushedOut, &packet);
            self.end_packet_streaming();
            net.push_packet_end(consumer, packet)
        } else {
            net.push_packet_progress(consumer, packet, datarate, position, extra_length)
        }
    }

    fn push_packet_end(&mut self, net: &mut Network, _gate: GateIndex, mut packet: Packet) -> Result<()> {
        self.check_packet_streaming(Some(packet.tree_id()))?;
        let consumer = self.require_consumer()?;
        debug!("{} ends pushing {}", self.name, packet);
        if !self.is_streaming() {
            self.start_packet_streaming(&packet);
        }
        net.emit(self.id, FlowSignal::PacketPushedIn, &packet);
        self.processor.process_packet(&mut packet);
        self.handle_packet_processed(&packet);
        net.emit(self.id, FlowSignal::PacketPushedOut, &packet);
        self.end_packet_streaming();
        net.push_packet_end(consumer, packet)
    }
}

impl<P: PacketProcessor> Producer for PacketFlow<P> {
    fn handle_can_push_packet_changed(&mut self, net: &mut Network, _gate: GateIndex) -> Result<()> {
        match self.producer {
            Some(producer) => net.notify_can_push_packet_changed(producer),
            None => Ok(()),
        }
    }

    fn handle_push_packet_processed(
        &mut self,
        net: &mut Network,
        _gate: GateIndex,
        packet: PacketInfo,
        successful: bool,
    ) -> Result<()> {
        self.end_packet_streaming();
        match self.producer {
            Some(producer) => net.notify_push_packet_processed(producer, packet, successful),
            None => Ok(()),
        }
    }
}

impl<P: PacketProcessor> Provider for PacketFlow<P> {
    fn can_pull_some_packet(&mut self, net: &mut Network, _gate: GateIndex) -> Result<bool> {
        match self.provider {
            Some(provider) => net.can_pull_some_packet(provider),
            None => Ok(false),
        }
    }

    fn pull_packet(&mut self, net: &mut Network, _gate: GateIndex) -> Result<Packet> {
        self.check_packet_streaming(None)?;
        let provider = self.require_provider()?;
        let mut packet = net.pull_packet(provider)?;
        debug!("{} pulled {}", self.name, packet);
        net.emit(self.id, FlowSignal::PacketPulledIn, &packet);
        self.processor.process_packet(&mut packet);
        self.handle_packet_processed(&packet);
        net.emit(self.id, FlowSignal::PacketPulledOut, &packet);
        Ok(packet)
    }

    fn pull_packet_start(&mut self, net: &mut Network, _gate: GateIndex, datarate: Datarate) -> Result<Packet> {
        self.check_packet_streaming(None)?;
        let provider = self.require_provider()?;
        let mut packet = net.pull_packet_start(provider, datarate)?;
        debug!("{} starts pulling {} at {}", self.name, packet, datarate);
        self.start_packet_streaming(&packet);
        net.emit(self.id, FlowSignal::PacketPulledIn, &packet);
        self.processor.process_packet(&mut packet);
        Ok(packet)
    }

    fn pull_packet_progress(
        &mut self,
        net: &mut Network,
        _gate: GateIndex,
        datarate: Datarate,
        position: Bits,
        extra_length: Bits,
    ) -> Result<Packet> {
        let provider = self.require_provider()?;
        let mut packet = net.pull_packet_progress(provider, datarate, position, extra_length)?;
        self.check_packet_streaming(Some(packet.tree_id()))?;
        debug!("{} progresses pulling {} at {}", self.name, packet, position);
        if !self.is_streaming() {
            self.start_packet_streaming(&packet);
        }
        net.emit(self.id, FlowSignal::PacketPulledIn, &packet);
        let is_end = Self::is_packet_end(&packet, position, extra_length);
        self.processor.process_packet(&mut packet);
        if is_end {
            self.handle_packet_processed(&packet);
            self.end_packet_streaming();
            net.emit(self.id, FlowSignal::PacketPulledOut, &packet);
        }
        Ok(packet)
    }

    fn pull_packet_end(&mut self, net: &mut Network, _gate: GateIndex) -> Result<Packet> {
        let provider = self.require_provider()?;
        let mut packet = net.pull_packet_end(provider)?;
        self.check_packet_streaming(Some(packet.tree_id()))?;
        debug!("{} ends pulling {}", self.name, packet);
        net.emit(self.id, FlowSignal::PacketPulledIn, &packet);
        self.processor.process_packet(&mut packet);
        self.handle_packet_processed(&packet);
        self.end_packet_streaming();
        net.emit(self.id, FlowSignal::PacketPulledOut, &packet);
        Ok(packet)
    }
}

impl<P: PacketProcessor> Collector for PacketFlow<P> {
    fn handle_can_pull_packet_changed(&mut self, net: &mut Network, _gate: GateIndex) -> Result<()> {
        match self.collector {
            Some(collector) => net.notify_can_pull_packet_changed(collector),
            None => Ok(()),
        }
    }

    fn handle_pull_packet_processed(
        &mut self,
        net: &mut Network,
        _gate: GateIndex,
        packet: PacketInfo,
        successful: bool,
    ) -> Result<()> {
        self.end_packet_streaming();
        match self.collector {
            Some(collector) => net.notify_pull_packet_processed(collector, packet, successful),
            None => Ok(()),
        }
    }
}
