//! Turns streamed transfers back into atomic packets.

use flowline_core::{
    Bits, Capability, Datarate, ElementId, FlowError, GateIndex, Packet, PacketInfo, Result,
};
use log::{debug, info};

use crate::capability::{Collector, Consumer, Producer, Provider};
use crate::element::{missing_binding, EdgeBinding, Edges, Element, ProcessingStats};
use crate::network::{FlowSignal, Network};

pub struct PacketDestreamer {
    name: String,
    id: ElementId,
    /// Rate requested from the provider when destreaming a pull.
    datarate: Datarate,
    producer: Option<EdgeBinding>,
    consumer: Option<EdgeBinding>,
    provider: Option<EdgeBinding>,
    collector: Option<EdgeBinding>,
    streamed: Option<Packet>,
    stats: ProcessingStats,
}

impl PacketDestreamer {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_datarate(name, Datarate::UNLIMITED)
    }

    pub fn with_datarate(name: impl Into<String>, datarate: Datarate) -> Self {
        Self {
            name: name.into(),
            id: ElementId(usize::MAX),
            datarate,
            producer: None,
            consumer: None,
            provider: None,
            collector: None,
            streamed: None,
            stats: ProcessingStats::default(),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streamed.is_some()
    }

    pub fn stats(&self) -> ProcessingStats {
        self.stats
    }

    fn consumer(&self) -> Result<EdgeBinding> {
        self.consumer
            .ok_or_else(|| missing_binding(&self.name, Capability::Consumer))
    }

    fn provider(&self) -> Result<EdgeBinding> {
        self.provider
            .ok_or_else(|| missing_binding(&self.name, Capability::Provider))
    }

    /// Replaces the buffered packet; a different tree may not interleave.
    fn buffer(&mut self, packet: Packet) -> Result<()> {
        if let Some(streamed) = &self.streamed {
            if streamed.tree_id() != packet.tree_id() {
                return Err(FlowError::StreamingInProgress {
                    open: streamed.tree_id(),
                    requested: Some(packet.tree_id()),
                });
            }
        }
        self.streamed = Some(packet);
        Ok(())
    }

    fn forward(&mut self, net: &mut Network, packet: Packet) -> Result<()> {
        let consumer = self.consumer()?;
        self.stats.record(&packet);
        net.emit(self.id, FlowSignal::PacketPushedOut, &packet);
        net.push_packet(consumer, packet)
    }
}

impl Element for PacketDestreamer {
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

impl Consumer for PacketDestreamer {
    fn can_push_some_packet(&mut self, net: &mut Network, _gate: GateIndex) -> Result<bool> {
        if self.is_streaming() {
            return Ok(false);
        }
        net.can_push_some_packet(self.consumer()?)
    }

    fn can_push_packet(&mut self, net: &mut Network, _gate: GateIndex, packet: &Packet) -> Result<bool> {
        if self.is_streaming() {
            return Ok(false);
        }
        net.can_push_packet(self.consumer()?, packet)
    }

    fn push_packet(&mut self, net: &mut Network, _gate: GateIndex, packet: Packet) -> Result<()> {
        if let Some(streamed) = &self.streamed {
            return Err(FlowError::StreamingInProgress {
                open: streamed.tree_id(),
                requested: None,
            });
        }
        debug!("{} passing {} through", self.name, packet);
        net.emit(self.id, FlowSignal::PacketPushedIn, &packet);
        self.forward(net, packet)
    }

    fn push_packet_start(
        &mut self,
        net: &mut Network,
        _gate: GateIndex,
        packet: Packet,
        datarate: Datarate,
    ) -> Result<()> {
        info!("{} starting destreaming {} at {}", self.name, packet, datarate);
        net.emit(self.id, FlowSignal::PacketPushedIn, &packet);
        self.buffer(packet)
    }

    fn push_packet_progress(
        &mut self,
        _net: &mut Network,
        _gate: GateIndex,
        packet: Packet,
        _datarate: Datarate,
        position: Bits,
        _extra_length: Bits,
    ) -> Result<()> {
        debug!("{} progressing destreaming {} at {}", self.name, packet, position);
        self.buffer(packet)
    }

    fn push_packet_end(&mut self, net: &mut Network, _gate: GateIndex, packet: Packet) -> Result<()> {
        self.buffer(packet)?;
        let packet = self.streamed.take().ok_or_else(|| FlowError::NotStreaming {
            element: self.name.clone(),
        })?;
        info!("{} ending destreaming {}", self.name, packet);
        self.forward(net, packet)
    }
}

impl Producer for PacketDestreamer {
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
        match self.producer {
            Some(producer) => net.notify_push_packet_processed(producer, packet, successful),
            None => Ok(()),
        }
    }
}

impl Provider for PacketDestreamer {
    fn can_pull_some_packet(&mut self, net: &mut Network, _gate: GateIndex) -> Result<bool> {
        if self.is_streaming() {
            return Ok(false);
        }
        net.can_pull_some_packet(self.provider()?)
    }

    fn pull_packet(&mut self, net: &mut Network, _gate: GateIndex) -> Result<Packet> {
        let provider = self.provider()?;
        let started = net.pull_packet_start(provider, self.datarate)?;
        debug!("{} started destreaming pull of {}", self.name, started);
        let packet = net.pull_packet_end(provider)?;
        info!("{} destreamed {}", self.name, packet);
        self.stats.record(&packet);
        net.emit(self.id, FlowSignal::PacketPulledOut, &packet);
        Ok(packet)
    }
}

impl Collector for PacketDestreamer {
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
        match self.collector {
            Some(collector) => net.notify_pull_packet_processed(collector, packet, successful),
            None => Ok(()),
        }
    }
}
