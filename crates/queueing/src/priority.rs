//! Multi-input provider serving the lowest numbered input with a packet.

use flowline_core::{
    Bits, Capability, Datarate, ElementId, FlowError, GateIndex, Packet, PacketInfo, Result,
};
use log::debug;

use crate::capability::{Collector, Provider};
use crate::element::{missing_binding, EdgeBinding, Edges, Element};
use crate::network::{FlowSignal, Network};

pub struct PriorityScheduler {
    name: String,
    id: ElementId,
    inputs: usize,
    providers: Vec<Option<EdgeBinding>>,
    collector: Option<EdgeBinding>,
    /// Input that started the open stream.
    streaming_input: Option<GateIndex>,
}

impl PriorityScheduler {
    pub fn new(name: impl Into<String>, inputs: usize) -> Self {
        Self {
            name: name.into(),
            id: ElementId(usize::MAX),
            inputs,
            providers: Vec::new(),
            collector: None,
            streaming_input: None,
        }
    }

    pub fn streaming_input(&self) -> Option<GateIndex> {
        self.streaming_input
    }

    fn select(&self, net: &mut Network) -> Result<Option<(GateIndex, EdgeBinding)>> {
        for (gate, provider) in self.providers.iter().enumerate() {
            if let Some(provider) = provider {
                if net.can_pull_some_packet(*provider)? {
                    return Ok(Some((gate, *provider)));
                }
            }
        }
        Ok(None)
    }

    fn select_or_empty(&self, net: &mut Network) -> Result<(GateIndex, EdgeBinding)> {
        self.select(net)?.ok_or_else(|| FlowError::Empty {
            element: self.name.clone(),
        })
    }

    fn pinned(&self) -> Result<EdgeBinding> {
        let gate = self.streaming_input.ok_or_else(|| FlowError::NotStreaming {
            element: self.name.clone(),
        })?;
        self.providers
            .get(gate)
            .copied()
            .flatten()
            .ok_or_else(|| missing_binding(&self.name, Capability::Provider))
    }
}

impl Element for PriorityScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    fn gate_counts(&self) -> (usize, usize) {
        (self.inputs, 1)
    }

    fn bind(&mut self, id: ElementId, edges: &Edges) {
        self.id = id;
        self.providers = (0..self.inputs).map(|gate| edges.provider(gate)).collect();
        self.collector = edges.collector(0);
    }

    fn as_provider(&mut self) -> Option<&mut dyn Provider> {
        Some(self)
    }

    fn as_collector(&mut self) -> Option<&mut dyn Collector> {
        Some(self)
    }
}

impl Provider for PriorityScheduler {
    fn can_pull_some_packet(&mut self, net: &mut Network, _gate: GateIndex) -> Result<bool> {
        if self.streaming_input.is_some() {
            return Ok(false);
        }
        Ok(self.select(net)?.is_some())
    }

    fn pull_packet(&mut self, net: &mut Network, _gate: GateIndex) -> Result<Packet> {
        if self.streaming_input.is_some() {
            return Err(FlowError::InvalidOperation {
                element: self.name.clone(),
                operation: "pull_packet while streaming",
            });
        }
        let (input, provider) = self.select_or_empty(net)?;
        let packet = net.pull_packet(provider)?;
        debug!("{} served {} from input {}", self.name, packet, input);
        net.emit(self.id, FlowSignal::PacketPulledOut, &packet);
        Ok(packet)
    }

    fn pull_packet_start(&mut self, net: &mut Network, _gate: GateIndex, datarate: Datarate) -> Result<Packet> {
        if self.streaming_input.is_some() {
            return Err(FlowError::InvalidOperation {
                element: self.name.clone(),
                operation: "pull_packet_start while streaming",
            });
        }
        let (input, provider) = self.select_or_empty(net)?;
        let packet = net.pull_packet_start(provider, datarate)?;
        debug!("{} streaming {} from input {}", self.name, packet, input);
        self.streaming_input = Some(input);
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
        let provider = self.pinned()?;
        net.pull_packet_progress(provider, datarate, position, extra_length)
    }

    fn pull_packet_end(&mut self, net: &mut Network, _gate: GateIndex) -> Result<Packet> {
        let provider = self.pinned()?;
        let packet = net.pull_packet_end(provider)?;
        self.streaming_input = None;
        net.emit(self.id, FlowSignal::PacketPulledOut, &packet);
        Ok(packet)
    }
}

impl Collector for PriorityScheduler {
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
        self.streaming_input = None;
        match self.collector {
            Some(collector) => net.notify_pull_packet_processed(collector, packet, successful),
            None => Ok(()),
        }
    }
}
