//! Passive FIFO between a pushing producer and a pulling collector.

use std::collections::VecDeque;

use flowline_core::{ElementId, FlowError, GateIndex, Packet, Result};
use log::{debug, warn};

use crate::capability::{Consumer, Provider};
use crate::config::QueueConfig;
use crate::element::{EdgeBinding, Edges, Element, ProcessingStats};
use crate::network::{FlowSignal, Network};

pub struct PacketQueue {
    name: String,
    id: ElementId,
    config: QueueConfig,
    producer: Option<EdgeBinding>,
    collector: Option<EdgeBinding>,
    packets: VecDeque<Packet>,
    dropped: u64,
    stats: ProcessingStats,
}

impl PacketQueue {
    pub fn new(name: impl Into<String>, config: QueueConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            id: ElementId(usize::MAX),
            config,
            producer: None,
            collector: None,
            packets: VecDeque::new(),
            dropped: 0,
            stats: ProcessingStats::default(),
        })
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.config
            .capacity
            .is_some_and(|capacity| self.packets.len() >= capacity)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn stats(&self) -> ProcessingStats {
        self.stats
    }
}

impl Element for PacketQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, id: ElementId, edges: &Edges) {
        self.id = id;
        self.producer = edges.producer(0);
        self.collector = edges.collector(0);
    }

    fn as_consumer(&mut self) -> Option<&mut dyn Consumer> {
        Some(self)
    }

    fn as_provider(&mut self) -> Option<&mut dyn Provider> {
        Some(self)
    }
}

impl Consumer for PacketQueue {
    fn can_push_some_packet(&mut self, _net: &mut Network, _gate: GateIndex) -> Result<bool> {
        Ok(!self.is_full())
    }

    fn push_packet(&mut self, net: &mut Network, _gate: GateIndex, packet: Packet) -> Result<()> {
        net.emit(self.id, FlowSignal::PacketPushedIn, &packet);
        if self.is_full() {
            warn!("{} is full, dropping {}", self.name, packet);
            self.dropped += 1;
            net.emit(self.id, FlowSignal::PacketDropped, &packet);
            return Ok(());
        }
        debug!("{} enqueued {} ({} queued)", self.name, packet, self.packets.len() + 1);
        self.packets.push_back(packet);
        match self.collector {
            Some(collector) => net.notify_can_pull_packet_changed(collector),
            None => Ok(()),
        }
    }
}

impl Provider for PacketQueue {
    fn can_pull_some_packet(&mut self, _net: &mut Network, _gate: GateIndex) -> Result<bool> {
        Ok(!self.packets.is_empty())
    }

    fn pull_packet(&mut self, net: &mut Network, _gate: GateIndex) -> Result<Packet> {
        let packet = self.packets.pop_front().ok_or_else(|| FlowError::Empty {
            element: self.name.clone(),
        })?;
        debug!("{} dequeued {} ({} left)", self.name, packet, self.packets.len());
        self.stats.record(&packet);
        net.emit(self.id, FlowSignal::PacketPulledOut, &packet);
        if let Some(producer) = self.producer {
            net.notify_can_push_packet_changed(producer)?;
        }
        Ok(packet)
    }
}
