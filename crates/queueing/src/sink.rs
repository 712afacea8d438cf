//! Terminal consumer that records what reaches it.

use flowline_core::{
    ElementId, FlowError, FragmentTag, GateIndex, Packet, PacketInfo, Result, SimTime, TimerHandle,
    TimerKind,
};
use log::{debug, trace};

use crate::capability::Consumer;
use crate::config::SinkConfig;
use crate::element::{invalid_operation, EdgeBinding, Edges, Element, ProcessingStats};
use crate::network::{FlowSignal, Network};

pub const CONSUMPTION_TIMER: TimerKind = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedPacket {
    pub info: PacketInfo,
    pub name: String,
    pub fragment: Option<FragmentTag>,
    pub time: SimTime,
}

pub struct PassivePacketSink {
    name: String,
    id: ElementId,
    config: SinkConfig,
    producer: Option<EdgeBinding>,
    busy: Option<TimerHandle>,
    consumed: Vec<ConsumedPacket>,
    stats: ProcessingStats,
}

impl PassivePacketSink {
    pub fn new(name: impl Into<String>, config: SinkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            id: ElementId(usize::MAX),
            config,
            producer: None,
            busy: None,
            consumed: Vec::new(),
            stats: ProcessingStats::default(),
        })
    }

    pub fn consumed(&self) -> &[ConsumedPacket] {
        &self.consumed
    }

    pub fn stats(&self) -> ProcessingStats {
        self.stats
    }

    fn notify_producer(&self, net: &mut Network) -> Result<()> {
        match self.producer {
            Some(producer) => net.notify_can_push_packet_changed(producer),
            None => Ok(()),
        }
    }
}

impl Element for PassivePacketSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn gate_counts(&self) -> (usize, usize) {
        (1, 0)
    }

    fn bind(&mut self, id: ElementId, edges: &Edges) {
        self.id = id;
        self.producer = edges.producer(0);
    }

    fn handle_timer(&mut self, net: &mut Network, timer: TimerKind) -> Result<()> {
        match timer {
            CONSUMPTION_TIMER => {
                trace!("{} ready for the next packet", self.name);
                self.busy = None;
                self.notify_producer(net)
            }
            other => Err(FlowError::UnexpectedTimer {
                element: self.name.clone(),
                timer: other,
            }),
        }
    }

    fn as_consumer(&mut self) -> Option<&mut dyn Consumer> {
        Some(self)
    }
}

impl Consumer for PassivePacketSink {
    fn can_push_some_packet(&mut self, _net: &mut Network, _gate: GateIndex) -> Result<bool> {
        Ok(self.busy.is_none())
    }

    fn push_packet(&mut self, net: &mut Network, _gate: GateIndex, packet: Packet) -> Result<()> {
        if self.busy.is_some() {
            return Err(invalid_operation(&self.name, "push_packet while consuming"));
        }
        debug!("{} consuming {}", self.name, packet);
        net.emit(self.id, FlowSignal::PacketPushedIn, &packet);
        self.stats.record(&packet);
        self.consumed.push(ConsumedPacket {
            info: packet.info(),
            name: packet.name().to_owned(),
            fragment: packet.fragment(),
            time: net.now(),
        });
        match self.config.consumption_interval {
            Some(interval) => {
                self.busy = Some(net.schedule_after(self.id, interval, CONSUMPTION_TIMER));
                Ok(())
            }
            None => self.notify_producer(net),
        }
    }
}
