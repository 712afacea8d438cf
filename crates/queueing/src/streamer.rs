//! Turns atomic packets into streamed ones.
//!
//! In push mode an incoming packet is streamed to the consumer at the
//! configured rate. In pull mode the collector drives the stream; ending it
//! early cuts the packet at the transmitted position and keeps the rest as a
//! new fragment for the next pull.

use flowline_core::{
    Bits, Capability, Datarate, ElementId, FlowError, FragmentTag, GateIndex, Packet, PacketInfo,
    Result, SimTime, TimerHandle, TimerKind,
};
use log::{debug, info};

use crate::capability::{Collector, Consumer, Producer, Provider};
use crate::config::StreamerConfig;
use crate::element::{missing_binding, EdgeBinding, Edges, Element, ProcessingStats};
use crate::network::{FlowSignal, Network};

pub const END_STREAMING_TIMER: TimerKind = 0;

const FRAGMENT_SUFFIX: &str = "-frag";

pub struct PreemptableStreamer {
    name: String,
    id: ElementId,
    config: StreamerConfig,
    producer: Option<EdgeBinding>,
    consumer: Option<EdgeBinding>,
    provider: Option<EdgeBinding>,
    collector: Option<EdgeBinding>,
    streamed: Option<Packet>,
    remaining: Option<Packet>,
    stream_datarate: Datarate,
    stream_start: SimTime,
    timer: Option<TimerHandle>,
    stats: ProcessingStats,
}

impl PreemptableStreamer {
    pub fn new(name: impl Into<String>, config: StreamerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            id: ElementId(usize::MAX),
            config,
            producer: None,
            consumer: None,
            provider: None,
            collector: None,
            streamed: None,
            remaining: None,
            stream_datarate: Datarate::UNLIMITED,
            stream_start: SimTime::ZERO,
            timer: None,
            stats: ProcessingStats::default(),
        })
    }

    pub fn is_streaming(&self) -> bool {
        self.streamed.is_some()
    }

    /// Unsent tail of the last preempted packet.
    pub fn remaining_packet(&self) -> Option<&Packet> {
        self.remaining.as_ref()
    }

    pub fn stats(&self) -> ProcessingStats {
        self.stats
    }

    fn check_not_streaming(&self, requested: Option<&Packet>) -> Result<()> {
        match &self.streamed {
            Some(streamed) => Err(FlowError::StreamingInProgress {
                open: streamed.tree_id(),
                requested: requested.map(Packet::tree_id),
            }),
            None => Ok(()),
        }
    }

    fn not_streaming(&self) -> FlowError {
        FlowError::NotStreaming {
            element: self.name.clone(),
        }
    }

    fn end_push_streaming(&mut self, net: &mut Network) -> Result<()> {
        let consumer = self
            .consumer
            .ok_or_else(|| missing_binding(&self.name, Capability::Consumer))?;
        let packet = self.streamed.take().ok_or_else(|| self.not_streaming())?;
        self.timer = None;
        info!("{} ending streaming {}", self.name, packet);
        self.stats.record(&packet);
        net.emit(self.id, FlowSignal::PacketPushedOut, &packet);
        net.push_packet_end(consumer, packet)
    }

    /// Length to keep in the pulled fragment, rounded up and clamped below by
    /// the minimum packet length.
    fn preempted_length(&self, elapsed: std::time::Duration) -> Bits {
        let pulled = self.stream_datarate.transmitted_length(elapsed).bits();
        let rounding = self.config.rounding_length.bits();
        let rounded = pulled.div_ceil(rounding).saturating_mul(rounding);
        Bits(rounded.max(self.config.min_packet_length.bits()))
    }

    fn split_at(&mut self, packet: &mut Packet, preempted: Bits) {
        let mut tag = packet.fragment().unwrap_or_else(FragmentTag::whole);
        let number = tag.number;
        let base = if number == 0 {
            packet.name().to_owned()
        } else {
            let name = packet.name();
            name.find(FRAGMENT_SUFFIX)
                .map_or(name, |at| &name[..at])
                .to_owned()
        };

        tag.last = false;
        packet.set_fragment(Some(tag));
        packet.set_name(format!("{base}{FRAGMENT_SUFFIX}{number}"));

        let tail = packet.split_off_back(preempted.whole_bytes());
        let mut remaining = Packet::new(format!("{base}{FRAGMENT_SUFFIX}{}", number + 1), tail);
        remaining.set_fragment(Some(FragmentTag {
            first: false,
            last: true,
            number: number + 1,
        }));
        info!(
            "{} preempted {} keeping {} for later",
            self.name,
            packet,
            remaining.total_length()
        );
        self.remaining = Some(remaining);
    }
}

impl Element for PreemptableStreamer {
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

    fn handle_timer(&mut self, net: &mut Network, timer: TimerKind) -> Result<()> {
        match timer {
            END_STREAMING_TIMER => self.end_push_streaming(net),
            other => Err(FlowError::UnexpectedTimer {
                element: self.name.clone(),
                timer: other,
            }),
        }
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

impl Consumer for PreemptableStreamer {
    fn can_push_some_packet(&mut self, net: &mut Network, _gate: GateIndex) -> Result<bool> {
        match self.consumer {
            Some(consumer) if !self.is_streaming() => net.can_push_some_packet(consumer),
            _ => Ok(false),
        }
    }

    fn can_push_packet(&mut self, net: &mut Network, _gate: GateIndex, packet: &Packet) -> Result<bool> {
        match self.consumer {
            Some(consumer) if !self.is_streaming() => net.can_push_packet(consumer, packet),
            _ => Ok(false),
        }
    }

    fn push_packet(&mut self, net: &mut Network, _gate: GateIndex, packet: Packet) -> Result<()> {
        self.check_not_streaming(Some(&packet))?;
        let consumer = self
            .consumer
            .ok_or_else(|| missing_binding(&self.name, Capability::Consumer))?;
        let datarate = self.config.datarate.unwrap_or(Datarate::UNLIMITED);
        let duration = datarate.transmission_time(packet.total_length())?;
        info!("{} starting streaming {} at {}", self.name, packet, datarate);
        net.emit(self.id, FlowSignal::PacketPushedIn, &packet);
        net.push_packet_start(consumer, packet.dup(), datarate)?;
        self.stream_datarate = datarate;
        self.stream_start = net.now();
        self.streamed = Some(packet);
        if datarate.is_unlimited() {
            self.end_push_streaming(net)
        } else {
            self.timer = Some(net.schedule_after(self.id, duration, END_STREAMING_TIMER));
            Ok(())
        }
    }
}

impl Producer for PreemptableStreamer {
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

impl Provider for PreemptableStreamer {
    fn can_pull_some_packet(&mut self, net: &mut Network, _gate: GateIndex) -> Result<bool> {
        if self.is_streaming() {
            return Ok(false);
        }
        if self.remaining.is_some() {
            return Ok(true);
        }
        match self.provider {
            Some(provider) => net.can_pull_some_packet(provider),
            None => Ok(false),
        }
    }

    fn pull_packet(&mut self, net: &mut Network, _gate: GateIndex) -> Result<Packet> {
        self.check_not_streaming(None)?;
        let packet = match self.remaining.take() {
            Some(packet) => packet,
            None => {
                let provider = self
                    .provider
                    .ok_or_else(|| missing_binding(&self.name, Capability::Provider))?;
                net.pull_packet(provider)?
            }
        };
        debug!("{} passing {} through atomically", self.name, packet);
        self.stats.record(&packet);
        net.emit(self.id, FlowSignal::PacketPulledOut, &packet);
        Ok(packet)
    }

    fn pull_packet_start(&mut self, net: &mut Network, _gate: GateIndex, datarate: Datarate) -> Result<Packet> {
        self.check_not_streaming(None)?;
        let mut packet = match self.remaining.take() {
            Some(packet) => packet,
            None => {
                let provider = self
                    .provider
                    .ok_or_else(|| missing_binding(&self.name, Capability::Provider))?;
                let packet = net.pull_packet(provider)?;
                net.emit(self.id, FlowSignal::PacketPulledIn, &packet);
                packet
            }
        };
        if packet.fragment().is_none() {
            packet.set_fragment(Some(FragmentTag::whole()));
        }
        info!("{} starting streaming {} at {}", self.name, packet, datarate);
        self.stream_datarate = datarate;
        self.stream_start = net.now();
        let copy = packet.dup();
        self.streamed = Some(packet);
        Ok(copy)
    }

    fn pull_packet_progress(
        &mut self,
        _net: &mut Network,
        _gate: GateIndex,
        datarate: Datarate,
        position: Bits,
        _extra_length: Bits,
    ) -> Result<Packet> {
        let packet = self.streamed.as_ref().ok_or_else(|| self.not_streaming())?;
        debug!("{} progressing {} at {}", self.name, packet, position);
        let copy = packet.dup();
        self.stream_datarate = datarate;
        Ok(copy)
    }

    fn pull_packet_end(&mut self, net: &mut Network, _gate: GateIndex) -> Result<Packet> {
        let mut packet = self.streamed.take().ok_or_else(|| self.not_streaming())?;
        let preempted = self.preempted_length(net.now() - self.stream_start);
        if preempted + self.config.min_packet_length <= packet.total_length() {
            self.split_at(&mut packet, preempted);
        }
        info!("{} ending streaming {}", self.name, packet);
        self.stats.record(&packet);
        net.emit(self.id, FlowSignal::PacketPulledOut, &packet);
        Ok(packet)
    }
}

impl Collector for PreemptableStreamer {
    fn handle_can_pull_packet_changed(&mut self, net: &mut Network, _gate: GateIndex) -> Result<()> {
        match self.collector {
            Some(collector) if !self.is_streaming() => net.notify_can_pull_packet_changed(collector),
            _ => Ok(()),
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
