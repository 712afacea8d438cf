//! Rate-limited server that streams packets from its provider to its consumer
//! and preempts the transfer when the flow control state changes.

use flowline_core::{
    Capability, ElementId, FlowError, GateIndex, Packet, PacketInfo, Result, TimerHandle, TimerKind,
};
use log::{debug, info};

use crate::capability::{Collector, Producer};
use crate::config::ServerConfig;
use crate::element::{missing_binding, EdgeBinding, Edges, Element, ProcessingStats};
use crate::network::{FlowSignal, Network};

pub const END_STREAMING_TIMER: TimerKind = 0;

#[derive(Debug)]
pub enum ServerState {
    Idle,
    Streaming {
        packet: Packet,
        timer: TimerHandle,
        /// Cleared once the upstream half was finalized early.
        upstream_open: bool,
    },
}

pub struct PreemptingServer {
    name: String,
    id: ElementId,
    config: ServerConfig,
    provider: Option<EdgeBinding>,
    consumer: Option<EdgeBinding>,
    state: ServerState,
    stats: ProcessingStats,
    preemptions: u64,
}

impl PreemptingServer {
    pub fn new(name: impl Into<String>, config: ServerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            id: ElementId(usize::MAX),
            config,
            provider: None,
            consumer: None,
            state: ServerState::Idle,
            stats: ProcessingStats::default(),
            preemptions: 0,
        })
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.state, ServerState::Streaming { .. })
    }

    pub fn streamed_packet(&self) -> Option<&Packet> {
        match &self.state {
            ServerState::Streaming { packet, .. } => Some(packet),
            ServerState::Idle => None,
        }
    }

    pub fn stats(&self) -> ProcessingStats {
        self.stats
    }

    pub fn preemptions(&self) -> u64 {
        self.preemptions
    }

    fn provider(&self) -> Result<EdgeBinding> {
        self.provider
            .ok_or_else(|| missing_binding(&self.name, Capability::Provider))
    }

    fn consumer(&self) -> Result<EdgeBinding> {
        self.consumer
            .ok_or_else(|| missing_binding(&self.name, Capability::Consumer))
    }

    /// Upstream has a packet and downstream accepts one.
    pub fn can_start_streaming(&self, net: &mut Network) -> Result<bool> {
        let (provider, consumer) = (self.provider()?, self.consumer()?);
        Ok(net.can_pull_some_packet(provider)? && net.can_push_some_packet(consumer)?)
    }

    fn start_streaming(&mut self, net: &mut Network) -> Result<()> {
        let (provider, consumer) = (self.provider()?, self.consumer()?);
        let datarate = self.config.datarate;
        let packet = net.pull_packet_start(provider, datarate)?;
        let duration = datarate.transmission_time(packet.total_length())?;
        info!("{} starting streaming {} at {}", self.name, packet, datarate);
        net.emit(self.id, FlowSignal::PacketPulledIn, &packet);
        net.push_packet_start(consumer, packet.dup(), datarate)?;
        net.emit(self.id, FlowSignal::PacketPushedOut, &packet);
        let timer = net.schedule_after(self.id, duration, END_STREAMING_TIMER);
        self.stats.record(&packet);
        net.emit(self.id, FlowSignal::PacketProcessed, &packet);
        self.state = ServerState::Streaming {
            packet,
            timer,
            upstream_open: true,
        };
        Ok(())
    }

    fn end_streaming(&mut self, net: &mut Network) -> Result<()> {
        let (provider, consumer) = (self.provider()?, self.consumer()?);
        let ServerState::Streaming {
            packet, upstream_open, ..
        } = std::mem::replace(&mut self.state, ServerState::Idle)
        else {
            return Err(FlowError::NotStreaming {
                element: self.name.clone(),
            });
        };
        let packet = if upstream_open {
            net.pull_packet_end(provider)?
        } else {
            packet
        };
        info!("{} ending streaming {} at {}", self.name, packet, net.now());
        net.emit(self.id, FlowSignal::PacketPushedOut, &packet);
        net.push_packet_end(consumer, packet)
    }

    fn preempt(&mut self, net: &mut Network) -> Result<()> {
        let ServerState::Streaming { timer, .. } = self.state else {
            return Ok(());
        };
        info!("{} preempting streaming at {}", self.name, net.now());
        let ended = self.end_streaming(net);
        net.cancel(timer);
        ended?;
        self.preemptions += 1;
        Ok(())
    }

    fn try_start_streaming(&mut self, net: &mut Network) -> Result<()> {
        if self.can_start_streaming(net)? {
            self.start_streaming(net)
        } else {
            debug!("{} stays idle", self.name);
            Ok(())
        }
    }

    fn handle_flow_control_change(&mut self, net: &mut Network) -> Result<()> {
        if self.is_streaming() {
            self.preempt(net)
        } else {
            self.try_start_streaming(net)
        }
    }
}

impl Element for PreemptingServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, id: ElementId, edges: &Edges) {
        self.id = id;
        self.provider = edges.provider(0);
        self.consumer = edges.consumer(0);
    }

    fn initialize(&mut self, net: &mut Network) -> Result<()> {
        self.provider()?;
        self.consumer()?;
        self.try_start_streaming(net)
    }

    fn handle_timer(&mut self, net: &mut Network, timer: TimerKind) -> Result<()> {
        match timer {
            END_STREAMING_TIMER => self.end_streaming(net),
            other => Err(FlowError::UnexpectedTimer {
                element: self.name.clone(),
                timer: other,
            }),
        }
    }

    fn as_producer(&mut self) -> Option<&mut dyn Producer> {
        Some(self)
    }

    fn as_collector(&mut self) -> Option<&mut dyn Collector> {
        Some(self)
    }
}

impl Producer for PreemptingServer {
    fn handle_can_push_packet_changed(&mut self, net: &mut Network, _gate: GateIndex) -> Result<()> {
        self.handle_flow_control_change(net)
    }

    fn handle_push_packet_processed(
        &mut self,
        net: &mut Network,
        _gate: GateIndex,
        _packet: PacketInfo,
        _successful: bool,
    ) -> Result<()> {
        let provider = self.provider()?;
        if let ServerState::Streaming {
            packet, upstream_open, ..
        } = &mut self.state
        {
            if *upstream_open {
                *packet = net.pull_packet_end(provider)?;
                *upstream_open = false;
                info!("{} finalized upstream of {}", self.name, packet);
            }
        }
        Ok(())
    }
}

impl Collector for PreemptingServer {
    fn handle_can_pull_packet_changed(&mut self, net: &mut Network, _gate: GateIndex) -> Result<()> {
        self.handle_flow_control_change(net)
    }

    fn handle_pull_packet_processed(
        &mut self,
        _net: &mut Network,
        _gate: GateIndex,
        _packet: PacketInfo,
        _successful: bool,
    ) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::PacketFlow;
    use crate::testing::{Call, CallLog, RecordingConsumer, ScriptedProvider};
    use flowline_core::{Datarate, SimTime};
    use std::time::Duration;

    struct Bench {
        net: Network,
        server: ElementId,
        consumer: ElementId,
        log: CallLog,
    }

    fn bench(packets: Vec<Packet>, accepting: bool) -> Bench {
        let log = CallLog::default();
        let mut net = Network::new();
        let provider = net.add(ScriptedProvider::new("provider", &log, packets));
        let config = ServerConfig {
            datarate: Datarate::bytes_per_sec(10.0),
        };
        let server = net.add(PreemptingServer::new("server", config).unwrap());
        let mut sink = RecordingConsumer::new("consumer", &log);
        sink.accepting.set(accepting);
        let consumer = net.add(sink);
        net.link(provider, server).unwrap();
        net.link(server, consumer).unwrap();
        net.initialize().unwrap();
        Bench {
            net,
            server,
            consumer,
            log,
        }
    }

    fn server(bench: &Bench) -> &PreemptingServer {
        bench.net.element::<PreemptingServer>(bench.server).unwrap()
    }

    fn kinds(log: &CallLog) -> Vec<&'static str> {
        log.calls()
            .iter()
            .map(|call| match call {
                Call::PullStart(..) => "pull_start",
                Call::PullEnd(..) => "pull_end",
                Call::PushStart(..) => "push_start",
                Call::PushEnd(..) => "push_end",
                _ => "other",
            })
            .collect()
    }

    #[test]
    fn test_transfer_completes_after_length_over_rate() {
        let mut bench = bench(vec![Packet::zeroed("data", 100)], true);
        assert!(server(&bench).is_streaming());
        assert_eq!(kinds(&bench.log), vec!["pull_start", "push_start"]);
        assert_eq!(server(&bench).stats().packets, 1);

        bench.net.run_until(SimTime::from_secs(9)).unwrap();
        assert!(server(&bench).is_streaming());

        let fired = bench.net.run_until(SimTime::from_secs(10)).unwrap();
        assert_eq!(fired, 1);
        assert!(!server(&bench).is_streaming());
        assert_eq!(kinds(&bench.log), vec!["pull_start", "push_start", "pull_end", "push_end"]);

        let consumer = bench.net.element::<RecordingConsumer>(bench.consumer).unwrap();
        assert_eq!(consumer.received.len(), 1);
        assert_eq!(consumer.received[0].total_length().whole_bytes(), 100);
    }

    #[test]
    fn test_push_notification_while_streaming_preempts() {
        let mut bench = bench(vec![Packet::zeroed("data", 100)], true);
        bench.net.run_until(SimTime::from_secs(4)).unwrap();

        bench
            .net
            .notify_can_push_packet_changed(EdgeBinding::new(bench.server, 0))
            .unwrap();

        assert!(!server(&bench).is_streaming());
        assert_eq!(server(&bench).preemptions(), 1);
        assert_eq!(kinds(&bench.log), vec!["pull_start", "push_start", "pull_end", "push_end"]);
        assert_eq!(bench.net.now(), SimTime::from_secs(4));
        assert_eq!(bench.net.pending_events(), 0);

        let fired = bench.net.run_until(SimTime::from_secs(20)).unwrap();
        assert_eq!(fired, 0);
        assert_eq!(bench.log.len(), 4);
    }

    #[test]
    fn test_pull_notification_while_streaming_preempts() {
        let mut bench = bench(vec![Packet::zeroed("data", 100)], true);
        bench.net.run_for(Duration::from_secs(2)).unwrap();

        bench
            .net
            .notify_can_pull_packet_changed(EdgeBinding::new(bench.server, 0))
            .unwrap();

        assert!(!server(&bench).is_streaming());
        assert_eq!(bench.net.run_until(SimTime::from_secs(20)).unwrap(), 0);
    }

    #[test]
    fn test_idle_server_with_empty_upstream_stays_idle() {
        let mut bench = bench(Vec::new(), true);
        assert!(!server(&bench).is_streaming());

        bench
            .net
            .notify_can_push_packet_changed(EdgeBinding::new(bench.server, 0))
            .unwrap();

        assert!(!server(&bench).is_streaming());
        assert!(bench.log.calls().is_empty());
        assert_eq!(bench.net.pending_events(), 0);
    }

    #[test]
    fn test_notification_starts_when_downstream_becomes_ready() {
        let mut bench = bench(vec![Packet::zeroed("data", 10)], false);
        assert!(!server(&bench).is_streaming());

        let accepting = bench
            .net
            .element::<RecordingConsumer>(bench.consumer)
            .unwrap()
            .accepting
            .clone();
        accepting.set(true);
        bench
            .net
            .notify_can_push_packet_changed(EdgeBinding::new(bench.server, 0))
            .unwrap();

        assert!(server(&bench).is_streaming());
        assert_eq!(bench.net.pending_events(), 1);
    }

    #[test]
    fn test_push_processed_finalizes_upstream_only() {
        let packet = Packet::zeroed("data", 100);
        let info = packet.info();
        let mut bench = bench(vec![packet], true);

        bench
            .net
            .notify_push_packet_processed(EdgeBinding::new(bench.server, 0), info, true)
            .unwrap();

        assert!(server(&bench).is_streaming());
        assert_eq!(kinds(&bench.log), vec!["pull_start", "push_start", "pull_end"]);

        bench.net.run_until(SimTime::from_secs(10)).unwrap();
        assert_eq!(
            kinds(&bench.log),
            vec!["pull_start", "push_start", "pull_end", "push_end"]
        );
    }

    #[test]
    fn test_failed_preemption_still_cancels_timer() {
        let log = CallLog::default();
        let mut net = Network::new();
        let provider = ScriptedProvider::new("provider", &log, vec![Packet::zeroed("data", 100)])
            .with_end_packet(Packet::zeroed("foreign", 100));
        let provider = net.add(provider);
        let config = ServerConfig {
            datarate: Datarate::bytes_per_sec(10.0),
        };
        let server = net.add(PreemptingServer::new("server", config).unwrap());
        let flow = net.add(PacketFlow::new("flow"));
        let consumer = net.add(RecordingConsumer::new("consumer", &log));
        net.link(provider, server).unwrap();
        net.link(server, flow).unwrap();
        net.link(flow, consumer).unwrap();
        net.initialize().unwrap();
        net.run_until(SimTime::from_secs(4)).unwrap();

        let error = net
            .notify_can_push_packet_changed(EdgeBinding::new(server, 0))
            .unwrap_err();

        assert!(matches!(error, FlowError::StreamingInProgress { .. }));
        let server = net.element::<PreemptingServer>(server).unwrap();
        assert!(!server.is_streaming());
        assert_eq!(server.preemptions(), 0);
        assert_eq!(net.pending_events(), 0);
        assert_eq!(net.run_until(SimTime::from_secs(20)).unwrap(), 0);
    }

    #[test]
    fn test_unrepresentable_transfer_time_is_an_error() {
        let log = CallLog::default();
        let mut net = Network::new();
        let provider = net.add(ScriptedProvider::new("provider", &log, vec![Packet::zeroed("data", 100)]));
        let config = ServerConfig {
            datarate: Datarate::bps(1e-20),
        };
        let server = net.add(PreemptingServer::new("server", config).unwrap());
        let consumer = net.add(RecordingConsumer::new("consumer", &log));
        net.link(provider, server).unwrap();
        net.link(server, consumer).unwrap();

        let error = net.initialize().unwrap_err();
        assert!(matches!(error, FlowError::TransmissionTooLong { .. }));
        assert_eq!(net.pending_events(), 0);
    }

    #[test]
    fn test_unbound_provider_fails_initialization() {
        let log = CallLog::default();
        let mut net = Network::new();
        let server = net
            .add(PreemptingServer::new("server", ServerConfig::default()).unwrap());
        let consumer = net.add(RecordingConsumer::new("consumer", &log));
        net.link(server, consumer).unwrap();

        let error = net.initialize().unwrap_err();
        assert!(matches!(
            error,
            FlowError::MissingBinding { capability: Capability::Provider, .. }
        ));
    }

    #[test]
    fn test_invalid_rate_rejected() {
        let config = ServerConfig {
            datarate: Datarate::bps(0.0),
        };
        assert!(PreemptingServer::new("server", config).is_err());
    }
}
