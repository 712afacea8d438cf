//! Timer driven packet generator.

use std::time::Duration;

use flowline_core::{
    Capability, ElementId, FlowError, GateIndex, Packet, PacketInfo, Result, TimerHandle, TimerKind,
};
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Exp};

use crate::capability::Producer;
use crate::config::{ProductionInterval, SourceConfig};
use crate::element::{missing_binding, EdgeBinding, Edges, Element};
use crate::network::{FlowSignal, Network};

pub const PRODUCTION_TIMER: TimerKind = 0;

pub struct ActivePacketSource {
    name: String,
    id: ElementId,
    config: SourceConfig,
    rng: StdRng,
    exponential: Option<Exp<f64>>,
    consumer: Option<EdgeBinding>,
    timer: Option<TimerHandle>,
    produced: u64,
}

impl ActivePacketSource {
    pub fn new(name: impl Into<String>, config: SourceConfig) -> Result<Self> {
        config.validate()?;
        let exponential = match config.interval {
            ProductionInterval::Exponential { mean } => Some(
                Exp::new(1.0 / mean.as_secs_f64())
                    .map_err(|err| FlowError::InvalidConfig(err.to_string()))?,
            ),
            ProductionInterval::Fixed { .. } => None,
        };
        Ok(Self {
            name: name.into(),
            id: ElementId(usize::MAX),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            exponential,
            consumer: None,
            timer: None,
            produced: 0,
        })
    }

    pub fn produced(&self) -> u64 {
        self.produced
    }

    fn exhausted(&self) -> bool {
        self.config.limit.is_some_and(|limit| self.produced >= limit)
    }

    fn next_interval(&mut self) -> Duration {
        match (self.config.interval, &self.exponential) {
            (ProductionInterval::Fixed { interval }, _) => interval,
            (ProductionInterval::Exponential { mean }, Some(exp)) => {
                Duration::from_secs_f64(exp.sample(&mut self.rng))
                    .max(Duration::from_nanos(1))
                    .min(mean.saturating_mul(1000))
            }
            (ProductionInterval::Exponential { mean }, None) => mean,
        }
    }

    fn schedule_production(&mut self, net: &mut Network) {
        if self.exhausted() {
            debug!("{} produced its last packet", self.name);
            return;
        }
        let delay = self.next_interval();
        trace!("{} next production in {:?}", self.name, delay);
        self.timer = Some(net.schedule_after(self.id, delay, PRODUCTION_TIMER));
    }

    fn produce_packet(&mut self, net: &mut Network) -> Result<()> {
        let consumer = self
            .consumer
            .ok_or_else(|| missing_binding(&self.name, Capability::Consumer))?;
        let packet = Packet::zeroed(
            format!("{}-{}", self.config.packet_name, self.produced),
            self.config.packet_length,
        );
        self.produced += 1;
        debug!("{} producing {}", self.name, packet);
        net.emit(self.id, FlowSignal::PacketPushedOut, &packet);
        net.push_packet(consumer, packet)
    }

    /// Produces now if the consumer accepts, then arms the next production.
    fn try_produce(&mut self, net: &mut Network) -> Result<()> {
        let consumer = self
            .consumer
            .ok_or_else(|| missing_binding(&self.name, Capability::Consumer))?;
        if self.exhausted() || !net.can_push_some_packet(consumer)? {
            return Ok(());
        }
        self.produce_packet(net)?;
        self.schedule_production(net);
        Ok(())
    }
}

impl Element for ActivePacketSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn gate_counts(&self) -> (usize, usize) {
        (0, 1)
    }

    fn bind(&mut self, id: ElementId, edges: &Edges) {
        self.id = id;
        self.consumer = edges.consumer(0);
    }

    fn initialize(&mut self, net: &mut Network) -> Result<()> {
        if self.consumer.is_none() {
            return Err(missing_binding(&self.name, Capability::Consumer));
        }
        self.schedule_production(net);
        Ok(())
    }

    fn handle_timer(&mut self, net: &mut Network, timer: TimerKind) -> Result<()> {
        match timer {
            PRODUCTION_TIMER => {
                self.timer = None;
                self.try_produce(net)
            }
            other => Err(FlowError::UnexpectedTimer {
                element: self.name.clone(),
                timer: other,
            }),
        }
    }

    fn as_producer(&mut self) -> Option<&mut dyn Producer> {
        Some(self)
    }
}

impl Producer for ActivePacketSource {
    fn handle_can_push_packet_changed(&mut self, net: &mut Network, _gate: GateIndex) -> Result<()> {
        // a pending production timer already covers the next packet
        if self.timer.is_some_and(|timer| net.is_scheduled(timer)) {
            return Ok(());
        }
        self.try_produce(net)
    }

    fn handle_push_packet_processed(
        &mut self,
        _net: &mut Network,
        _gate: GateIndex,
        packet: PacketInfo,
        successful: bool,
    ) -> Result<()> {
        trace!("{} packet {} processed: {}", self.name, packet.id, successful);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingConsumer;
    use crate::testing::CallLog;
    use flowline_core::SimTime;

    fn bench(config: SourceConfig) -> (Network, ElementId, ElementId) {
        let log = CallLog::default();
        let mut net = Network::new();
        let source = net.add(ActivePacketSource::new("source", config).unwrap());
        let consumer = net.add(RecordingConsumer::new("consumer", &log));
        net.link(source, consumer).unwrap();
        net.initialize().unwrap();
        (net, source, consumer)
    }

    #[test]
    fn test_fixed_interval_production() {
        let config = SourceConfig {
            interval: ProductionInterval::Fixed {
                interval: Duration::from_secs(1),
            },
            packet_length: 20,
            ..Default::default()
        };
        let (mut net, source, consumer) = bench(config);

        net.run_until(SimTime::from_millis(3500)).unwrap();

        let received = &net.element::<RecordingConsumer>(consumer).unwrap().received;
        assert_eq!(received.len(), 3);
        assert_eq!(received[0].name(), "data-0");
        assert_eq!(received[2].total_length().whole_bytes(), 20);
        assert_eq!(net.element::<ActivePacketSource>(source).unwrap().produced(), 3);
    }

    #[test]
    fn test_limit_stops_production() {
        let config = SourceConfig {
            limit: Some(2),
            ..Default::default()
        };
        let (mut net, _source, consumer) = bench(config);

        net.run_until(SimTime::from_secs(10)).unwrap();

        assert_eq!(net.element::<RecordingConsumer>(consumer).unwrap().received.len(), 2);
        assert_eq!(net.pending_events(), 0);
    }

    #[test]
    fn test_waits_for_back_pressure_release() {
        let config = SourceConfig {
            interval: ProductionInterval::Fixed {
                interval: Duration::from_secs(1),
            },
            ..Default::default()
        };
        let (mut net, source, consumer) = bench(config);
        let accepting = net.element::<RecordingConsumer>(consumer).unwrap().accepting.clone();
        accepting.set(false);

        net.run_until(SimTime::from_secs(5)).unwrap();
        assert_eq!(net.element::<RecordingConsumer>(consumer).unwrap().received.len(), 0);
        assert_eq!(net.pending_events(), 0);

        accepting.set(true);
        net.notify_can_push_packet_changed(EdgeBinding::new(source, 0)).unwrap();
        assert_eq!(net.element::<RecordingConsumer>(consumer).unwrap().received.len(), 1);
        assert_eq!(net.pending_events(), 1);
    }

    #[test]
    fn test_exponential_intervals_are_reproducible() {
        let config = SourceConfig {
            interval: ProductionInterval::Exponential {
                mean: Duration::from_millis(100),
            },
            seed: 7,
            ..Default::default()
        };
        let run = |config: SourceConfig| {
            let (mut net, source, _) = bench(config);
            net.run_until(SimTime::from_secs(5)).unwrap();
            net.element::<ActivePacketSource>(source).unwrap().produced()
        };

        let first = run(config.clone());
        assert_eq!(first, run(config));
        assert!(first > 10, "expected a steady stream, got {first}");
    }
}
