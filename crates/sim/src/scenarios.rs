//! Conveyor topologies and the loop that drives them.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Result;
use flowline_queueing::{
    ActivePacketSource, Bits, ConsumedPacket, ElementId, FlowSignal, Network, PacketDestreamer,
    PacketFlow, PacketQueue, PassivePacketSink, PreemptableStreamer, PreemptingServer,
    PriorityScheduler, SimTime, StreamerConfig,
};
use log::{debug, info};

use crate::ScenarioConfig;

/// A wired but not yet initialized network plus the elements worth reporting on.
pub struct Scenario {
    pub name: &'static str,
    pub net: Network,
    pub server: ElementId,
    pub sink: ElementId,
    pub queues: Vec<ElementId>,
}

#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub name: &'static str,
    pub sim_time: SimTime,
    pub events: usize,
    pub delivered: Vec<ConsumedPacket>,
    pub preemptions: u64,
    pub dropped: u64,
    pub signals: HashMap<FlowSignal, u64>,
}

impl ScenarioReport {
    pub fn delivered_length(&self) -> Bits {
        self.delivered
            .iter()
            .fold(Bits::ZERO, |total, packet| total + packet.info.total_length)
    }

    /// Delivered packets that are a piece of a preempted original.
    pub fn fragments(&self) -> usize {
        self.delivered
            .iter()
            .filter(|packet| packet.fragment.is_some_and(|tag| !(tag.first && tag.last)))
            .count()
    }

    /// Delivered payload rate over the whole run, in bits per second.
    pub fn goodput_bps(&self) -> f64 {
        let secs = self.sim_time.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.delivered_length().bits() as f64 / secs
    }
}

/// bulk source -> ingress -> queue -> streamer -> server -> destreamer -> sink
pub fn relay(config: &ScenarioConfig) -> Result<Scenario> {
    let mut net = Network::new();
    let source = net.add(ActivePacketSource::new("bulk", config.bulk.clone())?);
    let ingress = net.add(PacketFlow::new("ingress"));
    let queue = net.add(PacketQueue::new("bulk-queue", config.bulk_queue.clone())?);
    let streamer = net.add(PreemptableStreamer::new("streamer", config.streamer.clone())?);
    let server = net.add(PreemptingServer::new("server", config.server.clone())?);
    let destreamer = net.add(PacketDestreamer::new("destreamer"));
    let sink = net.add(PassivePacketSink::new("sink", config.sink.clone())?);

    for pair in [source, ingress, queue, streamer, server, destreamer, sink].windows(2) {
        net.link(pair[0], pair[1])?;
    }

    Ok(Scenario {
        name: "relay",
        net,
        server,
        sink,
        queues: vec![queue],
    })
}

/// Two traffic classes sharing one preempting server; express traffic is
/// served first and cuts bulk transfers short.
pub fn preemption(config: &ScenarioConfig) -> Result<Scenario> {
    let mut net = Network::new();

    let express = net.add(ActivePacketSource::new("express", config.express.clone())?);
    let express_queue = net.add(PacketQueue::new("express-queue", config.express_queue.clone())?);
    // express packets are never cut
    let express_streamer = net.add(PreemptableStreamer::new(
        "express-streamer",
        StreamerConfig {
            min_packet_length: Bits::from_bytes(config.express.packet_length as u64),
            ..config.streamer.clone()
        },
    )?);

    let bulk = net.add(ActivePacketSource::new("bulk", config.bulk.clone())?);
    let bulk_queue = net.add(PacketQueue::new("bulk-queue", config.bulk_queue.clone())?);
    let bulk_streamer = net.add(PreemptableStreamer::new("bulk-streamer", config.streamer.clone())?);

    let scheduler = net.add(PriorityScheduler::new("scheduler", 2));
    let server = net.add(PreemptingServer::new("server", config.server.clone())?);
    let destreamer = net.add(PacketDestreamer::new("destreamer"));
    let sink = net.add(PassivePacketSink::new("sink", config.sink.clone())?);

    net.link(express, express_queue)?;
    net.link(express_queue, express_streamer)?;
    net.connect(express_streamer, 0, scheduler, 0)?;
    net.link(bulk, bulk_queue)?;
    net.link(bulk_queue, bulk_streamer)?;
    net.connect(bulk_streamer, 0, scheduler, 1)?;
    net.link(scheduler, server)?;
    net.link(server, destreamer)?;
    net.link(destreamer, sink)?;

    Ok(Scenario {
        name: "preemption",
        net,
        server,
        sink,
        queues: vec![express_queue, bulk_queue],
    })
}

/// Runs the scenario for `duration` of simulated time. With `pacing` set,
/// simulated time is slowed to `pacing` times wall-clock speed.
pub async fn run(scenario: Scenario, duration: Duration, pacing: Option<f64>) -> Result<ScenarioReport> {
    let Scenario {
        name,
        mut net,
        server,
        sink,
        queues,
    } = scenario;

    let signals = Rc::new(RefCell::new(HashMap::new()));
    let counter = signals.clone();
    net.subscribe(move |record| {
        *counter.borrow_mut().entry(record.signal).or_insert(0) += 1;
    });

    net.initialize()?;
    info!("Running {} for {:?}", name, duration);

    let until = SimTime::from_duration(duration);
    let events = match pacing {
        Some(speed) => drive_paced(&mut net, until, speed).await?,
        None => net.run_until(until)?,
    };

    let preemptions = net
        .element::<PreemptingServer>(server)
        .map_or(0, PreemptingServer::preemptions);
    let delivered = net
        .element::<PassivePacketSink>(sink)
        .map(|sink| sink.consumed().to_vec())
        .unwrap_or_default();
    let dropped = queues
        .iter()
        .filter_map(|&queue| net.element::<PacketQueue>(queue))
        .map(PacketQueue::dropped)
        .sum();
    let signals = signals.borrow().clone();

    Ok(ScenarioReport {
        name,
        sim_time: net.now(),
        events,
        delivered,
        preemptions,
        dropped,
        signals,
    })
}

async fn drive_paced(net: &mut Network, until: SimTime, speed: f64) -> Result<usize> {
    anyhow::ensure!(speed > 0.0, "pacing factor must be positive");
    let mut fired = 0;
    while let Some(next) = net.next_event_time() {
        if next > until {
            break;
        }
        let gap = next - net.now();
        if !gap.is_zero() {
            debug!("Sleeping {:?} until {}", gap.div_f64(speed), next);
            tokio::time::sleep(gap.div_f64(speed)).await;
        }
        if net.step()? {
            fired += 1;
        }
    }
    fired += net.run_until(until)?;
    Ok(fired)
}
