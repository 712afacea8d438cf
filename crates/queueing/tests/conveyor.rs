use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use flowline_queueing::{
    ActivePacketSource, Bits, Datarate, ElementId, FlowSignal, FragmentTag, Network, Packet,
    PacketDestreamer, PacketFlow, PacketQueue, PassivePacketSink, PreemptableStreamer,
    PreemptingServer, PriorityScheduler, ProductionInterval, QueueConfig, ServerConfig, SimTime,
    SinkConfig, SourceConfig, StreamerConfig,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn one_shot(name: &str, length: usize, at: Duration) -> SourceConfig {
    SourceConfig {
        packet_name: name.to_string(),
        packet_length: length,
        interval: ProductionInterval::Fixed { interval: at },
        seed: 1,
        limit: Some(1),
    }
}

fn server_at(bytes_per_sec: f64) -> ServerConfig {
    ServerConfig {
        datarate: Datarate::bytes_per_sec(bytes_per_sec),
    }
}

/// source -> tagger -> queue -> streamer -> server -> destreamer -> sink
#[test]
fn test_relay_delivers_every_packet_in_order() {
    init_logging();
    let mut net = Network::new();
    let source = net.add(
        ActivePacketSource::new(
            "source",
            SourceConfig {
                packet_name: "relay".into(),
                packet_length: 50,
                interval: ProductionInterval::Fixed {
                    interval: Duration::from_secs(1),
                },
                seed: 3,
                limit: Some(5),
            },
        )
        .unwrap(),
    );
    let tagger = net.add(PacketFlow::with_processor("tagger", |packet: &mut Packet| {
        let name = format!("{}-seen", packet.name());
        packet.set_name(name);
    }));
    let queue = net.add(PacketQueue::new("queue", QueueConfig::default()).unwrap());
    let streamer = net.add(PreemptableStreamer::new("streamer", StreamerConfig::default()).unwrap());
    let server = net.add(PreemptingServer::new("server", server_at(100.0)).unwrap());
    let destreamer = net.add(PacketDestreamer::new("destreamer"));
    let sink = net.add(PassivePacketSink::new("sink", SinkConfig::default()).unwrap());
    for pair in [source, tagger, queue, streamer, server, destreamer, sink].windows(2) {
        net.link(pair[0], pair[1]).unwrap();
    }
    net.initialize().unwrap();

    net.run_until(SimTime::from_secs(10)).unwrap();

    let consumed = net.element::<PassivePacketSink>(sink).unwrap().consumed();
    let names: Vec<_> = consumed.iter().map(|packet| packet.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["relay-0-seen", "relay-1-seen", "relay-2-seen", "relay-3-seen", "relay-4-seen"]
    );
    // each packet takes half a second on the wire
    let times: Vec<_> = consumed.iter().map(|packet| packet.time).collect();
    assert_eq!(times[0], SimTime::from_millis(1500));
    assert_eq!(times[4], SimTime::from_millis(5500));
    assert!(consumed
        .iter()
        .all(|packet| packet.info.total_length == Bits::from_bytes(50)));

    let server = net.element::<PreemptingServer>(server).unwrap();
    assert_eq!(server.stats().packets, 5);
    assert_eq!(server.preemptions(), 0);
    assert!(net.element::<PacketQueue>(queue).unwrap().is_empty());
    assert_eq!(net.element::<PacketFlow>(tagger).unwrap().stats().packets, 5);
}

struct PreemptionBench {
    net: Network,
    server: ElementId,
    sink: ElementId,
}

/// express source -> queue -> streamer -> scheduler.in[0]
/// bulk source    -> queue -> streamer -> scheduler.in[1]
/// scheduler -> server -> destreamer -> sink
fn preemption_bench(bulk_at: Duration, express_at: Duration) -> PreemptionBench {
    let mut net = Network::new();
    let express = net.add(ActivePacketSource::new("express", one_shot("express", 100, express_at)).unwrap());
    let express_queue = net.add(PacketQueue::new("express-queue", QueueConfig::default()).unwrap());
    let express_streamer = net.add(
        PreemptableStreamer::new(
            "express-streamer",
            StreamerConfig {
                min_packet_length: Bits::from_bytes(1 << 16),
                ..Default::default()
            },
        )
        .unwrap(),
    );
    let bulk = net.add(ActivePacketSource::new("bulk", one_shot("bulk", 1000, bulk_at)).unwrap());
    let bulk_queue = net.add(PacketQueue::new("bulk-queue", QueueConfig::default()).unwrap());
    let bulk_streamer = net.add(PreemptableStreamer::new("bulk-streamer", StreamerConfig::default()).unwrap());
    let scheduler = net.add(PriorityScheduler::new("scheduler", 2));
    let server = net.add(PreemptingServer::new("server", server_at(100.0)).unwrap());
    let destreamer = net.add(PacketDestreamer::new("destreamer"));
    let sink = net.add(PassivePacketSink::new("sink", SinkConfig::default()).unwrap());

    net.link(express, express_queue).unwrap();
    net.link(express_queue, express_streamer).unwrap();
    net.connect(express_streamer, 0, scheduler, 0).unwrap();
    net.link(bulk, bulk_queue).unwrap();
    net.link(bulk_queue, bulk_streamer).unwrap();
    net.connect(bulk_streamer, 0, scheduler, 1).unwrap();
    net.link(scheduler, server).unwrap();
    net.link(server, destreamer).unwrap();
    net.link(destreamer, sink).unwrap();
    net.initialize().unwrap();

    PreemptionBench { net, server, sink }
}

#[test]
fn test_express_packet_preempts_bulk_transfer() {
    init_logging();
    let mut bench = preemption_bench(Duration::from_secs(1), Duration::from_secs(3));
    let preempted = Rc::new(RefCell::new(Vec::new()));
    let seen = preempted.clone();
    let server_id = bench.server;
    bench.net.subscribe(move |record| {
        if record.source == server_id && record.signal == FlowSignal::PacketProcessed {
            seen.borrow_mut().push(record.time);
        }
    });

    bench.net.run_until(SimTime::from_secs(20)).unwrap();

    let consumed = bench.net.element::<PassivePacketSink>(bench.sink).unwrap().consumed();
    let summary: Vec<_> = consumed
        .iter()
        .map(|packet| (packet.name.as_str(), packet.info.total_length.whole_bytes(), packet.time))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("bulk-0-frag0", 200, SimTime::from_secs(3)),
            ("express-0", 100, SimTime::from_secs(4)),
            ("bulk-0-frag1", 800, SimTime::from_secs(12)),
        ]
    );
    assert_eq!(
        consumed[0].fragment,
        Some(FragmentTag {
            first: true,
            last: false,
            number: 0
        })
    );
    assert_eq!(consumed[1].fragment, Some(FragmentTag::whole()));
    assert_eq!(
        consumed[2].fragment,
        Some(FragmentTag {
            first: false,
            last: true,
            number: 1
        })
    );

    let server = bench.net.element::<PreemptingServer>(bench.server).unwrap();
    assert_eq!(server.preemptions(), 1);
    assert!(!server.is_streaming());
    assert_eq!(
        *preempted.borrow(),
        vec![SimTime::from_secs(1), SimTime::from_secs(3), SimTime::from_secs(4)]
    );
    assert_eq!(bench.net.pending_events(), 0);
}

#[test]
fn test_express_after_bulk_waits_its_turn() {
    init_logging();
    let mut bench = preemption_bench(Duration::from_secs(1), Duration::from_secs(30));

    bench.net.run_until(SimTime::from_secs(40)).unwrap();

    let consumed = bench.net.element::<PassivePacketSink>(bench.sink).unwrap().consumed();
    let summary: Vec<_> = consumed
        .iter()
        .map(|packet| (packet.name.as_str(), packet.time))
        .collect();
    assert_eq!(
        summary,
        vec![("bulk-0", SimTime::from_secs(11)), ("express-0", SimTime::from_secs(31))]
    );
    assert_eq!(
        bench.net.element::<PreemptingServer>(bench.server).unwrap().preemptions(),
        0
    );
}
