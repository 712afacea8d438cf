//! Arena of elements wired gate to gate, with synchronous call dispatch and a
//! discrete event loop.
//!
//! # Dispatch model
//!
//! Elements live in slots indexed by [`ElementId`]. While an element executes
//! an operation it is checked out of its slot, so a push or pull that reaches
//! an element already on the call stack fails with
//! [`FlowError::Reentrant`] instead of aliasing it.
//!
//! Notifications (`can push/pull changed`, `processed`) are never delivered
//! inside an operation. They are queued and delivered in FIFO order when the
//! outermost call returns, each delivery again running to completion. A fatal
//! error discards whatever the aborted chain had queued.

use std::collections::VecDeque;
use std::time::Duration;

use flowline_core::{
    Bits, Capability, Datarate, ElementId, FlowError, GateIndex, Packet, PacketInfo, Result,
    Scheduler, SimTime, TimerEvent, TimerHandle, TimerKind,
};
use log::{debug, info, trace, warn};

use crate::capability::{Collector, Consumer, Producer, Provider};
use crate::element::{Capabilities, EdgeBinding, Edges, Element, Neighbor};
use crate::scheduler::EventQueue;

/// Observable events emitted by elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowSignal {
    PacketPushedIn,
    PacketPushedOut,
    PacketPulledIn,
    PacketPulledOut,
    PacketDropped,
    PacketProcessed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalRecord {
    pub time: SimTime,
    pub source: ElementId,
    pub signal: FlowSignal,
    pub packet: PacketInfo,
}

type Listener = Box<dyn FnMut(&SignalRecord)>;

#[derive(Debug, Clone, Copy)]
enum Notification {
    CanPushPacketChanged { to: EdgeBinding },
    PushPacketProcessed { to: EdgeBinding, packet: PacketInfo, successful: bool },
    CanPullPacketChanged { to: EdgeBinding },
    PullPacketProcessed { to: EdgeBinding, packet: PacketInfo, successful: bool },
}

struct Slot {
    name: String,
    element: Option<Box<dyn Element>>,
    inputs: Vec<Option<EdgeBinding>>,
    outputs: Vec<Option<EdgeBinding>>,
}

pub struct Network {
    slots: Vec<Slot>,
    clock: EventQueue,
    pending: VecDeque<Notification>,
    listeners: Vec<Listener>,
    depth: usize,
    flushing: bool,
    initialized: bool,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            clock: EventQueue::new(),
            pending: VecDeque::new(),
            listeners: Vec::new(),
            depth: 0,
            flushing: false,
            initialized: false,
        }
    }

    // --- topology

    pub fn add<E: Element>(&mut self, element: E) -> ElementId {
        let id = ElementId(self.slots.len());
        let (inputs, outputs) = element.gate_counts();
        debug!("Adding element {} as {}", element.name(), id);
        self.slots.push(Slot {
            name: element.name().to_owned(),
            element: Some(Box::new(element)),
            inputs: vec![None; inputs],
            outputs: vec![None; outputs],
        });
        id
    }

    /// Connects output gate `out_gate` of `from` to input gate `in_gate` of `to`.
    pub fn connect(&mut self, from: ElementId, out_gate: GateIndex, to: ElementId, in_gate: GateIndex) -> Result<()> {
        self.slot(from)?;
        self.slot(to)?;
        let output_free = matches!(self.slots[from.index()].outputs.get(out_gate), Some(None));
        if !output_free {
            return Err(FlowError::InvalidGate { element: from, gate: out_gate });
        }
        let input_free = matches!(self.slots[to.index()].inputs.get(in_gate), Some(None));
        if !input_free {
            return Err(FlowError::InvalidGate { element: to, gate: in_gate });
        }
        self.slots[from.index()].outputs[out_gate] = Some(EdgeBinding::new(to, in_gate));
        self.slots[to.index()].inputs[in_gate] = Some(EdgeBinding::new(from, out_gate));
        debug!(
            "Connected {}.out[{}] -> {}.in[{}]",
            self.slots[from.index()].name,
            out_gate,
            self.slots[to.index()].name,
            in_gate
        );
        Ok(())
    }

    /// Connects gate 0 to gate 0.
    pub fn link(&mut self, from: ElementId, to: ElementId) -> Result<()> {
        self.connect(from, 0, to, 0)
    }

    /// Resolves every binding, checks that each connection supports push or
    /// pull, then initializes the elements in insertion order.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        let mut capabilities = Vec::with_capacity(self.slots.len());
        for slot in &mut self.slots {
            let element = slot
                .element
                .as_deref_mut()
                .ok_or(FlowError::Reentrant(ElementId(capabilities.len())))?;
            capabilities.push(Capabilities::of(element));
        }

        for (index, slot) in self.slots.iter().enumerate() {
            for peer in slot.outputs.iter().flatten() {
                let upstream = capabilities[index];
                let downstream = capabilities[peer.element.index()];
                let push = upstream.producer && downstream.consumer;
                let pull = upstream.provider && downstream.collector;
                if !push && !pull {
                    return Err(FlowError::IncompatibleConnection {
                        from: slot.name.clone(),
                        to: self.slots[peer.element.index()].name.clone(),
                    });
                }
            }
        }

        for index in 0..self.slots.len() {
            let resolve = |side: &[Option<EdgeBinding>]| -> Vec<Option<Neighbor>> {
                side.iter()
                    .map(|peer| {
                        peer.map(|binding| Neighbor {
                            binding,
                            capabilities: capabilities[binding.element.index()],
                        })
                    })
                    .collect()
            };
            let edges = Edges {
                inputs: resolve(&self.slots[index].inputs),
                outputs: resolve(&self.slots[index].outputs),
            };
            if let Some(element) = self.slots[index].element.as_deref_mut() {
                element.bind(ElementId(index), &edges);
            }
        }

        self.initialized = true;
        for index in 0..self.slots.len() {
            self.dispatch(ElementId(index), |element, net| element.initialize(net))?;
        }
        info!("Network initialized with {} elements", self.slots.len());
        Ok(())
    }

    pub fn element<T: Element>(&self, id: ElementId) -> Option<&T> {
        let element: &dyn Element = self.slots.get(id.index())?.element.as_deref()?;
        element.as_any().downcast_ref::<T>()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    // --- time

    pub fn now(&self) -> SimTime {
        self.clock.now()
    }

    pub fn schedule_after(&mut self, owner: ElementId, delay: Duration, kind: TimerKind) -> TimerHandle {
        self.clock.schedule_after(delay, TimerEvent { owner, kind })
    }

    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.clock.cancel(handle)
    }

    pub fn is_scheduled(&self, handle: TimerHandle) -> bool {
        self.clock.is_scheduled(handle)
    }

    pub fn pending_events(&self) -> usize {
        self.clock.len()
    }

    pub fn next_event_time(&mut self) -> Option<SimTime> {
        self.clock.next_event_time()
    }

    /// Fires every timer due up to and including `limit`, then moves the
    /// clock to `limit`. Returns the number of fired timers.
    pub fn run_until(&mut self, limit: SimTime) -> Result<usize> {
        let mut fired = 0;
        while let Some(event) = self.clock.pop_due(limit) {
            self.fire(event)?;
            fired += 1;
        }
        self.clock.advance_to(limit);
        Ok(fired)
    }

    pub fn run_for(&mut self, duration: Duration) -> Result<usize> {
        let limit = self.now() + duration;
        self.run_until(limit)
    }

    /// Fires the next pending timer, if any.
    pub fn step(&mut self) -> Result<bool> {
        let Some(at) = self.clock.next_event_time() else {
            return Ok(false);
        };
        match self.clock.pop_due(at) {
            Some(event) => self.fire(event).map(|_| true),
            None => Ok(false),
        }
    }

    fn fire(&mut self, event: TimerEvent) -> Result<()> {
        trace!("Firing timer {} of element {} at {}", event.kind, event.owner, self.now());
        self.dispatch(event.owner, |element, net| element.handle_timer(net, event.kind))
    }

    // --- signals

    pub fn subscribe(&mut self, listener: impl FnMut(&SignalRecord) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn emit(&mut self, source: ElementId, signal: FlowSignal, packet: &Packet) {
        let record = SignalRecord {
            time: self.now(),
            source,
            signal,
            packet: packet.info(),
        };
        for listener in &mut self.listeners {
            listener(&record);
        }
    }

    // --- push direction

    pub fn can_push_some_packet(&mut self, to: EdgeBinding) -> Result<bool> {
        self.dispatch(to.element, |element, net| {
            consumer_of(element, to.element)?.can_push_some_packet(net, to.gate)
        })
    }

    pub fn can_push_packet(&mut self, to: EdgeBinding, packet: &Packet) -> Result<bool> {
        self.dispatch(to.element, |element, net| {
            consumer_of(element, to.element)?.can_push_packet(net, to.gate, packet)
        })
    }

    pub fn push_packet(&mut self, to: EdgeBinding, packet: Packet) -> Result<()> {
        trace!("Pushing {} into {}", packet, to.element);
        self.dispatch(to.element, |element, net| {
            consumer_of(element, to.element)?.push_packet(net, to.gate, packet)
        })
    }

    pub fn push_packet_start(&mut self, to: EdgeBinding, packet: Packet, datarate: Datarate) -> Result<()> {
        trace!("Pushing start of {} into {} at {}", packet, to.element, datarate);
        self.dispatch(to.element, |element, net| {
            consumer_of(element, to.element)?.push_packet_start(net, to.gate, packet, datarate)
        })
    }

    pub fn push_packet_progress(
        &mut self,
        to: EdgeBinding,
        packet: Packet,
        datarate: Datarate,
        position: Bits,
        extra_length: Bits,
    ) -> Result<()> {
        trace!("Pushing progress of {} into {} at {}", packet, to.element, position);
        self.dispatch(to.element, |element, net| {
            consumer_of(element, to.element)?.push_packet_progress(
                net,
                to.gate,
                packet,
                datarate,
                position,
                extra_length,
            )
        })
    }

    pub fn push_packet_end(&mut self, to: EdgeBinding, packet: Packet) -> Result<()> {
        trace!("Pushing end of {} into {}", packet, to.element);
        self.dispatch(to.element, |element, net| {
            consumer_of(element, to.element)?.push_packet_end(net, to.gate, packet)
        })
    }

    // --- pull direction

    pub fn can_pull_some_packet(&mut self, from: EdgeBinding) -> Result<bool> {
        self.dispatch(from.element, |element, net| {
            provider_of(element, from.element)?.can_pull_some_packet(net, from.gate)
        })
    }

    pub fn pull_packet(&mut self, from: EdgeBinding) -> Result<Packet> {
        trace!("Pulling from {}", from.element);
        self.dispatch(from.element, |element, net| {
            provider_of(element, from.element)?.pull_packet(net, from.gate)
        })
    }

    pub fn pull_packet_start(&mut self, from: EdgeBinding, datarate: Datarate) -> Result<Packet> {
        trace!("Pulling start from {} at {}", from.element, datarate);
        self.dispatch(from.element, |element, net| {
            provider_of(element, from.element)?.pull_packet_start(net, from.gate, datarate)
        })
    }

    pub fn pull_packet_progress(
        &mut self,
        from: EdgeBinding,
        datarate: Datarate,
        position: Bits,
        extra_length: Bits,
    ) -> Result<Packet> {
        trace!("Pulling progress from {} at {}", from.element, position);
        self.dispatch(from.element, |element, net| {
            provider_of(element, from.element)?.pull_packet_progress(
                net,
                from.gate,
                datarate,
                position,
                extra_length,
            )
        })
    }

    pub fn pull_packet_end(&mut self, from: EdgeBinding) -> Result<Packet> {
        trace!("Pulling end from {}", from.element);
        self.dispatch(from.element, |element, net| {
            provider_of(element, from.element)?.pull_packet_end(net, from.gate)
        })
    }

    // --- notifications

    /// Tells a producer that its consumer's push capability changed.
    pub fn notify_can_push_packet_changed(&mut self, to: EdgeBinding) -> Result<()> {
        self.enqueue(Notification::CanPushPacketChanged { to })
    }

    pub fn notify_push_packet_processed(&mut self, to: EdgeBinding, packet: PacketInfo, successful: bool) -> Result<()> {
        self.enqueue(Notification::PushPacketProcessed { to, packet, successful })
    }

    /// Tells a collector that its provider's pull capability changed.
    pub fn notify_can_pull_packet_changed(&mut self, to: EdgeBinding) -> Result<()> {
        self.enqueue(Notification::CanPullPacketChanged { to })
    }

    pub fn notify_pull_packet_processed(&mut self, to: EdgeBinding, packet: PacketInfo, successful: bool) -> Result<()> {
        self.enqueue(Notification::PullPacketProcessed { to, packet, successful })
    }

    fn enqueue(&mut self, notification: Notification) -> Result<()> {
        trace!("Queueing {:?}", notification);
        self.pending.push_back(notification);
        if self.depth == 0 {
            self.flush_notifications()
        } else {
            Ok(())
        }
    }

    fn flush_notifications(&mut self) -> Result<()> {
        if self.flushing {
            return Ok(());
        }
        self.flushing = true;
        let mut result = Ok(());
        while let Some(notification) = self.pending.pop_front() {
            result = self.deliver(notification);
            if result.is_err() {
                break;
            }
        }
        self.flushing = false;
        if result.is_err() {
            self.discard_pending();
        }
        result
    }

    fn deliver(&mut self, notification: Notification) -> Result<()> {
        match notification {
            Notification::CanPushPacketChanged { to } => self.dispatch(to.element, |element, net| {
                producer_of(element, to.element)?.handle_can_push_packet_changed(net, to.gate)
            }),
            Notification::PushPacketProcessed { to, packet, successful } => {
                self.dispatch(to.element, |element, net| {
                    producer_of(element, to.element)?.handle_push_packet_processed(net, to.gate, packet, successful)
                })
            }
            Notification::CanPullPacketChanged { to } => self.dispatch(to.element, |element, net| {
                collector_of(element, to.element)?.handle_can_pull_packet_changed(net, to.gate)
            }),
            Notification::PullPacketProcessed { to, packet, successful } => {
                self.dispatch(to.element, |element, net| {
                    collector_of(element, to.element)?.handle_pull_packet_processed(net, to.gate, packet, successful)
                })
            }
        }
    }

    fn discard_pending(&mut self) {
        if !self.pending.is_empty() {
            warn!("Discarding {} pending notifications of an aborted call chain", self.pending.len());
            self.pending.clear();
        }
    }

    // --- dispatch

    fn slot(&self, id: ElementId) -> Result<&Slot> {
        self.slots.get(id.index()).ok_or(FlowError::UnknownElement(id))
    }

    fn dispatch<R>(
        &mut self,
        id: ElementId,
        call: impl FnOnce(&mut dyn Element, &mut Network) -> Result<R>,
    ) -> Result<R> {
        let slot = self
            .slots
            .get_mut(id.index())
            .ok_or(FlowError::UnknownElement(id))?;
        let mut element = slot.element.take().ok_or(FlowError::Reentrant(id))?;

        self.depth += 1;
        let result = call(&mut *element, self);
        self.depth -= 1;
        self.slots[id.index()].element = Some(element);

        if self.depth == 0 {
            match &result {
                Ok(_) => self.flush_notifications()?,
                Err(error) => {
                    debug!("Call into {} failed: {}", self.slots[id.index()].name, error);
                    if !self.flushing {
                        self.discard_pending();
                    }
                }
            }
        }
        result
    }
}

fn producer_of(element: &mut dyn Element, id: ElementId) -> Result<&mut dyn Producer> {
    element
        .as_producer()
        .ok_or(FlowError::Unsupported(id, Capability::Producer))
}

fn consumer_of(element: &mut dyn Element, id: ElementId) -> Result<&mut dyn Consumer> {
    element
        .as_consumer()
        .ok_or(FlowError::Unsupported(id, Capability::Consumer))
}

fn provider_of(element: &mut dyn Element, id: ElementId) -> Result<&mut dyn Provider> {
    element
        .as_provider()
        .ok_or(FlowError::Unsupported(id, Capability::Provider))
}

fn collector_of(element: &mut dyn Element, id: ElementId) -> Result<&mut dyn Collector> {
    element
        .as_collector()
        .ok_or(FlowError::Unsupported(id, Capability::Collector))
}
