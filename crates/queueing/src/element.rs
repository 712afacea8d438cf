//! Element trait, edge bindings and per-element bookkeeping.

use std::any::Any;

use flowline_core::{
    Bits, Capability, ElementId, FlowError, GateIndex, Packet, Result, TimerKind,
};

use crate::capability::{Collector, Consumer, Producer, Provider};
use crate::network::Network;

pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A neighbor as seen from one gate: the neighbor element and the gate on
/// the neighbor's side of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeBinding {
    pub element: ElementId,
    pub gate: GateIndex,
}

impl EdgeBinding {
    pub fn new(element: ElementId, gate: GateIndex) -> Self {
        Self { element, gate }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub producer: bool,
    pub consumer: bool,
    pub provider: bool,
    pub collector: bool,
}

impl Capabilities {
    pub fn of(element: &mut dyn Element) -> Self {
        Self {
            producer: element.as_producer().is_some(),
            consumer: element.as_consumer().is_some(),
            provider: element.as_provider().is_some(),
            collector: element.as_collector().is_some(),
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Producer => self.producer,
            Capability::Consumer => self.consumer,
            Capability::Provider => self.provider,
            Capability::Collector => self.collector,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    pub binding: EdgeBinding,
    pub capabilities: Capabilities,
}

/// Neighbors of every gate of one element, resolved once at initialization.
///
/// Producers and providers are looked up on input gates, consumers and
/// collectors on output gates. A lookup yields `None` when the gate is not
/// connected or the neighbor lacks the capability.
#[derive(Debug, Clone, Default)]
pub struct Edges {
    pub inputs: Vec<Option<Neighbor>>,
    pub outputs: Vec<Option<Neighbor>>,
}

impl Edges {
    pub fn producer(&self, gate: GateIndex) -> Option<EdgeBinding> {
        Self::find(&self.inputs, gate, Capability::Producer)
    }

    pub fn provider(&self, gate: GateIndex) -> Option<EdgeBinding> {
        Self::find(&self.inputs, gate, Capability::Provider)
    }

    pub fn consumer(&self, gate: GateIndex) -> Option<EdgeBinding> {
        Self::find(&self.outputs, gate, Capability::Consumer)
    }

    pub fn collector(&self, gate: GateIndex) -> Option<EdgeBinding> {
        Self::find(&self.outputs, gate, Capability::Collector)
    }

    fn find(side: &[Option<Neighbor>], gate: GateIndex, capability: Capability) -> Option<EdgeBinding> {
        side.get(gate)
            .copied()
            .flatten()
            .filter(|neighbor| neighbor.capabilities.has(capability))
            .map(|neighbor| neighbor.binding)
    }
}

/// Anything that can live in a [`Network`].
///
/// The `as_*` accessors advertise which capability interfaces the element
/// implements; the network uses them both to resolve bindings and to dispatch
/// calls.
pub trait Element: AsAny {
    fn name(&self) -> &str;

    /// Number of `(input, output)` gates.
    fn gate_counts(&self) -> (usize, usize) {
        (1, 1)
    }

    fn bind(&mut self, id: ElementId, edges: &Edges);

    fn initialize(&mut self, _net: &mut Network) -> Result<()> {
        Ok(())
    }

    fn handle_timer(&mut self, _net: &mut Network, timer: TimerKind) -> Result<()> {
        Err(FlowError::UnexpectedTimer {
            element: self.name().to_owned(),
            timer,
        })
    }

    fn as_producer(&mut self) -> Option<&mut dyn Producer> {
        None
    }

    fn as_consumer(&mut self) -> Option<&mut dyn Consumer> {
        None
    }

    fn as_provider(&mut self) -> Option<&mut dyn Provider> {
        None
    }

    fn as_collector(&mut self) -> Option<&mut dyn Collector> {
        None
    }
}

/// Processed packet counters kept by every element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingStats {
    pub packets: u64,
    pub total_length: Bits,
}

impl ProcessingStats {
    pub fn record(&mut self, packet: &Packet) {
        self.packets += 1;
        self.total_length += packet.total_length();
    }
}

pub(crate) fn missing_binding(element: &str, capability: Capability) -> FlowError {
    FlowError::MissingBinding {
        element: element.to_owned(),
        capability,
    }
}

pub(crate) fn invalid_operation(element: &str, operation: &'static str) -> FlowError {
    FlowError::InvalidOperation {
        element: element.to_owned(),
        operation,
    }
}
