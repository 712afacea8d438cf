use thiserror::Error;

use crate::scheduler::TimerKind;
use crate::types::{Bits, Capability, Datarate, ElementId, GateIndex, TreeId};

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("another packet streaming operation is already in progress (open: {open}, requested: {requested:?})")]
    StreamingInProgress {
        open: TreeId,
        requested: Option<TreeId>,
    },

    #[error("{element}: no packet streaming operation is in progress")]
    NotStreaming { element: String },

    #[error("{element}: no {capability} is bound")]
    MissingBinding {
        element: String,
        capability: Capability,
    },

    #[error("{element}: invalid operation {operation}")]
    InvalidOperation {
        element: String,
        operation: &'static str,
    },

    #[error("element {0} is not a {1}")]
    Unsupported(ElementId, Capability),

    #[error("element {0} re-entered while busy")]
    Reentrant(ElementId),

    #[error("unknown element {0}")]
    UnknownElement(ElementId),

    #[error("gate {gate} of element {element} is invalid or already connected")]
    InvalidGate { element: ElementId, gate: GateIndex },

    #[error("{from} -> {to}: neither push nor pull is possible across this connection")]
    IncompatibleConnection { from: String, to: String },

    #[error("{element}: no packet available")]
    Empty { element: String },

    #[error("transmitting {length} at {datarate} takes longer than the clock can represent")]
    TransmissionTooLong { length: Bits, datarate: Datarate },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{element}: unexpected timer {timer}")]
    UnexpectedTimer { element: String, timer: TimerKind },
}

pub type Result<T> = std::result::Result<T, FlowError>;
