//! The unit moved through every element.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::{Bits, PacketId, TransmissionId, TreeId};

static NEXT_PACKET_ID: AtomicU64 = AtomicU64::new(1);

fn next_packet_id() -> u64 {
    NEXT_PACKET_ID.fetch_add(1, Ordering::Relaxed)
}

/// Position of a packet within a preempted original.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentTag {
    pub first: bool,
    pub last: bool,
    pub number: u32,
}

impl FragmentTag {
    /// Tag of a packet that was never split.
    pub fn whole() -> Self {
        Self {
            first: true,
            last: true,
            number: 0,
        }
    }
}

/// Copyable summary of a packet, used where the packet itself is not handed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketInfo {
    pub id: PacketId,
    pub tree_id: TreeId,
    pub transmission_id: TransmissionId,
    pub total_length: Bits,
}

/// An exclusively owned packet.
///
/// `Packet` is deliberately not `Clone`: handing it to a neighbor moves it.
/// [`Packet::dup`] creates a second packet object that shares the tree and
/// transmission identities of the original, which is what streaming elements
/// send downstream while they keep the original.
#[derive(Debug)]
pub struct Packet {
    id: PacketId,
    tree_id: TreeId,
    transmission_id: TransmissionId,
    name: String,
    data: Bytes,
    fragment: Option<FragmentTag>,
}

impl Packet {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let id = next_packet_id();
        Self {
            id: PacketId(id),
            tree_id: TreeId(id),
            transmission_id: TransmissionId(id),
            name: name.into(),
            data: data.into(),
            fragment: None,
        }
    }

    /// A packet carrying `len` zero bytes.
    pub fn zeroed(name: impl Into<String>, len: usize) -> Self {
        Self::new(name, vec![0u8; len])
    }

    pub fn id(&self) -> PacketId {
        self.id
    }

    pub fn tree_id(&self) -> TreeId {
        self.tree_id
    }

    pub fn transmission_id(&self) -> TransmissionId {
        self.transmission_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn total_length(&self) -> Bits {
        Bits::from_bytes(self.data.len() as u64)
    }

    pub fn fragment(&self) -> Option<FragmentTag> {
        self.fragment
    }

    pub fn set_fragment(&mut self, fragment: Option<FragmentTag>) {
        self.fragment = fragment;
    }

    pub fn info(&self) -> PacketInfo {
        PacketInfo {
            id: self.id,
            tree_id: self.tree_id,
            transmission_id: self.transmission_id,
            total_length: self.total_length(),
        }
    }

    /// Duplicate with a fresh packet id and the same tree/transmission ids.
    pub fn dup(&self) -> Packet {
        Packet {
            id: PacketId(next_packet_id()),
            tree_id: self.tree_id,
            transmission_id: self.transmission_id,
            name: self.name.clone(),
            data: self.data.clone(),
            fragment: self.fragment,
        }
    }

    /// Keeps the first `keep` bytes and returns the removed tail.
    pub fn split_off_back(&mut self, keep: usize) -> Bytes {
        self.data.split_off(keep.min(self.data.len()))
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (id: {}, tree: {}, length: {})",
            self.name,
            self.id,
            self.tree_id,
            self.total_length()
        )
    }
}
