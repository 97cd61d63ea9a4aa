//! Packet lifecycle and ownership flags (§4.2).
//!
//! A plain `u16` bitset, mirroring the source's `mcreq_flags` enum exactly —
//! one bit per concern, tested and set independently.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags(u16);

impl PacketFlags {
    /// The key buffer is caller-owned; the allocator must not reclaim it.
    pub const KEY_NO_COPY: PacketFlags = PacketFlags(1 << 0);
    /// The value buffer is caller-owned.
    pub const VALUE_NO_COPY: PacketFlags = PacketFlags(1 << 1);
    /// The value is a scatter/gather list rather than one contiguous span.
    pub const VALUE_IOV: PacketFlags = PacketFlags(1 << 2);
    /// The packet carries a value at all.
    pub const HAS_VALUE: PacketFlags = PacketFlags(1 << 3);
    /// The packet's user data is the extended (heap-allocated) form.
    pub const REQ_EXT: PacketFlags = PacketFlags(1 << 4);
    /// A user-forwarded packet passed straight through.
    pub const FORWARDED: PacketFlags = PacketFlags(1 << 5);
    /// The packet's bytes have been handed to the transport and are no
    /// longer needed by the allocator.
    pub const FLUSHED: PacketFlags = PacketFlags(1 << 6);
    /// The response handler has already been invoked for this packet.
    pub const INVOKED: PacketFlags = PacketFlags(1 << 7);
    /// Emit the frame verbatim without running it through response dispatch.
    pub const PASSTHROUGH: PacketFlags = PacketFlags(1 << 8);
    /// The packet owns malloc'd copies of its buffers rather than spans into
    /// a pipeline's coalescing store (set by `dup_packet`).
    pub const DETACHED: PacketFlags = PacketFlags(1 << 9);

    pub const fn empty() -> Self {
        PacketFlags(0)
    }

    pub fn contains(self, other: PacketFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: PacketFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: PacketFlags) {
        self.0 &= !other.0;
    }

    /// A packet whose storage can be released: both the flush reference and
    /// the handler reference have been dropped.
    pub fn is_fully_released(self) -> bool {
        self.contains(PacketFlags::FLUSHED) && self.contains(PacketFlags::INVOKED)
    }
}

impl std::ops::BitOr for PacketFlags {
    type Output = PacketFlags;
    fn bitor(self, rhs: PacketFlags) -> PacketFlags {
        PacketFlags(self.0 | rhs.0)
    }
}
