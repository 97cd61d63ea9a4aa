//! The memcached request pipeline (§2, §4.2): wire header codec, packet
//! lifecycle flags, the per-server pipeline (packet pool + coalescing
//! buffer), the command queue's scheduling transaction, and opcode-keyed
//! response dispatch.
//!
//! None of this touches a socket — `vbx-io` drives the actual transport and
//! hands bytes in and out through the callbacks a `Pipeline` registers.

pub mod dispatch;
pub mod flags;
pub mod header;
pub mod packet;
pub mod pipeline;
pub mod queue;

pub use dispatch::{dispatch_response, dup_packet, HandlerRegistry};
pub use flags::PacketFlags;
pub use header::{Header, Magic, Opcode, HEADER_SIZE};
pub use packet::{Cookie, Packet, PacketValue, ReqData};
pub use pipeline::{IterwipeAction, Pipeline};
pub use queue::{CommandQueue, ScheduleGuard};
