//! Opcode-keyed response dispatch, and the two operations that move a
//! packet across pipeline boundaries: `dup_packet` (copy data, drop state)
//! and `reenqueue_packet` (§4.2, §9).

use crate::header::Opcode;
use crate::packet::Packet;
use crate::pipeline::Pipeline;
use crate::queue::CommandQueue;
use std::collections::HashMap;
use vbx_buffer::SlabKey;
use vbx_core::error::McreqError;
use vbx_core::ids::ServerIndex;

type Handler = Box<dyn FnMut(&Packet, Result<&[u8], McreqError>) + Send>;

/// Per-pipeline-set table of opcode handlers. Unlike the source's per-packet
/// extended-callback pointer, every packet of a given opcode shares one
/// handler — simpler to reason about, and sufficient since nothing in this
/// design needs a handler that varies per request rather than per command
/// type.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Opcode, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, opcode: Opcode, handler: impl FnMut(&Packet, Result<&[u8], McreqError>) + Send + 'static) {
        self.handlers.insert(opcode, Box::new(handler));
    }

    /// Dispatch a response to whichever handler is registered for `pkt`'s
    /// opcode. A missing handler is a protocol error — the source's
    /// equivalent returns nonzero for "could not find handler for command".
    pub fn dispatch(
        &mut self,
        pipeline: &Pipeline,
        pkt: &Packet,
        response: Result<&[u8], McreqError>,
    ) -> Result<(), McreqError> {
        let opcode = pipeline
            .header_bytes(pkt)
            .get(1)
            .copied()
            .map(Opcode::from_byte)
            .unwrap_or(Opcode::Other(0));
        match self.handlers.get_mut(&opcode) {
            Some(handler) => {
                handler(pkt, response);
                Ok(())
            }
            None => Err(McreqError::ProtocolError(format!(
                "no handler registered for opcode {opcode:?}"
            ))),
        }
    }
}

/// Look up a packet by opaque and run it through the handler registry. Does
/// not mark the packet handled — multi-response commands (e.g. `stat`) need
/// to call this more than once before the caller finally calls
/// `Pipeline::packet_handled`.
pub fn dispatch_response(
    registry: &mut HandlerRegistry,
    pipeline: &Pipeline,
    key: SlabKey,
    response: Result<&[u8], McreqError>,
) -> Result<(), McreqError> {
    let pkt = pipeline
        .get(key)
        .ok_or_else(|| McreqError::ProtocolError("dispatch_response: unknown packet".into()))?;
    registry.dispatch(pipeline, pkt, response)
}

/// Copy a packet's header and value bytes into a fresh packet owned by
/// `dest`'s coalescing buffer, without copying its ordering position,
/// retry count, or flags other than marking the result `DETACHED`. Used by
/// `iterwipe` callbacks to relocate in-flight commands onto a pipeline for
/// a newly-installed configuration.
pub fn dup_packet(
    queue: &mut CommandQueue,
    src: ServerIndex,
    key: SlabKey,
    dest: ServerIndex,
) -> Result<SlabKey, McreqError> {
    let (header, value, extras_len, opaque, rdata) = {
        let src_pl = queue
            .pipeline(src)
            .ok_or_else(|| McreqError::ProtocolError("dup_packet: unknown source pipeline".into()))?;
        let pkt = src_pl
            .get(key)
            .ok_or_else(|| McreqError::ProtocolError("dup_packet: unknown packet".into()))?;
        let header = src_pl.header_bytes(pkt).to_vec();
        let value = src_pl.packet_value(pkt).map(|v| v.to_vec());
        (header, value, pkt.extras_len, pkt.opaque, pkt.rdata)
    };

    let dest_pl = queue
        .pipeline_mut(dest)
        .ok_or_else(|| McreqError::ProtocolError("dup_packet: unknown destination pipeline".into()))?;
    let new_key = dest_pl.reserve_header(header.len() as u8, opaque, rdata);
    let span = dest_pl.get(new_key).expect("just inserted").kh_span;
    dest_pl.header_bytes_mut(span).copy_from_slice(&header);
    if let Some(value) = value {
        dest_pl.reserve_value(new_key, &value)?;
    }
    if let Some(pkt) = dest_pl.get_mut(new_key) {
        pkt.extras_len = extras_len;
        pkt.flags.insert(crate::flags::PacketFlags::DETACHED);
    }
    Ok(new_key)
}
