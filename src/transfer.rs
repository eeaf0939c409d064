//! Two-phase point-to-point transfer.
//!
//! Protocol for one message on `(peer, tag)`:
//! 1. Header: JSON-encoded `MessageDescriptor` over the object channel.
//! 2. Payload: one bulk transfer per array, in descriptor order, each carrying the
//!    array's `f32` elements in row-major order.
//!
//! The element type is fixed to `f32`; it is not negotiated.

use crate::array::{reshape_received, HostArray, StageArray};
use crate::error::{Error, Result};
use crate::group::ProcessGroup;
use crate::message::{MessageDescriptor, Payload};

/// Send `payload` to `dest`. Blocks until the header and every bulk transfer have
/// been handed to the transport.
pub fn send_payload<G, A>(group: &G, payload: &Payload<A>, dest: usize, tag: u32) -> Result<()>
where
    G: ProcessGroup,
    A: StageArray,
{
    let descriptor = MessageDescriptor::from_payload(payload);
    let header = descriptor.encode()?;
    tracing::debug!(
        dest,
        tag,
        arrays = descriptor.array_count,
        is_tuple = descriptor.is_tuple,
        "send header"
    );
    group.send_object(&header, dest, tag)?;

    for (i, array) in payload.arrays().iter().enumerate() {
        if array.is_device_resident() {
            array.synchronize()?;
        }
        let bytes = array.stage()?;
        tracing::trace!(dest, tag, index = i, bytes = bytes.len(), "send bulk");
        group.send_bulk(&bytes, dest, tag)?;
    }
    Ok(())
}

/// Receive a message sent with `send_payload` from `src`.
///
/// Headers larger than `max_header_bytes` are rejected before decoding.
pub fn recv_payload<G: ProcessGroup>(
    group: &G,
    src: usize,
    tag: u32,
    max_header_bytes: usize,
) -> Result<Payload<HostArray>> {
    let header = group.recv_object(src, tag)?;
    if header.len() > max_header_bytes {
        return Err(Error::contract(format!(
            "header from rank {src} is {} bytes, limit is {max_header_bytes}",
            header.len()
        )));
    }
    let descriptor = MessageDescriptor::decode(&header)?;
    tracing::debug!(
        src,
        tag,
        arrays = descriptor.array_count,
        is_tuple = descriptor.is_tuple,
        "recv header"
    );

    let counts = descriptor.element_counts()?;
    let mut arrays = Vec::with_capacity(descriptor.array_count);
    for (shape, count) in descriptor.shapes.iter().zip(counts) {
        let mut buf = Vec::new();
        buf.try_reserve_exact(count).map_err(|e| {
            Error::contract(format!("cannot allocate {count} elements for shape {shape:?}: {e}"))
        })?;
        buf.resize(count, 0f32);
        group.recv_bulk(bytemuck::cast_slice_mut(buf.as_mut_slice()), src, tag)?;
        arrays.push(reshape_received(buf, shape)?);
    }

    if descriptor.is_tuple {
        return Ok(Payload::Tuple(arrays));
    }
    // validate() already pinned a single-array header to exactly one array
    match <[HostArray; 1]>::try_from(arrays) {
        Ok([array]) => Ok(Payload::Single(array)),
        Err(arrays) => Err(Error::contract(format!(
            "single-array message produced {} arrays",
            arrays.len()
        ))),
    }
}
