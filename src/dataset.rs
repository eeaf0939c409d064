//! Dataset distribution helpers.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::communicator::Communicator;
use crate::error::{Error, Result};
use crate::group::ProcessGroup;

/// Largest chunk a single broadcast may carry (MPI counts are C `int`).
pub const INT_MAX: usize = i32::MAX as usize;

/// Object-channel tag reserved for `scatter_dataset` traffic.
///
/// `Communicator::send` refuses it so user messages cannot interleave with a scatter.
pub const SCATTER_TAG: u32 = 0xDA7A_0000;

/// Broadcast `data` from `root` in chunks of at most `max_buf_len` bytes.
///
/// Non-root callers pass `None`. `max_buf_len` must lie in `1..INT_MAX`.
pub fn chunked_bcast<G: ProcessGroup>(
    group: &G,
    data: Option<&[u8]>,
    max_buf_len: usize,
    root: usize,
) -> Result<Vec<u8>> {
    if max_buf_len == 0 || max_buf_len >= INT_MAX {
        return Err(Error::InvalidArgument {
            arg: "max_buf_len",
            reason: format!("must be in 1..{INT_MAX}, got {max_buf_len}"),
        });
    }

    let is_root = group.rank() == root;
    let data = if is_root {
        Some(data.ok_or_else(|| Error::InvalidArgument {
            arg: "data",
            reason: "root must supply the buffer to broadcast".to_string(),
        })?)
    } else {
        None
    };

    let len_header = data.map(|d| (d.len() as u64).to_le_bytes());
    let len_bytes = group.broadcast_object(len_header.as_ref().map(|h| &h[..]), root)?;
    let declared = u64::from_le_bytes(
        len_bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::contract("chunked broadcast length header must be 8 bytes"))?,
    );
    let total = usize::try_from(declared)
        .ok()
        .filter(|&n| n <= isize::MAX as usize)
        .ok_or_else(|| {
            Error::contract(format!("chunked broadcast declares {declared} bytes"))
        })?;

    let mut out = Vec::new();
    out.try_reserve_exact(total).map_err(|e| {
        Error::contract(format!("cannot allocate {total} bytes for chunked broadcast: {e}"))
    })?;
    let mut offset = 0;
    while offset < total {
        let end = (offset + max_buf_len).min(total);
        let chunk = group.broadcast_object(data.map(|d| &d[offset..end]), root)?;
        if chunk.len() != end - offset {
            return Err(Error::contract(format!(
                "chunk [{offset}, {end}) arrived with {} bytes",
                chunk.len()
            )));
        }
        out.extend_from_slice(&chunk);
        offset = end;
    }
    Ok(out)
}

/// Split a dataset held by `root` into equally sized parts, one per rank.
///
/// Every part holds `ceil(n / size)` items; part `i` starts at `n * i / size` of the
/// (optionally shuffled) order and wraps around, so the parts cover the dataset and
/// a few items may appear twice. Non-root callers pass `None` for `dataset`.
pub fn scatter_dataset<G, T>(
    comm: &Communicator<G>,
    dataset: Option<&[T]>,
    shuffle_seed: Option<u64>,
    root: usize,
) -> Result<Vec<T>>
where
    G: ProcessGroup,
    T: Serialize + DeserializeOwned + Clone,
{
    let group = comm.group();
    let size = group.size();
    if root >= size {
        return Err(Error::InvalidArgument {
            arg: "root",
            reason: format!("root {root} is outside group of size {size}"),
        });
    }

    if group.rank() != root {
        let bytes = group.recv_object(root, SCATTER_TAG)?;
        return Ok(serde_json::from_slice(&bytes)?);
    }

    let dataset = dataset.ok_or_else(|| Error::InvalidArgument {
        arg: "dataset",
        reason: "root must supply the dataset".to_string(),
    })?;
    let n_total = dataset.len();
    let mut order: Vec<usize> = (0..n_total).collect();
    if let Some(seed) = shuffle_seed {
        order.shuffle(&mut StdRng::seed_from_u64(seed));
    }
    let n_sub = n_total.div_ceil(size);
    tracing::debug!(root, n_total, n_sub, size, "scattering dataset");

    let mut mine = Vec::new();
    for rank in 0..size {
        let begin = n_total * rank / size;
        let part: Vec<T> = (begin..begin + n_sub)
            .map(|i| dataset[order[i % n_total]].clone())
            .collect();
        if rank == root {
            mine = part;
        } else {
            group.send_object(&serde_json::to_vec(&part)?, rank, SCATTER_TAG)?;
        }
    }
    Ok(mine)
}
