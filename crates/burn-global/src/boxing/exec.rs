use burn_tensor::{DType, TensorData};

use super::BoxingPlan;
use crate::comm::Communicator;
use crate::data;
use crate::sharding::{SliceView, relative_to, view_shape};
use crate::{GlobalError, Result};

/// The local component of the calling rank on the source side of a conversion.
pub(crate) struct SourceShard<'a> {
    pub data: &'a TensorData,
    pub view: SliceView,
}

/// Executes the part of `plan` that concerns `rank`.
///
/// Sends go first; they never block, so every rank reaches its receives. Returns the
/// new local component when `dst_view` is given, that is when `rank` belongs to the
/// target placement.
pub(crate) fn execute(
    comm: &dyn Communicator,
    rank: usize,
    plan: &BoxingPlan,
    source: Option<SourceShard<'_>>,
    dst_view: Option<SliceView>,
    dtype: DType,
) -> Result<Option<TensorData>> {
    let read_source = |region: &SliceView| -> Result<TensorData> {
        let shard = source.as_ref().ok_or_else(|| {
            GlobalError::InvalidArgument(format!(
                "Rank {rank} must send {region:?} but holds no source component"
            ))
        })?;
        data::slice(shard.data, &relative_to(region, &shard.view))
    };

    for transfer in plan.sends(rank) {
        log::trace!(
            "rank {rank}: send {:?} to rank {}",
            transfer.region,
            transfer.dst
        );
        comm.send(transfer.dst, read_source(&transfer.region)?)?;
    }

    let Some(dst_view) = dst_view else {
        return Ok(None);
    };

    let mut pieces = Vec::new();
    for transfer in plan.receives(rank) {
        let piece = if transfer.src == rank {
            read_source(&transfer.region)?
        } else {
            log::trace!(
                "rank {rank}: receive {:?} from rank {}",
                transfer.region,
                transfer.src
            );
            comm.recv(transfer.src)?
        };
        pieces.push((relative_to(&transfer.region, &dst_view), piece));
    }

    data::assemble(dtype, view_shape(&dst_view), &pieces, plan.mode).map(Some)
}
