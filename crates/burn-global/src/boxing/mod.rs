//! Conversions between local and global tensors, and between distributions.
//!
//! Conversions that move data are collective: every rank of the source and target
//! placements must call them, in the same order relative to other collectives.

mod exec;
mod plan;

pub use plan::*;

use burn_tensor::TensorData;

use crate::data;
use crate::sharding::{NdSbp, Placement, Sbp, local_shape, local_view};
use crate::{GlobalContext, GlobalError, GlobalTensor, Result};
use exec::SourceShard;
use plan::replica_root;

/// Target of [`GlobalTensor::to_global`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GlobalTarget {
    /// New placement, or the current one.
    pub placement: Option<Placement>,
    /// New distribution, or the current one.
    pub nd_sbp: Option<NdSbp>,
    /// Distribution of the gradient in the backward pass, recorded only.
    pub grad_nd_sbp: Option<NdSbp>,
}

impl GlobalTarget {
    /// A target keeping everything; set at least one of placement and distribution.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the placement.
    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = Some(placement);
        self
    }

    /// Sets the distribution.
    pub fn with_nd_sbp<S: Into<NdSbp>>(mut self, nd_sbp: S) -> Self {
        self.nd_sbp = Some(nd_sbp.into());
        self
    }

    /// Sets the gradient distribution.
    pub fn with_grad_nd_sbp<S: Into<NdSbp>>(mut self, grad_nd_sbp: S) -> Self {
        self.grad_nd_sbp = Some(grad_nd_sbp.into());
        self
    }
}

impl GlobalTensor {
    /// Converts this tensor to another placement and/or distribution.
    ///
    /// At least one of the target placement and distribution is required. When both
    /// already match, the same handle is returned (aliased, not copied); only a
    /// different gradient distribution yields a new handle, still sharing the data.
    ///
    /// Otherwise each rank receives exactly the intersection of its new slice with
    /// the slices of the source replicas. This is a collective call over the union
    /// of both placements.
    pub fn to_global(&self, ctx: &GlobalContext, target: GlobalTarget) -> Result<GlobalTensor> {
        if target.placement.is_none() && target.nd_sbp.is_none() {
            return Err(GlobalError::InvalidArgument(
                "At least one of placement and sbp is required".into(),
            ));
        }

        let placement = target
            .placement
            .unwrap_or_else(|| self.placement().clone());
        let nd_sbp = target.nd_sbp.unwrap_or_else(|| self.nd_sbp().clone());

        if placement == *self.placement() && nd_sbp == *self.nd_sbp() {
            return Ok(match target.grad_nd_sbp {
                Some(grad) if Some(&grad) != self.grad_nd_sbp() => {
                    self.with_grad_nd_sbp(Some(grad))
                }
                _ => self.clone(),
            });
        }

        nd_sbp.check(&placement, self.ndim())?;
        let rank = ctx.rank();
        let plan = plan_boxing(
            self.shape(),
            self.placement(),
            self.nd_sbp(),
            &placement,
            &nd_sbp,
        )?;
        log::debug!(
            "rank {rank}: {} {} -> {} {}: {} transfers ({})",
            self.placement(),
            self.nd_sbp(),
            placement,
            nd_sbp,
            plan.transfers.len(),
            if plan.is_local() { "local" } else { "exchange" }
        );

        let source = match (self.local_data(), self.local_view()) {
            (Ok(data), Some(view)) => Some(SourceShard { data, view }),
            _ => None,
        };
        let dst_view = placement
            .coordinate(rank)
            .map(|coordinate| local_view(self.shape(), &placement, &nd_sbp, &coordinate))
            .transpose()?;

        let local = exec::execute(ctx.comm(), rank, &plan, source, dst_view, self.dtype())?;
        let converted = GlobalTensor::from_parts(
            rank,
            self.shape().to_vec(),
            self.dtype(),
            placement,
            nd_sbp,
            local,
        )?;

        Ok(match target.grad_nd_sbp {
            Some(grad) => converted.with_grad_nd_sbp(Some(grad)),
            None => converted,
        })
    }
}

/// Turns a local tensor into the local component of a global tensor.
pub trait IntoGlobal {
    /// Makes `self` the component of the calling rank in a global tensor distributed
    /// as `nd_sbp` over `placement`.
    ///
    /// There is usually no communication. Along broadcast grid dimensions the data at
    /// coordinate 0 replaces what the other ranks hold, which is a collective call
    /// over the ranks of each replica group. With
    /// [`sync_local_shapes`](crate::GlobalConfig::sync_local_shapes) the local shapes
    /// are all-gathered over the placement to compute the global shape.
    ///
    /// A rank outside the placement takes no part in that gather: its global shape
    /// is always scaled from the tensor it passes, so it only matches the one of the
    /// participants when that tensor has the shape of an even shard.
    fn into_global(
        self,
        ctx: &GlobalContext,
        placement: Placement,
        nd_sbp: NdSbp,
    ) -> Result<GlobalTensor>;
}

impl IntoGlobal for TensorData {
    fn into_global(
        self,
        ctx: &GlobalContext,
        placement: Placement,
        nd_sbp: NdSbp,
    ) -> Result<GlobalTensor> {
        data::check_dtype(self.dtype)?;
        nd_sbp.check(&placement, self.shape.len())?;

        let rank = ctx.rank();
        let Some(coordinate) = placement.coordinate(rank) else {
            // Not gathered, see the trait docs.
            let shape = scaled_shape(&self.shape, &placement, &nd_sbp);
            return GlobalTensor::from_parts(rank, shape, self.dtype, placement, nd_sbp, None);
        };

        let shape = if ctx.config().sync_local_shapes {
            gathered_shape(ctx, &self.shape, &placement, &nd_sbp)?
        } else {
            scaled_shape(&self.shape, &placement, &nd_sbp)
        };

        let local = broadcast_replicas(ctx, self, &placement, &nd_sbp, &coordinate)?;
        GlobalTensor::from_parts(rank, shape, local.dtype, placement, nd_sbp, Some(local))
    }
}

/// Global shape assuming every shard has the same extent as the local one.
fn scaled_shape(local: &[usize], placement: &Placement, nd_sbp: &NdSbp) -> Vec<usize> {
    let mut shape = local.to_vec();
    for (dim, sbp) in nd_sbp.iter().enumerate() {
        if let Sbp::Split(axis) = sbp {
            shape[*axis] *= placement.hierarchy()[dim];
        }
    }
    shape
}

/// Global shape from the local shapes of all participants, each checked against it.
fn gathered_shape(
    ctx: &GlobalContext,
    local: &[usize],
    placement: &Placement,
    nd_sbp: &NdSbp,
) -> Result<Vec<usize>> {
    let encoded: Vec<u64> = local.iter().map(|&dim| dim as u64).collect();
    let gathered = ctx
        .comm()
        .all_gather(placement.ranks(), TensorData::new(encoded, [local.len()]))?;
    let shapes = gathered
        .iter()
        .map(|encoded| {
            data::read::<u64>(encoded).map(|dims| dims.iter().map(|&dim| dim as usize).collect())
        })
        .collect::<Result<Vec<Vec<usize>>>>()?;

    for shape in shapes.iter() {
        if shape.len() != local.len() {
            return Err(GlobalError::ShapeMismatch {
                expected: local.to_vec(),
                actual: shape.clone(),
            });
        }
    }

    // Sum each split axis over the shards met along the grid dimensions splitting it.
    let mut global = shapes[0].clone();
    for (axis, extent) in global.iter_mut().enumerate() {
        let splitting: Vec<usize> = nd_sbp.dims_splitting(axis).collect();
        if splitting.is_empty() {
            continue;
        }
        *extent = placement
            .coordinates()
            .zip(shapes.iter())
            .filter(|(coordinate, _)| {
                coordinate
                    .iter()
                    .enumerate()
                    .all(|(dim, c)| splitting.contains(&dim) || *c == 0)
            })
            .map(|(_, shape)| shape[axis])
            .sum();
    }

    for (coordinate, shape) in placement.coordinates().zip(shapes.iter()) {
        let expected = local_shape(&global, placement, nd_sbp, &coordinate)?;
        if *shape != expected {
            return Err(GlobalError::ShapeMismatch {
                expected,
                actual: shape.clone(),
            });
        }
    }

    Ok(global)
}

/// Replaces the local data with the one of coordinate 0 along every broadcast grid
/// dimension.
fn broadcast_replicas(
    ctx: &GlobalContext,
    local: TensorData,
    placement: &Placement,
    nd_sbp: &NdSbp,
    coordinate: &[usize],
) -> Result<TensorData> {
    if !nd_sbp.iter().any(|sbp| *sbp == Sbp::Broadcast) {
        return Ok(local);
    }

    let root_coordinate = replica_root(coordinate, nd_sbp);
    let root = placement.rank_at(&root_coordinate)?;
    let group = placement
        .coordinates()
        .filter(|c| replica_root(c, nd_sbp) == root_coordinate)
        .map(|c| placement.rank_at(&c))
        .collect::<Result<Vec<usize>>>()?;

    if group.len() == 1 {
        return Ok(local);
    }

    let rank = ctx.rank();
    log::debug!("rank {rank}: broadcast local component from rank {root} over {group:?}");
    let payload = (rank == root).then_some(local);
    ctx.comm().broadcast(&group, root, payload)
}
