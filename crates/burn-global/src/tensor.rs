use alloc::sync::Arc;
use core::fmt;

use burn_tensor::{DType, TensorData};

use crate::data;
use crate::sharding::{NdSbp, Placement, Sbp, SliceView, local_shape, local_view};
use crate::{GlobalContext, GlobalError, Result};

#[derive(Debug)]
struct GlobalMeta {
    shape: Vec<usize>,
    dtype: DType,
    placement: Placement,
    nd_sbp: NdSbp,
    grad_nd_sbp: Option<NdSbp>,
}

#[derive(Clone, Debug)]
enum LocalComponent {
    /// The component of a participating rank.
    Held(Arc<TensorData>),
    /// Placeholder returned to ranks outside the placement.
    Absent(Arc<TensorData>),
}

/// Represents a tensor that is distributed (split, broadcast or partial) across the
/// ranks of a [`Placement`].
///
/// A `GlobalTensor` holds the logical metadata of the whole tensor (global shape,
/// dtype, placement and [`NdSbp`]) together with the local component of the calling
/// rank. Ranks outside the placement hold no component.
///
/// Cloning aliases both the metadata and the local component: nothing is copied.
/// Conversions produce new handles.
#[derive(Clone)]
pub struct GlobalTensor {
    meta: Arc<GlobalMeta>,
    local: LocalComponent,
    rank: usize,
}

impl GlobalTensor {
    /// Assembles a handle from its metadata and the local component of `rank`.
    ///
    /// `local` must be given exactly when `rank` belongs to `placement`, with the
    /// dtype and the shape implied by `nd_sbp` at the coordinate of `rank`.
    pub fn from_parts(
        rank: usize,
        shape: Vec<usize>,
        dtype: DType,
        placement: Placement,
        nd_sbp: NdSbp,
        local: Option<TensorData>,
    ) -> Result<Self> {
        data::check_dtype(dtype)?;
        nd_sbp.check(&placement, shape.len())?;

        let local = match (placement.coordinate(rank), local) {
            (Some(coordinate), Some(local)) => {
                if local.dtype != dtype {
                    return Err(GlobalError::InvalidArgument(format!(
                        "Local component has dtype {:?}, expected {:?}",
                        local.dtype, dtype
                    )));
                }
                let expected = local_shape(&shape, &placement, &nd_sbp, &coordinate)?;
                if local.shape != expected {
                    return Err(GlobalError::ShapeMismatch {
                        expected,
                        actual: local.shape,
                    });
                }
                LocalComponent::Held(Arc::new(local))
            }
            (Some(_), None) => {
                return Err(GlobalError::InvalidArgument(format!(
                    "Rank {rank} belongs to {placement} but has no local component"
                )));
            }
            (None, Some(_)) => {
                return Err(GlobalError::InvalidArgument(format!(
                    "Rank {rank} is outside {placement} but has a local component"
                )));
            }
            (None, None) => {
                LocalComponent::Absent(Arc::new(absent_component(dtype, &shape, &nd_sbp)?))
            }
        };

        Ok(Self {
            meta: Arc::new(GlobalMeta {
                shape,
                dtype,
                placement,
                nd_sbp,
                grad_nd_sbp: None,
            }),
            local,
            rank,
        })
    }

    /// Builds a global tensor from the full logical `data`, which every rank passes
    /// identically. Each participant keeps its own slice; no communication happens.
    ///
    /// Under [`Sbp::PartialSum`] the rank at coordinate 0 of the partial dimensions
    /// holds the data and the others hold zeros.
    pub fn from_data(
        ctx: &GlobalContext,
        data: TensorData,
        placement: Placement,
        nd_sbp: NdSbp,
    ) -> Result<Self> {
        let rank = ctx.rank();
        nd_sbp.check(&placement, data.shape.len())?;

        let local = match placement.coordinate(rank) {
            Some(coordinate) => {
                let view = local_view(&data.shape, &placement, &nd_sbp, &coordinate)?;
                let holds_value = nd_sbp
                    .iter()
                    .zip(&coordinate)
                    .all(|(sbp, c)| *sbp != Sbp::PartialSum || *c == 0);
                if holds_value {
                    Some(data::slice(&data, &view)?)
                } else {
                    Some(data::zeros(data.dtype, crate::sharding::view_shape(&view))?)
                }
            }
            None => None,
        };

        Self::from_parts(rank, data.shape.clone(), data.dtype, placement, nd_sbp, local)
    }

    /// Returns the local component of the calling rank.
    ///
    /// No copy occurs. A rank outside the placement gets an empty tensor of the
    /// right dtype, whose split axes (or first axis when nothing is split) have
    /// length zero.
    pub fn to_local(&self) -> Arc<TensorData> {
        match &self.local {
            LocalComponent::Held(data) | LocalComponent::Absent(data) => data.clone(),
        }
    }

    /// The local component, failing when the calling rank holds none.
    pub fn local_data(&self) -> Result<&TensorData> {
        match &self.local {
            LocalComponent::Held(data) => Ok(data.as_ref()),
            LocalComponent::Absent(_) => Err(self.non_participant()),
        }
    }

    /// Replaces the local component under the same metadata.
    ///
    /// Only this handle sees the new component; aliases keep the previous one.
    pub fn assign_local(&mut self, data: TensorData) -> Result<()> {
        let expected = match &self.local {
            LocalComponent::Held(current) => current.shape.clone(),
            LocalComponent::Absent(_) => return Err(self.non_participant()),
        };
        if data.dtype != self.meta.dtype {
            return Err(GlobalError::InvalidArgument(format!(
                "Local component has dtype {:?}, expected {:?}",
                data.dtype, self.meta.dtype
            )));
        }
        if data.shape != expected {
            return Err(GlobalError::ShapeMismatch {
                expected,
                actual: data.shape,
            });
        }

        self.local = LocalComponent::Held(Arc::new(data));
        Ok(())
    }

    /// A handle sharing this tensor's data whose gradient is expected with `grad_nd_sbp`.
    ///
    /// The descriptor is only recorded for backward passes; no data moves.
    pub fn with_grad_nd_sbp(&self, grad_nd_sbp: Option<NdSbp>) -> Self {
        Self {
            meta: Arc::new(GlobalMeta {
                shape: self.meta.shape.clone(),
                dtype: self.meta.dtype,
                placement: self.meta.placement.clone(),
                nd_sbp: self.meta.nd_sbp.clone(),
                grad_nd_sbp,
            }),
            local: self.local.clone(),
            rank: self.rank,
        }
    }

    /// Global (logical) shape.
    pub fn shape(&self) -> &[usize] {
        &self.meta.shape
    }

    /// Global (logical) shape.
    pub fn size(&self) -> &[usize] {
        self.shape()
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.meta.shape.len()
    }

    /// Number of logical elements.
    pub fn num_elements(&self) -> usize {
        self.meta.shape.iter().product()
    }

    /// Element type.
    pub fn dtype(&self) -> DType {
        self.meta.dtype
    }

    /// Size in bytes of one element.
    pub fn element_size(&self) -> usize {
        // The dtype is checked when the handle is built.
        data::element_size(self.meta.dtype).unwrap_or_default()
    }

    /// The ranks the tensor is distributed over.
    pub fn placement(&self) -> &Placement {
        &self.meta.placement
    }

    /// How the tensor is distributed over its placement.
    pub fn nd_sbp(&self) -> &NdSbp {
        &self.meta.nd_sbp
    }

    /// Distribution requested for the gradient, if any.
    pub fn grad_nd_sbp(&self) -> Option<&NdSbp> {
        self.meta.grad_nd_sbp.as_ref()
    }

    /// Rank of the process owning this handle.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Whether the calling rank holds a local component.
    pub fn is_participant(&self) -> bool {
        matches!(self.local, LocalComponent::Held(_))
    }

    /// Slice of the global tensor held by the calling rank.
    pub fn local_view(&self) -> Option<SliceView> {
        // The descriptor was validated against the shape when the handle was built.
        let coordinate = self.meta.placement.coordinate(self.rank)?;
        local_view(
            &self.meta.shape,
            &self.meta.placement,
            &self.meta.nd_sbp,
            &coordinate,
        )
        .ok()
    }

    /// Whether both handles share metadata and local component.
    pub fn is_alias_of(&self, other: &Self) -> bool {
        let same_local = match (&self.local, &other.local) {
            (LocalComponent::Held(a), LocalComponent::Held(b))
            | (LocalComponent::Absent(a), LocalComponent::Absent(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        Arc::ptr_eq(&self.meta, &other.meta) && same_local
    }

    fn non_participant(&self) -> GlobalError {
        GlobalError::NonParticipantAccess {
            rank: self.rank,
            placement: self.meta.placement.to_string(),
        }
    }
}

impl fmt::Debug for GlobalTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tensor(shape={:?}, {}, sbp={}, dtype={:?})",
            self.meta.shape, self.meta.placement, self.meta.nd_sbp, self.meta.dtype
        )
    }
}

/// The empty component handed to ranks outside the placement.
fn absent_component(dtype: DType, shape: &[usize], nd_sbp: &NdSbp) -> Result<TensorData> {
    let mut absent = shape.to_vec();
    let mut split_any = false;
    for axis in nd_sbp.iter().filter_map(Sbp::split_axis) {
        absent[axis] = 0;
        split_any = true;
    }
    if !split_any {
        match absent.first_mut() {
            Some(first) => *first = 0,
            None => absent.push(0),
        }
    }

    data::empty(dtype, absent)
}
