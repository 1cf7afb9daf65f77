use core::fmt;

use super::Placement;
use crate::{GlobalError, Result};

/// Specifies how a tensor is distributed along one dimension of the rank grid.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Sbp {
    /// The tensor axis is split into contiguous, balanced shards.
    Split(usize),
    /// Every rank holds the full tensor.
    Broadcast,
    /// Every rank holds an addend; the logical value is the sum over the grid dimension.
    PartialSum,
}

impl Sbp {
    /// The split axis, if any.
    pub fn split_axis(&self) -> Option<usize> {
        match self {
            Sbp::Split(axis) => Some(*axis),
            Sbp::Broadcast | Sbp::PartialSum => None,
        }
    }
}

impl fmt::Display for Sbp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sbp::Split(axis) => write!(f, "sbp.split(axis={axis})"),
            Sbp::Broadcast => f.write_str("sbp.broadcast"),
            Sbp::PartialSum => f.write_str("sbp.partial_sum"),
        }
    }
}

/// Describes how a tensor is distributed across a placement: one [`Sbp`] entry per
/// dimension of the rank grid.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct NdSbp {
    entries: Vec<Sbp>,
}

impl NdSbp {
    /// Creates a descriptor from its entries, ordered like the grid dimensions.
    pub fn new<S: Into<Vec<Sbp>>>(entries: S) -> Self {
        Self {
            entries: entries.into(),
        }
    }

    /// Broadcast along each of the `ndim` grid dimensions.
    pub fn broadcast(ndim: usize) -> Self {
        Self::new(vec![Sbp::Broadcast; ndim])
    }

    /// Single-dimension split along `axis`.
    pub fn split(axis: usize) -> Self {
        Self::new([Sbp::Split(axis)])
    }

    /// The entries, ordered like the grid dimensions.
    pub fn entries(&self) -> &[Sbp] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the descriptor has no entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the entries.
    pub fn iter(&self) -> impl Iterator<Item = &Sbp> {
        self.entries.iter()
    }

    /// Whether every entry is [`Sbp::Broadcast`].
    pub fn is_all_broadcast(&self) -> bool {
        self.entries.iter().all(|sbp| *sbp == Sbp::Broadcast)
    }

    /// Whether any entry is [`Sbp::PartialSum`].
    pub fn has_partial_sum(&self) -> bool {
        self.entries.contains(&Sbp::PartialSum)
    }

    /// Grid dimensions that split `axis`.
    pub fn dims_splitting(&self, axis: usize) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(move |(_, sbp)| **sbp == Sbp::Split(axis))
            .map(|(dim, _)| dim)
    }

    /// Checks the descriptor against a placement and a tensor rank.
    ///
    /// Split axes are only known to be valid once the descriptor is bound to a shape,
    /// so this is called whenever a global tensor is constructed.
    pub fn check(&self, placement: &Placement, tensor_ndim: usize) -> Result<()> {
        if self.entries.len() != placement.ndim() {
            return Err(GlobalError::InvalidDistribution(format!(
                "{} has {} entries but {} has {} dimensions",
                self,
                self.entries.len(),
                placement,
                placement.ndim()
            )));
        }

        for sbp in self.entries.iter() {
            if let Sbp::Split(axis) = sbp {
                if *axis >= tensor_ndim {
                    return Err(GlobalError::InvalidDistribution(format!(
                        "Split axis {axis} is out of range for a tensor of rank {tensor_ndim}"
                    )));
                }
            }
        }

        Ok(())
    }
}

impl From<Sbp> for NdSbp {
    fn from(sbp: Sbp) -> Self {
        Self::new([sbp])
    }
}

impl From<Vec<Sbp>> for NdSbp {
    fn from(entries: Vec<Sbp>) -> Self {
        Self::new(entries)
    }
}

impl fmt::Display for NdSbp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, sbp) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{sbp}")?;
        }
        if self.entries.len() == 1 {
            f.write_str(",")?;
        }
        f.write_str(")")
    }
}
