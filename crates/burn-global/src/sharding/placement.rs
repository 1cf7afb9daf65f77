use alloc::sync::Arc;
use core::fmt;
use core::str::FromStr;

use hashbrown::{HashMap, HashSet};

use crate::{GlobalError, Result};

/// The class of device the ranks of a placement compute on.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceKind {
    /// Host memory and CPU kernels.
    Cpu,
    /// CUDA devices.
    Cuda,
}

impl DeviceKind {
    /// Name used when displaying a placement.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Cpu => "cpu",
            DeviceKind::Cuda => "cuda",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = GlobalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cpu" => Ok(DeviceKind::Cpu),
            "cuda" | "gpu" => Ok(DeviceKind::Cuda),
            other => Err(GlobalError::InvalidPlacement(format!(
                "Unknown device kind \"{other}\""
            ))),
        }
    }
}

#[derive(Debug)]
struct PlacementInner {
    kind: DeviceKind,
    /// Ranks in row-major order over the hierarchy.
    ranks: Vec<usize>,
    /// Shape of the logical rank grid.
    hierarchy: Vec<usize>,
    /// Maps a rank to its position in `ranks`.
    parallel_ids: HashMap<usize, usize>,
}

/// An immutable, possibly multi-dimensional grid of process ranks with a device kind.
///
/// A placement tells on which ranks the data of a global tensor lives. The grid is
/// stored row-major: for a hierarchy `[2, 2]` and ranks `[0, 1, 2, 3]`, rank `2` sits
/// at coordinate `[1, 0]`. Each grid dimension pairs with one entry of the tensor's
/// [`NdSbp`](crate::sharding::NdSbp).
///
/// Cloning is cheap: the grid is shared. Equality and hashing are structural.
#[derive(Clone)]
pub struct Placement {
    inner: Arc<PlacementInner>,
}

impl Placement {
    /// Creates a one-dimensional placement over `ranks`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use burn_global::sharding::{DeviceKind, Placement};
    ///
    /// let placement = Placement::new(DeviceKind::Cpu, vec![0, 1]).unwrap();
    /// assert_eq!(placement.to_string(), "placement(type=\"cpu\", ranks=[0, 1])");
    /// ```
    pub fn new(kind: DeviceKind, ranks: Vec<usize>) -> Result<Self> {
        let len = ranks.len();
        PlacementBuilder::new(kind, ranks).with_hierarchy([len]).build()
    }

    /// Starts building a placement whose grid shape is set with
    /// [`with_hierarchy`](PlacementBuilder::with_hierarchy).
    pub fn builder(kind: DeviceKind, ranks: Vec<usize>) -> PlacementBuilder {
        PlacementBuilder::new(kind, ranks)
    }

    /// The device kind of every rank.
    pub fn device_kind(&self) -> DeviceKind {
        self.inner.kind
    }

    /// Ranks in row-major order.
    pub fn ranks(&self) -> &[usize] {
        &self.inner.ranks
    }

    /// Shape of the rank grid.
    pub fn hierarchy(&self) -> &[usize] {
        &self.inner.hierarchy
    }

    /// Number of grid dimensions.
    pub fn ndim(&self) -> usize {
        self.inner.hierarchy.len()
    }

    /// Number of ranks.
    pub fn len(&self) -> usize {
        self.inner.ranks.len()
    }

    /// Always false, a placement holds at least one rank.
    pub fn is_empty(&self) -> bool {
        self.inner.ranks.is_empty()
    }

    /// Whether `rank` takes part in this placement.
    pub fn contains(&self, rank: usize) -> bool {
        self.inner.parallel_ids.contains_key(&rank)
    }

    /// Position of `rank` in the row-major rank list.
    pub fn parallel_id(&self, rank: usize) -> Option<usize> {
        self.inner.parallel_ids.get(&rank).copied()
    }

    /// Grid coordinate of `rank`, if it takes part in this placement.
    pub fn coordinate(&self, rank: usize) -> Option<Vec<usize>> {
        self.parallel_id(rank).map(|id| self.coordinate_of(id))
    }

    /// Grid coordinate of a parallel id.
    pub fn coordinate_of(&self, parallel_id: usize) -> Vec<usize> {
        let hierarchy = self.hierarchy();
        let mut coordinate = vec![0; hierarchy.len()];
        let mut rest = parallel_id;
        for (dim, extent) in hierarchy.iter().enumerate().rev() {
            coordinate[dim] = rest % extent;
            rest /= extent;
        }
        coordinate
    }

    /// Rank sitting at `coordinate`.
    pub fn rank_at(&self, coordinate: &[usize]) -> Result<usize> {
        self.check_coordinate(coordinate)?;
        let id = coordinate
            .iter()
            .zip(self.hierarchy())
            .fold(0, |acc, (c, extent)| acc * extent + c);
        Ok(self.inner.ranks[id])
    }

    /// Ranks that differ from `coordinate` only along grid dimension `dim`, ordered
    /// by their coordinate on `dim`.
    pub fn ranks_along(&self, coordinate: &[usize], dim: usize) -> Result<Vec<usize>> {
        self.check_coordinate(coordinate)?;
        if dim >= self.ndim() {
            return Err(GlobalError::InvalidArgument(format!(
                "Grid dimension {dim} is out of range for {self}"
            )));
        }

        let mut coordinate = coordinate.to_vec();
        (0..self.hierarchy()[dim])
            .map(|c| {
                coordinate[dim] = c;
                self.rank_at(&coordinate)
            })
            .collect()
    }

    /// Fails unless `coordinate` lies inside the rank grid.
    pub fn check_coordinate(&self, coordinate: &[usize]) -> Result<()> {
        let inside = coordinate.len() == self.ndim()
            && coordinate
                .iter()
                .zip(self.hierarchy())
                .all(|(c, extent)| c < extent);

        if inside {
            Ok(())
        } else {
            Err(GlobalError::InvalidArgument(format!(
                "Coordinate {coordinate:?} is outside {self}"
            )))
        }
    }

    /// Iterates over all grid coordinates in row-major order.
    pub fn coordinates(&self) -> impl Iterator<Item = Vec<usize>> + '_ {
        (0..self.len()).map(|id| self.coordinate_of(id))
    }

    /// Whether both handles share the same grid allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn fmt_ranks(&self, f: &mut fmt::Formatter<'_>, dim: usize, offset: usize) -> fmt::Result {
        let hierarchy = self.hierarchy();
        let stride: usize = hierarchy[dim + 1..].iter().product();
        f.write_str("[")?;
        for i in 0..hierarchy[dim] {
            if i > 0 {
                f.write_str(", ")?;
            }
            if dim + 1 == hierarchy.len() {
                write!(f, "{}", self.inner.ranks[offset + i])?;
            } else {
                self.fmt_ranks(f, dim + 1, offset + i * stride)?;
            }
        }
        f.write_str("]")
    }
}

impl PartialEq for Placement {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
            || (self.inner.kind == other.inner.kind
                && self.inner.hierarchy == other.inner.hierarchy
                && self.inner.ranks == other.inner.ranks)
    }
}

impl Eq for Placement {}

impl core::hash::Hash for Placement {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.inner.kind.hash(state);
        self.inner.hierarchy.hash(state);
        self.inner.ranks.hash(state);
    }
}

impl fmt::Debug for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "placement(type=\"{}\", ranks=", self.inner.kind)?;
        self.fmt_ranks(f, 0, 0)?;
        f.write_str(")")
    }
}

/// A builder for constructing a [`Placement`].
///
/// Without a hierarchy the placement is one-dimensional.
#[derive(Clone, Debug)]
pub struct PlacementBuilder {
    kind: DeviceKind,
    ranks: Vec<usize>,
    hierarchy: Option<Vec<usize>>,
}

impl PlacementBuilder {
    /// Creates a new [`PlacementBuilder`] with the given device kind and ranks.
    pub fn new(kind: DeviceKind, ranks: Vec<usize>) -> Self {
        Self {
            kind,
            ranks,
            hierarchy: None,
        }
    }

    /// Arranges the ranks into a row-major grid of the given shape.
    ///
    /// # Example
    ///
    /// ```rust
    /// use burn_global::sharding::{DeviceKind, Placement};
    ///
    /// let placement = Placement::builder(DeviceKind::Cuda, vec![0, 1, 2, 3])
    ///     .with_hierarchy([2, 2])
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(placement.coordinate(2), Some(vec![1, 0]));
    /// ```
    pub fn with_hierarchy<S: Into<Vec<usize>>>(mut self, hierarchy: S) -> Self {
        self.hierarchy = Some(hierarchy.into());
        self
    }

    /// Builds a [`Placement`] from the current configuration.
    ///
    /// Fails with [`GlobalError::InvalidPlacement`] when the ranks are empty or
    /// repeated, or when the hierarchy does not describe exactly the given ranks.
    pub fn build(self) -> Result<Placement> {
        if self.ranks.is_empty() {
            return Err(GlobalError::InvalidPlacement(
                "A placement needs at least one rank".into(),
            ));
        }

        let mut seen = HashSet::new();
        for &rank in &self.ranks {
            if !seen.insert(rank) {
                return Err(GlobalError::InvalidPlacement(format!(
                    "Rank {rank} appears more than once in {:?}",
                    self.ranks
                )));
            }
        }

        let hierarchy = self.hierarchy.unwrap_or_else(|| vec![self.ranks.len()]);
        if hierarchy.is_empty() || hierarchy.contains(&0) {
            return Err(GlobalError::InvalidPlacement(format!(
                "Hierarchy {hierarchy:?} must have at least one dimension and no empty dimension"
            )));
        }

        let expected = hierarchy.iter().product::<usize>();
        if self.ranks.len() != expected {
            return Err(GlobalError::InvalidPlacement(format!(
                "Rank count ({}) doesn't match hierarchy {:?}",
                self.ranks.len(),
                hierarchy,
            )));
        }

        let parallel_ids = self
            .ranks
            .iter()
            .enumerate()
            .map(|(id, &rank)| (rank, id))
            .collect();

        Ok(Placement {
            inner: Arc::new(PlacementInner {
                kind: self.kind,
                ranks: self.ranks,
                hierarchy,
                parallel_ids,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_placement_2x2() {
        let placement = Placement::builder(DeviceKind::Cpu, vec![0, 1, 2, 3])
            .with_hierarchy([2, 2])
            .build()
            .unwrap();

        assert_eq!(placement.ndim(), 2);
        assert_eq!(placement.coordinate(3), Some(vec![1, 1]));
        assert_eq!(placement.rank_at(&[0, 1]).unwrap(), 1);
        assert_eq!(placement.ranks_along(&[1, 0], 0).unwrap(), vec![0, 2]);
        assert_eq!(placement.ranks_along(&[1, 0], 1).unwrap(), vec![2, 3]);
        assert_eq!(placement.coordinate(7), None);
    }

    #[rstest]
    #[case(vec![2, 0])]
    #[case(vec![0])]
    #[case(vec![0, 0, 0])]
    fn test_rank_at_rejects_coordinates_outside_the_grid(#[case] coordinate: Vec<usize>) {
        let placement = Placement::builder(DeviceKind::Cpu, vec![0, 1, 2, 3])
            .with_hierarchy([2, 2])
            .build()
            .unwrap();

        assert!(matches!(
            placement.rank_at(&coordinate),
            Err(GlobalError::InvalidArgument(_))
        ));
        assert!(placement.ranks_along(&[0, 0], 2).is_err());
    }

    #[test]
    fn test_placement_display() {
        let flat = Placement::new(DeviceKind::Cpu, vec![0, 1]).unwrap();
        let grid = Placement::builder(DeviceKind::Cuda, vec![4, 5, 6, 7])
            .with_hierarchy([2, 2])
            .build()
            .unwrap();

        assert_eq!(flat.to_string(), "placement(type=\"cpu\", ranks=[0, 1])");
        assert_eq!(
            grid.to_string(),
            "placement(type=\"cuda\", ranks=[[4, 5], [6, 7]])"
        );
    }

    #[test]
    fn test_placement_equality_is_structural() {
        let a = Placement::new(DeviceKind::Cpu, vec![0, 1]).unwrap();
        let b = Placement::new(DeviceKind::Cpu, vec![0, 1]).unwrap();
        let reordered = Placement::new(DeviceKind::Cpu, vec![1, 0]).unwrap();
        let on_cuda = Placement::new(DeviceKind::Cuda, vec![0, 1]).unwrap();
        let grid = Placement::builder(DeviceKind::Cpu, vec![0, 1])
            .with_hierarchy([1, 2])
            .build()
            .unwrap();

        assert_eq!(a, b);
        assert!(!a.ptr_eq(&b));
        assert_ne!(a, reordered);
        assert_ne!(a, on_cuda);
        assert_ne!(a, grid);

        let mut set = HashSet::new();
        set.insert(a.clone());
        assert!(set.contains(&b));
    }

    #[test]
    fn test_device_kind_from_str() {
        assert_eq!("cpu".parse::<DeviceKind>().unwrap(), DeviceKind::Cpu);
        assert_eq!("gpu".parse::<DeviceKind>().unwrap(), DeviceKind::Cuda);
        assert!("tpu".parse::<DeviceKind>().is_err());
    }

    #[test]
    #[should_panic = "InvalidPlacement(\"A placement needs at least one rank\")"]
    fn test_placement_should_not_be_empty() {
        let _placement = Placement::new(DeviceKind::Cpu, vec![]).unwrap();
    }

    #[test]
    #[should_panic = "InvalidPlacement(\"Rank 1 appears more than once in [0, 1, 1]\")"]
    fn test_placement_ranks_should_be_unique() {
        let _placement = Placement::new(DeviceKind::Cpu, vec![0, 1, 1]).unwrap();
    }

    #[test]
    #[should_panic = "InvalidPlacement(\"Rank count (4) doesn't match hierarchy [3, 2]"]
    fn test_placement_ranks_should_match_hierarchy() {
        let _placement = Placement::builder(DeviceKind::Cpu, vec![0, 1, 2, 3])
            .with_hierarchy([3, 2])
            .build()
            .unwrap();
    }

    #[test]
    #[should_panic = "InvalidPlacement(\"Hierarchy [0, 4]"]
    fn test_placement_hierarchy_should_not_have_empty_dim() {
        let _placement = Placement::builder(DeviceKind::Cpu, vec![0, 1, 2, 3])
            .with_hierarchy([0, 4])
            .build()
            .unwrap();
    }
}
