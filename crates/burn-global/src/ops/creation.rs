use core::ops::Range;

use burn_tensor::{DType, TensorData};
use derive_new::new;

use crate::data;
use crate::random::{Generator, seeded_permutation};
use crate::sharding::{NdSbp, Placement, local_view};
use crate::{GlobalContext, GlobalError, GlobalTensor, Result};

/// An operator producing a one-dimensional tensor from its parameters alone.
///
/// Implementations must be deterministic: every rank generating the same range
/// gets bit-identical values.
pub trait CreationOp {
    /// Number of logical elements.
    fn len(&self) -> usize;

    /// Whether the op produces no element.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type of the output.
    fn dtype(&self) -> DType;

    /// The elements of `range`, a sub-range of `0..len`.
    fn generate(&self, range: Range<usize>) -> Result<TensorData>;
}

/// What the calling rank computes for a creation op.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreationPlan {
    /// The rank is outside the placement and computes nothing.
    Skip,
    /// The tensor is broadcast: the rank computes every element.
    Full,
    /// The rank computes its contiguous shard.
    Shard(Range<usize>),
}

/// Decides what `rank` computes for a creation op of `len` elements.
///
/// Creation ops have nothing to reduce, so [`Sbp::PartialSum`](crate::sharding::Sbp)
/// is rejected.
pub fn plan_creation(
    len: usize,
    placement: &Placement,
    nd_sbp: &NdSbp,
    rank: usize,
) -> Result<CreationPlan> {
    nd_sbp.check(placement, 1)?;
    if nd_sbp.has_partial_sum() {
        return Err(GlobalError::UnsupportedDistribution(format!(
            "Creation ops cannot produce {nd_sbp}"
        )));
    }

    let Some(coordinate) = placement.coordinate(rank) else {
        return Ok(CreationPlan::Skip);
    };
    if nd_sbp.is_all_broadcast() {
        return Ok(CreationPlan::Full);
    }

    let view = local_view(&[len], placement, nd_sbp, &coordinate)?;
    Ok(CreationPlan::Shard(view[0].clone()))
}

/// Runs a creation op on the calling rank and wraps the result in a [`GlobalTensor`].
///
/// No communication happens: every rank derives its part from the op parameters.
pub fn dispatch_creation<O: CreationOp>(
    rank: usize,
    op: &O,
    placement: Placement,
    nd_sbp: NdSbp,
) -> Result<GlobalTensor> {
    let plan = plan_creation(op.len(), &placement, &nd_sbp, rank)?;
    log::debug!("rank {rank}: creation of {} elements, {plan:?}", op.len());

    let local = match plan {
        CreationPlan::Skip => None,
        CreationPlan::Full => Some(op.generate(0..op.len())?),
        CreationPlan::Shard(range) => Some(op.generate(range)?),
    };

    GlobalTensor::from_parts(rank, vec![op.len()], op.dtype(), placement, nd_sbp, local)
}

/// Parameters of a ranged sequence `start, start + step, ...` stopping before `end`.
#[derive(new, Clone, Copy, Debug, PartialEq)]
pub struct Arange {
    /// First value.
    pub start: f64,
    /// Exclusive bound.
    pub end: f64,
    /// Distance between consecutive values, may be negative.
    pub step: f64,
}

impl Arange {
    /// The sequence `0, 1, ..., end - 1`.
    pub fn until(end: f64) -> Self {
        Self::new(0.0, end, 1.0)
    }

    /// Number of values, `ceil((end - start) / step)` or zero.
    pub fn len(&self) -> Result<usize> {
        if !(self.start.is_finite() && self.end.is_finite() && self.step.is_finite()) {
            return Err(GlobalError::InvalidArgument(format!(
                "Arange parameters must be finite, got {self:?}"
            )));
        }
        if self.step == 0.0 {
            return Err(GlobalError::InvalidArgument(
                "Arange step must be non-zero".into(),
            ));
        }

        let count = ((self.end - self.start) / self.step).ceil();
        Ok(if count > 0.0 { count as usize } else { 0 })
    }

    /// Value at `index`.
    pub fn value(&self, index: usize) -> f64 {
        self.start + index as f64 * self.step
    }
}

struct ArangeOp {
    arange: Arange,
    len: usize,
    dtype: DType,
}

impl CreationOp for ArangeOp {
    fn len(&self) -> usize {
        self.len
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn generate(&self, range: Range<usize>) -> Result<TensorData> {
        data::from_fn(self.dtype, range.len(), |i| self.arange.value(range.start + i))
    }
}

struct RandpermOp {
    n: usize,
    dtype: DType,
    seed: u64,
}

impl CreationOp for RandpermOp {
    fn len(&self) -> usize {
        self.n
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn generate(&self, range: Range<usize>) -> Result<TensorData> {
        // The whole permutation is drawn on every rank, then sliced.
        let permutation = seeded_permutation(self.n, self.seed);
        data::from_indices(self.dtype, &permutation[range])
    }
}

/// A local ranged sequence.
pub fn arange_local(arange: Arange, dtype: DType) -> Result<TensorData> {
    let len = arange.len()?;
    ArangeOp { arange, len, dtype }.generate(0..len)
}

/// A global ranged sequence distributed as `nd_sbp` over `placement`.
///
/// # Example
///
/// ```rust
/// use burn_global::comm::LocalCluster;
/// use burn_global::ops::{Arange, arange};
/// use burn_global::sharding::{DeviceKind, NdSbp, Placement};
/// use burn_global::{GlobalConfig, GlobalContext};
/// use burn_tensor::DType;
///
/// let ctx = GlobalContext::new(LocalCluster::single(), GlobalConfig::default());
/// let placement = Placement::new(DeviceKind::Cpu, vec![0]).unwrap();
/// let x = arange(&ctx, Arange::new(0.0, 20.0, 2.0), DType::I64, placement, NdSbp::broadcast(1)).unwrap();
///
/// assert_eq!(x.to_local().to_vec::<i64>().unwrap(), vec![0, 2, 4, 6, 8, 10, 12, 14, 16, 18]);
/// ```
pub fn arange(
    ctx: &GlobalContext,
    arange: Arange,
    dtype: DType,
    placement: Placement,
    nd_sbp: NdSbp,
) -> Result<GlobalTensor> {
    let len = arange.len()?;
    dispatch_creation(ctx.rank(), &ArangeOp { arange, len, dtype }, placement, nd_sbp)
}

/// A local random permutation of `0..n`.
///
/// Fails with [`GlobalError::InvalidArgument`] when `dtype` cannot hold `n - 1`
/// exactly.
pub fn randperm_local(n: usize, dtype: DType, generator: &mut Generator) -> Result<TensorData> {
    data::check_index_range(dtype, n)?;
    data::from_indices(dtype, &generator.permutation(n))
}

/// A global random permutation of `0..n` distributed as `nd_sbp` over `placement`.
///
/// Each call draws a seed from `generator`, or from the default generator of the
/// context. Ranks seeded identically agree on the permutation without communicating.
/// When the generator was seeded from entropy and
/// [`sync_random_seed`](crate::GlobalConfig::sync_random_seed) is enabled, the
/// participants adopt the seed of the first rank of the placement, which is a
/// collective call over the placement.
///
/// Fails with [`GlobalError::InvalidArgument`] when `dtype` cannot hold `n - 1`
/// exactly, before any seed is drawn.
pub fn randperm(
    ctx: &mut GlobalContext,
    n: usize,
    dtype: DType,
    placement: Placement,
    nd_sbp: NdSbp,
    generator: Option<&mut Generator>,
) -> Result<GlobalTensor> {
    let rank = ctx.rank();
    let sync = ctx.config().sync_random_seed;
    data::check_index_range(dtype, n)?;
    plan_creation(n, &placement, &nd_sbp, rank)?;

    let (comm, default_generator) = ctx.comm_and_generator();
    let generator = generator.unwrap_or(default_generator);
    let mut seed = generator.next_seed();

    if sync && !generator.is_manually_seeded() && placement.contains(rank) && placement.len() > 1 {
        let root = placement.ranks()[0];
        let payload = (rank == root).then(|| TensorData::new(vec![seed], [1]));
        let received = comm.broadcast(placement.ranks(), root, payload)?;
        seed = data::read::<u64>(&received)?
            .first()
            .copied()
            .ok_or_else(|| GlobalError::Data("Empty seed broadcast".into()))?;
        log::debug!("rank {rank}: randperm seed synchronized from rank {root}");
    }

    dispatch_creation(rank, &RandpermOp { n, dtype, seed }, placement, nd_sbp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GlobalConfig;
    use crate::comm::LocalCluster;
    use crate::sharding::{DeviceKind, Sbp};
    use rstest::rstest;

    fn single_ctx() -> GlobalContext {
        GlobalContext::new(LocalCluster::single(), GlobalConfig::default())
    }

    fn rank0() -> Placement {
        Placement::new(DeviceKind::Cpu, vec![0]).unwrap()
    }

    #[rstest]
    #[case(Arange::until(13.0), 13)]
    #[case(Arange::new(0.0, 20.0, 2.0), 10)]
    #[case(Arange::new(0.0, 100.0, 3.0), 34)]
    #[case(Arange::new(1.0, 2.0, 0.25), 4)]
    #[case(Arange::new(5.0, 0.0, -2.0), 3)]
    #[case(Arange::new(5.0, 5.0, 1.0), 0)]
    #[case(Arange::new(5.0, 0.0, 1.0), 0)]
    fn test_arange_len(#[case] arange: Arange, #[case] len: usize) {
        assert_eq!(arange.len().unwrap(), len);
    }

    #[test]
    fn test_arange_rejects_zero_step() {
        assert!(matches!(
            Arange::new(0.0, 1.0, 0.0).len(),
            Err(GlobalError::InvalidArgument(_))
        ));
        assert!(Arange::new(0.0, f64::INFINITY, 1.0).len().is_err());
    }

    #[test]
    fn test_arange_local_float() {
        let data = arange_local(Arange::until(13.0), DType::F32).unwrap();

        assert_eq!(
            data.to_vec::<f32>().unwrap(),
            (0..13).map(|v| v as f32).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_arange_global_naive() {
        let ctx = single_ctx();
        let x = arange(
            &ctx,
            Arange::new(0.0, 20.0, 2.0),
            DType::I64,
            rank0(),
            NdSbp::broadcast(1),
        )
        .unwrap();

        assert_eq!(x.shape(), &[10]);
        assert_eq!(x.nd_sbp(), &NdSbp::broadcast(1));
        assert_eq!(x.placement(), &rank0());
        assert_eq!(
            x.to_local().to_vec::<i64>().unwrap(),
            vec![0, 2, 4, 6, 8, 10, 12, 14, 16, 18]
        );
    }

    #[test]
    fn test_plan_creation_split_shards() {
        let placement = Placement::new(DeviceKind::Cpu, vec![0, 1]).unwrap();

        assert_eq!(
            plan_creation(13, &placement, &NdSbp::split(0), 0).unwrap(),
            CreationPlan::Shard(0..7)
        );
        assert_eq!(
            plan_creation(13, &placement, &NdSbp::split(0), 1).unwrap(),
            CreationPlan::Shard(7..13)
        );
        assert_eq!(
            plan_creation(13, &placement, &NdSbp::broadcast(1), 1).unwrap(),
            CreationPlan::Full
        );
        assert_eq!(
            plan_creation(13, &placement, &NdSbp::split(0), 5).unwrap(),
            CreationPlan::Skip
        );
    }

    #[test]
    fn test_plan_creation_rejects_partial_sum() {
        let result = plan_creation(4, &rank0(), &NdSbp::new([Sbp::PartialSum]), 0);

        assert!(matches!(result, Err(GlobalError::UnsupportedDistribution(_))));
    }

    #[test]
    fn test_plan_creation_rejects_split_beyond_first_axis() {
        let result = plan_creation(4, &rank0(), &NdSbp::split(1), 0);

        assert!(matches!(result, Err(GlobalError::InvalidDistribution(_))));
    }

    #[rstest]
    #[case(DType::U8)]
    #[case(DType::I8)]
    #[case(DType::I32)]
    #[case(DType::I64)]
    #[case(DType::F32)]
    #[case(DType::F64)]
    fn test_randperm_global_different_types(#[case] dtype: DType) {
        let mut ctx = single_ctx();
        let x = randperm(&mut ctx, 10, dtype, rank0(), NdSbp::broadcast(1), None).unwrap();

        assert_eq!(x.dtype(), dtype);
        assert_eq!(x.nd_sbp(), &NdSbp::broadcast(1));
        assert_eq!(x.placement(), &rank0());
        assert_eq!(x.to_local().dtype, dtype);
    }

    #[test]
    fn test_randperm_with_generator() {
        let mut generator = Generator::default();

        generator.manual_seed(0);
        let first = randperm_local(40, DType::I64, &mut generator).unwrap();
        generator.manual_seed(0);
        let second = randperm_local(40, DType::I64, &mut generator).unwrap();

        assert_eq!(first.to_vec::<i64>().unwrap(), second.to_vec::<i64>().unwrap());
    }

    #[test]
    fn test_randperm_randomness() {
        let first = randperm_local(500, DType::I64, &mut Generator::default()).unwrap();
        let second = randperm_local(500, DType::I64, &mut Generator::default()).unwrap();

        assert_ne!(first.to_vec::<i64>().unwrap(), second.to_vec::<i64>().unwrap());
    }

    #[test]
    fn test_randperm_empty() {
        let mut ctx = single_ctx();
        let x = randperm(&mut ctx, 0, DType::I64, rank0(), NdSbp::broadcast(1), None).unwrap();

        assert_eq!(x.shape(), &[0]);
        assert_eq!(x.to_local().num_elements(), 0);
    }

    #[test]
    fn test_randperm_global_is_a_permutation() {
        let mut ctx = single_ctx();
        let mut generator = Generator::new(3);
        let x = randperm(&mut ctx, 25, DType::I64, rank0(), NdSbp::split(0), Some(&mut generator))
            .unwrap();

        let mut values = x.to_local().to_vec::<i64>().unwrap();
        values.sort_unstable();
        assert_eq!(values, (0..25).collect::<Vec<i64>>());
    }

    #[test]
    fn test_randperm_u8_holds_256_values() {
        let mut values = randperm_local(256, DType::U8, &mut Generator::new(0))
            .unwrap()
            .to_vec::<u8>()
            .unwrap();
        values.sort_unstable();

        assert_eq!(values, (0..=255).collect::<Vec<u8>>());
    }

    #[rstest]
    #[case(300, DType::U8)]
    #[case(129, DType::I8)]
    #[case(2050, DType::F16)]
    #[case(2, DType::Bool)]
    fn test_randperm_rejects_dtypes_too_narrow(#[case] n: usize, #[case] dtype: DType) {
        assert!(matches!(
            randperm_local(n, dtype, &mut Generator::new(0)),
            Err(GlobalError::InvalidArgument(_))
        ));

        let mut ctx = single_ctx();
        assert!(matches!(
            randperm(&mut ctx, n, dtype, rank0(), NdSbp::split(0), None),
            Err(GlobalError::InvalidArgument(_))
        ));
    }
}
