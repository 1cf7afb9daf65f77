use burn_tensor::TensorData;

use crate::boxing::GlobalTarget;
use crate::sharding::{NdSbp, Placement, Sbp};
use crate::{GlobalContext, GlobalError, GlobalTensor, Result};

/// How a binary elementwise op interacts with partial sums.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryKind {
    /// `f(a + b, c + d) = f(a, c) + f(b, d)`, like addition and subtraction.
    Additive,
    /// Linear in each operand on its own, like multiplication.
    Multiplicative,
    /// `f(a + b, c) = f(a, c) + f(b, c)` but not linear in the rhs, like division.
    LhsLinear,
}

/// Distributions a binary elementwise op runs with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinaryPlan {
    /// Placement of both operands and of the output.
    pub placement: Placement,
    /// Distribution the lhs is converted to.
    pub lhs: NdSbp,
    /// Distribution the rhs is converted to.
    pub rhs: NdSbp,
    /// Distribution of the output.
    pub out: NdSbp,
    /// Whether a conversion moves data between ranks.
    pub exchange: bool,
}

/// Infers the distributions of a binary elementwise op.
///
/// Both operands must have the same global shape and dtype. The rhs is moved to the
/// placement of the lhs when they differ.
pub fn plan_binary(lhs: &GlobalTensor, rhs: &GlobalTensor, kind: BinaryKind) -> Result<BinaryPlan> {
    if lhs.shape() != rhs.shape() {
        return Err(GlobalError::ShapeMismatch {
            expected: lhs.shape().to_vec(),
            actual: rhs.shape().to_vec(),
        });
    }
    if lhs.dtype() != rhs.dtype() {
        return Err(GlobalError::InvalidArgument(format!(
            "Operands have different dtypes {:?} and {:?}",
            lhs.dtype(),
            rhs.dtype()
        )));
    }

    let same_placement = lhs.placement() == rhs.placement();
    let mut lhs_target = Vec::with_capacity(lhs.nd_sbp().len());
    let mut rhs_target = Vec::with_capacity(lhs.nd_sbp().len());
    let mut out = Vec::with_capacity(lhs.nd_sbp().len());

    for (dim, l) in lhs.nd_sbp().iter().enumerate() {
        // A moved rhs can take any distribution, pair it with the lhs entry.
        let r = if same_placement {
            rhs.nd_sbp().entries()[dim]
        } else {
            *l
        };
        let (lt, rt, ot) = combine(*l, r, kind);
        lhs_target.push(lt);
        rhs_target.push(rt);
        out.push(ot);
    }

    let lhs_exchange = lhs
        .nd_sbp()
        .iter()
        .zip(&lhs_target)
        .any(|(src, dst)| needs_exchange(*src, *dst));
    let rhs_exchange = !same_placement
        || rhs
            .nd_sbp()
            .iter()
            .zip(&rhs_target)
            .any(|(src, dst)| needs_exchange(*src, *dst));

    Ok(BinaryPlan {
        placement: lhs.placement().clone(),
        lhs: NdSbp::new(lhs_target),
        rhs: NdSbp::new(rhs_target),
        out: NdSbp::new(out),
        exchange: lhs_exchange || rhs_exchange,
    })
}

/// Target entries `(lhs, rhs, out)` for one grid dimension.
fn combine(lhs: Sbp, rhs: Sbp, kind: BinaryKind) -> (Sbp, Sbp, Sbp) {
    use Sbp::*;

    match (lhs, rhs) {
        (Split(a), Split(_)) | (Split(a), Broadcast | PartialSum) => (Split(a), Split(a), Split(a)),
        (Broadcast | PartialSum, Split(a)) => (Split(a), Split(a), Split(a)),
        (Broadcast, Broadcast) => (Broadcast, Broadcast, Broadcast),
        (PartialSum, PartialSum) => match kind {
            BinaryKind::Additive => (PartialSum, PartialSum, PartialSum),
            BinaryKind::Multiplicative | BinaryKind::LhsLinear => (Broadcast, Broadcast, Broadcast),
        },
        (PartialSum, Broadcast) => match kind {
            BinaryKind::Multiplicative | BinaryKind::LhsLinear => (PartialSum, Broadcast, PartialSum),
            BinaryKind::Additive => (Broadcast, Broadcast, Broadcast),
        },
        (Broadcast, PartialSum) => match kind {
            BinaryKind::Multiplicative => (Broadcast, PartialSum, PartialSum),
            BinaryKind::Additive | BinaryKind::LhsLinear => (Broadcast, Broadcast, Broadcast),
        },
    }
}

/// Whether converting one grid dimension from `src` to `dst` moves data between ranks.
///
/// A broadcast value can be sliced or zero-filled locally.
fn needs_exchange(src: Sbp, dst: Sbp) -> bool {
    match (src, dst) {
        _ if src == dst => false,
        (Sbp::Broadcast, Sbp::Split(_) | Sbp::PartialSum) => false,
        _ => true,
    }
}

/// Runs a binary elementwise op: converts the operands as planned by [`plan_binary`],
/// then applies `kernel` to the local components.
///
/// `kernel` receives same-shaped local components and must keep their dtype.
pub fn binary<F>(
    ctx: &GlobalContext,
    lhs: &GlobalTensor,
    rhs: &GlobalTensor,
    kind: BinaryKind,
    kernel: F,
) -> Result<GlobalTensor>
where
    F: Fn(&TensorData, &TensorData) -> Result<TensorData>,
{
    let plan = plan_binary(lhs, rhs, kind)?;
    log::debug!(
        "rank {}: binary op {} x {} -> {} (exchange: {})",
        ctx.rank(),
        plan.lhs,
        plan.rhs,
        plan.out,
        plan.exchange
    );

    let lhs = lhs.to_global(ctx, GlobalTarget::new().with_nd_sbp(plan.lhs))?;
    let rhs = rhs.to_global(
        ctx,
        GlobalTarget::new()
            .with_placement(plan.placement.clone())
            .with_nd_sbp(plan.rhs),
    )?;

    let local = if lhs.is_participant() {
        Some(kernel(lhs.local_data()?, rhs.local_data()?)?)
    } else {
        None
    };

    GlobalTensor::from_parts(
        ctx.rank(),
        lhs.shape().to_vec(),
        lhs.dtype(),
        plan.placement,
        plan.out,
        local,
    )
}
