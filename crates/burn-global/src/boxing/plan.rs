use derive_new::new;

use crate::data::WriteMode;
use crate::Result;
use crate::sharding::{NdSbp, Placement, Sbp, SliceView, intersect, local_view};

/// A region of the global tensor sent from one rank to another.
#[derive(new, Clone, Debug, PartialEq, Eq)]
pub struct Transfer {
    /// Sending rank.
    pub src: usize,
    /// Receiving rank.
    pub dst: usize,
    /// The region, in global coordinates.
    pub region: SliceView,
}

/// The transfers converting a global tensor from one distribution to another.
///
/// Every rank computes the same plan from the metadata alone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoxingPlan {
    /// Transfers ordered by receiving rank, then by source replica.
    pub transfers: Vec<Transfer>,
    /// [`WriteMode::Accumulate`] when the source holds partial sums.
    pub mode: WriteMode,
}

impl BoxingPlan {
    /// Whether no data crosses ranks.
    pub fn is_local(&self) -> bool {
        self.transfers.iter().all(|transfer| transfer.src == transfer.dst)
    }

    /// Transfers `rank` sends to other ranks.
    pub fn sends(&self, rank: usize) -> impl Iterator<Item = &Transfer> {
        self.transfers
            .iter()
            .filter(move |transfer| transfer.src == rank && transfer.dst != rank)
    }

    /// Transfers received by `rank`, its own included, in application order.
    pub fn receives(&self, rank: usize) -> impl Iterator<Item = &Transfer> {
        self.transfers
            .iter()
            .filter(move |transfer| transfer.dst == rank)
    }
}

/// Plans the conversion of a tensor of `shape` from `(src_placement, src_sbp)` to
/// `(dst_placement, dst_sbp)`.
///
/// Only the rank at coordinate 0 of the target partial-sum dimensions receives the
/// value; the other partial ranks end up with zeros. Source ranks that differ only
/// along broadcast dimensions hold the same replica: a receiver holding a replica
/// reads it locally, otherwise the replica at coordinate 0 of those dimensions
/// sends it. Each receiver gets exactly the intersection of its slice with each
/// replica's slice.
///
/// Both descriptors are validated against `shape` and their placement.
pub fn plan_boxing(
    shape: &[usize],
    src_placement: &Placement,
    src_sbp: &NdSbp,
    dst_placement: &Placement,
    dst_sbp: &NdSbp,
) -> Result<BoxingPlan> {
    src_sbp.check(src_placement, shape.len())?;
    dst_sbp.check(dst_placement, shape.len())?;

    let mode = if src_sbp.has_partial_sum() {
        WriteMode::Accumulate
    } else {
        WriteMode::Assign
    };

    let replicas = src_placement
        .coordinates()
        .filter(|coordinate| is_replica_root(coordinate, src_sbp))
        .map(|coordinate| {
            let view = local_view(shape, src_placement, src_sbp, &coordinate)?;
            Ok((coordinate, view))
        })
        .collect::<Result<Vec<(Vec<usize>, SliceView)>>>()?;

    let mut transfers = Vec::new();
    for dst_coordinate in dst_placement.coordinates() {
        if !holds_value(&dst_coordinate, dst_sbp) {
            continue;
        }
        let dst = dst_placement.rank_at(&dst_coordinate)?;
        let dst_view = local_view(shape, dst_placement, dst_sbp, &dst_coordinate)?;
        let own_replica = src_placement
            .coordinate(dst)
            .map(|coordinate| replica_root(&coordinate, src_sbp));

        for (coordinate, src_view) in replicas.iter() {
            let Some(region) = intersect(&dst_view, src_view) else {
                continue;
            };
            let src = if own_replica.as_ref() == Some(coordinate) {
                dst
            } else {
                src_placement.rank_at(coordinate)?
            };
            transfers.push(Transfer::new(src, dst, region));
        }
    }

    Ok(BoxingPlan { transfers, mode })
}

/// Whether a coordinate of the target holds the value rather than a zero addend.
pub(crate) fn holds_value(coordinate: &[usize], nd_sbp: &NdSbp) -> bool {
    nd_sbp
        .iter()
        .zip(coordinate)
        .all(|(sbp, c)| *sbp != Sbp::PartialSum || *c == 0)
}

/// The coordinate of the replica root sharing the data of `coordinate`.
pub(crate) fn replica_root(coordinate: &[usize], nd_sbp: &NdSbp) -> Vec<usize> {
    nd_sbp
        .iter()
        .zip(coordinate)
        .map(|(sbp, c)| if *sbp == Sbp::Broadcast { 0 } else { *c })
        .collect()
}

fn is_replica_root(coordinate: &[usize], nd_sbp: &NdSbp) -> bool {
    replica_root(coordinate, nd_sbp) == coordinate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharding::DeviceKind;

    fn pair() -> Placement {
        Placement::new(DeviceKind::Cpu, vec![0, 1]).unwrap()
    }

    #[test]
    fn test_broadcast_to_split_is_local() {
        let plan = plan_boxing(&[10], &pair(), &NdSbp::broadcast(1), &pair(), &NdSbp::split(0))
            .unwrap();

        assert!(plan.is_local());
        assert_eq!(
            plan.transfers,
            vec![Transfer::new(0, 0, vec![0..5]), Transfer::new(1, 1, vec![5..10])]
        );
        assert_eq!(plan.mode, WriteMode::Assign);
    }

    #[test]
    fn test_split_to_broadcast_gathers() {
        let plan = plan_boxing(&[13], &pair(), &NdSbp::split(0), &pair(), &NdSbp::broadcast(1))
            .unwrap();

        assert_eq!(
            plan.transfers,
            vec![
                Transfer::new(0, 0, vec![0..7]),
                Transfer::new(1, 0, vec![7..13]),
                Transfer::new(0, 1, vec![0..7]),
                Transfer::new(1, 1, vec![7..13]),
            ]
        );
        assert_eq!(plan.sends(0).count(), 1);
        assert_eq!(plan.receives(1).count(), 2);
    }

    #[test]
    fn test_partial_to_split_reduces_and_scatters() {
        let plan = plan_boxing(
            &[4],
            &pair(),
            &NdSbp::new([Sbp::PartialSum]),
            &pair(),
            &NdSbp::split(0),
        )
        .unwrap();

        assert_eq!(plan.mode, WriteMode::Accumulate);
        assert_eq!(
            plan.transfers,
            vec![
                Transfer::new(0, 0, vec![0..2]),
                Transfer::new(1, 0, vec![0..2]),
                Transfer::new(0, 1, vec![2..4]),
                Transfer::new(1, 1, vec![2..4]),
            ]
        );
    }

    #[test]
    fn test_broadcast_to_partial_fills_first_rank() {
        let plan = plan_boxing(
            &[3],
            &pair(),
            &NdSbp::broadcast(1),
            &pair(),
            &NdSbp::new([Sbp::PartialSum]),
        )
        .unwrap();

        assert_eq!(plan.transfers, vec![Transfer::new(0, 0, vec![0..3])]);
    }

    #[test]
    fn test_placement_change_sends_from_replica_root() {
        let src = Placement::new(DeviceKind::Cpu, vec![0, 1]).unwrap();
        let dst = Placement::new(DeviceKind::Cpu, vec![2, 3]).unwrap();

        let plan = plan_boxing(&[4], &src, &NdSbp::broadcast(1), &dst, &NdSbp::split(0)).unwrap();

        assert_eq!(
            plan.transfers,
            vec![Transfer::new(0, 2, vec![0..2]), Transfer::new(0, 3, vec![2..4])]
        );
    }

    #[test]
    fn test_split_axis_change_on_grid() {
        let grid = Placement::builder(DeviceKind::Cpu, vec![0, 1, 2, 3])
            .with_hierarchy([2, 2])
            .build()
            .unwrap();
        let src = NdSbp::new([Sbp::Split(0), Sbp::Broadcast]);
        let dst = NdSbp::new([Sbp::Split(0), Sbp::Split(1)]);

        let plan = plan_boxing(&[4, 4], &grid, &src, &grid, &dst).unwrap();

        assert!(plan.is_local());
        assert_eq!(plan.transfers.len(), 4);
        assert_eq!(plan.transfers[3], Transfer::new(3, 3, vec![2..4, 2..4]));
    }

    #[test]
    fn test_plan_rejects_split_axis_out_of_range() {
        let result = plan_boxing(&[4], &pair(), &NdSbp::broadcast(1), &pair(), &NdSbp::split(1));

        assert!(matches!(result, Err(crate::GlobalError::InvalidDistribution(_))));
    }
}
