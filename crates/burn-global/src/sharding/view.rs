use core::ops::Range;

use super::{NdSbp, Placement, Sbp};
use crate::Result;

/// Per-axis index ranges of a tensor, in global coordinates.
pub type SliceView = Vec<Range<usize>>;

/// Splits `0..len` into `parts` contiguous ranges.
///
/// The first `len % parts` ranges hold one extra element, so concatenating the
/// ranges in order gives back `0..len`.
///
/// # Panics
///
/// If `parts` is zero.
pub fn balanced_split(len: usize, parts: usize) -> Vec<Range<usize>> {
    assert!(parts > 0, "Cannot split into zero parts");
    let base = len / parts;
    let remainder = len % parts;

    let mut start = 0;
    (0..parts)
        .map(|part| {
            let size = base + usize::from(part < remainder);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

/// The slice of a global tensor held at grid `coordinate`.
///
/// Grid dimensions are applied in order: a [`Sbp::Split`] entry subdivides the
/// current range of its axis by the extent of the grid dimension, so several grid
/// dimensions splitting the same axis nest. Broadcast and partial-sum entries keep
/// the whole range.
///
/// Binding `nd_sbp` to `shape` validates it, failing with
/// [`InvalidDistribution`](crate::GlobalError::InvalidDistribution). A coordinate
/// outside the grid fails with [`InvalidArgument`](crate::GlobalError::InvalidArgument).
pub fn local_view(
    shape: &[usize],
    placement: &Placement,
    nd_sbp: &NdSbp,
    coordinate: &[usize],
) -> Result<SliceView> {
    nd_sbp.check(placement, shape.len())?;
    placement.check_coordinate(coordinate)?;

    let mut view: SliceView = shape.iter().map(|&dim| 0..dim).collect();
    for (dim, sbp) in nd_sbp.iter().enumerate() {
        match sbp {
            Sbp::Split(axis) => {
                let current = view[*axis].clone();
                let part = balanced_split(current.len(), placement.hierarchy()[dim])
                    .swap_remove(coordinate[dim]);
                view[*axis] = current.start + part.start..current.start + part.end;
            }
            Sbp::Broadcast | Sbp::PartialSum => {}
        }
    }

    Ok(view)
}

/// Shape of the slice held at grid `coordinate`, validated like [`local_view`].
pub fn local_shape(
    shape: &[usize],
    placement: &Placement,
    nd_sbp: &NdSbp,
    coordinate: &[usize],
) -> Result<Vec<usize>> {
    local_view(shape, placement, nd_sbp, coordinate).map(|view| view_shape(&view))
}

/// Lengths of each range of a view.
pub fn view_shape(view: &[Range<usize>]) -> Vec<usize> {
    view.iter().map(|range| range.len()).collect()
}

/// Intersection of two views of the same tensor, or `None` when it holds no element.
pub fn intersect(lhs: &[Range<usize>], rhs: &[Range<usize>]) -> Option<SliceView> {
    let view: SliceView = lhs
        .iter()
        .zip(rhs)
        .map(|(a, b)| a.start.max(b.start)..a.end.min(b.end).max(a.start.max(b.start)))
        .collect();

    if view.iter().any(|range| range.is_empty()) {
        None
    } else {
        Some(view)
    }
}

/// Expresses `view` relative to the origin of `outer`.
pub fn relative_to(view: &[Range<usize>], outer: &[Range<usize>]) -> SliceView {
    view.iter()
        .zip(outer)
        .map(|(range, origin)| range.start - origin.start..range.end - origin.start)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GlobalError;
    use crate::sharding::DeviceKind;
    use rstest::rstest;

    #[rstest]
    #[case(13, 2, vec![7, 6])]
    #[case(10, 2, vec![5, 5])]
    #[case(10, 3, vec![4, 3, 3])]
    #[case(2, 4, vec![1, 1, 0, 0])]
    #[case(0, 3, vec![0, 0, 0])]
    fn test_balanced_split_sizes(#[case] len: usize, #[case] parts: usize, #[case] sizes: Vec<usize>) {
        let ranges = balanced_split(len, parts);

        assert_eq!(ranges.iter().map(|r| r.len()).collect::<Vec<_>>(), sizes);
        assert_eq!(ranges.iter().map(|r| r.len()).sum::<usize>(), len);
        let concatenated: Vec<usize> = ranges.into_iter().flatten().collect();
        assert_eq!(concatenated, (0..len).collect::<Vec<_>>());
    }

    #[test]
    fn test_balanced_split_shards_differ_by_at_most_one() {
        for len in 0..64 {
            for parts in 1..9 {
                let sizes: Vec<usize> = balanced_split(len, parts).iter().map(|r| r.len()).collect();
                let max = *sizes.iter().max().unwrap();
                let min = *sizes.iter().min().unwrap();
                assert!(max - min <= 1);
                assert!(sizes.windows(2).all(|w| w[0] >= w[1]));
            }
        }
    }

    #[test]
    fn test_local_view_nested_split() {
        let placement = Placement::builder(DeviceKind::Cpu, vec![0, 1, 2, 3])
            .with_hierarchy([2, 2])
            .build()
            .unwrap();
        let nd_sbp = NdSbp::new([Sbp::Split(0), Sbp::Split(0)]);

        let views: Vec<SliceView> = placement
            .coordinates()
            .map(|c| local_view(&[10, 3], &placement, &nd_sbp, &c).unwrap())
            .collect();

        assert_eq!(
            views,
            vec![
                vec![0..3, 0..3],
                vec![3..5, 0..3],
                vec![5..8, 0..3],
                vec![8..10, 0..3],
            ]
        );
    }

    #[test]
    fn test_local_view_broadcast_and_partial_keep_global_shape() {
        let placement = Placement::builder(DeviceKind::Cpu, vec![0, 1, 2, 3])
            .with_hierarchy([2, 2])
            .build()
            .unwrap();
        let nd_sbp = NdSbp::new([Sbp::Broadcast, Sbp::PartialSum]);

        assert_eq!(
            local_shape(&[4, 5], &placement, &nd_sbp, &[1, 1]).unwrap(),
            vec![4, 5]
        );
    }

    #[test]
    fn test_local_shape_rejects_split_axis_out_of_range() {
        let placement = Placement::new(DeviceKind::Cpu, vec![0, 1]).unwrap();

        assert!(matches!(
            local_shape(&[4], &placement, &NdSbp::split(1), &[0]),
            Err(GlobalError::InvalidDistribution(_))
        ));
    }

    #[rstest]
    #[case(vec![2])]
    #[case(vec![0, 0])]
    fn test_local_view_rejects_coordinates_outside_the_grid(#[case] coordinate: Vec<usize>) {
        let placement = Placement::new(DeviceKind::Cpu, vec![0, 1]).unwrap();

        assert!(matches!(
            local_view(&[4], &placement, &NdSbp::split(0), &coordinate),
            Err(GlobalError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_local_view_rejects_mismatched_grid_rank() {
        let placement = Placement::new(DeviceKind::Cpu, vec![0, 1]).unwrap();
        let nd_sbp = NdSbp::new([Sbp::Split(0), Sbp::Broadcast]);

        assert!(matches!(
            local_view(&[4], &placement, &nd_sbp, &[0]),
            Err(GlobalError::InvalidDistribution(_))
        ));
    }

    #[test]
    fn test_intersect_and_relative() {
        let a = vec![0..6, 0..4];
        let b = vec![4..10, 2..4];

        let overlap = intersect(&a, &b).unwrap();
        assert_eq!(overlap, vec![4..6, 2..4]);
        assert_eq!(relative_to(&overlap, &b), vec![0..2, 0..2]);
        assert_eq!(intersect(&[0..3], &[3..5]), None);
    }
}
