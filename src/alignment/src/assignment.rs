use std::fmt::{self, Display, Formatter};

/// A contiguous window of one partition's pattern columns, assigned to a
/// single worker. Offsets are relative to the partition's `lower` bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub partition: usize,
    pub offset: usize,
    pub width: usize,
}

impl Assignment {
    /// True when this window spans the whole partition of width `full_width`.
    #[must_use]
    pub fn covers(&self, full_width: usize) -> bool {
        self.offset == 0 && self.width == full_width
    }
}

impl Display for Assignment {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "partition {} [{}, {})", self.partition, self.offset, self.offset + self.width)
    }
}

/// Split every partition into contiguous column windows, one per worker,
/// spreading columns as evenly as possible (window widths differ by at most
/// one column). Workers with an empty share of a partition receive no
/// assignment for it.
///
/// The mapping is a pure function of `(widths, workers)`: it is computed
/// once at load time and must never change during a tree computation, since
/// conditional likelihood slices and scalers are keyed by it.
#[must_use]
pub fn balance(widths: &[usize], workers: usize) -> Vec<Vec<Assignment>> {
    assert!(workers > 0);
    let mut per_worker: Vec<Vec<Assignment>> = vec![Vec::new(); workers];

    for (partition, &width) in widths.iter().enumerate() {
        let base = width / workers;
        let remainder = width % workers;
        let mut offset = 0;
        for (rank, assignments) in per_worker.iter_mut().enumerate() {
            let share = base + usize::from(rank < remainder);
            if share == 0 { continue }
            assignments.push(Assignment { partition, offset, width: share });
            offset += share;
        }
        debug_assert_eq!(offset, width);
    }
    per_worker
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_worker_takes_everything() {
        let assigns = balance(&[100, 7], 1);
        assert_eq!(assigns.len(), 1);
        assert_eq!(assigns[0], vec![
            Assignment { partition: 0, offset: 0, width: 100 },
            Assignment { partition: 1, offset: 0, width: 7 },
        ]);
        assert!(assigns[0][0].covers(100));
    }

    #[test]
    fn windows_are_contiguous_and_cover() {
        let widths = [17, 4, 1];
        let workers = 4;
        let assigns = balance(&widths, workers);

        for (partition, &width) in widths.iter().enumerate() {
            let mut windows: Vec<&Assignment> = assigns.iter()
                .flatten()
                .filter(|a| a.partition == partition)
                .collect();
            windows.sort_by_key(|a| a.offset);

            let mut expected_offset = 0;
            for window in &windows {
                assert_eq!(window.offset, expected_offset);
                expected_offset += window.width;
            }
            assert_eq!(expected_offset, width);
        }
    }

    #[test]
    fn spread_is_at_most_one_column() {
        let assigns = balance(&[10], 4);
        let widths: Vec<usize> = assigns.iter().flatten().map(|a| a.width).collect();
        assert_eq!(widths.iter().sum::<usize>(), 10);
        assert!(widths.iter().max().unwrap() - widths.iter().min().unwrap() <= 1);
    }

    #[test]
    fn empty_share_yields_no_assignment() {
        let assigns = balance(&[2], 4);
        let total: usize = assigns.iter().map(Vec::len).sum();
        assert_eq!(total, 2);
    }
}
