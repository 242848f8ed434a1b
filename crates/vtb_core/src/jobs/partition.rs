//! Round-robin partitioning of the item list across workers.
//!
//! Worker `i` of `W` owns positions `i, i + W, i + 2W, ...`. This is pure
//! integer arithmetic, so independently launched workers agree on
//! ownership without talking to each other.

use thiserror::Error;

/// Invalid worker arguments.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("Worker count must be at least 1")]
    NoWorkers,

    #[error("Worker index {index} is out of range for {total_workers} workers")]
    IndexOutOfRange { index: usize, total_workers: usize },
}

/// Positions in a list of `len` items owned by worker `index`.
pub fn owned_positions(
    len: usize,
    total_workers: usize,
    index: usize,
) -> Result<impl Iterator<Item = usize>, PartitionError> {
    check(total_workers, index)?;
    Ok((index..len).step_by(total_workers))
}

/// Subset of `items` owned by worker `index` out of `total_workers`.
///
/// An empty result is legal when `index >= items.len()`.
pub fn partition<T: Clone>(
    items: &[T],
    total_workers: usize,
    index: usize,
) -> Result<Vec<T>, PartitionError> {
    Ok(owned_positions(items.len(), total_workers, index)?
        .map(|pos| items[pos].clone())
        .collect())
}

fn check(total_workers: usize, index: usize) -> Result<(), PartitionError> {
    if total_workers == 0 {
        return Err(PartitionError::NoWorkers);
    }
    if index >= total_workers {
        return Err(PartitionError::IndexOutOfRange {
            index,
            total_workers,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_items_two_workers() {
        let items = vec!["a", "b", "c", "d", "e"];
        assert_eq!(partition(&items, 2, 0).unwrap(), vec!["a", "c", "e"]);
        assert_eq!(partition(&items, 2, 1).unwrap(), vec!["b", "d"]);
    }

    #[test]
    fn union_is_complete_and_disjoint() {
        for len in 0..40usize {
            let items: Vec<usize> = (0..len).collect();
            for workers in 1..12usize {
                let mut seen = vec![0u32; len];
                for index in 0..workers {
                    let subset = partition(&items, workers, index).unwrap();

                    let floor = len / workers;
                    let ceil = (len + workers - 1) / workers;
                    assert!(
                        subset.len() == floor || subset.len() == ceil,
                        "len={} workers={} index={} got {}",
                        len,
                        workers,
                        index,
                        subset.len()
                    );

                    for item in subset {
                        seen[item] += 1;
                    }
                }
                assert!(seen.iter().all(|&count| count == 1));
            }
        }
    }

    #[test]
    fn partition_is_pure() {
        let items: Vec<u32> = (0..17).collect();
        let first = partition(&items, 4, 3).unwrap();
        let second = partition(&items, 4, 3).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn worker_beyond_item_count_gets_nothing() {
        let items = vec![1, 2];
        assert!(partition(&items, 8, 5).unwrap().is_empty());
        assert!(partition::<u8>(&[], 3, 0).unwrap().is_empty());
    }

    #[test]
    fn single_worker_owns_everything() {
        let items = vec!['x', 'y', 'z'];
        assert_eq!(partition(&items, 1, 0).unwrap(), items);
    }

    #[test]
    fn rejects_invalid_workers() {
        let items = vec![1, 2, 3];
        assert_eq!(partition(&items, 0, 0), Err(PartitionError::NoWorkers));
        assert_eq!(
            partition(&items, 2, 2),
            Err(PartitionError::IndexOutOfRange {
                index: 2,
                total_workers: 2
            })
        );
    }

    #[test]
    fn positions_match_subset() {
        let positions: Vec<usize> = owned_positions(10, 3, 1).unwrap().collect();
        assert_eq!(positions, vec![1, 4, 7]);
    }
}
