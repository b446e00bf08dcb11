//! Partition Planner
//!
//! Turns the storage ring into a worklist: one partition per storage
//! sub-range (wrap-around range included), each assigned to a compute
//! worker. When the ring has fewer sub-ranges than `compute workers * fan_out`,
//! sub-ranges are cut at interpolated split points until there are enough.
//! Partitions are dealt to compute workers round-robin.

use super::error::{DataflowError, DataflowResult};
use crate::membership::types::WorkerInfo;
use crate::storage::partitioner::ring_ranges;

/// Characters used for split-point interpolation: printable ASCII.
const DIGIT_BASE: u128 = 95;
const FIRST_DIGIT: u8 = b' ';
const SPLIT_WIDTH: usize = 8;

/// One unit of dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Address of the storage worker holding the range.
    pub storage_worker: String,
    pub from: Option<String>,
    pub to_exclusive: Option<String>,
    /// Address of the compute worker that processes the range.
    pub compute_worker: String,
}

pub struct Partitioner {
    fan_out: usize,
}

impl Partitioner {
    /// `fan_out` is the number of key ranges wanted per compute worker.
    pub fn new(fan_out: usize) -> Self {
        Self {
            fan_out: fan_out.max(1),
        }
    }

    pub fn plan(&self, storage: &[WorkerInfo], compute: &[WorkerInfo]) -> DataflowResult<Vec<Partition>> {
        if compute.is_empty() {
            return Err(DataflowError::NoComputeWorkers);
        }
        if storage.is_empty() {
            return Err(DataflowError::Other(anyhow::anyhow!("no storage workers registered")));
        }

        let ranges = ring_ranges(storage);
        let wanted = compute.len() * self.fan_out;
        let pieces_per_range = wanted.div_ceil(ranges.len()).max(1);

        let mut partitions = Vec::new();
        for owned in ranges {
            let storage_worker = &storage[owned.worker_index].address;
            let from = owned.range.from.as_deref();
            let to = owned.range.to_exclusive.as_deref();

            let mut bounds: Vec<Option<String>> = vec![from.map(str::to_string)];
            bounds.extend(split_points(from, to, pieces_per_range).into_iter().map(Some));
            bounds.push(to.map(str::to_string));

            for window in bounds.windows(2) {
                let compute_worker = &compute[partitions.len() % compute.len()];
                partitions.push(Partition {
                    storage_worker: storage_worker.clone(),
                    from: window[0].clone(),
                    to_exclusive: window[1].clone(),
                    compute_worker: compute_worker.address.clone(),
                });
            }
        }

        tracing::debug!(
            "Planned {} partitions over {} compute workers (fan-out {})",
            partitions.len(),
            compute.len(),
            self.fan_out
        );
        Ok(partitions)
    }
}

fn to_number(key: &str) -> u128 {
    let bytes = key.as_bytes();
    (0..SPLIT_WIDTH).fold(0u128, |acc, i| {
        let digit = bytes
            .get(i)
            .map(|&b| b.clamp(FIRST_DIGIT, b'~') - FIRST_DIGIT)
            .unwrap_or(0);
        acc * DIGIT_BASE + digit as u128
    })
}

fn from_number(mut n: u128) -> String {
    let mut digits = [FIRST_DIGIT; SPLIT_WIDTH];
    for slot in digits.iter_mut().rev() {
        *slot = FIRST_DIGIT + (n % DIGIT_BASE) as u8;
        n /= DIGIT_BASE;
    }
    String::from_utf8_lossy(&digits).trim_end().to_string()
}

/// Up to `pieces - 1` keys strictly inside `(from, to)`, ascending. Fewer
/// are returned when the range is too narrow to cut.
pub fn split_points(from: Option<&str>, to: Option<&str>, pieces: usize) -> Vec<String> {
    if pieces < 2 {
        return Vec::new();
    }
    let low = from.map(to_number).unwrap_or(0);
    let high = to.map(to_number).unwrap_or(DIGIT_BASE.pow(SPLIT_WIDTH as u32) - 1);
    if high <= low {
        return Vec::new();
    }

    let mut points: Vec<String> = (1..pieces as u128)
        .map(|j| from_number(low + (high - low) * j / pieces as u128))
        .filter(|p| {
            !p.is_empty()
                && from.is_none_or(|f| p.as_str() > f)
                && to.is_none_or(|t| p.as_str() < t)
        })
        .collect();
    points.sort();
    points.dedup();
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workers(prefix: &str, ids: &[&str]) -> Vec<WorkerInfo> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| WorkerInfo::new(*id, format!("{}:{}", prefix, 9000 + i)))
            .collect()
    }

    fn covers_once(partitions: &[Partition], key: &str) -> bool {
        partitions
            .iter()
            .filter(|p| {
                p.from.as_deref().is_none_or(|f| key >= f)
                    && p.to_exclusive.as_deref().is_none_or(|t| key < t)
            })
            .count()
            == 1
    }

    #[test]
    fn test_plan_without_compute_workers_fails() {
        let storage = workers("kvs", &["m"]);
        assert!(matches!(
            Partitioner::new(1).plan(&storage, &[]),
            Err(DataflowError::NoComputeWorkers)
        ));
    }

    #[test]
    fn test_plan_one_partition_per_ring_range() {
        let storage = workers("kvs", &["d", "m"]);
        let compute = workers("flame", &["a"]);

        let plan = Partitioner::new(1).plan(&storage, &compute).unwrap();

        assert_eq!(plan.len(), 3);
        assert!(plan.iter().all(|p| p.compute_worker == "flame:9000"));
        assert_eq!(plan[2].from, None);
        assert_eq!(plan[2].to_exclusive.as_deref(), Some("d"));
        assert_eq!(plan[2].storage_worker, "kvs:9001");
    }

    #[test]
    fn test_plan_splits_for_fan_out_and_balances() {
        let storage = workers("kvs", &["m"]);
        let compute = workers("flame", &["a", "b", "c"]);

        let plan = Partitioner::new(2).plan(&storage, &compute).unwrap();

        assert!(plan.len() >= 6, "expected at least 6 partitions, got {}", plan.len());
        for key in ["", "a", "abc", "l", "m", "mz", "q", "zzzz", "~~~~~~~~~~"] {
            assert!(covers_once(&plan, key), "key {:?} not covered exactly once", key);
        }
        let mut per_worker = std::collections::HashMap::new();
        for p in &plan {
            *per_worker.entry(p.compute_worker.clone()).or_insert(0) += 1;
        }
        let max = per_worker.values().max().unwrap();
        let min = per_worker.values().min().unwrap();
        assert_eq!(per_worker.len(), 3);
        assert!(max - min <= 1);
    }

    #[test]
    fn test_split_points_are_strictly_inside() {
        let points = split_points(Some("apple"), Some("banana"), 4);
        assert_eq!(points.len(), 3);
        assert!(points.iter().all(|p| p.as_str() > "apple" && p.as_str() < "banana"));
        assert!(points.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_narrow_range_is_not_split() {
        // differs only past the interpolation width
        assert!(split_points(Some("abcdefghX"), Some("abcdefghY"), 4).is_empty());
        assert!(split_points(Some("b"), Some("a"), 4).is_empty());
    }
}
