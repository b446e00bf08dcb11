//! Key Ring
//!
//! Range partitioning over worker-chosen ids. With workers sorted by id,
//! worker `i` owns `[id_i, id_{i+1})`; the last worker owns everything from
//! its own id upward and, wrapping around, every key below the first id.
//!
//! Keys are not hashed, so the spread of the ids directly shapes the load.

use crate::membership::types::WorkerInfo;

/// A half-open key interval; `None` bounds are open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub from: Option<String>,
    pub to_exclusive: Option<String>,
}

impl KeyRange {
    pub fn new(from: Option<&str>, to_exclusive: Option<&str>) -> Self {
        Self {
            from: from.map(str::to_string),
            to_exclusive: to_exclusive.map(str::to_string),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.from.as_deref().is_none_or(|from| key >= from)
            && self.to_exclusive.as_deref().is_none_or(|to| key < to)
    }
}

/// A key range together with the storage worker that holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedRange {
    pub worker_index: usize,
    pub range: KeyRange,
}

/// Index of the worker owning `key`. `workers` must be sorted by id and
/// non-empty.
pub fn owner_index(key: &str, workers: &[WorkerInfo]) -> usize {
    let at_or_below = workers.partition_point(|w| w.id.as_str() <= key);
    if at_or_below == 0 {
        workers.len().saturating_sub(1)
    } else {
        at_or_below - 1
    }
}

/// The whole key space as one range per worker plus the wrap-around range
/// below the first id, which belongs to the last worker.
pub fn ring_ranges(workers: &[WorkerInfo]) -> Vec<OwnedRange> {
    let Some(first) = workers.first() else {
        return Vec::new();
    };
    let last = workers.len() - 1;

    let mut ranges: Vec<OwnedRange> = workers
        .windows(2)
        .enumerate()
        .map(|(i, pair)| OwnedRange {
            worker_index: i,
            range: KeyRange::new(Some(pair[0].id.as_str()), Some(pair[1].id.as_str())),
        })
        .collect();
    ranges.push(OwnedRange {
        worker_index: last,
        range: KeyRange::new(Some(workers[last].id.as_str()), None),
    });
    ranges.push(OwnedRange {
        worker_index: last,
        range: KeyRange::new(None, Some(first.id.as_str())),
    });
    ranges
}

/// Per-worker sub-ranges intersecting `[start, end)`, in key order: the
/// wrap-around piece below the first id comes first, then the ring.
pub fn scan_ranges(workers: &[WorkerInfo], start: Option<&str>, end: Option<&str>) -> Vec<OwnedRange> {
    let n = workers.len();
    if n == 0 {
        return Vec::new();
    }
    let id = |i: usize| workers[i].id.as_str();
    let mut ranges = Vec::new();

    if start.is_none_or(|s| s < id(0)) {
        let to = match end {
            Some(e) if e < id(0) => e,
            _ => id(0),
        };
        ranges.push(OwnedRange {
            worker_index: n - 1,
            range: KeyRange::new(start, Some(to)),
        });
    }

    for i in 0..n {
        let is_last = i == n - 1;
        let starts_before_next = start.is_none_or(|s| is_last || s < id(i + 1));
        let ends_after_this = end.is_none_or(|e| e > id(i));
        if !(starts_before_next && ends_after_this) {
            continue;
        }

        let from = match start {
            Some(s) if s > id(i) => s,
            _ => id(i),
        };
        let to = match end {
            Some(e) if is_last || e < id(i + 1) => Some(e),
            _ if is_last => None,
            _ => Some(id(i + 1)),
        };
        ranges.push(OwnedRange {
            worker_index: i,
            range: KeyRange::new(Some(from), to),
        });
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(ids: &[&str]) -> Vec<WorkerInfo> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| WorkerInfo::new(*id, format!("127.0.0.1:{}", 8000 + i)))
            .collect()
    }

    #[test]
    fn test_owner_index_ranges() {
        let workers = ring(&["d", "m", "t"]);
        assert_eq!(owner_index("d", &workers), 0);
        assert_eq!(owner_index("hello", &workers), 0);
        assert_eq!(owner_index("m", &workers), 1);
        assert_eq!(owner_index("stop", &workers), 1);
        assert_eq!(owner_index("t", &workers), 2);
        assert_eq!(owner_index("zebra", &workers), 2);
        // wrap-around
        assert_eq!(owner_index("apple", &workers), 2);
        assert_eq!(owner_index("", &workers), 2);
    }

    #[test]
    fn test_owner_index_monotonic_above_first_id() {
        let workers = ring(&["d", "m", "t"]);
        let keys = ["d", "da", "e", "lz", "m", "n", "s", "t", "u", "zz"];
        let owners: Vec<usize> = keys.iter().map(|k| owner_index(k, &workers)).collect();
        assert!(owners.windows(2).all(|w| w[0] <= w[1]), "{:?}", owners);
    }

    #[test]
    fn test_single_worker_owns_everything() {
        let workers = ring(&["m"]);
        assert_eq!(owner_index("a", &workers), 0);
        assert_eq!(owner_index("z", &workers), 0);
        assert_eq!(
            ring_ranges(&workers),
            vec![
                OwnedRange {
                    worker_index: 0,
                    range: KeyRange::new(Some("m"), None)
                },
                OwnedRange {
                    worker_index: 0,
                    range: KeyRange::new(None, Some("m"))
                },
            ]
        );
    }

    #[test]
    fn test_ring_ranges_cover_every_key_once() {
        let workers = ring(&["d", "m", "t"]);
        let ranges = ring_ranges(&workers);
        assert_eq!(ranges.len(), 4);

        for key in ["", "a", "d", "k", "m", "q", "t", "zzz"] {
            let holders: Vec<&OwnedRange> = ranges.iter().filter(|r| r.range.contains(key)).collect();
            assert_eq!(holders.len(), 1, "key {:?} covered {} times", key, holders.len());
            assert_eq!(holders[0].worker_index, owner_index(key, &workers));
        }
    }

    #[test]
    fn test_scan_ranges_full_table() {
        let workers = ring(&["d", "m", "t"]);
        let ranges = scan_ranges(&workers, None, None);
        let expected = vec![
            (2, None, Some("d")),
            (0, Some("d"), Some("m")),
            (1, Some("m"), Some("t")),
            (2, Some("t"), None),
        ];
        let actual: Vec<(usize, Option<&str>, Option<&str>)> = ranges
            .iter()
            .map(|r| (r.worker_index, r.range.from.as_deref(), r.range.to_exclusive.as_deref()))
            .collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_scan_ranges_bounded() {
        let workers = ring(&["d", "m", "t"]);
        let ranges = scan_ranges(&workers, Some("f"), Some("p"));
        let actual: Vec<(usize, Option<&str>, Option<&str>)> = ranges
            .iter()
            .map(|r| (r.worker_index, r.range.from.as_deref(), r.range.to_exclusive.as_deref()))
            .collect();
        assert_eq!(actual, vec![(0, Some("f"), Some("m")), (1, Some("m"), Some("p"))]);
    }

    #[test]
    fn test_scan_ranges_below_first_id() {
        let workers = ring(&["d", "m", "t"]);
        let ranges = scan_ranges(&workers, Some("a"), Some("c"));
        assert_eq!(
            ranges,
            vec![OwnedRange {
                worker_index: 2,
                range: KeyRange::new(Some("a"), Some("c"))
            }]
        );
    }

    #[test]
    fn test_split_scans_do_not_overlap() {
        let workers = ring(&["d", "m", "t"]);
        let left = scan_ranges(&workers, Some("A"), Some("k"));
        let right = scan_ranges(&workers, Some("k"), Some("z"));
        for key in ["A", "b", "d", "j", "k", "l", "m", "s", "t", "y"] {
            let hits = left
                .iter()
                .chain(right.iter())
                .filter(|r| r.range.contains(key))
                .count();
            assert_eq!(hits, 1, "key {:?}", key);
        }
    }
}
