use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::{DataflowError, DataflowResult};
use super::protocol::DispatchQuery;

/// A key/value pair as produced and consumed by pair operations. In a pair
/// table the key is the row key and each column holds one value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pair(pub String, pub String);

impl Pair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self(key.into(), value.into())
    }

    pub fn key(&self) -> &str {
        &self.0
    }

    pub fn value(&self) -> &str {
        &self.1
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.0, self.1)
    }
}

/// Reference to a registered operation plus the values it captured.
///
/// This is what travels in a dispatch body: the worker looks `name` up in
/// its own registry and calls it with `args`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Closure {
    pub name: String,
    pub args: Vec<String>,
}

impl Closure {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn to_bytes(&self) -> DataflowResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| DataflowError::Other(e.into()))
    }

    pub fn from_bytes(bytes: &[u8]) -> DataflowResult<Self> {
        bincode::deserialize(bytes).map_err(|e| DataflowError::InvalidParameter {
            name: "closure",
            reason: e.to_string(),
        })
    }
}

/// What a job ships to compute workers before running: its name and the
/// operations it will reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub job: String,
    pub operations: Vec<String>,
}

impl BundleManifest {
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// The shape of an operation's result table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// One value per row under the `value` column.
    Rows,
    /// Row key is the pair key, every column holds one value.
    Pairs,
    /// A single value read back by the driver.
    Scalar,
}

/// Every operation a compute worker can run, with its typed parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    FlatMap,
    MapToPair,
    FlatMapToPair,
    GroupBy,
    Filter,
    MapPartitions,
    FoldByKey { zero: String },
    Fold { zero: String },
    Intersection { other: String },
    Sample { probability: f64 },
    Join { other_table: String },
    FlatMapFromPair,
    FlatMapToPairFromPair,
    FromTable,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::FlatMap => "flatMap",
            Operation::MapToPair => "mapToPair",
            Operation::FlatMapToPair => "flatMapToPair",
            Operation::GroupBy => "groupBy",
            Operation::Filter => "filter",
            Operation::MapPartitions => "mapPartitions",
            Operation::FoldByKey { .. } => "foldByKey",
            Operation::Fold { .. } => "fold",
            Operation::Intersection { .. } => "intersection",
            Operation::Sample { .. } => "sample",
            Operation::Join { .. } => "join",
            Operation::FlatMapFromPair => "flatMapFromPair",
            Operation::FlatMapToPairFromPair => "flatMapToPairFromPair",
            Operation::FromTable => "fromTable",
        }
    }

    pub fn output_kind(&self) -> OutputKind {
        match self {
            Operation::MapToPair
            | Operation::GroupBy
            | Operation::FoldByKey { .. }
            | Operation::FlatMapToPair
            | Operation::FlatMapToPairFromPair
            | Operation::Join { .. } => OutputKind::Pairs,
            Operation::Fold { .. } => OutputKind::Scalar,
            Operation::FlatMap
            | Operation::Filter
            | Operation::MapPartitions
            | Operation::Intersection { .. }
            | Operation::Sample { .. }
            | Operation::FlatMapFromPair
            | Operation::FromTable => OutputKind::Rows,
        }
    }

    /// The operation-specific query parameter, if any.
    pub fn extra_param(&self) -> Option<(&'static str, String)> {
        match self {
            Operation::FoldByKey { zero } => Some(("zero", zero.clone())),
            Operation::Fold { zero } => Some(("zero2", zero.clone())),
            Operation::Intersection { other } => Some(("that", other.clone())),
            Operation::Sample { probability } => Some(("prob", probability.to_string())),
            Operation::Join { other_table } => Some(("otherTable", other_table.clone())),
            _ => None,
        }
    }

    /// Rebuilds the operation from a dispatch's `oper` and extra parameter.
    pub fn from_query(query: &DispatchQuery) -> DataflowResult<Operation> {
        let oper = query
            .oper
            .as_deref()
            .ok_or(DataflowError::MissingParameter("oper"))?;
        let required = |value: &Option<String>, name: &'static str| {
            value.clone().ok_or(DataflowError::MissingParameter(name))
        };

        let operation = match oper {
            "flatMap" => Operation::FlatMap,
            "mapToPair" => Operation::MapToPair,
            "flatMapToPair" => Operation::FlatMapToPair,
            "groupBy" => Operation::GroupBy,
            "filter" => Operation::Filter,
            "mapPartitions" => Operation::MapPartitions,
            "foldByKey" => Operation::FoldByKey {
                zero: required(&query.zero, "zero")?,
            },
            "fold" => Operation::Fold {
                zero: required(&query.zero2, "zero2")?,
            },
            "intersection" => Operation::Intersection {
                other: required(&query.that, "that")?,
            },
            "sample" => {
                let raw = required(&query.prob, "prob")?;
                let probability: f64 = raw.parse().map_err(|_| DataflowError::InvalidParameter {
                    name: "prob",
                    reason: format!("'{}' is not a number", raw),
                })?;
                if !(0.0..=1.0).contains(&probability) {
                    return Err(DataflowError::InvalidParameter {
                        name: "prob",
                        reason: format!("{} is outside [0, 1]", probability),
                    });
                }
                Operation::Sample { probability }
            }
            "join" => Operation::Join {
                other_table: required(&query.other_table, "otherTable")?,
            },
            "flatMapFromPair" => Operation::FlatMapFromPair,
            "flatMapToPairFromPair" => Operation::FlatMapToPairFromPair,
            "fromTable" => Operation::FromTable,
            other => return Err(DataflowError::UnknownOperation(other.to_string())),
        };
        Ok(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(oper: &str) -> DispatchQuery {
        DispatchQuery {
            oper: Some(oper.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_closure_bytes_roundtrip() {
        let closure = Closure::new("split_words").with_arg(",");
        let decoded = Closure::from_bytes(&closure.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, closure);
        assert!(Closure::from_bytes(b"\xff").is_err());
    }

    #[test]
    fn test_operation_from_query_reads_extra_param() {
        let mut q = query("foldByKey");
        q.zero = Some("0".to_string());
        assert_eq!(
            Operation::from_query(&q).unwrap(),
            Operation::FoldByKey {
                zero: "0".to_string()
            }
        );

        let mut q = query("sample");
        q.prob = Some("0.25".to_string());
        assert_eq!(
            Operation::from_query(&q).unwrap(),
            Operation::Sample { probability: 0.25 }
        );
    }

    #[test]
    fn test_operation_from_query_errors() {
        assert!(matches!(
            Operation::from_query(&query("fold")),
            Err(DataflowError::MissingParameter("zero2"))
        ));
        assert!(matches!(
            Operation::from_query(&query("teleport")),
            Err(DataflowError::UnknownOperation(_))
        ));
        let mut q = query("sample");
        q.prob = Some("1.5".to_string());
        assert!(matches!(
            Operation::from_query(&q),
            Err(DataflowError::InvalidParameter { name: "prob", .. })
        ));
    }

    #[test]
    fn test_output_kinds() {
        assert_eq!(Operation::MapToPair.output_kind(), OutputKind::Pairs);
        assert_eq!(
            Operation::Join {
                other_table: "t".into()
            }
            .output_kind(),
            OutputKind::Pairs
        );
        assert_eq!(
            Operation::Fold { zero: "0".into() }.output_kind(),
            OutputKind::Scalar
        );
        assert_eq!(Operation::FlatMap.output_kind(), OutputKind::Rows);
    }
}
