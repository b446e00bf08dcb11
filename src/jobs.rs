//! Built-in operations and jobs.
//!
//! Every process registers the same set at startup, so a closure name sent
//! by a driver resolves to the same code on every compute worker.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::dataflow::context::DataflowContext;
use crate::dataflow::registry::{JobRegistry, OperationFn, OperationRegistry};
use crate::dataflow::types::{Closure, Pair};

pub fn register_operations(registry: &OperationRegistry) {
    registry.register(
        "split_words",
        OperationFn::flat_map(|_, line| {
            Ok(line
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| !w.is_empty())
                .map(str::to_lowercase)
                .collect())
        }),
    );
    registry.register("word_one", OperationFn::to_pair(|_, word| Ok(Pair::new(word, "1"))));
    registry.register(
        "letters",
        OperationFn::to_pairs(|_, word| Ok(word.chars().map(|c| Pair::new(c.to_string(), word)).collect())),
    );
    registry.register(
        "first_letter",
        OperationFn::key_of(|_, value| Ok(value.chars().take(1).collect())),
    );
    registry.register(
        "longer_than",
        OperationFn::predicate(|args, value| {
            let min: usize = args
                .first()
                .context("longer_than needs a length")?
                .parse()
                .context("longer_than length is not a number")?;
            Ok(value.chars().count() > min)
        }),
    );
    registry.register(
        "upper_partition",
        OperationFn::partition(|_, values| Ok(values.into_iter().map(|v| v.to_uppercase()).collect())),
    );
    registry.register(
        "sum",
        OperationFn::combine(|_, acc, value| {
            let acc: i64 = acc.parse().with_context(|| format!("'{}' is not a number", acc))?;
            let value: i64 = value.parse().with_context(|| format!("'{}' is not a number", value))?;
            Ok((acc + value).to_string())
        }),
    );
    registry.register("concat", OperationFn::combine(|_, acc, value| Ok(format!("{}{}", acc, value))));
    registry.register(
        "render_pair",
        OperationFn::pair_to_strings(|_, pair| Ok(vec![format!("{}={}", pair.key(), pair.value())])),
    );
    registry.register(
        "swap",
        OperationFn::pair_to_pairs(|_, pair| Ok(vec![Pair::new(pair.value(), pair.key())])),
    );
    registry.register(
        "column_value",
        OperationFn::row_to_string(|args, row| {
            let column = args.first().context("column_value needs a column name")?;
            Ok(row.get(column))
        }),
    );
}

pub fn register_jobs(registry: &JobRegistry) {
    registry.register("word_count", &["split_words", "word_one", "sum"], word_count);
}

/// Counts the words of every argument; prints `word count` lines sorted by
/// word.
pub async fn word_count(ctx: Arc<DataflowContext>, lines: Vec<String>) -> Result<()> {
    let mut text = ctx.parallelize(lines).await?;
    let mut words = text.flat_map(&Closure::new("split_words")).await?;
    let mut ones = words.map_to_pair(&Closure::new("word_one")).await?;
    let mut counts = ones.fold_by_key("0", &Closure::new("sum")).await?;

    let mut pairs = counts.collect().await?;
    pairs.sort();
    for pair in &pairs {
        ctx.output(&format!("{} {}\n", pair.key(), pair.value()));
    }

    text.destroy().await?;
    words.destroy().await?;
    ones.destroy().await?;
    counts.destroy().await?;
    Ok(())
}
