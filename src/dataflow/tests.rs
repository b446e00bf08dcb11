//! Dataflow Module Tests
//!
//! Every test runs a real in-process cluster: a storage coordinator with
//! three storage workers, plus compute workers serving the dataflow routes,
//! all bound to ephemeral localhost ports.
//!
//! ## Test Scopes
//! - **Transformations**: results of each operation, and that the number of
//!   partitions does not change them.
//! - **Handles**: destroy, rename, count/take.
//! - **Failures**: unreachable workers, unknown bundles, wrong closure
//!   kinds and closure errors surface as typed partition failures.
//! - **Submit**: a registered job run end to end through `/submit`.

#[cfg(test)]
mod tests {
    use crate::dataflow::context::DataflowContext;
    use crate::dataflow::error::{DataflowError, FailureKind};
    use crate::dataflow::executor::DataflowExecutor;
    use crate::dataflow::handlers::{DataflowCoordinator, coordinator_router, submit_job, worker_router};
    use crate::dataflow::rdd::{PairRdd, Rdd};
    use crate::dataflow::registry::{JobRegistry, OperationRegistry};
    use crate::dataflow::types::{BundleManifest, Closure, Pair};
    use crate::jobs::{register_jobs, register_operations};
    use crate::membership::service::WorkerRegistry;
    use crate::storage::client::KvsClient;
    use crate::testing::{StorageCluster, dead_address, serve, spawn_storage_cluster};
    use std::sync::Arc;
    use std::time::Duration;

    const BUNDLE: &str = "test-bundle";

    struct Cluster {
        storage: StorageCluster,
        compute: Arc<WorkerRegistry>,
        kvs: Arc<KvsClient>,
    }

    impl Cluster {
        fn context(&self) -> Arc<DataflowContext> {
            DataflowContext::new(self.kvs.clone(), self.compute.clone(), BUNDLE)
        }
    }

    fn manifest() -> BundleManifest {
        let operations = OperationRegistry::new();
        register_operations(&operations);
        BundleManifest {
            job: "tests".to_string(),
            operations: operations.list_operations(),
        }
    }

    async fn spawn_compute_worker(registry: &WorkerRegistry, id: &str) -> Arc<DataflowExecutor> {
        let operations = OperationRegistry::new();
        register_operations(&operations);
        let executor = DataflowExecutor::new(operations);
        let addr = serve(worker_router(executor.clone())).await;
        registry.heartbeat(id, "127.0.0.1", addr.port());
        executor
    }

    async fn cluster(compute_workers: usize) -> Cluster {
        let storage = spawn_storage_cluster(&["d", "m", "t"]).await;
        let compute = WorkerRegistry::new(Duration::from_secs(60));
        for i in 0..compute_workers {
            let executor = spawn_compute_worker(&compute, &format!("w{}", i)).await;
            executor.install_bundle(BUNDLE, manifest()).unwrap();
        }
        let kvs = Arc::new(storage.client());
        Cluster {
            storage,
            compute,
            kvs,
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn sorted(mut values: Vec<String>) -> Vec<String> {
        values.sort();
        values
    }

    fn partition_failures(err: DataflowError) -> Vec<FailureKind> {
        match err {
            DataflowError::PartitionsFailed { failures, .. } => failures.into_iter().map(|f| f.kind).collect(),
            other => panic!("expected partition failures, got {:?}", other),
        }
    }

    // ============================================================
    // TRANSFORMATION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_partitioning_does_not_change_output() {
        // ARRANGE
        let cluster = cluster(2).await;
        let ctx = cluster.context();
        let lines = strings(&["the quick brown fox", "jumps over", "the lazy dog", "", "fox"]);
        let input = ctx.parallelize(lines).await.unwrap();

        // ACT
        ctx.set_concurrency_level(1).unwrap();
        let coarse = input.flat_map(&Closure::new("split_words")).await.unwrap();
        ctx.set_concurrency_level(8).unwrap();
        let fine = input.flat_map(&Closure::new("split_words")).await.unwrap();

        // ASSERT
        let expected = sorted(strings(&[
            "the", "quick", "brown", "fox", "jumps", "over", "the", "lazy", "dog", "fox",
        ]));
        assert_eq!(sorted(coarse.collect().await.unwrap()), expected);
        assert_eq!(sorted(fine.collect().await.unwrap()), expected);
        assert_ne!(coarse.table_name(), fine.table_name());
    }

    async fn run_keyed_pipelines(
        ctx: &Arc<DataflowContext>,
        words: &Rdd,
        others: &Rdd,
        level: usize,
    ) -> (Vec<Pair>, Vec<Pair>, Vec<String>) {
        ctx.set_concurrency_level(level).unwrap();
        let ones = words.map_to_pair(&Closure::new("word_one")).await.unwrap();
        let counts = ones.fold_by_key("0", &Closure::new("sum")).await.unwrap();
        let joined = counts.join(&counts).await.unwrap();
        let common = words.intersection(others).await.unwrap();

        let mut counted = counts.collect().await.unwrap();
        counted.sort();
        let mut pairs = joined.collect().await.unwrap();
        pairs.sort();
        (counted, pairs, sorted(common.collect().await.unwrap()))
    }

    #[tokio::test]
    async fn test_partitioning_does_not_change_keyed_output() {
        // ARRANGE
        let cluster = cluster(3).await;
        let ctx = cluster.context();
        let words = ctx
            .parallelize(strings(&["the", "quick", "fox", "the", "lazy", "dog", "fox", "the"]))
            .await
            .unwrap();
        let others = ctx.parallelize(strings(&["fox", "dog", "cat"])).await.unwrap();

        // ACT
        let coarse = run_keyed_pipelines(&ctx, &words, &others, 1).await;
        let fine = run_keyed_pipelines(&ctx, &words, &others, 8).await;

        // ASSERT
        let (counts, joined, common) = &coarse;
        assert_eq!(
            counts,
            &vec![
                Pair::new("dog", "1"),
                Pair::new("fox", "2"),
                Pair::new("lazy", "1"),
                Pair::new("quick", "1"),
                Pair::new("the", "3"),
            ]
        );
        assert_eq!(
            joined,
            &vec![
                Pair::new("dog", "1,1"),
                Pair::new("fox", "2,2"),
                Pair::new("lazy", "1,1"),
                Pair::new("quick", "1,1"),
                Pair::new("the", "3,3"),
            ]
        );
        assert_eq!(common, &strings(&["dog", "fox"]));
        assert_eq!(coarse, fine);
    }

    #[tokio::test]
    async fn test_storage_worker_joining_between_jobs() {
        // ARRANGE
        let mut cluster = cluster(1).await;
        let ctx = cluster.context();
        let warm = ctx.parallelize(strings(&["warm up"])).await.unwrap();
        warm.flat_map(&Closure::new("split_words")).await.unwrap();

        cluster.storage.add_worker("p").await;
        cluster.kvs.refresh_workers().await.unwrap();

        // ACT
        let words: Vec<String> = (0..200).map(|n| format!("w{}", n)).collect();
        let input = ctx.parallelize(words.clone()).await.unwrap();
        let output = input.flat_map(&Closure::new("split_words")).await.unwrap();

        // ASSERT
        let joined = &cluster.storage.stores[3];
        assert!(joined.count(&input.table_name()).await.unwrap().unwrap_or(0) > 0);
        assert_eq!(sorted(output.collect().await.unwrap()), sorted(words));
    }

    #[tokio::test]
    async fn test_distinct_keeps_one_row_per_value() {
        let cluster = cluster(1).await;
        let ctx = cluster.context();
        let input = ctx.parallelize(strings(&["a", "b", "a", "c", "b"])).await.unwrap();

        let distinct = input.distinct().await.unwrap();

        assert_eq!(sorted(distinct.collect().await.unwrap()), strings(&["a", "b", "c"]));
        assert_eq!(distinct.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_fold_by_key_folds_columns_in_order() {
        // ARRANGE
        let cluster = cluster(2).await;
        let ctx = cluster.context();
        for column in ["x", "y", "z"] {
            cluster.kvs.put("letters", "k1", column, column).await.unwrap();
        }

        // ACT
        let folded = PairRdd::new(ctx.clone(), "letters")
            .fold_by_key("", &Closure::new("concat"))
            .await
            .unwrap();

        // ASSERT
        assert_eq!(folded.collect().await.unwrap(), vec![Pair::new("k1", "xyz")]);
    }

    #[tokio::test]
    async fn test_join_combines_values_per_key() {
        let cluster = cluster(2).await;
        let ctx = cluster.context();
        cluster.kvs.put("t1", "k1", "c1", "A").await.unwrap();
        cluster.kvs.put("t1", "k2", "c1", "only-left").await.unwrap();
        cluster.kvs.put("t2", "k1", "c2", "B").await.unwrap();

        let joined = PairRdd::new(ctx.clone(), "t1")
            .join(&PairRdd::new(ctx.clone(), "t2"))
            .await
            .unwrap();

        assert_eq!(joined.collect().await.unwrap(), vec![Pair::new("k1", "A,B")]);
    }

    #[tokio::test]
    async fn test_fold_reads_whole_table_once() {
        // ARRANGE
        let cluster = cluster(3).await;
        let ctx = cluster.context();
        ctx.set_concurrency_level(4).unwrap();
        let numbers: Vec<String> = (1..=10).map(|n| n.to_string()).collect();
        let input = ctx.parallelize(numbers).await.unwrap();

        // ACT
        let total = input.fold("0", &Closure::new("sum")).await.unwrap();

        // ASSERT
        assert_eq!(total, "55");
    }

    #[tokio::test]
    async fn test_map_to_pair_and_group_by_build_pair_tables() {
        let cluster = cluster(2).await;
        let ctx = cluster.context();
        let words = ctx.parallelize(strings(&["apple", "avocado", "banana", "apple"])).await.unwrap();

        let ones = words.map_to_pair(&Closure::new("word_one")).await.unwrap();
        let counts = ones.fold_by_key("0", &Closure::new("sum")).await.unwrap();
        let grouped = words.group_by(&Closure::new("first_letter")).await.unwrap();

        let mut counted = counts.collect().await.unwrap();
        counted.sort();
        assert_eq!(
            counted,
            vec![Pair::new("apple", "2"), Pair::new("avocado", "1"), Pair::new("banana", "1")]
        );

        let mut groups = grouped.collect().await.unwrap();
        groups.sort();
        assert_eq!(
            groups,
            vec![
                Pair::new("a", "apple"),
                Pair::new("a", "apple"),
                Pair::new("a", "avocado"),
                Pair::new("b", "banana"),
            ]
        );
        assert_eq!(grouped.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_flat_map_to_pair_and_pair_flat_maps() {
        let cluster = cluster(2).await;
        let ctx = cluster.context();
        let words = ctx.parallelize(strings(&["ab", "b"])).await.unwrap();

        let letters = words.flat_map_to_pair(&Closure::new("letters")).await.unwrap();
        let rendered = letters.flat_map(&Closure::new("render_pair")).await.unwrap();
        let swapped = letters.flat_map_to_pair(&Closure::new("swap")).await.unwrap();

        assert_eq!(
            sorted(rendered.collect().await.unwrap()),
            strings(&["a=ab", "b=ab", "b=b"])
        );
        let mut pairs = swapped.collect().await.unwrap();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![Pair::new("ab", "a"), Pair::new("ab", "b"), Pair::new("b", "b")]
        );
    }

    #[tokio::test]
    async fn test_pair_flat_map_keeps_cells_with_dashed_names_apart() {
        // ARRANGE
        let cluster = cluster(1).await;
        let ctx = cluster.context();
        cluster.kvs.put("dashed", "k", "a-b", "v").await.unwrap();
        cluster.kvs.put("dashed", "k-a", "b", "v").await.unwrap();

        // ACT
        let swapped = PairRdd::new(ctx.clone(), "dashed")
            .flat_map_to_pair(&Closure::new("swap"))
            .await
            .unwrap();

        // ASSERT
        let mut pairs = swapped.collect().await.unwrap();
        pairs.sort();
        assert_eq!(pairs, vec![Pair::new("v", "k"), Pair::new("v", "k-a")]);
    }

    #[tokio::test]
    async fn test_filter_and_map_partitions() {
        let cluster = cluster(2).await;
        let ctx = cluster.context();
        let words = ctx.parallelize(strings(&["a", "bbb", "cc", "dddd"])).await.unwrap();

        let long = words
            .filter(&Closure::new("longer_than").with_arg("2"))
            .await
            .unwrap();
        let upper = long.map_partitions(&Closure::new("upper_partition")).await.unwrap();

        assert_eq!(sorted(long.collect().await.unwrap()), strings(&["bbb", "dddd"]));
        assert_eq!(sorted(upper.collect().await.unwrap()), strings(&["BBB", "DDDD"]));
    }

    #[tokio::test]
    async fn test_intersection_emits_common_values_once() {
        let cluster = cluster(2).await;
        let ctx = cluster.context();
        ctx.set_concurrency_level(3).unwrap();
        let left = ctx.parallelize(strings(&["a", "b", "b", "c"])).await.unwrap();
        let right = ctx.parallelize(strings(&["b", "c", "c", "d"])).await.unwrap();

        let common = left.intersection(&right).await.unwrap();

        assert_eq!(sorted(common.collect().await.unwrap()), strings(&["b", "c"]));
    }

    #[tokio::test]
    async fn test_sample_extremes() {
        let cluster = cluster(2).await;
        let ctx = cluster.context();
        let input = ctx.parallelize(strings(&["a", "b", "c", "d"])).await.unwrap();

        let all = input.sample(1.0).await.unwrap();
        let none = input.sample(0.0).await.unwrap();

        assert_eq!(sorted(all.collect().await.unwrap()), strings(&["a", "b", "c", "d"]));
        assert!(none.collect().await.unwrap().is_empty());
        assert!(matches!(
            input.sample(1.5).await,
            Err(DataflowError::InvalidParameter { name: "prob", .. })
        ));
    }

    #[tokio::test]
    async fn test_from_table_projects_rows() {
        let cluster = cluster(2).await;
        let ctx = cluster.context();
        cluster.kvs.put("people", "p1", "name", "ada").await.unwrap();
        cluster.kvs.put("people", "p2", "name", "grace").await.unwrap();
        cluster.kvs.put("people", "p3", "email", "none@example.com").await.unwrap();

        let names = ctx
            .from_table("people", &Closure::new("column_value").with_arg("name"))
            .await
            .unwrap();

        assert_eq!(sorted(names.collect().await.unwrap()), strings(&["ada", "grace"]));
    }

    #[tokio::test]
    async fn test_persistent_outputs() {
        let cluster = cluster(1).await;
        let ctx = cluster.context();
        ctx.set_persistent_outputs(true);

        let input = ctx.parallelize(strings(&["x", "y"])).await.unwrap();
        let copy = input.filter(&Closure::new("longer_than").with_arg("0")).await.unwrap();

        assert!(input.table_name().starts_with("pt-"));
        assert!(copy.table_name().starts_with("pt-"));
        assert_eq!(sorted(copy.collect().await.unwrap()), strings(&["x", "y"]));
    }

    // ============================================================
    // HANDLE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_destroyed_handle_rejects_calls() {
        let cluster = cluster(1).await;
        let ctx = cluster.context();
        let mut input = ctx.parallelize(strings(&["a"])).await.unwrap();
        let table = input.table_name().to_string();

        input.destroy().await.unwrap();

        assert!(input.is_destroyed());
        assert_eq!(cluster.kvs.count(&table).await.unwrap(), 0);
        assert!(matches!(input.collect().await, Err(DataflowError::Destroyed { .. })));
        assert!(matches!(input.count().await, Err(DataflowError::Destroyed { .. })));
        assert!(matches!(
            input.flat_map(&Closure::new("split_words")).await,
            Err(DataflowError::Destroyed { .. })
        ));
        assert!(matches!(input.destroy().await, Err(DataflowError::Destroyed { .. })));
    }

    #[tokio::test]
    async fn test_clones_share_destroyed_state() {
        let cluster = cluster(1).await;
        let ctx = cluster.context();
        let mut input = ctx.parallelize(strings(&["a", "b"])).await.unwrap();
        let alias = input.clone();

        input.destroy().await.unwrap();

        assert!(alias.is_destroyed());
        assert!(matches!(alias.collect().await, Err(DataflowError::Destroyed { .. })));
        assert!(matches!(alias.count().await, Err(DataflowError::Destroyed { .. })));
        assert!(format!("{:?}", alias).contains(&input.table_name()));
    }

    #[tokio::test]
    async fn test_save_as_table_renames() {
        let cluster = cluster(1).await;
        let ctx = cluster.context();
        let mut input = ctx.parallelize(strings(&["a", "b", "c"])).await.unwrap();
        let old = input.table_name().to_string();

        input.save_as_table("letters").await.unwrap();

        assert_eq!(input.table_name(), "letters");
        assert_eq!(cluster.kvs.count("letters").await.unwrap(), 3);
        assert_eq!(cluster.kvs.count(&old).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_count_and_take() {
        let cluster = cluster(1).await;
        let ctx = cluster.context();
        let input = ctx.parallelize(strings(&["a", "b", "c", "d", "e"])).await.unwrap();

        assert_eq!(input.count().await.unwrap(), 5);
        assert_eq!(input.take(2).await.unwrap().len(), 2);
        assert_eq!(input.take(10).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_concurrency_level_must_be_positive() {
        let cluster = cluster(1).await;
        let ctx = cluster.context();

        assert!(ctx.set_concurrency_level(0).is_err());
        assert_eq!(ctx.concurrency_level(), 1);
        ctx.set_concurrency_level(3).unwrap();
        assert_eq!(ctx.concurrency_level(), 3);
    }

    // ============================================================
    // FAILURE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_unreachable_compute_worker_is_a_transport_failure() {
        // ARRANGE
        let cluster = cluster(0).await;
        let dead = dead_address().await;
        cluster.compute.heartbeat("w0", "127.0.0.1", dead.port());
        let ctx = cluster.context();
        let input = ctx.parallelize(strings(&["a"])).await.unwrap();

        // ACT
        let err = input.flat_map(&Closure::new("split_words")).await.unwrap_err();

        // ASSERT
        let kinds = partition_failures(err);
        assert!(!kinds.is_empty());
        assert!(kinds.iter().all(|k| matches!(k, FailureKind::Transport(_))));
    }

    #[tokio::test]
    async fn test_no_compute_workers() {
        let cluster = cluster(0).await;
        let ctx = cluster.context();
        let input = ctx.parallelize(strings(&["a"])).await.unwrap();

        assert!(matches!(
            input.flat_map(&Closure::new("split_words")).await,
            Err(DataflowError::NoComputeWorkers)
        ));
    }

    #[tokio::test]
    async fn test_unknown_bundle_is_rejected() {
        let cluster = cluster(1).await;
        let ctx = DataflowContext::new(cluster.kvs.clone(), cluster.compute.clone(), "never-uploaded");
        let input = ctx.parallelize(strings(&["a"])).await.unwrap();

        let err = input.flat_map(&Closure::new("split_words")).await.unwrap_err();

        assert!(
            partition_failures(err)
                .iter()
                .all(|k| matches!(k, FailureKind::Rejected { status: 404, .. }))
        );
    }

    #[tokio::test]
    async fn test_wrong_closure_kind_is_rejected() {
        let cluster = cluster(1).await;
        let ctx = cluster.context();
        let input = ctx.parallelize(strings(&["a"])).await.unwrap();

        let err = input.flat_map(&Closure::new("concat")).await.unwrap_err();

        assert!(
            partition_failures(err)
                .iter()
                .all(|k| matches!(k, FailureKind::Rejected { status: 400, .. }))
        );
    }

    #[tokio::test]
    async fn test_closure_error_is_reported_as_failure() {
        let cluster = cluster(1).await;
        let ctx = cluster.context();
        let input = ctx.parallelize(strings(&["a", "b", "c"])).await.unwrap();

        let err = input
            .filter(&Closure::new("longer_than").with_arg("many"))
            .await
            .unwrap_err();

        let kinds = partition_failures(err);
        assert!(kinds.iter().any(|k| matches!(
            k,
            FailureKind::Failed { status: 500, reason } if reason.contains("not a number")
        )));
    }

    #[tokio::test]
    async fn test_bundle_with_unknown_operation_is_refused() {
        let operations = OperationRegistry::new();
        register_operations(&operations);
        let executor = DataflowExecutor::new(operations);

        let bundle = BundleManifest {
            job: "rogue".to_string(),
            operations: strings(&["split_words", "format_disk"]),
        };

        assert!(matches!(
            executor.install_bundle("rogue-1", bundle),
            Err(DataflowError::UnknownOperation(op)) if op == "format_disk"
        ));
        assert!(!executor.has_bundle("rogue-1"));
    }

    // ============================================================
    // SUBMIT TESTS
    // ============================================================

    #[tokio::test]
    async fn test_submit_runs_word_count() {
        // ARRANGE
        let storage = spawn_storage_cluster(&["f", "p"]).await;
        let compute = WorkerRegistry::new(Duration::from_secs(60));
        spawn_compute_worker(&compute, "w0").await;
        spawn_compute_worker(&compute, "w1").await;

        let jobs = JobRegistry::new();
        register_jobs(&jobs);
        let kvs = Arc::new(storage.client());
        let coordinator = DataflowCoordinator::new(kvs, compute.clone(), jobs);
        let addr = serve(coordinator_router(coordinator)).await;

        let manifest = BundleManifest {
            job: "word_count".to_string(),
            operations: strings(&["split_words", "word_one", "sum"]),
        };

        // ACT
        let output = submit_job(
            &reqwest::Client::new(),
            &addr.to_string(),
            &manifest,
            &strings(&["to be or not", "to be"]),
        )
        .await
        .unwrap();

        // ASSERT
        assert_eq!(output, "be 2\nnot 1\nor 1\nto 2\n");
    }

    #[tokio::test]
    async fn test_submit_unknown_job_fails() {
        let storage = spawn_storage_cluster(&["m"]).await;
        let compute = WorkerRegistry::new(Duration::from_secs(60));
        let coordinator = DataflowCoordinator::new(Arc::new(storage.client()), compute, JobRegistry::new());
        let addr = serve(coordinator_router(coordinator)).await;

        let manifest = BundleManifest {
            job: "nothing".to_string(),
            operations: Vec::new(),
        };
        let result = submit_job(&reqwest::Client::new(), &addr.to_string(), &manifest, &[]).await;

        assert!(result.is_err());
    }
}
