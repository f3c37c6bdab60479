//! Counts page views per URL, visitor and day over a small access log.
//!
//! Run with `cargo run --example access_log`. Set `RUST_LOG=foldwise=debug`
//! to watch the task state machines.

use foldwise::aggregate::{FinalAggregate, MergeOperator};
use foldwise::config::{CombinerConfig, JobSpec, SinkDescriptor, SourceDescriptor};
use foldwise::registry::FunctionRegistry;
use foldwise::scheduler::LocalExecutor;
use foldwise::sink::MemorySink;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const ACCESS_LOG: &str = "\
20130512020202,/,11
20130512020412,/,23
20130512030143,/post/clojure,11
20130512040256,/post/datomic,23
20130512050910,/post/clojure,11
20130512051012,/post/clojure,14
20130513093022,/,14
20130513101500,/post/datomic,11
";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let spec = JobSpec::builder()
        .init_fn("access_log")
        .merge_fn("sum")
        .source(SourceDescriptor::Inline {
            lines: ACCESS_LOG.lines().map(str::to_string).collect(),
            delimiter: ',',
        })
        .sink(SinkDescriptor::Stdout)
        .slice_size(3)
        .partition_count(2)
        .workers(2)
        .combiner(CombinerConfig {
            max_buffered_keys: 4,
            max_buffer_age: Duration::from_secs(1),
        })
        .build()?;

    let sink = Arc::new(MemorySink::new());
    let report = LocalExecutor::new(FunctionRegistry::with_builtins()).run_with(&spec, spec.source.open(), sink.clone())?;
    let report = report.into_result()?;

    println!(
        "{} records in {} map tasks, {} combiner flushes",
        report.records_read, report.map_tasks, report.combiner.flushes
    );
    for (partition, aggregate) in sink.partitions() {
        println!("partition {partition}: {} keys", aggregate.as_partial().key_count());
    }

    let all = FinalAggregate::union(sink.partitions().into_values(), &MergeOperator::sum());
    for (dimension, group, count) in all.entries() {
        println!("{dimension:>5} {group:<16} {count}");
    }
    Ok(())
}
