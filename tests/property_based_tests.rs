mod common;

use std::sync::Arc;

use batch_core::error::kinds;
use batch_core::flow::pattern_matches;
use batch_core::item::{FnItemProcessor, IteratorItemReader, ListItemWriter};
use batch_core::job::JobBuilder;
use batch_core::models::{JobParameters, StepExecution};
use batch_core::state_machine::BatchStatus;
use batch_core::step::StepBuilder;
use batch_core::ItemError;
use common::*;
use proptest::prelude::*;

/// Run a single chunk step over `0..items`, rejecting multiples of `reject_every`
/// (when non-zero) as skippable parse errors
fn run_chunk_step(
    items: i32,
    chunk_size: usize,
    reject_every: i32,
) -> (StepExecution, ListItemWriter<String>) {
    tokio_test::block_on(async move {
        let (_repository, orchestrator) = engine();
        let writer = ListItemWriter::<String>::new();
        let step = StepBuilder::new("numbers")
            .chunk::<i32, String>(chunk_size)
            .reader(IteratorItemReader::new("numbers", 0..items))
            .processor(FnItemProcessor::new(move |n: i32| {
                if reject_every > 0 && n % reject_every == 0 {
                    Err(ItemError::new(kinds::PARSE, format!("rejected {n}")))
                } else {
                    Ok(Some(n.to_string()))
                }
            }))
            .writer(writer.clone())
            .skip(kinds::PARSE)
            .skip_limit(u32::MAX)
            .build()
            .unwrap();
        let job = JobBuilder::new("numbersJob").start(step).build().unwrap();

        let execution = orchestrator
            .run(Arc::new(job), JobParameters::new())
            .await
            .unwrap();
        assert_eq!(execution.status, BatchStatus::Completed);
        let step = execution.step_execution("numbers").unwrap().clone();
        (step, writer)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: every chunk but the last is full, and one commit follows the last read
    #[test]
    fn chunks_are_full_until_the_reader_runs_dry(items in 0i32..60, chunk_size in 1usize..12) {
        let (step, writer) = run_chunk_step(items, chunk_size, 0);

        let sizes = writer.chunk_sizes();
        prop_assert_eq!(sizes.iter().sum::<usize>(), items as usize);
        if let Some((last, full)) = sizes.split_last() {
            prop_assert!(full.iter().all(|size| *size == chunk_size));
            prop_assert!(*last >= 1 && *last <= chunk_size);
        }
        prop_assert_eq!(step.read_count, items as u64);
        prop_assert_eq!(step.commit_count, items as u64 / chunk_size as u64 + 1);
    }

    /// Property: with an unbounded skip limit every read item is either written or skipped
    #[test]
    fn skipped_and_written_items_account_for_every_read(
        items in 1i32..60,
        chunk_size in 1usize..8,
        reject_every in 1i32..7,
    ) {
        let (step, writer) = run_chunk_step(items, chunk_size, reject_every);

        let rejected = (0..items).filter(|n| n % reject_every == 0).count() as u64;
        prop_assert_eq!(step.process_skip_count, rejected);
        prop_assert_eq!(step.write_count + step.process_skip_count, step.read_count);
        prop_assert!(writer
            .items()
            .iter()
            .all(|item| item.parse::<i32>().map(|n| n % reject_every != 0).unwrap_or(false)));
        prop_assert_eq!(step.rollback_count, 0);
    }

    /// Property: a pattern always matches the exit code it was written from
    #[test]
    fn exit_codes_match_themselves_and_wildcard(code in "[A-Z_]{1,16}") {
        prop_assert!(pattern_matches(&code, &code));
        prop_assert!(pattern_matches("*", &code));
        let prefix: String = code.chars().take(1).collect();
        let prefixed = format!("{}*", prefix);
        prop_assert!(pattern_matches(&prefixed, &code));
    }
}
