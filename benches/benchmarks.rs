//! Benchmark suite for ralph-ollama subsystems.
//!
//! This module provides performance benchmarks for:
//! - Code block extraction (response parsing)
//! - Task list reading and updating (`@fix_plan.md`)
//! - File change tracking (tree scans)
//!
//! # Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench
//!
//! # Save baseline for comparison
//! cargo bench -- --save-baseline main
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ralph_ollama::changes::FileTracker;
use ralph_ollama::r#loop::extract::extract_files;
use ralph_ollama::r#loop::task_list::{render_template, TaskList};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Extraction Benchmarks
// ============================================================================

fn response_with_blocks(count: usize) -> String {
    let mut text = String::from("Here is the implementation you asked for.\n\n");
    for i in 0..count {
        match i % 3 {
            0 => text.push_str(&format!(
                "```src/module_{i}.py\ndef handler_{i}():\n    return {i}\n```\n\n"
            )),
            1 => text.push_str(&format!(
                "```python\n# file: pkg/helper_{i}.py\nVALUE = {i}\n```\n\n"
            )),
            _ => text.push_str(&format!(
                "```\n{{\"id\": {i}, \"name\": \"item\"}}\n```\n\nSome commentary between blocks.\n\n"
            )),
        }
    }
    text
}

fn bench_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("extraction");

    for blocks in [1, 10, 50] {
        let response = response_with_blocks(blocks);
        group.throughput(Throughput::Bytes(response.len() as u64));
        group.bench_with_input(BenchmarkId::new("extract_files", blocks), &response, |b, text| {
            b.iter(|| black_box(extract_files(black_box(text))));
        });
    }

    group.finish();
}

// ============================================================================
// Task List Benchmarks
// ============================================================================

fn project_with_tasks(count: usize) -> TempDir {
    let temp = TempDir::new().unwrap();
    let list = TaskList::new(temp.path());
    fs::write(list.path(), render_template(None)).unwrap();
    let tasks: Vec<String> = (0..count)
        .map(|i| format!("Implement feature number {i}"))
        .collect();
    list.append_tasks(&tasks).unwrap();
    temp
}

fn bench_task_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("task_list");

    for count in [10, 100, 500] {
        let temp = project_with_tasks(count);
        let list = TaskList::new(temp.path());

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("read_incomplete", count), &list, |b, list| {
            b.iter(|| black_box(list.read_incomplete_tasks().unwrap()));
        });
    }

    group.bench_function("mark_complete_missing", |b| {
        let temp = project_with_tasks(100);
        let list = TaskList::new(temp.path());
        b.iter(|| black_box(list.mark_complete("No such task").unwrap()));
    });

    group.finish();
}

// ============================================================================
// Change Tracking Benchmarks
// ============================================================================

fn bench_tracker_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracker");

    for size in [10, 100, 500] {
        let temp = TempDir::new().unwrap();
        for i in 0..size {
            let dir = temp.path().join(format!("pkg_{}", i % 10));
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(format!("mod_{i}.py")), "x = 1\n").unwrap();
        }

        let mut tracker =
            FileTracker::new(temp.path()).with_timing(Duration::ZERO, Duration::ZERO);
        tracker.start_tracking();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(BenchmarkId::new("diff", size), |b| {
            b.iter(|| black_box(tracker.diff()));
        });
    }

    group.finish();
}

criterion_group!(extract_benches, bench_extraction);

criterion_group!(task_benches, bench_task_list);

criterion_group!(tracker_benches, bench_tracker_scan);

criterion_main!(extract_benches, task_benches, tracker_benches);
