//! This bench test simulates a first processing run over a directory of
//! documents with many unkeyed requirement declarations.

#![allow(missing_docs)]

use std::{fmt::Write, path::Path};

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use reqtrace::{Config, Processor, ReleaseStore};
use tempfile::TempDir;

/// Writes `documents` files with `per_document` declarations each
fn preseed_documents(path: &Path, documents: usize, per_document: usize) {
    for d in 0..documents {
        let mut text = format!("<h1>Chapter {d}</h1>\n");
        for r in 0..per_document {
            writeln!(
                text,
                "<requirement title=\"Requirement {d}.{r}\" conformance=\"SHALL\">\n  <actor name=\"CLIENT\"><testProcedure id=\"TP-{r}\"/></actor>\n  The client SHALL&nbsp;handle case <b>{d}.{r}</b>.\n</requirement>"
            )
            .unwrap();
        }
        std::fs::write(path.join(format!("chapter-{d:03}.html")), text).unwrap();
    }
}

fn setup() -> (TempDir, Processor) {
    let tmp_dir = TempDir::new().unwrap();
    let docs = tmp_dir.path().join("docs");
    std::fs::create_dir_all(&docs).unwrap();
    preseed_documents(&docs, 20, 50);

    let mut store = ReleaseStore::init(tmp_dir.path().join(".reqtrace"), Config::default()).unwrap();
    store.create("1.0", false).unwrap();
    (tmp_dir, Processor::new(store, docs))
}

fn process_many(c: &mut Criterion) {
    c.bench_function("process 1000 declarations", |b| {
        b.iter_batched(
            setup,
            |(_tmp_dir, mut processor)| {
                processor.process().unwrap();
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, process_many);
criterion_main!(benches);
