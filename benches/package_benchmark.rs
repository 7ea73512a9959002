use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

use project_deploy::archive::ArchiveBuilder;
use project_deploy::cancel::CancelToken;
use project_deploy::copier::count_selected;
use project_deploy::ignore::IgnoreConfig;
use project_deploy::progress::NoProgress;

/// Create a project with N source files, ignored build output and a few ignore files
fn create_project(dir: &TempDir, count: usize) -> PathBuf {
    let root = dir.path().join("project");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join(".gitignore"), "*.log\nbuild/\n**/*.tmp\n").unwrap();

    for i in 0..count {
        let subdir = root.join(format!("pkg{}", i % 10));
        fs::create_dir_all(&subdir).unwrap();
        fs::write(subdir.join(format!("file{i}.rs")), format!("// file {i}")).unwrap();
        if i % 5 == 0 {
            fs::write(subdir.join(format!("file{i}.log")), "log").unwrap();
            fs::write(subdir.join(format!("file{i}.tmp")), "tmp").unwrap();
        }
        if i % 50 == 0 {
            fs::write(subdir.join(".deploy_ignore"), "/file0.rs\n").unwrap();
        }
    }

    let build = root.join("build");
    fs::create_dir_all(&build).unwrap();
    for i in 0..count / 10 {
        fs::write(build.join(format!("out{i}.o")), "obj").unwrap();
    }

    root
}

/// Benchmark rule collection plus one selection walk
fn bench_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("selection");
    let ignore = IgnoreConfig {
        patterns: vec!["*.md".to_string()],
        paths: Vec::new(),
    };

    for file_count in [100, 500, 1000].iter() {
        let temp = TempDir::new().unwrap();
        let root = create_project(&temp, *file_count);
        let builder = ArchiveBuilder::new(&ignore);

        group.throughput(Throughput::Elements(*file_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(file_count),
            file_count,
            |b, _| {
                b.iter(|| {
                    let ctx = builder.selection_context(black_box(&root));
                    count_selected(&ctx)
                })
            },
        );
    }

    group.finish();
}

/// Benchmark a full archive build
fn bench_build_archive(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_archive");
    group.sample_size(20);
    let ignore = IgnoreConfig::default();

    for file_count in [100, 1000].iter() {
        let temp = TempDir::new().unwrap();
        let root = create_project(&temp, *file_count);
        let out = temp.path().join("out");
        fs::create_dir_all(&out).unwrap();
        let builder = ArchiveBuilder::new(&ignore).output_dir(&out);

        group.throughput(Throughput::Elements(*file_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(file_count),
            file_count,
            |b, _| {
                b.iter(|| {
                    builder
                        .build(black_box(&root), &CancelToken::new(), &mut NoProgress)
                        .unwrap()
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_selection, bench_build_archive);
criterion_main!(benches);
