//! Benchmarks for stackplan core operations.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use indexmap::IndexMap;
use stackplan::core::{params, parser, planner, resolver};
use std::fmt::Write;

/// Template with one VPC, `n` subnets and an instance per subnet.
fn synthetic_template(n: usize) -> String {
    let mut yaml = String::from(
        "AWSTemplateFormatVersion: \"2010-09-09\"\nParameters:\n  InstanceType:\n    Type: String\n    Default: t3.micro\nResources:\n  VPC:\n    Type: AWS::EC2::VPC\n    Properties:\n      CidrBlock: 10.0.0.0/16\n",
    );
    for i in 0..n {
        let _ = write!(
            yaml,
            "  Subnet{i}:\n    Type: AWS::EC2::Subnet\n    Properties:\n      VpcId: !Ref VPC\n      CidrBlock: 10.0.{i}.0/24\n  Instance{i}:\n    Type: AWS::EC2::Instance\n    Properties:\n      InstanceType: !Ref InstanceType\n      SubnetId: !Ref Subnet{i}\n      ImageId: ami-123\n"
        );
    }
    yaml
}

fn bench_blake3_string(c: &mut Criterion) {
    let mut group = c.benchmark_group("blake3_string");
    for size in [64, 256, 1024, 4096] {
        let input: String = "x".repeat(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| black_box(stackplan::tripwire::hasher::hash_string(black_box(input))));
        });
    }
    group.finish();
}

fn bench_template_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("template_parse");
    for n in [10, 100] {
        let yaml = synthetic_template(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &yaml, |b, yaml| {
            b.iter(|| black_box(parser::parse_template(black_box(yaml)).unwrap()));
        });
    }
    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate");
    for n in [10, 100] {
        let template = parser::parse_template(&synthetic_template(n)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(n), &template, |b, t| {
            b.iter(|| black_box(parser::validate_template(black_box(t))));
        });
    }
    group.finish();
}

fn bench_execution_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("execution_order");
    for n in [10, 100, 250] {
        let template = parser::parse_template(&synthetic_template(n)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(n), &template, |b, t| {
            b.iter(|| black_box(resolver::build_execution_order(black_box(t)).unwrap()));
        });
    }
    group.finish();
}

fn bench_plan(c: &mut Criterion) {
    let template = parser::parse_template(&synthetic_template(100)).unwrap();
    let resolved = params::resolve_parameters(&template, &IndexMap::new()).unwrap();
    let graph = resolver::build_graph(&template);
    c.bench_function("plan_201_resources", |b| {
        b.iter(|| {
            black_box(
                planner::plan(&planner::PlanRequest {
                    stack: "bench",
                    template: &template,
                    params: &resolved,
                    graph: &graph,
                    lock: None,
                    targets: &[],
                })
                .unwrap(),
            )
        });
    });
}

criterion_group!(
    benches,
    bench_blake3_string,
    bench_template_parse,
    bench_validate,
    bench_execution_order,
    bench_plan,
);
criterion_main!(benches);
