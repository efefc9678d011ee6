//! 规则代数性能基准测试
//!
//! 测试覆盖：
//! - 签名构建性能
//! - 子集 / 特异性判断性能
//! - 不同条件数下的性能曲线

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rule_store::{Condition, Rule};
use std::collections::HashSet;
use std::hint::black_box;

/// 创建带 n 个用户条件、n 个动画条件的规则
fn create_rule(conditions_count: usize, target: i64) -> Rule {
    let user = (0..conditions_count)
        .map(|i| Condition::new(format!("user_field_{}", i), ">", i as i64))
        .collect();
    let other = (0..conditions_count)
        .map(|i| Condition::new(format!("anime_field_{}", i), "==", format!("value_{}", i)))
        .collect();
    Rule::new(user, other, target)
}

fn bench_signature(c: &mut Criterion) {
    let mut group = c.benchmark_group("signature");
    for count in [2usize, 8, 32] {
        let rule = create_rule(count, 5);
        group.bench_with_input(BenchmarkId::from_parameter(count), &rule, |b, rule| {
            b.iter(|| black_box(rule).signature())
        });
    }
    group.finish();
}

fn bench_subset(c: &mut Criterion) {
    let small = create_rule(8, 5);
    let big = create_rule(16, 5);

    c.bench_function("is_subset_of", |b| {
        b.iter(|| black_box(&small).is_subset_of(black_box(&big)))
    });

    c.bench_function("is_more_specific_than", |b| {
        b.iter(|| black_box(&big).is_more_specific_than(black_box(&small)))
    });
}

fn bench_dedup(c: &mut Criterion) {
    // 模拟挖掘产出去重：大量签名相同 / 不同的规则进集合
    let rules: Vec<Rule> = (0..200).map(|i| create_rule(4, i % 20)).collect();

    c.bench_function("hash_dedup_200_rules", |b| {
        b.iter(|| {
            let set: HashSet<&Rule> = black_box(&rules).iter().collect();
            black_box(set.len())
        })
    });
}

criterion_group!(benches, bench_signature, bench_subset, bench_dedup);
criterion_main!(benches);
