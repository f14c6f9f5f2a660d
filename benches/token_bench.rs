// Octospace - an in-process spatial-semantic token store.
// Copyright (C) 2024-2025 Octospace Contributors

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Token benchmarks: creation, wire round-trip, flag bit operations and
//! coordinate fixed-point encoding.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use octospace_core::token::flags;
use octospace_core::{CoordinateSpace, EntityType, Token};

fn bench_token_creation(c: &mut Criterion) {
    c.bench_function("token_creation", |b| {
        let mut id = 0u32;
        b.iter(|| {
            id = id.wrapping_add(1);
            black_box(Token::new(black_box(id)))
        })
    });
}

fn bench_token_serialization(c: &mut Criterion) {
    let mut token = Token::new(42);
    token.set_coordinates_xyz(CoordinateSpace::L1Physical, 1.0, 2.0, 3.0);
    token.set_entity_type(EntityType::Object);
    token.weight = 0.5;
    token.set_field_radius(1.5);
    token.set_field_strength(0.8);

    let mut group = c.benchmark_group("token_serialization");
    group.bench_function("serialize", |b| b.iter(|| black_box(black_box(&token).to_bytes())));

    let bytes = token.to_bytes();
    group.bench_function("deserialize", |b| b.iter(|| black_box(Token::from_bytes(black_box(&bytes)))));
    group.finish();
}

fn bench_token_batch_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("token_batch_creation");
    for size in [100, 1_000, 10_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let mut tokens = Vec::with_capacity(size);
                for i in 0..size {
                    tokens.push(Token::new(i as u32));
                }
                black_box(tokens)
            })
        });
    }
    group.finish();
}

fn bench_coordinate_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("coordinate_encoding");
    group.bench_function("encode_axis", |b| {
        b.iter(|| black_box(Token::encode_axis(black_box(10.5), CoordinateSpace::L1Physical, 0)))
    });
    group.bench_function("decode_axis", |b| {
        b.iter(|| black_box(Token::decode_axis(black_box(1050), CoordinateSpace::L1Physical, 0)))
    });
    group.finish();
}

fn bench_flag_operations(c: &mut Criterion) {
    let mut token = Token::new(1);
    let mut group = c.benchmark_group("flag_operations");
    group.bench_function("has_flag", |b| b.iter(|| black_box(black_box(&token).has_flag(flags::ACTIVE))));
    group.bench_function("set_flag", |b| b.iter(|| black_box(&mut token).set_flag(flags::PERSISTENT)));
    group.bench_function("apply_graph_degree", |b| {
        b.iter(|| black_box(&mut token).apply_graph_degree(black_box(5)))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_token_creation,
    bench_token_serialization,
    bench_token_batch_creation,
    bench_coordinate_encoding,
    bench_flag_operations
);
criterion_main!(benches);
