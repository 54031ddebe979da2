/* Batch benchmarks along two dimensions:
 *   Key distribution: low bit heavy, top bit heavy, and random.
 *   Task: insert, insert_erase, lookup, lookup_fail, unpack
 * Every task runs once per device, as a single batch of SIZE elements.
 */

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use slabhash::{Device, Hashmap, HashmapConfig};

const SIZE: usize = 1 << 14;

const DEVICES: [Device; 2] = [Device::Host, Device::Accelerator { workers: 0 }];

#[derive(Clone, Copy)]
struct RandomKeys {
    state: u64,
}

impl RandomKeys {
    fn new() -> Self {
        RandomKeys { state: 0 }
    }
}

impl Iterator for RandomKeys {
    type Item = u64;
    fn next(&mut self) -> Option<u64> {
        // Add 1 then multiply by some 32 bit prime.
        self.state = self.state.wrapping_add(1).wrapping_mul(3_787_392_781);
        Some(self.state)
    }
}

fn flat(keys: impl Iterator<Item = u64>) -> Vec<u8> {
    keys.take(SIZE).flat_map(u64::to_le_bytes).collect()
}

fn empty(device: Device) -> Hashmap {
    Hashmap::new(HashmapConfig::new(2 * SIZE, 8, 8).device(device)).unwrap()
}

fn filled(device: Device, keys: &[u8]) -> Hashmap {
    let mut map = empty(device);
    map.insert(keys, keys).unwrap();
    map
}

macro_rules! bench_suite {
    ($bench_macro:ident, $bench_fn_name:ident, $group_name:expr $(,)?) => {
        fn $bench_fn_name(c: &mut Criterion) {
            let mut group = c.benchmark_group($group_name);
            group.throughput(Throughput::Elements(SIZE as u64));

            for device in DEVICES {
                $bench_macro!(group, device, 0.., "low");
                $bench_macro!(group, device, (0..).map(u64::swap_bytes), "high");
                $bench_macro!(group, device, RandomKeys::new(), "random");
            }

            group.finish();
        }
    };
}

macro_rules! bench_insert {
    ($group:ident, $device:expr, $keydist:expr, $bench_id: expr) => {
        let keys = flat($keydist);
        $group.bench_function(BenchmarkId::new($bench_id, $device), |b| {
            b.iter_batched(
                || empty($device),
                |mut map| {
                    black_box(map.insert(&keys, &keys).unwrap());
                    map
                },
                BatchSize::LargeInput,
            );
        });
    };
}

bench_suite!(bench_insert, insert, "insert");

macro_rules! bench_insert_erase {
    ($group:ident, $device:expr, $keydist:expr, $bench_id: expr) => {
        let keys = flat($keydist);
        let mut map = empty($device);
        $group.bench_function(BenchmarkId::new($bench_id, $device), |b| {
            b.iter(|| {
                black_box(map.insert(&keys, &keys).unwrap());
                black_box(map.erase(&keys).unwrap());
            });
        });
    };
}

bench_suite!(bench_insert_erase, insert_erase, "insert_erase");

macro_rules! bench_lookup {
    ($group:ident, $device:expr, $keydist:expr, $bench_id: expr) => {
        let keys = flat($keydist);
        let map = filled($device, &keys);
        $group.bench_function(BenchmarkId::new($bench_id, $device), |b| {
            b.iter(|| black_box(map.find(&keys).unwrap()));
        });
    };
}

bench_suite!(bench_lookup, lookup, "lookup");

macro_rules! bench_lookup_fail {
    ($group:ident, $device:expr, $keydist:expr, $bench_id: expr) => {
        let mut keys = $keydist;
        let present = flat(&mut keys);
        let absent = flat(keys);
        let map = filled($device, &present);
        $group.bench_function(BenchmarkId::new($bench_id, $device), |b| {
            b.iter(|| black_box(map.find(&absent).unwrap()));
        });
    };
}

bench_suite!(bench_lookup_fail, lookup_fail, "lookup_fail");

macro_rules! bench_unpack {
    ($group:ident, $device:expr, $keydist:expr, $bench_id: expr) => {
        let keys = flat($keydist);
        let map = filled($device, &keys);
        let handles = map.handles();
        let mut values = vec![0u8; handles.len() * 8];
        $group.bench_function(BenchmarkId::new($bench_id, $device), |b| {
            b.iter(|| {
                black_box(map.unpack(&handles, None, None, Some(&mut values[..])).unwrap());
            });
        });
    };
}

bench_suite!(bench_unpack, unpack, "unpack");

criterion_group!(
    benches,
    insert,
    insert_erase,
    lookup,
    lookup_fail,
    unpack
);
criterion_main!(benches);
