use rand::seq::SliceRandom;
use rand::thread_rng;
use slabhash::{Device, Hashmap, HashmapConfig, InsertStatus};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

/// Number of distinct keys in each batch.
const NUM_KEYS: u32 = 64;

/// Number of times every key appears in a batch.
const COPIES: usize = 16;

/// Number of iterations for each test
const ITERATIONS: usize = 32;

fn accelerator(max_keys: usize, buckets: usize) -> Hashmap {
    let config = HashmapConfig::new(max_keys, 4, 4)
        .device(Device::Accelerator { workers: 8 })
        .buckets(buckets);
    Hashmap::new(config).unwrap()
}

#[test]
fn one_winner_per_key() {
    for i in 0..ITERATIONS {
        // few buckets so that racing workers also race for overflow slabs
        let mut map = accelerator(NUM_KEYS as usize * COPIES, 1 + i % 4);

        let mut elements: Vec<(u32, u32)> = (0..NUM_KEYS)
            .flat_map(|k| (0..COPIES as u32).map(move |c| (k, c)))
            .collect();
        elements.shuffle(&mut thread_rng());
        let keys: Vec<u8> = elements.iter().flat_map(|(k, _)| k.to_le_bytes()).collect();
        let values: Vec<u8> = elements
            .iter()
            .enumerate()
            .flat_map(|(i, _)| (i as u32).to_le_bytes())
            .collect();

        let batch = map.insert(&keys, &values).unwrap();
        assert_eq!(batch.count(InsertStatus::Inserted), NUM_KEYS as usize);
        assert_eq!(
            batch.count(InsertStatus::Duplicate),
            NUM_KEYS as usize * (COPIES - 1)
        );
        assert_eq!(map.len(), NUM_KEYS as usize);
        assert_eq!(map.bucket_sizes().iter().sum::<usize>(), NUM_KEYS as usize);

        let mut winners = HashMap::new();
        for (i, status) in batch.masks.iter().enumerate() {
            if status.is_inserted() {
                assert!(winners.insert(elements[i].0, i as u32).is_none());
            }
        }
        assert_eq!(winners.len(), NUM_KEYS as usize);

        // the stored value is the one the winning element carried
        let all: Vec<u8> = (0..NUM_KEYS).flat_map(u32::to_le_bytes).collect();
        let found = map.find(&all).unwrap();
        let mut stored = vec![0u8; all.len()];
        map.unpack(&found.handles, None, None, Some(&mut stored[..]))
            .unwrap();
        for (k, value) in stored.chunks_exact(4).enumerate() {
            let value = u32::from_le_bytes([value[0], value[1], value[2], value[3]]);
            assert_eq!(value, winners[&(k as u32)]);
        }

        // losers gave their records back
        let slab = map.as_accelerator().unwrap();
        assert_eq!(slab.free_count(), map.capacity() - NUM_KEYS as usize);
    }
}

#[test]
fn concurrent_find() {
    let mut map = accelerator(NUM_KEYS as usize, 4);
    let keys: Vec<u8> = (0..NUM_KEYS).flat_map(u32::to_le_bytes).collect();
    map.insert(&keys, &keys).unwrap();

    let map = Arc::new(map);
    let keys = Arc::new(keys);
    let mut threads = Vec::new();
    for _ in 0..num_cpus::get().min(8) {
        let map = Arc::clone(&map);
        let keys = Arc::clone(&keys);
        threads.push(thread::spawn(move || {
            for _ in 0..ITERATIONS {
                let found = map.find(&keys).unwrap();
                assert_eq!(found.hits(), NUM_KEYS as usize);
            }
        }));
    }
    for t in threads {
        t.join().expect("failed to join thread");
    }
}
