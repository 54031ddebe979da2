use rand::distributions::{Distribution, Uniform};
use rand::thread_rng;
use slabhash::arena::HeapSnapshot;
use slabhash::{Device, Hashmap, HashmapConfig, InsertStatus};

fn accelerator(max_keys: usize) -> Hashmap {
    let config = HashmapConfig::new(max_keys, 8, 8).device(Device::Accelerator { workers: 4 });
    Hashmap::new(config).unwrap()
}

fn keys(range: std::ops::Range<u64>) -> Vec<u8> {
    range.flat_map(u64::to_le_bytes).collect()
}

/// `live` slots are handed out and the rest sit on the free list exactly once.
fn assert_conserved(snapshot: &HeapSnapshot, capacity: usize, live: usize) {
    assert_eq!(snapshot.counter, live);
    assert_eq!(snapshot.heap.len(), capacity);
    let mut free = snapshot.free_slots().to_vec();
    free.sort_unstable();
    free.dedup();
    assert_eq!(free.len(), capacity - live);
    assert!(free.iter().all(|&slot| (slot as usize) < capacity));
}

#[test]
fn one_past_capacity() {
    for max_keys in [1, 7, 64, 500] {
        let mut map = accelerator(max_keys);
        let batch = map
            .insert(&keys(0..max_keys as u64 + 1), &keys(0..max_keys as u64 + 1))
            .unwrap();
        assert_eq!(batch.count(InsertStatus::Inserted), max_keys);
        assert_eq!(batch.count(InsertStatus::CapacityExhausted), 1);
        assert_eq!(batch.count(InsertStatus::Duplicate), 0);
        assert_eq!(map.len(), max_keys);

        // exactly the inserted keys are present
        let found = map.find(&keys(0..max_keys as u64 + 1)).unwrap();
        assert_eq!(found.mask(), batch.mask());
    }
}

#[test]
fn exhausted_across_batches() {
    let mut map = accelerator(16);
    map.insert(&keys(0..16), &keys(0..16)).unwrap();
    let batch = map.insert(&keys(16..20), &keys(16..20)).unwrap();
    assert_eq!(batch.masks, vec![InsertStatus::CapacityExhausted; 4]);

    // a duplicate is still recognised as such when the table is full
    let batch = map.insert(&keys(3..4), &keys(0..1)).unwrap();
    assert_eq!(batch.masks, vec![InsertStatus::Duplicate]);
}

#[test]
fn conservation() {
    let max_keys = 128;
    let mut map = accelerator(max_keys);
    let dist = Uniform::from(0..256u64);
    let mut rng = thread_rng();

    for _ in 0..50 {
        let insert: Vec<u8> = (0..64)
            .flat_map(|_| dist.sample(&mut rng).to_le_bytes())
            .collect();
        map.insert(&insert, &insert).unwrap();
        let erase: Vec<u8> = (0..48)
            .flat_map(|_| dist.sample(&mut rng).to_le_bytes())
            .collect();
        map.erase(&erase).unwrap();

        let slab = map.as_accelerator().unwrap();
        assert_conserved(&slab.record_snapshot(), max_keys, map.len());
        assert_eq!(slab.free_count(), max_keys - map.len());
        assert_eq!(map.bucket_sizes().iter().sum::<usize>(), map.len());

        // every chain is packed, so it holds only the overflow slabs its records need
        let nodes = slab.node_snapshot();
        assert_conserved(&nodes, nodes.heap.len(), nodes.counter);
        assert_eq!(nodes.counter, overflow_needed(&map.bucket_sizes()));
    }
}

fn overflow_needed(bucket_sizes: &[usize]) -> usize {
    bucket_sizes
        .iter()
        .map(|&n| n.saturating_sub(1) / 8)
        .sum()
}

#[test]
fn churn_across_buckets_keeps_capacity() {
    let max_keys = 64;
    let config = HashmapConfig::new(max_keys, 8, 8)
        .device(Device::Accelerator { workers: 4 })
        .buckets(16)
        .hasher(|k: &[u8]| u64::from(k[0]));
    let mut map = Hashmap::new(config).unwrap();

    // fill each bucket to capacity in turn, then empty it again
    let bucket_keys = |bucket: u8| -> Vec<u8> {
        (0..max_keys as u8)
            .flat_map(|i| [bucket, i, 0, 0, 0, 0, 0, 0])
            .collect()
    };
    for bucket in 0..16 {
        let keys = bucket_keys(bucket);
        let batch = map.insert(&keys, &keys).unwrap();
        assert_eq!(
            batch.count(InsertStatus::Inserted),
            max_keys,
            "bucket {}",
            bucket
        );
        assert!(map.erase(&keys).unwrap().iter().all(|&e| e));
        assert!(map.is_empty());
        assert_eq!(map.as_accelerator().unwrap().node_snapshot().counter, 0);
    }

    let keys = bucket_keys(3);
    let batch = map.insert(&keys, &keys).unwrap();
    assert_eq!(batch.count(InsertStatus::CapacityExhausted), 0);
    assert_eq!(map.len(), max_keys);
}

#[test]
fn partial_erase_releases_trailing_slabs() {
    let config = HashmapConfig::new(64, 8, 8)
        .device(Device::Accelerator { workers: 4 })
        .buckets(1);
    let mut map = Hashmap::new(config).unwrap();
    map.insert(&keys(0..64), &keys(0..64)).unwrap();
    assert_eq!(map.as_accelerator().unwrap().node_snapshot().counter, 7);

    // keep every eighth key; the survivors are packed into the inline slab
    let erase: Vec<u8> = (0..64u64)
        .filter(|k| k % 8 != 0)
        .flat_map(u64::to_le_bytes)
        .collect();
    map.erase(&erase).unwrap();
    assert_eq!(map.len(), 8);
    assert_eq!(map.as_accelerator().unwrap().node_snapshot().counter, 0);

    let survivors: Vec<u8> = (0..64u64)
        .filter(|k| k % 8 == 0)
        .flat_map(u64::to_le_bytes)
        .collect();
    let found = map.find(&survivors).unwrap();
    assert_eq!(found.hits(), 8);
    let mut values = vec![0u8; survivors.len()];
    map.unpack(&found.handles, None, None, Some(&mut values[..]))
        .unwrap();
    assert_eq!(values, survivors);

    // the freed room is usable again
    let batch = map.insert(&keys(100..156), &keys(100..156)).unwrap();
    assert_eq!(batch.count(InsertStatus::Inserted), 56);
}
