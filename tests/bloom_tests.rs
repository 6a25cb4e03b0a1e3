// Bloom filter: per-table key filter stored in a meta block.
// Tests for membership, false positive rate and the serialized form.

use leveled_lsm::bloom::{BloomFilter, BloomFilterBuilder};

fn filter_over(n: usize, fpr: f64, prefix: &str) -> BloomFilter {
    let mut builder = BloomFilterBuilder::new(fpr);
    for i in 0..n {
        builder.add_key(format!("{prefix}{i}").as_bytes());
    }
    builder.build()
}

fn measured_fpr(filter: &BloomFilter, prefix: &str, from: usize, n: usize) -> f64 {
    let hits = (from..from + n)
        .filter(|i| filter.may_contain(format!("{prefix}{i}").as_bytes()))
        .count();
    hits as f64 / n as f64
}

// =============================================================================
// Test 1: An empty filter rejects everything
// =============================================================================
#[test]
fn empty_filter_rejects_all() {
    let bf = BloomFilter::new(100, 0.01);
    assert!(!bf.may_contain(b"any_key"));
    assert!(!bf.may_contain(b""));

    let built = BloomFilterBuilder::new(0.01).build();
    assert!(!built.may_contain(b"hello"));
}

// =============================================================================
// Test 2: Every inserted key is reported present
// =============================================================================
#[test]
fn no_false_negatives() {
    let keys: Vec<Vec<u8>> = vec![
        Vec::new(),
        b"apple".to_vec(),
        vec![0x00, 0x01, 0xFF, 0xFE],
        vec![0u8; 64 * 1024],
    ];
    let mut builder = BloomFilterBuilder::new(0.01);
    for key in &keys {
        builder.add_key(key);
    }
    let bf = builder.build();
    for key in &keys {
        assert!(bf.may_contain(key));
    }
}

// =============================================================================
// Test 3: Consecutive duplicate keys are counted once
// =============================================================================
// A table holds several versions of one user key next to each other.
#[test]
fn builder_collapses_adjacent_duplicates() {
    let mut builder = BloomFilterBuilder::new(0.01);
    builder.add_key(b"a");
    builder.add_key(b"a");
    builder.add_key(b"b");
    builder.add_key(b"b");
    builder.add_key(b"a");
    assert_eq!(builder.num_keys(), 3);
}

// =============================================================================
// Test 4: Measured false positive rate is near the target
// =============================================================================
#[test]
fn false_positive_rate_near_target() {
    for target in [0.10, 0.05, 0.01, 0.001] {
        let n = 5000;
        let bf = filter_over(n, target, "key_");
        let actual = measured_fpr(&bf, "key_", n, 10 * n);
        assert!(actual < target * 3.0, "target {target}, measured {actual}");
    }
}

// =============================================================================
// Test 5: Sizing grows with the key count and tighter rates
// =============================================================================
#[test]
fn sizing_follows_rate() {
    let loose = BloomFilter::new(1000, 0.1);
    let tight = BloomFilter::new(1000, 0.001);
    assert!(tight.num_bits() > loose.num_bits());
    assert!(tight.num_hashes() > loose.num_hashes());

    let small = BloomFilter::new(10, 0.01);
    let large = BloomFilter::new(10_000, 0.01);
    assert!(large.num_bits() > small.num_bits());
    // Never smaller than one word
    assert!(small.num_bits() >= 64);
}

// =============================================================================
// Test 6: The meta block form reproduces the same filter
// =============================================================================
#[test]
fn serialized_filter_answers_identically() {
    let bf = filter_over(2000, 0.01, "k");
    let data = bf.serialize();
    assert_eq!(data.len(), 8 + (bf.num_bits() as usize).div_ceil(64) * 8);

    let restored = BloomFilter::deserialize(&data).unwrap();
    assert_eq!(restored, bf);
    for i in 0..4000 {
        let key = format!("k{i}");
        assert_eq!(restored.may_contain(key.as_bytes()), bf.may_contain(key.as_bytes()));
    }
}

// =============================================================================
// Test 7: Damaged meta blocks are rejected
// =============================================================================
#[test]
fn damaged_filter_is_corruption() {
    let data = filter_over(100, 0.01, "k").serialize();

    assert!(BloomFilter::deserialize(&data[..4]).unwrap_err().is_corruption());
    assert!(BloomFilter::deserialize(&data[..data.len() - 8]).unwrap_err().is_corruption());

    let mut zero_hashes = data.clone();
    zero_hashes[..4].copy_from_slice(&0u32.to_le_bytes());
    assert!(BloomFilter::deserialize(&zero_hashes).unwrap_err().is_corruption());
}
