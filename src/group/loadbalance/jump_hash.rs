/// Jump consistent hash: maps `key` to a bucket in `[0, buckets)`.
///
/// Moving from `n` to `n + 1` buckets relocates only about `1 / (n + 1)` of
/// the keys. Returns 0 when `buckets` is not positive.
pub fn jump_hash(mut key: u64, buckets: i32) -> i32 {
    let mut b: i64 = 0;
    let mut j: i64 = 0;

    while j < i64::from(buckets) {
        b = j;
        key = key.wrapping_mul(2862933555777941757).wrapping_add(1);
        j = ((b + 1) as f64 * ((1i64 << 31) as f64 / ((key >> 33) + 1) as f64)) as i64;
    }

    b as i32
}

/// Bucket index for a slice of `len` entries
pub(crate) fn jump_index(key: u64, len: usize) -> usize {
    let buckets = i32::try_from(len).unwrap_or(i32::MAX);
    jump_hash(key, buckets) as usize
}
