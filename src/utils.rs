//! Utility functions shared by the importer and the audience sync.

/// Split keys into request-sized batches.
///
/// # Arguments
///
/// * `keys` - Slice of sync keys
/// * `size` - Maximum keys per batch, treated as 1 if zero
///
/// # Returns
///
/// Iterator over batches of at most `size` keys, in input order.
pub fn batches<T>(keys: &[T], size: usize) -> std::slice::Chunks<'_, T> {
    keys.chunks(size.max(1))
}

/// Number of batches `batches` will produce.
#[must_use]
pub const fn batch_count(len: usize, size: usize) -> usize {
    let size = if size == 0 { 1 } else { size };
    len.div_ceil(size)
}

/// Normalize an export header: strip BOM and quotes, lowercase, spaces and hyphens to `_`.
#[must_use]
pub fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .trim()
        .trim_matches('"')
        .to_lowercase()
        .replace([' ', '-'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batches_split_evenly_and_remainder() {
        let keys: Vec<u32> = (0..12_000).collect();
        let sizes: Vec<usize> = batches(&keys, 10_000).map(<[u32]>::len).collect();
        assert_eq!(sizes, vec![10_000, 2_000]);
        assert_eq!(batch_count(12_000, 10_000), 2);
        assert_eq!(batch_count(600, 500), 2);
        assert_eq!(batch_count(500, 500), 1);
        assert_eq!(batch_count(0, 500), 0);
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let keys = [1, 2, 3];
        assert_eq!(batches(&keys, 0).count(), 3);
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("\u{feff}Sell-to Customer No_"), "sell_to_customer_no_");
        assert_eq!(normalize_header(" USA Email "), "usa_email");
        assert_eq!(normalize_header("\"Last Order Date\""), "last_order_date");
    }
}
