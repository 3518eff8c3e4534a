//! Progress accounting.
//!
//! Progress is always derived from the number of slots currently in state
//! `uploaded`; it is never incremented in place.

/// Percentage of `total` chunks confirmed uploaded, rounded down.
///
/// A session without chunks (instant upload) is complete by definition.
pub fn percentage(uploaded: i64, total: i64) -> i64 {
    if total <= 0 {
        return 100;
    }
    let uploaded = uploaded.clamp(0, total);
    uploaded * 100 / total
}

#[cfg(test)]
mod tests {
    use super::percentage;

    #[test]
    fn zero_chunks_is_complete() {
        assert_eq!(percentage(0, 0), 100);
    }

    #[test]
    fn rounds_down() {
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 66);
        assert_eq!(percentage(3, 3), 100);
        assert_eq!(percentage(0, 7), 0);
    }

    #[test]
    fn never_exceeds_bounds() {
        assert_eq!(percentage(9, 3), 100);
        assert_eq!(percentage(-1, 3), 0);
    }
}
