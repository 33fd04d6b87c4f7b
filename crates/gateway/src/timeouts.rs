//! Deadline derivation for broker transactions.

use std::time::Duration;

/// Deadline for metadata operations (listing, deletes).
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Overall deadline for a download.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Floor for the per-chunk deadline during downloads.
const MIN_CHUNK_TIMEOUT: Duration = Duration::from_secs(5);

const MIB: u64 = 1024 * 1024;

/// Upload deadline scaled to payload size: 10 seconds per MiB (rounded up)
/// plus a 30-second base, clamped to [30 s, 300 s].
pub fn upload_timeout(size: u64) -> Duration {
    let mib = size.div_ceil(MIB);
    let secs = (mib * 10 + 30).clamp(30, 300);
    Duration::from_secs(secs)
}

/// Per-chunk deadline while collecting a download's frames.
///
/// The overall budget is spread across the expected frames (plus one slot
/// for the envelope) but never drops below 5 seconds, so a single slow
/// frame on a large file does not abort an otherwise healthy transfer.
pub fn download_chunk_timeout(overall: Duration, expected_chunks: u32) -> Duration {
    let spread = overall / (expected_chunks + 1);
    spread.max(MIN_CHUNK_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_floor_is_30s() {
        assert_eq!(upload_timeout(0), Duration::from_secs(30));
        assert_eq!(upload_timeout(1), Duration::from_secs(40));
        assert_eq!(upload_timeout(512 * 1024), Duration::from_secs(40));
    }

    #[test]
    fn upload_rounds_size_up() {
        // 1 MiB exactly: one MiB worth of budget.
        assert_eq!(upload_timeout(MIB), Duration::from_secs(40));
        // One byte past the boundary buys the next 10-second slice.
        assert_eq!(upload_timeout(MIB + 1), Duration::from_secs(50));
        assert_eq!(upload_timeout(3 * MIB), Duration::from_secs(60));
    }

    #[test]
    fn upload_caps_at_300s() {
        assert_eq!(upload_timeout(100 * MIB), Duration::from_secs(300));
        assert_eq!(upload_timeout(u64::MAX / 2), Duration::from_secs(300));
    }

    #[test]
    fn chunk_timeout_spreads_overall_budget() {
        // 60 s over 5 chunks + envelope = 10 s each.
        assert_eq!(
            download_chunk_timeout(Duration::from_secs(60), 5),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn chunk_timeout_never_below_five_seconds() {
        assert_eq!(
            download_chunk_timeout(Duration::from_secs(60), 1000),
            Duration::from_secs(5)
        );
    }
}
