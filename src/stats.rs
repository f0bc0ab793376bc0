//! Statistics collection, generalized as a trait-bound collector with a
//! no-op default per the design note on global statistics: the original
//! keeps these as process-wide `STATISTIC_DECL` counters; here the caller
//! owns an implementation and passes it in explicitly.

/// Counters touched by the replay pass (`apply_replacements`) and by
/// `DecodedByte`'s `Listing` format. Names follow the original counter
/// list so a caller porting dashboards can match them up.
pub trait Stats {
    fn incr_total_bytes(&mut self) {}
    fn incr_identical_bytes(&mut self) {}
    fn incr_unknown_bytes(&mut self) {}
    fn incr_corrupted_bytes(&mut self) {}
    fn incr_bytes_replaced(&mut self) {}
    fn incr_reconst_bytes(&mut self) {}
    fn incr_reconst_correct(&mut self) {}
    fn incr_reconst_correct_casefolded(&mut self) {}
    fn incr_reconst_unaltered(&mut self) {}

    /// Process-wide running totals across however many files/streams this
    /// collector has seen; the original accumulates these into
    /// `s_global_*` statics inside `DecodedByte`.
    fn add_counts(&mut self, known: u64, total: u64, original: u64) {
        let _ = (known, total, original);
    }
    fn clear_counts(&mut self) {}
}

/// Default collector: every hook is a no-op. Used wherever a caller
/// doesn't care about statistics (e.g. the `ziprecd` binary without
/// `-v`/`--stats`).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStats;

impl Stats for NullStats {}

/// In-memory counters, for tests and for callers that want the numbers
/// without wiring up their own collector.
#[derive(Debug, Default, Clone)]
pub struct CountingStats {
    pub total_bytes: u64,
    pub identical_bytes: u64,
    pub unknown_bytes: u64,
    pub corrupted_bytes: u64,
    pub bytes_replaced: u64,
    pub reconst_bytes: u64,
    pub reconst_correct: u64,
    pub reconst_correct_casefolded: u64,
    pub reconst_unaltered: u64,
    pub global_known_bytes: u64,
    pub global_total_bytes: u64,
    pub global_original_size: u64,
}

impl Stats for CountingStats {
    fn incr_total_bytes(&mut self) {
        self.total_bytes += 1;
    }
    fn incr_identical_bytes(&mut self) {
        self.identical_bytes += 1;
    }
    fn incr_unknown_bytes(&mut self) {
        self.unknown_bytes += 1;
    }
    fn incr_corrupted_bytes(&mut self) {
        self.corrupted_bytes += 1;
    }
    fn incr_bytes_replaced(&mut self) {
        self.bytes_replaced += 1;
    }
    fn incr_reconst_bytes(&mut self) {
        self.reconst_bytes += 1;
    }
    fn incr_reconst_correct(&mut self) {
        self.reconst_correct += 1;
    }
    fn incr_reconst_correct_casefolded(&mut self) {
        self.reconst_correct_casefolded += 1;
    }
    fn incr_reconst_unaltered(&mut self) {
        self.reconst_unaltered += 1;
    }
    fn add_counts(&mut self, known: u64, total: u64, original: u64) {
        self.global_known_bytes += known;
        self.global_total_bytes += total;
        self.global_original_size += original;
    }
    fn clear_counts(&mut self) {
        self.global_known_bytes = 0;
        self.global_total_bytes = 0;
        self.global_original_size = 0;
    }
}
