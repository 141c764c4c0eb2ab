use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out relay ids: a per-process random prefix mixed with a counter,
/// rendered as 32 lowercase hex digits.
pub(crate) struct RelayIdSource {
    prefix: u128,
    issued: AtomicU64,
}

impl RelayIdSource {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::with_prefix((u128::from(fastrand::u64(..)) << 64) | u128::from(fastrand::u64(..)))
    }

    fn with_prefix(prefix: u128) -> Self {
        Self {
            prefix,
            issued: AtomicU64::new(1),
        }
    }

    pub(crate) fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed) - 1
    }

    #[must_use]
    pub(crate) fn next_id(&self) -> String {
        let seq = self.issued.fetch_add(1, Ordering::Relaxed);
        uuid::Uuid::from_u128(self.prefix ^ u128::from(seq))
            .simple()
            .to_string()
    }
}
