use std::sync::atomic::{AtomicU64, Ordering};

/// Request id issuer owned by one connection.
///
/// Ids start at 1 and increase monotonically for the life of the issuer.
#[derive(Debug)]
pub struct RequestIds {
    next: AtomicU64,
}

impl RequestIds {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_per_issuer_and_increasing() {
        let a = RequestIds::new();
        let b = RequestIds::new();
        assert_eq!(a.next_id(), 1);
        assert_eq!(a.next_id(), 2);
        assert_eq!(b.next_id(), 1);
        assert_eq!(a.next_id(), 3);
    }
}
