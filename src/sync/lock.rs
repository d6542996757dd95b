// Copyright (c) 2025-present, factstore
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::sync::atomic::{fence, AtomicU64, Ordering};

/// A lease on an [`OptimisticLock`]: the version stamp a reader captured when
/// entering its read-critical section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lease(u64);

/// An optimistic read-write lock built on a single version counter.
///
/// Even counter values mean *stable*, odd values mean *a writer holds the
/// lock*. Readers never block writers: a reader captures the counter as a
/// [`Lease`], reads the protected state, and re-validates the lease
/// afterwards. A failed validation is not an error — the caller retries the
/// whole read-critical section.
///
/// Writers gain exclusivity by bumping the counter from even to odd with a
/// compare-and-swap; publishing ([`end_write`](Self::end_write)) bumps it to
/// the next even value so every outstanding lease turns stale.
#[derive(Debug, Default)]
pub struct OptimisticLock {
    version: AtomicU64,
}

impl OptimisticLock {
    /// Creates an unlocked instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            version: AtomicU64::new(0),
        }
    }

    /// Begins a read-critical section, spinning while a writer is active.
    #[must_use]
    pub fn start_read(&self) -> Lease {
        loop {
            let version = self.version.load(Ordering::Acquire);
            if version & 1 == 0 {
                return Lease(version);
            }
            std::hint::spin_loop();
        }
    }

    /// Whether no write has committed since the lease was taken.
    ///
    /// The fence orders the caller's preceding state reads before the
    /// re-read of the counter (publication safety; same pattern as a
    /// sequence lock).
    #[must_use]
    pub fn validate(&self, lease: Lease) -> bool {
        fence(Ordering::Acquire);
        self.version.load(Ordering::Relaxed) == lease.0
    }

    /// Ends a read-critical section; equivalent to a final
    /// [`validate`](Self::validate).
    #[must_use]
    pub fn end_read(&self, lease: Lease) -> bool {
        self.validate(lease)
    }

    /// Tries to acquire the write lock without blocking.
    #[must_use]
    pub fn try_start_write(&self) -> bool {
        let version = self.version.load(Ordering::Relaxed);
        if version & 1 == 1 {
            return false;
        }
        self.version
            .compare_exchange(version, version + 1, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Acquires the write lock, spinning until successful.
    pub fn start_write(&self) {
        while !self.try_start_write() {
            std::hint::spin_loop();
        }
    }

    /// Atomically upgrades a read lease to the write lock. Fails if any
    /// writer committed (or is active) since the lease was taken.
    #[must_use]
    pub fn try_upgrade_to_write(&self, lease: Lease) -> bool {
        self.version
            .compare_exchange(lease.0, lease.0 + 1, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Releases the write lock, publishing the protected updates.
    pub fn end_write(&self) {
        debug_assert!(self.is_write_locked());
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Releases the write lock without publishing: the version is restored,
    /// so outstanding leases stay valid.
    pub fn abort_write(&self) {
        debug_assert!(self.is_write_locked());
        self.version.fetch_sub(1, Ordering::Release);
    }

    /// Whether a writer currently holds the lock (for assertions).
    #[must_use]
    pub fn is_write_locked(&self) -> bool {
        self.version.load(Ordering::Relaxed) & 1 == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_validates_when_quiet() {
        let lock = OptimisticLock::new();
        let lease = lock.start_read();
        assert!(lock.validate(lease));
        assert!(lock.end_read(lease));
    }

    #[test]
    fn committed_write_invalidates_leases() {
        let lock = OptimisticLock::new();
        let lease = lock.start_read();
        assert!(lock.try_start_write());
        assert!(lock.is_write_locked());
        lock.end_write();
        assert!(!lock.validate(lease));
    }

    #[test]
    fn aborted_write_keeps_leases_valid() {
        let lock = OptimisticLock::new();
        let lease = lock.start_read();
        lock.start_write();
        lock.abort_write();
        assert!(lock.validate(lease));
    }

    #[test]
    fn upgrade_fails_after_interleaved_write() {
        let lock = OptimisticLock::new();
        let lease = lock.start_read();
        lock.start_write();
        lock.end_write();
        assert!(!lock.try_upgrade_to_write(lease));

        let lease = lock.start_read();
        assert!(lock.try_upgrade_to_write(lease));
        lock.end_write();
    }

    #[test]
    fn writers_exclude_each_other() {
        let lock = OptimisticLock::new();
        assert!(lock.try_start_write());
        assert!(!lock.try_start_write());
        lock.end_write();
        assert!(lock.try_start_write());
        lock.abort_write();
    }

    #[test]
    fn contended_counter_stays_consistent() {
        let lock = OptimisticLock::new();
        let value = std::sync::atomic::AtomicU64::new(0);

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..1_000 {
                        lock.start_write();
                        let v = value.load(Ordering::Relaxed);
                        value.store(v + 1, Ordering::Relaxed);
                        lock.end_write();
                    }
                });
            }
            s.spawn(|| {
                for _ in 0..1_000 {
                    let lease = lock.start_read();
                    let v = value.load(Ordering::Relaxed);
                    if lock.end_read(lease) {
                        assert!(v <= 4_000);
                    }
                }
            });
        });

        assert_eq!(value.load(Ordering::Relaxed), 4_000);
    }
}
