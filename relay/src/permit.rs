//! Per-session admission permit
//!
//! A counting semaphore used with capacity 1, so at most one tunneled
//! request per session is in flight. Units are handed out as a scoped
//! guard: they return to the permit when the guard drops, on every exit
//! path including a cancelled handler future.

use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::{RelayError, Result};

#[derive(Debug, Clone)]
pub struct Permit {
    units: Arc<Semaphore>,
    capacity: u32,
}

impl Permit {
    pub fn new(capacity: u32) -> Self {
        Self {
            units: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
        }
    }

    /// One unit: a mutex over the session's in-flight slot
    pub fn binary() -> Self {
        Self::new(1)
    }

    /// Wait until `n` units are free, then take them.
    ///
    /// Waiters are served in arrival order. No deadline is applied here;
    /// callers layer their own.
    pub async fn acquire(&self, n: u32) -> Result<PermitGuard> {
        self.check(n)?;
        self.units
            .acquire_many(n)
            .await
            .map_err(|_| RelayError::PermitClosed)?
            .forget();
        Ok(PermitGuard { units: self.units.clone(), held: n })
    }

    /// Take `n` units only if they are free right now
    #[cfg(test)]
    fn try_acquire(&self, n: u32) -> Result<Option<PermitGuard>> {
        use tokio::sync::TryAcquireError;

        self.check(n)?;
        match self.units.try_acquire_many(n) {
            Ok(taken) => {
                taken.forget();
                Ok(Some(PermitGuard { units: self.units.clone(), held: n }))
            }
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(RelayError::PermitClosed),
        }
    }

    pub fn available(&self) -> usize {
        self.units.available_permits()
    }

    // Asking for more than the capacity would wait forever.
    fn check(&self, n: u32) -> Result<()> {
        if n > self.capacity {
            return Err(RelayError::PermitOverflow {
                requested: n,
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}

/// Units taken from a [`Permit`]; whatever is still held returns on drop
#[derive(Debug)]
#[must_use = "dropping the guard releases the units immediately"]
pub struct PermitGuard {
    units: Arc<Semaphore>,
    held: u32,
}

impl PermitGuard {
    #[cfg(test)]
    fn held(&self) -> u32 {
        self.held
    }

    /// Return up to `n` units now; the rest stay held until drop.
    ///
    /// Returns how many were actually released.
    pub fn release(&mut self, n: u32) -> u32 {
        let n = n.min(self.held);
        self.held -= n;
        self.units.add_permits(n as usize);
        n
    }
}

impl Drop for PermitGuard {
    fn drop(&mut self) {
        self.units.add_permits(self.held as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_binary_permit_excludes() {
        let permit = Permit::binary();
        let mut guard = permit.acquire(1).await.unwrap();
        assert_eq!(permit.available(), 0);
        assert!(permit.try_acquire(1).unwrap().is_none());

        assert_eq!(guard.release(1), 1);
        drop(guard);
        assert_eq!(permit.available(), 1);
        assert!(permit.try_acquire(1).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_guard_releases_on_drop() {
        let permit = Permit::new(3);
        {
            let guard = permit.acquire(2).await.unwrap();
            assert_eq!(guard.held(), 2);
            assert_eq!(permit.available(), 1);
        }
        assert_eq!(permit.available(), 3);
    }

    #[tokio::test]
    async fn test_partial_release() {
        let permit = Permit::new(3);
        let mut guard = permit.acquire(3).await.unwrap();
        assert_eq!(guard.release(1), 1);
        assert_eq!(permit.available(), 1);
        assert_eq!(guard.held(), 2);

        // Releasing more than is held only returns what is left.
        assert_eq!(guard.release(5), 2);
        assert_eq!(permit.available(), 3);
        drop(guard);
        assert_eq!(permit.available(), 3);
    }

    #[tokio::test]
    async fn test_overflow_is_rejected() {
        let permit = Permit::binary();
        assert!(matches!(
            permit.acquire(2).await,
            Err(RelayError::PermitOverflow { requested: 2, capacity: 1 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_released_when_holder_drops() {
        let permit = Permit::binary();
        let held = permit.acquire(1).await.unwrap();

        let waiter = {
            let permit = permit.clone();
            tokio::spawn(async move { permit.acquire(1).await.map(|g| g.held()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert_eq!(waiter.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_acquire_leaks_nothing() {
        let permit = Permit::binary();
        let held = permit.acquire(1).await.unwrap();
        let attempt = tokio::time::timeout(Duration::from_millis(10), permit.acquire(1)).await;
        assert!(attempt.is_err());
        drop(held);
        assert_eq!(permit.available(), 1);
    }
}
