//! Writer-preferring read/write lock for filesystem paths.
//!
//! One [`PathLock`] guards each known path. Readers share the lock;
//! writers exclude everyone. A waiting writer blocks newly arriving
//! readers, so writers cannot starve under read-heavy traffic. The lock
//! also keeps a cumulative count of read grants, which feeds the naming
//! server's replication heuristic, and supports [`interrupt`] so that a
//! shutdown can unblock every waiting operation.
//!
//! [`interrupt`]: PathLock::interrupt

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::DfsError;
use crate::error::StoppedSnafu;

#[derive(Debug, Default)]
struct LockState {
    readers: u32,
    writer_held: bool,
    writers_waiting: u32,
    reads_granted: u64,
    stopped: bool,
}

/// A per-path read/write lock with writer preference and interruption.
///
/// State lives under a short-section mutex; blocked acquisitions park on
/// a [`Notify`] and re-check after every broadcast. Releases and
/// interrupts broadcast to all waiters.
#[derive(Debug, Default)]
pub struct PathLock {
    state: Mutex<LockState>,
    wakeup: Notify,
}

impl PathLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock in shared mode.
    ///
    /// Blocks while a writer holds the lock or any writer is waiting.
    /// Each grant increments the cumulative read counter. Fails with
    /// [`DfsError::Stopped`] once the lock has been interrupted.
    pub async fn acquire_read(&self) -> Result<(), DfsError> {
        loop {
            let waiter = self.wakeup.notified();
            tokio::pin!(waiter);
            // Register before checking state so a broadcast between the
            // check and the await is not lost.
            waiter.as_mut().enable();
            {
                let mut state = self.state.lock();
                if state.stopped {
                    return StoppedSnafu.fail();
                }
                if !state.writer_held && state.writers_waiting == 0 {
                    state.readers += 1;
                    state.reads_granted += 1;
                    return Ok(());
                }
            }
            waiter.await;
        }
    }

    /// Release a shared grant and wake all waiters.
    pub fn release_read(&self) {
        {
            let mut state = self.state.lock();
            debug_assert!(state.readers > 0, "release_read without a read grant");
            state.readers = state.readers.saturating_sub(1);
        }
        self.wakeup.notify_waiters();
    }

    /// Acquire the lock in exclusive mode.
    ///
    /// Registers as a waiting writer (blocking new readers), then blocks
    /// while any reader or writer holds the lock. Fails with
    /// [`DfsError::Stopped`] once the lock has been interrupted.
    pub async fn acquire_write(&self) -> Result<(), DfsError> {
        self.state.lock().writers_waiting += 1;
        loop {
            let waiter = self.wakeup.notified();
            tokio::pin!(waiter);
            waiter.as_mut().enable();
            {
                let mut state = self.state.lock();
                if state.stopped {
                    state.writers_waiting -= 1;
                    return StoppedSnafu.fail();
                }
                if state.readers == 0 && !state.writer_held {
                    state.writers_waiting -= 1;
                    state.writer_held = true;
                    return Ok(());
                }
            }
            waiter.await;
        }
    }

    /// Release the exclusive grant and wake all waiters.
    pub fn release_write(&self) {
        {
            let mut state = self.state.lock();
            debug_assert!(state.writer_held, "release_write without the write grant");
            state.writer_held = false;
        }
        self.wakeup.notify_waiters();
    }

    /// Interrupt the lock: every current and future acquisition fails
    /// with [`DfsError::Stopped`]. Existing holders may still release.
    pub fn interrupt(&self) {
        self.state.lock().stopped = true;
        self.wakeup.notify_waiters();
    }

    /// Cumulative number of read grants since creation or the last
    /// [`reset_read_count`](PathLock::reset_read_count). Advisory; feeds
    /// the replication policy only.
    pub fn reads_granted(&self) -> u64 {
        self.state.lock().reads_granted
    }

    /// Reset the cumulative read-grant counter. Called when a
    /// replication task for the path succeeds.
    pub fn reset_read_count(&self) {
        self.state.lock().reads_granted = 0;
    }

    /// Whether a writer currently holds the lock.
    pub fn is_write_locked(&self) -> bool {
        self.state.lock().writer_held
    }

    /// Whether any reader currently holds the lock.
    pub fn is_read_locked(&self) -> bool {
        self.state.lock().readers > 0
    }

    /// Whether any writer is queued waiting for the lock.
    pub fn has_waiting_writers(&self) -> bool {
        self.state.lock().writers_waiting > 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time::sleep;
    use tokio::time::timeout;

    use super::*;

    async fn until(condition: impl Fn() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !condition() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition never became true");
    }

    #[tokio::test]
    async fn readers_share() {
        let lock = PathLock::new();
        lock.acquire_read().await.unwrap();
        lock.acquire_read().await.unwrap();
        assert!(lock.is_read_locked());
        lock.release_read();
        lock.release_read();
        assert!(!lock.is_read_locked());
    }

    #[tokio::test]
    async fn writer_excludes_readers() {
        let lock = Arc::new(PathLock::new());
        lock.acquire_write().await.unwrap();

        let blocked = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move { lock.acquire_read().await })
        };
        sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        lock.release_write();
        blocked.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn waiting_writer_served_before_new_reader() {
        let lock = Arc::new(PathLock::new());
        lock.acquire_read().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel::<&'static str>();

        let writer = {
            let lock = Arc::clone(&lock);
            let tx = tx.clone();
            tokio::spawn(async move {
                lock.acquire_write().await.unwrap();
                tx.send("write").unwrap();
            })
        };
        until(|| lock.has_waiting_writers()).await;

        let reader = {
            let lock = Arc::clone(&lock);
            let tx = tx.clone();
            tokio::spawn(async move {
                lock.acquire_read().await.unwrap();
                tx.send("read").unwrap();
            })
        };
        sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err(), "both must block behind the held read");

        lock.release_read();
        assert_eq!(rx.recv().await.unwrap(), "write");
        sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err(), "reader must wait out the writer");

        lock.release_write();
        assert_eq!(rx.recv().await.unwrap(), "read");

        writer.await.unwrap();
        reader.await.unwrap();
        lock.release_read();
    }

    #[tokio::test]
    async fn interrupt_unblocks_waiters_and_rejects_new_acquires() {
        let lock = Arc::new(PathLock::new());
        lock.acquire_write().await.unwrap();

        let waiting_reader = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move { lock.acquire_read().await })
        };
        let waiting_writer = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move { lock.acquire_write().await })
        };
        until(|| lock.has_waiting_writers()).await;

        lock.interrupt();
        assert_eq!(waiting_reader.await.unwrap(), Err(DfsError::Stopped));
        assert_eq!(waiting_writer.await.unwrap(), Err(DfsError::Stopped));
        assert_eq!(lock.acquire_read().await, Err(DfsError::Stopped));
        assert_eq!(lock.acquire_write().await, Err(DfsError::Stopped));

        // The existing holder may still release.
        lock.release_write();
    }

    #[tokio::test]
    async fn read_grants_accumulate_and_reset() {
        let lock = PathLock::new();
        for _ in 0..3 {
            lock.acquire_read().await.unwrap();
            lock.release_read();
        }
        assert_eq!(lock.reads_granted(), 3);
        lock.reset_read_count();
        assert_eq!(lock.reads_granted(), 0);

        lock.acquire_write().await.unwrap();
        lock.release_write();
        assert_eq!(lock.reads_granted(), 0, "writes do not count as reads");
    }
}
