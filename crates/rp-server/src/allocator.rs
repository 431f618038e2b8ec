//! Identity allocation
//!
//! Identities are strictly monotonic across the process lifetime and, when
//! the counter file survives, across restarts. The counter is loaded once
//! at startup and written on every allocation; a failed write is a warning,
//! never a failed allocation.

use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use rp_core::counter;
use rp_protocol::ClientId;

/// Hands out monotonically increasing session identities
pub struct IdentityAllocator {
    inner: Mutex<Inner>,
}

struct Inner {
    last: u64,
    path: PathBuf,
}

impl IdentityAllocator {
    /// Load the allocator from the persisted counter file.
    ///
    /// An absent file starts the counter at zero. An unreadable or corrupt
    /// file also starts at zero with a warning: identities may then repeat
    /// ones issued before the file was lost. That is an accepted limitation
    /// of the persistence scheme, not something recovered from here.
    pub fn load(path: PathBuf) -> Self {
        let last = match counter::read_counter_file(&path) {
            Ok(Some(value)) => {
                tracing::info!("Loaded identity counter: {}", value);
                value
            }
            Ok(None) => {
                tracing::info!("No counter file at {:?}, starting from 0", path);
                0
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to read counter file {:?}: {}; starting from 0",
                    path,
                    e
                );
                0
            }
        };

        Self {
            inner: Mutex::new(Inner { last, path }),
        }
    }

    /// Allocate the next identity: previous counter value plus one.
    ///
    /// Safe to call concurrently from every connection worker; the mutex is
    /// the single exclusion domain for allocator state.
    pub fn next(&self) -> ClientId {
        let mut inner = self.lock();
        inner.last += 1;
        if let Err(e) = counter::write_counter_file(&inner.path, inner.last) {
            tracing::warn!("Failed to persist identity counter {}: {}", inner.last, e);
        }
        ClientId::new(inner.last)
    }

    /// The most recently issued identity (0 if none yet)
    pub fn last_issued(&self) -> u64 {
        self.lock().last
    }

    /// Flush the counter to disk; called once more at shutdown
    pub fn persist(&self) -> io::Result<()> {
        let inner = self.lock();
        counter::write_counter_file(&inner.path, inner.last)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("identity allocator mutex poisoned")
    }
}
