//! The edge hit-count histogram, either process-local or mapped from a fuzzer's shared memory.
use core::mem::ManuallyDrop;

use libafl_bolts::{
    Error,
    shmem::{ShMem, ShMemId, ShMemProvider, StdShMem, StdShMemProvider},
};

pub const MAP_SIZE: usize = 1 << 16;

/// Environment variable a controlling fuzzer uses to hand over the shared map id.
pub const SHM_ENV_VAR: &str = "__AFL_SHM_ID";

/// Index of an edge in the histogram. Always in `[0, MAP_SIZE)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(u16);

impl EdgeId {
    /// AFL-style edge identity of the transition `previous -> current`.
    #[inline(always)]
    pub fn from_transition(current: u64, previous: u64) -> Self {
        Self(((current ^ previous) % MAP_SIZE as u64) as u16)
    }

    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

enum Backing {
    Local(Box<[u8]>),
    Shared {
        // the segment belongs to the controller: detach on drop, never destroy it
        shmem: ManuallyDrop<StdShMem>,
        // keeps the provider (and its server connection, if any) alive
        _provider: StdShMemProvider,
    },
}

/// Fixed-size 8-bit hit counters indexed by [`EdgeId`].
///
/// Writes are unsynchronized. In shared mode the caller guarantees that only
/// one instrumented process writes to a given map at a time. A shared map is
/// only ever detached, so it outlives every session that used it.
pub struct CoverageMap {
    backing: Backing,
}

impl core::fmt::Debug for CoverageMap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CoverageMap")
            .field("shared", &self.is_shared())
            .field("hit_edges", &self.hit_edges())
            .finish()
    }
}

impl Default for CoverageMap {
    fn default() -> Self {
        Self::local()
    }
}

impl CoverageMap {
    /// A private, zeroed histogram.
    pub fn local() -> Self {
        Self {
            backing: Backing::Local(vec![0; MAP_SIZE].into_boxed_slice()),
        }
    }

    /// Attach to an existing shared map identified by `id`. The map's contents
    /// are left as found.
    pub fn shared(id: &str) -> Result<Self, Error> {
        if id.is_empty() || id.len() >= 20 {
            return Err(Error::illegal_argument(format!(
                "invalid shared map id {id:?}"
            )));
        }
        let mut provider = StdShMemProvider::new()?;
        let shmem = provider.shmem_from_id_and_size(ShMemId::from_string(id), MAP_SIZE)?;
        Self::from_shmem(shmem, provider)
    }

    /// Attach to the shared map announced in [`SHM_ENV_VAR`], if there is one.
    pub fn shared_from_env() -> Result<Option<Self>, Error> {
        match std::env::var(SHM_ENV_VAR) {
            Ok(id) => Self::shared(id.trim()).map(Some),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(Error::illegal_argument(format!("{SHM_ENV_VAR}: {e}"))),
        }
    }

    /// Wrap a mapping that was already created or attached by `provider`.
    /// The map is detached, not removed, when it is dropped.
    pub fn from_shmem(shmem: StdShMem, provider: StdShMemProvider) -> Result<Self, Error> {
        if shmem.len() < MAP_SIZE {
            return Err(Error::illegal_argument(format!(
                "shared map holds {} bytes, need {MAP_SIZE}",
                shmem.len()
            )));
        }
        log::info!("attached shared coverage map {}", shmem.id());
        Ok(Self {
            backing: Backing::Shared {
                shmem: ManuallyDrop::new(shmem),
                _provider: provider,
            },
        })
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.backing, Backing::Shared { .. })
    }

    #[inline(always)]
    pub fn increment(&mut self, edge: EdgeId) {
        let slot = &mut self.as_mut_slice()[edge.index()];
        *slot = slot.wrapping_add(1);
    }

    pub fn get(&self, edge: EdgeId) -> u8 {
        self.as_slice()[edge.index()]
    }

    /// Zero every counter.
    pub fn reset(&mut self) {
        self.as_mut_slice().fill(0);
    }

    /// Number of edges with a non-zero counter.
    pub fn hit_edges(&self) -> usize {
        self.as_slice().iter().filter(|&&c| c != 0).count()
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.backing {
            Backing::Local(map) => &map[..],
            Backing::Shared { shmem, .. } => &shmem[..MAP_SIZE],
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.backing {
            Backing::Local(map) => &mut map[..],
            Backing::Shared { shmem, .. } => &mut shmem[..MAP_SIZE],
        }
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.as_mut_slice().as_mut_ptr()
    }
}

impl Drop for CoverageMap {
    fn drop(&mut self) {
        if let Backing::Shared { shmem, .. } = &mut self.backing {
            detach(shmem);
        }
    }
}

/// Unmap a System V segment without `IPC_RMID`.
#[cfg(all(unix, not(any(target_os = "android", target_vendor = "apple"))))]
fn detach(shmem: &mut StdShMem) {
    if unsafe { libc::shmdt(shmem.as_ptr().cast()) } != 0 {
        log::warn!(
            "detaching shared coverage map {} failed: {}",
            shmem.id(),
            std::io::Error::last_os_error()
        );
    }
}

// served and mmap-backed maps stay mapped until the process exits
#[cfg(not(all(unix, not(any(target_os = "android", target_vendor = "apple")))))]
fn detach(_shmem: &mut StdShMem) {}
