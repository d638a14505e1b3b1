//! Segment lifecycle management
//!
//! [`ShmContext`] is the process-scoped owner of the segment registry and
//! the create/attach/close/unlink state machine. Lifecycle mutation
//! (`close`, `unlink`, `cleanup_all`) takes `&mut self` while views take
//! `&self`, so a mapping cannot be released while a view into it is live.
//! State sits behind an `Arc<Mutex<..>>` only so the process-exit hooks
//! can sweep it; the API itself is synchronous and single-threaded in
//! spirit.

use crate::error::{Result, ShmError};
use crate::handle::ArrayHandle;
use crate::hooks;
use crate::layout::ElementLayout;
use crate::name::generate_name;
use crate::registry::{LocalEntry, SegmentRegistry};
use crate::segment::{self, Segment};
use crate::view::ShmArray;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard};

/// Attempts before giving up on finding a free name
const CREATE_ATTEMPTS: usize = 8;

pub(crate) struct ContextInner {
    registry: SegmentRegistry,
}

impl ContextInner {
    /// Best-effort sweep: close every foreign mapping, then close and
    /// unlink every local segment. "Already gone" is ignored; any other
    /// failure is reported and the sweep continues. Idempotent: a second
    /// call finds empty tables.
    pub(crate) fn cleanup(&mut self) -> usize {
        let mut failures = 0usize;

        for (name, seg) in self.registry.drain_foreign() {
            if let Err(e) = seg.close() {
                tracing::warn!(segment = %name, error = %e, "failed to close attached segment during cleanup");
                failures += 1;
            }
        }

        for (name, entry) in self.registry.drain_local() {
            if let LocalEntry::Mapped(seg) = entry {
                if let Err(e) = seg.close() {
                    tracing::warn!(segment = %name, error = %e, "failed to close owned segment during cleanup");
                    failures += 1;
                }
            }
            match segment::unlink(&name) {
                Ok(()) | Err(ShmError::NotFound { .. }) => {}
                Err(e) => {
                    tracing::warn!(segment = %name, error = %e, "failed to unlink owned segment during cleanup");
                    failures += 1;
                }
            }
        }

        failures
    }
}

/// Process-scoped shared memory context.
///
/// Create one per process (or per independent subsystem); segments created
/// through it are destroyed by it: on [`close`](Self::close)/
/// [`unlink`](Self::unlink), on [`cleanup_all`](Self::cleanup_all), on
/// drop, at process exit, or on a termination signal, whichever comes
/// first. Segments merely attached are only ever closed, never unlinked.
pub struct ShmContext {
    inner: Arc<Mutex<ContextInner>>,
}

impl ShmContext {
    pub fn new() -> Self {
        let inner = Arc::new(Mutex::new(ContextInner {
            registry: SegmentRegistry::new(),
        }));
        hooks::register_context(&inner);
        Self { inner }
    }

    pub(crate) fn inner_handle(&self) -> &Arc<Mutex<ContextInner>> {
        &self.inner
    }

    fn lock(&self) -> MutexGuard<'_, ContextInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Create a new segment of `size` bytes and register it as owned by
    /// this process. Returns the generated name.
    ///
    /// On an OS-level name collision the existing segment is reclaimed
    /// (closed and unlinked, ignoring "already gone") and creation retries
    /// under a fresh name. A collision almost always means a leftover from
    /// a crashed prior run; if it is instead a live segment from a
    /// concurrently running process, the reclaim loses that process's
    /// data. The reclaim is logged for that reason.
    pub fn create_segment(&self, size: usize) -> Result<String> {
        if size == 0 {
            return Err(ShmError::InvalidSize { got: size });
        }

        let mut inner = self.lock();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let name = generate_name();
            if inner.registry.contains(&name) {
                // Collision with our own bookkeeping: just draw again.
                if attempts >= CREATE_ATTEMPTS {
                    return Err(ShmError::DuplicateName { name });
                }
                continue;
            }
            match Segment::create(&name, size) {
                Ok(seg) => {
                    inner.registry.register_local(seg)?;
                    tracing::debug!(segment = %name, size, "created shared memory segment");
                    return Ok(name);
                }
                Err(ShmError::NameExists { .. }) if attempts < CREATE_ATTEMPTS => {
                    tracing::warn!(
                        segment = %name,
                        "segment name collision; reclaiming the existing segment and retrying under a fresh name"
                    );
                    reclaim_stale(&name);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Attach to an existing segment by name, registering it as foreign
    /// (unless this process created it). Returns the segment size.
    pub fn attach_segment(&self, name: &str) -> Result<usize> {
        let mut inner = self.lock();
        let seg = inner.registry.lookup(name)?;
        Ok(seg.size())
    }

    /// Bind a typed view over the segment a handle names, attaching first
    /// if this process has no mapping yet.
    pub fn view(&self, handle: &ArrayHandle) -> Result<ShmArray<'_>> {
        let mut inner = self.lock();
        let seg = inner.registry.lookup(&handle.name)?;
        let needed = handle.byte_len();
        if seg.size() < needed {
            return Err(ShmError::ViewGeometry {
                name: handle.name.clone(),
                size: seg.size(),
                needed,
            });
        }
        let ptr = NonNull::new(seg.as_ptr()).expect("mapped segment pointer is never null");
        Ok(ShmArray::bind(handle.clone(), ptr))
    }

    /// Create a segment sized for `element_count` elements of `layout`
    /// and bind a view over it in one step.
    pub fn create_array(
        &self,
        element_count: usize,
        layout: ElementLayout,
    ) -> Result<ShmArray<'_>> {
        if element_count == 0 {
            return Err(ShmError::InvalidSize { got: element_count });
        }
        let size = element_count.saturating_mul(layout.stride());
        let name = self.create_segment(size)?;
        let handle = ArrayHandle::new(name, element_count, layout);
        self.view(&handle)
    }

    /// Release this process's mapping of the named segment.
    ///
    /// For a foreign segment this ends the relationship entirely; for an
    /// owned segment the unlink obligation remains until
    /// [`unlink`](Self::unlink) (or cleanup) runs. Closing an
    /// already-closed owned segment is a no-op.
    pub fn close(&mut self, name: &str) -> Result<()> {
        let mut inner = self.lock();
        if let Some(seg) = inner.registry.take_local_mapping(name) {
            return seg.close();
        }
        if let Some(LocalEntry::Closed) = inner.registry.local_state(name) {
            return Ok(());
        }
        match inner.registry.remove_foreign(name) {
            Some(seg) => seg.close(),
            None => Err(ShmError::NotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Destroy the named segment. Legal only for a segment this process
    /// created, and only after its mapping has been closed.
    pub fn unlink(&mut self, name: &str) -> Result<()> {
        let mut inner = self.lock();
        match inner.registry.local_state(name) {
            Some(LocalEntry::Mapped(_)) => Err(ShmError::MappingStillOpen {
                name: name.to_string(),
            }),
            Some(LocalEntry::Closed) => {
                inner.registry.remove_local(name);
                segment::unlink(name)
            }
            None => {
                if inner.registry.contains(name) {
                    Err(ShmError::NotOwner {
                        name: name.to_string(),
                    })
                } else {
                    Err(ShmError::NotFound {
                        name: name.to_string(),
                    })
                }
            }
        }
    }

    /// Run the best-effort cleanup sweep now. Returns the number of
    /// failures that were reported rather than raised.
    pub fn cleanup_all(&mut self) -> usize {
        let mut inner = self.lock();
        inner.cleanup()
    }

    /// True if this process created the named segment.
    pub fn owns(&self, name: &str) -> bool {
        self.lock().registry.is_local(name)
    }

    /// True if the context currently tracks no segments.
    pub fn is_empty(&self) -> bool {
        self.lock().registry.is_empty()
    }
}

impl Default for ShmContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ShmContext {
    fn drop(&mut self) {
        self.cleanup_all();
    }
}

/// Close and unlink a segment left over under a colliding name, ignoring
/// "already gone" at every step.
fn reclaim_stale(name: &str) {
    match Segment::open(name) {
        Ok(seg) => {
            if let Err(e) = seg.close() {
                tracing::warn!(segment = %name, error = %e, "failed to close stale segment");
            }
        }
        Err(ShmError::NotFound { .. }) => {}
        Err(e) => {
            tracing::warn!(segment = %name, error = %e, "failed to open stale segment");
        }
    }
    match segment::unlink(name) {
        Ok(()) | Err(ShmError::NotFound { .. }) => {}
        Err(e) => {
            tracing::warn!(segment = %name, error = %e, "failed to unlink stale segment");
        }
    }
}
