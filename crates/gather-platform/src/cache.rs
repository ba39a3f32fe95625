use gather_core::ProjectId;

/// Invalidation seam for the read-mostly aggregate caches owned by the
/// surrounding web layer (progress percentages, top projects and the like).
/// The core never depends on a cache for correctness; it only signals when
/// cached aggregates for a project went stale.
pub trait ProjectCache: Send + Sync {
    fn invalidate(&self, project_id: &ProjectId);
}

/// Default when no cache layer is attached.
pub struct NoopCache;

impl ProjectCache for NoopCache {
    fn invalidate(&self, _project_id: &ProjectId) {}
}
