//! Save and restore of the current GL context

use log::trace;
use rasterview_cache::TextureCache;

use super::GpuBackend;

/// Identifier of a GL context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u64);

/// Switching of the "current" context on the render thread
pub trait ContextSwitch {
    fn current_context(&self) -> Option<ContextId>;

    fn make_current(&mut self, context: Option<ContextId>);
}

/// Makes a context current for its lifetime
///
/// The context that was current when the guard was created is restored on
/// drop. Guards nest; they must be dropped in reverse order of creation,
/// which scoping gives for free.
pub struct ContextGuard<G: GpuBackend> {
    cache: TextureCache<G>,
    previous: Option<ContextId>,
}

impl<G: GpuBackend> ContextGuard<G> {
    pub fn new(cache: &TextureCache<G>, context: ContextId) -> Self {
        let previous = cache.with_backend(|gpu| {
            let previous = gpu.current_context();
            if previous != Some(context) {
                trace!("switching GL context {:?} -> {:?}", previous, context);
                gpu.make_current(Some(context));
            }
            previous
        });
        Self { cache: cache.clone(), previous }
    }

    /// The context that will be restored on drop
    pub fn previous(&self) -> Option<ContextId> {
        self.previous
    }
}

impl<G: GpuBackend> Drop for ContextGuard<G> {
    fn drop(&mut self) {
        let previous = self.previous;
        self.cache.with_backend(|gpu| {
            if gpu.current_context() != previous {
                gpu.make_current(previous);
            }
        });
    }
}
