//! Per-stack render contexts.
//!
//! All tile layers of one stack draw into the same surface. The stack viewer
//! owns a [`RenderContextRegistry`] and hands each layer the shared context
//! of its stack when the layer is created.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use foundation::ids::StackId;

use crate::backend::{ContainerId, RenderBackend};

/// Ordered layer containers; index 0 is drawn first (bottom).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stage {
    children: Vec<ContainerId>,
}

impl Stage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn children(&self) -> &[ContainerId] {
        &self.children
    }

    pub fn index_of(&self, container: ContainerId) -> Option<usize> {
        self.children.iter().position(|c| *c == container)
    }

    /// Adds a container on top. Already present containers are left alone.
    pub fn add(&mut self, container: ContainerId) {
        if self.index_of(container).is_none() {
            self.children.push(container);
        }
    }

    pub fn remove(&mut self, container: ContainerId) -> bool {
        match self.index_of(container) {
            Some(i) => {
                self.children.remove(i);
                true
            }
            None => false,
        }
    }

    /// Moves `container` directly below `before`, or to the top when `before`
    /// is `None` or not on the stage.
    pub fn move_before(&mut self, container: ContainerId, before: Option<ContainerId>) {
        if !self.remove(container) {
            return;
        }
        match before.and_then(|b| self.index_of(b)) {
            Some(i) => self.children.insert(i, container),
            None => self.children.push(container),
        }
    }
}

/// A drawing surface plus the stage of layer containers drawn on it.
pub struct RenderContext {
    backend: Box<dyn RenderBackend>,
    stage: Stage,
    frames: u64,
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("stage", &self.stage)
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

impl RenderContext {
    pub fn new(backend: Box<dyn RenderBackend>) -> Self {
        Self {
            backend,
            stage: Stage::new(),
            frames: 0,
        }
    }

    pub fn backend(&self) -> &dyn RenderBackend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn RenderBackend {
        self.backend.as_mut()
    }

    /// The backend as its concrete type, if it is a `B`.
    pub fn backend_as<B: RenderBackend>(&self) -> Option<&B> {
        self.backend.as_any().downcast_ref::<B>()
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn stage_mut(&mut self) -> &mut Stage {
        &mut self.stage
    }

    /// Resizes the surface if the size changed. Returns `true` if it did.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if self.backend.surface_size() == (width, height) {
            return false;
        }
        self.backend.resize_surface(width, height);
        true
    }

    pub fn render(&mut self) {
        self.backend.render(self.stage.children());
        self.frames += 1;
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }
}

pub type SharedRenderContext = Rc<RefCell<RenderContext>>;

/// Render contexts keyed by stack.
#[derive(Debug, Default)]
pub struct RenderContextRegistry {
    contexts: BTreeMap<StackId, SharedRenderContext>,
}

impl RenderContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn get(&self, stack: StackId) -> Option<SharedRenderContext> {
        self.contexts.get(&stack).cloned()
    }

    /// Returns the context of `stack`, creating it with a backend from
    /// `make_backend` on first use.
    pub fn get_or_create(
        &mut self,
        stack: StackId,
        make_backend: impl FnOnce() -> Box<dyn RenderBackend>,
    ) -> SharedRenderContext {
        self.contexts
            .entry(stack)
            .or_insert_with(|| Rc::new(RefCell::new(RenderContext::new(make_backend()))))
            .clone()
    }

    /// Drops the registry's reference; layers still holding the context keep
    /// it alive until they are dropped.
    pub fn remove(&mut self, stack: StackId) -> Option<SharedRenderContext> {
        self.contexts.remove(&stack)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::{RenderContext, RenderContextRegistry, Stage};
    use crate::backend::{ContainerId, RecordingBackend, RenderBackend};
    use foundation::handles::Handle;
    use foundation::ids::StackId;

    fn id(i: u32) -> ContainerId {
        ContainerId(Handle::new(i, 0))
    }

    #[test]
    fn move_before_reorders_and_defaults_to_top() {
        let mut stage = Stage::new();
        for i in 0..3 {
            stage.add(id(i));
        }
        stage.move_before(id(2), Some(id(0)));
        assert_eq!(stage.children(), &[id(2), id(0), id(1)]);

        stage.move_before(id(2), None);
        assert_eq!(stage.children(), &[id(0), id(1), id(2)]);

        // Unknown anchor falls back to the top.
        stage.move_before(id(0), Some(id(9)));
        assert_eq!(stage.children(), &[id(1), id(2), id(0)]);
    }

    #[test]
    fn resize_only_when_size_changes() {
        let mut ctx = RenderContext::new(Box::new(RecordingBackend::new()));
        assert!(ctx.resize(800, 600));
        assert!(!ctx.resize(800, 600));
        assert!(ctx.resize(801, 600));
        assert_eq!(ctx.backend().surface_size(), (801, 600));
    }

    #[test]
    fn registry_shares_one_context_per_stack() {
        let mut registry = RenderContextRegistry::new();
        let a = registry.get_or_create(StackId(1), || Box::new(RecordingBackend::new()));
        let b = registry.get_or_create(StackId(1), || Box::new(RecordingBackend::new()));
        let c = registry.get_or_create(StackId(2), || Box::new(RecordingBackend::new()));

        assert!(Rc::ptr_eq(&a, &b));
        assert!(!Rc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);

        let container = a.borrow_mut().backend_mut().create_container();
        a.borrow_mut().stage_mut().add(container);
        a.borrow_mut().render();
        assert_eq!(b.borrow().frames_rendered(), 1);

        registry.remove(StackId(1));
        assert!(registry.get(StackId(1)).is_none());
        assert_eq!(a.borrow().stage().children(), &[container]);
    }
}
