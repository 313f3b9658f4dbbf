//! The outlet collaborator: where activated routes get mounted.
//!
//! The router core never renders anything. It walks a tree of
//! [`OutletContext`]s (one per outlet name per level, each owning its own
//! child map) and calls into whatever [`RouterOutlet`] implementation the
//! embedding view layer registered. Detached subtrees travel through
//! opaque [`DetachedRouteHandle`]s; only the outlet implementation knows
//! what the component handle inside one really is.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::guards::TokenResolver;
use crate::state::ActivatedRoute;

/// Opaque handle to a mounted component, produced and consumed by the
/// outlet implementation.
pub type ComponentHandle = Rc<dyn Any>;

/// A named slot the view layer renders routed components into.
pub trait RouterOutlet {
    /// Mounts the component of `route` into this outlet. `resolver` is the
    /// token resolver in scope at this level (the loaded configuration's,
    /// below a lazy boundary).
    fn activate(&self, route: Rc<ActivatedRoute>, resolver: Option<Rc<dyn TokenResolver>>);

    /// Tears the mounted component down.
    fn deactivate(&self);

    /// Removes the mounted component without destroying it, returning a
    /// handle that [`RouterOutlet::attach`] accepts later.
    fn detach(&self) -> Option<ComponentHandle>;

    /// Restores a previously detached component.
    fn attach(&self, handle: ComponentHandle, route: Rc<ActivatedRoute>);

    /// True while a component is mounted.
    fn is_activated(&self) -> bool;
}

/// The contexts of one level's outlets, keyed by outlet name.
#[derive(Default)]
pub struct OutletContexts {
    contexts: RefCell<HashMap<String, Rc<OutletContext>>>,
}

impl OutletContexts {
    /// An empty context map.
    pub fn new() -> Rc<OutletContexts> {
        Rc::new(OutletContexts::default())
    }

    /// The context for `outlet`, created on first use.
    pub fn get_or_create_context(&self, outlet: &str) -> Rc<OutletContext> {
        let mut contexts = self.contexts.borrow_mut();
        contexts
            .entry(outlet.to_owned())
            .or_insert_with(|| Rc::new(OutletContext::new()))
            .clone()
    }

    /// The context for `outlet`, if one exists.
    pub fn get_context(&self, outlet: &str) -> Option<Rc<OutletContext>> {
        self.contexts.borrow().get(outlet).cloned()
    }

    /// Registers the view layer's outlet for a name. Called by the
    /// embedder when an outlet appears in the view.
    pub fn register_outlet(&self, outlet: &str, implementation: Rc<dyn RouterOutlet>) {
        let context = self.get_or_create_context(outlet);
        *context.outlet.borrow_mut() = Some(implementation);
    }

    /// Takes the whole context map, as part of detaching a subtree.
    pub(crate) fn take_all(&self) -> HashMap<String, Rc<OutletContext>> {
        std::mem::take(&mut *self.contexts.borrow_mut())
    }

    /// Restores a context map taken by [`OutletContexts::take_all`].
    pub(crate) fn restore(&self, contexts: HashMap<String, Rc<OutletContext>>) {
        *self.contexts.borrow_mut() = contexts;
    }
}

/// One outlet's slot in the context tree.
pub struct OutletContext {
    /// The registered view-layer outlet, if the view created one.
    pub(crate) outlet: RefCell<Option<Rc<dyn RouterOutlet>>>,
    /// The route currently assigned to this outlet.
    pub(crate) route: RefCell<Option<Rc<ActivatedRoute>>>,
    /// The token resolver in scope for this outlet's subtree.
    pub(crate) resolver: RefCell<Option<Rc<dyn TokenResolver>>>,
    /// Contexts of the outlets below this one.
    pub(crate) children: Rc<OutletContexts>,
}

impl OutletContext {
    fn new() -> OutletContext {
        OutletContext {
            outlet: RefCell::new(None),
            route: RefCell::new(None),
            resolver: RefCell::new(None),
            children: OutletContexts::new(),
        }
    }

    /// The registered view-layer outlet.
    pub fn outlet(&self) -> Option<Rc<dyn RouterOutlet>> {
        self.outlet.borrow().clone()
    }

    /// The contexts of child outlets.
    pub fn children(&self) -> Rc<OutletContexts> {
        self.children.clone()
    }
}

/// An opaque detached route subtree stored by a reuse strategy: the live
/// route, the component handle the outlet returned from `detach`, and the
/// child outlet contexts that were active below it.
#[derive(Clone)]
pub struct DetachedRouteHandle {
    pub(crate) component: Option<ComponentHandle>,
    pub(crate) route: Rc<ActivatedRoute>,
    pub(crate) contexts: HashMap<String, Rc<OutletContext>>,
}

impl DetachedRouteHandle {
    /// The detached route, exposed for strategies that inspect what they
    /// stored.
    pub fn route(&self) -> Rc<ActivatedRoute> {
        self.route.clone()
    }
}

impl fmt::Debug for DetachedRouteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetachedRouteHandle")
            .field("outlet", &self.route.outlet())
            .finish()
    }
}

/// A [`RouterOutlet`] that records every operation into a shared log, for
/// exercising the activation walk in tests.
pub struct RecordingOutlet {
    label: String,
    log: Rc<RefCell<Vec<String>>>,
    active: RefCell<Option<Rc<ActivatedRoute>>>,
}

impl RecordingOutlet {
    /// An outlet writing into `log`, tagged with `label`.
    pub fn new(label: impl Into<String>, log: Rc<RefCell<Vec<String>>>) -> Rc<RecordingOutlet> {
        Rc::new(RecordingOutlet {
            label: label.into(),
            log,
            active: RefCell::new(None),
        })
    }

    fn record(&self, op: &str, route: Option<&Rc<ActivatedRoute>>) {
        let component = route
            .and_then(|r| r.component())
            .map(|c| c.0.to_owned())
            .unwrap_or_default();
        self.log
            .borrow_mut()
            .push(format!("{}:{op}:{component}", self.label));
    }
}

impl RouterOutlet for RecordingOutlet {
    fn activate(&self, route: Rc<ActivatedRoute>, _resolver: Option<Rc<dyn TokenResolver>>) {
        self.record("activate", Some(&route));
        *self.active.borrow_mut() = Some(route);
    }

    fn deactivate(&self) {
        let route = self.active.borrow_mut().take();
        self.record("deactivate", route.as_ref());
    }

    fn detach(&self) -> Option<ComponentHandle> {
        let route = self.active.borrow_mut().take();
        self.record("detach", route.as_ref());
        route.map(|r| Rc::new(r) as ComponentHandle)
    }

    fn attach(&self, _handle: ComponentHandle, route: Rc<ActivatedRoute>) {
        self.record("attach", Some(&route));
        *self.active.borrow_mut() = Some(route);
    }

    fn is_activated(&self) -> bool {
        self.active.borrow().is_some()
    }
}
