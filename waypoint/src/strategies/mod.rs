//! Pluggable policies: route reuse across navigations and URL handling.

use std::rc::Rc;

use crate::config::same_config;
use crate::outlet::DetachedRouteHandle;
use crate::state::ActivatedRouteSnapshot;
use crate::url::UrlTree;

/// Decides whether route subtrees are reused, detached for later, or
/// rebuilt when the router state is reconciled.
pub trait RouteReuseStrategy {
    /// Whether the subtree rooted at `route` should be detached and stored
    /// instead of destroyed.
    fn should_detach(&self, route: &Rc<ActivatedRouteSnapshot>) -> bool;

    /// Stores a detached subtree (or clears the slot with `None`).
    fn store(&self, route: &Rc<ActivatedRouteSnapshot>, handle: Option<DetachedRouteHandle>);

    /// Whether a stored subtree should be reattached for `route`.
    fn should_attach(&self, route: &Rc<ActivatedRouteSnapshot>) -> bool;

    /// The stored subtree for `route`, if any.
    fn retrieve(&self, route: &Rc<ActivatedRouteSnapshot>) -> Option<DetachedRouteHandle>;

    /// Whether the live route of `curr` is reused as-is for `future`.
    fn should_reuse_route(
        &self,
        future: &Rc<ActivatedRouteSnapshot>,
        curr: &Rc<ActivatedRouteSnapshot>,
    ) -> bool;
}

/// The default policy: reuse a route exactly when the future and current
/// snapshots matched the same configuration node; never detach.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultRouteReuseStrategy;

impl RouteReuseStrategy for DefaultRouteReuseStrategy {
    fn should_detach(&self, _route: &Rc<ActivatedRouteSnapshot>) -> bool {
        false
    }

    fn store(&self, _route: &Rc<ActivatedRouteSnapshot>, _handle: Option<DetachedRouteHandle>) {}

    fn should_attach(&self, _route: &Rc<ActivatedRouteSnapshot>) -> bool {
        false
    }

    fn retrieve(&self, _route: &Rc<ActivatedRouteSnapshot>) -> Option<DetachedRouteHandle> {
        None
    }

    fn should_reuse_route(
        &self,
        future: &Rc<ActivatedRouteSnapshot>,
        curr: &Rc<ActivatedRouteSnapshot>,
    ) -> bool {
        same_config(future.route_config().as_ref(), curr.route_config().as_ref())
    }
}

/// Decides which part of a URL the router owns.
///
/// Embedders migrating an application piecemeal can process only a
/// sub-tree of each URL and leave the rest to other code.
pub trait UrlHandlingStrategy {
    /// Whether the router should process this URL at all.
    fn should_process_url(&self, url: &UrlTree) -> bool;

    /// The routable part of the URL.
    fn extract(&self, url: &UrlTree) -> UrlTree;

    /// Folds the processed part back into the raw URL for display.
    fn merge(&self, new_url_part: &UrlTree, raw_url: &UrlTree) -> UrlTree;
}

/// Processes every URL in full.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultUrlHandlingStrategy;

impl UrlHandlingStrategy for DefaultUrlHandlingStrategy {
    fn should_process_url(&self, _url: &UrlTree) -> bool {
        true
    }

    fn extract(&self, url: &UrlTree) -> UrlTree {
        url.clone()
    }

    fn merge(&self, new_url_part: &UrlTree, _raw_url: &UrlTree) -> UrlTree {
        new_url_part.clone()
    }
}
