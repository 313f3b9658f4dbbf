//! Lifecycle events emitted by the navigation scheduler.
//!
//! Every navigation emits exactly one `NavigationStart` and exactly one of
//! `NavigationEnd`, `NavigationCancel` or `NavigationError`. The phase
//! events in between fire in pipeline order; activation events fire during
//! the guard phase (`*Start`) and the commit walk (`*End`).

use std::rc::Rc;

use crate::error::RouterError;
use crate::state::{ActivatedRouteSnapshot, RouterStateSnapshot};

/// What triggered a navigation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NavigationSource {
    /// An explicit `navigate`/`navigate_by_url` call.
    Imperative,
    /// A browser history movement reported by the location adapter.
    Popstate,
    /// A hash change reported by the location adapter.
    Hashchange,
}

/// A router lifecycle event.
#[derive(Clone, Debug)]
pub enum Event {
    /// A navigation has been accepted by the scheduler.
    NavigationStart {
        /// Navigation id, monotonically increasing.
        id: u64,
        /// The raw requested URL.
        url: String,
    },
    /// A lazy configuration load began.
    RouteConfigLoadStart {
        /// Navigation id.
        id: u64,
        /// The `path` of the route being loaded.
        route_path: String,
    },
    /// A lazy configuration load finished.
    RouteConfigLoadEnd {
        /// Navigation id.
        id: u64,
        /// The `path` of the loaded route.
        route_path: String,
    },
    /// Redirects were applied and the URL recognized into a snapshot.
    RoutesRecognized {
        /// Navigation id.
        id: u64,
        /// The raw requested URL.
        url: String,
        /// The URL after redirect expansion.
        url_after_redirects: String,
        /// The recognized target state.
        state: RouterStateSnapshot,
    },
    /// The guard phase is starting.
    GuardsCheckStart {
        /// Navigation id.
        id: u64,
        /// The raw requested URL.
        url: String,
        /// The URL after redirect expansion.
        url_after_redirects: String,
        /// The target state the guards run against.
        state: RouterStateSnapshot,
    },
    /// A node's children are about to be activated.
    ChildActivationStart {
        /// The snapshot whose children activate.
        snapshot: Rc<ActivatedRouteSnapshot>,
    },
    /// A node's children finished activating.
    ChildActivationEnd {
        /// The snapshot whose children activated.
        snapshot: Rc<ActivatedRouteSnapshot>,
    },
    /// A route is about to be activated.
    ActivationStart {
        /// The snapshot being activated.
        snapshot: Rc<ActivatedRouteSnapshot>,
    },
    /// A route finished activating.
    ActivationEnd {
        /// The activated snapshot.
        snapshot: Rc<ActivatedRouteSnapshot>,
    },
    /// The guard phase finished.
    GuardsCheckEnd {
        /// Navigation id.
        id: u64,
        /// The raw requested URL.
        url: String,
        /// The URL after redirect expansion.
        url_after_redirects: String,
        /// The target state the guards ran against.
        state: RouterStateSnapshot,
        /// Whether every guard allowed the navigation.
        should_activate: bool,
    },
    /// The resolve phase is starting.
    ResolveStart {
        /// Navigation id.
        id: u64,
        /// The raw requested URL.
        url: String,
        /// The URL after redirect expansion.
        url_after_redirects: String,
        /// The target state being resolved.
        state: RouterStateSnapshot,
    },
    /// The resolve phase finished.
    ResolveEnd {
        /// Navigation id.
        id: u64,
        /// The raw requested URL.
        url: String,
        /// The URL after redirect expansion.
        url_after_redirects: String,
        /// The resolved target state.
        state: RouterStateSnapshot,
    },
    /// The navigation committed.
    NavigationEnd {
        /// Navigation id.
        id: u64,
        /// The raw requested URL.
        url: String,
        /// The URL the router ended at, after redirects.
        url_after_redirects: String,
    },
    /// The navigation was abandoned without error.
    NavigationCancel {
        /// Navigation id.
        id: u64,
        /// The raw requested URL.
        url: String,
        /// Why the navigation was abandoned.
        reason: String,
    },
    /// The navigation failed.
    NavigationError {
        /// Navigation id.
        id: u64,
        /// The raw requested URL.
        url: String,
        /// The failure.
        error: RouterError,
    },
}

impl Event {
    /// The navigation id carried by the event, when it has one.
    pub fn id(&self) -> Option<u64> {
        match self {
            Event::NavigationStart { id, .. }
            | Event::RouteConfigLoadStart { id, .. }
            | Event::RouteConfigLoadEnd { id, .. }
            | Event::RoutesRecognized { id, .. }
            | Event::GuardsCheckStart { id, .. }
            | Event::GuardsCheckEnd { id, .. }
            | Event::ResolveStart { id, .. }
            | Event::ResolveEnd { id, .. }
            | Event::NavigationEnd { id, .. }
            | Event::NavigationCancel { id, .. }
            | Event::NavigationError { id, .. } => Some(*id),
            Event::ChildActivationStart { .. }
            | Event::ChildActivationEnd { .. }
            | Event::ActivationStart { .. }
            | Event::ActivationEnd { .. } => None,
        }
    }

    /// Short name of the event kind, used by tracing output.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::NavigationStart { .. } => "NavigationStart",
            Event::RouteConfigLoadStart { .. } => "RouteConfigLoadStart",
            Event::RouteConfigLoadEnd { .. } => "RouteConfigLoadEnd",
            Event::RoutesRecognized { .. } => "RoutesRecognized",
            Event::GuardsCheckStart { .. } => "GuardsCheckStart",
            Event::ChildActivationStart { .. } => "ChildActivationStart",
            Event::ChildActivationEnd { .. } => "ChildActivationEnd",
            Event::ActivationStart { .. } => "ActivationStart",
            Event::ActivationEnd { .. } => "ActivationEnd",
            Event::GuardsCheckEnd { .. } => "GuardsCheckEnd",
            Event::ResolveStart { .. } => "ResolveStart",
            Event::ResolveEnd { .. } => "ResolveEnd",
            Event::NavigationEnd { .. } => "NavigationEnd",
            Event::NavigationCancel { .. } => "NavigationCancel",
            Event::NavigationError { .. } => "NavigationError",
        }
    }
}
