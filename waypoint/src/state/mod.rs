//! Activated route state: frozen per-navigation snapshots and their live,
//! stream-carrying counterparts.
//!
//! Snapshots form a tree mirroring the matched URL. Ownership always runs
//! root-to-leaf; parents are weak back-references wired while the tree is
//! assembled, and the traversal helpers (`parent`, `first_child`,
//! `path_from_root`) are the supported way to move around.

pub(crate) mod builder;
pub mod watch;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use linked_hash_map::LinkedHashMap;

use crate::config::{ComponentId, DataMap, Route};
use crate::guards::TokenResolver;
use crate::state::watch::Watch;
use crate::url::{
    equal_segments, ParamMap, Params, QueryParams, UrlSegment, UrlSegmentGroup, UrlTree,
    PRIMARY_OUTLET,
};

/// How matched parameters and data propagate to descendants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ParamsInheritance {
    /// Inherit only across empty-path or componentless ancestors.
    #[default]
    EmptyOnly,
    /// Inherit from every ancestor unconditionally.
    Always,
}

/// The frozen record of one matched route within a navigation.
pub struct ActivatedRouteSnapshot {
    url: Vec<UrlSegment>,
    params: RefCell<Params>,
    query_params: QueryParams,
    fragment: Option<String>,
    data: RefCell<DataMap>,
    outlet: String,
    component: Option<ComponentId>,
    route_config: Option<Rc<Route>>,
    resolve: LinkedHashMap<String, String>,
    title: RefCell<Option<String>>,
    pub(crate) resolved_data: RefCell<DataMap>,
    pub(crate) source_group: RefCell<Option<Rc<UrlSegmentGroup>>>,
    pub(crate) last_path_index: Cell<isize>,
    pub(crate) scoped_resolver: RefCell<Option<Rc<dyn TokenResolver>>>,
    parent: RefCell<Weak<ActivatedRouteSnapshot>>,
    children: RefCell<Vec<Rc<ActivatedRouteSnapshot>>>,
}

impl ActivatedRouteSnapshot {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        url: Vec<UrlSegment>,
        params: Params,
        query_params: QueryParams,
        fragment: Option<String>,
        data: DataMap,
        outlet: String,
        component: Option<ComponentId>,
        route_config: Option<Rc<Route>>,
        source_group: Rc<UrlSegmentGroup>,
        last_path_index: isize,
        resolve: LinkedHashMap<String, String>,
    ) -> Rc<ActivatedRouteSnapshot> {
        Rc::new(ActivatedRouteSnapshot {
            url,
            params: RefCell::new(params),
            query_params,
            fragment,
            data: RefCell::new(data),
            outlet,
            component,
            route_config,
            resolve,
            title: RefCell::new(None),
            resolved_data: RefCell::new(DataMap::new()),
            source_group: RefCell::new(Some(source_group)),
            last_path_index: Cell::new(last_path_index),
            scoped_resolver: RefCell::new(None),
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
        })
    }

    /// The URL segments this route consumed.
    pub fn url(&self) -> Vec<UrlSegment> {
        self.url.clone()
    }

    pub(crate) fn url_ref(&self) -> &[UrlSegment] {
        &self.url
    }

    /// The merged parameters: positional matches, matrix parameters of the
    /// last consumed segment, and anything inherited from ancestors.
    pub fn params(&self) -> Params {
        self.params.borrow().clone()
    }

    /// Read-only view over [`params`](Self::params).
    pub fn param_map(&self) -> ParamMap {
        ParamMap::from_params(&self.params.borrow())
    }

    /// The navigation-wide query parameters.
    pub fn query_params(&self) -> &QueryParams {
        &self.query_params
    }

    /// Read-only view over the query parameters.
    pub fn query_param_map(&self) -> ParamMap {
        ParamMap::from_query_params(&self.query_params)
    }

    /// The navigation-wide fragment.
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// Static route data merged with inherited and resolved data.
    pub fn data(&self) -> DataMap {
        self.data.borrow().clone()
    }

    /// The outlet this route fills.
    pub fn outlet(&self) -> &str {
        &self.outlet
    }

    /// The component this route mounts, if any.
    pub fn component(&self) -> Option<ComponentId> {
        self.component
    }

    /// The configuration node that matched. `None` only on the root.
    pub fn route_config(&self) -> Option<Rc<Route>> {
        self.route_config.clone()
    }

    /// The resolved title, if the route declares one.
    pub fn title(&self) -> Option<String> {
        self.title.borrow().clone()
    }

    pub(crate) fn set_title(&self, title: Option<String>) {
        *self.title.borrow_mut() = title;
    }

    pub(crate) fn resolve_map(&self) -> &LinkedHashMap<String, String> {
        &self.resolve
    }

    pub(crate) fn set_params(&self, params: Params) {
        *self.params.borrow_mut() = params;
    }

    pub(crate) fn set_data(&self, data: DataMap) {
        *self.data.borrow_mut() = data;
    }

    /// The parent snapshot, if this is not the root.
    pub fn parent(&self) -> Option<Rc<ActivatedRouteSnapshot>> {
        self.parent.borrow().upgrade()
    }

    /// The child snapshots, primary outlet first.
    pub fn children(&self) -> Vec<Rc<ActivatedRouteSnapshot>> {
        self.children.borrow().clone()
    }

    /// The first child snapshot, if any.
    pub fn first_child(&self) -> Option<Rc<ActivatedRouteSnapshot>> {
        self.children.borrow().first().cloned()
    }

    /// The snapshots from the root down to this one, inclusive.
    pub fn path_from_root(self: &Rc<Self>) -> Vec<Rc<ActivatedRouteSnapshot>> {
        let mut path = vec![self.clone()];
        let mut current = self.parent();
        while let Some(node) = current {
            current = node.parent();
            path.push(node);
        }
        path.reverse();
        path
    }

    /// The root of the snapshot tree this node belongs to.
    pub fn root(self: &Rc<Self>) -> Rc<ActivatedRouteSnapshot> {
        self.path_from_root()
            .into_iter()
            .next()
            .expect("path_from_root always contains self")
    }

    pub(crate) fn attach_children(
        parent: &Rc<ActivatedRouteSnapshot>,
        children: Vec<Rc<ActivatedRouteSnapshot>>,
    ) {
        for child in &children {
            *child.parent.borrow_mut() = Rc::downgrade(parent);
        }
        *parent.children.borrow_mut() = children;
    }
}

impl fmt::Debug for ActivatedRouteSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivatedRouteSnapshot")
            .field("url", &self.url)
            .field("outlet", &self.outlet)
            .field("params", &self.params.borrow())
            .field("component", &self.component)
            .field("children", &self.children.borrow().len())
            .finish()
    }
}

/// An immutable tree of snapshots: the state of the router at one moment.
#[derive(Clone)]
pub struct RouterStateSnapshot {
    url: String,
    root: Rc<ActivatedRouteSnapshot>,
}

impl RouterStateSnapshot {
    pub(crate) fn new(url: String, root: Rc<ActivatedRouteSnapshot>) -> RouterStateSnapshot {
        RouterStateSnapshot { url, root }
    }

    /// The serialized URL this state was recognized from.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The root snapshot.
    pub fn root(&self) -> Rc<ActivatedRouteSnapshot> {
        self.root.clone()
    }
}

impl fmt::Debug for RouterStateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouterStateSnapshot(url: {:?})", self.url)
    }
}

/// The live counterpart of a snapshot: the same shape, but each field is a
/// current-value stream that the scheduler pushes into as navigations
/// commit.
pub struct ActivatedRoute {
    /// Consumed URL segments over time.
    pub url: Watch<Vec<UrlSegment>>,
    /// Merged parameters over time.
    pub params: Watch<Params>,
    /// Query parameters over time.
    pub query_params: Watch<QueryParams>,
    /// Fragment over time.
    pub fragment: Watch<Option<String>>,
    /// Merged data over time.
    pub data: Watch<DataMap>,
    outlet: String,
    component: Option<ComponentId>,
    snapshot: RefCell<Option<Rc<ActivatedRouteSnapshot>>>,
    pub(crate) future_snapshot: RefCell<Rc<ActivatedRouteSnapshot>>,
    parent: RefCell<Weak<ActivatedRoute>>,
    children: RefCell<Vec<Rc<ActivatedRoute>>>,
}

impl ActivatedRoute {
    pub(crate) fn from_snapshot(snapshot: &Rc<ActivatedRouteSnapshot>) -> Rc<ActivatedRoute> {
        Rc::new(ActivatedRoute {
            url: Watch::new(snapshot.url()),
            params: Watch::new(snapshot.params()),
            query_params: Watch::new(snapshot.query_params().clone()),
            fragment: Watch::new(snapshot.fragment().map(str::to_owned)),
            data: Watch::new(snapshot.data()),
            outlet: snapshot.outlet().to_owned(),
            component: snapshot.component(),
            snapshot: RefCell::new(None),
            future_snapshot: RefCell::new(snapshot.clone()),
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
        })
    }

    /// The current snapshot (the future one until the first commit).
    pub fn snapshot(&self) -> Rc<ActivatedRouteSnapshot> {
        self.snapshot
            .borrow()
            .clone()
            .unwrap_or_else(|| self.future_snapshot.borrow().clone())
    }

    /// The outlet this route fills.
    pub fn outlet(&self) -> &str {
        &self.outlet
    }

    /// The component this route mounts, if any.
    pub fn component(&self) -> Option<ComponentId> {
        self.component
    }

    /// The configuration node that matched.
    pub fn route_config(&self) -> Option<Rc<Route>> {
        self.snapshot().route_config()
    }

    /// The parent route, if this is not the root.
    pub fn parent(&self) -> Option<Rc<ActivatedRoute>> {
        self.parent.borrow().upgrade()
    }

    /// The child routes, primary outlet first.
    pub fn children(&self) -> Vec<Rc<ActivatedRoute>> {
        self.children.borrow().clone()
    }

    /// The first child route, if any.
    pub fn first_child(&self) -> Option<Rc<ActivatedRoute>> {
        self.children.borrow().first().cloned()
    }

    pub(crate) fn attach_children(parent: &Rc<ActivatedRoute>, children: Vec<Rc<ActivatedRoute>>) {
        for child in &children {
            *child.parent.borrow_mut() = Rc::downgrade(parent);
        }
        *parent.children.borrow_mut() = children;
    }
}

impl fmt::Debug for ActivatedRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivatedRoute")
            .field("outlet", &self.outlet)
            .field("component", &self.component)
            .field("url", &self.url)
            .finish()
    }
}

/// The live router state: a tree of [`ActivatedRoute`]s plus the snapshot
/// it was last advanced to.
#[derive(Clone)]
pub struct RouterState {
    root: Rc<ActivatedRoute>,
    snapshot: RouterStateSnapshot,
}

impl RouterState {
    pub(crate) fn new(root: Rc<ActivatedRoute>, snapshot: RouterStateSnapshot) -> RouterState {
        RouterState { root, snapshot }
    }

    /// The root activated route.
    pub fn root(&self) -> Rc<ActivatedRoute> {
        self.root.clone()
    }

    /// The snapshot backing this state.
    pub fn snapshot(&self) -> &RouterStateSnapshot {
        &self.snapshot
    }
}

impl fmt::Debug for RouterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouterState(url: {:?})", self.snapshot.url())
    }
}

/// The state representing the bare root URL before any navigation.
pub(crate) fn create_empty_state(
    url_tree: &UrlTree,
    root_component: Option<ComponentId>,
) -> RouterState {
    let snapshot = create_empty_state_snapshot(url_tree, root_component);
    let root = ActivatedRoute::from_snapshot(&snapshot.root());
    advance_activated_route(&root);
    RouterState::new(root, snapshot)
}

pub(crate) fn create_empty_state_snapshot(
    url_tree: &UrlTree,
    root_component: Option<ComponentId>,
) -> RouterStateSnapshot {
    let root = ActivatedRouteSnapshot::new(
        Vec::new(),
        Params::new(),
        QueryParams::new(),
        None,
        DataMap::new(),
        PRIMARY_OUTLET.to_owned(),
        root_component,
        None,
        url_tree.root.clone(),
        -1,
        LinkedHashMap::new(),
    );
    RouterStateSnapshot::new("/".to_owned(), root)
}

/// Moves a live route forward to its future snapshot, pushing into exactly
/// the streams whose values changed.
pub(crate) fn advance_activated_route(route: &Rc<ActivatedRoute>) {
    let next = route.future_snapshot.borrow().clone();
    let previous = route.snapshot.borrow().clone();
    *route.snapshot.borrow_mut() = Some(next.clone());

    match previous {
        Some(previous) => {
            if previous.query_params() != next.query_params() {
                route.query_params.set(next.query_params().clone());
            }
            if previous.fragment() != next.fragment() {
                route.fragment.set(next.fragment().map(str::to_owned));
            }
            if previous.params() != next.params() {
                route.params.set(next.params());
            }
            if !equal_segments(previous.url_ref(), next.url_ref()) {
                route.url.set(next.url());
            }
            if previous.data() != next.data() {
                route.data.set(next.data());
            }
        }
        None => {
            route.data.set(next.data());
        }
    }
}

/// What a node inherits from its ancestors: parameters, static data and
/// resolved data.
pub(crate) struct Inherited {
    pub(crate) params: Params,
    pub(crate) data: DataMap,
    pub(crate) resolve: DataMap,
}

/// Collects the values a snapshot inherits, walking its `path_from_root`.
///
/// In `EmptyOnly` mode the walk only crosses empty-path routes and
/// componentless parents; in `Always` mode the whole path contributes.
pub(crate) fn inherited_params_data_resolve(
    route: &Rc<ActivatedRouteSnapshot>,
    strategy: ParamsInheritance,
) -> Inherited {
    let path = route.path_from_root();
    let mut start = 0;
    if strategy != ParamsInheritance::Always {
        start = path.len() - 1;
        while start >= 1 {
            let current = &path[start];
            let parent = &path[start - 1];
            let current_is_empty_path = current
                .route_config()
                .map(|c| c.path.as_deref() == Some(""))
                .unwrap_or(false);
            if current_is_empty_path {
                start -= 1;
            } else if parent.component().is_none() {
                start -= 1;
            } else {
                break;
            }
        }
    }

    let mut inherited = Inherited {
        params: Params::new(),
        data: DataMap::new(),
        resolve: DataMap::new(),
    };
    for node in &path[start..] {
        for (k, v) in node.params.borrow().iter() {
            inherited.params.insert(k.clone(), v.clone());
        }
        for (k, v) in node.data.borrow().iter() {
            inherited.data.insert(k.clone(), v.clone());
        }
        for (k, v) in node.resolved_data.borrow().iter() {
            inherited.resolve.insert(k.clone(), v.clone());
        }
    }
    inherited
}

/// The post-recognition pass that folds inherited parameters and data into
/// every node, root first.
pub(crate) fn inherit_params_and_data(
    node: &Rc<ActivatedRouteSnapshot>,
    strategy: ParamsInheritance,
) {
    let inherited = inherited_params_data_resolve(node, strategy);
    node.set_params(inherited.params);
    node.set_data(inherited.data);
    for child in node.children() {
        inherit_params_and_data(&child, strategy);
    }
}

/// Structural equality of two snapshots by parameters and consumed URL,
/// required along the whole parent chain.
pub(crate) fn equal_params_and_url_segments(
    a: &Rc<ActivatedRouteSnapshot>,
    b: &Rc<ActivatedRouteSnapshot>,
) -> bool {
    if a.params() != b.params() || !equal_segments(a.url_ref(), b.url_ref()) {
        return false;
    }
    match (a.parent(), b.parent()) {
        (None, None) => true,
        (Some(pa), Some(pb)) => equal_params_and_url_segments(&pa, &pb),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(
        path: &str,
        params: &[(&str, &str)],
        component: Option<&'static str>,
        config: Option<Rc<Route>>,
    ) -> Rc<ActivatedRouteSnapshot> {
        let mut p = Params::new();
        for (k, v) in params {
            p.insert((*k).to_owned(), (*v).to_owned());
        }
        let url = if path.is_empty() {
            Vec::new()
        } else {
            vec![UrlSegment::bare(path)]
        };
        ActivatedRouteSnapshot::new(
            url,
            p,
            QueryParams::new(),
            None,
            DataMap::new(),
            PRIMARY_OUTLET.to_owned(),
            component.map(ComponentId),
            config,
            UrlSegmentGroup::empty(),
            -1,
            LinkedHashMap::new(),
        )
    }

    #[test]
    fn path_from_root_walks_parents() {
        let root = snapshot("", &[], Some("Root"), None);
        let mid = snapshot("a", &[], Some("A"), Some(Rc::new(Route::path("a"))));
        let leaf = snapshot("b", &[], Some("B"), Some(Rc::new(Route::path("b"))));
        ActivatedRouteSnapshot::attach_children(&root, vec![mid.clone()]);
        ActivatedRouteSnapshot::attach_children(&mid, vec![leaf.clone()]);

        let path = leaf.path_from_root();
        assert_eq!(path.len(), 3);
        assert!(Rc::ptr_eq(&path[0], &root));
        assert!(Rc::ptr_eq(&path[2], &leaf));
        assert!(Rc::ptr_eq(&leaf.root(), &root));
        assert!(Rc::ptr_eq(&mid.first_child().unwrap(), &leaf));
    }

    #[test]
    fn empty_only_inheritance_crosses_componentless_and_empty_paths() {
        let root = snapshot("", &[], Some("Root"), None);
        let team = snapshot(
            "33",
            &[("id", "33")],
            Some("Team"),
            Some(Rc::new(Route::path("team/:id").component("Team"))),
        );
        // Componentless grouping route: its params flow to the leaf.
        let group = snapshot(
            "g",
            &[("flag", "on")],
            None,
            Some(Rc::new(Route::path("g"))),
        );
        let leaf = snapshot(
            "u",
            &[("who", "bob")],
            Some("User"),
            Some(Rc::new(Route::path("u").component("User"))),
        );
        ActivatedRouteSnapshot::attach_children(&root, vec![team.clone()]);
        ActivatedRouteSnapshot::attach_children(&team, vec![group.clone()]);
        ActivatedRouteSnapshot::attach_children(&group, vec![leaf.clone()]);

        inherit_params_and_data(&root, ParamsInheritance::EmptyOnly);

        let params = leaf.params();
        assert_eq!(params.get("who"), Some(&"bob".to_owned()));
        assert_eq!(params.get("flag"), Some(&"on".to_owned()));
        // `team` bears a component and a non-empty path, so its params do
        // not cross it downward, but stay its own.
        assert_eq!(params.get("id"), None);
        assert_eq!(team.params().get("id"), Some(&"33".to_owned()));
    }

    #[test]
    fn always_inheritance_merges_the_whole_chain() {
        let root = snapshot("", &[], Some("Root"), None);
        let team = snapshot(
            "33",
            &[("id", "33")],
            Some("Team"),
            Some(Rc::new(Route::path("team/:id").component("Team"))),
        );
        let leaf = snapshot(
            "u",
            &[("who", "bob")],
            Some("User"),
            Some(Rc::new(Route::path("u").component("User"))),
        );
        ActivatedRouteSnapshot::attach_children(&root, vec![team.clone()]);
        ActivatedRouteSnapshot::attach_children(&team, vec![leaf.clone()]);

        inherit_params_and_data(&root, ParamsInheritance::Always);
        assert_eq!(leaf.params().get("id"), Some(&"33".to_owned()));
    }

    #[test]
    fn data_inherits_alongside_params() {
        let root = snapshot("", &[], Some("Root"), None);
        let parent_cfg = Rc::new(Route::path("").data("theme", json!("dark")));
        let parent = snapshot("", &[], None, Some(parent_cfg));
        parent.set_data({
            let mut d = DataMap::new();
            d.insert("theme".to_owned(), json!("dark"));
            d
        });
        let leaf = snapshot(
            "child",
            &[],
            Some("Child"),
            Some(Rc::new(Route::path("child").component("Child"))),
        );
        ActivatedRouteSnapshot::attach_children(&root, vec![parent.clone()]);
        ActivatedRouteSnapshot::attach_children(&parent, vec![leaf.clone()]);

        inherit_params_and_data(&root, ParamsInheritance::EmptyOnly);
        assert_eq!(leaf.data().get("theme"), Some(&json!("dark")));
    }

    #[test]
    fn advance_pushes_only_changed_fields() {
        let first = snapshot("a", &[("v", "1")], Some("A"), None);
        let route = ActivatedRoute::from_snapshot(&first);
        advance_activated_route(&route);

        let mut params_rx = route.params.subscribe();
        let mut url_rx = route.url.subscribe();

        let second = snapshot("a", &[("v", "2")], Some("A"), None);
        *route.future_snapshot.borrow_mut() = second;
        advance_activated_route(&route);
        drop(route);

        use futures::StreamExt;
        let params_seen: Vec<Params> = futures::executor::block_on(params_rx.by_ref().collect());
        assert_eq!(params_seen.len(), 2);
        let urls_seen: Vec<Vec<UrlSegment>> =
            futures::executor::block_on(url_rx.by_ref().collect());
        // Same consumed URL, so only the seeded value appears.
        assert_eq!(urls_seen.len(), 1);
    }

    #[test]
    fn equal_params_and_url_requires_matching_parent_chains() {
        let a_parent = snapshot("p", &[], None, None);
        let a = snapshot("x", &[("k", "1")], None, None);
        ActivatedRouteSnapshot::attach_children(&a_parent, vec![a.clone()]);

        let b_parent = snapshot("p", &[], None, None);
        let b = snapshot("x", &[("k", "1")], None, None);
        ActivatedRouteSnapshot::attach_children(&b_parent, vec![b.clone()]);

        assert!(equal_params_and_url_segments(&a, &b));

        let c_parent = snapshot("other", &[], None, None);
        let c = snapshot("x", &[("k", "1")], None, None);
        ActivatedRouteSnapshot::attach_children(&c_parent, vec![c.clone()]);
        assert!(!equal_params_and_url_segments(&a, &c));
    }
}
