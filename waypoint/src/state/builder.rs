//! Reconciling the future snapshot tree with the previous live state.
//!
//! Walking the future snapshot tree top-down: a node whose configuration
//! the reuse strategy recognizes keeps its live [`ActivatedRoute`]
//! identity (streams and all) and only records the new future snapshot; a
//! node with a stored detached subtree gets that subtree back; everything
//! else is built fresh.
//!
//! The result is an *unwired* [`TreeNode`] tree: the previous state's
//! parent/child links stay untouched until the navigation commits, so a
//! cancelled transition leaves the current state exactly as it was, and
//! the commit walk can still diff old against new.

use std::rc::Rc;

use crate::error::RouterError;
use crate::state::{ActivatedRoute, ActivatedRouteSnapshot, RouterState, RouterStateSnapshot};
use crate::strategies::RouteReuseStrategy;

/// One node of an explicit route tree: the live route plus its children,
/// held outside the routes themselves.
#[derive(Debug)]
pub(crate) struct TreeNode {
    pub(crate) route: Rc<ActivatedRoute>,
    pub(crate) children: Vec<TreeNode>,
}

impl TreeNode {
    /// Snapshots the current wiring of a live route tree.
    pub(crate) fn capture(route: &Rc<ActivatedRoute>) -> TreeNode {
        TreeNode {
            route: route.clone(),
            children: route.children().iter().map(TreeNode::capture).collect(),
        }
    }

    /// Applies this tree's shape onto the routes' parent/child links.
    pub(crate) fn wire(&self) {
        ActivatedRoute::attach_children(
            &self.route,
            self.children.iter().map(|c| c.route.clone()).collect(),
        );
        for child in &self.children {
            child.wire();
        }
    }
}

/// The not-yet-committed next state: an unwired route tree plus the
/// snapshot it realizes.
#[derive(Debug)]
pub(crate) struct FutureState {
    pub(crate) tree: TreeNode,
    pub(crate) snapshot: RouterStateSnapshot,
}

impl FutureState {
    /// Wires the tree and produces the committed [`RouterState`].
    pub(crate) fn commit(&self) -> RouterState {
        self.tree.wire();
        RouterState::new(self.tree.route.clone(), self.snapshot.clone())
    }
}

/// Builds the next live state for `target`, reusing from `previous` where
/// the strategy allows. `previous` is only read; its wiring is untouched.
pub(crate) fn create_router_state(
    strategy: &Rc<dyn RouteReuseStrategy>,
    target: &RouterStateSnapshot,
    previous: &RouterState,
) -> Result<FutureState, RouterError> {
    let tree = create_node(strategy, &target.root(), Some(previous.root()))?;
    Ok(FutureState {
        tree,
        snapshot: target.clone(),
    })
}

fn create_node(
    strategy: &Rc<dyn RouteReuseStrategy>,
    target: &Rc<ActivatedRouteSnapshot>,
    previous: Option<Rc<ActivatedRoute>>,
) -> Result<TreeNode, RouterError> {
    if let Some(previous_route) = &previous {
        if strategy.should_reuse_route(target, &previous_route.snapshot()) {
            let route = previous_route.clone();
            *route.future_snapshot.borrow_mut() = target.clone();
            let children = create_or_reuse_children(strategy, target, previous_route)?;
            return Ok(TreeNode { route, children });
        }
    }

    if strategy.should_attach(target) {
        if let Some(handle) = strategy.retrieve(target) {
            let subtree = handle.route();
            set_future_snapshots(target, &subtree)?;
            // The stored subtree keeps its own wiring; mirror it so the
            // commit re-applies the same shape.
            return Ok(TreeNode::capture(&subtree));
        }
    }

    let route = ActivatedRoute::from_snapshot(target);
    let children = target
        .children()
        .iter()
        .map(|child| create_node(strategy, child, None))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(TreeNode { route, children })
}

fn create_or_reuse_children(
    strategy: &Rc<dyn RouteReuseStrategy>,
    target: &Rc<ActivatedRouteSnapshot>,
    previous: &Rc<ActivatedRoute>,
) -> Result<Vec<TreeNode>, RouterError> {
    target
        .children()
        .iter()
        .map(|child| {
            for previous_child in previous.children() {
                if strategy.should_reuse_route(child, &previous_child.snapshot()) {
                    return create_node(strategy, child, Some(previous_child));
                }
            }
            create_node(strategy, child, None)
        })
        .collect()
}

/// Points every node of a reattached subtree at its new future snapshot.
/// The subtree must mirror the target's shape; a strategy that stored
/// something else cancels the navigation.
fn set_future_snapshots(
    target: &Rc<ActivatedRouteSnapshot>,
    subtree: &Rc<ActivatedRoute>,
) -> Result<(), RouterError> {
    if !crate::config::same_config(
        target.route_config().as_ref(),
        subtree.snapshot().route_config().as_ref(),
    ) {
        return Err(RouterError::cancellation(
            "cannot reattach a detached subtree created from a different route",
        ));
    }
    let target_children = target.children();
    let subtree_children = subtree.children();
    if target_children.len() != subtree_children.len() {
        return Err(RouterError::cancellation(
            "cannot reattach a detached subtree with a different number of children",
        ));
    }

    *subtree.future_snapshot.borrow_mut() = target.clone();
    for (target_child, subtree_child) in target_children.iter().zip(subtree_children.iter()) {
        set_future_snapshots(target_child, subtree_child)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ComponentId, DataMap, Route};
    use crate::state::{create_empty_state, ParamsInheritance};
    use crate::strategies::DefaultRouteReuseStrategy;
    use crate::url::serializer::parse_url;
    use crate::url::{Params, QueryParams, UrlSegmentGroup, UrlTree, PRIMARY_OUTLET};
    use linked_hash_map::LinkedHashMap;

    fn recognized(config: &[Rc<Route>], url: &str) -> RouterStateSnapshot {
        let tree = parse_url(url).unwrap();
        crate::recognition::recognize(
            Some(ComponentId("Root")),
            config,
            &tree,
            url.to_owned(),
            ParamsInheritance::EmptyOnly,
        )
        .unwrap()
    }

    #[test]
    fn same_config_keeps_route_identity() {
        let config: Vec<Rc<Route>> = vec![Rc::new(Route::path("team/:id").component("Team"))];
        let strategy: Rc<dyn RouteReuseStrategy> = Rc::new(DefaultRouteReuseStrategy);

        let empty = create_empty_state(&UrlTree::empty(), Some(ComponentId("Root")));
        let first = create_router_state(&strategy, &recognized(&config, "/team/33"), &empty)
            .unwrap()
            .commit();
        let second = create_router_state(&strategy, &recognized(&config, "/team/44"), &first)
            .unwrap();

        let first_team = first.root().first_child().unwrap();
        let second_team = &second.tree.children[0].route;
        assert!(Rc::ptr_eq(&first_team, second_team));
        // The reused node carries the new future snapshot.
        assert_eq!(
            second_team.future_snapshot.borrow().params().get("id"),
            Some(&"44".to_owned())
        );
    }

    #[test]
    fn building_does_not_disturb_the_previous_wiring() {
        let config: Vec<Rc<Route>> = vec![
            Rc::new(Route::path("a").component("A")),
            Rc::new(Route::path("b").component("B")),
        ];
        let strategy: Rc<dyn RouteReuseStrategy> = Rc::new(DefaultRouteReuseStrategy);

        let empty = create_empty_state(&UrlTree::empty(), Some(ComponentId("Root")));
        let first = create_router_state(&strategy, &recognized(&config, "/a"), &empty)
            .unwrap()
            .commit();
        let a = first.root().first_child().unwrap();

        // Building the `/b` state reuses the root but must not rewire it
        // until commit.
        let second = create_router_state(&strategy, &recognized(&config, "/b"), &first).unwrap();
        let still_a = first.root().first_child().unwrap();
        assert!(Rc::ptr_eq(&a, &still_a), "previous state was disturbed");

        let committed = second.commit();
        let b = committed.root().first_child().unwrap();
        assert!(!Rc::ptr_eq(&a, &b));
        assert_eq!(b.component(), Some(ComponentId("B")));
    }

    #[test]
    fn mismatched_reattach_cancels() {
        struct AlwaysAttach(Rc<ActivatedRoute>);
        impl RouteReuseStrategy for AlwaysAttach {
            fn should_detach(&self, _: &Rc<ActivatedRouteSnapshot>) -> bool {
                false
            }
            fn store(
                &self,
                _: &Rc<ActivatedRouteSnapshot>,
                _: Option<crate::outlet::DetachedRouteHandle>,
            ) {
            }
            fn should_attach(&self, route: &Rc<ActivatedRouteSnapshot>) -> bool {
                route.route_config().is_some()
            }
            fn retrieve(
                &self,
                _: &Rc<ActivatedRouteSnapshot>,
            ) -> Option<crate::outlet::DetachedRouteHandle> {
                Some(crate::outlet::DetachedRouteHandle {
                    component: None,
                    route: self.0.clone(),
                    contexts: Default::default(),
                })
            }
            fn should_reuse_route(
                &self,
                _: &Rc<ActivatedRouteSnapshot>,
                _: &Rc<ActivatedRouteSnapshot>,
            ) -> bool {
                false
            }
        }

        // A stored subtree built from an unrelated config node.
        let unrelated = ActivatedRoute::from_snapshot(&ActivatedRouteSnapshot::new(
            Vec::new(),
            Params::new(),
            QueryParams::new(),
            None,
            DataMap::new(),
            PRIMARY_OUTLET.to_owned(),
            None,
            Some(Rc::new(Route::path("unrelated"))),
            UrlSegmentGroup::empty(),
            -1,
            LinkedHashMap::new(),
        ));

        let config: Vec<Rc<Route>> = vec![Rc::new(Route::path("a").component("A"))];
        let strategy: Rc<dyn RouteReuseStrategy> = Rc::new(AlwaysAttach(unrelated));
        let empty = create_empty_state(&UrlTree::empty(), Some(ComponentId("Root")));
        let err =
            create_router_state(&strategy, &recognized(&config, "/a"), &empty).unwrap_err();
        assert!(err.is_cancellation());
    }
}
