//! The commit walk: tearing down what left the state tree, advancing what
//! stayed, and mounting what arrived.
//!
//! The walk diffs two explicit trees: the future one built by state
//! reconciliation and a capture of the old wiring taken just before
//! commit. Deactivations run child-before-parent, consulting the reuse
//! strategy so detachable subtrees are stored instead of destroyed.
//! Activations run parent-before-child, reattaching stored subtrees where
//! the strategy offers them. All rendering is delegated to the outlet
//! collaborator.

use std::collections::HashMap;
use std::rc::Rc;

use crate::events::Event;
use crate::guards::TokenResolver;
use crate::loader::LoadedRouterConfig;
use crate::outlet::{DetachedRouteHandle, OutletContexts};
use crate::state::builder::TreeNode;
use crate::state::{advance_activated_route, ActivatedRouteSnapshot};

use crate::strategies::RouteReuseStrategy;

pub(crate) struct ActivateRoutes<'a> {
    pub(crate) strategy: &'a Rc<dyn RouteReuseStrategy>,
    /// The future tree (already wired by the commit).
    pub(crate) future: &'a TreeNode,
    /// The old wiring, captured before the commit rewired anything.
    pub(crate) curr: &'a TreeNode,
    pub(crate) root_resolver: &'a Rc<dyn TokenResolver>,
    pub(crate) emit: &'a dyn Fn(Event),
}

impl ActivateRoutes<'_> {
    pub(crate) fn activate(&self, parent_contexts: &Rc<OutletContexts>) {
        self.deactivate_child_routes(self.future, Some(self.curr), parent_contexts);
        advance_activated_route(&self.future.route);
        self.activate_child_routes(self.future, Some(self.curr), parent_contexts);
    }

    fn deactivate_child_routes(
        &self,
        future_node: &TreeNode,
        curr_node: Option<&TreeNode>,
        contexts: &Rc<OutletContexts>,
    ) {
        let mut prev_children = children_by_outlet(curr_node);

        for child in &future_node.children {
            let prev = prev_children.remove(child.route.outlet());
            self.deactivate_routes(child, prev, contexts);
        }
        for (_, removed) in prev_children {
            self.deactivate_route_and_its_children(removed, contexts);
        }
    }

    fn deactivate_routes(
        &self,
        future_node: &TreeNode,
        curr_node: Option<&TreeNode>,
        parent_contexts: &Rc<OutletContexts>,
    ) {
        match curr_node {
            Some(curr) if Rc::ptr_eq(&future_node.route, &curr.route) => {
                // The route survives; only descend.
                if future_node.route.component().is_some() {
                    let context =
                        parent_contexts.get_or_create_context(future_node.route.outlet());
                    self.deactivate_child_routes(future_node, Some(curr), &context.children());
                } else {
                    self.deactivate_child_routes(future_node, Some(curr), parent_contexts);
                }
            }
            Some(curr) => self.deactivate_route_and_its_children(curr, parent_contexts),
            None => {}
        }
    }

    fn deactivate_route_and_its_children(
        &self,
        node: &TreeNode,
        parent_contexts: &Rc<OutletContexts>,
    ) {
        if self.strategy.should_detach(&node.route.snapshot()) {
            self.detach_and_store(node, parent_contexts);
        } else {
            self.deactivate_route_and_outlet(node, parent_contexts);
        }
    }

    fn detach_and_store(&self, node: &TreeNode, parent_contexts: &Rc<OutletContexts>) {
        if let Some(context) = parent_contexts.get_context(node.route.outlet()) {
            let component = context.outlet().and_then(|outlet| outlet.detach());
            let contexts = context.children().take_all();
            self.strategy.store(
                &node.route.snapshot(),
                Some(DetachedRouteHandle {
                    component,
                    route: node.route.clone(),
                    contexts,
                }),
            );
        }
    }

    fn deactivate_route_and_outlet(&self, node: &TreeNode, parent_contexts: &Rc<OutletContexts>) {
        let Some(context) = parent_contexts.get_context(node.route.outlet()) else {
            return;
        };
        let child_contexts = if node.route.component().is_some() {
            context.children()
        } else {
            parent_contexts.clone()
        };

        for child in &node.children {
            self.deactivate_route_and_its_children(child, &child_contexts);
        }
        if let Some(outlet) = context.outlet() {
            log::trace!(" deactivating outlet `{}`", node.route.outlet());
            outlet.deactivate();
            context.children().take_all();
        }
        *context.route.borrow_mut() = None;
    }

    fn activate_child_routes(
        &self,
        future_node: &TreeNode,
        curr_node: Option<&TreeNode>,
        contexts: &Rc<OutletContexts>,
    ) {
        let mut prev_children = children_by_outlet(curr_node);

        for child in &future_node.children {
            let prev = prev_children.remove(child.route.outlet());
            self.activate_routes(child, prev, contexts);
            (self.emit)(Event::ActivationEnd {
                snapshot: child.route.snapshot(),
            });
        }
        if !future_node.children.is_empty() {
            (self.emit)(Event::ChildActivationEnd {
                snapshot: future_node.route.snapshot(),
            });
        }
    }

    fn activate_routes(
        &self,
        future_node: &TreeNode,
        curr_node: Option<&TreeNode>,
        parent_contexts: &Rc<OutletContexts>,
    ) {
        advance_activated_route(&future_node.route);

        match curr_node {
            Some(curr) if Rc::ptr_eq(&future_node.route, &curr.route) => {
                if future_node.route.component().is_some() {
                    let context =
                        parent_contexts.get_or_create_context(future_node.route.outlet());
                    self.activate_child_routes(future_node, Some(curr), &context.children());
                } else {
                    self.activate_child_routes(future_node, Some(curr), parent_contexts);
                }
            }
            _ => {
                if future_node.route.component().is_some() {
                    let context =
                        parent_contexts.get_or_create_context(future_node.route.outlet());
                    let snapshot = future_node.route.snapshot();

                    if self.strategy.should_attach(&snapshot) {
                        if let Some(stored) = self.strategy.retrieve(&snapshot) {
                            self.strategy.store(&snapshot, None);
                            context.children().restore(stored.contexts.clone());
                            *context.route.borrow_mut() = Some(stored.route.clone());
                            if let Some(outlet) = context.outlet() {
                                if let Some(component) = stored.component.clone() {
                                    outlet.attach(component, stored.route.clone());
                                }
                            }
                            advance_subtree(future_node);
                            return;
                        }
                    }

                    let resolver = parent_loaded_config(&snapshot)
                        .map(|loaded| loaded.resolver)
                        .unwrap_or_else(|| self.root_resolver.clone());
                    *context.route.borrow_mut() = Some(future_node.route.clone());
                    *context.resolver.borrow_mut() = Some(resolver.clone());
                    if let Some(outlet) = context.outlet() {
                        log::trace!(" activating outlet `{}`", future_node.route.outlet());
                        outlet.activate(future_node.route.clone(), Some(resolver));
                    }
                    self.activate_child_routes(future_node, None, &context.children());
                } else {
                    self.activate_child_routes(future_node, None, parent_contexts);
                }
            }
        }
    }
}

fn children_by_outlet(node: Option<&TreeNode>) -> HashMap<String, &TreeNode> {
    node.map(|n| {
        n.children
            .iter()
            .map(|c| (c.route.outlet().to_owned(), c))
            .collect()
    })
    .unwrap_or_default()
}

fn advance_subtree(node: &TreeNode) {
    for child in &node.children {
        advance_activated_route(&child.route);
        advance_subtree(child);
    }
}

/// The loaded configuration whose scope covers a snapshot's component:
/// the nearest lazily-loaded ancestor below the nearest component-bearing
/// ancestor.
fn parent_loaded_config(snapshot: &Rc<ActivatedRouteSnapshot>) -> Option<LoadedRouterConfig> {
    let mut current = snapshot.parent();
    while let Some(ancestor) = current {
        if let Some(config) = ancestor.route_config() {
            if let Some(loaded) = config.loaded_config() {
                return Some(loaded);
            }
            if config.component.is_some() {
                return None;
            }
        }
        current = ancestor.parent();
    }
    None
}
