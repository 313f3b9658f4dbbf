//! Recognition: building an [`ActivatedRouteSnapshot`] tree from an
//! expanded URL tree.
//!
//! Redirects have already been applied and lazy configurations realized by
//! the time recognition runs, so this walk is synchronous: it pairs URL
//! segment groups with configuration nodes, consuming segments and
//! recording where in the raw URL each match happened (the anchor used
//! later for relative navigation).

use std::rc::Rc;

use linked_hash_map::LinkedHashMap;

use crate::config::{
    match_route, matched_parameters, ComponentId, PathMatch, Route,
};
use crate::error::RouterError;
use crate::state::{
    inherit_params_and_data, ActivatedRouteSnapshot, ParamsInheritance, RouterStateSnapshot,
};
use crate::url::serializer::serialize_paths;
use crate::url::{
    Params, SourceShift, UrlSegment, UrlSegmentGroup, UrlTree, PRIMARY_OUTLET,
};

/// Builds the full state snapshot for `url_tree` against `config`.
pub(crate) fn recognize(
    root_component: Option<ComponentId>,
    config: &[Rc<Route>],
    url_tree: &UrlTree,
    url: String,
    inheritance: ParamsInheritance,
) -> Result<RouterStateSnapshot, RouterError> {
    let recognizer = Recognizer {
        url_tree,
        inheritance,
    };
    let root_group = split(&url_tree.root, &[], &[], config).group;
    let children = recognizer
        .process_segment_group(config, &root_group, PRIMARY_OUTLET)
        .map_err(|e| match e {
            Recognize::NoMatch(group) => RouterError::NoMatch {
                segments: serialize_paths(&group),
            },
            Recognize::Fatal(err) => err,
        })?;

    let root = ActivatedRouteSnapshot::new(
        Vec::new(),
        Params::new(),
        url_tree.query_params.clone(),
        url_tree.fragment.clone(),
        crate::config::DataMap::new(),
        PRIMARY_OUTLET.to_owned(),
        root_component,
        None,
        url_tree.root.clone(),
        -1,
        LinkedHashMap::new(),
    );
    ActivatedRouteSnapshot::attach_children(&root, children);
    inherit_params_and_data(&root, recognizer.inheritance);
    Ok(RouterStateSnapshot::new(url, root))
}

/// Internal recognition failure: `NoMatch` is control flow while trying
/// candidates, `Fatal` aborts immediately.
enum Recognize {
    NoMatch(Rc<UrlSegmentGroup>),
    Fatal(RouterError),
}

struct Recognizer<'a> {
    url_tree: &'a UrlTree,
    inheritance: ParamsInheritance,
}

impl Recognizer<'_> {
    fn process_segment_group(
        &self,
        config: &[Rc<Route>],
        group: &Rc<UrlSegmentGroup>,
        outlet: &str,
    ) -> Result<Vec<Rc<ActivatedRouteSnapshot>>, Recognize> {
        if group.segments.is_empty() && group.has_children() {
            self.process_children(config, group)
        } else {
            self.process_segment(config, group, &group.segments, outlet)
        }
    }

    fn process_children(
        &self,
        config: &[Rc<Route>],
        group: &Rc<UrlSegmentGroup>,
    ) -> Result<Vec<Rc<ActivatedRouteSnapshot>>, Recognize> {
        let mut children = Vec::new();
        for (child_outlet, child) in ordered_children(group) {
            let mut nodes = self.process_segment_group(config, &child, &child_outlet)?;
            children.append(&mut nodes);
        }
        check_outlet_uniqueness(&children)?;
        sort_by_outlet(&mut children);
        Ok(children)
    }

    fn process_segment(
        &self,
        config: &[Rc<Route>],
        group: &Rc<UrlSegmentGroup>,
        segments: &[UrlSegment],
        outlet: &str,
    ) -> Result<Vec<Rc<ActivatedRouteSnapshot>>, Recognize> {
        // Two empty-path routes claiming the same named outlet are both
        // "matched" by an empty group; that ambiguity is an error rather
        // than silent shadowing.
        if outlet != PRIMARY_OUTLET && segments.is_empty() && !group.has_children() {
            let empties = config
                .iter()
                .filter(|r| {
                    r.redirect_to.is_none()
                        && r.outlet == outlet
                        && r.path.as_deref() == Some("")
                })
                .count();
            if empties > 1 {
                return Err(Recognize::Fatal(RouterError::DuplicateOutlet {
                    outlet: outlet.to_owned(),
                }));
            }
        }

        for route in config {
            match self.process_segment_against_route(route, group, segments, outlet) {
                Ok(nodes) => return Ok(nodes),
                Err(Recognize::NoMatch(_)) => continue,
                Err(fatal) => return Err(fatal),
            }
        }
        if no_leftovers_in_url(group, segments, outlet) {
            return Ok(Vec::new());
        }
        Err(Recognize::NoMatch(group.clone()))
    }

    fn process_segment_against_route(
        &self,
        route: &Rc<Route>,
        raw_group: &Rc<UrlSegmentGroup>,
        segments: &[UrlSegment],
        outlet: &str,
    ) -> Result<Vec<Rc<ActivatedRouteSnapshot>>, Recognize> {
        if route.redirect_to.is_some() || route.outlet != outlet {
            return Err(Recognize::NoMatch(raw_group.clone()));
        }

        if route.is_wildcard() {
            let params = segments
                .last()
                .map(|s| s.parameters.clone())
                .unwrap_or_default();
            let snapshot = self.snapshot_for(
                route,
                segments.to_vec(),
                params,
                raw_group,
                segments.len() as isize,
            );
            return Ok(vec![snapshot]);
        }

        let m = match_route(raw_group, route, segments)
            .ok_or_else(|| Recognize::NoMatch(raw_group.clone()))?;
        let parameters = matched_parameters(&m);
        let raw_sliced = &segments[m.last_child..];
        let child_config = child_config_of(route);

        let Split {
            group: split_group,
            sliced,
        } = split(raw_group, &m.consumed, raw_sliced, &child_config);

        let snapshot = self.snapshot_for(
            route,
            m.consumed.clone(),
            parameters,
            raw_group,
            m.consumed.len() as isize,
        );

        if sliced.is_empty() && split_group.has_children() {
            let children = self.process_children(&child_config, &split_group)?;
            ActivatedRouteSnapshot::attach_children(&snapshot, children);
            return Ok(vec![snapshot]);
        }

        if child_config.is_empty() && sliced.is_empty() {
            return Ok(vec![snapshot]);
        }

        let children = self.process_segment(&child_config, &split_group, &sliced, PRIMARY_OUTLET)?;
        ActivatedRouteSnapshot::attach_children(&snapshot, children);
        Ok(vec![snapshot])
    }

    fn snapshot_for(
        &self,
        route: &Rc<Route>,
        consumed: Vec<UrlSegment>,
        params: Params,
        raw_group: &Rc<UrlSegmentGroup>,
        consumed_len: isize,
    ) -> Rc<ActivatedRouteSnapshot> {
        ActivatedRouteSnapshot::new(
            consumed,
            params,
            self.url_tree.query_params.clone(),
            self.url_tree.fragment.clone(),
            route.data.clone(),
            route.outlet.clone(),
            route.component,
            Some(route.clone()),
            source_group(raw_group),
            path_index_shift(raw_group) + consumed_len,
            route.resolve.clone(),
        )
    }
}

fn child_config_of(route: &Rc<Route>) -> Vec<Rc<Route>> {
    if !route.children.is_empty() {
        route.children.clone()
    } else if route.load_children.is_some() {
        route
            .loaded_config()
            .map(|c| c.routes)
            .unwrap_or_default()
    } else {
        Vec::new()
    }
}

fn no_leftovers_in_url(group: &Rc<UrlSegmentGroup>, segments: &[UrlSegment], outlet: &str) -> bool {
    segments.is_empty() && group.child(outlet).is_none()
}

/// Children of a group, primary outlet first, then the rest in insertion
/// order.
fn ordered_children(group: &Rc<UrlSegmentGroup>) -> Vec<(String, Rc<UrlSegmentGroup>)> {
    let mut children = Vec::new();
    if let Some(primary) = group.child(PRIMARY_OUTLET) {
        children.push((PRIMARY_OUTLET.to_owned(), primary.clone()));
    }
    for (outlet, child) in group.children().iter() {
        if outlet != PRIMARY_OUTLET {
            children.push((outlet.clone(), child.clone()));
        }
    }
    children
}

fn check_outlet_uniqueness(nodes: &[Rc<ActivatedRouteSnapshot>]) -> Result<(), Recognize> {
    let mut seen: Vec<&str> = Vec::new();
    for node in nodes {
        if seen.contains(&node.outlet()) {
            return Err(Recognize::Fatal(RouterError::DuplicateOutlet {
                outlet: node.outlet().to_owned(),
            }));
        }
        seen.push(node.outlet());
    }
    Ok(())
}

fn sort_by_outlet(nodes: &mut [Rc<ActivatedRouteSnapshot>]) {
    nodes.sort_by(|a, b| {
        if a.outlet() == PRIMARY_OUTLET {
            return std::cmp::Ordering::Less;
        }
        if b.outlet() == PRIMARY_OUTLET {
            return std::cmp::Ordering::Greater;
        }
        a.outlet().cmp(b.outlet())
    });
}

pub(crate) struct Split {
    pub(crate) group: Rc<UrlSegmentGroup>,
    pub(crate) sliced: Vec<UrlSegment>,
}

/// Normalizes empty-path routes with outlets into explicit empty child
/// groups so matching can treat every level uniformly. Rewritten groups
/// remember their source and how many segments the rewrite consumed.
pub(crate) fn split(
    group: &Rc<UrlSegmentGroup>,
    consumed: &[UrlSegment],
    sliced: &[UrlSegment],
    config: &[Rc<Route>],
) -> Split {
    if !sliced.is_empty() && contains_empty_path_matches_with_named_outlets(group, sliced, config) {
        let primary = UrlSegmentGroup::new(sliced.to_vec(), group.children().clone());
        *primary.source.borrow_mut() = Some(SourceShift {
            group: group.clone(),
            shift: consumed.len(),
        });
        let s = UrlSegmentGroup::new(
            consumed.to_vec(),
            children_for_empty_paths(group, consumed, config, primary),
        );
        *s.source.borrow_mut() = Some(SourceShift {
            group: group.clone(),
            shift: consumed.len(),
        });
        return Split {
            group: s,
            sliced: Vec::new(),
        };
    }

    if sliced.is_empty() && contains_empty_path_matches(group, sliced, config) {
        let s = UrlSegmentGroup::new(
            group.segments.clone(),
            add_empty_paths_to_children(group, sliced, config, group.children()),
        );
        *s.source.borrow_mut() = Some(SourceShift {
            group: group.clone(),
            shift: consumed.len(),
        });
        return Split {
            group: s,
            sliced: sliced.to_vec(),
        };
    }

    let s = UrlSegmentGroup::new(group.segments.clone(), group.children().clone());
    *s.source.borrow_mut() = Some(SourceShift {
        group: group.clone(),
        shift: consumed.len(),
    });
    Split {
        group: s,
        sliced: sliced.to_vec(),
    }
}

fn add_empty_paths_to_children(
    group: &Rc<UrlSegmentGroup>,
    sliced: &[UrlSegment],
    routes: &[Rc<Route>],
    children: &LinkedHashMap<String, Rc<UrlSegmentGroup>>,
) -> LinkedHashMap<String, Rc<UrlSegmentGroup>> {
    let mut res = children.clone();
    for route in routes {
        if empty_path_match(group, sliced, route) && !children.contains_key(&route.outlet) {
            let s = UrlSegmentGroup::empty();
            *s.source.borrow_mut() = Some(SourceShift {
                group: group.clone(),
                shift: group.segments.len(),
            });
            res.insert(route.outlet.clone(), s);
        }
    }
    res
}

fn children_for_empty_paths(
    group: &Rc<UrlSegmentGroup>,
    consumed: &[UrlSegment],
    routes: &[Rc<Route>],
    primary: Rc<UrlSegmentGroup>,
) -> LinkedHashMap<String, Rc<UrlSegmentGroup>> {
    let mut res = LinkedHashMap::new();
    res.insert(PRIMARY_OUTLET.to_owned(), primary);
    for route in routes {
        if route.path.as_deref() == Some("") && route.outlet != PRIMARY_OUTLET {
            let s = UrlSegmentGroup::empty();
            *s.source.borrow_mut() = Some(SourceShift {
                group: group.clone(),
                shift: consumed.len(),
            });
            res.insert(route.outlet.clone(), s);
        }
    }
    res
}

fn contains_empty_path_matches_with_named_outlets(
    group: &Rc<UrlSegmentGroup>,
    sliced: &[UrlSegment],
    routes: &[Rc<Route>],
) -> bool {
    routes
        .iter()
        .any(|r| empty_path_match(group, sliced, r) && r.outlet != PRIMARY_OUTLET)
}

fn contains_empty_path_matches(
    group: &Rc<UrlSegmentGroup>,
    sliced: &[UrlSegment],
    routes: &[Rc<Route>],
) -> bool {
    routes.iter().any(|r| empty_path_match(group, sliced, r))
}

fn empty_path_match(group: &Rc<UrlSegmentGroup>, sliced: &[UrlSegment], route: &Rc<Route>) -> bool {
    if (group.has_children() || !sliced.is_empty())
        && route.path_match_mode() == PathMatch::Full
    {
        return false;
    }
    route.path.as_deref() == Some("") && route.redirect_to.is_none()
}

/// Walks rewritten groups back to the raw group they were derived from.
pub(crate) fn source_group(group: &Rc<UrlSegmentGroup>) -> Rc<UrlSegmentGroup> {
    let mut current = group.clone();
    loop {
        let source = current.source.borrow().as_ref().map(|s| s.group.clone());
        match source {
            Some(parent) => current = parent,
            None => return current,
        }
    }
}

/// Accumulated segment-index shift of a rewritten group chain, offset so
/// that adding a consumed count yields the last path index.
pub(crate) fn path_index_shift(group: &Rc<UrlSegmentGroup>) -> isize {
    let mut res = group.source.borrow().as_ref().map(|s| s.shift as isize).unwrap_or(0);
    let mut current = group.clone();
    loop {
        let source = current.source.borrow().as_ref().map(|s| s.group.clone());
        match source {
            Some(parent) => {
                res += parent
                    .source
                    .borrow()
                    .as_ref()
                    .map(|s| s.shift as isize)
                    .unwrap_or(0);
                current = parent;
            }
            None => break,
        }
    }
    res - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::serializer::parse_url;
    use serde_json::json;

    fn recognize_url(
        config: Vec<Route>,
        url: &str,
    ) -> Result<RouterStateSnapshot, RouterError> {
        let config: Vec<Rc<Route>> = config.into_iter().map(Rc::new).collect();
        let tree = parse_url(url).unwrap();
        recognize(
            Some(ComponentId("Root")),
            &config,
            &tree,
            url.to_owned(),
            ParamsInheritance::EmptyOnly,
        )
    }

    fn primary_leaf(state: &RouterStateSnapshot) -> Rc<ActivatedRouteSnapshot> {
        let mut node = state.root();
        while let Some(child) = node.first_child() {
            node = child;
        }
        node
    }

    #[test]
    fn recognizes_a_nested_chain() {
        let state = recognize_url(
            vec![Route::path("team/:id")
                .component("TeamCmp")
                .children(vec![Route::path("user/:name").component("UserCmp")])],
            "/team/33/user/bob",
        )
        .unwrap();

        let team = state.root().first_child().unwrap();
        assert_eq!(team.params().get("id"), Some(&"33".to_owned()));
        assert_eq!(team.component(), Some(ComponentId("TeamCmp")));

        let user = team.first_child().unwrap();
        assert_eq!(user.params().get("name"), Some(&"bob".to_owned()));
        assert_eq!(
            user.url_ref().iter().map(|s| s.path.clone()).collect::<Vec<_>>(),
            vec!["user", "bob"]
        );
    }

    #[test]
    fn records_the_relative_navigation_anchor() {
        let state = recognize_url(
            vec![Route::path("team/:id")
                .component("TeamCmp")
                .children(vec![Route::path("user/:name").component("UserCmp")])],
            "/team/33/user/bob",
        )
        .unwrap();

        let tree_root_child = {
            let user = primary_leaf(&state);
            let anchor = user.source_group.borrow().clone().unwrap();
            assert_eq!(user.last_path_index.get(), 3);
            anchor
        };
        assert_eq!(
            tree_root_child
                .segments
                .iter()
                .map(|s| s.path.clone())
                .collect::<Vec<_>>(),
            vec!["team", "33", "user", "bob"]
        );

        let team = state.root().first_child().unwrap();
        assert_eq!(team.last_path_index.get(), 1);
    }

    #[test]
    fn matrix_params_of_the_last_consumed_segment_merge_in() {
        let state = recognize_url(
            vec![Route::path("team/:id").component("TeamCmp")],
            "/team/33;flag=on",
        )
        .unwrap();
        let team = primary_leaf(&state);
        assert_eq!(team.params().get("id"), Some(&"33".to_owned()));
        assert_eq!(team.params().get("flag"), Some(&"on".to_owned()));
        assert_eq!(team.param_map().get("id"), Some("33"));
    }

    #[test]
    fn wildcard_consumes_everything() {
        let state = recognize_url(
            vec![Route::path("**").component("NotFound")],
            "/no/such/page",
        )
        .unwrap();
        let node = primary_leaf(&state);
        assert_eq!(node.url_ref().len(), 3);
        assert_eq!(node.component(), Some(ComponentId("NotFound")));
    }

    #[test]
    fn redirect_routes_are_skipped() {
        let err = recognize_url(
            vec![Route::path("a").redirect_to("/b").path_match_full()],
            "/a",
        )
        .unwrap_err();
        assert!(matches!(err, RouterError::NoMatch { .. }));
    }

    #[test]
    fn no_match_names_the_segments() {
        let err = recognize_url(
            vec![Route::path("present").component("P")],
            "/absent/path",
        )
        .unwrap_err();
        match err {
            RouterError::NoMatch { segments } => assert!(segments.contains("absent")),
            other => panic!("expected NoMatch, got {other:?}"),
        }
    }

    #[test]
    fn secondary_outlets_become_siblings_sorted_primary_first() {
        let state = recognize_url(
            vec![
                Route::path("inbox").component("Inbox"),
                Route::path("compose").component("Compose").outlet("popup"),
                Route::path("hint").component("Hint").outlet("aside"),
            ],
            "/inbox(popup:compose//aside:hint)",
        )
        .unwrap();
        let children = state.root().children();
        let outlets: Vec<&str> = children.iter().map(|c| c.outlet()).collect();
        assert_eq!(outlets, vec!["primary", "aside", "popup"]);
    }

    #[test]
    fn duplicate_outlets_are_fatal() {
        // Two empty-path routes on the same named outlet both match `/`.
        let err = recognize_url(
            vec![
                Route::path("x").component("X"),
                Route::path("").component("A").outlet("dup"),
                Route::path("").component("B").outlet("dup"),
            ],
            "/x",
        )
        .unwrap_err();
        assert!(matches!(err, RouterError::DuplicateOutlet { .. }));
    }

    #[test]
    fn empty_path_children_activate_without_consuming() {
        let state = recognize_url(
            vec![Route::path("parent").component("Parent").children(vec![
                Route::path("").component("IndexCmp"),
            ])],
            "/parent",
        )
        .unwrap();
        let parent = state.root().first_child().unwrap();
        let index = parent.first_child().unwrap();
        assert_eq!(index.component(), Some(ComponentId("IndexCmp")));
        assert!(index.url_ref().is_empty());
    }

    #[test]
    fn params_inherit_across_componentless_routes() {
        let state = recognize_url(
            vec![Route::path("team/:id").children(vec![
                Route::path("user").component("UserCmp").data("k", json!(1)),
            ])],
            "/team/33/user",
        )
        .unwrap();
        let user = primary_leaf(&state);
        // The componentless `team/:id` route's params flow down.
        assert_eq!(user.params().get("id"), Some(&"33".to_owned()));
        assert_eq!(user.data().get("k"), Some(&json!(1)));
    }
}
