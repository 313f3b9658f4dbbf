//! Deriving a new [`UrlTree`] from a navigation command list.
//!
//! Commands are path atoms, matrix-parameter maps applying to the
//! preceding atom, or an outlets directive assigning command lists to
//! named outlets. A leading `/` makes the navigation absolute, leading
//! `..` atoms pop path indices from the starting position, and `.` is a
//! no-op.

use std::rc::Rc;

use linked_hash_map::LinkedHashMap;

use crate::error::RouterError;
use crate::state::ActivatedRouteSnapshot;
use crate::url::{Params, QueryParams, UrlSegment, UrlSegmentGroup, UrlTree, PRIMARY_OUTLET};

/// One element of a navigation command list.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// A path atom, or a `/`-joined run of atoms.
    Path(String),
    /// Matrix parameters for the preceding atom (or the current segment
    /// when first).
    Params(Params),
    /// Command lists per outlet; `None` removes the named outlet. Must be
    /// the last command.
    Outlets(LinkedHashMap<String, Option<Vec<Command>>>),
}

impl Command {
    /// Matrix parameters from key/value pairs.
    pub fn params(pairs: &[(&str, &str)]) -> Command {
        let mut params = Params::new();
        for (k, v) in pairs {
            params.insert((*k).to_owned(), (*v).to_owned());
        }
        Command::Params(params)
    }

    /// An outlets directive from (name, commands) pairs.
    pub fn outlets(entries: Vec<(&str, Option<Vec<Command>>)>) -> Command {
        let mut map = LinkedHashMap::new();
        for (name, commands) in entries {
            map.insert(name.to_owned(), commands);
        }
        Command::Outlets(map)
    }

    fn path(&self) -> Option<&str> {
        match self {
            Command::Path(p) => Some(p),
            _ => None,
        }
    }

    fn is_params(&self) -> bool {
        matches!(self, Command::Params(_))
    }
}

impl From<&str> for Command {
    fn from(path: &str) -> Command {
        Command::Path(path.to_owned())
    }
}

impl From<String> for Command {
    fn from(path: String) -> Command {
        Command::Path(path)
    }
}

impl From<i64> for Command {
    fn from(n: i64) -> Command {
        Command::Path(n.to_string())
    }
}

/// Derives a new tree by applying `commands` relative to `relative_to`
/// within `url_tree`. `query_params` and `fragment` are final values; any
/// merge policy has been applied by the caller.
pub fn create_url_tree(
    relative_to: &Rc<ActivatedRouteSnapshot>,
    url_tree: &UrlTree,
    commands: Vec<Command>,
    query_params: QueryParams,
    fragment: Option<String>,
) -> Result<UrlTree, RouterError> {
    if commands.is_empty() {
        return Ok(tree(
            &url_tree.root,
            url_tree.root.clone(),
            url_tree,
            query_params,
            fragment,
        ));
    }

    let nav = compute_navigation(commands)?;

    if nav.to_root() {
        return Ok(tree(
            &url_tree.root,
            UrlSegmentGroup::empty(),
            url_tree,
            query_params,
            fragment,
        ));
    }

    let start = find_starting_position(&nav, url_tree, relative_to)?;
    let new_group = if start.process_children {
        update_segment_group_children(&start.group, start.index, &nav.commands)
    } else {
        update_segment_group(Some(start.group.clone()), start.index, &nav.commands)
    };
    Ok(tree(&start.group, new_group, url_tree, query_params, fragment))
}

#[derive(Debug)]
struct Navigation {
    is_absolute: bool,
    double_dots: usize,
    commands: Vec<Command>,
}

impl Navigation {
    fn to_root(&self) -> bool {
        self.is_absolute && self.commands.is_empty()
    }
}

fn compute_navigation(commands: Vec<Command>) -> Result<Navigation, RouterError> {
    let mut is_absolute = false;
    let mut double_dots = 0usize;
    let mut res: Vec<Command> = Vec::new();
    let last = commands.len().saturating_sub(1);

    for (idx, command) in commands.into_iter().enumerate() {
        match command {
            Command::Outlets(map) => {
                if idx != last {
                    return Err(RouterError::InvalidCommands(
                        "an outlets directive has to be the last command".to_owned(),
                    ));
                }
                let mut normalized = LinkedHashMap::new();
                for (outlet, entry) in map {
                    normalized.insert(outlet, entry.map(normalize_outlet_commands));
                }
                res.push(Command::Outlets(normalized));
            }
            Command::Params(params) => res.push(Command::Params(params)),
            Command::Path(path) => {
                for (part_idx, part) in path.split('/').enumerate() {
                    if idx == 0 && part_idx == 0 && part == "." {
                        continue;
                    }
                    if idx == 0 && part_idx == 0 && part.is_empty() {
                        is_absolute = true;
                        continue;
                    }
                    if part == ".." {
                        if res.is_empty() {
                            double_dots += 1;
                            continue;
                        }
                    }
                    if !part.is_empty() {
                        res.push(Command::Path(part.to_owned()));
                    }
                }
            }
        }
    }

    if is_absolute && res.first().map(Command::is_params).unwrap_or(false) {
        return Err(RouterError::InvalidCommands(
            "root segment cannot have matrix parameters".to_owned(),
        ));
    }

    Ok(Navigation {
        is_absolute,
        double_dots,
        commands: res,
    })
}

fn normalize_outlet_commands(commands: Vec<Command>) -> Vec<Command> {
    let mut res = Vec::new();
    for command in commands {
        match command {
            Command::Path(path) => {
                for part in path.split('/') {
                    if !part.is_empty() {
                        res.push(Command::Path(part.to_owned()));
                    }
                }
            }
            other => res.push(other),
        }
    }
    res
}

struct Position {
    group: Rc<UrlSegmentGroup>,
    process_children: bool,
    index: usize,
}

fn find_starting_position(
    nav: &Navigation,
    url_tree: &UrlTree,
    relative_to: &Rc<ActivatedRouteSnapshot>,
) -> Result<Position, RouterError> {
    if nav.is_absolute {
        return Ok(Position {
            group: url_tree.root.clone(),
            process_children: true,
            index: 0,
        });
    }

    let source = relative_to
        .source_group
        .borrow()
        .clone()
        .unwrap_or_else(|| url_tree.root.clone());

    if relative_to.last_path_index.get() == -1 {
        return Ok(Position {
            group: source,
            process_children: true,
            index: 0,
        });
    }

    let modifier = if nav.commands.first().map(Command::is_params).unwrap_or(false) {
        0
    } else {
        1
    };
    let index = relative_to.last_path_index.get() + modifier;
    apply_double_dots(source, index, nav.double_dots)
}

fn apply_double_dots(
    group: Rc<UrlSegmentGroup>,
    mut index: isize,
    mut double_dots: usize,
) -> Result<Position, RouterError> {
    let mut group = group;
    while double_dots as isize > index {
        double_dots -= index.max(0) as usize;
        group = group.parent().ok_or_else(|| {
            RouterError::InvalidCommands("invalid number of '../'".to_owned())
        })?;
        index = group.segments.len() as isize;
    }
    Ok(Position {
        group,
        process_children: false,
        index: (index - double_dots as isize).max(0) as usize,
    })
}

fn tree(
    old_group: &Rc<UrlSegmentGroup>,
    new_group: Rc<UrlSegmentGroup>,
    url_tree: &UrlTree,
    query_params: QueryParams,
    fragment: Option<String>,
) -> UrlTree {
    let root = if Rc::ptr_eq(&url_tree.root, old_group) {
        new_group
    } else {
        replace_segment(&url_tree.root, old_group, &new_group)
    };
    UrlTree::new(root, query_params, fragment)
}

fn replace_segment(
    current: &Rc<UrlSegmentGroup>,
    old_group: &Rc<UrlSegmentGroup>,
    new_group: &Rc<UrlSegmentGroup>,
) -> Rc<UrlSegmentGroup> {
    let mut children = LinkedHashMap::new();
    for (outlet, child) in current.children().iter() {
        if Rc::ptr_eq(child, old_group) {
            children.insert(outlet.clone(), new_group.clone());
        } else {
            children.insert(outlet.clone(), replace_segment(child, old_group, new_group));
        }
    }
    UrlSegmentGroup::new(current.segments.clone(), children)
}

fn update_segment_group(
    group: Option<Rc<UrlSegmentGroup>>,
    start_index: usize,
    commands: &[Command],
) -> Rc<UrlSegmentGroup> {
    let group = group.unwrap_or_else(UrlSegmentGroup::empty);
    if group.segments.is_empty() && group.has_children() {
        return update_segment_group_children(&group, start_index, commands);
    }

    let m = prefixed_with(&group, start_index, commands);
    let sliced = &commands[m.command_index..];

    if m.matched && m.path_index < group.segments.len() {
        let prefix = UrlSegmentGroup::new(group.segments[..m.path_index].to_vec(), {
            let mut children = LinkedHashMap::new();
            children.insert(
                PRIMARY_OUTLET.to_owned(),
                UrlSegmentGroup::new(
                    group.segments[m.path_index..].to_vec(),
                    group.children().clone(),
                ),
            );
            children
        });
        update_segment_group_children(&prefix, 0, sliced)
    } else if m.matched && sliced.is_empty() {
        UrlSegmentGroup::new(group.segments.clone(), LinkedHashMap::new())
    } else if m.matched && !group.has_children() {
        create_new_segment_group(&group, start_index, commands)
    } else if m.matched {
        update_segment_group_children(&group, 0, sliced)
    } else {
        create_new_segment_group(&group, start_index, commands)
    }
}

fn update_segment_group_children(
    group: &Rc<UrlSegmentGroup>,
    start_index: usize,
    commands: &[Command],
) -> Rc<UrlSegmentGroup> {
    if commands.is_empty() {
        return UrlSegmentGroup::new(group.segments.clone(), LinkedHashMap::new());
    }

    let outlets = outlets_of(commands);
    let mut children = LinkedHashMap::new();
    for (outlet, outlet_commands) in outlets.iter() {
        if let Some(outlet_commands) = outlet_commands {
            let child = update_segment_group(
                group.child(outlet).cloned(),
                start_index,
                outlet_commands,
            );
            children.insert(outlet.clone(), child);
        }
    }
    for (outlet, child) in group.children().iter() {
        if !outlets.contains_key(outlet) {
            children.insert(outlet.clone(), child.clone());
        }
    }
    UrlSegmentGroup::new(group.segments.clone(), children)
}

/// Maps the command list onto outlet names: an outlets directive supplies
/// the map; anything else targets the primary outlet.
fn outlets_of(commands: &[Command]) -> LinkedHashMap<String, Option<Vec<Command>>> {
    if let Some(Command::Outlets(map)) = commands.first() {
        return map.clone();
    }
    let mut map = LinkedHashMap::new();
    map.insert(PRIMARY_OUTLET.to_owned(), Some(commands.to_vec()));
    map
}

struct Prefix {
    matched: bool,
    path_index: usize,
    command_index: usize,
}

const NO_MATCH: Prefix = Prefix {
    matched: false,
    path_index: 0,
    command_index: 0,
};

fn prefixed_with(group: &Rc<UrlSegmentGroup>, start_index: usize, commands: &[Command]) -> Prefix {
    let mut command_index = 0;
    let mut path_index = start_index;

    while path_index < group.segments.len() {
        if command_index >= commands.len() {
            return NO_MATCH;
        }
        let segment = &group.segments[path_index];
        let Some(current) = commands[command_index].path() else {
            // A non-path command interrupts the prefix walk.
            if path_index > start_index {
                break;
            }
            return NO_MATCH;
        };
        let next = commands.get(command_index + 1);

        match next {
            Some(Command::Params(params)) => {
                if !compare(current, Some(params), segment) {
                    return NO_MATCH;
                }
                command_index += 2;
            }
            _ => {
                if !compare(current, None, segment) {
                    return NO_MATCH;
                }
                command_index += 1;
            }
        }
        path_index += 1;
    }

    Prefix {
        matched: true,
        path_index,
        command_index,
    }
}

fn compare(path: &str, params: Option<&Params>, segment: &UrlSegment) -> bool {
    let empty = Params::new();
    let params = params.unwrap_or(&empty);
    path == segment.path && *params == segment.parameters
}

fn create_new_segment_group(
    group: &Rc<UrlSegmentGroup>,
    start_index: usize,
    commands: &[Command],
) -> Rc<UrlSegmentGroup> {
    let mut paths = group.segments[..start_index.min(group.segments.len())].to_vec();
    let mut i = 0;
    while i < commands.len() {
        if let Command::Outlets(outlets) = &commands[i] {
            let children = create_new_segment_children(outlets);
            return UrlSegmentGroup::new(paths, children);
        }

        // A leading params object re-decorates the segment at the anchor.
        if i == 0 && commands[0].is_params() {
            if let (Command::Params(params), Some(segment)) =
                (&commands[0], group.segments.get(start_index))
            {
                paths.push(UrlSegment::new(segment.path.clone(), params.clone()));
            }
            i += 1;
            continue;
        }

        let Some(current) = commands[i].path() else {
            i += 1;
            continue;
        };
        match commands.get(i + 1) {
            Some(Command::Params(params)) => {
                paths.push(UrlSegment::new(current, params.clone()));
                i += 2;
            }
            _ => {
                paths.push(UrlSegment::bare(current));
                i += 1;
            }
        }
    }
    UrlSegmentGroup::new(paths, LinkedHashMap::new())
}

fn create_new_segment_children(
    outlets: &LinkedHashMap<String, Option<Vec<Command>>>,
) -> LinkedHashMap<String, Rc<UrlSegmentGroup>> {
    let mut children = LinkedHashMap::new();
    for (outlet, commands) in outlets.iter() {
        if let Some(commands) = commands {
            children.insert(
                outlet.clone(),
                create_new_segment_group(&UrlSegmentGroup::empty(), 0, commands),
            );
        }
    }
    children
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataMap;
    use crate::state::ActivatedRouteSnapshot;
    use crate::url::serializer::{parse_url, serialize_url};

    /// A snapshot anchored at `group` with the given last path index, the
    /// way recognition would record it.
    fn anchored(group: &Rc<UrlSegmentGroup>, last_path_index: isize) -> Rc<ActivatedRouteSnapshot> {
        let ars = ActivatedRouteSnapshot::new(
            Vec::new(),
            Params::new(),
            QueryParams::new(),
            None,
            DataMap::new(),
            PRIMARY_OUTLET.to_owned(),
            None,
            None,
            group.clone(),
            last_path_index,
            LinkedHashMap::new(),
        );
        ars
    }

    fn root_anchor(tree: &UrlTree) -> Rc<ActivatedRouteSnapshot> {
        anchored(&tree.root, -1)
    }

    fn build(
        tree_url: &str,
        relative: &Rc<ActivatedRouteSnapshot>,
        commands: Vec<Command>,
    ) -> String {
        let tree = parse_url(tree_url).unwrap();
        let new_tree = create_url_tree(relative, &tree, commands, QueryParams::new(), None)
            .unwrap();
        serialize_url(&new_tree)
    }

    #[test]
    fn empty_commands_keep_the_tree() {
        let tree = parse_url("/a/b?x=1").unwrap();
        let out = create_url_tree(
            &root_anchor(&tree),
            &tree,
            Vec::new(),
            tree.query_params.clone(),
            None,
        )
        .unwrap();
        assert_eq!(serialize_url(&out), "/a/b?x=1");
    }

    #[test]
    fn absolute_navigation_replaces_the_tree() {
        let tree = parse_url("/one/two").unwrap();
        let anchor = root_anchor(&tree);
        assert_eq!(build("/one/two", &anchor, vec!["/three/four".into()]), "/three/four");
        assert_eq!(build("/one/two", &anchor, vec!["/".into()]), "/");
    }

    #[test]
    fn relative_navigation_appends_below_the_anchor() {
        let tree = parse_url("/team/33").unwrap();
        let primary = tree.root.child(PRIMARY_OUTLET).unwrap().clone();
        // Anchored after `33`, as a route consuming both segments would be.
        let anchor = anchored(&primary, 1);
        let out = create_url_tree(
            &anchor,
            &tree,
            vec!["user".into(), "victor".into()],
            QueryParams::new(),
            None,
        )
        .unwrap();
        assert_eq!(serialize_url(&out), "/team/33/user/victor");
    }

    #[test]
    fn double_dots_pop_path_indices() {
        let tree = parse_url("/team/33/user/bob").unwrap();
        let primary = tree.root.child(PRIMARY_OUTLET).unwrap().clone();

        // Anchored at the leaf (after `bob`): one `..` replaces `bob`.
        let leaf_anchor = anchored(&primary, 3);
        assert_eq!(
            build("/team/33/user/bob", &leaf_anchor, vec!["../22".into()]),
            "/team/33/user/22"
        );

        // Anchored after `33`: two `..` pop back to the root, so the
        // commands rebuild the whole primary chain.
        let team_anchor = anchored(&primary, 1);
        assert_eq!(
            build(
                "/team/33/user/bob",
                &team_anchor,
                vec!["../../team/44/user/22".into()]
            ),
            "/team/44/user/22"
        );
    }

    #[test]
    fn too_many_double_dots_fail() {
        let tree = parse_url("/a").unwrap();
        let primary = tree.root.child(PRIMARY_OUTLET).unwrap().clone();
        let anchor = anchored(&primary, 0);
        let err = create_url_tree(
            &anchor,
            &tree,
            vec!["../../../x".into()],
            QueryParams::new(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, RouterError::InvalidCommands(_)));
    }

    #[test]
    fn matrix_params_attach_to_the_preceding_atom() {
        let tree = parse_url("/").unwrap();
        let anchor = root_anchor(&tree);
        let out = build(
            "/",
            &anchor,
            vec!["team".into(), Command::params(&[("id", "33")]), "user".into()],
        );
        assert_eq!(out, "/team;id=33/user");
    }

    #[test]
    fn outlets_directive_rewrites_named_children() {
        let tree = parse_url("/inbox/33(popup:compose)").unwrap();
        let anchor = root_anchor(&tree);
        let out = build(
            "/inbox/33(popup:compose)",
            &anchor,
            vec![Command::outlets(vec![(
                "popup",
                Some(vec!["reply".into()]),
            )])],
        );
        assert_eq!(out, "/inbox/33(popup:reply)");
    }

    #[test]
    fn a_null_outlet_entry_removes_the_outlet() {
        let tree = parse_url("/inbox/33(popup:compose)").unwrap();
        let anchor = root_anchor(&tree);
        let out = build(
            "/inbox/33(popup:compose)",
            &anchor,
            vec![Command::outlets(vec![("popup", None)])],
        );
        assert_eq!(out, "/inbox/33");
    }

    #[test]
    fn outlets_directive_must_be_last() {
        let err = compute_navigation(vec![
            Command::outlets(vec![("popup", Some(vec!["x".into()]))]),
            "y".into(),
        ])
        .unwrap_err();
        assert!(matches!(err, RouterError::InvalidCommands(_)));
    }

    #[test]
    fn absolute_matrix_params_first_is_rejected() {
        let err = compute_navigation(vec![
            "/".into(),
            Command::params(&[("k", "v")]),
        ])
        .unwrap_err();
        assert!(matches!(err, RouterError::InvalidCommands(_)));
    }

    #[test]
    fn command_mismatch_rebuilds_from_the_divergence_point() {
        let tree = parse_url("/a/b/c").unwrap();
        let anchor = root_anchor(&tree);
        let out = build("/a/b/c", &anchor, vec!["/a/b/d".into()]);
        assert_eq!(out, "/a/b/d");
    }
}
