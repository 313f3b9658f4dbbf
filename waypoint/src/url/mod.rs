//! The URL tree model.
//!
//! A URL string parses into a [`UrlTree`]: a tree of [`UrlSegmentGroup`]s
//! (one child per outlet name), query parameters and an optional fragment.
//! Trees are immutable once built; the navigation machinery derives new
//! trees rather than mutating existing ones, and unchanged subtrees are
//! shared between derived trees.

pub mod creation;
pub mod encoding;
pub mod parser;
pub mod serializer;

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use linked_hash_map::LinkedHashMap;

use crate::url::serializer::serialize_path;

/// The reserved name of the default outlet.
pub const PRIMARY_OUTLET: &str = "primary";

/// Ordered map of string parameters (matrix or positional).
pub type Params = LinkedHashMap<String, String>;

/// Ordered map of query parameters. Repeated keys accumulate into
/// [`QueryValue::Many`] in insertion order.
pub type QueryParams = LinkedHashMap<String, QueryValue>;

/// A query parameter value: single, or accumulated from repeated keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryValue {
    /// The key appeared once.
    One(String),
    /// The key appeared multiple times; values kept in insertion order.
    Many(Vec<String>),
}

impl QueryValue {
    /// The first value.
    pub fn first(&self) -> &str {
        match self {
            QueryValue::One(v) => v,
            QueryValue::Many(vs) => vs.first().map(String::as_str).unwrap_or(""),
        }
    }

    /// All values, in insertion order.
    pub fn all(&self) -> Vec<&str> {
        match self {
            QueryValue::One(v) => vec![v.as_str()],
            QueryValue::Many(vs) => vs.iter().map(String::as_str).collect(),
        }
    }

    pub(crate) fn push(&mut self, value: String) {
        match self {
            QueryValue::One(first) => {
                *self = QueryValue::Many(vec![std::mem::take(first), value]);
            }
            QueryValue::Many(vs) => vs.push(value),
        }
    }
}

impl From<&str> for QueryValue {
    fn from(v: &str) -> QueryValue {
        QueryValue::One(v.to_owned())
    }
}

impl From<String> for QueryValue {
    fn from(v: String) -> QueryValue {
        QueryValue::One(v)
    }
}

impl From<Vec<String>> for QueryValue {
    fn from(vs: Vec<String>) -> QueryValue {
        QueryValue::Many(vs)
    }
}

/// A read-only, order-preserving view over a parameter map, normalizing
/// single and repeated values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParamMap {
    map: LinkedHashMap<String, Vec<String>>,
}

impl ParamMap {
    pub(crate) fn from_params(params: &Params) -> ParamMap {
        let mut map = LinkedHashMap::new();
        for (k, v) in params.iter() {
            map.insert(k.clone(), vec![v.clone()]);
        }
        ParamMap { map }
    }

    pub(crate) fn from_query_params(params: &QueryParams) -> ParamMap {
        let mut map = LinkedHashMap::new();
        for (k, v) in params.iter() {
            map.insert(k.clone(), v.all().into_iter().map(str::to_owned).collect());
        }
        ParamMap { map }
    }

    /// True if the parameter is present.
    pub fn has(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// The first value of the parameter, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map
            .get(name)
            .and_then(|vs| vs.first())
            .map(String::as_str)
    }

    /// Every value of the parameter, in insertion order.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.map.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The parameter names, in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }
}

/// A single path segment: the decoded path text plus its matrix parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlSegment {
    /// The decoded path text.
    pub path: String,
    /// Matrix parameters attached with `;key=value`.
    pub parameters: Params,
}

impl UrlSegment {
    /// A segment with matrix parameters.
    pub fn new(path: impl Into<String>, parameters: Params) -> UrlSegment {
        UrlSegment {
            path: path.into(),
            parameters,
        }
    }

    /// A segment without matrix parameters.
    pub fn bare(path: impl Into<String>) -> UrlSegment {
        UrlSegment::new(path, Params::new())
    }

    /// Read-only view over the matrix parameters.
    pub fn parameter_map(&self) -> ParamMap {
        ParamMap::from_params(&self.parameters)
    }
}

impl fmt::Display for UrlSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&serialize_path(self))
    }
}

/// Bookkeeping recorded when matching rewrites a segment group: the group
/// it was derived from and how many segments the rewrite consumed. Relative
/// navigation resolves positions through this chain.
#[derive(Clone)]
pub(crate) struct SourceShift {
    pub(crate) group: Rc<UrlSegmentGroup>,
    pub(crate) shift: usize,
}

/// An ordered run of sibling segments plus one child group per outlet name.
///
/// Parent links are weak back-references wired when a group is installed as
/// a child; ownership always points root-to-leaf.
pub struct UrlSegmentGroup {
    /// The segments of this group, root-to-leaf order.
    pub segments: Vec<UrlSegment>,
    children: LinkedHashMap<String, Rc<UrlSegmentGroup>>,
    parent: RefCell<Weak<UrlSegmentGroup>>,
    pub(crate) source: RefCell<Option<SourceShift>>,
}

impl UrlSegmentGroup {
    /// Builds a group and wires each child's parent back-reference.
    pub fn new(
        segments: Vec<UrlSegment>,
        children: LinkedHashMap<String, Rc<UrlSegmentGroup>>,
    ) -> Rc<UrlSegmentGroup> {
        let group = Rc::new(UrlSegmentGroup {
            segments,
            children,
            parent: RefCell::new(Weak::new()),
            source: RefCell::new(None),
        });
        for child in group.children.values() {
            *child.parent.borrow_mut() = Rc::downgrade(&group);
        }
        group
    }

    /// A group with no segments and no children.
    pub fn empty() -> Rc<UrlSegmentGroup> {
        UrlSegmentGroup::new(Vec::new(), LinkedHashMap::new())
    }

    /// The child groups, keyed by outlet name, in insertion order.
    pub fn children(&self) -> &LinkedHashMap<String, Rc<UrlSegmentGroup>> {
        &self.children
    }

    /// The child group for an outlet, if any.
    pub fn child(&self, outlet: &str) -> Option<&Rc<UrlSegmentGroup>> {
        self.children.get(outlet)
    }

    /// True if at least one child outlet is present.
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Number of child outlets.
    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    /// The group this one is installed under, if it is not the root.
    pub fn parent(&self) -> Option<Rc<UrlSegmentGroup>> {
        self.parent.borrow().upgrade()
    }
}

impl PartialEq for UrlSegmentGroup {
    fn eq(&self, other: &UrlSegmentGroup) -> bool {
        self.segments == other.segments && self.children == other.children
    }
}

impl Eq for UrlSegmentGroup {}

impl fmt::Debug for UrlSegmentGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlSegmentGroup")
            .field("segments", &self.segments)
            .field("children", &self.children)
            .finish()
    }
}

/// A parsed URL: the root segment group, query parameters and fragment.
#[derive(Clone, PartialEq, Eq)]
pub struct UrlTree {
    /// The root segment group. Its own segment list is always empty; the
    /// URL path lives in its `primary` child chain.
    pub root: Rc<UrlSegmentGroup>,
    /// Query parameters, in insertion order.
    pub query_params: QueryParams,
    /// The decoded fragment, if one was present.
    pub fragment: Option<String>,
}

impl UrlTree {
    /// The tree of the root URL `/`.
    pub fn empty() -> UrlTree {
        UrlTree {
            root: UrlSegmentGroup::empty(),
            query_params: QueryParams::new(),
            fragment: None,
        }
    }

    pub(crate) fn new(
        root: Rc<UrlSegmentGroup>,
        query_params: QueryParams,
        fragment: Option<String>,
    ) -> UrlTree {
        UrlTree {
            root,
            query_params,
            fragment,
        }
    }

    /// Read-only view over the query parameters.
    pub fn query_param_map(&self) -> ParamMap {
        ParamMap::from_query_params(&self.query_params)
    }
}

impl fmt::Display for UrlTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&serializer::serialize_url(self))
    }
}

impl fmt::Debug for UrlTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UrlTree({self})")
    }
}

/// Compares segment lists by path and matrix parameters.
pub(crate) fn equal_segments(a: &[UrlSegment], b: &[UrlSegment]) -> bool {
    a == b
}

/// Compares segment lists by path only.
pub(crate) fn equal_path(a: &[UrlSegment], b: &[UrlSegment]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.path == y.path)
}

/// True if `container` contains `containee`: every path, matrix-free, of
/// `containee` is reachable through `container`. In `exact` mode the two
/// trees must be structurally equal, query parameters included.
pub fn contains_tree(container: &UrlTree, containee: &UrlTree, exact: bool) -> bool {
    if exact {
        container.query_params == containee.query_params && container.root == containee.root
    } else {
        contains_query_params(&container.query_params, &containee.query_params)
            && contains_segment_group(&container.root, &containee.root, &containee.root.segments)
    }
}

fn contains_query_params(container: &QueryParams, containee: &QueryParams) -> bool {
    containee
        .iter()
        .all(|(k, v)| container.get(k).map(|cv| cv == v).unwrap_or(false))
}

fn contains_segment_group(
    container: &Rc<UrlSegmentGroup>,
    containee: &Rc<UrlSegmentGroup>,
    containee_paths: &[UrlSegment],
) -> bool {
    if container.segments.len() > containee_paths.len() {
        let current = &container.segments[..containee_paths.len()];
        equal_path(current, containee_paths) && !containee.has_children()
    } else if container.segments.len() == containee_paths.len() {
        if !equal_path(&container.segments, containee_paths) {
            return false;
        }
        containee.children().iter().all(|(outlet, child)| {
            container
                .child(outlet)
                .map(|c| contains_segment_group(c, child, &child.segments))
                .unwrap_or(false)
        })
    } else {
        let current = &containee_paths[..container.segments.len()];
        let next = &containee_paths[container.segments.len()..];
        if !equal_path(&container.segments, current) {
            return false;
        }
        match container.child(PRIMARY_OUTLET) {
            Some(primary) => contains_segment_group(primary, containee, next),
            None => false,
        }
    }
}
