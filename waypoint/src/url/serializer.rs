//! Serialization of [`UrlTree`]s back into URL strings, and the pluggable
//! serializer seam.
//!
//! `serialize` and `parse` are inverses up to normalization: an empty query
//! emits nothing, a missing fragment emits nothing, and every component is
//! re-encoded from its decoded form. Serializing a freshly parsed URL is
//! therefore the canonical spelling of that URL.

use std::rc::Rc;

use crate::error::ParseError;
use crate::url::{encoding, parser, QueryValue, UrlSegment, UrlSegmentGroup, UrlTree, PRIMARY_OUTLET};

/// Parses and serializes URL strings.
///
/// The default implementation understands the routable URL grammar
/// (secondary outlets in parentheses, matrix and query parameters, and a
/// fragment). Installing a custom implementation changes how every URL
/// entering or leaving the router is spelled.
pub trait UrlSerializer {
    /// Parses a URL string into a [`UrlTree`].
    fn parse(&self, url: &str) -> Result<UrlTree, ParseError>;

    /// Serializes a [`UrlTree`] into a URL string.
    fn serialize(&self, tree: &UrlTree) -> String;
}

/// The canonical serializer for the routable URL grammar.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultUrlSerializer;

impl UrlSerializer for DefaultUrlSerializer {
    fn parse(&self, url: &str) -> Result<UrlTree, ParseError> {
        parser::parse(url)
    }

    fn serialize(&self, tree: &UrlTree) -> String {
        serialize_url(tree)
    }
}

/// Parses a URL string with the default grammar.
pub fn parse_url(url: &str) -> Result<UrlTree, ParseError> {
    parser::parse(url)
}

/// Serializes a tree with the default grammar.
pub fn serialize_url(tree: &UrlTree) -> String {
    let segment = serialize_segment_group(&tree.root, true);
    let query = serialize_query_params(&tree.query_params);
    let fragment = tree
        .fragment
        .as_deref()
        .map(|f| format!("#{}", encoding::encode_uri_fragment(f)))
        .unwrap_or_default();
    format!("/{segment}{query}{fragment}")
}

/// Serializes one segment: encoded path plus matrix parameters.
pub(crate) fn serialize_path(segment: &UrlSegment) -> String {
    let mut out = encoding::encode_uri_segment(&segment.path);
    for (k, v) in segment.parameters.iter() {
        out.push(';');
        out.push_str(&encoding::encode_uri_segment(k));
        out.push('=');
        out.push_str(&encoding::encode_uri_segment(v));
    }
    out
}

/// Serializes just the sibling segments of a group, used in diagnostics.
pub(crate) fn serialize_paths(group: &UrlSegmentGroup) -> String {
    group
        .segments
        .iter()
        .map(serialize_path)
        .collect::<Vec<_>>()
        .join("/")
}

fn serialize_segment_group(group: &Rc<UrlSegmentGroup>, root: bool) -> String {
    if group.has_children() && root {
        let primary = group
            .child(PRIMARY_OUTLET)
            .map(|c| serialize_segment_group(c, false))
            .unwrap_or_default();
        let children: Vec<String> = group
            .children()
            .iter()
            .filter(|(outlet, _)| outlet.as_str() != PRIMARY_OUTLET)
            .map(|(outlet, child)| format!("{outlet}:{}", serialize_segment_group(child, false)))
            .collect();
        if children.is_empty() {
            primary
        } else {
            format!("{primary}({})", children.join("//"))
        }
    } else if group.has_children() {
        let children: Vec<String> = group
            .children()
            .iter()
            .map(|(outlet, child)| {
                if outlet.as_str() == PRIMARY_OUTLET {
                    serialize_segment_group(child, false)
                } else {
                    format!("{outlet}:{}", serialize_segment_group(child, false))
                }
            })
            .collect();
        format!("{}/({})", serialize_paths(group), children.join("//"))
    } else {
        serialize_paths(group)
    }
}

fn serialize_query_params(params: &crate::url::QueryParams) -> String {
    let mut parts = Vec::new();
    for (k, v) in params.iter() {
        let key = encoding::encode_uri_query(k);
        match v {
            QueryValue::One(value) => {
                parts.push(format!("{key}={}", encoding::encode_uri_query(value)));
            }
            QueryValue::Many(values) => {
                for value in values {
                    parts.push(format!("{key}={}", encoding::encode_uri_query(value)));
                }
            }
        }
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("?{}", parts.join("&"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(url: &str) {
        let tree = parse_url(url).unwrap();
        assert_eq!(serialize_url(&tree), url, "round trip of {url:?}");
    }

    #[test]
    fn round_trips_plain_paths() {
        round_trip("/");
        round_trip("/one");
        round_trip("/one/two/three");
    }

    #[test]
    fn round_trips_matrix_and_query_params() {
        round_trip("/team;id=33/user;name=bob");
        round_trip("/one/two?a=1&b=2");
        round_trip("/one?k=1&k=2&j=3");
    }

    #[test]
    fn round_trips_secondary_outlets() {
        round_trip("/inbox/33(popup:compose)?debug=true#frag");
        round_trip("/inbox/33/(popup:compose)");
        round_trip("/a/(b//left:c)");
        round_trip("/(popup:compose)");
    }

    #[test]
    fn parse_then_serialize_is_structural_identity() {
        for url in [
            "/inbox/33(popup:compose)?debug=true#frag",
            "/team;id=33/user;name=bob",
            "/a/(b//left:c)?x=1&x=2",
        ] {
            let once = parse_url(url).unwrap();
            let twice = parse_url(&serialize_url(&once)).unwrap();
            assert_eq!(once, twice, "for {url:?}");
        }
    }

    #[test]
    fn empty_query_and_fragment_emit_nothing() {
        let tree = parse_url("/one?#").unwrap();
        assert_eq!(serialize_url(&tree), "/one#");
    }

    #[test]
    fn encodes_reserved_characters_in_segments() {
        let mut params = crate::url::Params::new();
        params.insert("k".to_owned(), "a/b".to_owned());
        let group = UrlSegmentGroup::new(
            vec![UrlSegment::new("one two", params)],
            linked_hash_map::LinkedHashMap::new(),
        );
        let mut children = linked_hash_map::LinkedHashMap::new();
        children.insert(PRIMARY_OUTLET.to_owned(), group);
        let tree = UrlTree::new(
            UrlSegmentGroup::new(Vec::new(), children),
            crate::url::QueryParams::new(),
            None,
        );
        assert_eq!(serialize_url(&tree), "/one%20two;k=a%2Fb");
    }
}
