//! Recursive-descent parser for the routable URL grammar.
//!
//! The grammar, informally:
//!
//! ```plain
//! url        = "/"? children ("?" query)? ("#" fragment)?
//! children   = segment ("/" segment)* ("/(" group ")")?
//!            | "(" group ")"
//! group      = block ("//" block)*
//! block      = (outlet ":")? children
//! segment    = path (";" key ("=" value)?)*
//! query      = key ("=" value)? ("&" key ("=" value)?)*
//! ```
//!
//! A segment path token is any run of characters outside `/()?;=#`; a query
//! key is any run outside `=?&#`; a query value any run outside `?&#`.

use linked_hash_map::LinkedHashMap;

use crate::error::ParseError;
use crate::url::{encoding, Params, QueryParams, UrlSegment, UrlSegmentGroup, UrlTree};

use std::rc::Rc;

/// Parses a full URL string into a [`UrlTree`].
pub(crate) fn parse(url: &str) -> Result<UrlTree, ParseError> {
    let mut p = Parser::new(url);
    let root = p.parse_root_segment()?;
    let query_params = p.parse_query_params()?;
    let fragment = p.parse_fragment();
    Ok(UrlTree::new(root, query_params, fragment))
}

struct Parser<'a> {
    remaining: &'a str,
}

impl<'a> Parser<'a> {
    fn new(url: &'a str) -> Parser<'a> {
        Parser { remaining: url }
    }

    fn parse_root_segment(&mut self) -> Result<Rc<UrlSegmentGroup>, ParseError> {
        self.consume_optional("/");
        if self.remaining.is_empty() || self.peek_starts_with("?") || self.peek_starts_with("#") {
            return Ok(UrlSegmentGroup::empty());
        }
        // The root never owns segments itself; the path lands in children.
        let children = self.parse_children()?;
        Ok(UrlSegmentGroup::new(Vec::new(), children))
    }

    fn parse_children(
        &mut self,
    ) -> Result<LinkedHashMap<String, Rc<UrlSegmentGroup>>, ParseError> {
        if self.remaining.is_empty() {
            return Ok(LinkedHashMap::new());
        }
        self.consume_optional("/");

        let mut segments = Vec::new();
        if !self.peek_starts_with("(") {
            segments.push(self.parse_segment()?);
            while self.peek_starts_with("/")
                && !self.peek_starts_with("//")
                && !self.peek_starts_with("/(")
            {
                self.capture("/")?;
                segments.push(self.parse_segment()?);
            }
        }

        let mut children = LinkedHashMap::new();
        if self.peek_starts_with("/(") {
            self.capture("/")?;
            children = self.parse_parens(true)?;
        }

        let mut res = LinkedHashMap::new();
        if self.peek_starts_with("(") {
            res = self.parse_parens(false)?;
        }

        if !segments.is_empty() || !children.is_empty() {
            res.insert(
                crate::url::PRIMARY_OUTLET.to_owned(),
                UrlSegmentGroup::new(segments, children),
            );
        }
        Ok(res)
    }

    fn parse_segment(&mut self) -> Result<UrlSegment, ParseError> {
        let path = match_segment_token(self.remaining);
        if path.is_empty() && self.peek_starts_with(";") {
            return Err(ParseError::EmptyPathWithParams {
                rest: self.remaining.to_owned(),
            });
        }
        let path = path.to_owned();
        self.capture(&path)?;
        let parameters = self.parse_matrix_params()?;
        Ok(UrlSegment::new(encoding::decode(&path), parameters))
    }

    fn parse_matrix_params(&mut self) -> Result<Params, ParseError> {
        let mut params = Params::new();
        while self.consume_optional(";") {
            self.parse_param(&mut params)?;
        }
        Ok(params)
    }

    fn parse_param(&mut self, params: &mut Params) -> Result<(), ParseError> {
        let key = match_segment_token(self.remaining).to_owned();
        if key.is_empty() {
            return Ok(());
        }
        self.capture(&key)?;
        let mut value = String::new();
        if self.consume_optional("=") {
            let value_match = match_segment_token(self.remaining).to_owned();
            if !value_match.is_empty() {
                self.capture(&value_match)?;
                value = value_match;
            }
        }
        params.insert(encoding::decode(&key), encoding::decode(&value));
        Ok(())
    }

    fn parse_query_params(&mut self) -> Result<QueryParams, ParseError> {
        let mut params = QueryParams::new();
        if self.consume_optional("?") {
            loop {
                self.parse_query_param(&mut params)?;
                if !self.consume_optional("&") {
                    break;
                }
            }
        }
        Ok(params)
    }

    fn parse_query_param(&mut self, params: &mut QueryParams) -> Result<(), ParseError> {
        let key = match_query_key(self.remaining).to_owned();
        if key.is_empty() {
            return Ok(());
        }
        self.capture(&key)?;
        let mut value = String::new();
        if self.consume_optional("=") {
            let value_match = match_query_value(self.remaining).to_owned();
            if !value_match.is_empty() {
                self.capture(&value_match)?;
                value = value_match;
            }
        }

        let decoded_key = encoding::decode_query(&key);
        let decoded_value = encoding::decode_query(&value);
        match params.get_mut(&decoded_key) {
            Some(existing) => existing.push(decoded_value),
            None => {
                params.insert(decoded_key, crate::url::QueryValue::One(decoded_value));
            }
        }
        Ok(())
    }

    fn parse_fragment(&mut self) -> Option<String> {
        if self.consume_optional("#") {
            let fragment = encoding::decode(self.remaining);
            self.remaining = "";
            Some(fragment)
        } else {
            None
        }
    }

    fn parse_parens(
        &mut self,
        allow_primary: bool,
    ) -> Result<LinkedHashMap<String, Rc<UrlSegmentGroup>>, ParseError> {
        let mut groups = LinkedHashMap::new();
        self.capture("(")?;

        while !self.consume_optional(")") && !self.remaining.is_empty() {
            let path = match_segment_token(self.remaining).to_owned();

            let next = self.remaining.as_bytes().get(path.len()).copied();
            if !matches!(next, Some(b'/') | Some(b')') | Some(b';')) {
                return Err(ParseError::Malformed {
                    rest: self.remaining.to_owned(),
                });
            }

            let mut outlet_name = String::new();
            if let Some(idx) = path.find(':') {
                outlet_name = path[..idx].to_owned();
                self.capture(&outlet_name)?;
                self.capture(":")?;
            } else if allow_primary {
                outlet_name = crate::url::PRIMARY_OUTLET.to_owned();
            }

            let children = self.parse_children()?;
            let group = if children.len() == 1 && children.contains_key(crate::url::PRIMARY_OUTLET)
            {
                children
                    .get(crate::url::PRIMARY_OUTLET)
                    .cloned()
                    .expect("primary child checked above")
            } else {
                UrlSegmentGroup::new(Vec::new(), children)
            };
            groups.insert(outlet_name, group);

            self.consume_optional("//");
        }
        Ok(groups)
    }

    fn peek_starts_with(&self, s: &str) -> bool {
        self.remaining.starts_with(s)
    }

    fn consume_optional(&mut self, s: &str) -> bool {
        if self.remaining.starts_with(s) {
            self.remaining = &self.remaining[s.len()..];
            true
        } else {
            false
        }
    }

    fn capture(&mut self, s: &str) -> Result<(), ParseError> {
        if !self.consume_optional(s) {
            return Err(ParseError::Expected {
                expected: s.to_owned(),
                rest: self.remaining.to_owned(),
            });
        }
        Ok(())
    }
}

/// Longest prefix of `s` containing no `/ ( ) ? ; = #`.
fn match_segment_token(s: &str) -> &str {
    let end = s
        .find(|c| matches!(c, '/' | '(' | ')' | '?' | ';' | '=' | '#'))
        .unwrap_or(s.len());
    &s[..end]
}

/// Longest prefix of `s` containing no `= ? & #`.
fn match_query_key(s: &str) -> &str {
    let end = s
        .find(|c| matches!(c, '=' | '?' | '&' | '#'))
        .unwrap_or(s.len());
    &s[..end]
}

/// Longest prefix of `s` containing no `? & #`.
fn match_query_value(s: &str) -> &str {
    let end = s.find(|c| matches!(c, '?' | '&' | '#')).unwrap_or(s.len());
    &s[..end]
}
