//! Percent encoding and decoding for the routable URL grammar.
//!
//! Each part of a URL keeps a different set of characters literal, so each
//! part gets its own `AsciiSet`. Decoding is deliberately more permissive
//! than encoding: any percent sequence is decoded, which makes
//! serialize-after-parse the canonical form of a URL.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters kept literal everywhere a URI component is emitted: the
/// unreserved set plus `@`, `:`, `$` and `,`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'@')
    .remove(b':')
    .remove(b'$')
    .remove(b',');

/// Query keys and values additionally keep `;` literal.
const QUERY: &AsciiSet = &URI_COMPONENT.remove(b';');

/// Path segments and matrix parameter keys/values must escape the outlet
/// grouping parentheses, and keep `&` literal.
const SEGMENT: &AsciiSet = &URI_COMPONENT.add(b'(').add(b')').remove(b'&');

/// The fragment uses whole-URI encoding: reserved URI punctuation stays
/// literal.
const FRAGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b';')
    .remove(b',')
    .remove(b'/')
    .remove(b'?')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$')
    .remove(b'#');

/// Encodes a path segment or a matrix parameter key/value.
pub fn encode_uri_segment(s: &str) -> String {
    utf8_percent_encode(s, SEGMENT).to_string()
}

/// Encodes a query parameter key or value.
pub fn encode_uri_query(s: &str) -> String {
    utf8_percent_encode(s, QUERY).to_string()
}

/// Encodes the fragment.
pub fn encode_uri_fragment(s: &str) -> String {
    utf8_percent_encode(s, FRAGMENT).to_string()
}

/// Decodes any percent-encoded component. Invalid UTF-8 in the decoded
/// bytes is replaced rather than rejected.
pub fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// Decodes a query value: `+` means space in query strings.
pub fn decode_query(s: &str) -> String {
    decode(&s.replace('+', "%20"))
}
