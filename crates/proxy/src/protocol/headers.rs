//! Ordered, case-insensitive HTTP header multimap.
//!
//! Header names are compared ASCII case-insensitively per
//! [RFC 7230 Section 3.2](https://tools.ietf.org/html/rfc7230#section-3.2);
//! non-ASCII bytes take part in comparisons unchanged. Entries keep their
//! insertion order, and distinct names are reported in the order of their
//! first insertion.

/// An ordered multimap of HTTP header name/value pairs.
///
/// Multiple values may be stored under one name. Lookup is
/// case-insensitive; iteration of distinct names happens in first-insertion
/// order and renders names in canonical case (`Title-Cased-By-Hyphen-Segment`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    // Entries in insertion order; names are stored case-folded so that
    // lookups need no further normalization.
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under the case-folded `name`, after any values
    /// already present for that name.
    pub fn insert<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        let mut name = name.into();
        name.make_ascii_lowercase();
        self.entries.push((name, value.into()));
    }

    /// Case-insensitive lookup. Values come back in insertion order; the
    /// list is empty when the name is absent.
    pub fn find(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Distinct names in first-insertion order, canonical-cased, each
    /// appearing at most once regardless of multiplicity.
    pub fn names(&self) -> Vec<String> {
        let mut result: Vec<String> = Vec::with_capacity(self.entries.len());
        for (name, _) in &self.entries {
            if !result.iter().any(|seen| seen.eq_ignore_ascii_case(name)) {
                result.push(canonicalize(name));
            }
        }
        result
    }

    /// Raw entries in insertion order, names as stored (case-folded).
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Total number of entries, counting duplicates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Renders a case-folded header name in canonical case: the first
/// alphabetic byte of each hyphen-separated segment is uppercased, every
/// other alphabetic byte lowercased, and non-alphabetic bytes pass through.
pub fn canonicalize(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut first = true;
    for c in name.chars() {
        if c.is_ascii_alphabetic() {
            if first {
                result.push(c.to_ascii_uppercase());
                first = false;
            } else {
                result.push(c.to_ascii_lowercase());
            }
        } else {
            if c == '-' {
                first = true;
            }
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_canonicalized() {
        let mut headers = Headers::new();
        headers.insert("foo", "bar");
        headers.insert("baz-qUX", "quuz");

        assert_eq!(headers.names(), vec!["Foo", "Baz-Qux"]);
    }

    #[test]
    fn multiple_insertions_of_one_name() {
        let mut headers = Headers::new();
        headers.insert("foo", "bar");
        headers.insert("Foo", "baz");
        headers.insert("FOO", "quux");

        assert_eq!(headers.names(), vec!["Foo"]);
        assert_eq!(headers.find("foo"), vec!["bar", "baz", "quux"]);
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn find_is_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain");

        assert_eq!(headers.find("content-type"), vec!["text/plain"]);
        assert_eq!(headers.find("CONTENT-TYPE"), vec!["text/plain"]);
        assert!(headers.find("content-length").is_empty());
    }

    #[test]
    fn distinct_names_keep_first_insertion_order() {
        let mut headers = Headers::new();
        headers.insert("b-header", "1");
        headers.insert("a-header", "2");
        headers.insert("B-Header", "3");

        assert_eq!(headers.names(), vec!["B-Header", "A-Header"]);
    }

    #[test]
    fn canonical_casing_passes_non_alphabetic_bytes_through() {
        assert_eq!(canonicalize("x-my-header2"), "X-My-Header2");
        assert_eq!(canonicalize("sec-ch-ua"), "Sec-Ch-Ua");
        assert_eq!(canonicalize("x--odd"), "X--Odd");
    }

    #[test]
    fn empty_headers() {
        let headers = Headers::new();
        assert!(headers.is_empty());
        assert_eq!(headers.len(), 0);
        assert!(headers.names().is_empty());
    }
}
