//! Path pattern matching for the HTTP-style paths spec §6 lists
//! (`/projects/:id/sessions/:sid`, ...). Segments starting with `:` bind a
//! named parameter; every other segment must match literally.

use std::collections::HashMap;

/// A compiled path pattern, e.g. `/projects/:id/sessions/:sid`.
#[derive(Clone, Debug)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

#[derive(Clone, Debug)]
enum Segment {
    Literal(String),
    Param(String),
}

impl PathPattern {
    /// Compile a pattern string. Leading/trailing slashes are ignored.
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        let segments = pattern
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Param(name.to_owned()),
                None => Segment::Literal(s.to_owned()),
            })
            .collect();
        Self { segments }
    }

    /// Match a concrete request path against this pattern, returning the
    /// bound parameters on success.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts.iter()) {
            match segment {
                Segment::Literal(expected) => {
                    if expected != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let _ = params.insert(name.clone(), (*part).to_owned());
                }
            }
        }
        Some(params)
    }
}
