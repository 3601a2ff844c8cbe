//! Identifier sanitization for derived column names.
//!
//! Derived columns must be valid identifiers for downstream modelling code,
//! so raw level strings and origin names are normalized before they become
//! part of a column name.

use std::collections::HashMap;

/// Sanitize a raw string into an identifier fragment.
///
/// Rules: ASCII letters are lowercased, every non-alphanumeric character
/// maps to `_`, a leading `-` becomes the prefix `minus_`, a leading digit
/// gains the prefix `x_`, and runs of `_` collapse to one.
pub fn sanitize_identifier(raw: &str) -> String {
    let (negative, rest) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };

    let mut out = String::with_capacity(rest.len() + 8);
    if negative {
        out.push_str("minus_");
    }
    let mut last_underscore = negative;
    for ch in rest.chars() {
        let mapped = if ch.is_ascii_alphanumeric() {
            ch.to_ascii_lowercase()
        } else {
            '_'
        };
        if mapped == '_' {
            if last_underscore {
                continue;
            }
            last_underscore = true;
        } else {
            last_underscore = false;
        }
        out.push(mapped);
    }

    if out.is_empty() {
        out.push('x');
    }
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert_str(0, "x_");
    }
    out
}

/// Hands out derived names, resolving post-sanitization collisions by
/// appending `_2`, `_3`, ...
#[derive(Debug, Default)]
pub struct NameRegistry {
    seen: HashMap<String, usize>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a name without handing it out, so later claims avoid it.
    pub fn reserve(&mut self, name: &str) {
        self.seen.entry(name.to_string()).or_insert(1);
    }

    pub fn claim(&mut self, base: &str) -> String {
        match self.seen.get_mut(base) {
            None => {
                self.seen.insert(base.to_string(), 1);
                base.to_string()
            }
            Some(count) => {
                *count += 1;
                let mut n = *count;
                loop {
                    let candidate = format!("{base}_{n}");
                    if !self.seen.contains_key(&candidate) {
                        self.seen.insert(candidate.clone(), 1);
                        return candidate;
                    }
                    n += 1;
                }
            }
        }
    }
}
