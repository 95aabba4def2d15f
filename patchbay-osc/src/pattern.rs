//! OSC address pattern matching: `?`, `*`, `[...]` character classes,
//! and `{a,b,c}` alternatives, matched against a literal address one path
//! segment's characters at a time — patterns never cross a `/` boundary.
//!
//! Exact literal match is case-sensitive with no implicit trailing-slash
//! equivalence, `?` matches exactly one non-`/` character, `*` matches zero
//! or more non-`/` characters, character classes never match `/`, and an
//! empty `[]` matches nothing.

use patchbay_types::{ErrorKind, PatchbayError};

/// Validate a pattern at registration time: unmatched `[` or `{` is
/// rejected before being stored in the method registry. Matching itself
/// (`matches`) never errors.
pub fn validate_pattern(pattern: &str) -> Result<(), PatchbayError> {
    let mut depth_bracket = 0i32;
    let mut depth_brace = 0i32;
    for c in pattern.chars() {
        match c {
            '[' => depth_bracket += 1,
            ']' => depth_bracket -= 1,
            '{' => depth_brace += 1,
            '}' => depth_brace -= 1,
            _ => {}
        }
        if depth_bracket < 0 || depth_brace < 0 {
            return Err(PatchbayError::new(
                ErrorKind::PatternError,
                format!("unmatched closing bracket in pattern '{pattern}'"),
            ));
        }
    }
    if depth_bracket != 0 {
        return Err(PatchbayError::new(
            ErrorKind::PatternError,
            format!("unclosed '[' in pattern '{pattern}'"),
        ));
    }
    if depth_brace != 0 {
        return Err(PatchbayError::new(
            ErrorKind::PatternError,
            format!("unclosed '{{' in pattern '{pattern}'"),
        ));
    }
    Ok(())
}

/// Whether `address` matches `pattern`. Both are treated as sequences of
/// characters; neither `?`, `*`, `[...]`, nor `{...}` ever match `/`.
pub fn matches(pattern: &str, address: &str) -> bool {
    match_from(
        &pattern.chars().collect::<Vec<_>>(),
        &address.chars().collect::<Vec<_>>(),
    )
}

fn match_from(pattern: &[char], address: &[char]) -> bool {
    match_at(pattern, 0, address, 0)
}

fn match_at(pattern: &[char], mut pi: usize, address: &[char], mut ai: usize) -> bool {
    loop {
        if pi == pattern.len() {
            return ai == address.len();
        }
        match pattern[pi] {
            '*' => {
                // Zero-or-more non-'/' characters: try every possible split
                // within the current path segment, shortest first.
                let max_skip = address[ai..]
                    .iter()
                    .position(|&c| c == '/')
                    .unwrap_or(address.len() - ai);
                for skip in 0..=max_skip {
                    if match_at(pattern, pi + 1, address, ai + skip) {
                        return true;
                    }
                }
                return false;
            }
            '?' => {
                if ai >= address.len() || address[ai] == '/' {
                    return false;
                }
                pi += 1;
                ai += 1;
            }
            '[' => {
                let close = find_matching(pattern, pi, '[', ']');
                let close = match close {
                    Some(c) => c,
                    None => return false,
                };
                if ai >= address.len() {
                    return false;
                }
                if !class_matches(&pattern[pi + 1..close], address[ai]) {
                    return false;
                }
                pi = close + 1;
                ai += 1;
            }
            '{' => {
                let close = match find_matching(pattern, pi, '{', '}') {
                    Some(c) => c,
                    None => return false,
                };
                let alternatives = split_alternatives(&pattern[pi + 1..close]);
                for alt in alternatives {
                    let mut candidate: Vec<char> = alt.clone();
                    candidate.extend_from_slice(&pattern[close + 1..]);
                    if match_at(&candidate, 0, address, ai) {
                        return true;
                    }
                }
                return false;
            }
            lit => {
                if ai >= address.len() || address[ai] != lit {
                    return false;
                }
                pi += 1;
                ai += 1;
            }
        }
    }
}

fn find_matching(pattern: &[char], open_idx: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 0i32;
    for (i, &c) in pattern.iter().enumerate().skip(open_idx) {
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

fn class_matches(class: &[char], c: char) -> bool {
    if c == '/' {
        return false;
    }
    if class.is_empty() {
        return false;
    }
    let (negate, class) = match class[0] {
        '!' | '^' => (true, &class[1..]),
        _ => (false, class),
    };
    let mut i = 0;
    let mut found = false;
    while i < class.len() {
        if i + 2 < class.len() && class[i + 1] == '-' {
            let (lo, hi) = (class[i], class[i + 2]);
            if lo <= c && c <= hi {
                found = true;
            }
            i += 3;
        } else {
            if class[i] == c {
                found = true;
            }
            i += 1;
        }
    }
    found != negate
}

fn split_alternatives(chars: &[char]) -> Vec<Vec<char>> {
    let mut result = Vec::new();
    let mut current = Vec::new();
    let mut depth = 0i32;
    for &c in chars {
        match c {
            '{' | '[' => {
                depth += 1;
                current.push(c);
            }
            '}' | ']' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                result.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    result.push(current);
    result
}
