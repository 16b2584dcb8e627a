//! Glob matching for permission paths and hosts
//!
//! Patterns without `**` use single-segment globbing: `*` never crosses a
//! `/` and `?` matches one character. Patterns containing `**` are compiled
//! to an anchored regex where `**` matches across separators. Bracket
//! classes (`[ab]`, `[!a]`, `[a-z]`) match one non-separator character in
//! both forms, so `glob::Pattern::escape` output stays literal.
//!
//! Any pattern that fails to compile is a non-match.

use std::iter::Peekable;
use std::str::Chars;

use glob::{MatchOptions, Pattern};
use regex::Regex;

const SEGMENT_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Match `value` against `pattern`
///
/// `"**"` matches everything.
pub fn glob_match(pattern: &str, value: &str) -> bool {
    if pattern == "**" {
        return true;
    }

    if pattern.contains("**") {
        return match compile_recursive(pattern) {
            Some(regex) => regex.is_match(value),
            None => false,
        };
    }

    segment_match(pattern, value)
}

/// Single-segment glob match (`*` stops at `/`)
pub fn segment_match(pattern: &str, value: &str) -> bool {
    match Pattern::new(pattern) {
        Ok(compiled) => compiled.matches_with(value, SEGMENT_OPTIONS),
        Err(e) => {
            tracing::debug!("[glob] Invalid pattern '{}': {}", pattern, e);
            false
        }
    }
}

fn compile_recursive(pattern: &str) -> Option<Regex> {
    let mut expr = String::with_capacity(pattern.len() * 2 + 2);
    expr.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                expr.push_str(".*");
            }
            '*' => expr.push_str("[^/]*"),
            '?' => expr.push_str("[^/]"),
            '[' => match bracket_class(&mut chars) {
                Some(class) => expr.push_str(&class),
                None => {
                    tracing::debug!("[glob] Unterminated class in '{}'", pattern);
                    return None;
                }
            },
            other => {
                let mut buf = [0u8; 4];
                expr.push_str(&regex::escape(other.encode_utf8(&mut buf)));
            }
        }
    }

    expr.push('$');

    match Regex::new(&expr) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::debug!("[glob] Failed to compile '{}': {}", pattern, e);
            None
        }
    }
}

/// Translate the rest of a `[...]` class into a regex class that never
/// matches `/`
fn bracket_class(chars: &mut Peekable<Chars<'_>>) -> Option<String> {
    let negated = chars.next_if_eq(&'!').is_some();
    let mut members = Vec::new();

    // `]` right after the opening bracket is a member
    if let Some(c) = chars.next_if_eq(&']') {
        members.push(c);
    }
    loop {
        match chars.next()? {
            ']' => break,
            c => members.push(c),
        }
    }

    let mut class = String::from("[[");
    if negated {
        class.push('^');
    }

    let mut i = 0;
    while i < members.len() {
        let mut buf = [0u8; 4];
        class.push_str(&regex::escape(members[i].encode_utf8(&mut buf)));
        if i + 2 < members.len() && members[i + 1] == '-' {
            class.push('-');
            class.push_str(&regex::escape(members[i + 2].encode_utf8(&mut buf)));
            i += 3;
        } else {
            i += 1;
        }
    }

    class.push_str("]&&[^/]]");
    Some(class)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_star_matches_everything() {
        assert!(glob_match("**", "/etc/passwd"));
        assert!(glob_match("**", ""));
        assert!(glob_match("**", "api.example.com"));
    }

    #[test]
    fn test_match_table() {
        let cases = [
            ("/workspace/**", "/workspace/src/main.go", true),
            ("/workspace/**", "/workspace/a.txt", true),
            ("/workspace/**", "/other/a.txt", false),
            ("/workspace/*", "/workspace/src/main.go", false),
            ("/workspace/*", "/workspace/main.go", true),
            ("/workspace/*.rs", "/workspace/lib.rs", true),
            ("/workspace/*.rs", "/workspace/lib.go", false),
            ("/workspace/?.txt", "/workspace/a.txt", true),
            ("/workspace/?.txt", "/workspace/ab.txt", false),
            ("/workspace/**/*.rs", "/workspace/src/deep/lib.rs", true),
            ("/workspace/**/*.rs", "/workspace/src/deep/lib.go", false),
            ("/data/**/v?.json", "/data/x/y/v1.json", true),
            ("*.github.com", "api.github.com", true),
            ("*.github.com", "github.com", false),
            ("/tmp/a+b/**", "/tmp/a+b/c", true),
            ("/tmp/a+b/**", "/tmp/aab/c", false),
        ];

        for (pattern, value, expected) in cases {
            assert_eq!(
                glob_match(pattern, value),
                expected,
                "pattern={} value={}",
                pattern,
                value
            );
        }
    }

    #[test]
    fn test_without_double_star_equals_segment_match() {
        let patterns = ["/a/*", "/a/?", "*", "/a/b", "/a/[bc]", "host.*", "/a/*/c"];
        let values = ["/a/b", "/a/bc", "/a/b/c", "b", "/a/x/c", "host.local", ""];

        for pattern in patterns {
            for value in values {
                assert_eq!(
                    glob_match(pattern, value),
                    segment_match(pattern, value),
                    "pattern={} value={}",
                    pattern,
                    value
                );
            }
        }
    }

    #[test]
    fn test_malformed_pattern_fails_closed() {
        assert!(!glob_match("/workspace/[", "/workspace/["));
        assert!(!glob_match("/workspace/[", "/workspace/a"));
        assert!(!glob_match("/workspace/[ab/**", "/workspace/a/x"));
    }

    #[test]
    fn test_classes_agree_across_both_forms() {
        let cases = [
            ("/w/[ab]/**", "/w/a/x", true),
            ("/w/[ab]/**", "/w/c/x", false),
            ("/w/[!ab]/**", "/w/c/x", true),
            ("/w/[!ab]/**", "/w/a/x", false),
            ("/w/[a-c]x/**", "/w/bx/y", true),
            ("/w/[a-c]x/**", "/w/dx/y", false),
            ("/w[!a]b/**", "/w/b/c", false),
            ("/w/[]]/**", "/w/]/z", true),
        ];
        for (pattern, value, expected) in cases {
            assert_eq!(glob_match(pattern, value), expected, "pattern={} value={}", pattern, value);
        }
    }

    #[test]
    fn test_escaped_text_is_literal() {
        let base = Pattern::escape("/srv/[ab]?*");

        let flat = format!("{}/*", base);
        assert!(glob_match(&flat, "/srv/[ab]?*/f"));
        assert!(!glob_match(&flat, "/srv/a/f"));

        let deep = format!("{}/**", base);
        assert!(glob_match(&deep, "/srv/[ab]?*/d/f"));
        assert!(!glob_match(&deep, "/srv/a1x/d/f"));
        assert!(!glob_match(&deep, "/srv/b/d/f"));
    }
}
