//! Version comparison for package versions.
//!
//! Versions have the shape `[epoch,]body[_revision]`. An explicit epoch
//! (`N,` prefix) overrides everything after it; the body is compared
//! component-by-component with numeric runs as integers and alphabetic runs
//! lexicographically; a `_N` port-revision suffix is broken out as an
//! ordinary trailing numeric component. The resulting relation is a total
//! order.

use std::cmp::Ordering;

/// One lexical component of a version body.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    /// A run of ASCII digits, compared as an integer.
    Number(&'a str),
    /// A run of non-digit, non-separator characters, compared as ASCII text.
    Alpha(&'a str),
}

/// Characters that delimit components without contributing to ordering.
const SEPARATORS: [char; 5] = ['.', '_', '-', '+', ','];

/// What: Split an explicit epoch prefix off a version string.
///
/// Inputs:
/// - `version`: Full version string, e.g. `"2,1.5"`.
///
/// Output:
/// - `(epoch, rest)` where `epoch` is 0 when no `N,` prefix is present.
///
/// Details:
/// - The prefix counts as an epoch only when it is entirely numeric and
///   directly followed by a comma; anything else is left in the body.
fn split_epoch(version: &str) -> (u64, &str) {
    if let Some((head, rest)) = version.split_once(',')
        && !head.is_empty()
        && head.bytes().all(|b| b.is_ascii_digit())
        && let Ok(epoch) = head.parse::<u64>()
    {
        return (epoch, rest);
    }
    (0, version)
}

/// What: Tokenize a version body into numeric and alphabetic runs.
///
/// Inputs:
/// - `body`: Version body with the epoch already removed.
///
/// Output:
/// - Ordered tokens; separators are consumed as boundaries.
fn tokenize(body: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let bytes = body.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if SEPARATORS.contains(&c) {
            i += 1;
            continue;
        }
        let start = i;
        if bytes[i].is_ascii_digit() {
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            tokens.push(Token::Number(&body[start..i]));
        } else {
            while i < bytes.len()
                && !bytes[i].is_ascii_digit()
                && !SEPARATORS.contains(&(bytes[i] as char))
            {
                i += 1;
            }
            tokens.push(Token::Alpha(&body[start..i]));
        }
    }
    tokens
}

/// What: Compare two numeric runs as integers of arbitrary size.
///
/// Inputs:
/// - `a`, `b`: Digit-only strings.
///
/// Output:
/// - Integer ordering, leading zeroes irrelevant.
fn cmp_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// What: Compare two version strings.
///
/// Inputs:
/// - `a`: Left-hand version string.
/// - `b`: Right-hand version string.
///
/// Output:
/// - Returns `Ordering::Less` if `a < b`.
/// - Returns `Ordering::Equal` if `a == b`.
/// - Returns `Ordering::Greater` if `a > b`.
///
/// Details:
/// - An explicit epoch (`N,` prefix) decides first, regardless of the body.
/// - Body tokens are compared pairwise: number vs number as integers,
///   alpha vs alpha as ASCII text, and an alpha run sorts as older than a
///   numeric run at the same position.
/// - When one side runs out of tokens, a remaining numeric token makes that
///   side newer (`1.2.1 > 1.2`) while a remaining alpha token makes it
///   older (`1.0a < 1.0`).
/// - A `_N` revision suffix needs no special casing: the underscore is a
///   separator, so the revision lands as a trailing numeric component.
///
/// # Example
///
/// ```
/// use binpkg::deps::compare_versions;
/// use std::cmp::Ordering;
///
/// assert_eq!(compare_versions("1.2.10", "1.2.9"), Ordering::Greater);
/// assert_eq!(compare_versions("1.0_1", "1.0"), Ordering::Greater);
/// assert_eq!(compare_versions("2,1", "1,9"), Ordering::Greater);
/// assert_eq!(compare_versions("1.0a", "1.0"), Ordering::Less);
/// ```
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (a_epoch, a_body) = split_epoch(a);
    let (b_epoch, b_body) = split_epoch(b);
    match a_epoch.cmp(&b_epoch) {
        Ordering::Equal => {}
        ord => return ord,
    }

    let a_tokens = tokenize(a_body);
    let b_tokens = tokenize(b_body);
    let len = a_tokens.len().max(b_tokens.len());

    for idx in 0..len {
        match (a_tokens.get(idx), b_tokens.get(idx)) {
            (Some(Token::Number(x)), Some(Token::Number(y))) => match cmp_numeric(x, y) {
                Ordering::Equal => {}
                ord => return ord,
            },
            (Some(Token::Alpha(x)), Some(Token::Alpha(y))) => match x.cmp(y) {
                Ordering::Equal => {}
                ord => return ord,
            },
            // An alpha run is older than a numeric run at the same position.
            (Some(Token::Alpha(_)), Some(Token::Number(_))) => return Ordering::Less,
            (Some(Token::Number(_)), Some(Token::Alpha(_))) => return Ordering::Greater,
            // Trailing numeric component is newer, trailing alpha is older.
            (Some(Token::Number(_)), None) => return Ordering::Greater,
            (Some(Token::Alpha(_)), None) => return Ordering::Less,
            (None, Some(Token::Number(_))) => return Ordering::Less,
            (None, Some(Token::Alpha(_))) => return Ordering::Greater,
            (None, None) => {}
        }
    }

    Ordering::Equal
}
