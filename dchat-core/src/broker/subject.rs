//! Subject names and wildcard matching
//!
//! Subjects are dot-separated tokens. In subscription patterns `*` matches
//! exactly one token and `>` matches one or more trailing tokens.

use super::error::{BrokerError, BrokerResult};

pub const SINGLE_WILDCARD: &str = "*";
pub const FULL_WILDCARD: &str = ">";

/// Check a publish subject: non-empty tokens, no wildcards, no whitespace
pub fn validate_subject(subject: &str) -> BrokerResult<()> {
    validate_tokens(subject)?;
    if !is_literal(subject) {
        return Err(BrokerError::InvalidSubject(format!(
            "{}: wildcards are not allowed when publishing",
            subject
        )));
    }
    Ok(())
}

/// Check a subscription pattern
pub fn validate_pattern(pattern: &str) -> BrokerResult<()> {
    validate_tokens(pattern)?;
    let tokens: Vec<&str> = pattern.split('.').collect();
    for (i, token) in tokens.iter().enumerate() {
        let is_last = i + 1 == tokens.len();
        if *token == FULL_WILDCARD && !is_last {
            return Err(BrokerError::InvalidSubject(format!(
                "{}: '>' must be the last token",
                pattern
            )));
        }
        if token.len() > 1 && (token.contains('*') || token.contains('>')) {
            return Err(BrokerError::InvalidSubject(format!(
                "{}: wildcards must be whole tokens",
                pattern
            )));
        }
    }
    Ok(())
}

fn validate_tokens(subject: &str) -> BrokerResult<()> {
    if subject.is_empty() {
        return Err(BrokerError::InvalidSubject("empty subject".to_string()));
    }
    if subject.chars().any(char::is_whitespace) {
        return Err(BrokerError::InvalidSubject(format!("{:?}: contains whitespace", subject)));
    }
    if subject.split('.').any(str::is_empty) {
        return Err(BrokerError::InvalidSubject(format!("{}: empty token", subject)));
    }
    Ok(())
}

/// True when `subject` contains no wildcard tokens
pub fn is_literal(subject: &str) -> bool {
    subject
        .split('.')
        .all(|t| t != SINGLE_WILDCARD && t != FULL_WILDCARD)
}

/// Does `pattern` match the literal `subject`
pub fn matches(pattern: &str, subject: &str) -> bool {
    covers(pattern, subject)
}

/// Does every subject matched by `inner` also match `outer`
pub fn covers(outer: &str, inner: &str) -> bool {
    let outer: Vec<&str> = outer.split('.').collect();
    let inner: Vec<&str> = inner.split('.').collect();
    covers_tokens(&outer, &inner)
}

fn covers_tokens(outer: &[&str], inner: &[&str]) -> bool {
    match (outer.split_first(), inner.split_first()) {
        (None, None) => true,
        (Some((&FULL_WILDCARD, _)), Some(_)) => true,
        (Some(_), Some((&FULL_WILDCARD, _))) => false,
        (Some((&SINGLE_WILDCARD, o_rest)), Some((_, i_rest))) => covers_tokens(o_rest, i_rest),
        (Some((o, o_rest)), Some((i, i_rest))) => {
            *i != SINGLE_WILDCARD && o == i && covers_tokens(o_rest, i_rest)
        }
        _ => false,
    }
}

/// Is there at least one subject matched by both patterns
pub fn intersects(a: &str, b: &str) -> bool {
    let a: Vec<&str> = a.split('.').collect();
    let b: Vec<&str> = b.split('.').collect();
    intersects_tokens(&a, &b)
}

fn intersects_tokens(a: &[&str], b: &[&str]) -> bool {
    match (a.split_first(), b.split_first()) {
        (None, None) => true,
        (Some((&FULL_WILDCARD, _)), Some(_)) | (Some(_), Some((&FULL_WILDCARD, _))) => true,
        (Some((x, a_rest)), Some((y, b_rest))) => {
            (*x == SINGLE_WILDCARD || *y == SINGLE_WILDCARD || x == y)
                && intersects_tokens(a_rest, b_rest)
        }
        _ => false,
    }
}
