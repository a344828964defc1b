//! Redis-style glob patterns.
//!
//! # Responsibilities
//! - Match cache keys against invalidation patterns in-process (L1 and the
//!   in-memory L2 store) with the same semantics as `KEYS pattern`
//!
//! # Syntax
//! - `*` any run of characters, `?` exactly one character
//! - `[abc]`, `[a-z]`, `[^a]` / `[!a]` character classes
//! - `\x` matches `x` literally
//!
//! # Design Decisions
//! - Compiled once into tokens, matched with the iterative star-backtracking
//!   algorithm: O(n·m) worst case, no recursion, no regex
//! - An unterminated `[` is taken literally

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyOne,
    AnyRun,
    Class {
        negated: bool,
        ranges: Vec<(char, char)>,
    },
}

impl Token {
    fn matches(&self, c: char) -> bool {
        match self {
            Token::Literal(l) => *l == c,
            Token::AnyOne => true,
            Token::AnyRun => true,
            Token::Class { negated, ranges } => {
                let hit = ranges.iter().any(|(lo, hi)| *lo <= c && c <= *hi);
                hit != *negated
            }
        }
    }
}

/// A compiled glob pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    source: String,
    tokens: Vec<Token>,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            source: pattern.to_string(),
            tokens: compile(pattern),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True when the pattern contains no wildcard or class.
    pub fn is_literal(&self) -> bool {
        self.tokens.iter().all(|t| matches!(t, Token::Literal(_)))
    }

    pub fn matches(&self, key: &str) -> bool {
        let text: Vec<char> = key.chars().collect();
        let tokens = &self.tokens;

        let (mut t, mut p) = (0usize, 0usize);
        let mut backtrack: Option<(usize, usize)> = None;

        while t < text.len() {
            match tokens.get(p) {
                Some(Token::AnyRun) => {
                    backtrack = Some((p, t));
                    p += 1;
                }
                Some(token) if token.matches(text[t]) => {
                    t += 1;
                    p += 1;
                }
                _ => match backtrack {
                    Some((star_p, star_t)) => {
                        p = star_p + 1;
                        t = star_t + 1;
                        backtrack = Some((star_p, star_t + 1));
                    }
                    None => return false,
                },
            }
        }

        tokens[p..].iter().all(|token| *token == Token::AnyRun)
    }
}

fn compile(pattern: &str) -> Vec<Token> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::with_capacity(chars.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => {
                if tokens.last() != Some(&Token::AnyRun) {
                    tokens.push(Token::AnyRun);
                }
                i += 1;
            }
            '?' => {
                tokens.push(Token::AnyOne);
                i += 1;
            }
            '\\' if i + 1 < chars.len() => {
                tokens.push(Token::Literal(chars[i + 1]));
                i += 2;
            }
            '[' => match parse_class(&chars, i + 1) {
                Some((token, next)) => {
                    tokens.push(token);
                    i = next;
                }
                None => {
                    tokens.push(Token::Literal('['));
                    i += 1;
                }
            },
            c => {
                tokens.push(Token::Literal(c));
                i += 1;
            }
        }
    }

    tokens
}

/// Parse a class body starting after `[`; returns the token and the index
/// following the closing `]`.
fn parse_class(chars: &[char], mut i: usize) -> Option<(Token, usize)> {
    let negated = matches!(chars.get(i), Some('^') | Some('!'));
    if negated {
        i += 1;
    }

    let mut ranges = Vec::new();
    while i < chars.len() {
        let mut c = chars[i];
        if c == ']' {
            return Some((Token::Class { negated, ranges }, i + 1));
        }
        if c == '\\' && i + 1 < chars.len() {
            i += 1;
            c = chars[i];
        }

        if chars.get(i + 1) == Some(&'-') && chars.get(i + 2).is_some_and(|n| *n != ']') {
            let end = chars[i + 2];
            let (lo, hi) = if c <= end { (c, end) } else { (end, c) };
            ranges.push((lo, hi));
            i += 3;
        } else {
            ranges.push((c, c));
            i += 1;
        }
    }

    None
}
