//! Search expression parsing and matching.

use crate::domain::models::{Post, Search};
use once_cell::sync::Lazy;
use regex::Regex;

static REBLOG_TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[-\w]+:").expect("static regex is valid"));

const REBLOG_MARKER: &str = "class=\"tumblr_blog\"";

/// Parses a raw search string into a [`Search`].
///
/// Tokens are whitespace-separated except within a matching pair of ASCII
/// `"` or `'` quotes; an unmatched quote is a literal token. A leading `-`
/// marks exclusion, a leading `#` (after any `-`) marks a tag. The bare
/// tokens `noreblog`/`noreblogs` set [`Search::no_reblogs`]; the bare token
/// `skip` sets [`Search::skip`]. Every token is URL-unescaped and
/// lowercased before classification.
pub fn parse(raw: &str) -> Search {
    let tokens = tokenize(raw);

    let mut search = Search {
        is_active: !tokens.is_empty(),
        ..Search::default()
    };

    for token in tokens {
        let (excluded, rest) = match token.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, token.as_str()),
        };

        let decoded = urlencoding_decode(rest).to_lowercase();

        if let Some(tag) = decoded.strip_prefix('#') {
            if excluded {
                search.exclude_tags.push(tag.to_string());
            } else {
                search.tags.push(tag.to_string());
            }
            continue;
        }

        if !excluded && (decoded == "noreblog" || decoded == "noreblogs") {
            search.no_reblogs = true;
            continue;
        }
        if !excluded && decoded == "skip" {
            search.skip = true;
            continue;
        }

        if excluded {
            search.exclude_terms.push(decoded);
        } else {
            search.terms.push(decoded);
        }
    }

    if !search.terms.is_empty() {
        search.terms_re = word_boundary_regex(&search.terms);
    }
    if !search.exclude_terms.is_empty() {
        search.exclude_terms_re = word_boundary_regex(&search.exclude_terms);
    }

    search
}

fn word_boundary_regex(terms: &[String]) -> Option<Regex> {
    let alternation = terms
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = format!(r"(?i)\b({alternation})\b");
    Regex::new(&pattern).ok()
}

/// Splits `raw` on whitespace, honoring quoted substrings. An unmatched
/// quote is treated as a literal single-character token.
fn tokenize(raw: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = raw.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            chars.next();
            let mut buf = String::new();
            let mut closed = false;
            for next in chars.by_ref() {
                if next == quote {
                    closed = true;
                    break;
                }
                buf.push(next);
            }
            if closed {
                tokens.push(buf);
            } else {
                // Unmatched quote: the quote itself is a literal token,
                // followed by whatever text trailed it.
                tokens.push(quote.to_string());
                if !buf.is_empty() {
                    tokens.extend(buf.split_whitespace().map(str::to_string));
                }
            }
            continue;
        }

        let mut buf = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_whitespace() {
                break;
            }
            if next == '"' || next == '\'' {
                break;
            }
            buf.push(next);
            chars.next();
        }
        if !buf.is_empty() {
            tokens.push(buf);
        }
    }

    tokens
}

fn urlencoding_decode(s: &str) -> String {
    percent_encoding::percent_decode_str(s)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

/// Returns true if `post` denotes a reblog/repost.
pub fn is_reblog(post: &Post) -> bool {
    REBLOG_TITLE_RE.is_match(&post.title) || post.description_html.contains(REBLOG_MARKER)
}

impl Search {
    /// Applies the match rule to `post`.
    pub fn matches(&self, post: &Post) -> bool {
        if !self.is_active {
            return true;
        }

        if self.no_reblogs && is_reblog(post) {
            return false;
        }

        if self
            .exclude_tags
            .iter()
            .any(|tag| post.has_tag(tag))
        {
            return false;
        }

        if !self.tags.iter().all(|tag| post.has_tag(tag)) {
            return false;
        }

        let haystack_matches = |re: &Regex| re.is_match(&post.title) || re.is_match(&post.description_html);

        match &self.terms_re {
            Some(re) => {
                if !haystack_matches(re) {
                    return false;
                }
            }
            None => {
                if !self.terms.iter().all(|term| contains_ci(post, term)) {
                    return false;
                }
            }
        }

        match &self.exclude_terms_re {
            Some(re) => {
                if haystack_matches(re) {
                    return false;
                }
            }
            None => {
                if self.exclude_terms.iter().any(|term| contains_ci(post, term)) {
                    return false;
                }
            }
        }

        true
    }
}

fn contains_ci(post: &Post, term: &str) -> bool {
    post.title.to_lowercase().contains(term) || post.description_html.to_lowercase().contains(term)
}
