//! Path-pattern compiler.
//!
//! Every registry entry owns one compiled [`Pattern`], built at registration
//! time. Each pattern is a tiny [`matchit`] tree holding all the concrete
//! forms the pattern can take, so lookup stays O(path-length) and nothing is
//! compiled lazily while requests are in flight.
//!
//! Accepted syntax, per segment:
//!
//! | Segment | Meaning |
//! |---|---|
//! | `users` | literal |
//! | `:id` / `{id}` | named parameter |
//! | `:id?` | optional named parameter |
//! | `*` / `{*rest}` | wildcard for the remainder (last segment only) |
//!
//! Two modes:
//!
//! - [`Mode::Exact`] (routes): the whole path must match; one trailing `/`
//!   is tolerated.
//! - [`Mode::Prefix`] (middleware, mounted apps): the pattern must match a
//!   leading run of whole segments. The length of that run is reported in
//!   [`Match::consumed`] so the dispatcher can strip it. Literal segments
//!   compare ASCII case-insensitively, so `/API/users` reaches middleware
//!   mounted at `/api`.

use std::collections::HashMap;

use matchit::Router as MatchitRouter;

use crate::error::Error;

/// Reserved catch-all name used to implement prefix matching.
const TAIL: &str = "__arbor_tail";
/// Name given to an anonymous `*` wildcard.
const WILD: &str = "wild";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    Prefix,
    Exact,
}

/// A compiled path pattern.
pub struct Pattern {
    source: String,
    mode: Mode,
    tree: MatchitRouter<()>,
}

/// A successful match against a pathname.
#[derive(Debug, Default, PartialEq)]
pub struct Match {
    /// Named parameters captured by the pattern.
    pub params: HashMap<String, String>,
    /// Byte length of the pathname prefix the pattern consumed.
    pub consumed: usize,
}

impl Pattern {
    pub fn compile(path: &str, mode: Mode) -> Result<Self, Error> {
        let normalized = normalize(path);
        let mut forms: Vec<String> = Vec::new();

        for variant in expand(path, &normalized)? {
            let wildcard = variant.contains("{*");
            push_unique(&mut forms, variant.clone());
            if variant == "/" {
                if mode == Mode::Prefix {
                    push_unique(&mut forms, format!("/{{*{TAIL}}}"));
                }
                continue;
            }
            if wildcard {
                continue;
            }
            push_unique(&mut forms, format!("{variant}/"));
            if mode == Mode::Prefix {
                push_unique(&mut forms, format!("{variant}/{{*{TAIL}}}"));
            }
        }

        let mut tree = MatchitRouter::new();
        for form in forms {
            let form = match mode {
                Mode::Prefix => fold_literals(&form),
                Mode::Exact => form,
            };
            tree.insert(form, ()).map_err(|e| Error::pattern(path, e))?;
        }

        Ok(Self { source: normalized, mode, tree })
    }

    pub fn source(&self) -> &str { &self.source }
    pub fn mode(&self) -> Mode { self.mode }

    pub fn test(&self, pathname: &str) -> bool {
        self.find(pathname).is_some()
    }

    /// Matches `pathname`, returning captured params and the consumed prefix.
    pub fn find(&self, pathname: &str) -> Option<Match> {
        let folded;
        let subject = match self.mode {
            Mode::Prefix => {
                folded = pathname.to_ascii_lowercase();
                folded.as_str()
            }
            Mode::Exact => pathname,
        };

        let matched = self.tree.at(subject).ok()?;
        let mut params = HashMap::new();
        let mut tail = None;
        for (key, value) in matched.params.iter() {
            if key == TAIL {
                tail = Some(value.len());
            } else {
                // ASCII folding keeps byte offsets, so the value can be read
                // back from the unfolded pathname
                let original = (value.as_ptr() as usize)
                    .checked_sub(subject.as_ptr() as usize)
                    .and_then(|start| pathname.get(start..start + value.len()))
                    .unwrap_or(value);
                params.insert(key.to_owned(), original.to_owned());
            }
        }
        // the tail excludes its separating slash
        let consumed = match tail {
            Some(len) => pathname.len().saturating_sub(len + 1),
            None => pathname.len(),
        };
        Some(Match { params, consumed })
    }
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pattern")
            .field("source", &self.source)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Leading `/`, no trailing `/` (except for the root itself).
fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    }
}

/// Lowercases everything outside `{...}` parameter braces.
fn fold_literals(form: &str) -> String {
    let mut depth = 0usize;
    form.chars()
        .map(|c| {
            match c {
                '{' => depth += 1,
                '}' => depth = depth.saturating_sub(1),
                _ => {}
            }
            if depth == 0 { c.to_ascii_lowercase() } else { c }
        })
        .collect()
}

fn push_unique(forms: &mut Vec<String>, form: String) {
    if !forms.contains(&form) {
        forms.push(form);
    }
}

/// Translates Express-style segments into matchit syntax, producing one
/// variant per combination of optional segments.
fn expand(original: &str, normalized: &str) -> Result<Vec<String>, Error> {
    let segments: Vec<&str> = normalized.split('/').skip(1).filter(|s| !s.is_empty()).collect();
    let mut variants = vec![String::new()];

    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        let (translated, optional) = translate(original, segment, last)?;
        let mut next = Vec::with_capacity(variants.len() * 2);
        for v in &variants {
            if optional {
                next.push(v.clone());
            }
            next.push(format!("{v}/{translated}"));
        }
        variants = next;
    }

    Ok(variants
        .into_iter()
        .map(|v| if v.is_empty() { "/".to_owned() } else { v })
        .collect())
}

fn translate(original: &str, segment: &str, last: bool) -> Result<(String, bool), Error> {
    if segment == "*" {
        if !last {
            return Err(Error::pattern(original, "`*` must be the last segment"));
        }
        return Ok((format!("{{*{WILD}}}"), false));
    }

    if let Some(name) = segment.strip_prefix(':') {
        let (name, optional) = match name.strip_suffix('?') {
            Some(n) => (n, true),
            None => (name, false),
        };
        if name.is_empty() {
            return Err(Error::pattern(original, "empty parameter name"));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::pattern(original, format!("invalid parameter name `{name}`")));
        }
        return Ok((format!("{{{name}}}"), optional));
    }

    if segment.contains(&format!("{{{TAIL}")) || segment.contains(&format!("{{*{TAIL}")) {
        return Err(Error::pattern(original, "reserved parameter name"));
    }

    // native matchit syntax passes through untouched
    Ok((segment.to_owned(), false))
}
