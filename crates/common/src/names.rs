//! Host-set resolution and file-name helpers.

use std::collections::HashSet;

use thiserror::Error;
use tracing::trace;

use crate::ids::Identifier;

/// Maximum number of names the authority accepts on one certificate.
pub const MAX_NAMES: usize = 100;

/// Characters that cannot appear in a file name on any supported platform.
const INVALID_FILE_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?'];

/// Host-set resolution failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostSetError {
    #[error("no DNS identifiers found")]
    Empty,

    #[error("too many hosts for a single certificate: {count} (maximum {max})")]
    TooMany { count: usize, max: usize },
}

/// Resolve the host set of a certificate request.
///
/// Names are trimmed and lower-cased, blanks are dropped, duplicates are
/// removed keeping first-seen order, and anything matching `exclusions` is
/// filtered out. The result must contain between 1 and [`MAX_NAMES`] names.
pub fn resolve_host_set<'a, I, E>(hosts: I, exclusions: E) -> Result<Vec<Identifier>, HostSetError>
where
    I: IntoIterator<Item = &'a str>,
    E: IntoIterator<Item = &'a str>,
{
    let excluded: HashSet<Identifier> = exclusions
        .into_iter()
        .filter_map(Identifier::parse)
        .collect();

    let mut seen = HashSet::new();
    let mut resolved = Vec::new();
    for raw in hosts {
        let Some(id) = Identifier::parse(raw) else {
            continue;
        };
        if excluded.contains(&id) {
            trace!(host = %id, "Host excluded from certificate");
            continue;
        }
        if seen.insert(id.clone()) {
            resolved.push(id);
        }
    }

    if resolved.is_empty() {
        return Err(HostSetError::Empty);
    }
    if resolved.len() > MAX_NAMES {
        return Err(HostSetError::TooMany {
            count: resolved.len(),
            max: MAX_NAMES,
        });
    }
    Ok(resolved)
}

/// Split a comma-separated host list (`"a.com, b.com,,c.com"`).
pub fn split_host_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Make a string safe to use as a single file-name component.
///
/// Wildcards become `_`; path separators, reserved characters and control
/// characters are dropped.
pub fn clean_file_name(name: &str) -> String {
    name.chars()
        .filter_map(|c| match c {
            '*' => Some('_'),
            c if c.is_control() || INVALID_FILE_NAME_CHARS.contains(&c) => None,
            c => Some(c),
        })
        .collect()
}
