//! Dependency ordering of definitions by kind.

use super::request::Request;

/// Kinds a definition may have.
pub const KNOWN_KINDS: &[&str] = &[
    "containers",
    "network",
    "volume",
    "resource",
    "configuration",
    "certkey",
    "secret",
    "httpauth",
    "gitops",
    "custom",
];

/// Kinds that must be applied before `kind`.
pub fn dependencies_of(kind: &str) -> &'static [&'static str] {
    match kind {
        "containers" => &["network", "volume", "resource", "configuration", "certkey"],
        "configuration" => &["secret"],
        "resource" => &["secret"],
        "gitops" => &["httpauth", "certkey"],
        _ => &[],
    }
}

pub fn is_known_kind(kind: &str) -> bool {
    KNOWN_KINDS.contains(&kind)
}

/// True if `kind` depends on `other`, directly or through another kind.
pub fn depends_on(kind: &str, other: &str) -> bool {
    let mut stack: Vec<&str> = dependencies_of(kind).to_vec();
    let mut seen: Vec<&str> = Vec::new();

    while let Some(next) = stack.pop() {
        if next == other {
            return true;
        }
        if !seen.contains(&next) {
            seen.push(next);
            stack.extend_from_slice(dependencies_of(next));
        }
    }

    false
}

/// Inserts `request` into an already ordered sequence.
///
/// Goes right after the last entry it depends on; failing that, right before
/// the first entry that depends on it; otherwise at the end.
pub fn insert_ordered(ordered: &mut Vec<Request>, request: Request) {
    let after = ordered
        .iter()
        .rposition(|existing| depends_on(request.kind(), existing.kind()));

    let index = match after {
        Some(i) => i + 1,
        None => ordered
            .iter()
            .position(|existing| depends_on(existing.kind(), request.kind()))
            .unwrap_or(ordered.len()),
    };

    ordered.insert(index, request);
}

/// Orders `requests` so every kind follows the kinds it depends on.
pub fn order(requests: impl IntoIterator<Item = Request>) -> Vec<Request> {
    let mut ordered = Vec::new();
    for request in requests {
        insert_ordered(&mut ordered, request);
    }
    ordered
}
