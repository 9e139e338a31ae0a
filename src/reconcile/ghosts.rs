use std::collections::BTreeSet;

use serde::Serialize;

/// Ids present in only one of the two stores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Ghosts {
    /// In the mirror, gone from the database.
    pub local_only: Vec<String>,
    /// In the database, never mirrored.
    pub remote_only: Vec<String>,
}

impl Ghosts {
    pub fn is_empty(&self) -> bool {
        self.local_only.is_empty() && self.remote_only.is_empty()
    }
}

pub fn detect_ghosts<L, R>(local: L, remote: R) -> Ghosts
where
    L: IntoIterator,
    L::Item: AsRef<str>,
    R: IntoIterator,
    R::Item: AsRef<str>,
{
    let local: BTreeSet<String> = local.into_iter().map(|id| id.as_ref().to_string()).collect();
    let remote: BTreeSet<String> = remote
        .into_iter()
        .map(|id| id.as_ref().to_string())
        .collect();

    Ghosts {
        local_only: local.difference(&remote).cloned().collect(),
        remote_only: remote.difference(&local).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_set_difference() {
        let ghosts = detect_ghosts(["a", "b", "c", "c"], ["b", "d", "e"]);
        assert_eq!(ghosts.local_only, vec!["a", "c"]);
        assert_eq!(ghosts.remote_only, vec!["d", "e"]);
    }

    #[test]
    fn test_identical_sets_have_no_ghosts() {
        let ids = vec!["x".to_string(), "y".to_string()];
        let ghosts = detect_ghosts(&ids, &ids);
        assert!(ghosts.is_empty());
    }

    #[test]
    fn test_one_side_empty() {
        let none: [&str; 0] = [];
        let ghosts = detect_ghosts(["only-local"], none);
        assert_eq!(ghosts.local_only, vec!["only-local"]);
        assert!(ghosts.remote_only.is_empty());

        let ghosts = detect_ghosts(none, ["only-remote"]);
        assert!(ghosts.local_only.is_empty());
        assert_eq!(ghosts.remote_only, vec!["only-remote"]);
    }
}
