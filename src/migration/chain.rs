//! The revision graph: discovery, validation, heads and target resolution

use super::ordering::{missing_dependencies, topological_sort, Node};
use super::revision::Revision;
use super::MigrationError;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

/// Revisions in apply order (every revision after everything it requires)
#[derive(Debug, Clone, Default)]
pub struct RevisionChain {
    revisions: Vec<Revision>,
}

impl RevisionChain {
    /// Discover and parse every `.sql` revision in `dir`
    pub fn load(dir: &Path) -> Result<Self, MigrationError> {
        if !dir.exists() {
            return Err(MigrationError::FileNotFound(dir.to_string_lossy().to_string()));
        }
        if !dir.is_dir() {
            return Err(MigrationError::InvalidFormat(format!(
                "Path is not a directory: {}",
                dir.display()
            )));
        }

        let mut revisions = Vec::new();
        let entries = fs::read_dir(dir).map_err(|e| {
            MigrationError::FileNotFound(format!(
                "Failed to read migrations directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("sql") {
                continue;
            }
            revisions.push(Revision::load(&path)?);
        }
        log::debug!("discovered {} revision(s) in {}", revisions.len(), dir.display());
        Self::from_revisions(revisions)
    }

    /// Validate and order revisions
    pub fn from_revisions(mut revisions: Vec<Revision>) -> Result<Self, MigrationError> {
        // stable input order: creation time, then id
        revisions.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));

        let mut seen = BTreeSet::new();
        for rev in &revisions {
            if !seen.insert(rev.id.as_str()) {
                return Err(MigrationError::InvalidChain(format!(
                    "revision id '{}' is declared twice",
                    rev.id
                )));
            }
        }

        let nodes: Vec<Node> = revisions
            .iter()
            .map(|r| Node::new(r.id.clone(), r.requires()))
            .collect();
        if let Some((rev, parent)) = missing_dependencies(&nodes).into_iter().next() {
            return Err(MigrationError::InvalidChain(format!(
                "revision '{}' points at unknown revision '{}'",
                rev, parent
            )));
        }
        let order = topological_sort(&nodes).map_err(|stuck| {
            MigrationError::InvalidChain(format!("cycle between revisions {}", stuck.join(", ")))
        })?;

        let mut by_id: HashMap<String, Revision> =
            revisions.into_iter().map(|r| (r.id.clone(), r)).collect();
        let revisions = order
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect();
        Ok(Self { revisions })
    }

    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Revision> {
        self.revisions.iter().find(|r| r.id == id)
    }

    /// Position in apply order
    pub fn position(&self, id: &str) -> Option<usize> {
        self.revisions.iter().position(|r| r.id == id)
    }

    /// Resolve a full id, a unique id prefix or a branch label
    pub fn resolve(&self, spec: &str) -> Result<&Revision, MigrationError> {
        if let Some(rev) = self.get(spec) {
            return Ok(rev);
        }
        let labelled: Vec<&Revision> = self
            .revisions
            .iter()
            .filter(|r| r.branch_labels.iter().any(|l| l == spec))
            .collect();
        if labelled.len() == 1 {
            // a label names the newest revision on its branch
            let root = labelled[0];
            let branch = self.descendants(&root.id);
            return self
                .revisions
                .iter()
                .rev()
                .find(|r| branch.contains(&r.id))
                .ok_or_else(|| MigrationError::UnknownRevision(spec.to_string()));
        }
        let matches: Vec<&Revision> = self
            .revisions
            .iter()
            .filter(|r| r.id.starts_with(spec))
            .collect();
        match matches.as_slice() {
            [only] if spec.len() >= 4 => Ok(only),
            _ => Err(MigrationError::UnknownRevision(spec.to_string())),
        }
    }

    /// Revisions no other revision builds on
    pub fn heads(&self) -> Vec<&Revision> {
        let parents: BTreeSet<&str> = self
            .revisions
            .iter()
            .flat_map(|r| r.down_revisions.iter().map(String::as_str))
            .collect();
        self.revisions
            .iter()
            .filter(|r| !parents.contains(r.id.as_str()))
            .collect()
    }

    /// The single head, `None` for an empty chain
    pub fn head(&self) -> Result<Option<&Revision>, MigrationError> {
        let heads = self.heads();
        match heads.len() {
            0 => Ok(None),
            1 => Ok(heads.into_iter().next()),
            _ => Err(MigrationError::MultipleHeads(
                heads.iter().map(|r| r.id.clone()).collect(),
            )),
        }
    }

    pub fn bases(&self) -> Vec<&Revision> {
        self.revisions.iter().filter(|r| r.is_base()).collect()
    }

    /// `id` and everything it requires, transitively
    pub fn ancestors(&self, id: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if !out.insert(current.clone()) {
                continue;
            }
            if let Some(rev) = self.get(&current) {
                stack.extend(rev.requires());
            }
        }
        out
    }

    /// `id` and everything that requires it, transitively
    pub fn descendants(&self, id: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        out.insert(id.to_string());
        for rev in &self.revisions {
            if rev.requires().iter().any(|p| out.contains(p)) {
                out.insert(rev.id.clone());
            }
        }
        out
    }

    /// Members of `applied` that no other member requires, in apply order
    pub fn heads_of(&self, applied: &BTreeSet<String>) -> Vec<String> {
        let required: BTreeSet<String> = self
            .revisions
            .iter()
            .filter(|r| applied.contains(&r.id))
            .flat_map(|r| r.requires())
            .collect();
        self.revisions
            .iter()
            .filter(|r| applied.contains(&r.id) && !required.contains(&r.id))
            .map(|r| r.id.clone())
            .collect()
    }

    /// Everything applied when the database is at `heads`
    pub fn applied_set(&self, heads: &[String]) -> Result<BTreeSet<String>, MigrationError> {
        let mut applied = BTreeSet::new();
        for head in heads {
            if self.get(head).is_none() {
                return Err(MigrationError::MissingFile(head.clone()));
            }
            applied.extend(self.ancestors(head));
        }
        Ok(applied)
    }

    /// Revisions in `set`, in apply order
    pub fn in_order<'a>(&'a self, set: &BTreeSet<String>) -> Vec<&'a Revision> {
        self.revisions.iter().filter(|r| set.contains(&r.id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn rev(id: &str, parents: &[&str], minute: u32) -> Revision {
        let mut r = Revision::new("test", parents.iter().map(|p| p.to_string()).collect());
        r.id = id.to_string();
        r.created = NaiveDate::from_ymd_opt(2024, 1, 1).and_then(|d| d.and_hms_opt(0, minute, 0));
        r
    }

    fn linear() -> RevisionChain {
        RevisionChain::from_revisions(vec![
            rev("cccccccccccc", &["bbbbbbbbbbbb"], 3),
            rev("aaaaaaaaaaaa", &[], 1),
            rev("bbbbbbbbbbbb", &["aaaaaaaaaaaa"], 2),
        ])
        .unwrap()
    }

    #[test]
    fn test_apply_order_and_head() {
        let chain = linear();
        let ids: Vec<_> = chain.revisions().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["aaaaaaaaaaaa", "bbbbbbbbbbbb", "cccccccccccc"]);
        assert_eq!(chain.head().unwrap().unwrap().id, "cccccccccccc");
        assert_eq!(chain.bases().len(), 1);
    }

    #[test]
    fn test_branches_and_merge() {
        let mut revs = vec![
            rev("aaaaaaaaaaaa", &[], 1),
            rev("bbbbbbbbbbbb", &["aaaaaaaaaaaa"], 2),
            rev("cccccccccccc", &["aaaaaaaaaaaa"], 3),
        ];
        let chain = RevisionChain::from_revisions(revs.clone()).unwrap();
        assert!(matches!(chain.head(), Err(MigrationError::MultipleHeads(h)) if h.len() == 2));

        revs.push(rev("dddddddddddd", &["bbbbbbbbbbbb", "cccccccccccc"], 4));
        let chain = RevisionChain::from_revisions(revs).unwrap();
        assert_eq!(chain.head().unwrap().unwrap().id, "dddddddddddd");
        assert_eq!(chain.ancestors("dddddddddddd").len(), 4);
    }

    #[test]
    fn test_unknown_parent_and_cycle_rejected() {
        let err = RevisionChain::from_revisions(vec![rev("aaaaaaaaaaaa", &["ffffffffffff"], 1)]);
        assert!(matches!(err, Err(MigrationError::InvalidChain(_))));

        let err = RevisionChain::from_revisions(vec![
            rev("aaaaaaaaaaaa", &["bbbbbbbbbbbb"], 1),
            rev("bbbbbbbbbbbb", &["aaaaaaaaaaaa"], 2),
        ]);
        assert!(matches!(err, Err(MigrationError::InvalidChain(_))));
    }

    #[test]
    fn test_resolve_prefix_and_label() {
        let mut revs = vec![
            rev("aaaaaaaaaaaa", &[], 1),
            rev("abcdef012345", &["aaaaaaaaaaaa"], 2),
            rev("bbbbbbbbbbbb", &["abcdef012345"], 3),
        ];
        revs[1].branch_labels = vec!["tasting".into()];
        let chain = RevisionChain::from_revisions(revs).unwrap();
        assert_eq!(chain.resolve("abcd").unwrap().id, "abcdef012345");
        assert!(chain.resolve("a").is_err());
        assert_eq!(chain.resolve("tasting").unwrap().id, "bbbbbbbbbbbb");
        assert!(chain.resolve("zzzz").is_err());
    }

    #[test]
    fn test_heads_of_applied_set() {
        let chain = linear();
        let applied = chain.applied_set(&["bbbbbbbbbbbb".to_string()]).unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(chain.heads_of(&applied), vec!["bbbbbbbbbbbb".to_string()]);
        assert!(matches!(
            chain.applied_set(&["ffffffffffff".to_string()]),
            Err(MigrationError::MissingFile(_))
        ));
    }
}
