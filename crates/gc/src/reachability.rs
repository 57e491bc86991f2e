//! Reachability analysis over one repository's catalog snapshot.
//!
//! Roots are tag rows that are active or still inside the namespace
//! retention window. A manifest is alive iff some root targets it; a legacy
//! image is alive iff it lies on the parent chain of a root's image. The
//! analysis is a pure function of the snapshot and the reference time, so it
//! sees exactly what the enclosing transaction read.

use std::collections::{HashMap, HashSet};
use wharf_core::{RetentionWindow, TagStatus};
use wharf_metadata::models::{ImageRow, TagRow, TagTarget};

/// Rows of one repository as read inside the GC transaction.
#[derive(Debug, Clone, Default)]
pub struct RepositorySnapshot {
    pub window: RetentionWindow,
    pub tags: Vec<TagRow>,
    pub manifest_ids: Vec<i64>,
    pub images: Vec<ImageRow>,
}

/// How tag lifetimes are judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Honour the retention window at this instant.
    At { now_ms: i64 },
    /// Every tag counts as ended and expired (repository purge).
    NothingAlive,
}

/// Outcome of an analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reachability {
    /// Tag rows past their retention window, to be pruned.
    pub expired_tags: Vec<i64>,
    /// Manifests no live tag targets, ascending.
    pub dead_manifests: Vec<i64>,
    /// Images off every live chain, children before parents.
    pub dead_images: Vec<i64>,
}

impl Reachability {
    /// Whether any manifest or image is dead.
    pub fn has_dead_objects(&self) -> bool {
        !self.dead_manifests.is_empty() || !self.dead_images.is_empty()
    }
}

/// Compute what is dead in `snapshot` under `liveness`.
pub fn analyze(snapshot: &RepositorySnapshot, liveness: Liveness) -> Reachability {
    let mut expired_tags = Vec::new();
    let mut live_manifests = HashSet::new();
    let mut live_tips = Vec::new();

    for tag in &snapshot.tags {
        let alive = match liveness {
            Liveness::At { now_ms } => match tag.status(now_ms, snapshot.window) {
                TagStatus::Expired => {
                    expired_tags.push(tag.tag_id);
                    false
                }
                status => status.is_alive(),
            },
            Liveness::NothingAlive => {
                expired_tags.push(tag.tag_id);
                false
            }
        };

        if alive {
            match tag.target() {
                Some(TagTarget::Manifest(id)) => {
                    live_manifests.insert(id);
                }
                Some(TagTarget::Image(id)) => live_tips.push(id),
                None => {}
            }
        }
    }

    let mut dead_manifests: Vec<i64> = snapshot
        .manifest_ids
        .iter()
        .copied()
        .filter(|id| !live_manifests.contains(id))
        .collect();
    dead_manifests.sort_unstable();
    dead_manifests.dedup();

    let tree = ImageTree::new(&snapshot.images);
    let live_images = tree.ancestors_of(&live_tips);
    let dead_images = tree.leaf_first(|id| !live_images.contains(&id));

    Reachability {
        expired_tags,
        dead_manifests,
        dead_images,
    }
}

/// Parent links of a repository's images.
struct ImageTree {
    parents: HashMap<i64, Option<i64>>,
}

impl ImageTree {
    fn new(images: &[ImageRow]) -> Self {
        Self {
            parents: images.iter().map(|i| (i.image_id, i.parent_id)).collect(),
        }
    }

    /// Every image on the parent chains of `tips`, the tips included.
    ///
    /// Walks stop at an image already marked, so each node is visited once per
    /// pass; the step bound guards against corrupt cyclic links.
    fn ancestors_of(&self, tips: &[i64]) -> HashSet<i64> {
        let mut live = HashSet::new();
        for &tip in tips {
            let mut current = Some(tip);
            let mut steps = 0;
            while let Some(id) = current {
                if steps > self.parents.len() || !live.insert(id) {
                    break;
                }
                steps += 1;
                current = self.parents.get(&id).copied().flatten();
            }
        }
        live
    }

    /// Distance from the chain's base; memoised.
    fn depth(&self, id: i64, memo: &mut HashMap<i64, usize>) -> usize {
        let mut chain = Vec::new();
        let mut current = Some(id);
        let mut base = 0;
        while let Some(node) = current {
            if let Some(&known) = memo.get(&node) {
                base = known + 1;
                break;
            }
            if chain.len() > self.parents.len() {
                break;
            }
            chain.push(node);
            current = self.parents.get(&node).copied().flatten();
        }
        for (offset, node) in chain.iter().rev().enumerate() {
            memo.insert(*node, base + offset);
        }
        memo.get(&id).copied().unwrap_or(0)
    }

    /// Images matching `keep`, deepest first so children precede parents.
    fn leaf_first(&self, keep: impl Fn(i64) -> bool) -> Vec<i64> {
        let mut memo = HashMap::new();
        let mut selected: Vec<(usize, i64)> = self
            .parents
            .keys()
            .copied()
            .filter(|id| keep(*id))
            .map(|id| (self.depth(id, &mut memo), id))
            .collect();
        selected.sort_unstable_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        selected.into_iter().map(|(_, id)| id).collect()
    }
}
