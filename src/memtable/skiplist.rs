use std::cmp::Ordering;

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::memtable::arena::{Arena, ArenaSlice};

/// Maximum height of the skip list.
pub const MAX_HEIGHT: usize = 12;

/// Each level has a 1/BRANCHING chance of being added.
const BRANCHING: u32 = 4;

/// Index of the head sentinel in `SkipList::nodes`.
const HEAD: usize = 0;

/// A single node in the skip list.
///
/// Each node has `height` forward links. Level 0 contains all nodes
/// (a regular linked list). Higher levels skip over nodes, enabling
/// O(log n) average-case search.
///
/// ```text
/// Level 3:  HEAD ──────────────────────────────► 50 ──────────► NIL
/// Level 2:  HEAD ──────────► 20 ────────────────► 50 ──────────► NIL
/// Level 1:  HEAD ──► 10 ──► 20 ────► 35 ────────► 50 ──► 60 ──► NIL
/// Level 0:  HEAD ──► 10 ──► 20 ──► 25 ──► 35 ──► 50 ──► 60 ──► 70 ► NIL
/// ```
struct SkipNode {
    key: ArenaSlice,
    value: ArenaSlice,
    forward: Vec<Option<usize>>, // indices into SkipList.nodes
}

/// Insert-only skip list over internal keys.
///
/// Keys and values live in the arena; nodes refer to them by `ArenaSlice`
/// and to each other by index. Nothing is ever removed or mutated after
/// insertion, so a node index handed out once stays valid for the list's
/// whole life. Iterators rely on that to step without holding a lock.
pub struct SkipList {
    arena: Arena,
    nodes: Vec<SkipNode>,
    height: usize,
    len: usize,
    comparator: InternalKeyComparator,
    rng: StdRng,
}

impl SkipList {
    pub fn new(comparator: InternalKeyComparator) -> Self {
        let head = SkipNode {
            key: ArenaSlice::default(),
            value: ArenaSlice::default(),
            forward: vec![None; MAX_HEIGHT],
        };
        SkipList {
            arena: Arena::new(),
            nodes: vec![head],
            height: 1,
            len: 0,
            comparator,
            rng: StdRng::seed_from_u64(0xdead_beef),
        }
    }

    /// Insert an entry. The internal key must not already be present:
    /// sequence numbers make every internal key unique.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) {
        let mut prev = [HEAD; MAX_HEIGHT];
        let existing = self.find_greater_or_equal(key, Some(&mut prev));
        debug_assert!(
            existing.is_none_or(|n| self.compare_node(n, key) != Ordering::Equal),
            "duplicate internal key inserted into skip list"
        );

        // Levels above the current height already point at HEAD in `prev`.
        let height = self.random_height();
        self.height = self.height.max(height);

        let key = self.arena.alloc_copy(key);
        let value = self.arena.alloc_copy(value);
        let idx = self.nodes.len();
        let mut forward = vec![None; height];
        for (level, link) in forward.iter_mut().enumerate() {
            *link = self.nodes[prev[level]].forward[level];
        }
        self.nodes.push(SkipNode {
            key,
            value,
            forward,
        });
        for (level, &p) in prev.iter().enumerate().take(height) {
            self.nodes[p].forward[level] = Some(idx);
        }
        self.len += 1;
    }

    /// Whether an entry equal to `key` is present.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.find_greater_or_equal(key, None)
            .is_some_and(|n| self.compare_node(n, key) == Ordering::Equal)
    }

    /// First node whose key is `>= key`, optionally recording the last node
    /// visited at every level (the insertion predecessors).
    pub fn find_greater_or_equal(
        &self,
        key: &[u8],
        mut prev: Option<&mut [usize; MAX_HEIGHT]>,
    ) -> Option<usize> {
        let mut x = HEAD;
        let mut level = self.height - 1;
        loop {
            let next = self.nodes[x].forward[level];
            match next {
                Some(n) if self.compare_node(n, key) == Ordering::Less => {
                    x = n;
                }
                _ => {
                    if let Some(p) = prev.as_deref_mut() {
                        p[level] = x;
                    }
                    if level == 0 {
                        return next;
                    }
                    level -= 1;
                }
            }
        }
    }

    /// Last node whose key is `< key`, or `None` if there is none.
    pub fn find_less_than(&self, key: &[u8]) -> Option<usize> {
        let mut x = HEAD;
        let mut level = self.height - 1;
        loop {
            match self.nodes[x].forward[level] {
                Some(n) if self.compare_node(n, key) == Ordering::Less => x = n,
                _ => {
                    if level == 0 {
                        return (x != HEAD).then_some(x);
                    }
                    level -= 1;
                }
            }
        }
    }

    /// Last node in the list, or `None` if empty.
    pub fn find_last(&self) -> Option<usize> {
        let mut x = HEAD;
        let mut level = self.height - 1;
        loop {
            match self.nodes[x].forward[level] {
                Some(n) => x = n,
                None => {
                    if level == 0 {
                        return (x != HEAD).then_some(x);
                    }
                    level -= 1;
                }
            }
        }
    }

    pub fn first(&self) -> Option<usize> {
        self.nodes[HEAD].forward[0]
    }

    pub fn next(&self, node: usize) -> Option<usize> {
        self.nodes[node].forward[0]
    }

    pub fn key(&self, node: usize) -> &[u8] {
        self.arena.get(self.nodes[node].key)
    }

    pub fn value(&self, node: usize) -> &[u8] {
        self.arena.get(self.nodes[node].value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Approximate memory usage in bytes: arena plus node links.
    pub fn memory_usage(&self) -> usize {
        self.arena.memory_usage()
            + self.nodes.capacity() * std::mem::size_of::<SkipNode>()
            + self
                .nodes
                .iter()
                .map(|n| n.forward.len() * std::mem::size_of::<Option<usize>>())
                .sum::<usize>()
    }

    fn compare_node(&self, node: usize, key: &[u8]) -> Ordering {
        self.comparator.compare(self.key(node), key)
    }

    /// Each level has a 1/4 probability (LevelDB uses 1/4, not 1/2).
    /// Higher branching factor = shorter skip list = fewer levels = less memory.
    fn random_height(&mut self) -> usize {
        let mut height = 1;
        while height < MAX_HEIGHT && self.rng.gen_ratio(1, BRANCHING) {
            height += 1;
        }
        height
    }
}
