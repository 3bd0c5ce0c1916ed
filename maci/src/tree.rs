use crate::*;

/// How the nodes of a tree are hashed.
///
/// In mixed mode the bottom `num_levels` levels use the sub hash and every
/// level above them uses the primary hash.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeHashing {
    pub primary: HashKind,
    pub sub: Option<SubHashing>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubHashing {
    pub hash: HashKind,
    pub num_levels: usize,
}

impl TreeHashing {
    pub fn poseidon() -> Self {
        TreeHashing {
            primary: HashKind::Poseidon,
            sub: None,
        }
    }

    pub fn mixed(primary: HashKind, sub: HashKind, num_sub_levels: usize) -> Self {
        TreeHashing {
            primary,
            sub: Some(SubHashing {
                hash: sub,
                num_levels: num_sub_levels,
            }),
        }
    }

    /// Hash the children at `level` into their parent at `level + 1`
    pub fn hash_children(&self, level: usize, children: &[Fr]) -> Fr {
        match self.sub {
            Some(sub) if level < sub.num_levels => sub.hash.hash(children),
            _ => self.primary.hash(children),
        }
    }
}

impl Default for TreeHashing {
    fn default() -> Self {
        TreeHashing::poseidon()
    }
}

/// An append-only Merkle tree of fixed arity and depth.
///
/// Only the filled part of every level is stored; anything to the right of
/// it is the precomputed zero for that level. Cloning the tree is the way to
/// take a snapshot before a speculative batch of writes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IncrementalTree {
    depth: usize,
    arity: usize,
    hashing: TreeHashing,

    #[serde(with = "serde_field::vec")]
    zeros: Vec<Fr>,

    #[serde(with = "serde_field::vec2")]
    nodes: Vec<Vec<Fr>>,
}

/// Siblings and child positions from a leaf up to the root.
///
/// Level 0 is the level of the leaves. Every level has `arity - 1` siblings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MerklePath {
    pub index: usize,

    #[serde(with = "serde_field")]
    pub leaf: Fr,

    #[serde(with = "serde_field::vec2")]
    pub path_elements: Vec<Vec<Fr>>,

    pub indices: Vec<usize>,

    #[serde(with = "serde_field")]
    pub root: Fr,
}

/// The root of an aligned batch of leaves and the path splicing it into the tree
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SubrootPath {
    pub arity: usize,
    pub start_index: usize,
    pub batch_size: usize,
    pub sub_depth: usize,

    #[serde(with = "serde_field::vec")]
    pub leaves: Vec<Fr>,

    #[serde(with = "serde_field")]
    pub subroot: Fr,

    #[serde(with = "serde_field::vec2")]
    pub path_elements: Vec<Vec<Fr>>,

    pub indices: Vec<usize>,

    #[serde(with = "serde_field")]
    pub root: Fr,
}

impl IncrementalTree {
    pub fn new(
        depth: usize,
        arity: usize,
        zero_value: Fr,
        hashing: TreeHashing,
    ) -> Result<Self, Error> {
        if !(2..=5).contains(&arity) {
            return Err(Error::InvalidArity(arity));
        }
        if depth == 0 {
            return Err(Error::InvalidConfig("tree depth must be at least 1".into()));
        }

        let mut zeros = Vec::with_capacity(depth + 1);
        zeros.push(zero_value);
        for level in 0..depth {
            let children = vec![zeros[level]; arity];
            zeros.push(hashing.hash_children(level, &children));
        }

        Ok(IncrementalTree {
            depth,
            arity,
            hashing,
            zeros,
            nodes: vec![Vec::new(); depth + 1],
        })
    }

    /// A quinary tree hashed with Poseidon at every level
    pub fn quin(depth: usize, zero_value: Fr) -> Result<Self, Error> {
        IncrementalTree::new(depth, 5, zero_value, TreeHashing::poseidon())
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn hashing(&self) -> TreeHashing {
        self.hashing
    }

    pub fn zero_value(&self) -> Fr {
        self.zeros[0]
    }

    /// Maximum number of leaves, `arity^depth`
    pub fn capacity(&self) -> usize {
        self.arity
            .checked_pow(self.depth as u32)
            .unwrap_or(usize::MAX)
    }

    /// Index the next inserted leaf will get
    pub fn next_index(&self) -> usize {
        self.nodes[0].len()
    }

    pub fn leaves(&self) -> &[Fr] {
        &self.nodes[0]
    }

    pub fn root(&self) -> Fr {
        self.node(self.depth, 0)
    }

    pub fn get_leaf(&self, index: usize) -> Result<Fr, Error> {
        self.nodes[0]
            .get(index)
            .copied()
            .ok_or(Error::IndexOutOfRange {
                index,
                len: self.next_index(),
            })
    }

    /// Append a leaf, returning its index
    pub fn insert(&mut self, leaf: Fr) -> Result<usize, Error> {
        let index = self.next_index();
        if index >= self.capacity() {
            return Err(Error::CapacityExceeded(self.capacity()));
        }
        self.nodes[0].push(leaf);
        self.recompute_path(index);
        Ok(index)
    }

    /// Replace an existing leaf
    pub fn update(&mut self, index: usize, leaf: Fr) -> Result<(), Error> {
        if index >= self.next_index() {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.next_index(),
            });
        }
        self.nodes[0][index] = leaf;
        self.recompute_path(index);
        Ok(())
    }

    /// Repeat the last leaf until the leaf count is a multiple of `batch_size`
    pub fn pad_to_batch(&mut self, batch_size: usize) -> Result<usize, Error> {
        let last = match self.nodes[0].last() {
            Some(last) => *last,
            None => return Ok(0),
        };
        let mut added = 0;
        while batch_size > 0 && self.next_index() % batch_size != 0 {
            self.insert(last)?;
            added += 1;
        }
        Ok(added)
    }

    pub fn gen_merkle_path(&self, index: usize) -> Result<MerklePath, Error> {
        let leaf = self.get_leaf(index)?;
        let (path_elements, indices) = self.path_from(0, index);

        Ok(MerklePath {
            index,
            leaf,
            path_elements,
            indices,
            root: self.root(),
        })
    }

    /// Path for the aligned batch `[start_index, start_index + batch_size)`.
    ///
    /// `batch_size` must be a power of the arity. Empty slots inside the
    /// batch read as the zero value.
    pub fn gen_merkle_subroot_path(
        &self,
        start_index: usize,
        batch_size: usize,
    ) -> Result<SubrootPath, Error> {
        let sub_depth = self.batch_depth(batch_size).ok_or(Error::InvalidBatch {
            start: start_index,
            size: batch_size,
            reason: "batch size must be a power of the tree arity",
        })?;
        if start_index % batch_size != 0 {
            return Err(Error::InvalidBatch {
                start: start_index,
                size: batch_size,
                reason: "start index must be a multiple of the batch size",
            });
        }
        if start_index >= self.next_index() {
            return Err(Error::IndexOutOfRange {
                index: start_index,
                len: self.next_index(),
            });
        }

        let leaves = (start_index..start_index + batch_size)
            .map(|i| self.node(0, i))
            .collect();
        let subroot_index = start_index / batch_size;
        let (path_elements, indices) = self.path_from(sub_depth, subroot_index);

        Ok(SubrootPath {
            arity: self.arity,
            start_index,
            batch_size,
            sub_depth,
            leaves,
            subroot: self.node(sub_depth, subroot_index),
            path_elements,
            indices,
            root: self.root(),
        })
    }

    /// Recompute the root from a path. Malformed paths verify as false.
    pub fn verify_merkle_path(path: &MerklePath, hashing: &TreeHashing) -> bool {
        match climb(path.leaf, 0, &path.path_elements, &path.indices, hashing) {
            Some(root) => root == path.root,
            None => false,
        }
    }

    pub fn verify_subroot_path(path: &SubrootPath, hashing: &TreeHashing) -> bool {
        if path.leaves.len() != path.batch_size || path.batch_size == 0 {
            return false;
        }
        let arity = path.arity;
        if arity < 2 {
            return false;
        }

        let mut level_nodes = path.leaves.clone();
        for level in 0..path.sub_depth {
            if level_nodes.len() % arity != 0 {
                return false;
            }
            level_nodes = level_nodes
                .chunks(arity)
                .map(|children| hashing.hash_children(level, children))
                .collect();
        }
        if level_nodes.len() != 1 || level_nodes[0] != path.subroot {
            return false;
        }

        match climb(
            path.subroot,
            path.sub_depth,
            &path.path_elements,
            &path.indices,
            hashing,
        ) {
            Some(root) => root == path.root,
            None => false,
        }
    }

    fn node(&self, level: usize, index: usize) -> Fr {
        self.nodes[level]
            .get(index)
            .copied()
            .unwrap_or(self.zeros[level])
    }

    fn set_node(&mut self, level: usize, index: usize, value: Fr) {
        let row = &mut self.nodes[level];
        if index < row.len() {
            row[index] = value;
        } else {
            row.push(value);
        }
    }

    fn children(&self, level: usize, parent: usize) -> Vec<Fr> {
        (0..self.arity)
            .map(|k| self.node(level, parent * self.arity + k))
            .collect()
    }

    fn recompute_path(&mut self, index: usize) {
        let mut i = index;
        for level in 0..self.depth {
            let parent = i / self.arity;
            let children = self.children(level, parent);
            let hash = self.hashing.hash_children(level, &children);
            self.set_node(level + 1, parent, hash);
            i = parent;
        }
    }

    fn path_from(&self, start_level: usize, index: usize) -> (Vec<Vec<Fr>>, Vec<usize>) {
        let mut path_elements = Vec::with_capacity(self.depth - start_level);
        let mut indices = Vec::with_capacity(self.depth - start_level);

        let mut i = index;
        for level in start_level..self.depth {
            let position = i % self.arity;
            let parent = i / self.arity;
            let siblings = self
                .children(level, parent)
                .into_iter()
                .enumerate()
                .filter(|(k, _)| *k != position)
                .map(|(_, node)| node)
                .collect();
            path_elements.push(siblings);
            indices.push(position);
            i = parent;
        }
        (path_elements, indices)
    }

    fn batch_depth(&self, batch_size: usize) -> Option<usize> {
        let mut size = 1;
        for k in 0..=self.depth {
            if size == batch_size {
                return Some(k);
            }
            size = size.checked_mul(self.arity)?;
        }
        None
    }
}

// Splice `node` in at each level's position and hash upwards
fn climb(
    node: Fr,
    start_level: usize,
    path_elements: &[Vec<Fr>],
    indices: &[usize],
    hashing: &TreeHashing,
) -> Option<Fr> {
    if path_elements.len() != indices.len() {
        return None;
    }

    let mut current = node;
    for (offset, (siblings, position)) in path_elements.iter().zip(indices).enumerate() {
        let arity = siblings.len() + 1;
        if arity < 2 || *position >= arity {
            return None;
        }
        let mut children = siblings.clone();
        children.insert(*position, current);
        current = hashing.hash_children(start_level + offset, &children);
    }
    Some(current)
}
