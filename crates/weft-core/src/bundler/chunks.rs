//! Chunk planning.
//!
//! One chunk per entry point. A chunk holds its entry and everything
//! reachable from it without passing through another entry, ordered so
//! every module comes after the modules it imports. Chunks are ordered so
//! a chunk comes after the chunks of the entries it imports.

use super::graph::{ModuleGraph, ModuleId};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};

/// A group of modules destined for one output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Entry name; also the `[name]` of the output file.
    pub name: String,
    pub entry: ModuleId,
    /// Dependencies before dependents. Ties follow import order.
    pub modules: Vec<ModuleId>,
    /// Entries of other chunks this chunk reaches, directly or through
    /// those chunks. They must be registered before the entry runs.
    pub requires: Vec<ModuleId>,
}

impl Chunk {
    #[must_use]
    pub fn contains(&self, id: ModuleId) -> bool {
        self.modules.contains(&id)
    }
}

/// The chunks of one build.
#[derive(Debug, Clone, Default)]
pub struct ChunkPlan {
    chunks: Vec<Chunk>,
}

impl ChunkPlan {
    /// Plan one chunk per entry.
    ///
    /// Chunks are in load order: a chunk follows the chunks whose entries
    /// it imports. Otherwise entries keep their declaration order. Import
    /// cycles between entries are broken at the first revisit.
    #[must_use]
    pub fn per_entry(graph: &ModuleGraph) -> Self {
        let planned: Vec<Chunk> = graph
            .entries()
            .iter()
            .map(|(name, entry)| {
                let modules = linearize(graph, *entry);
                let imports = entry_imports(graph, *entry, &modules);
                Chunk {
                    name: name.clone(),
                    entry: *entry,
                    modules,
                    requires: imports,
                }
            })
            .collect();

        let mut direct: HashMap<ModuleId, Vec<ModuleId>> = HashMap::default();
        let mut index: HashMap<ModuleId, usize> = HashMap::default();
        for (i, chunk) in planned.iter().enumerate() {
            direct.entry(chunk.entry).or_insert_with(|| chunk.requires.clone());
            index.entry(chunk.entry).or_insert(i);
        }

        let mut order = Vec::with_capacity(planned.len());
        let mut visited = vec![false; planned.len()];
        for start in 0..planned.len() {
            visit_chunk(start, &planned, &direct, &index, &mut visited, &mut order);
        }

        let mut slots: Vec<Option<Chunk>> = planned.into_iter().map(Some).collect();
        let chunks = order
            .into_iter()
            .filter_map(|i| slots[i].take())
            .map(|mut chunk| {
                chunk.requires = reachable_entries(&direct, chunk.entry);
                chunk
            })
            .collect();
        Self { chunks }
    }

    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Names of the chunks that include `id`.
    pub fn chunks_containing(&self, id: ModuleId) -> impl Iterator<Item = &str> {
        self.chunks
            .iter()
            .filter(move |c| c.contains(id))
            .map(|c| c.name.as_str())
    }
}

/// Other entries imported directly by the modules of a chunk, in import order.
fn entry_imports(graph: &ModuleGraph, entry: ModuleId, modules: &[ModuleId]) -> Vec<ModuleId> {
    let mut seen = HashSet::default();
    modules
        .iter()
        .flat_map(|&id| graph.dependency_ids(id))
        .filter(|&dep| dep != entry && graph.is_entry(dep))
        .filter(|&dep| seen.insert(dep))
        .collect()
}

/// Post-order over entry imports, so imported chunks load first.
fn visit_chunk(
    i: usize,
    chunks: &[Chunk],
    direct: &HashMap<ModuleId, Vec<ModuleId>>,
    index: &HashMap<ModuleId, usize>,
    visited: &mut [bool],
    order: &mut Vec<usize>,
) {
    if visited[i] {
        return;
    }
    visited[i] = true;
    for dep in direct.get(&chunks[i].entry).into_iter().flatten() {
        if let Some(&j) = index.get(dep) {
            visit_chunk(j, chunks, direct, index, visited, order);
        }
    }
    order.push(i);
}

/// Every entry reachable from `start` through entry imports, excluding `start`.
fn reachable_entries(direct: &HashMap<ModuleId, Vec<ModuleId>>, start: ModuleId) -> Vec<ModuleId> {
    let mut seen = HashSet::default();
    seen.insert(start);
    let mut found = Vec::new();
    let mut stack = vec![start];
    while let Some(id) = stack.pop() {
        for &dep in direct.get(&id).into_iter().flatten() {
            if seen.insert(dep) {
                found.push(dep);
                stack.push(dep);
            }
        }
    }
    found
}

/// Depth-first post-order from `entry`.
///
/// Dependencies are visited in import order, so siblings keep their
/// declaration order. Cycles are broken at the first revisit.
fn linearize(graph: &ModuleGraph, entry: ModuleId) -> Vec<ModuleId> {
    let mut order = Vec::new();
    let mut visited: HashSet<ModuleId> = HashSet::default();
    // (module, its dependencies, index of the next one to visit)
    let mut stack: Vec<(ModuleId, Vec<ModuleId>, usize)> = Vec::new();

    visited.insert(entry);
    stack.push((entry, graph.dependency_ids(entry), 0));

    while let Some((id, deps, next)) = stack.last_mut() {
        if let Some(&dep) = deps.get(*next) {
            *next += 1;
            let other_entry = dep != entry && graph.is_entry(dep);
            if !other_entry && visited.insert(dep) {
                let dep_deps = graph.dependency_ids(dep);
                stack.push((dep, dep_deps, 0));
            }
        } else {
            order.push(*id);
            stack.pop();
        }
    }
    order
}
