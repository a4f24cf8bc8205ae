//! Caching of resolved dependency graphs.
//!
//! Resolution is the expensive step of a calculation cycle, and most
//! cycles re-run the same requirements against the same catalog. The
//! cache keys graphs by universe, requirement batch and catalog
//! version, and when only the batch changed it reuses the previous
//! graph's nodes by reference instead of resolving from scratch.

use crate::core::requirement::ValueRequirement;
use crate::graph::dep_graph::{DependencyGraph, GraphError};
use crate::resolver::GraphResolver;
use dashmap::DashMap;
use log::{debug, info};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity of one cached graph.
///
/// The requirement digest hashes the sorted sequence of per-requirement
/// hashes, so it is insensitive to batch order but still sensitive to
/// multiplicity: the same requirements in a different order hit the
/// same entry, while a batch with an entry added or removed does not.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    universe: String,
    requirements_digest: u64,
    catalog_version: u64,
}

impl CacheKey {
    fn new(universe: &str, requirements: &[ValueRequirement], catalog_version: u64) -> Self {
        let mut per_req: Vec<u64> = requirements
            .iter()
            .map(|req| {
                let mut hasher = DefaultHasher::new();
                req.hash(&mut hasher);
                hasher.finish()
            })
            .collect();
        per_req.sort_unstable();
        let mut hasher = DefaultHasher::new();
        per_req.hash(&mut hasher);
        Self {
            universe: universe.to_string(),
            requirements_digest: hasher.finish(),
            catalog_version,
        }
    }

    pub fn universe(&self) -> &str {
        &self.universe
    }
}

/// How a lookup was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// The exact graph was already cached.
    Hit,
    /// Nothing usable was cached; a full resolution ran.
    Miss,
    /// The universe's previous graph seeded the resolution; `reused`
    /// nodes were carried over by reference, `added` are new.
    Incremental { reused: usize, added: usize },
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub incrementals: u64,
}

/// A concurrent cache of resolved graphs, one resolver behind it.
///
/// # Examples
///
/// ```
/// use depgraph_engine::cache::GraphCache;
/// use depgraph_engine::cost::CostModel;
/// use depgraph_engine::catalog::compiled::FunctionCatalog;
/// use depgraph_engine::exec::market::NoMarketData;
/// use depgraph_engine::resolver::GraphResolver;
/// use std::sync::Arc;
///
/// let resolver = GraphResolver::new(
///     FunctionCatalog::new().compile(),
///     Arc::new(CostModel::default()),
///     Arc::new(NoMarketData),
/// );
/// let cache = GraphCache::new(Arc::new(resolver));
/// let (graph, _) = cache.get_or_resolve("risk", &[]).unwrap();
/// assert_eq!(graph.node_count(), 0);
/// ```
pub struct GraphCache {
    resolver: Arc<GraphResolver>,
    graphs: DashMap<CacheKey, Arc<DependencyGraph>>,
    /// Most recent graph per universe, the seed for incremental rebuilds.
    latest: DashMap<String, (CacheKey, Arc<DependencyGraph>)>,
    hits: AtomicU64,
    misses: AtomicU64,
    incrementals: AtomicU64,
}

impl GraphCache {
    pub fn new(resolver: Arc<GraphResolver>) -> Self {
        Self {
            resolver,
            graphs: DashMap::new(),
            latest: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            incrementals: AtomicU64::new(0),
        }
    }

    pub fn resolver(&self) -> &Arc<GraphResolver> {
        &self.resolver
    }

    /// Fetch the graph for a requirement batch, resolving on demand.
    ///
    /// A batch previously seen for this universe and catalog version is
    /// returned as-is. Otherwise, if the universe has any graph under
    /// the current catalog version, that graph seeds an incremental
    /// resolution; unchanged subtrees come back as the same `Arc`
    /// nodes. A catalog recompile changes the version and forces a full
    /// resolution.
    pub fn get_or_resolve(
        &self,
        universe: &str,
        requirements: &[ValueRequirement],
    ) -> Result<(Arc<DependencyGraph>, CacheOutcome), GraphError> {
        let key = CacheKey::new(universe, requirements, self.resolver.catalog_version());

        if let Some(cached) = self.graphs.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("graph cache hit for universe '{}'", universe);
            return Ok((Arc::clone(&cached), CacheOutcome::Hit));
        }

        let seed = self.latest.get(universe).and_then(|entry| {
            let (prior_key, graph) = entry.value();
            if prior_key.catalog_version == key.catalog_version {
                Some(Arc::clone(graph))
            } else {
                None
            }
        });

        let (graph, outcome) = match seed {
            Some(previous) => {
                let graph = self.resolver.resolve_seeded(requirements, &previous)?;
                let reused = graph
                    .nodes()
                    .filter(|node| {
                        previous
                            .node_producing(node.primary_output())
                            .is_some_and(|prior| Arc::ptr_eq(prior, node))
                    })
                    .count();
                let added = graph.node_count() - reused;
                self.incrementals.fetch_add(1, Ordering::Relaxed);
                info!(
                    "incremental rebuild for universe '{}': {} reused, {} added",
                    universe, reused, added
                );
                (Arc::new(graph), CacheOutcome::Incremental { reused, added })
            }
            None => {
                let graph = self.resolver.resolve(requirements)?;
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "graph cache miss for universe '{}': resolved {} nodes",
                    universe,
                    graph.node_count()
                );
                (Arc::new(graph), CacheOutcome::Miss)
            }
        };

        self.graphs.insert(key.clone(), Arc::clone(&graph));
        self.latest
            .insert(universe.to_string(), (key, Arc::clone(&graph)));
        Ok((graph, outcome))
    }

    /// Drop every cached graph for a universe.
    pub fn invalidate(&self, universe: &str) {
        self.graphs.retain(|key, _| key.universe != universe);
        self.latest.remove(universe);
    }

    pub fn clear(&self) {
        self.graphs.clear();
        self.latest.clear();
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            incrementals: self.incrementals.load(Ordering::Relaxed),
        }
    }
}
