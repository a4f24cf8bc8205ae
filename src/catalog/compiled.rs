use crate::catalog::descriptor::{FunctionBody, FunctionDescriptor, FunctionId};
use crate::core::target::ComputationTargetType;
use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// Mutable registry of compute functions.
///
/// Registration happens at configuration time; resolution never sees this
/// structure. Callers [`compile`](FunctionCatalog::compile) it into an
/// immutable snapshot first, so a hot-reload of available functions can
/// never become visible mid-resolution.
#[derive(Default)]
pub struct FunctionCatalog {
    entries: Vec<(Arc<FunctionDescriptor>, Arc<dyn FunctionBody>)>,
}

impl FunctionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function's declared contract together with its body.
    pub fn register(
        &mut self,
        descriptor: FunctionDescriptor,
        body: impl FunctionBody + 'static,
    ) {
        self.entries.push((Arc::new(descriptor), Arc::new(body)));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take an immutable, versioned snapshot of the registry.
    ///
    /// The dispatch index from `(target type, value name)` to candidate
    /// descriptors is built here, once, rather than searched per call
    /// during resolution. Descriptors for the same key are ordered by
    /// declared priority (descending), then id, so candidate enumeration
    /// is stable across compiles of the same registry.
    pub fn compile(&self) -> Arc<CompiledCatalog> {
        let version = NEXT_VERSION.fetch_add(1, Ordering::Relaxed);
        let mut by_output: HashMap<(ComputationTargetType, String), Vec<Arc<FunctionDescriptor>>> =
            HashMap::new();
        let mut bodies: HashMap<FunctionId, Arc<dyn FunctionBody>> = HashMap::new();

        for (descriptor, body) in &self.entries {
            for output in descriptor.outputs() {
                by_output
                    .entry((descriptor.target_type(), output.value_name.clone()))
                    .or_default()
                    .push(Arc::clone(descriptor));
            }
            bodies.insert(descriptor.id().clone(), Arc::clone(body));
        }

        for candidates in by_output.values_mut() {
            candidates.sort_by(|a, b| {
                b.priority()
                    .cmp(&a.priority())
                    .then_with(|| a.id().cmp(b.id()))
            });
        }

        debug!(
            "compiled function catalog v{}: {} functions, {} output keys",
            version,
            self.entries.len(),
            by_output.len()
        );

        Arc::new(CompiledCatalog {
            version,
            by_output,
            bodies,
        })
    }
}

/// An immutable, versioned snapshot of the function catalog.
///
/// Shared by reference across resolver and scheduler instances; the
/// version participates in graph-cache keys so a recompile invalidates
/// previously resolved graphs.
pub struct CompiledCatalog {
    version: u64,
    by_output: HashMap<(ComputationTargetType, String), Vec<Arc<FunctionDescriptor>>>,
    bodies: HashMap<FunctionId, Arc<dyn FunctionBody>>,
}

impl CompiledCatalog {
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Candidate descriptors producing `value_name` on a target of
    /// `target_type`, in declared-priority order.
    pub fn functions_producing(
        &self,
        target_type: ComputationTargetType,
        value_name: &str,
    ) -> &[Arc<FunctionDescriptor>] {
        self.by_output
            .get(&(target_type, value_name.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn body(&self, id: &FunctionId) -> Option<&Arc<dyn FunctionBody>> {
        self.bodies.get(id)
    }

    pub fn function_count(&self) -> usize {
        self.bodies.len()
    }
}
