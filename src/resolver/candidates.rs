use crate::catalog::compiled::CompiledCatalog;
use crate::catalog::descriptor::FunctionDescriptor;
use crate::core::requirement::ValueRequirement;
use crate::core::specification::ValueSpecification;
use crate::cost::CostModel;
use std::sync::Arc;

/// One function that could satisfy a requirement, with its concrete
/// output and the keys candidate ordering sorts on.
pub(crate) struct Candidate {
    pub descriptor: Arc<FunctionDescriptor>,
    pub output: ValueSpecification,
    specificity: usize,
    cost: f64,
}

/// Enumerate and order the candidates for a requirement.
///
/// A descriptor becomes a candidate only if its output template
/// intersects the requirement's constraints. Ordering is total and
/// deterministic — required for reproducible graphs:
///
/// 1. more specific output first (fewer wildcard properties),
/// 2. then lower estimated cost,
/// 3. then higher declared priority,
/// 4. then function id.
pub(crate) fn enumerate_candidates(
    catalog: &CompiledCatalog,
    cost: &CostModel,
    req: &ValueRequirement,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = catalog
        .functions_producing(req.target().target_type(), req.value_name())
        .iter()
        .filter_map(|descriptor| {
            let output = descriptor.resolved_output(req)?;
            Some(Candidate {
                specificity: output.properties().specificity(),
                cost: cost.estimate(descriptor.id()),
                descriptor: Arc::clone(descriptor),
                output,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.specificity
            .cmp(&a.specificity)
            .then_with(|| a.cost.total_cmp(&b.cost))
            .then_with(|| b.descriptor.priority().cmp(&a.descriptor.priority()))
            .then_with(|| a.descriptor.id().cmp(b.descriptor.id()))
    });
    candidates
}
