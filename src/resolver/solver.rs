//! The backtracking search at the heart of resolution.
//!
//! Recursion over candidate inputs is replaced by an explicit stack of
//! [`Frame`]s, so deep dependency chains cannot overflow the call stack
//! and the whole search state is inspectable in one place.

use crate::catalog::compiled::CompiledCatalog;
use crate::core::requirement::ValueRequirement;
use crate::core::specification::ValueSpecification;
use crate::cost::CostModel;
use crate::exec::market::MarketDataAvailability;
use crate::exec::scheduler::CancelToken;
use crate::graph::dep_graph::GraphBuilder;
use crate::graph::node::DependencyNode;
use crate::resolver::candidates::{enumerate_candidates, Candidate};
use crate::resolver::ResolverConfig;
use log::{debug, trace};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// What the search learned about a requirement, kept across the whole
/// resolution pass so repeated requirements are answered immediately.
#[derive(Clone)]
enum ReqOutcome {
    Resolved(ValueSpecification),
    Unsatisfiable(String),
}

/// Counters for one resolution pass.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct PassMetrics {
    pub candidates_evaluated: u64,
    pub requirements_resolved: u64,
    pub requirements_unsatisfied: u64,
    pub memo_hits: u64,
}

/// Mutable state shared by every frame of one resolution pass.
pub(crate) struct SearchState<'a> {
    catalog: &'a CompiledCatalog,
    cost: &'a CostModel,
    market: &'a dyn MarketDataAvailability,
    config: &'a ResolverConfig,
    pub builder: GraphBuilder,
    /// Per-pass memo: requirement -> final outcome. Failures caused by
    /// the in-progress guard or the depth cap are path-dependent and
    /// never recorded here.
    req_memo: HashMap<ValueRequirement, ReqOutcome>,
    /// All specifications produced so far, indexed for satisfies()
    /// scans without walking every node.
    spec_index: HashMap<(String, crate::core::target::ComputationTargetSpec), Vec<ValueSpecification>>,
    /// Outputs of candidates currently being expanded somewhere up the
    /// stack. A candidate whose output is in here would close a cycle.
    in_progress: HashSet<ValueSpecification>,
    /// Checked once per search step; raising it abandons the search
    /// between steps, never mid-commit.
    cancel: Option<&'a CancelToken>,
    pub metrics: PassMetrics,
}

impl<'a> SearchState<'a> {
    pub fn new(
        catalog: &'a CompiledCatalog,
        cost: &'a CostModel,
        market: &'a dyn MarketDataAvailability,
        config: &'a ResolverConfig,
        builder: GraphBuilder,
        cancel: Option<&'a CancelToken>,
    ) -> Self {
        let mut spec_index: HashMap<_, Vec<ValueSpecification>> = HashMap::new();
        for node in builder.pending_nodes() {
            for output in node.outputs() {
                spec_index
                    .entry((output.value_name().to_string(), output.target().clone()))
                    .or_default()
                    .push(output.clone());
            }
        }
        Self {
            catalog,
            cost,
            market,
            config,
            builder,
            req_memo: HashMap::new(),
            spec_index,
            in_progress: HashSet::new(),
            cancel,
            metrics: PassMetrics::default(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(CancelToken::is_cancelled)
    }

    /// A specification already in the graph that satisfies `req`, if
    /// any. Specifications still being expanded are skipped; matching
    /// one would wire a cycle.
    fn find_existing(&self, req: &ValueRequirement) -> Option<ValueSpecification> {
        let key = (req.value_name().to_string(), req.target().clone());
        self.spec_index.get(&key)?.iter().find(|spec| spec.satisfies(req)).cloned()
    }

    /// Add a node to the builder and index its outputs. Returns the
    /// stored node, which is the pre-existing one when the primary
    /// output was already produced.
    fn commit_node(&mut self, node: Arc<DependencyNode>) -> Arc<DependencyNode> {
        let is_new = !self.builder.contains(node.primary_output());
        let stored = self.builder.add_node(node);
        if is_new {
            for output in stored.outputs() {
                self.spec_index
                    .entry((output.value_name().to_string(), output.target().clone()))
                    .or_default()
                    .push(output.clone());
            }
        }
        stored
    }

    fn memoize_success(&mut self, req: ValueRequirement, spec: ValueSpecification) {
        self.metrics.requirements_resolved += 1;
        self.req_memo.insert(req, ReqOutcome::Resolved(spec));
    }
}

/// One requirement under resolution: the candidates tried so far and,
/// when a candidate is active, its input progress.
struct Frame {
    requirement: ValueRequirement,
    candidates: Vec<Candidate>,
    candidate_idx: usize,
    /// True between candidate activation and its last input resolving.
    active: bool,
    inputs: Vec<ValueRequirement>,
    next_input: usize,
    resolved_inputs: Vec<ValueSpecification>,
    /// Set when any candidate was rejected by the in-progress guard or
    /// the depth cap. A failure of that kind is only valid on this
    /// path, so it must not be memoized as unsatisfiable.
    cycle_blocked: bool,
}

impl Frame {
    fn new(requirement: ValueRequirement, candidates: Vec<Candidate>) -> Self {
        Self {
            requirement,
            candidates,
            candidate_idx: 0,
            active: false,
            inputs: Vec::new(),
            next_input: 0,
            resolved_inputs: Vec::new(),
            cycle_blocked: false,
        }
    }

    fn current_output(&self) -> &ValueSpecification {
        &self.candidates[self.candidate_idx].output
    }
}

/// A finished frame's result, handed to its parent frame.
struct ChildResult {
    result: Result<ValueSpecification, String>,
    cycle_blocked: bool,
}

/// Resolve one requirement, growing `state.builder` with every node the
/// chosen resolution needs. On failure the reason is returned; any
/// nodes committed by abandoned candidates stay in the builder and are
/// trimmed at build time if nothing ends up needing them.
pub(crate) fn resolve_requirement(
    state: &mut SearchState<'_>,
    requirement: &ValueRequirement,
) -> Result<ValueSpecification, String> {
    match state.req_memo.get(requirement) {
        Some(ReqOutcome::Resolved(spec)) => {
            state.metrics.memo_hits += 1;
            return Ok(spec.clone());
        }
        Some(ReqOutcome::Unsatisfiable(reason)) => {
            state.metrics.memo_hits += 1;
            return Err(reason.clone());
        }
        None => {}
    }
    if let Some(spec) = state.find_existing(requirement) {
        state.memoize_success(requirement.clone(), spec.clone());
        return Ok(spec);
    }

    let mut stack = vec![Frame::new(
        requirement.clone(),
        enumerate_candidates(state.catalog, state.cost, requirement),
    )];
    // Result of the frame most recently popped, awaiting delivery to
    // the frame now on top.
    let mut delivery: Option<ChildResult> = None;

    loop {
        if state.is_cancelled() {
            debug!("resolution cancelled while resolving [{}]", requirement);
            for frame in &stack {
                if frame.active {
                    state.in_progress.remove(frame.current_output());
                }
            }
            // Never memoized: the requirement was not proven unsatisfiable.
            return Err("resolution cancelled".to_string());
        }

        let depth = stack.len();
        let frame = stack.last_mut().expect("stack never empties inside the loop");

        if let Some(child) = delivery.take() {
            frame.cycle_blocked |= child.cycle_blocked;
            match child.result {
                Ok(spec) => frame.resolved_inputs.push(spec),
                Err(reason) => {
                    trace!(
                        "candidate {} for [{}] lost input: {}",
                        frame.candidates[frame.candidate_idx].descriptor.id(),
                        frame.requirement,
                        reason
                    );
                    let output = frame.current_output().clone();
                    state.in_progress.remove(&output);
                    frame.candidate_idx += 1;
                    frame.active = false;
                }
            }
        }

        if !frame.active {
            // Activate the next viable candidate.
            let mut activated = false;
            while frame.candidate_idx < frame.candidates.len() {
                let candidate = &frame.candidates[frame.candidate_idx];
                state.metrics.candidates_evaluated += 1;
                if state.in_progress.contains(&candidate.output) {
                    trace!(
                        "candidate {} for [{}] would close a cycle, skipping",
                        candidate.descriptor.id(),
                        frame.requirement
                    );
                    frame.cycle_blocked = true;
                    frame.candidate_idx += 1;
                    continue;
                }
                if depth >= state.config.max_depth {
                    debug!(
                        "depth cap {} reached resolving [{}]",
                        state.config.max_depth, frame.requirement
                    );
                    frame.cycle_blocked = true;
                    frame.candidate_idx += 1;
                    continue;
                }
                let output = candidate.output.clone();
                match candidate
                    .descriptor
                    .requirements_for(frame.requirement.target(), &output)
                {
                    Some(inputs) => {
                        state.in_progress.insert(output);
                        frame.inputs = inputs;
                        frame.next_input = 0;
                        frame.resolved_inputs.clear();
                        frame.active = true;
                        activated = true;
                        break;
                    }
                    None => {
                        frame.candidate_idx += 1;
                    }
                }
            }

            if !activated {
                // No candidate worked; fall back to market data, then fail.
                let result = match state.market.availability(&frame.requirement) {
                    Some(spec) => {
                        let node = Arc::new(DependencyNode::market_data_node(spec.clone()));
                        let stored = state.commit_node(node);
                        Ok(stored.primary_output().clone())
                    }
                    None if frame.candidates.is_empty() => Err(
                        "no function produces this value and no market data is available"
                            .to_string(),
                    ),
                    None => Err(format!(
                        "all {} candidate functions failed to resolve",
                        frame.candidates.len()
                    )),
                };

                let finished = stack.pop().expect("frame exists");
                match &result {
                    Ok(spec) => state.memoize_success(finished.requirement.clone(), spec.clone()),
                    Err(reason) if !finished.cycle_blocked => {
                        state.metrics.requirements_unsatisfied += 1;
                        state
                            .req_memo
                            .insert(finished.requirement.clone(), ReqOutcome::Unsatisfiable(reason.clone()));
                    }
                    Err(_) => {
                        // Path-dependent failure, valid only on this branch.
                    }
                }
                let child = ChildResult {
                    result,
                    cycle_blocked: finished.cycle_blocked,
                };
                if stack.is_empty() {
                    return child.result;
                }
                delivery = Some(child);
            }
            continue;
        }

        if frame.next_input < frame.inputs.len() {
            let input = frame.inputs[frame.next_input].clone();
            frame.next_input += 1;
            match state.req_memo.get(&input) {
                Some(ReqOutcome::Resolved(spec)) => {
                    state.metrics.memo_hits += 1;
                    frame.resolved_inputs.push(spec.clone());
                    continue;
                }
                Some(ReqOutcome::Unsatisfiable(reason)) => {
                    state.metrics.memo_hits += 1;
                    trace!(
                        "candidate {} for [{}] hit memoized failure on input [{}]: {}",
                        frame.candidates[frame.candidate_idx].descriptor.id(),
                        frame.requirement,
                        input,
                        reason
                    );
                    let output = frame.current_output().clone();
                    state.in_progress.remove(&output);
                    frame.candidate_idx += 1;
                    frame.active = false;
                    continue;
                }
                None => {}
            }
            if let Some(spec) = state.find_existing(&input) {
                state.memoize_success(input, spec.clone());
                frame.resolved_inputs.push(spec);
                continue;
            }
            let candidates = enumerate_candidates(state.catalog, state.cost, &input);
            stack.push(Frame::new(input, candidates));
            continue;
        }

        // Every input of the active candidate resolved; commit the node.
        let candidate = &frame.candidates[frame.candidate_idx];
        let output = candidate.output.clone();
        let node = Arc::new(DependencyNode::function_node(
            candidate.descriptor.id().clone(),
            frame.requirement.target().clone(),
            frame.resolved_inputs.clone(),
            vec![output.clone()],
        ));
        let stored = state.commit_node(node);
        let spec = stored.primary_output().clone();
        state.in_progress.remove(&output);
        state.memoize_success(frame.requirement.clone(), spec.clone());
        debug!(
            "resolved [{}] via {} at depth {}",
            frame.requirement,
            stored.function().map(|f| f.as_str()).unwrap_or("market data"),
            depth
        );

        let finished = stack.pop().expect("frame exists");
        let child = ChildResult {
            result: Ok(spec),
            cycle_blocked: finished.cycle_blocked,
        };
        if stack.is_empty() {
            return child.result;
        }
        delivery = Some(child);
    }
}
