use std::collections::HashMap;

use kestrel_core::{Error, ExecutionPlan, GoalId, Result, Step, StepId, StepSpec};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::{Direction, algo};
use tracing::debug;

use super::reference::scan_references;

/// Builds a validated wave plan from a submitted step list.
///
/// Dependencies are the union of each step's declared list and the
/// `$step_N` references found in its arguments. Every step lands in the
/// earliest wave strictly after all of its dependencies, computed as the
/// longest path from a source; steps sharing a wave keep submission order.
///
/// # Errors
/// Returns [`Error::Planning`] for duplicate step ids or a dependency
/// cycle (naming the step ids on the cycle), and [`Error::Dependency`]
/// when a step depends on an id that is not in the list.
pub fn build_plan(goal_id: GoalId, specs: &[StepSpec]) -> Result<ExecutionPlan> {
    let mut order = Vec::with_capacity(specs.len());
    for spec in specs {
        if order.contains(&spec.id) {
            return Err(Error::Planning(format!(
                "Duplicate step id {} in submitted plan",
                spec.id
            )));
        }
        order.push(spec.id);
    }

    let mut graph: DiGraph<StepId, ()> = DiGraph::new();
    let mut nodes: HashMap<StepId, NodeIndex> = HashMap::new();
    for id in &order {
        nodes.insert(*id, graph.add_node(*id));
    }

    let mut steps: HashMap<StepId, Step> = HashMap::with_capacity(specs.len());
    for spec in specs {
        let dependencies = merged_dependencies(spec)?;
        let step_node = nodes[&spec.id];
        for dep_id in &dependencies {
            let Some(dep_node) = nodes.get(dep_id) else {
                return Err(Error::Dependency(format!(
                    "Step {} depends on step {dep_id}, which is not in the plan",
                    spec.id
                )));
            };
            graph.add_edge(*dep_node, step_node, ());
        }
        steps.insert(spec.id, Step::from_spec(spec.clone(), dependencies));
    }

    if algo::is_cyclic_directed(&graph) {
        return Err(Error::Planning(format!(
            "Dependency cycle among steps {}",
            cycle_members(&graph)
        )));
    }

    let waves = level_waves(&graph, &nodes, &order);
    debug!(
        "Built plan for goal {goal_id}: {} step(s) in {} wave(s)",
        order.len(),
        waves.len()
    );
    Ok(ExecutionPlan::new(goal_id, order, waves, steps))
}

/// Declared dependencies plus implicit `$step_N` references, deduplicated
/// with declared ids first.
fn merged_dependencies(spec: &StepSpec) -> Result<Vec<StepId>> {
    let mut dependencies = Vec::new();
    for dep_id in &spec.dependencies {
        if *dep_id == spec.id {
            return Err(Error::Planning(format!(
                "Dependency cycle among steps {}",
                spec.id
            )));
        }
        if !dependencies.contains(dep_id) {
            dependencies.push(*dep_id);
        }
    }
    for referenced in scan_references(&spec.arguments) {
        if referenced == spec.id {
            return Err(Error::Planning(format!(
                "Dependency cycle among steps {}",
                spec.id
            )));
        }
        if !dependencies.contains(&referenced) {
            dependencies.push(referenced);
        }
    }
    Ok(dependencies)
}

/// Ids of the steps sitting on dependency cycles, sorted for stable error
/// messages.
fn cycle_members(graph: &DiGraph<StepId, ()>) -> String {
    let mut members: Vec<StepId> = algo::tarjan_scc(graph)
        .into_iter()
        .filter(|component| component.len() > 1)
        .flatten()
        .map(|node| graph[node])
        .collect();
    members.sort_unstable();
    members
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Longest-path leveling over an acyclic graph. Wave membership preserves
/// submission order, which makes tie-breaking deterministic.
fn level_waves(
    graph: &DiGraph<StepId, ()>,
    nodes: &HashMap<StepId, NodeIndex>,
    order: &[StepId],
) -> Vec<Vec<StepId>> {
    let sorted = algo::toposort(graph, None).unwrap_or_default();

    let mut levels: HashMap<StepId, usize> = HashMap::with_capacity(sorted.len());
    for node in sorted {
        let level = graph
            .neighbors_directed(node, Direction::Incoming)
            .map(|dep_node| levels.get(&graph[dep_node]).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        levels.insert(graph[node], level);
    }

    let wave_count = levels.values().copied().max().map_or(0, |deepest| deepest + 1);
    let mut waves = vec![Vec::new(); wave_count];
    for id in order {
        if nodes.contains_key(id) {
            waves[levels.get(id).copied().unwrap_or(0)].push(*id);
        }
    }
    waves
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test code is allowed to use unwrap/expect"
)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(id: u32, deps: &[u32]) -> StepSpec {
        StepSpec::new(id, "noop".to_owned())
            .with_dependencies(deps.iter().copied().map(StepId::new).collect())
    }

    #[test]
    fn test_independent_steps_share_wave_one() {
        let plan = build_plan(GoalId::new(), &[spec(1, &[]), spec(2, &[])]).unwrap();
        assert_eq!(plan.wave_count(), 1);
        assert_eq!(plan.waves()[0], vec![StepId::new(1), StepId::new(2)]);
    }

    #[test]
    fn test_every_step_lands_after_its_dependencies() {
        let plan = build_plan(
            GoalId::new(),
            &[
                spec(1, &[]),
                spec(2, &[]),
                spec(3, &[1, 2]),
                spec(4, &[3]),
                spec(5, &[1]),
            ],
        )
        .unwrap();

        for id in plan.order() {
            let step = plan.step(*id).unwrap();
            let wave = plan.wave_of(*id).unwrap();
            for dep_id in &step.dependencies {
                assert!(
                    plan.wave_of(*dep_id).unwrap() < wave,
                    "step {id} in wave {wave} must come after dependency {dep_id}"
                );
            }
        }

        let appearances: usize = plan.waves().iter().map(Vec::len).sum();
        assert_eq!(appearances, 5, "every step appears in exactly one wave");
        assert_eq!(plan.wave_of(StepId::new(5)), Some(1));
    }

    #[test]
    fn test_longest_path_beats_shortest() {
        // Step 4 depends on both a source and a depth-two chain, so it must
        // land in wave 2 even though one dependency is in wave 0.
        let plan = build_plan(
            GoalId::new(),
            &[spec(1, &[]), spec(2, &[1]), spec(3, &[]), spec(4, &[2, 3])],
        )
        .unwrap();
        assert_eq!(plan.wave_of(StepId::new(4)), Some(2));
    }

    #[test]
    fn test_references_become_implicit_dependencies() {
        let steps = [
            spec(1, &[]),
            spec(2, &[]),
            StepSpec::new(3, "calculator".to_owned())
                .with_argument("expression".to_owned(), json!("$step_1.temp - $step_2.temp")),
        ];
        let plan = build_plan(GoalId::new(), &steps).unwrap();

        let step3 = plan.step(StepId::new(3)).unwrap();
        assert_eq!(step3.dependencies, vec![StepId::new(1), StepId::new(2)]);
        assert_eq!(plan.wave_of(StepId::new(3)), Some(1));
    }

    #[test]
    fn test_cycle_fails_naming_members() {
        let result = build_plan(GoalId::new(), &[spec(1, &[2]), spec(2, &[1]), spec(3, &[])]);
        let error = result.unwrap_err();
        assert!(matches!(error, Error::Planning(_)));
        let message = error.to_string();
        assert!(message.contains('1') && message.contains('2'), "got: {message}");
        assert!(!message.contains('3'), "step 3 is not on the cycle: {message}");
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let result = build_plan(GoalId::new(), &[spec(1, &[1])]);
        assert!(matches!(result, Err(Error::Planning(_))));
    }

    #[test]
    fn test_dangling_dependency_rejected() {
        let result = build_plan(GoalId::new(), &[spec(1, &[9])]);
        let error = result.unwrap_err();
        assert!(matches!(error, Error::Dependency(_)));
        assert!(error.to_string().contains('9'), "got: {error}");
    }

    #[test]
    fn test_dangling_reference_rejected() {
        let steps = [StepSpec::new(1, "calculator".to_owned())
            .with_argument("expression".to_owned(), json!("$step_7"))];
        assert!(matches!(
            build_plan(GoalId::new(), &steps),
            Err(Error::Dependency(_))
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = build_plan(GoalId::new(), &[spec(1, &[]), spec(1, &[])]);
        assert!(matches!(result, Err(Error::Planning(_))));
    }

    #[test]
    fn test_empty_plan_has_no_waves() {
        let plan = build_plan(GoalId::new(), &[]).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.wave_count(), 0);
    }
}
