//! Dependency graph analysis.
//!
//! The executor never walks the graph ahead of time to decide what runs; it
//! only asks two questions while draining a batch:
//! - can this pending task still become ready? (`unreachable_dependency`)
//! - when nothing is ready or running, which pending tasks sit on a cycle?
//!   (`find_cycles`)
//!
//! `execution_levels` is a planning aid for callers that want to see the
//! layered order up front. Every walk here is iterative, so a long chain or a
//! large ring cannot exhaust the stack.

use std::collections::{HashMap, HashSet};

/// Cycle members spelled out in a skip reason before it is abbreviated.
const CYCLE_PATH_LIMIT: usize = 8;

/// What the executor knows about a dependency id right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyState {
    Completed,
    Failed,
    Skipped,
    /// Pending or running in the current batch.
    InFlight,
    /// Never submitted.
    Unknown,
}

/// Skip reason for a dependent of `dependency`, or `None` while it can
/// still complete.
pub fn skip_reason(dependency: &str, state: DependencyState) -> Option<String> {
    match state {
        DependencyState::Failed => Some(format!("dependency {} failed", dependency)),
        DependencyState::Skipped => Some(format!("dependency {} was skipped", dependency)),
        DependencyState::Unknown => Some(format!("dependency {} was never submitted", dependency)),
        DependencyState::Completed | DependencyState::InFlight => None,
    }
}

/// First dependency that can never complete, rendered as a skip reason.
pub fn unreachable_dependency<F>(dependencies: &[String], state_of: F) -> Option<String>
where
    F: Fn(&str) -> DependencyState,
{
    dependencies.iter().find_map(|dep| skip_reason(dep, state_of(dep)))
}

/// Skip reason for a task on a cycle.
pub fn cycle_reason(cycle: &[String]) -> String {
    let Some(first) = cycle.first() else {
        return "dependency cycle".to_string();
    };
    if cycle.len() > CYCLE_PATH_LIMIT {
        return format!(
            "dependency cycle of {} tasks: {} -> ... -> {}",
            cycle.len(),
            cycle[..CYCLE_PATH_LIMIT / 2].join(" -> "),
            first
        );
    }
    format!("dependency cycle: {} -> {}", cycle.join(" -> "), first)
}

/// Groups of ids that depend on each other in a cycle.
///
/// Only edges between ids present in `nodes` are considered. Each group keeps
/// the input order of its members, and groups are ordered by their first
/// member. A task depending on itself forms a group of one.
pub fn find_cycles<'a, I>(nodes: I) -> Vec<Vec<String>>
where
    I: IntoIterator<Item = (&'a str, &'a [String])>,
{
    let nodes: Vec<(&str, &[String])> = nodes.into_iter().collect();
    let index: HashMap<&str, usize> = nodes.iter().enumerate().map(|(i, (id, _))| (*id, i)).collect();
    let adjacency: Vec<Vec<usize>> = nodes
        .iter()
        .map(|(_, deps)| deps.iter().filter_map(|d| index.get(d.as_str()).copied()).collect())
        .collect();

    let mut tarjan = Tarjan::new(&adjacency);
    for v in 0..nodes.len() {
        if tarjan.index[v].is_none() {
            tarjan.visit(v);
        }
    }

    let mut cycles: Vec<Vec<usize>> = tarjan
        .components
        .into_iter()
        .filter(|c| c.len() > 1 || adjacency[c[0]].contains(&c[0]))
        .map(|mut c| {
            c.sort_unstable();
            c
        })
        .collect();
    cycles.sort_by_key(|c| c[0]);

    cycles
        .into_iter()
        .map(|c| c.into_iter().map(|i| nodes[i].0.to_string()).collect())
        .collect()
}

/// Strongly connected components (Tarjan).
struct Tarjan<'g> {
    adjacency: &'g [Vec<usize>],
    next_index: usize,
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    components: Vec<Vec<usize>>,
}

impl<'g> Tarjan<'g> {
    fn new(adjacency: &'g [Vec<usize>]) -> Self {
        let n = adjacency.len();
        Self {
            adjacency,
            next_index: 0,
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            components: Vec::new(),
        }
    }

    fn open(&mut self, v: usize) {
        self.index[v] = Some(self.next_index);
        self.lowlink[v] = self.next_index;
        self.next_index += 1;
        self.stack.push(v);
        self.on_stack[v] = true;
    }

    /// Depth-first search from `root` with an explicit frame stack. A frame
    /// is a node and the position of the next edge to follow.
    fn visit(&mut self, root: usize) {
        self.open(root);
        let mut frames: Vec<(usize, usize)> = vec![(root, 0)];

        while let Some(frame) = frames.last_mut() {
            let (v, edge) = *frame;
            if let Some(&w) = self.adjacency[v].get(edge) {
                frame.1 += 1;
                match self.index[w] {
                    None => {
                        self.open(w);
                        frames.push((w, 0));
                    }
                    Some(w_index) if self.on_stack[w] => {
                        self.lowlink[v] = self.lowlink[v].min(w_index);
                    }
                    Some(_) => {}
                }
                continue;
            }

            frames.pop();
            if Some(self.lowlink[v]) == self.index[v] {
                let mut component = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                self.components.push(component);
            }
            if let Some(&(parent, _)) = frames.last() {
                self.lowlink[parent] = self.lowlink[parent].min(self.lowlink[v]);
            }
        }
    }
}

/// Layered start order: level 0 has no in-batch dependencies, level n depends
/// only on earlier levels. Ids on or behind a cycle are left out.
///
/// Dependencies on ids outside `nodes` are treated as already satisfied.
/// Each level keeps the input order of its members.
pub fn execution_levels<'a, I>(nodes: I) -> Vec<Vec<String>>
where
    I: IntoIterator<Item = (&'a str, &'a [String])>,
{
    let nodes: Vec<(&str, &[String])> = nodes.into_iter().collect();
    let index: HashMap<&str, usize> = nodes.iter().enumerate().map(|(i, (id, _))| (*id, i)).collect();

    let mut indegree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, (_, deps)) in nodes.iter().enumerate() {
        let in_batch: HashSet<usize> = deps.iter().filter_map(|d| index.get(d.as_str()).copied()).collect();
        indegree[i] = in_batch.len();
        for dep in in_batch {
            dependents[dep].push(i);
        }
    }

    let mut level: Vec<usize> = (0..nodes.len()).filter(|&i| indegree[i] == 0).collect();
    let mut levels = Vec::new();
    while !level.is_empty() {
        let mut next = Vec::new();
        for &i in &level {
            for &d in &dependents[i] {
                indegree[d] -= 1;
                if indegree[d] == 0 {
                    next.push(d);
                }
            }
        }
        next.sort_unstable();
        levels.push(level.iter().map(|&i| nodes[i].0.to_string()).collect());
        level = next;
    }

    levels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> Vec<(String, Vec<String>)> {
        edges
            .iter()
            .map(|(id, deps)| (id.to_string(), deps.iter().map(|d| d.to_string()).collect()))
            .collect()
    }

    fn view(g: &[(String, Vec<String>)]) -> Vec<(&str, &[String])> {
        g.iter().map(|(id, deps)| (id.as_str(), deps.as_slice())).collect()
    }

    #[test]
    fn test_unreachable_dependency() {
        let deps = vec!["a".to_string(), "b".to_string()];

        let reason = unreachable_dependency(&deps, |id| {
            if id == "b" {
                DependencyState::Failed
            } else {
                DependencyState::Completed
            }
        });
        assert_eq!(reason.as_deref(), Some("dependency b failed"));

        assert!(unreachable_dependency(&deps, |_| DependencyState::InFlight).is_none());
        assert_eq!(
            unreachable_dependency(&deps, |_| DependencyState::Unknown).as_deref(),
            Some("dependency a was never submitted")
        );
        assert_eq!(
            unreachable_dependency(&deps, |_| DependencyState::Skipped).as_deref(),
            Some("dependency a was skipped")
        );
    }

    #[test]
    fn test_cycle_reason() {
        let cycle = vec!["x".to_string(), "y".to_string()];
        assert_eq!(cycle_reason(&cycle), "dependency cycle: x -> y -> x");

        let ring: Vec<String> = (0..1000).map(|i| format!("t{}", i)).collect();
        assert_eq!(cycle_reason(&ring), "dependency cycle of 1000 tasks: t0 -> t1 -> t2 -> t3 -> ... -> t0");
    }

    #[test]
    fn test_skip_reason() {
        assert_eq!(skip_reason("a", DependencyState::Failed).as_deref(), Some("dependency a failed"));
        assert!(skip_reason("a", DependencyState::InFlight).is_none());
        assert!(skip_reason("a", DependencyState::Completed).is_none());
    }

    #[test]
    fn test_find_cycles_none() {
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["a", "b"])]);
        assert!(find_cycles(view(&g)).is_empty());
    }

    #[test]
    fn test_find_cycles_pair() {
        let g = graph(&[("x", &["y"]), ("y", &["x"]), ("z", &["x"])]);
        assert_eq!(find_cycles(view(&g)), vec![vec!["x".to_string(), "y".to_string()]]);
    }

    #[test]
    fn test_find_cycles_self_loop() {
        let g = graph(&[("a", &["a"]), ("b", &[])]);
        assert_eq!(find_cycles(view(&g)), vec![vec!["a".to_string()]]);
    }

    #[test]
    fn test_find_cycles_multiple() {
        let g = graph(&[
            ("p", &["r"]),
            ("q", &["p"]),
            ("r", &["q"]),
            ("s", &[]),
            ("t", &["u"]),
            ("u", &["t"]),
        ]);
        let cycles = find_cycles(view(&g));
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[0], vec!["p", "q", "r"]);
        assert_eq!(cycles[1], vec!["t", "u"]);
    }

    #[test]
    fn test_find_cycles_ignores_outside_ids() {
        let g = graph(&[("a", &["missing"]), ("b", &["a"])]);
        assert!(find_cycles(view(&g)).is_empty());
    }

    #[test]
    fn test_find_cycles_large_ring() {
        let n = 100_000;
        let g: Vec<(String, Vec<String>)> = (0..n)
            .map(|i| (format!("t{}", i), vec![format!("t{}", (i + 1) % n)]))
            .collect();

        let cycles = find_cycles(view(&g));

        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), n);
        assert_eq!(cycles[0][0], "t0");
    }

    #[test]
    fn test_find_cycles_long_chain_into_loop() {
        let n = 100_000;
        let mut g: Vec<(String, Vec<String>)> = (0..n)
            .map(|i| (format!("c{}", i), vec![format!("c{}", i + 1)]))
            .collect();
        g.push((format!("c{}", n), vec![format!("c{}", n)]));

        assert_eq!(find_cycles(view(&g)), vec![vec![format!("c{}", n)]]);
    }

    #[test]
    fn test_execution_levels_long_chain() {
        let n = 50_000;
        let g: Vec<(String, Vec<String>)> = (0..n)
            .map(|i| (format!("s{}", i), if i == 0 { vec![] } else { vec![format!("s{}", i - 1)] }))
            .collect();

        let levels = execution_levels(view(&g));
        assert_eq!(levels.len(), n);
        assert_eq!(levels[n - 1], vec![format!("s{}", n - 1)]);
    }

    #[test]
    fn test_execution_levels() {
        let g = graph(&[("c", &["a", "b"]), ("a", &[]), ("b", &["a"]), ("d", &["external"])]);
        let levels = execution_levels(view(&g));
        assert_eq!(levels, vec![vec!["a", "d"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn test_execution_levels_leave_out_cycles() {
        let g = graph(&[("a", &[]), ("x", &["y"]), ("y", &["x"]), ("z", &["y"])]);
        let levels = execution_levels(view(&g));
        assert_eq!(levels, vec![vec!["a"]]);
    }
}
