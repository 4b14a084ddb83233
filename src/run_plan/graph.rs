//! Turns a flat list of actions into a validated dependency graph.

use crate::core::{Action, ActionId, Cluster, TargetId};
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;

/// A reason the selected actions cannot be run. Nothing runs when one of these is returned.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("more than one action is named {0}")]
    DuplicateAction(ActionId),

    #[error("{action} depends on {target}, which is not part of this run")]
    UnresolvedDependency { action: ActionId, target: TargetId },

    #[error("dependency cycle: {}", cycle_to_string(.0))]
    Cycle(Vec<ActionId>),

    #[error("{action} is bound to {node}, which is not in the cluster")]
    UnknownNode { action: ActionId, node: String },
}

fn cycle_to_string(cycle: &[ActionId]) -> String {
    let mut names: Vec<_> = cycle.iter().map(ToString::to_string).collect();
    if let Some(first) = names.first().cloned() {
        names.push(first);
    }
    names.join(" -> ")
}

/// A set of actions and the edges between them, known to be free of cycles.
///
/// Actions are referred to by their index in [ActionGraph::actions], which preserves the order
/// they were given in.
#[derive(Debug)]
pub struct ActionGraph {
    actions: Vec<Action>,

    /// `dependencies[i]` holds the indices of the actions that `i` waits for.
    dependencies: Vec<BTreeSet<usize>>,

    /// `dependents[i]` holds the indices of the actions that wait for `i`.
    dependents: Vec<BTreeSet<usize>>,

    /// Every index, dependencies first. Independent actions keep their input order.
    order: Vec<usize>,
}

impl ActionGraph {
    pub fn build(actions: Vec<Action>) -> Result<Self, GraphError> {
        let mut seen = HashSet::with_capacity(actions.len());
        let mut by_kind: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, action) in actions.iter().enumerate() {
            if !seen.insert(action.id()) {
                return Err(GraphError::DuplicateAction(action.id().clone()));
            }
            by_kind.entry(action.id().kind()).or_default().push(i);
        }

        let mut dependencies = vec![BTreeSet::new(); actions.len()];
        let mut dependents = vec![BTreeSet::new(); actions.len()];
        for (i, action) in actions.iter().enumerate() {
            for target in action.dependencies() {
                let matches: Vec<usize> = by_kind
                    .get(target.kind())
                    .into_iter()
                    .flatten()
                    .copied()
                    .filter(|&j| target.matches(actions[j].id()))
                    .collect();
                if matches.is_empty() && !target.is_wildcard() {
                    return Err(GraphError::UnresolvedDependency {
                        action: action.id().clone(),
                        target: target.clone(),
                    });
                }
                for j in matches {
                    dependencies[i].insert(j);
                    dependents[j].insert(i);
                }
            }
        }

        let order = topological_order(&dependencies, &dependents).map_err(|remaining| {
            let cycle = find_cycle(&dependencies, &remaining);
            GraphError::Cycle(cycle.into_iter().map(|i| actions[i].id().clone()).collect())
        })?;

        Ok(ActionGraph {
            actions,
            dependencies,
            dependents,
            order,
        })
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn dependencies(&self, index: usize) -> &BTreeSet<usize> {
        &self.dependencies[index]
    }

    pub fn dependents(&self, index: usize) -> &BTreeSet<usize> {
        &self.dependents[index]
    }

    /// Every action index in an order that respects the graph's edges.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Checks that every action bound to a node refers to a node `cluster` actually has.
    pub fn check_nodes(&self, cluster: &Cluster) -> Result<(), GraphError> {
        for action in &self.actions {
            if let Some(node) = action.id().node() {
                if cluster.node(node).is_none() {
                    return Err(GraphError::UnknownNode {
                        action: action.id().clone(),
                        node: node.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Kahn's algorithm. Among ready vertices, the lowest index goes first.
///
/// On failure, returns the vertices that could not be ordered; they all lie on or behind a cycle.
fn topological_order(
    dependencies: &[BTreeSet<usize>],
    dependents: &[BTreeSet<usize>],
) -> Result<Vec<usize>, BTreeSet<usize>> {
    let mut waiting: Vec<usize> = dependencies.iter().map(BTreeSet::len).collect();
    let mut ready: BTreeSet<usize> = (0..waiting.len()).filter(|&i| waiting[i] == 0).collect();
    let mut order = Vec::with_capacity(waiting.len());

    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &j in &dependents[i] {
            waiting[j] -= 1;
            if waiting[j] == 0 {
                ready.insert(j);
            }
        }
    }

    if order.len() == waiting.len() {
        Ok(order)
    } else {
        Err((0..waiting.len()).filter(|&i| waiting[i] > 0).collect())
    }
}

/// Extracts one cycle from `remaining`, dependencies first.
///
/// Every vertex Kahn's algorithm leaves behind still has a dependency among the others left
/// behind, so walking from dependent to dependency never leaves the set and must revisit a vertex.
fn find_cycle(dependencies: &[BTreeSet<usize>], remaining: &BTreeSet<usize>) -> Vec<usize> {
    let Some(&start) = remaining.first() else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut position = HashMap::from([(start, 0)]);
    let mut current = start;
    loop {
        let Some(&next) = dependencies[current]
            .iter()
            .find(|j| remaining.contains(*j))
        else {
            return Vec::new();
        };
        if let Some(&first) = position.get(&next) {
            // path[first..] is a cycle running from dependent to dependency.
            let mut cycle = path.split_off(first);
            cycle.reverse();
            return cycle;
        }
        position.insert(next, path.len());
        path.push(next);
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::{self, ClusterFixture};

    fn action(kind: &str, scope: &str, deps: &[(&str, &str)]) -> Action {
        Action::procedure(ActionId::new(kind, scope), |_, _| Ok(()))
            .after(deps.iter().map(|(k, s)| TargetId::new(*k, *s)))
    }

    fn order(graph: &ActionGraph) -> Vec<String> {
        graph
            .order()
            .iter()
            .map(|&i| graph.actions()[i].id().to_string())
            .collect()
    }

    mod build {
        use super::*;

        #[test]
        fn orders_dependencies_first() {
            let graph = ActionGraph::build(vec![
                action("stop", "n1", &[("start", "n1")]),
                action("start", "n1", &[("init", "n1")]),
                action("init", "n1", &[]),
            ])
            .unwrap();

            assert_eq!(vec!["init:n1", "start:n1", "stop:n1"], order(&graph));
        }

        #[test]
        fn independent_actions_keep_input_order() {
            let graph = ActionGraph::build(vec![
                action("b", "n1", &[]),
                action("a", "n1", &[]),
                action("c", "n1", &[("a", "n1")]),
            ])
            .unwrap();

            assert_eq!(vec!["b:n1", "a:n1", "c:n1"], order(&graph));
        }

        #[test]
        fn wildcard_waits_for_every_match() {
            let graph = ActionGraph::build(vec![
                action("init", "n1", &[]),
                action("start", "n1", &[("init", "")]),
                action("init", "n2", &[]),
            ])
            .unwrap();

            assert_eq!(&BTreeSet::from([0, 2]), graph.dependencies(1));
            assert_eq!(vec!["init:n1", "init:n2", "start:n1"], order(&graph));
        }

        #[test]
        fn wildcard_matching_nothing_adds_no_edges() {
            let graph =
                ActionGraph::build(vec![action("start", "n1", &[("brokerStop", "")])]).unwrap();
            assert!(graph.dependencies(0).is_empty());
        }

        #[test]
        fn duplicate_edges_collapse() {
            let graph = ActionGraph::build(vec![
                action("init", "n1", &[]),
                action("start", "n1", &[("init", "n1"), ("init", "")]),
            ])
            .unwrap();
            assert_eq!(1, graph.dependents(0).len());
        }

        #[test]
        fn rejects_duplicates() {
            let result =
                ActionGraph::build(vec![action("init", "n1", &[]), action("init", "n1", &[])]);
            assert_eq!(
                GraphError::DuplicateAction(ActionId::new("init", "n1")),
                result.unwrap_err(),
            );
        }

        #[test]
        fn rejects_unresolved_dependency() {
            let result = ActionGraph::build(vec![action("start", "n1", &[("init", "n1")])]);
            assert_eq!(
                GraphError::UnresolvedDependency {
                    action: ActionId::new("start", "n1"),
                    target: TargetId::new("init", "n1"),
                },
                result.unwrap_err(),
            );
        }

        #[test]
        fn reports_cycle_members_in_dependency_order() {
            let result = ActionGraph::build(vec![
                action("init", "n1", &[]),
                action("a", "n1", &[("init", "n1"), ("c", "n1")]),
                action("b", "n1", &[("a", "n1")]),
                action("c", "n1", &[("b", "n1")]),
                action("d", "n1", &[("c", "n1")]),
            ]);

            let GraphError::Cycle(cycle) = result.unwrap_err() else {
                panic!("expected a cycle");
            };
            let names: Vec<_> = cycle.iter().map(ToString::to_string).collect();
            assert_eq!(vec!["b:n1", "c:n1", "a:n1"], names);
        }

        #[test]
        fn wildcard_on_own_kind_is_a_cycle() {
            let result = ActionGraph::build(vec![action("sync", "n1", &[("sync", "")])]);
            assert_eq!(
                GraphError::Cycle(vec![ActionId::new("sync", "n1")]),
                result.unwrap_err(),
            );
        }

        #[test]
        fn cycle_message_closes_the_loop() {
            let err = GraphError::Cycle(vec![ActionId::new("a", "n1"), ActionId::new("b", "n1")]);
            assert_eq!("dependency cycle: a:n1 -> b:n1 -> a:n1", err.to_string());
        }

        #[test]
        fn every_role_on_one_node_is_acyclic() {
            let fixture = ClusterFixture::new()
                .node(
                    "n1",
                    vec![
                        ("ssh", fixtures::static_node("h1")),
                        ("ubuntu", fixtures::ubuntu_node()),
                        ("zk", fixtures::zookeeper()),
                        ("broker", fixtures::broker()),
                        ("agent", crate::core::Role::TrogdorAgent(fixtures::trogdor())),
                        (
                            "coordinator",
                            crate::core::Role::TrogdorCoordinator(fixtures::trogdor()),
                        ),
                    ],
                )
                .build();

            let graph = ActionGraph::build(fixture.cluster.actions()).unwrap();
            let order = order(&graph);
            let position = |id: &str| order.iter().position(|x| x == id).unwrap();

            assert!(position("init:n1") < position("zooKeeperStart:n1"));
            assert!(position("zooKeeperStart:n1") < position("brokerStart:n1"));
            assert!(position("brokerStart:n1") < position("trogdorAgentStart:n1"));
            assert!(position("trogdorAgentStart:n1") < position("trogdorCoordinatorStart:n1"));
            assert!(position("trogdorCoordinatorStop:n1") < position("trogdorAgentStop:n1"));
            assert!(position("trogdorAgentStop:n1") < position("brokerStop:n1"));
            assert!(position("brokerStop:n1") < position("zooKeeperStop:n1"));
            assert!(position("zooKeeperStop:n1") < position("saveLogs:n1"));
            assert!(position("saveLogs:n1") < position("destroy:n1"));
        }
    }

    mod check_nodes {
        use super::*;

        #[test]
        fn rejects_unknown_node() {
            let fixture = ClusterFixture::new().node("n1", vec![]).build();
            let graph = ActionGraph::build(vec![
                action("init", "n1", &[]),
                action("init", "ghost", &[]),
                action("report", "", &[]),
            ])
            .unwrap();

            assert_eq!(
                GraphError::UnknownNode {
                    action: ActionId::new("init", "ghost"),
                    node: "ghost".to_string(),
                },
                graph.check_nodes(&fixture.cluster).unwrap_err(),
            );
        }
    }
}
