//! Dependency graph over catalog objects.
//!
//! An edge `B -> A` means B must exist on the target before A is created.
//! Edges come from the references recorded on each object (view and routine
//! references, index and constraint owners, foreign key targets) plus a
//! table-to-table edge for every foreign key that is not deferred.
//!
//! Only reference edges carry existence: a foreign key's ordering edge makes
//! the referencing table wait, but the table is still valid without the
//! referenced one once the constraint itself is gone.

use crate::catalog::{Catalog, ObjectDefinition, ObjectKind, QualifiedName};
use crate::error::{MigrateError, Result};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use tracing::debug;

/// Node key. Ordering is the tie-break for objects with no constraint
/// between them: kind priority first, then qualified name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct GraphNode {
    kind: ObjectKind,
    name: QualifiedName,
}

/// Why an edge exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Dependency {
    /// The dependent names the other object and cannot exist without it.
    Reference,
    /// Creation order only (foreign key between two tables).
    Ordering,
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<GraphNode, Dependency>,
    nodes: HashMap<QualifiedName, NodeIndex>,
    deferred: Vec<QualifiedName>,
}

impl DependencyGraph {
    /// Build the graph for every object in the catalog.
    ///
    /// `deferred_fks` holds constraint names (case-insensitive) whose
    /// table-to-table edge is left out.
    pub fn build(catalog: &Catalog, deferred_fks: &[String]) -> Self {
        let deferred_names: HashSet<String> =
            deferred_fks.iter().map(|n| n.to_lowercase()).collect();

        let mut graph = DiGraph::with_capacity(catalog.len(), catalog.len());
        let mut nodes = HashMap::with_capacity(catalog.len());
        for object in catalog.objects() {
            let idx = graph.add_node(GraphNode {
                kind: object.kind(),
                name: object.name.clone(),
            });
            nodes.insert(object.name.clone(), idx);
        }

        let mut edges: BTreeMap<(NodeIndex, NodeIndex), Dependency> = BTreeMap::new();
        let mut deferred = Vec::new();
        for object in catalog.objects() {
            let Some(&to) = nodes.get(&object.name) else {
                continue;
            };
            for reference in &object.references {
                if let Some(&from) = nodes.get(reference) {
                    if from != to {
                        edges.insert((from, to), Dependency::Reference);
                    }
                }
            }

            if let ObjectDefinition::Constraint(constraint) = &object.definition {
                let Some(target) = constraint.referenced_table() else {
                    continue;
                };
                if target == &constraint.table {
                    continue;
                }
                if deferred_names.contains(&object.name.name.to_lowercase()) {
                    debug!(
                        "Foreign key {} deferred: no ordering between {} and {}",
                        object.name, constraint.table, target
                    );
                    deferred.push(object.name.clone());
                    continue;
                }
                if let (Some(&from), Some(&owner)) =
                    (nodes.get(target), nodes.get(&constraint.table))
                {
                    edges.entry((from, owner)).or_insert(Dependency::Ordering);
                }
            }
        }
        for ((from, to), dependency) in edges {
            graph.add_edge(from, to, dependency);
        }

        Self {
            graph,
            nodes,
            deferred,
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Foreign keys whose ordering edge was dropped by configuration.
    pub fn deferred_foreign_keys(&self) -> &[QualifiedName] {
        &self.deferred
    }

    /// Every edge as `(before, after)`.
    pub fn edges(&self) -> Vec<(QualifiedName, QualifiedName)> {
        self.graph
            .edge_references()
            .map(|e| {
                (
                    self.graph[e.source()].name.clone(),
                    self.graph[e.target()].name.clone(),
                )
            })
            .collect()
    }

    /// Direct dependencies of an object, sorted.
    pub fn dependencies(&self, name: &QualifiedName) -> Vec<QualifiedName> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Direct dependents of an object, sorted.
    pub fn dependents(&self, name: &QualifiedName) -> Vec<QualifiedName> {
        self.neighbors(name, Direction::Outgoing)
    }

    fn neighbors(&self, name: &QualifiedName, direction: Direction) -> Vec<QualifiedName> {
        let Some(&idx) = self.nodes.get(name) else {
            return Vec::new();
        };
        let mut out: Vec<QualifiedName> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].name.clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// The given objects plus everything that transitively references them.
    ///
    /// Foreign key ordering edges are not followed: a table whose foreign key
    /// targets a root keeps its own definition and only loses the constraint.
    pub fn with_dependents<'a, I>(&self, roots: I) -> BTreeSet<QualifiedName>
    where
        I: IntoIterator<Item = &'a QualifiedName>,
    {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<NodeIndex> = roots
            .into_iter()
            .filter_map(|name| self.nodes.get(name).copied())
            .collect();
        while let Some(idx) = queue.pop_front() {
            if !seen.insert(self.graph[idx].name.clone()) {
                continue;
            }
            queue.extend(
                self.graph
                    .edges_directed(idx, Direction::Outgoing)
                    .filter(|e| *e.weight() == Dependency::Reference)
                    .map(|e| e.target()),
            );
        }
        seen
    }

    /// Topological order with the kind-then-name tie-break.
    ///
    /// Fails with [`MigrateError::CyclicDependency`] naming every object that
    /// sits on a cycle.
    pub fn topological_order(&self) -> Result<Vec<QualifiedName>> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count()
            })
            .collect();

        let mut ready: BTreeSet<(GraphNode, NodeIndex)> = self
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .map(|idx| (self.graph[idx].clone(), idx))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some((node, idx)) = ready.pop_first() {
            order.push(node.name);
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                let degree = &mut in_degree[next.index()];
                *degree -= 1;
                if *degree == 0 {
                    ready.insert((self.graph[next].clone(), next));
                }
            }
        }

        if order.len() != self.graph.node_count() {
            return Err(MigrateError::CyclicDependency {
                members: self.cycle_members(),
            });
        }
        Ok(order)
    }

    /// Objects on a cycle: members of every strongly connected component
    /// with more than one node.
    fn cycle_members(&self) -> Vec<String> {
        let mut members: Vec<QualifiedName> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .flatten()
            .map(|idx| self.graph[idx].name.clone())
            .collect();
        members.sort();
        members.into_iter().map(|n| n.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::orders_customers;

    fn qn(name: &str) -> QualifiedName {
        QualifiedName::new("dbo", name)
    }

    fn position(order: &[QualifiedName], name: &QualifiedName) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    fn cyclic_catalog() -> Catalog {
        Catalog::from_json(
            r#"{
              "objects": [
                { "kind": "table", "schema": "dbo", "name": "A",
                  "columns": [
                    { "name": "id", "type": "int", "nullable": false, "ordinal": 1 },
                    { "name": "b_id", "type": "int", "ordinal": 2 }
                  ],
                  "primary_key": { "columns": ["id"] },
                  "constraints": [
                    { "type": "foreign_key", "name": "FK_A_B", "columns": ["b_id"],
                      "referenced_table": "dbo.B", "referenced_columns": ["id"] }
                  ] },
                { "kind": "table", "schema": "dbo", "name": "B",
                  "columns": [
                    { "name": "id", "type": "int", "nullable": false, "ordinal": 1 },
                    { "name": "a_id", "type": "int", "ordinal": 2 }
                  ],
                  "primary_key": { "columns": ["id"] },
                  "constraints": [
                    { "type": "foreign_key", "name": "FK_B_A", "columns": ["a_id"],
                      "referenced_table": "dbo.A", "referenced_columns": ["id"] }
                  ] }
              ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_every_edge_respected() {
        let catalog = orders_customers();
        let graph = DependencyGraph::build(&catalog, &[]);
        let order = graph.topological_order().unwrap();
        assert_eq!(order.len(), catalog.len());
        for (before, after) in graph.edges() {
            assert!(
                position(&order, &before) < position(&order, &after),
                "{} must precede {}",
                before,
                after
            );
        }
    }

    #[test]
    fn test_customers_before_orders() {
        let catalog = orders_customers();
        let graph = DependencyGraph::build(&catalog, &[]);
        let order = graph.topological_order().unwrap();
        assert!(position(&order, &qn("customers")) < position(&order, &qn("orders")));
        assert_eq!(graph.dependencies(&qn("orders")), vec![qn("customers")]);
    }

    #[test]
    fn test_tie_break_is_kind_then_name() {
        let catalog = Catalog::from_json(
            r#"{
              "objects": [
                { "kind": "view", "schema": "dbo", "name": "a_view", "definition": "SELECT 1 AS x" },
                { "kind": "table", "schema": "dbo", "name": "zeta",
                  "columns": [ { "name": "id", "type": "int", "ordinal": 1 } ] },
                { "kind": "table", "schema": "dbo", "name": "alpha",
                  "columns": [ { "name": "id", "type": "int", "ordinal": 1 } ] },
                { "kind": "sequence", "schema": "dbo", "name": "seq" }
              ]
            }"#,
        )
        .unwrap();
        let order = DependencyGraph::build(&catalog, &[])
            .topological_order()
            .unwrap();
        assert_eq!(
            order,
            vec![qn("seq"), qn("alpha"), qn("zeta"), qn("a_view")]
        );
    }

    #[test]
    fn test_cycle_names_both_members() {
        let catalog = cyclic_catalog();
        let err = DependencyGraph::build(&catalog, &[])
            .topological_order()
            .unwrap_err();
        match err {
            MigrateError::CyclicDependency { members } => {
                assert_eq!(members, vec!["dbo.A".to_string(), "dbo.B".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_deferred_fk_breaks_cycle() {
        let catalog = cyclic_catalog();
        let graph = DependencyGraph::build(&catalog, &["fk_b_a".to_string()]);
        assert_eq!(graph.deferred_foreign_keys(), &[qn("FK_B_A")]);
        let order = graph.topological_order().unwrap();
        assert!(position(&order, &qn("B")) < position(&order, &qn("A")));
        assert!(position(&order, &qn("A")) < position(&order, &qn("FK_B_A")));
    }

    #[test]
    fn test_dependents_closure() {
        let catalog = orders_customers();
        let graph = DependencyGraph::build(&catalog, &[]);
        let closure = graph.with_dependents([&qn("customers")]);
        assert!(closure.contains(&qn("customers")));
        assert!(closure.contains(&qn("FK_orders_customers")));
        // the foreign key only orders the two tables
        assert!(!closure.contains(&qn("orders")));
        assert!(!closure.contains(&qn("orders.IX_orders_customer")));
        assert_eq!(graph.dependencies(&qn("orders")), vec![qn("customers")]);

        let closure = graph.with_dependents([&qn("orders")]);
        assert!(!closure.contains(&qn("customers")));
        assert!(closure.contains(&qn("orders.IX_orders_customer")));
        assert!(closure.contains(&qn("FK_orders_customers")));
    }

    #[test]
    fn test_order_is_deterministic() {
        let catalog = orders_customers();
        let first = DependencyGraph::build(&catalog, &[])
            .topological_order()
            .unwrap();
        for _ in 0..5 {
            let again = DependencyGraph::build(&catalog, &[])
                .topological_order()
                .unwrap();
            assert_eq!(first, again);
        }
    }
}
