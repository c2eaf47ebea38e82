//! Topological value iteration: Tarjan SCC decomposition of the reachable
//! fragment, then value iteration SCC by SCC in reverse topological order so
//! every successor value outside the current component is already converged.

use std::collections::HashMap;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{Graph, NodeIndex};

use crate::solver::base::{HeuristicSearchBase, HeuristicSearchEngine};
use crate::solver::error::SolverError;
use crate::solver::mdp::{Mdp, StateId};
use crate::solver::report::ProgressReport;
use crate::solver::timer::CountdownTimer;
use crate::solver::value::{EngineValue, Interval};

#[derive(Debug, Default, Clone)]
pub struct TviStatistics {
    pub sccs: u64,
    pub singleton_sccs: u64,
    pub sweeps: u64,
}

impl TviStatistics {
    pub fn print(&self) {
        log::info!(
            "sccs: {} ({} singletons), sweeps: {}",
            self.sccs,
            self.singleton_sccs,
            self.sweeps
        );
    }
}

pub struct TopologicalVi<M: Mdp, V: EngineValue> {
    base: HeuristicSearchBase<M, V>,
    pub tvi_statistics: TviStatistics,
}

impl<M: Mdp, V: EngineValue> TopologicalVi<M, V> {
    pub fn new(base: HeuristicSearchBase<M, V>) -> TopologicalVi<M, V> {
        TopologicalVi {
            base,
            tvi_statistics: TviStatistics::default(),
        }
    }

    /// Discovers the reachable fragment from `initial`, stopping at terminal
    /// states, and returns the state graph plus per-state self-loop flags.
    fn explore(
        &mut self,
        mdp: &mut M,
        initial: StateId,
        timer: &CountdownTimer,
    ) -> Result<(Graph<StateId, ()>, HashMap<StateId, NodeIndex>), SolverError> {
        let mut graph: Graph<StateId, ()> = Graph::new();
        let mut nodes: HashMap<StateId, NodeIndex> = HashMap::new();
        let mut stack = vec![initial];
        self.base.ensure_initialized(mdp, initial);
        nodes.insert(initial, graph.add_node(initial));
        while let Some(id) = stack.pop() {
            timer.check()?;
            if self.base.is_terminal(id) {
                continue;
            }
            for t in mdp.all_transitions(id) {
                for (succ, _) in t.successors.iter() {
                    self.base.ensure_initialized(mdp, *succ);
                    let succ_node = match nodes.get(succ) {
                        Some(n) => *n,
                        None => {
                            let n = graph.add_node(*succ);
                            nodes.insert(*succ, n);
                            stack.push(*succ);
                            n
                        }
                    };
                    graph.update_edge(nodes[&id], succ_node, ());
                }
            }
        }
        Ok((graph, nodes))
    }

    fn converge_scc(
        &mut self,
        mdp: &mut M,
        scc: &[StateId],
        timer: &CountdownTimer,
    ) -> Result<(), SolverError> {
        loop {
            timer.check()?;
            self.tvi_statistics.sweeps += 1;
            let mut changed = false;
            for id in scc {
                changed |= if self.base.stores_policy() {
                    self.base.bellman_policy_update(mdp, *id).value_changed
                } else {
                    self.base.bellman_update(mdp, *id)
                };
            }
            if !changed {
                return Ok(());
            }
        }
    }
}

impl<M: Mdp, V: EngineValue> HeuristicSearchEngine<M, V> for TopologicalVi<M, V> {
    fn solve(
        &mut self,
        mdp: &mut M,
        initial: StateId,
        timer: &CountdownTimer,
        report: &mut ProgressReport,
    ) -> Result<Interval, SolverError> {
        self.base.initialize_report(mdp, initial, report);
        if self.base.is_terminal(initial) {
            return Ok(self.base.lookup_bounds(initial));
        }
        let (graph, _nodes) = self.explore(mdp, initial, timer)?;

        // tarjan_scc returns components with every successor component first
        let sccs = tarjan_scc(&graph);
        for scc_nodes in sccs {
            timer.check()?;
            self.tvi_statistics.sccs += 1;
            let scc: Vec<StateId> = scc_nodes.iter().map(|n| graph[*n]).collect();
            let singleton_without_loop = scc.len() == 1 && {
                let n = scc_nodes[0];
                !graph.neighbors(n).any(|m| m == n)
            };
            if singleton_without_loop {
                self.tvi_statistics.singleton_sccs += 1;
                if self.base.stores_policy() {
                    self.base.bellman_policy_update(mdp, scc[0]);
                } else {
                    self.base.bellman_update(mdp, scc[0]);
                }
            } else {
                self.converge_scc(mdp, &scc, timer)?;
            }
            report.print(&[
                ("v", self.base.lookup_value(initial)),
                ("sweeps", self.tvi_statistics.sweeps as f64),
            ]);
        }
        Ok(self.base.lookup_bounds(initial))
    }

    fn base(&self) -> &HeuristicSearchBase<M, V> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut HeuristicSearchBase<M, V> {
        &mut self.base
    }

    fn print_statistics(&self) {
        self.base.print_statistics();
        self.tvi_statistics.print();
    }
}
