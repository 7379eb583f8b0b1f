use crate::graph::UndirectedGraph;
use crate::TxId;
use indexmap::IndexSet;
use std::collections::HashSet;

/// Near-linear maximal-independent-set solver.
///
/// Vertices are bucketed by live degree; the reduction loop applies the
/// cheapest applicable rule until the buckets drain, then the deferred
/// stack is unwound. The pop order of the buckets is implementation
/// defined, so callers must accept any valid independent set.
pub struct LinearTime {
    graph: UndirectedGraph,
    ones: IndexSet<TxId>,
    twos: IndexSet<TxId>,
    high: IndexSet<TxId>,
    independent: IndexSet<TxId>,
    stack: Vec<TxId>,
}

impl LinearTime {
    pub fn new(graph: UndirectedGraph) -> Self {
        let mut solver = Self {
            graph,
            ones: IndexSet::new(),
            twos: IndexSet::new(),
            high: IndexSet::new(),
            independent: IndexSet::new(),
            stack: Vec::new(),
        };
        let ids: Vec<TxId> = solver.graph.live_ids().collect();
        for id in ids {
            match solver.graph.degree(id) {
                0 => {
                    solver.independent.insert(id);
                    solver.graph.mark_deleted(id);
                }
                1 => {
                    solver.ones.insert(id);
                }
                2 => {
                    solver.twos.insert(id);
                }
                _ => {
                    solver.high.insert(id);
                }
            }
        }
        solver
    }

    /// Run the reduction loop and unwind the deferred stack. Returns the
    /// independent set in ascending id order.
    pub fn solve(mut self) -> Vec<TxId> {
        while !self.ones.is_empty() || !self.twos.is_empty() || !self.high.is_empty() {
            if !self.ones.is_empty() {
                self.degree_one_reduction();
            } else if !self.twos.is_empty() {
                self.degree_two_path_reduction();
            } else {
                self.inexact_reduction();
            }
        }

        while let Some(u) = self.stack.pop() {
            let blocked = self
                .graph
                .neighbors(u)
                .iter()
                .any(|n| self.independent.contains(n));
            if !blocked {
                self.independent.insert(u);
            }
        }

        let mut result: Vec<TxId> = self.independent.into_iter().collect();
        result.sort_unstable();
        result
    }

    fn remove_from_buckets(&mut self, id: TxId) {
        self.ones.swap_remove(&id);
        self.twos.swap_remove(&id);
        self.high.swap_remove(&id);
    }

    /// Re-file a live vertex under its current degree. Degree zero means
    /// every neighbor is gone: the vertex joins the independent set.
    fn rebucket(&mut self, id: TxId) {
        self.remove_from_buckets(id);
        match self.graph.degree(id) {
            0 => {
                self.independent.insert(id);
                self.graph.mark_deleted(id);
            }
            1 => {
                self.ones.insert(id);
            }
            2 => {
                self.twos.insert(id);
            }
            _ => {
                self.high.insert(id);
            }
        }
    }

    /// Re-file without the degree-zero promotion; used mid-surgery while
    /// path edges are being rewired.
    fn rebucket_no_promote(&mut self, id: TxId) {
        if self.graph.is_deleted(id) {
            return;
        }
        self.remove_from_buckets(id);
        match self.graph.degree(id) {
            0 => {}
            1 => {
                self.ones.insert(id);
            }
            2 => {
                self.twos.insert(id);
            }
            _ => {
                self.high.insert(id);
            }
        }
    }

    /// Delete a vertex and cascade: live neighbors are re-bucketed and
    /// promoted into the independent set when they become isolated.
    fn delete_vertex(&mut self, id: TxId) {
        if self.graph.is_deleted(id) {
            return;
        }
        self.remove_from_buckets(id);
        let neighbors: Vec<TxId> = self.graph.live_neighbors(id).collect();
        self.graph.remove_vertex(id);
        for neighbor in neighbors {
            self.rebucket(neighbor);
        }
    }

    /// Remove a vertex from graph and buckets without promoting its
    /// neighbors; callers fix the affected externals afterwards.
    fn raw_remove(&mut self, id: TxId) {
        self.remove_from_buckets(id);
        self.graph.remove_vertex(id);
    }

    /// A degree-1 vertex keeps its spot: its unique neighbor can never
    /// improve the answer, so the neighbor is deleted and the cascade
    /// promotes the vertex once it reaches degree zero.
    fn degree_one_reduction(&mut self) {
        let u = self.ones.pop().expect("ones bucket checked non-empty");
        let neighbor = self
            .graph
            .live_neighbors(u)
            .next()
            .expect("degree-1 vertex has a live neighbor");
        self.delete_vertex(neighbor);
    }

    fn inexact_reduction(&mut self) {
        let best = self
            .high
            .iter()
            .copied()
            .max_by_key(|id| self.graph.degree(*id));
        if let Some(id) = best {
            self.delete_vertex(id);
        }
    }

    fn degree_two_path_reduction(&mut self) {
        let u = self.twos.pop().expect("twos bucket checked non-empty");
        let (path, is_cycle) = self.collect_degree_two_path(u);

        if is_cycle {
            self.delete_vertex(u);
            return;
        }

        // External neighbors of the two path endpoints.
        let members: HashSet<TxId> = path.iter().copied().collect();
        let head = path[0];
        let tail = *path.last().expect("path is non-empty");
        let (v, w) = if path.len() == 1 {
            let externals: Vec<TxId> = self
                .graph
                .live_neighbors(head)
                .filter(|n| !members.contains(n))
                .collect();
            (externals[0], externals[1])
        } else {
            let v = self
                .graph
                .live_neighbors(head)
                .find(|n| !members.contains(n))
                .expect("open path head has an external neighbor");
            let w = self
                .graph
                .live_neighbors(tail)
                .find(|n| !members.contains(n))
                .expect("open path tail has an external neighbor");
            (v, w)
        };

        if v == w {
            self.delete_vertex(v);
        } else if path.len() % 2 == 1 {
            if self.graph.has_edge(v, w) {
                self.delete_vertex(v);
                self.delete_vertex(w);
            } else {
                // Contract: keep the head, splice it onto w, defer the rest.
                // The head keeps degree two and stays wherever it was
                // bucketed; re-inserting a popped head would loop on a
                // one-vertex path whose bridge edge already exists.
                for id in path.iter().skip(1) {
                    self.raw_remove(*id);
                }
                self.graph.add_edge(head, w);
                self.rebucket_no_promote(w);
                for id in path.iter().skip(1).rev() {
                    self.stack.push(*id);
                }
            }
        } else {
            // Even path: drop it entirely, bridge the externals, defer all.
            for id in &path {
                self.raw_remove(*id);
            }
            if !self.graph.has_edge(v, w) {
                self.graph.add_edge(v, w);
            }
            self.rebucket_no_promote(v);
            self.rebucket_no_promote(w);
            for id in path.iter().rev() {
                self.stack.push(*id);
            }
        }
    }

    /// Maximal run of live degree-2 vertices through `u`, ordered from
    /// one end to the other. The second component reports whether the
    /// run closes into a cycle.
    fn collect_degree_two_path(&self, u: TxId) -> (Vec<TxId>, bool) {
        let mut members: HashSet<TxId> = HashSet::new();
        let mut dfs = vec![u];
        members.insert(u);
        while let Some(id) = dfs.pop() {
            for neighbor in self.graph.live_neighbors(id) {
                if self.graph.degree(neighbor) == 2 && members.insert(neighbor) {
                    dfs.push(neighbor);
                }
            }
        }

        let is_cycle = members.iter().all(|id| {
            self.graph
                .live_neighbors(*id)
                .all(|n| members.contains(&n))
        });
        if is_cycle {
            return (members.into_iter().collect(), true);
        }

        // Order the run by walking from an endpoint.
        let start = members
            .iter()
            .copied()
            .find(|id| {
                self.graph
                    .live_neighbors(*id)
                    .filter(|n| members.contains(n))
                    .count()
                    < 2
            })
            .expect("open path has an endpoint");
        let mut ordered = vec![start];
        let mut seen: HashSet<TxId> = HashSet::new();
        seen.insert(start);
        let mut current = start;
        while let Some(next) = self
            .graph
            .live_neighbors(current)
            .find(|n| members.contains(n) && !seen.contains(n))
        {
            ordered.push(next);
            seen.insert(next);
            current = next;
        }
        (ordered, false)
    }
}

/// Peel the graph into rounds: solve, emit, delete, repeat until no live
/// vertex remains. Every round is an independent set of the graph it was
/// computed on; each vertex appears in exactly one round.
pub fn peel_rounds(graph: &UndirectedGraph) -> Vec<Vec<TxId>> {
    let mut rounds = Vec::new();
    let mut current = graph.copy_with_deletion();
    while current.live_count() > 0 {
        let set = LinearTime::new(current.clone()).solve();
        if set.is_empty() {
            // degenerate peel; fall back to the lowest live id
            let id = current.live_ids().min().expect("live vertex present");
            rounds.push(vec![id]);
            current.mark_deleted(id);
        } else {
            for id in &set {
                current.mark_deleted(*id);
            }
            rounds.push(set);
        }
        current = current.copy_with_deletion();
    }
    rounds
}
