//! External collaborator interfaces (spec section 6) plus the single-process
//! default implementations used to exercise and test this crate.
//!
//! The forest topology, the element/constitutive physics, and the
//! message-passing layer are all owned by the caller in a real deployment;
//! this crate only borrows them through these traits (`&dyn Trait`), which
//! also makes the "missing collaborator" fatal condition from the original
//! error-handling design unrepresentable — there is no null reference to
//! forget to check.

use std::collections::HashMap;

use nalgebra::Point3;

use crate::lagrange::{tensor_basis_2d, tensor_basis_3d};

/// A node index `< 0` encodes a dependent (hanging) node whose value is a
/// fixed weighted sum of independent contributors.
pub type NodeId = i32;

#[derive(Debug, Clone, Default)]
pub struct DependentNodeTable {
    entries: HashMap<NodeId, (Vec<NodeId>, Vec<f64>)>,
}

impl DependentNodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, dep_node: NodeId, contributors: Vec<NodeId>, weights: Vec<f64>) {
        debug_assert!(dep_node < 0, "dependent node ids must be negative");
        debug_assert_eq!(contributors.len(), weights.len());
        self.entries.insert(dep_node, (contributors, weights));
    }

    pub fn is_dependent(node: NodeId) -> bool {
        node < 0
    }

    pub fn contributors(&self, dep_node: NodeId) -> Option<&(Vec<NodeId>, Vec<f64>)> {
        self.entries.get(&dep_node)
    }
}

/// Forest collaborator: owns element-node connectivity, mesh order, the
/// knot vector, and the dependent-node table.
pub trait Forest {
    fn order(&self) -> usize;
    fn dim(&self) -> usize;
    fn knots(&self) -> &[f64];
    fn num_elements(&self) -> usize;
    fn element_nodes(&self, elem: usize) -> &[NodeId];
    fn element_points(&self, elem: usize) -> &[Point3<f64>];
    fn dependent_nodes(&self) -> &DependentNodeTable;
    fn independent_node_ids(&self) -> Vec<NodeId>;

    /// `evalInterp(pt, N, [Na, Nb, (Nc)])`. The default implementation is
    /// the standard tensor-product Lagrange basis over `self.knots()`;
    /// override only if a forest uses a non-Lagrange coarse basis.
    fn eval_interp(&self, pt: (f64, f64, f64)) -> (Vec<f64>, Vec<f64>, Vec<f64>, Option<Vec<f64>>) {
        match self.dim() {
            2 => {
                let (n, dxi, deta) = tensor_basis_2d(self.knots(), pt.0, pt.1);
                (n, dxi, deta, None)
            }
            3 => {
                let (n, dxi, deta, dzeta) = tensor_basis_3d(self.knots(), pt.0, pt.1, pt.2);
                (n, dxi, deta, Some(dzeta))
            }
            d => panic!("unsupported forest dimension {d}"),
        }
    }
}

/// Element-collaborator callbacks used only by the C6 goal functionals.
pub trait ElementCollaborator {
    fn vars_per_node(&self) -> usize;

    /// `computeEnergies(time, &Te, &Pe, Xpts, vars, dvars) -> (Te, Pe)`.
    fn compute_energies(&self, elem: usize, xpts: &[Point3<f64>], vars: &[f64]) -> (f64, f64);

    /// `addLocalizedError(time, err, psi, Xpts, U)`, accumulating into `err`
    /// (length `xpts.len() * vars_per_node()`) with add semantics.
    fn add_localized_error(
        &self,
        elem: usize,
        err: &mut [f64],
        psi: &[f64],
        xpts: &[Point3<f64>],
        u: &[f64],
    );

    fn constitutive(&self, elem: usize) -> &dyn ConstitutiveModel;
}

/// Constitutive-model collaborator used by the KS functional.
pub trait ConstitutiveModel {
    fn failure(&self, pt: (f64, f64, f64), strain: &[f64; 6]) -> f64;
    fn failure_strain_sens(&self, pt: (f64, f64, f64), strain: &[f64; 6]) -> [f64; 6];
    fn add_failure_dv_sens(&self, pt: (f64, f64, f64), strain: &[f64; 6], alpha: f64, dfdx: &mut [f64]);
}

/// Message-passing collective layer (allreduce only; this crate never needs
/// point-to-point communication).
pub trait Comm {
    fn allreduce_sum(&self, value: f64) -> f64;
    fn allreduce_max(&self, value: f64) -> f64;
    fn rank(&self) -> i32;
}

/// Single-process communicator: every reduction is the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl Comm for SerialComm {
    fn allreduce_sum(&self, value: f64) -> f64 {
        value
    }
    fn allreduce_max(&self, value: f64) -> f64 {
        value
    }
    fn rank(&self) -> i32 {
        0
    }
}

/// Single-process distributed nodal vector.
///
/// Storage exists only for independent nodes; a dependent node id has no
/// raw storage slot at all, which is what makes "never write a raw value to
/// a dependent slot" a structural guarantee rather than a runtime check.
#[derive(Debug, Clone)]
pub struct NodalVector {
    vars_per_node: usize,
    index: HashMap<NodeId, usize>,
    data: Vec<f64>,
    deps: DependentNodeTable,
}

impl NodalVector {
    pub fn new(node_ids: &[NodeId], vars_per_node: usize, deps: DependentNodeTable) -> Self {
        let mut index = HashMap::with_capacity(node_ids.len());
        for (slot, &id) in node_ids.iter().enumerate() {
            index.insert(id, slot);
        }
        let data = vec![0.0; node_ids.len() * vars_per_node];
        Self {
            vars_per_node,
            index,
            data,
            deps,
        }
    }

    pub fn vars_per_node(&self) -> usize {
        self.vars_per_node
    }

    pub fn zero(&mut self) {
        self.data.iter_mut().for_each(|v| *v = 0.0);
    }

    fn slot_range(&self, id: NodeId) -> Option<std::ops::Range<usize>> {
        self.index.get(&id).map(|&s| {
            let start = s * self.vars_per_node;
            start..start + self.vars_per_node
        })
    }

    /// `getValues`: resolves dependent nodes through the table.
    pub fn get_values(&self, nodes: &[NodeId]) -> Vec<f64> {
        let mut out = vec![0.0; nodes.len() * self.vars_per_node];
        for (k, &id) in nodes.iter().enumerate() {
            let out_slice = &mut out[k * self.vars_per_node..(k + 1) * self.vars_per_node];
            if DependentNodeTable::is_dependent(id) {
                if let Some((contributors, weights)) = self.deps.contributors(id) {
                    for (&c, &w) in contributors.iter().zip(weights) {
                        if let Some(range) = self.slot_range(c) {
                            for (o, v) in out_slice.iter_mut().zip(&self.data[range]) {
                                *o += w * v;
                            }
                        }
                    }
                }
            } else if let Some(range) = self.slot_range(id) {
                out_slice.copy_from_slice(&self.data[range]);
            }
        }
        out
    }

    /// `setValues(..., ADD)`: dependent targets are routed through the
    /// table's weights before accumulation, per the dependent-node contract.
    pub fn add_values(&mut self, nodes: &[NodeId], values: &[f64]) {
        for (k, &id) in nodes.iter().enumerate() {
            let chunk = &values[k * self.vars_per_node..(k + 1) * self.vars_per_node];
            self.add_one(id, chunk);
        }
    }

    fn add_one(&mut self, id: NodeId, chunk: &[f64]) {
        if DependentNodeTable::is_dependent(id) {
            if let Some((contributors, weights)) = self.deps.contributors(id).cloned() {
                for (c, w) in contributors.into_iter().zip(weights) {
                    if let Some(range) = self.slot_range(c) {
                        for (o, v) in self.data[range].iter_mut().zip(chunk) {
                            *o += w * v;
                        }
                    }
                }
            }
            // A dependent node with no table entry silently drops the
            // contribution: there is no raw slot to write it into.
        } else if let Some(range) = self.slot_range(id) {
            for (o, v) in self.data[range].iter_mut().zip(chunk) {
                *o += v;
            }
        }
    }

    /// `setValues(..., INSERT_NONZERO)`: overwrite rather than accumulate.
    pub fn insert_nonzero_values(&mut self, nodes: &[NodeId], values: &[f64]) {
        for (k, &id) in nodes.iter().enumerate() {
            let chunk = &values[k * self.vars_per_node..(k + 1) * self.vars_per_node];
            if chunk.iter().all(|v| *v == 0.0) {
                continue;
            }
            if DependentNodeTable::is_dependent(id) {
                if let Some((contributors, weights)) = self.deps.contributors(id).cloned() {
                    for (c, w) in contributors.into_iter().zip(weights) {
                        if let Some(range) = self.slot_range(c) {
                            for (o, v) in self.data[range].iter_mut().zip(chunk) {
                                *o = w * v;
                            }
                        }
                    }
                }
            } else if let Some(range) = self.slot_range(id) {
                self.data[range].copy_from_slice(chunk);
            }
        }
    }

    /// `beginSetValues`/`endSetValues`. A no-op under a single process; kept
    /// as a begin/end pair so the crate's suspension-point contract (no
    /// reads between begin and end) is visible in the API even though
    /// nothing actually suspends here.
    pub fn begin_finalize(&mut self) {}
    pub fn end_finalize(&mut self) {}

    pub fn begin_distribute(&mut self) {}
    pub fn end_distribute(&mut self) {}

    pub fn finalize(&mut self) {
        self.begin_finalize();
        self.end_finalize();
    }

    pub fn distribute(&mut self) {
        self.begin_distribute();
        self.end_distribute();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_read_independent_node_round_trips() {
        let mut v = NodalVector::new(&[1, 2, 3], 2, DependentNodeTable::new());
        v.add_values(&[1, 2], &[1.0, 2.0, 3.0, 4.0]);
        v.add_values(&[1], &[0.5, 0.5]);
        let out = v.get_values(&[1, 2, 3]);
        assert_eq!(out, vec![1.5, 2.5, 3.0, 4.0, 0.0, 0.0]);
    }

    #[test]
    fn dependent_node_reads_back_weighted_sum() {
        let mut deps = DependentNodeTable::new();
        deps.add(-5, vec![3, 7], vec![0.5, 0.5]);
        let mut v = NodalVector::new(&[3, 7], 1, deps);
        v.add_values(&[3, 7], &[2.0, 4.0]);
        let out = v.get_values(&[-5]);
        assert_eq!(out, vec![3.0]);
    }

    #[test]
    fn dependent_node_has_no_raw_storage_slot() {
        let mut deps = DependentNodeTable::new();
        deps.add(-5, vec![3], vec![1.0]);
        let mut v = NodalVector::new(&[3], 1, deps);
        // Adding directly at the dependent id must never create a slot for
        // it; it can only ever be observed by routing through contributors.
        v.add_values(&[-5], &[99.0]);
        assert_eq!(v.data.len(), 1);
        assert_eq!(v.get_values(&[3]), vec![99.0]);
    }
}
