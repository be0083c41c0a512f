//! A structured Cartesian `Forest` implementation.
//!
//! The real forest topology and octree/quadtree refinement logic are out of
//! scope for this crate (spec section 1); this is a minimal, affine
//! structured-grid stand-in sufficient to drive the unit and end-to-end
//! tests for C1-C6 without a real mesh database.

use nalgebra::Point3;

use crate::collab::{DependentNodeTable, Forest, NodeId};
use crate::knots::default_knots;

/// A `ne x ne x ne` structured hexahedral mesh of a given interpolation
/// order over an axis-aligned box. Connectivity and point coordinates are
/// precomputed at construction time so `Forest::element_nodes` and
/// `Forest::element_points` can hand out plain borrows.
#[derive(Debug, Clone)]
pub struct GridForest {
    order: usize,
    ne: usize,
    knots: Vec<f64>,
    deps: DependentNodeTable,
    elem_nodes: Vec<Vec<NodeId>>,
    elem_points: Vec<Vec<Point3<f64>>>,
    n_nodes_total: usize,
}

impl GridForest {
    pub fn new(order: usize, ne: usize, origin: Point3<f64>, size: Point3<f64>) -> Self {
        let knots = default_knots(order).expect("unsupported order");
        let nodes_per_axis = ne * (order - 1) + 1;
        let n_nodes_total = nodes_per_axis * nodes_per_axis * nodes_per_axis;

        let axis_value = |axis_origin: f64, axis_size: f64, elem_idx: usize, local: usize| {
            let elem_width = axis_size / ne as f64;
            let elem_start = axis_origin + elem_idx as f64 * elem_width;
            let t = knots[local];
            elem_start + (t + 1.0) / 2.0 * elem_width
        };
        let global_index = |axis_elem: usize, local: usize| axis_elem * (order - 1) + local;

        let num_elements = ne * ne * ne;
        let mut elem_nodes = Vec::with_capacity(num_elements);
        let mut elem_points = Vec::with_capacity(num_elements);

        for elem in 0..num_elements {
            let ex = elem % ne;
            let ey = (elem / ne) % ne;
            let ez = elem / (ne * ne);

            let mut nodes = Vec::with_capacity(order * order * order);
            let mut points = Vec::with_capacity(order * order * order);
            for lk in 0..order {
                for lj in 0..order {
                    for li in 0..order {
                        let gi = global_index(ex, li);
                        let gj = global_index(ey, lj);
                        let gk = global_index(ez, lk);
                        let id = (gi + gj * nodes_per_axis + gk * nodes_per_axis * nodes_per_axis)
                            as NodeId;
                        nodes.push(id);
                        points.push(Point3::new(
                            axis_value(origin.x, size.x, ex, li),
                            axis_value(origin.y, size.y, ey, lj),
                            axis_value(origin.z, size.z, ez, lk),
                        ));
                    }
                }
            }
            elem_nodes.push(nodes);
            elem_points.push(points);
        }

        Self {
            order,
            ne,
            knots,
            deps: DependentNodeTable::new(),
            elem_nodes,
            elem_points,
            n_nodes_total,
        }
    }

    pub fn unit_cube(order: usize, ne: usize) -> Self {
        Self::new(
            order,
            ne,
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 1.0),
        )
    }

    pub fn with_dependent_nodes(mut self, deps: DependentNodeTable) -> Self {
        self.deps = deps;
        self
    }
}

impl Forest for GridForest {
    fn order(&self) -> usize {
        self.order
    }

    fn dim(&self) -> usize {
        3
    }

    fn knots(&self) -> &[f64] {
        &self.knots
    }

    fn num_elements(&self) -> usize {
        self.ne * self.ne * self.ne
    }

    fn element_nodes(&self, elem: usize) -> &[NodeId] {
        &self.elem_nodes[elem]
    }

    fn element_points(&self, elem: usize) -> &[Point3<f64>] {
        &self.elem_points[elem]
    }

    fn dependent_nodes(&self) -> &DependentNodeTable {
        &self.deps
    }

    fn independent_node_ids(&self) -> Vec<NodeId> {
        (0..self.n_nodes_total as NodeId).collect()
    }
}
