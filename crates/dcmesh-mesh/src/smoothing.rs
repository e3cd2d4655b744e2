//! Windowed-sinc mesh smoothing.
//!
//! A low-pass filter on vertex positions built from Chebyshev polynomials
//! of the umbrella operator, weighted by a Hamming-windowed sinc. It
//! removes the voxel staircase without the shrinkage of plain Laplacian
//! smoothing. Only positions change; the triangle list is returned as is.
//!
//! Vertex classes follow the classic filter:
//! - simple: smoothed over all edge-connected neighbours
//! - edge: lies on boundary, non-manifold or feature edges; smoothed only
//!   along those edges
//! - fixed: never moves (corners of edge chains, or edges whose smoothing
//!   is disabled)
use std::collections::HashMap;
use std::f64::consts::PI;

use glam::{DVec3, Vec3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::mesh::MeshData;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingParams {
    pub enabled: bool,
    pub iterations: u32,
    /// Filter pass band in `(0, 2]`; smaller smooths more.
    pub pass_band: f64,
    pub feature_edge_smoothing: bool,
    /// Dihedral angle in degrees above which an edge is a feature edge.
    pub feature_angle: f64,
    /// Turn angle in degrees along an edge chain above which the vertex is
    /// fixed.
    pub edge_angle: f64,
    pub boundary_smoothing: bool,
    pub non_manifold_smoothing: bool,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            enabled: true,
            iterations: 30,
            pass_band: 0.01,
            feature_edge_smoothing: false,
            feature_angle: 45.0,
            edge_angle: 15.0,
            boundary_smoothing: true,
            non_manifold_smoothing: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum VertexClass {
    Fixed,
    Simple(Vec<u32>),
    Edge(Vec<u32>),
}

impl VertexClass {
    fn neighbours(&self) -> Option<&[u32]> {
        match self {
            VertexClass::Fixed => None,
            VertexClass::Simple(n) | VertexClass::Edge(n) => Some(n),
        }
    }
}

/// Returns a mesh with the same triangles and filtered vertex positions.
pub fn smooth(mesh: &MeshData, params: &SmoothingParams) -> MeshData {
    if !params.enabled || params.iterations == 0 || mesh.is_empty() {
        return mesh.clone();
    }

    let x0: Vec<DVec3> = mesh.vertices.iter().map(|v| v.as_dvec3()).collect();
    let classes = classify(mesh, &x0, params);
    let weights = filter_weights(params.iterations as usize, params.pass_band);

    debug!(
        vertices = x0.len(),
        fixed = classes.iter().filter(|c| **c == VertexClass::Fixed).count(),
        iterations = params.iterations,
        "windowed sinc smoothing"
    );

    let delta = |x: &[DVec3], i: usize| -> DVec3 {
        match classes[i].neighbours() {
            Some(nbrs) if !nbrs.is_empty() => {
                let sum: DVec3 = nbrs.iter().map(|&j| x[j as usize]).sum();
                sum / nbrs.len() as f64 - x[i]
            }
            _ => DVec3::ZERO,
        }
    };

    let mut prev = x0;
    let mut curr: Vec<DVec3> = (0..prev.len())
        .into_par_iter()
        .map(|i| prev[i] + 0.5 * delta(&prev, i))
        .collect();
    let mut acc: Vec<DVec3> = prev
        .par_iter()
        .zip(curr.par_iter())
        .map(|(a, b)| *a * weights[0] + *b * weights[1])
        .collect();

    for &w in &weights[2..] {
        let next: Vec<DVec3> = (0..curr.len())
            .into_par_iter()
            .map(|i| 2.0 * curr[i] - prev[i] + delta(&curr, i))
            .collect();
        acc.par_iter_mut()
            .zip(next.par_iter())
            .for_each(|(a, x)| *a += *x * w);
        prev = std::mem::replace(&mut curr, next);
    }

    MeshData {
        vertices: acc.iter().map(|p| p.as_vec3()).collect::<Vec<Vec3>>(),
        triangles: mesh.triangles.clone(),
    }
}

/// Normalised Hamming-windowed Chebyshev coefficients `f_0..=f_n`.
fn filter_weights(n: usize, pass_band: f64) -> Vec<f64> {
    let pass_band = pass_band.clamp(1e-6, 2.0);
    let theta = (1.0 - 0.5 * pass_band).acos();

    let mut weights: Vec<f64> = (0..=n)
        .map(|i| {
            let fi = i as f64;
            let sinc = if i == 0 {
                theta / PI
            } else {
                2.0 * (fi * theta).sin() / (fi * PI)
            };
            let window = 0.54 + 0.46 * (fi * PI / (n as f64 + 1.0)).cos();
            sinc * window
        })
        .collect();

    let sum: f64 = weights.iter().sum();
    if sum.abs() > f64::EPSILON {
        weights.iter_mut().for_each(|w| *w /= sum);
    }
    weights
}

fn classify(mesh: &MeshData, x: &[DVec3], params: &SmoothingParams) -> Vec<VertexClass> {
    let n = x.len();

    // undirected edge -> faces, in first-seen order
    let mut edge_faces: HashMap<(u32, u32), Vec<usize>> = HashMap::new();
    let mut edge_order: Vec<(u32, u32)> = Vec::new();
    let mut neighbours: Vec<Vec<u32>> = vec![Vec::new(); n];

    for (f, t) in mesh.triangles.iter().enumerate() {
        for k in 0..3 {
            let (a, b) = (t[k], t[(k + 1) % 3]);
            let key = (a.min(b), a.max(b));
            let faces = edge_faces.entry(key).or_insert_with(|| {
                edge_order.push(key);
                Vec::new()
            });
            if faces.is_empty() {
                neighbours[a as usize].push(b);
                neighbours[b as usize].push(a);
            }
            faces.push(f);
        }
    }

    let cos_feature = params.feature_angle.to_radians().cos();
    let mut fixed = vec![false; n];
    let mut edge_neighbours: Vec<Vec<u32>> = vec![Vec::new(); n];

    for key in &edge_order {
        let faces = &edge_faces[key];
        let (a, b) = *key;
        let special = match faces.len() {
            1 if !params.boundary_smoothing => {
                fixed[a as usize] = true;
                fixed[b as usize] = true;
                false
            }
            1 => true,
            2 if params.feature_edge_smoothing => {
                let n0 = mesh.face_normal(faces[0]).as_dvec3();
                let n1 = mesh.face_normal(faces[1]).as_dvec3();
                n0.dot(n1) < cos_feature
            }
            2 => false,
            _ if !params.non_manifold_smoothing => {
                fixed[a as usize] = true;
                fixed[b as usize] = true;
                false
            }
            _ => true,
        };
        if special {
            edge_neighbours[a as usize].push(b);
            edge_neighbours[b as usize].push(a);
        }
    }

    let cos_edge = params.edge_angle.to_radians().cos();
    (0..n)
        .map(|i| {
            if fixed[i] || neighbours[i].is_empty() {
                return VertexClass::Fixed;
            }
            let chain = std::mem::take(&mut edge_neighbours[i]);
            if chain.is_empty() {
                return VertexClass::Simple(std::mem::take(&mut neighbours[i]));
            }
            if chain.len() != 2 {
                return VertexClass::Fixed;
            }
            let l1 = (x[i] - x[chain[0] as usize]).normalize_or_zero();
            let l2 = (x[chain[1] as usize] - x[i]).normalize_or_zero();
            if l1.dot(l2) < cos_edge {
                VertexClass::Fixed
            } else {
                VertexClass::Edge(chain)
            }
        })
        .collect()
}
