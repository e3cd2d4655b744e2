//! Marching cubes over a binary mask.
//!
//! # Cube Topology
//!
//! ```text
//!       6──────7         Corners (binary ZYX):
//!      /│     /│           0=(0,0,0)  1=(1,0,0)  2=(0,1,0)  3=(1,1,0)
//!     4─┼────5 │           4=(0,0,1)  5=(1,0,1)  6=(0,1,1)  7=(1,1,1)
//!     │ 2────┼─3
//!     │/     │/          +Y
//!     0──────1            │  +Z
//!                         │ /
//!                         └───+X
//! ```
//!
//! The case table is not hand-written. For each of the 256 corner
//! configurations every cube face contributes directed boundary segments
//! between its crossed edges; on an ambiguous face (two diagonal inside
//! corners) the inside corners are kept apart. Segments are directed so
//! the inside corner lies on their right when the face is seen from
//! outside the cube, which makes the chained loops wind counter-clockwise
//! around the outward normal. Each loop is then fan-triangulated from a
//! root whose diagonals all cross the cell interior: a diagonal lying on a
//! face would have no partner in the neighbouring cell.
//!
//! Both cells sharing a face derive the same segments with opposite
//! directions, so the extracted surface is closed and consistently
//! oriented wherever it does not reach the volume border.
use std::collections::HashMap;

use glam::Vec3;
use once_cell::sync::Lazy;

use crate::mesh::MeshData;
use crate::volume::BinaryMask;

/// Iso-level between the outside (0) and inside (1) values.
pub const ISO_LEVEL: f32 = 0.5;

/// Edge endpoint corner indices.
pub const EDGE_CORNERS: [[u8; 2]; 12] = [
    [0, 1], // Edge 0:  X axis at Y=0, Z=0
    [0, 2], // Edge 1:  Y axis at X=0, Z=0
    [0, 4], // Edge 2:  Z axis at X=0, Y=0
    [1, 3], // Edge 3:  Y axis at X=1, Z=0
    [1, 5], // Edge 4:  Z axis at X=1, Y=0
    [2, 3], // Edge 5:  X axis at Y=1, Z=0
    [2, 6], // Edge 6:  Z axis at X=0, Y=1
    [3, 7], // Edge 7:  Z axis at X=1, Y=1
    [4, 5], // Edge 8:  X axis at Y=0, Z=1
    [4, 6], // Edge 9:  Y axis at X=0, Z=1
    [5, 7], // Edge 10: Y axis at X=1, Z=1
    [6, 7], // Edge 11: X axis at Y=1, Z=1
];

/// Corners of each face in cyclic order.
const FACE_CORNERS: [[u8; 4]; 6] = [
    [0, 2, 6, 4], // -X
    [1, 3, 7, 5], // +X
    [0, 1, 5, 4], // -Y
    [2, 3, 7, 6], // +Y
    [0, 1, 3, 2], // -Z
    [4, 5, 7, 6], // +Z
];

/// Triangles (as edge index triples) for every corner configuration.
pub static CASE_TABLE: Lazy<Vec<Vec<[u8; 3]>>> =
    Lazy::new(|| (0..=255u8).map(triangulate_case).collect());

fn corner_offset(corner: u8) -> [usize; 3] {
    [
        (corner & 1) as usize,
        ((corner >> 1) & 1) as usize,
        ((corner >> 2) & 1) as usize,
    ]
}

fn corner_pos(corner: u8) -> Vec3 {
    let [x, y, z] = corner_offset(corner);
    Vec3::new(x as f32, y as f32, z as f32)
}

fn edge_midpoint(edge: usize) -> Vec3 {
    let [a, b] = EDGE_CORNERS[edge];
    (corner_pos(a) + corner_pos(b)) * 0.5
}

fn edge_between(a: u8, b: u8) -> usize {
    EDGE_CORNERS
        .iter()
        .position(|e| (e[0] == a && e[1] == b) || (e[0] == b && e[1] == a))
        .unwrap_or_default()
}

fn edge_on_face(edge: usize, face: &[u8; 4]) -> bool {
    EDGE_CORNERS[edge].iter().all(|c| face.contains(c))
}

fn on_common_face(a: usize, b: usize) -> bool {
    FACE_CORNERS
        .iter()
        .any(|face| edge_on_face(a, face) && edge_on_face(b, face))
}

/// Axis along which an edge runs: 0 = x, 1 = y, 2 = z.
fn edge_axis(edge: usize) -> usize {
    let [a, b] = EDGE_CORNERS[edge];
    match a ^ b {
        1 => 0,
        2 => 1,
        _ => 2,
    }
}

fn triangulate_case(config: u8) -> Vec<[u8; 3]> {
    let inside = |corner: u8| config & (1 << corner) != 0;

    // next[e] = edge that follows e on its loop
    let mut next: [Option<usize>; 12] = [None; 12];

    for face in FACE_CORNERS {
        let face_center = face.iter().map(|&c| corner_pos(c)).sum::<Vec3>() * 0.25;
        let outward = (face_center - Vec3::splat(0.5)) * 2.0;

        let crossed: Vec<usize> = (0..4)
            .filter(|&i| inside(face[i]) != inside(face[(i + 1) % 4]))
            .collect();

        let mut add_segment = |p: usize, q: usize, toward: Vec3| {
            let (pp, qq) = (edge_midpoint(p), edge_midpoint(q));
            let side = outward.dot((qq - pp).cross(toward - pp));
            if side < 0.0 {
                next[p] = Some(q);
            } else {
                next[q] = Some(p);
            }
        };

        match crossed.len() {
            2 => {
                let p = edge_between(face[crossed[0]], face[(crossed[0] + 1) % 4]);
                let q = edge_between(face[crossed[1]], face[(crossed[1] + 1) % 4]);
                let inner: Vec<Vec3> = face
                    .iter()
                    .filter(|&&c| inside(c))
                    .map(|&c| corner_pos(c))
                    .collect();
                let centroid = inner.iter().copied().sum::<Vec3>() / inner.len() as f32;
                add_segment(p, q, centroid);
            }
            4 => {
                for i in 0..4 {
                    if !inside(face[i]) {
                        continue;
                    }
                    let before = edge_between(face[(i + 3) % 4], face[i]);
                    let after = edge_between(face[i], face[(i + 1) % 4]);
                    add_segment(before, after, corner_pos(face[i]));
                }
            }
            _ => {}
        }
    }

    let mut triangles = Vec::new();
    let mut visited = [false; 12];
    for start in 0..12 {
        if visited[start] || next[start].is_none() {
            continue;
        }
        let mut ring = Vec::new();
        let mut edge = start;
        while !visited[edge] {
            visited[edge] = true;
            ring.push(edge as u8);
            match next[edge] {
                Some(n) => edge = n,
                None => break,
            }
        }
        let n = ring.len();
        let root = (0..n)
            .find(|&k| {
                (2..n.saturating_sub(1))
                    .all(|i| !on_common_face(ring[k] as usize, ring[(k + i) % n] as usize))
            })
            .unwrap_or(0);
        ring.rotate_left(root);
        for i in 1..n.saturating_sub(1) {
            triangles.push([ring[0], ring[i], ring[i + 1]]);
        }
    }
    triangles
}

/// Extracts the iso-surface of `mask` in voxel index coordinates.
///
/// The mask is not padded: where the label touches the volume border the
/// surface stays open.
pub fn marching_cubes(mask: &BinaryMask) -> MeshData {
    let Some((lo, hi)) = mask.bounds() else {
        return MeshData::default();
    };
    let dims = mask.dims();
    if dims.iter().any(|&d| d < 2) {
        return MeshData::default();
    }

    let start: [usize; 3] = std::array::from_fn(|i| lo[i].saturating_sub(1));
    let end: [usize; 3] = std::array::from_fn(|i| hi[i].min(dims[i] - 2));

    let mut vertices: Vec<Vec3> = Vec::new();
    let mut triangles: Vec<[u32; 3]> = Vec::new();
    let mut shared: HashMap<([usize; 3], usize), u32> = HashMap::new();

    for z in start[2]..=end[2] {
        for y in start[1]..=end[1] {
            for x in start[0]..=end[0] {
                let mut config = 0u8;
                for corner in 0..8u8 {
                    let [ox, oy, oz] = corner_offset(corner);
                    if mask.get(x + ox, y + oy, z + oz) {
                        config |= 1 << corner;
                    }
                }
                if config == 0 || config == 0xFF {
                    continue;
                }

                for tri in &CASE_TABLE[config as usize] {
                    let mut ids = [0u32; 3];
                    for (slot, &edge) in ids.iter_mut().zip(tri) {
                        let edge = edge as usize;
                        let [ox, oy, oz] = corner_offset(EDGE_CORNERS[edge][0]);
                        let key = ([x + ox, y + oy, z + oz], edge_axis(edge));
                        *slot = *shared.entry(key).or_insert_with(|| {
                            let (base, axis) = key;
                            let mut p = Vec3::new(base[0] as f32, base[1] as f32, base[2] as f32);
                            p[axis] += ISO_LEVEL;
                            vertices.push(p);
                            (vertices.len() - 1) as u32
                        });
                    }
                    triangles.push(ids);
                }
            }
        }
    }

    MeshData::new(vertices, triangles)
}
