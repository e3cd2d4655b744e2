//! dcmesh Mesh: Label Volume to STL Surfaces
//!
//! Turns a segmentation volume into one surface mesh per anatomical label.
//!
//! ```text
//! LabeledVolume ─mask(label)─► BinaryMask ─marching_cubes─► MeshData
//!                                                             │
//!                          <out>/<Name>.stl ◄─write─ smooth ◄─┘
//! ```
//!
//! Coordinates stay in voxel index space; voxel spacing is not applied.

pub mod error;
pub mod extract;
pub mod labels;
pub mod marching_cubes;
pub mod mesh;
pub mod smoothing;
pub mod stl;
pub mod volume;

pub use error::{MeshError, Result};
pub use extract::{LabelOutcome, MeshExtractor, MESH_EXT};
pub use labels::{LabelSpec, DEFAULT_LABELS};
pub use marching_cubes::marching_cubes;
pub use mesh::MeshData;
pub use smoothing::{smooth, SmoothingParams};
pub use stl::{load_binary_stl, write_binary_stl};
pub use volume::{BinaryMask, LabeledVolume};
