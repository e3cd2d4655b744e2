//! Binary STL serialization.
//!
//! ```text
//! UINT8[80]    – Header
//! UINT32       – Number of triangles
//! foreach triangle
//!     REAL32[3] – Normal vector
//!     REAL32[3] – Vertex 1
//!     REAL32[3] – Vertex 2
//!     REAL32[3] – Vertex 3
//!     UINT16    – Attribute byte count (0)
//! end
//! ```
//!
//! All values little endian.
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use glam::Vec3;

use crate::error::{MeshError, Result};
use crate::mesh::MeshData;

/// STL binary header size in bytes.
const HEADER_SIZE: usize = 80;

/// Size of one triangle in binary STL (normal + 3 vertices + attribute).
const TRIANGLE_SIZE: usize = 50;

const HEADER_TEXT: &[u8] = b"binary STL written by dcmesh";

/// Writes `mesh` as binary STL. An empty mesh produces a valid file with
/// zero facets.
pub fn write_binary_stl(mesh: &MeshData, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let write_err = |e: std::io::Error| MeshError::Write {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let count = u32::try_from(mesh.triangle_count()).map_err(|_| MeshError::Write {
        path: path.to_path_buf(),
        message: format!("{} triangles exceed the STL limit", mesh.triangle_count()),
    })?;

    let file = File::create(path).map_err(write_err)?;
    let mut out = BufWriter::new(file);
    write_stl_to(mesh, count, &mut out).map_err(write_err)?;
    out.flush().map_err(write_err)?;
    Ok(())
}

fn write_stl_to<W: Write>(mesh: &MeshData, count: u32, out: &mut W) -> std::io::Result<()> {
    let mut header = [0u8; HEADER_SIZE];
    header[..HEADER_TEXT.len()].copy_from_slice(HEADER_TEXT);
    out.write_all(&header)?;
    out.write_all(&count.to_le_bytes())?;

    for i in 0..mesh.triangle_count() {
        write_vec3(out, mesh.face_normal(i))?;
        for v in mesh.triangle(i) {
            write_vec3(out, v)?;
        }
        out.write_all(&0u16.to_le_bytes())?;
    }
    Ok(())
}

fn write_vec3<W: Write>(out: &mut W, v: Vec3) -> std::io::Result<()> {
    for c in v.to_array() {
        out.write_all(&c.to_le_bytes())?;
    }
    Ok(())
}

/// Reads a binary STL into an unindexed mesh (three fresh vertices per
/// facet).
pub fn load_binary_stl(path: impl AsRef<Path>) -> Result<MeshData> {
    let path = path.as_ref();
    let shape_err = |message: String| MeshError::Shape(format!("{}: {message}", path.display()));

    let mut reader = BufReader::new(File::open(path)?);
    let mut header = [0u8; HEADER_SIZE + 4];
    reader
        .read_exact(&mut header)
        .map_err(|_| shape_err("file too small to be binary STL".to_string()))?;

    let count = u32::from_le_bytes([
        header[HEADER_SIZE],
        header[HEADER_SIZE + 1],
        header[HEADER_SIZE + 2],
        header[HEADER_SIZE + 3],
    ]) as usize;

    let mut mesh = MeshData {
        vertices: Vec::with_capacity(count * 3),
        triangles: Vec::with_capacity(count),
    };
    let mut buf = [0u8; TRIANGLE_SIZE];
    for i in 0..count {
        reader
            .read_exact(&mut buf)
            .map_err(|_| shape_err(format!("expected {count} facets, got {i}")))?;

        // skip the stored normal
        let base = mesh.vertices.len() as u32;
        for k in 0..3 {
            let at = 12 + k * 12;
            mesh.vertices.push(read_vec3(&buf[at..at + 12]));
        }
        mesh.triangles.push([base, base + 1, base + 2]);
    }
    Ok(mesh)
}

fn read_vec3(buf: &[u8]) -> Vec3 {
    let f = |i: usize| f32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
    Vec3::new(f(0), f(4), f(8))
}
