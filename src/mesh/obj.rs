use super::Mesh;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// `v x y z` lines followed by `f i j k` lines, each newline-terminated.
fn obj_lines(mesh: &Mesh) -> impl Iterator<Item = String> + '_ {
    let vertices = mesh
        .vertices
        .iter()
        .map(|[x, y, z]| format!("v {} {} {}\n", x, y, z));
    let faces = mesh
        .faces
        .iter()
        .map(|[i, j, k]| format!("f {} {} {}\n", i, j, k));
    vertices.chain(faces)
}

pub fn write_obj<W: Write>(mesh: &Mesh, mut out: W) -> std::io::Result<()> {
    for line in obj_lines(mesh) {
        out.write_all(line.as_bytes())?;
    }
    out.flush()
}

pub fn to_obj_string(mesh: &Mesh) -> String {
    obj_lines(mesh).collect()
}

pub fn save_obj(mesh: &Mesh, path: &Path) -> std::io::Result<()> {
    let file = File::create(path)?;
    write_obj(mesh, BufWriter::new(file))
}
