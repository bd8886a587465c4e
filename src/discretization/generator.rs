use super::mesh::{Boundary, Cell, Face, Mesh};
use glam::DVec3;

/// Build a 1-D column of `n` equal cells of height `h` along +x, starting at
/// `origin`. Cross-sections have unit area so cell volumes equal `h`.
pub fn create_column_mesh(n: usize, h: f64, origin: f64) -> Mesh {
    let mut cells = Vec::with_capacity(n);
    let mut faces = Vec::with_capacity(n + 1);

    let normal = DVec3::X;
    for i in 0..=n {
        let x = origin + i as f64 * h;
        let (neighbors, boundary) = if i == 0 {
            ((0, None), Some(Boundary::Top))
        } else if i == n {
            ((n - 1, None), Some(Boundary::Bottom))
        } else {
            ((i - 1, Some(i)), None)
        };
        faces.push(Face {
            area: 1.0,
            normal,
            neighbor_cell_ids: neighbors,
            centroid: DVec3::new(x, 0.0, 0.0),
            boundary,
        });
    }

    for i in 0..n {
        cells.push(Cell {
            id: i,
            volume: h,
            centroid: DVec3::new(origin + (i as f64 + 0.5) * h, 0.0, 0.0),
            face_ids: vec![i, i + 1],
        });
    }

    Mesh { cells, faces }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn column_faces_and_cells_line_up() {
        let mesh = create_column_mesh(4, 0.5, -1.0);
        assert_eq!(mesh.cells.len(), 4);
        assert_eq!(mesh.faces.len(), 5);
        assert_relative_eq!(mesh.cells[0].centroid.x, -0.75);
        assert_relative_eq!(mesh.cells[3].centroid.x, 0.75);

        let (top_id, top) = mesh.boundary_face(Boundary::Top).unwrap();
        assert_eq!(top_id, 0);
        assert_eq!(top.neighbor_cell_ids, (0, None));
        let (_, bottom) = mesh.boundary_face(Boundary::Bottom).unwrap();
        assert_eq!(bottom.neighbor_cell_ids, (3, None));

        assert_relative_eq!(mesh.face_distance(&mesh.faces[2]), 0.5);
        assert_relative_eq!(mesh.face_distance(top), 0.25);
    }
}
