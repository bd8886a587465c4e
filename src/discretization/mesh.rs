use glam::DVec3;

/// The complete computational grid.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub cells: Vec<Cell>,
    pub faces: Vec<Face>,
}

/// A single control volume.
#[derive(Debug, Clone)]
pub struct Cell {
    pub id: usize,
    pub volume: f64,
    pub centroid: DVec3,
    pub face_ids: Vec<usize>,
}

/// Which end of the column a boundary face closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Top,
    Bottom,
}

/// An interface between two cells.
#[derive(Debug, Clone)]
pub struct Face {
    pub area: f64,
    pub normal: DVec3,
    /// Tuple of (cell1_id, optional cell2_id). `None` indicates a boundary face.
    pub neighbor_cell_ids: (usize, Option<usize>),
    pub centroid: DVec3,
    pub boundary: Option<Boundary>,
}

impl Mesh {
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// Centre-to-centre distance across an interior face, or centre-to-face
    /// distance for a boundary face.
    pub fn face_distance(&self, face: &Face) -> f64 {
        let (k, l) = face.neighbor_cell_ids;
        match l {
            Some(l) => self.cells[k].centroid.distance(self.cells[l].centroid),
            None => self.cells[k].centroid.distance(face.centroid),
        }
    }

    pub fn boundary_face(&self, which: Boundary) -> Option<(usize, &Face)> {
        self.faces
            .iter()
            .enumerate()
            .find(|(_, f)| f.boundary == Some(which))
    }
}
