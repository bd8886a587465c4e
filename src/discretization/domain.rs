//! The sediment column: a diffusive boundary layer (DBL) of water sitting on
//! a porous sediment, discretized into equal cells.

use nalgebra::DVector;
use tracing::debug;

use super::generator::create_column_mesh;
use super::mesh::Mesh;
use crate::config::{DomainDef, PorosityDef};
use crate::error::BuildError;

#[derive(Debug, Clone)]
pub struct Domain {
    pub cell_size: f64,
    pub sediment_length: f64,
    pub dbl_length: f64,
    pub dbl_cells: usize,
    pub sediment_cells: usize,
    pub mesh: Mesh,
    /// Cell-centre depth; 0 at the sediment surface, negative in the DBL.
    pub depths: DVector<f64>,
    pub porosity: DVector<f64>,
    pub sediment_mask: DVector<f64>,
    pub dbl_mask: DVector<f64>,
}

impl Domain {
    pub fn new(def: &DomainDef) -> Result<Self, BuildError> {
        let cell_size = def
            .cell_size
            .to_base_or("mm")
            .map_err(BuildError::unit("domain.cell_size"))?;
        let sediment_length = def
            .sediment_length
            .to_base_or("mm")
            .map_err(BuildError::unit("domain.sediment_length"))?;
        let dbl_length = def
            .dbl_length
            .to_base_or("mm")
            .map_err(BuildError::unit("domain.dbl_length"))?;

        if !(cell_size > 0.0) {
            return Err(BuildError::InvalidDomain(format!(
                "cell_size must be positive, got {cell_size}"
            )));
        }
        if !(sediment_length > 0.0) {
            return Err(BuildError::InvalidDomain(format!(
                "sediment_length must be positive, got {sediment_length}"
            )));
        }
        if dbl_length < 0.0 {
            return Err(BuildError::InvalidDomain(format!(
                "dbl_length must not be negative, got {dbl_length}"
            )));
        }
        if sediment_length / cell_size < 10.0 - 1e-9 {
            return Err(BuildError::InvalidDomain(format!(
                "sediment_length ({sediment_length}) must span at least 10 cells of {cell_size}"
            )));
        }

        let sediment_cells = (sediment_length / cell_size).round() as usize;
        let dbl_cells = (dbl_length / cell_size).round() as usize;
        let n = dbl_cells + sediment_cells;
        let top = -(dbl_cells as f64) * cell_size;
        let mesh = create_column_mesh(n, cell_size, top);

        let depths = DVector::from_iterator(n, mesh.cells.iter().map(|c| c.centroid.x));
        let sediment_mask = DVector::from_fn(n, |i, _| if i >= dbl_cells { 1.0 } else { 0.0 });
        let dbl_mask = sediment_mask.map(|s| 1.0 - s);

        let porosity = porosity_profile(def.porosity, dbl_cells, sediment_cells)?;

        debug!(
            cells = n,
            dbl_cells,
            sediment_cells,
            cell_size,
            "created sediment domain"
        );

        Ok(Self {
            cell_size,
            sediment_length,
            dbl_length,
            dbl_cells,
            sediment_cells,
            mesh,
            depths,
            porosity,
            sediment_mask,
            dbl_mask,
        })
    }

    pub fn num_cells(&self) -> usize {
        self.mesh.num_cells()
    }

    /// Index of the first sediment cell.
    pub fn idx_surface(&self) -> usize {
        self.dbl_cells
    }

    /// Integrate a cell field over the column (per unit area).
    pub fn integrate(&self, values: &DVector<f64>) -> f64 {
        self.mesh
            .cells
            .iter()
            .map(|c| c.volume * values[c.id])
            .sum()
    }
}

fn porosity_profile(
    def: PorosityDef,
    dbl_cells: usize,
    sediment_cells: usize,
) -> Result<DVector<f64>, BuildError> {
    let (top, bottom) = match def {
        PorosityDef::Uniform(p) => (p, p),
        PorosityDef::Linear { top, bottom } => (top, bottom),
    };
    for p in [top, bottom] {
        if !(0.1 < p && p < 0.9) {
            return Err(BuildError::InvalidDomain(format!(
                "sediment porosity must lie in (0.1, 0.9), got {p}"
            )));
        }
    }

    let n = dbl_cells + sediment_cells;
    let span = sediment_cells.saturating_sub(1).max(1) as f64;
    Ok(DVector::from_fn(n, |i, _| {
        if i < dbl_cells {
            1.0
        } else {
            let frac = (i - dbl_cells) as f64 / span;
            top + (bottom - top) * frac
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Quantity;
    use approx::assert_relative_eq;

    fn def(porosity: PorosityDef) -> DomainDef {
        DomainDef {
            cell_size: Quantity::new(0.1, "mm"),
            sediment_length: Quantity::new(2.0, "mm"),
            dbl_length: Quantity::new(0.5, "mm"),
            porosity,
        }
    }

    #[test]
    fn regions_and_depths() {
        let domain = Domain::new(&def(PorosityDef::Uniform(0.4))).unwrap();
        assert_eq!(domain.dbl_cells, 5);
        assert_eq!(domain.sediment_cells, 20);
        assert_eq!(domain.num_cells(), 25);
        assert_eq!(domain.idx_surface(), 5);

        assert_relative_eq!(domain.depths[0], -0.45e-3, epsilon = 1e-15);
        assert_relative_eq!(domain.depths[5], 0.05e-3, epsilon = 1e-15);
        assert_eq!(domain.dbl_mask.sum(), 5.0);
        assert_eq!(domain.sediment_mask.sum(), 20.0);
        assert_eq!(domain.porosity[0], 1.0);
        assert_eq!(domain.porosity[24], 0.4);
        assert_relative_eq!(
            domain.integrate(&domain.sediment_mask),
            2e-3,
            epsilon = 1e-15
        );
    }

    #[test]
    fn linear_porosity_spans_sediment() {
        let domain = Domain::new(&def(PorosityDef::Linear {
            top: 0.8,
            bottom: 0.4,
        }))
        .unwrap();
        assert_relative_eq!(domain.porosity[5], 0.8);
        assert_relative_eq!(domain.porosity[24], 0.4);
    }

    #[test]
    fn rejects_bad_geometry() {
        let mut d = def(PorosityDef::Uniform(0.5));
        d.cell_size = Quantity::new(0.5, "mm");
        assert!(matches!(Domain::new(&d), Err(BuildError::InvalidDomain(_))));

        let d = def(PorosityDef::Uniform(0.95));
        assert!(matches!(Domain::new(&d), Err(BuildError::InvalidDomain(_))));
    }
}
