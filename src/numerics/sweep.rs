//! Built-in backend: finite-volume discretization of each equation and a
//! dense LU solve, swept Gauss-Seidel style across the coupled equations.

use nalgebra::{DMatrix, DVector};
use tracing::trace;

use super::solver::{CoupledSystem, SolverBackend, SolverError, StepOutcome, SweepControl};
use super::timing::{Stage, timed};
use crate::discretization::domain::Domain;
use crate::discretization::mesh::Boundary;
use crate::model::equation::CoupledEquation;
use crate::model::fields::FieldSet;

#[derive(Debug, Clone, Copy, Default)]
pub struct SweepSolver;

/// Discretize `eq` over a step of length `dt`.
///
/// `previous` holds the values at the start of the step, `current` the
/// latest iterate that coefficients and linearizations are evaluated at.
pub fn assemble(
    eq: &CoupledEquation,
    domain: &Domain,
    previous: &FieldSet,
    current: &FieldSet,
    dt: f64,
) -> (DMatrix<f64>, DVector<f64>) {
    let mesh = &domain.mesh;
    let n = mesh.num_cells();
    let mut a = DMatrix::<f64>::zeros(n, n);
    let mut b = DVector::<f64>::zeros(n);
    let old = previous.get(eq.variable);

    for cell in &mesh.cells {
        let i = cell.id;
        let storage = eq.transient_coeff * cell.volume / dt;
        a[(i, i)] += storage;
        b[i] += storage * old[i];

        for source in &eq.sources {
            let (s0, s1) = source.linearize(current, i, eq.variable);
            a[(i, i)] -= s1 * cell.volume;
            b[i] += s0 * cell.volume;
        }
    }

    let diffusivity = eq.diffusivity(current);
    for face in &mesh.faces {
        let (k, l) = face.neighbor_cell_ids;
        let distance = mesh.face_distance(face);
        match (l, face.boundary) {
            (Some(l), _) => {
                if let Some(d) = &diffusivity {
                    let coeff = 0.5 * (d[k] + d[l]) * face.area / distance;
                    a[(k, k)] += coeff;
                    a[(l, l)] += coeff;
                    a[(k, l)] -= coeff;
                    a[(l, k)] -= coeff;
                }
            }
            (None, Some(which)) => {
                let (value, flux) = match which {
                    Boundary::Top => (eq.constraints.top, eq.constraints.top_flux),
                    Boundary::Bottom => (eq.constraints.bottom, eq.constraints.bottom_flux),
                };
                if let Some(q) = flux {
                    b[k] += q * face.area;
                } else if let (Some(g), Some(d)) = (value, &diffusivity) {
                    let coeff = d[k] * face.area / distance;
                    a[(k, k)] += coeff;
                    b[k] += coeff * g;
                }
            }
            // Closed face: no flux.
            (None, None) => {}
        }
    }

    for i in 0..n {
        if let Some(fixed) = eq.constraints.region_value(domain, i) {
            a.row_mut(i).fill(0.0);
            a[(i, i)] = 1.0;
            b[i] = fixed;
        }
    }

    (a, b)
}

impl SolverBackend for SweepSolver {
    fn solve_step(
        &self,
        system: &CoupledSystem<'_>,
        fields: &FieldSet,
        dt: f64,
        control: &SweepControl,
    ) -> Result<StepOutcome, SolverError> {
        let mut current = fields.clone();
        let mut residual = f64::INFINITY;
        let mut worst_equation = None;

        for sweep in 1..=control.max_sweeps {
            residual = 0.0;
            worst_equation = None;
            for eq in system.equations {
                let (a, b) =
                    timed(Stage::Assembly, || assemble(eq, system.domain, fields, &current, dt));
                let r = control
                    .convergence
                    .residual(&a, current.get(eq.variable), &b);
                if r > residual || worst_equation.is_none() {
                    residual = r;
                    worst_equation = Some(eq.name.clone());
                }

                let mut x = timed(Stage::LinearSolve, || {
                    a.lu()
                        .solve(&b)
                        .ok_or_else(|| SolverError::LinearSolveFailed(eq.name.clone()))
                })?;
                if x.iter().any(|v| !v.is_finite()) {
                    return Err(SolverError::NonFinite(eq.name.clone()));
                }
                eq.clip(&mut x);
                current.set(eq.variable, x);
            }
            trace!(sweep, residual, "sweep");

            if control.convergence.check(residual) {
                return Ok(StepOutcome {
                    fields: current,
                    sweeps: sweep,
                    residual,
                    converged: true,
                    worst_equation,
                });
            }
        }

        Ok(StepOutcome {
            fields: current,
            sweeps: control.max_sweeps,
            residual,
            converged: false,
            worst_equation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelDefinition;
    use crate::model::Model;
    use crate::numerics::Convergence;
    use approx::assert_relative_eq;

    fn model(extra: &str) -> Model {
        let text = format!(
            r#"
domain:
  cell_size: 0.1 mm
  sediment_length: 1 mm
  dbl_length: 0 mm
environment:
  c:
    cls: Variable
    value: 1
    has_previous_value: true
{extra}
equations:
  cEqn:
    transient: [env.c, 1]
    sources: [[env.decay, 1]]
"#
        );
        Model::build(&ModelDefinition::from_yaml(&text).unwrap()).unwrap()
    }

    fn control() -> SweepControl {
        SweepControl {
            max_sweeps: 10,
            convergence: Convergence::new(1e-10),
        }
    }

    #[test]
    fn implicit_linear_decay_matches_backward_euler() {
        let m = model(
            r#"  decay:
    cls: Process
    formula: -k * c
    params:
      k: 0.5
"#,
        );
        let system = CoupledSystem {
            equations: &m.equations,
            domain: &m.domain,
        };
        let out = SweepSolver.solve_step(&system, &m.fields, 0.1, &control()).unwrap();
        assert!(out.converged);
        let c = out.fields.by_path("env.c").unwrap();
        for v in c.iter() {
            assert_relative_eq!(*v, 1.0 / 1.05, epsilon = 1e-12);
        }
    }

    #[test]
    fn explicit_sources_are_held_at_the_iterate() {
        let m = model(
            r#"  decay:
    cls: Process
    formula: -k * abs(c)
    params:
      k: 0.5
"#,
        );
        let system = CoupledSystem {
            equations: &m.equations,
            domain: &m.domain,
        };
        // One sweep: the source is frozen at the initial value.
        let one = SweepControl {
            max_sweeps: 1,
            convergence: Convergence::new(1e-10),
        };
        let out = SweepSolver.solve_step(&system, &m.fields, 0.1, &one).unwrap();
        assert!(!out.converged);
        let c = out.fields.by_path("env.c").unwrap();
        assert_relative_eq!(c[0], 0.95, epsilon = 1e-12);
    }

    #[test]
    fn diffusion_conserves_mass_between_closed_ends() {
        let mut m = model(
            r#"  decay:
    cls: Process
    formula: 0 * c
  D:
    cls: Process
    formula: 1e-9 + 0 * depths
"#,
        );
        m.equations[0].diffusion = Some(crate::model::equation::DiffusionTerm {
            path: "env.D".into(),
            coeff: 1.0,
            term: m.process("env.D").unwrap().term.as_deref().unwrap().clone(),
        });
        let c = m.fields.id_of("env.c").unwrap();
        let n = m.domain.num_cells();
        m.fields
            .set(c, DVector::from_fn(n, |i, _| if i < n / 2 { 2.0 } else { 0.0 }));
        let before = m.domain.integrate(m.fields.get(c));

        let system = CoupledSystem {
            equations: &m.equations,
            domain: &m.domain,
        };
        let out = SweepSolver.solve_step(&system, &m.fields, 10.0, &control()).unwrap();
        let after = m.domain.integrate(out.fields.get(c));
        assert_relative_eq!(before, after, max_relative = 1e-10);
        assert!(out.fields.get(c)[n - 1] > 0.0);
    }

    #[test]
    fn boundary_fluxes_feed_a_closed_column() {
        let mut m = model(
            r#"  decay:
    cls: Process
    formula: 0 * c
  D:
    cls: Process
    formula: 1e-9 + 0 * depths
"#,
        );
        m.equations[0].diffusion = Some(crate::model::equation::DiffusionTerm {
            path: "env.D".into(),
            coeff: 1.0,
            term: m.process("env.D").unwrap().term.as_deref().unwrap().clone(),
        });
        m.equations[0].constraints.top_flux = Some(2e-6);
        m.equations[0].constraints.bottom_flux = Some(-5e-7);
        let c = m.fields.id_of("env.c").unwrap();
        let before = m.domain.integrate(m.fields.get(c));

        let system = CoupledSystem {
            equations: &m.equations,
            domain: &m.domain,
        };
        let dt = 30.0;
        let first = SweepSolver.solve_step(&system, &m.fields, dt, &control()).unwrap();
        let second = SweepSolver.solve_step(&system, &first.fields, dt, &control()).unwrap();
        assert!(first.converged && second.converged);

        let after = m.domain.integrate(second.fields.get(c));
        assert_relative_eq!(after - before, 2.0 * (2e-6 - 5e-7) * dt, max_relative = 1e-8);
        // Mass enters at the top.
        let values = second.fields.get(c);
        assert!(values[0] > values[values.len() - 1]);

        let eq = &m.equations[0];
        let d = eq.diffusivity(&second.fields);
        assert_eq!(eq.boundary_flux(Boundary::Top, &second.fields, d.as_ref(), &m.domain), 2e-6);
        assert_eq!(eq.boundary_flux(Boundary::Bottom, &second.fields, d.as_ref(), &m.domain), -5e-7);
    }
}
