use std::sync::RwLock;

use nalgebra::Vector3;
use rand::Rng;
use rayon::prelude::*;
use search::FixedGrid;
use utils::kernels::{Kernel, Poly6Spiky};

use crate::{BlockLayout, Boundary, ConfigError, ParticleStore, SceneConfig};

const EPSILON: f32 = 1e-5;
const CORR_N: i32 = 4;

/// Position-Based Fluids solver.
///
/// One `step()` runs the pipeline of spec'd passes in order: integrate,
/// rebuild the grid, gather neighbours, project the density constraint
/// for a fixed iteration count, finalize velocities, then the optional
/// vorticity-confinement and XSPH passes. Every pass is a rayon sweep
/// over the particle range; the fork-join at the end of each sweep is
/// the barrier the Jacobi scheme needs.
pub struct Simulation {
    kernel: Poly6Spiky,
    mass: f32,
    rest_density: f32,
    gravity: Vector3<f32>,
    time_step: f32,
    solver_iterations: usize,
    lambda_epsilon: f32,
    corr_k: f32,
    scorr_denominator: f32,

    vorticity_coefficient: Option<f32>,
    xsph_coefficient: Option<f32>,

    layout: BlockLayout,
    initial_velocity_noise: f32,

    boundary: Boundary,
    grid: FixedGrid,
    particles: ParticleStore,

    omegas: RwLock<Vec<Vector3<f32>>>,
    velocity_deltas: RwLock<Vec<Vector3<f32>>>,
}

impl Simulation {
    pub fn new(config: SceneConfig) -> Result<Simulation, ConfigError> {
        config.validate()?;

        let kernel = Poly6Spiky::new(config.kernel_radius);
        let scorr_denominator = kernel.apply_on_norm(config.corr_delta_q * config.kernel_radius);

        let extents = config.extents();
        let grid = FixedGrid::new(
            extents,
            config.cell_size,
            config.neighbour_radius(),
            config.max_particles_per_cell,
            config.max_neighbours,
        );

        let rigid_layout = config
            .rigid_particles
            .iter()
            .map(|p| Vector3::new(p[0], p[1], p[2]))
            .collect();

        let particles = ParticleStore::new(config.n_fluid_particles(), rigid_layout);
        let len = particles.len();

        let mut simulation = Simulation {
            mass: config.mass,
            rest_density: config.rest_density,
            gravity: config.gravity_vector(),
            time_step: config.time_step,
            solver_iterations: config.solver_iterations,
            lambda_epsilon: config.lambda_epsilon,
            corr_k: config.corr_k,
            scorr_denominator,

            vorticity_coefficient: config.vorticity.map(|v| v.coefficient),
            xsph_coefficient: config.xsph.map(|x| x.coefficient),

            layout: BlockLayout {
                counts: config.block.counts,
                origin: Vector3::new(config.block.origin[0], config.block.origin[1], config.block.origin[2]),
                spacing: config.block_spacing(),
            },
            initial_velocity_noise: config.initial_velocity_noise,

            boundary: Boundary::new(extents, config.particle_radius, config.board.as_ref()),
            grid,
            particles,

            omegas: RwLock::new(vec![Vector3::zeros(); len]),
            velocity_deltas: RwLock::new(vec![Vector3::zeros(); len]),

            kernel,
        };

        simulation.init_particles();

        Ok(simulation)
    }

    /// Resets all particles to the configured block layout without
    /// reallocating any buffer.
    pub fn init_particles(&mut self) {
        self.particles.init_particles(&self.layout, self.initial_velocity_noise);
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn n_fluid(&self) -> usize {
        self.particles.n_fluid()
    }

    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    pub fn time_step(&self) -> f32 {
        self.time_step
    }

    pub fn snapshot_positions(&self) -> Vec<Vector3<f32>> {
        self.particles.snapshot_positions()
    }

    pub fn snapshot_velocities(&self) -> Vec<Vector3<f32>> {
        self.particles.velocities.read().unwrap().clone()
    }

    pub fn snapshot_colors(&self) -> Vec<Vector3<f32>> {
        self.particles.snapshot_colors()
    }

    /// Runs one full solver cycle; a no-op on an empty particle set.
    pub fn step(&mut self) {
        if self.particles.is_empty() {
            return;
        }

        self.prologue();

        for _ in 0..self.solver_iterations {
            self.constraint_iteration();
        }

        self.epilogue();

        if let Some(coefficient) = self.vorticity_coefficient {
            self.apply_vorticity(coefficient);
        }

        if let Some(coefficient) = self.xsph_coefficient {
            self.apply_xsph(coefficient);
        }

        self.report_saturation();
    }

    /// Adds a random impulse along `axis` (0..3) to every particle.
    pub fn perturb_velocity(&self, axis: usize, magnitude: f32) {
        let mut velocities = self.particles.velocities.write().unwrap();

        velocities.par_iter_mut().for_each(|v| {
            let mut rng = rand::thread_rng();

            v[axis] += (rng.gen::<f32>() - 0.5) * magnitude;
        });
    }

    pub fn move_board(&mut self, direction: f32) {
        let time_step = self.time_step;
        self.boundary.move_board(direction, time_step);
    }

    /// Mean |density constraint| over all particles, from a fresh
    /// neighbour query. Diagnostic only.
    pub fn mean_density_error(&self) -> f32 {
        let positions = self.particles.positions.read().unwrap();

        if positions.is_empty() {
            return 0.0;
        }

        self.grid.build(&positions);
        let neighbours = self.grid.find_all_neighbours(&positions);

        let total: f32 = neighbours
            .par_iter()
            .enumerate()
            .map(|(i, list)| {
                let pos = positions[i];
                let density: f32 = list
                    .iter()
                    .map(|&j| self.kernel.apply_on_norm((pos - positions[j]).norm()))
                    .sum();

                (self.mass * density / self.rest_density - 1.0).abs()
            })
            .sum();

        total / positions.len() as f32
    }

    pub fn neighbours_reduce<V>(&self, i: usize, value: V, f: &dyn Fn(V, usize, usize) -> V) -> V {
        let mut result = value;

        for &j in &self.particles.neighbours[i] {
            result = f(result, i, j);
        }

        result
    }

    pub fn neighbours_reduce_v(&self, i: usize, f: &dyn Fn(Vector3<f32>, usize, usize) -> Vector3<f32>) -> Vector3<f32> {
        self.neighbours_reduce(i, Vector3::zeros(), f)
    }

    pub fn neighbours_reduce_f(&self, i: usize, f: &dyn Fn(f32, usize, usize) -> f32) -> f32 {
        self.neighbours_reduce(i, 0.0, f)
    }

    fn tensile_correction(&self, r_norm: f32) -> f32 {
        let x = self.kernel.apply_on_norm(r_norm) / self.scorr_denominator;

        self.corr_k * x.powi(CORR_N)
    }

    /// Snapshot positions, integrate external forces, clamp, rebuild the
    /// grid from the predicted positions and gather neighbour lists.
    fn prologue(&mut self) {
        let dt = self.time_step;
        let gravity = self.gravity;

        {
            let positions = self.particles.positions.read().unwrap();
            let mut old_positions = self.particles.old_positions.write().unwrap();

            old_positions
                .par_iter_mut()
                .zip(positions.par_iter())
                .for_each(|(old, p)| *old = *p);
        }

        {
            let boundary = &self.boundary;
            let mut positions = self.particles.positions.write().unwrap();
            let mut velocities = self.particles.velocities.write().unwrap();

            positions
                .par_iter_mut()
                .zip(velocities.par_iter_mut())
                .for_each(|(p, v)| {
                    let mut rng = rand::thread_rng();

                    *v += gravity * dt;
                    *p += *v * dt;
                    *p = boundary.clamp(*p, &mut rng);
                });
        }

        let neighbours = {
            let positions = self.particles.positions.read().unwrap();

            self.grid.build(&positions);
            self.grid.find_all_neighbours(&positions)
        };

        self.particles.neighbours = neighbours;
    }

    /// One Jacobi projection of the density constraint: lambdas from a
    /// consistent position snapshot, then deltas, then the apply sweep.
    fn constraint_iteration(&self) {
        {
            let positions = self.particles.positions.read().unwrap();
            let mut lambdas = self.particles.lambdas.write().unwrap();

            lambdas.par_iter_mut().enumerate().for_each(|(i, lambda)| {
                let pos = positions[i];

                let zero: (Vector3<f32>, f32, f32) = (Vector3::zeros(), 0.0, 0.0);
                let (grad_i, neighbour_grad_sqr, density) = self.neighbours_reduce(
                    i,
                    zero,
                    &|(grad, sum, density), _, j| {
                        let pos_ji = pos - positions[j];
                        let grad_j = self.kernel.gradient(&pos_ji);

                        (
                            grad + grad_j,
                            sum + grad_j.norm_squared(),
                            density + self.kernel.apply_on_norm(pos_ji.norm()),
                        )
                    },
                );

                let density_constraint = self.mass * density / self.rest_density - 1.0;
                let sum_gradient_sqr = neighbour_grad_sqr + grad_i.norm_squared();

                // the epsilon keeps zero-neighbour particles finite
                *lambda = -density_constraint / (sum_gradient_sqr + self.lambda_epsilon);
            });
        }

        {
            let positions = self.particles.positions.read().unwrap();
            let lambdas = self.particles.lambdas.read().unwrap();
            let mut deltas = self.particles.position_deltas.write().unwrap();

            deltas.par_iter_mut().enumerate().for_each(|(i, delta)| {
                let pos = positions[i];
                let lambda_i = lambdas[i];

                *delta = self.neighbours_reduce_v(i, &|r, _, j| {
                    let pos_ji = pos - positions[j];
                    let scorr = self.tensile_correction(pos_ji.norm());

                    r + (lambda_i + lambdas[j] + scorr) * self.kernel.gradient(&pos_ji)
                }) / self.rest_density;
            });
        }

        // no clamp here: positions may transiently leave the domain
        {
            let deltas = self.particles.position_deltas.read().unwrap();
            let mut positions = self.particles.positions.write().unwrap();

            positions
                .par_iter_mut()
                .zip(deltas.par_iter())
                .for_each(|(p, delta)| *p += *delta);
        }
    }

    fn epilogue(&self) {
        let dt = self.time_step;

        {
            let boundary = &self.boundary;
            let mut positions = self.particles.positions.write().unwrap();

            positions.par_iter_mut().for_each(|p| {
                let mut rng = rand::thread_rng();

                *p = boundary.clamp(*p, &mut rng);
            });
        }

        {
            let positions = self.particles.positions.read().unwrap();
            let old_positions = self.particles.old_positions.read().unwrap();
            let mut velocities = self.particles.velocities.write().unwrap();

            velocities
                .par_iter_mut()
                .enumerate()
                .for_each(|(i, v)| *v = (positions[i] - old_positions[i]) / dt);
        }
    }

    fn apply_vorticity(&self, coefficient: f32) {
        let dt = self.time_step;

        {
            let positions = self.particles.positions.read().unwrap();
            let velocities = self.particles.velocities.read().unwrap();
            let mut omegas = self.omegas.write().unwrap();

            omegas.par_iter_mut().enumerate().for_each(|(i, omega)| {
                let pos = positions[i];

                *omega = self.neighbours_reduce_v(i, &|r, _, j| {
                    let grad = self.kernel.gradient(&(pos - positions[j]));

                    r + (velocities[j] - velocities[i]).cross(&grad)
                });
            });
        }

        {
            let positions = self.particles.positions.read().unwrap();
            let omegas = self.omegas.read().unwrap();
            let mut velocities = self.particles.velocities.write().unwrap();

            velocities.par_iter_mut().enumerate().for_each(|(i, v)| {
                let omega = omegas[i];

                if omega.norm() < EPSILON {
                    return;
                }

                let pos = positions[i];
                let eta = self.neighbours_reduce_v(i, &|r, _, j| {
                    r + self.kernel.gradient(&(pos - positions[j])) * omegas[j].norm()
                });

                if eta.norm() < EPSILON {
                    return;
                }

                let direction = eta.normalize();

                *v += (coefficient * direction.cross(&omega) / self.mass) * dt;
            });
        }
    }

    fn apply_xsph(&self, coefficient: f32) {
        {
            let positions = self.particles.positions.read().unwrap();
            let velocities = self.particles.velocities.read().unwrap();
            let mut velocity_deltas = self.velocity_deltas.write().unwrap();

            velocity_deltas.par_iter_mut().enumerate().for_each(|(i, delta)| {
                let pos = positions[i];

                *delta = coefficient
                    * self.neighbours_reduce_v(i, &|r, _, j| {
                        let w = self.kernel.apply_on_norm((pos - positions[j]).norm());

                        r + (velocities[j] - velocities[i]) * w
                    });
            });
        }

        {
            let velocity_deltas = self.velocity_deltas.read().unwrap();
            let mut velocities = self.particles.velocities.write().unwrap();

            velocities
                .par_iter_mut()
                .zip(velocity_deltas.par_iter())
                .for_each(|(v, delta)| *v += *delta);
        }
    }

    fn report_saturation(&self) {
        let overflows = self.grid.cell_overflows();
        let truncations = self.grid.neighbour_truncations();

        if overflows > 0 || truncations > 0 {
            log::warn!(
                "grid saturated: {} cell insertions dropped, {} neighbour lists truncated",
                overflows,
                truncations
            );
        }

        log::debug!("step complete: {} particles", self.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SceneConfig;

    fn single_particle_config() -> SceneConfig {
        let mut config = SceneConfig::default();
        config.block.counts = [1, 1, 1];
        config.block.origin = [20.0, 15.0, 15.0];
        config.gravity = [0.0, 0.0, 0.0];
        config.initial_velocity_noise = 0.0;
        config
    }

    #[test]
    fn tensile_correction_peaks_at_contact() {
        let simulation = Simulation::new(single_particle_config()).unwrap();

        let near = simulation.tensile_correction(0.1);
        let at_delta_q = simulation.tensile_correction(0.3 * 1.1);
        let far = simulation.tensile_correction(1.0);

        assert!(near > at_delta_q);
        assert!((at_delta_q - 0.001).abs() < 1e-6); // x == 1 at corr_delta_q * h
        assert!(far < at_delta_q);
    }

    #[test]
    fn lambda_of_lone_particle_is_regularized() {
        let mut simulation = Simulation::new(single_particle_config()).unwrap();
        simulation.step();

        let lambdas = simulation.particles.lambdas.read().unwrap();

        // constraint is -1 with no neighbours; epsilon keeps lambda small
        assert!((lambdas[0] - 1.0 / 100.0).abs() < 1e-6);
    }
}
