use std::sync::RwLock;

use nalgebra::Vector3;
use rand::distributions::Uniform;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Material {
    Fluid,
    Rigid,
}

/// Block lattice the fluid particles are (re)laid out in.
pub struct BlockLayout {
    pub counts: [usize; 3],
    pub origin: Vector3<f32>,
    pub spacing: f32,
}

/// Per-particle attribute arrays.
///
/// Fluid particles occupy `[0, n_fluid)`, rigid ones `[n_fluid, len)`.
/// Each array sits behind its own lock so one solver pass can read
/// positions while writing lambdas or deltas; the solver owns the
/// buffers, collaborators only ever see cloned snapshots.
pub struct ParticleStore {
    pub positions: RwLock<Vec<Vector3<f32>>>,
    pub old_positions: RwLock<Vec<Vector3<f32>>>,
    pub velocities: RwLock<Vec<Vector3<f32>>>,
    pub lambdas: RwLock<Vec<f32>>,
    pub position_deltas: RwLock<Vec<Vector3<f32>>>,
    pub neighbours: Vec<Vec<usize>>,

    materials: Vec<Material>,
    rigid_layout: Vec<Vector3<f32>>,
    n_fluid: usize,
}

impl ParticleStore {
    pub fn new(n_fluid: usize, rigid_layout: Vec<Vector3<f32>>) -> ParticleStore {
        let len = n_fluid + rigid_layout.len();

        let mut materials = vec![Material::Fluid; len];
        for material in materials[n_fluid..].iter_mut() {
            *material = Material::Rigid;
        }

        ParticleStore {
            positions: RwLock::new(vec![Vector3::zeros(); len]),
            old_positions: RwLock::new(vec![Vector3::zeros(); len]),
            velocities: RwLock::new(vec![Vector3::zeros(); len]),
            lambdas: RwLock::new(vec![0.0; len]),
            position_deltas: RwLock::new(vec![Vector3::zeros(); len]),
            neighbours: Vec::new(),

            materials,
            rigid_layout,
            n_fluid,
        }
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn n_fluid(&self) -> usize {
        self.n_fluid
    }

    pub fn material(&self, i: usize) -> Material {
        self.materials[i]
    }

    /// Resets every particle to the block lattice without reallocating:
    /// fluid back on the lattice with fresh velocity noise, rigid back on
    /// its voxelized layout.
    pub fn init_particles(&mut self, layout: &BlockLayout, velocity_noise: f32) {
        let [nx, _, nz] = layout.counts;
        let n_fluid = self.n_fluid;

        {
            let rigid_layout = &self.rigid_layout;
            let mut positions = self.positions.write().unwrap();

            positions.par_iter_mut().enumerate().for_each(|(i, p)| {
                *p = if i < n_fluid {
                    let x = i % nx;
                    let z = (i / nx) % nz;
                    let y = i / (nx * nz);

                    layout.origin + Vector3::new(x as f32, y as f32, z as f32) * layout.spacing
                } else {
                    rigid_layout[i - n_fluid]
                };
            });
        }

        {
            let noise = Uniform::new_inclusive(-0.5f32, 0.5f32);
            let mut velocities = self.velocities.write().unwrap();

            velocities.par_iter_mut().enumerate().for_each(|(i, v)| {
                *v = if i < n_fluid && velocity_noise != 0.0 {
                    let mut rng = rand::thread_rng();

                    Vector3::new(rng.sample(noise), rng.sample(noise), rng.sample(noise)) * velocity_noise
                } else {
                    Vector3::zeros()
                };
            });
        }

        self.lambdas.write().unwrap().par_iter_mut().for_each(|l| *l = 0.0);
        self.position_deltas.write().unwrap().par_iter_mut().for_each(|d| *d = Vector3::zeros());

        // keep the snapshot consistent with the fresh layout
        {
            let positions = self.positions.read().unwrap();
            self.old_positions
                .write()
                .unwrap()
                .par_iter_mut()
                .zip(positions.par_iter())
                .for_each(|(old, p)| *old = *p);
        }

        self.neighbours.clear();
    }

    pub fn snapshot_positions(&self) -> Vec<Vector3<f32>> {
        self.positions.read().unwrap().clone()
    }

    pub fn snapshot_colors(&self) -> Vec<Vector3<f32>> {
        self.materials
            .iter()
            .map(|material| match material {
                Material::Fluid => Vector3::new(0.0, 0.0, 1.0),
                Material::Rigid => Vector3::new(0.7, 0.7, 0.7),
            })
            .collect()
    }
}
