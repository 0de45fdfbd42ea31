use std::fmt;
use std::fs::File;

use nalgebra::Vector3;
use serde::Deserialize;

/// Neighbour queries run slightly past the kernel support so pairs about
/// to enter it are already listed.
pub const NEIGHBOUR_RADIUS_FACTOR: f32 = 1.05;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BlockConfig {
    /// Particles per axis in the initial fluid block.
    pub counts: [usize; 3],
    /// World-space corner the block grows from.
    pub origin: [f32; 3],
    /// Lattice spacing; defaults to `0.8 * kernel_radius`.
    pub spacing: Option<f32>,
}

impl Default for BlockConfig {
    fn default() -> BlockConfig {
        BlockConfig {
            counts: [10, 30, 30],
            origin: [10.0, 1.0, 1.0],
            spacing: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct VorticityConfig {
    pub coefficient: f32,
}

impl Default for VorticityConfig {
    fn default() -> VorticityConfig {
        VorticityConfig { coefficient: 0.01 }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct XsphConfig {
    pub coefficient: f32,
}

impl Default for XsphConfig {
    fn default() -> XsphConfig {
        XsphConfig { coefficient: 0.01 }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct BoardConfig {
    /// Axis whose lower wall the board drives.
    pub axis: usize,
    pub velocity_strength: f32,
}

impl Default for BoardConfig {
    fn default() -> BoardConfig {
        BoardConfig {
            axis: 0,
            velocity_strength: 8.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SceneConfig {
    pub particle_radius: f32,
    pub kernel_radius: f32,
    pub rest_density: f32,
    pub mass: f32,
    pub gravity: [f32; 3],
    pub time_step: f32,
    pub solver_iterations: usize,

    pub domain: [f32; 3],
    pub cell_size: f32,
    pub max_particles_per_cell: usize,
    pub max_neighbours: usize,

    pub lambda_epsilon: f32,
    pub corr_delta_q: f32,
    pub corr_k: f32,

    pub block: BlockConfig,
    pub initial_velocity_noise: f32,

    pub vorticity: Option<VorticityConfig>,
    pub xsph: Option<XsphConfig>,
    pub board: Option<BoardConfig>,

    /// Pre-voxelized rigid positions, merged after the fluid block.
    pub rigid_particles: Vec<[f32; 3]>,
}

impl Default for SceneConfig {
    fn default() -> SceneConfig {
        SceneConfig {
            particle_radius: 0.1,
            kernel_radius: 1.1,
            rest_density: 1.0,
            mass: 1.0,
            gravity: [0.0, -9.8, 0.0],
            time_step: 1.0 / 20.0,
            solver_iterations: 5,

            domain: [50.0, 30.0, 30.0],
            cell_size: 2.5,
            max_particles_per_cell: 100,
            max_neighbours: 100,

            lambda_epsilon: 100.0,
            corr_delta_q: 0.3,
            corr_k: 0.001,

            block: BlockConfig::default(),
            initial_velocity_noise: 4.0,

            vorticity: None,
            xsph: None,
            board: None,

            rigid_particles: Vec::new(),
        }
    }
}

impl SceneConfig {
    pub fn neighbour_radius(&self) -> f32 {
        NEIGHBOUR_RADIUS_FACTOR * self.kernel_radius
    }

    pub fn n_fluid_particles(&self) -> usize {
        self.block.counts[0] * self.block.counts[1] * self.block.counts[2]
    }

    pub fn extents(&self) -> Vector3<f32> {
        Vector3::new(self.domain[0], self.domain[1], self.domain[2])
    }

    pub fn gravity_vector(&self) -> Vector3<f32> {
        Vector3::new(self.gravity[0], self.gravity[1], self.gravity[2])
    }

    pub fn block_spacing(&self) -> f32 {
        self.block.spacing.unwrap_or(0.8 * self.kernel_radius)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_fluid_particles() == 0 {
            return Err(ConfigError::NoParticles);
        }

        let scalars = [
            ("particle_radius", self.particle_radius),
            ("kernel_radius", self.kernel_radius),
            ("rest_density", self.rest_density),
            ("mass", self.mass),
            ("time_step", self.time_step),
            ("cell_size", self.cell_size),
            ("lambda_epsilon", self.lambda_epsilon),
        ];

        for &(name, value) in &scalars {
            if value <= 0.0 {
                return Err(ConfigError::NonPositive(name));
            }
        }

        if self.solver_iterations == 0 {
            return Err(ConfigError::NoIterations);
        }

        if self.corr_delta_q <= 0.0 || self.corr_delta_q >= 1.0 {
            return Err(ConfigError::TensileDeltaQOutOfRange(self.corr_delta_q));
        }

        for axis in 0..3 {
            if self.domain[axis] <= 2.0 * self.particle_radius {
                return Err(ConfigError::DegenerateDomain {
                    axis,
                    extent: self.domain[axis],
                });
            }
        }

        if self.cell_size < self.neighbour_radius() {
            return Err(ConfigError::CellSmallerThanSearchRadius {
                cell_size: self.cell_size,
                neighbour_radius: self.neighbour_radius(),
            });
        }

        if let Some(board) = &self.board {
            if board.axis > 2 {
                return Err(ConfigError::BoardAxisOutOfRange(board.axis));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    NoParticles,
    NoIterations,
    NonPositive(&'static str),
    TensileDeltaQOutOfRange(f32),
    DegenerateDomain { axis: usize, extent: f32 },
    CellSmallerThanSearchRadius { cell_size: f32, neighbour_radius: f32 },
    BoardAxisOutOfRange(usize),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::NoParticles => {
                write!(f, "fluid block holds zero particles")
            }
            ConfigError::NoIterations => {
                write!(f, "solver_iterations must be at least 1")
            }
            ConfigError::NonPositive(name) => {
                write!(f, "{} must be strictly positive", name)
            }
            ConfigError::TensileDeltaQOutOfRange(value) => {
                write!(f, "corr_delta_q must lie in (0, 1), got {}", value)
            }
            ConfigError::DegenerateDomain { axis, extent } => {
                write!(f, "domain extent {} on axis {} leaves no room for a particle", extent, axis)
            }
            ConfigError::CellSmallerThanSearchRadius { cell_size, neighbour_radius } => {
                write!(
                    f,
                    "cell_size {} is below the neighbour radius {}; a 1-ring scan would miss pairs",
                    cell_size, neighbour_radius
                )
            }
            ConfigError::BoardAxisOutOfRange(axis) => {
                write!(f, "board axis {} is not one of 0, 1, 2", axis)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

pub fn load_scene(name: &str) -> Result<SceneConfig, Box<dyn std::error::Error>> {
    let config: SceneConfig = serde_yaml::from_reader(&File::open(name)?)?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SceneConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_particles_fail_fast() {
        let mut config = SceneConfig::default();
        config.block.counts = [10, 0, 10];

        assert_eq!(config.validate(), Err(ConfigError::NoParticles));
    }

    #[test]
    fn non_positive_time_step_is_rejected() {
        let mut config = SceneConfig::default();
        config.time_step = 0.0;

        assert_eq!(config.validate(), Err(ConfigError::NonPositive("time_step")));
    }

    #[test]
    fn degenerate_domain_is_rejected() {
        let mut config = SceneConfig::default();
        config.domain[1] = 0.1;

        assert!(matches!(
            config.validate(),
            Err(ConfigError::DegenerateDomain { axis: 1, .. })
        ));
    }

    #[test]
    fn undersized_cells_are_rejected() {
        let mut config = SceneConfig::default();
        config.cell_size = 1.0;

        assert!(matches!(
            config.validate(),
            Err(ConfigError::CellSmallerThanSearchRadius { .. })
        ));
    }

    #[test]
    fn board_axis_is_checked() {
        let mut config = SceneConfig::default();
        config.board = Some(BoardConfig {
            axis: 3,
            velocity_strength: 1.0,
        });

        assert_eq!(config.validate(), Err(ConfigError::BoardAxisOutOfRange(3)));
    }
}
