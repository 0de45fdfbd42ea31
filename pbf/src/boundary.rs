use nalgebra::Vector3;
use rand::Rng;

use crate::config::BoardConfig;

// jitter off a violated face so clamped particles do not stack on one plane
const JITTER: f32 = 1e-5;

#[derive(Debug, Clone, Copy)]
struct Board {
    axis: usize,
    velocity_strength: f32,
    offset: f32,
}

/// Axis-aligned box `[particle_radius, extent - particle_radius]` per
/// axis, optionally with a movable wall raising one axis's lower bound.
pub struct Boundary {
    extents: Vector3<f32>,
    particle_radius: f32,
    board: Option<Board>,
}

impl Boundary {
    pub fn new(extents: Vector3<f32>, particle_radius: f32, board: Option<&BoardConfig>) -> Boundary {
        Boundary {
            extents,
            particle_radius,
            board: board.map(|config| Board {
                axis: config.axis,
                velocity_strength: config.velocity_strength,
                offset: 0.0,
            }),
        }
    }

    pub fn lower_bound(&self, axis: usize) -> f32 {
        let mut lower = self.particle_radius;

        if let Some(board) = &self.board {
            if board.axis == axis {
                lower += board.offset;
            }
        }

        lower
    }

    pub fn upper_bound(&self, axis: usize) -> f32 {
        self.extents[axis] - self.particle_radius
    }

    pub fn clamp<R: Rng>(&self, mut position: Vector3<f32>, rng: &mut R) -> Vector3<f32> {
        for axis in 0..3 {
            let lower = self.lower_bound(axis);
            let upper = self.upper_bound(axis);

            if position[axis] <= lower {
                position[axis] = lower + JITTER * rng.gen::<f32>();
            } else if position[axis] >= upper {
                position[axis] = upper - JITTER * rng.gen::<f32>();
            }
        }

        position
    }

    /// Advances the board by `direction * dt * velocity_strength`; the
    /// offset stays inside `[0, extent / 3]` of the board axis.
    pub fn move_board(&mut self, direction: f32, time_step: f32) {
        let extents = self.extents;

        if let Some(board) = &mut self.board {
            let limit = extents[board.axis] / 3.0;

            board.offset = (board.offset + direction * time_step * board.velocity_strength)
                .max(0.0)
                .min(limit);
        }
    }

    pub fn board_offset(&self) -> Option<f32> {
        self.board.as_ref().map(|board| board.offset)
    }
}
