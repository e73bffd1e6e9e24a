//! The parameter store: the seven shared embedding matrices, sized from
//! cardinalities derived once from the data, handed out by `Arc` so worker
//! threads share (and race on) the same underlying memory.

use std::sync::Arc;

use crate::config::{CombineMethod, Config};
use crate::error::Result;
use crate::matrix::DenseMatrix;

/// Cardinalities derived once from the loaded data.
#[derive(Clone, Copy, Debug)]
pub struct Cardinalities {
    pub num_users: usize,
    pub num_items: usize,
    pub num_words: usize,
    pub num_user_words: usize,
}

/// Owns the seven embedding matrices. Never resized after `new`; training
/// only ever reads/writes existing rows through the `Arc`-shared matrices.
pub struct ParameterStore {
    pub ui: Arc<DenseMatrix>,
    pub ui_v: Arc<DenseMatrix>,
    pub ii: Arc<DenseMatrix>,
    pub io: Arc<DenseMatrix>,
    pub io_v: Arc<DenseMatrix>,
    pub wo: Arc<DenseMatrix>,
    pub uwo: Arc<DenseMatrix>,
}

const INIT_SEED: u64 = 1;

impl ParameterStore {
    pub fn new(config: &Config, card: Cardinalities) -> Self {
        let io_cols = config.item_output_cols();
        // Distinct seeds per matrix keep initialization deterministic while
        // still giving every matrix an independent draw, matching "uniform
        // fill with a fixed seed" without every matrix starting identical.
        ParameterStore {
            ui: Arc::new(DenseMatrix::uniform(
                card.num_users,
                config.user_dim,
                1.0,
                INIT_SEED,
            )),
            ui_v: Arc::new(DenseMatrix::uniform(
                card.num_users,
                config.user_dim,
                1.0,
                INIT_SEED.wrapping_add(1),
            )),
            ii: Arc::new(DenseMatrix::uniform(
                card.num_items,
                config.dim,
                1.0,
                INIT_SEED.wrapping_add(2),
            )),
            io: Arc::new(DenseMatrix::uniform(
                card.num_items,
                io_cols,
                1.0,
                INIT_SEED.wrapping_add(3),
            )),
            io_v: Arc::new(DenseMatrix::uniform(
                card.num_items,
                io_cols,
                1.0,
                INIT_SEED.wrapping_add(4),
            )),
            wo: Arc::new(DenseMatrix::uniform(
                card.num_words,
                config.dim,
                1.0,
                INIT_SEED.wrapping_add(5),
            )),
            uwo: Arc::new(DenseMatrix::uniform(
                card.num_user_words,
                config.user_dim,
                1.0,
                INIT_SEED.wrapping_add(6),
            )),
        }
    }

    /// Width of the concat hidden vector (`userDim + dim`), used to size the
    /// per-thread `exHidden`/`exGrad` scratch buffers.
    pub fn ex_hidden_width(&self, config: &Config) -> usize {
        match config.combine {
            CombineMethod::Concat => config.user_dim + config.dim,
            CombineMethod::Mean | CombineMethod::MeanSum => config.dim,
        }
    }

    /// All matrices finite -- used by the "no NaN after one epoch" property
    /// test. Never called on the hot path.
    pub fn all_finite(&self) -> Result<bool> {
        for mat in [&self.ui, &self.ui_v, &self.ii, &self.io, &self.io_v, &self.wo, &self.uwo] {
            for v in mat.to_vec() {
                if !v.is_finite() {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}
