//! The flat configuration record the training engine relies on, plus the
//! handful of enums it dispatches on. A `derive_builder`-generated builder
//! with every field defaulted so tests can specify only what they care about.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Loss {
    Hs,
    Ns,
    Softmax,
    Ova,
}

impl std::str::FromStr for Loss {
    type Err = TrainError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hs" => Ok(Loss::Hs),
            "ns" => Ok(Loss::Ns),
            "softmax" => Ok(Loss::Softmax),
            "ova" => Ok(Loss::Ova),
            other => Err(TrainError::config(format!("unknown loss '{other}'"))),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CombineMethod {
    Concat,
    Mean,
    MeanSum,
}

impl std::str::FromStr for CombineMethod {
    type Err = TrainError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "concat" => Ok(CombineMethod::Concat),
            "mean" => Ok(CombineMethod::Mean),
            "meanSum" => Ok(CombineMethod::MeanSum),
            other => Err(TrainError::config(format!("unknown combine method '{other}'"))),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ModelType {
    Cbow,
    Sg,
    Sup,
}

/// The whole training configuration. A handful of fields are accepted for
/// CLI compatibility but have no effect on the training loop -- see
/// DESIGN.md's "Open Question decisions" section for the exact list.
#[derive(Clone, Debug, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
pub struct Config {
    #[builder(default = "String::new()")]
    pub input: String,
    #[builder(default = "String::new()")]
    pub item_word_input: String,
    #[builder(default = "String::new()")]
    pub user_word_input: String,
    #[builder(default = "String::new()")]
    pub user_hist_input: String,
    #[builder(default = "String::new()")]
    pub user_hist_input_view: String,
    #[builder(default = "String::new()")]
    pub user_hist_input_sub: String,
    #[builder(default = "String::new()")]
    pub user_hist_input_search: String,
    #[builder(default = "String::new()")]
    pub output: String,

    #[builder(default = "0.05")]
    pub lr: f32,
    #[builder(default = "100")]
    pub lr_update_rate: u64,
    #[builder(default = "100")]
    pub dim: usize,
    #[builder(default = "100")]
    pub user_dim: usize,
    #[builder(default = "5")]
    pub ws: usize,
    #[builder(default = "5")]
    pub epoch: u64,
    #[builder(default = "5")]
    pub min_count: i64,
    #[builder(default = "0")]
    pub min_count_label: i64,
    #[builder(default = "5")]
    pub neg: usize,
    #[builder(default = "1")]
    pub word_ngrams: i64,
    #[builder(default = "Loss::Ns")]
    pub loss: Loss,
    #[builder(default = "ModelType::Sg")]
    pub model: ModelType,
    #[builder(default = "CombineMethod::Concat")]
    pub combine: CombineMethod,
    #[builder(default = "2_000_000")]
    pub bucket: i64,
    #[builder(default = "3")]
    pub minn: i64,
    #[builder(default = "6")]
    pub maxn: i64,
    #[builder(default = "12")]
    pub thread: usize,
    #[builder(default = "1e-4")]
    pub t: f64,
    #[builder(default = "2")]
    pub verbose: i32,
    #[builder(default = "String::new()")]
    pub pretrained_vectors: String,

    #[builder(default = "false")]
    pub save_output: bool,
    #[builder(default = "false")]
    pub skip_context: bool,
    #[builder(default = "false")]
    pub skip_user_context: bool,
    #[builder(default = "false")]
    pub skip_trx_data: bool,
    #[builder(default = "false")]
    pub skip_view_data: bool,
    #[builder(default = "false")]
    pub skip_sub_data: bool,
    #[builder(default = "false")]
    pub skip_search_data: bool,

    #[builder(default = "true")]
    pub shuffle_trx_data: bool,
    #[builder(default = "true")]
    pub shuffle_view_data: bool,

    #[builder(default = "false")]
    pub reg_output: bool,
    #[builder(default = "false")]
    pub use_concat: bool,
    #[builder(default = "false")]
    pub quasi_atten: bool,
    #[builder(default = "false")]
    pub qout: bool,
    #[builder(default = "false")]
    pub retrain: bool,
    #[builder(default = "false")]
    pub qnorm: bool,
    #[builder(default = "0")]
    pub cutoff: usize,
    #[builder(default = "2")]
    pub dsub: usize,
}

impl Default for Config {
    fn default() -> Self {
        ConfigBuilder::default().build().expect("all fields have defaults")
    }
}

impl Config {
    /// The §7.1 "Configuration" error-kind checks: mandatory paths, the
    /// userDim/combine compatibility rule, and "not all streams skipped".
    pub fn validate(&self) -> Result<()> {
        if self.item_word_input.is_empty() {
            return Err(TrainError::config("itemWordInput is required"));
        }
        if self.output.is_empty() {
            return Err(TrainError::config("output is required"));
        }
        if self.combine != CombineMethod::Concat && self.user_dim != self.dim {
            return Err(TrainError::config(
                "userDim must equal dim unless combine == concat",
            ));
        }
        if self.skip_trx_data && self.skip_view_data && self.skip_sub_data && self.skip_search_data
        {
            return Err(TrainError::config(
                "at least one of trx/view/sub/search data must not be skipped",
            ));
        }
        Ok(())
    }

    /// Column width of `IO`/`IOv`: `dim + userDim` under concat, `dim` otherwise.
    pub fn item_output_cols(&self) -> usize {
        match self.combine {
            CombineMethod::Concat => self.dim + self.user_dim,
            CombineMethod::Mean | CombineMethod::MeanSum => self.dim,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.dim, 100);
        assert_eq!(c.ws, 5);
        assert_eq!(c.epoch, 5);
        assert_eq!(c.neg, 5);
        assert_eq!(c.thread, 12);
        assert_eq!(c.combine, CombineMethod::Concat);
        assert_eq!(c.loss, Loss::Ns);
        assert!(c.shuffle_trx_data);
        assert!(c.shuffle_view_data);
    }

    #[test]
    fn validate_rejects_missing_paths() {
        let c = Config::default();
        assert!(c.validate().is_err());
    }

    #[test]
    fn validate_rejects_all_streams_skipped() {
        let c = ConfigBuilder::default()
            .item_word_input("a.txt")
            .output("out")
            .skip_trx_data(true)
            .skip_view_data(true)
            .skip_sub_data(true)
            .skip_search_data(true)
            .build()
            .unwrap();
        assert!(c.validate().is_err());
    }

    #[test]
    fn validate_rejects_mean_with_mismatched_dims() {
        let c = ConfigBuilder::default()
            .item_word_input("a.txt")
            .output("out")
            .combine(CombineMethod::Mean)
            .dim(10usize)
            .user_dim(20usize)
            .build()
            .unwrap();
        assert!(c.validate().is_err());
    }

    #[test]
    fn item_output_cols_follows_combine_method() {
        let mut c = Config::default();
        c.dim = 8;
        c.user_dim = 4;
        c.combine = CombineMethod::Concat;
        assert_eq!(c.item_output_cols(), 12);
        c.combine = CombineMethod::Mean;
        assert_eq!(c.item_output_cols(), 8);
    }
}
