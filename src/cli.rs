//! `clap`-derived argument parser implementing the `train`/`dump` command
//! surface.

use clap::{Parser, Subcommand};

use crate::config::{CombineMethod, Config, ConfigBuilder, Loss};
use crate::error::{Result, TrainError};

#[derive(Parser, Debug)]
#[command(name = "uniembed", about = "Multi-signal skip-gram embedding trainer")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Train embeddings from the configured input streams.
    Train(TrainArgs),
    /// Render a trained model's args or a named matrix as text.
    Dump(DumpArgs),
}

#[derive(Parser, Debug)]
pub struct TrainArgs {
    #[arg(long = "input", default_value = "")]
    pub input: String,
    #[arg(long = "itemWordInput", default_value = "")]
    pub item_word_input: String,
    #[arg(long = "userWordInput", default_value = "")]
    pub user_word_input: String,
    #[arg(long = "userHistInput", default_value = "")]
    pub user_hist_input: String,
    #[arg(long = "userHistInputView", default_value = "")]
    pub user_hist_input_view: String,
    #[arg(long = "userHistInputSub", default_value = "")]
    pub user_hist_input_sub: String,
    #[arg(long = "userHistInputSearch", default_value = "")]
    pub user_hist_input_search: String,
    #[arg(long = "output")]
    pub output: String,

    #[arg(long = "lr", default_value_t = 0.05)]
    pub lr: f32,
    #[arg(long = "lrUpdateRate", default_value_t = 100)]
    pub lr_update_rate: u64,
    #[arg(long = "dim", default_value_t = 100)]
    pub dim: usize,
    #[arg(long = "userDim", default_value_t = 100)]
    pub user_dim: usize,
    #[arg(long = "ws", default_value_t = 5)]
    pub ws: usize,
    #[arg(long = "epoch", default_value_t = 5)]
    pub epoch: u64,
    #[arg(long = "minCount", default_value_t = 5)]
    pub min_count: i64,
    #[arg(long = "minCountLabel", default_value_t = 0)]
    pub min_count_label: i64,
    #[arg(long = "neg", default_value_t = 5)]
    pub neg: usize,
    #[arg(long = "wordNgrams", default_value_t = 1)]
    pub word_ngrams: i64,
    #[arg(long = "bucket", default_value_t = 2_000_000)]
    pub bucket: i64,
    #[arg(long = "minn", default_value_t = 3)]
    pub minn: i64,
    #[arg(long = "maxn", default_value_t = 6)]
    pub maxn: i64,
    #[arg(long = "thread", default_value_t = 12)]
    pub thread: usize,
    #[arg(long = "t", default_value_t = 1e-4)]
    pub t: f64,
    #[arg(long = "verbose", default_value_t = 2)]
    pub verbose: i32,

    #[arg(long = "loss", default_value = "ns")]
    pub loss: String,
    #[arg(long = "combineMethod", default_value = "concat")]
    pub combine: String,

    #[arg(long = "saveOutput")]
    pub save_output: bool,
    #[arg(long = "skipContext")]
    pub skip_context: bool,
    #[arg(long = "skipUserContext")]
    pub skip_user_context: bool,
    #[arg(long = "skipTrxData")]
    pub skip_trx_data: bool,
    #[arg(long = "skipViewData")]
    pub skip_view_data: bool,
    #[arg(long = "skipSubData")]
    pub skip_sub_data: bool,
    #[arg(long = "skipSearchData")]
    pub skip_search_data: bool,
    #[arg(long = "regOutput")]
    pub reg_output: bool,
    #[arg(long = "useConcat")]
    pub use_concat: bool,
    #[arg(long = "quasiAtten")]
    pub quasi_atten: bool,
    #[arg(long = "qnorm")]
    pub qnorm: bool,
    #[arg(long = "retrain")]
    pub retrain: bool,
    #[arg(long = "qout")]
    pub qout: bool,
}

impl TrainArgs {
    pub fn into_config(self) -> Result<Config> {
        let loss: Loss = self
            .loss
            .parse()
            .map_err(|_| TrainError::config(format!("unknown loss '{}'", self.loss)))?;
        let combine: CombineMethod = self
            .combine
            .parse()
            .map_err(|_| TrainError::config(format!("unknown combine method '{}'", self.combine)))?;

        let config = ConfigBuilder::default()
            .input(self.input)
            .item_word_input(self.item_word_input)
            .user_word_input(self.user_word_input)
            .user_hist_input(self.user_hist_input)
            .user_hist_input_view(self.user_hist_input_view)
            .user_hist_input_sub(self.user_hist_input_sub)
            .user_hist_input_search(self.user_hist_input_search)
            .output(self.output)
            .lr(self.lr)
            .lr_update_rate(self.lr_update_rate)
            .dim(self.dim)
            .user_dim(self.user_dim)
            .ws(self.ws)
            .epoch(self.epoch)
            .min_count(self.min_count)
            .min_count_label(self.min_count_label)
            .neg(self.neg)
            .word_ngrams(self.word_ngrams)
            .loss(loss)
            .combine(combine)
            .bucket(self.bucket)
            .minn(self.minn)
            .maxn(self.maxn)
            .thread(self.thread)
            .t(self.t)
            .verbose(self.verbose)
            .save_output(self.save_output)
            .skip_context(self.skip_context)
            .skip_user_context(self.skip_user_context)
            .skip_trx_data(self.skip_trx_data)
            .skip_view_data(self.skip_view_data)
            .skip_sub_data(self.skip_sub_data)
            .skip_search_data(self.skip_search_data)
            .reg_output(self.reg_output)
            .use_concat(self.use_concat)
            .quasi_atten(self.quasi_atten)
            .qnorm(self.qnorm)
            .retrain(self.retrain)
            .qout(self.qout)
            .build()
            .map_err(|e| TrainError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Parser, Debug)]
pub struct DumpArgs {
    pub model: String,
    #[arg(value_parser = ["args", "user_input", "item_input", "word_output", "item_output"])]
    pub what: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn train_args_convert_into_a_validated_config() {
        let args = Cli::parse_from([
            "uniembed",
            "train",
            "--itemWordInput",
            "items.txt",
            "--output",
            "model.bin",
            "--dim",
            "16",
        ]);
        match args.command {
            Command::Train(t) => {
                let config = t.into_config().unwrap();
                assert_eq!(config.dim, 16);
                assert_eq!(config.item_word_input, "items.txt");
            }
            Command::Dump(_) => panic!("expected train subcommand"),
        }
    }

    #[test]
    fn unknown_loss_is_a_configuration_error() {
        let args = Cli::parse_from([
            "uniembed",
            "train",
            "--itemWordInput",
            "items.txt",
            "--output",
            "model.bin",
            "--loss",
            "bogus",
        ]);
        match args.command {
            Command::Train(t) => assert!(t.into_config().is_err()),
            Command::Dump(_) => panic!("expected train subcommand"),
        }
    }
}
