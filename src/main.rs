use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use uniembed::cli::{Cli, Command};
use uniembed::data_loader;
use uniembed::params::ParameterStore;
use uniembed::persistence;
use uniembed::scheduler::Scheduler;
use uniembed::tables::SigmoidLogTables;

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Train(args) => run_train(args),
        Command::Dump(args) => run_dump(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run_train(args: uniembed::cli::TrainArgs) -> uniembed::error::Result<()> {
    let config = args.into_config()?;
    let loaded = data_loader::load(&config, uniembed::sampler::DEFAULT_TABLE_SIZE)?;
    log::info!(
        "loaded {} items, {} users, {} words, {} user-words ({} baskets skipped as too short)",
        loaded.cardinalities.num_items,
        loaded.cardinalities.num_users,
        loaded.cardinalities.num_words,
        loaded.cardinalities.num_user_words,
        loaded.baskets_skipped,
    );

    let params = Arc::new(ParameterStore::new(&config, loaded.cardinalities));
    let scheduler = Scheduler::new(
        Arc::clone(&params),
        Arc::new(config.clone()),
        Arc::new(loaded.corpus),
        Arc::new(SigmoidLogTables::new()),
        Arc::new(loaded.negative_tables),
    );

    let stats = scheduler.run()?;
    log::info!(
        "training finished: {} tokens processed, final loss {:.4}, elapsed {:?}",
        stats.tokens_processed,
        stats.final_loss,
        stats.elapsed
    );

    persistence::save_model(&config.output, &config, &params)?;
    if config.save_output {
        persistence::export_vectors(&config.output, &params)?;
    }
    Ok(())
}

fn run_dump(args: uniembed::cli::DumpArgs) -> uniembed::error::Result<()> {
    let model = persistence::load_model(&args.model)?;
    let text = persistence::dump_text(&args.what, &model)?;
    print!("{text}");
    Ok(())
}
