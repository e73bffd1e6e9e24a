//! End-to-end training scenarios: toy datasets run through the real
//! file-parsing, scheduling, and persistence path, each with
//! `thread=1, lr=0.1, neg=5, ws=2, dim=4, userDim=4`.

use std::io::Write;
use std::sync::Arc;

use tempfile::NamedTempFile;

use uniembed::config::{CombineMethod, ConfigBuilder};
use uniembed::data_loader;
use uniembed::matrix::DenseMatrix;
use uniembed::params::ParameterStore;
use uniembed::persistence;
use uniembed::scheduler::Scheduler;
use uniembed::tables::SigmoidLogTables;

fn write_file(lines: &[&str]) -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(f, "{line}").unwrap();
    }
    f
}

fn base_config() -> ConfigBuilder {
    ConfigBuilder::default()
        .lr(0.1f32)
        .thread(1usize)
        .epoch(1u64)
        .neg(5usize)
        .ws(2usize)
        .dim(4usize)
        .user_dim(4usize)
        .lr_update_rate(1u64)
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    dot / (na * nb)
}

#[test]
fn scenario_item_word_only() {
    let item_words = write_file(&["0 0 1", "1 1 2"]);
    let subs = write_file(&["0\t0\t0"]);

    let config = base_config()
        .item_word_input(item_words.path().to_str().unwrap())
        .user_hist_input_sub(subs.path().to_str().unwrap())
        // More passes than the scenario's nominal epoch=1 so the (tiny,
        // single-subscription) corpus actually cycles through both
        // item-word pairs instead of stopping after one token-budget flush.
        .epoch(50u64)
        .output("unused")
        .build()
        .unwrap();
    config.validate().unwrap();

    let loaded = data_loader::load(&config, 10_000).unwrap();
    let params = Arc::new(ParameterStore::new(&config, loaded.cardinalities));
    let scheduler = Scheduler::new(
        Arc::clone(&params),
        Arc::new(config),
        Arc::new(loaded.corpus),
        Arc::new(SigmoidLogTables::new()),
        Arc::new(loaded.negative_tables),
    );
    scheduler.run().unwrap();

    assert!(params.all_finite().unwrap());
    let ii0 = params.ii.row(0).unwrap();
    let cos_to_1 = cosine(ii0, params.wo.row(1).unwrap());
    let cos_to_2 = cosine(ii0, params.wo.row(2).unwrap());
    assert!(
        cos_to_1 > cos_to_2,
        "expected II[0] closer to WO[1] than WO[2]: {cos_to_1} vs {cos_to_2}"
    );
}

#[test]
fn scenario_transactions_concat_no_user_context() {
    let basket = write_file(&["0\t1,2,3\t0,1,2"]);
    let item_words = write_file(&["0 0", "1 0", "2 0"]);

    let config = base_config()
        .item_word_input(item_words.path().to_str().unwrap())
        .user_hist_input(basket.path().to_str().unwrap())
        .skip_user_context(true)
        .combine(CombineMethod::Concat)
        .output("unused")
        .build()
        .unwrap();

    let loaded = data_loader::load(&config, 10_000).unwrap();
    assert_eq!(loaded.corpus.trx.len(), 1);

    let params = Arc::new(ParameterStore::new(&config, loaded.cardinalities));
    let scheduler = Scheduler::new(
        Arc::clone(&params),
        Arc::new(config),
        Arc::new(loaded.corpus),
        Arc::new(SigmoidLogTables::new()),
        Arc::new(loaded.negative_tables),
    );
    scheduler.run().unwrap();
    assert!(params.all_finite().unwrap());
}

#[test]
fn scenario_transactions_mean_with_user_context() {
    let basket = write_file(&["0\t1,2,3\t0,1,2"]);
    let item_words = write_file(&["0 0", "1 0", "2 0"]);
    let user_words = write_file(&["0 0"]);

    let config = base_config()
        .item_word_input(item_words.path().to_str().unwrap())
        .user_word_input(user_words.path().to_str().unwrap())
        .user_hist_input(basket.path().to_str().unwrap())
        .combine(CombineMethod::Mean)
        .output("unused")
        .build()
        .unwrap();

    let loaded = data_loader::load(&config, 10_000).unwrap();
    let params = Arc::new(ParameterStore::new(&config, loaded.cardinalities));
    let ui_before = params.ui.l2_norm_row(0).unwrap();
    let ii_before = params.ii.l2_norm_row(0).unwrap();

    let scheduler = Scheduler::new(
        Arc::clone(&params),
        Arc::new(config),
        Arc::new(loaded.corpus),
        Arc::new(SigmoidLogTables::new()),
        Arc::new(loaded.negative_tables),
    );
    scheduler.run().unwrap();

    assert_ne!(params.ui.l2_norm_row(0).unwrap(), ui_before);
    assert_ne!(params.ii.l2_norm_row(0).unwrap(), ii_before);
}

#[test]
fn scenario_mean_sum_leaves_target_item_input_untouched() {
    let basket = write_file(&["0\t1,2,3\t0,1,2"]);
    let item_words = write_file(&["0 0", "1 0", "2 0"]);

    let config = base_config()
        .item_word_input(item_words.path().to_str().unwrap())
        .user_hist_input(basket.path().to_str().unwrap())
        .combine(CombineMethod::MeanSum)
        // Item-word reg for mean/meanSum fires on the target item itself,
        // which would touch II[target] through a different path and mask
        // the assertion below -- skip it to isolate the meanSum kernel's
        // own target-item exemption.
        .skip_context(true)
        .output("unused")
        .build()
        .unwrap();

    let loaded = data_loader::load(&config, 10_000).unwrap();
    let params = Arc::new(ParameterStore::new(&config, loaded.cardinalities));
    let target_before = params.ii.row(2).unwrap().to_vec();
    let io_before = params.io.row(2).unwrap().to_vec();

    let scheduler = Scheduler::new(
        Arc::clone(&params),
        Arc::new(config),
        Arc::new(loaded.corpus),
        Arc::new(SigmoidLogTables::new()),
        Arc::new(loaded.negative_tables),
    );
    scheduler.run().unwrap();

    assert_eq!(params.ii.row(2).unwrap().to_vec(), target_before);
    assert_ne!(params.io.row(2).unwrap().to_vec(), io_before);
}

#[test]
fn scenario_search_only() {
    let item_words = write_file(&["0 5 6"]);
    let search = write_file(&["0\t5\t6"]);

    let config = base_config()
        .item_word_input(item_words.path().to_str().unwrap())
        .user_hist_input_search(search.path().to_str().unwrap())
        .epoch(50u64)
        .output("unused")
        .build()
        .unwrap();

    let loaded = data_loader::load(&config, 10_000).unwrap();
    let params = Arc::new(ParameterStore::new(&config, loaded.cardinalities));
    let scheduler = Scheduler::new(
        Arc::clone(&params),
        Arc::new(config),
        Arc::new(loaded.corpus),
        Arc::new(SigmoidLogTables::new()),
        Arc::new(loaded.negative_tables),
    );
    scheduler.run().unwrap();

    assert!(params.all_finite().unwrap());
    let ii0 = params.ii.row(0).unwrap();
    let cos_to_searched = cosine(ii0, params.wo.row(5).unwrap());
    let cos_to_untouched = cosine(ii0, params.wo.row(0).unwrap());
    assert!(
        cos_to_searched > cos_to_untouched,
        "expected II[0] to align with searched word 5 more than untouched word 0: {cos_to_searched} vs {cos_to_untouched}"
    );
}

#[test]
fn scenario_save_load_round_trip() {
    let basket = write_file(&["0\t1,2,3\t0,1,2"]);
    let item_words = write_file(&["0 0", "1 0", "2 0"]);
    let user_words = write_file(&["0 0"]);

    let config = base_config()
        .item_word_input(item_words.path().to_str().unwrap())
        .user_word_input(user_words.path().to_str().unwrap())
        .user_hist_input(basket.path().to_str().unwrap())
        .combine(CombineMethod::Mean)
        .output("unused")
        .build()
        .unwrap();

    let loaded = data_loader::load(&config, 10_000).unwrap();
    let params = Arc::new(ParameterStore::new(&config, loaded.cardinalities));
    let scheduler = Scheduler::new(
        Arc::clone(&params),
        Arc::new(config.clone()),
        Arc::new(loaded.corpus),
        Arc::new(SigmoidLogTables::new()),
        Arc::new(loaded.negative_tables),
    );
    scheduler.run().unwrap();

    let model_file = NamedTempFile::new().unwrap();
    let model_path = model_file.path().to_str().unwrap();
    persistence::save_model(model_path, &config, &params).unwrap();

    let loaded_model = persistence::load_model(model_path).unwrap();
    assert_eq!(loaded_model.ui.to_vec(), params.ui.to_vec());
    assert_eq!(loaded_model.ii.to_vec(), params.ii.to_vec());
    assert_eq!(loaded_model.io.to_vec(), params.io.to_vec());

    let text_a = persistence::dump_text("user_input", &loaded_model).unwrap();
    let reloaded_again = persistence::load_model(model_path).unwrap();
    let text_b = persistence::dump_text("user_input", &reloaded_again).unwrap();
    assert_eq!(text_a, text_b);

    // Re-serializing the reloaded model is idempotent byte-for-byte.
    let resaved = NamedTempFile::new().unwrap();
    let store_from_loaded = ParameterStore {
        ui: Arc::new(DenseMatrix::from_vec(loaded_model.ui.rows(), loaded_model.ui.cols(), loaded_model.ui.to_vec()).unwrap()),
        ui_v: Arc::clone(&params.ui_v),
        ii: Arc::new(DenseMatrix::from_vec(loaded_model.ii.rows(), loaded_model.ii.cols(), loaded_model.ii.to_vec()).unwrap()),
        io: Arc::new(DenseMatrix::from_vec(loaded_model.io.rows(), loaded_model.io.cols(), loaded_model.io.to_vec()).unwrap()),
        io_v: Arc::clone(&params.io_v),
        wo: Arc::new(DenseMatrix::from_vec(loaded_model.wo.rows(), loaded_model.wo.cols(), loaded_model.wo.to_vec()).unwrap()),
        uwo: Arc::new(DenseMatrix::from_vec(loaded_model.uwo.rows(), loaded_model.uwo.cols(), loaded_model.uwo.to_vec()).unwrap()),
    };
    persistence::save_model(resaved.path().to_str().unwrap(), &loaded_model.config, &store_from_loaded).unwrap();
    assert_eq!(
        std::fs::read(model_path).unwrap(),
        std::fs::read(resaved.path()).unwrap()
    );
}
