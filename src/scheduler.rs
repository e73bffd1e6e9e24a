//! The fixed worker-pool scheduler: one `rayon::scope` holding `config.thread`
//! training workers plus one progress-reporting supervisor, all driven off a
//! single atomic token counter. Workers never synchronize with each other --
//! only with the counter (for termination/LR decay) and the cancellation
//! flag (for orderly shutdown on a fatal error).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::config::{CombineMethod, Config};
use crate::error::{Result, TrainError};
use crate::kernels::{reg_word_model, windowed_basket, SkipGram, UserItemModel};
use crate::params::ParameterStore;
use crate::sampler::{NegativeSampler, NegativeTable};
use crate::streams::{Basket, Cursor, SearchRecord, Subscription};
use crate::tables::SigmoidLogTables;

/// The fully preloaded, in-memory corpus a training run walks. `expect_token`
/// is the epoch-sizing token count, taken from whichever of
/// trx/view/sub/search is the highest-priority active stream.
///
/// `item_words`/`user_words` are dense lookup tables (indexed directly by
/// item/user id), not independent streams -- item-word and user-word
/// regularization fire inline off the item(s)/user touched by a
/// transaction/view/subscription observation, per SPEC_FULL.md's reg-firing
/// table, and have no standalone round-robin of their own.
#[derive(Default)]
pub struct TrainingCorpus {
    pub item_words: Vec<Vec<usize>>,
    pub user_words: Vec<Vec<usize>>,
    pub trx: Vec<Basket>,
    pub view: Vec<Basket>,
    pub subs: Vec<Subscription>,
    pub searches: Vec<SearchRecord>,
    pub expect_token: u64,
}

impl TrainingCorpus {
    fn is_empty(&self) -> bool {
        self.trx.is_empty() && self.view.is_empty() && self.subs.is_empty() && self.searches.is_empty()
    }
}

/// One frequency-weighted negative table per task, built from that task's
/// own count vector (item-word/search share `word`; transactions and views
/// get their own item-frequency tables; subscriptions sample over items
/// too, via their own count vector).
pub struct NegativeTables {
    pub word: Arc<NegativeTable>,
    pub user_word: Arc<NegativeTable>,
    pub item: Arc<NegativeTable>,
    pub item_view: Arc<NegativeTable>,
    pub item_sub: Arc<NegativeTable>,
}

pub struct TrainingStats {
    pub tokens_processed: u64,
    pub final_loss: f32,
    pub elapsed: Duration,
}

pub struct Scheduler {
    params: Arc<ParameterStore>,
    config: Arc<Config>,
    corpus: Arc<TrainingCorpus>,
    tables: Arc<SigmoidLogTables>,
    neg_tables: Arc<NegativeTables>,
}

impl Scheduler {
    pub fn new(
        params: Arc<ParameterStore>,
        config: Arc<Config>,
        corpus: Arc<TrainingCorpus>,
        tables: Arc<SigmoidLogTables>,
        neg_tables: Arc<NegativeTables>,
    ) -> Self {
        Scheduler {
            params,
            config,
            corpus,
            tables,
            neg_tables,
        }
    }

    pub fn run(&self) -> Result<TrainingStats> {
        if self.corpus.is_empty() {
            return Err(TrainError::config("no active training streams"));
        }
        let threads = self.config.thread.max(1);
        let target = self.config.epoch * self.corpus.expect_token.max(1);

        let token_count = AtomicU64::new(0);
        let cancelled = AtomicBool::new(false);
        let failure: Mutex<Option<TrainError>> = Mutex::new(None);
        let thread_results: Mutex<Vec<(u64, f64)>> = Mutex::new(Vec::with_capacity(threads));
        let start = Instant::now();

        rayon::scope(|s| {
            for thread_id in 0..threads {
                let token_count = &token_count;
                let cancelled = &cancelled;
                let failure = &failure;
                let thread_results = &thread_results;
                s.spawn(move |_| {
                    match self.run_thread(thread_id, threads, token_count, target, cancelled) {
                        Ok(result) => thread_results.lock().unwrap().push(result),
                        Err(e) => {
                            cancelled.store(true, Ordering::SeqCst);
                            let mut slot = failure.lock().unwrap();
                            if slot.is_none() {
                                *slot = Some(e);
                            }
                        }
                    }
                });
            }

            if self.config.verbose > 0 {
                let token_count = &token_count;
                let cancelled = &cancelled;
                s.spawn(move |_| {
                    loop {
                        std::thread::sleep(Duration::from_millis(100));
                        let tc = token_count.load(Ordering::Relaxed);
                        let done = cancelled.load(Ordering::Relaxed) || tc >= target;
                        let progress = (tc as f64 / target.max(1) as f64).min(1.0);
                        let elapsed = start.elapsed().as_secs_f64().max(1e-9);
                        let words_per_sec_per_thread = tc as f64 / elapsed / threads as f64;
                        let lr = self.config.lr as f64 * (1.0 - progress);
                        let eta = if progress > 0.0 {
                            Duration::from_secs_f64((elapsed / progress) * (1.0 - progress))
                        } else {
                            Duration::from_secs(0)
                        };
                        log::info!(
                            target: "uniembed::progress",
                            "progress: {:>5.1}%  words/sec/thread: {:>8.0}  lr: {:.6}  eta: {:?}",
                            progress * 100.0,
                            words_per_sec_per_thread,
                            lr,
                            eta
                        );
                        if done {
                            break;
                        }
                    }
                });
            }
        });

        if let Some(e) = failure.lock().unwrap().take() {
            return Err(e);
        }
        let results = thread_results.lock().unwrap();
        let tokens_processed: u64 = results.iter().map(|(t, _)| *t).sum();
        let loss_sum: f64 = results.iter().map(|(_, l)| *l).sum();
        let final_loss = if tokens_processed > 0 {
            (loss_sum / tokens_processed as f64) as f32
        } else {
            0.0
        };
        Ok(TrainingStats {
            tokens_processed,
            final_loss,
            elapsed: start.elapsed(),
        })
    }

    fn run_thread(
        &self,
        thread_id: usize,
        threads: usize,
        token_count: &AtomicU64,
        target: u64,
        cancelled: &AtomicBool,
    ) -> Result<(u64, f64)> {
        let mut rng = SmallRng::seed_from_u64((thread_id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let mut local_tokens: u64 = 0;
        let mut total_tokens: u64 = 0;
        let mut loss_sum: f64 = 0.0;
        let mut lr = self.config.lr;

        let mut trx_cursor = (!self.corpus.trx.is_empty())
            .then(|| Cursor::new(thread_id, threads, self.corpus.trx.len()));
        let mut view_cursor = (!self.corpus.view.is_empty())
            .then(|| Cursor::new(thread_id, threads, self.corpus.view.len()));
        let mut sub_cursor = (!self.corpus.subs.is_empty())
            .then(|| Cursor::new(thread_id, threads, self.corpus.subs.len()));
        let mut search_cursor = (!self.corpus.searches.is_empty())
            .then(|| Cursor::new(thread_id, threads, self.corpus.searches.len()));

        // item-word/user-word reg have no cursor of their own: they fire
        // inline off the item(s)/user touched by whichever of trx/view/sub
        // is active, so the model is only built when there is an observation
        // stream around to drive it.
        let needs_item_word_reg = !self.corpus.item_words.is_empty()
            && (trx_cursor.is_some() || view_cursor.is_some() || sub_cursor.is_some());
        let needs_user_word_reg =
            !self.corpus.user_words.is_empty() && (trx_cursor.is_some() || view_cursor.is_some());

        let mut item_word_model = needs_item_word_reg
            .then(|| self.make_word_model(&self.params.ii, &self.params.wo, &self.neg_tables.word, thread_id));
        let mut user_word_model = needs_user_word_reg.then(|| {
            self.make_word_model(&self.params.ui, &self.params.uwo, &self.neg_tables.user_word, thread_id)
        });
        let mut search_model = search_cursor
            .is_some()
            .then(|| self.make_word_model(&self.params.ii, &self.params.wo, &self.neg_tables.word, thread_id));
        let mut sub_model = sub_cursor
            .is_some()
            .then(|| self.make_word_model(&self.params.ii, &self.params.ii, &self.neg_tables.item_sub, thread_id));
        let mut trx_model = trx_cursor.is_some().then(|| {
            self.make_user_item_model(&self.params.ui, &self.params.io, &self.neg_tables.item, thread_id)
        });
        let mut view_model = view_cursor.is_some().then(|| {
            self.make_user_item_model(&self.params.ui_v, &self.params.io_v, &self.neg_tables.item_view, thread_id)
        });

        loop {
            if cancelled.load(Ordering::Relaxed) {
                break;
            }
            let mut step_tokens = 0u64;

            if let Some(cur) = trx_cursor.as_mut() {
                let basket = &self.corpus.trx[cur.next()];
                let windows = windowed_basket(basket, self.config.ws, self.config.shuffle_trx_data, &mut rng)?;
                let model = trx_model.as_mut().expect("trx model built alongside cursor");
                for w in &windows {
                    loss_sum += model.update(w, lr)? as f64;
                    step_tokens += 1;
                    step_tokens +=
                        self.fire_context_reg(w, item_word_model.as_mut(), user_word_model.as_mut(), &mut loss_sum, lr)?;
                }
            }
            if let Some(cur) = view_cursor.as_mut() {
                let basket = &self.corpus.view[cur.next()];
                let windows = windowed_basket(basket, self.config.ws, self.config.shuffle_view_data, &mut rng)?;
                let model = view_model.as_mut().expect("view model built alongside cursor");
                for w in &windows {
                    loss_sum += model.update(w, lr)? as f64;
                    step_tokens += 1;
                    step_tokens +=
                        self.fire_context_reg(w, item_word_model.as_mut(), user_word_model.as_mut(), &mut loss_sum, lr)?;
                }
            }
            if let Some(cur) = sub_cursor.as_mut() {
                let s = self.corpus.subs[cur.next()];
                let model = sub_model.as_mut().expect("sub model built alongside cursor");
                loss_sum += model.update(&[s.item_id], &[s.sub_id], 0, lr)? as f64;
                step_tokens += 1;
                if !self.config.skip_context {
                    if let Some(iw) = item_word_model.as_mut() {
                        step_tokens += self.fire_item_word(iw, s.item_id, &mut loss_sum, lr)?;
                    }
                }
            }
            if let Some(cur) = search_cursor.as_mut() {
                let r = &self.corpus.searches[cur.next()];
                let model = search_model.as_mut().expect("search model built alongside cursor");
                loss_sum += reg_word_model(model, r.item_id, &r.words, lr)? as f64;
                step_tokens += r.words.len().max(1) as u64;
            }

            if step_tokens == 0 {
                break;
            }
            total_tokens += step_tokens;
            local_tokens += step_tokens;

            if local_tokens >= self.config.lr_update_rate {
                let tc = token_count.fetch_add(local_tokens, Ordering::Relaxed) + local_tokens;
                local_tokens = 0;
                let progress = (tc as f64 / target.max(1) as f64).min(1.0);
                lr = (self.config.lr as f64 * (1.0 - progress)).max(0.0) as f32;
                if tc >= target {
                    break;
                }
            }
        }
        if local_tokens > 0 {
            token_count.fetch_add(local_tokens, Ordering::Relaxed);
        }
        Ok((total_tokens, loss_sum))
    }

    /// Fires item-word reg (gated on `skipContext`) and user-word reg (gated
    /// on `skipUserContext`) for one windowed `[target, user, ctx...]`
    /// sub-record, per SPEC_FULL.md's reg-firing table: concat regularizes
    /// every context item unless `regOutput`, in which case only the target;
    /// mean/meanSum always regularize the target item only. Returns the
    /// token count the firing consumed, for the scheduler's budget counter.
    fn fire_context_reg(
        &self,
        hist: &[usize],
        item_word_model: Option<&mut SkipGram>,
        user_word_model: Option<&mut SkipGram>,
        loss_sum: &mut f64,
        lr: f32,
    ) -> Result<u64> {
        let mut tokens = 0u64;
        if !self.config.skip_context {
            if let Some(model) = item_word_model {
                if self.config.combine == CombineMethod::Concat && !self.config.reg_output {
                    for &item in &hist[2..] {
                        tokens += self.fire_item_word(model, item, loss_sum, lr)?;
                    }
                } else {
                    tokens += self.fire_item_word(model, hist[UserItemModel::ITEM_POS], loss_sum, lr)?;
                }
            }
        }
        if !self.config.skip_user_context {
            if let Some(model) = user_word_model {
                let user = hist[UserItemModel::USER_POS];
                let words = self
                    .corpus
                    .user_words
                    .get(user)
                    .ok_or_else(|| TrainError::shape("basket user id out of range for the user-word map"))?;
                *loss_sum += reg_word_model(model, user, words, lr)? as f64;
                tokens += words.len() as u64;
            }
        }
        Ok(tokens)
    }

    fn fire_item_word(&self, model: &mut SkipGram, item: usize, loss_sum: &mut f64, lr: f32) -> Result<u64> {
        let words = self
            .corpus
            .item_words
            .get(item)
            .ok_or_else(|| TrainError::shape("item id out of range for the item-word map"))?;
        *loss_sum += reg_word_model(model, item, words, lr)? as f64;
        Ok(words.len() as u64)
    }

    fn make_word_model(
        &self,
        input: &Arc<crate::matrix::DenseMatrix>,
        target: &Arc<crate::matrix::DenseMatrix>,
        table: &Arc<NegativeTable>,
        thread_id: usize,
    ) -> SkipGram {
        let sampler = NegativeSampler::new(Arc::clone(table), thread_id);
        SkipGram::new(
            Arc::clone(input),
            Arc::clone(target),
            Arc::clone(&self.tables),
            self.config.loss,
            self.config.neg,
            Some(sampler),
            None,
        )
    }

    fn make_user_item_model(
        &self,
        user_input: &Arc<crate::matrix::DenseMatrix>,
        item_output: &Arc<crate::matrix::DenseMatrix>,
        table: &Arc<NegativeTable>,
        thread_id: usize,
    ) -> UserItemModel {
        let sampler = NegativeSampler::new(Arc::clone(table), thread_id);
        UserItemModel::new(
            Arc::clone(&self.params.ii),
            Arc::clone(user_input),
            Arc::clone(item_output),
            Arc::clone(&self.tables),
            sampler,
            self.config.neg,
            self.config.combine,
            self.config.skip_user_context,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::params::Cardinalities;

    fn tiny_config() -> Config {
        ConfigBuilder::default()
            .item_word_input("x")
            .output("y")
            .dim(4usize)
            .user_dim(4usize)
            .thread(2usize)
            .epoch(2u64)
            .lr_update_rate(4u64)
            .neg(2usize)
            .build()
            .unwrap()
    }

    fn tiny_negative_tables() -> NegativeTables {
        NegativeTables {
            word: Arc::new(NegativeTable::build(&[1, 1, 1], 1000, 1)),
            user_word: Arc::new(NegativeTable::build(&[1, 1], 1000, 2)),
            item: Arc::new(NegativeTable::build(&[1, 1, 1, 1], 1000, 3)),
            item_view: Arc::new(NegativeTable::build(&[1, 1, 1, 1], 1000, 4)),
            item_sub: Arc::new(NegativeTable::build(&[1, 1, 1, 1], 1000, 5)),
        }
    }

    #[test]
    fn scheduler_runs_to_completion_and_keeps_parameters_finite() {
        let config = Arc::new(tiny_config());
        let card = Cardinalities {
            num_users: 2,
            num_items: 4,
            num_words: 3,
            num_user_words: 2,
        };
        let params = Arc::new(ParameterStore::new(&config, card));
        let corpus = Arc::new(TrainingCorpus {
            item_words: vec![vec![0, 1], vec![1, 2], vec![0], vec![1]],
            trx: vec![Basket {
                user_id: 0,
                items: vec![0, 1, 2, 3],
            }],
            expect_token: 8,
            ..Default::default()
        });
        let scheduler = Scheduler::new(
            params.clone(),
            config,
            corpus,
            Arc::new(SigmoidLogTables::new()),
            Arc::new(tiny_negative_tables()),
        );
        let stats = scheduler.run().unwrap();
        assert!(stats.tokens_processed > 0);
        assert!(params.all_finite().unwrap());
    }

    #[test]
    fn empty_corpus_is_a_configuration_error() {
        let config = Arc::new(tiny_config());
        let card = Cardinalities {
            num_users: 1,
            num_items: 1,
            num_words: 1,
            num_user_words: 1,
        };
        let params = Arc::new(ParameterStore::new(&config, card));
        let scheduler = Scheduler::new(
            params,
            config,
            Arc::new(TrainingCorpus::default()),
            Arc::new(SigmoidLogTables::new()),
            Arc::new(tiny_negative_tables()),
        );
        assert!(scheduler.run().is_err());
    }
}
