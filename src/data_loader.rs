//! Parses the line-based input formats into the in-memory streams and
//! count vectors `ParameterStore`/`Scheduler` need.
//! Plain `std::fs`/`BufRead` parsing, not `csv` -- these tab/comma mixed
//! schemas don't fit a comma-delimited-with-headers model.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Result, TrainError};
use crate::params::Cardinalities;
use crate::sampler::NegativeTable;
use crate::scheduler::{NegativeTables, TrainingCorpus};
use crate::streams::{Basket, SearchRecord, Subscription};

/// Word-association map: `itemId` or `userId` followed by one or more
/// `wordId`s, whitespace-separated, one record per line. Word indices must
/// be dense starting at 0 -- a gap is a fatal configuration error.
fn parse_word_map(path: &str) -> Result<(Vec<Vec<usize>>, usize)> {
    let file = File::open(path)?;
    let mut entries: Vec<(usize, Vec<usize>)> = Vec::new();
    let mut max_id: i64 = -1;

    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let id: usize = fields
            .next()
            .ok_or_else(|| TrainError::shape("word map line missing id column"))?
            .parse()
            .map_err(|_| TrainError::shape("word map id is not an integer"))?;
        let words: Vec<usize> = fields
            .map(|w| {
                w.parse::<usize>()
                    .map_err(|_| TrainError::shape("word map entry is not an integer"))
            })
            .collect::<Result<_>>()?;
        if words.is_empty() {
            return Err(TrainError::shape("word map line has no words"));
        }
        max_id = max_id.max(id as i64);
        entries.push((id, words));
    }

    let count = (max_id + 1).max(0) as usize;
    let mut seen = vec![false; count];
    let mut table = vec![Vec::new(); count];
    for (id, words) in entries {
        seen[id] = true;
        table[id] = words;
    }
    if seen.iter().any(|&s| !s) {
        return Err(TrainError::shape(
            "item/user ids in a word map must be dense starting at 0 -- found a gap",
        ));
    }
    Ok((table, count))
}

/// Parses a tab-separated basket file: user id; comma timestamps; comma item
/// ids. Sorts each basket by timestamp then drops the timestamps. Baskets
/// with fewer than 2 items after sorting are dropped and counted.
fn parse_baskets(path: &str) -> Result<(Vec<Basket>, u64)> {
    let file = File::open(path)?;
    let mut baskets = Vec::new();
    let mut skipped = 0u64;

    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() != 3 {
            return Err(TrainError::shape(format!(
                "basket line must have exactly 3 tab-separated columns, got {}",
                cols.len()
            )));
        }
        let user_id: usize = cols[0]
            .parse()
            .map_err(|_| TrainError::shape("basket user id is not an integer"))?;
        let timestamps: Vec<i64> = cols[1]
            .split(',')
            .map(|t| t.parse::<i64>().map_err(|_| TrainError::shape("basket timestamp is not an integer")))
            .collect::<Result<_>>()?;
        let items: Vec<usize> = cols[2]
            .split(',')
            .map(|i| i.parse::<usize>().map_err(|_| TrainError::shape("basket item id is not an integer")))
            .collect::<Result<_>>()?;
        if timestamps.len() != items.len() {
            return Err(TrainError::shape(
                "basket timestamp count does not match item count",
            ));
        }

        let mut paired: Vec<(i64, usize)> = timestamps.into_iter().zip(items).collect();
        paired.sort_by_key(|(t, _)| *t);
        let items: Vec<usize> = paired.into_iter().map(|(_, i)| i).collect();

        if items.len() <= 2 {
            skipped += 1;
            continue;
        }
        baskets.push(Basket { user_id, items });
    }
    Ok((baskets, skipped))
}

fn parse_subscriptions(path: &str) -> Result<Vec<Subscription>> {
    let file = File::open(path)?;
    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() != 3 {
            return Err(TrainError::shape("subscription line must have 3 tab-separated columns"));
        }
        let item_id = cols[0].parse().map_err(|_| TrainError::shape("subscription item id is not an integer"))?;
        let user_id = cols[1].parse().map_err(|_| TrainError::shape("subscription user id is not an integer"))?;
        let sub_id = cols[2].parse().map_err(|_| TrainError::shape("subscription sub id is not an integer"))?;
        out.push(Subscription { item_id, user_id, sub_id });
    }
    Ok(out)
}

fn parse_search(path: &str) -> Result<Vec<SearchRecord>> {
    let file = File::open(path)?;
    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut cols = line.split('\t');
        let item_id: usize = cols
            .next()
            .ok_or_else(|| TrainError::shape("search line missing item id"))?
            .parse()
            .map_err(|_| TrainError::shape("search item id is not an integer"))?;
        let words: Vec<usize> = cols
            .map(|w| w.parse::<usize>().map_err(|_| TrainError::shape("search word id is not an integer")))
            .collect::<Result<_>>()?;
        if words.is_empty() {
            return Err(TrainError::shape("search line has no words"));
        }
        out.push(SearchRecord { item_id, words });
    }
    Ok(out)
}

fn laplace_counts(len: usize, hits: impl Iterator<Item = usize>) -> Vec<i64> {
    let mut counts = vec![1i64; len];
    for idx in hits {
        if idx < counts.len() {
            counts[idx] += 1;
        }
    }
    counts
}

/// Everything the scheduler needs, fully preloaded: cardinalities, the
/// observation corpus, and the per-task negative-sampling tables.
pub struct LoadedData {
    pub cardinalities: Cardinalities,
    pub corpus: TrainingCorpus,
    pub negative_tables: NegativeTables,
    pub baskets_skipped: u64,
}

/// Loads every source named in `config`, respecting the `skip*` gates.
/// `itemWordInput` is the only mandatory path (mirrors `Config::validate`).
pub fn load(config: &Config, negative_table_size: usize) -> Result<LoadedData> {
    if !Path::new(&config.item_word_input).exists() {
        return Err(TrainError::config(format!(
            "itemWordInput path does not exist: {}",
            config.item_word_input
        )));
    }
    let (item_words, num_items) = parse_word_map(&config.item_word_input)?;

    let (user_words, num_user_words_from_map) = if config.user_word_input.is_empty() {
        (Vec::new(), 0)
    } else {
        parse_word_map(&config.user_word_input)?
    };

    let mut baskets_skipped = 0u64;
    let trx = if config.skip_trx_data || config.user_hist_input.is_empty() {
        Vec::new()
    } else {
        let (b, skipped) = parse_baskets(&config.user_hist_input)?;
        baskets_skipped += skipped;
        b
    };
    let view = if config.skip_view_data || config.user_hist_input_view.is_empty() {
        Vec::new()
    } else {
        let (b, skipped) = parse_baskets(&config.user_hist_input_view)?;
        baskets_skipped += skipped;
        b
    };
    let subs = if config.skip_sub_data || config.user_hist_input_sub.is_empty() {
        Vec::new()
    } else {
        parse_subscriptions(&config.user_hist_input_sub)?
    };
    let searches = if config.skip_search_data || config.user_hist_input_search.is_empty() {
        Vec::new()
    } else {
        parse_search(&config.user_hist_input_search)?
    };

    let num_words = item_words
        .iter()
        .chain(searches.iter().map(|s| &s.words))
        .flatten()
        .copied()
        .max()
        .map(|m| m + 1)
        .unwrap_or(0)
        .max(num_items.min(1)); // keep WO non-empty when there is at least one item

    let max_user_from_baskets = trx
        .iter()
        .chain(view.iter())
        .map(|b| b.user_id)
        .chain(subs.iter().map(|s| s.user_id))
        .max();
    let num_users = max_user_from_baskets
        .map(|m| m + 1)
        .unwrap_or(num_user_words_from_map)
        .max(num_user_words_from_map);
    let num_user_words = num_user_words_from_map.max(num_users);

    let item_count = laplace_counts(num_items, trx.iter().flat_map(|b| b.items.iter().copied()));
    let item_view_count = laplace_counts(num_items, view.iter().flat_map(|b| b.items.iter().copied()));
    let item_sub_count = laplace_counts(num_items, subs.iter().map(|s| s.sub_id));
    let word_count = laplace_counts(
        num_words,
        item_words.iter().flatten().copied().chain(searches.iter().flat_map(|s| s.words.iter().copied())),
    );
    let user_word_count = laplace_counts(num_user_words, user_words.iter().flatten().copied());

    let expect_token = if !trx.is_empty() {
        trx.len() as u64
    } else if !view.is_empty() {
        view.len() as u64
    } else if !subs.is_empty() {
        subs.len() as u64
    } else if !searches.is_empty() {
        searches.len() as u64
    } else {
        1
    };

    let negative_tables = NegativeTables {
        word: Arc::new(NegativeTable::build(&word_count, negative_table_size, 101)),
        user_word: Arc::new(NegativeTable::build(&user_word_count, negative_table_size, 102)),
        item: Arc::new(NegativeTable::build(&item_count, negative_table_size, 103)),
        item_view: Arc::new(NegativeTable::build(&item_view_count, negative_table_size, 104)),
        item_sub: Arc::new(NegativeTable::build(&item_sub_count, negative_table_size, 105)),
    };

    Ok(LoadedData {
        cardinalities: Cardinalities {
            num_users: num_users.max(1),
            num_items: num_items.max(1),
            num_words: num_words.max(1),
            num_user_words: num_user_words.max(1),
        },
        corpus: TrainingCorpus {
            item_words,
            user_words,
            trx,
            view,
            subs,
            searches,
            expect_token,
        },
        negative_tables,
        baskets_skipped,
    })
}
