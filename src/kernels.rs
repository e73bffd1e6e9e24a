//! Per-observation loss and gradient application for every objective: the
//! plain skip-gram kernel (used for item-word/user-word/search/subscription
//! regularization and primary tasks alike), the concat/mean/meanSum
//! user-item kernels, and the windowed basket expansion that feeds them.

use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;

use crate::config::{CombineMethod, Loss};
use crate::matrix::{mean_rows, DenseMatrix};
use crate::sampler::{NegativeSampler, NegativeTable};
use crate::streams::Basket;
use crate::tables::SigmoidLogTables;
use crate::error::{Result, TrainError};

/// Given an ordered basket `[i0, i1, ..., i_{n-1}]` belonging to `user_id`,
/// optionally shuffles the item order then emits, for each k in [1, n-1], a
/// sub-record `[target=i_k, user, i_{max(0,k-ws)}, ..., i_{k-1}]`.
///
/// The returned records always have length > 2 (one target, one user, at
/// least one context item), as required by the concat/mean/meanSum kernels.
pub fn windowed_basket(
    basket: &Basket,
    ws: usize,
    shuffle: bool,
    rng: &mut SmallRng,
) -> Result<Vec<Vec<usize>>> {
    let mut items = basket.items.clone();
    if items.len() < 2 {
        return Err(TrainError::shape("basket must have at least two items to window"));
    }
    if shuffle {
        items.shuffle(rng);
    }

    let mut out = Vec::with_capacity(items.len() - 1);
    for k in 1..items.len() {
        let lo = k.saturating_sub(ws);
        let mut record = Vec::with_capacity(2 + (k - lo));
        record.push(items[k]);
        record.push(basket.user_id);
        record.extend_from_slice(&items[lo..k]);
        out.push(record);
    }
    Ok(out)
}

struct HuffmanNode {
    parent: i64,
    left: i64,
    right: i64,
    count: i64,
    binary: bool,
}

/// Huffman tree over a target count vector, built once per sampler that
/// uses hierarchical softmax.
pub struct HuffmanTree {
    paths: Vec<Vec<usize>>,
    codes: Vec<Vec<bool>>,
}

impl HuffmanTree {
    pub fn build(counts: &[i64]) -> Self {
        let osz = counts.len();
        let mut tree: Vec<HuffmanNode> = (0..2 * osz - 1)
            .map(|_| HuffmanNode {
                parent: -1,
                left: -1,
                right: -1,
                count: i64::MAX / 2,
                binary: false,
            })
            .collect();
        for (i, &c) in counts.iter().enumerate() {
            tree[i].count = c;
        }

        let mut leaf = osz as i64 - 1;
        let mut node = osz as i64;
        for i in osz..2 * osz - 1 {
            let mut mini = [0i64; 2];
            for slot in mini.iter_mut() {
                if leaf >= 0 && tree[leaf as usize].count < tree[node as usize].count {
                    *slot = leaf;
                    leaf -= 1;
                } else {
                    *slot = node;
                    node += 1;
                }
            }
            tree[i].left = mini[0];
            tree[i].right = mini[1];
            tree[i].count = tree[mini[0] as usize].count + tree[mini[1] as usize].count;
            tree[mini[0] as usize].parent = i as i64;
            tree[mini[1] as usize].parent = i as i64;
            tree[mini[1] as usize].binary = true;
        }

        let mut paths = Vec::with_capacity(osz);
        let mut codes = Vec::with_capacity(osz);
        for i in 0..osz {
            let mut path = Vec::new();
            let mut code = Vec::new();
            let mut j = i as i64;
            while tree[j as usize].parent != -1 {
                path.push((tree[j as usize].parent - osz as i64) as usize);
                code.push(tree[j as usize].binary);
                j = tree[j as usize].parent;
            }
            paths.push(path);
            codes.push(code);
        }

        HuffmanTree { paths, codes }
    }
}

/// The plain skip-gram kernel: `hidden = mean(input rows)`, one loss head
/// against `target`, then `input[i] += grad` for every input row (no
/// `1/|input|` rescaling -- see DESIGN.md's documented asymmetry).
pub struct SkipGram {
    input: Arc<DenseMatrix>,
    target: Arc<DenseMatrix>,
    tables: Arc<SigmoidLogTables>,
    loss: Loss,
    neg: usize,
    sampler: Option<NegativeSampler>,
    huffman: Option<Arc<HuffmanTree>>,
    hidden: Vec<f32>,
    grad: Vec<f32>,
    output: Vec<f32>,
}

impl SkipGram {
    pub fn new(
        input: Arc<DenseMatrix>,
        target: Arc<DenseMatrix>,
        tables: Arc<SigmoidLogTables>,
        loss: Loss,
        neg: usize,
        sampler: Option<NegativeSampler>,
        huffman: Option<Arc<HuffmanTree>>,
    ) -> Self {
        let hsz = input.cols();
        let osz = target.rows();
        SkipGram {
            input,
            target,
            tables,
            loss,
            neg,
            sampler,
            huffman,
            hidden: vec![0.0; hsz],
            grad: vec![0.0; hsz],
            output: vec![0.0; osz],
        }
    }

    pub fn negative_table(counts: &[i64], table_size: usize, seed: u64) -> NegativeTable {
        NegativeTable::build(counts, table_size, seed)
    }

    fn binary_logistic(&mut self, target_idx: usize, label: bool, lr: f32) -> Result<f32> {
        let raw = self.target.dot_row(&self.hidden, target_idx)?;
        let score = self.tables.sigmoid(raw);
        let label_f = if label { 1.0 } else { 0.0 };
        let alpha = lr * (label_f - score);
        {
            let row = self.target.row(target_idx)?;
            for (g, r) in self.grad.iter_mut().zip(row.iter()) {
                *g += alpha * r;
            }
        }
        self.target.add_row(&self.hidden, target_idx, alpha)?;
        if label {
            Ok(-self.tables.log(score))
        } else {
            Ok(-self.tables.log(1.0 - score))
        }
    }

    fn negative_sampling(&mut self, target: usize, lr: f32) -> Result<f32> {
        let mut loss = 0.0;
        self.grad.iter_mut().for_each(|g| *g = 0.0);
        for n in 0..=self.neg {
            let (t, label) = if n == 0 {
                (target, true)
            } else {
                let next = self
                    .sampler
                    .as_mut()
                    .ok_or_else(|| TrainError::config("negative sampling requires a sampler"))?
                    .next(target);
                (next, false)
            };
            loss += self.binary_logistic(t, label, lr)?;
        }
        Ok(loss)
    }

    fn hierarchical_softmax(&mut self, target: usize, lr: f32) -> Result<f32> {
        let huffman = self
            .huffman
            .clone()
            .ok_or_else(|| TrainError::config("hierarchical softmax requires a Huffman tree"))?;
        let mut loss = 0.0;
        self.grad.iter_mut().for_each(|g| *g = 0.0);
        let path = &huffman.paths[target];
        let code = &huffman.codes[target];
        for (node, bit) in path.iter().zip(code.iter()) {
            loss += self.binary_logistic(*node, *bit, lr)?;
        }
        Ok(loss)
    }

    fn compute_output_softmax(&mut self) -> Result<()> {
        let osz = self.output.len();
        for i in 0..osz {
            self.output[i] = self.target.dot_row(&self.hidden, i)?;
        }
        let max = self.output.iter().cloned().fold(f32::MIN, f32::max);
        let mut z = 0.0f32;
        for v in self.output.iter_mut() {
            *v = (*v - max).exp();
            z += *v;
        }
        for v in self.output.iter_mut() {
            *v /= z;
        }
        Ok(())
    }

    fn softmax(&mut self, target: usize, lr: f32) -> Result<f32> {
        self.grad.iter_mut().for_each(|g| *g = 0.0);
        self.compute_output_softmax()?;
        let osz = self.output.len();
        for i in 0..osz {
            let label = if i == target { 1.0 } else { 0.0 };
            let alpha = lr * (label - self.output[i]);
            {
                let row = self.target.row(i)?;
                for (g, r) in self.grad.iter_mut().zip(row.iter()) {
                    *g += alpha * r;
                }
            }
            self.target.add_row(&self.hidden, i, alpha)?;
        }
        Ok(-self.tables.log(self.output[target]))
    }

    /// One-vs-all: binary logistic against every output row. Faithfully
    /// preserves the upstream quirk of NOT zeroing `grad` first, so its
    /// contribution to `input` rows includes whatever was left over from
    /// the previous call -- see DESIGN.md.
    fn one_vs_all(&mut self, targets: &[usize], lr: f32) -> Result<f32> {
        let osz = self.output.len();
        let mut loss = 0.0;
        for i in 0..osz {
            let is_match = targets.contains(&i);
            loss += self.binary_logistic(i, is_match, lr)?;
        }
        Ok(loss)
    }

    fn compute_loss(&mut self, targets: &[usize], ti: usize, lr: f32) -> Result<f32> {
        match self.loss {
            Loss::Ns => self.negative_sampling(targets[ti], lr),
            Loss::Hs => self.hierarchical_softmax(targets[ti], lr),
            Loss::Softmax => self.softmax(targets[ti], lr),
            Loss::Ova => self.one_vs_all(targets, lr),
        }
    }

    /// `update(input, targets, ti, lr)`: the shared skip-gram step used by
    /// item-word/user-word/search regularization, the search primary
    /// kernel, and the subscription primary kernel.
    pub fn update(&mut self, input: &[usize], targets: &[usize], ti: usize, lr: f32) -> Result<f32> {
        if input.is_empty() {
            return Ok(0.0);
        }
        mean_rows(&self.input, input, &mut self.hidden)?;
        let loss = self.compute_loss(targets, ti, lr)?;
        for &i in input {
            self.input.add_row(&self.grad, i, 1.0)?;
        }
        Ok(loss)
    }
}

/// `regWordModel`: shapes `item`'s embedding by its descriptive word
/// context, one skip-gram step per word.
pub fn reg_word_model(model: &mut SkipGram, item: usize, words: &[usize], lr: f32) -> Result<f32> {
    let input = [item];
    let mut loss = 0.0;
    for i in 0..words.len() {
        loss += model.update(&input, words, i, lr)?;
    }
    Ok(loss)
}

/// The concat/mean/meanSum user-item kernel (component D's primary
/// transaction/view head). Parameterized over which `item_input`/
/// `user_input`/`item_output` triple it uses, so the same code drives both
/// the transaction head (`II`, `UI`, `IO`) and the view head (`II`, `UIv`,
/// `IOv`).
pub struct UserItemModel {
    item_input: Arc<DenseMatrix>,
    user_input: Arc<DenseMatrix>,
    item_output: Arc<DenseMatrix>,
    tables: Arc<SigmoidLogTables>,
    sampler: NegativeSampler,
    neg: usize,
    combine: CombineMethod,
    skip_user_context: bool,
    hidden: Vec<f32>,
    ex_hidden: Vec<f32>,
    grad: Vec<f32>,
    ex_grad: Vec<f32>,
    grad_user: Vec<f32>,
}

impl UserItemModel {
    pub fn new(
        item_input: Arc<DenseMatrix>,
        user_input: Arc<DenseMatrix>,
        item_output: Arc<DenseMatrix>,
        tables: Arc<SigmoidLogTables>,
        sampler: NegativeSampler,
        neg: usize,
        combine: CombineMethod,
        skip_user_context: bool,
    ) -> Self {
        let dim = item_input.cols();
        let user_dim = user_input.cols();
        let ex_width = user_dim + dim;
        UserItemModel {
            item_input,
            user_input,
            item_output,
            tables,
            sampler,
            neg,
            combine,
            skip_user_context,
            hidden: vec![0.0; dim],
            ex_hidden: vec![0.0; ex_width],
            grad: vec![0.0; dim],
            ex_grad: vec![0.0; ex_width],
            grad_user: vec![0.0; dim],
        }
    }

    pub(crate) const USER_POS: usize = 1;
    pub(crate) const ITEM_POS: usize = 0;

    fn compute_concat(&mut self, hist: &[usize]) -> Result<()> {
        let user_dim = self.user_input.cols();
        for v in self.ex_hidden.iter_mut() {
            *v = 0.0;
        }
        if !self.skip_user_context {
            let row = self.user_input.row(hist[Self::USER_POS])?;
            self.ex_hidden[..user_dim].copy_from_slice(row);
        }
        for (pos, &idx) in hist.iter().enumerate() {
            if pos == Self::USER_POS || pos == Self::ITEM_POS {
                continue;
            }
            let row = self.item_input.row(idx)?;
            for (slot, r) in self.ex_hidden[user_dim..].iter_mut().zip(row.iter()) {
                *slot += r;
            }
        }
        let inv = 1.0 / (hist.len() - 2) as f32;
        for v in self.ex_hidden[user_dim..].iter_mut() {
            *v *= inv;
        }
        Ok(())
    }

    fn compute_mean(&mut self, hist: &[usize], item_only: bool) -> Result<()> {
        for v in self.hidden.iter_mut() {
            *v = 0.0;
        }
        if !item_only {
            let row = self.user_input.row(hist[Self::USER_POS])?;
            for (h, r) in self.hidden.iter_mut().zip(row.iter()) {
                *h += r;
            }
        }
        for (pos, &idx) in hist.iter().enumerate() {
            if pos == Self::USER_POS || pos == Self::ITEM_POS {
                continue;
            }
            let row = self.item_input.row(idx)?;
            for (h, r) in self.hidden.iter_mut().zip(row.iter()) {
                *h += r;
            }
        }
        let denom = hist.len() as isize - 1 - if item_only { 1 } else { 0 };
        if denom <= 0 {
            return Err(TrainError::shape("history too short to average"));
        }
        let inv = 1.0 / denom as f32;
        for v in self.hidden.iter_mut() {
            *v *= inv;
        }
        Ok(())
    }

    fn binary_logistic_concat(&mut self, target: usize, label: bool, lr: f32) -> Result<f32> {
        let raw = self.item_output.dot_row(&self.ex_hidden, target)?;
        let score = self.tables.sigmoid(raw);
        let label_f = if label { 1.0 } else { 0.0 };
        let alpha = lr * (label_f - score);
        {
            let row = self.item_output.row(target)?;
            for (g, r) in self.ex_grad.iter_mut().zip(row.iter()) {
                *g += alpha * r;
            }
        }
        self.item_output.add_row(&self.ex_hidden, target, alpha)?;
        Ok(if label {
            -self.tables.log(score)
        } else {
            -self.tables.log(1.0 - score)
        })
    }

    fn binary_logistic_mean(&mut self, target: usize, label: bool, lr: f32) -> Result<f32> {
        let raw = self.item_output.dot_row(&self.hidden, target)?;
        let score = self.tables.sigmoid(raw);
        let label_f = if label { 1.0 } else { 0.0 };
        let alpha = lr * (label_f - score);
        {
            let row = self.item_output.row(target)?;
            for (g, r) in self.grad.iter_mut().zip(row.iter()) {
                *g += alpha * r;
            }
        }
        self.item_output.add_row(&self.hidden, target, alpha)?;
        Ok(if label {
            -self.tables.log(score)
        } else {
            -self.tables.log(1.0 - score)
        })
    }

    fn binary_logistic_mean_sum(
        &mut self,
        target: usize,
        user_idx: usize,
        label: bool,
        lr: f32,
    ) -> Result<f32> {
        let user_item_score = DenseMatrix::mat_select_dot(&self.item_input, &self.user_input, target, user_idx)?;
        let item_in_out_score = self.item_output.dot_row(&self.hidden, target)?;
        let score = self.tables.sigmoid(user_item_score + item_in_out_score);
        let label_f = if label { 1.0 } else { 0.0 };
        let alpha = lr * (label_f - score);
        {
            let row = self.item_output.row(target)?;
            for (g, r) in self.grad.iter_mut().zip(row.iter()) {
                *g += alpha * r;
            }
        }
        {
            let row = self.item_input.row(target)?;
            for (g, r) in self.grad_user.iter_mut().zip(row.iter()) {
                *g += alpha * r;
            }
        }
        // Only IO is updated here; II[target] is deliberately left alone.
        self.item_output.add_row(&self.hidden, target, alpha)?;
        Ok(if label {
            -self.tables.log(score)
        } else {
            -self.tables.log(1.0 - score)
        })
    }

    pub fn update_concat(&mut self, hist: &[usize], lr: f32) -> Result<f32> {
        if hist.len() <= 2 {
            return Err(TrainError::shape("concat update requires history length > 2"));
        }
        self.compute_concat(hist)?;
        let item_output_idx = hist[Self::ITEM_POS];
        self.ex_grad.iter_mut().for_each(|g| *g = 0.0);
        let mut loss = 0.0;
        for n in 0..=self.neg {
            let (t, label) = if n == 0 {
                (item_output_idx, true)
            } else {
                (self.sampler.next(item_output_idx), false)
            };
            loss += self.binary_logistic_concat(t, label, lr)?;
        }

        let user_dim = self.user_input.cols();
        if !self.skip_user_context {
            self.user_input
                .add_row(&self.ex_grad[..user_dim], hist[Self::USER_POS], 1.0)?;
        }
        let inv = 1.0 / (hist.len() - 2) as f32;
        for v in self.ex_grad[user_dim..].iter_mut() {
            *v *= inv;
        }
        for (pos, &idx) in hist.iter().enumerate() {
            if pos == Self::USER_POS || pos == Self::ITEM_POS {
                continue;
            }
            self.item_input.add_row(&self.ex_grad[user_dim..], idx, 1.0)?;
        }
        Ok(loss)
    }

    pub fn update_mean(&mut self, hist: &[usize], lr: f32) -> Result<f32> {
        if hist.len() <= 2 {
            return Err(TrainError::shape("mean update requires history length > 2"));
        }
        self.compute_mean(hist, false)?;
        let item_output_idx = hist[Self::ITEM_POS];
        self.grad.iter_mut().for_each(|g| *g = 0.0);
        let mut loss = 0.0;
        for n in 0..=self.neg {
            let (t, label) = if n == 0 {
                (item_output_idx, true)
            } else {
                (self.sampler.next(item_output_idx), false)
            };
            loss += self.binary_logistic_mean(t, label, lr)?;
        }
        let inv = 1.0 / (hist.len() - 1) as f32;
        for v in self.grad.iter_mut() {
            *v *= inv;
        }
        self.user_input.add_row(&self.grad, hist[Self::USER_POS], 1.0)?;
        for (pos, &idx) in hist.iter().enumerate() {
            if pos == Self::USER_POS || pos == Self::ITEM_POS {
                continue;
            }
            self.item_input.add_row(&self.grad, idx, 1.0)?;
        }
        Ok(loss)
    }

    pub fn update_mean_sum(&mut self, hist: &[usize], lr: f32) -> Result<f32> {
        if hist.len() <= 2 {
            return Err(TrainError::shape("meanSum update requires history length > 2"));
        }
        self.compute_mean(hist, true)?;
        let item_output_idx = hist[Self::ITEM_POS];
        let user_idx = hist[Self::USER_POS];
        self.grad.iter_mut().for_each(|g| *g = 0.0);
        self.grad_user.iter_mut().for_each(|g| *g = 0.0);
        let mut loss = 0.0;
        for n in 0..=self.neg {
            let (t, label) = if n == 0 {
                (item_output_idx, true)
            } else {
                (self.sampler.next(item_output_idx), false)
            };
            loss += self.binary_logistic_mean_sum(t, user_idx, label, lr)?;
        }
        let inv = 1.0 / (hist.len() - 2) as f32;
        for v in self.grad.iter_mut() {
            *v *= inv;
        }
        for (pos, &idx) in hist.iter().enumerate() {
            if pos == Self::USER_POS || pos == Self::ITEM_POS {
                continue;
            }
            self.item_input.add_row(&self.grad, idx, 1.0)?;
        }
        self.user_input.add_row(&self.grad_user, user_idx, 1.0)?;
        Ok(loss)
    }

    pub fn update(&mut self, hist: &[usize], lr: f32) -> Result<f32> {
        match self.combine {
            CombineMethod::Concat => self.update_concat(hist, lr),
            CombineMethod::Mean => self.update_mean(hist, lr),
            CombineMethod::MeanSum => self.update_mean_sum(hist, lr),
        }
    }

    pub fn item_output(&self) -> &Arc<DenseMatrix> {
        &self.item_output
    }
}
