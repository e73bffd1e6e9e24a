//! Binary model save/load, `.npy` vector export, and the `dump` text
//! renderer. Config is the only part that goes through `serde`/`bincode`;
//! matrix payloads are hand-written raw little-endian floats to match the
//! exact on-wire format of a known-good trainer.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};

use crate::config::Config;
use crate::error::{Result, TrainError};
use crate::matrix::DenseMatrix;
use crate::params::ParameterStore;

const FILE_FORMAT_MAGIC: i32 = 793_712_314;
const FILE_FORMAT_VERSION: i32 = 12;

fn write_matrix<W: Write>(w: &mut W, m: &DenseMatrix) -> Result<()> {
    w.write_all(&(m.rows() as i64).to_le_bytes())?;
    w.write_all(&(m.cols() as i64).to_le_bytes())?;
    for v in m.to_vec() {
        w.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

fn read_matrix<R: Read>(r: &mut R) -> Result<DenseMatrix> {
    let rows = read_i64(r)? as usize;
    let cols = read_i64(r)? as usize;
    let mut data = Vec::with_capacity(rows * cols);
    let mut buf = [0u8; 4];
    for _ in 0..rows * cols {
        r.read_exact(&mut buf)?;
        data.push(f32::from_le_bytes(buf));
    }
    DenseMatrix::from_vec(rows, cols, data)
}

fn read_i32<R: Read>(r: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_i64<R: Read>(r: &mut R) -> Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

/// Save `UI, II, WO, IO, UWO` (view matrices are intentionally not
/// persisted -- see DESIGN.md) plus the config, in this fixed on-wire order.
pub fn save_model(path: &str, config: &Config, params: &ParameterStore) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_all(&FILE_FORMAT_MAGIC.to_le_bytes())?;
    w.write_all(&FILE_FORMAT_VERSION.to_le_bytes())?;

    let config_bytes = bincode::serialize(config)
        .map_err(|e| TrainError::config(format!("failed to serialize config: {e}")))?;
    w.write_all(&(config_bytes.len() as u64).to_le_bytes())?;
    w.write_all(&config_bytes)?;

    write_matrix(&mut w, &params.ui)?;
    write_matrix(&mut w, &params.ii)?;
    write_matrix(&mut w, &params.wo)?;
    write_matrix(&mut w, &params.io)?;
    write_matrix(&mut w, &params.uwo)?;
    w.flush()?;
    Ok(())
}

/// The matrices a loaded model carries. `UIv`/`IOv` are not part of the
/// persisted format, so a loader that needs a full `ParameterStore` must
/// re-initialize them (e.g. if continuing to train with views enabled).
pub struct LoadedModel {
    pub config: Config,
    pub ui: DenseMatrix,
    pub ii: DenseMatrix,
    pub wo: DenseMatrix,
    pub io: DenseMatrix,
    pub uwo: DenseMatrix,
}

pub fn load_model(path: &str) -> Result<LoadedModel> {
    let mut r = BufReader::new(File::open(path)?);
    let magic = read_i32(&mut r)?;
    if magic != FILE_FORMAT_MAGIC {
        return Err(TrainError::config(format!(
            "not a recognized model file (bad magic {magic})"
        )));
    }
    let version = read_i32(&mut r)?;
    if version != FILE_FORMAT_VERSION {
        return Err(TrainError::config(format!(
            "unsupported model file version {version}, expected {FILE_FORMAT_VERSION}"
        )));
    }
    let config_len = {
        let mut buf = [0u8; 8];
        r.read_exact(&mut buf)?;
        u64::from_le_bytes(buf) as usize
    };
    let mut config_bytes = vec![0u8; config_len];
    r.read_exact(&mut config_bytes)?;
    let config: Config = bincode::deserialize(&config_bytes)
        .map_err(|e| TrainError::config(format!("failed to deserialize config: {e}")))?;

    let ui = read_matrix(&mut r)?;
    let ii = read_matrix(&mut r)?;
    let wo = read_matrix(&mut r)?;
    let io = read_matrix(&mut r)?;
    let uwo = read_matrix(&mut r)?;

    Ok(LoadedModel { config, ui, ii, wo, io, uwo })
}

/// Hand-rolled `.npy` writer: magic, version 1.0, a little-endian header
/// length, and a literal Python-dict-shaped header string padded to a
/// 64-byte boundary, matching NumPy's documented format exactly for
/// `fortran_order=False` row-major float32 arrays.
pub fn write_npy(path: &str, m: &DenseMatrix) -> Result<()> {
    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, {}), }}",
        m.rows(),
        m.cols()
    );
    // Total preamble (10-byte fixed prefix + header + trailing '\n') must be
    // a multiple of 64 bytes.
    let unpadded_len = 10 + header.len() + 1;
    let padding = (64 - unpadded_len % 64) % 64;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let mut w = BufWriter::new(File::create(path)?);
    w.write_all(b"\x93NUMPY")?;
    w.write_all(&[1u8, 0u8])?;
    w.write_all(&(header.len() as u16).to_le_bytes())?;
    w.write_all(header.as_bytes())?;
    for v in m.to_vec() {
        w.write_all(&v.to_le_bytes())?;
    }
    w.flush()?;
    Ok(())
}

/// Exports all seven matrices as `.npy` files under `prefix`, one file per
/// matrix suffix.
pub fn export_vectors(prefix: &str, params: &ParameterStore) -> Result<()> {
    write_npy(&format!("{prefix}_userInput"), &params.ui)?;
    write_npy(&format!("{prefix}_userWordOutput"), &params.uwo)?;
    write_npy(&format!("{prefix}_userViewInput"), &params.ui_v)?;
    write_npy(&format!("{prefix}_itemInput"), &params.ii)?;
    write_npy(&format!("{prefix}_wordOutput"), &params.wo)?;
    write_npy(&format!("{prefix}_itemOutput"), &params.io)?;
    write_npy(&format!("{prefix}_itemViewOutput"), &params.io_v)?;
    Ok(())
}

/// `what` is one of `args`, `user_input`, `item_input`, `word_output`,
/// `item_output` (the `dump` command's allowed arguments).
pub fn dump_text(what: &str, model: &LoadedModel) -> Result<String> {
    match what {
        "args" => Ok(format!("{:#?}", model.config)),
        "user_input" => Ok(render_matrix(&model.ui)),
        "item_input" => Ok(render_matrix(&model.ii)),
        "word_output" => Ok(render_matrix(&model.wo)),
        "item_output" => Ok(render_matrix(&model.io)),
        other => Err(TrainError::config(format!("unknown dump target '{other}'"))),
    }
}

fn render_matrix(m: &DenseMatrix) -> String {
    let mut out = String::new();
    let data = m.to_vec();
    for row in data.chunks(m.cols()) {
        let line: Vec<String> = row.iter().map(|v| format!("{v:.6}")).collect();
        out.push_str(&line.join(" "));
        out.push('\n');
    }
    out
}
