//! SafeTensors checkpoints
//!
//! A checkpoint holds `model.<name>` parameters, optional Adam moments as
//! `optimizer.{m,v,v_max}.<index>`, and the run counters as string metadata.

use crate::error::{Error, Result};
use crate::model::{ModelKind, ParameterSet, Vocoder};
use crate::optim::{Adam, ExponentialMovingAverage};
use crate::train::TrainingState;
use ndarray::{Array1, ArrayView1};
use safetensors::tensor::{Dtype, TensorView};
use safetensors::SafeTensors;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

const MODEL_PREFIX: &str = "model.";
const OPTIMIZER_SLOTS: [&str; 3] = ["m", "v", "v_max"];

/// `checkpoint_step{step:09}.safetensors`, with an `_ema` suffix for averaged weights
pub fn checkpoint_path(dir: &Path, step: u64, averaged: bool) -> PathBuf {
    let suffix = if averaged { "_ema" } else { "" };
    dir.join(format!("checkpoint_step{step:09}{suffix}.safetensors"))
}

/// Write model parameters, counters and, when given, optimizer state
pub fn save_checkpoint(
    path: &Path,
    model: &dyn Vocoder,
    optimizer: Option<&Adam>,
    state: &TrainingState,
) -> Result<()> {
    write_checkpoint(path, model.parameters(), model.kind(), optimizer, state)
}

fn write_checkpoint(
    path: &Path,
    params: &ParameterSet,
    kind: ModelKind,
    optimizer: Option<&Adam>,
    state: &TrainingState,
) -> Result<()> {
    let mut tensors: Vec<(String, Vec<u8>, Vec<usize>)> = params
        .iter()
        .map(|(name, shape, tensor)| {
            let bytes: Vec<u8> = bytemuck::cast_slice(&tensor.data().to_vec()).to_vec();
            (format!("{MODEL_PREFIX}{name}"), bytes, shape.to_vec())
        })
        .collect();

    if let Some(adam) = optimizer {
        let slots = [adam.first_moments(), adam.second_moments(), adam.max_second_moments()];
        for (slot, moments) in OPTIMIZER_SLOTS.iter().zip(slots) {
            for (i, moment) in moments.iter().enumerate() {
                if let Some(moment) = moment {
                    let bytes: Vec<u8> = bytemuck::cast_slice(&moment.to_vec()).to_vec();
                    tensors.push((format!("optimizer.{slot}.{i}"), bytes, vec![moment.len()]));
                }
            }
        }
    }

    let views = tensors
        .iter()
        .map(|(name, bytes, shape)| {
            TensorView::new(Dtype::F32, shape.clone(), bytes)
                .map(|view| (name.as_str(), view))
                .map_err(|e| Error::Serialization(format!("Invalid tensor {name}: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut metadata = HashMap::new();
    metadata.insert("global_step".to_string(), state.step.to_string());
    metadata.insert("global_epoch".to_string(), state.epoch.to_string());
    metadata.insert("global_test_step".to_string(), state.validation_step.to_string());
    metadata.insert("model_kind".to_string(), kind.to_string());
    if let Some(adam) = optimizer {
        metadata.insert("optimizer_step".to_string(), adam.step_count().to_string());
    }

    let bytes = safetensors::serialize(views, &Some(metadata))
        .map_err(|e| Error::Serialization(format!("SafeTensors serialization failed: {e}")))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::io(format!("creating {}", parent.display()), e))?;
    }
    std::fs::write(path, bytes).map_err(|e| Error::io(format!("writing {}", path.display()), e))?;
    tracing::info!(path = %path.display(), step = state.step, "saved checkpoint");
    Ok(())
}

/// Little-endian f32 payload; copies when the buffer is not 4-byte aligned
fn f32_values(bytes: &[u8]) -> Vec<f32> {
    match bytemuck::try_cast_slice::<u8, f32>(bytes) {
        Ok(values) => values.to_vec(),
        Err(_) => bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    }
}

/// Save the model and, with a moving average active, its averaged twin
pub fn save_checkpoints(
    dir: &Path,
    model: &dyn Vocoder,
    optimizer: Option<&Adam>,
    ema: Option<&ExponentialMovingAverage>,
    state: &TrainingState,
) -> Result<()> {
    save_checkpoint(&checkpoint_path(dir, state.step, false), model, optimizer, state)?;
    if let Some(ema) = ema {
        let averaged = averaged_model(model, ema);
        save_checkpoint(&checkpoint_path(dir, state.step, true), averaged.as_ref(), None, state)?;
    }
    Ok(())
}

/// Copy of `model` whose trainable parameters carry the shadow values
pub fn averaged_model(model: &dyn Vocoder, ema: &ExponentialMovingAverage) -> Box<dyn Vocoder> {
    let mut averaged = model.snapshot();
    ema.copy_to(&mut averaged.parameters_mut().tensors_mut());
    averaged
}

/// Outcome of transplanting parameters by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    /// Present on both sides with different shapes
    pub skipped_shape: Vec<String>,
    /// Model parameters the checkpoint does not have
    pub missing_in_checkpoint: Vec<String>,
    /// Checkpoint parameters the model does not have
    pub unexpected_in_checkpoint: Vec<String>,
}

struct StoredTensor {
    shape: Vec<usize>,
    values: Vec<f32>,
}

/// A checkpoint read into memory
pub struct Checkpoint {
    path: PathBuf,
    parameters: BTreeMap<String, StoredTensor>,
    optimizer: BTreeMap<String, Vec<f32>>,
    pub state: TrainingState,
    pub optimizer_step: u64,
    pub model_kind: Option<ModelKind>,
}

impl std::fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkpoint")
            .field("path", &self.path)
            .field("parameters", &self.parameters.len())
            .field("optimizer_tensors", &self.optimizer.len())
            .field("state", &self.state)
            .field("model_kind", &self.model_kind)
            .finish()
    }
}

impl Checkpoint {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = std::fs::read(&path)
            .map_err(|e| Error::io(format!("reading {}", path.display()), e))?;
        let (_, header) = SafeTensors::read_metadata(&data)
            .map_err(|e| Error::Serialization(format!("Failed to read {}: {e}", path.display())))?;
        let tensors = SafeTensors::deserialize(&data).map_err(|e| {
            Error::Serialization(format!("Failed to deserialize {}: {e}", path.display()))
        })?;

        let meta = header.metadata().clone().unwrap_or_default();
        let counter = |key: &str| -> Result<u64> {
            meta.get(key).map_or(Ok(0), |v| {
                v.parse().map_err(|_| {
                    Error::Serialization(format!("Invalid {key} '{v}' in {}", path.display()))
                })
            })
        };
        let state = TrainingState {
            step: counter("global_step")?,
            validation_step: counter("global_test_step")?,
            epoch: counter("global_epoch")? as usize,
        };
        let optimizer_step = counter("optimizer_step")?;
        let model_kind = meta.get("model_kind").map(|k| k.parse()).transpose()?;

        let mut parameters = BTreeMap::new();
        let mut optimizer = BTreeMap::new();
        for (name, view) in tensors.tensors() {
            if view.dtype() != Dtype::F32 {
                return Err(Error::Serialization(format!(
                    "Tensor {name} in {} has dtype {:?}, expected F32",
                    path.display(),
                    view.dtype()
                )));
            }
            let values = f32_values(view.data());
            if let Some(param) = name.strip_prefix(MODEL_PREFIX) {
                let stored = StoredTensor { shape: view.shape().to_vec(), values };
                parameters.insert(param.to_string(), stored);
            } else if let Some(slot) = name.strip_prefix("optimizer.") {
                optimizer.insert(slot.to_string(), values);
            } else {
                tracing::debug!(%name, "ignoring unknown checkpoint tensor");
            }
        }

        Ok(Self { path, parameters, optimizer, state, optimizer_step, model_kind })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_parameters(&self) -> usize {
        self.parameters.len()
    }

    pub fn has_optimizer_state(&self) -> bool {
        !self.optimizer.is_empty()
    }

    /// Restore every parameter; names and shapes must match exactly
    pub fn restore_model(&self, params: &mut ParameterSet) -> Result<()> {
        for id in 0..params.len() {
            let name = params.name(id);
            let stored = self.parameters.get(name).ok_or_else(|| Error::MissingParameter {
                name: name.to_string(),
                path: self.path.clone(),
            })?;
            if stored.shape != params.shape(id) {
                return Err(Error::ShapeMismatch {
                    name: name.to_string(),
                    expected: params.shape(id).to_vec(),
                    actual: stored.shape.clone(),
                });
            }
        }
        for name in self.parameters.keys() {
            if params.find(name).is_none() {
                tracing::warn!(
                    %name,
                    path = %self.path.display(),
                    "checkpoint parameter not used by the model"
                );
            }
        }
        for id in 0..params.len() {
            let values = &self.parameters[params.name(id)].values;
            params.get_mut(id).data_mut().assign(&ArrayView1::from(values.as_slice()));
        }
        Ok(())
    }

    /// Copy same-named parameters whose shapes agree, skipping the rest
    pub fn restore_partial(&self, params: &mut ParameterSet) -> RestoreReport {
        let mut report = RestoreReport::default();
        for id in 0..params.len() {
            let name = params.name(id).to_string();
            match self.parameters.get(&name) {
                None => report.missing_in_checkpoint.push(name),
                Some(stored) if stored.shape != params.shape(id) => {
                    tracing::warn!(
                        %name,
                        expected = ?params.shape(id),
                        found = ?stored.shape,
                        "skipping parameter with incompatible shape"
                    );
                    report.skipped_shape.push(name);
                }
                Some(stored) => {
                    let values = ArrayView1::from(stored.values.as_slice());
                    params.get_mut(id).data_mut().assign(&values);
                    report.restored.push(name);
                }
            }
        }
        report.unexpected_in_checkpoint =
            self.parameters.keys().filter(|name| params.find(name).is_none()).cloned().collect();
        tracing::info!(
            path = %self.path.display(),
            restored = report.restored.len(),
            skipped = report.skipped_shape.len(),
            missing = report.missing_in_checkpoint.len(),
            unexpected = report.unexpected_in_checkpoint.len(),
            "partial restore"
        );
        report
    }

    /// Load Adam moments and step counter
    pub fn restore_optimizer(&self, adam: &mut Adam, params: &ParameterSet) -> Result<()> {
        adam.reset();
        adam.set_step_count(self.optimizer_step);
        for (key, values) in &self.optimizer {
            let parsed = key
                .rsplit_once('.')
                .and_then(|(slot, i)| Some((slot, i.parse::<usize>().ok()?)));
            let Some((slot, index)) = parsed else {
                return Err(Error::Serialization(format!(
                    "Invalid optimizer tensor 'optimizer.{key}'"
                )));
            };
            if index >= params.len() {
                return Err(Error::Serialization(format!(
                    "optimizer.{key} refers to parameter {index}, the model has {}",
                    params.len()
                )));
            }
            if values.len() != params.get(index).len() {
                return Err(Error::ShapeMismatch {
                    name: format!("optimizer.{key}"),
                    expected: vec![params.get(index).len()],
                    actual: vec![values.len()],
                });
            }
            let moment = Array1::from(values.clone());
            match slot {
                "m" => adam.set_first_moment(index, moment),
                "v" => adam.set_second_moment(index, moment),
                "v_max" => adam.set_max_second_moment(index, moment),
                other => {
                    return Err(Error::Serialization(format!("Unknown optimizer slot '{other}'")));
                }
            }
        }
        Ok(())
    }
}

/// Full resume: parameters, counters and, unless reset, optimizer state
pub fn resume(
    path: &Path,
    model: &mut dyn Vocoder,
    optimizer: &mut Adam,
    reset_optimizer: bool,
) -> Result<TrainingState> {
    let checkpoint = Checkpoint::load(path)?;
    if let Some(kind) = checkpoint.model_kind {
        if kind != model.kind() {
            return Err(Error::ConfigError(format!(
                "{} holds a {kind} checkpoint, cannot resume the {}",
                path.display(),
                model.kind()
            )));
        }
    }
    checkpoint.restore_model(model.parameters_mut())?;
    if reset_optimizer {
        tracing::info!("optimizer state reset");
    } else if checkpoint.has_optimizer_state() {
        checkpoint.restore_optimizer(optimizer, model.parameters())?;
    }
    tracing::info!(
        path = %path.display(),
        step = checkpoint.state.step,
        epoch = checkpoint.state.epoch,
        "resumed"
    );
    Ok(checkpoint.state)
}

/// Restore what fits into the model without touching counters
pub fn restore_parts(path: &Path, model: &mut dyn Vocoder) -> Result<RestoreReport> {
    let checkpoint = Checkpoint::load(path)?;
    Ok(checkpoint.restore_partial(model.parameters_mut()))
}

/// Partially restore the teacher, then freeze all of its parameters
pub fn load_teacher(path: &Path, teacher: &mut dyn Vocoder) -> Result<RestoreReport> {
    let report = restore_parts(path, teacher)?;
    if report.restored.is_empty() {
        return Err(Error::ConfigError(format!(
            "Teacher checkpoint {} matches none of the teacher's parameters",
            path.display()
        )));
    }
    teacher.parameters_mut().freeze_all();
    Ok(report)
}

/// Copy the teacher's upsampling parameters into the student and freeze them.
///
/// Returns the names that were shared.
pub fn share_upsample_conv(
    teacher: &dyn Vocoder,
    student: &mut dyn Vocoder,
) -> Result<Vec<String>> {
    let source = teacher.parameters();
    let target = student.parameters_mut();
    let mut shared = Vec::new();
    for id in 0..target.len() {
        let name = target.name(id).to_string();
        if !name.contains("upsample") {
            continue;
        }
        let Some(src) = source.find(&name) else {
            return Err(Error::ConfigError(format!("Teacher has no parameter '{name}' to share")));
        };
        if source.shape(src) != target.shape(id) {
            return Err(Error::ShapeMismatch {
                name,
                expected: target.shape(id).to_vec(),
                actual: source.shape(src).to_vec(),
            });
        }
        target.get_mut(id).data_mut().assign(source.get(src).data());
        target.freeze(id);
        shared.push(name);
    }
    tracing::info!(count = shared.len(), "sharing upsample parameters with the teacher");
    Ok(shared)
}
