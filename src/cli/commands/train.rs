//! Train command implementation

use crate::config::{resolve_hparams, HParams, TrainArgs};
use crate::data::{
    Collator, DataLoader, DatasetOptions, FileDataset, LengthGroupedSampler,
    Ordering as BatchOrder, Split, ThresholdFrontEnd, UtteranceSource,
};
use crate::error::{Error, Result};
use crate::io;
use crate::model::{build_model, ModelKind};
use crate::train::{MetricsRecorder, Trainer};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn open_split(args: &TrainArgs, hp: &HParams, split: Split) -> Result<FileDataset> {
    let options = DatasetOptions {
        split,
        test_size: hp.test_split(),
        random_state: hp.random_state,
        speaker_id: args.speaker_id,
        local_conditioning: hp.local_conditioning(),
    };
    let dataset = FileDataset::open(&args.data_root, &options)?;
    if dataset.multi_speaker() {
        for (speaker, count) in dataset.speaker_counts() {
            tracing::info!(?split, speaker, utterances = count, "speaker");
        }
    }
    tracing::info!(?split, utterances = dataset.len(), "dataset opened");
    Ok(dataset)
}

fn build_loader(dataset: FileDataset, hp: &HParams, split: Split) -> Result<DataLoader> {
    let ordering = match split {
        Split::Train => {
            let sampler = LengthGroupedSampler::new(&dataset.lengths(), hp.batch_size)?;
            BatchOrder::LengthGrouped(sampler)
        }
        Split::Test => BatchOrder::Shuffled,
    };
    let loader = DataLoader::new(
        Arc::new(dataset),
        Collator::from_hparams(hp),
        Arc::new(ThresholdFrontEnd::from_hparams(hp)),
        ordering,
        hp.batch_size,
    )?;
    Ok(loader.with_workers(hp.num_workers))
}

/// Build the models, restore what was asked for and distill until done or interrupted
pub(crate) fn run_train(args: &TrainArgs) -> Result<()> {
    let hp = resolve_hparams(&args.hparams)?;
    tracing::debug!("hyperparameters:\n{}", hp.debug_string());
    std::fs::create_dir_all(&args.checkpoint_dir)
        .map_err(|e| Error::io(format!("creating {}", args.checkpoint_dir.display()), e))?;

    let train_set = open_split(args, &hp, Split::Train)?;
    let test_set = open_split(args, &hp, Split::Test)?;
    if train_set.is_empty() {
        return Err(Error::ConfigError(format!(
            "no training utterances under {}",
            args.data_root.display()
        )));
    }
    let train_loader = build_loader(train_set, &hp, Split::Train)?;
    let test_loader = build_loader(test_set, &hp, Split::Test)?;

    let seed = hp.seed.unwrap_or_else(rand::random);
    let mut teacher = build_model(ModelKind::Teacher, &hp, seed);
    let mut student = build_model(ModelKind::Student, &hp, seed.wrapping_add(1));
    tracing::info!(
        teacher_receptive_field = teacher.receptive_field(),
        student_receptive_field = student.receptive_field(),
        student_parameters = student.parameters().num_elements(),
        "models built"
    );

    let report = io::load_teacher(&args.checkpoint_teacher, teacher.as_mut())?;
    tracing::info!(
        path = %args.checkpoint_teacher.display(),
        restored = report.restored.len(),
        "teacher loaded and frozen"
    );
    if let Some(path) = &args.restore_parts {
        io::restore_parts(path, student.as_mut())?;
    }
    if hp.share_upsample_conv && hp.hop_aligned() {
        io::share_upsample_conv(teacher.as_ref(), student.as_mut())?;
    }

    let mut trainer =
        Trainer::new(hp, teacher, student, &args.checkpoint_dir, seed.wrapping_add(2));
    if let Some(path) = &args.log_event_path {
        trainer = trainer.with_metrics(MetricsRecorder::with_event_log(path)?);
    }
    if let Some(path) = &args.checkpoint_student {
        trainer.resume(path, args.reset_optimizer)?;
    }

    let interrupt = install_interrupt_handler();
    let result = trainer.train(&train_loader, &test_loader, &interrupt)?;
    tracing::info!(
        step = result.state.step,
        epoch = result.state.epoch,
        elapsed_secs = result.elapsed_secs,
        interrupted = result.interrupted(),
        "finished"
    );
    report_checkpoint(trainer.checkpoint_dir(), result.state.step);
    Ok(())
}

/// Flag raised by Ctrl-C; the loop checks it between steps
fn install_interrupt_handler() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::warn!("interrupt received, stopping after the current step");
        handler_flag.store(true, Ordering::SeqCst);
    }) {
        tracing::warn!(error = %e, "could not install interrupt handler");
    }
    flag
}

fn report_checkpoint(dir: &Path, step: u64) {
    let path = io::checkpoint_path(dir, step, false);
    tracing::info!(path = %path.display(), "last checkpoint");
}
