//! Checkpoint and audio persistence
//!
//! Models, optimizer state and run counters are stored as SafeTensors files.
//! Restores come in two flavours: a strict resume where every parameter must
//! match, and a partial transplant that copies what fits and reports the rest.

mod checkpoint;
mod wav;

pub use checkpoint::{
    averaged_model, checkpoint_path, load_teacher, restore_parts, resume, save_checkpoint,
    save_checkpoints, share_upsample_conv, Checkpoint, RestoreReport,
};
pub use wav::write_wav;
