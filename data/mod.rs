//! Input side of the harness: feature matrices, sample metadata, alteration
//! calls, and the label vectors built from them.

pub mod alterations;
pub mod matrix;
pub mod modality;
pub mod sample_info;
pub mod table;
pub mod target;

pub use matrix::FeatureMatrix;
pub use modality::{Modality, ModalityStore};
pub use sample_info::{SampleInfo, SampleRecord, stratification_key};
pub use table::DataError;
pub use target::{TargetBuilder, TargetKind, TargetLabels, TargetSpec};
