pub mod commands;
pub mod delay;
pub mod gd3;
pub mod header;
pub mod reader;
pub mod recorder;
pub mod writer;

pub use commands::VgmCommand;
pub use gd3::Gd3Metadata;
pub use reader::{read_vgm_file, ChipInfo, Gd3Info, VgmHeader, VgmReader};
pub use recorder::{Recorder, StreamWriter, VgmRecorder, VgmWriterHandle};
pub use writer::VgmWriter;
