pub mod control;
pub mod converter;
pub mod discovery;
pub mod errors;
pub mod exif;
pub mod heif_decode;
pub mod output_paths;
pub mod png_writer;
pub mod request;
pub mod scheduler;
pub mod transform;

pub use control::{ChannelObserver, ProgressEvent, ProgressObserver, RunEvent, StopSignal};
pub use converter::{convert_one, Converter, PngConverter, WorkItem};
pub use discovery::discover;
pub use errors::{CodecError, ConversionError, PathError, RequestError, SetupError, TransformError};
pub use request::{ConversionRequest, ConvertSettings, PadColor, ResizeMode, ResizeSpec};
pub use scheduler::{run, run_with, RunOutcome, RunState, SchedulerOptions};
