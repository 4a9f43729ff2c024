//! Sample stream: reader thread, hand-off queue and consumer drain
//!
//! ```text
//! StreamProducer (reader thread) --push--> AcquisitionQueue --drain--> SampleConsumer
//! ```

mod consumer;
mod producer;
mod queue;
mod sample;

pub use consumer::{BACKLOG_WARNING, SampleConsumer, TickReport};
pub use producer::StreamProducer;
pub use queue::{PushOutcome, QueueMode, SampleReceiver, SampleSender, acquisition_queue};
pub use sample::{Eye, EyeSample, GAZE_FALLBACK, GazePoint, GazeSample, GazeSource};
