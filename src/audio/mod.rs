pub mod chunker;
pub mod dsp;
pub mod graph;
pub mod mic;
pub mod source;
pub mod tabs;

pub use chunker::{ChunkedRecorder, EncodedChunk, RecorderConfig, RecorderStats};
pub use dsp::{ChainParams, ProcessingChain};
pub use graph::{GraphBuilder, GraphConfig, GraphStats, MixBus, MonitorSink, NullMonitorSink};
pub use mic::CpalMicBackend;
pub use source::{
    AcquireError, AudioFrame, DeviceBackendFactory, MicConstraints, SourceBackend,
    SourceBackendFactory, SourceHandle, SourceKind, StreamAcquirer,
};
pub use tabs::{TabInfo, TabRegistry};
