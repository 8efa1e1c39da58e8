pub mod analysis;
pub mod audio;
pub mod config;
pub mod http;
pub mod session;

pub use analysis::{
    AnalysisBackend, BackendError, ChunkAnalysis, HttpSessionClient, ScoreBand, SessionSummary,
};
pub use audio::{
    AcquireError, AudioFrame, ChunkedRecorder, DeviceBackendFactory, EncodedChunk, GraphBuilder,
    GraphConfig, MicConstraints, MixBus, MonitorSink, NullMonitorSink, RecorderConfig,
    SourceBackend, SourceBackendFactory, SourceHandle, SourceKind, StreamAcquirer, TabInfo,
    TabRegistry,
};
pub use config::Config;
pub use http::{create_router, AppState};
pub use session::{
    CaptureController, CaptureMode, CaptureState, ControlError, PipelineEvent, SessionConfig,
    SessionStats, TranscriptEntry,
};
