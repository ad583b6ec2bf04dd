pub mod audio;
pub mod buffer;
pub mod realtime;
pub mod session;
pub mod tools;

// Re-export commonly used types for convenience
pub use audio::{AudioEncoding, AudioFrame, AudioSpec, Direction, from_vendor, to_vendor};

pub use buffer::PlaybackBuffer;

pub use realtime::{
    BoxedRealtimeClient, GeminiLive, OpenAIRealtime, RealtimeBackend, RealtimeClient,
    RealtimeError, RealtimeResult, ToolCallRequest, TranscriptRole, UsageReport, VendorConfig,
    VendorEvent, create_realtime_client,
};

pub use tools::{
    ActionClient, ToolClass, ToolDefinition, ToolDisposition, ToolError, ToolInvocation,
    ToolOrchestrator, ToolOrigin, ToolTermination,
};

pub use session::{
    SessionConfig, SessionController, SessionError, SessionOutcome, SessionState,
    TerminationOutcome, UsageCounters,
};
