//! State and messages shared between the pipeline and its consumers
//!
//! The published state lives here along with the wire messages the
//! backend link decodes.

pub mod messages;
pub mod state;

pub use messages::{GesturePayload, OrchestratorResponse, RemoteObject, VisionPayload};
pub use state::{describe_response, AnalysisResult, LiveState};
