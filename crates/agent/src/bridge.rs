//! The two bridge variants behind one call-facing surface

use voice_bridge_core::SampleRate;

use crate::session::WorkerContext;
use crate::{DuplexBridge, SequentialBridge};

/// Bridge serving one call, chosen once and never switched mid-call
pub enum Bridge {
    Sequential(SequentialBridge),
    Duplex(DuplexBridge),
}

impl Bridge {
    pub fn name(&self) -> &'static str {
        match self {
            Bridge::Sequential(_) => "sequential",
            Bridge::Duplex(_) => "duplex",
        }
    }

    /// Rate the worker consumes caller audio at
    pub fn input_rate(&self) -> SampleRate {
        match self {
            Bridge::Sequential(bridge) => bridge.config().input_rate,
            Bridge::Duplex(bridge) => bridge.config().session.sample_rate,
        }
    }

    /// Rate assistant audio is produced at
    pub fn output_rate(&self) -> SampleRate {
        match self {
            Bridge::Sequential(bridge) => bridge.output_rate(),
            Bridge::Duplex(bridge) => bridge.config().session.sample_rate,
        }
    }

    pub(crate) async fn run(self, context: WorkerContext) {
        match self {
            Bridge::Sequential(bridge) => bridge.run(context).await,
            Bridge::Duplex(bridge) => bridge.run(context).await,
        }
    }
}

impl From<SequentialBridge> for Bridge {
    fn from(bridge: SequentialBridge) -> Self {
        Bridge::Sequential(bridge)
    }
}

impl From<DuplexBridge> for Bridge {
    fn from(bridge: DuplexBridge) -> Self {
        Bridge::Duplex(bridge)
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("name", &self.name())
            .field("input_rate", &self.input_rate())
            .field("output_rate", &self.output_rate())
            .finish()
    }
}
