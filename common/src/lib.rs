pub mod config;
pub mod filter;
pub mod power;
pub mod protocol;
pub mod sampler;
pub mod session;
pub mod types;

pub use config::{
    CalibrationProfile, MonitorConfig, NetworkConfig, RuntimeConfig, SamplerConfig, TimeoutPolicy,
};
pub use filter::{FilterConfig, FilterOutcome, ValidityFilter};
pub use power::{CalibrationFormula, RollerCurve, KINETIC_ROLLER_CURVE};
pub use protocol::{
    decode_period_frame, encode_period_frame, respond, FrameError, Inbound, Reply,
    PERIOD_FRAME_LEN, PERIOD_REQUEST, WS_SUBPROTOCOL,
};
pub use sampler::{LatestPeriod, Level, PulseInput, PulseSampler, SamplerStats};
pub use session::{format_elapsed, ChartPoint, MonitorSession, PowerSeries, TickReport};
pub use types::{ConnectionState, PeriodMeasurement};
