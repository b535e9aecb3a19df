/// `hardware/` - the module's control surface as seen from scripts
///
/// Drivers live behind `Hardware`. Indices here are 0-based; the 1-based
/// numbering scripts use is converted in `scripting::api`. Completion events
/// are never delivered by calling back into the engine: drivers queue a
/// `HardwareEvent` and the main loop dispatches it at a safe point.
pub mod sim;

use std::sync::Arc;

pub use sim::SimHardware;

/// Curve followed by an output while it slews toward a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shape {
    #[default]
    Linear,
    Sine,
    Log,
    Expo,
    /// Jump straight to the target.
    Now,
}

impl Shape {
    pub fn from_name(name: &str) -> Option<Shape> {
        match name {
            "linear" => Some(Shape::Linear),
            "sine" => Some(Shape::Sine),
            "log" | "logarithmic" => Some(Shape::Log),
            "expo" | "exponential" => Some(Shape::Expo),
            "now" => Some(Shape::Now),
            _ => None,
        }
    }

    /// Map linear progress `t` in `0..=1` onto the curve.
    pub fn apply(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Shape::Linear => t,
            Shape::Sine => 0.5 - 0.5 * (std::f32::consts::PI * t).cos(),
            Shape::Log => 1.0 - (1.0 - t).powi(4),
            Shape::Expo => t.powi(4),
            Shape::Now => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum InputMode {
    #[default]
    None,
    /// Report the input value every `interval` seconds.
    Stream { interval: f32 },
}

impl InputMode {
    pub const DEFAULT_STREAM_INTERVAL: f32 = 0.1;
    /// Streams never report faster than this, in seconds.
    pub const MIN_STREAM_INTERVAL: f32 = 0.001;

    pub fn parse(name: &str, interval: Option<f32>) -> Option<InputMode> {
        match name {
            "none" => Some(InputMode::None),
            "stream" => {
                let interval = interval.unwrap_or(Self::DEFAULT_STREAM_INTERVAL);
                (interval > 0.0).then_some(InputMode::Stream { interval }.clamped())
            }
            _ => None,
        }
    }

    /// Raise a stream interval to `MIN_STREAM_INTERVAL`.
    pub fn clamped(self) -> InputMode {
        match self {
            InputMode::Stream { interval } => InputMode::Stream {
                interval: interval.max(Self::MIN_STREAM_INTERVAL),
            },
            other => other,
        }
    }
}

/// Something a driver wants a script handler to hear about.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HardwareEvent {
    /// An output finished slewing.
    MotionComplete { channel: usize },
    /// A metronome reached `stage`. `timer` includes the reserved timers.
    MetroStage { timer: usize, stage: usize },
    /// A streamed input produced a sample.
    StreamSample { input: usize, value: f32 },
}

pub trait Hardware: Send + Sync {
    fn toward(&self, channel: usize, target: f32, duration_ms: f32, shape: Shape);
    fn channel_state(&self, channel: usize) -> f32;
    fn input_value(&self, input: usize) -> f32;
    fn set_input_mode(&self, input: usize, mode: InputMode);
    /// `seconds: None` keeps the previous period, `count: None` runs forever.
    fn metro_start(&self, timer: usize, seconds: Option<f32>, count: Option<u32>, stage: usize);
    fn metro_stop(&self, timer: usize);
    fn metro_set_time(&self, timer: usize, seconds: f32);
    fn bus_send(&self, address: u8, frame: &[u8]);
    /// Send a query frame and wait for the peer's reply. `None` when the
    /// peer didn't answer.
    fn bus_query(&self, address: u8, frame: &[u8]) -> Option<Vec<u8>>;
    fn set_bus_address(&self, index: u8);
    fn enter_bootloader(&self);
    /// Stop timers and streams ahead of a soft reset.
    fn reset(&self) {}
}

pub type SharedHardware = Arc<dyn Hardware>;
