/// `hardware/sim.rs` - software stand-in for the module's drivers
///
/// Runs on a logical clock advanced by `poll`. Outputs slew along their
/// shape, metronomes tick, inputs read slow sine oscillators, bus traffic is
/// logged. Events are queued and handed back from `poll`, never delivered
/// from inside a driver call.
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use dasp::signal::{self, ConstHz, Signal, Sine};

use super::{Hardware, HardwareEvent, InputMode, Shape};
use crate::config::HardwareConfig;

/// Rate the simulated input oscillators are sampled at.
const INPUT_SAMPLE_RATE: f64 = 1000.0;
/// Peak level of the simulated inputs, in volts.
const INPUT_LEVEL: f32 = 5.0;
/// Metronomes never tick faster than this, in seconds.
const MIN_METRO_PERIOD: f64 = 0.001;

#[derive(Debug, Clone, Copy)]
struct Slew {
    from: f32,
    to: f32,
    elapsed: f64,
    duration: f64,
    shape: Shape,
    active: bool,
}

impl Slew {
    fn idle() -> Self {
        Self {
            from: 0.0,
            to: 0.0,
            elapsed: 0.0,
            duration: 0.0,
            shape: Shape::Linear,
            active: false,
        }
    }

    fn value(&self) -> f32 {
        if !self.active || self.duration <= 0.0 {
            return self.to;
        }
        let t = (self.elapsed / self.duration) as f32;
        self.from + (self.to - self.from) * self.shape.apply(t)
    }
}

#[derive(Debug, Clone, Copy)]
struct Metro {
    period: f64,
    count: Option<u32>,
    stage: usize,
    next_due: f64,
    running: bool,
}

impl Default for Metro {
    fn default() -> Self {
        Self {
            period: 1.0,
            count: None,
            stage: 0,
            next_due: 0.0,
            running: false,
        }
    }
}

struct Input {
    mode: InputMode,
    oscillator: Sine<ConstHz>,
    value: f32,
    next_report: f64,
}

struct SimState {
    now: f64,
    outputs: Vec<Slew>,
    metros: Vec<Metro>,
    inputs: Vec<Input>,
    bus_log: Vec<(u8, Vec<u8>)>,
    bus_replies: HashMap<u8, Vec<u8>>,
    bus_address: u8,
    bootloader_requests: usize,
}

pub struct SimHardware {
    state: Mutex<SimState>,
}

impl SimHardware {
    pub fn new(config: &HardwareConfig, metro_reserved: usize) -> Self {
        let inputs = (0..config.inputs)
            .map(|i| Input {
                mode: InputMode::None,
                oscillator: signal::rate(INPUT_SAMPLE_RATE)
                    .const_hz(0.25 * (i + 1) as f64)
                    .sine(),
                value: 0.0,
                next_report: 0.0,
            })
            .collect();
        Self {
            state: Mutex::new(SimState {
                now: 0.0,
                outputs: vec![Slew::idle(); config.outputs],
                metros: vec![Metro::default(); metro_reserved + config.user_metros],
                inputs,
                bus_log: Vec::new(),
                bus_replies: HashMap::new(),
                bus_address: 0,
                bootloader_requests: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advance the clock by `elapsed` and collect whatever fired meanwhile.
    pub fn poll(&self, elapsed: Duration) -> Vec<HardwareEvent> {
        let mut s = self.lock();
        let dt = elapsed.as_secs_f64();
        s.now += dt;
        let now = s.now;
        let mut events = Vec::new();

        for (channel, slew) in s.outputs.iter_mut().enumerate() {
            if slew.active {
                slew.elapsed += dt;
                if slew.elapsed >= slew.duration {
                    slew.active = false;
                    events.push(HardwareEvent::MotionComplete { channel });
                }
            }
        }

        for (timer, metro) in s.metros.iter_mut().enumerate() {
            while metro.running && metro.next_due <= now {
                events.push(HardwareEvent::MetroStage {
                    timer,
                    stage: metro.stage,
                });
                metro.stage += 1;
                metro.next_due += metro.period;
                if metro.count.is_some_and(|c| metro.stage >= c as usize) {
                    metro.running = false;
                }
            }
        }

        let steps = (dt * INPUT_SAMPLE_RATE).round() as usize;
        for (index, input) in s.inputs.iter_mut().enumerate() {
            for _ in 0..steps {
                input.value = input.oscillator.next() as f32 * INPUT_LEVEL;
            }
            if let InputMode::Stream { interval } = input.mode {
                if input.next_report <= now {
                    events.push(HardwareEvent::StreamSample {
                        input: index,
                        value: input.value,
                    });
                    // skip reports missed while the clock jumped, keeping the phase
                    let interval = interval as f64;
                    let missed = ((now - input.next_report) / interval).floor() + 1.0;
                    input.next_report += missed * interval;
                }
            }
        }

        events
    }

    // ── Inspection ───────────────────────────────────────────────────────────

    pub fn output_target(&self, channel: usize) -> Option<f32> {
        self.lock().outputs.get(channel).map(|s| s.to)
    }

    pub fn output_shape(&self, channel: usize) -> Option<Shape> {
        self.lock().outputs.get(channel).map(|s| s.shape)
    }

    pub fn metro_running(&self, timer: usize) -> bool {
        self.lock().metros.get(timer).is_some_and(|m| m.running)
    }

    pub fn metro_period(&self, timer: usize) -> Option<f64> {
        self.lock().metros.get(timer).map(|m| m.period)
    }

    pub fn input_mode(&self, input: usize) -> Option<InputMode> {
        self.lock().inputs.get(input).map(|i| i.mode)
    }

    pub fn bus_log(&self) -> Vec<(u8, Vec<u8>)> {
        self.lock().bus_log.clone()
    }

    /// Make the peer at `address` answer every query with `reply`.
    pub fn set_bus_reply(&self, address: u8, reply: Vec<u8>) {
        self.lock().bus_replies.insert(address, reply);
    }

    pub fn bus_address(&self) -> u8 {
        self.lock().bus_address
    }

    pub fn bootloader_requests(&self) -> usize {
        self.lock().bootloader_requests
    }
}

impl Hardware for SimHardware {
    fn toward(&self, channel: usize, target: f32, duration_ms: f32, shape: Shape) {
        let mut s = self.lock();
        let Some(slew) = s.outputs.get_mut(channel) else {
            log::warn!("[hw] toward: no output {channel}");
            return;
        };
        let duration = if shape == Shape::Now {
            0.0
        } else {
            (duration_ms.max(0.0) / 1000.0) as f64
        };
        *slew = Slew {
            from: slew.value(),
            to: target,
            elapsed: 0.0,
            duration,
            shape,
            active: true,
        };
    }

    fn channel_state(&self, channel: usize) -> f32 {
        self.lock().outputs.get(channel).map_or(0.0, |s| s.value())
    }

    fn input_value(&self, input: usize) -> f32 {
        self.lock().inputs.get(input).map_or(0.0, |i| i.value)
    }

    fn set_input_mode(&self, input: usize, mode: InputMode) {
        let mut s = self.lock();
        let now = s.now;
        let mode = mode.clamped();
        match s.inputs.get_mut(input) {
            Some(i) => {
                i.mode = mode;
                if let InputMode::Stream { interval } = mode {
                    i.next_report = now + interval as f64;
                }
            }
            None => log::warn!("[hw] set_input_mode: no input {input}"),
        }
    }

    fn metro_start(&self, timer: usize, seconds: Option<f32>, count: Option<u32>, stage: usize) {
        let mut s = self.lock();
        let now = s.now;
        let Some(metro) = s.metros.get_mut(timer) else {
            log::warn!("[hw] metro_start: no metro {timer}");
            return;
        };
        if let Some(seconds) = seconds {
            metro.period = (seconds as f64).max(MIN_METRO_PERIOD);
        }
        metro.count = count;
        metro.stage = stage;
        metro.next_due = now + metro.period;
        metro.running = count != Some(0);
    }

    fn metro_stop(&self, timer: usize) {
        match self.lock().metros.get_mut(timer) {
            Some(metro) => metro.running = false,
            None => log::warn!("[hw] metro_stop: no metro {timer}"),
        }
    }

    fn metro_set_time(&self, timer: usize, seconds: f32) {
        match self.lock().metros.get_mut(timer) {
            Some(metro) => metro.period = (seconds as f64).max(MIN_METRO_PERIOD),
            None => log::warn!("[hw] metro_set_time: no metro {timer}"),
        }
    }

    fn bus_send(&self, address: u8, frame: &[u8]) {
        log::debug!("[hw] bus -> {address:#04x}: {frame:02x?}");
        self.lock().bus_log.push((address, frame.to_vec()));
    }

    fn bus_query(&self, address: u8, frame: &[u8]) -> Option<Vec<u8>> {
        log::debug!("[hw] bus query -> {address:#04x}: {frame:02x?}");
        let mut s = self.lock();
        s.bus_log.push((address, frame.to_vec()));
        s.bus_replies.get(&address).cloned()
    }

    fn set_bus_address(&self, index: u8) {
        self.lock().bus_address = index;
    }

    fn enter_bootloader(&self) {
        log::warn!("[hw] bootloader requested");
        self.lock().bootloader_requests += 1;
    }

    fn reset(&self) {
        let mut s = self.lock();
        for metro in s.metros.iter_mut() {
            metro.running = false;
        }
        for input in s.inputs.iter_mut() {
            input.mode = InputMode::None;
        }
        for slew in s.outputs.iter_mut() {
            slew.active = false;
        }
    }
}
