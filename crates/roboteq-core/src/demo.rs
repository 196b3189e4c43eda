//! Demo Mode - simulated motor controller
//!
//! A [`Transport`] that answers the command set like a dual-channel
//! controller would, for running the driver and its tools without hardware.
//! Setpoints, emergency stop, digital outputs and user variables are
//! tracked; speeds follow the setpoints, encoder counts integrate the speed
//! over wall-clock time, and measurements carry a little random noise.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::protocol::commands::mnemonic;
use crate::protocol::{
    CommandKind, FrameCodec, RawResponse, Transport, TransportError, ANALOG_INPUT_COUNT,
    ASCII_CR_CODE, FIELD_DELIMITER, PULSED_INPUT_COUNT,
};
use crate::telemetry::{FaultFlags, StatusFlags};

/// Speed at setpoint 1000
const MAX_RPM: f64 = 3000.0;
/// Encoder resolution
const COUNTS_PER_REV: f64 = 1024.0;
/// Nominal battery voltage
const BATTERY_VOLTS: f64 = 24.0;
/// Ambient temperature
const AMBIENT_C: f64 = 25.0;
const USER_VARIABLES: usize = 16;
const FIRMWARE_ID: &str = "Roboteq v1.8 RCB500 simulated";

/// Simulated controller state
pub struct SimulatedController {
    setpoints: [i32; 2],
    estop: bool,
    digital_outputs: u32,
    digital_inputs: u32,
    variables: [i32; USER_VARIABLES],
    encoder: [f64; 2],
    motor_temp: [f64; 2],
    echo: bool,
    replies: VecDeque<Vec<u8>>,
    last_update: Instant,
    rng: StdRng,
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedController {
    /// Create a simulator at rest
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create a simulator with reproducible noise
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            setpoints: [0; 2],
            estop: false,
            digital_outputs: 0,
            digital_inputs: 0b0101,
            variables: [0; USER_VARIABLES],
            encoder: [0.0; 2],
            motor_temp: [AMBIENT_C; 2],
            echo: false,
            replies: VecDeque::new(),
            last_update: Instant::now(),
            rng,
        }
    }

    /// Echo every command line before its reply, like a controller with
    /// serial echo enabled
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Effective motor command per channel
    fn power(&self) -> [i32; 2] {
        if self.estop {
            [0; 2]
        } else {
            self.setpoints
        }
    }

    fn rpm(&self, channel: usize) -> f64 {
        self.power()[channel] as f64 * MAX_RPM / 1000.0
    }

    /// Motor current in amps
    fn motor_amps(&self, channel: usize) -> f64 {
        (self.power()[channel].abs() as f64) * 0.04
    }

    /// Advance encoders and temperatures to now
    fn update(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_update).as_secs_f64();
        self.last_update = now;

        for channel in 0..2 {
            self.encoder[channel] += self.rpm(channel) / 60.0 * COUNTS_PER_REV * dt;
            let target = AMBIENT_C + self.motor_amps(channel) * 0.5;
            // First-order approach with a 30 s time constant
            let alpha = (dt / 30.0).min(1.0);
            self.motor_temp[channel] += (target - self.motor_temp[channel]) * alpha;
        }
    }

    fn noise(&mut self, amplitude: f64) -> f64 {
        self.rng.gen_range(-amplitude..=amplitude)
    }

    /// Scale to tenths with noise
    fn tenths(&mut self, value: f64, noise: f64) -> i64 {
        ((value + self.noise(noise)) * 10.0).round() as i64
    }

    fn respond(&mut self, request: &RawResponse) -> String {
        self.update();

        let name = request.mnemonic.as_deref().unwrap_or_default();
        let mut args = Vec::with_capacity(request.tokens.len());
        for token in &request.tokens {
            match token.parse::<i64>() {
                Ok(value) => args.push(value),
                Err(_) => return "-".to_string(),
            }
        }

        match request.kind {
            Some(CommandKind::Runtime) => {
                if self.runtime(name, &args) {
                    "+".to_string()
                } else {
                    "-".to_string()
                }
            }
            Some(CommandKind::Query) => match self.query(name, &args) {
                Some(values) => format!("+{}={}", name, values.join(&FIELD_DELIMITER.to_string())),
                None => "-".to_string(),
            },
            None => "-".to_string(),
        }
    }

    fn runtime(&mut self, name: &str, args: &[i64]) -> bool {
        match (name, args) {
            (mnemonic::SET_SETPOINT, &[channel, value]) if (-1000..=1000).contains(&value) => {
                let value = value as i32;
                match channel {
                    0 => self.setpoints = [value; 2],
                    1 | 2 => self.setpoints[channel as usize - 1] = value,
                    _ => return false,
                }
                true
            }
            (mnemonic::EMERGENCY_STOP, []) => {
                self.estop = true;
                self.setpoints = [0; 2];
                true
            }
            (mnemonic::RELEASE_STOP, []) => {
                self.estop = false;
                true
            }
            (mnemonic::SET_DIGITAL_OUT, &[output]) if (1..=8).contains(&output) => {
                self.digital_outputs |= 1 << (output - 1);
                true
            }
            (mnemonic::RESET_DIGITAL_OUT, &[output]) if (1..=8).contains(&output) => {
                self.digital_outputs &= !(1 << (output - 1));
                true
            }
            (mnemonic::USER_VARIABLE, &[index, value]) if (1..=16).contains(&index) => {
                match i32::try_from(value) {
                    Ok(value) => {
                        self.variables[index as usize - 1] = value;
                        true
                    }
                    Err(_) => false,
                }
            }
            _ => false,
        }
    }

    fn query(&mut self, name: &str, args: &[i64]) -> Option<Vec<String>> {
        let pair = |values: [i64; 2]| values.iter().map(i64::to_string).collect::<Vec<_>>();

        let values = match (name, args) {
            (mnemonic::VOLTS, []) => {
                let load = (self.motor_amps(0) + self.motor_amps(1)) * 0.01;
                let battery = self.tenths(BATTERY_VOLTS - load, 0.05);
                let analog = self.tenths(5.0, 0.02);
                vec![battery, battery - 1, analog]
                    .iter()
                    .map(i64::to_string)
                    .collect()
            }
            (mnemonic::MOTOR_AMPS, []) => {
                let (a, b) = (self.motor_amps(0), self.motor_amps(1));
                pair([self.tenths(a, 0.1), self.tenths(b, 0.1)])
            }
            (mnemonic::BATTERY_AMPS, []) => {
                let total = (self.motor_amps(0) + self.motor_amps(1)) * 0.8;
                vec![self.tenths(total, 0.1).to_string()]
            }
            (mnemonic::TEMPERATURE, []) => {
                let (m0, m1) = (self.motor_temp[0], self.motor_temp[1]);
                let channel = AMBIENT_C + 3.0;
                let values = [
                    self.tenths(m0, 0.2),
                    self.tenths(m1, 0.2),
                    self.tenths(channel, 0.2),
                    self.tenths(channel, 0.2),
                    self.tenths(channel + 2.0, 0.2),
                ];
                values.iter().map(i64::to_string).collect()
            }
            (mnemonic::ENCODER_COUNT, []) => {
                pair([self.encoder[0].round() as i64, self.encoder[1].round() as i64])
            }
            (mnemonic::ENCODER_RPM, []) => {
                let (a, b) = (self.rpm(0), self.rpm(1));
                pair([
                    (a + self.noise(2.0)).round() as i64,
                    (b + self.noise(2.0)).round() as i64,
                ])
            }
            (mnemonic::MOTOR_POWER, []) | (mnemonic::MOTOR_COMMANDED, []) => {
                let power = self.power();
                pair([power[0] as i64, power[1] as i64])
            }
            (mnemonic::CLOSED_LOOP_ERROR, []) => pair([0, 0]),
            (mnemonic::STATUS_FLAGS, []) => {
                let mut flags = StatusFlags::SERIAL_MODE;
                if self.estop {
                    flags |= StatusFlags::POWER_STAGE_OFF;
                }
                vec![flags.bits().to_string()]
            }
            (mnemonic::FAULT_FLAGS, []) => {
                let flags = if self.estop {
                    FaultFlags::EMERGENCY_STOP
                } else {
                    FaultFlags::empty()
                };
                vec![flags.bits().to_string()]
            }
            (mnemonic::ANALOG_INPUT, []) => (1..=ANALOG_INPUT_COUNT)
                .map(|i| self.analog_millivolts(i).to_string())
                .collect(),
            (mnemonic::ANALOG_INPUT, &[channel]) if (1..=ANALOG_INPUT_COUNT as i64).contains(&channel) => {
                vec![self.analog_millivolts(channel as usize).to_string()]
            }
            (mnemonic::DIGITAL_INPUTS, []) => vec![self.digital_inputs.to_string()],
            (mnemonic::DIGITAL_OUTPUTS, []) => vec![self.digital_outputs.to_string()],
            (mnemonic::PULSED_INPUTS, []) => (0..PULSED_INPUT_COUNT)
                .map(|i| (1500 + i as i32 * 10).to_string())
                .collect(),
            (mnemonic::USER_VARIABLE, &[index]) if (1..=16).contains(&index) => {
                vec![self.variables[index as usize - 1].to_string()]
            }
            (mnemonic::FIRMWARE_ID, []) => vec![FIRMWARE_ID.to_string()],
            _ => return None,
        };

        Some(values)
    }

    /// Input `i` sits at `i * 500` mV
    fn analog_millivolts(&mut self, input: usize) -> i64 {
        (input as f64 * 500.0 + self.noise(5.0)).round() as i64
    }

    fn queue(&mut self, line: &str) {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(ASCII_CR_CODE);
        self.replies.push_back(bytes);
    }
}

impl Transport for SimulatedController {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let reply = match FrameCodec::decode(bytes) {
            Ok(request) => self.respond(&request),
            Err(_) => "-".to_string(),
        };

        if self.echo {
            let echoed = String::from_utf8_lossy(bytes)
                .trim_end_matches(ASCII_CR_CODE as char)
                .to_string();
            self.queue(&echoed);
        }
        self.queue(&reply);
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        match self.replies.pop_front() {
            Some(line) => Ok(line),
            None => {
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
                Err(TransportError::Timeout)
            }
        }
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.replies.clear();
        Ok(())
    }
}
