//! Controller facade
//!
//! The public surface of the driver. Runtime commands return `Ok(())` once
//! the controller acknowledges them; queries decode their reply and store
//! the snapshot in the telemetry cache. A failed query leaves its cache
//! slot untouched, so the slot keeps the last good value.
//!
//! `Controller` is `Send + Sync`. Share it through an `Arc`; concurrent
//! calls queue on the dispatcher and never interleave on the wire.

use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::protocol::{
    Command, Dispatcher, LinkState, ProtocolError, RawResponse, SerialTransport, Transport,
    FIELD_DELIMITER,
};
use crate::telemetry::{CachedSnapshot, TelemetryCache, TelemetryDecoder, TelemetryKind, TelemetrySnapshot};

/// High-level handle on one motor controller
pub struct Controller {
    config: ControllerConfig,
    dispatcher: Dispatcher,
    cache: TelemetryCache,
}

impl Controller {
    /// Drive the controller over an existing transport
    pub fn with_transport(config: ControllerConfig, transport: Box<dyn Transport>) -> Self {
        let dispatcher = Dispatcher::new(transport, config.retry_policy());
        Self {
            config,
            dispatcher,
            cache: TelemetryCache::new(),
        }
    }

    /// Open `config.port`
    pub fn open(config: ControllerConfig) -> Result<Self, ProtocolError> {
        let transport = SerialTransport::open(&config.port, config.baud_rate)?;
        Ok(Self::with_transport(config, Box::new(transport)))
    }

    /// Open `config.port`, falling back to `config.fallback_ports` in order.
    ///
    /// The first device that opens wins; no probing happens here, call
    /// [`controller_present`](Self::controller_present) to check that a
    /// controller is actually answering.
    pub fn open_first_available(config: ControllerConfig) -> Result<Self, ProtocolError> {
        let mut last_error = None;

        for port in config.candidate_ports() {
            match SerialTransport::open(&port, config.baud_rate) {
                Ok(transport) => {
                    if port != config.port {
                        info!("{} unavailable, using {}", config.port, port);
                    }
                    let config = ControllerConfig { port, ..config };
                    return Ok(Self::with_transport(config, Box::new(transport)));
                }
                Err(e) => {
                    debug!("cannot open {}: {}", port, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(ProtocolError::PortNotFound(config.port)))
    }

    /// Active configuration; `port` is the device actually opened
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Underlying dispatcher
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Telemetry cache
    pub fn cache(&self) -> &TelemetryCache {
        &self.cache
    }

    /// Last good snapshot of `kind`
    pub fn latest(&self, kind: TelemetryKind) -> Option<CachedSnapshot> {
        self.cache.latest(kind)
    }

    /// Whether the last exchange reached the controller
    pub fn link_present(&self) -> bool {
        self.dispatcher.link_present()
    }

    /// Link diagnostics
    pub fn link_state(&self) -> LinkState {
        self.dispatcher.link_state()
    }

    /// Run a raw command with the configured retry policy.
    ///
    /// For commands not covered by the typed methods, e.g. a
    /// [`non_retryable`](Command::non_retryable) one. The cache is not touched.
    pub fn execute(&self, command: &Command) -> Result<RawResponse, ProtocolError> {
        self.dispatcher.execute_default(command)
    }

    /// Probe the link with a firmware identification query.
    ///
    /// Stores the firmware id in the link state on success.
    pub fn controller_present(&self) -> bool {
        match self.dispatcher.execute_default(&Command::firmware_id()) {
            Ok(response) => {
                let id = response.tokens.join(&FIELD_DELIMITER.to_string());
                info!("controller firmware: {}", id);
                self.dispatcher.set_firmware_id(id);
                true
            }
            Err(e) => {
                debug!("presence probe failed: {}", e);
                false
            }
        }
    }

    // Runtime commands

    fn run(&self, command: Command) -> Result<(), ProtocolError> {
        self.dispatcher.execute_default(&command).map(|_| ())
    }

    /// Motor setpoint, -1000 to 1000, for channel 1 or 2 (0 drives both)
    pub fn set_setpoint(&self, channel: u8, value: i32) -> Result<(), ProtocolError> {
        self.run(Command::set_setpoint(channel, value))
    }

    /// Same setpoint on both channels
    pub fn set_setpoint_all(&self, value: i32) -> Result<(), ProtocolError> {
        self.set_setpoint(0, value)
    }

    /// Left (channel 1) then right (channel 2) setpoints
    pub fn set_motor_speeds(&self, left: i32, right: i32) -> Result<(), ProtocolError> {
        self.set_setpoint(1, left)?;
        self.set_setpoint(2, right)
    }

    /// Emergency stop
    pub fn set_estop(&self) -> Result<(), ProtocolError> {
        warn!("emergency stop requested");
        self.run(Command::set_estop())
    }

    /// Release the emergency stop
    pub fn reset_estop(&self) -> Result<(), ProtocolError> {
        self.run(Command::reset_estop())
    }

    /// Activate digital output 1-8
    pub fn set_dio(&self, output: u8) -> Result<(), ProtocolError> {
        self.run(Command::set_dio(output))
    }

    /// Deactivate digital output 1-8
    pub fn reset_dio(&self, output: u8) -> Result<(), ProtocolError> {
        self.run(Command::reset_dio(output))
    }

    /// Write user variable 1-16
    pub fn set_var(&self, index: u8, value: i32) -> Result<(), ProtocolError> {
        self.run(Command::set_var(index, value))
    }

    // Queries

    /// Send the query of `kind`, decode the reply and cache it
    pub fn query(&self, kind: TelemetryKind) -> Result<TelemetrySnapshot, ProtocolError> {
        let response = self.dispatcher.execute_default(&kind.command())?;
        let snapshot = TelemetryDecoder::decode(kind, &response).map_err(|e| {
            warn!("{} reply rejected: {}", kind, e);
            e
        })?;
        self.cache.store(snapshot.clone());
        Ok(snapshot)
    }

    /// Battery, drive and analog supply voltages
    pub fn get_volts(&self) -> Result<TelemetrySnapshot, ProtocolError> {
        self.query(TelemetryKind::Volts)
    }

    /// Motor currents
    pub fn get_motor_current(&self) -> Result<TelemetrySnapshot, ProtocolError> {
        self.query(TelemetryKind::MotorCurrent)
    }

    /// Battery current
    pub fn get_battery_amps(&self) -> Result<TelemetrySnapshot, ProtocolError> {
        self.query(TelemetryKind::BatteryCurrent)
    }

    /// Motor, channel and IC temperatures
    pub fn get_temp(&self) -> Result<TelemetrySnapshot, ProtocolError> {
        self.query(TelemetryKind::Temperature)
    }

    /// Encoder counts
    pub fn get_encoder_count(&self) -> Result<TelemetrySnapshot, ProtocolError> {
        self.query(TelemetryKind::EncoderCount)
    }

    /// Encoder speeds
    pub fn get_motor_rpm(&self) -> Result<TelemetrySnapshot, ProtocolError> {
        self.query(TelemetryKind::MotorRpm)
    }

    /// Applied motor power
    pub fn get_motor_power(&self) -> Result<TelemetrySnapshot, ProtocolError> {
        self.query(TelemetryKind::MotorPower)
    }

    /// Commanded motor values
    pub fn get_motor_commanded(&self) -> Result<TelemetrySnapshot, ProtocolError> {
        self.query(TelemetryKind::MotorCommanded)
    }

    /// Closed-loop error
    pub fn get_closed_loop_error(&self) -> Result<TelemetrySnapshot, ProtocolError> {
        self.query(TelemetryKind::ClosedLoopError)
    }

    /// Controller status flags
    pub fn get_status(&self) -> Result<TelemetrySnapshot, ProtocolError> {
        self.query(TelemetryKind::Status)
    }

    /// Fault flags
    pub fn get_fault(&self) -> Result<TelemetrySnapshot, ProtocolError> {
        self.query(TelemetryKind::Fault)
    }

    /// One analog input, 1-8
    pub fn get_analog_value(&self, channel: u8) -> Result<TelemetrySnapshot, ProtocolError> {
        self.query(TelemetryKind::AnalogInput(channel))
    }

    /// Every analog input
    pub fn get_analog_values(&self) -> Result<TelemetrySnapshot, ProtocolError> {
        self.query(TelemetryKind::AnalogInputs)
    }

    /// Digital input bitmask
    pub fn get_digital_inputs(&self) -> Result<TelemetrySnapshot, ProtocolError> {
        self.query(TelemetryKind::DigitalInputs)
    }

    /// Digital output bitmask
    pub fn get_digital_outputs(&self) -> Result<TelemetrySnapshot, ProtocolError> {
        self.query(TelemetryKind::DigitalOutputs)
    }

    /// Pulsed inputs
    pub fn get_pulsed_inputs(&self) -> Result<TelemetrySnapshot, ProtocolError> {
        self.query(TelemetryKind::PulsedInputs)
    }

    /// Read user variable 1-16
    pub fn read_var(&self, index: u8) -> Result<TelemetrySnapshot, ProtocolError> {
        self.query(TelemetryKind::UserVariable(index))
    }
}
