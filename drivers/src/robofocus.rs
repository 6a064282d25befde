//! RoboFocus focuser driver
//!
//! The controller speaks fixed 9-byte frames: eight ASCII characters and an
//! additive checksum. Replies start with `F`. While the motor runs the
//! controller streams `I` (inward) or `O` (outward) bytes ahead of the
//! final position frame.
//!
//! | Command    | Reply      | Meaning                        |
//! |------------|------------|--------------------------------|
//! | `FV000000` | `FVxxxxxx` | firmware version               |
//! | `FG000000` | `FD0nnnnn` | current position               |
//! | `FGnnnnnn` | `FD0nnnnn` | move to position, then report  |
//! | `FT000000` | `FTnnnnnn` | temperature in half kelvin     |
//!
//! A bare `\r` aborts a move.

use std::io;
use std::time::Duration;

use lodestar_indi::serial::{frame_with_checksum, verify_checksum};
use lodestar_indi::standard_properties::*;
use lodestar_indi::{
    groups, lock, shared, ConfigFile, Dispatcher, Driver, DriverOptions, IndiContext,
    IndiResult, Light, LightVector, Number, NumberVector, Parity, Permission, PropertyState,
    PropertyTable, SerialIo, SerialTimeouts, Shared, Switch, SwitchRule, SwitchState,
    SwitchVector, Text, TextVector, TimerId, Tty, TtyError, TtyResult,
};

use crate::simulator::SimulatedRoboFocus;

pub const DEVICE_NAME: &str = "RoboFocus";
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";
pub const FRAME_LEN: usize = 9;

const BIT_RATE: u32 = 9600;
const POLL_PERIOD: Duration = Duration::from_secs(1);
const MAX_POSITION: f64 = 64000.0;

/// `code` and a zero padded six digit value, plus checksum.
pub fn command(code: &str, value: u32) -> Vec<u8> {
    frame_with_checksum(format!("{}{:06}", code, value).as_bytes())
}

fn bogus(frame: &[u8]) -> TtyError {
    TtyError::Errno(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("Bogus reply {:02X?}", frame),
    ))
}

/// A decoded reply frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub code: [u8; 2],
    pub payload: String,
}

impl Reply {
    pub fn parse(frame: &[u8]) -> TtyResult<Self> {
        if frame.len() != FRAME_LEN || frame[0] != b'F' {
            return Err(bogus(frame));
        }
        if !verify_checksum(frame) {
            tracing::warn!("Checksum mismatch in {:02X?}", frame);
        }
        Ok(Self {
            code: [frame[0], frame[1]],
            payload: String::from_utf8_lossy(&frame[2..8]).to_string(),
        })
    }

    /// Numeric payload of a reply with the expected code.
    fn value(&self, code: &[u8; 2]) -> TtyResult<f64> {
        if &self.code != code {
            return Err(bogus(&self.code));
        }
        self.payload
            .trim()
            .parse()
            .map_err(|_| bogus(self.payload.as_bytes()))
    }
}

/// Half kelvin as reported by `FT` to degrees Celsius.
pub fn half_kelvin_to_celsius(raw: f64) -> f64 {
    raw / 2.0 - 273.15
}

/// Command/reply exchange over an open line.
pub struct Link {
    tty: Tty<Box<dyn SerialIo>>,
    timeout: Duration,
}

impl Link {
    pub fn new(tty: Tty<Box<dyn SerialIo>>, timeout: Duration) -> Self {
        Self { tty, timeout }
    }

    fn send(&mut self, frame: &[u8]) -> TtyResult<()> {
        self.tty.flush()?;
        self.tty.write(frame)?;
        Ok(())
    }

    /// Skip motion bytes up to the next reply frame.
    fn read_reply(&mut self) -> TtyResult<Reply> {
        let mut byte = [0u8; 1];
        let mut motion = None;
        loop {
            self.tty.read(&mut byte, self.timeout)?;
            match byte[0] {
                b'I' | b'O' => {
                    if motion != Some(byte[0]) {
                        motion = Some(byte[0]);
                        let way = if byte[0] == b'I' { "inward" } else { "outward" };
                        tracing::info!("Moving {}...", way);
                    }
                }
                b'F' => {
                    let mut frame = [0u8; FRAME_LEN];
                    frame[0] = b'F';
                    self.tty.read(&mut frame[1..], self.timeout)?;
                    if motion.is_some() {
                        tracing::info!("Stopped.");
                    }
                    return Reply::parse(&frame);
                }
                _ => {}
            }
        }
    }

    fn transact(&mut self, code: &str, value: u32) -> TtyResult<Reply> {
        self.send(&command(code, value))?;
        self.read_reply()
    }

    pub fn firmware(&mut self) -> TtyResult<String> {
        Ok(self.transact("FV", 0)?.payload.trim().to_string())
    }

    pub fn position(&mut self) -> TtyResult<f64> {
        self.transact("FG", 0)?.value(b"FD")
    }

    pub fn temperature(&mut self) -> TtyResult<f64> {
        Ok(half_kelvin_to_celsius(self.transact("FT", 0)?.value(b"FT")?))
    }

    /// Start a move. The final position arrives later through
    /// [`Link::wait_position`].
    pub fn goto(&mut self, target: u32) -> TtyResult<()> {
        self.send(&command("FG", target))
    }

    pub fn wait_position(&mut self) -> TtyResult<f64> {
        self.read_reply()?.value(b"FD")
    }

    pub fn abort(&mut self) -> TtyResult<()> {
        self.tty.write(b"\r")?;
        Ok(())
    }

    pub fn close(self) -> TtyResult<()> {
        self.tty.disconnect()
    }
}

pub struct RoboFocus {
    device: String,
    simulation: bool,
    port_path: String,
    timeouts: SerialTimeouts,
    config: ConfigFile,
    dispatcher: Dispatcher,
    table: PropertyTable<RoboFocus>,
    link: Option<Link>,
    poll: Option<TimerId>,
    target: Option<f64>,
    config_loaded: bool,

    connection: Shared<SwitchVector>,
    port: Shared<TextVector>,
    position: Shared<NumberVector>,
    temperature: Shared<NumberVector>,
    abort: Shared<SwitchVector>,
    config_process: Shared<SwitchVector>,
    status: Shared<LightVector>,
    firmware: Shared<TextVector>,
}

impl RoboFocus {
    pub fn new(
        options: &DriverOptions,
        port: Option<String>,
        simulation: bool,
    ) -> IndiResult<Self> {
        let device = DEVICE_NAME;
        let port_path = port.unwrap_or_else(|| DEFAULT_PORT.to_string());

        let connection = shared(SwitchVector::new(
            device,
            CONNECTION,
            "Connection",
            groups::MAIN_CONTROL,
            Permission::ReadWrite,
            SwitchRule::OneOfMany,
            60.0,
            PropertyState::Idle,
            vec![
                Switch::new(CONNECT, "Connect", SwitchState::Off),
                Switch::new(DISCONNECT, "Disconnect", SwitchState::On),
            ],
        ));
        let port = shared(TextVector::new(
            device,
            DEVICE_PORT,
            "Ports",
            groups::OPTIONS,
            Permission::ReadWrite,
            60.0,
            PropertyState::Idle,
            vec![Text::new(PORT, "Port", &port_path)],
        ));
        let position = shared(NumberVector::new(
            device,
            ABS_FOCUS_POSITION,
            "Absolute Position",
            groups::MAIN_CONTROL,
            Permission::ReadWrite,
            0.0,
            PropertyState::Idle,
            vec![Number::new(
                FOCUS_ABSOLUTE_POSITION,
                "Ticks",
                "%6.0f",
                0.0,
                MAX_POSITION,
                50.0,
                0.0,
            )],
        ));
        let temperature = shared(NumberVector::new(
            device,
            FOCUS_TEMPERATURE,
            "Temperature",
            groups::MAIN_CONTROL,
            Permission::ReadOnly,
            0.0,
            PropertyState::Idle,
            vec![Number::new(TEMPERATURE, "Celsius", "%6.2f", -50.0, 70.0, 0.0, 0.0)],
        ));
        let abort = shared(SwitchVector::new(
            device,
            FOCUS_ABORT_MOTION,
            "Abort Motion",
            groups::MAIN_CONTROL,
            Permission::ReadWrite,
            SwitchRule::AtMostOne,
            0.0,
            PropertyState::Idle,
            vec![Switch::new(ABORT, "Abort", SwitchState::Off)],
        ));
        let config_process = shared(SwitchVector::new(
            device,
            CONFIG_PROCESS,
            "Configuration",
            groups::OPTIONS,
            Permission::ReadWrite,
            SwitchRule::AtMostOne,
            0.0,
            PropertyState::Idle,
            vec![
                Switch::new(CONFIG_LOAD, "Load", SwitchState::Off),
                Switch::new(CONFIG_SAVE, "Save", SwitchState::Off),
                Switch::new(CONFIG_DEFAULT, "Default", SwitchState::Off),
                Switch::new(CONFIG_PURGE, "Purge", SwitchState::Off),
            ],
        ));
        let status = shared(LightVector::new(
            device,
            FOCUS_STATUS,
            "Status",
            groups::MAIN_CONTROL,
            PropertyState::Idle,
            vec![Light::new(FOCUS_MOVING, "Moving", PropertyState::Idle)],
        ));
        let firmware = shared(TextVector::new(
            device,
            FIRMWARE_INFO,
            "Firmware",
            groups::OPTIONS,
            Permission::ReadOnly,
            0.0,
            PropertyState::Idle,
            vec![Text::new(FIRMWARE_VERSION, "Version", "")],
        ));

        let mut table = PropertyTable::new();
        table.on_switch(device, CONNECTION, Self::on_connection);
        table.on_text(device, DEVICE_PORT, Self::on_port);
        table.on_number(device, ABS_FOCUS_POSITION, Self::on_position);
        table.on_switch(device, FOCUS_ABORT_MOTION, Self::on_abort);
        table.on_switch(device, CONFIG_PROCESS, Self::on_config_process);

        Ok(Self {
            device: device.to_string(),
            simulation,
            port_path,
            timeouts: options.serial.clone(),
            config: ConfigFile::resolve(options.config_file.as_deref(), device)?,
            dispatcher: Dispatcher::new().verbose(options.verbose()),
            table,
            link: None,
            poll: None,
            target: None,
            config_loaded: false,
            connection,
            port,
            position,
            temperature,
            abort,
            config_process,
            status,
            firmware,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn poll_timer(&self) -> Option<TimerId> {
        self.poll
    }

    pub fn port_path(&self) -> &str {
        &self.port_path
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    fn open_link(&self) -> TtyResult<Link> {
        let tty = if self.simulation {
            Tty::boxed("simulation", SimulatedRoboFocus::default())
        } else {
            Tty::connect_with(&self.port_path, BIT_RATE, 8, Parity::None, 1, &self.timeouts)?
                .into_boxed()
        };
        Ok(Link::new(tty, self.timeouts.response_timeout()))
    }

    fn define_focuser(&self, ctx: &IndiContext) -> IndiResult<()> {
        ctx.def_number(&self.position, None)?;
        ctx.def_number(&self.temperature, None)?;
        ctx.def_switch(&self.abort, None)?;
        ctx.def_text(&self.firmware, None)
    }

    fn connect(&mut self, ctx: &IndiContext) -> IndiResult<()> {
        let opened = self.open_link().and_then(|mut link| {
            let version = link.firmware()?;
            Ok((link, version))
        });

        let (link, version) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                tracing::error!("Failed to connect to {}: {}", self.port_path, e);
                let mut v = lock(&self.connection);
                v.reset();
                if let Some(s) = v.find_mut(DISCONNECT) {
                    s.state = SwitchState::On;
                }
                v.state = PropertyState::Alert;
                let msg = format!("Failed to connect to {}: {}", self.port_path, e);
                return ctx.set_switch(&v, Some(&msg));
            }
        };

        self.link = Some(link);
        {
            let mut f = lock(&self.firmware);
            f.texts[0].text = version;
            f.state = PropertyState::Ok;
        }
        {
            let mut v = lock(&self.connection);
            v.state = PropertyState::Ok;
            ctx.set_switch(&v, Some("RoboFocus is online."))?;
        }
        self.define_focuser(ctx)?;
        self.poll = Some(ctx.add_periodic_timer(POLL_PERIOD));
        self.refresh(ctx)
    }

    fn disconnect(&mut self, ctx: &IndiContext) -> IndiResult<()> {
        if let Some(id) = self.poll.take() {
            ctx.remove_timer(id);
        }
        if let Some(link) = self.link.take() {
            if let Err(e) = link.close() {
                tracing::warn!("Closing {}: {}", self.port_path, e);
            }
        }
        self.target = None;
        for name in [ABS_FOCUS_POSITION, FOCUS_TEMPERATURE, FOCUS_ABORT_MOTION, FIRMWARE_INFO] {
            ctx.delete(&self.device, Some(name), None)?;
        }
        let mut v = lock(&self.connection);
        v.state = PropertyState::Idle;
        ctx.set_switch(&v, Some("RoboFocus is offline."))
    }

    fn set_moving(&self, ctx: &IndiContext, moving: bool) -> IndiResult<()> {
        let mut v = lock(&self.status);
        let (light, vector) = if moving {
            (PropertyState::Busy, PropertyState::Busy)
        } else {
            (PropertyState::Idle, PropertyState::Ok)
        };
        v.lights[0].state = light;
        v.state = vector;
        ctx.set_light(&v, None)
    }

    /// Poll position, and temperature when idle. A failed read marks the
    /// vector Alert and keeps its last value, except a timeout while
    /// moving, which leaves it Busy.
    fn refresh(&mut self, ctx: &IndiContext) -> IndiResult<()> {
        let Some(link) = self.link.as_mut() else {
            return Ok(());
        };
        let busy = lock(&self.position).state == PropertyState::Busy;
        let reading = if busy { link.wait_position() } else { link.position() };
        let temperature = if busy { None } else { Some(link.temperature()) };

        let mut arrived = false;
        {
            let mut v = lock(&self.position);
            match reading {
                Ok(pos) => {
                    let changed = v.numbers[0].value != pos;
                    v.numbers[0].value = pos;
                    if busy {
                        if self.target.map_or(true, |t| t == pos) {
                            v.state = PropertyState::Ok;
                            arrived = true;
                        }
                        ctx.set_number(&v, None)?;
                    } else if changed || v.state != PropertyState::Ok {
                        v.state = PropertyState::Ok;
                        ctx.set_number(&v, None)?;
                    }
                }
                // Long moves outlast the response timeout; wait for the
                // final frame on the next poll.
                Err(TtyError::TimeOut) if busy => {
                    tracing::debug!("Still moving towards {:?}", self.target);
                }
                Err(e) => {
                    v.state = PropertyState::Alert;
                    ctx.set_number(&v, Some(&format!("Position read failed: {}", e)))?;
                }
            }
        }
        if arrived {
            self.target = None;
            self.set_moving(ctx, false)?;
        }

        if let Some(reading) = temperature {
            let mut v = lock(&self.temperature);
            match reading {
                Ok(celsius) => {
                    if v.numbers[0].value != celsius || v.state != PropertyState::Ok {
                        v.numbers[0].value = celsius;
                        v.state = PropertyState::Ok;
                        ctx.set_number(&v, None)?;
                    }
                }
                Err(e) => {
                    v.state = PropertyState::Alert;
                    ctx.set_number(&v, Some(&format!("Temperature read failed: {}", e)))?;
                }
            }
        }
        Ok(())
    }

    fn load_config(
        &mut self,
        ctx: &IndiContext,
        file: &ConfigFile,
        property: Option<&str>,
        silent: bool,
    ) -> IndiResult<()> {
        let dispatcher = self.dispatcher.clone();
        let device = self.device.clone();
        file.read(ctx, &dispatcher, self, &device, property, silent)
    }

    fn save_config(&mut self, ctx: &IndiContext) -> IndiResult<()> {
        let mut writer = self.config.writer(ctx, &self.device, false)?;
        writer.save_text(&lock(&self.port))?;
        writer.finish(ctx)?;
        if let Err(e) = self.config.save_default() {
            tracing::warn!("{}", e);
        }
        Ok(())
    }

    fn on_connection(
        &mut self,
        ctx: &IndiContext,
        states: &[SwitchState],
        names: &[&str],
    ) -> IndiResult<()> {
        let wants_connect = {
            let mut v = lock(&self.connection);
            ctx.update_switch(&mut v, states, names)?;
            v.find_on_switch().is_some_and(|s| s.name == CONNECT)
        };
        match (wants_connect, self.is_connected()) {
            (true, false) => self.connect(ctx),
            (false, true) => self.disconnect(ctx),
            _ => {
                let mut v = lock(&self.connection);
                v.state = if wants_connect {
                    PropertyState::Ok
                } else {
                    PropertyState::Idle
                };
                ctx.set_switch(&v, None)
            }
        }
    }

    fn on_port(&mut self, ctx: &IndiContext, texts: &[&str], names: &[&str]) -> IndiResult<()> {
        let mut v = lock(&self.port);
        ctx.update_text(&mut v, texts, names)?;
        self.port_path = v.texts[0].text.clone();
        v.state = PropertyState::Ok;
        ctx.set_text(&v, None)
    }

    fn on_position(&mut self, ctx: &IndiContext, values: &[f64], names: &[&str]) -> IndiResult<()> {
        // Validate through the vector, but keep showing the current
        // position until the controller reports the new one.
        let target = {
            let mut v = lock(&self.position);
            let current = v.numbers[0].value;
            ctx.update_number(&mut v, values, names)?;
            let target = v.numbers[0].value.round();
            v.numbers[0].value = current;
            target
        };

        let Some(link) = self.link.as_mut() else {
            let mut v = lock(&self.position);
            v.state = PropertyState::Alert;
            return ctx.set_number(&v, Some("RoboFocus is not connected."));
        };
        let sent = link.goto(target as u32);

        let mut v = lock(&self.position);
        match sent {
            Ok(()) => {
                self.target = Some(target);
                v.state = PropertyState::Busy;
                ctx.set_number(&v, Some(&format!("Moving to {}...", target)))?;
                drop(v);
                self.set_moving(ctx, true)
            }
            Err(e) => {
                v.state = PropertyState::Alert;
                ctx.set_number(&v, Some(&format!("Goto failed: {}", e)))
            }
        }
    }

    fn on_abort(
        &mut self,
        ctx: &IndiContext,
        states: &[SwitchState],
        names: &[&str],
    ) -> IndiResult<()> {
        let requested = {
            let mut v = lock(&self.abort);
            ctx.update_switch(&mut v, states, names)?;
            v.find_on_switch().is_some()
        };
        let outcome = match (requested, self.link.as_mut()) {
            (false, _) => Ok(()),
            (true, Some(link)) => link.abort().map_err(|e| e.to_string()),
            (true, None) => Err("RoboFocus is not connected.".to_string()),
        };

        let mut v = lock(&self.abort);
        v.reset();
        match outcome {
            Ok(()) => {
                v.state = if requested {
                    PropertyState::Ok
                } else {
                    PropertyState::Idle
                };
                ctx.set_switch(&v, requested.then_some("Focuser aborted."))?;
                drop(v);
                if requested {
                    self.target = None;
                    {
                        let mut p = lock(&self.position);
                        p.state = PropertyState::Idle;
                        ctx.set_number(&p, None)?;
                    }
                    self.set_moving(ctx, false)?;
                }
                Ok(())
            }
            Err(msg) => {
                v.state = PropertyState::Alert;
                ctx.set_switch(&v, Some(&msg))
            }
        }
    }

    fn on_config_process(
        &mut self,
        ctx: &IndiContext,
        states: &[SwitchState],
        names: &[&str],
    ) -> IndiResult<()> {
        let action = {
            let mut v = lock(&self.config_process);
            ctx.update_switch(&mut v, states, names)?;
            v.find_on_switch().map(|s| s.name.clone())
        };

        let result = match action.as_deref() {
            Some(CONFIG_LOAD) => {
                let file = self.config.clone();
                self.load_config(ctx, &file, None, false)
            }
            Some(CONFIG_SAVE) => self.save_config(ctx),
            Some(CONFIG_DEFAULT) => {
                let file = self.config.defaults();
                self.load_config(ctx, &file, None, false)
            }
            Some(CONFIG_PURGE) => self.config.purge(),
            _ => Ok(()),
        };

        let mut v = lock(&self.config_process);
        v.reset();
        match result {
            Ok(()) => {
                v.state = PropertyState::Ok;
                ctx.set_switch(&v, None)
            }
            Err(e) => {
                v.state = PropertyState::Alert;
                ctx.set_switch(&v, Some(&e.to_string()))
            }
        }
    }
}

impl Driver for RoboFocus {
    fn get_properties(&mut self, ctx: &IndiContext, device: Option<&str>) -> IndiResult<()> {
        if device.is_some_and(|d| d != self.device) {
            return Ok(());
        }
        ctx.def_switch(&self.connection, None)?;
        ctx.def_text(&self.port, None)?;
        ctx.def_switch(&self.config_process, None)?;
        ctx.def_light(&self.status, None)?;
        if self.is_connected() {
            self.define_focuser(ctx)?;
        }

        if !self.config_loaded {
            self.config_loaded = true;
            let file = self.config.clone();
            if let Err(e) = self.load_config(ctx, &file, Some(DEVICE_PORT), true) {
                tracing::debug!("No saved port: {}", e);
            }
        }
        Ok(())
    }

    fn new_switch(
        &mut self,
        ctx: &IndiContext,
        device: &str,
        name: &str,
        states: &[SwitchState],
        names: &[&str],
    ) -> IndiResult<()> {
        match self.table.switch(device, name) {
            Some(handler) => handler(self, ctx, states, names),
            None => Ok(()),
        }
    }

    fn new_number(
        &mut self,
        ctx: &IndiContext,
        device: &str,
        name: &str,
        values: &[f64],
        names: &[&str],
    ) -> IndiResult<()> {
        match self.table.number(device, name) {
            Some(handler) => handler(self, ctx, values, names),
            None => Ok(()),
        }
    }

    fn new_text(
        &mut self,
        ctx: &IndiContext,
        device: &str,
        name: &str,
        texts: &[&str],
        names: &[&str],
    ) -> IndiResult<()> {
        match self.table.text(device, name) {
            Some(handler) => handler(self, ctx, texts, names),
            None => Ok(()),
        }
    }

    fn timer_fired(&mut self, ctx: &IndiContext, id: TimerId) -> IndiResult<()> {
        if self.poll != Some(id) {
            tracing::debug!("Ignoring stale timer {:?}", id);
            return Ok(());
        }
        self.refresh(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestar_indi::xml::parse_elements;
    use lodestar_indi::{IndiError, SharedBuffer};
    use std::io::{Read, Write};

    struct Harness {
        ctx: IndiContext,
        out: SharedBuffer,
        driver: RoboFocus,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let options = DriverOptions {
                config_file: Some(dir.path().join("robofocus.xml")),
                ..Default::default()
            };
            let out = SharedBuffer::new();
            let ctx = IndiContext::new(out.clone());
            let mut driver = RoboFocus::new(&options, None, true).unwrap();
            driver.get_properties(&ctx, None).unwrap();
            out.take();
            Self {
                ctx,
                out,
                driver,
                _dir: dir,
            }
        }

        fn send(&mut self, xml: &str) -> IndiResult<()> {
            let root = parse_elements(xml).unwrap().remove(0);
            Dispatcher::new().dispatch(&self.ctx, &mut self.driver, &root)
        }

        fn switch(&mut self, property: &str, member: &str) -> IndiResult<()> {
            self.send(&format!(
                "<newSwitchVector device='RoboFocus' name='{}'><oneSwitch name='{}'>On</oneSwitch></newSwitchVector>",
                property, member
            ))
        }

        fn goto(&mut self, target: &str) -> IndiResult<()> {
            self.send(&format!(
                "<newNumberVector device='RoboFocus' name='ABS_FOCUS_POSITION'>\
                 <oneNumber name='FOCUS_ABSOLUTE_POSITION'>{}</oneNumber></newNumberVector>",
                target
            ))
        }

        fn connected() -> Self {
            let mut h = Self::new();
            h.switch(CONNECTION, CONNECT).unwrap();
            h
        }

        fn position(&self) -> (f64, PropertyState) {
            let v = lock(&self.driver.position);
            (v.numbers[0].value, v.state)
        }
    }

    /// A line that accepts writes and never answers.
    struct DeadPort;

    impl Read for DeadPort {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::TimedOut))
        }
    }

    impl Write for DeadPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SerialIo for DeadPort {
        fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }

        fn flush_io(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_command_frames() {
        let frame = command("FG", 1500);
        assert_eq!(&frame[..8], b"FG001500");
        assert!(verify_checksum(&frame));

        let reply = Reply::parse(&command("FD", 1500)).unwrap();
        assert_eq!(&reply.code, b"FD");
        assert_eq!(reply.value(b"FD").unwrap(), 1500.0);
        assert!(reply.value(b"FT").is_err());
        assert!(Reply::parse(b"XD0015000").is_err());
        assert!((half_kelvin_to_celsius(586.0) - 19.85).abs() < 1e-9);
    }

    #[test]
    fn test_get_properties_defines_base_vectors() {
        let h = Harness::new();
        assert!(h.ctx.find_property(DEVICE_NAME, CONNECTION).is_some());
        assert!(h.ctx.find_property(DEVICE_NAME, DEVICE_PORT).is_some());
        assert!(h.ctx.find_property(DEVICE_NAME, CONFIG_PROCESS).is_some());
        assert_eq!(
            h.ctx.find_property(DEVICE_NAME, FOCUS_STATUS).unwrap().perm,
            Permission::ReadOnly
        );
        assert!(h.ctx.find_property(DEVICE_NAME, ABS_FOCUS_POSITION).is_none());
    }

    #[test]
    fn test_get_properties_for_other_device() {
        let mut h = Harness::new();
        h.driver.get_properties(&h.ctx, Some("Mount")).unwrap();
        assert!(h.out.take().is_empty());
    }

    #[test]
    fn test_connect_in_simulation() {
        let h = Harness::connected();
        assert!(h.driver.is_connected());
        assert!(h.driver.poll_timer().is_some());

        let out = h.out.contents();
        assert!(out.contains("RoboFocus is online."));
        assert!(out.contains("<defNumberVector device='RoboFocus' name='ABS_FOCUS_POSITION'"));
        assert!(out.contains("<defTextVector device='RoboFocus' name='FIRMWARE_INFO'"));
        assert_eq!(lock(&h.driver.firmware).texts[0].text, "003.10");
        assert_eq!(h.position(), (1000.0, PropertyState::Ok));
        let t = lock(&h.driver.temperature);
        assert!((t.numbers[0].value - 19.85).abs() < 1e-9);
        assert_eq!(t.state, PropertyState::Ok);
    }

    #[test]
    fn test_goto_completes_on_poll() {
        let mut h = Harness::connected();
        h.out.take();

        h.goto("1500").unwrap();
        let out = h.out.take();
        assert!(out.contains("state='Busy'"));
        assert!(out.contains("Moving to 1500..."));
        assert_eq!(h.position(), (1000.0, PropertyState::Busy));

        let poll = h.driver.poll_timer().unwrap();
        h.driver.timer_fired(&h.ctx, poll).unwrap();
        assert_eq!(h.position(), (1500.0, PropertyState::Ok));
        assert!(h.driver.target.is_none());
        assert_eq!(lock(&h.driver.status).lights[0].state, PropertyState::Idle);
    }

    #[test]
    fn test_goto_out_of_range_rejected() {
        let mut h = Harness::connected();
        h.out.take();
        assert!(h.goto("70000").is_err());
        let out = h.out.take();
        assert!(out.contains("state='Alert'"));
        assert!(out.contains("Valid range is from 0 to 64000"));
        assert_eq!(h.position().0, 1000.0);
        assert!(h.driver.target.is_none());
    }

    #[test]
    fn test_goto_while_disconnected() {
        let mut h = Harness::new();
        let position = h.driver.position.clone();
        h.ctx.def_number(&position, None).unwrap();
        h.goto("100").unwrap();
        assert!(h.out.take().contains("RoboFocus is not connected."));
        assert_eq!(h.position().1, PropertyState::Alert);
    }

    #[test]
    fn test_temperature_is_read_only() {
        let mut h = Harness::connected();
        let err = h
            .send("<newNumberVector device='RoboFocus' name='FOCUS_TEMPERATURE'><oneNumber name='TEMPERATURE'>5</oneNumber></newNumberVector>")
            .unwrap_err();
        assert!(matches!(err, IndiError::ReadOnly { .. }));
    }

    #[test]
    fn test_abort_stops_motion() {
        let mut h = Harness::connected();
        h.goto("3000").unwrap();
        h.out.take();

        h.switch(FOCUS_ABORT_MOTION, ABORT).unwrap();
        let out = h.out.take();
        assert!(out.contains("Focuser aborted."));
        assert_eq!(h.position().1, PropertyState::Idle);
        assert!(h.driver.target.is_none());
        assert_eq!(lock(&h.driver.abort).switches[0].state, SwitchState::Off);
    }

    #[test]
    fn test_serial_failure_sets_alert_and_keeps_value() {
        let mut h = Harness::connected();
        h.driver.link = Some(Link::new(Tty::boxed("dead", DeadPort), Duration::from_millis(10)));
        h.out.take();

        let poll = h.driver.poll_timer().unwrap();
        h.driver.timer_fired(&h.ctx, poll).unwrap();
        assert_eq!(h.position(), (1000.0, PropertyState::Alert));
        let out = h.out.take();
        assert!(out.contains("Position read failed: Timeout error"));
        assert!(out.contains("Temperature read failed: Timeout error"));
        assert!((lock(&h.driver.temperature).numbers[0].value - 19.85).abs() < 1e-9);
    }

    #[test]
    fn test_slow_move_stays_busy() {
        let mut h = Harness::connected();
        h.goto("3000").unwrap();
        h.driver.link = Some(Link::new(Tty::boxed("dead", DeadPort), Duration::from_millis(10)));
        h.out.take();

        let poll = h.driver.poll_timer().unwrap();
        h.driver.timer_fired(&h.ctx, poll).unwrap();
        assert_eq!(h.position(), (1000.0, PropertyState::Busy));
        assert_eq!(h.driver.target, Some(3000.0));
        assert!(!h.out.take().contains("Position read failed"));
        assert_eq!(lock(&h.driver.status).lights[0].state, PropertyState::Busy);
    }

    #[test]
    fn test_disconnect_deletes_focuser_properties() {
        let mut h = Harness::connected();
        let poll = h.driver.poll_timer().unwrap();
        h.out.take();

        h.switch(CONNECTION, DISCONNECT).unwrap();
        assert!(!h.driver.is_connected());
        assert!(h.ctx.remaining_timer(poll).is_none());
        let out = h.out.take();
        assert!(out.contains("<delProperty device='RoboFocus' name='ABS_FOCUS_POSITION'"));
        assert!(out.contains("RoboFocus is offline."));
    }

    #[test]
    fn test_config_save_load_purge() {
        let mut h = Harness::new();
        h.send(
            "<newTextVector device='RoboFocus' name='DEVICE_PORT'><oneText name='PORT'>/dev/ttyS1</oneText></newTextVector>",
        )
        .unwrap();
        h.switch(CONFIG_PROCESS, CONFIG_SAVE).unwrap();
        assert!(h.driver.config().exists());
        assert!(h.driver.config().default_path().exists());
        assert!(h.out.take().contains("[INFO] Device configuration saved."));

        h.send(
            "<newTextVector device='RoboFocus' name='DEVICE_PORT'><oneText name='PORT'>/dev/ttyS9</oneText></newTextVector>",
        )
        .unwrap();
        h.switch(CONFIG_PROCESS, CONFIG_LOAD).unwrap();
        assert_eq!(h.driver.port_path(), "/dev/ttyS1");
        assert!(h.out.take().contains("[INFO] Device configuration applied."));

        h.switch(CONFIG_PROCESS, CONFIG_PURGE).unwrap();
        assert!(!h.driver.config().exists());
        assert_eq!(lock(&h.driver.config_process).state, PropertyState::Ok);

        h.switch(CONFIG_PROCESS, CONFIG_PURGE).unwrap();
        assert_eq!(lock(&h.driver.config_process).state, PropertyState::Alert);
        assert!(h.out.take().contains("Unable to purge configuration file"));
    }

    #[test]
    fn test_saved_port_applied_on_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("robofocus.xml");
        std::fs::write(
            &path,
            "<INDIDriver>\n<newTextVector device='RoboFocus' name='DEVICE_PORT'>\n  <oneText name='PORT'>\n      /dev/ttyACM0\n  </oneText>\n</newTextVector>\n</INDIDriver>\n",
        )
        .unwrap();
        let options = DriverOptions {
            config_file: Some(path),
            ..Default::default()
        };
        let ctx = IndiContext::new(SharedBuffer::new());
        let mut driver = RoboFocus::new(&options, None, true).unwrap();
        driver.get_properties(&ctx, None).unwrap();
        assert_eq!(driver.port_path(), "/dev/ttyACM0");
    }

    #[tokio::test]
    async fn test_runs_under_event_loop() {
        let dir = tempfile::tempdir().unwrap();
        let options = DriverOptions {
            config_file: Some(dir.path().join("robofocus.xml")),
            ..Default::default()
        };
        let out = SharedBuffer::new();
        let ctx = IndiContext::new(out.clone());
        let mut driver = RoboFocus::new(&options, None, true).unwrap();
        let input: &'static [u8] = b"<getProperties version='1.7'/>\
            <newSwitchVector device='RoboFocus' name='CONNECTION'><oneSwitch name='CONNECT'>On</oneSwitch></newSwitchVector>";

        let err = lodestar_indi::run(
            &ctx,
            &mut driver,
            tokio::io::BufReader::new(input),
            &Dispatcher::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IndiError::Eof));
        assert!(driver.is_connected());
        let out = out.contents();
        assert!(out.contains("<defSwitchVector device='RoboFocus' name='CONNECTION'"));
        assert!(out.contains("RoboFocus is online."));
    }
}
