//! Line based serial command terminal.
//!
//! Commands:
//! - `help` - Print help
//! - `status` - Current temperature, target, heater state and operation
//! - `config` - Print the control configuration
//! - `set <brew|steam|kp|ki|kd|interval> <value>` - Change one setting and save it
//! - `mode <pid|hysteresis>` - Select the control strategy
//! - `brew` / `steam` - Select the target temperature
//! - `heater [toggle]` - Get the heater state or toggle it by hand
//! - `autotune <start|stop|save|status>` - Control relay autotuning
//! - `temp` - Most recent reading
//! - `dump temps` - All recent readings
//! - `reset` - Reset the MCU

use core::fmt::Write;

use heapless::{Deque, Vec};
use num_traits::AsPrimitive;

use crate::{
    autotune::Outcome,
    boiler::Boiler,
    config::{ConfigError, ConfigField, ConfigUpdate, ControlMode, Gains},
    heater::Heater,
    state::BoilerMode,
    storage::{settings::SettingsStore, History, Record},
    thermometer::{Temperature, Thermocouple},
    Duration, Instant,
};

pub const BUFFER_SIZE: usize = 32;
const OK_STR: &str = "<ok>\r\n";

const HELP_STR: &str = "Commands:\r
    help\r
    status\r
    config\r
    set <brew|steam|kp|ki|kd|interval> <value>\r
    mode <pid|hysteresis>\r
    brew\r
    steam\r
    heater [toggle]\r
    autotune <start|stop|save|status>\r
    temp\r
    dump temps\r
    reset\r
";

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AutotuneCommand {
    Start,
    /// Stop and discard
    Stop,
    /// Stop and keep the gains found so far
    Save,
    Status,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Command {
    Help,
    Status,
    Config,
    Set(ConfigUpdate),
    Mode(ControlMode),
    Boiler(BoilerMode),
    Heater { toggle: bool },
    Autotune(AutotuneCommand),
    Temp,
    DumpTemps,
    Reset,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ParseError<'a> {
    UnknownCommand(&'a [u8]),
    UnknownArgument(&'a [u8]),
    MissingArgument,
    InvalidNumber(&'a [u8]),
}

/// Parses one line. Returns `Ok(None)` for a blank line.
pub fn parse(line: &[u8]) -> Result<Option<Command>, ParseError<'_>> {
    let mut args = line.split(|b| is_whitespace(*b)).filter(|a| !a.is_empty());

    let Some(cmd) = args.next() else {
        return Ok(None);
    };

    let cmd = match cmd {
        b"help" => Command::Help,
        b"status" => Command::Status,
        b"config" => Command::Config,
        b"set" => {
            let field = match args.next().ok_or(ParseError::MissingArgument)? {
                b"brew" => ConfigField::BrewTemp,
                b"steam" => ConfigField::SteamTemp,
                b"kp" => ConfigField::Kp,
                b"ki" => ConfigField::Ki,
                b"kd" => ConfigField::Kd,
                b"interval" => ConfigField::SampleInterval,
                b => return Err(ParseError::UnknownArgument(b)),
            };
            let value = args.next().ok_or(ParseError::MissingArgument)?;
            Command::Set(update(field, value)?)
        }
        b"mode" => match args.next().ok_or(ParseError::MissingArgument)? {
            b"pid" => Command::Mode(ControlMode::Pid),
            b"hysteresis" => Command::Mode(ControlMode::Hysteresis),
            b => return Err(ParseError::UnknownArgument(b)),
        },
        b"brew" => Command::Boiler(BoilerMode::Brew),
        b"steam" => Command::Boiler(BoilerMode::Steam),
        b"heater" => match args.next() {
            None => Command::Heater { toggle: false },
            Some(b"toggle") => Command::Heater { toggle: true },
            Some(b) => return Err(ParseError::UnknownArgument(b)),
        },
        b"autotune" => match args.next().ok_or(ParseError::MissingArgument)? {
            b"start" => Command::Autotune(AutotuneCommand::Start),
            b"stop" => Command::Autotune(AutotuneCommand::Stop),
            b"save" => Command::Autotune(AutotuneCommand::Save),
            b"status" => Command::Autotune(AutotuneCommand::Status),
            b => return Err(ParseError::UnknownArgument(b)),
        },
        b"temp" => Command::Temp,
        b"dump" => match args.next().ok_or(ParseError::MissingArgument)? {
            b"temps" => Command::DumpTemps,
            b => return Err(ParseError::UnknownArgument(b)),
        },
        b"reset" => Command::Reset,
        b => return Err(ParseError::UnknownCommand(b)),
    };

    Ok(Some(cmd))
}

fn update(field: ConfigField, value: &[u8]) -> Result<ConfigUpdate, ParseError<'_>> {
    let invalid = || ParseError::InvalidNumber(value);
    let text = core::str::from_utf8(value).map_err(|_| invalid())?;

    let mut update = ConfigUpdate::default();
    if field == ConfigField::SampleInterval {
        let ms: u64 = text.parse().map_err(|_| invalid())?;
        update.sample_interval = Some(Duration::millis(ms));
        return Ok(update);
    }

    let number: f32 = text.parse().map_err(|_| invalid())?;
    match field {
        ConfigField::BrewTemp | ConfigField::SteamTemp => {
            if !number.is_finite() {
                return Err(invalid());
            }
            let temp = Temperature::checked_from_num(number).ok_or_else(invalid)?;
            if field == ConfigField::BrewTemp {
                update.brew_temp = Some(temp);
            } else {
                update.steam_temp = Some(temp);
            }
        }
        ConfigField::Kp => update.kp = Some(number),
        ConfigField::Ki => update.ki = Some(number),
        ConfigField::Kd => update.kd = Some(number),
        ConfigField::SampleInterval => {}
    }
    Ok(update)
}

/// Runs a parsed command, writing the response to `tx`.
///
/// [`Command::Reset`] only prints; resetting the MCU is up to the caller.
#[cfg_attr(feature = "sizing", inline(never))]
pub fn execute<T, H, S, W, const N: usize>(
    cmd: Command,
    boiler: &mut Boiler<T, H, S>,
    history: &History<N>,
    tx: &mut W,
    now: Instant,
) -> core::fmt::Result
where
    T: Thermocouple,
    H: Heater,
    S: SettingsStore,
    W: Write,
{
    match cmd {
        Command::Help => tx.write_str(HELP_STR),
        Command::Status => print_status(tx, boiler),
        Command::Config => {
            let config = boiler.config();
            tx.write_str("brew ")?;
            print_temp(tx, config.brew_temp)?;
            tx.write_str("\r\nsteam ")?;
            print_temp(tx, config.steam_temp)?;
            tx.write_str("\r\n")?;
            print_gains(tx, config.gains)?;
            tx.write_str("mode ")?;
            tx.write_str(match config.mode {
                ControlMode::Hysteresis => "hysteresis",
                ControlMode::Pid => "pid",
            })?;
            tx.write_str("\r\ninterval ")?;
            print_uint(tx, config.sample_interval.to_millis())?;
            tx.write_str("\r\n")
        }
        Command::Set(update) => apply(tx, boiler, &update),
        Command::Mode(mode) => apply(
            tx,
            boiler,
            &ConfigUpdate {
                mode: Some(mode),
                ..ConfigUpdate::default()
            },
        ),
        Command::Boiler(mode) => {
            boiler.set_mode(mode);
            tx.write_str(OK_STR)
        }
        Command::Heater { toggle: false } => tx.write_str(on_off(boiler.status().heating)),
        Command::Heater { toggle: true } => match boiler.toggle_heating() {
            Ok(on) => tx.write_str(on_off(on)),
            Err(e) => print_line(tx, e.as_str()),
        },
        Command::Autotune(AutotuneCommand::Start) => match boiler.start_autotune(now) {
            Ok(()) => tx.write_str(OK_STR),
            Err(e) => print_line(tx, e.as_str()),
        },
        Command::Autotune(cmd @ (AutotuneCommand::Stop | AutotuneCommand::Save)) => {
            match boiler.stop_autotune(cmd == AutotuneCommand::Save) {
                None => print_line(tx, "AutoTune not running"),
                Some(Outcome::Complete(gains)) => {
                    tx.write_str("AutoTune complete\r\n")?;
                    print_gains(tx, gains)
                }
                Some(_) => print_line(tx, "AutoTune cancelled"),
            }
        }
        Command::Autotune(AutotuneCommand::Status) => {
            let status = boiler.autotune_status(now);
            tx.write_str("running ")?;
            tx.write_str(if status.running { "yes" } else { "no" })?;
            tx.write_str("\r\nelapsed ")?;
            print_uint(tx, status.elapsed.to_millis())?;
            tx.write_str("\r\ntimeout ")?;
            print_uint(tx, status.timeout.to_millis())?;
            tx.write_str("\r\ncycles ")?;
            print_uint(tx, status.cycles.as_())?;
            tx.write_str("\r\n")?;
            print_gains(tx, status.gains)
        }
        Command::Temp => match history.recent() {
            Some(record) => print_record(tx, record),
            None => tx.write_str("<missing>\r\n"),
        },
        Command::DumpTemps => {
            for record in history.oldest() {
                print_record(tx, record)?;
            }
            Ok(())
        }
        Command::Reset => tx.write_str("Resetting...\r\n"),
    }
}

/// Writes the error for a line that failed to parse
pub fn print_error<W: Write>(tx: &mut W, err: ParseError<'_>) -> core::fmt::Result {
    match err {
        ParseError::UnknownCommand(b) => print_quoted(tx, "Unknown command: '", b),
        ParseError::UnknownArgument(b) => print_quoted(tx, "Unknown argument: '", b),
        ParseError::InvalidNumber(b) => print_quoted(tx, "Invalid number: '", b),
        ParseError::MissingArgument => tx.write_str("Missing argument\r\n"),
    }
}

fn apply<T, H, S, W>(tx: &mut W, boiler: &mut Boiler<T, H, S>, update: &ConfigUpdate) -> core::fmt::Result
where
    T: Thermocouple,
    H: Heater,
    S: SettingsStore,
    W: Write,
{
    match boiler.set_config(update) {
        Ok(_) => tx.write_str(OK_STR),
        Err(e @ ConfigError::OutOfRange(field)) => {
            tx.write_str(e.as_str())?;
            tx.write_str(": ")?;
            print_line(tx, field.as_str())
        }
    }
}

fn print_status<T, H, S, W>(tx: &mut W, boiler: &Boiler<T, H, S>) -> core::fmt::Result
where
    T: Thermocouple,
    H: Heater,
    S: SettingsStore,
    W: Write,
{
    let status = boiler.status();

    tx.write_str("temp ")?;
    match (status.current, status.fault) {
        (_, Some(fault)) => tx.write_str(fault.as_str())?,
        (Some(temp), None) => print_temp(tx, temp)?,
        (None, None) => tx.write_str("<missing>")?,
    }
    tx.write_str("\r\ntarget ")?;
    print_temp(tx, status.target)?;
    tx.write_str("\r\nheater ")?;
    tx.write_str(on_off(status.heating))?;
    tx.write_str("operation ")?;
    print_line(tx, status.operation.as_str())
}

/// Splits a complete line off the front of the receive buffer
pub fn get_line(buffer: &mut Deque<u8, BUFFER_SIZE>) -> Option<Vec<u8, BUFFER_SIZE>> {
    // Find newline
    let idx = buffer.iter().position(|b| is_newline(*b))?;

    // Pop line from buffer
    let mut line = Vec::<_, BUFFER_SIZE>::new();
    for _ in 0..=idx {
        // SAFETY: idx is guaranteed to be valid in buffer
        // line is guaranteed to be large enough to hold idx + 1 bytes
        unsafe {
            let b = buffer.pop_front_unchecked();
            line.push_unchecked(b);
        }
    }

    Some(line)
}

#[inline]
pub const fn is_newline(b: u8) -> bool {
    b == b'\n' || b == b'\r'
}

#[inline]
pub const fn is_whitespace(b: u8) -> bool {
    b == b' ' || b == b'\n' || b == b'\r' || b == b'\t'
}

const fn on_off(on: bool) -> &'static str {
    if on {
        "on\r\n"
    } else {
        "off\r\n"
    }
}

fn print_line<W: Write>(tx: &mut W, str: &str) -> core::fmt::Result {
    tx.write_str(str)?;
    tx.write_str("\r\n")
}

fn print_quoted<W: Write>(tx: &mut W, prefix: &str, arg: &[u8]) -> core::fmt::Result {
    tx.write_str(prefix)?;
    for &b in arg {
        tx.write_char(if b.is_ascii_graphic() { b as char } else { '?' })?;
    }
    tx.write_str("'\r\n")
}

fn print_record<W: Write>(tx: &mut W, record: Record) -> core::fmt::Result {
    print_uint(tx, u64::from(record.secs()))?;
    tx.write_str(" ")?;
    print_temp(tx, record.value())?;
    tx.write_str("\r\n")
}

fn print_gains<W: Write>(tx: &mut W, gains: Gains) -> core::fmt::Result {
    for (name, gain) in [("kp ", gains.kp), ("ki ", gains.ki), ("kd ", gains.kd)] {
        tx.write_str(name)?;
        print_milli(tx, gain)?;
        tx.write_str("\r\n")?;
    }
    Ok(())
}

/// Prints a temperature with all four fractional digits
pub fn print_temp<W: Write>(tx: &mut W, temp: Temperature) -> core::fmt::Result {
    // Each 1/16 step is 625 ten-thousandths
    const STEP: u32 = 10u32.pow(Temperature::FRAC_NBITS) >> Temperature::FRAC_NBITS;

    let bits = temp.to_bits().unsigned_abs();
    let int_part = bits >> Temperature::FRAC_NBITS;
    let frac_part = (bits & ((1 << Temperature::FRAC_NBITS) - 1)) * STEP;

    trace!("int_part: {=u32}, frac_part: {=u32}", int_part, frac_part);

    if temp.is_negative() {
        tx.write_str("-")?;
    }
    print_uint(tx, u64::from(int_part))?;
    tx.write_str(".")?;
    print_padded(tx, u64::from(frac_part), Temperature::FRAC_NBITS as usize)
}

/// Prints a non-negative value rounded to three decimals
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn print_milli<W: Write>(tx: &mut W, value: f32) -> core::fmt::Result {
    // Saturating cast, NaN becomes 0
    let milli = (value * 1000.0 + 0.5) as u64;
    print_uint(tx, milli / 1000)?;
    tx.write_str(".")?;
    print_padded(tx, milli % 1000, 3)
}

pub fn print_uint<W: Write>(tx: &mut W, num: u64) -> core::fmt::Result {
    print_padded(tx, num, 1)
}

/// Prints `num` with leading zeros up to `width` digits
fn print_padded<W: Write>(tx: &mut W, mut num: u64, width: usize) -> core::fmt::Result {
    const BUF_SIZE: usize = 20;

    let mut buf = [b'0'; BUF_SIZE];
    let mut idx = 0;

    loop {
        let digit: u8 = (num % 10).as_();
        num /= 10;

        buf[BUF_SIZE - idx - 1] = b'0' + digit;
        idx += 1;

        if num == 0 {
            break;
        }
    }

    let idx = idx.max(width.min(BUF_SIZE));
    for &b in &buf[BUF_SIZE - idx..] {
        tx.write_char(b as char)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use heapless::String;

    use super::*;
    use crate::{
        heater::fake::FakeHeater, storage::settings::MemoryStore,
        thermometer::fake::FakeThermocouple,
    };

    type TestBoiler = Boiler<FakeThermocouple, FakeHeater, MemoryStore>;

    fn boiler(celsius: f32) -> TestBoiler {
        Boiler::new(
            FakeThermocouple::new(celsius),
            FakeHeater::default(),
            MemoryStore::new(),
        )
    }

    fn run(boiler: &mut TestBoiler, history: &History<4>, line: &[u8]) -> String<512> {
        let mut out = String::new();
        match parse(line) {
            Ok(Some(cmd)) => execute(cmd, boiler, history, &mut out, Instant::from_ticks(0)).unwrap(),
            Ok(None) => {}
            Err(e) => print_error(&mut out, e).unwrap(),
        }
        out
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse(b"  \r\n"), Ok(None));
        assert_eq!(parse(b"status\r"), Ok(Some(Command::Status)));
        assert_eq!(
            parse(b"mode  pid\n"),
            Ok(Some(Command::Mode(ControlMode::Pid)))
        );
        assert_eq!(
            parse(b"heater toggle\n"),
            Ok(Some(Command::Heater { toggle: true }))
        );
        assert_eq!(
            parse(b"autotune save\n"),
            Ok(Some(Command::Autotune(AutotuneCommand::Save)))
        );
        assert_eq!(
            parse(b"set kp 3.5\n"),
            Ok(Some(Command::Set(ConfigUpdate {
                kp: Some(3.5),
                ..ConfigUpdate::default()
            })))
        );
        assert_eq!(
            parse(b"set brew 94.25\n"),
            Ok(Some(Command::Set(ConfigUpdate {
                brew_temp: Some(Temperature::from_num(94.25)),
                ..ConfigUpdate::default()
            })))
        );
    }

    #[test]
    fn parse_errors() {
        assert_eq!(parse(b"bogus\n"), Err(ParseError::UnknownCommand(b"bogus")));
        assert_eq!(parse(b"set\n"), Err(ParseError::MissingArgument));
        assert_eq!(parse(b"set foo 1\n"), Err(ParseError::UnknownArgument(b"foo")));
        assert_eq!(parse(b"set kp x1\n"), Err(ParseError::InvalidNumber(b"x1")));
        assert_eq!(parse(b"set brew nan\n"), Err(ParseError::InvalidNumber(b"nan")));
        assert_eq!(
            parse(b"set interval -5\n"),
            Err(ParseError::InvalidNumber(b"-5"))
        );
    }

    #[test]
    fn set_and_print_config() {
        let mut boiler = boiler(20.0);
        let history = History::new();

        assert_eq!(run(&mut boiler, &history, b"set kp 3.5\n"), OK_STR);
        assert_eq!(boiler.config().gains.kp, 3.5);
        assert_eq!(boiler.store().saves(), 1);

        assert_eq!(
            run(&mut boiler, &history, b"set ki -1\n"),
            "Value out of range: ki\r\n"
        );

        assert_eq!(
            run(&mut boiler, &history, b"config\n"),
            "brew 93.0000\r\nsteam 150.0000\r\nkp 3.500\r\nki 5.000\r\nkd 1.000\r\n\
             mode hysteresis\r\ninterval 2000\r\n"
        );
    }

    #[test]
    fn status_and_heater() {
        let mut boiler = boiler(91.5);
        let history = History::new();
        assert_eq!(
            run(&mut boiler, &history, b"status\n"),
            "temp <missing>\r\ntarget 93.0000\r\nheater off\r\noperation Idle\r\n"
        );

        boiler.tick(Instant::from_ticks(0));
        run(&mut boiler, &history, b"steam\n");
        assert_eq!(
            run(&mut boiler, &history, b"status\n"),
            "temp 91.5000\r\ntarget 150.0000\r\nheater on\r\noperation Steaming\r\n"
        );
        assert_eq!(run(&mut boiler, &history, b"heater\n"), "on\r\n");
        assert_eq!(run(&mut boiler, &history, b"heater toggle\n"), "off\r\n");

        run(&mut boiler, &history, b"mode pid\n");
        assert_eq!(
            run(&mut boiler, &history, b"heater toggle\n"),
            "Manual control disabled in PID mode\r\n"
        );
    }

    #[test]
    fn autotune_commands() {
        let mut boiler = boiler(90.0);
        let history = History::new();

        assert_eq!(
            run(&mut boiler, &history, b"autotune stop\n"),
            "AutoTune not running\r\n"
        );
        assert_eq!(run(&mut boiler, &history, b"autotune start\n"), OK_STR);
        assert_eq!(
            run(&mut boiler, &history, b"autotune start\n"),
            "AutoTune already running\r\n"
        );
        assert_eq!(
            run(&mut boiler, &history, b"autotune status\n"),
            "running yes\r\nelapsed 0\r\ntimeout 600000\r\ncycles 0\r\n\
             kp 2.000\r\nki 5.000\r\nkd 1.000\r\n"
        );
        assert_eq!(
            run(&mut boiler, &history, b"autotune save\n"),
            "AutoTune cancelled\r\n"
        );
    }

    #[test]
    fn history_commands() {
        let mut boiler = boiler(20.0);
        let mut history = History::new();
        assert_eq!(run(&mut boiler, &history, b"temp\n"), "<missing>\r\n");

        history.write(Temperature::from_num(92.0625), Instant::from_ticks(1000));
        history.write(Temperature::from_num(-1.25), Instant::from_ticks(2000));

        assert_eq!(run(&mut boiler, &history, b"temp\n"), "2 -1.2500\r\n");
        assert_eq!(
            run(&mut boiler, &history, b"dump temps\n"),
            "1 92.0625\r\n2 -1.2500\r\n"
        );
    }

    #[test]
    fn unknown_input_is_echoed() {
        let mut boiler = boiler(20.0);
        let history = History::new();
        assert_eq!(
            run(&mut boiler, &history, b"brw\xff\n"),
            "Unknown command: 'brw?'\r\n"
        );
    }

    #[test]
    fn splits_lines() {
        let mut buffer = Deque::<u8, BUFFER_SIZE>::new();
        for &b in b"temp\nsta" {
            buffer.push_back(b).unwrap();
        }

        assert_eq!(get_line(&mut buffer).unwrap().as_slice(), b"temp\n");
        assert!(get_line(&mut buffer).is_none());
        assert_eq!(buffer.len(), 3);
    }
}
