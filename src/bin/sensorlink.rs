use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sensorlink_proto::master::{Master, Timing};
use sensorlink_proto::session::View;
use sensorlink_proto::transport::serial::open_port;
use sensorlink_proto::wake::{DtrWake, WakeSignal};
use sensorlink_proto::{
    Decision, Mode, Operator, Outcome, Record, RecordSink, ValidationError, DEFAULT_BAUD_RATE,
};

#[derive(Parser, Debug)]
#[command(name = "sensorlink")]
#[command(about = "Request readings from, and configure, a serial sensor node")]
struct Cli {
    /// Serial port the node is attached to
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    port: String,

    #[arg(short, long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Seconds to wait for initial data, editing included
    #[arg(long, default_value_t = 60)]
    exchange_timeout: u64,

    /// Seconds to wait for a commit to be acknowledged
    #[arg(long, default_value_t = 60)]
    commit_timeout: u64,

    /// Drive the node's wake input from the DTR line
    #[arg(long)]
    dtr_wake: bool,

    /// CSV file completed readings are appended to
    #[arg(short, long, default_value = "sensor_data.csv")]
    output: PathBuf,
}

#[derive(Debug)]
enum Wake {
    Off,
    Dtr(DtrWake),
}

impl WakeSignal for Wake {
    type Error = serialport::Error;

    fn assert_wake(&mut self) -> Result<(), Self::Error> {
        match self {
            Wake::Off => Ok(()),
            Wake::Dtr(dtr) => dtr.assert_wake(),
        }
    }

    fn release_wake(&mut self) -> Result<(), Self::Error> {
        match self {
            Wake::Off => Ok(()),
            Wake::Dtr(dtr) => dtr.release_wake(),
        }
    }
}

fn read_input(prompt: &str) -> io::Result<Option<String>> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_owned()))
}

fn show(view: &View<'_>) {
    match view {
        View::Config(config) => {
            println!("Sensors (select to toggle):");
            for (i, sensor) in config.iter().enumerate() {
                let state = if sensor.enabled() { "on" } else { "off" };
                println!("  {}. {} [{}]", i + 1, sensor.name(), state);
            }
        }
        View::Sensors(sensors) => {
            println!("Calibration:");
            for (i, sensor) in sensors.iter().enumerate() {
                println!("  {}. {}", i + 1, sensor.name());
            }
        }
        View::Parameters(sensor) => {
            println!("{}:", sensor.name());
            for (i, param) in sensor.parameters().iter().enumerate() {
                println!("  {}. {} = {}", i + 1, param.name(), param.value());
            }
        }
        View::Value(sensor, param) => {
            println!("{} / {} = {}", sensor.name(), param.name(), param.value());
        }
    }
}

/// Operator reading decisions from the terminal.
struct StdinOperator;

impl Operator for StdinOperator {
    fn decide(&mut self, view: View<'_>, rejected: Option<&ValidationError>) -> Decision {
        if let Some(e) = rejected {
            println!("{}", e);
        }
        show(&view);
        let prompt = match view {
            View::Value(..) => "new value, back > ",
            _ => "number, back, save, cancel > ",
        };
        loop {
            match read_input(prompt) {
                Ok(Some(input)) => match view.interpret(&input) {
                    Ok(decision) => return decision,
                    Err(e) => println!("{}", e),
                },
                Ok(None) | Err(_) => return Decision::Cancel,
            }
        }
    }
}

/// Prints completed readings as aligned name/value columns.
struct StdoutSink;

impl RecordSink for StdoutSink {
    type Error = io::Error;

    fn append(&mut self, record: &Record) -> Result<(), Self::Error> {
        let mut out = io::stdout().lock();
        for (field, value) in record.fields().iter().zip(record.values()) {
            writeln!(out, "{:>12}  {}", field, value)?;
        }
        Ok(())
    }
}

/// Appends readings to a CSV file, with a header row on a new file.
/// A file whose header doesn't match the record is moved aside first.
#[derive(Debug)]
struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn header(&self) -> Result<Option<csv::StringRecord>, csv::Error> {
        if !self.path.exists() {
            return Ok(None);
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)?;
        reader.records().next().transpose()
    }

    fn rotate(&self) -> io::Result<PathBuf> {
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("readings");
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let rotated = self.path.with_file_name(format!("{}-{}.csv", stem, stamp));
        fs::rename(&self.path, &rotated)?;
        Ok(rotated)
    }
}

impl RecordSink for CsvSink {
    type Error = csv::Error;

    fn append(&mut self, record: &Record) -> Result<(), Self::Error> {
        let write_header = match self.header()? {
            None => true,
            Some(header) if header.iter().eq(record.fields()) => false,
            Some(_) => {
                let rotated = self.rotate()?;
                log::info!("Sensor set changed, previous data moved to {}", rotated.display());
                true
            }
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::Writer::from_writer(file);
        if write_header {
            writer.write_record(record.fields())?;
        }
        writer.write_record(record.values())?;
        writer.flush()?;
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let transport = open_port(&cli.port, cli.baud)
        .with_context(|| format!("Failed to open {}", cli.port))?;
    let wake = if cli.dtr_wake {
        Wake::Dtr(DtrWake(transport.try_clone_port()?))
    } else {
        Wake::Off
    };
    let timing = Timing::default()
        .with_exchange_timeout(Duration::from_secs(cli.exchange_timeout))
        .with_commit_timeout(Duration::from_secs(cli.commit_timeout));
    let mut master = Master::new(transport, wake, timing);
    let mut csv_sink = CsvSink::new(cli.output);

    while let Some(command) = read_input("req, config, calib, quit > ")? {
        let mode = match command.to_ascii_lowercase().as_str() {
            "req" => Mode::Readings,
            "config" => Mode::Config,
            "calib" => Mode::Calibration,
            "quit" | "exit" => break,
            "" => continue,
            other => {
                println!("Unknown command {:?}", other);
                continue;
            }
        };
        match master.run(mode, &mut StdinOperator) {
            Ok(Outcome::Readings(readings)) => {
                let record = readings.record();
                StdoutSink.append(&record)?;
                csv_sink
                    .append(&record)
                    .with_context(|| format!("Failed to write {}", csv_sink.path.display()))?;
            }
            Ok(Outcome::Saved) => println!("Changes saved"),
            Ok(Outcome::Cancelled) => println!("Changes cancelled"),
            Err(e) => println!("{}", e),
        }
    }
    Ok(())
}
