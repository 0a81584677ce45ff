use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use modbus_exec_lib::admission::AdmissionController;
use modbus_exec_lib::params::Value;
use modbus_exec_lib::protocol::Operation;
use modbus_exec_lib::retry::RetryPolicy;
use std::time::Duration;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

fn parse_operation(s: &str) -> Result<Operation, String> {
    s.parse()
}

/// Parses a `name=value` request field. The value is taken as a bool,
/// integer or float when it parses as one, and as a string otherwise.
fn parse_field(s: &str) -> Result<(String, Value), String> {
    let (name, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{s}'"))?;
    if name.is_empty() {
        return Err(format!("field name missing in '{s}'"));
    }
    let value = if let Ok(state) = raw.parse::<bool>() {
        Value::Bool(state)
    } else if let Ok(n) = raw.parse::<i64>() {
        Value::Int(n)
    } else if let Ok(x) = raw.parse::<f64>() {
        Value::Float(x)
    } else {
        Value::Str(raw.to_owned())
    };
    Ok((name.to_owned(), value))
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliConnection {
    /// Execute operations against a device via Modbus TCP.
    Tcp {
        /// The IP address and port of the Modbus TCP device.
        /// Example: "192.168.1.100:502".
        address: String,

        /// Unit ID to address, for gateways that front a serial bus.
        #[arg(short, long)]
        unit: Option<u8>,

        /// TCP-specific commands for the connected device.
        #[command(subcommand)]
        command: CliCommands,
    },
    /// Execute operations against a device via Modbus RTU (Serial).
    Rtu {
        /// Serial port device name.
        /// Examples: "/dev/ttyUSB0" (Linux), "COM3" (Windows).
        #[arg(short, long, default_value_t = default_device_name())]
        device: String,

        /// Baud rate for serial communication.
        /// Must match the device's configured baud rate.
        #[arg(long, default_value_t = 9600)]
        baud_rate: u32,

        /// The Modbus RTU device address, ranging from 1 to 247.
        #[arg(short, long, default_value_t = 1)]
        address: u8,

        /// RTU-specific commands for the connected device.
        #[command(subcommand)]
        command: CliCommands,
    },
}

/// The operation to run and the expressions feeding it.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct OperationArgs {
    /// The operation to execute, e.g. "read_coils" or "write_single_register".
    #[arg(value_parser = parse_operation)]
    pub operation: Operation,

    /// Expression yielding the starting address.
    /// May refer to request fields, e.g. "base + 2".
    #[arg(long, default_value = "0", verbatim_doc_comment)]
    pub address: String,

    /// Expression yielding the write value(s); required by write operations.
    /// Multi-target writes take a sequence, e.g. "(1, 2, 3)".
    #[arg(long, verbatim_doc_comment)]
    pub value: Option<String>,

    /// Number of coils/registers to read.
    #[arg(long)]
    pub count: Option<u16>,

    /// Request fields available to expressions, as name=value pairs.
    /// May be given multiple times.
    #[arg(long = "field", value_parser = parse_field, verbatim_doc_comment)]
    pub fields: Vec<(String, Value)>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Execute the operation once and print the result as a JSON line.
    Exec {
        #[command(flatten)]
        operation: OperationArgs,
    },

    /// Poll the operation at a fixed interval, printing one JSON line per
    /// result.
    Daemon {
        /// Interval between polls (e.g. "10s", "1m").
        #[arg(value_parser = humantime::parse_duration, short, long, default_value = "2sec")]
        poll_interval: Duration,

        #[command(flatten)]
        operation: OperationArgs,
    },

    /// Run with every engine setting taken from a YAML configuration file.
    /// The connection above still selects the transport; the file provides
    /// operation, expressions, retry and admission settings.
    #[clap(verbatim_doc_comment)]
    Run {
        /// The engine configuration file.
        config_file: String,

        /// Interval between batches. A single batch is processed when absent.
        #[arg(value_parser = humantime::parse_duration, long)]
        poll_interval: Option<Duration>,
    },
}

const fn about_text() -> &'static str {
    "mbexec - issue Modbus read/write operations against remote devices via RTU/TCP."
}

#[derive(Parser, Debug)]
#[command(name="mbexec", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is off.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    /// Specifies the connection method and device-specific commands.
    #[command(subcommand)]
    pub connection: CliConnection,

    /// Modbus I/O timeout for a single wire exchange.
    /// Examples: "1s", "500ms".
    #[arg(global = true, long, default_value = "500ms", value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Duration,

    /// Number of retries before the engine enters its error state.
    #[arg(global = true, long, default_value_t = RetryPolicy::DEFAULT_MAX_RETRIES)]
    pub retries: u32,

    /// Retry failed operations forever instead of erroring out; once
    /// --retries attempts are exceeded, wait one minute between attempts.
    #[arg(global = true, long, verbatim_doc_comment)]
    pub retry_forever: bool,

    /// Do not retry at all; log failures and keep going.
    #[arg(global = true, long, conflicts_with = "retry_forever")]
    pub continue_on_fail: bool,

    /// Maximum number of operations in flight at once.
    #[arg(global = true, long, default_value_t = AdmissionController::DEFAULT_CAPACITY)]
    pub capacity: usize,
}

impl CliArgs {
    /// The retry policy selected by the retry flags.
    pub fn retry_policy(&self) -> RetryPolicy {
        if self.continue_on_fail {
            RetryPolicy::ContinueOnFail
        } else if self.retry_forever {
            RetryPolicy::Forever {
                long_delay_after: self.retries,
                long_delay: RetryPolicy::DEFAULT_LONG_DELAY,
            }
        } else {
            RetryPolicy::Bounded {
                max_retries: self.retries,
            }
        }
    }
}
