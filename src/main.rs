//! mbexec - Modbus execution engine CLI
//!
//! A command-line tool for issuing Modbus read/write operations against
//! remote devices over Modbus RTU (serial) or Modbus TCP.
//!
//! This tool allows users to:
//! - Execute any of the standard read/write operations once, with address
//!   and value given as expressions over optional request fields.
//! - Run in a continuous daemon mode, polling the same operation at a fixed
//!   interval and printing one JSON line per result.
//! - Drive the engine from a YAML configuration file, including retry,
//!   backoff and admission settings.
//!
//! The CLI leverages the `modbus_exec_lib` crate for the operation catalog,
//! connection pooling and the retry/backoff engine.

use anyhow::{bail, Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use modbus_exec_lib::admission::AdmissionPolicy;
use modbus_exec_lib::config::EngineConfig;
use modbus_exec_lib::engine::{Engine, EngineStatus, OutputSink, RejectMode};
use modbus_exec_lib::params::{Request, Value};
use modbus_exec_lib::response::OperationOutcome;
use modbus_exec_lib::tokio_transport::{SerialConnector, TcpConnector};
use modbus_exec_lib::transport::Connect;
use std::panic;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

mod commandline;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

/// Prints each outcome as one JSON line on stdout and surfaces engine
/// status changes through the log.
struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn notify(&self, outcomes: Vec<OperationOutcome>) {
        for outcome in outcomes {
            match serde_json::to_string(&outcome) {
                Ok(line) => println!("{line}"),
                Err(err) => error!("Cannot serialize outcome: {err}"),
            }
        }
    }

    fn notify_status(&self, status: EngineStatus) {
        match status {
            EngineStatus::RetriesExhausted { device, error } => {
                error!("Engine halted: device '{device}' is out of retries: {error}");
            }
        }
    }
}

fn engine_config(
    args: &commandline::CliArgs,
    device: &str,
    operation: &commandline::OperationArgs,
) -> EngineConfig {
    EngineConfig {
        operation: operation.operation,
        device: device.to_owned(),
        device_expr: None,
        address: operation.address.clone(),
        value: operation.value.clone(),
        count: operation.count,
        retry: args.retry_policy(),
        admission: AdmissionPolicy::CountingDrop,
        capacity: args.capacity,
        reject_mode: RejectMode::Silent,
        attempt_timeout: Some(args.timeout),
        latch_cooldown: None,
    }
}

fn request_from_fields(fields: &[(String, Value)]) -> Request {
    let mut request = Request::new();
    for (name, value) in fields {
        request = request.with_field(name.clone(), value.clone());
    }
    request
}

/// Processes the same request over and over until the engine latches.
async fn poll_loop(engine: &Engine, request: &Request, interval: Duration) -> Result<()> {
    loop {
        engine.process(std::slice::from_ref(request)).await;
        if engine.latch().is_tripped() {
            engine.shutdown().await;
            bail!("Engine entered its error state; giving up");
        }
        tokio::time::sleep(interval).await;
    }
}

async fn run_once(engine: &Engine, request: &Request) -> Result<()> {
    engine.process(std::slice::from_ref(request)).await;
    let tripped = engine.latch().is_tripped();
    engine.shutdown().await;
    if tripped {
        bail!("Engine entered its error state");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    // 1. Initialize logging as early as possible
    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "mbexec started. Log level: {}",
        args.verbose.log_level_filter()
    );

    // 2. Select the transport from the connection subcommand
    let (connector, device, command): (Arc<dyn Connect>, String, &commandline::CliCommands) =
        match &args.connection {
            commandline::CliConnection::Tcp {
                address,
                unit,
                command,
            } => {
                let connector: Arc<dyn Connect> = match unit {
                    Some(unit) => Arc::new(TcpConnector::with_slave(*unit)),
                    None => Arc::new(TcpConnector::new()),
                };
                (connector, address.clone(), command)
            }
            commandline::CliConnection::Rtu {
                device,
                baud_rate,
                address,
                command,
            } => (
                Arc::new(SerialConnector::new(*baud_rate, *address)),
                device.clone(),
                command,
            ),
        };

    // 3. Execute the command
    match command {
        commandline::CliCommands::Exec { operation } => {
            info!("Executing: {} on {device}", operation.operation);
            let engine =
                engine_config(&args, &device, operation).build_engine(connector, Arc::new(ConsoleSink));
            run_once(&engine, &request_from_fields(&operation.fields)).await?;
        }
        commandline::CliCommands::Daemon {
            poll_interval,
            operation,
        } => {
            info!(
                "Starting daemon mode: {} on {device}, interval={poll_interval:?}",
                operation.operation
            );
            let engine =
                engine_config(&args, &device, operation).build_engine(connector, Arc::new(ConsoleSink));
            poll_loop(&engine, &request_from_fields(&operation.fields), *poll_interval).await?;
        }
        commandline::CliCommands::Run {
            config_file,
            poll_interval,
        } => {
            let config = EngineConfig::from_yaml_file(Path::new(config_file))
                .with_context(|| format!("Cannot load configuration from {config_file}"))?;
            info!(
                "Executing from {config_file}: {} on {}",
                config.operation, config.device
            );
            let engine = config.build_engine(connector, Arc::new(ConsoleSink));
            match poll_interval {
                Some(interval) => poll_loop(&engine, &Request::new(), *interval).await?,
                None => run_once(&engine, &Request::new()).await?,
            }
        }
    }

    Ok(())
}
