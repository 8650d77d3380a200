use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use serde::Serialize;

use mcuload_contracts::MCULOAD_LOAD_REPORT_SCHEMA_VERSION;
use mcuload_core::{
    fingerprint, BudgetPolicy, Channel, ExecutionSet, LoadError, LoadOptions, LoadState, Loader,
    RemoteTaskHandle, SimulatedDevice,
};

use crate::config::DeviceConfig;
use crate::device::ProcessChannel;
use crate::manifest::read_manifest;
use crate::report::write_json_stdout;

const IN_PROCESS_DEVICE: &str = "in-process-sim";

#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Analyzer manifest (JSON).
    #[arg(long, value_name = "PATH")]
    pub manifest: PathBuf,

    /// Device program speaking the framed protocol on stdin/stdout.
    /// Overrides MCULOAD_DEVICE_CMD; without either, an in-process simulated
    /// device is used.
    #[arg(long, value_name = "CMD")]
    pub device_cmd: Option<String>,

    /// Bytes available on the device. Overrides MCULOAD_MEMORY_BUDGET.
    #[arg(long, value_name = "BYTES")]
    pub memory_budget: Option<u64>,

    /// What to do when the estimate exceeds the budget.
    #[arg(long, value_enum, default_value_t = OverBudget::Warn)]
    pub over_budget: OverBudget,

    /// Memory capacity of the in-process simulated device.
    #[arg(long, value_name = "BYTES", conflicts_with = "device_cmd")]
    pub sim_capacity: Option<u64>,

    /// Invoke the entry point after loading and report its completion value.
    #[arg(long)]
    pub run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OverBudget {
    Warn,
    Abort,
}

impl From<OverBudget> for BudgetPolicy {
    fn from(v: OverBudget) -> Self {
        match v {
            OverBudget::Warn => BudgetPolicy::Warn,
            OverBudget::Abort => BudgetPolicy::Abort,
        }
    }
}

#[derive(Debug, Serialize)]
struct LoadReport {
    schema_version: &'static str,
    ok: bool,
    command: &'static str,
    device: String,
    estimated_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory_budget: Option<u64>,
    over_budget: bool,
    fingerprint: String,
    state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    handle: Option<HandleReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completion_value: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorReport>,
}

#[derive(Debug, Serialize)]
struct HandleReport {
    entry_point: String,
    token: u16,
    device_handle: u32,
}

#[derive(Debug, Serialize)]
struct ErrorReport {
    kind: &'static str,
    message: String,
}

struct Outcome {
    state: LoadState,
    handle: Option<RemoteTaskHandle>,
    completion_value: Option<i32>,
    error: Option<LoadError>,
}

pub fn cmd_load(args: LoadArgs) -> Result<ExitCode> {
    let built = read_manifest(&args.manifest)?.build()?;
    let set = &built.set;
    let config = DeviceConfig::from_env()?.with_flags(args.memory_budget, args.device_cmd.clone());
    let options = LoadOptions {
        memory_budget: config.memory_budget,
        over_budget: args.over_budget.into(),
    };
    let fingerprint = fingerprint(set).context("fingerprint execution set")?;

    let (device, outcome) = match &config.device_cmd {
        Some(cmd) => {
            let mut loader = Loader::with_options(ProcessChannel::spawn(cmd)?, options);
            let outcome = drive(&mut loader, set, args.run);
            // The report is already decided; a bad exit only gets logged.
            match loader.into_channel().finish() {
                Ok(status) if !status.success() => {
                    tracing::warn!(%status, "device process exited unsuccessfully");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %format!("{err:#}"), "device process did not exit cleanly");
                }
            }
            (cmd.clone(), outcome)
        }
        None => {
            let mut device = SimulatedDevice::new();
            if let Some(capacity) = args.sim_capacity {
                device = device.with_capacity(capacity);
            }
            let mut loader = Loader::with_options(device, options);
            (IN_PROCESS_DEVICE.to_string(), drive(&mut loader, set, args.run))
        }
    };

    if let Some(err) = &outcome.error {
        tracing::error!(kind = err.kind().as_str(), %err, "load failed");
    }

    let estimated_bytes = set.estimate_required_memory();
    let ok = outcome.error.is_none();
    let report = LoadReport {
        schema_version: MCULOAD_LOAD_REPORT_SCHEMA_VERSION,
        ok,
        command: "load",
        device,
        estimated_bytes,
        memory_budget: options.memory_budget,
        over_budget: options.memory_budget.is_some_and(|b| estimated_bytes > b),
        fingerprint,
        state: outcome.state.as_str(),
        handle: outcome.handle.as_ref().map(|h| HandleReport {
            entry_point: set
                .entry_point()
                .map(ToString::to_string)
                .unwrap_or_default(),
            token: h.token().get(),
            device_handle: h.device_handle(),
        }),
        completion_value: outcome.completion_value,
        error: outcome.error.as_ref().map(|e| ErrorReport {
            kind: e.kind().as_str(),
            message: e.to_string(),
        }),
    };
    write_json_stdout(&report)?;

    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn drive<C: Channel>(loader: &mut Loader<C>, set: &ExecutionSet, run: bool) -> Outcome {
    let mut outcome = Outcome {
        state: LoadState::Idle,
        handle: None,
        completion_value: None,
        error: None,
    };
    match loader.load(set) {
        Ok(handle) => {
            if run {
                match loader.run(set, &handle) {
                    Ok(value) => outcome.completion_value = Some(value),
                    Err(err) => outcome.error = Some(err),
                }
            }
            outcome.handle = Some(handle);
        }
        Err(err) => outcome.error = Some(err),
    }
    outcome.state = loader.state();
    outcome
}
