use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use mcuload_contracts::MCULOAD_ESTIMATE_REPORT_SCHEMA_VERSION;
use mcuload_core::{fingerprint, TokenSpace, MAX_METHODS};

use crate::manifest::read_manifest;
use crate::report::{write_json_stdout, EntryPointReport};

#[derive(Debug, Args)]
pub struct EstimateArgs {
    /// Analyzer manifest (JSON).
    #[arg(long, value_name = "PATH")]
    pub manifest: PathBuf,
}

#[derive(Debug, Serialize)]
struct EstimateReport {
    schema_version: &'static str,
    ok: bool,
    command: &'static str,
    classes: usize,
    methods: usize,
    method_ceiling: usize,
    tokens: TokenCounts,
    replacements: usize,
    duplicates: Vec<String>,
    estimated_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    entry_point: Option<EntryPointReport>,
    fingerprint: String,
}

#[derive(Debug, Serialize)]
struct TokenCounts {
    #[serde(rename = "type")]
    types: usize,
    method: usize,
    field: usize,
}

pub fn cmd_estimate(args: EstimateArgs) -> Result<ExitCode> {
    let built = read_manifest(&args.manifest)?.build()?;
    let set = &built.set;

    let report = EstimateReport {
        schema_version: MCULOAD_ESTIMATE_REPORT_SCHEMA_VERSION,
        ok: true,
        command: "estimate",
        classes: set.classes().len(),
        methods: set.methods().len(),
        method_ceiling: MAX_METHODS,
        tokens: TokenCounts {
            types: set.directory(TokenSpace::Type).len(),
            method: set.directory(TokenSpace::Method).len(),
            field: set.directory(TokenSpace::Field).len(),
        },
        replacements: built.replacements,
        duplicates: built.duplicates.iter().map(ToString::to_string).collect(),
        estimated_bytes: set.estimate_required_memory(),
        entry_point: EntryPointReport::from_set(set),
        fingerprint: fingerprint(set).context("fingerprint execution set")?,
    };
    write_json_stdout(&report)?;
    Ok(ExitCode::SUCCESS)
}
