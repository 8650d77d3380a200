use anyhow::{Context, Result};
use serde::Serialize;

use mcuload_core::ExecutionSet;

pub fn write_json_stdout<T: Serialize>(report: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec(report)?;
    bytes.push(b'\n');
    std::io::Write::write_all(&mut std::io::stdout(), &bytes).context("write stdout")?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct EntryPointReport {
    pub symbol: String,
    pub token: Option<u16>,
    /// Whether a method declaration backs the entry point.
    pub declared: bool,
}

impl EntryPointReport {
    pub fn from_set(set: &ExecutionSet) -> Option<Self> {
        let symbol = set.entry_point()?;
        Some(Self {
            symbol: symbol.to_string(),
            token: set.entry_point_token().map(|t| t.get()),
            declared: set.has_method(symbol),
        })
    }
}
