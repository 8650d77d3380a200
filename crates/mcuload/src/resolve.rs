use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use mcuload_contracts::MCULOAD_RESOLVE_REPORT_SCHEMA_VERSION;
use mcuload_core::{ResolvedSymbol, Token, TokenSpace};

use crate::manifest::read_manifest;
use crate::report::write_json_stdout;

#[derive(Debug, Args)]
pub struct ResolveTokenArgs {
    /// Analyzer manifest (JSON).
    #[arg(long, value_name = "PATH")]
    pub manifest: PathBuf,

    /// Raw token value, e.g. from a device fault report.
    #[arg(long, value_name = "N")]
    pub token: u16,

    /// Restrict the lookup to one space (type, method or field).
    #[arg(long, value_name = "SPACE")]
    pub space: Option<TokenSpace>,
}

#[derive(Debug, Serialize)]
struct ResolveReport {
    schema_version: &'static str,
    ok: bool,
    command: &'static str,
    token: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    space: Option<TokenSpace>,
    matches: Vec<Match>,
}

#[derive(Debug, Serialize)]
struct Match {
    space: TokenSpace,
    token: u16,
    symbol: String,
}

impl From<ResolvedSymbol<'_>> for Match {
    fn from(r: ResolvedSymbol<'_>) -> Self {
        Self {
            space: r.space,
            token: r.token.get(),
            symbol: r.symbol.to_string(),
        }
    }
}

pub fn cmd_resolve_token(args: ResolveTokenArgs) -> Result<ExitCode> {
    let built = read_manifest(&args.manifest)?.build()?;
    let set = &built.set;

    let matches: Vec<Match> = match args.space {
        Some(space) => Token::new(args.token)
            .and_then(|token| {
                set.inverse_resolve(space, token).map(|symbol| ResolvedSymbol {
                    space,
                    token,
                    symbol,
                })
            })
            .into_iter()
            .map(Match::from)
            .collect(),
        None => set
            .inverse_resolve_all(args.token)
            .into_iter()
            .map(Match::from)
            .collect(),
    };

    let ok = !matches.is_empty();
    write_json_stdout(&ResolveReport {
        schema_version: MCULOAD_RESOLVE_REPORT_SCHEMA_VERSION,
        ok,
        command: "resolve-token",
        token: args.token,
        space: args.space,
        matches,
    })?;
    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
