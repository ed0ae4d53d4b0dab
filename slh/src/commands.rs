//! Subcommand implementations. Each writes to the given sink so tests can
//! capture output.

use anyhow::{Context, Result, bail};
use slh_common::config::merge_protected_prefixes;
use slh_common::errors::ErrorCode;
use slh_common::harness::{
    ConfigInjector, RandomizedSsl, SslProvider, SuiteSeed, plan_reap, report_schema,
};
use slh_common::schema::{export_schemas, generate_error_catalog};
use slh_common::tasks::TaskGroupSnapshot;
use std::io::Write;
use std::path::Path;
use tracing::debug;

fn seed_or_random(seed: Option<SuiteSeed>) -> SuiteSeed {
    seed.unwrap_or_else(|| {
        let seed = SuiteSeed::random();
        debug!(%seed, "no seed given; picked one");
        seed
    })
}

fn write_json(out: &mut impl Write, value: &impl serde::Serialize) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

pub fn overrides(
    out: &mut impl Write,
    seed: Option<SuiteSeed>,
    nightly: bool,
    json: bool,
) -> Result<()> {
    let seed = seed_or_random(seed);
    let overrides = ConfigInjector::overrides(seed, !nightly);
    if json {
        return write_json(
            out,
            &serde_json::json!({
                "seed": seed.to_string(),
                "fast_mode": !nightly,
                "overrides": overrides,
            }),
        );
    }

    writeln!(out, "seed {seed} ({} overrides)", overrides.len())?;
    let width = overrides.iter().map(|o| o.key.len()).max().unwrap_or(0);
    for o in &overrides {
        writeln!(out, "  {:<width$}  {:<10}  [{}]", o.key, o.value, o.category)?;
    }
    Ok(())
}

pub fn ssl(
    out: &mut impl Write,
    seed: Option<SuiteSeed>,
    nightly: bool,
    ssl_probability: f64,
    client_auth_probability: f64,
    json: bool,
) -> Result<()> {
    let seed = seed_or_random(seed);
    let provider = RandomizedSsl::new(ssl_probability, client_auth_probability)?;
    let posture = provider.randomize(seed, !nightly)?;
    if json {
        return write_json(out, &posture);
    }

    writeln!(out, "seed         {seed}")?;
    writeln!(out, "encrypted    {}", posture.encrypted)?;
    writeln!(out, "client auth  {}", posture.mutual_auth)?;
    writeln!(out, "url scheme   {}", posture.url_scheme())?;
    writeln!(out, "via          {}", posture.debug)?;
    Ok(())
}

pub fn reap_plan(
    out: &mut impl Write,
    snapshot_path: &Path,
    filter: &str,
    group: &str,
    protected: Vec<String>,
    json: bool,
) -> Result<()> {
    if filter.is_empty() {
        bail!("--filter must not be empty");
    }
    let raw = std::fs::read_to_string(snapshot_path)
        .with_context(|| format!("reading {}", snapshot_path.display()))?;
    let snapshot: TaskGroupSnapshot = serde_json::from_str(&raw)
        .with_context(|| format!("parsing task snapshot {}", snapshot_path.display()))?;

    let protected = merge_protected_prefixes(protected);
    let plan = plan_reap(&snapshot, group, filter, &protected);
    if json {
        return write_json(out, &plan);
    }

    writeln!(
        out,
        "scanned {} tasks for '{}' under group '{}'",
        plan.scanned, plan.filter, plan.reference_group
    )?;
    for task in &plan.targets {
        writeln!(out, "  interrupt  {} ({})", task.name, task.ancestry.join(" < "))?;
    }
    for task in &plan.protected {
        writeln!(out, "  protected  {}", task.name)?;
    }
    if plan.targets.is_empty() {
        writeln!(out, "  nothing to interrupt")?;
    }
    Ok(())
}

pub fn schema(out: &mut impl Write, dir: Option<&Path>, json: bool) -> Result<()> {
    match dir {
        Some(dir) => {
            let result = export_schemas(dir)
                .with_context(|| format!("exporting schemas to {}", dir.display()))?;
            if json {
                return write_json(out, &result);
            }
            for file in &result.files {
                writeln!(out, "wrote {file}")?;
            }
            Ok(())
        }
        None => write_json(out, &report_schema()),
    }
}

pub fn explain(out: &mut impl Write, code: Option<&str>, all: bool, json: bool) -> Result<()> {
    if all {
        if json {
            return write_json(out, &generate_error_catalog());
        }
        for code in ErrorCode::all() {
            writeln!(out, "{}", code.entry().format_brief())?;
        }
        return Ok(());
    }

    let Some(raw) = code else {
        bail!("give an error code (e.g. SLH-E400) or --all");
    };
    let Some(code) = ErrorCode::from_code_string(raw) else {
        bail!("unknown error code '{raw}'");
    };
    let entry = code.entry();
    if json {
        return write_json(out, &entry);
    }
    write!(out, "{}", entry.format_full())?;
    Ok(())
}
