//! Toy driver used by the integration tests and as a usage sample.
//!
//! Writes `metrics.json` into its run directory and appends a record of
//! every payload execution to `test_data.json` at the project root.

use anyhow::{bail, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::thread;
use std::time::Duration;

use xlab::storage::{read_json, write_json_atomic};
use xlab::{ExpArgs, Params, RwFileLock, Setup};

const TEST_DATA_FILE: &str = "test_data.json";

#[derive(Parser, Debug, Serialize, Deserialize)]
#[command(name = "xlab-sampler")]
struct SamplerArgs {
    /// One of linear, quadratic, sqrt
    op: String,

    value: i64,

    #[arg(long, default_value_t = 10)]
    repetitions: usize,

    /// Milliseconds to sleep before sampling (not part of the fingerprint)
    #[arg(long, default_value_t = 0)]
    delay: u64,

    #[command(flatten)]
    #[serde(skip)]
    exp: ExpArgs,
}

fn sample(args: &SamplerArgs) -> Result<Vec<f64>> {
    let value = args.value as f64;
    let sample = match args.op.as_str() {
        "linear" => value,
        "quadratic" => value * value,
        "sqrt" => value.sqrt(),
        other => bail!(
            "Invalid operation '{}'. Choose one of \"linear\", \"quadratic\", or \"sqrt\".",
            other
        ),
    };
    Ok(vec![sample; args.repetitions])
}

/// Count payload executions across processes
fn record_call(root: &Path, dir: &Path, args: &SamplerArgs, data: &[f64]) -> Result<()> {
    let lock = RwFileLock::new(root, "test_data");
    let guard = lock.write()?;

    let path = root.join(TEST_DATA_FILE);
    let mut results: serde_json::Value = if path.exists() {
        read_json(&path)?
    } else {
        json!({})
    };

    let calls = results["sampler_calls"].as_u64().unwrap_or(0) + 1;
    results["sampler_calls"] = json!(calls);
    if !results["sampler_data"].is_array() {
        results["sampler_data"] = json!([]);
    }
    if let Some(records) = results["sampler_data"].as_array_mut() {
        records.push(json!({
            "root": root,
            "dir": dir,
            "args": args,
            "data": data,
        }));
    }

    write_json_atomic(&path, &results, true)?;
    guard.release()?;
    Ok(())
}

fn main() -> Result<()> {
    xlab::logging::init();

    let args = SamplerArgs::parse();
    let setup = Setup::discover()?.hash_ignore(["delay"]);
    let root = setup.project().root().to_path_buf();

    let report = setup.run(&Params::from_record(&args)?, &args.exp, |dir, params| {
        let args: SamplerArgs = params.to_record()?;
        thread::sleep(Duration::from_millis(args.delay));

        let data = sample(&args)?;
        write_json_atomic(&dir.join("metrics.json"), &data, true)?;
        record_call(&root, dir, &args, &data)
    })?;

    report.emit();
    Ok(())
}
