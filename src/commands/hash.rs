use anyhow::{Context, Result};

use xlab::{Fingerprintable, Params};

use crate::cli::HashArgs;

pub fn run(args: HashArgs) -> Result<()> {
    let params = Params::from_json_str(&args.params).context("Failed to parse parameters")?;
    let params = params.without_keys(&args.ignore);

    println!("{}", params.fingerprint());
    Ok(())
}
