use anyhow::Result;
use clap::Args;
use moas_detector::lens::moas::{Classification, MoasLens};
use moas_detector::lens::utils::OutputFormat;

/// Arguments for the Classify command
#[derive(Args)]
pub struct ClassifyArgs {
    /// Prefixes (e.g. 10.0.0.0/8) or AS numbers (e.g. 64512, AS23456) to check
    #[clap(required = true)]
    pub queries: Vec<String>,

    /// Output format: table, markdown, json, json-pretty
    #[clap(short, long, default_value = "table")]
    pub format: OutputFormat,
}

pub fn run(args: ClassifyArgs) -> Result<()> {
    let ClassifyArgs { queries, format } = args;

    let lens = MoasLens::new();
    let results = queries
        .iter()
        .map(|query| lens.classify(query))
        .collect::<Result<Vec<Classification>>>()?;

    println!("{}", lens.format_classifications(&results, &format));
    Ok(())
}
