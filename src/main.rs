use std::env;
use std::path::PathBuf;
use std::process;

use scorereel::{PipelineDriver, Progress, Project, RunContext, Stage};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: scorereel <project.ron> [--output <path>] [--keep] [--threads <n>]";

struct Options {
    project: PathBuf,
    output: Option<PathBuf>,
    keep: bool,
    threads: Option<usize>,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut project = None;
    let mut output = None;
    let mut keep = false;
    let mut threads = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--keep" => keep = true,
            "--output" | "-o" => {
                let value = iter.next().ok_or("--output needs a path")?;
                output = Some(PathBuf::from(value));
            }
            "--threads" => {
                let value = iter.next().ok_or("--threads needs a number")?;
                let n = value
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| format!("invalid thread count '{value}'"))?;
                threads = Some(n);
            }
            flag if flag.starts_with('-') => return Err(format!("unknown option '{flag}'")),
            path if project.is_none() => project = Some(PathBuf::from(path)),
            extra => return Err(format!("unexpected argument '{extra}'")),
        }
    }

    Ok(Options {
        project: project.ok_or("missing project file")?,
        output,
        keep,
        threads,
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("{USAGE}");
            process::exit(1);
        }
    };

    let mut project = match Project::load(&options.project) {
        Ok(project) => project,
        Err(e) => {
            eprintln!("Failed to load project: {e}");
            process::exit(1);
        }
    };
    if let Some(threads) = options.threads {
        project.render.threads = threads;
    }
    let output = options.output.unwrap_or_else(|| project.output.path.clone());

    let ctx = match RunContext::new(&output, options.keep) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Failed to set up run: {e}");
            process::exit(1);
        }
    };

    // Log render progress in 10% steps.
    let mut last_decile = 0;
    let mut driver = PipelineDriver::new(project).with_progress(Box::new(move |p: Progress| {
        if p.stage == Stage::Render && p.frames_total > 0 {
            let decile = p.frames_done * 10 / p.frames_total;
            if decile > last_decile {
                last_decile = decile;
                tracing::info!(done = p.frames_done, total = p.frames_total, "{}%", decile * 10);
            }
        }
    }));

    let result = driver.run(&ctx);
    ctx.close();
    match result {
        Ok(summary) => {
            eprintln!(
                "Wrote {} ({} frames, {:.2}s)",
                output.display(),
                summary.frames,
                summary.duration
            );
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
