use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use asb_core::{disassemble, DisasmOptions, Nls, Script, ToolConfig};
use clap::Parser;

/// Disassemble an ASB script container into editable assembly text
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, required = true)]
    input: PathBuf,

    #[arg(short, long, required = true)]
    output: PathBuf,

    /// Text encoding of the string table (sjis, gbk, utf8)
    #[arg(short, long)]
    lang: Option<Nls>,

    /// TOML file with `nls`, `log_level` and `talkers`
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also write a YAML summary of the container
    #[arg(long)]
    summary: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

fn load_config(path: Option<&Path>) -> Result<ToolConfig> {
    let Some(path) = path else {
        return Ok(ToolConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    ToolConfig::from_toml(&text).with_context(|| format!("invalid config {}", path.display()))
}

fn init_logger(config: &ToolConfig, verbose: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    } else if let Some(level) = config.log_level {
        builder.filter_level(level);
    }
    builder.init();
}

fn run(args: &Args, config: &ToolConfig) -> Result<()> {
    let nls = args.lang.or(config.nls).unwrap_or_default();
    let data = std::fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let script = Script::load(&data)
        .with_context(|| format!("failed to load {}", args.input.display()))?;

    let options = DisasmOptions {
        nls,
        talkers: config.talker_table(),
    };
    let text = disassemble(&script, &options)
        .with_context(|| format!("failed to disassemble {}", args.input.display()))?;
    std::fs::write(&args.output, text)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    log::info!(
        "{} -> {} ({} function(s), {} string(s), {})",
        args.input.display(),
        args.output.display(),
        script.functions.len(),
        script.strings.len(),
        nls
    );

    if let Some(path) = &args.summary {
        let yaml = serde_yaml::to_string(&script.summary(nls))?;
        std::fs::write(path, yaml)
            .with_context(|| format!("failed to write summary {}", path.display()))?;
        log::info!("summary written to {}", path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    init_logger(&config, args.verbose);
    run(&args, &config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse() {
        let args = Args::try_parse_from([
            "disassembler",
            "-i",
            "a.bin",
            "-o",
            "a.asm",
            "-l",
            "gbk",
            "--summary",
            "a.yaml",
        ])
        .unwrap();
        assert_eq!(args.lang, Some(Nls::GBK));
        assert_eq!(args.summary, Some(PathBuf::from("a.yaml")));
        assert!(!args.verbose);
        assert!(Args::try_parse_from(["disassembler", "-i", "a.bin"]).is_err());
    }

    #[test]
    fn missing_config_is_default() {
        assert_eq!(load_config(None).unwrap(), ToolConfig::default());
    }
}
