use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use asb_core::{assemble, AsmOptions, Nls, ToolConfig};
use clap::Parser;

/// Assemble ASB assembly text into a script container
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, required = true)]
    input: PathBuf,

    #[arg(short, long, required = true)]
    output: PathBuf,

    /// Encoding for the string table (sjis, gbk, utf8)
    #[arg(short, long)]
    lang: Option<Nls>,

    /// TOML file with `nls` and `log_level`
    #[arg(short, long)]
    config: Option<PathBuf>,

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

fn compile(input: &Path, output: &Path, nls: Nls) -> Result<()> {
    let source = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let script = assemble(&source, &AsmOptions { nls })
        .with_context(|| format!("failed to assemble {}", input.display()))?;
    let data = script.save()?;
    std::fs::write(output, &data).with_context(|| format!("failed to write {}", output.display()))?;

    log::info!(
        "{} -> {} ({} function(s), {} string(s), 0x{:X} bytes, {})",
        input.display(),
        output.display(),
        script.functions.len(),
        script.strings.len(),
        data.len(),
        nls
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    init_logger(&config, args.verbose);
    let nls = args.lang.or(config.nls).unwrap_or_default();
    compile(&args.input, &args.output, nls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse() {
        let args =
            Args::try_parse_from(["assembler", "-i", "a.asm", "-o", "a.bin", "-v"]).unwrap();
        assert_eq!(args.input, PathBuf::from("a.asm"));
        assert_eq!(args.lang, None);
        assert!(args.verbose);
    }

    #[test]
    fn compile_writes_a_loadable_container() {
        let dir = std::env::temp_dir().join(format!("asb-assembler-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let input = dir.join("greet.asm");
        let output = dir.join("greet.bin");
        std::fs::write(
            &input,
            "script demo\nstrings\n  GREET = \"hi\"\nendstrings\nfunction GREET,0\n  ret\nendfunction\n",
        )
        .unwrap();

        compile(&input, &output, Nls::ShiftJIS).unwrap();
        let script = asb_core::Script::load(&std::fs::read(&output).unwrap()).unwrap();
        assert_eq!(script.name, b"demo");
        assert_eq!(script.functions[0].code, vec![0x26]);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
