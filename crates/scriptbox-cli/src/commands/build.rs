//! `scriptbox build`: compile sources to a module image on disk.

use super::{collect_source_files, open_domain, report, security_mode};
use crate::output::StyledOutput;
use scriptbox_engine::EngineSettings;
use std::path::{Path, PathBuf};
use termcolor::ColorChoice;

pub struct BuildArgs {
    pub paths: Vec<PathBuf>,
    pub out_dir: PathBuf,
    pub name: Option<String>,
    pub symbols: bool,
    pub no_verify: bool,
}

/// Output name from the first input: a file's stem or a directory's name.
fn default_name(paths: &[PathBuf]) -> String {
    paths
        .first()
        .and_then(|p| {
            let p = if p.as_os_str() == "." {
                std::env::current_dir().ok()?
            } else {
                p.clone()
            };
            p.file_stem().map(|s| s.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "module".to_string())
}

fn remove_output(image: Option<&Path>, symbols: Option<&Path>) {
    for path in [image, symbols].into_iter().flatten() {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "could not remove rejected output");
        }
    }
}

pub fn execute(
    mut settings: EngineSettings,
    args: BuildArgs,
    color: ColorChoice,
) -> anyhow::Result<()> {
    let files = collect_source_files(&args.paths)?;
    settings.generate_in_memory = false;
    settings.output_directory = args.out_dir;
    settings.output_name = Some(args.name.unwrap_or_else(|| default_name(&args.paths)));
    settings.generate_symbols |= args.symbols;

    let (domain, _host) = open_domain("build", settings)?;
    let mut out = StyledOutput::new(color);

    let compiled = domain
        .compile_from_files(&files, &[])
        .and_then(|result| result.into_success());
    let Some(result) = report(&domain, &mut out, compiled) else {
        domain.dispose();
        anyhow::bail!("build failed");
    };
    let Some(image) = result.image_path() else {
        domain.dispose();
        anyhow::bail!("compiler produced no image file");
    };

    // Gate the bytes as written
    if let Err(e) = domain.load_module_from_file(image, security_mode(args.no_verify)) {
        out.script_error(&e);
        remove_output(Some(image), result.symbol_path());
        domain.dispose();
        anyhow::bail!("build rejected: {}", image.display());
    }

    out.success("built");
    out.plain(&format!(" {} ", result.module_name()));
    out.dim(&format!("-> {}", image.display()));
    out.newline();
    if let Some(symbols) = result.symbol_path() {
        out.dim(&format!("      symbols -> {}", symbols.display()));
        out.newline();
    }
    out.flush();
    domain.dispose();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_name_uses_file_stem() {
        assert_eq!(default_name(&[PathBuf::from("scripts/game.sbs")]), "game");
        assert_eq!(default_name(&[PathBuf::from("scripts/enemies")]), "enemies");
        assert_eq!(default_name(&[]), "module");
    }
}
