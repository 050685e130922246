//! `scriptbox check`: compile and verify sources without writing output.

use super::{collect_source_files, open_domain, report, security_mode};
use crate::output::StyledOutput;
use scriptbox_engine::EngineSettings;
use std::path::PathBuf;
use termcolor::ColorChoice;

pub fn execute(
    settings: EngineSettings,
    paths: &[PathBuf],
    no_verify: bool,
    color: ColorChoice,
) -> anyhow::Result<()> {
    let files = collect_source_files(paths)?;
    let (domain, _host) = open_domain("check", settings)?;
    let mut out = StyledOutput::new(color);

    let outcome = domain.compile_and_load_files(&files, security_mode(no_verify), &[]);
    let Some(module) = report(&domain, &mut out, outcome) else {
        domain.dispose();
        anyhow::bail!("check failed for {} file(s)", files.len());
    };

    out.success("ok");
    out.plain(&format!(
        ": {} file(s), {} type(s)",
        files.len(),
        module.types().len()
    ));
    if !module.is_security_verified() {
        out.dim(" (not verified)");
    }
    out.newline();
    out.flush();
    domain.dispose();
    Ok(())
}
