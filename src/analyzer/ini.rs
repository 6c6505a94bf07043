//! Generates the INI file the external analyzer is launched with.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::AnalyzerConfig;

fn flag(value: bool) -> u8 {
    value as u8
}

fn percent(value: f32) -> u32 {
    (value * 100.0).round().max(0.0) as u32
}

pub fn render(config: &AnalyzerConfig) -> String {
    let eq: String = config
        .eq
        .iter()
        .enumerate()
        .map(|(i, value)| format!("{} = {:.2}\n", i + 1, value))
        .collect();

    format!(
        "[general]\n\
         bars = {bars}\n\
         framerate = {framerate}\n\
         sensitivity = {sensitivity}\n\
         autosens = {autosens}\n\
         lower_cutoff_freq = {lower}\n\
         higher_cutoff_freq = {higher}\n\
         \n\
         [output]\n\
         method = raw\n\
         raw_target = {target}\n\
         data_format = binary\n\
         bit_format = {bit_format}\n\
         channels = {channels}\n\
         \n\
         [smoothing]\n\
         gravity = {gravity}\n\
         integral = {integral}\n\
         ignore = {ignore}\n\
         monstercat = {monstercat}\n\
         \n\
         [eq]\n\
         {eq}",
        bars = config.bars,
        framerate = config.framerate,
        sensitivity = config.sensitivity,
        autosens = flag(config.autosens),
        lower = config.lower_cutoff_freq,
        higher = config.higher_cutoff_freq,
        target = config.fifo.display(),
        bit_format = config.bit_format.as_str(),
        channels = config.channels.as_str(),
        gravity = percent(config.gravity),
        integral = percent(config.integral),
        ignore = config.ignore,
        monstercat = flag(config.monstercat),
        eq = eq,
    )
}

pub fn write_config(config: &AnalyzerConfig, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    std::fs::write(path, render(config))
        .with_context(|| format!("Failed to write analyzer config: {}", path.display()))?;
    log::debug!("Analyzer config written to {}", path.display());
    Ok(())
}
