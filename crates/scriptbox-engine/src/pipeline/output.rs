//! Output naming and emission

use super::result::ModuleOutput;
use crate::error::ScriptResult;
use crate::settings::EngineSettings;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extension of module images
pub const IMAGE_EXTENSION: &str = "sbx";

/// Extension of symbol images
pub const SYMBOL_EXTENSION: &str = "sbsym";

/// Random name in the 8-4-4-4-12 hex layout of a version 4 UUID
pub fn random_name() -> String {
    let mut bytes: [u8; 16] = rand::thread_rng().gen();
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    let h = hex::encode(bytes);
    format!("{}-{}-{}-{}-{}", &h[0..8], &h[8..12], &h[12..16], &h[16..20], &h[20..32])
}

/// Where one compile's output goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    /// Name recorded in the image
    pub module_name: String,
    /// Image file, used when writing to disk
    pub image_path: PathBuf,
    /// Symbol file, used when writing to disk with symbols
    pub symbol_path: PathBuf,
}

impl OutputTarget {
    /// Configured output name, else a random one
    pub fn from_settings(settings: &EngineSettings) -> Self {
        let file = settings
            .output_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(random_name);
        Self::named(&settings.output_directory, &file)
    }

    /// Output `file` in `directory`, adding the image extension when missing
    pub fn named(directory: &Path, file: &str) -> Self {
        let path = Path::new(file);
        let module_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file)
            .to_string();
        let image_path = if path.extension().is_some() {
            directory.join(file)
        } else {
            directory.join(format!("{}.{}", file, IMAGE_EXTENSION))
        };
        let symbol_path = image_path.with_extension(SYMBOL_EXTENSION);
        Self {
            module_name,
            image_path,
            symbol_path,
        }
    }

    /// Keep the bytes in memory, or write them and read them back
    pub fn emit(
        &self,
        in_memory: bool,
        image: Vec<u8>,
        symbols: Option<Vec<u8>>,
    ) -> ScriptResult<ModuleOutput> {
        if in_memory {
            return Ok(ModuleOutput::in_memory(image, symbols));
        }

        if let Some(parent) = self.image_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.image_path, &image)?;
        let image = fs::read(&self.image_path)?;

        let symbols = match symbols {
            Some(bytes) => {
                fs::write(&self.symbol_path, &bytes)?;
                Some((fs::read(&self.symbol_path)?, self.symbol_path.clone()))
            }
            None => None,
        };
        debug!(path = %self.image_path.display(), bytes = image.len(), "wrote module image");
        Ok(ModuleOutput::on_disk(image, self.image_path.clone(), symbols))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_name_layout() {
        let name = random_name();
        let parts: Vec<&str> = name.split('-').collect();
        assert_eq!(parts.iter().map(|p| p.len()).collect::<Vec<_>>(), [8, 4, 4, 4, 12]);
        assert!(parts[2].starts_with('4'));
        assert_ne!(name, random_name());
    }

    #[test]
    fn test_named_adds_extension() {
        let target = OutputTarget::named(Path::new("/out"), "game");
        assert_eq!(target.module_name, "game");
        assert_eq!(target.image_path, Path::new("/out/game.sbx"));
        assert_eq!(target.symbol_path, Path::new("/out/game.sbsym"));

        let target = OutputTarget::named(Path::new("/out"), "game.bin");
        assert_eq!(target.module_name, "game");
        assert_eq!(target.image_path, Path::new("/out/game.bin"));
    }

    #[test]
    fn test_emit_to_disk_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let target = OutputTarget::named(&dir.path().join("nested"), "m");
        let output = target.emit(false, vec![9, 8, 7], Some(vec![1])).unwrap();
        assert_eq!(output.image(), Some(&[9u8, 8, 7][..]));
        assert_eq!(output.symbols(), Some(&[1u8][..]));
        assert!(output.image_path().unwrap().is_file());
        assert!(output.symbol_path().unwrap().is_file());
    }
}
