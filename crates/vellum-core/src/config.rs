use std::path::PathBuf;

/// Runtime configuration for the conversion core
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the temp area where every transient artifact lives
    pub temp_root: PathBuf,
    /// ddjvu binary (page conversion)
    pub ddjvu_bin: String,
    /// djvused binary (metadata and outline)
    pub djvused_bin: String,
    /// djvutxt binary (hidden-text probe)
    pub djvutxt_bin: String,
    /// Pages converted by the quick prefix sub-phase
    pub quick_pages: u32,
    /// Pages per ddjvu invocation in the full sub-phase
    pub chunk_size: u32,
    /// JPEG quality for exported page images (1-100)
    pub jpeg_quality: u8,
}

impl Config {
    /// Load configuration or use defaults
    pub fn load_or_default() -> Self {
        let temp_root = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("vellum")
            .join("tmp");

        Self {
            temp_root,
            ddjvu_bin: "ddjvu".to_string(),
            djvused_bin: "djvused".to_string(),
            djvutxt_bin: "djvutxt".to_string(),
            quick_pages: 3,
            chunk_size: 10,
            jpeg_quality: 85,
        }
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.temp_root)?;
        Ok(())
    }
}
