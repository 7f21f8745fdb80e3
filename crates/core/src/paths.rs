use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".tabpilot"))
            .unwrap_or_else(|| PathBuf::from(".tabpilot"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn media_dir(&self) -> PathBuf {
        self.base.join("media")
    }

    pub fn browser_data_dir(&self) -> PathBuf {
        self.base.join("browser")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
