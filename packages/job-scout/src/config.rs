use anyhow::{Context, Result};
use dotenvy::dotenv;
use job_pipeline::{ChannelId, PipelineConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Channels monitored when `JOB_SCOUT_CHANNELS` is not set.
pub const DEFAULT_CHANNELS: &[&str] = &[
    "https://t.me/os_Community",
    "https://t.me/infytq_2022",
    "https://t.me/internfreak",
    "https://t.me/OceanOfJobs",
    "https://t.me/jobs_and_internships_updates",
    "https://t.me/gocareers",
    "https://t.me/vijaykushal",
    "https://t.me/dot_aware",
    "https://t.me/CodingBugs",
    "https://t.me/goyalarsh",
    "https://t.me/findITJobsLink",
    "https://t.me/arunchauhanofficial",
    "https://t.me/TorchBearerr",
    "https://t.me/offcampus_phodenge",
];

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub channels: Vec<ChannelId>,
    pub export_dir: PathBuf,
    pub openai_api_key: Option<String>,
    pub openai_model: Option<String>,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let pipeline = match env::var("JOB_SCOUT_PIPELINE_CONFIG") {
            Ok(path) => load_pipeline_config(Path::new(&path))?,
            Err(_) => PipelineConfig::default(),
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://job_scout.db?mode=rwc".to_string()),
            channels: env::var("JOB_SCOUT_CHANNELS")
                .map(|csv| parse_channels(&csv))
                .unwrap_or_else(|_| DEFAULT_CHANNELS.iter().map(|c| ChannelId::from_link(c)).collect()),
            export_dir: env::var("JOB_SCOUT_EXPORT_DIR")
                .unwrap_or_else(|_| "./exports".to_string())
                .into(),
            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            openai_model: env::var("OPENAI_MODEL").ok(),
            pipeline,
        })
    }
}

/// Comma separated handles or `t.me` links.
pub fn parse_channels(csv: &str) -> Vec<ChannelId> {
    csv.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(ChannelId::from_link)
        .collect()
}

/// Read pipeline overrides from a JSON file.
pub fn load_pipeline_config(path: &Path) -> Result<PipelineConfig> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline config {}", path.display()))?;
    PipelineConfig::from_json(&json)
        .with_context(|| format!("Invalid pipeline config {}", path.display()))
}
