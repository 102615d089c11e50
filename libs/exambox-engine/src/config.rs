// Runtime profile configuration for the sandbox engine
use anyhow::{bail, Context, Result};
use exambox_common::types::Profile;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub profile: Profile,
    /// Prebuilt runner image; never pulled or built by the service
    pub image: String,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,
    /// Environment variable the runner reads the submitted source from
    #[serde(default = "default_source_env")]
    pub source_env: String,
}

fn default_pids_limit() -> i64 {
    64
}

fn default_source_env() -> String {
    "CODE".to_string()
}

impl ProfileConfig {
    /// Settings used when the profiles file does not mention a profile
    pub fn builtin(profile: Profile) -> Self {
        let image = match profile {
            Profile::CompiledManaged => "csharp-runner",
            Profile::InterpretedScript => "python-runner",
        };
        Self {
            profile,
            image: image.to_string(),
            memory_limit_mb: 512,
            cpu_limit: 1.0,
            pids_limit: default_pids_limit(),
            source_env: default_source_env(),
        }
    }

    pub fn memory_limit_bytes(&self) -> i64 {
        (self.memory_limit_mb as i64) * 1024 * 1024
    }

    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit as f64 * 1_000_000_000.0) as i64
    }

    fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            bail!("Profile {} has an empty image name", self.profile);
        }
        if self.memory_limit_mb == 0 {
            bail!("Profile {} must have a non-zero memory limit", self.profile);
        }
        if self.cpu_limit.is_nan() || self.cpu_limit <= 0.0 {
            bail!("Profile {} must have a positive CPU limit", self.profile);
        }
        if self.source_env.is_empty() || self.source_env.contains('=') {
            bail!("Profile {} has an invalid source_env: {:?}", self.profile, self.source_env);
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ProfilesJson {
    profiles: Vec<ProfileConfig>,
}

/// Per-profile runtime settings, loaded once at start-up
#[derive(Debug, Clone)]
pub struct ProfileConfigManager {
    configs: HashMap<Profile, ProfileConfig>,
}

impl ProfileConfigManager {
    /// Load profile configurations from a profiles.json file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Profile config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        Self::from_json(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let profiles_json: ProfilesJson = serde_json::from_str(content)?;

        let mut configs = HashMap::new();
        for config in profiles_json.profiles {
            config.validate()?;
            if configs.insert(config.profile, config.clone()).is_some() {
                bail!("Profile {} is configured more than once", config.profile);
            }
        }

        Ok(Self { configs })
    }

    /// Built-in defaults for every profile
    pub fn builtin() -> Self {
        let configs = Profile::ALL
            .iter()
            .map(|p| (*p, ProfileConfig::builtin(*p)))
            .collect();
        Self { configs }
    }

    /// Configuration for a profile, falling back to the built-in defaults
    pub fn get_config(&self, profile: Profile) -> ProfileConfig {
        self.configs
            .get(&profile)
            .cloned()
            .unwrap_or_else(|| ProfileConfig::builtin(profile))
    }

    pub fn get_image(&self, profile: Profile) -> String {
        self.get_config(profile).image
    }

    /// Profiles explicitly present in the loaded file
    pub fn list_profiles(&self) -> Vec<Profile> {
        let mut profiles: Vec<Profile> = self.configs.keys().copied().collect();
        profiles.sort_by_key(|p| p.as_str());
        profiles
    }
}
