//! On-disk model registry: one bincode artifact plus one JSON schema per model.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, ScoringError};
use crate::schema::FeatureSchema;
use crate::trainer::ModelArtifact;

const MODEL_SUFFIX: &str = "_model.bin";
const CONFIG_SUFFIX: &str = "_config.json";

#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

/// Model names become file names, so only a conservative character set is allowed.
pub fn validate_name(name: &str) -> Result<()> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
    if name.is_empty() || name.contains("..") || !name.chars().all(allowed) {
        return Err(ScoringError::InvalidInput(format!(
            "invalid model name '{}': use letters, digits, '.', '_' or '-'",
            name
        )));
    }
    Ok(())
}

// Write to a sibling then rename so readers never see a partial file
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn model_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}{}", name, MODEL_SUFFIX))
    }

    fn config_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}{}", name, CONFIG_SUFFIX))
    }

    /// Persists artifact and schema under `name`, replacing any previous model.
    pub fn save(&self, name: &str, artifact: &ModelArtifact, schema: &FeatureSchema) -> Result<()> {
        validate_name(name)?;
        let model_bytes = bincode::serialize(artifact)?;
        let config_bytes = serde_json::to_vec_pretty(schema)?;
        write_atomic(&self.model_path(name), &model_bytes)?;
        write_atomic(&self.config_path(name), &config_bytes)?;
        info!(model = name, bytes = model_bytes.len(), "model saved");
        Ok(())
    }

    pub fn load(&self, name: &str) -> Result<(ModelArtifact, FeatureSchema)> {
        let schema = self.load_config(name)?;
        let bytes = fs::read(self.model_path(name)).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ScoringError::ModelNotFound(name.to_string()),
            _ => ScoringError::Io(e),
        })?;
        let artifact: ModelArtifact = bincode::deserialize(&bytes)?;
        artifact.check_schema(&schema)?;
        debug!(model = name, "model loaded");
        Ok((artifact, schema))
    }

    pub fn load_config(&self, name: &str) -> Result<FeatureSchema> {
        validate_name(name)?;
        let text = fs::read_to_string(self.config_path(name)).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ScoringError::ModelNotFound(name.to_string()),
            _ => ScoringError::Io(e),
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Names of all stored models, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let file_name = entry?.file_name();
            if let Some(name) = file_name
                .to_str()
                .and_then(|f| f.strip_suffix(CONFIG_SUFFIX))
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let mut removed = false;
        for path in [self.model_path(name), self.config_path(name)] {
            match fs::remove_file(&path) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if !removed {
            return Err(ScoringError::ModelNotFound(name.to_string()));
        }
        info!(model = name, "model deleted");
        Ok(())
    }
}
