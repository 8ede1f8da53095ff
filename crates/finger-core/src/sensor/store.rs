use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::errors::{AppError, AppResult};
use crate::sensor::matcher::EnrolledTemplate;

const STORE_VERSION: u32 = 1;

pub trait TemplateStore {
    fn load(&self) -> AppResult<Vec<EnrolledTemplate>>;
    fn save(&self, templates: &[EnrolledTemplate]) -> AppResult<()>;
}

#[derive(Debug, Clone)]
pub struct FileTemplateStore {
    path: PathBuf,
}

impl FileTemplateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TemplateStore for FileTemplateStore {
    fn load(&self) -> AppResult<Vec<EnrolledTemplate>> {
        read_template_file(&self.path)
    }

    fn save(&self, templates: &[EnrolledTemplate]) -> AppResult<()> {
        write_template_file(&self.path, templates)
    }
}

#[derive(Serialize, Deserialize)]
struct TemplateFile {
    version: u32,
    templates: Vec<EnrolledTemplate>,
}

pub fn read_template_file(path: &Path) -> AppResult<Vec<EnrolledTemplate>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let data = fs::read(path).map_err(|source| AppError::TemplateStoreRead {
        path: path.to_path_buf(),
        source,
    })?;

    let file: TemplateFile =
        serde_json::from_slice(&data).map_err(|err| AppError::InvalidTemplateStore {
            path: path.to_path_buf(),
            message: format!("invalid template store contents: {err}"),
        })?;
    if file.version != STORE_VERSION {
        return Err(AppError::InvalidTemplateStore {
            path: path.to_path_buf(),
            message: format!("unsupported template store version {}", file.version),
        });
    }
    Ok(file.templates)
}

pub fn write_template_file(path: &Path, templates: &[EnrolledTemplate]) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| AppError::TemplateStoreWrite {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(parent).map_err(|source| AppError::TemplateStoreWrite {
        path: path.to_path_buf(),
        source,
    })?;

    let payload = TemplateFile {
        version: STORE_VERSION,
        templates: templates.to_vec(),
    };

    {
        let file = tmp.as_file_mut();
        {
            let mut writer = BufWriter::new(&mut *file);
            let serialized = serde_json::to_vec_pretty(&payload)?;
            writer
                .write_all(&serialized)
                .map_err(|source| AppError::TemplateStoreWrite {
                    path: path.to_path_buf(),
                    source,
                })?;
            writer.write_all(b"\n").ok();
            writer.flush().map_err(|source| AppError::TemplateStoreWrite {
                path: path.to_path_buf(),
                source,
            })?;
        }
        file.sync_all().map_err(|source| AppError::TemplateStoreWrite {
            path: path.to_path_buf(),
            source,
        })?;
    }

    let file = tmp.persist(path).map_err(|err| AppError::TemplateStoreWrite {
        path: path.to_path_buf(),
        source: err.error,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = file
            .metadata()
            .map_err(|source| AppError::TemplateStoreWrite {
                path: path.to_path_buf(),
                source,
            })?
            .permissions();
        perms.set_mode(0o600);
        file.set_permissions(perms)
            .map_err(|source| AppError::TemplateStoreWrite {
                path: path.to_path_buf(),
                source,
            })?;
    }
    #[cfg(not(unix))]
    drop(file);

    Ok(())
}
