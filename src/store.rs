//! Saved forms and their credentials, kept in `<STORE_ROOT>/forms.json`.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// A form the user can reopen without re-entering its locator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedForm {
    /// Locator without the credential fragment.
    pub locator: String,
    /// Secret key (hex) for the form's submissions.
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Unix time the entry was last saved.
    pub saved_at: u64,
}

/// JSON file of saved forms.
#[derive(Debug, Clone)]
pub struct FormStore {
    path: PathBuf,
}

impl FormStore {
    pub fn new(root: &Path) -> Self {
        FormStore {
            path: root.join("forms.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All saved forms in insertion order; a missing file is an empty list.
    pub fn list(&self) -> Result<Vec<SavedForm>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&data).with_context(|| format!("parsing {}", self.path.display()))
    }

    /// Insert or replace the entry with the same locator.
    pub fn save(&self, form: SavedForm) -> Result<()> {
        let mut forms = self.list()?;
        if let Some(existing) = forms.iter_mut().find(|f| f.locator == form.locator) {
            *existing = form;
        } else {
            forms.push(form);
        }
        self.write(&forms)
    }

    /// Remove the entry for `locator`; returns whether one existed.
    pub fn remove(&self, locator: &str) -> Result<bool> {
        let mut forms = self.list()?;
        let before = forms.len();
        forms.retain(|f| f.locator != locator);
        if forms.len() == before {
            return Ok(false);
        }
        self.write(&forms)?;
        Ok(true)
    }

    /// Most recently saved form; ties go to the later entry.
    pub fn latest(&self) -> Result<Option<SavedForm>> {
        Ok(self.list()?.into_iter().max_by_key(|f| f.saved_at))
    }

    fn write(&self, forms: &[SavedForm]) -> Result<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| anyhow!("missing parent directory for form store"))?;
        fs::create_dir_all(parent)?;
        let data = serde_json::to_string_pretty(forms)?;
        let tmp = tempfile::NamedTempFile::new_in(parent)?;
        fs::write(tmp.path(), data)?;
        tmp.persist(&self.path)?;
        Ok(())
    }
}
