//! File-name templates and per-year file discovery.
//!
//! Templates use `{year}` (required), `{next}` (year + 1) and `{variant}`
//! (empty, or `_` + variant name such as `masked_cropped`).
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CanopyError, Result};

const YEAR: &str = "{year}";
const NEXT: &str = "{next}";
const VARIANT: &str = "{variant}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NameTemplate {
    template: String,
    variant: Option<String>,
}

impl NameTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if !template.contains(YEAR) {
            return Err(CanopyError::BadTemplate {
                template,
                placeholder: YEAR,
            });
        }
        Ok(Self {
            template,
            variant: None,
        })
    }

    /// Built-in default; the literal must contain `{year}`.
    pub(crate) fn builtin(template: &'static str) -> Self {
        debug_assert!(template.contains(YEAR));
        Self {
            template: template.to_string(),
            variant: None,
        }
    }

    /// Same template with `{variant}` expanding to `_{variant}`.
    pub fn with_variant(&self, variant: Option<&str>) -> Self {
        Self {
            template: self.template.clone(),
            variant: variant.filter(|v| !v.is_empty()).map(str::to_string),
        }
    }

    pub fn render(&self, year: i32) -> String {
        let variant = self.variant.as_ref().map(|v| format!("_{v}")).unwrap_or_default();
        self.template
            .replace(YEAR, &year.to_string())
            .replace(NEXT, &(year + 1).to_string())
            .replace(VARIANT, &variant)
    }

    pub fn path_in(&self, dir: &Path, year: i32) -> PathBuf {
        dir.join(self.render(year))
    }

    /// Year encoded in `file_name`, if the name is exactly a rendering of
    /// this template.
    pub fn parse_year(&self, file_name: &str) -> Option<i32> {
        let (prefix, _) = self.template.split_once(YEAR)?;
        let prefix = self.render_fixed(prefix);
        let rest = file_name.strip_prefix(prefix.as_str())?;
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        let year: i32 = digits.parse().ok()?;
        (self.render(year) == file_name).then_some(year)
    }

    /// Expand `{variant}` only; used for the part before `{year}`.
    fn render_fixed(&self, part: &str) -> String {
        let variant = self.variant.as_ref().map(|v| format!("_{v}")).unwrap_or_default();
        part.replace(VARIANT, &variant)
    }

    /// All files in `dir` matching the template, keyed by year.
    pub fn discover(&self, dir: &Path) -> Result<BTreeMap<i32, PathBuf>> {
        let entries = fs::read_dir(dir).map_err(|e| CanopyError::io(dir, e))?;
        let mut found = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| CanopyError::io(dir, e))?;
            let name = entry.file_name();
            if let Some(year) = name.to_str().and_then(|n| self.parse_year(n)) {
                found.insert(year, entry.path());
            }
        }
        debug!(dir = %dir.display(), template = %self, files = found.len(), "discovered files");
        Ok(found)
    }

    /// Paths for every year in `first..=last`; a missing year is an error.
    pub fn require_years(&self, dir: &Path, first: i32, last: i32) -> Result<Vec<(i32, PathBuf)>> {
        if last < first {
            return Err(CanopyError::InvalidYearRange { start: first, end: last });
        }
        let found = self.discover(dir)?;
        (first..=last)
            .map(|year| match found.get(&year) {
                Some(p) => Ok((year, p.clone())),
                None => Err(CanopyError::MissingYear {
                    year,
                    pattern: self.render(year),
                    dir: dir.to_path_buf(),
                }),
            })
            .collect()
    }
}

impl fmt::Display for NameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)?;
        if let Some(v) = &self.variant {
            write!(f, " [{v}]")?;
        }
        Ok(())
    }
}

impl TryFrom<String> for NameTemplate {
    type Error = CanopyError;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<NameTemplate> for String {
    fn from(t: NameTemplate) -> Self {
        t.template
    }
}
