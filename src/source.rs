/// Script sources — text providers with a path attribute for diagnostics.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Anything that can supply script text to the engine. The path is purely
/// informational: it ends up in error locations and stack traces.
pub trait ScriptSource {
    /// Path shown in diagnostics, e.g. `"<string>"` or `"scripts/main.js"`.
    fn path(&self) -> &str;

    /// The full script text.
    fn text(&self) -> io::Result<String>;
}

/// A script held entirely in memory.
pub struct StringScriptSource {
    text: String,
    path: String,
}

impl StringScriptSource {
    pub fn new(text: impl Into<String>) -> Self {
        StringScriptSource {
            text: text.into(),
            path: "<string>".to_string(),
        }
    }

    /// Same as [`StringScriptSource::new`] but with an explicit display path.
    pub fn with_path(text: impl Into<String>, path: impl Into<String>) -> Self {
        StringScriptSource {
            text: text.into(),
            path: path.into(),
        }
    }
}

impl ScriptSource for StringScriptSource {
    fn path(&self) -> &str {
        &self.path
    }

    fn text(&self) -> io::Result<String> {
        Ok(self.text.clone())
    }
}

/// A script loaded from the filesystem at compile time.
pub struct FileScriptSource {
    path: PathBuf,
    display: String,
}

impl FileScriptSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let display = path.display().to_string();
        FileScriptSource { path, display }
    }
}

impl ScriptSource for FileScriptSource {
    fn path(&self) -> &str {
        &self.display
    }

    fn text(&self) -> io::Result<String> {
        fs::read_to_string(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_source_default_path() {
        let src = StringScriptSource::new("var x = 1;");
        assert_eq!(src.path(), "<string>");
        assert_eq!(src.text().unwrap(), "var x = 1;");
    }

    #[test]
    fn string_source_custom_path() {
        let src = StringScriptSource::with_path("x", "boot.js");
        assert_eq!(src.path(), "boot.js");
    }
}
