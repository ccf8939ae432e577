//! Language detection and boundary style registry.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Source language of a chunk, detected from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Python,
    JavaScript,
    TypeScript,
    Rust,
    Go,
    Java,
    C,
    Cpp,
    CSharp,
    Kotlin,
    Swift,
    Php,
    /// Anything else that is still text: chunked by line windows only.
    Text,
}

/// How the chunker decides where a definition ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryStyle {
    /// Block ends when indentation falls back to the header's level.
    Indentation,
    /// Block ends when brace depth returns to zero.
    Brace,
    /// No semantic boundaries; fixed line windows.
    Windowed,
}

impl Lang {
    /// Identifier stored in chunk metadata and embedding context.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Rust => "rust",
            Self::Go => "go",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Kotlin => "kotlin",
            Self::Swift => "swift",
            Self::Php => "php",
            Self::Text => "text",
        }
    }

    #[must_use]
    pub fn boundary_style(self) -> BoundaryStyle {
        match self {
            Self::Python => BoundaryStyle::Indentation,
            Self::Text => BoundaryStyle::Windowed,
            _ => BoundaryStyle::Brace,
        }
    }

    /// Whether `'...'` delimits strings rather than char literals.
    #[must_use]
    pub fn has_single_quoted_strings(self) -> bool {
        matches!(
            self,
            Self::JavaScript | Self::TypeScript | Self::Php | Self::Python
        )
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension. Unknown extensions map to [`Lang::Text`].
#[must_use]
pub fn detect_language(path: &Path) -> Lang {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return Lang::Text;
    };
    match ext.to_ascii_lowercase().as_str() {
        "py" | "pyi" => Lang::Python,
        "js" | "jsx" | "mjs" | "cjs" => Lang::JavaScript,
        "ts" | "tsx" | "mts" | "cts" => Lang::TypeScript,
        "rs" => Lang::Rust,
        "go" => Lang::Go,
        "java" => Lang::Java,
        "c" | "h" => Lang::C,
        "cc" | "cpp" | "cxx" | "hpp" | "hh" | "hxx" => Lang::Cpp,
        "cs" => Lang::CSharp,
        "kt" | "kts" => Lang::Kotlin,
        "swift" => Lang::Swift,
        "php" => Lang::Php,
        _ => Lang::Text,
    }
}
