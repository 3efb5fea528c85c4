//! Target project ecosystems.

use serde::{Deserialize, Serialize};

use super::error::HealError;

/// Language/tooling family of the repository under repair.
///
/// Selects the classifier dialect and the default install/test commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Python,
    Nodejs,
}

impl Ecosystem {
    pub const ALL: [Ecosystem; 2] = [Ecosystem::Python, Ecosystem::Nodejs];

    pub fn as_str(&self) -> &'static str {
        match self {
            Ecosystem::Python => "python",
            Ecosystem::Nodejs => "nodejs",
        }
    }

    /// Recognise an ecosystem tag; unknown tags yield `None`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "python" | "py" => Some(Ecosystem::Python),
            "nodejs" | "node" | "javascript" | "typescript" => Some(Ecosystem::Nodejs),
            _ => None,
        }
    }

    pub fn default_install_command(&self) -> &'static str {
        match self {
            Ecosystem::Python => "pip install -r requirements.txt 2>&1 && pip install pytest 2>&1",
            Ecosystem::Nodejs => "npm install 2>&1",
        }
    }

    pub fn default_test_command(&self) -> &'static str {
        match self {
            Ecosystem::Python => "python -m pytest -v --tb=short 2>&1",
            Ecosystem::Nodejs => "npm test 2>&1",
        }
    }
}

impl std::fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Ecosystem {
    type Err = HealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ecosystem::from_tag(s).ok_or_else(|| HealError::UnsupportedEcosystem(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_tags_and_aliases() {
        assert_eq!("python".parse::<Ecosystem>().unwrap(), Ecosystem::Python);
        assert_eq!("Node".parse::<Ecosystem>().unwrap(), Ecosystem::Nodejs);
        for eco in Ecosystem::ALL {
            assert_eq!(eco.as_str().parse::<Ecosystem>().unwrap(), eco);
        }
    }

    #[test]
    fn unknown_tag_is_unsupported() {
        let err = "cobol".parse::<Ecosystem>().unwrap_err();
        assert!(matches!(err, HealError::UnsupportedEcosystem(ref t) if t == "cobol"));
        assert_eq!(err.status_code(), 422);
    }
}
