//! Container map file parser

use super::container_map::ContainerMap;
use crate::error::{MapError, Result};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default map file names
pub const DEFAULT_MAP_FILES: &[&str] = &["dockmap.yaml", "dockmap.yml"];

/// Container map file parser
pub struct MapParser;

impl MapParser {
    /// Find map file in directory
    pub fn find_map_file(dir: &Path) -> Option<PathBuf> {
        DEFAULT_MAP_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
    }

    /// Map file in the user configuration directory
    pub fn user_map_file() -> Option<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("dockmap").join("map.yaml"))
            .filter(|path| path.exists())
    }

    /// Parse map file from path.
    ///
    /// A map without a `name` is named after the file stem.
    pub fn parse_file(path: &Path) -> Result<ContainerMap> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MapError::MapParse(format!("Failed to read {}: {}", path.display(), e)))?;

        let mut map = Self::parse_str(&content)?;
        if map.name.is_empty() {
            if let Some(stem) = path.file_stem() {
                map.name = stem.to_string_lossy().into_owned();
            }
        }

        Ok(map)
    }

    /// Parse map from string, interpolating the process environment
    pub fn parse_str(content: &str) -> Result<ContainerMap> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::parse_str_with_env(content, &env)
    }

    /// Parse map from string, interpolating the given variables
    pub fn parse_str_with_env(
        content: &str,
        env: &HashMap<String, String>,
    ) -> Result<ContainerMap> {
        let content = interpolate(content, env)?;
        serde_yaml::from_str(&content)
            .map_err(|e| MapError::MapParse(format!("Failed to parse YAML: {}", e)))
    }
}

/// Substitute `${VAR}`, `${VAR:-default}` and `$VAR`; `$$` escapes a dollar sign
fn interpolate(content: &str, env: &HashMap<String, String>) -> Result<String> {
    let re = Regex::new(
        r"\$(?:\$|\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}|([A-Za-z_][A-Za-z0-9_]*))",
    )
    .map_err(|e| MapError::InvalidConfig(e.to_string()))?;

    let result = re.replace_all(content, |caps: &Captures| {
        let Some(var) = caps.get(1).or_else(|| caps.get(3)) else {
            return "$".to_string();
        };

        match (env.get(var.as_str()), caps.get(2)) {
            (Some(value), _) => value.clone(),
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => {
                tracing::warn!("Variable {} is not set, substituting an empty string", var.as_str());
                String::new()
            }
        }
    });

    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_map() {
        let yaml = r#"
name: app
volumes:
  log: /var/log/app
containers:
  web:
    image: nginx:latest
    attaches: [log]
  worker:
    uses: [web]
"#;

        let map = MapParser::parse_str(yaml).unwrap();
        assert_eq!(map.name, "app");
        assert_eq!(map.containers().count(), 2);
        assert_eq!(map.get("web").unwrap().image.as_deref(), Some("nginx:latest"));
        assert!(map.check_integrity().is_ok());
    }

    #[test]
    fn test_interpolate() {
        let mut env = HashMap::new();
        env.insert("TAG".to_string(), "1.0.0".to_string());
        env.insert("ROOT".to_string(), "/srv".to_string());

        assert_eq!(interpolate("nginx:${TAG}", &env).unwrap(), "nginx:1.0.0");
        assert_eq!(interpolate("$ROOT/log", &env).unwrap(), "/srv/log");
        assert_eq!(interpolate("${MISSING:-latest}", &env).unwrap(), "latest");
        assert_eq!(interpolate("${MISSING}", &env).unwrap(), "");
        assert_eq!(interpolate("cost $$5", &env).unwrap(), "cost $5");
    }

    #[test]
    fn test_parse_with_env() {
        let yaml = r#"
name: app
containers:
  web:
    image: "nginx:${TAG:-stable}"
"#;

        let map = MapParser::parse_str_with_env(yaml, &HashMap::new()).unwrap();
        assert_eq!(map.get("web").unwrap().image.as_deref(), Some("nginx:stable"));
    }

    #[test]
    fn test_parse_file_names_map_after_stem() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("dockmap.yaml");
        std::fs::write(&path, "containers:\n  web: {}\n").unwrap();

        assert_eq!(MapParser::find_map_file(temp.path()), Some(path.clone()));

        let map = MapParser::parse_file(&path).unwrap();
        assert_eq!(map.name, "dockmap");
        assert!(map.contains("web"));
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = MapParser::parse_str("containers: [");
        assert!(matches!(result, Err(MapError::MapParse(_))));
    }
}
