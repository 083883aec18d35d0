// Xresources-style persistence for the settings store.
use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

const FILE_HEADER: &str = "! halcyon settings, one `key: value` per line";

#[derive(Clone, Debug)]
pub struct SettingsStorage {
    path: PathBuf,
}

impl SettingsStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// `$XDG_CONFIG_HOME/halcyon/Settings-<version>.xresources`, falling back to `~/.config`.
    pub fn default_path() -> PathBuf {
        let mut path = match std::env::var_os("XDG_CONFIG_HOME").filter(|dir| !dir.is_empty()) {
            Some(config) => PathBuf::from(config),
            None => {
                let mut home = std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("."));
                home.push(".config");
                home
            }
        };
        path.push(env!("CARGO_PKG_NAME"));
        path.push(format!("Settings-{}.xresources", env!("CARGO_PKG_VERSION")));
        path
    }

    pub fn load(&self) -> Result<HashMap<String, String>, String> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(HashMap::new());
            }
            Err(err) => {
                return Err(format!(
                    "unable to open settings storage {}: {err}",
                    self.path.display()
                ));
            }
        };
        let mut map = HashMap::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|err| {
                format!(
                    "unable to read settings storage {}: {err}",
                    self.path.display()
                )
            })?;
            if let Some((key, value)) = parse_line(&line, index + 1)? {
                map.insert(key, value);
            }
        }
        Ok(map)
    }

    pub fn save(&self, map: &HashMap<String, String>) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                format!(
                    "unable to create settings directory {}: {err}",
                    parent.display()
                )
            })?;
        }

        let mut contents = String::from(FILE_HEADER);
        contents.push('\n');
        let mut entries: Vec<(&String, &String)> = map.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in entries {
            contents.push_str(key);
            contents.push_str(": ");
            contents.push_str(&encode_value(value));
            contents.push('\n');
        }

        let mut file = fs::File::create(&self.path).map_err(|err| {
            format!(
                "unable to open settings storage {}: {err}",
                self.path.display()
            )
        })?;
        file.write_all(contents.as_bytes()).map_err(|err| {
            format!(
                "unable to write settings storage {}: {err}",
                self.path.display()
            )
        })
    }
}

// Values with edge whitespace or a leading quote are quoted so they load back unchanged.
fn encode_value(value: &str) -> String {
    if value != value.trim() || value.starts_with('"') {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

fn decode_value(raw: &str) -> &str {
    raw.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(raw)
}

fn parse_line(line: &str, line_number: usize) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('!') || trimmed.starts_with('#') {
        return Ok(None);
    }

    let sep_index = trimmed
        .find([':', '='])
        .ok_or_else(|| format!("line {line_number}: missing ':' or '=' separator"))?;
    let (key, value) = trimmed.split_at(sep_index);
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("line {line_number}: empty key"));
    }

    Ok(Some((key.to_string(), decode_value(value[1..].trim()).to_string())))
}
